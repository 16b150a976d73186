//! General-purpose field functions: counters and a checksum over other fields.
//!
//! Each stores a single byte and fails if the result does not fit in one.

use crate::error::Error;
use crate::registry::{FunctionContext, FunctionRegistry};
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder};

/// Install `byte_count`, `bit_count`, `char_count`, `value_count` and `checksum`.
pub fn register(registry: &mut FunctionRegistry) -> Result<(), Error> {
    registry.register_ordinary("byte_count", byte_count)?;
    registry.register_ordinary("bit_count", bit_count)?;
    registry.register_ordinary("char_count", char_count)?;
    registry.register_ordinary("value_count", value_count)?;
    registry.register_ordinary("checksum", checksum)?;
    Ok(())
}

fn store_u8(ctx: &mut FunctionContext<'_>, args: &[String], n: u64) -> Result<u64, Error> {
    let b = u8::try_from(n).map_err(|_| ctx.error(format!("{} does not fit in one byte", n)))?;
    ctx.set_content(&args[0], Value::Bytes(vec![b]))?;
    Ok(8)
}

fn byte_count(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let n = ctx.byte_length(&args[1..])?;
    store_u8(ctx, args, n)
}

fn bit_count(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let mut n = 0;
    for tag in &args[1..] {
        n += ctx.effective_length_bits(tag)?;
    }
    store_u8(ctx, args, n)
}

fn char_count(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let mut n = 0;
    for tag in &args[1..] {
        for value in ctx.leaf_values(tag)? {
            let text = value
                .as_text()
                .ok_or_else(|| ctx.error(format!("`{}` holds non-text content", tag)))?;
            n += text.chars().count() as u64;
        }
    }
    store_u8(ctx, args, n)
}

fn value_count(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let mut n = 0;
    for tag in &args[1..] {
        n += ctx.leaf_values(tag)?.len() as u64;
    }
    store_u8(ctx, args, n)
}

/// Two's complement of the byte sum: covered bytes plus the checksum add up to zero.
fn checksum(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let encoding = ctx.encoding();
    let mut sum = 0u8;
    for tag in &args[1..] {
        for value in ctx.leaf_values(tag)? {
            let bytes = match value {
                Value::Text(s) => encoding.encode(s).map_err(|e| ctx.error(e))?,
                Value::Bytes(b) => b.clone(),
                Value::Bits(p) => {
                    let n = usize::from(p.width()).div_ceil(8);
                    let mut buf = vec![0u8; n];
                    if n > 0 {
                        BigEndian::write_uint(&mut buf, p.value(), n);
                    }
                    buf
                }
            };
            sum = bytes.iter().fold(sum, |acc, b| acc.wrapping_add(*b));
        }
    }
    store_u8(ctx, args, u64::from(sum.wrapping_neg()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Generator;
    use crate::parser::parse;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn generate(template: &str) -> Result<Generator, Error> {
        let doc = parse(template)?;
        let mut reg = FunctionRegistry::new();
        register(&mut reg)?;
        let mut generator = Generator::new(doc, reg)?;
        generator.generate(&mut StdRng::seed_from_u64(5))?;
        Ok(generator)
    }

    #[test]
    fn counts_over_fields() {
        let generator = generate(
            r#"<template><text>
                <bytes kind="function" spec="byte_count:[a][b]"/>
                <bits kind="function" spec="bit_count:[a][b]"/>
                <chars kind="function" spec="char_count:[name]"/>
                <values kind="function" spec="value_count:[g]"/>
                <a kind="bytes" spec="1:[0~255]"/>
                <b kind="bytes" spec="2:[0~255]"/>
                <name kind="literal" spec="hello"/>
                <g><x kind="bits" spec="4:1"/><y kind="bits" spec="4:2"/><z kind="literal" spec="z"/></g>
            </text></template>"#,
        )
        .expect("generate");
        assert_eq!(generator.content("bytes"), Some(&Value::Bytes(vec![3])));
        assert_eq!(generator.content("bits"), Some(&Value::Bytes(vec![24])));
        assert_eq!(generator.content("chars"), Some(&Value::Bytes(vec![5])));
        assert_eq!(generator.content("values"), Some(&Value::Bytes(vec![3])));
    }

    #[test]
    fn checksum_zeroes_the_sum() {
        let generator = generate(
            r#"<template><text>
                <body><a kind="bytes" spec="4:[0~255]"/><s kind="literal" spec="AB"/><n kind="bits" spec="8:7"/></body>
                <sum kind="function" spec="checksum:[body]"/>
            </text></template>"#,
        )
        .expect("generate");
        let a = generator.content("a").and_then(Value::as_bytes).expect("a").to_vec();
        let sum = generator.content("sum").and_then(Value::as_bytes).expect("sum")[0];
        let total = a
            .iter()
            .chain(b"AB".iter())
            .chain([7u8, sum].iter())
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(total, 0);
    }

    #[test]
    fn overflow_is_plugin_error() {
        let err = generate(
            r#"<template><text>
                <n kind="function" spec="byte_count:[blob]"/>
                <blob kind="bytes" spec="300:[0~255]"/>
            </text></template>"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Plugin { function, .. } if function == "byte_count"));
    }
}
