//! Field generators: turn a leaf field's parsed spec into content and a length in bits.
//!
//! Generators are pure apart from the injected random source; storing the content and
//! updating node state is left to the engine.

use crate::ast::{ChoiceLength, Count, RangeSpec, ValueRange};
use crate::value::{BitPattern, ContentIndex, Value};
use rand::seq::SliceRandom;
use rand::Rng;

/// Content plus its length in bits.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub value: Value,
    pub length_bits: u64,
}

/// Literal text: 8 bits per character.
pub fn literal(text: &str) -> Generated {
    Generated {
        value: Value::Text(text.to_string()),
        length_bits: 8 * text.chars().count() as u64,
    }
}

/// Pick one alternative uniformly.
pub fn choice<'a, R: Rng + ?Sized>(choices: &'a [String], rng: &mut R) -> Result<&'a str, String> {
    choices
        .choose(rng)
        .map(String::as_str)
        .ok_or_else(|| "choice has no alternatives".to_string())
}

/// Length of a stored choice under the given policy.
pub fn choice_length(policy: ChoiceLength, index: ContentIndex, chosen: &str) -> u64 {
    match policy {
        ChoiceLength::Index => 8 * index.to_string().len() as u64,
        ChoiceLength::Value => 8 * chosen.chars().count() as u64,
    }
}

/// `count` bytes, each drawn from a uniformly chosen range.
pub fn random_bytes<R: Rng + ?Sized>(spec: &RangeSpec, rng: &mut R) -> Result<Generated, String> {
    let count = draw_count(spec.count, rng);
    let mut bytes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let v = draw_value(&spec.ranges, rng)?;
        let b = u8::try_from(v).map_err(|_| format!("byte value {:#x} exceeds 0xff", v))?;
        bytes.push(b);
    }
    Ok(Generated {
        value: Value::Bytes(bytes),
        length_bits: 8 * u64::from(count),
    })
}

/// One value drawn from a uniformly chosen range, as a `count`-bit pattern.
pub fn random_bits<R: Rng + ?Sized>(spec: &RangeSpec, rng: &mut R) -> Result<Generated, String> {
    let count = draw_count(spec.count, rng);
    let width = u8::try_from(count)
        .ok()
        .filter(|w| *w <= BitPattern::MAX_WIDTH)
        .ok_or_else(|| format!("bit width {} exceeds {}", count, BitPattern::MAX_WIDTH))?;
    let v = draw_value(&spec.ranges, rng)?;
    let pattern =
        BitPattern::new(v, width).ok_or_else(|| format!("value {:#x} does not fit in {} bit(s)", v, width))?;
    Ok(Generated {
        value: Value::Bits(pattern),
        length_bits: u64::from(count),
    })
}

fn draw_count<R: Rng + ?Sized>(count: Count, rng: &mut R) -> u32 {
    match count {
        Count::Fixed(n) => n,
        Count::Range { low, high } => rng.gen_range(low..=high),
    }
}

fn draw_value<R: Rng + ?Sized>(ranges: &[ValueRange], rng: &mut R) -> Result<u64, String> {
    let range = ranges.choose(rng).ok_or_else(|| "no value ranges".to_string())?;
    Ok(rng.gen_range(range.low..=range.high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_range_spec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn literal_length_counts_chars() {
        let g = literal("MQTT");
        assert_eq!(g.length_bits, 32);
        assert_eq!(g.value, Value::Text("MQTT".to_string()));
    }

    #[test]
    fn choice_length_policies() {
        let mut store = crate::value::ContentStore::default();
        let mut idx = store.push(Value::Text(String::new()));
        for _ in 0..11 {
            idx = store.push(Value::Text(String::new()));
        }
        assert_eq!(idx.get(), 11);
        assert_eq!(choice_length(ChoiceLength::Index, idx, "hello"), 16);
        assert_eq!(choice_length(ChoiceLength::Value, idx, "hello"), 40);
    }

    #[test]
    fn random_bytes_stay_in_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let spec = parse_range_spec("f", "64:[0x10~0x1f][0xf0~0xff]").expect("spec");
        for _ in 0..50 {
            let g = random_bytes(&spec, &mut rng).expect("bytes");
            assert_eq!(g.length_bits, 64 * 8);
            let bytes = g.value.as_bytes().expect("bytes");
            assert_eq!(bytes.len(), 64);
            assert!(bytes.iter().all(|b| (0x10..=0x1f).contains(b) || *b >= 0xf0));
        }
    }

    #[test]
    fn random_bytes_ranged_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let spec = parse_range_spec("f", "[1~4]:[0x61~0x7a]").expect("spec");
        let mut seen = [false; 5];
        for _ in 0..200 {
            let g = random_bytes(&spec, &mut rng).expect("bytes");
            let n = g.value.as_bytes().expect("bytes").len();
            assert!((1..=4).contains(&n));
            assert_eq!(g.length_bits, 8 * n as u64);
            seen[n] = true;
        }
        assert!(seen[1..].iter().all(|s| *s));
    }

    #[test]
    fn random_bits_width_and_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let spec = parse_range_spec("f", "4:[1~14]").expect("spec");
        for _ in 0..100 {
            let g = random_bits(&spec, &mut rng).expect("bits");
            assert_eq!(g.length_bits, 4);
            let p = g.value.as_bits().expect("bits");
            assert_eq!(p.width(), 4);
            assert!((1..=14).contains(&p.value()));
        }
    }

    #[test]
    fn random_bits_degenerate_value() {
        let mut rng = StdRng::seed_from_u64(3);
        let spec = parse_range_spec("f", "3:5").expect("spec");
        let g = random_bits(&spec, &mut rng).expect("bits");
        assert_eq!(g.value.as_bits().map(|p| p.to_string()), Some("0b101".to_string()));
    }

    #[test]
    fn random_bits_overflow_with_ranged_width() {
        let mut rng = StdRng::seed_from_u64(3);
        let spec = parse_range_spec("f", "[1~1]:[4~4]").expect("spec");
        assert!(random_bits(&spec, &mut rng).is_err());
    }
}
