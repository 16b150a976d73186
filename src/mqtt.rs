//! Field functions for MQTT control packets, used by `templates/mqtt.xml`.
//!
//! | Name | Contract | Arguments | Output |
//! |------|----------|-----------|--------|
//! | `remaining_length` | ordinary | fields after the fixed header | variable-length integer (1–4 bytes) |
//! | `type_flags` | ordinary | packet type field | 4 flag bits |
//! | `string_length` | ordinary | string field(s) | big-endian `u16` byte count |
//! | `packet_id` | ordinary | fixed-header flags field | non-zero `u16` when QoS > 0, else nothing |
//! | `packet_body` | reference | packet type field | `<name>_body` catalogue entry |

use crate::error::Error;
use crate::registry::{FunctionContext, FunctionRegistry};
use crate::value::{BitPattern, Value};
use byteorder::{BigEndian, ByteOrder};
use rand::Rng;

/// Largest value the remaining-length encoding can carry.
pub const MAX_REMAINING_LENGTH: u64 = 268_435_455;

/// Control packet names by type value (0 and 15 are reserved).
pub const PACKET_TYPES: [&str; 16] = [
    "reserved",
    "connect",
    "connack",
    "publish",
    "puback",
    "pubrec",
    "pubrel",
    "pubcomp",
    "subscribe",
    "suback",
    "unsubscribe",
    "unsuback",
    "pingreq",
    "pingresp",
    "disconnect",
    "auth",
];

/// Install every MQTT function.
pub fn register(registry: &mut FunctionRegistry) -> Result<(), Error> {
    registry.register_ordinary("remaining_length", remaining_length)?;
    registry.register_ordinary("type_flags", type_flags)?;
    registry.register_ordinary("string_length", string_length)?;
    registry.register_ordinary("packet_id", packet_id)?;
    registry.register_reference("packet_body", packet_body)?;
    Ok(())
}

/// Encode `n` as an MQTT variable byte integer.
pub fn encode_remaining_length(mut n: u64) -> Option<Vec<u8>> {
    if n > MAX_REMAINING_LENGTH {
        return None;
    }
    let mut out = Vec::with_capacity(4);
    loop {
        let mut byte = (n % 128) as u8;
        n /= 128;
        if n > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if n == 0 {
            return Some(out);
        }
    }
}

/// Fixed-header flags for a packet type; PUBLISH gets random DUP/QoS/RETAIN.
pub fn flags_for_type<R: Rng + ?Sized>(packet_type: u64, rng: &mut R) -> u64 {
    match packet_type {
        3 => {
            let dup = u64::from(rng.gen_bool(0.5));
            let qos = rng.gen_range(0..=2u64);
            let retain = u64::from(rng.gen_bool(0.5));
            dup << 3 | qos << 1 | retain
        }
        6 | 8 | 10 => 0b0010,
        _ => 0,
    }
}

fn remaining_length(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let n = ctx.byte_length(&args[1..])?;
    let encoded = encode_remaining_length(n).ok_or_else(|| ctx.error(format!("remaining length {} too large", n)))?;
    let bits = 8 * encoded.len() as u64;
    ctx.set_content(&args[0], Value::Bytes(encoded))?;
    Ok(bits)
}

fn type_flags(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let type_tag = args.get(1).ok_or_else(|| ctx.error("expects the packet type field"))?;
    let packet_type = ctx.int_value(type_tag)?;
    let flags = flags_for_type(packet_type, ctx.rng());
    let pattern = BitPattern::new(flags, 4).ok_or_else(|| ctx.error("flags exceed 4 bits"))?;
    ctx.set_content(&args[0], Value::Bits(pattern))?;
    Ok(4)
}

fn string_length(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let n = ctx.byte_length(&args[1..])?;
    let n = u16::try_from(n).map_err(|_| ctx.error(format!("string of {} bytes exceeds u16", n)))?;
    let mut buf = vec![0u8; 2];
    BigEndian::write_u16(&mut buf, n);
    ctx.set_content(&args[0], Value::Bytes(buf))?;
    Ok(16)
}

fn packet_id(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<u64, Error> {
    let flags_tag = args.get(1).ok_or_else(|| ctx.error("expects the flags field"))?;
    let qos = (ctx.int_value(flags_tag)? >> 1) & 0b11;
    let id = if qos == 0 {
        Vec::new()
    } else {
        let mut buf = vec![0u8; 2];
        BigEndian::write_u16(&mut buf, ctx.rng().gen_range(1..=u16::MAX));
        buf
    };
    let bits = 8 * id.len() as u64;
    ctx.set_content(&args[0], Value::Bytes(id))?;
    Ok(bits)
}

fn packet_body(ctx: &mut FunctionContext<'_>, args: &[String]) -> Result<String, Error> {
    let type_tag = args.get(1).ok_or_else(|| ctx.error("expects the packet type field"))?;
    let packet_type = ctx.int_value(type_tag)?;
    let name = usize::try_from(packet_type)
        .ok()
        .and_then(|i| PACKET_TYPES.get(i))
        .ok_or_else(|| ctx.error(format!("unknown packet type {}", packet_type)))?;
    Ok(format!("{}_body", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn remaining_length_encoding() {
        assert_eq!(encode_remaining_length(0), Some(vec![0x00]));
        assert_eq!(encode_remaining_length(127), Some(vec![0x7f]));
        assert_eq!(encode_remaining_length(128), Some(vec![0x80, 0x01]));
        assert_eq!(encode_remaining_length(16_383), Some(vec![0xff, 0x7f]));
        assert_eq!(encode_remaining_length(16_384), Some(vec![0x80, 0x80, 0x01]));
        assert_eq!(
            encode_remaining_length(MAX_REMAINING_LENGTH),
            Some(vec![0xff, 0xff, 0xff, 0x7f])
        );
        assert_eq!(encode_remaining_length(MAX_REMAINING_LENGTH + 1), None);
    }

    #[test]
    fn flags_by_type() {
        let mut rng = StdRng::seed_from_u64(9);
        assert_eq!(flags_for_type(1, &mut rng), 0);
        assert_eq!(flags_for_type(8, &mut rng), 0b0010);
        assert_eq!(flags_for_type(12, &mut rng), 0);
        for _ in 0..100 {
            let f = flags_for_type(3, &mut rng);
            assert!(f < 16);
            assert_ne!((f >> 1) & 0b11, 0b11, "QoS 3 is never drawn");
        }
    }

    #[test]
    fn register_twice_fails() {
        let mut reg = FunctionRegistry::new();
        register(&mut reg).expect("register");
        assert!(reg.get("packet_body").expect("packet_body").is_reference());
        assert!(register(&mut reg).is_err());
    }
}
