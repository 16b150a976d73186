//! Generated field values and the append-only content store that holds them.

use std::fmt;

/// A fixed-width bit pattern, most significant bit first on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitPattern {
    value: u64,
    width: u8,
}

impl BitPattern {
    pub const MAX_WIDTH: u8 = 64;

    /// Build a pattern of exactly `width` bits. `None` when `value` does not fit.
    pub fn new(value: u64, width: u8) -> Option<Self> {
        if width > Self::MAX_WIDTH {
            return None;
        }
        if width < 64 && value >> width != 0 {
            return None;
        }
        Some(BitPattern { value, width })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Bits from most to least significant.
    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.width).rev().map(move |i| (self.value >> i) & 1 != 0)
    }
}

impl fmt::Display for BitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0b")?;
        for bit in self.bits() {
            write!(f, "{}", if bit { '1' } else { '0' })?;
        }
        Ok(())
    }
}

/// Content produced for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Literal/choice text, and the target tag of a reference field.
    Text(String),
    Bytes(Vec<u8>),
    Bits(BitPattern),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bits(&self) -> Option<BitPattern> {
        match self {
            Value::Bits(b) => Some(*b),
            _ => None,
        }
    }
}

/// Index of a value in the [`ContentStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentIndex(usize);

impl ContentIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ContentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only buffer of generated values. Indices stay valid until [`ContentStore::clear`].
#[derive(Debug, Default, Clone)]
pub struct ContentStore {
    values: Vec<Value>,
}

impl ContentStore {
    pub fn push(&mut self, value: Value) -> ContentIndex {
        self.values.push(value);
        ContentIndex(self.values.len() - 1)
    }

    pub fn get(&self, index: ContentIndex) -> Option<&Value> {
        self.values.get(index.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_pattern_rejects_overflow() {
        assert!(BitPattern::new(0b1111, 4).is_some());
        assert!(BitPattern::new(0b1_0000, 4).is_none());
        assert!(BitPattern::new(u64::MAX, 64).is_some());
        assert!(BitPattern::new(0, 65).is_none());
    }

    #[test]
    fn bit_pattern_is_left_padded() {
        let p = BitPattern::new(0b101, 6).expect("fits");
        assert_eq!(p.to_string(), "0b000101");
        let bits: Vec<bool> = p.bits().collect();
        assert_eq!(bits, vec![false, false, false, true, false, true]);
    }

    #[test]
    fn store_indices_are_stable() {
        let mut store = ContentStore::default();
        let a = store.push(Value::Text("a".to_string()));
        let b = store.push(Value::Bytes(vec![1, 2]));
        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert_eq!(store.get(a).and_then(Value::as_text), Some("a"));
        assert_eq!(store.get(b).and_then(Value::as_bytes), Some(&[1u8, 2][..]));
        store.clear();
        assert!(store.get(a).is_none());
    }
}
