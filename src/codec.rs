//! Serialize a resolved template into bytes.
//!
//! Text content goes through the document's text encoding, byte strings are copied,
//! bit patterns are packed MSB-first into a running accumulator that emits a byte every
//! 8 bits, and reference fields are replaced by their `data` target. The message must end
//! on a byte boundary, and byte-oriented content must not start while bits are pending.

use crate::ast::*;
use crate::error::Error;
use crate::value::{ContentStore, Value};
use byteorder::WriteBytesExt;
use log::trace;
use std::io::Write;

/// Serialize the `text` section. Fails with [`Error::Alignment`] once the walk is complete
/// if any bit-level content left the stream unaligned.
pub fn serialize(doc: &Document, store: &ContentStore, max_reference_depth: usize) -> Result<Vec<u8>, Error> {
    let mut s = Serializer {
        doc,
        store,
        max_reference_depth,
        out: Vec::new(),
        bits: BitWriteState::default(),
        misaligned: None,
    };
    s.write_node(doc.text(), 0)?;
    if let Some((tag, pending_bits)) = s.misaligned {
        return Err(Error::Alignment {
            tag: Some(tag),
            pending_bits,
        });
    }
    if !s.bits.is_aligned() {
        return Err(Error::Alignment {
            tag: None,
            pending_bits: s.bits.next_bit,
        });
    }
    Ok(s.out)
}

struct Serializer<'a> {
    doc: &'a Document,
    store: &'a ContentStore,
    max_reference_depth: usize,
    out: Vec<u8>,
    bits: BitWriteState,
    /// First byte-oriented field written while bits were pending, with the pending count.
    misaligned: Option<(String, u8)>,
}

impl Serializer<'_> {
    fn write_node(&mut self, id: NodeId, depth: usize) -> Result<(), Error> {
        let (doc, store) = (self.doc, self.store);
        let node = doc.node(id);
        if let Field::Group(children) = &node.field {
            for &child in children {
                self.write_node(child, depth)?;
            }
            return Ok(());
        }
        let value = node
            .state
            .content
            .and_then(|i| store.get(i))
            .ok_or_else(|| Error::Template(format!("`{}` was not resolved", node.tag)))?;

        if node.state.data_kind == DataKind::Reference {
            let target_tag = value
                .as_text()
                .ok_or_else(|| Error::Template(format!("reference `{}` holds no target tag", node.tag)))?;
            let target = doc
                .find(target_tag)
                .filter(|t| doc.section_of(*t) == Section::Data)
                .ok_or_else(|| Error::UnresolvedReference {
                    tag: target_tag.to_string(),
                    from: node.tag.clone(),
                })?;
            if depth >= self.max_reference_depth {
                return Err(Error::Template(format!(
                    "reference `{}` nested deeper than {}",
                    node.tag, self.max_reference_depth
                )));
            }
            trace!("`{}` -> `{}`", node.tag, target_tag);
            return self.write_node(target, depth + 1);
        }

        match value {
            Value::Text(s) => {
                let bytes = doc.encoding.encode(s).map_err(|message| Error::Encoding {
                    tag: node.tag.clone(),
                    message,
                })?;
                self.write_bytes(&node.tag, &bytes)
            }
            Value::Bytes(b) => self.write_bytes(&node.tag, b),
            Value::Bits(p) => {
                trace!("`{}`: {}", node.tag, p);
                for bit in p.bits() {
                    self.write_bit(bit)?;
                }
                Ok(())
            }
        }
    }

    fn write_bytes(&mut self, tag: &str, bytes: &[u8]) -> Result<(), Error> {
        if !self.bits.is_aligned() && self.misaligned.is_none() && !bytes.is_empty() {
            self.misaligned = Some((tag.to_string(), self.bits.next_bit));
        }
        trace!("`{}`: {} byte(s)", tag, bytes.len());
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Error> {
        if bit {
            self.bits.cur |= 0x80 >> self.bits.next_bit;
        }
        self.bits.next_bit += 1;
        if self.bits.next_bit == 8 {
            self.out.write_u8(self.bits.cur)?;
            self.bits = BitWriteState::default();
        }
        Ok(())
    }
}

/// Bit-level packing state. Bits are written MSB-first within each byte.
#[derive(Clone, Copy, Debug, Default)]
struct BitWriteState {
    cur: u8,
    next_bit: u8, // 0..8, where 0 means "byte boundary / empty"
}

impl BitWriteState {
    fn is_aligned(&self) -> bool {
        self.next_bit == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::BitPattern;

    fn leaf(doc: &mut Document, store: &mut ContentStore, tag: &str, value: Value) -> NodeId {
        let field = match &value {
            Value::Text(s) => Field::Literal(s.clone()),
            _ => Field::Literal(String::new()),
        };
        let text = doc.text();
        let id = doc.add_node(text, tag, "", field).expect("add");
        let data_kind = match &value {
            Value::Text(_) => DataKind::Text,
            Value::Bytes(_) => DataKind::Bytes,
            Value::Bits(_) => DataKind::Bits,
        };
        let index = store.push(value);
        let state = &mut doc.node_mut(id).state;
        state.content = Some(index);
        state.data_kind = data_kind;
        id
    }

    fn bits(value: u64, width: u8) -> Value {
        Value::Bits(BitPattern::new(value, width).expect("bits"))
    }

    #[test]
    fn nibbles_pack_msb_first() {
        let mut doc = Document::new();
        let mut store = ContentStore::default();
        leaf(&mut doc, &mut store, "hi", bits(0xA, 4));
        leaf(&mut doc, &mut store, "lo", bits(0x5, 4));
        leaf(&mut doc, &mut store, "tail", Value::Bytes(vec![0xff]));
        let out = serialize(&doc, &store, 8).expect("serialize");
        assert_eq!(out, vec![0xA5, 0xff]);
    }

    #[test]
    fn bits_spanning_bytes() {
        let mut doc = Document::new();
        let mut store = ContentStore::default();
        leaf(&mut doc, &mut store, "a", bits(0b101, 3));
        leaf(&mut doc, &mut store, "b", bits(0x1fff, 13));
        let out = serialize(&doc, &store, 8).expect("serialize");
        assert_eq!(out, vec![0b1011_1111, 0xff]);
    }

    #[test]
    fn trailing_bits_are_an_alignment_error() {
        let mut doc = Document::new();
        let mut store = ContentStore::default();
        leaf(&mut doc, &mut store, "a", bits(1, 3));
        let err = serialize(&doc, &store, 8).unwrap_err();
        assert!(matches!(err, Error::Alignment { tag: None, pending_bits: 3 }));
    }

    #[test]
    fn bytes_inside_a_partial_byte_are_reported() {
        let mut doc = Document::new();
        let mut store = ContentStore::default();
        leaf(&mut doc, &mut store, "a", bits(1, 4));
        leaf(&mut doc, &mut store, "name", Value::Text("AB".to_string()));
        leaf(&mut doc, &mut store, "b", bits(1, 4));
        let err = serialize(&doc, &store, 8).unwrap_err();
        match err {
            Error::Alignment { tag, pending_bits } => {
                assert_eq!(tag.as_deref(), Some("name"));
                assert_eq!(pending_bits, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn text_uses_document_encoding() {
        let mut doc = Document::new();
        doc.encoding = TextEncoding::Ascii;
        let mut store = ContentStore::default();
        leaf(&mut doc, &mut store, "s", Value::Text("é".to_string()));
        assert!(matches!(serialize(&doc, &store, 8), Err(Error::Encoding { .. })));
    }
}
