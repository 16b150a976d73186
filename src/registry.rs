//! Registry of computed-field functions and the context they run in.
//!
//! A function is registered under a unique name as one of two contracts:
//!
//! - **Ordinary**: `(ctx, args) -> length in bits`. Runs in the scheduling phase, after every
//!   field it names has been resolved. It must store the owning node's content through
//!   [`FunctionContext::set_content`]; the returned length is added to the node and its ancestors.
//! - **Reference**: `(ctx, args) -> tag`. Runs eagerly in the parse phase and names a node of the
//!   `data` catalogue, which is then serialized in place of the field.
//!
//! `args[0]` is always the owning node's tag, followed by the bracketed arguments of the field spec.

use crate::ast::{DataKind, Document, Field, NodeId, TextEncoding};
use crate::error::Error;
use crate::value::{ContentStore, Value};
use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;

const MAX_REFERENCE_HOPS: usize = 64;

pub type OrdinaryFn = dyn Fn(&mut FunctionContext<'_>, &[String]) -> Result<u64, Error>;
pub type ReferenceFn = dyn Fn(&mut FunctionContext<'_>, &[String]) -> Result<String, Error>;

/// A registered function, tagged with its contract.
pub enum FieldFunction {
    Ordinary(Box<OrdinaryFn>),
    Reference(Box<ReferenceFn>),
}

impl FieldFunction {
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldFunction::Reference(_))
    }
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FieldFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_ordinary<F>(&mut self, name: impl Into<String>, f: F) -> Result<(), Error>
    where
        F: Fn(&mut FunctionContext<'_>, &[String]) -> Result<u64, Error> + 'static,
    {
        self.insert(name.into(), FieldFunction::Ordinary(Box::new(f)))
    }

    pub fn register_reference<F>(&mut self, name: impl Into<String>, f: F) -> Result<(), Error>
    where
        F: Fn(&mut FunctionContext<'_>, &[String]) -> Result<String, Error> + 'static,
    {
        self.insert(name.into(), FieldFunction::Reference(Box::new(f)))
    }

    fn insert(&mut self, name: String, f: FieldFunction) -> Result<(), Error> {
        if self.functions.contains_key(&name) {
            return Err(Error::DuplicateFunction(name));
        }
        self.functions.insert(name, f);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// What a function sees while it runs: the tree, the content store and the random source.
pub struct FunctionContext<'a> {
    doc: &'a mut Document,
    store: &'a mut ContentStore,
    rng: &'a mut dyn RngCore,
    node: NodeId,
    function: &'a str,
}

impl<'a> FunctionContext<'a> {
    pub(crate) fn new(
        doc: &'a mut Document,
        store: &'a mut ContentStore,
        rng: &'a mut dyn RngCore,
        node: NodeId,
        function: &'a str,
    ) -> Self {
        FunctionContext {
            doc,
            store,
            rng,
            node,
            function,
        }
    }

    /// Tag of the field being computed.
    pub fn tag(&self) -> &str {
        &self.doc.node(self.node).tag
    }

    /// Encoding the serializer applies to text content.
    pub fn encoding(&self) -> TextEncoding {
        self.doc.encoding
    }

    pub fn rng(&mut self) -> &mut dyn RngCore {
        &mut *self.rng
    }

    /// A plugin error attributed to this function and field.
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::plugin(self.function, self.tag(), message)
    }

    pub fn node_id(&self, tag: &str) -> Result<NodeId, Error> {
        self.doc.find(tag).ok_or_else(|| Error::UnresolvedReference {
            tag: tag.to_string(),
            from: self.tag().to_string(),
        })
    }

    pub fn content(&self, tag: &str) -> Result<Option<&Value>, Error> {
        let id = self.node_id(tag)?;
        Ok(self.doc.node(id).state.content.and_then(|i| self.store.get(i)))
    }

    /// Store content for a field and set its serialization kind from the value.
    pub fn set_content(&mut self, tag: &str, value: Value) -> Result<(), Error> {
        let id = self.node_id(tag)?;
        if self.doc.node(id).state.content.is_some() {
            return Err(self.error(format!("content of `{}` already set", tag)));
        }
        let data_kind = match &value {
            Value::Text(_) => DataKind::Text,
            Value::Bytes(_) => DataKind::Bytes,
            Value::Bits(_) => DataKind::Bits,
        };
        let index = self.store.push(value);
        let state = &mut self.doc.node_mut(id).state;
        state.content = Some(index);
        state.data_kind = data_kind;
        Ok(())
    }

    pub fn length_bits(&self, tag: &str) -> Result<u64, Error> {
        let id = self.node_id(tag)?;
        Ok(self.doc.node(id).state.length_bits)
    }

    /// Overwrite a stored length. Ancestors are not updated.
    pub fn set_length_bits(&mut self, tag: &str, bits: u64) -> Result<(), Error> {
        let id = self.node_id(tag)?;
        self.doc.node_mut(id).state.length_bits = bits;
        Ok(())
    }

    /// Length of a field as it will be serialized: groups sum their children and reference
    /// fields report their target, so references not yet back-filled are still counted.
    pub fn effective_length_bits(&self, tag: &str) -> Result<u64, Error> {
        let mut bits = 0u64;
        let mut stack = vec![(self.node_id(tag)?, 0usize)];
        while let Some((id, hops)) = stack.pop() {
            let node = self.doc.node(id);
            if let Field::Group(children) = &node.field {
                stack.extend(children.iter().map(|c| (*c, hops)));
                continue;
            }
            let state = &node.state;
            let target = match state.data_kind {
                DataKind::Reference => state.content.and_then(|i| self.store.get(i)).and_then(Value::as_text),
                _ => None,
            };
            match target {
                Some(_) if hops >= MAX_REFERENCE_HOPS => {
                    return Err(self.error(format!("reference chain from `{}` does not terminate", tag)));
                }
                Some(target) => stack.push((self.node_id(target)?, hops + 1)),
                None => bits += state.length_bits,
            }
        }
        Ok(bits)
    }

    /// Whole bytes spanned by the given fields (rounded up).
    pub fn byte_length<S: AsRef<str>>(&self, tags: &[S]) -> Result<u64, Error> {
        let mut bits = 0u64;
        for tag in tags {
            bits += self.effective_length_bits(tag.as_ref())?;
        }
        Ok(bits.div_ceil(8))
    }

    /// Leaf content under a field in serialization order: groups are flattened and references
    /// followed to their targets.
    pub fn leaf_values(&self, tag: &str) -> Result<Vec<&Value>, Error> {
        let mut out = Vec::new();
        let mut stack = vec![(self.node_id(tag)?, 0usize)];
        while let Some((id, hops)) = stack.pop() {
            let node = self.doc.node(id);
            if let Field::Group(children) = &node.field {
                stack.extend(children.iter().rev().map(|c| (*c, hops)));
                continue;
            }
            let value = node
                .state
                .content
                .and_then(|i| self.store.get(i))
                .ok_or_else(|| self.error(format!("`{}` has no content yet", node.tag)))?;
            match (node.state.data_kind, value) {
                (DataKind::Reference, Value::Text(target)) => {
                    if hops >= MAX_REFERENCE_HOPS {
                        return Err(self.error(format!("reference chain from `{}` does not terminate", tag)));
                    }
                    stack.push((self.node_id(target)?, hops + 1));
                }
                _ => out.push(value),
            }
        }
        Ok(out)
    }

    /// Numeric reading of a resolved field: bit patterns by value, byte strings (up to 8)
    /// big-endian, text as a decimal number.
    pub fn int_value(&self, tag: &str) -> Result<u64, Error> {
        match self.content(tag)? {
            Some(Value::Bits(p)) => Ok(p.value()),
            Some(Value::Bytes(b)) if !b.is_empty() && b.len() <= 8 => Ok(BigEndian::read_uint(b, b.len())),
            Some(Value::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| self.error(format!("`{}` is not numeric: {:?}", tag, s))),
            Some(other) => Err(self.error(format!("`{}` has no integer reading: {:?}", tag, other))),
            None => Err(self.error(format!("`{}` has no content yet", tag))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::BitPattern;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = FunctionRegistry::new();
        reg.register_ordinary("f", |_, _| Ok(0)).expect("first");
        let err = reg.register_reference("f", |_, _| Ok(String::new())).unwrap_err();
        assert!(matches!(err, Error::DuplicateFunction(n) if n == "f"));
        assert!(!reg.get("f").expect("registered").is_reference());
    }

    #[test]
    fn context_reads_and_writes() {
        let mut doc = Document::new();
        let text = doc.text();
        let a = doc.add_node(text, "a", "", Field::Literal("x".to_string())).expect("a");
        let f = doc
            .add_node(text, "f", "", Field::Group(Vec::new()))
            .expect("f");
        doc.node_mut(a).state.length_bits = 8;
        let mut store = ContentStore::default();
        let idx = store.push(Value::Bits(BitPattern::new(0b1010, 4).expect("bits")));
        doc.node_mut(a).state.content = Some(idx);
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = FunctionContext::new(&mut doc, &mut store, &mut rng, f, "test");

        assert_eq!(ctx.tag(), "f");
        assert_eq!(ctx.int_value("a").expect("int"), 10);
        assert_eq!(ctx.byte_length(&["a"]).expect("len"), 1);
        ctx.set_content("f", Value::Bytes(vec![1, 2])).expect("set");
        assert!(ctx.set_content("f", Value::Bytes(vec![3])).is_err());
        assert_eq!(ctx.int_value("f").expect("int"), 0x0102);
        assert!(matches!(
            ctx.length_bits("missing"),
            Err(Error::UnresolvedReference { tag, from }) if tag == "missing" && from == "f"
        ));
    }
}
