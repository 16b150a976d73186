//! Resolution engine: the parse phase, the deferred-function schedule and reference
//! resolution, behind the [`Generator`] facade.
//!
//! ## Cycle
//!
//! 1. **Parse phase** (pre-order over `text`). Leaves are generated on the spot. Groups are
//!    marked resolved on entry and sum their children. Function fields resolve their
//!    arguments first (wherever they live in the tree) and are queued; reference functions
//!    run immediately and pull their `data` target through the parse phase.
//! 2. **Scheduling phase**. Ordinary entries run in discovery order, or in `priority` order
//!    when one is given; each returned length is added to the field and all its ancestors.
//!    Reference entries run last and copy their target's length.
//! 3. **Serialization** ([`codec`](crate::codec)).
//!
//! A node marked resolved is never recomputed: it contributes its cached length. Clearing
//! only part of the tree ([`Generator::clear_node`]) therefore regenerates that part alone.
//!
//! Functions that depend on each other terminate (a function is marked resolved before its
//! arguments are visited) but the one that runs first sees a zero length for the other; there
//! is no cycle detection.

use crate::ast::*;
use crate::codec;
use crate::error::Error;
use crate::generate::{self, Generated};
use crate::registry::{FieldFunction, FunctionContext, FunctionRegistry};
use crate::value::{ContentStore, Value};
use log::{debug, info};
use rand::RngCore;
use std::io::Write;

/// Default bound on nested reference expansion.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 64;

/// Caller overrides for document-level settings.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Overrides the document's `choice-length` attribute.
    pub choice_length: Option<ChoiceLength>,
    pub max_reference_depth: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            choice_length: None,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Ordinary,
    /// Back-fills the field's length from `target` once ordinary functions have run.
    Reference { target: NodeId },
}

/// One deferred invocation. `args[0]` is the owning field's tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub node: NodeId,
    pub function: String,
    pub args: Vec<String>,
    pub kind: EntryKind,
}

/// Owns a template, its functions and the content of the current cycle.
#[derive(Debug)]
pub struct Generator {
    doc: Document,
    registry: FunctionRegistry,
    store: ContentStore,
    options: GeneratorOptions,
    schedule: Vec<ScheduleEntry>,
}

impl Generator {
    /// Every function named by the document must already be registered.
    pub fn new(doc: Document, registry: FunctionRegistry) -> Result<Self, Error> {
        Self::with_options(doc, registry, GeneratorOptions::default())
    }

    pub fn with_options(
        doc: Document,
        registry: FunctionRegistry,
        options: GeneratorOptions,
    ) -> Result<Self, Error> {
        for id in doc.fields() {
            let node = doc.node(id);
            if let Field::Function(call) = &node.field {
                if !registry.contains(&call.name) {
                    return Err(Error::UnregisteredFunction {
                        function: call.name.clone(),
                        tag: node.tag.clone(),
                    });
                }
            }
        }
        Ok(Generator {
            doc,
            registry,
            store: ContentStore::default(),
            options,
            schedule: Vec::new(),
        })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Entries invoked by the last cycle, in invocation order.
    pub fn schedule(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    pub fn content(&self, tag: &str) -> Option<&Value> {
        let id = self.doc.find(tag)?;
        self.doc.node(id).state.content.and_then(|i| self.store.get(i))
    }

    pub fn length_bits(&self, tag: &str) -> Option<u64> {
        self.doc.find(tag).map(|id| self.doc.node(id).state.length_bits)
    }

    /// Length of the whole `text` section after the last cycle.
    pub fn message_length_bits(&self) -> u64 {
        self.doc.node(self.doc.text()).state.length_bits
    }

    /// Forget everything generated; the next cycle regenerates the whole message.
    pub fn clear(&mut self) {
        self.doc.clear();
        self.store.clear();
        self.schedule.clear();
    }

    /// Forget one field (and its subtree); the next [`run`](Self::run) regenerates only it.
    /// Clearing a `data` node also clears the references that reach it.
    pub fn clear_node(&mut self, tag: &str) -> Result<(), Error> {
        let id = self.doc.find(tag).ok_or_else(|| Error::UnresolvedReference {
            tag: tag.to_string(),
            from: "clear_node".to_string(),
        })?;
        self.doc.clear_subtree(id);
        // Catalogue nodes are only reached through references, which must resolve again.
        let mut pending = vec![id];
        while let Some(cleared) = pending.pop() {
            if self.doc.section_of(cleared) != Section::Data {
                continue;
            }
            let covered: Vec<NodeId> = std::iter::once(cleared).chain(self.doc.ancestors(cleared)).collect();
            let referrers: Vec<NodeId> = self
                .doc
                .fields()
                .filter(|&n| {
                    let state = &self.doc.node(n).state;
                    state.data_kind == DataKind::Reference
                        && state
                            .content
                            .and_then(|i| self.store.get(i))
                            .and_then(Value::as_text)
                            .and_then(|target| self.doc.find(target))
                            .is_some_and(|target| covered.contains(&target))
                })
                .collect();
            for referrer in referrers {
                debug!("clearing reference `{}` into `{}`", self.doc.node(referrer).tag, tag);
                self.doc.clear_subtree(referrer);
                pending.push(referrer);
            }
        }
        Ok(())
    }

    /// Clear, then run one full cycle.
    pub fn generate<R: RngCore>(&mut self, rng: &mut R) -> Result<Vec<u8>, Error> {
        self.clear();
        self.run(rng)
    }

    /// Generate one message and hand it to `sink`. Nothing is written if generation fails.
    pub fn generate_into<R: RngCore, W: Write>(&mut self, rng: &mut R, sink: &mut W) -> Result<usize, Error> {
        let bytes = self.generate(rng)?;
        sink.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Run a cycle on the current state, keeping whatever is already resolved.
    pub fn run<R: RngCore>(&mut self, rng: &mut R) -> Result<Vec<u8>, Error> {
        self.resolve(rng)?;
        let bytes = codec::serialize(&self.doc, &self.store, self.options.max_reference_depth)?;
        info!(
            "generated {} byte(s), {} function(s) invoked",
            bytes.len(),
            self.schedule.len()
        );
        Ok(bytes)
    }

    /// Parse and scheduling phases only.
    pub fn resolve<R: RngCore>(&mut self, rng: &mut R) -> Result<(), Error> {
        let choice_length = self.options.choice_length.unwrap_or(self.doc.choice_length);
        let text = self.doc.text();
        let mut cycle = Cycle {
            doc: &mut self.doc,
            store: &mut self.store,
            registry: &self.registry,
            rng,
            choice_length,
            schedule: Vec::new(),
        };
        cycle.resolve(text)?;
        self.schedule = cycle.run_schedule()?;
        Ok(())
    }
}

/// Borrowed state of one cycle.
struct Cycle<'a> {
    doc: &'a mut Document,
    store: &'a mut ContentStore,
    registry: &'a FunctionRegistry,
    rng: &'a mut dyn RngCore,
    choice_length: ChoiceLength,
    schedule: Vec<ScheduleEntry>,
}

impl Cycle<'_> {
    /// Parse phase for one node; returns its (possibly provisional) length in bits.
    fn resolve(&mut self, id: NodeId) -> Result<u64, Error> {
        let node = self.doc.node(id);
        if node.state.is_resolved() {
            return Ok(node.state.length_bits);
        }
        match node.field.clone() {
            Field::Group(children) => {
                self.mark_resolved(id);
                let mut total = 0u64;
                for child in children {
                    total += self.resolve(child)?;
                }
                self.doc.node_mut(id).state.length_bits = total;
                Ok(total)
            }
            Field::Literal(text) => {
                let generated = generate::literal(&text);
                let measured = self.doc.node(id).state.length_bits;
                let length_bits = if measured == 0 { generated.length_bits } else { measured };
                self.store_leaf(id, generated.value, length_bits);
                Ok(length_bits)
            }
            Field::Choice(choices) => {
                let chosen = generate::choice(&choices, &mut *self.rng)
                    .map_err(|e| self.spec_error(id, e))?
                    .to_string();
                let index = self.store.push(Value::Text(chosen.clone()));
                let length_bits = generate::choice_length(self.choice_length, index, &chosen);
                let state = &mut self.doc.node_mut(id).state;
                state.content = Some(index);
                state.length_bits = length_bits;
                state.data_kind = DataKind::Text;
                state.resolved = Resolution::Resolved;
                debug!("choice `{}`: {:?} ({} bits)", self.doc.node(id).tag, chosen, length_bits);
                Ok(length_bits)
            }
            Field::RandomBytes(spec) => {
                let generated = generate::random_bytes(&spec, &mut *self.rng).map_err(|e| self.spec_error(id, e))?;
                Ok(self.store_generated(id, generated))
            }
            Field::RandomBits(spec) => {
                let generated = generate::random_bits(&spec, &mut *self.rng).map_err(|e| self.spec_error(id, e))?;
                Ok(self.store_generated(id, generated))
            }
            Field::Function(call) => self.resolve_function(id, call),
        }
    }

    fn resolve_function(&mut self, id: NodeId, call: FunctionCall) -> Result<u64, Error> {
        let registry = self.registry;
        let tag = self.doc.node(id).tag.clone();
        let function = registry.get(&call.name).ok_or_else(|| Error::UnregisteredFunction {
            function: call.name.clone(),
            tag: tag.clone(),
        })?;
        self.mark_resolved(id);

        let mut args = Vec::with_capacity(call.args.len() + 1);
        args.push(tag.clone());
        for arg in call.args {
            let arg_id = self.doc.find(&arg).ok_or_else(|| Error::UnresolvedReference {
                tag: arg.clone(),
                from: tag.clone(),
            })?;
            self.resolve(arg_id)?;
            args.push(arg);
        }

        match function {
            FieldFunction::Ordinary(_) => {
                debug!("queue `{}` for `{}` {:?}", call.name, tag, &args[1..]);
                self.schedule.push(ScheduleEntry {
                    node: id,
                    function: call.name,
                    args,
                    kind: EntryKind::Ordinary,
                });
            }
            FieldFunction::Reference(f) => {
                let target_tag = {
                    let mut ctx = FunctionContext::new(&mut *self.doc, &mut *self.store, &mut *self.rng, id, &call.name);
                    f(&mut ctx, &args)?
                };
                let target = self
                    .doc
                    .find(&target_tag)
                    .filter(|t| self.doc.section_of(*t) == Section::Data)
                    .ok_or_else(|| Error::UnresolvedReference {
                        tag: target_tag.clone(),
                        from: tag.clone(),
                    })?;
                debug!("reference `{}` -> `{}`", tag, target_tag);
                self.resolve(target)?;
                self.store_reference(id, &call.name, target_tag)?;
                self.schedule.push(ScheduleEntry {
                    node: id,
                    function: call.name,
                    args,
                    kind: EntryKind::Reference { target },
                });
            }
        }
        Ok(self.doc.node(id).state.length_bits)
    }

    /// Scheduling phase. Returns the entries in the order they ran.
    fn run_schedule(mut self) -> Result<Vec<ScheduleEntry>, Error> {
        let schedule = std::mem::take(&mut self.schedule);
        let (mut ordinary, references): (Vec<_>, Vec<_>) =
            schedule.into_iter().partition(|e| e.kind == EntryKind::Ordinary);
        let priority = self.doc.priority();
        if !priority.is_empty() {
            // Stable: unlisted functions keep discovery order after the listed ones.
            ordinary.sort_by_key(|e| priority.iter().position(|p| *p == e.function).unwrap_or(priority.len()));
        }

        let registry = self.registry;
        for entry in &ordinary {
            let f = match registry.get(&entry.function) {
                Some(FieldFunction::Ordinary(f)) => f,
                Some(FieldFunction::Reference(_)) => {
                    return Err(Error::plugin(&entry.function, &entry.args[0], "registered as a reference function"))
                }
                None => {
                    return Err(Error::UnregisteredFunction {
                        function: entry.function.clone(),
                        tag: entry.args[0].clone(),
                    })
                }
            };
            let length_bits = {
                let mut ctx =
                    FunctionContext::new(&mut *self.doc, &mut *self.store, &mut *self.rng, entry.node, &entry.function);
                f(&mut ctx, &entry.args)?
            };
            if self.doc.node(entry.node).state.content.is_none() {
                return Err(Error::plugin(&entry.function, &entry.args[0], "function did not set content"));
            }
            debug!("`{}` on `{}`: {} bits", entry.function, entry.args[0], length_bits);
            self.add_length(entry.node, length_bits);
        }

        for entry in &references {
            if let EntryKind::Reference { target } = entry.kind {
                let length_bits = self.doc.node(target).state.length_bits;
                debug!("reference `{}`: {} bits", entry.args[0], length_bits);
                self.add_length(entry.node, length_bits);
            }
        }

        Ok(ordinary.into_iter().chain(references).collect())
    }

    /// Add to a node's length and to every ancestor up to its section root.
    fn add_length(&mut self, id: NodeId, bits: u64) {
        let ancestors: Vec<NodeId> = self.doc.ancestors(id).collect();
        self.doc.node_mut(id).state.length_bits += bits;
        for a in ancestors {
            self.doc.node_mut(a).state.length_bits += bits;
        }
    }

    fn mark_resolved(&mut self, id: NodeId) {
        self.doc.node_mut(id).state.resolved = Resolution::Resolved;
    }

    fn store_generated(&mut self, id: NodeId, generated: Generated) -> u64 {
        let length_bits = generated.length_bits;
        self.store_leaf(id, generated.value, length_bits);
        length_bits
    }

    fn store_leaf(&mut self, id: NodeId, value: Value, length_bits: u64) {
        let data_kind = match &value {
            Value::Text(_) => DataKind::Text,
            Value::Bytes(_) => DataKind::Bytes,
            Value::Bits(_) => DataKind::Bits,
        };
        let node = self.doc.node(id);
        debug!("{} `{}`: {:?} ({} bits)", node.field.kind_name(), node.tag, value, length_bits);
        let index = self.store.push(value);
        let state = &mut self.doc.node_mut(id).state;
        state.content = Some(index);
        state.length_bits = length_bits;
        state.data_kind = data_kind;
        state.resolved = Resolution::Resolved;
    }

    fn store_reference(&mut self, id: NodeId, function: &str, target_tag: String) -> Result<(), Error> {
        let existing = self.doc.node(id).state.content.and_then(|i| self.store.get(i)).cloned();
        match existing {
            Some(Value::Text(t)) if t == target_tag => {}
            Some(other) => {
                return Err(Error::plugin(
                    function,
                    &self.doc.node(id).tag,
                    format!("content {:?} disagrees with returned target `{}`", other, target_tag),
                ))
            }
            None => {
                let index = self.store.push(Value::Text(target_tag));
                self.doc.node_mut(id).state.content = Some(index);
            }
        }
        self.doc.node_mut(id).state.data_kind = DataKind::Reference;
        Ok(())
    }

    fn spec_error(&self, id: NodeId, reason: String) -> Error {
        let node = self.doc.node(id);
        Error::spec(&node.tag, &node.spec, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::parser::parse;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const GREETING: &str = r#"<template><text>
        <lead kind="literal" spec="x"/>
        <word kind="choice" spec="hello"/>
    </text></template>"#;

    fn with_builtins(template: &str, options: GeneratorOptions) -> Generator {
        let mut registry = FunctionRegistry::new();
        builtins::register(&mut registry).expect("builtins");
        Generator::with_options(parse(template).expect("parse"), registry, options).expect("generator")
    }

    #[test]
    fn choice_length_legacy_counts_index_digits() {
        let mut g = with_builtins(GREETING, GeneratorOptions::default());
        let bytes = g.generate(&mut StdRng::seed_from_u64(0)).expect("generate");
        assert_eq!(bytes, b"xhello".to_vec());
        assert_eq!(g.length_bits("word"), Some(8));
        assert_eq!(g.message_length_bits(), 16);
    }

    #[test]
    fn choice_length_value_policy_override() {
        let options = GeneratorOptions {
            choice_length: Some(ChoiceLength::Value),
            ..GeneratorOptions::default()
        };
        let mut g = with_builtins(GREETING, options);
        g.generate(&mut StdRng::seed_from_u64(0)).expect("generate");
        assert_eq!(g.length_bits("word"), Some(40));
        assert_eq!(g.message_length_bits(), 48);
    }

    #[test]
    fn mutually_dependent_functions_terminate() {
        let mut g = with_builtins(
            r#"<template><text>
                <f kind="function" spec="byte_count:[g]"/>
                <g kind="function" spec="byte_count:[f]"/>
            </text></template>"#,
            GeneratorOptions::default(),
        );
        g.generate(&mut StdRng::seed_from_u64(0)).expect("generate");
        let order: Vec<&str> = g.schedule().iter().map(|e| e.args[0].as_str()).collect();
        assert_eq!(order, vec!["g", "f"]);
        assert_eq!(g.content("g"), Some(&Value::Bytes(vec![0])));
        assert_eq!(g.content("f"), Some(&Value::Bytes(vec![1])));
    }

    #[test]
    fn arguments_in_data_are_resolved_first() {
        let mut g = with_builtins(
            r#"<template>
                <text><n kind="function" spec="byte_count:[blob]"/></text>
                <data><blob kind="bytes" spec="5:[0~255]"/></data>
            </template>"#,
            GeneratorOptions::default(),
        );
        let bytes = g.generate(&mut StdRng::seed_from_u64(0)).expect("generate");
        assert_eq!(bytes, vec![5]);
        assert!(g.content("blob").is_some());
    }
}
