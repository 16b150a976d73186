//! Template tree: an arena of nodes split into the `text`, `data` sections plus the
//! `priority` order, with per-node resolution state.

use crate::error::Error;
use crate::value::ContentIndex;
use std::collections::HashMap;

/// Stable index of a node in the [`Document`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Element count of a random field: fixed, or drawn from `[low~high]` every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Fixed(u32),
    Range { low: u32, high: u32 },
}

/// Inclusive value range `[low~high]`. A degenerate `<count>:<value>` spec is `low == high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub low: u64,
    pub high: u64,
}

/// Parsed `<count>:<range>[<range>...]` spec shared by random bytes and random bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub count: Count,
    pub ranges: Vec<ValueRange>,
}

/// Parsed `name:[arg][arg]...` spec of a function field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<String>,
}

/// What a node is, with its spec already parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Literal(String),
    Choice(Vec<String>),
    RandomBytes(RangeSpec),
    RandomBits(RangeSpec),
    Function(FunctionCall),
    Group(Vec<NodeId>),
}

impl Field {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Field::Literal(_) => "literal",
            Field::Choice(_) => "choice",
            Field::RandomBytes(_) => "bytes",
            Field::RandomBits(_) => "bits",
            Field::Function(_) => "function",
            Field::Group(_) => "group",
        }
    }
}

/// How the serializer writes a node's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Encoded with the document's text encoding.
    Text,
    Bytes,
    Bits,
    /// Content is the tag of a `data` node serialized in place.
    Reference,
}

impl DataKind {
    fn initial(field: &Field) -> Self {
        match field {
            Field::Literal(_) | Field::Choice(_) => DataKind::Text,
            Field::RandomBits(_) => DataKind::Bits,
            Field::RandomBytes(_) | Field::Function(_) | Field::Group(_) => DataKind::Bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Unvisited,
    Resolved,
}

/// Mutable per-cycle state of a node.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub content: Option<ContentIndex>,
    pub length_bits: u64,
    pub data_kind: DataKind,
    pub resolved: Resolution,
}

impl NodeState {
    pub fn is_resolved(&self) -> bool {
        self.resolved == Resolution::Resolved
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub tag: String,
    /// Raw spec text, kept for diagnostics.
    pub spec: String,
    pub field: Field,
    pub parent: Option<NodeId>,
    pub state: NodeState,
}

impl Node {
    pub fn children(&self) -> &[NodeId] {
        match &self.field {
            Field::Group(children) => children,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Data,
}

/// Encoding applied to literal and choice content when serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl TextEncoding {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Some(TextEncoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Some(TextEncoding::Latin1),
            _ => None,
        }
    }

    pub fn encode(self, s: &str) -> Result<Vec<u8>, String> {
        match self {
            TextEncoding::Utf8 => Ok(s.as_bytes().to_vec()),
            TextEncoding::Ascii => {
                if s.is_ascii() {
                    Ok(s.as_bytes().to_vec())
                } else {
                    Err(format!("{:?} is not ascii", s))
                }
            }
            TextEncoding::Latin1 => s
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| format!("{:?} is outside latin-1", c)))
                .collect(),
        }
    }
}

/// Length policy for choice fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChoiceLength {
    /// 8 × the width of the decimal content-index token. Legacy templates align on this.
    #[default]
    Index,
    /// 8 × the character count of the chosen alternative.
    Value,
}

impl ChoiceLength {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "index" => Some(ChoiceLength::Index),
            "value" => Some(ChoiceLength::Value),
            _ => None,
        }
    }
}

/// A loaded template. Built once, reused across generation cycles.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    text: NodeId,
    data: NodeId,
    priority: Vec<String>,
    pub encoding: TextEncoding,
    pub choice_length: ChoiceLength,
    tags: HashMap<String, NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document with the `text` and `data` section roots.
    pub fn new() -> Self {
        let root = |tag: &str| Node {
            tag: tag.to_string(),
            spec: String::new(),
            field: Field::Group(Vec::new()),
            parent: None,
            state: NodeState {
                content: None,
                length_bits: 0,
                data_kind: DataKind::Bytes,
                resolved: Resolution::Unvisited,
            },
        };
        Document {
            nodes: vec![root("text"), root("data")],
            text: NodeId(0),
            data: NodeId(1),
            priority: Vec::new(),
            encoding: TextEncoding::default(),
            choice_length: ChoiceLength::default(),
            tags: HashMap::new(),
        }
    }

    pub fn text(&self) -> NodeId {
        self.text
    }

    pub fn data(&self) -> NodeId {
        self.data
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    pub fn push_priority(&mut self, function: impl Into<String>) {
        self.priority.push(function.into());
    }

    /// Append a node under `parent` (a group). Tags must be unique across both sections.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        tag: &str,
        spec: &str,
        field: Field,
    ) -> Result<NodeId, Error> {
        if self.tags.contains_key(tag) {
            return Err(Error::DuplicateTag(tag.to_string()));
        }
        let id = NodeId(self.nodes.len());
        let parent_node = &mut self.nodes[parent.0];
        match &mut parent_node.field {
            Field::Group(children) => children.push(id),
            other => {
                return Err(Error::Template(format!(
                    "`{}` is a {} field and cannot hold `{}`",
                    parent_node.tag,
                    other.kind_name(),
                    tag
                )))
            }
        }
        let data_kind = DataKind::initial(&field);
        self.nodes.push(Node {
            tag: tag.to_string(),
            spec: spec.to_string(),
            field,
            parent: Some(parent),
            state: NodeState {
                content: None,
                length_bits: 0,
                data_kind,
                resolved: Resolution::Unvisited,
            },
        });
        self.tags.insert(tag.to_string(), id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Look up a field by tag (section roots are not addressable).
    pub fn find(&self, tag: &str) -> Option<NodeId> {
        self.tags.get(tag).copied()
    }

    /// All field ids in insertion order, section roots excluded.
    pub fn fields(&self) -> impl Iterator<Item = NodeId> + '_ {
        (2..self.nodes.len()).map(NodeId)
    }

    /// Parent chain from the node's parent up to its section root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.nodes[id.0].parent,
        }
    }

    pub fn section_of(&self, id: NodeId) -> Section {
        let root = self.ancestors(id).last().unwrap_or(id);
        if root == self.data {
            Section::Data
        } else {
            Section::Text
        }
    }

    /// Reset resolution state of the whole tree. Literal lengths survive: they are measured once.
    pub fn clear(&mut self) {
        for node in &mut self.nodes {
            reset_state(node);
        }
    }

    /// Reset one subtree and mark its ancestors for recomputation, leaving everything else resolved.
    pub fn clear_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            stack.extend_from_slice(self.nodes[n.0].children());
            reset_state(&mut self.nodes[n.0]);
        }
        let ancestors: Vec<NodeId> = self.ancestors(id).collect();
        for a in ancestors {
            reset_state(&mut self.nodes[a.0]);
        }
    }
}

fn reset_state(node: &mut Node) {
    node.state.content = None;
    node.state.resolved = Resolution::Unvisited;
    node.state.data_kind = DataKind::initial(&node.field);
    if !matches!(node.field, Field::Literal(_)) {
        node.state.length_bits = 0;
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.doc.nodes[id.0].parent;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let header = doc.add_node(doc.text(), "header", "", Field::Group(Vec::new())).expect("header");
        let name = doc
            .add_node(header, "name", "MQTT", Field::Literal("MQTT".to_string()))
            .expect("name");
        let body = doc.add_node(doc.data(), "body", "", Field::Group(Vec::new())).expect("body");
        (doc, header, name, body)
    }

    #[test]
    fn duplicate_tags_rejected_across_sections() {
        let (mut doc, _, _, body) = sample();
        let err = doc
            .add_node(body, "name", "x", Field::Literal("x".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTag(t) if t == "name"));
    }

    #[test]
    fn leaf_cannot_hold_children() {
        let (mut doc, _, name, _) = sample();
        let err = doc
            .add_node(name, "inner", "x", Field::Literal("x".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn ancestors_stop_at_section_root() {
        let (doc, header, name, body) = sample();
        let chain: Vec<NodeId> = doc.ancestors(name).collect();
        assert_eq!(chain, vec![header, doc.text()]);
        assert_eq!(doc.section_of(name), Section::Text);
        assert_eq!(doc.section_of(body), Section::Data);
    }

    #[test]
    fn clear_keeps_literal_length() {
        let (mut doc, header, name, _) = sample();
        doc.node_mut(name).state.length_bits = 32;
        doc.node_mut(name).state.resolved = Resolution::Resolved;
        doc.node_mut(header).state.length_bits = 32;
        doc.clear();
        assert_eq!(doc.node(name).state.length_bits, 32);
        assert!(!doc.node(name).state.is_resolved());
        assert_eq!(doc.node(header).state.length_bits, 0);
    }

    #[test]
    fn latin1_rejects_wide_chars() {
        assert_eq!(TextEncoding::Latin1.encode("é").expect("latin-1"), vec![0xe9]);
        assert!(TextEncoding::Latin1.encode("€").is_err());
        assert!(TextEncoding::Ascii.encode("é").is_err());
    }
}
