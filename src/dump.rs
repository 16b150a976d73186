//! Format generated output and resolved templates for display.

use crate::ast::{DataKind, Document, Field, NodeId};
use crate::engine::Generator;
use crate::value::{ContentStore, Value};

/// Space-separated lowercase hex bytes.
pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// One-line rendering of stored content.
pub fn value_summary(v: &Value, data_kind: DataKind) -> String {
    match (v, data_kind) {
        (Value::Text(target), DataKind::Reference) => format!("-> {}", target),
        (Value::Text(s), _) => format!("{:?}", s),
        (Value::Bytes(b), _) => format!("hex({})", hex_string(b)),
        (Value::Bits(p), _) => p.to_string(),
    }
}

/// Tree view of both sections after a cycle: tag, kind, length and content per node.
pub fn dump_tree(generator: &Generator) -> String {
    let doc = generator.document();
    let mut lines = Vec::new();
    for root in [doc.text(), doc.data()] {
        dump_node(doc, generator.store(), root, 0, &mut lines);
    }
    lines.join("\n")
}

fn dump_node(doc: &Document, store: &ContentStore, id: NodeId, indent: usize, lines: &mut Vec<String>) {
    let node = doc.node(id);
    let pad = "  ".repeat(indent);
    let bits = node.state.length_bits;
    match &node.field {
        Field::Group(children) => {
            if id == doc.data() && children.is_empty() {
                return;
            }
            lines.push(format!("{}{} [{} bits]", pad, node.tag, bits));
            for &child in children {
                dump_node(doc, store, child, indent + 1, lines);
            }
        }
        field => {
            let content = match node.state.content.and_then(|i| store.get(i)) {
                Some(v) => value_summary(v, node.state.data_kind),
                None => "<unresolved>".to_string(),
            };
            lines.push(format!(
                "{}{} ({}) [{} bits] {}",
                pad,
                node.tag,
                field.kind_name(),
                bits,
                content
            ));
        }
    }
}
