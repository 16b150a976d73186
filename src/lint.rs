//! Linter for templates: static checks that catch failures before the first cycle.
//!
//! ## Rules
//!
//! - **Unregistered function**: every `function` field names a registered function.
//! - **Unknown argument**: every function argument names a field of the template.
//! - **Unaligned bits**: fixed-width bit fields of the message add up to whole bytes, and no
//!   byte-oriented field starts inside a partial byte. Tracking stops at fields whose width is
//!   only known at generation time (functions, ranged bit counts).
//! - **Empty choice**: a `choice` has no empty alternative.
//! - **Unused priority**: every `<priority>` entry names a function the template uses.
//!
//! Run the linter via the `lint_template` binary: `cargo run --bin lint_template -- templates/mqtt.xml`.
//! Exit code 1 if any error-level findings.

use crate::ast::{Count, Document, Field, NodeId};
use crate::registry::FunctionRegistry;

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    /// A function field names a function missing from the registry.
    UnregisteredFunction,
    /// A function argument names no field.
    UnknownArgument,
    /// Statically known bit widths leave the stream off a byte boundary.
    UnalignedBits,
    /// A choice offers an empty alternative.
    EmptyChoice,
    /// A priority entry names a function no field uses.
    UnusedPriority,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::UnregisteredFunction => "unregistered-function",
            LintRule::UnknownArgument => "unknown-argument",
            LintRule::UnalignedBits => "unaligned-bits",
            LintRule::EmptyChoice => "empty-choice",
            LintRule::UnusedPriority => "unused-priority",
        }
    }
}

/// A single lint message, located by field tag (`None` for template-wide findings).
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub tag: Option<String>,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

impl LintMessage {
    fn at(tag: &str, rule: LintRule, severity: Severity, message: String) -> Self {
        LintMessage {
            tag: Some(tag.to_string()),
            rule,
            severity,
            message,
        }
    }
}

/// Run all lint rules. Field findings come in document order, then template-wide ones.
pub fn lint(doc: &Document, registry: &FunctionRegistry) -> Vec<LintMessage> {
    let mut out = Vec::new();

    for id in doc.fields() {
        let node = doc.node(id);
        match &node.field {
            Field::Function(call) => {
                if !registry.contains(&call.name) {
                    out.push(LintMessage::at(
                        &node.tag,
                        LintRule::UnregisteredFunction,
                        Severity::Error,
                        format!("function `{}` is not registered", call.name),
                    ));
                }
                for arg in &call.args {
                    if doc.find(arg).is_none() {
                        out.push(LintMessage::at(
                            &node.tag,
                            LintRule::UnknownArgument,
                            Severity::Error,
                            format!("argument `{}` names no field", arg),
                        ));
                    }
                }
            }
            Field::Choice(choices) if choices.iter().any(|c| c.is_empty()) => {
                out.push(LintMessage::at(
                    &node.tag,
                    LintRule::EmptyChoice,
                    Severity::Warning,
                    format!("empty alternative in {:?}", node.spec),
                ));
            }
            _ => {}
        }
    }

    let mut alignment = Alignment::default();
    alignment.walk(doc, doc.text(), &mut out);
    if let Some(offset) = alignment.offset {
        if offset % 8 != 0 {
            out.push(LintMessage {
                tag: None,
                rule: LintRule::UnalignedBits,
                severity: Severity::Error,
                message: format!("message ends {} bit(s) past a byte boundary", offset % 8),
            });
        }
    }

    for function in doc.priority() {
        let used = doc
            .fields()
            .any(|id| matches!(&doc.node(id).field, Field::Function(call) if call.name == *function));
        if !used {
            out.push(LintMessage {
                tag: None,
                rule: LintRule::UnusedPriority,
                severity: Severity::Warning,
                message: format!("priority names `{}`, which no field uses", function),
            });
        }
    }

    out
}

/// Bit offset of the message walk, while it is statically known.
struct Alignment {
    offset: Option<u64>,
}

impl Default for Alignment {
    fn default() -> Self {
        Alignment { offset: Some(0) }
    }
}

impl Alignment {
    fn walk(&mut self, doc: &Document, id: NodeId, out: &mut Vec<LintMessage>) {
        let node = doc.node(id);
        match &node.field {
            Field::Group(children) => {
                for &child in children {
                    self.walk(doc, child, out);
                }
            }
            Field::RandomBits(spec) => {
                self.offset = match spec.count {
                    Count::Fixed(n) => self.offset.map(|o| o + u64::from(n)),
                    Count::Range { .. } => None,
                };
            }
            Field::Literal(_) | Field::Choice(_) | Field::RandomBytes(_) => {
                if let Some(offset) = self.offset.filter(|o| o % 8 != 0) {
                    out.push(LintMessage::at(
                        &node.tag,
                        LintRule::UnalignedBits,
                        Severity::Warning,
                        format!("{} field starts {} bit(s) into a byte", node.field.kind_name(), offset % 8),
                    ));
                }
            }
            Field::Function(_) => self.offset = None,
        }
    }
}
