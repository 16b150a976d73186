//! Error type shared by the loader, the engine, plugins and the serializer.

/// Every failure a generation cycle can surface. None are retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Structural problem in the template (unknown root/section/kind, mismatched tags, ...).
    #[error("Template: {0}")]
    Template(String),
    /// A field spec that does not follow its kind's grammar.
    #[error("Malformed spec for `{tag}` ({spec:?}): {reason}")]
    Spec {
        tag: String,
        spec: String,
        reason: String,
    },
    #[error("Duplicate tag: {0}")]
    DuplicateTag(String),
    /// An argument tag or a reference target that names no node.
    #[error("Unresolved reference `{tag}` (from `{from}`)")]
    UnresolvedReference { tag: String, from: String },
    #[error("Unregistered function `{function}` (used by `{tag}`)")]
    UnregisteredFunction { function: String, tag: String },
    #[error("Duplicate function: {0}")]
    DuplicateFunction(String),
    /// A registered function failed or broke its contract.
    #[error("Function `{function}` on `{tag}`: {message}")]
    Plugin {
        function: String,
        tag: String,
        message: String,
    },
    #[error("Encoding `{tag}`: {message}")]
    Encoding { tag: String, message: String },
    /// The serialized message does not end on a byte boundary.
    #[error("Alignment: {pending_bits} bit(s) pending{}", at_tag(.tag))]
    Alignment { tag: Option<String>, pending_bits: u8 },
}

fn at_tag(tag: &Option<String>) -> String {
    match tag {
        Some(t) => format!(" at `{}`", t),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn spec(tag: &str, spec: &str, reason: impl Into<String>) -> Self {
        Error::Spec {
            tag: tag.to_string(),
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn plugin(function: &str, tag: &str, message: impl Into<String>) -> Self {
        Error::Plugin {
            function: function.to_string(),
            tag: tag.to_string(),
            message: message.into(),
        }
    }
}
