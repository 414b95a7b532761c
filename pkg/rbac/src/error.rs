use thiserror::Error;

/// Composition failures. Any of these aborts the whole build before an object is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("duplicate role name '{0}' in chain")]
    DuplicateRole(String),

    #[error("invalid role name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("{0} called before any role was added")]
    NoCurrentRole(&'static str),

    #[error("{op} on role '{role}' called before add_rule")]
    NoCurrentRule { role: String, op: &'static str },

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("role '{role}' references unknown template '{reference}'")]
    UnresolvedTemplate { role: String, reference: String },

    #[error("template reference cycle: {}", path.join(" -> "))]
    TemplateCycle { path: Vec<String> },
}
