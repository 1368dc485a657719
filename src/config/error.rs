#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for `{field}`: {reason}")]
    Field { field: String, reason: String },
    #[error("role binding `{binding}` references unknown role `{role}`")]
    UnknownRole { binding: String, role: String },
    #[error("duplicate role binding name `{0}`")]
    DuplicateBinding(String),
}

pub(crate) fn field_error(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Field {
        field: field.to_string(),
        reason: reason.into(),
    }
}
