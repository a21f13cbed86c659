use thiserror::Error;

/*
    Types:
    * SqlCommandError - Typed failures carried inside anyhow chains, one variant per failure kind
    * ErrorKind - Payload-free discriminant, used by callers that only branch on the kind
*/
#[derive(Debug, Error)]
pub enum SqlCommandError {
    #[error("invalid command descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid default for parameter '{name}': {reason}")]
    InvalidDefault { name: String, reason: String },

    #[error("missing required parameter '{name}'")]
    MissingRequired { name: String },

    #[error("parameter '{name}' expected {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error("value '{value}' for parameter '{name}' is not one of [{choices}]")]
    ChoiceNotAllowed {
        name: String,
        value: String,
        choices: String,
    },

    #[error("could not read file '{path}': {reason}")]
    FileNotReadable { path: String, reason: String },

    #[error("could not parse value for parameter '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("unknown parameter '{name}' in layer '{layer}'")]
    UnknownParameter { layer: String, name: String },

    #[error("too many arguments: expected at most {expected}, got {got}")]
    TooManyArguments { expected: usize, got: usize },

    #[error("no database connection factory configured")]
    NoFactory,

    #[error("could not ping database: {0}")]
    ConnectionUnreachable(String),

    #[error("could not render query")]
    Render(#[source] anyhow::Error),

    #[error("could not execute query '{sql}': {reason}")]
    Execution { sql: String, reason: String },

    #[error("could not scan row: {0}")]
    Scan(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("alias '{alias}' points to unknown command '{target}'")]
    AliasTargetMissing { alias: String, target: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidDescriptor,
    InvalidDefault,
    MissingRequired,
    TypeMismatch,
    ChoiceNotAllowed,
    FileNotReadable,
    Parse,
    UnknownParameter,
    TooManyArguments,
    NoFactory,
    ConnectionUnreachable,
    Render,
    Execution,
    Scan,
    Cancelled,
    AliasTargetMissing,
}

impl SqlCommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            Self::InvalidDefault { .. } => ErrorKind::InvalidDefault,
            Self::MissingRequired { .. } => ErrorKind::MissingRequired,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::ChoiceNotAllowed { .. } => ErrorKind::ChoiceNotAllowed,
            Self::FileNotReadable { .. } => ErrorKind::FileNotReadable,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::UnknownParameter { .. } => ErrorKind::UnknownParameter,
            Self::TooManyArguments { .. } => ErrorKind::TooManyArguments,
            Self::NoFactory => ErrorKind::NoFactory,
            Self::ConnectionUnreachable(_) => ErrorKind::ConnectionUnreachable,
            Self::Render(_) => ErrorKind::Render,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Scan(_) => ErrorKind::Scan,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AliasTargetMissing { .. } => ErrorKind::AliasTargetMissing,
        }
    }

    pub(crate) fn type_mismatch(
        name: &str,
        expected: impl Into<String>,
        got: &serde_json::Value,
    ) -> Self {
        Self::TypeMismatch {
            name: name.to_string(),
            expected: expected.into(),
            got: crate::values::describe_value(got),
        }
    }
}

/// Outermost typed failure in an error chain, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SqlCommandError>())
        .map(SqlCommandError::kind)
}

pub(crate) fn is_cancelled(err: &anyhow::Error) -> bool {
    error_kind(err) == Some(ErrorKind::Cancelled)
}
