use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, ThisError)]
pub enum Error {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),
    #[error("Transformation aborted: {0}")]
    TransformationAborted(String),
    #[error("Execution failed: {message} (sql: {sql})")]
    Execution { sql: String, message: String },
    #[error("Sample build failed: {0}")]
    SampleBuild(String),
    #[error("Sample not found: {0}")]
    SampleNotFound(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Catalog error: {0}")]
    Catalog(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Error::ParseError(msg.into())
    }

    pub fn unsupported_query(msg: impl Into<String>) -> Self {
        Error::UnsupportedQuery(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Error::TransformationAborted(msg.into())
    }

    pub fn execution(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Execution {
            sql: sql.into(),
            message: message.into(),
        }
    }

    pub fn sample_build(msg: impl Into<String>) -> Self {
        Error::SampleBuild(msg.into())
    }

    pub fn sample_not_found(name: impl Into<String>) -> Self {
        Error::SampleNotFound(name.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Error::Catalog(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether a caller may fall back to executing the original query exactly.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Error::TransformationAborted(_))
    }

    /// The SQL text attached to an execution failure, if any.
    pub fn failed_sql(&self) -> Option<&str> {
        match self {
            Error::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}
