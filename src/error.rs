use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{}", unsupported_value_message(.type_name, .converter_registered))]
    UnsupportedValue {
        type_name: String,
        converter_registered: bool,
    },
    #[error("node factory not found for label={0}")]
    MissingLabelFactory(String),
    #[error("storage metadata does not contain a format version, this must be an old format")]
    MissingFormatVersion,
    #[error(
        "attempting to open storage with format version {found}; this build requires exactly version {expected}"
    )]
    VersionMismatch { found: u32, expected: u32 },
    #[error("graph is closed")]
    Closed,
}

fn unsupported_value_message(type_name: &str, converter_registered: &bool) -> String {
    let hint = if *converter_registered {
        "a property converter is registered, but it doesn't convert the given type to one of the supported types"
    } else {
        "there is no property converter registered, you might want to add one to the graph config"
    };
    format!("value of type {type_name} not supported for serialization - {hint}")
}

impl GraphError {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        GraphError::Corruption(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GraphError::InvalidArgument(msg.into())
    }

    /// Whether the error leaves the store in a state that must not be reused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphError::Corruption(_)
                | GraphError::MissingLabelFactory(_)
                | GraphError::MissingFormatVersion
                | GraphError::VersionMismatch { .. }
        )
    }
}
