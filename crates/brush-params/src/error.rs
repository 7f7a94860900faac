use std::path::PathBuf;

use thiserror::Error;

use crate::value::FieldKind;

/// Problems with the schema itself, raised while registering groups.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Flag --{flag} is declared by both '{first_group}' and '{second_group}'")]
    FlagCollision {
        flag: String,
        first_group: String,
        second_group: String,
    },

    #[error("Shorthand -{short} of --{flag} is already taken by --{existing}")]
    ShorthandCollision {
        short: char,
        flag: String,
        existing: String,
    },

    #[error("Flag --{flag} in '{group}' clashes with the built in help flag")]
    ReservedFlag { flag: String, group: String },

    #[error("Group '{group}' declares a field with an empty name")]
    EmptyFieldName { group: String },
}

/// A parsed invocation that doesn't fit the group being extracted.
#[derive(Debug, Error)]
pub enum InvalidInvocationError {
    #[error("Field '{field}' expects a {expected} value, got {actual} ({value})")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        actual: FieldKind,
        value: String,
    },

    #[error("Field '{field}' is missing or unset")]
    MissingField { field: String },

    #[error("Failed to convert extracted group: {0}")]
    Convert(#[from] serde_json::Error),
}

/// Why the text of a persisted config couldn't be read.
#[derive(Debug, Error)]
pub enum PersistedFormatError {
    #[error("not a flat JSON object of scalars: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid literal at byte {offset}: {message}")]
    Literal { offset: usize, message: String },
}

/// A persisted config exists but can't be used.
#[derive(Debug, Error)]
pub enum ConfigDeserializationError {
    #[error("Failed to read persisted config {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Persisted config {} is malformed", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: PersistedFormatError,
    },
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    InvalidInvocation(#[from] InvalidInvocationError),

    #[error(transparent)]
    Deserialization(#[from] ConfigDeserializationError),

    #[error("Failed to parse command line")]
    Parse(#[from] clap::Error),
}
