use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The identifier is not in canonical 8-4-4-4-12 hexadecimal form.
    InvalidId(String),
    /// A required field was absent or empty.
    MissingField(&'static str),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId(_) => write!(f, "Invalid user ID format"),
            ModelError::MissingField("username") => {
                write!(f, "Username is required")
            }
            ModelError::MissingField(field) => {
                write!(f, "Field '{field}' is required")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
