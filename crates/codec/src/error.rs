//! Codec error model.

use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    /// A record whose column count (or fixed-width length) does not match the layout.
    #[error("malformed record at line {line_number}: expected {expected}, found {found}: {line:?}")]
    MalformedRecord {
        line_number: usize,
        expected: usize,
        found: usize,
        line: String,
    },

    /// A column that could not be parsed into its typed field.
    #[error("invalid {field} at line {line_number}: {value:?}")]
    InvalidField {
        line_number: usize,
        field: &'static str,
        value: String,
    },

    /// Encoding was asked to produce a file without detail records.
    #[error("empty input: no detail records to encode")]
    EmptyInput,

    /// The layout itself is inconsistent (e.g. fixed-width column without a width).
    #[error("invalid layout for {partner}: {reason}")]
    InvalidLayout { partner: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn invalid_field(line_number: usize, field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            line_number,
            field,
            value: value.to_string(),
        }
    }
}
