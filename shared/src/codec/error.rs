use thiserror::Error;

/// Errors produced while encoding or decoding wire bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// The buffer ended before the value was complete
    #[error("Unexpected end of buffer: needed {needed} more bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A length-prefixed string was not valid UTF-8
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    /// A field held a value outside its allowed range
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: u32 },

    /// Bytes were left over after the value was fully read
    #[error("{remaining} trailing bytes after decoding")]
    TrailingBytes { remaining: usize },

    /// A value does not fit its length prefix and cannot be encoded
    #[error("{field} is {len} bytes, longer than the {max} its length prefix allows")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}
