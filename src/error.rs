use core::fmt;

/// Errors produced by program compilation and by the decoders.
///
/// Every error carries enough position/context information to be reported
/// without re-parsing the input. Decoders surface errors upward immediately;
/// there is no local retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The compiler encountered a schema it cannot lower.
    #[error("unsupported type: {ty}")]
    UnsupportedType { ty: String },

    /// The JSON value at `offset` cannot be decoded into the destination
    /// schema (e.g. a number where a sequence is required).
    #[error("cannot decode {value} into {ty} at offset {offset}")]
    TypeMismatch {
        /// JSON value class seen in the input ("number", "string", ...).
        value: &'static str,
        /// Rendered destination schema.
        ty: String,
        /// Enclosing record name, empty outside a record field.
        struct_name: String,
        /// Field name, empty outside a record field.
        field_name: String,
        offset: usize,
    },

    /// An unexpected byte while parsing the named production.
    #[error("invalid character {char:?} while parsing {production} at offset {offset}")]
    InvalidCharacter {
        char: char,
        production: &'static str,
        offset: usize,
    },

    /// Input terminated in the middle of the named production.
    #[error("unexpected end of input while parsing {production} at offset {offset}")]
    UnexpectedEnd {
        production: &'static str,
        offset: usize,
    },

    /// Bracket nesting exceeded the fixed decoder bound.
    #[error("exceeded max nesting depth at offset {offset}")]
    ExceededMaxDepth { offset: usize },
}

impl Error {
    pub(crate) fn invalid_character(byte: u8, production: &'static str, offset: usize) -> Self {
        Error::InvalidCharacter {
            char: byte as char,
            production,
            offset,
        }
    }

    pub(crate) fn unexpected_end(production: &'static str, offset: usize) -> Self {
        Error::UnexpectedEnd { production, offset }
    }

    pub(crate) fn exceeded_max_depth(offset: usize) -> Self {
        Error::ExceededMaxDepth { offset }
    }

    /// The production this error was raised in, when it names one.
    pub fn production(&self) -> Option<&'static str> {
        match self {
            Error::InvalidCharacter { production, .. }
            | Error::UnexpectedEnd { production, .. } => Some(production),
            _ => None,
        }
    }
}

/// Short classifier used by tests and log output.
impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::InvalidCharacter { .. } => ErrorKind::InvalidCharacter,
            Error::UnexpectedEnd { .. } => ErrorKind::UnexpectedEnd,
            Error::ExceededMaxDepth { .. } => ErrorKind::ExceededMaxDepth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedType,
    TypeMismatch,
    InvalidCharacter,
    UnexpectedEnd,
    ExceededMaxDepth,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnsupportedType => "unsupported type",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::InvalidCharacter => "invalid character",
            ErrorKind::UnexpectedEnd => "unexpected end of input",
            ErrorKind::ExceededMaxDepth => "exceeded max depth",
        };
        f.write_str(name)
    }
}
