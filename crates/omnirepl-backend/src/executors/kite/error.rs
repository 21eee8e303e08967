use std::fmt;
use thiserror::Error;

/// Error classes raised by kite programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    AttributeError,
    ImportError,
    RecursionError,
    OverflowError,
    OSError,
    /// The run was cancelled from outside.
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::OSError => "OSError",
            ErrorKind::Interrupted => "Interrupted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised kite error, displayed as `Kind: message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct KiteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl KiteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn syntax(line: usize, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::SyntaxError, format!("{} (line {})", message, line))
    }

    pub fn name(name: &str) -> Self {
        Self::new(ErrorKind::NameError, format!("name '{}' is not defined", name))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn zero_division(message: &str) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::OverflowError, "integer overflow")
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted, "execution interrupted")
    }
}

pub type KiteResult<T> = std::result::Result<T, KiteError>;
