use std::fmt::Display;

/// The set of conditions the decoder can report.
///
/// The first five kinds are recoverable: in permissive mode the offending
/// token is skipped up to the next field delimiter and decoding continues.
/// `Io` and `Config` always abort the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShefError {
    #[error("line {line}: syntax error in '{text}'")]
    Syntax { line: usize, text: String },

    #[error("line {line}: unknown {table} code '{code}'")]
    RegistryMiss {
        line: usize,
        table: &'static str,
        code: String,
    },

    #[error("line {line}: '{text}' is not a number or a recognized sentinel")]
    Numeric { line: usize, text: String },

    #[error("line {line}: bad date/time: {reason}")]
    Time { line: usize, reason: String },

    #[error("line {line}: missing inherited default: {what}")]
    Context { line: usize, what: String },

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ShefError {
    /// Recoverable errors are skipped over in permissive mode and count
    /// against the error budget; the rest abort the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ShefError::Io(_) | ShefError::Config(_))
    }

    /// Source line the error was raised on, when it came from message text.
    pub fn line(&self) -> Option<usize> {
        match self {
            ShefError::Syntax { line, .. }
            | ShefError::RegistryMiss { line, .. }
            | ShefError::Numeric { line, .. }
            | ShefError::Time { line, .. }
            | ShefError::Context { line, .. } => Some(*line),
            ShefError::Io(_) | ShefError::Config(_) => None,
        }
    }
}

/// One decoder finding: the error itself plus the physical-element code that
/// was in scope when it was raised, so log readers can tell which parameter
/// of a multi-value message went bad.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub error: ShefError,
    pub pe_code: Option<String>,
}

impl Diagnostic {
    pub fn new(error: ShefError) -> Self {
        Self {
            error,
            pe_code: None,
        }
    }

    pub fn with_pe(error: ShefError, pe: &str) -> Self {
        Self {
            error,
            pe_code: Some(pe.to_string()),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pe) = &self.pe_code {
            write!(f, "[{pe}] {}", self.error)
        } else {
            write!(f, "{}", self.error)
        }
    }
}
