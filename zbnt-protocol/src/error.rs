use crate::encoding::ValueCodec;

/// Errors raised while building or parsing property access payloads.
///
/// These are caller errors detected locally, before anything is sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("property {property} is invalid for {device}")]
    UnknownProperty { property: u16, device: &'static str },
    #[error("property {0} is write-only")]
    ReadNotSupported(u16),
    #[error("property {0} is read-only")]
    WriteNotSupported(u16),
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("value for property {property} does not fit codec {expected:?}")]
    TypeMismatch { property: u16, expected: ValueCodec },
    #[error("value {value} is out of range for property {property}")]
    OutOfRange { property: u16, value: u64 },
    #[error("value too short, expected {expected} bytes but got {got}")]
    Truncated { expected: usize, got: usize },
}

/// Errors reported by the script compiler. Line and column numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("line {line}{}: {message}", column_suffix(.column))]
    Syntax {
        line: usize,
        column: Option<usize>,
        message: String,
    },
    #[error("line {line}, column {column}: invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        line: usize,
        column: usize,
        parameter: String,
        reason: String,
    },
    #[error("line {line}: script too large, exceeds the maximum size by {overflow} slots")]
    ScriptTooLarge { line: usize, overflow: usize },
}

impl ScriptError {
    /// The source line that caused the error.
    pub fn line(&self) -> usize {
        match self {
            ScriptError::Syntax { line, .. }
            | ScriptError::InvalidParameter { line, .. }
            | ScriptError::ScriptTooLarge { line, .. } => *line,
        }
    }
}

fn column_suffix(column: &Option<usize>) -> String {
    match column {
        Some(column) => format!(", column {column}"),
        None => String::new(),
    }
}

/// A malformed frame template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}, column {column}: {message}")]
pub struct TemplateError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// A textual hardware address could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address '{0}'")]
pub struct AddressParseError(pub String);

#[test]
fn syntax_error_display() {
    let with_column = ScriptError::Syntax {
        line: 4,
        column: Some(3),
        message: "unknown instruction 'foo'".to_string(),
    };
    assert_eq!(
        with_column.to_string(),
        "line 4, column 3: unknown instruction 'foo'"
    );
    let without = ScriptError::Syntax {
        line: 2,
        column: None,
        message: "instruction outside of a section".to_string(),
    };
    assert_eq!(without.to_string(), "line 2: instruction outside of a section");
}
