//! The host-facing suspension protocol: the tagged union of responses the
//! engine yields, the actions a host uses to resume it, and the stable
//! numeric error catalog.
//!
//! `serde` derives make this the wire format across a language-agnostic
//! host boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::SimpleValue;

/// Stable numeric error codes — a host can match on `code()` across an FFI
/// boundary without depending on the Rust enum shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unknown = 0,
    Eof = 1,
    EmptyModule = 2,
    ModuleTagNotFound = 3,
    ChoiceOutOfBounds = 4,
    ChoiceUnavailable = 5,
    ExpectedAnswer = 6,
    ResolutionQueueEmpty = 7,
    TypeMismatch = 8,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Unknown => "Unknown",
            ErrorCode::Eof => "EOF",
            ErrorCode::EmptyModule => "EmptyModule",
            ErrorCode::ModuleTagNotFound => "ModuleTagNotFound",
            ErrorCode::ChoiceOutOfBounds => "ChoiceOutOfBounds",
            ErrorCode::ChoiceUnavailable => "ChoiceUnavailable",
            ErrorCode::ExpectedAnswer => "ExpectedAnswer",
            ErrorCode::ResolutionQueueEmpty => "ResolutionQueueEmpty",
            ErrorCode::TypeMismatch => "TypeMismatch",
        };
        write!(f, "{name}")
    }
}

/// A runtime error: non-recoverable for this engine instance, carried in a
/// `Response::Error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub message: String,
    pub line: u32,
}

impl RuntimeError {
    pub fn new(code: ErrorCode, message: impl Into<String>, line: u32) -> Self {
        RuntimeError {
            code,
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}): {}", self.code, self.line, self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// A single presented option: its resolved text and whether its condition
/// currently evaluates true.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseOption {
    pub chunks: Vec<String>,
    pub is_available: bool,
}

/// A query the host must answer via `Engine::answer`: a resolved method
/// name plus its (already-resolved) arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryCall {
    pub method: String,
    pub args: Vec<SimpleValue>,
}

impl QueryCall {
    /// The call key this query's answer will be cached under:
    /// `method|arg1|arg2|...`.
    pub fn call_key(&self) -> String {
        let mut key = self.method.clone();
        for arg in &self.args {
            key.push('|');
            key.push_str(&arg.to_canonical_string());
        }
        key
    }
}

impl fmt::Display for QueryCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(SimpleValue::to_canonical_string).collect();
        write!(f, "{}({})", self.method, args.join(", "))
    }
}

/// The tagged union yielded by every public `Engine` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Content {
        attribution: String,
        chunks: Vec<String>,
        options: Vec<ResponseOption>,
    },
    Query {
        call: QueryCall,
        expects_response: bool,
        line_number: u32,
    },
    GoModule {
        module_path: String,
        start_tag: String,
    },
    Exit {
        argument: Option<SimpleValue>,
    },
    End,
    Error(RuntimeError),
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>, line: u32) -> Self {
        Response::Error(RuntimeError::new(code, message, line))
    }
}

/// Host -> engine actions. `Action::Act { choice_index: 0 }` is the
/// canonical "continue" when a beat has no choices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Start,
    StartAt { tag: String },
    Act { choice_index: i64 },
    Answer { value: Option<SimpleValue> },
}
