use thiserror::Error;

/// Errors produced while parsing or evaluating the rendered notation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("parse error at {line}:{col}: {message}")]
    Parse {
        line: u32,
        col: u32,
        message: String,
    },

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("evaluation fuel exhausted")]
    FuelExhausted,
}

impl ExprError {
    pub(crate) fn parse(line: u32, col: u32, message: impl Into<String>) -> Self {
        ExprError::Parse {
            line,
            col,
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        ExprError::Eval(message.into())
    }
}
