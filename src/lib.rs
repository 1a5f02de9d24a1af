//! TailScheme - expander and tail-call-safe evaluator for a minimal Scheme
//!
//! This crate provides the evaluation core of a small Lisp/Scheme-family language.
//! Source trees are first desugared by the expander into a small canonical set of
//! special forms, then executed by a tree-walking evaluator that keeps tail calls at
//! constant stack depth.
//!
//! ```scheme
//! (define (loop n) (if (= n 0) 'done (loop (- n 1))))
//! (loop 1000000)                 ; => done, without growing the stack
//! `(1 ,(+ 1 1) ,@(list 3 4))     ; => (1 2 3 4)
//! ```
//!
//! ## Pipeline
//!
//! raw tree → [`expander::expand`] → canonical tree → [`evaluator::eval`] → value
//!
//! The expander never touches an environment. The evaluator assumes canonical input:
//! no shorthand `define`, no multi-body `lambda`, no quasiquote.
//!
//! ## Canonical Form
//!
//! `quote`, `if`, `set!`, `define`, `lambda`, `let`, `begin` and application, with all
//! arities validated by the expander.
//!
//! ## Modules
//!
//! - `ast`: value model, interned symbols, printer
//! - `expander`: syntactic desugaring into canonical form
//! - `evaluator`: trampolined evaluation against shared environment frames
//! - `builtinops`: the primitive procedure table installed in the global environment
//! - `scheme`: S-expression reader (feature `scheme`)

use std::fmt;

use crate::builtinops::Arity;

/// Maximum parsing depth to prevent stack overflow attacks in the reader
pub const MAX_PARSE_DEPTH: usize = 128;

/// Remaining native stack below which nested evaluation switches to a fresh segment
pub const STACK_RED_ZONE: usize = 128 * 1024;

/// Size of each stack segment allocated for deep non-tail recursion
pub const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Message used for every special form whose element count is wrong
pub(crate) const MSG_WRONG_LENGTH: &str = "wrong length";

/// Error types for the expander, evaluator and reader
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(String),
    /// A special form with the wrong shape, rejected by the expander
    #[error("{form}: {message}")]
    MalformedSpecialForm { form: String, message: String },
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    /// The operator of an application evaluated to something that cannot be called
    #[error("application: not a procedure: {0}")]
    NotAProcedure(String),
    #[error("ArityError: expected {expected} arguments, got {got}")]
    ArityError { expected: Arity, got: usize },
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

impl Error {
    /// Build a malformed-form error, rendering the offending form with the printer
    pub fn malformed(form: &impl fmt::Display, message: impl Into<String>) -> Self {
        Error::MalformedSpecialForm {
            form: form.to_string(),
            message: message.into(),
        }
    }

    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError { expected, got }
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod expander;

#[cfg(feature = "scheme")]
pub mod scheme;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    #[test]
    fn test_error_display() {
        let test_cases = vec![
            (Error::ParseError("bad".into()), "ParseError: bad"),
            (
                Error::malformed(&val(vec![sym("if"), val(1)]), MSG_WRONG_LENGTH),
                "(if 1): wrong length",
            ),
            (Error::UnboundVariable("y".into()), "Unbound variable: y"),
            (
                Error::NotAProcedure("1".into()),
                "application: not a procedure: 1",
            ),
            (
                Error::arity_error(Arity::Exact(2), 3),
                "ArityError: expected 2 arguments, got 3",
            ),
            (
                Error::arity_error(Arity::AtLeast(1), 0),
                "ArityError: expected at least 1 arguments, got 0",
            ),
        ];

        for (error, expected) in test_cases {
            assert_eq!(error.to_string(), expected);
        }
    }
}
