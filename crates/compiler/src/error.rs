//! Error surface for the compiler pipeline.
//!
//! Every phase reports failures through [`CompileError`]. The first error
//! aborts compilation; there is no recovery and no multi-error reporting.

use thiserror::Error;

/// A compilation failure, tagged by the phase that raised it.
///
/// Each variant carries a short message plus whatever structured context
/// the phase had on hand (the offending token text, the source position).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Lexical errors: unterminated literals, unterminated block comments,
    /// characters outside the language alphabet.
    #[error("lex error at line {line}, column {column}: {message}")]
    Lex {
        message: String,
        /// 1-indexed line of the offending character
        line: usize,
        /// 1-indexed column of the offending character
        column: usize,
    },

    /// Syntax errors from the recursive-descent parser.
    #[error("parse error at '{found}': {message}")]
    Parse { message: String, found: String },

    /// Name or tag resolution failures.
    #[error("scope error: {message}")]
    Scope { message: String },

    /// Type checking failures (lvalue violations, pointer misuse,
    /// member lookups, void variables).
    #[error("type error at '{context}': {message}")]
    Type { message: String, context: String },

    /// Code generation failures. These indicate an AST shape the
    /// generator cannot lower, not a user-facing syntax problem.
    #[error("codegen error: {message}")]
    Codegen { message: String },
}

impl CompileError {
    pub fn lex(message: impl Into<String>, line: usize, column: usize) -> Self {
        CompileError::Lex {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn parse(message: impl Into<String>, found: impl Into<String>) -> Self {
        CompileError::Parse {
            message: message.into(),
            found: found.into(),
        }
    }

    pub fn scope(message: impl Into<String>) -> Self {
        CompileError::Scope {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>, context: impl Into<String>) -> Self {
        CompileError::Type {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        CompileError::Codegen {
            message: message.into(),
        }
    }
}
