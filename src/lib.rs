//! SexpyJSON: JSON documents with embedded S-expression calls.
//!
//! A source text is a JSON value in which any position may hold a call such as
//! `(+ 1 2)`. Parsing produces a [`ParsedExpression`]; an [`Evaluator`] reduces it to an
//! [`OutputValue`], which converts to `serde_json::Value` for the host.
//!
//! ```
//! let parsed = sxpj::parse(r#"{"zap": "bang", "calculated": (+ 4 5)}"#).unwrap();
//! let output = parsed.evaluate().unwrap();
//! assert_eq!(
//!     output.to_json(sxpj::NullFields::Keep),
//!     serde_json::json!({"zap": "bang", "calculated": 9.0})
//! );
//! ```

use thiserror::Error;

use crate::ast::{Expression, Symbol};
use crate::value::Value;

pub mod ast;
pub mod builtinops;
pub mod combinator;
pub mod environment;
pub mod evaluator;
pub mod json;
pub mod parser;
pub mod value;

mod facade;

pub use environment::{Context, Namespace};
pub use facade::{Evaluator, EvaluatorConfig, ParsedExpression, parse};
pub use json::NullFields;
pub use value::{OutputMember, OutputValue};

/// Default bound on nested function bodies and literal arrays/objects for a new evaluator.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Deepest bracket nesting (`[`, `{`, `(`) the parser accepts, matching serde_json's limit.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Errors raised while turning source text into an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The grammar matched a prefix of the input but text remained after it.
    #[error("Unparsed input: '{0}'")]
    UnparsedInput(String),
    /// Nothing in the input matched the grammar.
    #[error("Parse failure")]
    ParseFailure,
    #[error("Nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Errors raised while reducing an expression to a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Missing value: {0}")]
    MissingValue(Symbol),
    #[error("Trying to call a value that is not a function: {0}")]
    BadCallTarget(Value),
    #[error("Bad expression type: {0}")]
    BadExpressionType(String),
    #[error("Bad parameter list: {reason}")]
    BadParameterList {
        reason: String,
        params: Vec<Expression>,
    },
    #[error("Bad function parameters: {reason}")]
    BadFunctionParameters { reason: String, params: Vec<Value> },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Found an uncalled function in output")]
    UncalledFunction,
    #[error("Unrecognized native type: {0}")]
    UnrecognizedNativeType(String),
    #[error("Native function '{name}' failed: {reason}")]
    NativeFunction { name: String, reason: String },
    #[error("Call depth limit of {0} exceeded")]
    RecursionLimit(usize),
}

impl EvalError {
    pub(crate) fn bad_parameter_list(reason: impl Into<String>, params: &[Expression]) -> Self {
        EvalError::BadParameterList {
            reason: reason.into(),
            params: params.to_vec(),
        }
    }

    pub(crate) fn bad_function_parameters(reason: impl Into<String>, params: &[Value]) -> Self {
        EvalError::BadFunctionParameters {
            reason: reason.into(),
            params: params.to_vec(),
        }
    }
}

/// Top-level error of the public entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SxpjError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),
}
