//! Host-facing entry points: parsing, evaluation with rollback, and host injection.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Expression, Symbol};
use crate::environment::Context;
use crate::evaluator::{create_global_context, eval};
use crate::value::{Callable, OutputValue, Value};
use crate::{DEFAULT_MAX_CALL_DEPTH, EvalError, ParseError, SxpjError, json, parser};

/// Parse source text into an expression ready for evaluation.
pub fn parse(source: &str) -> Result<ParsedExpression, ParseError> {
    let element = parser::parse_element(source)?;
    Ok(ParsedExpression {
        expression: Expression::from(element),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpression {
    expression: Expression,
}

impl ParsedExpression {
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Evaluate on a fresh evaluator with the default configuration.
    pub fn evaluate(&self) -> Result<OutputValue, SxpjError> {
        Evaluator::new().evaluate(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Maximum nesting of `fn`/`dynfn` bodies and literal arrays/objects; `None` disables
    /// the check.
    pub max_call_depth: Option<usize>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            max_call_depth: Some(DEFAULT_MAX_CALL_DEPTH),
        }
    }
}

/// A long-lived evaluation context. Names defined by one evaluation are visible to the
/// next; a failed evaluation leaves the context as it was before the call.
#[derive(Debug)]
pub struct Evaluator {
    context: Context,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(EvaluatorConfig::default())
    }

    pub fn with_config(config: EvaluatorConfig) -> Self {
        // Host names live in a frame above the builtins so they can shadow them.
        let context = create_global_context(config.max_call_depth).wrap();
        Evaluator { context }
    }

    pub fn evaluate(&mut self, parsed: &ParsedExpression) -> Result<OutputValue, SxpjError> {
        debug!(expression = %parsed.expression, "evaluate");
        let checkpoint = self.context.clone();
        let result = eval(&parsed.expression, &mut self.context).and_then(|v| v.require_output());
        match result {
            Ok(output) => {
                debug!("evaluate finished");
                Ok(output)
            }
            Err(error) => {
                debug!(%error, "evaluate failed, restoring context");
                self.context = checkpoint;
                Err(error.into())
            }
        }
    }

    /// Bind a host JSON value. Arrays and objects are converted as they are accessed.
    pub fn set(&mut self, name: &str, value: impl Into<serde_json::Value>) -> Result<(), EvalError> {
        trace!(name, "set host value");
        let value = json::value_from_json(&value.into())?;
        self.context.set(name, value);
        Ok(())
    }

    /// Bind a host JSON value, converting nested collections up front.
    pub fn set_preconvert(&mut self, name: &str, value: serde_json::Value) -> Result<(), EvalError> {
        trace!(name, "set preconverted host value");
        let value = json::value_from_json_eager(&value)?;
        self.context.set(name, value);
        Ok(())
    }

    pub fn set_null(&mut self, name: &str) {
        trace!(name, "set null");
        self.context.set(name, Value::Null);
    }

    /// Bind a host function. It receives fully evaluated arguments and may fail with a
    /// message, which surfaces as [`EvalError::NativeFunction`].
    pub fn set_function<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[OutputValue]) -> Result<serde_json::Value, String> + 'static,
    {
        trace!(name, "set host function");
        let callable = Callable::Native {
            name: name.to_string(),
            func: Rc::new(func),
        };
        self.context.set(name, Value::Callable(callable));
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Every name visible from the current frame, sorted and without duplicates.
    pub fn names(&self) -> Vec<Symbol> {
        let mut names: Vec<Symbol> =
            std::iter::successors(Some(self.context.namespace().as_ref()), |ns| {
                ns.wrapped().map(Rc::as_ref)
            })
            .flat_map(|ns| ns.local_names())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("[1, 2] 3"), Err(ParseError::UnparsedInput("3".to_string())));
        assert_eq!(parse(""), Err(ParseError::ParseFailure));
        assert_eq!(parse("x"), Err(ParseError::ParseFailure));
    }

    #[test]
    fn test_definitions_persist() {
        let mut evaluator = Evaluator::new();
        evaluator.evaluate(&parse("(define x 20)").unwrap()).unwrap();
        let output = evaluator.evaluate(&parse("(+ x 1)").unwrap()).unwrap();
        assert_eq!(output, OutputValue::Number(21.0));
    }

    #[test]
    fn test_failed_evaluate_rolls_back() {
        let mut evaluator = Evaluator::new();
        evaluator.evaluate(&parse("(define a 1)").unwrap()).unwrap();
        let failed = evaluator.evaluate(&parse("[(define a 2), (define b 3), missing]").unwrap());
        assert!(matches!(
            failed,
            Err(SxpjError::Evaluation(EvalError::MissingValue(_)))
        ));
        let output = evaluator
            .evaluate(&parse(r#"[a, (has-name "b")]"#).unwrap())
            .unwrap();
        assert_eq!(
            output,
            OutputValue::Array(vec![OutputValue::Number(1.0), OutputValue::Boolean(false)])
        );
    }

    #[test]
    fn test_uncalled_function_in_output() {
        assert_eq!(
            parse("[(fn [x] x)]").unwrap().evaluate(),
            Err(SxpjError::Evaluation(EvalError::UncalledFunction))
        );
    }

    #[test]
    fn test_host_values() {
        let mut evaluator = Evaluator::new();
        evaluator.set("config", json!({"limits": [10, 20]})).unwrap();
        evaluator
            .set_preconvert("eager", json!({"z": 1, "a": 2}))
            .unwrap();
        evaluator.set_null("nothing");
        evaluator.set("len", 5).unwrap();
        evaluator.set("huge", u64::MAX).unwrap();

        let output = evaluator
            .evaluate(&parse(r#"[(sub config "limits" 1), eager, nothing, len, (> huge 1e19)]"#).unwrap())
            .unwrap();
        assert_eq!(
            output.to_json(crate::NullFields::Keep),
            json!([20.0, {"z": 1.0, "a": 2.0}, null, 5.0, true])
        );
    }

    #[test]
    fn test_host_functions() {
        let mut evaluator = Evaluator::new();
        evaluator.set_function("shout", |args| match args {
            [OutputValue::String(s)] => Ok(json!(s.to_uppercase())),
            _ => Err("shout takes one string".to_string()),
        });
        let output = evaluator
            .evaluate(&parse(r#"(shout "hi")"#).unwrap())
            .unwrap();
        assert_eq!(output, OutputValue::String("HI".to_string()));
        assert_eq!(
            evaluator.evaluate(&parse("(shout 1)").unwrap()),
            Err(SxpjError::Evaluation(EvalError::NativeFunction {
                name: "shout".to_string(),
                reason: "shout takes one string".to_string(),
            }))
        );
    }

    #[test]
    fn test_names() {
        let mut evaluator = Evaluator::new();
        evaluator.set_null("zzz");
        let names = evaluator.names();
        assert!(names.contains(&Symbol::from("zzz")));
        assert!(names.contains(&Symbol::from("map")));
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_recursion_limit_config() {
        let mut evaluator = Evaluator::with_config(EvaluatorConfig {
            max_call_depth: Some(40),
        });
        let looping = parse("[(define f (fn [n] (f (+ n 1)))), (f 0)]").unwrap();
        assert_eq!(
            evaluator.evaluate(&looping),
            Err(SxpjError::Evaluation(EvalError::RecursionLimit(40)))
        );
        assert_eq!(evaluator.context().call_depth(), 0);
    }
    #[test]
    fn test_builtin_calls_do_not_count_toward_depth() {
        // Four closure levels, each running several builtins and special forms
        let mut evaluator = Evaluator::with_config(EvaluatorConfig {
            max_call_depth: Some(5),
        });
        let source = parse(
            "[(define down (fn [n] (if (eq (- n 0) (+ 0 0)) (not false) (down (- n 1))))), (down 3)]",
        )
        .unwrap();
        assert_eq!(
            evaluator.evaluate(&source).unwrap().to_json(crate::NullFields::Keep),
            json!([null, true])
        );
    }
}
