use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::trace;

use crate::EvalError;
use crate::ast::{Expression, ExpressionValue, Symbol};
use crate::builtinops::{Arity, get_builtin_ops};
use crate::environment::Context;
use crate::json;
use crate::value::{BinaryFn, Callable, EvalResult, Member, UnaryFn, Value, VariadicFn};

/// Evaluate an expression in the given context
pub fn eval(expr: &Expression, ctx: &mut Context) -> EvalResult {
    match expr {
        Expression::Value(value) => eval_value(value, ctx),

        // Variable lookup
        Expression::Symbol(symbol) => ctx.lookup(symbol),

        Expression::Call(call_expr) => match eval(&call_expr.target, ctx)? {
            Value::Callable(callable) => call(&callable, &call_expr.params, ctx),
            other => Err(EvalError::BadCallTarget(other)),
        },
    }
}

/// Literal arrays and objects count toward the depth limit like function bodies do.
fn eval_value(value: &ExpressionValue, ctx: &mut Context) -> EvalResult {
    match value {
        ExpressionValue::String(s) => Ok(Value::String(s.clone())),
        ExpressionValue::Number(text) => eval_number(text),
        ExpressionValue::Boolean(b) => Ok(Value::Boolean(*b)),
        ExpressionValue::Null => Ok(Value::Null),
        ExpressionValue::Array(elements) => {
            let _guard = ctx.enter_call()?;
            eval_args(elements, ctx).map(Value::Array)
        }
        ExpressionValue::Object(members) => {
            let _guard = ctx.enter_call()?;
            let mut evaluated = Vec::with_capacity(members.len());
            for member in members {
                evaluated.push(Member::new(member.name.clone(), eval(&member.value, ctx)?));
            }
            Ok(Value::Object(evaluated))
        }
        ExpressionValue::Expression(inner) => eval(inner, ctx),
    }
}

/// Integer if the numeral fits an i64, otherwise a finite double.
fn eval_number(text: &str) -> EvalResult {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    match text.parse::<f64>() {
        Ok(d) if d.is_finite() => Ok(Value::Double(d)),
        _ => Err(EvalError::BadExpressionType(format!("number {}", text))),
    }
}

/// Helper function to evaluate a list of argument expressions, left to right
pub fn eval_args(args: &[Expression], ctx: &mut Context) -> Result<Vec<Value>, EvalError> {
    let mut evaluated_args = Vec::with_capacity(args.len());
    for arg_expr in args {
        evaluated_args.push(eval(arg_expr, ctx)?);
    }
    Ok(evaluated_args)
}

/// Call a callable with unevaluated parameter expressions.
pub fn call(callable: &Callable, params: &[Expression], ctx: &mut Context) -> EvalResult {
    match callable {
        // Special forms get unevaluated arguments
        Callable::SpecialForm { name, arity, func } => {
            arity.validate_params(name, params)?;
            func(params, ctx)
        }
        Callable::Function1 { name, func } => match params {
            [param] => {
                let value = eval(param, ctx)?;
                call_unary(*func, value, ctx)
            }
            _ => Err(EvalError::bad_parameter_list(
                format!("{} requires one argument", name),
                params,
            )),
        },
        Callable::Function2 { name, func } => match params {
            [first, second] => {
                let first = eval(first, ctx)?;
                let second = eval(second, ctx)?;
                call_binary(*func, first, second, ctx)
            }
            _ => Err(EvalError::bad_parameter_list(
                format!("{} requires two arguments", name),
                params,
            )),
        },
        Callable::Variadic { .. } | Callable::Native { .. } => {
            let args = eval_args(params, ctx)?;
            apply(callable, args, ctx)
        }
    }
}

/// Call a callable with already evaluated arguments. Special forms cannot be applied.
pub fn apply(callable: &Callable, args: Vec<Value>, ctx: &mut Context) -> EvalResult {
    match callable {
        Callable::SpecialForm { .. } => Err(EvalError::BadCallTarget(Value::Callable(
            callable.clone(),
        ))),
        Callable::Function1 { name, func } => match <[Value; 1]>::try_from(args) {
            Ok([value]) => call_unary(*func, value, ctx),
            Err(args) => Err(EvalError::bad_function_parameters(
                format!("{} requires one argument", name),
                &args,
            )),
        },
        Callable::Function2 { name, func } => match <[Value; 2]>::try_from(args) {
            Ok([first, second]) => call_binary(*func, first, second, ctx),
            Err(args) => Err(EvalError::bad_function_parameters(
                format!("{} requires two arguments", name),
                &args,
            )),
        },
        Callable::Variadic { name, arity, func } => {
            arity.validate(name, &args)?;
            match func {
                VariadicFn::Pure(f) => f(args),
                VariadicFn::Contextual(f) => f(args, ctx),
            }
        }
        Callable::Native { name, func } => {
            let inputs = args
                .iter()
                .map(Value::require_output)
                .collect::<Result<Vec<_>, _>>()?;
            let result = func(&inputs).map_err(|reason| EvalError::NativeFunction {
                name: name.clone(),
                reason,
            })?;
            json::value_from_json(&result)
        }
    }
}

fn call_unary(func: UnaryFn, value: Value, ctx: &mut Context) -> EvalResult {
    match func {
        UnaryFn::Pure(f) => f(value),
        UnaryFn::Contextual(f) => f(value, ctx),
    }
}

fn call_binary(func: BinaryFn, first: Value, second: Value, ctx: &mut Context) -> EvalResult {
    match func {
        BinaryFn::Pure(f) => f(first, second),
        BinaryFn::Contextual(f) => f(first, second, ctx),
    }
}

/// Evaluate expressions in order, returning the last value or null for an empty body
fn eval_body(body: &[Expression], ctx: &mut Context) -> EvalResult {
    let mut result = Value::Null;
    for expr in body {
        result = eval(expr, ctx)?;
    }
    Ok(result)
}

/// Evaluate if special form
pub fn eval_if(params: &[Expression], ctx: &mut Context) -> EvalResult {
    match params {
        [condition_expr, then_expr, else_expr] => match eval(condition_expr, ctx)? {
            Value::Boolean(true) => eval(then_expr, ctx),
            Value::Boolean(false) => eval(else_expr, ctx),
            _ => Err(EvalError::bad_parameter_list(
                "First parameter of if must be a boolean",
                params,
            )),
        },
        _ => Err(EvalError::bad_parameter_list(
            "if requires three parameters",
            params,
        )),
    }
}

/// Evaluate cond special form: condition/branch pairs, null when nothing matches
pub fn eval_cond(params: &[Expression], ctx: &mut Context) -> EvalResult {
    if params.len() % 2 != 0 {
        return Err(EvalError::bad_parameter_list(
            "cond requires an even number of parameters",
            params,
        ));
    }
    for pair in params.chunks_exact(2) {
        match eval(&pair[0], ctx)? {
            Value::Boolean(true) => return eval(&pair[1], ctx),
            Value::Boolean(false) => continue,
            _ => {
                return Err(EvalError::bad_parameter_list(
                    "cond conditions must be booleans",
                    pair,
                ));
            }
        }
    }
    Ok(Value::Null)
}

/// Evaluate let special form
pub fn eval_let(params: &[Expression], ctx: &mut Context) -> EvalResult {
    let Some((bindings, body)) = params.split_first() else {
        return Err(EvalError::bad_parameter_list(
            "No bindings list found for let",
            params,
        ));
    };

    // Bindings and body run in a copy; nothing defined here leaks to the caller.
    let mut local = ctx.clone();
    match bindings {
        Expression::Call(binding_call) => {
            let elements = binding_call.all_expressions();
            if elements.len() % 2 != 0 {
                return Err(EvalError::bad_parameter_list(
                    "let bindings must be name/value pairs",
                    params,
                ));
            }
            for pair in elements.chunks_exact(2) {
                let Some(name) = pair[0].symbol() else {
                    return Err(EvalError::bad_parameter_list(
                        "let binding names must be symbols",
                        params,
                    ));
                };
                let value = eval(&pair[1], &mut local)?;
                local = local.wrap_with(HashMap::from([(name.clone(), value)]));
            }
        }
        Expression::Value(ExpressionValue::Null) => {}
        _ => {
            return Err(EvalError::bad_parameter_list("Bad let bindings", params));
        }
    }

    eval_body(body, &mut local)
}

/// Evaluate define special form.
///
/// The value is computed in a fresh frame where the name is already bound (to null), and
/// the frame is then overridden with the result, so a function being defined can call
/// itself. Afterwards the caller's context is rebound to a child frame holding the name.
pub fn eval_define(params: &[Expression], ctx: &mut Context) -> EvalResult {
    let [name_expr, value_expr] = params else {
        return Err(EvalError::bad_parameter_list(
            "define requires two parameters",
            params,
        ));
    };
    let Some(name) = name_expr.symbol() else {
        return Err(EvalError::bad_parameter_list(
            "First parameter of define must be a symbol",
            params,
        ));
    };

    let definition_frame = ctx.wrap_with(HashMap::from([(name.clone(), Value::Null)]));
    let mut scratch = definition_frame.clone();
    let value = eval(value_expr, &mut scratch)?;
    definition_frame.set(name.clone(), value.clone());

    trace!(name = %name, value = %value, "define");
    *ctx = ctx.wrap_with(HashMap::from([(name.clone(), value)]));
    Ok(Value::Null)
}

/// Split `fn`/`dynfn` parameters into the argument names and the body.
fn function_signature<'a>(
    form: &str,
    params: &'a [Expression],
) -> Result<(Vec<Symbol>, &'a [Expression]), EvalError> {
    let Some((arg_list, body)) = params.split_first() else {
        return Err(EvalError::bad_parameter_list(
            format!("No parameter list found for {}", form),
            params,
        ));
    };

    let arg_exprs = match arg_list {
        Expression::Call(arg_call) => arg_call.all_expressions(),
        Expression::Value(ExpressionValue::Array(elements)) => elements.clone(),
        Expression::Value(ExpressionValue::Null) => Vec::new(),
        _ => {
            return Err(EvalError::bad_parameter_list(
                format!("Bad {} parameter list", form),
                params,
            ));
        }
    };

    let mut names = Vec::with_capacity(arg_exprs.len());
    for arg in &arg_exprs {
        match arg.symbol() {
            Some(symbol) => names.push(symbol.clone()),
            None => {
                return Err(EvalError::bad_parameter_list(
                    format!("{} parameters must be symbols", form),
                    params,
                ));
            }
        }
    }

    let unique: HashSet<&Symbol> = names.iter().collect();
    if unique.len() != names.len() {
        return Err(EvalError::bad_parameter_list(
            format!("{} parameter names must be unique", form),
            params,
        ));
    }
    if body.is_empty() {
        return Err(EvalError::bad_parameter_list(
            format!("{} requires at least one body expression", form),
            params,
        ));
    }

    Ok((names, body))
}

fn bind_arguments(names: &[Symbol], args: Vec<Value>) -> HashMap<Symbol, Value> {
    names.iter().cloned().zip(args).collect()
}

/// Evaluate fn special form: a closure over the defining context.
///
/// Every entry into a `fn` or `dynfn` body counts toward the context's depth limit;
/// builtins and special forms do not.
pub fn eval_fn(params: &[Expression], ctx: &mut Context) -> EvalResult {
    let (names, body) = function_signature("fn", params)?;
    let arity = Arity::Exact(names.len());
    let body: Rc<[Expression]> = Rc::from(body);
    let captured = ctx.clone();

    let func = move |args: Vec<Value>| -> EvalResult {
        let _guard = captured.enter_call()?;
        let mut local = captured.wrap_with(bind_arguments(&names, args));
        eval_body(&body, &mut local)
    };
    Ok(Value::Callable(Callable::Variadic {
        name: "fn".to_string(),
        arity,
        func: VariadicFn::Pure(Rc::new(func)),
    }))
}

/// Evaluate dynfn special form: free names resolve in the caller's context
pub fn eval_dynfn(params: &[Expression], _ctx: &mut Context) -> EvalResult {
    let (names, body) = function_signature("dynfn", params)?;
    let arity = Arity::Exact(names.len());
    let body: Rc<[Expression]> = Rc::from(body);

    let func = move |args: Vec<Value>, caller: &mut Context| -> EvalResult {
        let _guard = caller.enter_call()?;
        let mut local = caller.wrap_with(bind_arguments(&names, args));
        eval_body(&body, &mut local)
    };
    Ok(Value::Callable(Callable::Variadic {
        name: "dynfn".to_string(),
        arity,
        func: VariadicFn::Contextual(Rc::new(func)),
    }))
}

/// Evaluate ?? special form: the first non-null parameter, evaluated on demand
pub fn eval_nonnull_or(params: &[Expression], ctx: &mut Context) -> EvalResult {
    for param in params {
        let value = eval(param, ctx)?;
        if !value.is_null() {
            return Ok(value);
        }
    }
    Ok(Value::Null)
}

/// Create a root context holding every builtin operation
pub fn create_global_context(max_call_depth: Option<usize>) -> Context {
    let ctx = Context::new(max_call_depth);
    for builtin_op in get_builtin_ops() {
        ctx.set(builtin_op.id, Value::Callable(builtin_op.to_callable()));
    }
    ctx
}
