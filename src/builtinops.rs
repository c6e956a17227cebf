//! Built-in operations registry.
//!
//! Every builtin is described once in [`BUILTIN_OPS`] and installed into the root namespace
//! of each new evaluator by `evaluator::create_global_context`.
//!
//! ## Calling conventions
//!
//! - **Special forms** receive unevaluated parameters and the caller's context
//!   (`if`, `let`, `fn`, ...). They live in the evaluator; the parameter count is checked
//!   against the declared [`Arity`] first.
//! - **Function1 / Function2** take exactly one or two evaluated arguments. Some of them
//!   also receive the caller's context (`map`, `name`, ...).
//! - **Variadic** functions take any number of evaluated arguments; the declared
//!   [`Arity`] is checked before the call.
//!
//! ## Strictness
//!
//! - Operations reject wrong types instead of coercing (`(not 1)` is an error).
//! - Integer arithmetic detects overflow; integer division by zero is an error, double
//!   division follows IEEE 754.
//! - Integers and doubles are never `eq`, even when numerically equal.
//!
//! ## Adding New Operations
//!
//! 1. Implement the function with the signature of its [`OpKind`].
//! 2. Add an entry to `BUILTIN_OPS` with its identifier and arity.
//! 3. Add tests covering edge cases and error conditions.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::LazyLock;

use crate::EvalError;
use crate::ast::{Expression, Symbol};
use crate::environment::Context;
use crate::evaluator::{
    apply, eval_cond, eval_define, eval_dynfn, eval_fn, eval_if, eval_let, eval_nonnull_or,
};
use crate::value::{
    BinaryFn, Callable, EvalResult, HostValue, Member, Numbers, SpecialFormFn, UnaryFn, Value,
    VariadicFn,
};

/// Represents the expected number of arguments for an operation
#[derive(Debug, Clone, PartialEq)]
pub enum Arity {
    /// Exactly n arguments required
    Exact(usize),
    /// At least n arguments required
    AtLeast(usize),
    /// An even number of arguments (key/value pairs)
    Even,
    /// Any number of arguments (0 or more)
    Any,
}

impl Arity {
    /// The unmet requirement for `count` arguments, if any
    fn unmet(&self, name: &str, count: usize) -> Option<String> {
        let requirement = match self {
            Arity::Exact(n) if count != *n => format!("exactly {}", n),
            Arity::AtLeast(n) if count < *n => format!("at least {}", n),
            Arity::Even if count % 2 != 0 => "an even number of".to_string(),
            _ => return None,
        };
        Some(format!("{} requires {} parameters, got {}", name, requirement, count))
    }

    /// Check the argument count of a call to `name`
    pub fn validate(&self, name: &str, args: &[Value]) -> Result<(), EvalError> {
        match self.unmet(name, args.len()) {
            Some(reason) => Err(EvalError::bad_function_parameters(reason, args)),
            None => Ok(()),
        }
    }

    /// Check the unevaluated parameters of a special form
    pub fn validate_params(&self, name: &str, params: &[Expression]) -> Result<(), EvalError> {
        match self.unmet(name, params.len()) {
            Some(reason) => Err(EvalError::bad_parameter_list(reason, params)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "{}+", n),
            Arity::Even => write!(f, "even"),
            Arity::Any => write!(f, "any"),
        }
    }
}

/// The implementation of a builtin, one variant per calling convention
#[derive(Clone, Copy)]
pub enum OpKind {
    SpecialForm(SpecialFormFn),
    Function1(UnaryFn),
    Function2(BinaryFn),
    Variadic(fn(Vec<Value>) -> EvalResult),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
            OpKind::Function1(_) => write!(f, "Function1(<fn>)"),
            OpKind::Function2(_) => write!(f, "Function2(<fn>)"),
            OpKind::Variadic(_) => write!(f, "Variadic(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The name this operation is bound to
    pub id: &'static str,
    pub op_kind: OpKind,
    /// Expected number of arguments. Special forms and variadics check it before each call;
    /// Function1 and Function2 entries declare `Exact(1)` and `Exact(2)`.
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// The runtime value bound to `id` in a fresh context
    pub fn to_callable(&self) -> Callable {
        match self.op_kind {
            OpKind::SpecialForm(func) => Callable::SpecialForm {
                name: self.id,
                arity: self.arity.clone(),
                func,
            },
            OpKind::Function1(func) => Callable::Function1 { name: self.id, func },
            OpKind::Function2(func) => Callable::Function2 { name: self.id, func },
            OpKind::Variadic(func) => Callable::Variadic {
                name: self.id.to_string(),
                arity: self.arity.clone(),
                func: VariadicFn::Pure(Rc::new(func)),
            },
        }
    }
}

//
// Builtin Function Implementations
//

fn overflow(operation: &str, args: &[Value]) -> EvalError {
    EvalError::bad_function_parameters(format!("Integer overflow in {}", operation), args)
}

pub fn builtin_add(args: Vec<Value>) -> EvalResult {
    match Numbers::from_values("+", &args)? {
        Numbers::Integers(ns) => ns
            .iter()
            .try_fold(0i64, |sum, n| sum.checked_add(*n))
            .map(Value::Integer)
            .ok_or_else(|| overflow("addition", &args)),
        Numbers::Doubles(ds) => Ok(Value::Double(ds.iter().sum())),
    }
}

pub fn builtin_mul(args: Vec<Value>) -> EvalResult {
    match Numbers::from_values("*", &args)? {
        Numbers::Integers(ns) => ns
            .iter()
            .try_fold(1i64, |product, n| product.checked_mul(*n))
            .map(Value::Integer)
            .ok_or_else(|| overflow("multiplication", &args)),
        Numbers::Doubles(ds) => Ok(Value::Double(ds.iter().product())),
    }
}

pub fn builtin_subtract(args: Vec<Value>) -> EvalResult {
    match Numbers::from_values("-", &args)? {
        Numbers::Integers(ns) => match ns.split_first() {
            None => Ok(Value::Integer(0)),
            Some((first, rest)) => rest
                .iter()
                .try_fold(*first, |total, n| total.checked_sub(*n))
                .map(Value::Integer)
                .ok_or_else(|| overflow("subtraction", &args)),
        },
        Numbers::Doubles(ds) => match ds.split_first() {
            None => Ok(Value::Double(0.0)),
            Some((first, rest)) => Ok(Value::Double(rest.iter().fold(*first, |t, n| t - n))),
        },
    }
}

/// Left fold for `/` and `%`: integers truncate and reject a zero divisor
fn integer_division(
    args: &[Value],
    ns: &[i64],
    operation: &str,
    op: fn(i64, i64) -> Option<i64>,
) -> EvalResult {
    let Some((first, rest)) = ns.split_first() else {
        return Ok(Value::Integer(0));
    };
    let mut total = *first;
    for n in rest {
        if *n == 0 {
            return Err(EvalError::DivisionByZero);
        }
        total = op(total, *n).ok_or_else(|| overflow(operation, args))?;
    }
    Ok(Value::Integer(total))
}

fn double_division(ds: &[f64], op: fn(f64, f64) -> f64) -> EvalResult {
    match ds.split_first() {
        None => Ok(Value::Double(0.0)),
        Some((first, rest)) => Ok(Value::Double(rest.iter().fold(*first, |t, n| op(t, *n)))),
    }
}

pub fn builtin_div(args: Vec<Value>) -> EvalResult {
    match Numbers::from_values("/", &args)? {
        Numbers::Integers(ns) => integer_division(&args, &ns, "division", i64::checked_div),
        Numbers::Doubles(ds) => double_division(&ds, |a, b| a / b),
    }
}

pub fn builtin_mod(args: Vec<Value>) -> EvalResult {
    match Numbers::from_values("%", &args)? {
        Numbers::Integers(ns) => integer_division(&args, &ns, "remainder", i64::checked_rem),
        Numbers::Doubles(ds) => double_division(&ds, |a, b| a % b),
    }
}

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        pub fn $name(args: Vec<Value>) -> EvalResult {
            // Mixed operands are promoted to doubles
            let holds = match Numbers::from_values($op_str, &args)? {
                Numbers::Integers(ns) => ns.windows(2).all(|w| w[0] $op w[1]),
                Numbers::Doubles(ds) => ds.windows(2).all(|w| w[0] $op w[1]),
            };
            Ok(Value::Boolean(holds))
        }
    };
}

// Generate all comparison functions
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

/// Structural equality: host collections compare like their plain counterparts, objects
/// ignore member order, and values of different types are never equal.
pub fn values_equal(a: &Value, b: &Value) -> Result<bool, EvalError> {
    let (a, b) = (a.materialized()?, b.materialized()?);
    match (&a, &b) {
        (Value::String(x), Value::String(y)) => Ok(x == y),
        (Value::Integer(x), Value::Integer(y)) => Ok(x == y),
        (Value::Double(x), Value::Double(y)) => Ok(x == y),
        (Value::Boolean(x), Value::Boolean(y)) => Ok(x == y),
        (Value::Null, Value::Null) => Ok(true),
        (Value::Array(xs), Value::Array(ys)) => {
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for (x, y) in xs.iter().zip(ys) {
                if !values_equal(x, y)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Object(xs), Value::Object(ys)) => {
            if xs.len() != ys.len() {
                return Ok(false);
            }
            let mut xs: Vec<&Member> = xs.iter().collect();
            let mut ys: Vec<&Member> = ys.iter().collect();
            xs.sort_by(|m, n| m.name.cmp(&n.name));
            ys.sort_by(|m, n| m.name.cmp(&n.name));
            for (x, y) in xs.iter().zip(&ys) {
                if x.name != y.name || !values_equal(&x.value, &y.value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn builtin_eq(args: Vec<Value>) -> EvalResult {
    let Some((first, rest)) = args.split_first() else {
        return Err(EvalError::bad_function_parameters(
            "eq requires at least two parameters",
            &args,
        ));
    };
    for other in rest {
        if !values_equal(first, other)? {
            return Ok(Value::Boolean(false));
        }
    }
    Ok(Value::Boolean(true))
}

pub fn builtin_not(value: Value) -> EvalResult {
    match value {
        Value::Boolean(b) => Ok(Value::Boolean(!b)),
        other => Err(EvalError::bad_function_parameters(
            "not requires a boolean argument",
            &[other],
        )),
    }
}

pub fn builtin_is_null(value: Value) -> EvalResult {
    Ok(Value::Boolean(value.is_null()))
}

pub fn builtin_len(value: Value) -> EvalResult {
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::Array(elements) => elements.len(),
        Value::HostArray(elements) => elements.len(),
        _ => {
            return Err(EvalError::bad_function_parameters(
                "len requires a string or array argument",
                &[value],
            ));
        }
    };
    Ok(Value::Integer(i64::try_from(len).unwrap_or(i64::MAX)))
}

fn element_at<T>(elements: &[T], index: i64) -> Option<&T> {
    usize::try_from(index).ok().and_then(|i| elements.get(i))
}

/// One subscription step of `sub`/`sub?`
fn subscript(container: &Value, key: &Value, args: &[Value]) -> EvalResult {
    let out_of_bounds = |index: i64, len: usize| {
        EvalError::bad_function_parameters(
            format!("Index {} out of bounds for array of {} elements", index, len),
            args,
        )
    };
    match (container, key) {
        (Value::Array(elements), Value::Integer(index)) => element_at(elements.as_slice(), *index)
            .cloned()
            .ok_or_else(|| out_of_bounds(*index, elements.len())),
        (Value::HostArray(elements), Value::Integer(index)) => element_at(elements.as_slice(), *index)
            .ok_or_else(|| out_of_bounds(*index, elements.len()))?
            .to_value(),
        (Value::Array(_) | Value::HostArray(_), _) => Err(EvalError::bad_function_parameters(
            "sub requires integer keys for arrays",
            args,
        )),
        (Value::Object(members), Value::String(name)) => Ok(members
            .iter()
            .find(|m| &m.name == name)
            .map(|m| m.value.clone())
            .unwrap_or(Value::Null)),
        (Value::HostMap(map), Value::String(name)) => match map.get(name) {
            Some(value) => value.to_value(),
            None => Ok(Value::Null),
        },
        (Value::Object(_) | Value::HostMap(_), _) => Err(EvalError::bad_function_parameters(
            "sub requires string keys for objects",
            args,
        )),
        _ => Err(EvalError::bad_function_parameters(
            "sub requires an array or object container",
            args,
        )),
    }
}

fn subscript_chain(args: &[Value], null_safe: bool) -> EvalResult {
    let Some((container, keys)) = args.split_first() else {
        return Err(EvalError::bad_function_parameters(
            "sub requires a container",
            args,
        ));
    };
    let mut current = container.clone();
    for key in keys {
        if null_safe && current.is_null() {
            return Ok(Value::Null);
        }
        current = subscript(&current, key, args)?;
    }
    Ok(current)
}

pub fn builtin_sub(args: Vec<Value>) -> EvalResult {
    subscript_chain(&args, false)
}

pub fn builtin_sub_opt(args: Vec<Value>) -> EvalResult {
    subscript_chain(&args, true)
}

pub fn builtin_merge(args: Vec<Value>) -> EvalResult {
    let mut merged = BTreeMap::new();
    for value in &args {
        match value {
            Value::HostMap(map) => {
                merged.extend(map.iter().map(|(name, v)| (name.clone(), v.clone())));
            }
            Value::Object(members) => merged.extend(
                members
                    .iter()
                    .map(|m| (m.name.clone(), HostValue::Runtime(m.value.clone()))),
            ),
            _ => {
                return Err(EvalError::bad_function_parameters(
                    "merge requires object parameters",
                    &args,
                ));
            }
        }
    }
    Ok(Value::HostMap(Rc::new(merged)))
}

/// Split alternating key/value arguments, requiring string keys
fn key_value_pairs<'a>(
    function: &str,
    args: &'a [Value],
) -> Result<Vec<(&'a str, &'a Value)>, EvalError> {
    if args.len() % 2 != 0 {
        return Err(EvalError::bad_function_parameters(
            format!("{} requires an even number of parameters", function),
            args,
        ));
    }
    args.chunks_exact(2)
        .map(|pair| match &pair[0] {
            Value::String(key) => Ok((key.as_str(), &pair[1])),
            _ => Err(EvalError::bad_function_parameters(
                format!("{} keys must be strings", function),
                args,
            )),
        })
        .collect()
}

pub fn builtin_object(args: Vec<Value>) -> EvalResult {
    let members = key_value_pairs("object", &args)?
        .into_iter()
        .map(|(key, value)| Member::new(key, value.clone()))
        .collect();
    Ok(Value::Object(members))
}

pub fn builtin_dict(args: Vec<Value>) -> EvalResult {
    let map = key_value_pairs("dict", &args)?
        .into_iter()
        .map(|(key, value)| (key.to_string(), HostValue::Runtime(value.clone())))
        .collect();
    Ok(Value::HostMap(Rc::new(map)))
}

pub fn builtin_as_object(value: Value) -> EvalResult {
    match &value {
        Value::Object(_) => Ok(value),
        Value::HostMap(_) => value.materialized(),
        _ => Err(EvalError::bad_function_parameters(
            "as-object requires a dict or an object",
            &[value],
        )),
    }
}

pub fn builtin_as_dict(value: Value) -> EvalResult {
    match value {
        Value::HostMap(_) => Ok(value),
        Value::Object(members) => Ok(Value::HostMap(Rc::new(
            members
                .into_iter()
                .map(|m| (m.name, HostValue::Runtime(m.value)))
                .collect(),
        ))),
        other => Err(EvalError::bad_function_parameters(
            "as-dict requires a dict or an object",
            &[other],
        )),
    }
}

pub fn builtin_concat(args: Vec<Value>) -> EvalResult {
    if args.iter().all(|v| matches!(v, Value::String(_))) {
        return Ok(Value::String(
            args.iter().filter_map(Value::as_str).collect::<String>(),
        ));
    }
    let mut joined = Vec::new();
    for value in &args {
        match value.any_array()? {
            Some(elements) => joined.extend(elements),
            None => {
                return Err(EvalError::bad_function_parameters(
                    "concat requires all strings or all arrays",
                    &args,
                ));
            }
        }
    }
    Ok(Value::Array(joined))
}

pub fn builtin_join_string(separator: Value, elements: Value) -> EvalResult {
    let params = || vec![separator.clone(), elements.clone()];
    let Value::String(sep) = &separator else {
        return Err(EvalError::bad_function_parameters(
            "First parameter to join-string must be a string",
            &params(),
        ));
    };
    let strings = elements
        .any_array()?
        .and_then(|items| {
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect::<Option<Vec<String>>>()
        })
        .ok_or_else(|| {
            EvalError::bad_function_parameters(
                "Second parameter to join-string must be a string array",
                &params(),
            )
        })?;
    Ok(Value::String(strings.join(sep)))
}

fn rounding(name: &str, value: Value, round: fn(f64) -> f64) -> EvalResult {
    match value {
        Value::Integer(_) => Ok(value),
        Value::Double(d) => Ok(Value::Double(round(d))),
        other => Err(EvalError::bad_function_parameters(
            format!("{} requires a number argument", name),
            &[other],
        )),
    }
}

pub fn builtin_round(value: Value) -> EvalResult {
    rounding("round", value, f64::round)
}

pub fn builtin_floor(value: Value) -> EvalResult {
    rounding("floor", value, f64::floor)
}

pub fn builtin_ceil(value: Value) -> EvalResult {
    rounding("ceil", value, f64::ceil)
}

pub fn builtin_trunc(value: Value) -> EvalResult {
    rounding("trunc", value, f64::trunc)
}

pub fn builtin_int(value: Value) -> EvalResult {
    // 2^63, exactly representable as a double
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    match value {
        Value::Integer(_) => Ok(value),
        Value::Double(d) if d.is_finite() && (-BOUND..BOUND).contains(&d.trunc()) => {
            Ok(Value::Integer(d.trunc() as i64))
        }
        other => Err(EvalError::bad_function_parameters(
            "int requires a finite number in integer range",
            &[other],
        )),
    }
}

pub fn builtin_double(value: Value) -> EvalResult {
    match value {
        Value::Integer(i) => Ok(Value::Double(i as f64)),
        Value::Double(_) => Ok(value),
        other => Err(EvalError::bad_function_parameters(
            "double requires a number argument",
            &[other],
        )),
    }
}

fn name_symbol(value: &Value) -> Result<Symbol, EvalError> {
    match value {
        Value::String(s) => Ok(Symbol::new(s.clone())),
        other => Err(EvalError::bad_function_parameters(
            format!("Bad name type: {}", other.type_name()),
            std::slice::from_ref(other),
        )),
    }
}

pub fn builtin_name(value: Value, ctx: &mut Context) -> EvalResult {
    let symbol = name_symbol(&value)?;
    ctx.try_lookup(&symbol).ok_or_else(|| {
        EvalError::bad_function_parameters(format!("Unrecognized name: '{}'", symbol), &[value])
    })
}

pub fn builtin_has_name(value: Value, ctx: &mut Context) -> EvalResult {
    let symbol = name_symbol(&value)?;
    Ok(Value::Boolean(ctx.try_lookup(&symbol).is_some()))
}

pub fn builtin_name_opt(value: Value, ctx: &mut Context) -> EvalResult {
    let symbol = name_symbol(&value)?;
    Ok(ctx.try_lookup(&symbol).unwrap_or(Value::Null))
}

fn require_callable<'a>(
    function: &str,
    func: &'a Value,
    other: &Value,
) -> Result<&'a Callable, EvalError> {
    func.as_callable().ok_or_else(|| {
        EvalError::bad_function_parameters(
            format!("First parameter to {} must be callable", function),
            &[func.clone(), other.clone()],
        )
    })
}

pub fn builtin_apply(func: Value, args: Value, ctx: &mut Context) -> EvalResult {
    let callable = require_callable("apply", &func, &args)?;
    let Some(elements) = args.any_array()? else {
        return Err(EvalError::bad_function_parameters(
            "Second parameter to apply must be an array",
            &[func.clone(), args.clone()],
        ));
    };
    apply(callable, elements, ctx)
}

/// Call `callable` on each character, requiring one-character string results
fn map_chars(
    function: &str,
    callable: &Callable,
    s: &str,
    ctx: &mut Context,
    params: &[Value],
) -> Result<String, EvalError> {
    let mut mapped = String::with_capacity(s.len());
    for c in s.chars() {
        match apply(callable, vec![Value::String(c.to_string())], ctx)? {
            Value::String(r) if r.chars().count() == 1 => mapped.push_str(&r),
            _ => {
                return Err(EvalError::bad_function_parameters(
                    format!(
                        "Function passed to {} over strings must return one-character strings",
                        function
                    ),
                    params,
                ));
            }
        }
    }
    Ok(mapped)
}

pub fn builtin_map(func: Value, collection: Value, ctx: &mut Context) -> EvalResult {
    let callable = require_callable("map", &func, &collection)?;
    if let Value::String(s) = &collection {
        let params = [func.clone(), collection.clone()];
        return map_chars("map", callable, s, ctx, &params).map(Value::String);
    }
    let Some(elements) = collection.any_array()? else {
        return Err(EvalError::bad_function_parameters(
            "Second parameter to map must be a string or an array",
            &[func.clone(), collection.clone()],
        ));
    };
    elements
        .into_iter()
        .map(|element| apply(callable, vec![element], ctx))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

pub fn builtin_filter(func: Value, collection: Value, ctx: &mut Context) -> EvalResult {
    let callable = require_callable("filter", &func, &collection)?;
    let params = || vec![func.clone(), collection.clone()];
    let keep = |value: Value, ctx: &mut Context| -> Result<bool, EvalError> {
        match apply(callable, vec![value], ctx)? {
            Value::Boolean(b) => Ok(b),
            _ => Err(EvalError::bad_function_parameters(
                "Function passed to filter must return booleans",
                &params(),
            )),
        }
    };

    if let Value::String(s) = &collection {
        let mut filtered = String::new();
        for c in s.chars() {
            if keep(Value::String(c.to_string()), ctx)? {
                filtered.push(c);
            }
        }
        return Ok(Value::String(filtered));
    }
    let Some(elements) = collection.any_array()? else {
        return Err(EvalError::bad_function_parameters(
            "Second parameter to filter must be a string or an array",
            &params(),
        ));
    };
    let mut filtered = Vec::new();
    for element in elements {
        if keep(element.clone(), ctx)? {
            filtered.push(element);
        }
    }
    Ok(Value::Array(filtered))
}

pub fn builtin_flatmap(func: Value, collection: Value, ctx: &mut Context) -> EvalResult {
    let callable = require_callable("flatmap", &func, &collection)?;
    if let Value::String(s) = &collection {
        let params = [func.clone(), collection.clone()];
        return map_chars("flatmap", callable, s, ctx, &params).map(Value::String);
    }
    let Some(elements) = collection.any_array()? else {
        return Err(EvalError::bad_function_parameters(
            "Second parameter to flatmap must be a string or an array",
            &[func.clone(), collection.clone()],
        ));
    };
    let mut spliced = Vec::new();
    for element in elements {
        let result = apply(callable, vec![element], ctx)?;
        match result.any_array()? {
            Some(items) => spliced.extend(items),
            None => {
                return Err(EvalError::bad_function_parameters(
                    "Function passed to flatmap must return arrays",
                    &[func.clone(), collection.clone()],
                ));
            }
        }
    }
    Ok(Value::Array(spliced))
}

/// Global registry of all built-in operations
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        op_kind: OpKind::Variadic(builtin_add),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "-",
        op_kind: OpKind::Variadic(builtin_subtract),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "*",
        op_kind: OpKind::Variadic(builtin_mul),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "/",
        op_kind: OpKind::Variadic(builtin_div),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "%",
        op_kind: OpKind::Variadic(builtin_mod),
        arity: Arity::Any,
    },
    // Comparison operations
    BuiltinOp {
        id: ">",
        op_kind: OpKind::Variadic(builtin_gt),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: ">=",
        op_kind: OpKind::Variadic(builtin_ge),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "<",
        op_kind: OpKind::Variadic(builtin_lt),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "<=",
        op_kind: OpKind::Variadic(builtin_le),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "eq",
        op_kind: OpKind::Variadic(builtin_eq),
        arity: Arity::AtLeast(2),
    },
    // Special forms
    BuiltinOp {
        id: "if",
        op_kind: OpKind::SpecialForm(eval_if),
        arity: Arity::Exact(3),
    },
    BuiltinOp {
        id: "cond",
        op_kind: OpKind::SpecialForm(eval_cond),
        arity: Arity::Even,
    },
    BuiltinOp {
        id: "let",
        op_kind: OpKind::SpecialForm(eval_let),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "define",
        op_kind: OpKind::SpecialForm(eval_define),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "fn",
        op_kind: OpKind::SpecialForm(eval_fn),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "dynfn",
        op_kind: OpKind::SpecialForm(eval_dynfn),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "??",
        op_kind: OpKind::SpecialForm(eval_nonnull_or),
        arity: Arity::Any,
    },
    // Higher-order functions
    BuiltinOp {
        id: "apply",
        op_kind: OpKind::Function2(BinaryFn::Contextual(builtin_apply)),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "map",
        op_kind: OpKind::Function2(BinaryFn::Contextual(builtin_map)),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "filter",
        op_kind: OpKind::Function2(BinaryFn::Contextual(builtin_filter)),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "flatmap",
        op_kind: OpKind::Function2(BinaryFn::Contextual(builtin_flatmap)),
        arity: Arity::Exact(2),
    },
    // Access and construction
    BuiltinOp {
        id: "sub",
        op_kind: OpKind::Variadic(builtin_sub),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "sub?",
        op_kind: OpKind::Variadic(builtin_sub_opt),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "merge",
        op_kind: OpKind::Variadic(builtin_merge),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "object",
        op_kind: OpKind::Variadic(builtin_object),
        arity: Arity::Even,
    },
    BuiltinOp {
        id: "dict",
        op_kind: OpKind::Variadic(builtin_dict),
        arity: Arity::Even,
    },
    BuiltinOp {
        id: "as-object",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_as_object)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "as-dict",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_as_dict)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "concat",
        op_kind: OpKind::Variadic(builtin_concat),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "len",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_len)),
        arity: Arity::Exact(1),
    },
    // Logical operations
    BuiltinOp {
        id: "not",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_not)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "is-null",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_is_null)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "is-nil",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_is_null)),
        arity: Arity::Exact(1),
    },
    // Name lookup
    BuiltinOp {
        id: "name",
        op_kind: OpKind::Function1(UnaryFn::Contextual(builtin_name)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "has-name",
        op_kind: OpKind::Function1(UnaryFn::Contextual(builtin_has_name)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "name?",
        op_kind: OpKind::Function1(UnaryFn::Contextual(builtin_name_opt)),
        arity: Arity::Exact(1),
    },
    // Strings
    BuiltinOp {
        id: "join-string",
        op_kind: OpKind::Function2(BinaryFn::Pure(builtin_join_string)),
        arity: Arity::Exact(2),
    },
    // Number conversion
    BuiltinOp {
        id: "round",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_round)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "floor",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_floor)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "ceil",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_ceil)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "trunc",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_trunc)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "int",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_int)),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "double",
        op_kind: OpKind::Function1(UnaryFn::Pure(builtin_double)),
        arity: Arity::Exact(1),
    },
];

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// Get all builtin operations (for internal use by evaluator)
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin op by the name it is bound to
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{create_global_context, eval};
    use crate::parser::parse_element;

    fn eval_string(input: &str) -> EvalResult {
        let expr = crate::ast::Expression::from(parse_element(input).unwrap());
        let mut ctx = create_global_context(Some(crate::DEFAULT_MAX_CALL_DEPTH));
        eval(&expr, &mut ctx)
    }

    fn int(i: i64) -> Value {
        Value::Integer(i)
    }

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    fn is_bad_params(result: EvalResult) -> bool {
        matches!(result, Err(EvalError::BadFunctionParameters { .. }))
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_builtin_op("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));
        assert!(!not_op.is_special_form());

        let if_op = find_builtin_op("if").unwrap();
        assert!(if_op.is_special_form());
        assert_eq!(if_op.to_callable().name(), "if");
        assert!(if_op.to_callable().is_special_form());

        let add_op = find_builtin_op("+").unwrap();
        if let OpKind::Variadic(func) = add_op.op_kind {
            assert_eq!(func(vec![int(1), int(2)]).unwrap(), int(3));
        } else {
            panic!("Expected Variadic variant");
        }

        assert!(find_builtin_op("lambda").is_none());
        let ids: std::collections::HashSet<&str> =
            get_builtin_ops().iter().map(|op| op.id).collect();
        assert_eq!(ids.len(), get_builtin_ops().len());

        // Fixed-argument kinds declare the count their calling convention takes
        for op in get_builtin_ops() {
            match op.op_kind {
                OpKind::Function1(_) => assert_eq!(op.arity, Arity::Exact(1), "{}", op.id),
                OpKind::Function2(_) => assert_eq!(op.arity, Arity::Exact(2), "{}", op.id),
                OpKind::SpecialForm(_) | OpKind::Variadic(_) => {}
            }
        }
    }

    #[test]
    fn test_special_form_arity_checked_before_dispatch() {
        let reason = |result: EvalResult| match result {
            Err(EvalError::BadParameterList { reason, .. }) => reason,
            other => panic!("expected a parameter list error, got {:?}", other),
        };
        assert_eq!(
            reason(eval_string("(if true 1)")),
            "if requires exactly 3 parameters, got 2"
        );
        assert_eq!(
            reason(eval_string("(cond true 1 false)")),
            "cond requires an even number of parameters, got 3"
        );
        assert_eq!(reason(eval_string("(let)")), "let requires at least 1 parameters, got 0");
        assert_eq!(
            reason(eval_string("(define x)")),
            "define requires exactly 2 parameters, got 1"
        );
        assert_eq!(
            reason(eval_string("(fn [a])")),
            "fn requires at least 2 parameters, got 1"
        );
        assert_eq!(
            reason(eval_string("(dynfn)")),
            "dynfn requires at least 2 parameters, got 0"
        );
    }

    #[test]
    fn test_arity_validate() {
        assert!(Arity::Exact(2).validate("f", &[int(1), int(2)]).is_ok());
        assert!(Arity::AtLeast(2).validate("f", &[int(1)]).is_err());
        assert!(Arity::Even.validate("f", &[int(1)]).is_err());
        assert!(Arity::Even.validate("f", &[]).is_ok());
        assert!(Arity::Any.validate("f", &[]).is_ok());
        assert_eq!(
            Arity::Exact(1).validate("f", &[]),
            Err(EvalError::BadFunctionParameters {
                reason: "f requires exactly 1 parameters, got 0".to_string(),
                params: vec![],
            })
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(builtin_add(vec![]).unwrap(), int(0));
        assert_eq!(builtin_mul(vec![]).unwrap(), int(1));
        assert_eq!(builtin_subtract(vec![]).unwrap(), int(0));
        assert_eq!(builtin_div(vec![]).unwrap(), int(0));
        assert_eq!(builtin_subtract(vec![int(5)]).unwrap(), int(5));
        assert_eq!(builtin_add(vec![int(1), int(2), int(3)]).unwrap(), int(6));
        assert_eq!(builtin_subtract(vec![int(10), int(3), int(2)]).unwrap(), int(5));
        assert_eq!(
            builtin_add(vec![int(1), Value::Double(2.0)]).unwrap(),
            Value::Double(3.0)
        );
        assert_eq!(builtin_div(vec![int(25), int(2)]).unwrap(), int(12));
        assert_eq!(builtin_div(vec![int(-7), int(2)]).unwrap(), int(-3));
        assert_eq!(
            builtin_div(vec![Value::Double(25.0), int(2)]).unwrap(),
            Value::Double(12.5)
        );
        assert_eq!(builtin_mod(vec![int(7), int(3)]).unwrap(), int(1));
        assert_eq!(builtin_mod(vec![int(-7), int(3)]).unwrap(), int(-1));
        assert_eq!(
            builtin_mod(vec![Value::Double(7.5), int(2)]).unwrap(),
            Value::Double(1.5)
        );
        assert!(is_bad_params(builtin_add(vec![int(1), string("2")])));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            builtin_div(vec![int(6), int(0)]),
            Err(EvalError::DivisionByZero)
        );
        assert_eq!(
            builtin_mod(vec![int(6), int(0)]),
            Err(EvalError::DivisionByZero)
        );
        assert_eq!(
            builtin_div(vec![Value::Double(1.0), int(0)]).unwrap(),
            Value::Double(f64::INFINITY)
        );
    }

    #[test]
    fn test_arithmetic_overflow() {
        assert!(is_bad_params(builtin_add(vec![int(i64::MAX), int(1)])));
        assert!(is_bad_params(builtin_subtract(vec![int(i64::MIN), int(1)])));
        assert!(is_bad_params(builtin_mul(vec![int(i64::MAX / 2 + 1), int(2)])));
        assert!(is_bad_params(builtin_div(vec![int(i64::MIN), int(-1)])));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(builtin_lt(vec![int(1), int(2), int(3)]).unwrap(), Value::Boolean(true));
        assert_eq!(builtin_lt(vec![int(1), int(3), int(2)]).unwrap(), Value::Boolean(false));
        assert_eq!(builtin_ge(vec![int(3), int(3)]).unwrap(), Value::Boolean(true));
        assert_eq!(
            builtin_gt(vec![Value::Double(2.5), int(2)]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            builtin_le(vec![int(2), Value::Double(2.0)]).unwrap(),
            Value::Boolean(true)
        );
        assert!(is_bad_params(builtin_lt(vec![int(1), string("a")])));
        assert!(is_bad_params(eval_string("(< 1)")));
    }

    #[test]
    fn test_eq() {
        assert_eq!(
            eval_string(r#"(eq {"a": [1, {"b": null}], "c": "x"} {"c": "x", "a": [1, {"b": null}]})"#)
                .unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_string(r#"(eq {"a": [1, 2]} {"a": [1, 3]})"#).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(eval_string("(eq 1 1 1)").unwrap(), Value::Boolean(true));
        assert_eq!(eval_string("(eq 1 1 2)").unwrap(), Value::Boolean(false));
        assert_eq!(eval_string("(eq 1 1.0)").unwrap(), Value::Boolean(false));
        assert_eq!(eval_string("(eq [1] [1, 1])").unwrap(), Value::Boolean(false));
        assert_eq!(eval_string("(eq null null)").unwrap(), Value::Boolean(true));
        assert!(is_bad_params(eval_string("(eq 1)")));

        let host = Value::HostArray(Rc::new(vec![HostValue::Json(serde_json::json!(1))]));
        assert!(values_equal(&host, &Value::Array(vec![int(1)])).unwrap());
    }

    #[test]
    fn test_logic() {
        assert_eq!(eval_string("(not true)").unwrap(), Value::Boolean(false));
        assert!(is_bad_params(eval_string("(not 0)")));
        assert_eq!(eval_string("(is-null null)").unwrap(), Value::Boolean(true));
        assert_eq!(eval_string("(is-nil ())").unwrap(), Value::Boolean(true));
        assert_eq!(eval_string("(is-null 0)").unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_len() {
        assert_eq!(eval_string(r#"(len "héllo")"#).unwrap(), int(5));
        assert_eq!(eval_string("(len [1, 2])").unwrap(), int(2));
        assert!(is_bad_params(eval_string("(len 3)")));
    }

    #[test]
    fn test_sub() {
        assert_eq!(eval_string("(sub [1, [2, 3]] 1 0)").unwrap(), int(2));
        assert_eq!(eval_string(r#"(sub {"a": {"b": 4}} "a" "b")"#).unwrap(), int(4));
        assert_eq!(eval_string(r#"(sub {"a": 1} "z")"#).unwrap(), Value::Null);
        assert!(is_bad_params(eval_string("(sub [1] 1)")));
        assert!(is_bad_params(eval_string("(sub [1] -1)")));
        assert!(is_bad_params(eval_string(r#"(sub [1] "0")"#)));
        assert!(is_bad_params(eval_string(r#"(sub {"a": 1} 0)"#)));
        assert!(is_bad_params(eval_string(r#"(sub "abc" 0)"#)));
    }

    #[test]
    fn test_sub_opt_short_circuits() {
        let input = r#"{"a": null}"#;
        assert_eq!(
            eval_string(&format!(r#"(sub? {} "a" "b" 0)"#, input)).unwrap(),
            Value::Null
        );
        assert!(eval_string(&format!(r#"(sub {} "a" "b" 0)"#, input)).is_err());
        assert_eq!(eval_string(r#"(sub? null "x")"#).unwrap(), Value::Null);
        assert_eq!(eval_string(r#"(sub? [5] 0)"#).unwrap(), int(5));
    }

    #[test]
    fn test_merge_and_conversions() {
        let merged = eval_string(r#"(as-object (merge {"b": 1, "a": 1} {"a": 2}))"#).unwrap();
        assert_eq!(
            merged,
            Value::Object(vec![Member::new("a", int(2)), Member::new("b", int(1))])
        );
        assert!(matches!(
            eval_string(r#"(merge {"a": 1} (dict "b" 2))"#).unwrap(),
            Value::HostMap(_)
        ));
        assert!(is_bad_params(eval_string(r#"(merge {"a": 1} [1])"#)));
        assert!(is_bad_params(eval_string(r#"(merge {"a": 1})"#)));

        assert_eq!(
            eval_string(r#"(object "z" 1 "a" 2)"#).unwrap(),
            Value::Object(vec![Member::new("z", int(1)), Member::new("a", int(2))])
        );
        assert_eq!(
            eval_string(r#"(as-object (dict "z" 1 "a" 2))"#).unwrap(),
            Value::Object(vec![Member::new("a", int(2)), Member::new("z", int(1))])
        );
        assert!(matches!(
            eval_string(r#"(as-dict {"a": 1})"#).unwrap(),
            Value::HostMap(_)
        ));
        assert!(is_bad_params(eval_string(r#"(object "a")"#)));
        assert!(is_bad_params(eval_string("(object 1 2)")));
        assert!(is_bad_params(eval_string("(as-object [1])")));
        assert!(is_bad_params(eval_string("(as-dict 1)")));
    }

    #[test]
    fn test_concat() {
        assert_eq!(eval_string(r#"(concat "ab" "c" "")"#).unwrap(), string("abc"));
        assert_eq!(
            eval_string("(concat [1] [] [2, 3])").unwrap(),
            Value::Array(vec![int(1), int(2), int(3)])
        );
        assert!(is_bad_params(eval_string(r#"(concat "a" [1])"#)));
        assert!(is_bad_params(eval_string(r#"(concat "a")"#)));
    }

    #[test]
    fn test_join_string() {
        assert_eq!(
            eval_string(r#"(join-string ", " ["a", "b", "c"])"#).unwrap(),
            string("a, b, c")
        );
        assert_eq!(eval_string(r#"(join-string "-" [])"#).unwrap(), string(""));
        assert!(is_bad_params(eval_string(r#"(join-string 1 ["a"])"#)));
        assert!(is_bad_params(eval_string(r#"(join-string "," ["a", 1])"#)));
    }

    #[test]
    fn test_number_conversion() {
        assert_eq!(eval_string("(round 2.5)").unwrap(), Value::Double(3.0));
        assert_eq!(eval_string("(round -2.5)").unwrap(), Value::Double(-3.0));
        assert_eq!(eval_string("(floor -1.5)").unwrap(), Value::Double(-2.0));
        assert_eq!(eval_string("(ceil 1.2)").unwrap(), Value::Double(2.0));
        assert_eq!(eval_string("(trunc -1.7)").unwrap(), Value::Double(-1.0));
        assert_eq!(eval_string("(round 7)").unwrap(), int(7));
        assert_eq!(eval_string("(int -3.9)").unwrap(), int(-3));
        assert_eq!(eval_string("(int 4)").unwrap(), int(4));
        assert_eq!(eval_string("(double 4)").unwrap(), Value::Double(4.0));
        assert!(is_bad_params(eval_string("(int 1e300)")));
        assert!(is_bad_params(eval_string("(int (/ 1.0 0))")));
        assert!(is_bad_params(eval_string(r#"(round "1")"#)));
    }

    #[test]
    fn test_names() {
        assert_eq!(eval_string(r#"(let (a 1) (name "a"))"#).unwrap(), int(1));
        assert!(is_bad_params(eval_string(r#"(name "nope")"#)));
        assert!(is_bad_params(eval_string("(name 1)")));
        assert_eq!(
            eval_string(r#"(has-name "nope")"#).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(eval_string(r#"(has-name "len")"#).unwrap(), Value::Boolean(true));
        assert_eq!(eval_string(r#"(name? "nope")"#).unwrap(), Value::Null);
    }

    #[test]
    fn test_apply() {
        assert_eq!(
            eval_string("(apply (fn (a b c) (* a b c)) [3, 4, 5])").unwrap(),
            int(60)
        );
        assert_eq!(eval_string("(apply + [])").unwrap(), int(0));
        assert!(is_bad_params(eval_string("(apply 1 [])")));
        assert!(is_bad_params(eval_string("(apply + 1)")));
    }

    #[test]
    fn test_map() {
        assert_eq!(
            eval_string("(map (fn [x] (* x x)) [1, 2, 3])").unwrap(),
            Value::Array(vec![int(1), int(4), int(9)])
        );
        assert_eq!(
            eval_string(r#"(map (fn [c] (if (eq c "a") "b" c)) "banana")"#).unwrap(),
            string("bbnbnb")
        );
        assert!(is_bad_params(eval_string(r#"(map (fn [c] "xy") "ab")"#)));
        assert!(is_bad_params(eval_string("(map 1 [1])")));
        assert!(is_bad_params(eval_string("(map (fn [x] x) 1)")));
    }

    #[test]
    fn test_filter() {
        assert_eq!(
            eval_string("(filter (fn [x] (> x 1)) [1, 2, 3])").unwrap(),
            Value::Array(vec![int(2), int(3)])
        );
        assert_eq!(
            eval_string(r#"(filter (fn [c] (not (eq c "a"))) "banana")"#).unwrap(),
            string("bnn")
        );
        assert!(is_bad_params(eval_string("(filter (fn [x] x) [1])")));
    }

    #[test]
    fn test_flatmap() {
        assert_eq!(
            eval_string("(flatmap (fn [x] [x, x]) [1, 2])").unwrap(),
            Value::Array(vec![int(1), int(1), int(2), int(2)])
        );
        assert_eq!(
            eval_string("(flatmap (fn [x] []) [1, 2])").unwrap(),
            Value::Array(vec![])
        );
        assert_eq!(
            eval_string(r#"(flatmap (fn [c] c) "ab")"#).unwrap(),
            string("ab")
        );
        assert!(is_bad_params(eval_string("(flatmap (fn [x] x) [1])")));
        assert!(is_bad_params(eval_string(r#"(flatmap (fn [c] "") "ab")"#)));
    }
}
