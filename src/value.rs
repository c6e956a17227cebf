//! Runtime and output values.
//!
//! [`Value`] is what the evaluator passes around. It may hold callables and host data that
//! is converted lazily. [`OutputValue`] is the callable-free tree handed back to the host.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::EvalError;
use crate::ast::Expression;
use crate::builtinops::Arity;
use crate::environment::Context;
use crate::json;

pub type EvalResult = Result<Value, EvalError>;

/// Receives unevaluated parameters and the caller's context.
pub type SpecialFormFn = fn(&[Expression], &mut Context) -> EvalResult;

/// Host-supplied function over fully converted arguments.
pub type NativeFn = Rc<dyn Fn(&[OutputValue]) -> Result<serde_json::Value, String>>;

#[derive(Clone, Copy)]
pub enum UnaryFn {
    Pure(fn(Value) -> EvalResult),
    Contextual(fn(Value, &mut Context) -> EvalResult),
}

#[derive(Clone, Copy)]
pub enum BinaryFn {
    Pure(fn(Value, Value) -> EvalResult),
    Contextual(fn(Value, Value, &mut Context) -> EvalResult),
}

#[derive(Clone)]
pub enum VariadicFn {
    Pure(Rc<dyn Fn(Vec<Value>) -> EvalResult>),
    Contextual(Rc<dyn Fn(Vec<Value>, &mut Context) -> EvalResult>),
}

/// Everything that can appear in call position, one variant per calling convention.
#[derive(Clone)]
pub enum Callable {
    SpecialForm {
        name: &'static str,
        arity: Arity,
        func: SpecialFormFn,
    },
    Function1 {
        name: &'static str,
        func: UnaryFn,
    },
    Function2 {
        name: &'static str,
        func: BinaryFn,
    },
    Variadic {
        name: String,
        arity: Arity,
        func: VariadicFn,
    },
    Native {
        name: String,
        func: NativeFn,
    },
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::SpecialForm { name, .. }
            | Callable::Function1 { name, .. }
            | Callable::Function2 { name, .. } => *name,
            Callable::Variadic { name, .. } | Callable::Native { name, .. } => name.as_str(),
        }
    }

    pub fn is_special_form(&self) -> bool {
        matches!(self, Callable::SpecialForm { .. })
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Callable::SpecialForm { .. } => "SpecialForm",
            Callable::Function1 { .. } => "Function1",
            Callable::Function2 { .. } => "Function2",
            Callable::Variadic { .. } => "Variadic",
            Callable::Native { .. } => "Native",
        };
        write!(f, "{}({})", kind, self.name())
    }
}

impl PartialEq for Callable {
    // Builtins are identified by name; closures and host functions by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callable::SpecialForm { name: a, .. }, Callable::SpecialForm { name: b, .. })
            | (Callable::Function1 { name: a, .. }, Callable::Function1 { name: b, .. })
            | (Callable::Function2 { name: a, .. }, Callable::Function2 { name: b, .. }) => a == b,
            (
                Callable::Variadic { func: VariadicFn::Pure(a), .. },
                Callable::Variadic { func: VariadicFn::Pure(b), .. },
            ) => Rc::ptr_eq(a, b),
            (
                Callable::Variadic { func: VariadicFn::Contextual(a), .. },
                Callable::Variadic { func: VariadicFn::Contextual(b), .. },
            ) => Rc::ptr_eq(a, b),
            (Callable::Native { func: a, .. }, Callable::Native { func: b, .. }) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An element of a host collection: raw JSON from the host, or a value produced by the
/// evaluator (`merge` and `dict` build host maps out of runtime values).
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Json(serde_json::Value),
    Runtime(Value),
}

impl HostValue {
    /// Convert one level; nested JSON collections stay bridged.
    pub fn to_value(&self) -> EvalResult {
        match self {
            HostValue::Json(json) => json::value_from_json(json),
            HostValue::Runtime(value) => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub value: Value,
}

impl Member {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Member {
            name: name.into(),
            value,
        }
    }
}

/// Runtime values. `PartialEq` here is Rust-level identity of representation (an integer
/// never equals a double, member order matters); the language's `eq` lives in
/// `builtinops`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Callable(Callable),
    String(String),
    Integer(i64),
    Double(f64),
    Array(Vec<Value>),
    Object(Vec<Member>),
    Boolean(bool),
    Null,
    HostArray(Rc<Vec<HostValue>>),
    /// Host maps iterate in key order
    HostMap(Rc<BTreeMap<String, HostValue>>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Callable(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view with integer-to-double widening.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Callable(_) => "function",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Array(_) | Value::HostArray(_) => "array",
            Value::Object(_) | Value::HostMap(_) => "object",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
        }
    }

    /// Elements of an array or host array, `None` for anything else.
    pub fn any_array(&self) -> Result<Option<Vec<Value>>, EvalError> {
        match self {
            Value::Array(elements) => Ok(Some(elements.clone())),
            Value::HostArray(elements) => elements
                .iter()
                .map(HostValue::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Members of an object or host map, `None` for anything else.
    pub fn any_members(&self) -> Result<Option<Vec<Member>>, EvalError> {
        match self {
            Value::Object(members) => Ok(Some(members.clone())),
            Value::HostMap(map) => map
                .iter()
                .map(|(name, value)| Ok(Member::new(name.clone(), value.to_value()?)))
                .collect::<Result<Vec<_>, EvalError>>()
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Replace a top-level host collection by its plain counterpart.
    pub fn materialized(&self) -> EvalResult {
        if let Some(elements) = self.any_array()? {
            return Ok(Value::Array(elements));
        }
        if let Some(members) = self.any_members()? {
            return Ok(Value::Object(members));
        }
        Ok(self.clone())
    }

    /// Lower to an output value, failing if a callable remains anywhere in the tree.
    pub fn require_output(&self) -> Result<OutputValue, EvalError> {
        match self {
            Value::Callable(_) => Err(EvalError::UncalledFunction),
            Value::String(s) => Ok(OutputValue::String(s.clone())),
            Value::Integer(i) => Ok(OutputValue::Number(*i as f64)),
            Value::Double(d) => Ok(OutputValue::Number(*d)),
            Value::Boolean(b) => Ok(OutputValue::Boolean(*b)),
            Value::Null => Ok(OutputValue::Null),
            Value::Array(elements) => elements
                .iter()
                .map(Value::require_output)
                .collect::<Result<Vec<_>, _>>()
                .map(OutputValue::Array),
            Value::Object(members) => members
                .iter()
                .map(|m| {
                    Ok(OutputMember {
                        name: m.name.clone(),
                        value: m.value.require_output()?,
                    })
                })
                .collect::<Result<Vec<_>, EvalError>>()
                .map(OutputValue::Object),
            Value::HostArray(_) | Value::HostMap(_) => self.materialized()?.require_output(),
        }
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Callable(callable)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Callable(c) => write!(f, "#<function:{}>", c.name()),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, "]")
            }
            Value::Object(members) => {
                write!(f, "{{")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", member.name, member.value)?;
                }
                write!(f, "}}")
            }
            Value::HostArray(elements) => write!(f, "#<host-array:{}>", elements.len()),
            Value::HostMap(map) => write!(f, "#<host-map:{}>", map.len()),
        }
    }
}

/// A list of numeric operands after promotion: all integers, or all doubles as soon as
/// one operand is a double.
#[derive(Debug, Clone, PartialEq)]
pub enum Numbers {
    Integers(Vec<i64>),
    Doubles(Vec<f64>),
}

impl Numbers {
    pub fn from_values(function: &str, values: &[Value]) -> Result<Numbers, EvalError> {
        let mut integers = Vec::with_capacity(values.len());
        let mut any_double = false;
        for value in values {
            match value {
                Value::Integer(i) => integers.push(*i),
                Value::Double(_) => any_double = true,
                _ => {
                    return Err(EvalError::bad_function_parameters(
                        format!("{} requires number parameters, got {}", function, value.type_name()),
                        values,
                    ));
                }
            }
        }
        if any_double {
            Ok(Numbers::Doubles(values.iter().filter_map(Value::as_f64).collect()))
        } else {
            Ok(Numbers::Integers(integers))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputMember {
    pub name: String,
    pub value: OutputValue,
}

/// The final, callable-free result of an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    String(String),
    Number(f64),
    Array(Vec<OutputValue>),
    Object(Vec<OutputMember>),
    Boolean(bool),
    Null,
}

impl OutputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OutputValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OutputValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[OutputValue]> {
        match self {
            OutputValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[OutputMember]> {
        match self {
            OutputValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OutputValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OutputValue::Null)
    }

    /// Look up an object member by name; the first match wins.
    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.as_object()?
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.value)
    }
}
