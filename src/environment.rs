//! Namespaces and the evaluation context.
//!
//! Namespaces form a singly linked chain of reference-counted frames. Two kinds of change
//! exist and they must not be confused:
//!
//! - [`Context::wrap`] / [`Context::wrap_with`] create a new child frame. The parent is
//!   untouched, so closures holding the parent never see the new names. `let`, function
//!   parameters and the caller-visible half of `define` work this way.
//! - [`Context::set`] overrides a name inside the current frame in place. Every closure
//!   that captured a chain through that frame observes the change. Host injection and the
//!   self-reference half of `define` use this.
//!
//! A closure stored in the frame it captured (what `define` does for recursive functions)
//! keeps that frame alive through an `Rc` cycle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::EvalError;
use crate::ast::Symbol;
use crate::value::Value;

pub struct Namespace {
    names: RefCell<HashMap<Symbol, Value>>,
    wrapped: Option<Rc<Namespace>>,
}

impl Namespace {
    pub fn new(names: HashMap<Symbol, Value>, wrapped: Option<Rc<Namespace>>) -> Self {
        Namespace {
            names: RefCell::new(names),
            wrapped,
        }
    }

    /// Walk outward from this frame.
    pub fn lookup(&self, symbol: &Symbol) -> Option<Value> {
        let mut current = Some(self);
        while let Some(namespace) = current {
            if let Some(value) = namespace.names.borrow().get(symbol) {
                return Some(value.clone());
            }
            current = namespace.wrapped.as_deref();
        }
        None
    }

    /// Insert or replace a name in this frame only.
    pub fn override_name(&self, symbol: Symbol, value: Value) {
        self.names.borrow_mut().insert(symbol, value);
    }

    pub fn wrapped(&self) -> Option<&Rc<Namespace>> {
        self.wrapped.as_ref()
    }

    /// Names bound in this frame, sorted.
    pub fn local_names(&self) -> Vec<Symbol> {
        let mut names: Vec<Symbol> = self.names.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of frames from this one to the root, inclusive.
    pub fn chain_len(&self) -> usize {
        std::iter::successors(Some(self), |ns| ns.wrapped.as_deref()).count()
    }
}

impl fmt::Debug for Namespace {
    // Values may reference this very frame, so only names are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("names", &self.local_names())
            .field("chain_len", &self.chain_len())
            .finish()
    }
}

/// Nesting counter shared by every context derived from one evaluator.
#[derive(Debug)]
struct CallDepth {
    current: Cell<usize>,
    limit: Option<usize>,
}

/// Decrements the call depth when dropped.
#[must_use]
pub struct CallGuard {
    depth: Rc<CallDepth>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.depth.current.set(self.depth.current.get().saturating_sub(1));
    }
}

/// The evaluation cursor: the active frame plus the shared depth counter. Cloning is
/// cheap and shares both.
#[derive(Debug, Clone)]
pub struct Context {
    namespace: Rc<Namespace>,
    depth: Rc<CallDepth>,
}

impl Context {
    /// An empty root context. `max_call_depth` of `None` disables the depth check.
    pub fn new(max_call_depth: Option<usize>) -> Self {
        Context {
            namespace: Rc::new(Namespace::new(HashMap::new(), None)),
            depth: Rc::new(CallDepth {
                current: Cell::new(0),
                limit: max_call_depth,
            }),
        }
    }

    pub fn namespace(&self) -> &Rc<Namespace> {
        &self.namespace
    }

    pub fn wrap(&self) -> Context {
        self.wrap_with(HashMap::new())
    }

    pub fn wrap_with(&self, names: HashMap<Symbol, Value>) -> Context {
        Context {
            namespace: Rc::new(Namespace::new(names, Some(Rc::clone(&self.namespace)))),
            depth: Rc::clone(&self.depth),
        }
    }

    /// Override `symbol` in the current frame, in place.
    pub fn set(&self, symbol: impl Into<Symbol>, value: Value) {
        self.namespace.override_name(symbol.into(), value);
    }

    pub fn lookup(&self, symbol: &Symbol) -> Result<Value, EvalError> {
        self.namespace
            .lookup(symbol)
            .ok_or_else(|| EvalError::MissingValue(symbol.clone()))
    }

    pub fn try_lookup(&self, symbol: &Symbol) -> Option<Value> {
        self.namespace.lookup(symbol)
    }

    /// True when both contexts point at the same frame.
    pub fn same_frame(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.namespace, &other.namespace)
    }

    /// Account for one more nested call; the returned guard releases it.
    pub fn enter_call(&self) -> Result<CallGuard, EvalError> {
        let next = self.depth.current.get() + 1;
        if let Some(limit) = self.depth.limit {
            if next > limit {
                return Err(EvalError::RecursionLimit(limit));
            }
        }
        self.depth.current.set(next);
        Ok(CallGuard {
            depth: Rc::clone(&self.depth),
        })
    }

    pub fn call_depth(&self) -> usize {
        self.depth.current.get()
    }
}
