//! Method registry: the read-only-after-startup table of callable methods
//!
//! Every entry implements [`Method`], a uniform "ordered JSON arguments in,
//! JSON value out" interface. Arity is declared up front so the dispatcher can
//! reject a wrong argument count before the method body runs.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::{DispatchError, MethodError};

/// Number of positional arguments a method accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn accepts(self, given: usize) -> bool {
        match self {
            Self::Exact(expected) => given == expected,
            Self::AtLeast(minimum) => given >= minimum,
            Self::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(expected) => write!(f, "exactly {expected} argument(s)"),
            Self::AtLeast(minimum) => write!(f, "at least {minimum} argument(s)"),
            Self::Any => f.write_str("any number of arguments"),
        }
    }
}

pub trait Method: Send + Sync {
    fn arity(&self) -> Arity;

    /// Runs the method. `params` has already been checked against [`Method::arity`].
    fn call(&self, params: &[Value]) -> Result<Value, MethodError>;
}

/// Adapts a closure into a [`Method`].
pub struct FnMethod<F> {
    arity: Arity,
    handler: F,
}

impl<F> Method for FnMethod<F>
where
    F: Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync,
{
    fn arity(&self) -> Arity {
        self.arity
    }

    fn call(&self, params: &[Value]) -> Result<Value, MethodError> {
        (self.handler)(params)
    }
}

pub fn method_fn<F>(arity: Arity, handler: F) -> Arc<dyn Method>
where
    F: Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync + 'static,
{
    Arc::new(FnMethod { arity, handler })
}

/// Deserializes positional argument `index` into `T`.
pub fn arg<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, MethodError> {
    let value = params
        .get(index)
        .ok_or_else(|| MethodError::invalid_argument(index, "missing"))?;
    T::deserialize(value).map_err(|err| MethodError::invalid_argument(index, err.to_string()))
}

#[derive(Clone, Default)]
pub struct Registry {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the binding for `name`. Returns the replaced method.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        method: Arc<dyn Method>,
    ) -> Option<Arc<dyn Method>> {
        let name = name.into();
        let replaced = self.methods.insert(name.clone(), method);
        if replaced.is_some() {
            debug!(method = %name, "method registration replaced");
        }
        replaced
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, arity: Arity, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        self.register(name, method_fn(arity, handler));
    }

    /// Registers every `(name, method)` pair whose name starts with `prefix`.
    /// Returns how many were registered.
    pub fn register_matching<I>(&mut self, functions: I, prefix: &str) -> usize
    where
        I: IntoIterator<Item = (&'static str, Arc<dyn Method>)>,
    {
        let mut registered = 0;
        for (name, method) in functions {
            if name.starts_with(prefix) {
                self.register(name, method);
                registered += 1;
            }
        }
        registered
    }

    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn Method>, DispatchError> {
        self.methods
            .get(name)
            .ok_or_else(|| DispatchError::method_not_found(name))
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("methods", &self.names())
            .finish()
    }
}
