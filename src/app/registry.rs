use crate::app::context::Variables;
use crate::app::error::{Error, HookError, Result};
use crate::database::{DatabaseProxy, DatabaseScope};
use derivative::*;
use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type HookResult = std::result::Result<Value, HookError>;

type Body = dyn Fn(Call<'_>) -> HookResult + Send + Sync;

/// Context objects a function may receive by naming a parameter after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    Request,
    Response,
    Variables,
    Env,
}

impl Injection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "request" => Some(Injection::Request),
            "response" => Some(Injection::Response),
            "variables" => Some(Injection::Variables),
            "env" => Some(Injection::Env),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Injection::Request => "request",
            Injection::Response => "response",
            Injection::Variables => "variables",
            Injection::Env => "env",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    default: Option<Value>,
    injection: Option<Injection>,
}

impl Param {
    pub fn required<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        let injection = Injection::from_name(&name);
        Self {
            name,
            default: None,
            injection,
        }
    }

    pub fn optional<S: Into<String>, V: Into<Value>>(name: S, default: V) -> Self {
        Self {
            default: Some(default.into()),
            ..Self::required(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn injection(&self) -> Option<Injection> {
        self.injection
    }
}

#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Function {
    name: String,
    params: Vec<Param>,
    #[derivative(Debug = "ignore")]
    body: Arc<Body>,
}

impl Function {
    pub fn new<S, F>(name: S, params: Vec<Param>, body: F) -> Self
    where
        S: Into<String>,
        F: Fn(Call<'_>) -> HookResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn injects(&self, injection: Injection) -> bool {
        self.params.iter().any(|p| p.injection == Some(injection))
    }

    /// Binds positional and keyword values to the declared, non-injected
    /// parameters.
    pub fn bind(&self, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Variables> {
        let regular: Vec<&Param> = self
            .params
            .iter()
            .filter(|p| p.injection.is_none())
            .collect();
        if positional.len() > regular.len() {
            return Err(Error::arguments(
                &self.name,
                format!(
                    "takes {} positional argument(s) but {} were given",
                    regular.len(),
                    positional.len()
                ),
            ));
        }
        let mut bound = Variables::new();
        for (param, value) in regular.iter().zip(positional) {
            bound.insert(param.name.clone(), value);
        }
        for (name, value) in keywords {
            if !regular.iter().any(|p| p.name == name) {
                return Err(Error::arguments(
                    &self.name,
                    format!("unexpected keyword argument '{}'", name),
                ));
            }
            if bound.contains_key(&name) {
                return Err(Error::arguments(
                    &self.name,
                    format!("got multiple values for argument '{}'", name),
                ));
            }
            bound.insert(name, value);
        }
        for param in regular {
            if bound.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    bound.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(Error::arguments(
                        &self.name,
                        format!("missing required argument '{}'", param.name),
                    ))
                }
            }
        }
        Ok(bound)
    }

    pub fn invoke(&self, call: Call<'_>) -> HookResult {
        (self.body)(call)
    }
}

/// Everything a function sees while it runs.
///
/// The injected objects are only present when the function declared the
/// matching parameter. `request` is exclusively borrowed for the duration of
/// the call so hooks can edit the pending request in place.
pub struct Call<'c> {
    pub function: &'c str,
    pub args: Variables,
    pub request: Option<&'c mut Variables>,
    pub response: Option<&'c Variables>,
    pub variables: Option<Variables>,
    pub env: Option<&'c Variables>,
    pub(crate) databases: &'c DatabaseScope<'c>,
}

impl<'c> Call<'c> {
    pub fn arg(&self, name: &str) -> &Value {
        self.args.get(name).unwrap_or(&Value::Null)
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.arg(name).as_str()
    }

    /// The argument rendered as text, the way it would be interpolated.
    pub fn text(&self, name: &str) -> String {
        crate::app::resolver::stringify(self.arg(name))
    }

    pub fn request(&mut self) -> std::result::Result<&mut Variables, HookError> {
        let function = self.function;
        self.request
            .as_deref_mut()
            .ok_or_else(|| HookError::other(format!("'{}' needs a pending request", function)))
    }

    pub fn database(
        &self,
        name: &str,
        role: Option<&str>,
    ) -> std::result::Result<Rc<dyn DatabaseProxy>, HookError> {
        self.databases.get(name, role).map_err(HookError::from)
    }
}

/// A set of functions registered together.
pub trait HookModule {
    fn name(&self) -> &str;
    fn functions(&self) -> Vec<Function>;
}

/// Name to function map.
///
/// Populated before execution and then shared behind an `Arc`, which makes
/// it read-only for the rest of the run.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: Function) {
        if self.functions.contains_key(function.name()) {
            debug!("Function '{}' overridden", function.name());
        }
        self.functions.insert(function.name.clone(), function);
    }

    /// Registers every public function of a module; names starting with an
    /// underscore are private to the module.
    pub fn load(&mut self, module: &dyn HookModule) -> usize {
        let mut loaded = 0;
        for function in module.functions() {
            if function.name().starts_with('_') {
                trace!("Skipping private function '{}'", function.name());
                continue;
            }
            self.register(function);
            loaded += 1;
        }
        info!("Loaded {} functions from module '{}'", loaded, module.name());
        loaded
    }

    pub fn resolve(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
