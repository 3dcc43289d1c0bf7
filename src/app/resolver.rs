use crate::app::capture::Convert;
use crate::app::context::{traverse, Context, Variables};
use crate::app::error::{Error, Result};
use crate::app::expression::{Argument, Expr, Template, VarPath};
use crate::app::registry::{Call, FunctionRegistry, Injection};
use crate::database::DatabaseScope;
use jsonpath::Selector;
use serde_json::Value;

/// Live objects of the level currently executing.
pub struct Session<'c> {
    pub context: &'c mut Context,
    pub request: Option<Variables>,
    pub response: Option<Variables>,
}

impl<'c> Session<'c> {
    pub fn new(context: &'c mut Context) -> Self {
        Self {
            context,
            request: None,
            response: None,
        }
    }
}

/// Resolves `$name` / `${expr}` against a session.
pub struct Resolver<'a> {
    registry: &'a FunctionRegistry,
    env: &'a Variables,
    databases: &'a DatabaseScope<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        registry: &'a FunctionRegistry,
        env: &'a Variables,
        databases: &'a DatabaseScope<'a>,
    ) -> Self {
        Self {
            registry,
            env,
            databases,
        }
    }

    /// Resolves every string leaf of `raw`.
    pub fn resolve(&self, session: &mut Session, raw: &Value) -> Result<Value> {
        match raw {
            Value::String(text) => self.resolve_str(session, text),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(session, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(object) => {
                let mut resolved = Variables::new();
                for (key, value) in object {
                    resolved.insert(key.clone(), self.resolve(session, value)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    pub fn resolve_str(&self, session: &mut Session, raw: &str) -> Result<Value> {
        if !raw.contains('$') {
            return Ok(Value::String(raw.to_owned()));
        }
        let template = Template::parse(raw)?;
        self.render(session, &template)
    }

    /// A lone expression keeps its native type, anything else interpolates.
    pub fn render(&self, session: &mut Session, template: &Template) -> Result<Value> {
        if let Some(expr) = template.single() {
            return self.evaluate(session, expr);
        }
        let mut rendered = String::new();
        for part in template.parts() {
            match part {
                crate::app::expression::Part::Text(text) => rendered.push_str(text),
                crate::app::expression::Part::Expr(expr) => {
                    rendered.push_str(&stringify(&self.evaluate(session, expr)?))
                }
            }
        }
        Ok(Value::String(rendered))
    }

    pub fn evaluate(&self, session: &mut Session, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Text(template) => match self.render(session, template)? {
                Value::String(text) => Ok(Value::String(text)),
                other => Ok(Value::String(stringify(&other))),
            },
            Expr::Variable(path) => self.variable(session, path),
            Expr::JsonPath(path) => self.json_path(session, path),
            Expr::Call { name, args } => self.call(session, name, args),
            Expr::Add(left, right) => {
                let left = self.evaluate(session, left)?;
                let right = self.evaluate(session, right)?;
                Ok(add(&left, &right))
            }
        }
    }

    fn variable(&self, session: &Session, path: &VarPath) -> Result<Value> {
        let segments = &path.segments;
        match (path.root.as_str(), &session.request, &session.response) {
            ("request", Some(request), _) => in_map(request, "request", segments),
            ("response", _, Some(response)) => in_map(response, "response", segments),
            ("env", _, _) => in_map(self.env, "env", segments),
            ("variables", _, _) => match segments.split_first() {
                Some((name, rest)) => session.context.lookup(name, rest).map(Clone::clone),
                None => Ok(Value::Object(session.context.flatten())),
            },
            (root, _, _) => session.context.lookup(root, segments).map(Clone::clone),
        }
    }

    fn json_path(&self, session: &Session, path: &str) -> Result<Value> {
        let body = session
            .response
            .as_ref()
            .and_then(|response| response.get("body"))
            .ok_or_else(|| Error::path(path, "no response available"))?;
        let selector =
            Selector::new(path).map_err(|err| Error::syntax(path, format!("{:?}", err)))?;
        let found: Vec<&Value> = selector.find(body).collect();
        if found.is_empty() {
            return Err(Error::path(path, "no match in response body"));
        }
        Ok(found.convert())
    }

    fn call(&self, session: &mut Session, name: &str, args: &[Argument]) -> Result<Value> {
        let function = self
            .registry
            .resolve(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_owned()))?;

        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            if arg.name.is_none() && absorbed(function, &arg.value) {
                continue;
            }
            let value = self.evaluate(session, &arg.value)?;
            match &arg.name {
                Some(keyword) => keywords.push((keyword.clone(), value)),
                None => positional.push(value),
            }
        }
        let bound = function.bind(positional, keywords)?;
        trace!("Calling {}({:?})", name, bound);

        let call = Call {
            function: function.name(),
            args: bound,
            request: if function.injects(Injection::Request) {
                session.request.as_mut()
            } else {
                None
            },
            response: if function.injects(Injection::Response) {
                session.response.as_ref()
            } else {
                None
            },
            variables: if function.injects(Injection::Variables) {
                Some(session.context.flatten())
            } else {
                None
            },
            env: if function.injects(Injection::Env) {
                Some(self.env)
            } else {
                None
            },
            databases: self.databases,
        };
        function.invoke(call).map_err(|source| Error::Resolution {
            function: name.to_owned(),
            source,
        })
    }
}

/// `$request` passed to a function that injects `request` anyway.
fn absorbed(function: &crate::app::registry::Function, value: &Expr) -> bool {
    match value {
        Expr::Variable(path) => Injection::from_name(&path.root)
            .map(|injection| path.is_bare(injection.name()) && function.injects(injection))
            .unwrap_or(false),
        _ => false,
    }
}

fn in_map(map: &Variables, label: &str, segments: &[String]) -> Result<Value> {
    match segments.split_first() {
        None => Ok(Value::Object(map.clone())),
        Some((first, rest)) => {
            let value = map
                .get(first)
                .ok_or_else(|| Error::path(format!("{}.{}", label, first), "missing key"))?;
            traverse(value, &format!("{}.{}", label, first), rest).map(Clone::clone)
        }
    }
}

fn add(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l
                .checked_add(r)
                .map(Value::from)
                .unwrap_or_else(|| Value::from(l as f64 + r as f64)),
            _ => Value::from(l.as_f64().unwrap_or_default() + r.as_f64().unwrap_or_default()),
        },
        _ => Value::String(format!("{}{}", stringify(left), stringify(right))),
    }
}

/// Text form of a value when interpolated into a string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::context::Level;
    use crate::app::error::HookError;
    use crate::app::registry::{Function, Param};
    use crate::database::DatabaseManager;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register(Function::new(
            "hash",
            vec![Param::required("text")],
            |call| Ok(json!(format!("{:x}", md5::compute(call.text("text"))))),
        ));
        registry.register(Function::new(
            "sum",
            vec![Param::required("a"), Param::optional("b", 10)],
            |call| {
                let a = call.arg("a").as_i64().unwrap_or_default();
                let b = call.arg("b").as_i64().unwrap_or_default();
                Ok(json!(a + b))
            },
        ));
        registry.register(Function::new(
            "stamp",
            vec![Param::required("request"), Param::optional("env", Value::Null)],
            |mut call| {
                let secret = call
                    .env
                    .and_then(|env| env.get("SECRET"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let request = call.request()?;
                request.insert("signed".to_owned(), secret);
                Ok(json!({"stamped": true}))
            },
        ));
        registry.register(Function::new(
            "user_id",
            vec![Param::required("variables")],
            |call| {
                Ok(call
                    .variables
                    .as_ref()
                    .and_then(|v| v.get("user_id"))
                    .cloned()
                    .unwrap_or(Value::Null))
            },
        ));
        registry.register(Function::new("fail", vec![], |_| {
            Err(HookError::assertion("nope"))
        }));
        registry
    }

    fn env() -> Variables {
        json!({"SECRET": "s3"}).as_object().cloned().unwrap()
    }

    fn context() -> Context {
        let suite = json!({"a": {"b": {"c": 5}}, "user_id": 7, "name": "bob"});
        let mut context = Context::new(Arc::new(suite.as_object().cloned().unwrap()));
        context.push(Level::Case);
        context
    }

    #[test]
    fn test_single_expression_keeps_type() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        assert_eq!(resolver.resolve_str(&mut session, "$a.b.c").unwrap(), json!(5));
        assert_eq!(resolver.resolve_str(&mut session, "${sum(1)}").unwrap(), json!(11));
        assert_eq!(
            resolver.resolve_str(&mut session, "${sum($user_id, b=1)}").unwrap(),
            json!(8)
        );
    }

    #[test]
    fn test_interpolation_produces_string() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        assert_eq!(
            resolver.resolve_str(&mut session, "user $name has id ${user_id}").unwrap(),
            json!("user bob has id 7")
        );
        assert_eq!(
            resolver.resolve_str(&mut session, "${'id-' + $user_id}").unwrap(),
            json!("id-7")
        );
        assert_eq!(resolver.resolve_str(&mut session, "${1 + 2}").unwrap(), json!(3));
    }

    #[test]
    fn test_path_errors() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        context.set("a", json!({"b": {}}));
        let mut session = Session::new(&mut context);

        assert!(matches!(
            resolver.resolve_str(&mut session, "$a.b.c"),
            Err(Error::PathResolution { .. })
        ));
        assert!(matches!(
            resolver.resolve_str(&mut session, "$missing"),
            Err(Error::UndefinedVariable(_))
        ));
    }

    #[test]
    fn test_unknown_function() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        assert!(matches!(
            resolver.resolve_str(&mut session, "${nope()}"),
            Err(Error::UnknownFunction(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_function_errors_are_wrapped() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        let err = resolver.resolve_str(&mut session, "${fail()}").unwrap_err();
        assert!(err.is_failure());
        assert!(matches!(err, Error::Resolution { ref function, .. } if function == "fail"));
    }

    #[test]
    fn test_deterministic_function_is_idempotent() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        let first = resolver.resolve_str(&mut session, "${hash('abc')}").unwrap();
        let second = resolver.resolve_str(&mut session, "${hash('abc')}").unwrap();
        assert_eq!(first, json!("900150983cd24fb0d6963f7d28e17f72"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_request_is_injected_and_mutable() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);
        session.request = Some(json!({"method": "GET"}).as_object().cloned().unwrap());

        let result = resolver.resolve_str(&mut session, "${stamp($request)}").unwrap();
        assert_eq!(result, json!({"stamped": true}));
        let request = session.request.as_ref().unwrap();
        assert_eq!(request.get("signed").unwrap(), &json!("s3"));
        assert_eq!(
            resolver.resolve_str(&mut session, "$request.method").unwrap(),
            json!("GET")
        );
    }

    #[test]
    fn test_variables_injection_and_path() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        assert_eq!(resolver.resolve_str(&mut session, "${user_id()}").unwrap(), json!(7));
        assert_eq!(
            resolver.resolve_str(&mut session, "$variables.user_id").unwrap(),
            json!(7)
        );
        assert_eq!(resolver.resolve_str(&mut session, "$env.SECRET").unwrap(), json!("s3"));
    }

    #[test]
    fn test_json_path_against_response_body() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);
        session.response = Some(
            json!({"status_code": 200, "body": {"data": {"total": 12, "tags": ["a", "b"]}}})
                .as_object()
                .cloned()
                .unwrap(),
        );

        assert_eq!(resolver.resolve_str(&mut session, "$.data.total").unwrap(), json!(12));
        assert_eq!(
            resolver.resolve_str(&mut session, "$.data.tags").unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            resolver.resolve_str(&mut session, "$.data.tags[1]").unwrap(),
            json!("b")
        );
        assert!(resolver.resolve_str(&mut session, "$.data.none").is_err());
    }

    #[test]
    fn test_nested_arguments_resolve_depth_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = registry();
        registry.register(Function::new("count", vec![], move |_| {
            Ok(json!(counter.fetch_add(1, Ordering::SeqCst) + 1))
        }));
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        assert_eq!(
            resolver
                .resolve_str(&mut session, "${sum(${count()}, count())}")
                .unwrap(),
            json!(3)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_structures_resolve_leaf_by_leaf() {
        let registry = registry();
        let env = env();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = context();
        let mut session = Session::new(&mut context);

        let raw = json!({"user": "$user_id", "tags": ["$name", 1, null], "plain": "x"});
        assert_eq!(
            resolver.resolve(&mut session, &raw).unwrap(),
            json!({"user": 7, "tags": ["bob", 1, null], "plain": "x"})
        );
    }
}
