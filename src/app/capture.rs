use crate::app::context::{traverse, Variables};
use crate::app::error::{Error, Result};
use crate::app::resolver::{Resolver, Session};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use serde_json::Value;

pub const STATUS_CODE: &str = "status_code";
pub const HEADERS: &str = "headers";
pub const BODY: &str = "body";
pub const ELAPSED_MS: &str = "elapsed_ms";

const RESPONSE_FIELDS: [&str; 4] = [STATUS_CODE, HEADERS, BODY, ELAPSED_MS];

pub trait Convert<T> {
    fn convert(&self) -> T;
}

impl Convert<Value> for Vec<&Value> {
    fn convert(&self) -> Value {
        match self.as_slice() {
            [] => Value::Null,
            [single] => (*single).clone(),
            many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
        }
    }
}

impl Convert<Value> for HeaderMap<HeaderValue> {
    fn convert(&self) -> Value {
        let mut object = Variables::new();
        for name in self.keys() {
            let joined = self
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            object.insert(name.as_str().to_owned(), Value::String(joined));
        }
        Value::Object(object)
    }
}

impl Convert<Value> for Bytes {
    fn convert(&self) -> Value {
        if self.is_empty() {
            return Value::Null;
        }
        match serde_json::from_slice(self) {
            Ok(json) => json,
            Err(_) => Value::String(String::from_utf8_lossy(self).into_owned()),
        }
    }
}

/// Reads `status_code`, `elapsed_ms`, `headers.<name>` or `body.<path>`.
///
/// Returns `None` when `raw` does not name a response field.
pub fn response_field(response: &Variables, raw: &str) -> Option<Result<Value>> {
    let mut parts = raw.split('.');
    let root = parts.next()?;
    if !RESPONSE_FIELDS.contains(&root) {
        return None;
    }
    let value = match response.get(root) {
        Some(value) => value,
        None => return Some(Err(Error::path(raw, "field missing from response"))),
    };
    let segments: Vec<String> = parts
        .enumerate()
        .map(|(i, segment)| {
            if root == HEADERS && i == 0 {
                segment.to_ascii_lowercase()
            } else {
                segment.to_owned()
            }
        })
        .collect();
    Some(traverse(value, root, &segments).map(Clone::clone))
}

pub(crate) trait Capturable {
    fn capture(&self, resolver: &Resolver, session: &mut Session) -> Result<Value>;
}

impl Capturable for Value {
    fn capture(&self, resolver: &Resolver, session: &mut Session) -> Result<Value> {
        if let (Value::String(raw), Some(response)) = (self, &session.response) {
            if !raw.contains('$') {
                if let Some(found) = response_field(response, raw) {
                    return found;
                }
            }
        }
        resolver.resolve(session, self)
    }
}

/// Evaluates a step's `extract` section into new variables.
pub fn extract(
    resolver: &Resolver,
    session: &mut Session,
    captures: &Variables,
) -> Result<Variables> {
    let mut exported = Variables::new();
    for (name, raw) in captures {
        let value = raw.capture(resolver, session)?;
        debug!("Captured '{}' = {}", name, value);
        session.context.set(name.clone(), value.clone());
        exported.insert(name.clone(), value);
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::Context;
    use crate::app::registry::FunctionRegistry;
    use crate::database::DatabaseManager;
    use http::header::{CONTENT_TYPE, SET_COOKIE};
    use serde_json::json;

    fn response() -> Variables {
        json!({
            "status_code": 201,
            "headers": {"content-type": "application/json"},
            "body": {"data": {"id": 9, "items": [{"sku": "A1"}]}},
            "elapsed_ms": 12
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_convertation_of_bodies() {
        assert_eq!(Bytes::from_static(b"{\"a\": 1}").convert(), json!({"a": 1}));
        assert_eq!(Bytes::from_static(b"plain text").convert(), json!("plain text"));
        assert_eq!(Bytes::new().convert(), Value::Null);
    }

    #[test]
    fn test_convertation_of_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        assert_eq!(
            headers.convert(),
            json!({"content-type": "text/plain", "set-cookie": "a=1, b=2"})
        );
    }

    #[test]
    fn test_convertation_of_matches() {
        let (a, b) = (json!(1), json!(2));
        assert_eq!(Vec::<&Value>::new().convert(), Value::Null);
        assert_eq!(vec![&a].convert(), json!(1));
        assert_eq!(vec![&a, &b].convert(), json!([1, 2]));
    }

    #[test]
    fn test_response_fields() {
        let response = response();
        assert_eq!(response_field(&response, "status_code").unwrap().unwrap(), json!(201));
        assert_eq!(
            response_field(&response, "headers.Content-Type").unwrap().unwrap(),
            json!("application/json")
        );
        assert_eq!(
            response_field(&response, "body.data.items.0.sku").unwrap().unwrap(),
            json!("A1")
        );
        assert!(response_field(&response, "body.data.missing").unwrap().is_err());
        assert!(response_field(&response, "token").is_none());
    }

    #[test]
    fn test_extract_sets_step_variables() {
        let registry = FunctionRegistry::new();
        let env = Variables::new();
        let manager = DatabaseManager::disabled();
        let scope = manager.scope("test");
        let resolver = Resolver::new(&registry, &env, &scope);
        let mut context = Context::root();
        let mut session = Session::new(&mut context);
        session.response = Some(response());

        let captures = json!({"order_id": "$.data.id", "status": "status_code", "literal": "x"})
            .as_object()
            .cloned()
            .unwrap();
        let exported = extract(&resolver, &mut session, &captures).unwrap();
        assert_eq!(exported.get("order_id").unwrap(), &json!(9));
        assert_eq!(exported.get("status").unwrap(), &json!(201));
        assert_eq!(exported.get("literal").unwrap(), &json!("x"));
        assert_eq!(context.get("order_id").unwrap(), &json!(9));
    }
}
