use crate::app::capture::{Convert, BODY, ELAPSED_MS, HEADERS, STATUS_CODE};
use crate::app::context::Variables;
use crate::app::error::{Error, Result};
use crate::app::resolver::{stringify, Resolver, Session};
use crate::configuration::manifest::RequestSpec;
use crate::connection::{HttpResult, Outgoing, SendMessage};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Request as HttpRequest};
use reqwest::Url;
use serde_json::Value;
use std::str::FromStr;
use std::time::{Duration, Instant};

const METHOD: &str = "method";
const URL: &str = "url";
const PARAMS: &str = "params";
const JSON: &str = "json";

/// Location of a request field whose rendering waits for the setup hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct Deferred {
    key: String,
    pointer: String,
}

/// Builds the unrendered request mapping hooks get to see as `request`.
pub fn request_template(spec: &RequestSpec, base_url: Option<&str>) -> Result<Variables> {
    let url = match (&spec.url, &spec.path, base_url) {
        (Some(url), _, _) => url.clone(),
        (None, Some(path), Some(base)) => join_url(base, path),
        (None, Some(path), None) => path.clone(),
        (None, None, _) => return Err(Error::Request("request has no url".to_owned())),
    };
    let mut request = Variables::new();
    request.insert(METHOD.to_owned(), Value::String(spec.method.clone()));
    request.insert(URL.to_owned(), Value::String(url));
    request.insert(HEADERS.to_owned(), Value::Object(spec.headers.clone()));
    request.insert(PARAMS.to_owned(), Value::Object(spec.params.clone()));
    if let Some(json) = &spec.json {
        request.insert(JSON.to_owned(), json.clone());
    }
    if let Some(body) = &spec.body {
        request.insert(BODY.to_owned(), body.clone());
    }
    Ok(request)
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") || base.is_empty() {
        return path.to_owned();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Renders what can be rendered now.
///
/// Fields referencing variables that do not exist yet keep their raw form
/// and are returned, so they can be rendered once setup hooks have run.
pub fn render_partial(
    resolver: &Resolver,
    session: &mut Session,
    raw: &Variables,
) -> Result<(Variables, Vec<Deferred>)> {
    let mut rendered = Variables::new();
    let mut deferred = vec![];
    for (key, value) in raw {
        let value = render_value(resolver, session, value, key, String::new(), &mut deferred)?;
        rendered.insert(key.clone(), value);
    }
    Ok((rendered, deferred))
}

fn render_value(
    resolver: &Resolver,
    session: &mut Session,
    raw: &Value,
    key: &str,
    pointer: String,
    deferred: &mut Vec<Deferred>,
) -> Result<Value> {
    match raw {
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let pointer = format!("{}/{}", pointer, index);
                rendered.push(render_value(resolver, session, item, key, pointer, deferred)?);
            }
            Ok(Value::Array(rendered))
        }
        Value::Object(object) => {
            let mut rendered = Variables::new();
            for (name, item) in object {
                let pointer = format!("{}/{}", pointer, escape(name));
                let value = render_value(resolver, session, item, key, pointer, deferred)?;
                rendered.insert(name.clone(), value);
            }
            Ok(Value::Object(rendered))
        }
        leaf => match resolver.resolve(session, leaf) {
            Err(Error::UndefinedVariable(name)) => {
                trace!("Deferring request field {}{} until '{}' is set", key, pointer, name);
                deferred.push(Deferred {
                    key: key.to_owned(),
                    pointer,
                });
                Ok(leaf.clone())
            }
            other => other,
        },
    }
}

fn escape(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}

/// Renders the fields left over by [`render_partial`] inside `session.request`.
pub fn render_deferred(
    resolver: &Resolver,
    session: &mut Session,
    deferred: &[Deferred],
) -> Result<()> {
    for field in deferred {
        let raw = session
            .request
            .as_ref()
            .and_then(|request| request.get(&field.key))
            .and_then(|value| value.pointer(&field.pointer))
            .cloned();
        let raw = match raw {
            Some(raw) => raw,
            // removed or replaced by a hook
            None => continue,
        };
        let value = resolver.resolve(session, &raw)?;
        if let Some(slot) = session
            .request
            .as_mut()
            .and_then(|request| request.get_mut(&field.key))
            .and_then(|value| value.pointer_mut(&field.pointer))
        {
            *slot = value;
        }
    }
    Ok(())
}

/// Turns a rendered request mapping into an HTTP request.
pub fn to_http(request: &Variables) -> Result<HttpRequest<Vec<u8>>> {
    let method = request
        .get(METHOD)
        .map(stringify)
        .unwrap_or_else(|| "GET".to_owned());
    let method = Method::from_str(&method.to_ascii_uppercase())
        .map_err(|err| Error::Request(format!("method '{}': {}", method, err)))?;

    let raw_url = request.get(URL).map(stringify).unwrap_or_default();
    let mut url = Url::parse(&raw_url)
        .map_err(|err| Error::Request(format!("url '{}': {}", raw_url, err)))?;
    if let Some(Value::Object(params)) = request.get(PARAMS) {
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                pairs.append_pair(name, &stringify(value));
            }
        }
    }

    let mut builder = HttpRequest::builder().method(method).uri(url.as_str());
    let mut has_content_type = false;
    if let Some(Value::Object(headers)) = request.get(HEADERS) {
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| Error::Request(format!("header '{}': {}", name, err)))?;
            let value = HeaderValue::from_str(&stringify(value))
                .map_err(|err| Error::Request(format!("header '{}': {}", name, err)))?;
            has_content_type |= name == CONTENT_TYPE;
            builder = builder.header(name, value);
        }
    }

    let body = match (request.get(JSON), request.get(BODY)) {
        (Some(json), _) if !json.is_null() => {
            if !has_content_type {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            serde_json::to_vec(json)?
        }
        (_, Some(Value::String(text))) => text.as_bytes().to_vec(),
        (_, Some(Value::Null)) | (_, None) => vec![],
        (_, Some(other)) => serde_json::to_vec(other)?,
    };
    builder
        .body(body)
        .map_err(|err| Error::Request(err.to_string()))
}

#[derive(Debug, Builder)]
pub struct ExecutionResponse {
    status: u16,
    headers: Value,
    body: Bytes,
    execution_time: Duration,
}

impl ExecutionResponse {
    pub fn builder() -> ExecutionResponseBuilder {
        ExecutionResponseBuilder::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// The `response` mapping: status code, headers, decoded body, elapsed time.
    pub fn into_variables(self) -> Variables {
        let mut response = Variables::new();
        response.insert(STATUS_CODE.to_owned(), Value::from(self.status));
        response.insert(HEADERS.to_owned(), self.headers);
        response.insert(BODY.to_owned(), self.body.convert());
        response.insert(
            ELAPSED_MS.to_owned(),
            Value::from(self.execution_time.as_millis() as u64),
        );
        response
    }
}

pub struct HttpJob<'a, T>
where
    T: SendMessage<Outgoing, HttpResult>,
{
    sender: &'a T,
}

impl<'a, T> HttpJob<'a, T>
where
    T: SendMessage<Outgoing, HttpResult>,
{
    pub fn new(sender: &'a T) -> Self {
        Self { sender }
    }

    pub fn execute(&self, request: &Variables, timeout: Option<Duration>) -> Result<ExecutionResponse> {
        let prepared = to_http(request)?;
        debug!("Sending {} {}", prepared.method(), prepared.uri());
        let now = Instant::now();
        let response = self.sender.send(Outgoing {
            request: prepared,
            timeout,
        });
        let elapsed = now.elapsed();
        match response {
            Ok(response) => {
                debug!(
                    "Received {} with {} byte(s) in {} ms",
                    response.status(),
                    response.body().len(),
                    elapsed.as_millis()
                );
                ExecutionResponse::builder()
                    .status(response.status().as_u16())
                    .headers(response.headers().convert())
                    .body(response.body().clone())
                    .execution_time(elapsed)
                    .build()
                    .map_err(Error::Unexpected)
            }
            Err(err) => {
                error!("Failed to send request: {}", err);
                Err(err)
            }
        }
    }
}
