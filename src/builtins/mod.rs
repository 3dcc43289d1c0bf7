//! Functions available to every suite without registering anything.
//!
//! Template helpers produce data inside `${...}`, lifecycle hooks are meant
//! for `setup_hooks` / `teardown_hooks`, and [`sql`] holds the helpers that
//! talk to the configured databases.

pub mod sql;

use crate::app::error::HookError;
use crate::app::registry::{Call, Function, HookModule, HookResult, Param};
use crate::app::resolver::stringify;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SECRET: &str = "default-secret-key";
pub const SECRET_VARIABLE: &str = "APP_SECRET";

#[derive(Debug, Default)]
pub struct Builtins;

impl HookModule for Builtins {
    fn name(&self) -> &str {
        "builtins"
    }

    fn functions(&self) -> Vec<Function> {
        let mut functions = vec![
            Function::new("ts", vec![], ts),
            Function::new("uid", vec![], uid),
            Function::new("short_uid", vec![Param::optional("length", 8)], short_uid),
            Function::new("md5", vec![Param::required("text")], md5_hex),
            Function::new("sha256", vec![Param::required("text")], sha256_hex),
            Function::new("base64", vec![Param::required("text")], base64_text),
            Function::new(
                "setup_hook_sign_request",
                vec![Param::required("request"), Param::required("env")],
                sign_request,
            ),
            Function::new(
                "teardown_hook_log_response",
                vec![Param::required("response")],
                log_response,
            ),
            Function::new(
                "teardown_hook_validate_status",
                vec![Param::required("response")],
                validate_status,
            ),
            Function::new(
                "teardown_hook_record_test_stats",
                vec![Param::required("response")],
                record_stats,
            ),
            Function::new("suite_setup", vec![], |_| {
                info!("Suite setup: preparing test environment");
                Ok(json!({}))
            }),
            Function::new("suite_teardown", vec![], |_| {
                info!("Suite teardown: cleaning up test environment");
                Ok(Value::Null)
            }),
            Function::new("case_setup", vec![], |_| {
                info!("Case setup: preparing case data");
                Ok(json!({}))
            }),
            Function::new("case_teardown", vec![], |_| {
                info!("Case teardown: cleaning up case data");
                Ok(Value::Null)
            }),
        ];
        functions.extend(sql::functions());
        functions
    }
}

fn ts(_: Call) -> HookResult {
    Ok(Value::from(chrono::Utc::now().timestamp()))
}

fn uid(_: Call) -> HookResult {
    Ok(Value::String(uuid::Uuid::new_v4().to_string()))
}

fn short_uid(call: Call) -> HookResult {
    let length = call
        .arg("length")
        .as_u64()
        .ok_or_else(|| HookError::other("length must be a non-negative integer"))?;
    let simple = uuid::Uuid::new_v4().to_simple().to_string();
    Ok(Value::String(simple.chars().take(length as usize).collect()))
}

fn md5_hex(call: Call) -> HookResult {
    Ok(Value::String(format!("{:x}", md5::compute(call.text("text")))))
}

fn sha256_hex(call: Call) -> HookResult {
    Ok(Value::String(format!(
        "{:x}",
        Sha256::digest(call.text("text").as_bytes())
    )))
}

fn base64_text(call: Call) -> HookResult {
    Ok(Value::String(base64::encode(call.text("text"))))
}

/// Signs `method|url|timestamp` with HMAC-SHA256 and adds the
/// `X-Timestamp` / `X-Signature` headers to the pending request.
fn sign_request(mut call: Call) -> HookResult {
    let secret = call
        .env
        .and_then(|env| env.get(SECRET_VARIABLE))
        .map(stringify)
        .unwrap_or_else(|| DEFAULT_SECRET.to_owned());
    let timestamp = chrono::Utc::now().timestamp().to_string();

    let request = call.request()?;
    let method = request
        .get("method")
        .map(stringify)
        .unwrap_or_else(|| "GET".to_owned());
    let url = request.get("url").map(stringify).unwrap_or_default();
    let signature = sign(&secret, &format!("{}|{}|{}", method, url, timestamp))?;

    match request.entry("headers").or_insert_with(|| json!({})) {
        Value::Object(headers) => {
            headers.insert("X-Timestamp".to_owned(), Value::String(timestamp.clone()));
            headers.insert("X-Signature".to_owned(), Value::String(signature.clone()));
        }
        other => {
            return Err(HookError::other(format!(
                "request headers must be a mapping, found {}",
                other
            )))
        }
    }
    debug!("Signed {} {}", method, url);
    Ok(json!({
        "last_signature": signature,
        "last_timestamp": timestamp,
    }))
}

pub fn sign(secret: &str, message: &str) -> Result<String, HookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| HookError::other(err.to_string()))?;
    mac.update(message.as_bytes());
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}

fn log_response(call: Call) -> HookResult {
    match call.response {
        Some(response) => {
            let status = response.get("status_code").cloned().unwrap_or(Value::Null);
            let keys: Vec<&String> = match response.get("body") {
                Some(Value::Object(body)) => body.keys().collect(),
                _ => vec![],
            };
            info!("Response: status={}, body_keys={:?}", status, keys);
        }
        None => info!("Response: none received"),
    }
    Ok(Value::Null)
}

fn record_stats(call: Call) -> HookResult {
    let field = |name: &str| {
        call.response
            .and_then(|response| response.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    };
    info!(
        "Response stats: status={}, elapsed={}ms",
        field("status_code"),
        field("elapsed_ms")
    );
    Ok(Value::Null)
}

fn validate_status(call: Call) -> HookResult {
    let status = call
        .response
        .and_then(|response| response.get("status_code"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if (200..300).contains(&status) {
        Ok(Value::Null)
    } else {
        Err(HookError::assertion(format!(
            "Expected 2xx status code, got {}",
            status
        )))
    }
}
