use crate::app::capture::Capturable;
use crate::app::context::kind;
use crate::app::error::{Error, Result};
use crate::app::resolver::{stringify, Resolver, Session};
use crate::configuration::manifest::{Comparator, Directive};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

pub trait Assertable<T> {
    fn assert(&self, actual: &T, expected: &T) -> Result<()>;
}

impl Assertable<Value> for Comparator {
    fn assert(&self, actual: &Value, expected: &Value) -> Result<()> {
        trace!("Assertion {} of {} to {}", self, actual, expected);
        let passed = match self {
            Comparator::Equal => equals(actual, expected),
            Comparator::NotEqual => !equals(actual, expected),
            Comparator::Greater => ordering(*self, actual, expected)? == Ordering::Greater,
            Comparator::GreaterOrEqual => ordering(*self, actual, expected)? != Ordering::Less,
            Comparator::Less => ordering(*self, actual, expected)? == Ordering::Less,
            Comparator::LessOrEqual => ordering(*self, actual, expected)? != Ordering::Greater,
            Comparator::Contains => contains(*self, actual, expected)?,
            Comparator::NotContains => !contains(*self, actual, expected)?,
            Comparator::ContainedBy => contains(*self, expected, actual)?,
            Comparator::StartsWith => {
                let (actual, expected) = texts(*self, actual, expected)?;
                actual.starts_with(expected.as_str())
            }
            Comparator::EndsWith => {
                let (actual, expected) = texts(*self, actual, expected)?;
                actual.ends_with(expected.as_str())
            }
            Comparator::Regex => {
                let (actual, pattern) = texts(*self, actual, expected)?;
                let regex =
                    Regex::new(&pattern).map_err(|err| Error::syntax(pattern.clone(), err.to_string()))?;
                regex.is_match(&actual)
            }
            Comparator::LengthEqual => length(*self, actual, expected)? == Ordering::Equal,
            Comparator::LengthGreater => length(*self, actual, expected)? == Ordering::Greater,
            Comparator::LengthGreaterOrEqual => length(*self, actual, expected)? != Ordering::Less,
            Comparator::LengthLess => length(*self, actual, expected)? == Ordering::Less,
            Comparator::LengthLessOrEqual => length(*self, actual, expected)? != Ordering::Greater,
            Comparator::TypeMatch => type_matches(*self, actual, expected)?,
        };
        if passed {
            Ok(())
        } else {
            Err(Error::Assertion(format!(
                "{} {} {} does not hold",
                actual, self, expected
            )))
        }
    }
}

/// Outcome of a step's `validate` section.
#[derive(Debug, Default)]
pub struct Verdict {
    pub failures: Vec<String>,
    pub errors: Vec<Error>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.failures.is_empty() && self.errors.is_empty()
    }
}

/// Runs every directive, collecting failures instead of stopping at the first.
pub fn validate(resolver: &Resolver, session: &mut Session, directives: &[Directive]) -> Verdict {
    let mut verdict = Verdict::default();
    for directive in directives {
        let outcome = directive
            .actual
            .capture(resolver, session)
            .and_then(|actual| {
                let expected = resolver.resolve(session, &directive.expected)?;
                debug!(
                    "Validate {}: {} ({}) against {}",
                    directive.comparator, directive.actual, actual, expected
                );
                directive.comparator.assert(&actual, &expected)
            });
        match outcome {
            Ok(()) => {}
            Err(err) if err.is_failure() => {
                warn!("Validation failed: {}", err);
                verdict.failures.push(err.to_string());
            }
            Err(err) => {
                error!("Validation of '{}' errored: {}", directive.actual, err);
                verdict.errors.push(err);
            }
        }
    }
    verdict
}

/// Numbers compare exactly while both sides are integers.
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Integer(i128),
    Float(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Integer(value) => value as f64,
            Numeric::Float(value) => value,
        }
    }

    fn compare(self, other: Numeric) -> Ordering {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.cmp(&b),
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                if (a - b).abs() < f64::EPSILON {
                    Ordering::Equal
                } else {
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                }
            }
        }
    }
}

fn number(value: &Value) -> Option<Numeric> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(|n| Numeric::Integer(i128::from(n)))
            .or_else(|| number.as_u64().map(|n| Numeric::Integer(i128::from(n))))
            .or_else(|| number.as_f64().map(Numeric::Float)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i128>().ok().map(Numeric::Integer).or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Numeric::Float)
            })
        }
        _ => None,
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    match (number(actual), number(expected)) {
        (Some(a), Some(b)) => a.compare(b) == Ordering::Equal,
        _ => actual == expected,
    }
}

fn mismatch(comparator: Comparator, actual: &Value, expected: &Value) -> Error {
    Error::TypeMismatch {
        comparator: comparator.to_string(),
        actual: kind(actual).to_owned(),
        expected: kind(expected).to_owned(),
    }
}

fn ordering(comparator: Comparator, actual: &Value, expected: &Value) -> Result<Ordering> {
    match (number(actual), number(expected)) {
        (Some(a), Some(b)) => Ok(a.compare(b)),
        _ => Err(mismatch(comparator, actual, expected)),
    }
}

fn contains(comparator: Comparator, haystack: &Value, needle: &Value) -> Result<bool> {
    match (haystack, needle) {
        (Value::Array(items), _) => Ok(items.iter().any(|item| equals(item, needle))),
        (Value::Object(object), Value::String(key)) => Ok(object.contains_key(key)),
        (Value::String(text), Value::String(part)) => Ok(text.contains(part.as_str())),
        (Value::String(text), Value::Number(part)) => Ok(text.contains(&part.to_string())),
        _ => Err(mismatch(comparator, haystack, needle)),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Array(_) | Value::Object(_) => None,
        other => Some(stringify(other)),
    }
}

fn texts(comparator: Comparator, actual: &Value, expected: &Value) -> Result<(String, String)> {
    match (scalar(actual), scalar(expected)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(mismatch(comparator, actual, expected)),
    }
}

/// `len(actual)` against `expected`.
fn length(comparator: Comparator, actual: &Value, expected: &Value) -> Result<Ordering> {
    let len = match actual {
        Value::String(text) => text.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(object) => object.len(),
        _ => return Err(mismatch(comparator, actual, expected)),
    };
    match number(expected) {
        Some(expected) => Ok(Numeric::Integer(len as i128).compare(expected)),
        None => Err(mismatch(comparator, actual, expected)),
    }
}

fn type_matches(comparator: Comparator, actual: &Value, expected: &Value) -> Result<bool> {
    let name = match expected {
        Value::String(name) => name.as_str(),
        _ => return Err(mismatch(comparator, actual, expected)),
    };
    let matched = match name {
        "int" | "integer" => actual.is_i64() || actual.is_u64(),
        "float" => actual.is_f64(),
        "number" => actual.is_number(),
        "str" | "string" => actual.is_string(),
        "bool" | "boolean" => actual.is_boolean(),
        "list" | "array" | "sequence" => actual.is_array(),
        "dict" | "object" | "mapping" => actual.is_object(),
        "null" | "None" | "NoneType" => actual.is_null(),
        other => {
            return Err(Error::Unexpected(format!(
                "unknown type name '{}' in type_match",
                other
            )))
        }
    };
    Ok(matched)
}
