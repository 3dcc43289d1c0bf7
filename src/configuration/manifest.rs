use crate::app::context::Variables;
use crate::app::error::{Error, Result};
use crate::app::expression::Template;
use serde_derive::Deserialize;
use serde_json::Value;
use std::convert::TryFrom;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub config: SuiteConfig,
    #[serde(default)]
    pub cases: Vec<CaseSpec>,
}

#[derive(Debug, Deserialize)]
pub struct SuiteConfig {
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    /// Merged over the process environment and handed to hooks as `env`.
    #[serde(default)]
    pub env: Variables,
    #[serde(default, with = "crate::configuration::deserialize::hooks")]
    pub setup_hooks: Vec<String>,
    #[serde(default, with = "crate::configuration::deserialize::hooks")]
    pub teardown_hooks: Vec<String>,
    /// Time budget of every case of the suite.
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub continue_on_failure: bool,
}

#[derive(Debug, Deserialize)]
pub struct CaseSpec {
    pub config: CaseConfig,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
pub struct CaseConfig {
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, with = "crate::configuration::deserialize::hooks")]
    pub setup_hooks: Vec<String>,
    #[serde(default, with = "crate::configuration::deserialize::hooks")]
    pub teardown_hooks: Vec<String>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub continue_on_failure: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, with = "crate::configuration::deserialize::hooks")]
    pub setup_hooks: Vec<String>,
    pub request: RequestSpec,
    /// Variable name to expression; exported to the case after the step.
    #[serde(default)]
    pub extract: Variables,
    #[serde(default, with = "crate::configuration::deserialize::hooks")]
    pub teardown_hooks: Vec<String>,
    #[serde(default)]
    pub validate: Vec<Directive>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Joined onto the base url.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: Variables,
    #[serde(default)]
    pub params: Variables,
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    pub timeout: Option<Duration>,
}

fn default_method() -> String {
    "GET".to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Contains,
    NotContains,
    ContainedBy,
    StartsWith,
    EndsWith,
    Regex,
    LengthEqual,
    LengthGreater,
    LengthGreaterOrEqual,
    LengthLess,
    LengthLessOrEqual,
    TypeMatch,
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "eq" | "equal" | "equals" | "==" => Ok(Comparator::Equal),
            "ne" | "not_equal" | "!=" => Ok(Comparator::NotEqual),
            "gt" | "greater_than" | ">" => Ok(Comparator::Greater),
            "ge" | "greater_or_equals" | ">=" => Ok(Comparator::GreaterOrEqual),
            "lt" | "less_than" | "<" => Ok(Comparator::Less),
            "le" | "less_or_equals" | "<=" => Ok(Comparator::LessOrEqual),
            "contains" => Ok(Comparator::Contains),
            "not_contains" => Ok(Comparator::NotContains),
            "contained_by" => Ok(Comparator::ContainedBy),
            "startswith" | "starts_with" => Ok(Comparator::StartsWith),
            "endswith" | "ends_with" => Ok(Comparator::EndsWith),
            "regex" | "regex_match" => Ok(Comparator::Regex),
            "len_eq" | "length_equal" => Ok(Comparator::LengthEqual),
            "len_gt" => Ok(Comparator::LengthGreater),
            "len_ge" => Ok(Comparator::LengthGreaterOrEqual),
            "len_lt" => Ok(Comparator::LengthLess),
            "len_le" => Ok(Comparator::LengthLessOrEqual),
            "type_match" => Ok(Comparator::TypeMatch),
            other => Err(format!("Comparator '{}' not supported", other)),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Comparator::Equal => "eq",
            Comparator::NotEqual => "ne",
            Comparator::Greater => "gt",
            Comparator::GreaterOrEqual => "ge",
            Comparator::Less => "lt",
            Comparator::LessOrEqual => "le",
            Comparator::Contains => "contains",
            Comparator::NotContains => "not_contains",
            Comparator::ContainedBy => "contained_by",
            Comparator::StartsWith => "startswith",
            Comparator::EndsWith => "endswith",
            Comparator::Regex => "regex",
            Comparator::LengthEqual => "len_eq",
            Comparator::LengthGreater => "len_gt",
            Comparator::LengthGreaterOrEqual => "len_ge",
            Comparator::LengthLess => "len_lt",
            Comparator::LengthLessOrEqual => "len_le",
            Comparator::TypeMatch => "type_match",
        };
        f.write_str(name)
    }
}

/// One `{comparator: [actual, expected]}` entry of `validate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Variables")]
pub struct Directive {
    pub comparator: Comparator,
    pub actual: Value,
    pub expected: Value,
}

impl TryFrom<Variables> for Directive {
    type Error = String;

    fn try_from(entry: Variables) -> std::result::Result<Self, Self::Error> {
        if entry.len() != 1 {
            return Err(format!(
                "validate entry must have exactly one comparator, found {}",
                entry.len()
            ));
        }
        let (name, args) = entry
            .into_iter()
            .next()
            .ok_or_else(|| "empty validate entry".to_owned())?;
        let comparator = name.parse::<Comparator>()?;
        match args {
            Value::Array(mut pair) if pair.len() == 2 => {
                let expected = pair.pop().unwrap_or(Value::Null);
                let actual = pair.pop().unwrap_or(Value::Null);
                Ok(Directive {
                    comparator,
                    actual,
                    expected,
                })
            }
            _ => Err(format!(
                "'{}' expects a list of [actual, expected]",
                comparator
            )),
        }
    }
}

impl Manifest {
    pub fn from(path: &Path) -> Result<Self> {
        let load_error = |reason: String| Error::Load {
            path: path.display().to_string(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|err| load_error(err.to_string()))?;
        let manifest = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        };
        manifest.map_err(|err| match err {
            Error::Load { reason, .. } => load_error(reason),
            other => load_error(other.to_string()),
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(content).map_err(|err| Error::Load {
            path: "<yaml>".to_owned(),
            reason: err.to_string(),
        })?;
        manifest.check()?;
        Ok(manifest)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(content)?;
        manifest.check()?;
        Ok(manifest)
    }

    /// Cases to run, all of them when `names` is empty.
    pub fn select<'m>(&'m self, names: &[String]) -> Vec<&'m CaseSpec> {
        self.cases
            .iter()
            .filter(|case| names.is_empty() || names.contains(&case.config.name))
            .collect()
    }

    /// Rejects malformed expressions and requests before anything runs.
    pub fn check(&self) -> Result<()> {
        let config = &self.config;
        check_hooks(&config.setup_hooks)?;
        check_hooks(&config.teardown_hooks)?;
        check_map(&config.variables)?;
        if let Some(base_url) = &config.base_url {
            check_str(base_url)?;
        }
        for case in &self.cases {
            let config = &case.config;
            check_hooks(&config.setup_hooks)?;
            check_hooks(&config.teardown_hooks)?;
            check_map(&config.variables)?;
            for step in &case.steps {
                check_step(step).map_err(|err| Error::Load {
                    path: format!("{} / {}", case.config.name, step.name),
                    reason: err.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

fn check_step(step: &StepSpec) -> Result<()> {
    check_map(&step.variables)?;
    check_hooks(&step.setup_hooks)?;
    check_hooks(&step.teardown_hooks)?;
    check_map(&step.extract)?;
    let request = &step.request;
    if request.url.is_none() && request.path.is_none() {
        return Err(Error::Request("request needs either 'url' or 'path'".to_owned()));
    }
    for raw in request.url.iter().chain(request.path.iter()) {
        check_str(raw)?;
    }
    check_str(&request.method)?;
    check_map(&request.headers)?;
    check_map(&request.params)?;
    for value in request.json.iter().chain(request.body.iter()) {
        check_value(value)?;
    }
    for directive in &step.validate {
        check_value(&directive.actual)?;
        check_value(&directive.expected)?;
    }
    Ok(())
}

fn check_hooks(hooks: &[String]) -> Result<()> {
    for hook in hooks {
        let template = Template::parse(hook)?;
        if template.is_plain() {
            warn!("Hook '{}' contains no expression and does nothing", hook);
        }
    }
    Ok(())
}

fn check_map(map: &Variables) -> Result<()> {
    map.values().try_for_each(check_value)
}

fn check_value(value: &Value) -> Result<()> {
    match value {
        Value::String(raw) => check_str(raw),
        Value::Array(items) => items.iter().try_for_each(check_value),
        Value::Object(object) => check_map(object),
        _ => Ok(()),
    }
}

fn check_str(raw: &str) -> Result<()> {
    if raw.contains('$') {
        Template::parse(raw)?;
    }
    Ok(())
}
