use crate::app::error::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub type Variables = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Suite,
    Case,
    Step,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Suite => write!(f, "suite"),
            Level::Case => write!(f, "case"),
            Level::Step => write!(f, "step"),
        }
    }
}

#[derive(Debug, Clone)]
struct Layer {
    level: Level,
    variables: Arc<Variables>,
}

/// Layered variable scope: step sees case sees suite, nearest layer wins.
///
/// Writes always land in the topmost layer. Lower layers are shared through
/// `Arc` and only copied if the topmost layer happens to be shared as well,
/// which keeps a frozen suite layer untouched while cases run in parallel.
#[derive(Debug, Clone)]
pub struct Context {
    layers: Vec<Layer>,
}

impl Context {
    /// Fresh chain with an empty, writable suite layer.
    pub fn root() -> Self {
        Self::new(Arc::new(Variables::new()))
    }

    /// Chain on top of an already frozen suite layer.
    pub fn new(suite: Arc<Variables>) -> Self {
        Self {
            layers: vec![Layer {
                level: Level::Suite,
                variables: suite,
            }],
        }
    }

    pub fn push(&mut self, level: Level) {
        trace!("Entering {} scope", level);
        self.layers.push(Layer {
            level,
            variables: Arc::new(Variables::new()),
        });
    }

    /// Drops the topmost layer and hands its variables back.
    ///
    /// The suite layer is never popped.
    pub fn pop(&mut self) -> Option<Variables> {
        if self.layers.len() <= 1 {
            return None;
        }
        self.layers.pop().map(|layer| {
            trace!("Leaving {} scope", layer.level);
            Arc::try_unwrap(layer.variables).unwrap_or_else(|shared| (*shared).clone())
        })
    }

    pub fn level(&self) -> Level {
        self.top().level
    }

    pub fn find(&self, name: &str) -> Option<&Value> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.variables.get(name))
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.find(name)
            .ok_or_else(|| Error::UndefinedVariable(name.to_owned()))
    }

    /// Resolves `root.segment.segment` through the chain and nested values.
    pub fn lookup<S: AsRef<str>>(&self, root: &str, segments: &[S]) -> Result<&Value> {
        let value = self.get(root)?;
        traverse(value, root, segments)
    }

    pub fn set<K: Into<String>>(&mut self, name: K, value: Value) {
        let name = name.into();
        trace!("Set '{}' in {} scope", name, self.level());
        self.top_mut().insert(name, value);
    }

    pub fn merge<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = (String, Value)>,
    {
        let top = self.top_mut();
        for (key, value) in iter {
            top.insert(key, value);
        }
    }

    /// Merged view of every layer, used when hooks ask for `variables`.
    pub fn flatten(&self) -> Variables {
        let mut merged = Variables::new();
        for layer in &self.layers {
            for (key, value) in layer.variables.iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Turns the topmost layer into a shareable read-only layer.
    pub fn freeze(mut self) -> Arc<Variables> {
        match self.layers.pop() {
            Some(layer) => layer.variables,
            None => Arc::new(Variables::new()),
        }
    }

    fn top(&self) -> &Layer {
        // there is always at least the suite layer
        &self.layers[self.layers.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Variables {
        let last = self.layers.len() - 1;
        Arc::make_mut(&mut self.layers[last].variables)
    }
}

/// Walks `segments` through objects (by key) and arrays (by index).
pub(crate) fn traverse<'v, S: AsRef<str>>(
    root: &'v Value,
    label: &str,
    segments: &[S],
) -> Result<&'v Value> {
    let mut current = root;
    let mut walked = label.to_owned();
    for segment in segments {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(object) => object
                .get(segment)
                .ok_or_else(|| Error::path(format!("{}.{}", walked, segment), "missing key"))?,
            Value::Array(array) => {
                let index: usize = segment.parse().map_err(|_| {
                    Error::path(
                        format!("{}.{}", walked, segment),
                        "sequence index must be a non-negative integer",
                    )
                })?;
                array.get(index).ok_or_else(|| {
                    Error::path(
                        format!("{}.{}", walked, segment),
                        format!("index out of range (len {})", array.len()),
                    )
                })?
            }
            other => {
                return Err(Error::path(
                    format!("{}.{}", walked, segment),
                    format!("cannot index into {}", kind(other)),
                ))
            }
        };
        walked.push('.');
        walked.push_str(segment);
    }
    Ok(current)
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
