//! Dot-separated field paths and total resolution against a [`Value`].

use super::{Value, NULL};
use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed `a.b.c` path. The empty path resolves to the context itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        if raw.is_empty() {
            return Ok(Path::default());
        }

        let segments: Vec<String> = raw.split('.').map(str::to_owned).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(SchemaError::InvalidPath {
                path: raw.to_owned(),
                reason: "empty segment",
            });
        }

        Ok(Path { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for Path {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.segments.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Outcome of a traced resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Found(&'a Value),
    Missing,
    /// A segment was applied to an array. Arrays must be declared as
    /// sections so the engine explodes them before descending further.
    CrossedArray { segment: usize },
}

impl<'a> Resolution<'a> {
    /// Collapse to a value, degrading every non-hit to `Null`.
    pub fn value(self) -> &'a Value {
        match self {
            Resolution::Found(v) => v,
            Resolution::Missing | Resolution::CrossedArray { .. } => &NULL,
        }
    }
}

/// Resolve `path` against `context`, reporting why a lookup came up empty.
pub fn resolve_traced<'a>(context: &'a Value, path: &Path) -> Resolution<'a> {
    let mut current = context;
    for (idx, segment) in path.segments.iter().enumerate() {
        current = match current {
            Value::Struct(fields) => match fields.get(segment) {
                Some(next) => next,
                None => return Resolution::Missing,
            },
            Value::Array(_) => return Resolution::CrossedArray { segment: idx },
            Value::Null | Value::Scalar(_) => return Resolution::Missing,
        };
    }

    if current.is_null() {
        Resolution::Missing
    } else {
        Resolution::Found(current)
    }
}

/// Total path lookup: anything that does not resolve is `Null`.
pub fn resolve<'a>(context: &'a Value, path: &Path) -> &'a Value {
    resolve_traced(context, path).value()
}
