//! Error types for metadata loading, coercion and the run collaborators.
//!
//! Resolution anomalies and coercion failures never surface as errors from
//! the engine; they are counted in [`Diagnostics`](crate::melt::Diagnostics).
//! Only metadata problems and collaborator I/O abort a run.

use crate::schema::MappingKey;

/// Malformed or inconsistent section/column metadata. Fatal at load time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("no metadata mapping for {0}")]
    MappingNotFound(MappingKey),

    #[error("mapping {0} declares no sections")]
    EmptyMapping(MappingKey),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("section `{section}` at level 0 must not declare a parent (found `{parent}`)")]
    RootWithParent { section: String, parent: String },

    #[error("section `{section}` at level {level} has no parent")]
    MissingParent { section: String, level: u32 },

    #[error("section `{section}` references unknown parent `{parent}`")]
    UnknownParent { section: String, parent: String },

    #[error(
        "section `{section}` at level {level} has parent `{parent}` \
         which is not at level {expected}"
    )]
    LevelMismatch {
        section: String,
        level: u32,
        parent: String,
        expected: u32,
    },

    #[error(
        "section `{section}` references parent `{parent}` \
         which is declared more than once at level {level}"
    )]
    AmbiguousParent {
        section: String,
        parent: String,
        level: u32,
    },

    #[error("section `{section}` is declared twice at level {level} under the same parent")]
    DuplicateSection { section: String, level: u32 },

    #[error("column `{column}` references unknown section `{section}`")]
    UnknownSection { column: String, section: String },

    #[error("column `{column}` references section `{section}` which is declared more than once")]
    AmbiguousSection { column: String, section: String },

    #[error("column `{0}` is declared more than once")]
    DuplicateColumn(String),

    #[error("component `{0}` is not a level-0 section of this mapping")]
    UnknownComponent(String),

    #[error("column `{column}` uses unregistered transform `{transform}`")]
    UnknownTransform { column: String, transform: String },
}

/// A present value that cannot be converted to the declared column type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot coerce {found} to {target}")]
pub struct CoercionError {
    pub found: String,
    pub target: &'static str,
}

/// Failure reading raw documents or metadata from a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure handing flattened rows to the output collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("i/o error writing table `{table}`: {source}")]
    Io {
        table: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize row for table `{table}`: {source}")]
    Serialize {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sink rejected write to `{0}`")]
    Rejected(String),
}

/// Failure reading or advancing a watermark.
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored cursor `{value}` for {key} is not an RFC 3339 timestamp")]
    Corrupt { key: String, value: String },

    #[error("watermark store lock poisoned")]
    LockPoisoned,
}

/// Run-fatal errors. A run that returns one of these advanced no watermark.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("watermark error: {0}")]
    Watermark(#[from] WatermarkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_the_section() {
        let err = SchemaError::UnknownParent {
            section: "Observations".into(),
            parent: "Result".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Observations"), "got: {msg}");
        assert!(msg.contains("Result"), "got: {msg}");
    }

    #[test]
    fn run_error_wraps_sink_failure() {
        let err: RunError = SinkError::Rejected("results".into()).into();
        assert!(err.to_string().starts_with("sink error"));
    }

    #[test]
    fn watermark_corrupt_names_the_key() {
        let err = WatermarkError::Corrupt {
            key: "ccd/results".into(),
            value: "yesterday".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ccd/results"), "got: {msg}");
        assert!(msg.contains("yesterday"), "got: {msg}");
    }

    #[test]
    fn watermark_lock_poisoned_displays() {
        assert_eq!(
            WatermarkError::LockPoisoned.to_string(),
            "watermark store lock poisoned"
        );
    }
}
