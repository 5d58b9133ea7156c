use crate::error::SinkError;
use crate::melt::types::FlatRow;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination for flattened rows.
///
/// A call either succeeds or fails as a unit; the pipeline advances no
/// watermark after a failed write.
pub trait Sink: Send {
    fn write(&mut self, table: &str, rows: &[FlatRow]) -> Result<(), SinkError>;
}

/// Appends rows to one JSON Lines file per target table
pub struct JsonlSink {
    dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl JsonlSink {
    /// Create the output directory if needed
    pub fn new<P: AsRef<Path>>(output_dir: P) -> std::io::Result<Self> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(JsonlSink {
            dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
        })
    }

    /// File a table's rows are appended to
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table))
    }

    fn writer(&mut self, table: &str) -> Result<&mut BufWriter<File>, SinkError> {
        if !self.writers.contains_key(table) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.table_path(table))
                .map_err(|source| SinkError::Io {
                    table: table.to_string(),
                    source,
                })?;
            self.writers.insert(table.to_string(), BufWriter::new(file));
        }
        self.writers
            .get_mut(table)
            .ok_or_else(|| SinkError::Rejected(table.to_string()))
    }
}

impl Sink for JsonlSink {
    fn write(&mut self, table: &str, rows: &[FlatRow]) -> Result<(), SinkError> {
        // Encode the whole batch first so a bad row leaves the file untouched
        let batch = encode_batch(table, rows)?;
        let writer = self.writer(table)?;
        let io_err = |source| SinkError::Io {
            table: table.to_string(),
            source,
        };
        writer.write_all(&batch).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

fn encode_batch<T: Serialize>(table: &str, rows: &[T]) -> Result<Vec<u8>, SinkError> {
    let mut batch = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut batch, row).map_err(|source| SinkError::Serialize {
            table: table.to_string(),
            source,
        })?;
        batch.push(b'\n');
    }
    Ok(batch)
}

#[derive(Serialize)]
struct TaggedRow<'a> {
    _table: &'a str,
    #[serde(flatten)]
    row: &'a FlatRow,
}

/// Writes every table to a single stream, tagging rows with `_table`
pub struct StreamSink<W: Write> {
    writer: W,
}

impl<W: Write> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        StreamSink { writer }
    }
}

impl<W: Write + Send> Sink for StreamSink<W> {
    fn write(&mut self, table: &str, rows: &[FlatRow]) -> Result<(), SinkError> {
        let tagged: Vec<TaggedRow<'_>> = rows
            .iter()
            .map(|row| TaggedRow { _table: table, row })
            .collect();
        let batch = encode_batch(table, &tagged)?;

        let io_err = |source| SinkError::Io {
            table: table.to_string(),
            source,
        };
        self.writer.write_all(&batch).map_err(io_err)?;
        self.writer.flush().map_err(io_err)
    }
}

/// Keeps written rows in memory; can be told to reject every write
#[derive(Debug, Default)]
pub struct MemorySink {
    pub tables: BTreeMap<String, Vec<FlatRow>>,
    pub writes: usize,
    reject: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        MemorySink {
            reject: true,
            ..Self::default()
        }
    }

    pub fn rows(&self, table: &str) -> &[FlatRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Sink for MemorySink {
    fn write(&mut self, table: &str, rows: &[FlatRow]) -> Result<(), SinkError> {
        if self.reject {
            return Err(SinkError::Rejected(table.to_string()));
        }
        self.writes += 1;
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }
}
