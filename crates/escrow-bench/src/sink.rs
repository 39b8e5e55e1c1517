use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::error::{BenchError, Result};
use crate::measurement::Row;

/// Append-only tab-separated table, one line per trial.
///
/// Every row is flushed as soon as it is written so an interrupted run
/// still leaves a readable file.
pub struct ResultSink<W: Write> {
    writer: W,
    columns: usize,
    rows: usize,
}

impl ResultSink<BufWriter<File>> {
    /// Creates (or truncates) `path` and writes the standard header.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        info!(path = %path.display(), "writing results");
        Self::open(BufWriter::new(file), &Row::header())
    }
}

impl<W: Write> ResultSink<W> {
    /// Writes `header` to `writer` and returns the sink.
    pub fn open(mut writer: W, header: &[&str]) -> Result<Self> {
        if header.is_empty() {
            return Err(BenchError::MalformedInput("result header has no columns".into()));
        }
        writeln!(writer, "{}", header.join("\t"))?;
        writer.flush()?;
        Ok(Self { writer, columns: header.len(), rows: 0 })
    }

    pub fn append_row(&mut self, row: &Row) -> Result<()> {
        self.append_cells(&row.cells())
    }

    /// Appends raw cells; the count must match the header.
    pub fn append_cells(&mut self, cells: &[String]) -> Result<()> {
        if cells.len() != self.columns {
            return Err(BenchError::MalformedInput(format!(
                "row has {} cells, header has {} columns",
                cells.len(),
                self.columns
            )));
        }
        writeln!(self.writer, "{}", cells.join("\t"))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
