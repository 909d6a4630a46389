// src/core/sink.rs

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use strum::IntoEnumIterator;

use crate::core::models::{ProtocolVersion, ScanRecord};
use crate::errors::FatalError;

/// Row-oriented output owned by the single writer.
///
/// `begin` is called once before the first record and `finish` once after the
/// last; nothing else ever touches the sink.
pub trait RecordSink: Send {
    fn begin(&mut self) -> Result<(), FatalError>;
    fn write_record(&mut self, record: &ScanRecord) -> Result<(), FatalError>;
    fn finish(&mut self) -> Result<(), FatalError>;
}

/// Column names, in output order.
pub fn header() -> Vec<&'static str> {
    let mut columns = vec![
        "domain",
        "http-reachable",
        "https-reachable",
        "is-parked",
        "hsts",
        "https-redirect-ok",
    ];
    columns.extend(ProtocolVersion::iter().map(ProtocolVersion::column));
    columns
}

/// One CSV row for `record`; a TLS column is `true` only when supported.
pub fn row(record: &ScanRecord) -> Vec<String> {
    let mut fields = vec![
        record.domain.to_string(),
        record.http_reachable.to_string(),
        record.https_reachable.to_string(),
        record.is_parked.to_string(),
        record.hsts_present.to_string(),
        record.https_redirect_ok.to_string(),
    ];
    fields.extend(
        ProtocolVersion::iter().map(|version| record.tls_support.get(version).is_supported().to_string()),
    );
    fields
}

pub struct CsvSink<W: Write + Send> {
    writer: csv::Writer<W>,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn begin(&mut self) -> Result<(), FatalError> {
        self.writer.write_record(header()).map_err(csv_error)
    }

    fn write_record(&mut self, record: &ScanRecord) -> Result<(), FatalError> {
        self.writer.write_record(row(record)).map_err(csv_error)
    }

    fn finish(&mut self) -> Result<(), FatalError> {
        self.writer.flush().map_err(io_error)
    }
}

/// One JSON object per line, with the full tri-state TLS matrix.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn begin(&mut self) -> Result<(), FatalError> {
        Ok(())
    }

    fn write_record(&mut self, record: &ScanRecord) -> Result<(), FatalError> {
        serde_json::to_writer(&mut self.writer, record).map_err(|e| FatalError::SinkWrite(e.to_string()))?;
        self.writer.write_all(b"\n").map_err(io_error)
    }

    fn finish(&mut self) -> Result<(), FatalError> {
        self.writer.flush().map_err(io_error)
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ScanRecord>>>,
    begun: Arc<Mutex<usize>>,
    finished: Arc<Mutex<usize>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<ScanRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// How many times `begin` and `finish` were called.
    pub fn lifecycle_calls(&self) -> (usize, usize) {
        let begun = self.begun.lock().map(|n| *n).unwrap_or_default();
        let finished = self.finished.lock().map(|n| *n).unwrap_or_default();
        (begun, finished)
    }
}

impl RecordSink for MemorySink {
    fn begin(&mut self) -> Result<(), FatalError> {
        bump(&self.begun)
    }

    fn write_record(&mut self, record: &ScanRecord) -> Result<(), FatalError> {
        self.records
            .lock()
            .map_err(|_| FatalError::SinkWrite("memory sink poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), FatalError> {
        bump(&self.finished)
    }
}

fn bump(counter: &Mutex<usize>) -> Result<(), FatalError> {
    *counter
        .lock()
        .map_err(|_| FatalError::SinkWrite("memory sink poisoned".into()))? += 1;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

/// Opens the sink for `path`; `-` means stdout.
pub fn open_sink(path: &Path, format: OutputFormat) -> Result<Box<dyn RecordSink>, FatalError> {
    let writer: Box<dyn Write + Send> = if path == Path::new("-") {
        Box::new(io::stdout())
    } else {
        let file = File::create(path).map_err(|source| FatalError::SinkOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Box::new(BufWriter::new(file))
    };

    Ok(match format {
        OutputFormat::Csv => Box::new(CsvSink::new(writer)),
        OutputFormat::Jsonl => Box::new(JsonLinesSink::new(writer)),
    })
}

fn csv_error(e: csv::Error) -> FatalError {
    FatalError::SinkWrite(e.to_string())
}

fn io_error(e: io::Error) -> FatalError {
    FatalError::SinkWrite(e.to_string())
}
