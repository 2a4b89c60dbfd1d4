//! Result workbook
//!
//! Rows are kept in memory and the whole workbook is rewritten after every
//! append, so an aborted run keeps every row recorded so far.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::BenchmarkResult;
use crate::error::Result;
use crate::matrix::TestCase;

pub const SHEET_NAME: &str = "Benchmark Results";

pub const HEADERS: [&str; 9] = [
    "Input Tokens",
    "Output Tokens",
    "Concurrency",
    "Requests",
    "TTFT(s)",
    "TPOT(s)",
    "Throughput(tokens/s)",
    "Duration(s)",
    "Comment",
];

/// One line of the result sheet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub concurrency: u32,
    pub request_count: u32,
    pub ttft: Option<f64>,
    pub tpot: Option<f64>,
    pub throughput: Option<f64>,
    pub duration: Option<f64>,
    pub comment: String,
}

impl ResultRow {
    /// Row for a measured test case
    pub fn measured(case: &TestCase, result: &BenchmarkResult) -> Self {
        Self {
            ttft: result.ttft,
            tpot: result.tpot,
            throughput: result.throughput,
            duration: result.duration,
            comment: result.comment.clone(),
            ..Self::blank(case, "")
        }
    }

    /// Row with no metrics, `reason` goes into the comment
    pub fn blank(case: &TestCase, reason: &str) -> Self {
        Self {
            input_tokens: case.context.input_tokens,
            output_tokens: case.context.output_tokens,
            concurrency: case.batch.batch_size,
            request_count: case.batch.request_count,
            ttft: None,
            tpot: None,
            throughput: None,
            duration: None,
            comment: reason.to_string(),
        }
    }

    pub fn has_metrics(&self) -> bool {
        self.ttft.is_some() || self.tpot.is_some() || self.throughput.is_some() || self.duration.is_some()
    }

    fn numbers(&self) -> [Option<f64>; 8] {
        [
            Some(self.input_tokens.into()),
            Some(self.output_tokens.into()),
            Some(self.concurrency.into()),
            Some(self.request_count.into()),
            self.ttft,
            self.tpot,
            self.throughput,
            self.duration,
        ]
    }
}

/// Pick `<dir>/<prefix>-<timestamp>.xlsx`, adding `-N` if that file exists
pub fn unique_result_path(dir: &Path, prefix: &str, timestamp: &str) -> PathBuf {
    let base = dir.join(format!("{}-{}.xlsx", prefix, timestamp));
    if !base.exists() {
        return base;
    }
    (1..)
        .map(|n| dir.join(format!("{}-{}-{}.xlsx", prefix, timestamp, n)))
        .find(|p| !p.exists())
        .unwrap_or(base)
}

/// Append-only result sheet persisted after every row
pub struct ResultRecorder {
    path: PathBuf,
    rows: Vec<ResultRow>,
}

impl ResultRecorder {
    /// Create the result directory and write a header-only workbook
    pub fn create(dir: &Path, prefix: &str, timestamp: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let recorder = Self {
            path: unique_result_path(dir, prefix, timestamp),
            rows: Vec::new(),
        };
        recorder.save()?;
        info!(path = %recorder.path.display(), "Result workbook created");
        Ok(recorder)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Add a row and rewrite the workbook
    pub fn append(&mut self, row: ResultRow) -> Result<()> {
        if !row.has_metrics() {
            warn!(comment = %row.comment, "Recording row without metrics");
        }
        self.rows.push(row);
        self.save()?;
        info!(path = %self.path.display(), rows = self.rows.len(), "Result saved");
        Ok(())
    }

    /// Render the workbook to bytes
    pub fn to_xlsx(&self) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;

        for (col, title) in HEADERS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &header)?;
            sheet.set_column_width(col as u16, 16)?;
        }

        for (i, row) in self.rows.iter().enumerate() {
            let r = (i + 1) as u32;
            for (col, value) in row.numbers().iter().enumerate() {
                if let Some(v) = value {
                    sheet.write_number(r, col as u16, *v)?;
                }
            }
            if !row.comment.is_empty() {
                sheet.write_string(r, 8, &row.comment)?;
            }
        }

        Ok(workbook.save_to_buffer()?)
    }

    /// Write the workbook next to its final path, then rename over it
    fn save(&self) -> Result<()> {
        let bytes = self.to_xlsx()?;
        let partial = self.path.with_extension("xlsx.partial");
        std::fs::write(&partial, bytes)?;
        std::fs::rename(&partial, &self.path)?;
        Ok(())
    }

    /// Dump all rows as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let report = serde_json::to_string_pretty(&self.rows)?;
        std::fs::write(path, report)?;
        Ok(())
    }
}
