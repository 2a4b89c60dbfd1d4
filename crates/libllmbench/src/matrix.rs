//! Test matrix expansion

use std::fmt;

use serde::Serialize;

use crate::config::{BatchRequest, ContextPair, TestCaseConfig};
use crate::error::MatrixError;

/// How `context` and `batch_request` are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixMode {
    /// Every context with every batch/request pair, context-major
    Cartesian,
    /// The i-th context with the i-th batch/request pair
    Zip,
}

impl TryFrom<u32> for MatrixMode {
    type Error = MatrixError;

    fn try_from(mode: u32) -> Result<Self, Self::Error> {
        match mode {
            1 => Ok(MatrixMode::Cartesian),
            2 => Ok(MatrixMode::Zip),
            other => Err(MatrixError::UnsupportedMode(other)),
        }
    }
}

/// One point of the benchmark matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// 1-based position in the matrix
    pub index: usize,
    pub context: ContextPair,
    pub batch: BatchRequest,
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={}, out={}, concurrency={}, requests={}",
            self.context.input_tokens,
            self.context.output_tokens,
            self.batch.batch_size,
            self.batch.request_count
        )
    }
}

/// Expand `matrix` into test cases, context-major for mode 1
pub fn generate(matrix: &TestCaseConfig) -> Result<Vec<TestCase>, MatrixError> {
    let pairs: Vec<(ContextPair, BatchRequest)> = match MatrixMode::try_from(matrix.mode)? {
        MatrixMode::Cartesian => matrix
            .context
            .iter()
            .flat_map(|ctx| matrix.batch_request.iter().map(move |br| (*ctx, *br)))
            .collect(),
        MatrixMode::Zip => {
            if matrix.context.len() != matrix.batch_request.len() {
                return Err(MatrixError::LengthMismatch {
                    context: matrix.context.len(),
                    batch_request: matrix.batch_request.len(),
                });
            }
            matrix.context
                .iter()
                .copied()
                .zip(matrix.batch_request.iter().copied())
                .collect()
        }
    };

    Ok(pairs
        .into_iter()
        .enumerate()
        .map(|(i, (context, batch))| TestCase {
            index: i + 1,
            context,
            batch,
        })
        .collect())
}
