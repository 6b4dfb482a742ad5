use serde::{Deserialize, Serialize};

use crate::types::{NdviError, NdviResult};

/// Explicit execution settings for one pipeline invocation.
///
/// `parallelism = None` runs on the caller's current rayon pool; `Some(n)`
/// builds a private pool of `n` workers for the duration of the call.
/// Results never depend on either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    pub parallelism: Option<usize>,
    /// Rows per spatial block handed to a worker
    pub chunk_rows: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            parallelism: None,
            chunk_rows: 256,
        }
    }
}

impl ExecutionContext {
    pub fn sequential() -> Self {
        Self {
            parallelism: Some(1),
            ..Self::default()
        }
    }

    pub fn with_parallelism(parallelism: usize, chunk_rows: usize) -> Self {
        Self {
            parallelism: Some(parallelism),
            chunk_rows,
        }
    }

    pub fn validate(&self) -> NdviResult<()> {
        if self.chunk_rows == 0 {
            return Err(NdviError::Config("chunk_rows must be at least 1".to_string()));
        }
        if self.parallelism == Some(0) {
            return Err(NdviError::Config("parallelism must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Run `op` under this context's worker pool
    pub fn install<R, F>(&self, op: F) -> NdviResult<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.validate()?;

        #[cfg(feature = "parallel")]
        {
            if let Some(threads) = self.parallelism {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| NdviError::Processing(format!("Failed to build worker pool: {}", e)))?;
                log::debug!("Running on a private pool of {} workers", threads);
                return Ok(pool.install(op));
            }
        }

        Ok(op())
    }

    /// Half-open row ranges covering `rows`
    pub fn row_chunks(&self, rows: usize) -> Vec<(usize, usize)> {
        let step = self.chunk_rows.max(1);
        (0..rows)
            .step_by(step)
            .map(|start| (start, (start + step).min(rows)))
            .collect()
    }
}
