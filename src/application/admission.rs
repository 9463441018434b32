//! Admission control for compile requests.
//!
//! Oversized sources are rejected before any slot, directory or process is
//! touched. Accepted requests wait cooperatively for one of a fixed number of
//! slots; the returned [`CompilePermit`] frees its slot when dropped, whatever
//! way the compile attempt ends.

use std::{
    num::{NonZeroU32, NonZeroU64},
    sync::Arc,
};

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::infra::telemetry::{METRIC_ADMISSION_REJECTED_TOTAL, METRIC_COMPILE_IN_FLIGHT};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("LaTeX source too large. Limit is {limit} bytes.")]
    TooLarge { actual: usize, limit: u64 },
    #[error("admission control is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    max_source_bytes: u64,
    capacity: usize,
    slots: Arc<Semaphore>,
}

impl AdmissionGuard {
    pub fn new(max_source_bytes: NonZeroU64, max_concurrent: NonZeroU32) -> Self {
        let capacity = max_concurrent.get() as usize;
        Self {
            max_source_bytes: max_source_bytes.get(),
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn max_source_bytes(&self) -> u64 {
        self.max_source_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Reject sources whose encoded length exceeds the ceiling.
    pub fn check_size(&self, source: &[u8]) -> Result<(), AdmissionError> {
        if source.len() as u64 > self.max_source_bytes {
            counter!(METRIC_ADMISSION_REJECTED_TOTAL).increment(1);
            warn!(
                target = "texforge::admission",
                source_bytes = source.len(),
                limit = self.max_source_bytes,
                "rejected oversized source"
            );
            return Err(AdmissionError::TooLarge {
                actual: source.len(),
                limit: self.max_source_bytes,
            });
        }
        Ok(())
    }

    /// Check the size, then wait for a free compile slot.
    pub async fn admit(&self, source: &[u8]) -> Result<CompilePermit, AdmissionError> {
        self.check_size(source)?;

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;

        gauge!(METRIC_COMPILE_IN_FLIGHT).increment(1.0);
        debug!(
            target = "texforge::admission",
            in_flight = self.in_flight(),
            capacity = self.capacity,
            "compile slot acquired"
        );

        Ok(CompilePermit { _permit: permit })
    }
}

/// One occupied compile slot.
#[derive(Debug)]
pub struct CompilePermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for CompilePermit {
    fn drop(&mut self) {
        gauge!(METRIC_COMPILE_IN_FLIGHT).decrement(1.0);
    }
}
