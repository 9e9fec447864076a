#[cfg(test)]
#[path = "admission_gate_test.rs"]
mod tests;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;

/// Counting admission gate. At most `limit` futures run at once; the rest wait
/// and are admitted in FIFO order as slots free up.
#[derive(Clone)]
pub struct AdmissionGate {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> AdmissionGate {
        return AdmissionGate {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        };
    }

    #[cfg(test)]
    pub fn limit(&self) -> usize {
        return self.limit;
    }

    #[cfg(test)]
    pub fn running(&self) -> usize {
        return self.limit - self.semaphore.available_permits();
    }

    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if self.semaphore.available_permits() == 0 {
            tracing::debug!(limit = self.limit, "Waiting for an admission slot");
        }
        let _permit = self.semaphore.acquire().await?;
        return Ok(fut.await);
    }
}
