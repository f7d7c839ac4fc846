//! Side effects whose failure must never reach the action that triggered them.
//!
//! A failed notification is reported to a [`FailureObserver`] and otherwise
//! ignored. Production wires in [`TracingObserver`]; tests swap in a
//! recorder to assert on exactly which side effects failed.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

pub trait FailureObserver: Send + Sync {
    fn failed(&self, context: &str, error: &anyhow::Error);
}

/// Logs every absorbed failure at WARN.
pub struct TracingObserver;

impl FailureObserver for TracingObserver {
    fn failed(&self, context: &str, error: &anyhow::Error) {
        warn!("{} failed: {:#}", context, error);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct BestEffort {
    observer: Arc<dyn FailureObserver>,
}

impl BestEffort {
    pub fn new(observer: Arc<dyn FailureObserver>) -> Self {
        Self { observer }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingObserver))
    }

    pub fn report(&self, context: &str, error: &anyhow::Error) {
        self.observer.failed(context, error);
    }

    /// Await a fallible side effect; `None` means it failed and was reported.
    pub async fn run<T, F>(&self, context: &str, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(context, &e);
                None
            }
        }
    }

    /// Fire-and-forget. The handle may be dropped; tests await it.
    pub fn spawn<F>(&self, context: impl Into<String>, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let this = self.clone();
        let context = context.into();
        tokio::spawn(async move {
            this.run(&context, fut).await;
        })
    }

    /// Run `f` once per recipient, concurrently. A failure for one recipient
    /// is reported and never affects the others.
    pub async fn fan_out<F, Fut>(&self, context: &str, recipients: Vec<Uuid>, f: F) -> FanOutReport
    where
        F: Fn(Uuid) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let attempted = recipients.len();
        let results = join_all(recipients.into_iter().map(|recipient| {
            let fut = f(recipient);
            async move { (recipient, fut.await) }
        }))
        .await;

        let mut failed = 0;
        for (recipient, result) in results {
            if let Err(e) = result {
                failed += 1;
                self.report(&format!("{} for {}", context, recipient), &e);
            }
        }

        FanOutReport { attempted, failed }
    }
}
