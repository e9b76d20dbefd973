//! Event delivery contexts.
//!
//! The engine decides events while processing store notifications and hands
//! each one to an [`EventDelivery`] as a job. Every context runs jobs one at
//! a time in submission order, so listeners of one query never run
//! concurrently and observe events in decision order.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use crate::core::config::DeliveryConfig;

/// A unit of listener work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Schedules listener callbacks.
pub trait EventDelivery: Send + Sync {
    /// Run `job` after every previously delivered job.
    fn deliver(&self, job: Job);

    /// Name of the context, for logs.
    fn name(&self) -> &'static str;
}

/// Runs jobs inline on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDelivery;

impl EventDelivery for ImmediateDelivery {
    fn deliver(&self, job: Job) {
        run_job(job);
    }

    fn name(&self) -> &'static str {
        "immediate"
    }
}

/// Runs jobs on one dedicated worker thread.
pub struct ThreadDelivery {
    sender: mpsc::UnboundedSender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadDelivery {
    /// Spawn the worker thread.
    pub fn spawn(thread_name: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    run_job(job);
                }
            })?;
        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Check if the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }
}

impl EventDelivery for ThreadDelivery {
    fn deliver(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!("event worker stopped, dropping event");
        }
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

/// Runs jobs on a task of a tokio runtime.
pub struct TokioDelivery {
    sender: mpsc::UnboundedSender<Job>,
}

impl TokioDelivery {
    /// Spawn the consumer task on `handle`.
    pub fn spawn(handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                run_job(job);
            }
        });
        Self { sender }
    }

    /// Spawn on the runtime of the current context, if any.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| Self::spawn(&handle))
    }
}

impl EventDelivery for TokioDelivery {
    fn deliver(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!("event task stopped, dropping event");
        }
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

/// Run a job, logging a listener panic instead of propagating it.
fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("listener panicked while handling an event");
    }
}

/// Build the delivery context selected by configuration.
///
/// `"tokio"` outside a runtime falls back to a worker thread.
pub fn delivery_from_config(config: &DeliveryConfig) -> std::io::Result<Arc<dyn EventDelivery>> {
    match config.mode.as_str() {
        "immediate" => Ok(Arc::new(ImmediateDelivery)),
        "tokio" => match TokioDelivery::try_current() {
            Some(delivery) => Ok(Arc::new(delivery)),
            None => {
                tracing::warn!(
                    thread_name = %config.thread_name,
                    "no tokio runtime available, delivering events on a worker thread"
                );
                Ok(Arc::new(ThreadDelivery::spawn(&config.thread_name)?))
            }
        },
        _ => Ok(Arc::new(ThreadDelivery::spawn(&config.thread_name)?)),
    }
}
