//! Courier - startup and shutdown
//!
//! `start()` builds the worker pool, then the handler registry. If the
//! registry cannot be built the pool is aborted and no dispatcher exists.
//! `stop()` is the pool's shutdown; sequencers have nothing of their own to
//! stop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::builder::{RegistrationSource, populate};
use super::dispatcher::Dispatcher;
use crate::config::CourierConfig;
use crate::error::StartupError;
use crate::observability::PoolCounts;
use crate::ports::EventSink;
use crate::typed::HandlerRegistry;
use crate::worker::{ShutdownReport, WorkerPool};

pub struct Courier {
    dispatcher: Dispatcher,
    pool: WorkerPool,
    shutdown_timeout: Duration,
}

impl Courier {
    /// Must be called inside a tokio runtime.
    pub fn start<S: RegistrationSource>(
        source: S,
        config: &CourierConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, StartupError> {
        let pool = WorkerPool::spawn(config.pool.clone())?;

        let registry = match populate(source) {
            Ok(registry) => registry,
            Err(e) => {
                error!(error = %e, "handler registration failed; aborting startup");
                pool.abort();
                return Err(e.into());
            }
        };

        info!(
            pool = %pool.name(),
            workers = pool.workers(),
            handlers = registry.len(),
            skip_closed_sessions = config.dispatch.skip_closed_sessions,
            "courier started"
        );

        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            pool.clone(),
            events,
            config.dispatch.skip_closed_sessions,
        );

        Ok(Self {
            dispatcher,
            pool,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    pub fn counts(&self) -> PoolCounts {
        self.pool.counts()
    }

    pub async fn stop(&self, timeout: Duration) -> ShutdownReport {
        let report = self.pool.shutdown(timeout).await;
        info!(
            graceful = report.graceful,
            executed = report.counts.executed,
            cancelled = report.counts.cancelled,
            "courier stopped"
        );
        report
    }

    /// `stop()` with the configured `shutdown_timeout_ms`.
    pub async fn stop_default(&self) -> ShutdownReport {
        self.stop(self.shutdown_timeout).await
    }
}
