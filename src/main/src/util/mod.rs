use crate::result::{RelayResult, RelayRuntimeErr};

#[cfg(test)]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[cfg(test)]
pub fn test_tracing_start() {
    let my_filter = tracing_subscriber::filter::filter_fn(|v| {
        if let Some(mp) = v.module_path() {
            if mp.contains("hyper") || mp.contains("h2") {
                return false;
            }
        }
        v.level() != &tracing::Level::TRACE
    });
    let my_layer = tracing_subscriber::fmt::layer().with_test_writer();
    let _ = tracing_subscriber::registry()
        .with(my_layer.with_filter(my_filter))
        .try_init();
}

/// A spawned module task, joined once by `Sys` at shutdown.
pub struct JoinHandleWrapper {
    name: &'static str,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl JoinHandleWrapper {
    pub fn new(name: &'static str, handle: tokio::task::JoinHandle<()>) -> Self {
        Self {
            name,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Joining twice is a no-op.
    pub async fn join(&mut self) -> RelayResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.await.map_err(|err| RelayRuntimeErr::TokioJoin {
            err,
            context: format!("module task {}", self.name),
        })?;
        Ok(())
    }
}
