use crate::foundation::Result;
use log::{debug, warn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const REFILL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Opaque precomputed key-generation parameters.
#[derive(Clone, Debug)]
pub struct PreParams(pub Vec<u8>);

/// Buffer of precomputed parameters that keeps key generation responsive.
///
/// Lifecycle-scoped to the node controller: the filler task runs until
/// `shutdown` is called, never as an ambient global.
pub struct PreParamsPool {
    target_size: usize,
    generation_timeout: Duration,
    params: Mutex<Vec<PreParams>>,
    scope: CancellationToken,
}

impl PreParamsPool {
    pub fn new(target_size: usize, generation_timeout: Duration) -> Self {
        Self { target_size, generation_timeout, params: Mutex::new(Vec::new()), scope: CancellationToken::new() }
    }

    pub fn size(&self) -> usize {
        self.params.lock().map(|params| params.len()).unwrap_or(0)
    }

    pub fn take(&self) -> Option<PreParams> {
        self.params.lock().ok().and_then(|mut params| params.pop())
    }

    pub fn shutdown(&self) {
        self.scope.cancel();
    }

    /// Spawns the background filler. `generate` produces one set of
    /// parameters; slow generations are dropped at the configured timeout.
    pub fn spawn_filler<F, Fut>(self: &Arc<Self>, generate: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PreParams>> + Send + 'static,
    {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if pool.scope.is_cancelled() {
                    return;
                }
                if pool.size() >= pool.target_size {
                    tokio::select! {
                        _ = pool.scope.cancelled() => return,
                        _ = sleep(REFILL_POLL_INTERVAL) => continue,
                    }
                }
                let generated = tokio::select! {
                    _ = pool.scope.cancelled() => return,
                    result = timeout(pool.generation_timeout, generate()) => result,
                };
                match generated {
                    Ok(Ok(params)) => {
                        if let Ok(mut guard) = pool.params.lock() {
                            guard.push(params);
                            debug!("pre-params generated pool_size={}", guard.len());
                        }
                    }
                    Ok(Err(err)) => {
                        warn!("pre-params generation failed error={err}");
                        sleep(REFILL_POLL_INTERVAL).await;
                    }
                    Err(_) => {
                        warn!("pre-params generation timed out after {}s", pool.generation_timeout.as_secs());
                    }
                }
            }
        });
    }
}

impl Drop for PreParamsPool {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
