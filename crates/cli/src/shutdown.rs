//! SIGINT/SIGTERM handling: cancel the run token, let in-flight work settle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct Gate {
    token: CancellationToken,
    active: Arc<AtomicBool>,
}

impl Gate {
    /// Gate with a background task listening for termination signals.
    pub fn install() -> Self {
        let gate = Self::default();
        let listener = gate.clone();
        tokio::spawn(async move { listener.listen().await });
        gate
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run one cleanup while marked active.
    pub async fn guard<F: Future>(&self, work: F) -> F::Output {
        self.active.store(true, Ordering::SeqCst);
        let out = work.await;
        self.active.store(false, Ordering::SeqCst);
        out
    }

    fn on_signal(&self, signal: &'static str) {
        if self.token.is_cancelled() {
            if self.active.load(Ordering::SeqCst) {
                warn!(signal, "cleanup still in progress, exiting once in-flight work settles");
            } else {
                info!(signal, "shutdown already in progress");
            }
            return;
        }
        info!(signal, "shutdown requested");
        self.token.cancel();
    }

    async fn listen(&self) {
        #[cfg(unix)]
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                None
            }
        };
        loop {
            #[cfg(unix)]
            let received = match term.as_mut() {
                Some(term) => tokio::select! {
                    r = tokio::signal::ctrl_c() => r.map(|()| "SIGINT"),
                    _ = term.recv() => Ok("SIGTERM"),
                },
                None => tokio::signal::ctrl_c().await.map(|()| "SIGINT"),
            };
            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.map(|()| "SIGINT");

            match received {
                Ok(signal) => self.on_signal(signal),
                Err(e) => {
                    warn!(error = %e, "signal listener failed");
                    return;
                }
            }
        }
    }
}
