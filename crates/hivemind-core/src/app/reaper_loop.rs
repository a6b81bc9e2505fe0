//! EscalationReaper: periodically auto-rejects escalations nobody reviewed
//! within the escalation timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::sleep_or_shutdown;
use super::validator::Validator;

pub struct EscalationReaper {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl EscalationReaper {
    pub fn spawn(validator: Arc<Validator>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            loop {
                if sleep_or_shutdown(interval, &mut shutdown_rx).await {
                    break;
                }
                match validator.expire_escalations().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "expired unreviewed escalations"),
                    Err(e) => warn!(error = %e, "escalation sweep failed"),
                }
            }
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}
