//! Alert delivery boundary.
//!
//! The orchestrator sends every emitted [`AlertEvent`] into an unbounded
//! channel exactly once. A single dispatcher task drains it, renders the
//! payload and offers it to each configured [`AlertNotifier`]. Delivery
//! failures are logged and never retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alerts::payload::AlertPayload;
use crate::config::NetworkConfig;
use crate::fees::types::AlertEvent;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP {status} from notification target")]
    Http { status: u16 },

    #[error("Notification transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn notify(&self, payload: &AlertPayload) -> Result<(), NotifyError>;
}

/// Writes alerts to the log. Always configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
        tracing::info!(network = %payload.network, level = %payload.level, "{}", payload.summary());
        Ok(())
    }
}

/// Spawn the task that delivers events until every sender is dropped.
pub fn spawn_dispatcher(
    mut events: mpsc::UnboundedReceiver<AlertEvent>,
    networks: Arc<BTreeMap<String, NetworkConfig>>,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let payload = AlertPayload::from_event(&event, networks.get(&event.network));
            for notifier in &notifiers {
                if let Err(err) = notifier.notify(&payload).await {
                    tracing::error!(
                        notifier = notifier.name(),
                        network = %payload.network,
                        level = %payload.level,
                        "Alert delivery failed: {}",
                        err
                    );
                }
            }
        }
        tracing::debug!("Alert dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::types::{AlertLevel, GasSample, Percentile, PercentileFees};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<AlertPayload>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertNotifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(payload.clone());
            if self.fail {
                Err(NotifyError::Http { status: 500 })
            } else {
                Ok(())
            }
        }
    }

    fn event(network: &str, level: AlertLevel) -> AlertEvent {
        let sample = GasSample {
            network: network.into(),
            timestamp: Utc::now(),
            block_number: 1,
            base_fee: 1,
            priority_fees: PercentileFees::default(),
            total_fees: PercentileFees::from_fn(|_| 1),
            l1_surcharge: None,
        };
        AlertEvent {
            network: network.into(),
            level,
            fee: 1,
            threshold: 2,
            percentile: Percentile::P50,
            generated_at: sample.timestamp,
            sample,
        }
    }

    #[tokio::test]
    async fn every_event_reaches_every_notifier_once() {
        let failing = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let ok = Arc::new(Recording::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let notifiers: Vec<Arc<dyn AlertNotifier>> = vec![
            failing.clone() as Arc<dyn AlertNotifier>,
            ok.clone() as Arc<dyn AlertNotifier>,
            Arc::new(LogNotifier),
        ];
        let handle = spawn_dispatcher(rx, Arc::new(BTreeMap::new()), notifiers);

        tx.send(event("ethereum", AlertLevel::Low)).unwrap();
        tx.send(event("base", AlertLevel::Medium)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(failing.seen.lock().unwrap().len(), 2);
        let seen = ok.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].network, "ethereum");
        assert_eq!(seen[1].level, AlertLevel::Medium);
    }
}
