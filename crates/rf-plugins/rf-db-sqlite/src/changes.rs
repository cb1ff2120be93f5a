//! In-process change broadcast standing in for a realtime service.

use async_trait::async_trait;
use rf_core::realtime::{subscription, ChangeEvent, ChangeFilter, ChangeKind, Subscription, Table};
use rf_core::traits::ChangeFeed;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

const CAPACITY: usize = 256;

/// Fan-out of every write made through one store.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub(crate) fn emit(&self, table: Table, kind: ChangeKind, new: Option<Value>, old: Option<Value>) {
        // No receivers is fine; nobody is watching.
        let _ = self.tx.send(ChangeEvent::new(table, kind, new, old));
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for ChangeBus {
    async fn subscribe(&self, filter: ChangeFilter) -> anyhow::Result<Subscription> {
        let mut rx = self.tx.subscribe();
        let (sender, subscription) = subscription(filter);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sender.closed() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if !sender.deliver(event) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("{} subscriber lagged by {skipped} events", filter.channel_name());
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("unsubscribed from {}", filter.channel_name());
        });

        Ok(subscription)
    }
}
