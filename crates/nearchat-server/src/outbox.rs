use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use nearchat_shared::protocol::ServerEvent;
use nearchat_shared::ConnectionId;

use crate::error::RelayError;

/// Outbound event channels of every live connection.
///
/// Pushes never wait: a full channel means the client is not keeping up and
/// the event is dropped for that client only.
#[derive(Clone, Default)]
pub struct Outbox {
    senders: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, id: ConnectionId, tx: mpsc::Sender<ServerEvent>) {
        self.senders.write().await.insert(id, tx);
    }

    pub async fn detach(&self, id: &ConnectionId) -> bool {
        self.senders.write().await.remove(id).is_some()
    }

    /// Push one event to one connection.
    pub async fn push(&self, to: &ConnectionId, event: ServerEvent) -> Result<(), RelayError> {
        let tx = self.senders.read().await.get(to).cloned();
        let Some(tx) = tx else {
            return Err(RelayError::Push {
                peer: *to,
                reason: "not connected".into(),
            });
        };

        tx.try_send(event).map_err(|e| RelayError::Push {
            peer: *to,
            reason: match e {
                mpsc::error::TrySendError::Full(_) => "outbound buffer full".into(),
                mpsc::error::TrySendError::Closed(_) => "channel closed".into(),
            },
        })
    }

    /// Push to every recipient, logging failures per recipient. Returns how
    /// many pushes succeeded.
    pub async fn fan_out<I>(&self, recipients: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let mut delivered = 0;
        for peer in recipients {
            match self.push(&peer, event.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(peer = %peer, error = %e, "Dropping event for peer"),
            }
        }
        debug!(delivered, "Fan-out complete");
        delivered
    }

    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_to_unknown_fails() {
        let outbox = Outbox::new();
        let err = outbox
            .push(&ConnectionId::new(), ServerEvent::error("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Push { .. }));
    }

    #[tokio::test]
    async fn test_fan_out_survives_slow_peer() {
        let outbox = Outbox::new();
        let slow = ConnectionId::new();
        let fast = ConnectionId::new();
        let gone = ConnectionId::new();

        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let (gone_tx, gone_rx) = mpsc::channel(8);
        drop(gone_rx);
        outbox.attach(slow, slow_tx).await;
        outbox.attach(fast, fast_tx).await;
        outbox.attach(gone, gone_tx).await;

        let event = ServerEvent::error("ping");
        assert_eq!(outbox.fan_out([slow, gone, fast], &event).await, 2);
        // Second round: slow peer's single slot is still occupied.
        assert_eq!(outbox.fan_out([slow, gone, fast], &event).await, 1);

        assert_eq!(fast_rx.try_recv().unwrap(), event);
        assert_eq!(fast_rx.try_recv().unwrap(), event);
    }

    #[tokio::test]
    async fn test_detach() {
        let outbox = Outbox::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        outbox.attach(id, tx).await;
        assert_eq!(outbox.len().await, 1);
        assert!(outbox.detach(&id).await);
        assert!(!outbox.detach(&id).await);
    }
}
