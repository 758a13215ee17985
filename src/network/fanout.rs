//! Broadcast Fan-out
//!
//! Snapshots meant for every connected client (open matches, leaderboard)
//! are published here. Connections subscribe; publishers never see who is
//! listening.

use tokio::sync::broadcast;
use tracing::trace;

use crate::network::protocol::ServerMessage;

/// Default channel depth. Slow subscribers skip to the newest snapshot.
pub const FANOUT_CAPACITY: usize = 64;

/// Publish side of the all-clients channel.
#[derive(Clone, Debug)]
pub struct Fanout {
    tx: broadcast::Sender<ServerMessage>,
}

impl Fanout {
    /// Create a fan-out channel.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Push a message to every current subscriber.
    pub fn publish(&self, message: ServerMessage) {
        match self.tx.send(message) {
            Ok(receivers) => trace!("published snapshot to {} subscribers", receivers),
            Err(_) => trace!("published snapshot with no subscribers"),
        }
    }

    /// Listen for published messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new(FANOUT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let fanout = Fanout::default();
        let mut rx1 = fanout.subscribe();
        let mut rx2 = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 2);

        fanout.publish(ServerMessage::Leaderboard { entries: Vec::new() });

        assert_eq!(rx1.recv().await.unwrap(), ServerMessage::Leaderboard { entries: Vec::new() });
        assert_eq!(rx2.recv().await.unwrap(), ServerMessage::Leaderboard { entries: Vec::new() });
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let fanout = Fanout::default();
        fanout.publish(ServerMessage::OpenMatches { matches: Vec::new() });
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
