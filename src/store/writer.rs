//! Record Writer
//!
//! A single background task that applies match-record writes and completion
//! facts to the store in the order they were issued. Callers enqueue and
//! return immediately, so no store round-trip ever happens under a match
//! lock. Failed writes are retried with a fixed backoff; writes that keep
//! failing are logged and dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::game::state::{CompletedMatch, MatchId};
use crate::ranking::RankingAggregator;
use crate::store::{GameStore, MatchRecord, StoreError};

/// Retry behaviour for store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per write, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug)]
enum RecordCommand {
    Create(MatchRecord),
    Update(MatchRecord),
    Delete(MatchId),
    Completed {
        record: MatchRecord,
        completed: CompletedMatch,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle for enqueueing writes.
#[derive(Clone, Debug)]
pub struct RecordWriter {
    tx: mpsc::UnboundedSender<RecordCommand>,
}

impl RecordWriter {
    /// Persist a newly created match.
    pub fn create(&self, record: MatchRecord) {
        self.send(RecordCommand::Create(record));
    }

    /// Overwrite a match record.
    pub fn update(&self, record: MatchRecord) {
        self.send(RecordCommand::Update(record));
    }

    /// Drop a match record.
    pub fn delete(&self, match_id: MatchId) {
        self.send(RecordCommand::Delete(match_id));
    }

    /// Persist the final record, update stats, republish the leaderboard.
    pub fn completed(&self, record: MatchRecord, completed: CompletedMatch) {
        self.send(RecordCommand::Completed { record, completed });
    }

    /// Wait until every write enqueued before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(RecordCommand::Flush(done_tx));
        let _ = done_rx.await;
    }

    fn send(&self, command: RecordCommand) {
        if self.tx.send(command).is_err() {
            warn!("Record writer stopped, dropping write");
        }
    }
}

/// Start the writer task.
///
/// The task ends once every [`RecordWriter`] handle has been dropped and the
/// queue is drained.
pub fn spawn_record_writer(
    store: Arc<dyn GameStore>,
    ranking: Arc<RankingAggregator>,
    policy: RetryPolicy,
) -> (RecordWriter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            apply(&store, &ranking, policy, command).await;
        }
        debug!("Record writer drained");
    });

    (RecordWriter { tx }, handle)
}

async fn apply(
    store: &Arc<dyn GameStore>,
    ranking: &RankingAggregator,
    policy: RetryPolicy,
    command: RecordCommand,
) {
    match command {
        RecordCommand::Create(record) => {
            let what = format!("create match {}", record.match_id.short());
            with_retry(policy, &what, || store.create_match_record(record.clone())).await;
        }
        RecordCommand::Update(record) => {
            let what = format!("update match {}", record.match_id.short());
            with_retry(policy, &what, || store.update_match_record(record.clone())).await;
        }
        RecordCommand::Delete(match_id) => {
            let what = format!("delete match {}", match_id.short());
            with_retry(policy, &what, || store.delete_match_record(&match_id)).await;
        }
        RecordCommand::Completed { record, completed } => {
            let what = format!("finish match {}", record.match_id.short());
            with_retry(policy, &what, || store.update_match_record(record.clone())).await;

            let what = format!("stats for match {}", completed.match_id.short());
            if with_retry(policy, &what, || ranking.record(&completed)).await.is_some() {
                if let Err(e) = ranking.publish_leaderboard().await {
                    warn!("Leaderboard refresh failed: {}", e);
                }
            }
        }
        RecordCommand::Flush(done) => {
            let _ = done.send(());
        }
    }
}

async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Some(value),
            Err(e) if !e.is_transient() => {
                warn!("{} failed, not retrying: {}", what, e);
                return None;
            }
            Err(e) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => {
                error!("{} failed after {} attempts, giving up: {}", what, attempts, e);
            }
        }
    }
    None
}
