//! Update Distribution
//!
//! One FIFO queue per attached player. Publishing appends to every queue in
//! the session's roster and never waits on consumers. Polling waits at most
//! the given timeout and returns the `NO_UPDATE` sentinel otherwise, so a
//! client never blocks indefinitely and the server never has to push.
//!
//! Each queue is a tokio `mpsc` channel. Queues are unbounded by default.
//! With [`QueuePolicy::DropOldest`] the channel is bounded and a full queue
//! evicts its oldest update to make room. Detaching drops the sender, which
//! wakes a waiting poll.

use std::collections::{BTreeMap, BTreeSet};
use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::game::events::Update;
use crate::game::state::{PlayerId, SessionId};

/// What a queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Never full.
    #[default]
    Unbounded,
    /// Keep at most this many updates, discarding the oldest.
    DropOldest(usize),
}

enum QueueTx {
    Unbounded(mpsc::UnboundedSender<Update>),
    Bounded(mpsc::Sender<Update>),
}

enum QueueRx {
    Unbounded(mpsc::UnboundedReceiver<Update>),
    Bounded(mpsc::Receiver<Update>),
}

impl QueueRx {
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Update>> {
        match self {
            QueueRx::Unbounded(rx) => rx.poll_recv(cx),
            QueueRx::Bounded(rx) => rx.poll_recv(cx),
        }
    }

    fn try_recv(&mut self) -> Option<Update> {
        match self {
            QueueRx::Unbounded(rx) => rx.try_recv().ok(),
            QueueRx::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    fn len(&self) -> usize {
        match self {
            QueueRx::Unbounded(rx) => rx.len(),
            QueueRx::Bounded(rx) => rx.len(),
        }
    }
}

/// One player's channel. The sender is taken on detach; the receiver is
/// only locked for non-blocking calls, never across an await.
struct PlayerQueue {
    tx: Mutex<Option<QueueTx>>,
    rx: Mutex<QueueRx>,
}

impl PlayerQueue {
    fn new(policy: QueuePolicy) -> Self {
        let (tx, rx) = match policy {
            QueuePolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueTx::Unbounded(tx), QueueRx::Unbounded(rx))
            }
            QueuePolicy::DropOldest(cap) => {
                let (tx, rx) = mpsc::channel(cap.max(1));
                (QueueTx::Bounded(tx), QueueRx::Bounded(rx))
            }
        };
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    fn rx(&self) -> MutexGuard<'_, QueueRx> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if an older update was evicted.
    fn push(&self, update: Update) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            None => false,
            Some(QueueTx::Unbounded(tx)) => {
                let _ = tx.send(update);
                false
            }
            Some(QueueTx::Bounded(tx)) => match tx.try_send(update) {
                Ok(()) | Err(TrySendError::Closed(_)) => false,
                Err(TrySendError::Full(update)) => {
                    let evicted = self.rx().try_recv().is_some();
                    let _ = tx.try_send(update);
                    evicted
                }
            },
        }
    }

    /// Drop the sender and discard anything still queued.
    fn close(&self) {
        let sender = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(sender);
        let mut rx = self.rx();
        while rx.try_recv().is_some() {}
    }

    fn len(&self) -> usize {
        self.rx().len()
    }
}

#[derive(Default)]
struct Tables {
    queues: BTreeMap<PlayerId, Arc<PlayerQueue>>,
    rosters: BTreeMap<SessionId, BTreeSet<PlayerId>>,
    memberships: BTreeMap<PlayerId, SessionId>,
}

/// Per-player update queues.
pub struct UpdateDistributor {
    policy: QueuePolicy,
    tables: Mutex<Tables>,
}

impl UpdateDistributor {
    /// Create a distributor with the given queue policy.
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `player`'s queue and add them to `session`'s roster.
    pub fn attach(&self, player: PlayerId, session: SessionId) {
        let mut tables = self.tables();
        let policy = self.policy;
        tables.queues.entry(player).or_insert_with(|| Arc::new(PlayerQueue::new(policy)));
        if let Some(previous) = tables.memberships.insert(player, session) {
            if previous != session {
                remove_from_roster(&mut tables.rosters, previous, player);
            }
        }
        tables.rosters.entry(session).or_default().insert(player);
    }

    /// Destroy `player`'s queue. Pending updates are dropped and a waiting
    /// poll returns `NO_UPDATE`. Returns false if nothing was attached.
    pub fn detach(&self, player: PlayerId) -> bool {
        let queue = {
            let mut tables = self.tables();
            if let Some(session) = tables.memberships.remove(&player) {
                remove_from_roster(&mut tables.rosters, session, player);
            }
            tables.queues.remove(&player)
        };

        match queue {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }

    /// Enqueue `update` for every player attached to `session`.
    ///
    /// When `turn_holder` is given each copy carries the recipient's
    /// `is_my_turn` flag. Returns the number of recipients.
    pub fn publish(
        &self,
        session: SessionId,
        update: &Update,
        turn_holder: Option<PlayerId>,
    ) -> usize {
        let recipients: Vec<(PlayerId, Arc<PlayerQueue>)> = {
            let tables = self.tables();
            let Some(roster) = tables.rosters.get(&session) else {
                return 0;
            };
            roster
                .iter()
                .filter_map(|p| tables.queues.get(p).map(|q| (*p, q.clone())))
                .collect()
        };

        for (player, queue) in &recipients {
            if queue.push(update.personalized(*player, turn_holder)) {
                debug!(player_id = %player, "Queue full, dropped oldest update");
            }
        }

        debug!(
            session_id = %session,
            kind = ?update.kind,
            recipients = recipients.len(),
            "Published update"
        );
        recipients.len()
    }

    /// Next update for `player`, waiting at most `timeout`.
    ///
    /// Unknown players get `NO_UPDATE` immediately.
    pub async fn poll(&self, player: PlayerId, timeout: Duration) -> Update {
        let Some(queue) = self.tables().queues.get(&player).cloned() else {
            return Update::no_update();
        };
        let next = poll_fn(|cx| queue.rx().poll_recv(cx));
        match tokio::time::timeout(timeout, next).await {
            Ok(Some(update)) => update,
            Ok(None) | Err(_) => Update::no_update(),
        }
    }

    /// Whether `player` has a queue.
    pub fn is_attached(&self, player: PlayerId) -> bool {
        self.tables().queues.contains_key(&player)
    }

    /// Updates waiting in `player`'s queue.
    pub fn pending(&self, player: PlayerId) -> usize {
        let queue = self.tables().queues.get(&player).cloned();
        queue.map(|q| q.len()).unwrap_or(0)
    }

    /// Queue policy in force.
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

impl Default for UpdateDistributor {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

fn remove_from_roster(
    rosters: &mut BTreeMap<SessionId, BTreeSet<PlayerId>>,
    session: SessionId,
    player: PlayerId,
) {
    if let Some(roster) = rosters.get_mut(&session) {
        roster.remove(&player);
        if roster.is_empty() {
            rosters.remove(&session);
        }
    }
}
