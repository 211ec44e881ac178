//! Durable squad expiry timers
//!
//! Each pending expiry is a row in the `expirations` table plus an armed
//! in-process timer. When a timer fires it only reports the squad on the
//! channel; the consumer then claims the row with `take_if_due`. A squad
//! that was rescheduled or closed in the meantime no longer has a due row,
//! so stale timers need no cancellation.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{MessageId, SquadKey};
use crate::storage::{self, Expiration, SharedDatabase};

/// Slack between the timer firing and the stored due time
const DUE_TOLERANCE_MS: i64 = 1000;
/// Delay before a claimed expiry that could not be applied is tried again
const RETRY_AFTER_SECS: i64 = 30;

pub struct ExpiryScheduler {
    db: SharedDatabase,
    due_tx: mpsc::UnboundedSender<SquadKey>,
}

impl ExpiryScheduler {
    /// Create a scheduler and the receiver that yields squads whose timer fired
    pub fn new(db: SharedDatabase) -> (Self, mpsc::UnboundedReceiver<SquadKey>) {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        (Self { db, due_tx }, due_rx)
    }

    /// Expire the squad `ttl_minutes` from now, replacing any earlier schedule
    pub fn schedule(&self, key: SquadKey, ttl_minutes: u32) -> Result<DateTime<Utc>> {
        let due_at = Utc::now() + Duration::minutes(i64::from(ttl_minutes));
        storage::lock(&self.db).expirations().upsert(&Expiration {
            message_id: key.message_id,
            guild_id: key.guild_id,
            channel_id: key.channel_id,
            due_at,
        })?;
        self.arm(key, due_at);
        debug!(message = %key.message_id, due_at = %due_at, "Squad expiry scheduled");
        Ok(due_at)
    }

    /// Drop a pending expiry
    pub fn cancel(&self, message: MessageId) -> Result<bool> {
        storage::lock(&self.db).expirations().remove(message)
    }

    /// Re-arm every stored expiry. Overdue ones fire immediately.
    pub fn rehydrate(&self) -> Result<usize> {
        let pending = storage::lock(&self.db).expirations().list()?;
        for expiration in &pending {
            self.arm(
                SquadKey {
                    guild_id: expiration.guild_id,
                    channel_id: expiration.channel_id,
                    message_id: expiration.message_id,
                },
                expiration.due_at,
            );
        }
        info!(count = pending.len(), "Squad expiries re-armed");
        Ok(pending.len())
    }

    /// Claim a due expiry. Returns `None` when the squad was rescheduled to
    /// a later time or its expiry was cancelled.
    pub fn take_if_due(&self, message: MessageId, now: DateTime<Utc>) -> Result<Option<Expiration>> {
        let db = storage::lock(&self.db);
        let store = db.expirations();
        match store.find(message)? {
            Some(expiration)
                if expiration.due_at <= now + Duration::milliseconds(DUE_TOLERANCE_MS) =>
            {
                store.remove(message)?;
                Ok(Some(expiration))
            }
            _ => Ok(None),
        }
    }

    /// Put back a claimed expiry that could not be applied, due again after
    /// a short delay. A schedule written since the claim is left alone.
    pub fn retry(&self, claimed: &Expiration) -> Result<Option<DateTime<Utc>>> {
        let due_at = Utc::now() + Duration::seconds(RETRY_AFTER_SECS);
        {
            let db = storage::lock(&self.db);
            let store = db.expirations();
            if store.find(claimed.message_id)?.is_some() {
                return Ok(None);
            }
            store.upsert(&Expiration {
                due_at,
                ..claimed.clone()
            })?;
        }
        self.arm(
            SquadKey {
                guild_id: claimed.guild_id,
                channel_id: claimed.channel_id,
                message_id: claimed.message_id,
            },
            due_at,
        );
        Ok(Some(due_at))
    }

    fn arm(&self, key: SquadKey, due_at: DateTime<Utc>) {
        let delay = (due_at - Utc::now()).to_std().unwrap_or_default();
        let due_tx = self.due_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the bot is shutting down
            let _ = due_tx.send(key);
        });
    }
}
