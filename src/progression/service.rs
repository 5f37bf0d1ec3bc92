use rand::Rng;
use rocket::tokio::time::sleep;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::ProgressionError;

use super::leveling::{self, LevelUpdate, ProgressionState};
use super::recorder::{self, NewStudySession, TimerReading};
use super::store::{ProgressionStore, SessionHistory};

/// Upper bound on a single backoff step, before jitter.
pub const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given 1-based attempt, with up to 50% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(MAX_BACKOFF);
        let jitter_ceiling = exp.as_millis() as u64 / 2;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ceiling)
        };
        exp + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSession {
    pub session_id: i64,
    pub duration_minutes: u32,
    pub xp_earned: u64,
    pub update: LevelUpdate,
}

/// Binds the leveling rules to a persisted store. Every state change goes
/// through a versioned compare-and-swap, so concurrent saves for one user
/// never overwrite each other.
pub struct ProgressionService<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> ProgressionService<S>
where
    S: ProgressionStore + SessionHistory,
{
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn backoff(&self, attempt: u32) {
        if attempt < self.retry.max_attempts {
            sleep(self.retry.delay_for(attempt)).await;
        }
    }

    fn exhausted(&self, user_id: i64) -> ProgressionError {
        ProgressionError::StoreUnavailable(format!(
            "progression update for user {} still conflicting after {} attempts",
            user_id, self.retry.max_attempts
        ))
    }

    /// Loads the user's state and its version, creating the default row when
    /// none exists and healing a row that breaks the XP invariant.
    async fn load_versioned(&self, user_id: i64) -> Result<(ProgressionState, i64), ProgressionError> {
        for attempt in 1..=self.retry.max_attempts {
            let stored = match self.store.get_progression_state(user_id).await? {
                Some(stored) => stored,
                None => {
                    self.store
                        .create_progression_state(user_id, ProgressionState::default())
                        .await?
                }
            };

            let invalid = match stored.checked() {
                Ok(state) => return Ok((state, stored.version)),
                Err(err) => err,
            };

            let healed = leveling::normalize(stored.level, stored.current_xp);
            warn!(
                user_id,
                error = %invalid,
                level = healed.level,
                current_xp = healed.current_xp,
                "Healing corrupt progression state"
            );

            match self
                .store
                .update_progression_state_if_unchanged(user_id, stored.version, healed, None)
                .await
            {
                Ok(receipt) => return Ok((healed, receipt.version)),
                Err(ProgressionError::WriteConflict { .. }) => self.backoff(attempt).await,
                Err(err) => return Err(err),
            }
        }

        Err(self.exhausted(user_id))
    }

    #[instrument(skip(self))]
    pub async fn load(&self, user_id: i64) -> Result<ProgressionState, ProgressionError> {
        let (state, _) = self.load_versioned(user_id).await?;
        Ok(state)
    }

    async fn commit(
        &self,
        user_id: i64,
        xp_delta: u64,
        session: Option<&NewStudySession>,
    ) -> Result<(LevelUpdate, Option<i64>), ProgressionError> {
        for attempt in 1..=self.retry.max_attempts {
            let (current, version) = self.load_versioned(user_id).await?;
            let update = leveling::apply_xp(current, xp_delta);

            match self
                .store
                .update_progression_state_if_unchanged(user_id, version, update.state, session)
                .await
            {
                Ok(receipt) => {
                    if update.leveled_up {
                        info!(
                            user_id,
                            level = update.state.level,
                            levels_gained = update.levels_gained,
                            "Study twin leveled up"
                        );
                    }
                    return Ok((update, receipt.session_id));
                }
                Err(ProgressionError::WriteConflict { .. }) => {
                    debug!(user_id, attempt, "Progression write conflict, retrying");
                    self.backoff(attempt).await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(self.exhausted(user_id))
    }

    #[instrument(skip(self))]
    pub async fn apply_xp(&self, user_id: i64, xp_delta: u64) -> Result<LevelUpdate, ProgressionError> {
        if xp_delta == 0 {
            let state = self.load(user_id).await?;
            return Ok(leveling::apply_xp(state, 0));
        }

        let (update, _) = self.commit(user_id, xp_delta, None).await?;
        Ok(update)
    }

    /// Turns a timer reading into a session row and credits its XP. The row
    /// and the XP change are committed together or not at all.
    #[instrument(skip(self, subject, notes))]
    pub async fn record_session(
        &self,
        user_id: i64,
        reading: TimerReading,
        subject: Option<String>,
        notes: Option<String>,
    ) -> Result<RecordedSession, ProgressionError> {
        let session = recorder::record(reading, subject, notes)?;

        // Sub-minute sessions earn nothing but still go through the versioned
        // write, so the history row never lands without a successful commit.
        let (update, session_id) = self
            .commit(user_id, session.xp_earned, Some(&session))
            .await?;

        let session_id = session_id.ok_or_else(|| {
            ProgressionError::StoreUnavailable("store did not return a session id".to_string())
        })?;

        info!(
            user_id,
            session_id,
            duration_minutes = session.duration_minutes,
            xp_earned = session.xp_earned,
            "Study session recorded"
        );

        Ok(RecordedSession {
            session_id,
            duration_minutes: session.duration_minutes,
            xp_earned: session.xp_earned,
            update,
        })
    }
}
