use chrono::{DateTime, Utc};

use crate::error::ProgressionError;
use crate::models::StudySession;

use super::leveling::{ProgressionState, threshold_for_level};
use super::recorder::NewStudySession;

/// A progression row exactly as the store holds it. Columns are signed so a
/// corrupted row can still be read and healed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredProgression {
    pub level: i64,
    pub current_xp: i64,
    pub xp_to_next_level: i64,
    pub version: i64,
}

impl StoredProgression {
    pub fn from_state(state: ProgressionState, version: i64) -> Self {
        Self {
            level: i64::from(state.level),
            current_xp: i64::try_from(state.current_xp).unwrap_or(i64::MAX),
            xp_to_next_level: i64::try_from(state.xp_to_next_level).unwrap_or(i64::MAX),
            version,
        }
    }

    /// Converts to a domain state, rejecting rows that break
    /// `0 <= current_xp < xp_to_next_level == level * 100`.
    pub fn checked(&self) -> Result<ProgressionState, ProgressionError> {
        let level = u32::try_from(self.level)
            .ok()
            .filter(|level| *level >= 1)
            .ok_or_else(|| ProgressionError::InvalidState(format!("level {}", self.level)))?;

        let current_xp = u64::try_from(self.current_xp).map_err(|_| {
            ProgressionError::InvalidState(format!("current_xp {}", self.current_xp))
        })?;

        let expected = threshold_for_level(level);
        if u64::try_from(self.xp_to_next_level).ok() != Some(expected) {
            return Err(ProgressionError::InvalidState(format!(
                "xp_to_next_level {} for level {} (expected {})",
                self.xp_to_next_level, level, expected
            )));
        }

        if current_xp >= expected {
            return Err(ProgressionError::InvalidState(format!(
                "current_xp {} at rest with threshold {}",
                current_xp, expected
            )));
        }

        Ok(ProgressionState {
            level,
            current_xp,
            xp_to_next_level: expected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub version: i64,
    pub session_id: Option<i64>,
}

/// The persisted-state collaborator. Implementations must make
/// `update_progression_state_if_unchanged` a single atomic compare-and-swap
/// on `version`, and must append `session` in the same transaction.
#[rocket::async_trait]
pub trait ProgressionStore: Send + Sync {
    async fn get_progression_state(
        &self,
        user_id: i64,
    ) -> Result<Option<StoredProgression>, ProgressionError>;

    /// Inserts `defaults` unless a row already exists, then returns the row.
    async fn create_progression_state(
        &self,
        user_id: i64,
        defaults: ProgressionState,
    ) -> Result<StoredProgression, ProgressionError>;

    /// Returns `WriteConflict` when the row's version is no longer
    /// `expected_version`. Nothing is written in that case.
    async fn update_progression_state_if_unchanged(
        &self,
        user_id: i64,
        expected_version: i64,
        new_state: ProgressionState,
        session: Option<&NewStudySession>,
    ) -> Result<CommitReceipt, ProgressionError>;
}

#[rocket::async_trait]
pub trait SessionHistory: Send + Sync {
    async fn append_study_session(
        &self,
        user_id: i64,
        session: &NewStudySession,
    ) -> Result<i64, ProgressionError>;

    async fn recent_study_sessions(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<StudySession>, ProgressionError>;

    async fn study_sessions_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<StudySession>, ProgressionError>;
}
