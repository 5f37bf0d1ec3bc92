use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument};

use crate::error::ProgressionError;
use crate::models::{DbStudySession, StudySession};

use super::leveling::ProgressionState;
use super::recorder::NewStudySession;
use super::store::{CommitReceipt, ProgressionStore, SessionHistory, StoredProgression};

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// SQLITE_BUSY and SQLITE_LOCKED, in any of their extended forms.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

async fn insert_study_session(
    conn: &mut SqliteConnection,
    user_id: i64,
    session: &NewStudySession,
) -> Result<i64, sqlx::Error> {
    let created_at = Utc::now().naive_utc();

    let res = sqlx::query(
        "INSERT INTO study_sessions
         (user_id, duration_minutes, timer_mode, target_duration_minutes, subject, notes, xp_earned, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(i64::from(session.duration_minutes))
    .bind(session.timer_mode.as_str())
    .bind(session.target_duration_minutes.map(i64::from))
    .bind(session.subject.as_deref())
    .bind(session.notes.as_deref())
    .bind(to_i64(session.xp_earned))
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(res.last_insert_rowid())
}

#[rocket::async_trait]
impl ProgressionStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_progression_state(
        &self,
        user_id: i64,
    ) -> Result<Option<StoredProgression>, ProgressionError> {
        let row = sqlx::query_as::<_, StoredProgression>(
            "SELECT level, current_xp, xp_to_next_level, version
             FROM progression_states WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    #[instrument(skip(self))]
    async fn create_progression_state(
        &self,
        user_id: i64,
        defaults: ProgressionState,
    ) -> Result<StoredProgression, ProgressionError> {
        info!("Creating default progression state");

        // A concurrent first request may have created the row already.
        sqlx::query(
            "INSERT INTO progression_states (user_id, level, current_xp, xp_to_next_level, version)
             VALUES (?, ?, ?, ?, 0)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(i64::from(defaults.level))
        .bind(to_i64(defaults.current_xp))
        .bind(to_i64(defaults.xp_to_next_level))
        .execute(&self.pool)
        .await?;

        self.get_progression_state(user_id).await?.ok_or_else(|| {
            ProgressionError::StoreUnavailable(format!(
                "progression state for user {} missing after insert",
                user_id
            ))
        })
    }

    #[instrument(skip(self, session))]
    async fn update_progression_state_if_unchanged(
        &self,
        user_id: i64,
        expected_version: i64,
        new_state: ProgressionState,
        session: Option<&NewStudySession>,
    ) -> Result<CommitReceipt, ProgressionError> {
        match self
            .swap_if_unchanged(user_id, expected_version, new_state, session)
            .await
        {
            Ok(SwapOutcome::Committed { session_id }) => Ok(CommitReceipt {
                version: expected_version + 1,
                session_id,
            }),
            Ok(SwapOutcome::VersionMoved) => {
                debug!(expected_version, "Progression version moved, write rejected");
                Err(ProgressionError::WriteConflict { user_id })
            }
            Err(err) if is_lock_contention(&err) => {
                debug!(error = %err, "Progression row locked by another writer");
                Err(ProgressionError::WriteConflict { user_id })
            }
            Err(err) => Err(err.into()),
        }
    }
}

enum SwapOutcome {
    Committed { session_id: Option<i64> },
    VersionMoved,
}

impl SqliteStore {
    /// Runs the versioned update and optional session insert in one
    /// transaction.
    async fn swap_if_unchanged(
        &self,
        user_id: i64,
        expected_version: i64,
        new_state: ProgressionState,
        session: Option<&NewStudySession>,
    ) -> Result<SwapOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "UPDATE progression_states
             SET level = ?, current_xp = ?, xp_to_next_level = ?,
                 version = version + 1, updated_at = CURRENT_TIMESTAMP
             WHERE user_id = ? AND version = ?",
        )
        .bind(i64::from(new_state.level))
        .bind(to_i64(new_state.current_xp))
        .bind(to_i64(new_state.xp_to_next_level))
        .bind(user_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SwapOutcome::VersionMoved);
        }

        let session_id = match session {
            Some(session) => Some(insert_study_session(&mut tx, user_id, session).await?),
            None => None,
        };

        tx.commit().await?;

        Ok(SwapOutcome::Committed { session_id })
    }
}

#[rocket::async_trait]
impl SessionHistory for SqliteStore {
    #[instrument(skip(self, session))]
    async fn append_study_session(
        &self,
        user_id: i64,
        session: &NewStudySession,
    ) -> Result<i64, ProgressionError> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_study_session(&mut conn, user_id, session).await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn recent_study_sessions(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<StudySession>, ProgressionError> {
        let rows = sqlx::query_as::<_, DbStudySession>(
            "SELECT * FROM study_sessions
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StudySession::from).collect())
    }

    #[instrument(skip(self))]
    async fn study_sessions_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<StudySession>, ProgressionError> {
        let rows = sqlx::query_as::<_, DbStudySession>(
            "SELECT * FROM study_sessions
             WHERE user_id = ? AND created_at >= ?
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(since.naive_utc())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StudySession::from).collect())
    }
}
