use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
    models::{DbDoubt, DbGeneratedMaterial, Doubt, GeneratedMaterial},
    stats::DEFAULT_CHARACTER,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use tracing::{info, instrument};

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users ORDER BY username",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(User::from).collect())
}

#[instrument]
pub async fn update_user_display_name(
    pool: &Pool<Sqlite>,
    user_id: i64,
    display_name: &str,
) -> Result<(), AppError> {
    info!("Updating user display name");
    sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
        .bind(display_name)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    info!("Updating user password");
    let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query("SELECT id, password, archived FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: i64 = row.try_get("id")?;
    let hashed: String = row.try_get("password")?;
    let archived: bool = row.try_get("archived")?;

    if archived || !bcrypt::verify(password, &hashed).unwrap_or(false) {
        return Ok(None);
    }

    get_user(pool, id).await.map(Some)
}

#[instrument(skip_all, fields(username, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: &str,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role)
    .bind(display_name.unwrap_or(username))
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

/// Creates the configured admin account unless that username is already
/// taken. An existing account is left untouched, password included.
#[instrument(skip(pool, password))]
pub async fn ensure_admin(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<bool, AppError> {
    if find_user_by_username(pool, username).await?.is_some() {
        return Ok(false);
    }

    create_user(pool, username, password, Role::Admin.as_str(), None).await?;
    info!("Bootstrap admin account created");

    Ok(true)
}

#[instrument]
pub async fn set_user_archived(
    pool: &Pool<Sqlite>,
    user_id: i64,
    archive: bool,
) -> Result<bool, AppError> {
    info!("Toggling user archived status");

    sqlx::query("UPDATE users SET archived = ? WHERE id = ?")
        .bind(archive)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(archive)
}

#[instrument]
pub async fn update_user_role(
    pool: &Pool<Sqlite>,
    user_id: i64,
    role: &str,
) -> Result<(), AppError> {
    info!("Updating user role");

    if Role::from_str(role).is_err() {
        return Err(AppError::Validation(format!("Unknown role: {}", role)));
    }

    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool))]
pub async fn get_character_type(pool: &Pool<Sqlite>, user_id: i64) -> Result<String, AppError> {
    let row = sqlx::query("SELECT character_type FROM progression_states WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(match row {
        Some(row) => row.try_get::<String, _>("character_type")?,
        None => DEFAULT_CHARACTER.to_string(),
    })
}

/// Only touches the cosmetic column, so the progression version is left alone.
#[instrument(skip(pool))]
pub async fn update_character_type(
    pool: &Pool<Sqlite>,
    user_id: i64,
    character_type: &str,
) -> Result<(), AppError> {
    info!("Updating study twin character");

    let res = sqlx::query("UPDATE progression_states SET character_type = ? WHERE user_id = ?")
        .bind(character_type)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "No study twin for user {}",
            user_id
        )));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudyTotals {
    pub total_minutes: i64,
    pub total_sessions: i64,
}

#[instrument(skip(pool))]
pub async fn get_study_totals(pool: &Pool<Sqlite>, user_id: i64) -> Result<StudyTotals, AppError> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(duration_minutes), 0) AS total_minutes, COUNT(*) AS total_sessions
         FROM study_sessions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(StudyTotals {
        total_minutes: row.try_get("total_minutes")?,
        total_sessions: row.try_get("total_sessions")?,
    })
}

#[instrument(skip(pool))]
pub async fn count_sessions_since(
    pool: &Pool<Sqlite>,
    user_id: i64,
    since: NaiveDateTime,
) -> Result<i64, AppError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count FROM study_sessions WHERE user_id = ? AND created_at >= ?",
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(row.try_get("count")?)
}

/// Distinct UTC dates with at least one session, newest first.
#[instrument(skip(pool))]
pub async fn get_study_days(
    pool: &Pool<Sqlite>,
    user_id: i64,
    limit: i64,
) -> Result<Vec<NaiveDate>, AppError> {
    let rows = sqlx::query(
        "SELECT DISTINCT date(created_at) AS day FROM study_sessions
         WHERE user_id = ?
         ORDER BY day DESC
         LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut days = Vec::with_capacity(rows.len());
    for row in rows {
        let day: String = row.try_get("day")?;
        let parsed = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
            .map_err(|e| AppError::Internal(format!("Bad study date {}: {}", day, e)))?;
        days.push(parsed);
    }

    Ok(days)
}

#[instrument(skip(pool, content))]
pub async fn create_generated_material(
    pool: &Pool<Sqlite>,
    user_id: i64,
    title: &str,
    subject: Option<&str>,
    content: &str,
    material_type: &str,
) -> Result<i64, AppError> {
    info!("Saving generated material");

    let res = sqlx::query(
        "INSERT INTO generated_materials (user_id, title, subject, content, material_type, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(title)
    .bind(subject)
    .bind(content)
    .bind(material_type)
    .bind(Utc::now().naive_utc())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_generated_materials(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<GeneratedMaterial>, AppError> {
    let rows = sqlx::query_as::<_, DbGeneratedMaterial>(
        "SELECT id, title, subject, content, material_type, created_at
         FROM generated_materials
         WHERE user_id = ?
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(GeneratedMaterial::from).collect())
}

#[instrument(skip(pool))]
pub async fn delete_generated_material(
    pool: &Pool<Sqlite>,
    user_id: i64,
    material_id: i64,
) -> Result<(), AppError> {
    info!("Deleting generated material");

    let res = sqlx::query("DELETE FROM generated_materials WHERE id = ? AND user_id = ?")
        .bind(material_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Material {} not found",
            material_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn count_generated_materials(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM generated_materials WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(row.try_get("count")?)
}

#[instrument(skip(pool, question, answer, image_url))]
pub async fn create_doubt(
    pool: &Pool<Sqlite>,
    user_id: i64,
    question: &str,
    answer: &str,
    subject: Option<&str>,
    image_url: Option<&str>,
) -> Result<Doubt, AppError> {
    info!("Saving answered doubt");

    let row = sqlx::query_as::<_, DbDoubt>(
        "INSERT INTO doubts (user_id, question, answer, subject, image_url, status, created_at)
         VALUES (?, ?, ?, ?, ?, 'answered', ?)
         RETURNING id, question, answer, subject, image_url, status, created_at",
    )
    .bind(user_id)
    .bind(question)
    .bind(answer)
    .bind(subject)
    .bind(image_url)
    .bind(Utc::now().naive_utc())
    .fetch_one(pool)
    .await?;

    Ok(Doubt::from(row))
}

#[instrument(skip(pool))]
pub async fn get_doubts(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<Doubt>, AppError> {
    let rows = sqlx::query_as::<_, DbDoubt>(
        "SELECT id, question, answer, subject, image_url, status, created_at
         FROM doubts
         WHERE user_id = ?
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Doubt::from).collect())
}

#[instrument(skip(pool))]
pub async fn count_doubts(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM doubts WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(row.try_get("count")?)
}
