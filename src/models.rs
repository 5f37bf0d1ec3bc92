use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progression::TimerMode;

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: i64,
    pub user_id: i64,
    pub duration_minutes: u32,
    pub timer_mode: TimerMode,
    pub target_duration_minutes: Option<u32>,
    pub subject: Option<String>,
    pub notes: Option<String>,
    pub xp_earned: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbStudySession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub timer_mode: Option<String>,
    pub target_duration_minutes: Option<i64>,
    pub subject: Option<String>,
    pub notes: Option<String>,
    pub xp_earned: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbStudySession> for StudySession {
    fn from(db: DbStudySession) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            duration_minutes: db
                .duration_minutes
                .and_then(|m| u32::try_from(m).ok())
                .unwrap_or_default(),
            timer_mode: db
                .timer_mode
                .as_deref()
                .and_then(TimerMode::from_str)
                .unwrap_or(TimerMode::Stopwatch),
            target_duration_minutes: db
                .target_duration_minutes
                .and_then(|m| u32::try_from(m).ok()),
            subject: db.subject,
            notes: db.notes,
            xp_earned: db
                .xp_earned
                .and_then(|xp| u64::try_from(xp).ok())
                .unwrap_or_default(),
            created_at: to_utc(db.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMaterial {
    pub id: i64,
    pub title: String,
    pub subject: Option<String>,
    pub content: String,
    pub material_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbGeneratedMaterial {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub material_type: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbGeneratedMaterial> for GeneratedMaterial {
    fn from(db: DbGeneratedMaterial) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            title: db.title.unwrap_or_default(),
            subject: db.subject,
            content: db.content.unwrap_or_default(),
            material_type: db.material_type.unwrap_or_else(|| "notes".to_string()),
            created_at: to_utc(db.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doubt {
    pub id: i64,
    pub question: String,
    pub answer: Option<String>,
    pub subject: Option<String>,
    pub image_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDoubt {
    pub id: Option<i64>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub subject: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbDoubt> for Doubt {
    fn from(db: DbDoubt) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            question: db.question.unwrap_or_default(),
            answer: db.answer,
            subject: db.subject,
            image_url: db.image_url,
            status: db.status.unwrap_or_else(|| "pending".to_string()),
            created_at: to_utc(db.created_at),
        }
    }
}
