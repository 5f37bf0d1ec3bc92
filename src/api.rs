use chrono::{Duration, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::ai::TextGenerator;
use crate::ai::prompts::{DetailLevel, doubt_request, notes_request};
use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::db::{
    authenticate_user, count_doubts, count_generated_materials, count_sessions_since,
    create_doubt, create_generated_material, create_user, create_user_session,
    delete_generated_material, find_user_by_username, get_all_users, get_character_type,
    get_doubts, get_generated_materials, get_study_days, get_study_totals, get_user,
    invalidate_session, set_user_archived, update_character_type, update_user_display_name,
    update_user_password, update_user_role,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{Doubt, GeneratedMaterial, StudySession};
use crate::progression::{
    ProgressionState, RecordedSession, SessionHistory, SqliteProgressionService, TimerMode,
    TimerReading,
};
use crate::stats::{
    DayBucket, TwinView, WEEK_DAYS, current_streak, is_known_character, weekly_buckets,
};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse,
};

const DEFAULT_HISTORY_LIMIT: u32 = 10;
const MAX_HISTORY_LIMIT: u32 = 100;

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub archived: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role.to_string(),
            username: user.username,
            display_name: user.display_name,
            archived: user.archived,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + Duration::hours(config.session_ttl_hours);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            cookies.add_private(
                Cookie::build((SESSION_COOKIE, token))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(config.session_ttl_hours)),
            );

            info!(username = %user.username, "User logged in");

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize, Validate, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    #[validate(length(min = 1, max = 64, message = "Display name must be 1-64 characters"))]
    display_name: String,
}

#[put("/profile", data = "<profile>")]
pub async fn api_update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;
    let validated = profile.validate_custom()?;

    update_user_display_name(db, user.id, validated.display_name.trim())
        .await
        .validate_custom()?;

    Ok(Status::Ok)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeRequest {
    current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    new_password: String,
}

#[post("/change-password", data = "<password>")]
pub async fn api_change_password(
    password: Json<PasswordChangeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    let validated = password.validate_custom()?;

    let is_valid = authenticate_user(db, &user.username, &validated.current_password)
        .await
        .validate_custom()?;

    match is_valid {
        Some(_) => {
            update_user_password(db, user.id, &validated.new_password)
                .await
                .validate_custom()?;

            Ok(Status::Ok)
        }
        _ => Err(Custom(
            Status::Unauthorized,
            Json(ValidationResponse::with_error(
                "currentPassword",
                "Current password is incorrect",
            )),
        )),
    }
}

#[derive(Deserialize, Validate, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistrationRequest {
    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    username: String,
    display_name: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    role: Option<String>,
}

async fn register_account(
    db: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<(), ApiError> {
    let existing_user = find_user_by_username(db, username)
        .await
        .validate_custom()?;

    if existing_user.is_some() {
        return Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ));
    }

    create_user(db, username, password, role.as_str(), display_name)
        .await
        .validate_custom()?;

    info!(username, role = role.as_str(), "Account registered");

    Ok(())
}

#[post("/register", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<UserRegistrationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    user.require_permission(Permission::RegisterUsers)
        .validate_custom()?;

    let validated = registration.validate_custom()?;

    let role = match Role::from_str(validated.role.as_deref().unwrap_or("student")) {
        Ok(role) => role,
        Err(_) => {
            return Err(Custom(
                Status::UnprocessableEntity,
                Json(ValidationResponse::with_error("role", "Unknown role")),
            ));
        }
    };

    register_account(
        db,
        &validated.username,
        &validated.password,
        role,
        validated.display_name.as_deref(),
    )
    .await?;

    Ok(Status::Created)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    username: String,
    #[validate(length(min = 1, max = 64, message = "Display name must be 1-64 characters"))]
    display_name: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
}

/// Public sign-up. Always creates a student; other roles go through
/// `/register`.
#[post("/signup", data = "<signup>")]
pub async fn api_signup(
    signup: Json<SignupRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    let validated = signup.validate_custom()?;

    register_account(
        db,
        &validated.username,
        &validated.password,
        Role::Student,
        validated
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty()),
    )
    .await?;

    Ok(Status::Created)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateRequest {
    #[validate(length(min = 1, max = 64, message = "Display name must be 1-64 characters"))]
    display_name: Option<String>,
    archived: Option<bool>,
    role: Option<String>,
}

#[put("/admin/users/<id>", data = "<update>")]
pub async fn api_update_user(
    id: i64,
    update: Json<UserUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    user.require_permission(Permission::EditUserRoles)
        .validate_custom()?;

    let update = update.validate_custom()?;

    get_user(db, id).await.validate_custom()?;

    if let Some(display_name) = &update.display_name {
        update_user_display_name(db, id, display_name.trim())
            .await
            .validate_custom()?;
    }

    if let Some(archived) = update.archived {
        set_user_archived(db, id, archived).await.validate_custom()?;
    }

    if let Some(role) = &update.role {
        update_user_role(db, id, role).await.validate_custom()?;
    }

    Ok(Status::Ok)
}

#[get("/admin/users")]
pub async fn api_get_all_users(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserData>>, ApiError> {
    user.require_permission(Permission::ViewAllProgress)
        .validate_custom()?;

    let users = get_all_users(db).await.validate_custom()?;

    Ok(Json(users.into_iter().map(UserData::from).collect()))
}

#[get("/admin/users/<id>/progression")]
pub async fn api_get_user_progression(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<ProgressionState>, ApiError> {
    user.require_permission(Permission::ViewAllProgress)
        .validate_custom()?;

    get_user(db, id).await.validate_custom()?;

    let state = progression
        .load(id)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    Ok(Json(state))
}

#[get("/progression")]
pub async fn api_get_progression(
    user: User,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<ProgressionState>, ApiError> {
    user.require_permission(Permission::ViewOwnProgress)
        .validate_custom()?;

    let state = progression
        .load(user.id)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    Ok(Json(state))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordSessionRequest {
    mode: TimerMode,
    #[validate(range(max = 86_400, message = "Sessions are limited to 24 hours"))]
    elapsed_seconds: u64,
    #[validate(range(max = 86_400, message = "Sessions are limited to 24 hours"))]
    duration_seconds: Option<u64>,
    #[serde(default)]
    completed: bool,
    #[validate(length(max = 100, message = "Subject must be at most 100 characters"))]
    subject: Option<String>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    notes: Option<String>,
}

impl RecordSessionRequest {
    fn reading(&self) -> Result<TimerReading, ApiError> {
        match self.mode {
            TimerMode::Stopwatch => Ok(TimerReading::Stopwatch {
                elapsed_seconds: self.elapsed_seconds,
            }),
            TimerMode::Countdown => match self.duration_seconds {
                Some(duration_seconds) => Ok(TimerReading::Countdown {
                    elapsed_seconds: self.elapsed_seconds,
                    duration_seconds,
                    completed: self.completed,
                }),
                None => Err(Custom(
                    Status::UnprocessableEntity,
                    Json(ValidationResponse::with_error(
                        "durationSeconds",
                        "Countdown sessions need a configured duration",
                    )),
                )),
            },
        }
    }
}

#[post("/sessions", data = "<request>")]
pub async fn api_record_session(
    request: Json<RecordSessionRequest>,
    user: User,
    progression: &State<SqliteProgressionService>,
) -> Result<Custom<Json<RecordedSession>>, ApiError> {
    user.require_permission(Permission::RecordStudySessions)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let reading = validated.reading()?;

    let recorded = progression
        .record_session(user.id, reading, validated.subject, validated.notes)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(recorded)))
}

#[get("/sessions?<limit>")]
pub async fn api_get_sessions(
    limit: Option<u32>,
    user: User,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<Vec<StudySession>>, ApiError> {
    user.require_permission(Permission::ViewOwnProgress)
        .validate_custom()?;

    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let sessions = progression
        .store()
        .recent_study_sessions(user.id, limit)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    Ok(Json(sessions))
}

#[get("/stats/weekly")]
pub async fn api_weekly_stats(
    user: User,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<Vec<DayBucket>>, ApiError> {
    user.require_permission(Permission::ViewOwnProgress)
        .validate_custom()?;

    let today = Utc::now().date_naive();
    let since = (today - Duration::days(WEEK_DAYS - 1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();

    let sessions = progression
        .store()
        .study_sessions_since(user.id, since)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    Ok(Json(weekly_buckets(&sessions, today)))
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_minutes: i64,
    pub total_sessions: i64,
    pub sessions_this_week: i64,
    pub notes_count: i64,
    pub doubts_count: i64,
    pub current_streak: u32,
    pub lifetime_xp: u64,
}

#[get("/stats/summary")]
pub async fn api_stats_summary(
    user: User,
    db: &State<Pool<Sqlite>>,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<StatsSummary>, ApiError> {
    user.require_permission(Permission::ViewOwnProgress)
        .validate_custom()?;

    let state = progression
        .load(user.id)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    let totals = get_study_totals(db, user.id).await.validate_custom()?;

    let now = Utc::now();
    let week_ago = (now - Duration::days(WEEK_DAYS)).naive_utc();
    let sessions_this_week = count_sessions_since(db, user.id, week_ago)
        .await
        .validate_custom()?;

    // A streak can never be longer than the number of distinct days, and
    // anything past a year is not worth scanning.
    let study_days = get_study_days(db, user.id, 366).await.validate_custom()?;

    Ok(Json(StatsSummary {
        total_minutes: totals.total_minutes,
        total_sessions: totals.total_sessions,
        sessions_this_week,
        notes_count: count_generated_materials(db, user.id)
            .await
            .validate_custom()?,
        doubts_count: count_doubts(db, user.id).await.validate_custom()?,
        current_streak: current_streak(&study_days, now.date_naive()),
        lifetime_xp: state.lifetime_xp(),
    }))
}

#[get("/twin")]
pub async fn api_get_twin(
    user: User,
    db: &State<Pool<Sqlite>>,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<TwinView>, ApiError> {
    user.require_permission(Permission::ViewOwnProgress)
        .validate_custom()?;

    let state = progression
        .load(user.id)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    let character_type = get_character_type(db, user.id).await.validate_custom()?;

    Ok(Json(TwinView::new(state, character_type)))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdateRequest {
    character_type: String,
}

#[put("/twin/character", data = "<request>")]
pub async fn api_update_character(
    request: Json<CharacterUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    progression: &State<SqliteProgressionService>,
) -> Result<Json<TwinView>, ApiError> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let character_type = validated.character_type.trim().to_lowercase();

    if !is_known_character(&character_type) {
        return Err(Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error(
                "characterType",
                "Unknown character type",
            )),
        ));
    }

    // Loading first guarantees the row exists before the cosmetic update.
    let state = progression
        .load(user.id)
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    update_character_type(db, user.id, &character_type)
        .await
        .validate_custom()?;

    Ok(Json(TwinView::new(state, character_type)))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateNotesRequest {
    #[validate(custom(function = "not_blank", message = "Topic is required"))]
    topic: String,
    subject: Option<String>,
    #[serde(default)]
    detail_level: DetailLevel,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GeneratedNotesResponse {
    pub notes: String,
}

#[post("/notes/generate", data = "<request>")]
pub async fn api_generate_notes(
    request: Json<GenerateNotesRequest>,
    user: User,
    generator: &State<Arc<dyn TextGenerator>>,
) -> Result<Json<GeneratedNotesResponse>, ApiError> {
    user.require_permission(Permission::UseStudyAssistant)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    info!(
        user_id = user.id,
        detail_level = validated.detail_level.as_str(),
        "Generating study notes"
    );

    let notes = generator
        .generate_text(notes_request(
            &validated.topic,
            validated.subject.as_deref(),
            validated.detail_level,
        ))
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    Ok(Json(GeneratedNotesResponse { notes }))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaveMaterialRequest {
    #[validate(
        length(max = 200, message = "Title must be at most 200 characters"),
        custom(function = "not_blank", message = "Title is required")
    )]
    title: String,
    subject: Option<String>,
    #[validate(custom(function = "not_blank", message = "Content is required"))]
    content: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse {
    pub id: i64,
}

#[post("/notes", data = "<request>")]
pub async fn api_save_notes(
    request: Json<SaveMaterialRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    user.require_permission(Permission::UseStudyAssistant)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let id = create_generated_material(
        db,
        user.id,
        validated.title.trim(),
        validated.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        &validated.content,
        "notes",
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[get("/notes")]
pub async fn api_get_notes(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<GeneratedMaterial>>, ApiError> {
    user.require_permission(Permission::UseStudyAssistant)
        .validate_custom()?;

    let materials = get_generated_materials(db, user.id)
        .await
        .validate_custom()?;

    Ok(Json(materials))
}

#[delete("/notes/<id>")]
pub async fn api_delete_notes(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    user.require_permission(Permission::UseStudyAssistant)
        .validate_custom()?;

    delete_generated_material(db, user.id, id)
        .await
        .validate_custom()?;

    Ok(Status::NoContent)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskDoubtRequest {
    #[validate(custom(function = "not_blank", message = "Question is required"))]
    question: String,
    subject: Option<String>,
    image_base64: Option<String>,
    image_url: Option<String>,
}

#[post("/doubts", data = "<request>")]
pub async fn api_ask_doubt(
    request: Json<AskDoubtRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    generator: &State<Arc<dyn TextGenerator>>,
) -> Result<Custom<Json<Doubt>>, ApiError> {
    user.require_permission(Permission::UseStudyAssistant)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let subject = validated
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    info!(
        user_id = user.id,
        with_image = validated.image_base64.is_some(),
        "Answering doubt"
    );

    let answer = generator
        .generate_text(doubt_request(
            &validated.question,
            subject,
            validated.image_base64.as_deref(),
        ))
        .await
        .map_err(AppError::from)
        .validate_custom()?;

    let doubt = create_doubt(
        db,
        user.id,
        validated.question.trim(),
        &answer,
        subject,
        validated.image_url.as_deref(),
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(doubt)))
}

#[get("/doubts")]
pub async fn api_get_doubts(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Doubt>>, ApiError> {
    user.require_permission(Permission::UseStudyAssistant)
        .validate_custom()?;

    let doubts = get_doubts(db, user.id).await.validate_custom()?;

    Ok(Json(doubts))
}
