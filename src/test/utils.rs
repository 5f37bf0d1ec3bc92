#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::create_user;
    use crate::error::AppError;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Once;
    use std::time::Duration;
    use uuid::Uuid;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        file_connections: Option<u32>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn student(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Student,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn admin(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Admin,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        /// Backs the database with a temporary WAL file so several pooled
        /// connections share it and genuinely contend for writes.
        pub fn on_disk(mut self, max_connections: u32) -> Self {
            self.file_connections = Some(max_connections);
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::Builder::from_env(
                    env_logger::Env::default().default_filter_or("debug"),
                )
                .is_test(true)
                .try_init();
            });

            let (pool, db_file) = match self.file_connections {
                Some(max_connections) => {
                    let path = std::env::temp_dir()
                        .join(format!("study-twin-test-{}.db", Uuid::new_v4().simple()));
                    let options = SqliteConnectOptions::new()
                        .filename(&path)
                        .create_if_missing(true)
                        .journal_mode(SqliteJournalMode::Wal)
                        .busy_timeout(Duration::from_secs(10));
                    let pool = SqlitePoolOptions::new()
                        .max_connections(max_connections)
                        .connect_with(options)
                        .await?;
                    (pool, Some(path))
                }
                None => {
                    // Every pooled connection to `sqlite::memory:` is its own
                    // database, so the pool is pinned to one connection.
                    let pool = SqlitePoolOptions::new()
                        .max_connections(1)
                        .connect("sqlite::memory:")
                        .await?;
                    (pool, None)
                }
            };

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role.as_str(),
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                db_file,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        db_file: Option<PathBuf>,
    }

    impl Drop for TestDb {
        fn drop(&mut self) {
            if let Some(path) = &self.db_file {
                for suffix in ["", "-wal", "-shm"] {
                    let mut file = path.clone().into_os_string();
                    file.push(suffix);
                    let _ = std::fs::remove_file(file);
                }
            }
        }
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin_user", Some("Admin User"))
            .student("student_user", Some("Student User"))
            .student("other_student", Some("Other Student"))
            .build()
            .await
            .expect("Failed to build standard test database")
    }
}

#[cfg(test)]
pub mod test_utils {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use rocket::http::{ContentType, Cookie};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use crate::ai::{TextGenerator, TextRequest};
    use crate::env::AppConfig;
    use crate::error::{GenerationError, ProgressionError};
    use crate::init_rocket;
    use crate::models::StudySession;
    use crate::progression::{
        CommitReceipt, NewStudySession, ProgressionState, ProgressionStore, RetryPolicy,
        SessionHistory, StoredProgression, apply_xp,
    };

    pub use super::test_db::{TestDb, TestDbBuilder, create_standard_test_db};

    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ai_gateway_url: "http://127.0.0.1:9/unused".to_string(),
            ai_api_key: None,
            ai_model: "test-model".to_string(),
            retry: fast_retry(5),
            session_ttl_hours: 1,
            admin: None,
        }
    }

    pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[derive(Debug, Clone)]
    pub enum Script {
        Reply(String),
        RateLimited,
        CreditsExhausted,
        Fail,
    }

    /// Text generator double that answers from a script and remembers what it
    /// was asked.
    pub struct ScriptedGenerator {
        script: Script,
        requests: Mutex<Vec<TextRequest>>,
    }

    impl ScriptedGenerator {
        pub fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn replying(text: &str) -> Arc<Self> {
            Self::new(Script::Reply(text.to_string()))
        }

        pub fn requests(&self) -> Vec<TextRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[rocket::async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate_text(&self, request: TextRequest) -> Result<String, GenerationError> {
            self.requests.lock().unwrap().push(request);

            match &self.script {
                Script::Reply(text) => Ok(text.clone()),
                Script::RateLimited => Err(GenerationError::RateLimited),
                Script::CreditsExhausted => Err(GenerationError::CreditsExhausted),
                Script::Fail => Err(GenerationError::Other("backend exploded".to_string())),
            }
        }
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        setup_test_client_with_generator(test_db, ScriptedGenerator::replying("# Notes")).await
    }

    pub async fn setup_test_client_with_generator(
        test_db: TestDb,
        generator: Arc<dyn TextGenerator>,
    ) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), test_config(), generator).await;

        let client = Client::untracked(rocket)
            .await
            .expect("Failed to create Rocket client");

        (client, test_db)
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        response
            .cookies()
            .iter()
            .map(|cookie| cookie.clone().into_owned())
            .collect()
    }

    #[derive(Default)]
    struct MemoryInner {
        rows: HashMap<i64, StoredProgression>,
        sessions: Vec<StudySession>,
    }

    /// In-memory `ProgressionStore` whose failures can be scripted.
    ///
    /// `interfere(n, delta)` makes the next `n` compare-and-swap calls find a
    /// foreign write of `delta` XP already applied, exactly as if another
    /// request had won the race. `fail_writes` makes every write fail before
    /// touching anything.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<MemoryInner>,
        interfering_writes: AtomicU32,
        interfering_delta: Mutex<u64>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        write_attempts: AtomicU32,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, user_id: i64, row: StoredProgression) {
            self.inner.lock().unwrap().rows.insert(user_id, row);
        }

        pub fn row(&self, user_id: i64) -> Option<StoredProgression> {
            self.inner.lock().unwrap().rows.get(&user_id).copied()
        }

        pub fn sessions_for(&self, user_id: i64) -> Vec<StudySession> {
            self.inner
                .lock()
                .unwrap()
                .sessions
                .iter()
                .filter(|s| s.user_id == user_id)
                .cloned()
                .collect()
        }

        pub fn interfere(&self, writes: u32, delta: u64) {
            *self.interfering_delta.lock().unwrap() = delta;
            self.interfering_writes.store(writes, Ordering::SeqCst);
        }

        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn write_attempts(&self) -> u32 {
            self.write_attempts.load(Ordering::SeqCst)
        }

        fn unavailable() -> ProgressionError {
            ProgressionError::StoreUnavailable("memory store offline".to_string())
        }

        fn push_session(
            inner: &mut MemoryInner,
            user_id: i64,
            session: &NewStudySession,
        ) -> i64 {
            let id = inner.sessions.len() as i64 + 1;
            inner.sessions.push(StudySession {
                id,
                user_id,
                duration_minutes: session.duration_minutes,
                timer_mode: session.timer_mode,
                target_duration_minutes: session.target_duration_minutes,
                subject: session.subject.clone(),
                notes: session.notes.clone(),
                xp_earned: session.xp_earned,
                created_at: Utc::now(),
            });
            id
        }
    }

    #[rocket::async_trait]
    impl ProgressionStore for MemoryStore {
        async fn get_progression_state(
            &self,
            user_id: i64,
        ) -> Result<Option<StoredProgression>, ProgressionError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }

            let snapshot = self.row(user_id);
            // Hand control back so concurrent callers can read the same version.
            rocket::tokio::task::yield_now().await;
            Ok(snapshot)
        }

        async fn create_progression_state(
            &self,
            user_id: i64,
            defaults: ProgressionState,
        ) -> Result<StoredProgression, ProgressionError> {
            let mut inner = self.inner.lock().unwrap();
            let row = inner
                .rows
                .entry(user_id)
                .or_insert_with(|| StoredProgression::from_state(defaults, 0));
            Ok(*row)
        }

        async fn update_progression_state_if_unchanged(
            &self,
            user_id: i64,
            expected_version: i64,
            new_state: ProgressionState,
            session: Option<&NewStudySession>,
        ) -> Result<CommitReceipt, ProgressionError> {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);

            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }

            let mut inner = self.inner.lock().unwrap();

            let pending = self.interfering_writes.load(Ordering::SeqCst);
            if pending > 0 {
                self.interfering_writes.store(pending - 1, Ordering::SeqCst);
                let delta = *self.interfering_delta.lock().unwrap();
                if let Some(row) = inner.rows.get_mut(&user_id) {
                    let foreign = apply_xp(
                        row.checked().unwrap_or_default(),
                        delta,
                    );
                    *row = StoredProgression::from_state(foreign.state, row.version + 1);
                }
            }

            let current = inner
                .rows
                .get(&user_id)
                .copied()
                .ok_or_else(|| ProgressionError::StoreUnavailable("missing row".to_string()))?;

            if current.version != expected_version {
                return Err(ProgressionError::WriteConflict { user_id });
            }

            let version = expected_version + 1;
            inner
                .rows
                .insert(user_id, StoredProgression::from_state(new_state, version));

            let session_id = session.map(|s| Self::push_session(&mut inner, user_id, s));

            Ok(CommitReceipt {
                version,
                session_id,
            })
        }
    }

    #[rocket::async_trait]
    impl SessionHistory for MemoryStore {
        async fn append_study_session(
            &self,
            user_id: i64,
            session: &NewStudySession,
        ) -> Result<i64, ProgressionError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }

            let mut inner = self.inner.lock().unwrap();
            Ok(Self::push_session(&mut inner, user_id, session))
        }

        async fn recent_study_sessions(
            &self,
            user_id: i64,
            limit: u32,
        ) -> Result<Vec<StudySession>, ProgressionError> {
            let mut sessions = self.sessions_for(user_id);
            sessions.reverse();
            sessions.truncate(limit as usize);
            Ok(sessions)
        }

        async fn study_sessions_since(
            &self,
            user_id: i64,
            since: DateTime<Utc>,
        ) -> Result<Vec<StudySession>, ProgressionError> {
            Ok(self
                .sessions_for(user_id)
                .into_iter()
                .filter(|s| s.created_at >= since)
                .collect())
        }
    }
}
