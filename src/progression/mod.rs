pub mod leveling;
pub mod recorder;
pub mod service;
pub mod sqlite;
pub mod store;

pub use leveling::{LevelUpdate, ProgressionState, apply_xp, threshold_for_level};
pub use recorder::{NewStudySession, TimerMode, TimerReading};
pub use service::{ProgressionService, RecordedSession, RetryPolicy};
pub use sqlite::SqliteStore;
pub use store::{CommitReceipt, ProgressionStore, SessionHistory, StoredProgression};

pub type SqliteProgressionService = ProgressionService<SqliteStore>;
