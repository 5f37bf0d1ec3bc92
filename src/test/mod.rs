mod config;
mod stats;
pub mod utils;

pub use utils::{test_db, test_utils};
