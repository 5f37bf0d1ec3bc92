#[macro_use]
extern crate rocket;

mod ai;
mod api;
mod auth;
mod db;
mod env;
mod error;
mod models;
mod progression;
mod stats;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use std::sync::Arc;

use ai::{GatewayTextGenerator, TextGenerator};
use api::{
    api_ask_doubt, api_change_password, api_delete_notes, api_generate_notes, api_get_all_users,
    api_get_doubts, api_get_notes, api_get_progression, api_get_sessions, api_get_twin,
    api_get_user_progression, api_login, api_logout, api_me, api_me_unauthorized,
    api_record_session, api_register_user, api_save_notes, api_signup, api_stats_summary,
    api_update_character, api_update_profile, api_update_user, api_weekly_stats, health,
};
use auth::{forbidden_api, unauthorized_api};
use db::{clean_expired_sessions, ensure_admin};
use env::{AppConfig, load_environment};
use progression::{ProgressionService, SqliteStore};
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use telemetry::{TelemetryFairing, init_tracing};
use tracing::{error, info};

const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(
                SESSION_CLEANUP_INTERVAL_SECS,
            ))
            .await;
        }
    });
}

#[launch]
async fn rocket() -> _ {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            panic!("Invalid configuration: {:#}", e);
        }
    };

    let pool = match SqlitePool::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to SQLite database: {}", e);
            panic!("Failed to connect to SQLite database: {}", e);
        }
    };

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    if let Some(admin) = &config.admin {
        match ensure_admin(&pool, &admin.username, &admin.password).await {
            Ok(true) => info!(username = %admin.username, "Created bootstrap admin"),
            Ok(false) => info!(username = %admin.username, "Bootstrap admin already exists"),
            Err(e) => {
                error!("Failed to create bootstrap admin: {}", e);
                panic!("Failed to create bootstrap admin: {}", e);
            }
        }
    }

    spawn_session_cleanup(pool.clone());

    let generator: Arc<dyn TextGenerator> = Arc::new(GatewayTextGenerator::new(
        &config.ai_gateway_url,
        config.ai_api_key.clone(),
        &config.ai_model,
    ));

    init_rocket(pool, config, generator).await
}

pub async fn init_rocket(
    pool: SqlitePool,
    config: AppConfig,
    generator: Arc<dyn TextGenerator>,
) -> Rocket<Build> {
    info!("Starting study twin");

    let progression = ProgressionService::new(SqliteStore::new(pool.clone()), config.retry);

    rocket::build()
        .manage(pool)
        .manage(progression)
        .manage(generator)
        .manage(config)
        .mount(
            "/api",
            routes![
                health,
                api_login,
                api_logout,
                api_me,
                api_me_unauthorized,
                api_update_profile,
                api_change_password,
                api_register_user,
                api_signup,
                api_update_user,
                api_get_all_users,
                api_get_user_progression,
                api_get_progression,
                api_record_session,
                api_get_sessions,
                api_weekly_stats,
                api_stats_summary,
                api_get_twin,
                api_update_character,
                api_generate_notes,
                api_save_notes,
                api_get_notes,
                api_delete_notes,
                api_ask_doubt,
                api_get_doubts,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
