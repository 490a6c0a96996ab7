use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use flexi_logger::{Age, Cleanup, Criterion, FileSpec, Logger, Naming};
use std::env;

use crate::models::NewHistoryRecord;
use crate::settings::ServerSettings;
use crate::schema::history_log;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Initialize logger
pub fn init_logger() {
    Logger::try_with_str("info")
        .unwrap()
        .log_to_file(FileSpec::default().directory("logs"))
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Numbers,
            Cleanup::KeepLogFiles(7),
        )
        .start()
        .unwrap();
}

/// Initialize DB connection pool
pub fn init_pool() -> DbPool {
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "commandpilot.db".to_string());
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .expect("Failed to create DB pool")
}

/// Get a single connection from the pool
pub fn get_conn(pool: &DbPool) -> DbConn {
    pool.get().expect("Failed to get DB connection")
}

/// Apply pending embedded migrations
pub fn run_migrations(conn: &mut SqliteConnection) {
    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run migrations");
}

/// Append a command/device event to the history log
pub fn log_history(
    conn: &mut SqliteConnection,
    command_uuid: Option<&str>,
    device_udid: Option<&str>,
    event: &str,
    details: Option<&str>,
) -> Result<(), diesel::result::Error> {
    let record = NewHistoryRecord::new(
        command_uuid.map(str::to_string),
        device_udid.map(str::to_string),
        event.to_string(),
        details.map(str::to_string),
    );

    diesel::insert_into(history_log::table)
        .values(&record)
        .execute(conn)?;

    Ok(())
}

/// Get current server settings from DB
pub fn load_settings(conn: &mut SqliteConnection) -> Result<ServerSettings, diesel::result::Error> {
    use crate::schema::server_settings::dsl::*;

    let row = server_settings.first::<ServerSettingsRow>(conn).optional()?;

    Ok(match row {
        Some(s) => ServerSettings {
            default_command_ttl: s.default_command_ttl,
            sent_timeout_seconds: s.sent_timeout_seconds,
            push_failure_threshold: s.push_failure_threshold,
            push_resend_seconds: s.push_resend_seconds,
            push_gateway_url: s.push_gateway_url,
        },
        None => ServerSettings::default(),
    })
}

/// Save server settings to DB (insert or update)
pub fn save_settings(
    conn: &mut SqliteConnection,
    settings: &ServerSettings,
) -> Result<(), diesel::result::Error> {
    use crate::schema::server_settings::dsl::*;

    let existing = server_settings.first::<ServerSettingsRow>(conn).optional()?;

    if let Some(row) = existing {
        diesel::update(server_settings.filter(id.eq(row.id)))
            .set((
                default_command_ttl.eq(settings.default_command_ttl),
                sent_timeout_seconds.eq(settings.sent_timeout_seconds),
                push_failure_threshold.eq(settings.push_failure_threshold),
                push_resend_seconds.eq(settings.push_resend_seconds),
                push_gateway_url.eq(&settings.push_gateway_url),
            ))
            .execute(conn)?;
    } else {
        diesel::insert_into(server_settings)
            .values((
                default_command_ttl.eq(settings.default_command_ttl),
                sent_timeout_seconds.eq(settings.sent_timeout_seconds),
                push_failure_threshold.eq(settings.push_failure_threshold),
                push_resend_seconds.eq(settings.push_resend_seconds),
                push_gateway_url.eq(&settings.push_gateway_url),
            ))
            .execute(conn)?;
    }

    Ok(())
}

/// Struct representing a row in server_settings
#[derive(Queryable)]
pub struct ServerSettingsRow {
    pub id: i32,
    pub default_command_ttl: i32,
    pub sent_timeout_seconds: i64,
    pub push_failure_threshold: i32,
    pub push_resend_seconds: i64,
    pub push_gateway_url: String,
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Fresh in-memory database with the full schema applied.
    pub fn conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:")
            .expect("in-memory sqlite");
        run_migrations(&mut conn);
        conn
    }
}
