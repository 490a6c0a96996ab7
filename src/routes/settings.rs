use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::Deserialize;

use crate::db;
use crate::settings::ServerSettings;
use crate::state::AppState;

/// Partial update payload; omitted fields keep their current value
#[derive(Debug, Deserialize)]
pub struct ServerSettingsUpdate {
    pub default_command_ttl: Option<i32>,
    pub sent_timeout_seconds: Option<i64>,
    pub push_failure_threshold: Option<i32>,
    pub push_resend_seconds: Option<i64>,
    pub push_gateway_url: Option<String>,
}

/// VIEW SETTINGS
#[get("/api/settings")]
pub async fn view_settings(state: &State<AppState>) -> Json<ServerSettings> {
    let settings = state.settings.read().unwrap().clone();
    Json(settings)
}

/// UPDATE SETTINGS
#[post("/api/settings", data = "<update>")]
pub async fn update_settings(
    state: &State<AppState>,
    update: Json<ServerSettingsUpdate>,
) -> Result<Json<ServerSettings>, Status> {
    let pool = state.db_pool.clone();
    let shared_settings = state.settings.clone();
    let update = update.into_inner();

    let settings = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| Status::InternalServerError)?;

        let mut settings = db::load_settings(&mut conn).map_err(|_| Status::InternalServerError)?;

        if let Some(v) = update.default_command_ttl {
            settings.default_command_ttl = v;
        }
        if let Some(v) = update.sent_timeout_seconds {
            settings.sent_timeout_seconds = v;
        }
        if let Some(v) = update.push_failure_threshold {
            settings.push_failure_threshold = v;
        }
        if let Some(v) = update.push_resend_seconds {
            settings.push_resend_seconds = v;
        }
        if let Some(v) = update.push_gateway_url {
            settings.push_gateway_url = v;
        }

        db::save_settings(&mut conn, &settings).map_err(|_| Status::InternalServerError)?;

        // Update shared in-memory settings
        if let Ok(mut guard) = shared_settings.write() {
            *guard = settings.clone();
        }

        let _ = db::log_history(
            &mut conn,
            None,
            None,
            "update_settings",
            Some("Updated server settings"),
        );

        Ok(settings)
    })
    .await
    .map_err(|_| Status::InternalServerError)??;

    Ok(Json(settings))
}
