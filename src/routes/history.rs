use diesel::prelude::*;
use rocket::State;
use rocket::serde::json::Json;

use crate::models::HistoryRecord;
use crate::schema::history_log::dsl::*;
use crate::state::AppState;

#[get("/api/history")]
pub async fn api_history(
    state: &State<AppState>,
) -> Result<Json<serde_json::Value>, rocket::http::Status> {
    let pool = state.db_pool.clone();

    let rows = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|_| rocket::http::Status::InternalServerError)?;
        history_log
            .order(created_at.desc())
            .limit(500)
            .select(HistoryRecord::as_select())
            .load::<HistoryRecord>(&mut conn)
            .map_err(|_| rocket::http::Status::InternalServerError)
    })
    .await
    .map_err(|_| rocket::http::Status::InternalServerError)??;

    Ok(Json(serde_json::json!({ "history": rows })))
}
