use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use log::{info, warn};
use rocket::tokio;
use std::time::Duration;

use crate::db;
use crate::models::Device;
use crate::state::AppState;

const SWEEP_INTERVAL_SECS: u64 = 60;

/// Spawn a background task that ages out wake signals whose transport
/// verdict never arrived and that no device contact superseded. Such a
/// signal counts as a failed push; clearing the slot lets the next enqueue
/// try again.
pub fn spawn_push_sweeper(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;

            let stale_after = state.settings.read().unwrap().push_resend_seconds;
            let pool = state.db_pool.clone();

            let _ = tokio::task::spawn_blocking(move || {
                let mut conn = pool.get().ok()?;
                match sweep_stale_pushes(&mut conn, stale_after) {
                    Ok(0) => {}
                    Ok(n) => info!("push sweeper aged out {n} stale signal(s)"),
                    Err(e) => warn!("push sweep failed: {e}"),
                }
                Some(())
            })
            .await;
        }
    });
}

/// Treat every wake signal outstanding longer than `stale_seconds` as a
/// delivery failure: bump the failure counter and release the slot.
pub fn sweep_stale_pushes(conn: &mut SqliteConnection, stale_seconds: i64) -> QueryResult<usize> {
    use crate::schema::devices::dsl::*;

    let cutoff = Utc::now().naive_utc() - ChronoDuration::seconds(stale_seconds);

    let stale = devices
        .filter(last_push_at.le(cutoff))
        .select(Device::as_select())
        .load::<Device>(conn)?;

    for device in &stale {
        diesel::update(devices.filter(id.eq(device.id)))
            .set((
                last_push_at.eq(None::<chrono::NaiveDateTime>),
                last_push_id.eq(None::<String>),
                failed_push_count.eq(failed_push_count + 1),
            ))
            .execute(conn)?;

        db::log_history(
            conn,
            None,
            Some(&device.udid),
            "push_stale",
            device.last_push_id.as_deref(),
        )?;
    }

    Ok(stale.len())
}
