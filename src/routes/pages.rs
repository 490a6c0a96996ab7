use chrono::Utc;
use rocket::State;
use rocket_dyn_templates::{Template, context};

use crate::queue;
use crate::registry;
use crate::state::AppState;

#[get("/")]
pub async fn dashboard(state: &State<AppState>) -> Template {
    let pool = state.db_pool.clone();

    let (all_devices, queued) = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return (Vec::new(), 0),
        };
        let devices = registry::list(&mut conn).unwrap_or_default();
        let queued = queue::queued_depth(&mut conn).unwrap_or(0);
        (devices, queued)
    })
    .await
    .unwrap_or_default();

    Template::render(
        "dashboard",
        context! {
            devices: all_devices,
            queued: queued,
            now: Utc::now().naive_utc(),
        },
    )
}
