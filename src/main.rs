#[macro_use]
extern crate rocket;

use std::sync::{Arc, RwLock};

use anyhow::Result;
use rocket::fairing::AdHoc;
use rocket_dyn_templates::Template;

mod coordinator;
mod db;
mod lifecycle;
mod models;
mod push;
mod queue;
mod registry;
mod routes;
mod schema;
mod settings;
mod state;
mod tasks;

use coordinator::DeliveryCoordinator;
use push::{HttpPushGateway, PushGateway};
use settings::ServerSettings;
use state::AppState;

fn build_state() -> Result<AppState> {
    let pool = db::init_pool();
    let mut conn = pool.get()?;
    db::run_migrations(&mut conn);
    let settings = Arc::new(RwLock::new(ServerSettings::load(&mut conn)));
    drop(conn);

    let gateway_url = settings.read().unwrap().push_gateway_url.clone();
    let gateway: Arc<dyn PushGateway> = Arc::new(HttpPushGateway::new(gateway_url));
    let coordinator = Arc::new(DeliveryCoordinator::new(
        pool.clone(),
        gateway,
        settings.clone(),
    ));

    Ok(AppState {
        db_pool: pool,
        settings,
        coordinator,
    })
}

#[launch]
fn rocket() -> _ {
    db::init_logger();

    let app_state = build_state().expect("server initialization failed");

    rocket::build()
        .manage(app_state)
        .mount("/", routes::api_routes())
        .mount("/", routes::page_routes())
        .attach(Template::fairing())
        .attach(AdHoc::on_liftoff("background sweepers", |rocket| {
            Box::pin(async move {
                let state = rocket
                    .state::<AppState>()
                    .expect("app state is managed")
                    .clone();
                tasks::spawn_command_timeout_sweeper(state.clone());
                tasks::spawn_push_sweeper(state);
            })
        }))
}
