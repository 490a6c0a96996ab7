use rocket::Route;

pub mod commands;
pub mod devices;
pub mod history;
pub mod pages;
pub mod settings;

/// API routes
pub fn api_routes() -> Vec<Route> {
    routes![
        // Devices
        devices::register_device,
        devices::update_push_token,
        devices::get_devices,
        devices::get_device_details,

        // Device-facing command delivery
        commands::next_command,
        commands::report_command_result,

        // Administrative command queue
        commands::submit_command,
        commands::list_commands,
        commands::cancel_command,

        // History
        history::api_history,

        // Settings
        settings::view_settings,
        settings::update_settings,
    ]
}

/// Page routes
pub fn page_routes() -> Vec<Route> {
    routes![pages::dashboard]
}
