use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};

use crate::db;

/// Struct for server settings
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerSettings {
    /// Dispatch attempts a command gets when the enqueue request omits one.
    pub default_command_ttl: i32,
    /// How long a `sent` command may wait for its reply before the timeout
    /// sweeper re-queues it.
    pub sent_timeout_seconds: i64,
    /// Once this many wake signals have failed in a row the device is no
    /// longer pushed to automatically; its queue stays intact.
    pub push_failure_threshold: i32,
    /// An outstanding wake signal older than this with no resolution and no
    /// contact counts as a failed push.
    pub push_resend_seconds: i64,
    /// Wake-signal gateway endpoint; empty disables pushes entirely.
    pub push_gateway_url: String,
}

impl ServerSettings {
    /// Load settings from DB, fallback to default
    pub fn load(conn: &mut SqliteConnection) -> Self {
        db::load_settings(conn).unwrap_or_else(|_| Self::default())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            default_command_ttl: 5,
            sent_timeout_seconds: 3600,
            push_failure_threshold: 5,
            push_resend_seconds: 86400,
            push_gateway_url: String::new(),
        }
    }
}
