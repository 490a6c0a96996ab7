use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{commands, devices, history_log};

#[derive(Queryable, Identifiable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = devices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Device {
    pub id: i32,
    pub udid: String,
    pub serial_number: Option<String>,
    pub device_name: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub enrolled: bool,
    pub push_token: Option<String>,
    pub last_seen: Option<NaiveDateTime>,
    pub last_push_at: Option<NaiveDateTime>,
    pub last_push_id: Option<String>,
    pub failed_push_count: i32,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = devices)]
pub struct NewDevice {
    pub udid: String,
    pub serial_number: Option<String>,
    pub device_name: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub enrolled: bool,
    pub push_token: Option<String>,
    pub last_seen: Option<NaiveDateTime>,
}

#[derive(Queryable, Identifiable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = commands)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Command {
    pub id: i32,
    pub uuid: String,
    pub device_id: i32,
    pub request_type: String,
    pub parameters: Option<String>,
    pub status: String,
    pub queued_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub after: Option<NaiveDateTime>,
    pub ttl: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = commands)]
pub struct NewCommand {
    pub uuid: String,
    pub device_id: i32,
    pub request_type: String,
    pub parameters: Option<String>,
    pub status: String,
    pub queued_at: NaiveDateTime,
    pub after: Option<NaiveDateTime>,
    pub ttl: i32,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = history_log)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HistoryRecord {
    pub id: i32,
    pub command_uuid: Option<String>,
    pub device_udid: Option<String>,
    pub event: String,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = history_log)]
pub struct NewHistoryRecord {
    pub command_uuid: Option<String>,
    pub device_udid: Option<String>,
    pub event: String,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}

impl NewHistoryRecord {
    pub fn new(
        command_uuid: Option<String>,
        device_udid: Option<String>,
        event: String,
        details: Option<String>,
    ) -> Self {
        Self {
            command_uuid,
            device_udid,
            event,
            details,
            created_at: Utc::now().naive_utc(),
        }
    }
}

/// Enrollment payload posted by a device when it registers or re-registers.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub udid: String,
    pub serial_number: Option<String>,
    pub device_name: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub push_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PushTokenRequest {
    pub push_token: String,
}

/// Administrator enqueue payload.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub udid: String,
    pub request_type: String,
    pub parameters: Option<serde_json::Value>,
    /// Earliest dispatch time; omitted means immediately eligible.
    pub after: Option<NaiveDateTime>,
    /// Dispatch attempts before the command expires; server default if omitted.
    pub ttl: Option<i32>,
}

/// Reply posted by a device for a previously delivered command.
#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub uuid: String,
    pub status: String,
    pub response: Option<serde_json::Value>,
}

/// The device-facing rendering of a dispatched command.
#[derive(Debug, Serialize, PartialEq)]
pub struct DeliveredCommand {
    pub uuid: String,
    pub request_type: String,
    pub parameters: Option<serde_json::Value>,
}

impl DeliveredCommand {
    pub fn from_command(cmd: &Command) -> Self {
        Self {
            uuid: cmd.uuid.clone(),
            request_type: cmd.request_type.clone(),
            parameters: cmd
                .parameters
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }
}
