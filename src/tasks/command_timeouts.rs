use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use log::{info, warn};
use rocket::tokio;
use std::time::Duration;

use crate::db;
use crate::lifecycle::{self, CommandStatus};
use crate::models::Command;
use crate::queue;
use crate::state::AppState;

const SWEEP_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that re-queues or expires commands whose reply
/// never arrived within the policy window.
pub fn spawn_command_timeout_sweeper(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;

            let window = state.settings.read().unwrap().sent_timeout_seconds;
            let pool = state.db_pool.clone();

            let _ = tokio::task::spawn_blocking(move || {
                let mut conn = pool.get().ok()?;
                match sweep_timeouts(&mut conn, window) {
                    Ok(0) => {}
                    Ok(n) => info!("timeout sweeper transitioned {n} command(s)"),
                    Err(e) => warn!("timeout sweep failed: {e}"),
                }
                Some(())
            })
            .await;
        }
    });
}

/// Apply the timeout transition to every `sent` command older than the
/// window: decrement the budget and re-queue, or expire when nothing is
/// left. Each update is conditional on the row still being `sent`, so a
/// reply landing mid-sweep wins.
pub fn sweep_timeouts(conn: &mut SqliteConnection, window_seconds: i64) -> QueryResult<usize> {
    use crate::schema::commands::dsl::*;

    let now = Utc::now().naive_utc();
    let cutoff = now - ChronoDuration::seconds(window_seconds);

    let overdue = commands
        .filter(status.eq(CommandStatus::Sent.as_str()))
        .filter(sent_at.le(cutoff))
        .select(Command::as_select())
        .load::<Command>(conn)?;

    let mut transitioned = 0;
    for cmd in overdue {
        let disposition = lifecycle::timeout_disposition(cmd.ttl);
        if queue::apply_disposition(conn, cmd.id, disposition, now)? == 0 {
            continue;
        }
        transitioned += 1;

        let device_udid = device_udid_for(conn, cmd.device_id)?;
        let event = if disposition.status == CommandStatus::Expired {
            "expired"
        } else {
            "timeout"
        };
        db::log_history(
            conn,
            Some(&cmd.uuid),
            device_udid.as_deref(),
            event,
            Some("no reply within policy window"),
        )?;
    }

    Ok(transitioned)
}

fn device_udid_for(conn: &mut SqliteConnection, target: i32) -> QueryResult<Option<String>> {
    use crate::schema::devices::dsl::*;

    devices
        .filter(id.eq(target))
        .select(udid)
        .first::<String>(conn)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{self, EngineConfig};
    use crate::db::testing;
    use crate::models::{EnqueueRequest, RegisterRequest};
    use crate::registry;

    const CONFIG: EngineConfig = EngineConfig {
        default_ttl: 5,
        push_failure_threshold: 5,
        push_enabled: false,
    };

    fn setup(conn: &mut SqliteConnection, ttl: i32) -> String {
        let req = RegisterRequest {
            udid: "UDID-A".to_string(),
            serial_number: None,
            device_name: None,
            model: None,
            os_version: None,
            push_token: None,
        };
        registry::register(conn, &req).unwrap();

        let (cmd, _) = coordinator::enqueue_on(
            conn,
            &EnqueueRequest {
                udid: "UDID-A".to_string(),
                request_type: "DeviceInformation".to_string(),
                parameters: None,
                after: None,
                ttl: Some(ttl),
            },
            CONFIG,
        )
        .unwrap();
        coordinator::contact_on(conn, "UDID-A").unwrap().unwrap();
        cmd.uuid
    }

    fn backdate_sent(conn: &mut SqliteConnection, command_uuid: &str, seconds: i64) {
        use crate::schema::commands::dsl::*;
        let past = Utc::now().naive_utc() - ChronoDuration::seconds(seconds);
        diesel::update(commands.filter(uuid.eq(command_uuid)))
            .set(sent_at.eq(past))
            .execute(conn)
            .unwrap();
    }

    fn status_of(conn: &mut SqliteConnection, command_uuid: &str) -> (String, i32) {
        let cmd = crate::queue::find_by_uuid(conn, command_uuid).unwrap().unwrap();
        (cmd.status, cmd.ttl)
    }

    #[test]
    fn overdue_sent_command_is_requeued_with_decremented_ttl() {
        let mut conn = testing::conn();
        let uuid = setup(&mut conn, 3);
        backdate_sent(&mut conn, &uuid, 7200);

        assert_eq!(sweep_timeouts(&mut conn, 3600).unwrap(), 1);
        assert_eq!(status_of(&mut conn, &uuid), ("queued".to_string(), 2));

        // the command is deliverable again on the next contact
        let delivered = coordinator::contact_on(&mut conn, "UDID-A").unwrap().unwrap();
        assert_eq!(delivered.uuid, uuid);
    }

    #[test]
    fn overdue_command_with_exhausted_budget_expires() {
        let mut conn = testing::conn();
        let uuid = setup(&mut conn, 1);
        backdate_sent(&mut conn, &uuid, 7200);

        assert_eq!(sweep_timeouts(&mut conn, 3600).unwrap(), 1);
        assert_eq!(status_of(&mut conn, &uuid), ("expired".to_string(), 0));
    }

    #[test]
    fn fresh_sent_commands_are_left_alone() {
        let mut conn = testing::conn();
        let uuid = setup(&mut conn, 3);

        assert_eq!(sweep_timeouts(&mut conn, 3600).unwrap(), 0);
        assert_eq!(status_of(&mut conn, &uuid), ("sent".to_string(), 3));
    }
}
