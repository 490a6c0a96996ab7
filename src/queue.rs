use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::lifecycle::{CommandStatus, Disposition};
use crate::models::{Command, NewCommand};

/// What the queue selector found for a device.
#[derive(Debug)]
pub enum Selection {
    /// A command is already out with the device; re-deliver it verbatim.
    Outstanding(Command),
    /// The oldest eligible queued command, not yet dispatched.
    Eligible(Command),
    Nothing,
}

/// Persist a freshly enqueued command at the tail of the device's queue.
pub fn insert(
    conn: &mut SqliteConnection,
    target_device_id: i32,
    req_type: &str,
    params: Option<&serde_json::Value>,
    eligible_after: Option<NaiveDateTime>,
    dispatch_ttl: i32,
    now: NaiveDateTime,
) -> QueryResult<Command> {
    use crate::schema::commands::dsl::*;

    let new_command = NewCommand {
        uuid: Uuid::new_v4().to_string(),
        device_id: target_device_id,
        request_type: req_type.to_string(),
        parameters: params.map(|value| value.to_string()),
        status: CommandStatus::Queued.as_str().to_string(),
        queued_at: now,
        after: eligible_after,
        ttl: dispatch_ttl,
    };

    diesel::insert_into(commands)
        .values(&new_command)
        .execute(conn)?;

    commands
        .filter(uuid.eq(&new_command.uuid))
        .select(Command::as_select())
        .first::<Command>(conn)
}

/// Pick the next command for a device.
///
/// An outstanding `sent` command always wins: the device-side protocol
/// allows a single in-flight request, so nothing else may be dispatched
/// until it resolves. Otherwise the oldest `queued` command whose `after`
/// constraint has passed is eligible, in insertion order.
pub fn select_next(
    conn: &mut SqliteConnection,
    target_device_id: i32,
    now: NaiveDateTime,
) -> QueryResult<Selection> {
    use crate::schema::commands::dsl::*;

    let outstanding = commands
        .filter(device_id.eq(target_device_id))
        .filter(status.eq(CommandStatus::Sent.as_str()))
        .order(id.asc())
        .select(Command::as_select())
        .first::<Command>(conn)
        .optional()?;

    if let Some(cmd) = outstanding {
        return Ok(Selection::Outstanding(cmd));
    }

    let eligible = commands
        .filter(device_id.eq(target_device_id))
        .filter(status.eq(CommandStatus::Queued.as_str()))
        .filter(after.is_null().or(after.le(now)))
        .order(id.asc())
        .select(Command::as_select())
        .first::<Command>(conn)
        .optional()?;

    Ok(match eligible {
        Some(cmd) => Selection::Eligible(cmd),
        None => Selection::Nothing,
    })
}

/// Dispatch transition: `queued` -> `sent`, stamping `sent_at`.
///
/// Conditional on the row still being `queued` so two concurrent contacts
/// can never both dispatch the same command; returns the number of rows
/// actually moved.
pub fn mark_sent(
    conn: &mut SqliteConnection,
    command_id: i32,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    use crate::schema::commands::dsl::*;

    diesel::update(
        commands
            .filter(id.eq(command_id))
            .filter(status.eq(CommandStatus::Queued.as_str())),
    )
    .set((status.eq(CommandStatus::Sent.as_str()), sent_at.eq(now)))
    .execute(conn)
}

/// Expire a still-queued command whose dispatch budget is gone. No dispatch
/// occurs.
pub fn expire_queued(conn: &mut SqliteConnection, command_id: i32) -> QueryResult<usize> {
    use crate::schema::commands::dsl::*;

    diesel::update(
        commands
            .filter(id.eq(command_id))
            .filter(status.eq(CommandStatus::Queued.as_str())),
    )
    .set(status.eq(CommandStatus::Expired.as_str()))
    .execute(conn)
}

/// Apply a reply or timeout disposition to a `sent` command.
///
/// `acknowledged_at` is stamped only for terminal replies; a requeue or
/// expiry leaves it NULL. Conditional on the row still being `sent` so a
/// reply cannot race the timeout sweeper into a double transition.
pub fn apply_disposition(
    conn: &mut SqliteConnection,
    command_id: i32,
    disposition: Disposition,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    use crate::schema::commands::dsl::*;

    let replied_at = match disposition.status {
        CommandStatus::Acknowledged | CommandStatus::Error => Some(now),
        _ => None,
    };

    diesel::update(
        commands
            .filter(id.eq(command_id))
            .filter(status.eq(CommandStatus::Sent.as_str())),
    )
    .set((
        status.eq(disposition.status.as_str()),
        ttl.eq(disposition.ttl),
        acknowledged_at.eq(replied_at),
    ))
    .execute(conn)
}

/// Cancellation transition: `queued` -> `cancelled`. Returns 0 when the
/// command has already left the queue (in flight or terminal).
pub fn cancel_queued(conn: &mut SqliteConnection, command_id: i32) -> QueryResult<usize> {
    use crate::schema::commands::dsl::*;

    diesel::update(
        commands
            .filter(id.eq(command_id))
            .filter(status.eq(CommandStatus::Queued.as_str())),
    )
    .set(status.eq(CommandStatus::Cancelled.as_str()))
    .execute(conn)
}

/// Look up a command by its protocol uuid.
pub fn find_by_uuid(conn: &mut SqliteConnection, command_uuid: &str) -> QueryResult<Option<Command>> {
    use crate::schema::commands::dsl::*;

    commands
        .filter(uuid.eq(command_uuid))
        .select(Command::as_select())
        .first::<Command>(conn)
        .optional()
}

/// Look up the `sent` command a reply refers to, scoped to the replying
/// device. A uuid that exists but belongs to another device or is not in
/// flight yields `None`; the caller treats that as a protocol violation.
pub fn find_sent_for_reply(
    conn: &mut SqliteConnection,
    target_device_id: i32,
    command_uuid: &str,
) -> QueryResult<Option<Command>> {
    use crate::schema::commands::dsl::*;

    commands
        .filter(device_id.eq(target_device_id))
        .filter(uuid.eq(command_uuid))
        .filter(status.eq(CommandStatus::Sent.as_str()))
        .select(Command::as_select())
        .first::<Command>(conn)
        .optional()
}

/// A device's command history, oldest first, optionally narrowed to one
/// status (the `(device_id, status)` index serves exactly this scan).
pub fn list_for_device(
    conn: &mut SqliteConnection,
    target_device_id: i32,
    status_filter: Option<CommandStatus>,
) -> QueryResult<Vec<Command>> {
    use crate::schema::commands::dsl::*;

    let mut query = commands
        .filter(device_id.eq(target_device_id))
        .order(id.asc())
        .select(Command::as_select())
        .into_boxed();
    if let Some(wanted) = status_filter {
        query = query.filter(status.eq(wanted.as_str()));
    }
    query.load(conn)
}

/// Commands currently waiting in any device's queue, for the dashboard.
pub fn queued_depth(conn: &mut SqliteConnection) -> QueryResult<i64> {
    use crate::schema::commands::dsl::*;

    commands
        .filter(status.eq(CommandStatus::Queued.as_str()))
        .count()
        .get_result(conn)
}
