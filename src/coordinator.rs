use std::sync::{Arc, RwLock};

use chrono::Utc;
use diesel::prelude::*;
use log::info;

use crate::db::{self, DbPool};
use crate::lifecycle::{self, CommandStatus, ReplyOutcome};
use crate::models::{Command, DeliveredCommand, EnqueueRequest, ReplyRequest};
use crate::push::{self, PushGateway, WakeSignal};
use crate::queue::{self, Selection};
use crate::registry;
use crate::settings::ServerSettings;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Store(#[from] diesel::result::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("worker failed: {0}")]
    Worker(String),
}

/// Settings snapshot an operation runs under.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub default_ttl: i32,
    pub push_failure_threshold: i32,
    pub push_enabled: bool,
}

impl From<&ServerSettings> for EngineConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            default_ttl: settings.default_command_ttl,
            push_failure_threshold: settings.push_failure_threshold,
            push_enabled: !settings.push_gateway_url.is_empty(),
        }
    }
}

/// Orchestrates the command store, device registry, and push throttler.
///
/// All collaborators arrive through the constructor; routes and background
/// tasks share one instance via managed state.
pub struct DeliveryCoordinator {
    pool: DbPool,
    gateway: Arc<dyn PushGateway>,
    settings: Arc<RwLock<ServerSettings>>,
}

impl DeliveryCoordinator {
    pub fn new(
        pool: DbPool,
        gateway: Arc<dyn PushGateway>,
        settings: Arc<RwLock<ServerSettings>>,
    ) -> Self {
        Self {
            pool,
            gateway,
            settings,
        }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::from(&*self.settings.read().unwrap())
    }

    /// Persist a new command and, when warranted, send a wake signal. The
    /// signal is fire-and-forget: enqueue succeeds regardless of delivery.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<String, EngineError> {
        let pool = self.pool.clone();
        let config = self.config();

        let (command, wake) = rocket::tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            enqueue_on(&mut conn, &req, config)
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))??;

        if let Some(signal) = wake {
            self.spawn_wake(signal);
        }

        Ok(command.uuid)
    }

    /// Device contact: hand out the next eligible command, or nothing.
    pub async fn contact(&self, udid: String) -> Result<Option<DeliveredCommand>, EngineError> {
        let pool = self.pool.clone();

        rocket::tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            contact_on(&mut conn, &udid)
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
    }

    /// Device reply for a previously delivered command.
    pub async fn reply(&self, udid: String, req: ReplyRequest) -> Result<CommandStatus, EngineError> {
        let pool = self.pool.clone();

        rocket::tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            reply_on(&mut conn, &udid, &req)
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
    }

    /// Administrator cancellation of a still-queued command.
    pub async fn cancel(&self, command_uuid: String) -> Result<(), EngineError> {
        let pool = self.pool.clone();

        rocket::tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            cancel_on(&mut conn, &command_uuid)
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
    }

    fn spawn_wake(&self, signal: WakeSignal) {
        let pool = self.pool.clone();
        let gateway = self.gateway.clone();
        rocket::tokio::task::spawn_blocking(move || {
            push::deliver_and_resolve(&pool, gateway.as_ref(), &signal);
        });
    }
}

/// Enqueue inside one writer transaction: insert the command, log it, and
/// claim the wake-signal slot if the throttler allows one.
pub fn enqueue_on(
    conn: &mut SqliteConnection,
    req: &EnqueueRequest,
    config: EngineConfig,
) -> Result<(Command, Option<WakeSignal>), EngineError> {
    let device = registry::find_by_udid(conn, &req.udid)?
        .ok_or_else(|| EngineError::NotFound(format!("device {}", req.udid)))?;

    let now = Utc::now().naive_utc();
    let dispatch_ttl = req.ttl.unwrap_or(config.default_ttl);

    conn.immediate_transaction(|conn| {
        let command = queue::insert(
            conn,
            device.id,
            &req.request_type,
            req.parameters.as_ref(),
            req.after,
            dispatch_ttl,
            now,
        )?;

        db::log_history(
            conn,
            Some(&command.uuid),
            Some(&device.udid),
            "queued",
            Some(&command.request_type),
        )?;

        let wake = if config.push_enabled && push::should_notify(&device, config.push_failure_threshold)
        {
            push::claim(conn, &device, now)?
        } else {
            None
        };

        Ok((command, wake))
    })
}

/// Contact inside one writer transaction: touch the registry, then pick and
/// dispatch the next command. A command already in flight is re-delivered
/// verbatim; a queued command with no budget left expires without dispatch.
pub fn contact_on(
    conn: &mut SqliteConnection,
    udid: &str,
) -> Result<Option<DeliveredCommand>, EngineError> {
    let device = registry::find_by_udid(conn, udid)?
        .ok_or_else(|| EngineError::NotFound(format!("device {udid}")))?;

    let now = Utc::now().naive_utc();

    conn.immediate_transaction(|conn| {
        registry::record_contact(conn, &device)?;

        if !device.enrolled {
            return Ok(None);
        }

        loop {
            match queue::select_next(conn, device.id, now)? {
                Selection::Outstanding(cmd) => {
                    // re-contact before the reply: same command, no mutation
                    return Ok(Some(DeliveredCommand::from_command(&cmd)));
                }
                Selection::Eligible(cmd) => {
                    if cmd.ttl <= 0 {
                        queue::expire_queued(conn, cmd.id)?;
                        db::log_history(
                            conn,
                            Some(&cmd.uuid),
                            Some(&device.udid),
                            "expired",
                            Some("dispatch budget exhausted"),
                        )?;
                        continue;
                    }
                    if queue::mark_sent(conn, cmd.id, now)? == 0 {
                        continue;
                    }
                    db::log_history(
                        conn,
                        Some(&cmd.uuid),
                        Some(&device.udid),
                        "sent",
                        Some(&cmd.request_type),
                    )?;
                    return Ok(Some(DeliveredCommand::from_command(&cmd)));
                }
                Selection::Nothing => return Ok(None),
            }
        }
    })
}

/// Reply inside one writer transaction. A uuid that doesn't match an
/// in-flight command for this device is a protocol violation; the caller
/// logs it and moves on with no state change.
pub fn reply_on(
    conn: &mut SqliteConnection,
    udid: &str,
    req: &ReplyRequest,
) -> Result<CommandStatus, EngineError> {
    let device = registry::find_by_udid(conn, udid)?
        .ok_or_else(|| EngineError::NotFound(format!("device {udid}")))?;

    let outcome = ReplyOutcome::from_wire(&req.status)
        .ok_or_else(|| EngineError::Protocol(format!("unknown reply status {:?}", req.status)))?;

    let now = Utc::now().naive_utc();

    conn.immediate_transaction(|conn| {
        // a reply is a contact: it proves the device reachable
        registry::record_contact(conn, &device)?;

        let command = queue::find_sent_for_reply(conn, device.id, &req.uuid)?.ok_or_else(|| {
            EngineError::NotFound(format!(
                "no outstanding command {} for device {}",
                req.uuid, udid
            ))
        })?;

        let disposition = lifecycle::reply_disposition(outcome, command.ttl);
        queue::apply_disposition(conn, command.id, disposition, now)?;

        let event = match (outcome, disposition.status) {
            (ReplyOutcome::NotNow, CommandStatus::Expired) => "expired",
            (ReplyOutcome::NotNow, _) => "not_now",
            (ReplyOutcome::Acknowledged, _) => "acknowledged",
            (ReplyOutcome::Error, _) => "error",
        };
        let details = req.response.as_ref().map(|value| value.to_string());
        db::log_history(
            conn,
            Some(&command.uuid),
            Some(&device.udid),
            event,
            details.as_deref(),
        )?;

        if disposition.status.is_terminal() {
            info!(
                "command {} for {} replied {} -> {}",
                command.uuid,
                device.udid,
                outcome.as_wire(),
                disposition.status
            );
        } else {
            info!(
                "command {} for {} replied {}, requeued with ttl {}",
                command.uuid,
                device.udid,
                outcome.as_wire(),
                disposition.ttl
            );
        }

        Ok(disposition.status)
    })
}

/// Cancel a queued command; anything past `queued` is a conflict.
pub fn cancel_on(conn: &mut SqliteConnection, command_uuid: &str) -> Result<(), EngineError> {
    conn.immediate_transaction(|conn| {
        let command = queue::find_by_uuid(conn, command_uuid)?
            .ok_or_else(|| EngineError::NotFound(format!("command {command_uuid}")))?;

        if queue::cancel_queued(conn, command.id)? == 0 {
            return Err(EngineError::Conflict(format!(
                "command {} is {}, not queued",
                command_uuid, command.status
            )));
        }

        db::log_history(conn, Some(&command.uuid), None, "cancelled", None)?;
        Ok(())
    })
}
