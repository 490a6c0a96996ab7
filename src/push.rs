use chrono::NaiveDateTime;
use diesel::prelude::*;
use log::{info, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::Device;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push gateway rejected the signal: HTTP {0}")]
    Rejected(u16),
}

/// Transport that delivers a wake signal to a device's push address.
///
/// Implementations block; callers run them off the request path. The signal
/// carries no command content; the device discovers its work on contact.
pub trait PushGateway: Send + Sync {
    fn send(&self, push_token: &str, push_id: &str) -> Result<(), PushError>;
}

/// Wake-signal gateway speaking JSON over HTTP.
pub struct HttpPushGateway {
    endpoint: String,
}

impl HttpPushGateway {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }
}

impl PushGateway for HttpPushGateway {
    fn send(&self, push_token: &str, push_id: &str) -> Result<(), PushError> {
        // built per send: signals are rare and `send` already runs on a
        // worker thread, never inside the async runtime
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let response = client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "token": push_token,
                "push_id": push_id,
            }))
            .send()?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PushError::Rejected(response.status().as_u16()))
        }
    }
}

/// A claimed wake signal, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct WakeSignal {
    pub device_id: i32,
    pub udid: String,
    pub push_token: String,
    pub push_id: String,
}

/// Whether a wake signal should be attempted for this device at all.
///
/// No signal for unenrolled devices, devices without a push address, devices
/// with one already outstanding (it covers any newly queued work), or
/// devices past the failure threshold, which wait for their own contact.
pub fn should_notify(device: &Device, failure_threshold: i32) -> bool {
    device.enrolled
        && device.push_token.is_some()
        && device.last_push_at.is_none()
        && device.failed_push_count < failure_threshold
}

/// Claim the single outstanding-signal slot for a device.
///
/// The claim is a conditional update on `last_push_at IS NULL`, so
/// concurrent enqueues produce at most one signal to send.
pub fn claim(
    conn: &mut SqliteConnection,
    device: &Device,
    now: NaiveDateTime,
) -> QueryResult<Option<WakeSignal>> {
    use crate::schema::devices::dsl::*;

    let token = match &device.push_token {
        Some(token) => token.clone(),
        None => return Ok(None),
    };

    let signal_id = Uuid::new_v4().to_string();
    let claimed = diesel::update(
        devices
            .filter(id.eq(device.id))
            .filter(last_push_at.is_null()),
    )
    .set((
        last_push_at.eq(now),
        last_push_id.eq(&signal_id),
    ))
    .execute(conn)?;

    if claimed == 0 {
        return Ok(None);
    }

    Ok(Some(WakeSignal {
        device_id: device.id,
        udid: device.udid.clone(),
        push_token: token,
        push_id: signal_id,
    }))
}

/// Record the transport's verdict for an outstanding signal.
///
/// Both outcomes release the slot; failure also bumps the failure counter,
/// success resets it. Conditional on the push id so a late callback cannot
/// clobber a newer signal.
pub fn resolve(
    conn: &mut SqliteConnection,
    target_device_id: i32,
    push_id: &str,
    delivered: bool,
) -> QueryResult<usize> {
    use crate::schema::devices::dsl::*;

    let target = devices
        .filter(id.eq(target_device_id))
        .filter(last_push_id.eq(push_id));

    if delivered {
        diesel::update(target)
            .set((
                last_push_at.eq(None::<NaiveDateTime>),
                last_push_id.eq(None::<String>),
                failed_push_count.eq(0),
            ))
            .execute(conn)
    } else {
        diesel::update(target)
            .set((
                last_push_at.eq(None::<NaiveDateTime>),
                last_push_id.eq(None::<String>),
                failed_push_count.eq(failed_push_count + 1),
            ))
            .execute(conn)
    }
}

/// Send a claimed signal and record the outcome. Runs on a worker thread;
/// delivery is best-effort and never surfaces to the enqueueing caller.
pub fn deliver_and_resolve(pool: &DbPool, gateway: &dyn PushGateway, signal: &WakeSignal) {
    let delivered = match gateway.send(&signal.push_token, &signal.push_id) {
        Ok(()) => {
            info!("wake signal {} delivered to {}", signal.push_id, signal.udid);
            true
        }
        Err(err) => {
            warn!(
                "wake signal {} to {} failed: {}",
                signal.push_id, signal.udid, err
            );
            false
        }
    };

    match pool.get() {
        Ok(mut conn) => {
            if let Err(err) = resolve(&mut conn, signal.device_id, &signal.push_id, delivered) {
                warn!("failed to record push outcome for {}: {}", signal.udid, err);
            }
        }
        Err(err) => warn!("failed to record push outcome for {}: {}", signal.udid, err),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Gateway that records every send instead of talking to a network.
    #[derive(Default)]
    pub struct RecordingGateway {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl PushGateway for RecordingGateway {
        fn send(&self, push_token: &str, push_id: &str) -> Result<(), PushError> {
            self.sent
                .lock()
                .unwrap()
                .push((push_token.to_string(), push_id.to_string()));
            if self.fail {
                Err(PushError::Rejected(503))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::models::RegisterRequest;
    use crate::registry;
    use chrono::Utc;

    fn enrolled_device(conn: &mut SqliteConnection, token: Option<&str>) -> Device {
        let req = RegisterRequest {
            udid: "UDID-A".to_string(),
            serial_number: None,
            device_name: None,
            model: None,
            os_version: None,
            push_token: token.map(str::to_string),
        };
        registry::register(conn, &req).unwrap()
    }

    #[test]
    fn notify_requires_enrollment_token_and_free_slot() {
        let device = Device {
            id: 1,
            udid: "UDID-A".to_string(),
            serial_number: None,
            device_name: None,
            model: None,
            os_version: None,
            enrolled: true,
            push_token: Some("tok".to_string()),
            last_seen: None,
            last_push_at: None,
            last_push_id: None,
            failed_push_count: 0,
        };
        assert!(should_notify(&device, 5));

        let unenrolled = Device {
            enrolled: false,
            ..device.clone()
        };
        assert!(!should_notify(&unenrolled, 5));

        let no_token = Device {
            push_token: None,
            ..device.clone()
        };
        assert!(!should_notify(&no_token, 5));

        let outstanding = Device {
            last_push_at: Some(Utc::now().naive_utc()),
            ..device.clone()
        };
        assert!(!should_notify(&outstanding, 5));

        let unreachable = Device {
            failed_push_count: 5,
            ..device
        };
        assert!(!should_notify(&unreachable, 5));
    }

    #[test]
    fn claim_is_exclusive_until_resolved() {
        let mut conn = testing::conn();
        let device = enrolled_device(&mut conn, Some("tok"));
        let now = Utc::now().naive_utc();

        let first = claim(&mut conn, &device, now).unwrap();
        assert!(first.is_some());

        // the slot is taken; a second claim gets nothing
        let stale_view = device.clone();
        assert!(claim(&mut conn, &stale_view, now).unwrap().is_none());

        // success releases the slot and resets the counter
        let signal = first.unwrap();
        resolve(&mut conn, signal.device_id, &signal.push_id, true).unwrap();
        let device = registry::find_by_udid(&mut conn, "UDID-A").unwrap().unwrap();
        assert!(device.last_push_at.is_none());
        assert_eq!(device.failed_push_count, 0);
        assert!(claim(&mut conn, &device, now).unwrap().is_some());
    }

    #[test]
    fn failed_delivery_bumps_the_counter() {
        let mut conn = testing::conn();
        let device = enrolled_device(&mut conn, Some("tok"));
        let now = Utc::now().naive_utc();

        let signal = claim(&mut conn, &device, now).unwrap().unwrap();
        resolve(&mut conn, signal.device_id, &signal.push_id, false).unwrap();

        let device = registry::find_by_udid(&mut conn, "UDID-A").unwrap().unwrap();
        assert_eq!(device.failed_push_count, 1);
        assert!(device.last_push_at.is_none());
    }

    #[test]
    fn late_resolution_cannot_clobber_a_newer_signal() {
        let mut conn = testing::conn();
        let device = enrolled_device(&mut conn, Some("tok"));
        let now = Utc::now().naive_utc();

        let old = claim(&mut conn, &device, now).unwrap().unwrap();
        resolve(&mut conn, old.device_id, &old.push_id, false).unwrap();

        let device = registry::find_by_udid(&mut conn, "UDID-A").unwrap().unwrap();
        let newer = claim(&mut conn, &device, now).unwrap().unwrap();

        // the old signal's callback arrives again: wrong id, no effect
        assert_eq!(resolve(&mut conn, old.device_id, &old.push_id, true).unwrap(), 0);
        let device = registry::find_by_udid(&mut conn, "UDID-A").unwrap().unwrap();
        assert_eq!(device.last_push_id.as_deref(), Some(newer.push_id.as_str()));
    }

    #[test]
    fn claim_without_token_is_a_no_op() {
        let mut conn = testing::conn();
        let device = enrolled_device(&mut conn, None);
        let now = Utc::now().naive_utc();

        assert!(claim(&mut conn, &device, now).unwrap().is_none());
    }

    #[test]
    fn deliver_and_resolve_records_the_outcome() {
        use super::testing::RecordingGateway;
        use diesel::r2d2::{ConnectionManager, Pool};

        // single-connection pool so the in-memory database is shared
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool: DbPool = Pool::builder().max_size(1).build(manager).unwrap();

        let signal = {
            let mut conn = pool.get().unwrap();
            crate::db::run_migrations(&mut conn);
            let device = enrolled_device(&mut conn, Some("tok"));
            claim(&mut conn, &device, Utc::now().naive_utc())
                .unwrap()
                .unwrap()
        };

        let gateway = RecordingGateway::default();
        deliver_and_resolve(&pool, &gateway, &signal);

        assert_eq!(gateway.sent.lock().unwrap().len(), 1);
        let mut conn = pool.get().unwrap();
        let device = registry::find_by_udid(&mut conn, "UDID-A").unwrap().unwrap();
        assert!(device.last_push_at.is_none());
        assert_eq!(device.failed_push_count, 0);

        // a failing transport bumps the counter instead
        let device_before = device.clone();
        let signal = claim(&mut conn, &device_before, Utc::now().naive_utc())
            .unwrap()
            .unwrap();
        drop(conn);

        let gateway = RecordingGateway {
            fail: true,
            ..Default::default()
        };
        deliver_and_resolve(&pool, &gateway, &signal);

        let mut conn = pool.get().unwrap();
        let device = registry::find_by_udid(&mut conn, "UDID-A").unwrap().unwrap();
        assert_eq!(device.failed_push_count, 1);
        assert!(device.last_push_at.is_none());
    }
}
