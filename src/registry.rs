use chrono::Utc;
use diesel::prelude::*;

use crate::models::{Device, NewDevice, RegisterRequest};

/// Look up a device by its stable identifier.
pub fn find_by_udid(conn: &mut SqliteConnection, device_udid: &str) -> QueryResult<Option<Device>> {
    use crate::schema::devices::dsl::*;

    devices
        .filter(udid.eq(device_udid))
        .select(Device::as_select())
        .first::<Device>(conn)
        .optional()
}

/// Enroll a device, or refresh its record on re-enrollment.
///
/// Registration is itself a contact: any outstanding wake signal is resolved
/// and the push failure counter starts over.
pub fn register(conn: &mut SqliteConnection, req: &RegisterRequest) -> QueryResult<Device> {
    use crate::schema::devices::dsl::*;

    let now = Utc::now().naive_utc();
    let new_device = NewDevice {
        udid: req.udid.clone(),
        serial_number: req.serial_number.clone(),
        device_name: req.device_name.clone(),
        model: req.model.clone(),
        os_version: req.os_version.clone(),
        enrolled: true,
        push_token: req.push_token.clone(),
        last_seen: Some(now),
    };

    diesel::insert_into(devices)
        .values(&new_device)
        .on_conflict(udid)
        .do_update()
        .set((
            serial_number.eq(req.serial_number.clone()),
            device_name.eq(req.device_name.clone()),
            model.eq(req.model.clone()),
            os_version.eq(req.os_version.clone()),
            enrolled.eq(true),
            last_seen.eq(now),
            last_push_at.eq(None::<chrono::NaiveDateTime>),
            last_push_id.eq(None::<String>),
            failed_push_count.eq(0),
        ))
        .execute(conn)?;

    // A re-registration without a token keeps the one already on file.
    if let Some(token) = &req.push_token {
        diesel::update(devices.filter(udid.eq(&req.udid)))
            .set(push_token.eq(token))
            .execute(conn)?;
    }

    devices
        .filter(udid.eq(&req.udid))
        .select(Device::as_select())
        .first::<Device>(conn)
}

/// Replace a device's wake-signal address.
pub fn update_push_token(
    conn: &mut SqliteConnection,
    device_udid: &str,
    token: &str,
) -> QueryResult<usize> {
    use crate::schema::devices::dsl::*;

    diesel::update(devices.filter(udid.eq(device_udid)))
        .set(push_token.eq(token))
        .execute(conn)
}

/// Record that a device made contact: bump `last_seen`, resolve any
/// outstanding wake signal, and reset the failure counter, since the contact
/// proves the device is reachable.
pub fn record_contact(conn: &mut SqliteConnection, device: &Device) -> QueryResult<usize> {
    use crate::schema::devices::dsl::*;

    diesel::update(devices.filter(id.eq(device.id)))
        .set((
            last_seen.eq(Utc::now().naive_utc()),
            last_push_at.eq(None::<chrono::NaiveDateTime>),
            last_push_id.eq(None::<String>),
            failed_push_count.eq(0),
        ))
        .execute(conn)
}

/// All registered devices, for the admin views.
pub fn list(conn: &mut SqliteConnection) -> QueryResult<Vec<Device>> {
    use crate::schema::devices::dsl::*;

    devices.order(udid.asc()).select(Device::as_select()).load(conn)
}
