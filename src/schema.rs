diesel::table! {
    devices (id) {
        id -> Integer,
        udid -> Text,
        serial_number -> Nullable<Text>,
        device_name -> Nullable<Text>,
        model -> Nullable<Text>,
        os_version -> Nullable<Text>,
        enrolled -> Bool,

        // opaque wake-signal address; absent until the device registers one
        push_token -> Nullable<Text>,
        last_seen -> Nullable<Timestamp>,

        // non-null while a wake signal is outstanding
        last_push_at -> Nullable<Timestamp>,
        last_push_id -> Nullable<Text>,
        failed_push_count -> Integer,
    }
}

diesel::table! {
    commands (id) {
        id -> Integer,
        uuid -> Text,               // protocol-facing correlation token
        device_id -> Integer,       // FK to devices.id
        request_type -> Text,       // opaque to the queue engine
        parameters -> Nullable<Text>, // JSON payload for the command builder
        status -> Text,             // queued | sent | acknowledged | error | expired | cancelled
        queued_at -> Timestamp,
        sent_at -> Nullable<Timestamp>,
        acknowledged_at -> Nullable<Timestamp>,
        after -> Nullable<Timestamp>, // not eligible before this instant
        ttl -> Integer,             // dispatch attempts remaining
    }
}

diesel::table! {
    history_log (id) {
        id -> Integer,
        command_uuid -> Nullable<Text>,
        device_udid -> Nullable<Text>,
        event -> Text,
        details -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    server_settings (id) {
        id -> Integer,
        default_command_ttl -> Integer,
        sent_timeout_seconds -> BigInt,
        push_failure_threshold -> Integer,
        push_resend_seconds -> BigInt,
        push_gateway_url -> Text,
    }
}

diesel::joinable!(commands -> devices (device_id));

diesel::allow_tables_to_appear_in_same_query!(
    devices,
    commands,
    history_log,
    server_settings,
);
