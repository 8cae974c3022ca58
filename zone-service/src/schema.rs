diesel::table! {
    zones (id) {
        id -> Uuid,
        #[max_length = 20]
        code -> Varchar,
        #[max_length = 100]
        name -> Varchar,
        description -> Nullable<Text>,
        active -> Bool,
        geometry -> Nullable<Jsonb>,
        version -> Int4,
        created_by -> Nullable<Varchar>,
        updated_by -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    zone_schedules (id) {
        id -> Uuid,
        zone_id -> Uuid,
        weekday -> Int4,
        deliveries_enabled -> Bool,
        visits_enabled -> Bool,
        created_at -> Timestamptz,
        created_by -> Nullable<Varchar>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_type -> Varchar,
        event_type -> Varchar,
        aggregate_key -> Uuid,
        payload -> Jsonb,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
        attempts -> Int4,
    }
}

diesel::joinable!(zone_schedules -> zones (zone_id));

diesel::allow_tables_to_appear_in_same_query!(
    zones,
    zone_schedules,
    outbox_events,
);
