//! Esquema Diesel (declarado manualmente). Reemplazable con `diesel print-schema`.

diesel::table! {
    assessments (id) {
        id -> Integer,
        title -> Text,
        tenant_id -> Text,
        app_id -> BigInt,
        frameworks -> Array<BigInt>,
        template_id -> Integer,
        kind -> Nullable<Text>,
        locked -> Bool,
        deleted -> Bool,
        location -> Nullable<Text>,
        temp_location -> Nullable<Text>,
        created_by -> Uuid,
        created_on -> Timestamptz,
        updated_by -> Uuid,
        updated_on -> Timestamptz,
    }
}

diesel::table! {
    assessment_outline (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        assessment_id -> Integer,
        version -> Integer,
        outline_hash -> Nullable<Text>,
        tree -> Jsonb,
        created_by -> Uuid,
        created_on -> Timestamptz,
        deleted -> Bool,
    }
}

diesel::table! {
    assessment_outline_history (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        assessment_id -> Integer,
        version -> Integer,
        outline_hash -> Nullable<Text>,
        tree -> Jsonb,
        created_by -> Uuid,
        created_on -> Timestamptz,
        deleted -> Bool,
    }
}

diesel::table! {
    assessment_sections (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        assessment_id -> Integer,
        section_id -> Text,
        title -> Text,
        version -> Integer,
        content -> Jsonb,
        content_hash -> Nullable<Text>,
        copy_of -> Nullable<Integer>,
        created_by -> Uuid,
        created_on -> Timestamptz,
        deleted -> Bool,
    }
}

diesel::table! {
    assessment_sections_history (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        assessment_id -> Integer,
        section_id -> Text,
        title -> Text,
        version -> Integer,
        content -> Jsonb,
        content_hash -> Nullable<Text>,
        copy_of -> Nullable<Integer>,
        history_ref -> BigInt,
        created_by -> Uuid,
        created_on -> Timestamptz,
        deleted -> Bool,
    }
}

diesel::table! {
    async_tasks (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        op -> Text,
        status -> Text,
        request_payload -> Jsonb,
        entity_type -> Text,
        entity_id -> Text,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    app_standards (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        standard_id -> BigInt,
        sync_pending -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    trust_center_exports (id) {
        id -> BigInt,
        tenant_id -> Text,
        app_id -> BigInt,
        location -> Nullable<Text>,
        deleted -> Bool,
        cancelled -> Bool,
        created_on -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    assessments,
    assessment_outline,
    assessment_outline_history,
    assessment_sections,
    assessment_sections_history,
    async_tasks,
    app_standards,
    trust_center_exports,
);
