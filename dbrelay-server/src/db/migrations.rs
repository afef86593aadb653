//! Schema and change-notification triggers
//!
//! Idempotent: tables are created if absent, the trigger function is
//! replaced, and triggers are dropped and recreated. The trigger strips
//! `password` from row data and replaces oversized rows with `null` data
//! plus `"truncated": true`, because NOTIFY payloads are capped at 8000
//! bytes and an oversized payload would abort the writing transaction.

use sqlx::PgPool;

use crate::error::{Result, ServerError};

/// Tables whose changes are published to subscribers.
pub const NOTIFY_TABLES: &[&str] = &["profiles", "registrations"];

const CREATE_ROLES: &str = r#"
    CREATE TABLE IF NOT EXISTS roles (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
"#;

const CREATE_PROFILES: &str = r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id SERIAL PRIMARY KEY,
        unique_identifier TEXT NOT NULL UNIQUE,
        role_id INTEGER REFERENCES roles(id) ON DELETE SET NULL,
        email TEXT NOT NULL UNIQUE,
        password TEXT,
        firstname TEXT,
        lastname TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        reference_id TEXT,
        signup_type TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )
"#;

const CREATE_REGISTRATIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS registrations (
        id SERIAL PRIMARY KEY,
        unique_identifier TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        firstname TEXT,
        lastname TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        reference_id TEXT,
        signup_type TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )
"#;

const CREATE_NOTIFY_FUNCTION: &str = r#"
    CREATE OR REPLACE FUNCTION dbrelay_notify_change() RETURNS trigger AS $$
    DECLARE
        row_data JSONB;
        payload TEXT;
    BEGIN
        IF TG_OP = 'DELETE' THEN
            row_data := to_jsonb(OLD) - 'password';
        ELSE
            row_data := to_jsonb(NEW) - 'password';
        END IF;

        payload := jsonb_build_object(
            'table', TG_TABLE_NAME,
            'operation', lower(TG_OP),
            'data', row_data
        )::text;

        IF octet_length(payload) > 7900 THEN
            payload := jsonb_build_object(
                'table', TG_TABLE_NAME,
                'operation', lower(TG_OP),
                'data', NULL,
                'truncated', TRUE
            )::text;
        END IF;

        PERFORM pg_notify(TG_ARGV[0], payload);
        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql
"#;

/// Run all migrations, wiring triggers to publish on `channel`.
///
/// `channel` must already be validated as a plain identifier
/// (`RelayConfig::validate` does this); it is interpolated into DDL.
pub async fn run(pool: &PgPool, channel: &str) -> Result<()> {
    if !channel.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') || channel.is_empty() {
        return Err(ServerError::Internal(format!(
            "refusing to create triggers for channel '{channel}'"
        )));
    }

    tracing::info!(%channel, "running migrations");

    for statement in [CREATE_ROLES, CREATE_PROFILES, CREATE_REGISTRATIONS, CREATE_NOTIFY_FUNCTION] {
        sqlx::query(statement).execute(pool).await?;
    }

    for table in NOTIFY_TABLES {
        let trigger = format!("dbrelay_{table}_notify");
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger} ON {table}"))
            .execute(pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION dbrelay_notify_change('{channel}')"
        ))
        .execute(pool)
        .await?;
        tracing::debug!(%table, %trigger, "notify trigger installed");
    }

    tracing::info!("migrations complete");
    Ok(())
}
