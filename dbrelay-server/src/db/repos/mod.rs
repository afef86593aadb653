//! Repository implementations for database access
//!
//! Each repository borrows the request pool and hydrates rows with
//! `FromRow`. Keyed lookups pick a fixed query per key variant so every
//! statement text is static.

pub mod profiles;
pub mod registrations;
pub mod roles;

pub use profiles::{NewProfile, Profile, ProfileKey, ProfileRepo, ProfileUpdate};
pub use registrations::{NewRegistration, Registration, RegistrationKey, RegistrationRepo, RegistrationUpdate};
pub use roles::{Role, RoleKey, RoleRepo};

/// Database error type
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found: {resource} '{id}'")]
    NotFound { resource: &'static str, id: String },

    #[error("{field} must not be empty")]
    EmptyKey { field: &'static str },
}

pub(crate) fn require(field: &'static str, value: &str) -> Result<(), DbError> {
    if value.trim().is_empty() {
        return Err(DbError::EmptyKey { field });
    }
    Ok(())
}

/// `created_at` is rendered as `YYYY-MM-DD HH:MM:SS`.
pub(crate) mod timestamp {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_are_rejected() {
        assert!(matches!(require("email", ""), Err(DbError::EmptyKey { field: "email" })));
        assert!(matches!(require("email", "   "), Err(DbError::EmptyKey { .. })));
        assert!(require("email", "a@b.c").is_ok());
    }

    #[test]
    fn timestamps_render_without_fraction() {
        #[derive(serde::Serialize)]
        struct Stamp {
            #[serde(serialize_with = "timestamp::serialize")]
            at: chrono::NaiveDateTime,
        }

        let at = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(7, 5, 1, 123_456)
            .unwrap();
        let json = serde_json::to_string(&Stamp { at }).unwrap();
        assert_eq!(json, r#"{"at":"2024-03-09 07:05:01"}"#);
    }
}
