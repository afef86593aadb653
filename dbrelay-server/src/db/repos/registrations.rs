//! Registration repository
//!
//! Registrations are signup requests awaiting review. `has_profile`
//! tells the admin console whether a profile already exists for the
//! same email.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use super::{require, timestamp, DbError};

macro_rules! registration_columns {
    () => {
        "r.id, r.unique_identifier, r.email, r.firstname, r.lastname, r.status, \
         r.reference_id, r.signup_type, r.created_at"
    };
}

/// Registration record from database
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Registration {
    pub id: i32,
    pub unique_identifier: String,
    pub email: String,
    #[sqlx(default)]
    pub firstname: Option<String>,
    #[sqlx(default)]
    pub lastname: Option<String>,
    pub status: String,
    #[sqlx(default)]
    pub reference_id: Option<String>,
    #[sqlx(default)]
    pub signup_type: Option<String>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub created_at: NaiveDateTime,
    /// Only populated by [`RegistrationRepo::list_inactive`].
    #[sqlx(default)]
    pub has_profile: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationKey {
    UniqueIdentifier(String),
    Email(String),
}

impl RegistrationKey {
    fn field(&self) -> &'static str {
        match self {
            Self::UniqueIdentifier(_) => "unique_identifier",
            Self::Email(_) => "email",
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::UniqueIdentifier(v) | Self::Email(v) => v,
        }
    }

    fn not_found(&self) -> DbError {
        DbError::NotFound {
            resource: "registration",
            id: self.value().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewRegistration {
    pub email: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub reference_id: Option<String>,
    pub signup_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationUpdate {
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub status: Option<String>,
    pub reference_id: Option<String>,
    pub signup_type: Option<String>,
}

/// Registration repository
pub struct RegistrationRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> RegistrationRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &RegistrationKey) -> Result<Registration, DbError> {
        require(key.field(), key.value())?;
        let sql = match key {
            RegistrationKey::UniqueIdentifier(_) => concat!(
                "SELECT ",
                registration_columns!(),
                " FROM registrations r WHERE r.unique_identifier = $1"
            ),
            RegistrationKey::Email(_) => concat!(
                "SELECT ",
                registration_columns!(),
                " FROM registrations r WHERE r.email = $1"
            ),
        };

        sqlx::query_as::<_, Registration>(sql)
            .bind(key.value())
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| key.not_found())
    }

    pub async fn list(&self) -> Result<Vec<Registration>, DbError> {
        let registrations = sqlx::query_as::<_, Registration>(concat!(
            "SELECT ",
            registration_columns!(),
            " FROM registrations r ORDER BY r.created_at DESC, r.id DESC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(registrations)
    }

    /// Registrations still awaiting a decision, with `has_profile` joined
    /// in a single query.
    pub async fn list_inactive(&self) -> Result<Vec<Registration>, DbError> {
        let registrations = sqlx::query_as::<_, Registration>(concat!(
            "SELECT ",
            registration_columns!(),
            ", EXISTS (SELECT 1 FROM profiles p WHERE p.email = r.email) AS has_profile \
             FROM registrations r \
             WHERE r.status IN ('inactive', 'pending', 'revoked') \
             ORDER BY r.created_at DESC, r.id DESC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(registrations)
    }

    pub async fn create(&self, new: NewRegistration) -> Result<Registration, DbError> {
        require("email", &new.email)?;
        let unique_identifier = uuid::Uuid::new_v4().to_string();

        let registration = sqlx::query_as::<_, Registration>(
            r#"
            INSERT INTO registrations AS r (unique_identifier, email, firstname, lastname, reference_id, signup_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING r.id, r.unique_identifier, r.email, r.firstname, r.lastname, r.status,
                      r.reference_id, r.signup_type, r.created_at
            "#,
        )
        .bind(&unique_identifier)
        .bind(&new.email)
        .bind(&new.firstname)
        .bind(&new.lastname)
        .bind(&new.reference_id)
        .bind(&new.signup_type)
        .fetch_one(self.pool)
        .await?;

        tracing::debug!(%unique_identifier, "registration created");
        Ok(registration)
    }

    pub async fn update(
        &self,
        key: &RegistrationKey,
        changes: RegistrationUpdate,
    ) -> Result<Registration, DbError> {
        require(key.field(), key.value())?;
        let sql = match key {
            RegistrationKey::UniqueIdentifier(_) => concat!(
                "UPDATE registrations AS r SET email = COALESCE($2, r.email), \
                 firstname = COALESCE($3, r.firstname), lastname = COALESCE($4, r.lastname), \
                 status = COALESCE($5, r.status), reference_id = COALESCE($6, r.reference_id), \
                 signup_type = COALESCE($7, r.signup_type) \
                 WHERE r.unique_identifier = $1 RETURNING ",
                registration_columns!()
            ),
            RegistrationKey::Email(_) => concat!(
                "UPDATE registrations AS r SET email = COALESCE($2, r.email), \
                 firstname = COALESCE($3, r.firstname), lastname = COALESCE($4, r.lastname), \
                 status = COALESCE($5, r.status), reference_id = COALESCE($6, r.reference_id), \
                 signup_type = COALESCE($7, r.signup_type) \
                 WHERE r.email = $1 RETURNING ",
                registration_columns!()
            ),
        };

        sqlx::query_as::<_, Registration>(sql)
            .bind(key.value())
            .bind(&changes.email)
            .bind(&changes.firstname)
            .bind(&changes.lastname)
            .bind(&changes.status)
            .bind(&changes.reference_id)
            .bind(&changes.signup_type)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| key.not_found())
    }

    pub async fn delete(&self, key: &RegistrationKey) -> Result<(), DbError> {
        require(key.field(), key.value())?;
        let sql = match key {
            RegistrationKey::UniqueIdentifier(_) => {
                "DELETE FROM registrations WHERE unique_identifier = $1"
            }
            RegistrationKey::Email(_) => "DELETE FROM registrations WHERE email = $1",
        };

        let result = sqlx::query(sql).bind(key.value()).execute(self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(key.not_found());
        }
        Ok(())
    }
}
