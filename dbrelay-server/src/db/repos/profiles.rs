//! Profile repository
//!
//! Profiles are looked up by unique identifier or email. Admin status
//! changes go through [`ProfileRepo::set_status`]; every write fires the
//! notify trigger, which is how subscribers hear about it.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use super::{require, timestamp, DbError};

macro_rules! profile_columns {
    () => {
        "id, unique_identifier, role_id, email, password, firstname, lastname, \
         status, reference_id, signup_type, created_at"
    };
}

/// Profile record from database
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Profile {
    pub id: i32,
    pub unique_identifier: String,
    #[sqlx(default)]
    pub role_id: Option<i32>,
    pub email: String,
    #[serde(skip_serializing)]
    #[sqlx(default)]
    pub password: Option<String>,
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
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileKey {
    UniqueIdentifier(String),
    Email(String),
}

impl ProfileKey {
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

    fn validate(&self) -> Result<(), DbError> {
        require(self.field(), self.value())
    }

    fn not_found(&self) -> DbError {
        DbError::NotFound {
            resource: "profile",
            id: self.value().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    /// Generated when absent.
    pub unique_identifier: Option<String>,
    pub email: String,
    pub password: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub role_id: Option<i32>,
    /// Defaults to `pending`.
    pub status: Option<String>,
    pub reference_id: Option<String>,
    pub signup_type: Option<String>,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub role_id: Option<i32>,
    pub status: Option<String>,
    pub reference_id: Option<String>,
    pub signup_type: Option<String>,
}

/// Profile repository
pub struct ProfileRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> ProfileRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &ProfileKey) -> Result<Profile, DbError> {
        key.validate()?;
        let sql = match key {
            ProfileKey::UniqueIdentifier(_) => {
                concat!("SELECT ", profile_columns!(), " FROM profiles WHERE unique_identifier = $1")
            }
            ProfileKey::Email(_) => {
                concat!("SELECT ", profile_columns!(), " FROM profiles WHERE email = $1")
            }
        };

        sqlx::query_as::<_, Profile>(sql)
            .bind(key.value())
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| key.not_found())
    }

    pub async fn list(&self) -> Result<Vec<Profile>, DbError> {
        let profiles = sqlx::query_as::<_, Profile>(concat!(
            "SELECT ",
            profile_columns!(),
            " FROM profiles ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(profiles)
    }

    /// Profiles visible to admins: anything not pending or deleted.
    pub async fn list_active(&self) -> Result<Vec<Profile>, DbError> {
        let profiles = sqlx::query_as::<_, Profile>(concat!(
            "SELECT ",
            profile_columns!(),
            " FROM profiles WHERE status NOT IN ('pending', 'deleted') \
             ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(profiles)
    }

    pub async fn list_deleted(&self) -> Result<Vec<Profile>, DbError> {
        let profiles = sqlx::query_as::<_, Profile>(concat!(
            "SELECT ",
            profile_columns!(),
            " FROM profiles WHERE status = 'deleted' ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(profiles)
    }

    pub async fn create(&self, new: NewProfile) -> Result<Profile, DbError> {
        require("email", &new.email)?;
        let unique_identifier = new
            .unique_identifier
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let profile = sqlx::query_as::<_, Profile>(concat!(
            "INSERT INTO profiles (unique_identifier, email, password, firstname, lastname, \
             role_id, status, reference_id, signup_type) \
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, 'pending'), $8, $9) \
             RETURNING ",
            profile_columns!()
        ))
        .bind(&unique_identifier)
        .bind(&new.email)
        .bind(&new.password)
        .bind(&new.firstname)
        .bind(&new.lastname)
        .bind(new.role_id)
        .bind(&new.status)
        .bind(&new.reference_id)
        .bind(&new.signup_type)
        .fetch_one(self.pool)
        .await?;

        tracing::debug!(unique_identifier = %profile.unique_identifier, "profile created");
        Ok(profile)
    }

    pub async fn update(&self, key: &ProfileKey, changes: ProfileUpdate) -> Result<Profile, DbError> {
        key.validate()?;
        let sql = match key {
            ProfileKey::UniqueIdentifier(_) => concat!(
                "UPDATE profiles SET email = COALESCE($2, email), password = COALESCE($3, password), \
                 firstname = COALESCE($4, firstname), lastname = COALESCE($5, lastname), \
                 role_id = COALESCE($6, role_id), status = COALESCE($7, status), \
                 reference_id = COALESCE($8, reference_id), signup_type = COALESCE($9, signup_type) \
                 WHERE unique_identifier = $1 RETURNING ",
                profile_columns!()
            ),
            ProfileKey::Email(_) => concat!(
                "UPDATE profiles SET email = COALESCE($2, email), password = COALESCE($3, password), \
                 firstname = COALESCE($4, firstname), lastname = COALESCE($5, lastname), \
                 role_id = COALESCE($6, role_id), status = COALESCE($7, status), \
                 reference_id = COALESCE($8, reference_id), signup_type = COALESCE($9, signup_type) \
                 WHERE email = $1 RETURNING ",
                profile_columns!()
            ),
        };

        sqlx::query_as::<_, Profile>(sql)
            .bind(key.value())
            .bind(&changes.email)
            .bind(&changes.password)
            .bind(&changes.firstname)
            .bind(&changes.lastname)
            .bind(changes.role_id)
            .bind(&changes.status)
            .bind(&changes.reference_id)
            .bind(&changes.signup_type)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| key.not_found())
    }

    pub async fn set_status(&self, key: &ProfileKey, status: &str) -> Result<Profile, DbError> {
        require("status", status)?;
        self.update(
            key,
            ProfileUpdate {
                status: Some(status.to_owned()),
                ..ProfileUpdate::default()
            },
        )
        .await
    }

    /// Set `status` on every profile in `unique_identifiers`, all or nothing.
    ///
    /// If any identifier is unknown the transaction is rolled back and the
    /// missing identifiers are reported in `NotFound`.
    pub async fn set_status_many(
        &self,
        unique_identifiers: &[String],
        status: &str,
    ) -> Result<Vec<Profile>, DbError> {
        require("status", status)?;
        for id in unique_identifiers {
            require("unique_identifier", id)?;
        }
        if unique_identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, Profile>(concat!(
            "UPDATE profiles SET status = $2 WHERE unique_identifier = ANY($1) RETURNING ",
            profile_columns!()
        ))
        .bind(unique_identifiers)
        .bind(status)
        .fetch_all(&mut *tx)
        .await?;

        let missing: Vec<&str> = unique_identifiers
            .iter()
            .filter(|id| !updated.iter().any(|p| &p.unique_identifier == *id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            tx.rollback().await?;
            return Err(DbError::NotFound {
                resource: "profile",
                id: missing.join(", "),
            });
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Hard delete. Admin "delete" is a status change, not this.
    pub async fn delete(&self, key: &ProfileKey) -> Result<(), DbError> {
        key.validate()?;
        let sql = match key {
            ProfileKey::UniqueIdentifier(_) => "DELETE FROM profiles WHERE unique_identifier = $1",
            ProfileKey::Email(_) => "DELETE FROM profiles WHERE email = $1",
        };

        let result = sqlx::query(sql).bind(key.value()).execute(self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(key.not_found());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sqlx::postgres::PgPoolOptions;

    fn sample() -> Profile {
        Profile {
            id: 7,
            unique_identifier: "u-7".into(),
            role_id: Some(1),
            email: "ada@example.com".into(),
            password: Some("hunter2".into()),
            firstname: Some("Ada".into()),
            lastname: None,
            status: "active".into(),
            reference_id: None,
            signup_type: Some("invite".into()),
            created_at: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
        }
    }

    #[test]
    fn password_is_never_serialized() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["email"], "ada@example.com");
        assert_eq!(json["created_at"], "2024-01-02 03:04:05");
        assert!(json["lastname"].is_null());
    }

    #[tokio::test]
    async fn empty_keys_fail_before_touching_the_database() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        let repo = ProfileRepo::new(&pool);

        let err = repo.get(&ProfileKey::Email(String::new())).await.unwrap_err();
        assert!(matches!(err, DbError::EmptyKey { field: "email" }));

        let err = repo
            .set_status(&ProfileKey::UniqueIdentifier(" ".into()), "active")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::EmptyKey { field: "unique_identifier" }));

        let err = repo.create(NewProfile::default()).await.unwrap_err();
        assert!(matches!(err, DbError::EmptyKey { field: "email" }));

        let err = repo
            .set_status_many(&["u-1".into(), String::new()], "active")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::EmptyKey { field: "unique_identifier" }));

        assert!(repo.set_status_many(&[], "active").await.unwrap().is_empty());
    }

    // Run with: DATABASE_URL=postgres://... cargo test -p dbrelay-server -- --ignored

    #[tokio::test]
    #[ignore = "requires database"]
    async fn status_lifecycle() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool failed");
        crate::db::migrations::run(&pool, "dbrelay_repo_test").await.unwrap();
        let repo = ProfileRepo::new(&pool);

        let email = format!("{}@example.com", uuid::Uuid::new_v4());
        let created = repo
            .create(NewProfile {
                email: email.clone(),
                ..NewProfile::default()
            })
            .await
            .unwrap();
        assert_eq!(created.status, "pending");

        let key = ProfileKey::UniqueIdentifier(created.unique_identifier.clone());
        assert!(!repo.list_active().await.unwrap().iter().any(|p| p.email == email));

        repo.set_status(&key, "active").await.unwrap();
        assert!(repo.list_active().await.unwrap().iter().any(|p| p.email == email));

        repo.set_status(&key, "deleted").await.unwrap();
        assert!(repo.list_deleted().await.unwrap().iter().any(|p| p.email == email));

        repo.delete(&key).await.unwrap();
        assert!(matches!(repo.get(&key).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn bulk_status_is_all_or_nothing() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool failed");
        crate::db::migrations::run(&pool, "dbrelay_repo_test").await.unwrap();
        let repo = ProfileRepo::new(&pool);

        let mut ids = Vec::new();
        for _ in 0..2 {
            let created = repo
                .create(NewProfile {
                    email: format!("{}@example.com", uuid::Uuid::new_v4()),
                    ..NewProfile::default()
                })
                .await
                .unwrap();
            ids.push(created.unique_identifier);
        }

        let updated = repo.set_status_many(&ids, "active").await.unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|p| p.status == "active"));

        let mut with_unknown = ids.clone();
        with_unknown.push("no-such-profile".into());
        let err = repo.set_status_many(&with_unknown, "inactive").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { ref id, .. } if id == "no-such-profile"));

        for id in &ids {
            let key = ProfileKey::UniqueIdentifier(id.clone());
            assert_eq!(repo.get(&key).await.unwrap().status, "active");
            repo.delete(&key).await.unwrap();
        }
    }
}
