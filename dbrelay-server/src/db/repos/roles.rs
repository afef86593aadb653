//! Role repository

use serde::Serialize;
use sqlx::{FromRow, PgPool};

use super::{require, DbError};

#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleKey {
    Id(i32),
    Name(String),
}

impl RoleKey {
    fn not_found(&self) -> DbError {
        let id = match self {
            Self::Id(id) => id.to_string(),
            Self::Name(name) => name.clone(),
        };
        DbError::NotFound { resource: "role", id }
    }
}

/// Role repository
pub struct RoleRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> RoleRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &RoleKey) -> Result<Role, DbError> {
        let query = match key {
            RoleKey::Id(id) => sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE id = $1").bind(*id),
            RoleKey::Name(name) => {
                require("name", name)?;
                sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE name = $1").bind(name.as_str())
            }
        };

        query
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| key.not_found())
    }

    pub async fn list(&self) -> Result<Vec<Role>, DbError> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(self.pool)
            .await?;
        Ok(roles)
    }

    /// Create a role, returning the existing one on a name conflict.
    pub async fn create(&self, name: &str) -> Result<Role, DbError> {
        require("name", name)?;
        let role = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name) VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, name
            "#,
        )
        .bind(name)
        .fetch_one(self.pool)
        .await?;
        Ok(role)
    }

    pub async fn update(&self, key: &RoleKey, name: &str) -> Result<Role, DbError> {
        require("name", name)?;
        let query = match key {
            RoleKey::Id(id) => {
                sqlx::query_as::<_, Role>("UPDATE roles SET name = $2 WHERE id = $1 RETURNING id, name")
                    .bind(*id)
            }
            RoleKey::Name(current) => {
                require("name", current)?;
                sqlx::query_as::<_, Role>("UPDATE roles SET name = $2 WHERE name = $1 RETURNING id, name")
                    .bind(current.as_str())
            }
        };

        query
            .bind(name)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| key.not_found())
    }

    pub async fn delete(&self, key: &RoleKey) -> Result<(), DbError> {
        let query = match key {
            RoleKey::Id(id) => sqlx::query("DELETE FROM roles WHERE id = $1").bind(*id),
            RoleKey::Name(name) => {
                require("name", name)?;
                sqlx::query("DELETE FROM roles WHERE name = $1").bind(name.as_str())
            }
        };

        let result = query.execute(self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(key.not_found());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn not_found_names_the_key() {
        let err = RoleKey::Id(42).not_found();
        assert_eq!(err.to_string(), "not found: role '42'");
        let err = RoleKey::Name("admin".into()).not_found();
        assert_eq!(err.to_string(), "not found: role 'admin'");
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        let repo = RoleRepo::new(&pool);
        assert!(matches!(repo.create("").await, Err(DbError::EmptyKey { field: "name" })));
        assert!(matches!(
            repo.get(&RoleKey::Name(" ".into())).await,
            Err(DbError::EmptyKey { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn create_is_idempotent() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool failed");
        crate::db::migrations::run(&pool, "dbrelay_repo_test").await.unwrap();
        let repo = RoleRepo::new(&pool);

        let name = format!("role-{}", uuid::Uuid::new_v4());
        let first = repo.create(&name).await.unwrap();
        let second = repo.create(&name).await.unwrap();
        assert_eq!(first, second);

        repo.delete(&RoleKey::Id(first.id)).await.unwrap();
        assert!(matches!(repo.get(&RoleKey::Name(name)).await, Err(DbError::NotFound { .. })));
    }
}
