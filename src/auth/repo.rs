use crate::auth::repo_types::User;
use sqlx::PgPool;
use uuid::Uuid;

/// True when `err` carries a Postgres unique-constraint violation (23505).
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|d| d.is_unique_violation())
}

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, google_id, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, google_id, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_google_id(db: &PgPool, google_id: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, google_id, created_at, updated_at
            FROM users
            WHERE google_id = $1
            "#,
        )
        .bind(google_id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user with hashed password.
    pub async fn create(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Create a Google-only account (empty password hash).
    pub async fn create_from_google(
        db: &PgPool,
        name: &str,
        email: &str,
        google_id: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash, google_id)
            VALUES ($1, $2, '', $3)
            RETURNING id, name, email, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(google_id)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Attach a Google identity to an existing password account.
    pub async fn link_google_id(db: &PgPool, id: Uuid, google_id: &str) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET google_id = $2, updated_at = now()
             WHERE id = $1
            RETURNING id, name, email, password_hash, google_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(google_id)
        .fetch_one(db)
        .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&anyhow::anyhow!("duplicate key")));
        assert!(!is_unique_violation(&anyhow::Error::new(sqlx::Error::RowNotFound)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn duplicate_email_is_a_unique_violation(db: PgPool) {
        User::create(&db, "First", "same@example.com", "hash").await.unwrap();
        let err = User::create(&db, "Second", "same@example.com", "hash")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
