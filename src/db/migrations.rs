// src/db/migrations.rs
//
// Forward-only schema migrations. Ids sort chronologically; each migration
// runs in its own transaction together with its history row.

use super::{DatabaseBackend, DbError};

pub const HISTORY_TABLE: &str = "__migrations_history";

#[derive(Debug)]
pub struct Migration {
    pub id: &'static str,
    pub sqlite: &'static [&'static str],
    pub mysql: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "20240301120000_CreateIdentitySchema",
        sqlite: &[
            r#"
            CREATE TABLE users (
                id TEXT PRIMARY KEY NOT NULL,
                user_name TEXT NOT NULL,
                normalized_user_name TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                normalized_email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                security_stamp TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_users_normalized_email ON users(normalized_email)",
            r#"
            CREATE TABLE roles (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE user_roles (
                user_id TEXT NOT NULL,
                role_id TEXT NOT NULL,
                PRIMARY KEY (user_id, role_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
            )
            "#,
        ],
        mysql: &[
            r#"
            CREATE TABLE users (
                id VARCHAR(36) NOT NULL PRIMARY KEY,
                user_name VARCHAR(256) NOT NULL,
                normalized_user_name VARCHAR(256) NOT NULL,
                email VARCHAR(256) NOT NULL,
                normalized_email VARCHAR(256) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                security_stamp VARCHAR(64) NOT NULL,
                created_at VARCHAR(40) NOT NULL,
                UNIQUE KEY ux_users_normalized_user_name (normalized_user_name),
                KEY idx_users_normalized_email (normalized_email)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
            r#"
            CREATE TABLE roles (
                id VARCHAR(36) NOT NULL PRIMARY KEY,
                name VARCHAR(256) NOT NULL,
                normalized_name VARCHAR(256) NOT NULL,
                UNIQUE KEY ux_roles_normalized_name (normalized_name)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
            r#"
            CREATE TABLE user_roles (
                user_id VARCHAR(36) NOT NULL,
                role_id VARCHAR(36) NOT NULL,
                PRIMARY KEY (user_id, role_id),
                CONSTRAINT fk_user_roles_user FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT fk_user_roles_role FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        ],
    },
    Migration {
        id: "20240315090000_AddPasswordResetTokens",
        sqlite: &[
            r#"
            CREATE TABLE password_reset_tokens (
                token_hash TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                security_stamp TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
            "#,
            "CREATE INDEX idx_password_reset_tokens_user ON password_reset_tokens(user_id)",
        ],
        mysql: &[
            r#"
            CREATE TABLE password_reset_tokens (
                token_hash CHAR(64) NOT NULL PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                security_stamp VARCHAR(64) NOT NULL,
                expires_at VARCHAR(40) NOT NULL,
                KEY idx_password_reset_tokens_user (user_id),
                CONSTRAINT fk_password_reset_tokens_user FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        ],
    },
];

// Migrations not yet recorded in the history table, in application order
pub async fn pending<B: DatabaseBackend>(db: &B) -> Result<Vec<&'static Migration>, DbError> {
    let applied = db.applied_migrations().await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.iter().any(|id| id == m.id))
        .collect())
}

/// Apply every pending migration and return the ids that were applied.
pub async fn migrate<B: DatabaseBackend>(db: &B) -> Result<Vec<&'static str>, DbError> {
    let pending = pending(db).await?;
    if pending.is_empty() {
        log::info!("Database schema is up to date");
        return Ok(Vec::new());
    }

    let mut applied = Vec::with_capacity(pending.len());
    for migration in pending {
        log::info!("Applying migration {}", migration.id);
        db.apply_migration(migration).await?;
        applied.push(migration.id);
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteBackend;
    use tempfile::TempDir;

    async fn backend(dir: &TempDir) -> SqliteBackend {
        let mut backend = SqliteBackend::new();
        let path = dir.path().join("migrations.db");
        backend.init(&format!("sqlite:{}", path.display())).await.unwrap();
        backend
    }

    #[test]
    fn migration_ids_are_unique_and_ordered() {
        let ids: Vec<&str> = MIGRATIONS.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn every_migration_has_both_dialects() {
        for migration in MIGRATIONS {
            assert!(!migration.sqlite.is_empty(), "{} lacks sqlite", migration.id);
            assert!(!migration.mysql.is_empty(), "{} lacks mysql", migration.id);
        }
    }

    #[tokio::test]
    async fn fresh_database_has_all_migrations_pending() {
        let dir = TempDir::new().unwrap();
        let db = backend(&dir).await;

        let pending = pending(&db).await.unwrap();
        assert_eq!(pending.len(), MIGRATIONS.len());
        assert!(!db.has_migration_history().await.unwrap());
    }

    #[tokio::test]
    async fn migrate_applies_once() {
        let dir = TempDir::new().unwrap();
        let db = backend(&dir).await;

        let first = migrate(&db).await.unwrap();
        assert_eq!(first, MIGRATIONS.iter().map(|m| m.id).collect::<Vec<_>>());

        let second = migrate(&db).await.unwrap();
        assert!(second.is_empty());
        assert!(pending(&db).await.unwrap().is_empty());
        assert_eq!(db.applied_migrations().await.unwrap().len(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn failed_migration_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let db = backend(&dir).await;

        let broken = Migration {
            id: "29990101000000_Broken",
            sqlite: &["CREATE TABLE half_done (id TEXT)", "THIS IS NOT SQL"],
            mysql: &["THIS IS NOT SQL"],
        };

        let err = db.apply_migration(&broken).await.unwrap_err();
        assert!(matches!(err, DbError::MigrationError { .. }));
        assert!(!db
            .applied_migrations()
            .await
            .unwrap()
            .iter()
            .any(|id| id == broken.id));
    }
}
