// src/core/identity.rs
use std::collections::HashSet;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::core::config::{Config, PasswordOptions, UserOptions};
use crate::crypto::{self, CryptoError, DEFAULT_CHARACTER_SET};
use crate::db::{DatabaseBackend, DbError};
use crate::models::{new_security_stamp, normalize, PasswordResetToken, User};

// Attempts at drawing a password that passes the policy
const PASSWORD_ATTEMPTS: usize = 32;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{}", .0.join("\n"))]
    Rejected(Vec<String>),

    #[error("Invalid token.")]
    InvalidToken,

    #[error("Role {0} does not exist.")]
    RoleNotFound(String),

    #[error("User already in role '{0}'.")]
    AlreadyInRole(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl IdentityError {
    // Individual messages, one per problem
    pub fn descriptions(&self) -> Vec<String> {
        match self {
            IdentityError::Rejected(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// User-management operations over any [`DatabaseBackend`].
pub struct UserManager<'a, B: DatabaseBackend> {
    store: &'a B,
    config: &'a Config,
}

impl<'a, B: DatabaseBackend> UserManager<'a, B> {
    pub fn new(store: &'a B, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Draw a password from the secure generator that also satisfies the
    /// configured password policy.
    pub fn generate_password(&self) -> Result<String> {
        let policy = &self.config.identity.password;
        let mut violations = Vec::new();

        for _ in 0..PASSWORD_ATTEMPTS {
            let candidate =
                crypto::generate_password(self.config.default_password_length, Some(DEFAULT_CHARACTER_SET))?;
            violations = validate_password(policy, &candidate);
            if violations.is_empty() {
                return Ok(candidate);
            }
        }

        Err(IdentityError::Rejected(violations))
    }

    pub async fn create_user(&self, user_name: &str, email: &str, password: &str) -> Result<User> {
        let user_name = user_name.trim();
        let email = email.trim();
        let normalized_user_name = normalize(user_name);
        let normalized_email = normalize(email);

        let mut errors = validate_user_name(&self.config.identity.user, user_name);
        if !is_valid_email(email) {
            errors.push(format!("Email '{}' is invalid.", email));
        }

        if !user_name.is_empty()
            && self.store.find_user_by_name(&normalized_user_name).await?.is_some()
        {
            errors.push(format!("Username '{}' is already taken.", user_name));
        }

        if self.config.identity.user.require_unique_email
            && !email.is_empty()
            && self.store.find_user_by_email(&normalized_email).await?.is_some()
        {
            errors.push(format!("Email '{}' is already taken.", email));
        }

        errors.extend(validate_password(&self.config.identity.password, password));

        if !errors.is_empty() {
            log::warn!("Rejected new user {}: {} problem(s)", user_name, errors.len());
            return Err(IdentityError::Rejected(errors));
        }

        let user = User {
            id: Uuid::new_v4(),
            user_name: user_name.to_string(),
            normalized_user_name,
            email: email.to_string(),
            normalized_email,
            password_hash: crypto::hash_password(password, &self.config.hashing)?,
            security_stamp: new_security_stamp(),
            created_at: Utc::now(),
        };

        self.store.create_user(&user).await?;
        log::info!("Created user {} ({})", user.user_name, user.id);

        Ok(user)
    }

    pub async fn find_by_name(&self, user_name: &str) -> Result<Option<User>> {
        Ok(self.store.find_user_by_name(&normalize(user_name)).await?)
    }

    /// Issue a single-use password reset token for `user`. Only its digest is
    /// stored; the token is bound to the user's current security stamp.
    pub async fn generate_password_reset_token(&self, user: &User) -> Result<String> {
        let token = crypto::generate_reset_token()?;

        let record = PasswordResetToken {
            token_hash: crypto::hash_reset_token(&token),
            user_id: user.id,
            security_stamp: user.security_stamp.clone(),
            expires_at: Utc::now() + self.config.reset_token_lifespan,
        };
        self.store.store_reset_token(&record).await?;

        log::debug!("Issued password reset token for {} valid until {}", user.user_name, record.expires_at);
        Ok(token)
    }

    pub async fn reset_password(&self, user: &User, token: &str, new_password: &str) -> Result<()> {
        let record = self
            .store
            .find_reset_token(&crypto::hash_reset_token(token))
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        // the stamp may have moved on since `user` was loaded
        let current = self
            .store
            .find_user_by_name(&user.normalized_user_name)
            .await?
            .filter(|u| u.id == user.id)
            .ok_or(IdentityError::InvalidToken)?;

        if record.user_id != current.id
            || record.security_stamp != current.security_stamp
            || record.expires_at <= Utc::now()
        {
            log::warn!("Rejected password reset token for {}", current.user_name);
            return Err(IdentityError::InvalidToken);
        }

        let violations = validate_password(&self.config.identity.password, new_password);
        if !violations.is_empty() {
            return Err(IdentityError::Rejected(violations));
        }

        let password_hash = crypto::hash_password(new_password, &self.config.hashing)?;
        self.store
            .reset_password(current.id, &password_hash, &new_security_stamp())
            .await?;

        log::info!("Password reset for {}", current.user_name);
        Ok(())
    }

    /// Replace the password of `user` with a freshly generated one, going
    /// through a reset token. Returns the new password.
    pub async fn reset_with_generated_password(&self, user: &User) -> Result<String> {
        // draw first, a failed draw must not leave a token behind
        let new_password = self.generate_password()?;
        let token = self.generate_password_reset_token(user).await?;
        self.reset_password(user, &token, &new_password).await?;
        Ok(new_password)
    }

    pub async fn add_to_role(&self, user: &User, role_name: &str) -> Result<()> {
        let role = self
            .store
            .find_role(&normalize(role_name))
            .await?
            .ok_or_else(|| IdentityError::RoleNotFound(role_name.to_string()))?;

        let current = self.store.get_user_roles(user.id).await?;
        if current.iter().any(|r| normalize(r) == role.normalized_name) {
            return Err(IdentityError::AlreadyInRole(role.name));
        }

        self.store.add_user_to_role(user.id, role.id).await?;
        log::info!("Added {} to role {}", user.user_name, role.name);
        Ok(())
    }

    pub async fn roles_of(&self, user: &User) -> Result<Vec<String>> {
        Ok(self.store.get_user_roles(user.id).await?)
    }
}

// Policy violations of `password`, empty when it is acceptable
pub fn validate_password(options: &PasswordOptions, password: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if password.chars().count() < options.required_length {
        errors.push(format!(
            "Passwords must be at least {} characters.",
            options.required_length
        ));
    }
    if options.require_non_alphanumeric && password.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.push("Passwords must have at least one non alphanumeric character.".to_string());
    }
    if options.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Passwords must have at least one digit ('0'-'9').".to_string());
    }
    if options.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Passwords must have at least one lowercase ('a'-'z').".to_string());
    }
    if options.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Passwords must have at least one uppercase ('A'-'Z').".to_string());
    }
    if options.required_unique_chars > 1
        && password.chars().collect::<HashSet<_>>().len() < options.required_unique_chars
    {
        errors.push(format!(
            "Passwords must use at least {} different characters.",
            options.required_unique_chars
        ));
    }

    errors
}

pub fn validate_user_name(options: &UserOptions, user_name: &str) -> Vec<String> {
    if user_name.is_empty() {
        return vec!["Username '' is invalid, can only contain letters or digits.".to_string()];
    }

    let allowed = &options.allowed_user_name_characters;
    if !allowed.is_empty() && user_name.chars().any(|c| !allowed.contains(c)) {
        return vec![format!(
            "Username '{}' is invalid, can only contain letters or digits.",
            user_name
        )];
    }

    Vec::new()
}

// One '@' with something on both sides and no whitespace
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HashingOptions;
    use crate::core::roles::{self, ADMINISTRATOR, USER};
    use crate::db::migrations;
    use crate::db::sqlite::SqliteBackend;
    use argon2::{Argon2, PasswordHash, PasswordVerifier};
    use chrono::Duration;
    use tempfile::TempDir;

    const GOOD_PASSWORD: &str = "Sturdy-Passw0rd";

    fn test_config() -> Config {
        Config {
            // cheap hashing keeps the tests fast
            hashing: HashingOptions {
                memory_cost: 1024,
                time_cost: 1,
                parallelism: 1,
            },
            ..Config::default()
        }
    }

    async fn store(dir: &TempDir) -> SqliteBackend {
        let mut db = SqliteBackend::new();
        let path = dir.path().join("identity.db");
        db.init(&format!("sqlite:{}", path.display())).await.unwrap();
        migrations::migrate(&db).await.unwrap();
        roles::seed_roles(&db).await.unwrap();
        db
    }

    fn verifies(hash: &str, password: &str) -> bool {
        let parsed = PasswordHash::new(hash).unwrap();
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    }

    #[test]
    fn policy_reports_every_violation() {
        let options = PasswordOptions {
            required_unique_chars: 4,
            require_non_alphanumeric: true,
            ..PasswordOptions::default()
        };
        let errors = validate_password(&options, "aaa");
        assert_eq!(errors.len(), 5);
        assert!(errors[0].contains("at least 12 characters"));

        assert!(validate_password(&PasswordOptions::default(), GOOD_PASSWORD).is_empty());
    }

    #[test]
    fn user_names_and_emails_are_checked() {
        let options = UserOptions::default();
        assert!(validate_user_name(&options, "ops.admin+1@example.com").is_empty());
        assert_eq!(validate_user_name(&options, "two words").len(), 1);
        assert_eq!(validate_user_name(&options, "").len(), 1);

        assert!(is_valid_email("ops@example.com"));
        assert!(!is_valid_email("ops.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ops@"));
        assert!(!is_valid_email("ops@a@b"));
    }

    #[test]
    fn generated_passwords_satisfy_policy() {
        let config = test_config();
        let db = SqliteBackend::new();
        let manager = UserManager::new(&db, &config);

        for _ in 0..20 {
            let password = manager.generate_password().unwrap();
            assert_eq!(password.chars().count(), 16);
            assert!(validate_password(&config.identity.password, &password).is_empty());
        }
    }

    #[test]
    fn too_short_default_length_is_reported() {
        let config = Config {
            default_password_length: 8,
            ..test_config()
        };
        let db = SqliteBackend::new();
        let manager = UserManager::new(&db, &config);

        match manager.generate_password() {
            Err(IdentityError::Rejected(errors)) => {
                assert!(errors.iter().any(|e| e.contains("at least 12 characters")))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn creates_user_with_hashed_password() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let config = test_config();
        let manager = UserManager::new(&db, &config);

        let user = manager
            .create_user("ops@example.com", "ops@example.com", GOOD_PASSWORD)
            .await
            .unwrap();
        assert_eq!(user.normalized_user_name, "OPS@EXAMPLE.COM");
        assert!(verifies(&user.password_hash, GOOD_PASSWORD));

        let found = manager.find_by_name("Ops@Example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(manager.find_by_name("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_and_weak_users_are_rejected_together() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let config = test_config();
        let manager = UserManager::new(&db, &config);

        manager
            .create_user("ops@example.com", "ops@example.com", GOOD_PASSWORD)
            .await
            .unwrap();

        let err = manager
            .create_user("OPS@example.com", "OPS@example.com", "short")
            .await
            .unwrap_err();
        let descriptions = err.descriptions();
        assert!(descriptions.iter().any(|d| d.contains("Username 'OPS@example.com' is already taken")));
        assert!(descriptions.iter().any(|d| d.contains("Email 'OPS@example.com' is already taken")));
        assert!(descriptions.iter().any(|d| d.contains("at least 12 characters")));

        let err = manager.create_user("bad name", "not-an-email", GOOD_PASSWORD).await.unwrap_err();
        assert_eq!(err.descriptions().len(), 2);
    }

    #[tokio::test]
    async fn reset_token_changes_password_once() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let config = test_config();
        let manager = UserManager::new(&db, &config);

        let user = manager
            .create_user("ops@example.com", "ops@example.com", GOOD_PASSWORD)
            .await
            .unwrap();

        let token = manager.generate_password_reset_token(&user).await.unwrap();
        let new_password = manager.generate_password().unwrap();
        manager.reset_password(&user, &token, &new_password).await.unwrap();

        let stored = manager.find_by_name("ops@example.com").await.unwrap().unwrap();
        assert!(verifies(&stored.password_hash, &new_password));
        assert_ne!(stored.security_stamp, user.security_stamp);

        // single use
        let err = manager.reset_password(&stored, &token, GOOD_PASSWORD).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));
    }

    #[tokio::test]
    async fn stale_and_foreign_tokens_are_rejected() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let config = test_config();
        let manager = UserManager::new(&db, &config);

        let alice = manager
            .create_user("alice@example.com", "alice@example.com", GOOD_PASSWORD)
            .await
            .unwrap();
        let bob = manager
            .create_user("bob@example.com", "bob@example.com", GOOD_PASSWORD)
            .await
            .unwrap();

        let err = manager.reset_password(&alice, "made-up", GOOD_PASSWORD).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));

        let bobs_token = manager.generate_password_reset_token(&bob).await.unwrap();
        let err = manager.reset_password(&alice, &bobs_token, GOOD_PASSWORD).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));

        // a second reset invalidates the first token
        let first = manager.generate_password_reset_token(&alice).await.unwrap();
        let second = manager.generate_password_reset_token(&alice).await.unwrap();
        manager.reset_password(&alice, &second, "Another-Passw0rd").await.unwrap();
        let err = manager.reset_password(&alice, &first, GOOD_PASSWORD).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_weak_password_refused() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let expired = Config {
            reset_token_lifespan: Duration::seconds(-1),
            ..test_config()
        };
        let config = test_config();

        let user = UserManager::new(&db, &config)
            .create_user("ops@example.com", "ops@example.com", GOOD_PASSWORD)
            .await
            .unwrap();

        let stale = UserManager::new(&db, &expired)
            .generate_password_reset_token(&user)
            .await
            .unwrap();
        let manager = UserManager::new(&db, &config);
        let err = manager.reset_password(&user, &stale, GOOD_PASSWORD).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));

        let fresh = manager.generate_password_reset_token(&user).await.unwrap();
        let err = manager.reset_password(&user, &fresh, "weak").await.unwrap_err();
        assert!(matches!(err, IdentityError::Rejected(_)));
    }

    async fn reset_token_count(db: &SqliteBackend) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM password_reset_tokens")
            .fetch_one(db.get_pool().unwrap())
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn generated_reset_leaves_no_tokens() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let config = test_config();
        let manager = UserManager::new(&db, &config);

        let user = manager
            .create_user("ops@example.com", "ops@example.com", GOOD_PASSWORD)
            .await
            .unwrap();

        let new_password = manager.reset_with_generated_password(&user).await.unwrap();
        let stored = manager.find_by_name("ops@example.com").await.unwrap().unwrap();
        assert!(verifies(&stored.password_hash, &new_password));
        assert_eq!(reset_token_count(&db).await, 0);

        // a policy the generator cannot meet fails before any token is issued
        let short = Config {
            default_password_length: 8,
            ..test_config()
        };
        let err = UserManager::new(&db, &short)
            .reset_with_generated_password(&stored)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Rejected(_)));
        assert_eq!(reset_token_count(&db).await, 0);
    }

    #[tokio::test]
    async fn role_membership() {
        let dir = TempDir::new().unwrap();
        let db = store(&dir).await;
        let config = test_config();
        let manager = UserManager::new(&db, &config);

        let user = manager
            .create_user("ops@example.com", "ops@example.com", GOOD_PASSWORD)
            .await
            .unwrap();

        manager.add_to_role(&user, ADMINISTRATOR).await.unwrap();
        manager.add_to_role(&user, "user").await.unwrap();
        assert_eq!(
            manager.roles_of(&user).await.unwrap(),
            vec![ADMINISTRATOR.to_string(), USER.to_string()]
        );

        let err = manager.add_to_role(&user, USER).await.unwrap_err();
        assert!(matches!(err, IdentityError::AlreadyInRole(_)));

        let err = manager.add_to_role(&user, "Auditor").await.unwrap_err();
        assert!(matches!(err, IdentityError::RoleNotFound(_)));
    }
}
