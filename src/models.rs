// src/models.rs
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub user_name: String,
    pub normalized_user_name: String,
    pub email: String,
    pub normalized_email: String,
    pub password_hash: String, // Argon2id PHC string
    pub security_stamp: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub normalized_name: String,
}

impl Role {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            normalized_name: normalize(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasswordResetToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub security_stamp: String, // stamp of the user when the token was issued
    pub expires_at: DateTime<Utc>,
}

// Lookup key for user names, emails and role names
pub fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

pub fn new_security_stamp() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}
