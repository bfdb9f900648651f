// src/core/roles.rs
use thiserror::Error;

use crate::db::{DatabaseBackend, DbError};
use crate::models::Role;

pub const ADMINISTRATOR: &str = "Administrator";
pub const USER: &str = "User";

pub const ALL_ROLES: [&str; 2] = [ADMINISTRATOR, USER];

#[derive(Debug, Error, PartialEq)]
pub enum RoleError {
    #[error("No role name given")]
    Missing,

    #[error("Invalid role name: {0}")]
    Invalid(String),
}

/// Check a role name given on the command line against the built-in roles,
/// ignoring case, and return its canonical spelling.
pub fn check_role(role: Option<&str>) -> Result<&'static str, RoleError> {
    let role = role.map(str::trim).filter(|r| !r.is_empty()).ok_or(RoleError::Missing)?;

    ALL_ROLES
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(role))
        .ok_or_else(|| RoleError::Invalid(role.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Initialized,
    AlreadyInitialized,
}

// Fill an empty role table with the built-in roles, all or nothing
pub async fn seed_roles<B: DatabaseBackend>(db: &B) -> Result<SeedOutcome, DbError> {
    let existing = db.get_roles().await?;
    if !existing.is_empty() {
        log::debug!("Role table already holds {} roles", existing.len());
        return Ok(SeedOutcome::AlreadyInitialized);
    }

    let mut tx = db.begin_transaction().await?;
    for name in ALL_ROLES {
        if let Err(e) = db.add_role_in_transaction(&mut tx, &Role::new(name)).await {
            log::error!("Seeding role {} failed: {}", name, e);
            db.rollback_transaction(tx).await?;
            return Err(e);
        }
    }
    db.commit_transaction(tx).await?;

    log::info!("Seeded roles: {}", ALL_ROLES.join(", "));
    Ok(SeedOutcome::Initialized)
}
