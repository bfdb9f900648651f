// src/crypto.rs
use std::collections::HashSet;
use std::sync::Mutex;

use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use base64::Engine;
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::config::HashingOptions;

pub const DEFAULT_PASSWORD_LENGTH: i64 = 16;

// Upper bound on a single password, in characters
pub const MAX_PASSWORD_LENGTH: i64 = 1 << 20;

/// Upper- and lowercase letters, digits and `!$%&#+-` (69 symbols).
pub const DEFAULT_CHARACTER_SET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!$%&#+-";

const RESET_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Secure random source unavailable: {0}")]
    EntropySourceUnavailable(String),

    #[error("Hashing error: {0}")]
    HashingError(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

lazy_static! {
    // One OS-backed generator for the whole process.
    static ref SYSTEM_GENERATOR: PasswordGenerator<OsRng> = PasswordGenerator::new(OsRng);
}

/// Generate a password of `length` characters drawn uniformly from
/// `character_set` (or [`DEFAULT_CHARACTER_SET`]) using the operating system CSPRNG.
pub fn generate_password(length: i64, character_set: Option<&str>) -> Result<String> {
    SYSTEM_GENERATOR.generate(length, character_set.unwrap_or(DEFAULT_CHARACTER_SET))
}

/// Remove repeated characters, keeping the first occurrence of each.
pub fn normalize_character_set(character_set: &str) -> Vec<char> {
    let mut seen = HashSet::new();
    character_set.chars().filter(|c| seen.insert(*c)).collect()
}

/// Password generator over a cryptographically secure random source.
///
/// The source sits behind a mutex so a single generator can be shared
/// between threads. Every draw goes through `try_fill_bytes`; a failing
/// source aborts generation with [`CryptoError::EntropySourceUnavailable`].
///
/// Index selection uses rejection sampling on 64-bit draws: values from the
/// incomplete top block of the `u64` range are discarded, so `value % n` is
/// exactly uniform. For alphabets of a few dozen symbols a redraw happens
/// with probability below 2^-57.
pub struct PasswordGenerator<R> {
    rng: Mutex<R>,
}

impl<R: RngCore + CryptoRng> PasswordGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng: Mutex::new(rng) }
    }

    pub fn generate(&self, length: i64, character_set: &str) -> Result<String> {
        if length <= 0 {
            return Err(CryptoError::InvalidArgument(format!(
                "password length must be positive, got {}",
                length
            )));
        }

        if length > MAX_PASSWORD_LENGTH {
            return Err(CryptoError::InvalidArgument(format!(
                "password length must not exceed {}, got {}",
                MAX_PASSWORD_LENGTH, length
            )));
        }

        let alphabet = normalize_character_set(character_set);
        if alphabet.len() < 2 {
            return Err(CryptoError::InvalidArgument(format!(
                "character set must contain at least 2 distinct characters, got {}",
                alphabet.len()
            )));
        }

        let length = usize::try_from(length)
            .map_err(|_| CryptoError::InvalidArgument(format!("password length {} is too large", length)))?;

        let mut rng = self
            .rng
            .lock()
            .map_err(|_| CryptoError::EntropySourceUnavailable("random source lock poisoned".into()))?;

        let mut password = String::with_capacity(length);
        for _ in 0..length {
            let index = uniform_index(&mut *rng, alphabet.len() as u64)?;
            password.push(alphabet[index]);
        }

        Ok(password)
    }
}

// Uniform index in 0..bound, bound >= 2.
fn uniform_index<R: RngCore + ?Sized>(rng: &mut R, bound: u64) -> Result<usize> {
    // 2^64 mod bound
    let remainder = (u64::MAX % bound + 1) % bound;
    let limit = u64::MAX - remainder;

    loop {
        let value = next_u64(rng)?;
        if value <= limit {
            return Ok((value % bound) as usize);
        }
    }
}

fn next_u64<R: RngCore + ?Sized>(rng: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::EntropySourceUnavailable(e.to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}

// Hash a password with Argon2id, returning the PHC string
pub fn hash_password(password: &str, options: &HashingOptions) -> Result<String> {
    let params = argon2::Params::new(
        options.memory_cost,
        options.time_cost,
        options.parallelism,
        None,
    )
    .map_err(|e| CryptoError::HashingError(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::HashingError(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Fresh password reset token, URL-safe base64 of 32 random bytes.
pub fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::EntropySourceUnavailable(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

// Only this digest of a reset token is ever stored
pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
