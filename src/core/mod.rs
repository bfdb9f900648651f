// src/core/mod.rs
pub mod config;
pub mod identity;
pub mod roles;
