//! Page cache reverse proxy: local and remote tiers in front of an HTTP origin.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
