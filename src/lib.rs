//! Request-keyed, disk-backed page cache for dynamic sites.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
