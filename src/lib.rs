//! Newsfeed fan-out with a bounded per-user list cache and cursor pagination.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
