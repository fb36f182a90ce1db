//! Cache-consistent shop lookups and a contention-safe flash-sale order pipeline.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
