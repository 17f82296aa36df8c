//! Keygate - license activation and session-concurrency server
//!
//! Decides which device may hold an active seat on a shared license, enforces
//! per-license device and concurrency ceilings under concurrent requests,
//! issues short-lived signed proof-of-entitlement tokens, reclaims seats from
//! silent devices, and converts one-time redeem codes into licenses.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod licensing;
pub mod models;
pub mod rate_limit;
pub mod redeem;
pub mod tokens;
pub mod util;
