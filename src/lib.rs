//! voip.ms SMS bridge: per-account polling, dedup and room routing.

pub mod accounts;
pub mod bridge;
pub mod config;
pub mod error;
pub mod poller;
pub mod provider;
pub mod router;
