//! Core types, config, and errors for the Shopfront agent.

pub mod config;
pub mod error;
pub mod types;
