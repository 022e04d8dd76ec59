//! Core types for the Mnemos agent-memory persistence layer.
//!
//! This crate defines the records, configuration and error types shared by the
//! storage crate and its callers. It contains no business logic.

pub mod agent;
pub mod config;
pub mod entity;
pub mod error;
pub mod memory;
pub mod task;
pub mod world;
