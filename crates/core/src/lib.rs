//! Core types and utilities for the funding-rate aggregator
//!
//! This crate provides shared types used across all components:
//! - Canonical funding snapshot and history records
//! - Normalization of heterogeneous timestamps and numbers
//! - Connector and configuration error kinds
//! - Service configuration and its environment loader

pub mod types;
pub mod normalization;
pub mod config;
pub mod errors;

pub use types::*;
pub use normalization::*;
pub use config::*;
pub use errors::*;
