//! # CanSat Ground Station Library
//!
//! Telemetry ingestion and session tracking for a CanSat ground station.
//!
//! This library provides the core the operator UI sits on: decoding the
//! vehicle's telemetry, accounting for lost packets, keeping a bounded
//! session buffer with derived metrics, and sending commands back up.

pub mod bridge;
pub mod config;
pub mod error;
pub mod metrics;
pub mod serial;
pub mod session;
pub mod source;
pub mod station;
pub mod telemetry;
pub mod uplink;
