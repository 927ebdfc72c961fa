//! Bookline - dialogue orchestration engine for voice booking agents.
//!
//! Drives multi-turn spoken conversations toward a booking: collecting
//! and confirming a fixed set of facts while tolerating interruptions,
//! side questions, and repeated failures, and splitting each generated
//! reply stream into speakable text and a structured decision payload
//! before generation finishes.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
