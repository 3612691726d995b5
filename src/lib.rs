//! Mentor Core - conversational mentoring agent
//!
//! Assembles a user's context, asks a language model for a reply plus
//! structured plan and projection changes, validates the output with a
//! bounded retry loop, and commits the turn atomically.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
