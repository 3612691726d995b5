//! PostgreSQL adapters - Database implementations for the mentor ports.
//!
//! This module provides adapters for PostgreSQL-backed persistence:
//! - `PostgresMentorReader` - Read queries for context assembly
//! - `PostgresTurnWriter` - Transactional commit of one turn
//! - `connect` / `run_migrations` - Pool setup and schema

mod mentor_reader;
mod pool;
mod rows;
mod turn_writer;

pub use mentor_reader::PostgresMentorReader;
pub use pool::{connect, run_migrations};
pub use turn_writer::PostgresTurnWriter;
