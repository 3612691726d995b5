//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `ai` - Model gateways (Anthropic, scripted mock)
//! - `memory` - In-memory reader/writer for tests and development
//! - `postgres` - PostgreSQL reader/writer

pub mod ai;
pub mod memory;
pub mod postgres;

pub use ai::{AnthropicGateway, AnthropicGatewayConfig, MockModelGateway};
pub use memory::InMemoryMentorStore;
pub use postgres::{PostgresMentorReader, PostgresTurnWriter};
