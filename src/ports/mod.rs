//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `ModelGateway` - Language-model backend
//! - `MentorReader` - Read access to user, assessment, chat, plan, projection
//! - `TurnWriter` - Atomic commit of one turn's mutations

mod mentor_reader;
mod model_gateway;
mod turn_writer;

pub use mentor_reader::MentorReader;
pub use model_gateway::{GatewayError, GatewayErrorKind, GatewayInfo, ModelGateway};
pub use turn_writer::{
    PersistenceError, PlanSupersession, ProjectionRevision, TurnChangeSet, TurnWriter,
};
