//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `mentor` - Mentoring state, context bundle, output schema, retry policy

pub mod foundation;
pub mod mentor;
