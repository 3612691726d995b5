//! Model Gateway Adapters.
//!
//! Implementations of the ModelGateway port.
//!
//! ## Available Adapters
//!
//! - `MockModelGateway` - Scripted gateway for testing
//! - `AnthropicGateway` - Anthropic Claude models via the Messages API

mod anthropic_gateway;
mod mock_gateway;

pub use anthropic_gateway::{AnthropicGateway, AnthropicGatewayConfig};
pub use mock_gateway::{MockModelGateway, MockReply, RecordedCall};
