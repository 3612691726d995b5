//! Mock Model Gateway for testing.
//!
//! Scripted implementation of the [`ModelGateway`] port so turns can run
//! without a real provider.
//!
//! # Features
//!
//! - Scripted replies consumed in order, plus an optional repeating fallback
//! - Simulated latency for timeout testing
//! - Error injection for every gateway error kind
//! - Call recording (bundle fingerprint and corrective instruction)
//!
//! # Example
//!
//! ```ignore
//! let gateway = MockModelGateway::new()
//!     .with_json(json!({ "reply": "" }))
//!     .with_json(json!({ "reply": "Let's break it down." }));
//!
//! // First call fails validation, second succeeds.
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::domain::mentor::{ContextBundle, CorrectiveInstruction, OutputSchema, RawOutput};
use crate::ports::{GatewayError, GatewayInfo, ModelGateway};

/// A scripted gateway result.
#[derive(Debug, Clone)]
pub enum MockReply {
    Output(RawOutput),
    Error(GatewayError),
}

/// What the gateway was asked on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Fingerprint of the context bundle received.
    pub fingerprint: String,
    pub user_message: String,
    /// Corrective instruction text, `None` on a first attempt.
    pub corrective: Option<String>,
}

/// Mock model gateway.
#[derive(Debug, Clone)]
pub struct MockModelGateway {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    /// Returned once the script runs out.
    fallback: Option<MockReply>,
    info: GatewayInfo,
    delay: Duration,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl Default for MockModelGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockModelGateway {
    /// Creates a mock with an empty script.
    ///
    /// With no script and no fallback every call fails as `Unavailable`.
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            fallback: None,
            info: GatewayInfo::new("mock", "mock-mentor-1"),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues a structured reply.
    pub fn with_json(self, value: Value) -> Self {
        self.with_reply(MockReply::Output(RawOutput::Json(value)))
    }

    /// Queues a free-text reply.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(MockReply::Output(RawOutput::Text(text.into())))
    }

    /// Queues an error.
    pub fn with_error(self, error: GatewayError) -> Self {
        self.with_reply(MockReply::Error(error))
    }

    /// Queues any scripted result.
    pub fn with_reply(self, reply: MockReply) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Sets the result returned after the script runs out.
    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Sets simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gateway_info(mut self, info: GatewayInfo) -> Self {
        self.info = info;
        self
    }

    /// Returns the number of calls made.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Returns all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Clears the call history.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn next_reply(&self) -> MockReply {
        lock(&self.replies)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                MockReply::Error(GatewayError::unavailable("mock gateway script exhausted"))
            })
    }
}

#[async_trait]
impl ModelGateway for MockModelGateway {
    async fn generate(
        &self,
        bundle: &ContextBundle,
        _schema: &OutputSchema,
        corrective: Option<&CorrectiveInstruction>,
    ) -> Result<RawOutput, GatewayError> {
        let fingerprint = bundle
            .fingerprint()
            .unwrap_or_else(|e| format!("unfingerprintable: {}", e));
        lock(&self.calls).push(RecordedCall {
            fingerprint,
            user_message: bundle.user_message().to_string(),
            corrective: corrective.map(|c| c.as_str().to_string()),
        });

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.next_reply() {
            MockReply::Output(raw) => Ok(raw),
            MockReply::Error(err) => Err(err),
        }
    }

    fn gateway_info(&self) -> GatewayInfo {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use crate::domain::mentor::{Assessment, AssessmentAnswer, MentorUser, MessageWindow};
    use serde_json::json;

    fn bundle() -> ContextBundle {
        let user_id = UserId::new("mock-user").unwrap();
        ContextBundle::new(
            &MentorUser::new(user_id.clone()),
            Assessment::new(user_id, vec![AssessmentAnswer::text("Goal?", "Ship")]),
            MessageWindow::default(),
            None,
            None,
            "hello",
        )
    }

    #[tokio::test]
    async fn returns_script_in_order_then_fallback() {
        let gateway = MockModelGateway::new()
            .with_json(json!({ "reply": "first" }))
            .with_error(GatewayError::rate_limited(Some(1)))
            .with_fallback(MockReply::Output(RawOutput::Text("again".to_string())));
        let schema = OutputSchema::default();

        let first = gateway.generate(&bundle(), &schema, None).await.unwrap();
        let second = gateway.generate(&bundle(), &schema, None).await.unwrap_err();
        let third = gateway.generate(&bundle(), &schema, None).await.unwrap();
        let fourth = gateway.generate(&bundle(), &schema, None).await.unwrap();

        assert_eq!(first, RawOutput::Json(json!({ "reply": "first" })));
        assert_eq!(second, GatewayError::rate_limited(Some(1)));
        assert_eq!(third, RawOutput::Text("again".to_string()));
        assert_eq!(fourth, third);
    }

    #[tokio::test]
    async fn empty_script_is_unavailable() {
        let gateway = MockModelGateway::new();
        let err = gateway
            .generate(&bundle(), &OutputSchema::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn records_calls_with_corrective_text() {
        let gateway = MockModelGateway::new()
            .with_json(json!({ "reply": "a" }))
            .with_json(json!({ "reply": "b" }));
        let schema = OutputSchema::default();
        let bundle = bundle();

        gateway.generate(&bundle, &schema, None).await.unwrap();
        let bad = schema
            .validate(&RawOutput::Json(json!({ "reply": "" })))
            .unwrap_err();
        let corrective = CorrectiveInstruction::from_violations(&bad);
        gateway
            .generate(&bundle, &schema, Some(&corrective))
            .await
            .unwrap();

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].corrective, None);
        assert_eq!(calls[1].corrective.as_deref(), Some(corrective.as_str()));
        assert_eq!(calls[0].fingerprint, bundle.fingerprint().unwrap());
        assert_eq!(calls[0].user_message, "hello");

        gateway.clear_calls();
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied_per_call() {
        let gateway = MockModelGateway::new()
            .with_json(json!({ "reply": "slow" }))
            .with_delay(Duration::from_secs(5));
        let started = tokio::time::Instant::now();

        gateway
            .generate(&bundle(), &OutputSchema::default(), None)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
