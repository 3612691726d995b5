//! Validation-retry loop - drives the model gateway until its output
//! satisfies the [`OutputSchema`] or the attempt budget runs out.
//!
//! States: `Drafting -> Validating -> Succeeded`, with `Validating ->
//! Drafting` on invalid output and `Drafting -> Drafting` (after backoff)
//! on a transient gateway failure. Every failed call, whatever its kind,
//! spends one attempt. `Succeeded` and `Exhausted` are terminal.
//!
//! The loop writes nothing. A turn that ends here in `Exhausted` leaves no
//! trace in storage.

use std::sync::Arc;
use tokio::time::{sleep, timeout};

use crate::domain::mentor::{
    ContextBundle, CorrectiveInstruction, LoopState, MentorOutput, OutputSchema,
    OutputValidationError, RawOutput, RetryPolicy,
};
use crate::ports::{GatewayError, GatewayErrorKind, ModelGateway};

use super::errors::{ExhaustionDiagnostics, MentorError, TimeoutStage};

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The gateway failed before producing anything to validate.
    GatewayFailed(GatewayErrorKind),
    /// Output was produced but violated the schema.
    Invalid(OutputValidationError),
    /// Output passed validation.
    Valid,
}

/// Record of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// Result of a successful loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub output: MentorOutput,
    /// Gateway calls made, including the successful one.
    pub attempts: u32,
    pub trace: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Copy)]
enum LastFailure {
    Gateway(GatewayErrorKind),
    Validation,
}

/// Bounded retry loop around one [`ModelGateway`].
pub struct ValidationRetryLoop<G: ModelGateway> {
    gateway: Arc<G>,
    schema: Arc<OutputSchema>,
    policy: RetryPolicy,
}

impl<G: ModelGateway> ValidationRetryLoop<G> {
    pub fn new(gateway: Arc<G>, schema: Arc<OutputSchema>, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            schema,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// Runs the loop for one turn.
    ///
    /// # Errors
    ///
    /// - `GatewayExhausted` / `ValidationExhausted` when the attempt budget
    ///   runs out, classified by the last failure
    /// - `Timeout` when a single call or the whole turn exceeds its deadline
    pub async fn run(&self, bundle: &ContextBundle) -> Result<LoopOutcome, MentorError> {
        match timeout(self.policy.turn_timeout, self.drive(bundle)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    user_id = %bundle.user_id(),
                    timeout_ms = self.policy.turn_timeout.as_millis() as u64,
                    "Mentor turn exceeded its deadline"
                );
                Err(MentorError::Timeout {
                    stage: TimeoutStage::Turn,
                    after: self.policy.turn_timeout,
                })
            }
        }
    }

    async fn drive(&self, bundle: &ContextBundle) -> Result<LoopOutcome, MentorError> {
        let info = self.gateway.gateway_info();
        let max_attempts = self.policy.max_attempts;

        let mut state = LoopState::Drafting;
        let mut attempts: u32 = 0;
        let mut consecutive_gateway_failures: u32 = 0;
        let mut corrective: Option<CorrectiveInstruction> = None;
        let mut pending: Option<RawOutput> = None;
        let mut validated: Option<MentorOutput> = None;
        let mut last_failure: Option<LastFailure> = None;
        let mut diagnostics = ExhaustionDiagnostics::default();
        let mut trace = Vec::new();

        loop {
            tracing::trace!(state = %state, attempts, "Retry loop step");
            match state {
                LoopState::Drafting => {
                    let call = self
                        .gateway
                        .generate(bundle, &self.schema, corrective.as_ref());
                    let result = match timeout(self.policy.call_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(
                                provider = %info.provider,
                                model = %info.model,
                                attempt = attempts + 1,
                                timeout_ms = self.policy.call_timeout.as_millis() as u64,
                                "Model gateway call exceeded its deadline"
                            );
                            return Err(MentorError::Timeout {
                                stage: TimeoutStage::GatewayCall,
                                after: self.policy.call_timeout,
                            });
                        }
                    };

                    match result {
                        Ok(raw) => {
                            pending = Some(raw);
                            state = LoopState::Validating;
                        }
                        Err(GatewayError::Malformed { raw, detail }) => {
                            tracing::debug!(
                                attempt = attempts + 1,
                                detail = %detail,
                                "Gateway returned undecodable output, validating as text"
                            );
                            pending = Some(RawOutput::Text(raw));
                            state = LoopState::Validating;
                        }
                        Err(err) => {
                            attempts += 1;
                            consecutive_gateway_failures += 1;
                            let kind = err.kind();
                            trace.push(AttemptRecord {
                                attempt: attempts,
                                outcome: AttemptOutcome::GatewayFailed(kind),
                            });
                            last_failure = Some(LastFailure::Gateway(kind));
                            tracing::warn!(
                                provider = %info.provider,
                                attempt = attempts,
                                max_attempts,
                                error = %err,
                                "Model gateway call failed"
                            );

                            if attempts >= max_attempts {
                                state = LoopState::Exhausted;
                                continue;
                            }

                            let delay = self
                                .policy
                                .backoff_for(consecutive_gateway_failures, err.retry_after());
                            if !delay.is_zero() {
                                tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                                sleep(delay).await;
                            }
                        }
                    }
                }

                LoopState::Validating => {
                    let Some(raw) = pending.take() else {
                        state = LoopState::Drafting;
                        continue;
                    };
                    attempts += 1;
                    consecutive_gateway_failures = 0;

                    match self.schema.validate(&raw) {
                        Ok(output) => {
                            trace.push(AttemptRecord {
                                attempt: attempts,
                                outcome: AttemptOutcome::Valid,
                            });
                            validated = Some(output);
                            state = LoopState::Succeeded;
                        }
                        Err(violation) => {
                            tracing::info!(
                                attempt = attempts,
                                max_attempts,
                                violations = %violation,
                                "Model output failed validation"
                            );
                            corrective = Some(CorrectiveInstruction::from_violations(&violation));
                            diagnostics.last_raw_output = Some(raw.to_diagnostic_string());
                            diagnostics.last_violation = Some(violation.clone());
                            trace.push(AttemptRecord {
                                attempt: attempts,
                                outcome: AttemptOutcome::Invalid(violation),
                            });
                            last_failure = Some(LastFailure::Validation);

                            state = if attempts >= max_attempts {
                                LoopState::Exhausted
                            } else {
                                LoopState::Drafting
                            };
                        }
                    }
                }

                LoopState::Succeeded => {
                    let Some(output) = validated.take() else {
                        state = LoopState::Drafting;
                        continue;
                    };
                    tracing::info!(
                        provider = %info.provider,
                        model = %info.model,
                        attempts,
                        "Model output accepted"
                    );
                    return Ok(LoopOutcome {
                        output,
                        attempts,
                        trace,
                    });
                }

                LoopState::Exhausted => {
                    tracing::warn!(
                        attempts,
                        last_raw_output = diagnostics.last_raw_output.as_deref().unwrap_or(""),
                        "Retry loop exhausted"
                    );
                    return Err(match last_failure {
                        Some(LastFailure::Gateway(kind)) => MentorError::GatewayExhausted {
                            attempts,
                            last_error: kind,
                            diagnostics,
                        },
                        Some(LastFailure::Validation) | None => MentorError::ValidationExhausted {
                            attempts,
                            diagnostics,
                        },
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::{MockModelGateway, MockReply};
    use crate::application::handlers::mentor::MentorErrorKind;
    use crate::domain::foundation::UserId;
    use crate::domain::mentor::{
        Assessment, AssessmentAnswer, MentorUser, MessageWindow, MAX_ATTEMPTS_LIMIT,
    };
    use serde_json::json;
    use std::time::Duration;

    fn bundle() -> ContextBundle {
        let user_id = UserId::new("loop-user").unwrap();
        ContextBundle::new(
            &MentorUser::new(user_id.clone()),
            Assessment::new(user_id, vec![AssessmentAnswer::text("Goal?", "Run a 10k")]),
            MessageWindow::default(),
            None,
            None,
            "I feel stuck on my goals",
        )
    }

    fn valid() -> serde_json::Value {
        json!({ "reply": "Let's pick one small step." })
    }

    fn invalid() -> serde_json::Value {
        json!({ "reply": "" })
    }

    fn planned_backoff(policy: &RetryPolicy, failures: u32) -> Duration {
        (1..=failures).map(|n| policy.backoff_for(n, None)).sum()
    }

    fn retry_loop(gateway: MockModelGateway, policy: RetryPolicy) -> ValidationRetryLoop<MockModelGateway> {
        ValidationRetryLoop::new(Arc::new(gateway), Arc::new(OutputSchema::default()), policy)
    }

    #[tokio::test]
    async fn first_valid_output_is_accepted() {
        let gateway = MockModelGateway::new().with_json(valid());
        let outcome = retry_loop(gateway, RetryPolicy::default())
            .run(&bundle())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.output.reply(), "Let's pick one small step.");
        assert_eq!(
            outcome.trace,
            vec![AttemptRecord {
                attempt: 1,
                outcome: AttemptOutcome::Valid
            }]
        );
    }

    #[tokio::test]
    async fn invalid_then_valid_sends_corrective_instruction() {
        let gateway = Arc::new(MockModelGateway::new().with_json(invalid()).with_json(valid()));
        let retry = ValidationRetryLoop::new(
            gateway.clone(),
            Arc::new(OutputSchema::default()),
            RetryPolicy::default(),
        );

        let outcome = retry.run(&bundle()).await.unwrap();

        assert_eq!(outcome.attempts, 2);
        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].corrective.is_none());
        let corrective = calls[1].corrective.as_deref().unwrap();
        assert!(corrective.contains("`reply`"));
        assert_eq!(calls[0].fingerprint, calls[1].fingerprint);
    }

    #[tokio::test]
    async fn never_valid_exhausts_with_diagnostics() {
        let gateway = Arc::new(
            MockModelGateway::new().with_fallback(MockReply::Output(RawOutput::Json(invalid()))),
        );
        let retry = ValidationRetryLoop::new(
            gateway.clone(),
            Arc::new(OutputSchema::default()),
            RetryPolicy::with_max_attempts(3).unwrap(),
        );

        let err = retry.run(&bundle()).await.unwrap_err();

        assert_eq!(gateway.call_count(), 3);
        match err {
            MentorError::ValidationExhausted {
                attempts,
                diagnostics,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(diagnostics.last_raw_output.as_deref(), Some(r#"{"reply":""}"#));
                assert!(diagnostics.last_violation.is_some());
            }
            other => panic!("expected ValidationExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn never_valid_makes_exactly_max_attempts_calls_for_every_bound() {
        for max_attempts in 1..=MAX_ATTEMPTS_LIMIT {
            let gateway = Arc::new(
                MockModelGateway::new()
                    .with_fallback(MockReply::Output(RawOutput::Json(invalid()))),
            );
            let retry = ValidationRetryLoop::new(
                gateway.clone(),
                Arc::new(OutputSchema::default()),
                RetryPolicy::with_max_attempts(max_attempts).unwrap(),
            );

            let err = retry.run(&bundle()).await.unwrap_err();

            assert_eq!(gateway.call_count(), max_attempts as usize, "bound {}", max_attempts);
            assert!(
                matches!(err, MentorError::ValidationExhausted { attempts, .. } if attempts == max_attempts),
                "bound {}: {:?}",
                max_attempts,
                err
            );
        }
    }

    #[tokio::test]
    async fn invalid_outputs_below_the_bound_recover_for_every_bound() {
        for max_attempts in 2..=MAX_ATTEMPTS_LIMIT {
            for invalid_count in 1..max_attempts {
                let mut gateway = MockModelGateway::new();
                for _ in 0..invalid_count {
                    gateway = gateway.with_json(invalid());
                }
                let gateway = Arc::new(gateway.with_json(valid()));
                let retry = ValidationRetryLoop::new(
                    gateway.clone(),
                    Arc::new(OutputSchema::default()),
                    RetryPolicy::with_max_attempts(max_attempts).unwrap(),
                );

                let outcome = retry.run(&bundle()).await.unwrap();

                let calls = gateway.calls();
                assert_eq!(calls.len(), invalid_count as usize + 1);
                assert_eq!(outcome.attempts, invalid_count + 1);
                assert!(calls[0].corrective.is_none());
                assert!(calls[1..].iter().all(|call| call
                    .corrective
                    .as_deref()
                    .is_some_and(|text| text.contains("`reply`"))));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn provider_timeout_is_retried() {
        let gateway = MockModelGateway::new()
            .with_error(GatewayError::timeout(Duration::from_secs(45)))
            .with_json(valid());

        let outcome = retry_loop(gateway, RetryPolicy::default())
            .run(&bundle())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.trace[0].outcome,
            AttemptOutcome::GatewayFailed(GatewayErrorKind::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_every_call_exhausts_as_gateway_failure() {
        let gateway = Arc::new(
            MockModelGateway::new()
                .with_fallback(MockReply::Error(GatewayError::rate_limited(None))),
        );
        let retry = ValidationRetryLoop::new(
            gateway.clone(),
            Arc::new(OutputSchema::default()),
            RetryPolicy::default(),
        );

        let err = retry.run(&bundle()).await.unwrap_err();

        assert_eq!(gateway.call_count(), 3);
        assert!(matches!(
            err,
            MentorError::GatewayExhausted {
                attempts: 3,
                last_error: GatewayErrorKind::RateLimited,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_between_gateway_failures() {
        let gateway = MockModelGateway::new()
            .with_error(GatewayError::unavailable("down"))
            .with_error(GatewayError::unavailable("still down"))
            .with_json(valid());
        let policy = RetryPolicy::default();
        let expected = planned_backoff(&policy, 2);
        let started = tokio::time::Instant::now();

        let outcome = retry_loop(gateway, policy).run(&bundle()).await.unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(expected, Duration::from_millis(600));
        assert!(started.elapsed() >= expected);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_replaces_computed_backoff() {
        let gateway = MockModelGateway::new()
            .with_error(GatewayError::rate_limited(Some(2)))
            .with_json(valid());
        let started = tokio::time::Instant::now();

        retry_loop(gateway, RetryPolicy::default())
            .run(&bundle())
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn gateway_failure_after_invalid_output_keeps_corrective() {
        let gateway = Arc::new(
            MockModelGateway::new()
                .with_json(invalid())
                .with_error(GatewayError::unavailable("blip"))
                .with_json(valid()),
        );
        let retry = ValidationRetryLoop::new(
            gateway.clone(),
            Arc::new(OutputSchema::default()),
            RetryPolicy::default().without_backoff(),
        );

        let outcome = retry.run(&bundle()).await.unwrap();

        assert_eq!(outcome.attempts, 3);
        let calls = gateway.calls();
        assert!(calls[1].corrective.is_some());
        assert_eq!(calls[1].corrective, calls[2].corrective);
    }

    #[tokio::test]
    async fn malformed_output_is_validated_as_text() {
        let gateway = MockModelGateway::new()
            .with_error(GatewayError::malformed("not json at all", "expected value"))
            .with_json(valid());

        let outcome = retry_loop(gateway, RetryPolicy::default().without_backoff())
            .run(&bundle())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(
            outcome.trace[0].outcome,
            AttemptOutcome::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn exhaustion_is_classified_by_last_failure() {
        let gateway = MockModelGateway::new()
            .with_error(GatewayError::unavailable("down"))
            .with_json(invalid());
        let err = retry_loop(
            gateway,
            RetryPolicy::with_max_attempts(2).unwrap().without_backoff(),
        )
        .run(&bundle())
        .await
        .unwrap_err();
        assert_eq!(err.kind(), MentorErrorKind::ValidationExhausted);

        let gateway = MockModelGateway::new()
            .with_json(invalid())
            .with_error(GatewayError::unavailable("down"));
        let err = retry_loop(
            gateway,
            RetryPolicy::with_max_attempts(2).unwrap().without_backoff(),
        )
        .run(&bundle())
        .await
        .unwrap_err();
        assert_eq!(err.kind(), MentorErrorKind::GatewayExhausted);
        assert!(err.diagnostics().unwrap().last_violation.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_without_retry() {
        let gateway = Arc::new(
            MockModelGateway::new()
                .with_json(valid())
                .with_delay(Duration::from_secs(120)),
        );
        let retry = ValidationRetryLoop::new(
            gateway.clone(),
            Arc::new(OutputSchema::default()),
            RetryPolicy::default(),
        );

        let err = retry.run(&bundle()).await.unwrap_err();

        assert!(matches!(
            err,
            MentorError::Timeout {
                stage: TimeoutStage::GatewayCall,
                ..
            }
        ));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_deadline_bounds_the_whole_loop() {
        let gateway = MockModelGateway::new()
            .with_fallback(MockReply::Output(RawOutput::Json(invalid())))
            .with_delay(Duration::from_secs(4));
        let policy = RetryPolicy {
            max_attempts: 10,
            call_timeout: Duration::from_secs(5),
            turn_timeout: Duration::from_secs(10),
            ..RetryPolicy::default()
        };

        let err = retry_loop(gateway, policy).run(&bundle()).await.unwrap_err();

        assert!(matches!(
            err,
            MentorError::Timeout {
                stage: TimeoutStage::Turn,
                ..
            }
        ));
    }
}
