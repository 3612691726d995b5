//! End-to-end mentoring turns over the in-memory store and scripted gateway.

use std::sync::Arc;
use std::time::Duration;

use mentor_core::adapters::ai::{MockModelGateway, MockReply};
use mentor_core::adapters::memory::InMemoryMentorStore;
use mentor_core::application::handlers::mentor::ContextAssembler;
use mentor_core::application::{MentorErrorKind, RunTurnCommand, RunTurnHandler, TurnSettings};
use mentor_core::domain::foundation::UserId;
use mentor_core::domain::mentor::{
    Assessment, AssessmentAnswer, ChatRole, MentorUser, RawOutput, RetryPolicy,
    MAX_ATTEMPTS_LIMIT,
};
use mentor_core::ports::{GatewayError, PersistenceError};
use serde_json::{json, Value};

type Handler = RunTurnHandler<InMemoryMentorStore, MockModelGateway, InMemoryMentorStore>;

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

async fn seeded_store(ids: &[&str]) -> Arc<InMemoryMentorStore> {
    let store = Arc::new(InMemoryMentorStore::new());
    for id in ids {
        store
            .insert_user(MentorUser::new(user(id)).with_display_name("Sam"))
            .await;
        store
            .insert_assessment(Assessment::new(
                user(id),
                vec![
                    AssessmentAnswer::text("What do you want more of?", "Focus"),
                    AssessmentAnswer::text("Biggest obstacle?", "Starting"),
                ],
            ))
            .await;
    }
    store
}

fn handler_with(
    store: &Arc<InMemoryMentorStore>,
    gateway: &Arc<MockModelGateway>,
    policy: RetryPolicy,
) -> Handler {
    let settings = TurnSettings {
        policy,
        ..TurnSettings::default()
    };
    RunTurnHandler::new(store.clone(), gateway.clone(), store.clone(), settings)
}

fn handler(store: &Arc<InMemoryMentorStore>, gateway: &Arc<MockModelGateway>) -> Handler {
    handler_with(store, gateway, RetryPolicy::default().without_backoff())
}

fn valid(reply: &str) -> Value {
    json!({ "reply": reply })
}

#[tokio::test]
async fn first_valid_output_commits_the_turn() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(MockModelGateway::new().with_json(valid("Welcome back.")));

    let reply = handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap();

    assert_eq!(reply.attempts, 1);
    assert_eq!(gateway.call_count(), 1);
    assert!(gateway.calls()[0].corrective.is_none());
    assert!(reply.plan.is_none());
    assert!(reply.projection.is_none());

    let messages = store.messages_for(&user("u1")).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Hi");
    assert_eq!(messages[1].content, "Welcome back.");
}

#[tokio::test]
async fn invalid_outputs_are_retried_with_corrections() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_json(json!({ "message": "wrong key" }))
            .with_text("Sure! Here's your plan.")
            .with_json(valid("Third time lucky.")),
    );

    let reply = handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "Help me plan"))
        .await
        .unwrap();

    assert_eq!(reply.attempts, 3);
    let calls = gateway.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].corrective.is_none());
    assert!(calls[1].corrective.is_some());
    assert!(calls[2].corrective.is_some());
    assert_eq!(store.messages_for(&user("u1")).await.len(), 2);
}

#[tokio::test]
async fn empty_reply_then_valid_takes_two_calls() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_json(json!({ "reply": "" }))
            .with_json(valid("Let's go.")),
    );

    let reply = handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap();

    assert_eq!(reply.attempts, 2);
    assert_eq!(gateway.call_count(), 2);
    assert!(gateway.calls()[1]
        .corrective
        .as_deref()
        .is_some_and(|text| text.contains("reply")));
}

#[tokio::test]
async fn output_that_never_validates_exhausts_and_writes_nothing() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_fallback(MockReply::Output(RawOutput::Text("just prose".to_string()))),
    );

    let err = handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), MentorErrorKind::ValidationExhausted);
    assert_eq!(gateway.call_count(), 3);
    let diagnostics = err.diagnostics().unwrap();
    assert_eq!(diagnostics.last_raw_output.as_deref(), Some("just prose"));
    assert!(diagnostics.last_violation.is_some());
    assert!(!err.user_message().contains("prose"));

    assert!(store.messages_for(&user("u1")).await.is_empty());
    assert!(store.plans_for(&user("u1")).await.is_empty());
}

#[tokio::test]
async fn attempt_count_follows_the_configured_bound() {
    for max_attempts in 1..=MAX_ATTEMPTS_LIMIT {
        let store = seeded_store(&["u1"]).await;
        let gateway = Arc::new(
            MockModelGateway::new()
                .with_fallback(MockReply::Output(RawOutput::Json(json!({ "reply": " " })))),
        );
        let policy = RetryPolicy::with_max_attempts(max_attempts)
            .unwrap()
            .without_backoff();

        let err = handler_with(&store, &gateway, policy)
            .handle(RunTurnCommand::new(user("u1"), "Hi"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), MentorErrorKind::ValidationExhausted);
        assert_eq!(gateway.call_count(), max_attempts as usize, "bound {}", max_attempts);
        assert!(store.messages_for(&user("u1")).await.is_empty());
        assert!(store.plans_for(&user("u1")).await.is_empty());

        for invalid_count in 1..max_attempts {
            let mut scripted = MockModelGateway::new();
            for _ in 0..invalid_count {
                scripted = scripted.with_text("not json");
            }
            let gateway = Arc::new(scripted.with_json(valid("Back on track.")));
            let policy = RetryPolicy::with_max_attempts(max_attempts)
                .unwrap()
                .without_backoff();

            let reply = handler_with(&store, &gateway, policy)
                .handle(RunTurnCommand::new(user("u1"), "Hi again"))
                .await
                .unwrap();

            assert_eq!(reply.attempts, invalid_count + 1);
            let calls = gateway.calls();
            assert_eq!(calls.len(), invalid_count as usize + 1);
            assert!(calls[1..].iter().all(|call| call.corrective.is_some()));
        }
    }
}

#[tokio::test]
async fn retries_see_an_identical_context() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_text("nope")
            .with_json(valid("ok")),
    );

    handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap();

    let calls = gateway.calls();
    assert_eq!(calls[0].fingerprint, calls[1].fingerprint);
}

#[tokio::test]
async fn assembling_twice_without_a_commit_is_idempotent() {
    let store = seeded_store(&["u1"]).await;
    let assembler = ContextAssembler::new(store.clone(), 20);

    let first = assembler.assemble(&user("u1"), "Hi").await.unwrap();
    let second = assembler.assemble(&user("u1"), "Hi").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
}

#[tokio::test]
async fn stuck_user_gets_a_first_plan() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(MockModelGateway::new().with_json(json!({
        "reply": "Start small: one step today.",
        "plan_delta": { "items": ["step1"] }
    })));

    let reply = handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "I feel stuck on my goals"))
        .await
        .unwrap();

    let plan = reply.plan.unwrap();
    assert_eq!(plan.items, vec!["step1".to_string()]);
    assert!(plan.supersedes.is_none());

    let messages = store.messages_for(&user("u1")).await;
    let last_two: Vec<_> = messages
        .iter()
        .rev()
        .take(2)
        .rev()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        last_two,
        vec![
            (ChatRole::User, "I feel stuck on my goals"),
            (ChatRole::Mentor, "Start small: one step today."),
        ]
    );
}

#[tokio::test]
async fn a_new_plan_supersedes_the_active_one() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_json(json!({
                "reply": "First plan.",
                "plan_delta": { "items": ["walk"], "focus": "health" }
            }))
            .with_json(json!({
                "reply": "Updated.",
                "plan_delta": { "items": ["walk", "stretch"] }
            })),
    );
    let handler = handler(&store, &gateway);

    let first = handler
        .handle(RunTurnCommand::new(user("u1"), "Plan my day"))
        .await
        .unwrap();
    let second = handler
        .handle(RunTurnCommand::new(user("u1"), "Add stretching"))
        .await
        .unwrap();

    let plans = store.plans_for(&user("u1")).await;
    assert_eq!(plans.len(), 2);
    assert_eq!(plans.iter().filter(|p| p.is_active()).count(), 1);

    let active = second.plan.unwrap();
    assert_eq!(active.supersedes, Some(first.plan.unwrap().id));
    assert_eq!(active.fields.get("focus").map(String::as_str), Some("health"));

    let messages = store.messages_for(&user("u1")).await;
    assert_eq!(messages.len(), 4);
    assert!(messages
        .windows(2)
        .all(|pair| pair[0].created_at.is_before(&pair[1].created_at)));
}

#[tokio::test]
async fn projection_revisions_record_their_changes() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_json(json!({
                "reply": "Noted.",
                "projection_delta": { "vision": "Calm and focused" }
            }))
            .with_json(json!({
                "reply": "Updated your vision.",
                "projection_delta": { "vision": "Calm, focused and rested" }
            })),
    );
    let handler = handler(&store, &gateway);

    handler
        .handle(RunTurnCommand::new(user("u1"), "My vision"))
        .await
        .unwrap();
    let second = handler
        .handle(RunTurnCommand::new(user("u1"), "Add rest"))
        .await
        .unwrap();

    let projection = second.projection.unwrap();
    assert_eq!(projection.revision, 2);
    assert_eq!(projection.changes.len(), 1);
    assert_eq!(projection.changes[0].previous.as_deref(), Some("Calm and focused"));
    assert_eq!(store.projections_for(&user("u1")).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_every_call_exhausts_without_writes() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new().with_fallback(MockReply::Error(GatewayError::rate_limited(Some(1)))),
    );

    let err = handler_with(&store, &gateway, RetryPolicy::default())
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), MentorErrorKind::GatewayExhausted);
    assert_eq!(gateway.call_count(), 3);
    assert!(store.messages_for(&user("u1")).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_gateway_times_out_without_writes() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_json(valid("too late"))
            .with_delay(Duration::from_secs(120)),
    );

    let err = handler(&store, &gateway)
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), MentorErrorKind::Timeout);
    assert!(store.messages_for(&user("u1")).await.is_empty());
}

#[tokio::test]
async fn failed_commit_leaves_state_untouched_and_next_turn_succeeds() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new().with_fallback(MockReply::Output(RawOutput::Json(json!({
            "reply": "Here's a plan.",
            "plan_delta": { "items": ["read"] }
        })))),
    );
    let handler = handler(&store, &gateway);

    store.fail_next_commit(PersistenceError::database("connection reset"));
    let err = handler
        .handle(RunTurnCommand::new(user("u1"), "Hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), MentorErrorKind::Persistence);
    assert!(store.messages_for(&user("u1")).await.is_empty());
    assert!(store.plans_for(&user("u1")).await.is_empty());

    handler
        .handle(RunTurnCommand::new(user("u1"), "Hi again"))
        .await
        .unwrap();
    assert_eq!(store.messages_for(&user("u1")).await.len(), 2);
    assert_eq!(store.plans_for(&user("u1")).await.len(), 1);
}

#[tokio::test]
async fn unknown_user_and_blank_message_never_reach_the_gateway() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(MockModelGateway::new().with_fallback(MockReply::Output(
        RawOutput::Json(valid("unused")),
    )));
    let handler = handler(&store, &gateway);

    let missing = handler
        .handle(RunTurnCommand::new(user("nobody"), "Hi"))
        .await
        .unwrap_err();
    let blank = handler
        .handle(RunTurnCommand::new(user("u1"), "   "))
        .await
        .unwrap_err();

    assert_eq!(missing.kind(), MentorErrorKind::NotFound);
    assert_eq!(blank.kind(), MentorErrorKind::InvalidInput);
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn turns_for_one_user_are_serialized() {
    let store = seeded_store(&["u1"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_fallback(MockReply::Output(RawOutput::Json(json!({
                "reply": "Done.",
                "plan_delta": { "items": ["next"] }
            }))))
            .with_delay(Duration::from_secs(1)),
    );
    let handler = Arc::new(handler(&store, &gateway));
    let started = tokio::time::Instant::now();

    let first = tokio::spawn({
        let handler = handler.clone();
        async move { handler.handle(RunTurnCommand::new(user("u1"), "one")).await }
    });
    let second = tokio::spawn({
        let handler = handler.clone();
        async move { handler.handle(RunTurnCommand::new(user("u1"), "two")).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));

    let roles: Vec<_> = store
        .messages_for(&user("u1"))
        .await
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![ChatRole::User, ChatRole::Mentor, ChatRole::User, ChatRole::Mentor]
    );
    let plans = store.plans_for(&user("u1")).await;
    assert_eq!(plans.len(), 2);
    assert_eq!(plans.iter().filter(|p| p.is_active()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn turns_for_different_users_overlap() {
    let store = seeded_store(&["u1", "u2"]).await;
    let gateway = Arc::new(
        MockModelGateway::new()
            .with_fallback(MockReply::Output(RawOutput::Json(valid("Hello."))))
            .with_delay(Duration::from_secs(1)),
    );
    let handler = Arc::new(handler(&store, &gateway));
    let started = tokio::time::Instant::now();

    let first = tokio::spawn({
        let handler = handler.clone();
        async move { handler.handle(RunTurnCommand::new(user("u1"), "hi")).await }
    });
    let second = tokio::spawn({
        let handler = handler.clone();
        async move { handler.handle(RunTurnCommand::new(user("u2"), "hi")).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.messages_for(&user("u1")).await.len(), 2);
    assert_eq!(store.messages_for(&user("u2")).await.len(), 2);
}
