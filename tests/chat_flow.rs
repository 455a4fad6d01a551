use async_trait::async_trait;
use axum::extract::State;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use parley::api;
use parley::llm::{ChatEntry, ChatRole, Inference};
use parley::protocol::ServerMessage;
use parley::registry::ChatRegistry;
use parley::state::{AppState, ChatConfig, ChatMode};
use parley::ws::handle_frame;

/// Scripted stand-in for the inference backend. Records every request so
/// tests can assert on the message lists the router builds.
struct FakeInference {
    reply: String,
    requests: Mutex<Vec<(String, Vec<ChatEntry>)>>,
}

impl FakeInference {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Inference for FakeInference {
    async fn chat(
        &self,
        message: &str,
        _system_prompt: Option<&str>,
        history: &[ChatEntry],
    ) -> String {
        self.requests
            .lock()
            .await
            .push((message.to_string(), history.to_vec()));
        self.reply.clone()
    }

    async fn chat_stream(
        &self,
        _message: &str,
        _system_prompt: Option<&str>,
        _history: &[ChatEntry],
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(self.reply.clone()).await;
        rx
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Vec<String> {
        vec!["fake".to_string()]
    }

    fn model(&self) -> &str {
        "fake"
    }
}

fn state_with(mode: ChatMode, fake: Arc<FakeInference>) -> Arc<AppState> {
    let config = ChatConfig {
        mode,
        ..ChatConfig::default()
    };
    Arc::new(AppState::new(config, fake))
}

async fn register(state: &AppState, name: &str) -> (String, mpsc::UnboundedReceiver<String>) {
    let id = ChatRegistry::new_id();
    let (tx, rx) = mpsc::unbounded_channel();
    state.registry.register(&id, tx, name.to_string()).await;
    (id, rx)
}

#[tokio::test]
async fn assistant_reply_updates_history_and_is_marked_ai() {
    let fake = FakeInference::new("42");
    let state = state_with(ChatMode::Assistant, fake.clone());
    let (id, _rx) = register(&state, "ann").await;

    let response = handle_frame(&state, &id, r#"{"text":"what is the answer?"}"#).await;

    match response {
        Some(ServerMessage::Message { text, is_ai, .. }) => {
            assert_eq!(text, "42");
            assert_eq!(is_ai, Some(true));
        }
        other => panic!("expected assistant reply, got {:?}", other),
    }

    let history = state.registry.history(&id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[0].content, "what is the answer?");
    assert_eq!(history[1].role, ChatRole::Assistant);
    assert_eq!(history[1].content, "42");

    // The first request carries no prior turns
    let requests = fake.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "what is the answer?");
    assert!(requests[0].1.is_empty());
}

#[tokio::test]
async fn second_message_carries_prior_turns() {
    let fake = FakeInference::new("ok");
    let state = state_with(ChatMode::Assistant, fake.clone());
    let (id, _rx) = register(&state, "ann").await;

    handle_frame(&state, &id, r#"{"text":"first"}"#).await;
    handle_frame(&state, &id, r#"{"text":"second"}"#).await;

    let requests = fake.requests.lock().await;
    assert_eq!(requests.len(), 2);
    let prior = &requests[1].1;
    assert_eq!(prior.len(), 2);
    assert_eq!(prior[0].content, "first");
    assert_eq!(prior[1].content, "ok");
}

#[tokio::test]
async fn join_frame_produces_no_output_and_no_history() {
    let fake = FakeInference::new("unused");
    let state = state_with(ChatMode::Assistant, fake.clone());
    let (id, _rx) = register(&state, "guest").await;

    let response = handle_frame(&state, &id, r#"{"type":"join","username":"Bob"}"#).await;

    assert!(response.is_none());
    assert!(state.registry.history(&id).await.is_empty());
    assert!(fake.requests.lock().await.is_empty());
    // Presence still adopts the announced name
    assert_eq!(state.registry.username(&id).await.as_deref(), Some("Bob"));
}

#[tokio::test]
async fn empty_text_is_skipped() {
    let fake = FakeInference::new("unused");
    let state = state_with(ChatMode::Assistant, fake.clone());
    let (id, _rx) = register(&state, "ann").await;

    assert!(handle_frame(&state, &id, r#"{"text":""}"#).await.is_none());
    assert!(handle_frame(&state, &id, "").await.is_none());
    assert!(state.registry.history(&id).await.is_empty());
}

#[tokio::test]
async fn unstructured_frame_falls_back_to_raw_text() {
    let fake = FakeInference::new("hello to you");
    let state = state_with(ChatMode::Assistant, fake.clone());
    let (id, _rx) = register(&state, "ann").await;

    let response = handle_frame(&state, &id, "hello there").await;

    assert!(matches!(response, Some(ServerMessage::Message { .. })));
    let history = state.registry.history(&id).await;
    assert_eq!(history[0].content, "hello there");
}

#[tokio::test]
async fn broadcast_mode_relays_verbatim_to_peers_only() {
    let fake = FakeInference::new("unused");
    let state = state_with(ChatMode::Broadcast, fake.clone());

    let (a, mut rx_a) = register(&state, "a").await;
    let (_b, mut rx_b) = register(&state, "b").await;
    let (_c, mut rx_c) = register(&state, "c").await;

    let payload = r#"{"text":"hi all","username":"a"}"#;
    let response = handle_frame(&state, &a, payload).await;

    assert!(response.is_none());
    assert_eq!(rx_b.try_recv().unwrap(), payload);
    assert_eq!(rx_c.try_recv().unwrap(), payload);
    assert!(rx_a.try_recv().is_err());

    // No inference and no history in this mode
    assert!(fake.requests.lock().await.is_empty());
    assert!(state.registry.history(&a).await.is_empty());
}

#[tokio::test]
async fn broadcast_survives_peer_teardown_mid_delivery() {
    let fake = FakeInference::new("unused");
    let state = state_with(ChatMode::Broadcast, fake);

    let (a, _rx_a) = register(&state, "a").await;
    let (_b, rx_b) = register(&state, "b").await;
    let (_c, mut rx_c) = register(&state, "c").await;

    // B's socket task is gone but B is still registered
    drop(rx_b);

    handle_frame(&state, &a, "still works").await;
    assert_eq!(rx_c.try_recv().unwrap(), "still works");
}

#[tokio::test]
async fn status_reports_backend_and_connection_count() {
    let fake = FakeInference::new("unused");
    let state = state_with(ChatMode::Assistant, fake);

    let (_a, _rx_a) = register(&state, "a").await;
    let (b, _rx_b) = register(&state, "b").await;

    let status = api::status(State(state.clone())).await.0;
    assert!(status.available);
    assert_eq!(status.model, "fake");
    assert_eq!(status.models, vec!["fake"]);
    assert_eq!(status.connections, 2);
    assert_eq!(status.mode, ChatMode::Assistant);

    state.registry.deregister(&b).await;
    let status = api::status(State(state.clone())).await.0;
    assert_eq!(status.connections, 1);
}

#[tokio::test]
async fn user_signup_login_me_flow() {
    let fake = FakeInference::new("unused");
    let state = state_with(ChatMode::Assistant, fake);

    let user = state
        .users
        .create_user(parley::users::NewUser {
            username: "ann".to_string(),
            email: "ann@example.com".to_string(),
            password: "s3cret".to_string(),
        })
        .await
        .unwrap();

    let authed = state.users.authenticate("ann", "s3cret").await.unwrap();
    assert_eq!(authed.id, user.id);

    let token = state.users.issue_token(&authed).await;
    let me = state.users.user_for_token(&token.access_token).await.unwrap();
    assert_eq!(me.email, "ann@example.com");
}
