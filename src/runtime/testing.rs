//! Mock implementations for testing
//!
//! These mocks enable end-to-end runtime tests without a network.

use super::traits::*;
use crate::history::{ConversationLog, InMemoryLogStore};
use crate::protocol::OpenRequest;
use crate::render::{RenderFrame, DEFAULT_DEBOUNCE_WINDOW};
use crate::runtime::{start, ClientEvent, SessionHandle};
use crate::state_machine::ControllerContext;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Mock channel
// ============================================================================

type Script = mpsc::UnboundedSender<Result<Frame, ChannelError>>;

/// Server side of one mock connection; the test scripts frames through it
pub struct MockServer {
    pub request: OpenRequest,
    frames: Script,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Send one envelope as JSON text
    pub fn send(&self, envelope: &Value) {
        self.send_text(&envelope.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.frames.send(Ok(Frame::Text(text.to_string())));
    }

    /// Close the connection from the server side
    pub fn close(&self, code: u16) {
        let _ = self.frames.send(Ok(Frame::Closed {
            code: Some(code),
            reason: None,
        }));
    }

    /// Fail the transport
    pub fn fail(&self, message: &str) {
        let _ = self
            .frames
            .send(Err(ChannelError::Transport(message.to_string())));
    }

    /// Whether the client closed its end
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockChannel {
    frames: mpsc::UnboundedReceiver<Result<Frame, ChannelError>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn next_frame(&mut self) -> Result<Frame, ChannelError> {
        self.frames.recv().await.unwrap_or(Ok(Frame::Closed {
            code: None,
            reason: None,
        }))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that hands each accepted connection to the test as a `MockServer`
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<MockServer>,
    requests: Mutex<Vec<OpenRequest>>,
    fail_next: Mutex<Option<String>>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (
            Self {
                accepted,
                requests: Mutex::new(Vec::new()),
                fail_next: Mutex::new(None),
            },
            rx,
        )
    }

    /// Make the next connection attempt fail
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(message.into());
    }

    pub fn recorded_requests(&self) -> Vec<OpenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, request: &OpenRequest) -> Result<Box<dyn Channel>, ChannelError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(ChannelError::Connect(message));
        }

        let (frames, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.accepted.send(MockServer {
            request: request.clone(),
            frames,
            closed: closed.clone(),
        });
        Ok(Box::new(MockChannel { frames: rx, closed }))
    }
}

// ============================================================================
// Test runtime
// ============================================================================

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime {
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<ClientEvent>,
    pub connector: Arc<MockConnector>,
    pub store: Arc<InMemoryLogStore>,
    connections: mpsc::UnboundedReceiver<MockServer>,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder {
    context: ControllerContext,
    debounce_window: Duration,
    store: Option<Arc<InMemoryLogStore>>,
}

impl TestRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            context: ControllerContext::new("test-model", "default")
                .with_clear_grace(Duration::from_millis(20)),
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            store: None,
        }
    }

    pub fn context(mut self, context: ControllerContext) -> Self {
        self.context = context;
        self
    }

    /// Start from a store that already holds entries
    pub fn store(mut self, store: Arc<InMemoryLogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> TestRuntime {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryLogStore::new()));
        let log = ConversationLog::open(store.clone())
            .await
            .expect("in-memory store loads");
        let (connector, connections) = MockConnector::new();
        let connector = Arc::new(connector);

        let handle = start(self.context, connector.clone(), log, self.debounce_window);
        let events = handle.subscribe();

        TestRuntime {
            handle,
            events,
            connector,
            store,
            connections,
        }
    }
}

impl Default for TestRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRuntime {
    /// Wait for the next channel the runtime opens
    pub async fn next_connection(&mut self, timeout: Duration) -> Option<MockServer> {
        tokio::time::timeout(timeout, self.connections.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait for the connection carrying `question`, skipping any others
    pub async fn connection_for(&mut self, question: &str, timeout: Duration) -> Option<MockServer> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let server = self.next_connection(remaining).await?;
            if server.request.question == question {
                return Some(server);
            }
        }
    }

    /// Wait for the first client event matching `pred`
    pub async fn wait_for<F>(&mut self, timeout: Duration, pred: F) -> Option<ClientEvent>
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await {
                Ok(Ok(event)) if pred(&event) => return Some(event),
                _ => continue,
            }
        }
        None
    }

    /// Wait for a render frame matching `pred`
    pub async fn wait_for_frame<F>(&self, timeout: Duration, pred: F) -> Option<RenderFrame>
    where
        F: Fn(&RenderFrame) -> bool,
    {
        let mut frames = self.handle.frames();
        let wait = async {
            loop {
                {
                    let frame = frames.borrow_and_update();
                    if pred(&frame) {
                        return Some(frame.clone());
                    }
                }
                if frames.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::CommittedSession;
    use crate::state_machine::{EndReason, Phase, Session, SessionId};
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    fn committed(event: &ClientEvent) -> bool {
        matches!(event, ClientEvent::Committed { .. })
    }

    fn into_entry(event: Option<ClientEvent>) -> CommittedSession {
        match event {
            Some(ClientEvent::Committed { entry }) => *entry,
            other => panic!("Expected Committed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_connector_records_requests() {
        let (connector, mut accepted) = MockConnector::new();
        let request = OpenRequest {
            question: "Q".to_string(),
            dataset: "all".to_string(),
            model: "m".to_string(),
            persona: "default".to_string(),
        };

        let mut channel = connector.connect(&request).await.unwrap();
        let server = accepted.recv().await.unwrap();
        server.send_text("hello");
        assert_eq!(channel.next_frame().await.unwrap(), Frame::Text("hello".to_string()));

        channel.close().await.unwrap();
        assert!(server.was_closed());
        assert_eq!(connector.recorded_requests(), vec![request.clone()]);

        connector.fail_next_connect("refused");
        assert!(connector.connect(&request).await.is_err());
    }

    /// Tool call, streamed answer, matched result, completion
    #[tokio::test]
    async fn test_streamed_answer_with_tool_result() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Who had incidents?", "incident").await.unwrap();

        let server = rt.next_connection(WAIT).await.unwrap();
        assert_eq!(server.request.dataset, "incident");
        assert_eq!(server.request.model, "test-model");

        server.send(&json!({ "type": "tool_call", "tool": "search", "arguments": { "q": "x" } }));
        server.send(&json!({ "type": "answer_token", "token": "Hi" }));
        server.send(&json!({ "type": "answer_token", "token": " there" }));
        server.send(&json!({ "type": "tool_result", "tool": "search", "result": "{\"n\": 3}" }));
        server.send(&json!({ "type": "complete" }));

        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.answer_text, "Hi there");
        assert_eq!(entry.tool_calls.len(), 1);
        assert_eq!(entry.tool_calls[0].result.as_ref().unwrap()["n"], 3);
        assert_eq!(entry.ended_by, Some(EndReason::Completed));
        assert_eq!(rt.handle.log().len(), 1);

        // Channel is closed after the linger
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(server.was_closed());
    }

    #[tokio::test]
    async fn test_duplicate_terminal_envelopes_commit_once() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Q", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();

        server.send(&json!({ "type": "answer_token", "token": "A" }));
        server.send(&json!({ "type": "complete", "data": { "analysis": "A" } }));
        server.send(&json!({ "type": "stream_end" }));

        assert!(rt.wait_for(WAIT, committed).await.is_some());
        assert!(rt
            .wait_for(Duration::from_millis(300), committed)
            .await
            .is_none());
        assert_eq!(rt.store.len(), 1);
    }

    #[tokio::test]
    async fn test_resubmit_before_any_envelope_leaves_no_empty_entry() {
        let mut rt = TestRuntime::builder().build().await;
        let first = rt.handle.submit("Q1", "all").await.unwrap();
        rt.handle.submit("Q2", "all").await.unwrap();

        let discarded = rt
            .wait_for(WAIT, |e| {
                matches!(e, ClientEvent::Discarded { session_id } if *session_id == first)
            })
            .await;
        assert!(discarded.is_some());

        let server = rt.connection_for("Q2", WAIT).await.unwrap();
        server.send(&json!({ "type": "final_answer", "content": "Second" }));
        server.send(&json!({ "type": "stream_end" }));

        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.question, "Q2");
        let questions: Vec<_> = rt
            .handle
            .log()
            .entries()
            .into_iter()
            .map(|e| e.question)
            .collect();
        assert_eq!(questions, vec!["Q2".to_string()]);
    }

    #[tokio::test]
    async fn test_resubmit_commits_partial_answer_of_previous() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Q1", "all").await.unwrap();
        let first = rt.connection_for("Q1", WAIT).await.unwrap();
        first.send(&json!({ "type": "answer_token", "token": "Half" }));
        rt.wait_for_frame(WAIT, |f| f.answer_text == "Half")
            .await
            .unwrap();

        rt.handle.submit("Q2", "all").await.unwrap();
        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.question, "Q1");
        assert_eq!(entry.answer_text, "Half");
        assert_eq!(entry.ended_by, Some(EndReason::Replaced));

        let second = rt.connection_for("Q2", WAIT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(first.was_closed());
        // Late envelopes for the first session go nowhere
        first.send(&json!({ "type": "answer_token", "token": "stale" }));
        second.send(&json!({ "type": "answer_token", "token": "Fresh" }));
        second.send(&json!({ "type": "complete" }));

        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.answer_text, "Fresh");
    }

    /// Events up to and including the first one matching `last`
    async fn events_until<F>(rt: &mut TestRuntime, last: F) -> Vec<ClientEvent>
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let mut seen = Vec::new();
        while let Ok(Ok(event)) = tokio::time::timeout(WAIT, rt.events.recv()).await {
            let done = last(&event);
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn phases_of(events: &[ClientEvent], id: &SessionId) -> Vec<Phase> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::PhaseChanged { session_id, phase } if session_id == id => Some(*phase),
                _ => None,
            })
            .collect()
    }

    /// Submit Q1, stream a partial answer, then submit Q2 and collect events
    /// until Q2's channel is requested
    async fn replace_partial_session(rt: &mut TestRuntime) -> (SessionId, Vec<ClientEvent>) {
        let first_id = rt.handle.submit("Q1", "all").await.unwrap();
        let first = rt.connection_for("Q1", WAIT).await.unwrap();
        first.send(&json!({ "type": "answer_token", "token": "Half" }));
        rt.wait_for_frame(WAIT, |f| f.answer_text == "Half")
            .await
            .unwrap();

        let second_id = rt.handle.submit("Q2", "all").await.unwrap();
        let events = events_until(rt, |e| {
            matches!(e, ClientEvent::SessionStarted { session_id, .. } if *session_id == second_id)
        })
        .await;
        (first_id, events)
    }

    #[tokio::test]
    async fn test_replaced_session_is_committed_before_next_opens() {
        let mut rt = TestRuntime::builder().build().await;
        let (first_id, events) = replace_partial_session(&mut rt).await;

        assert_eq!(
            phases_of(&events, &first_id),
            vec![Phase::Open, Phase::Streaming, Phase::Terminal, Phase::Committed]
        );
        assert!(matches!(events.last(), Some(ClientEvent::SessionStarted { .. })));
        assert_eq!(rt.store.len(), 1);
    }

    #[tokio::test]
    async fn test_replaced_session_failing_to_save_is_discarded_with_notice() {
        let store = Arc::new(InMemoryLogStore::new());
        let mut rt = TestRuntime::builder().store(store.clone()).build().await;
        store.set_fail_appends(true);

        let (first_id, events) = replace_partial_session(&mut rt).await;

        assert_eq!(
            phases_of(&events, &first_id),
            vec![Phase::Open, Phase::Streaming, Phase::Terminal, Phase::Discarded]
        );
        let notices = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::Notice { .. }))
            .count();
        assert_eq!(notices, 1);
        assert!(store.is_empty());
        assert!(rt.handle.log().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_commits_partial_answer() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Long question", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();

        server.send(&json!({ "type": "answer_token", "token": "Partial" }));
        rt.wait_for_frame(WAIT, |f| f.answer_text == "Partial")
            .await
            .unwrap();
        rt.handle.cancel().await.unwrap();

        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.answer_text, "Partial");
        assert_eq!(entry.ended_by, Some(EndReason::Cancelled));
        assert!(entry.terminal_payload.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.was_closed());
    }

    #[tokio::test]
    async fn test_transport_error_raises_notice_and_keeps_partials() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Q", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();

        server.send(&json!({ "type": "tool_call", "tool": "sql", "arguments": {} }));
        server.fail("connection reset");

        let notice = rt
            .wait_for(WAIT, |e| matches!(e, ClientEvent::Notice { .. }))
            .await;
        assert!(notice.is_some());

        let entry = rt.handle.log().entries();
        let entry = if entry.is_empty() {
            into_entry(rt.wait_for(WAIT, committed).await)
        } else {
            entry[0].clone()
        };
        assert_eq!(entry.tool_calls.len(), 1);
        assert_eq!(entry.ended_by, Some(EndReason::TransportError));
        assert!(entry.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_failed_connect_is_reported() {
        let mut rt = TestRuntime::builder().build().await;
        rt.connector.fail_next_connect("refused");
        rt.handle.submit("Q", "all").await.unwrap();

        assert!(rt
            .wait_for(WAIT, |e| matches!(e, ClientEvent::Notice { .. }))
            .await
            .is_some());
        let final_phase = rt
            .wait_for(WAIT, |e| {
                matches!(e, ClientEvent::PhaseChanged { phase, .. } if phase.is_final())
            })
            .await;
        assert!(final_phase.is_some());
    }

    #[tokio::test]
    async fn test_server_close_without_terminal_commits() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Q", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();

        server.send(&json!({ "type": "tool_call", "tool": "sql", "arguments": {} }));
        server.send(&json!({ "type": "tool_call", "tool": "chart", "arguments": {} }));
        server.close(1006);

        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.ended_by, Some(EndReason::Disconnected));
        // Placeholder text is for display only
        assert!(entry.answer_text.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_envelopes_are_dropped() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Q", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();

        server.send_text("not json");
        server.send(&json!({ "type": "mystery" }));
        server.send(&json!({ "type": "answer_token", "token": "Still here" }));
        server.send(&json!({ "type": "complete" }));

        let entry = into_entry(rt.wait_for(WAIT, committed).await);
        assert_eq!(entry.answer_text, "Still here");
    }

    #[tokio::test]
    async fn test_view_clears_after_commit() {
        let mut rt = TestRuntime::builder().build().await;
        rt.handle.submit("Q", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();
        server.send(&json!({ "type": "complete", "answer": "Done" }));

        let final_frame = rt
            .wait_for_frame(WAIT, |f| f.answer_text == "Done" && !f.streaming)
            .await;
        assert!(final_frame.is_some());
        assert!(rt.wait_for_frame(WAIT, RenderFrame::is_idle).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_history() {
        let previous = CommittedSession::from_session(
            &Session::new(SessionId::from("old"), "Earlier", "all"),
            chrono::Utc::now(),
        );
        let store = Arc::new(InMemoryLogStore::with_entries(vec![previous]));
        let mut rt = TestRuntime::builder().store(store).build().await;
        assert_eq!(rt.handle.log().len(), 1);

        rt.handle.clear_history().await.unwrap();
        assert!(rt
            .wait_for(WAIT, |e| matches!(e, ClientEvent::HistoryCleared))
            .await
            .is_some());
        assert!(rt.handle.log().is_empty());
        assert!(rt.store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_question_is_refused() {
        let rt = TestRuntime::builder().build().await;
        assert!(rt.handle.submit("   ", "all").await.is_err());
        assert!(rt.connector.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_phases_are_broadcast_in_order() {
        let mut rt = TestRuntime::builder().build().await;
        let id = rt.handle.submit("Q", "all").await.unwrap();
        let server = rt.next_connection(WAIT).await.unwrap();
        server.send(&json!({ "type": "complete", "answer": "ok" }));

        let mut phases = Vec::new();
        while let Some(ClientEvent::PhaseChanged { phase, .. }) = rt
            .wait_for(WAIT, |e| {
                matches!(e, ClientEvent::PhaseChanged { session_id, .. } if *session_id == id)
            })
            .await
        {
            phases.push(phase);
            if phase.is_final() {
                break;
            }
        }
        assert_eq!(
            phases,
            vec![
                Phase::Open,
                Phase::Streaming,
                Phase::Terminal,
                Phase::Committed
            ]
        );
    }
}
