use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatch, EnvelopeDispatcher};
use crate::handler::HandlerContext;
use crate::tasks::{DrainReport, InFlightTasks};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("transport disconnected: {0}")]
    Disconnected(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeKind {
    EventsApi,
    Interactive,
    Unsupported(String),
}

impl EnvelopeKind {
    pub fn from_type(message_type: &str) -> Self {
        match message_type {
            "events_api" => Self::EventsApi,
            "interactive" => Self::Interactive,
            other => Self::Unsupported(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EventsApi => "events_api",
            Self::Interactive => "interactive",
            Self::Unsupported(other) => other,
        }
    }
}

/// One delivery from Slack. It is redelivered until acknowledged.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketEnvelope {
    pub envelope_id: String,
    pub kind: EnvelopeKind,
    pub payload: Value,
}

/// A text frame received over the Socket Mode connection.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketMessage {
    Hello,
    Disconnect { reason: String },
    Envelope(SocketEnvelope),
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawSocketMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

impl SocketMessage {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let raw: RawSocketMessage = serde_json::from_str(text)
            .map_err(|error| TransportError::Receive(format!("malformed socket message: {error}")))?;

        Ok(match (raw.message_type.as_str(), raw.envelope_id) {
            ("hello", _) => Self::Hello,
            ("disconnect", _) => {
                Self::Disconnect { reason: raw.reason.unwrap_or_else(|| "unspecified".to_owned()) }
            }
            (message_type, Some(envelope_id)) => Self::Envelope(SocketEnvelope {
                envelope_id,
                kind: EnvelopeKind::from_type(message_type),
                payload: raw.payload,
            }),
            (message_type, None) => Self::Unknown(message_type.to_owned()),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the transport is finished for good.
    async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str, payload: Option<&Value>) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type PendingAck = BoxFuture<'static, (String, Dispatch)>;

enum PumpExit {
    Shutdown,
    Closed,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EnvelopeDispatcher,
    reconnect_policy: ReconnectPolicy,
    tasks: InFlightTasks,
    grace_period: Duration,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EnvelopeDispatcher,
        reconnect_policy: ReconnectPolicy,
        tasks: InFlightTasks,
        grace_period: Duration,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy, tasks, grace_period }
    }

    /// Pumps envelopes until shutdown, a closed transport or exhausted
    /// reconnects, then gives in-flight work the grace period to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DrainReport {
        let mut failures = 0_u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(attempt = failures, "opening socket mode transport connection");
            let result = match self.transport.connect().await {
                Ok(()) => {
                    info!(attempt = failures, "socket mode transport connected");
                    failures = 0;
                    self.pump(&mut shutdown).await
                }
                Err(error) => Err(error),
            };

            match result {
                Ok(PumpExit::Shutdown) => break,
                Ok(PumpExit::Closed) => {
                    info!("socket mode transport stream closed");
                    break;
                }
                Err(transport_error) => {
                    warn!(
                        attempt = failures,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if failures >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(failures);
                    failures += 1;
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }

        if let Err(error) = self.transport.disconnect().await {
            debug!(error = %error, "socket mode transport disconnect failed");
        }

        info!(event_name = "system.shutdown.receive_loop_stopped", "socket mode receive loop stopped");
        let report = self.tasks.drain(self.grace_period).await;
        info!(
            event_name = "system.shutdown.drained",
            completed = report.completed,
            abandoned = report.abandoned,
            "in-flight work drained"
        );
        report
    }

    /// Reads envelopes while earlier ones are still being dispatched, so an
    /// envelope's ack deadline runs from when it was read. Acks still go out
    /// in receipt order.
    async fn pump(&self, shutdown: &mut watch::Receiver<bool>) -> Result<PumpExit, TransportError> {
        let mut pending: FuturesOrdered<PendingAck> = FuturesOrdered::new();

        loop {
            tokio::select! {
                next = self.transport.next_envelope() => {
                    let envelope = match next {
                        Ok(Some(envelope)) => envelope,
                        Ok(None) => {
                            self.settle(&mut pending).await;
                            return Ok(PumpExit::Closed);
                        }
                        Err(error) => {
                            self.settle(&mut pending).await;
                            return Err(error);
                        }
                    };

                    info!(
                        event_name = "ingress.slack.envelope_received",
                        envelope_id = %envelope.envelope_id,
                        envelope_kind = envelope.kind.as_str(),
                        correlation_id = %envelope.envelope_id,
                        "received slack envelope"
                    );
                    pending.push_back(self.start_dispatch(envelope));
                }
                Some((envelope_id, dispatch)) = pending.next(), if !pending.is_empty() => {
                    self.finish(envelope_id, dispatch).await;
                }
                () = wait_for_shutdown(shutdown) => {
                    self.settle(&mut pending).await;
                    return Ok(PumpExit::Shutdown);
                }
            }
        }
    }

    fn start_dispatch(&self, envelope: SocketEnvelope) -> PendingAck {
        let dispatcher = self.dispatcher.clone();
        async move {
            let context = HandlerContext::new(envelope.envelope_id.clone());
            let dispatch = dispatcher.dispatch(envelope.kind, envelope.payload, &context).await;
            (envelope.envelope_id, dispatch)
        }
        .boxed()
    }

    /// Acknowledges everything already read before the pump returns.
    async fn settle(&self, pending: &mut FuturesOrdered<PendingAck>) {
        while let Some((envelope_id, dispatch)) = pending.next().await {
            self.finish(envelope_id, dispatch).await;
        }
    }

    async fn finish(&self, envelope_id: String, dispatch: Dispatch) {
        match self.transport.acknowledge(&envelope_id, dispatch.ack_payload.as_ref()).await {
            Ok(()) => debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope_id,
                correlation_id = %envelope_id,
                with_payload = dispatch.ack_payload.is_some(),
                "acknowledged slack envelope"
            ),
            Err(error) => warn!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope_id,
                correlation_id = %envelope_id,
                error = %error,
                "failed to acknowledge slack envelope"
            ),
        }

        if let Some(deferred) = dispatch.deferred {
            self.tasks.spawn(deferred);
        }
    }
}

/// Resolves once shutdown is requested or the signal's sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::{watch, Mutex};
    use tokio::time::Instant;

    use super::{
        EnvelopeKind, ReconnectPolicy, SocketEnvelope, SocketMessage, SocketModeRunner,
        SocketTransport, TransportError,
    };
    use crate::dispatch::{Dispatch, EnvelopeDispatcher};
    use crate::events::EventRouter;
    use crate::handler::{HandlerContext, HandlerOutcome, PartialHandler};
    use crate::interactions::InteractionCallback;
    use crate::tasks::{DrainReport, InFlightTasks};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
        hang_when_exhausted: bool,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SocketEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<(String, Option<Value>)>,
        acked_at: Vec<Instant>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SocketEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
                hang_when_exhausted: false,
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<(String, Option<Value>)> {
            self.state.lock().await.acknowledgements.clone()
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError> {
            let next = self.state.lock().await.envelopes.pop_front();
            match next {
                Some(next) => next,
                None if self.hang_when_exhausted => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn acknowledge(&self, envelope_id: &str, payload: Option<&Value>) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push((envelope_id.to_owned(), payload.cloned()));
            state.acked_at.push(Instant::now());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    /// Answers submissions with a fixed payload after an optional delay.
    struct SlowResponder {
        delay: Duration,
    }

    #[async_trait]
    impl PartialHandler<InteractionCallback> for SlowResponder {
        fn name(&self) -> &str {
            "slow_responder"
        }

        async fn handle(&self, callback: &InteractionCallback, _ctx: &HandlerContext) -> HandlerOutcome {
            tokio::time::sleep(self.delay).await;
            HandlerOutcome::respond(json!({"response_action": "errors", "errors": {"title": callback.user.id}}))
        }
    }

    fn dispatcher(delay: Duration, ack_deadline: Duration) -> EnvelopeDispatcher {
        EnvelopeDispatcher::new(
            Arc::new(EventRouter::new(Vec::new())),
            Arc::new(SlowResponder { delay }),
            ack_deadline,
        )
    }

    fn runner(transport: Arc<ScriptedTransport>, dispatcher: EnvelopeDispatcher) -> SocketModeRunner {
        SocketModeRunner::new(
            transport,
            dispatcher,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
            InFlightTasks::new(),
            Duration::from_secs(5),
        )
    }

    fn envelope(id: &str, kind: EnvelopeKind, payload: Value) -> Result<Option<SocketEnvelope>, TransportError> {
        Ok(Some(SocketEnvelope { envelope_id: id.to_owned(), kind, payload }))
    }

    fn submission() -> Value {
        json!({"type": "view_submission", "user": {"id": "U5"}, "view": {"id": "V1", "private_metadata": "bug"}})
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![envelope("env-1", EnvelopeKind::Unsupported("slash_commands".to_owned()), Value::Null), Ok(None)],
        ));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        runner(transport.clone(), dispatcher(Duration::ZERO, Duration::from_secs(1))).run(shutdown).await;

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec![("env-1".to_owned(), None)]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let report = runner(transport.clone(), dispatcher(Duration::ZERO, Duration::from_secs(1))).run(shutdown).await;

        assert_eq!(transport.connect_attempts().await, 3);
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn successful_connect_resets_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Ok(()),
                Err(TransportError::Connect("fail-3".to_owned())),
                Ok(()),
            ],
            vec![Err(TransportError::Disconnected("refresh_requested".to_owned())), Ok(None)],
        ));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        runner(transport.clone(), dispatcher(Duration::ZERO, Duration::from_secs(1))).run(shutdown).await;

        assert_eq!(transport.connect_attempts().await, 5);
    }

    #[tokio::test]
    async fn acks_in_receipt_order_with_interaction_payload() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                envelope("env-event", EnvelopeKind::EventsApi, json!({"event": {"type": "reaction_added"}})),
                envelope("env-submit", EnvelopeKind::Interactive, submission()),
                envelope("env-other", EnvelopeKind::Unsupported("slash_commands".to_owned()), Value::Null),
                Ok(None),
            ],
        ));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        runner(transport.clone(), dispatcher(Duration::ZERO, Duration::from_secs(1))).run(shutdown).await;

        assert_eq!(
            transport.acknowledgements().await,
            vec![
                ("env-event".to_owned(), None),
                (
                    "env-submit".to_owned(),
                    Some(json!({"response_action": "errors", "errors": {"title": "U5"}}))
                ),
                ("env-other".to_owned(), None),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_interaction_is_acked_empty_at_deadline_and_drained() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![envelope("env-slow", EnvelopeKind::Interactive, submission()), Ok(None)],
        ));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let report = runner(transport.clone(), dispatcher(Duration::from_secs(3), Duration::from_millis(2_500)))
            .run(shutdown)
            .await;

        assert_eq!(transport.acknowledgements().await, vec![("env-slow".to_owned(), None)]);
        assert_eq!(report, DrainReport { completed: 1, abandoned: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn envelopes_read_together_are_each_acked_within_deadline() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                envelope("env-a", EnvelopeKind::Interactive, submission()),
                envelope("env-b", EnvelopeKind::Interactive, submission()),
                Ok(None),
            ],
        ));
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let started = Instant::now();

        let report = runner(transport.clone(), dispatcher(Duration::from_secs(3), Duration::from_millis(2_500)))
            .run(shutdown)
            .await;

        let state = transport.state.lock().await;
        let acked = state.acknowledgements.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>();
        assert_eq!(acked, vec!["env-a", "env-b"]);
        for acked_at in &state.acked_at {
            assert!(acked_at.duration_since(started) <= Duration::from_millis(2_500));
        }
        assert_eq!(report, DrainReport { completed: 2, abandoned: 0 });
    }

    #[tokio::test]
    async fn shutdown_signal_stops_a_waiting_loop() {
        let transport = Arc::new(ScriptedTransport {
            hang_when_exhausted: true,
            ..ScriptedTransport::with_script(vec![Ok(())], vec![])
        });
        let (shutdown_tx, shutdown) = watch::channel(false);
        let runner = runner(transport.clone(), dispatcher(Duration::ZERO, Duration::from_secs(1)));

        let running = tokio::spawn(async move { runner.run(shutdown).await });
        tokio::task::yield_now().await;
        shutdown_tx.send(true).expect("receiver alive");

        let report = running.await.expect("runner task");
        assert_eq!(report, DrainReport::default());
        assert_eq!(transport.state.lock().await.disconnect_calls, 1);
    }

    #[test]
    fn parses_socket_mode_frames() {
        assert_eq!(SocketMessage::parse(r#"{"type":"hello","num_connections":1}"#), Ok(SocketMessage::Hello));
        assert_eq!(
            SocketMessage::parse(r#"{"type":"disconnect","reason":"refresh_requested"}"#),
            Ok(SocketMessage::Disconnect { reason: "refresh_requested".to_owned() })
        );
        assert_eq!(
            SocketMessage::parse(r#"{"type":"interactive","envelope_id":"e1","payload":{"type":"shortcut"}}"#),
            Ok(SocketMessage::Envelope(SocketEnvelope {
                envelope_id: "e1".to_owned(),
                kind: EnvelopeKind::Interactive,
                payload: json!({"type": "shortcut"}),
            }))
        );
        assert_eq!(SocketMessage::parse(r#"{"type":"mystery"}"#), Ok(SocketMessage::Unknown("mystery".to_owned())));
        assert!(SocketMessage::parse("not json").is_err());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(4), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(5), Duration::from_millis(5_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(5_000));
    }
}
