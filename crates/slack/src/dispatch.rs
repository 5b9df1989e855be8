//! Decides, per envelope kind, what goes into the acknowledgement and what
//! runs after it.
//!
//! - `events_api`: acknowledged empty; routing runs afterwards.
//! - `interactive`: the handler chain gets until the ack deadline so a
//!   validation error or view update can ride on the acknowledgement. Past
//!   the deadline the envelope is acknowledged empty and the chain keeps
//!   running in the background.
//! - anything else: acknowledged empty and dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::events::EventRouter;
use crate::handler::{HandlerContext, HandlerOutcome, PartialHandler};
use crate::interactions::InteractionCallback;
use crate::socket::EnvelopeKind;

pub struct Dispatch {
    pub ack_payload: Option<Value>,
    /// Work to schedule once the envelope is acknowledged.
    pub deferred: Option<BoxFuture<'static, ()>>,
}

impl Dispatch {
    fn ack() -> Self {
        Self { ack_payload: None, deferred: None }
    }
}

#[derive(Clone)]
pub struct EnvelopeDispatcher {
    events: Arc<EventRouter>,
    interactions: Arc<dyn PartialHandler<InteractionCallback>>,
    ack_deadline: Duration,
}

impl EnvelopeDispatcher {
    pub fn new(
        events: Arc<EventRouter>,
        interactions: Arc<dyn PartialHandler<InteractionCallback>>,
        ack_deadline: Duration,
    ) -> Self {
        Self { events, interactions, ack_deadline }
    }

    pub async fn dispatch(&self, kind: EnvelopeKind, payload: Value, ctx: &HandlerContext) -> Dispatch {
        match kind {
            EnvelopeKind::EventsApi => self.dispatch_event(payload, ctx),
            EnvelopeKind::Interactive => self.dispatch_interaction(payload, ctx).await,
            EnvelopeKind::Unsupported(kind) => {
                debug!(
                    correlation_id = %ctx.correlation_id,
                    envelope_kind = %kind,
                    "ignoring unsupported envelope"
                );
                Dispatch::ack()
            }
        }
    }

    fn dispatch_event(&self, payload: Value, ctx: &HandlerContext) -> Dispatch {
        let events = Arc::clone(&self.events);
        let ctx = ctx.clone();
        let deferred = async move {
            if let Err(error) = events.route(payload, &ctx).await {
                warn!(
                    event_name = "ingress.slack.event_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "event handling failed"
                );
            }
        };
        Dispatch { ack_payload: None, deferred: Some(deferred.boxed()) }
    }

    async fn dispatch_interaction(&self, payload: Value, ctx: &HandlerContext) -> Dispatch {
        let callback = match InteractionCallback::decode(payload) {
            Ok(callback) => callback,
            Err(error) => {
                warn!(
                    event_name = "ingress.slack.interaction_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "interaction payload rejected"
                );
                return Dispatch::ack();
            }
        };

        let interactions = Arc::clone(&self.interactions);
        let chain_ctx = ctx.clone();
        let mut running: JoinHandle<HandlerOutcome> =
            tokio::spawn(async move { interactions.handle(&callback, &chain_ctx).await });

        match tokio::time::timeout(self.ack_deadline, &mut running).await {
            Ok(Ok(outcome)) => Dispatch { ack_payload: ack_payload(outcome, ctx), deferred: None },
            Ok(Err(join_error)) => {
                error!(
                    event_name = "ingress.slack.interaction_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %join_error,
                    "interaction handler panicked"
                );
                Dispatch::ack()
            }
            Err(_) => {
                warn!(
                    event_name = "ingress.slack.ack_deadline_missed",
                    correlation_id = %ctx.correlation_id,
                    deadline_ms = self.ack_deadline.as_millis() as u64,
                    "interaction still running at ack deadline; acknowledging without payload"
                );
                let ctx = ctx.clone();
                let deferred = async move {
                    match running.await {
                        Ok(outcome) => {
                            ack_payload(outcome, &ctx);
                        }
                        Err(join_error) => error!(
                            event_name = "ingress.slack.interaction_failed",
                            correlation_id = %ctx.correlation_id,
                            error = %join_error,
                            "interaction handler panicked"
                        ),
                    }
                };
                Dispatch { ack_payload: None, deferred: Some(deferred.boxed()) }
            }
        }
    }
}

/// Logs what the chain reported and returns the payload to acknowledge with.
fn ack_payload(outcome: HandlerOutcome, ctx: &HandlerContext) -> Option<Value> {
    match outcome {
        HandlerOutcome::Declined => {
            debug!(correlation_id = %ctx.correlation_id, "no handler claimed interaction");
            None
        }
        HandlerOutcome::Claimed { response, error: Some(error) } => {
            error!(
                event_name = "ingress.slack.interaction_failed",
                correlation_id = %ctx.correlation_id,
                error = %error,
                "interaction handling failed"
            );
            response
        }
        HandlerOutcome::Claimed { response, error: None } => response,
    }
}
