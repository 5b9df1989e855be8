use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::handler::{HandlerChain, HandlerContext, HandlerError, HandlerOutcome, PartialHandler};

/// The `payload` of an `events_api` envelope.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EventsApiPayload {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    AppMention(AppMentionEvent),
    #[serde(other)]
    Unsupported,
}

impl SlackEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AppMention(_) => "app_mention",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppMentionEvent {
    pub user: String,
    #[serde(default)]
    pub text: String,
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl AppMentionEvent {
    /// Replies stay in the thread the mention started or belongs to.
    pub fn reply_thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_thread_reply(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), HandlerError>;
}

/// Routes decoded events through the registered event handlers.
pub struct EventRouter {
    chain: HandlerChain<SlackEvent>,
}

impl EventRouter {
    pub fn new(handlers: Vec<Arc<dyn PartialHandler<SlackEvent>>>) -> Self {
        Self { chain: HandlerChain::new(handlers) }
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.chain.names()
    }

    pub async fn route(&self, payload: Value, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let payload: EventsApiPayload = serde_json::from_value(payload).map_err(|error| {
            HandlerError::Decode { kind: "events_api", message: error.to_string() }
        })?;

        match self.chain.handle(&payload.event, ctx).await {
            HandlerOutcome::Declined => {
                debug!(
                    event_name = "ingress.slack.event_unclaimed",
                    correlation_id = %ctx.correlation_id,
                    event_type = payload.event.event_type(),
                    "no handler claimed event"
                );
                Ok(())
            }
            HandlerOutcome::Claimed { error: Some(error), .. } => Err(error),
            HandlerOutcome::Claimed { error: None, .. } => Ok(()),
        }
    }
}

/// Answers mentions with a pointer to the form shortcuts.
pub struct MentionHandler<P> {
    poster: Arc<P>,
    shortcuts: Vec<String>,
}

impl<P: MessagePoster> MentionHandler<P> {
    pub fn new(poster: Arc<P>, shortcuts: Vec<String>) -> Self {
        Self { poster, shortcuts }
    }

    fn reply_text(&self, user: &str) -> String {
        if self.shortcuts.is_empty() {
            return format!("Hi <@{user}>! No forms are available right now.");
        }
        let shortcuts =
            self.shortcuts.iter().map(|shortcut| format!("`{shortcut}`")).collect::<Vec<_>>().join(", ");
        format!(
            "Hi <@{user}>! I file Jira issues from forms. Open one from the shortcuts menu: {shortcuts}."
        )
    }
}

#[async_trait]
impl<P> PartialHandler<SlackEvent> for MentionHandler<P>
where
    P: MessagePoster + 'static,
{
    fn name(&self) -> &str {
        "mention"
    }

    async fn handle(&self, input: &SlackEvent, _ctx: &HandlerContext) -> HandlerOutcome {
        let SlackEvent::AppMention(mention) = input else {
            return HandlerOutcome::Declined;
        };

        match self
            .poster
            .post_thread_reply(&mention.channel, mention.reply_thread(), &self.reply_text(&mention.user))
            .await
        {
            Ok(()) => HandlerOutcome::handled(),
            Err(error) => HandlerOutcome::failed(error),
        }
    }
}
