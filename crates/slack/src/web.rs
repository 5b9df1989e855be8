//! Thin Slack Web API client for the methods the bot calls.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::blocks::ModalView;
use crate::events::MessagePoster;
use crate::handler::HandlerError;
use crate::modals::{ViewPresenter, ViewUpdater};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebApiError {
    #[error("{method} request failed: {message}")]
    Request { method: String, message: String },
    #[error("{method} response could not be parsed: {message}")]
    Parse { method: String, message: String },
    #[error("{method} returned error `{code}`")]
    Api { method: String, code: String },
    #[error("{method} response missing `{field}`")]
    MissingField { method: String, field: &'static str },
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
    app_token: SecretString,
}

impl std::fmt::Debug for SlackWebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackWebClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl SlackWebClient {
    pub fn new(bot_token: impl Into<SecretString>, app_token: impl Into<SecretString>) -> Self {
        Self::with_base_url(SLACK_API_BASE, bot_token, app_token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: impl Into<SecretString>,
        app_token: impl Into<SecretString>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            bot_token: bot_token.into(),
            app_token: app_token.into(),
        }
    }

    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    pub async fn open_view(&self, trigger_id: &str, view: &ModalView) -> Result<(), WebApiError> {
        self.call_bot_api("views.open", &json!({"trigger_id": trigger_id, "view": view})).await.map(drop)
    }

    pub async fn update_view(&self, view_id: &str, view: &ModalView) -> Result<(), WebApiError> {
        self.call_bot_api("views.update", &json!({"view_id": view_id, "view": view})).await.map(drop)
    }

    pub async fn post_thread_reply(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), WebApiError> {
        let body = json!({"channel": channel, "thread_ts": thread_ts, "text": text});
        self.call_bot_api("chat.postMessage", &body).await.map(drop)
    }

    /// Requests a Socket Mode WebSocket URL with the app-level token.
    pub async fn connections_open(&self) -> Result<String, WebApiError> {
        const METHOD: &str = "apps.connections.open";
        debug!(method = METHOD, "opening socket mode connection");
        let response = self
            .http
            .post(self.method_url(METHOD))
            .bearer_auth(self.app_token.expose_secret())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await
            .map_err(|error| WebApiError::Request { method: METHOD.to_owned(), message: error.to_string() })?;

        let response = parse_response(METHOD, response).await?;
        response.url.ok_or(WebApiError::MissingField { method: METHOD.to_owned(), field: "url" })
    }

    async fn call_bot_api(&self, method: &str, body: &Value) -> Result<ApiResponse, WebApiError> {
        let response = self
            .http
            .post(self.method_url(method))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| WebApiError::Request { method: method.to_owned(), message: error.to_string() })?;

        parse_response(method, response).await
    }
}

async fn parse_response(method: &str, response: reqwest::Response) -> Result<ApiResponse, WebApiError> {
    let response: ApiResponse = response
        .json()
        .await
        .map_err(|error| WebApiError::Parse { method: method.to_owned(), message: error.to_string() })?;

    check_ok(method, response)
}

fn check_ok(method: &str, response: ApiResponse) -> Result<ApiResponse, WebApiError> {
    if response.ok {
        return Ok(response);
    }
    let code = response.error.unwrap_or_else(|| "unknown".to_owned());
    warn!(method, error = %code, "slack api error");
    Err(WebApiError::Api { method: method.to_owned(), code })
}

#[async_trait]
impl ViewPresenter for SlackWebClient {
    async fn open_view(&self, trigger_id: &str, view: &ModalView) -> Result<(), HandlerError> {
        SlackWebClient::open_view(self, trigger_id, view)
            .await
            .map_err(|error| HandlerError::ViewUpdate(error.to_string()))
    }
}

#[async_trait]
impl ViewUpdater for SlackWebClient {
    async fn update_view(&self, view_id: &str, view: &ModalView) -> Result<(), HandlerError> {
        SlackWebClient::update_view(self, view_id, view)
            .await
            .map_err(|error| HandlerError::ViewUpdate(error.to_string()))
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_thread_reply(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), HandlerError> {
        SlackWebClient::post_thread_reply(self, channel, thread_ts, text)
            .await
            .map_err(|error| HandlerError::Messaging(error.to_string()))
    }
}
