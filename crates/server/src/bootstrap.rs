use std::sync::Arc;

use jirabot_core::config::{AppConfig, ConfigError};
use jirabot_core::{JiraClient, SubmissionLedger, TemplateError, TrackerError};
use jirabot_slack::dispatch::EnvelopeDispatcher;
use jirabot_slack::events::{EventRouter, MentionHandler, SlackEvent};
use jirabot_slack::handler::PartialHandler;
use jirabot_slack::modals::filer::FilingServices;
use jirabot_slack::modals::{bug, FlowRegistry, InteractionRouter, RegistryError};
use jirabot_slack::socket::{ReconnectPolicy, SocketModeRunner};
use jirabot_slack::tasks::InFlightTasks;
use jirabot_slack::web::SlackWebClient;
use jirabot_slack::websocket::WebSocketTransport;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub registry: Arc<FlowRegistry>,
    pub tasks: InFlightTasks,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("jira client could not be built: {0}")]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        jira_project = %config.jira.project,
        "starting application bootstrap"
    );

    let jira = Arc::new(JiraClient::new(&config.jira)?);
    let slack = Arc::new(SlackWebClient::new(config.slack.bot_token.clone(), config.slack.app_token.clone()));
    let tasks = InFlightTasks::new();

    let services = FilingServices {
        tracker: jira,
        updater: slack.clone(),
        ledger: Arc::new(SubmissionLedger::new(config.filing.dedup_retention())),
        tasks: tasks.clone(),
        timeout: config.filing.timeout(),
    };
    let registry = Arc::new(register_flows(services)?);
    info!(
        event_name = "system.bootstrap.flows_registered",
        correlation_id = "bootstrap",
        flows = ?registry.ids().iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        "modal flows registered"
    );

    let events = Arc::new(EventRouter::new(vec![Arc::new(MentionHandler::new(
        slack.clone(),
        vec![bug::SHORTCUT_NAME.to_owned()],
    )) as Arc<dyn PartialHandler<SlackEvent>>]));
    info!(
        event_name = "system.bootstrap.event_handlers_registered",
        correlation_id = "bootstrap",
        handlers = ?events.handler_names(),
        "event handlers registered"
    );
    let interactions = InteractionRouter::new(registry.clone(), slack.clone());
    let dispatcher = EnvelopeDispatcher::new(
        events,
        Arc::new(interactions),
        config.server.ack_deadline(),
    );

    let slack_runner = SocketModeRunner::new(
        Arc::new(WebSocketTransport::new(SlackWebClient::clone(&slack))),
        dispatcher,
        ReconnectPolicy::default(),
        tasks.clone(),
        config.server.grace_period(),
    );

    Ok(Application { config, registry, tasks, slack_runner })
}

/// Every flow the bot serves. A duplicate identifier aborts startup.
pub fn register_flows(services: FilingServices) -> Result<FlowRegistry, BootstrapError> {
    let mut registry = FlowRegistry::new();
    registry.register(bug::register(services)?)?;
    Ok(registry)
}
