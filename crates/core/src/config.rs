use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub jira: JiraConfig,
    pub filing: FilingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
}

#[derive(Clone, Debug)]
pub struct JiraConfig {
    pub base_url: String,
    pub project: String,
    pub username: Option<String>,
    pub token: SecretString,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FilingConfig {
    pub timeout_secs: u64,
    pub dedup_retention_secs: u64,
}

impl FilingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
    pub ack_deadline_ms: u64,
}

impl ServerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_secs)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub jira_base_url: Option<String>,
    pub jira_project: Option<String>,
    pub jira_token: Option<String>,
    pub graceful_shutdown_secs: Option<u64>,
    pub health_check_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig { app_token: String::new().into(), bot_token: String::new().into() },
            jira: JiraConfig {
                base_url: "https://issues.redhat.com".to_string(),
                project: String::new(),
                username: None,
                token: String::new().into(),
                request_timeout_secs: 20,
            },
            filing: FilingConfig { timeout_secs: 30, dedup_retention_secs: 1_800 },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                health_check_port: 8888,
                graceful_shutdown_secs: 180,
                ack_deadline_ms: 2_500,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("jirabot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(slack_app_token_value) = slack.app_token {
                self.slack.app_token = secret_value(slack_app_token_value);
            }
            if let Some(slack_bot_token_value) = slack.bot_token {
                self.slack.bot_token = secret_value(slack_bot_token_value);
            }
        }

        if let Some(jira) = patch.jira {
            if let Some(base_url) = jira.base_url {
                self.jira.base_url = base_url;
            }
            if let Some(project) = jira.project {
                self.jira.project = project;
            }
            if let Some(username) = jira.username {
                self.jira.username = Some(username);
            }
            if let Some(jira_token_value) = jira.token {
                self.jira.token = secret_value(jira_token_value);
            }
            if let Some(request_timeout_secs) = jira.request_timeout_secs {
                self.jira.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(filing) = patch.filing {
            if let Some(timeout_secs) = filing.timeout_secs {
                self.filing.timeout_secs = timeout_secs;
            }
            if let Some(dedup_retention_secs) = filing.dedup_retention_secs {
                self.filing.dedup_retention_secs = dedup_retention_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(ack_deadline_ms) = server.ack_deadline_ms {
                self.server.ack_deadline_ms = ack_deadline_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("JIRABOT_SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env("JIRABOT_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }

        if let Some(value) = read_env("JIRABOT_JIRA_BASE_URL") {
            self.jira.base_url = value;
        }
        if let Some(value) = read_env("JIRABOT_JIRA_PROJECT") {
            self.jira.project = value;
        }
        if let Some(value) = read_env("JIRABOT_JIRA_USERNAME") {
            self.jira.username = Some(value);
        }
        if let Some(value) = read_env("JIRABOT_JIRA_TOKEN") {
            self.jira.token = secret_value(value);
        }
        if let Some(value) = read_env("JIRABOT_JIRA_REQUEST_TIMEOUT_SECS") {
            self.jira.request_timeout_secs = parse_u64("JIRABOT_JIRA_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("JIRABOT_FILING_TIMEOUT_SECS") {
            self.filing.timeout_secs = parse_u64("JIRABOT_FILING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("JIRABOT_FILING_DEDUP_RETENTION_SECS") {
            self.filing.dedup_retention_secs =
                parse_u64("JIRABOT_FILING_DEDUP_RETENTION_SECS", &value)?;
        }

        if let Some(value) = read_env("JIRABOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("JIRABOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("JIRABOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("JIRABOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("JIRABOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("JIRABOT_SERVER_ACK_DEADLINE_MS") {
            self.server.ack_deadline_ms = parse_u64("JIRABOT_SERVER_ACK_DEADLINE_MS", &value)?;
        }

        let log_level =
            read_env("JIRABOT_LOGGING_LEVEL").or_else(|| read_env("JIRABOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("JIRABOT_LOGGING_FORMAT").or_else(|| read_env("JIRABOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(base_url) = overrides.jira_base_url {
            self.jira.base_url = base_url;
        }
        if let Some(project) = overrides.jira_project {
            self.jira.project = project;
        }
        if let Some(jira_token) = overrides.jira_token {
            self.jira.token = secret_value(jira_token);
        }
        if let Some(graceful_shutdown_secs) = overrides.graceful_shutdown_secs {
            self.server.graceful_shutdown_secs = graceful_shutdown_secs;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_jira(&self.jira)?;
        validate_filing(&self.filing)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("jirabot.toml"), PathBuf::from("config/jirabot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str::<ConfigPatch>(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    validate_token("slack.app_token", slack.app_token.expose_secret(), "xapp-")?;
    validate_token("slack.bot_token", slack.bot_token.expose_secret(), "xoxb-")
}

/// Socket Mode needs the app-level token; the Web API calls need the bot token.
fn validate_token(field: &str, token: &str, prefix: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Validation(format!("{field} is required")));
    }
    if !token.starts_with(prefix) {
        return Err(ConfigError::Validation(format!("{field} must start with `{prefix}`")));
    }
    Ok(())
}

fn validate_jira(jira: &JiraConfig) -> Result<(), ConfigError> {
    if !jira.base_url.starts_with("http://") && !jira.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "jira.base_url must start with http:// or https://".to_string(),
        ));
    }

    if jira.project.trim().is_empty() {
        return Err(ConfigError::Validation(
            "jira.project is required (the key of the project new issues are filed into)"
                .to_string(),
        ));
    }

    if jira.token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("jira.token is required".to_string()));
    }

    if jira.request_timeout_secs == 0 || jira.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "jira.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_filing(filing: &FilingConfig) -> Result<(), ConfigError> {
    if filing.timeout_secs == 0 || filing.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "filing.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    // Socket Mode retries an unacknowledged envelope for a few minutes at most.
    if filing.dedup_retention_secs < 60 {
        return Err(ConfigError::Validation(
            "filing.dedup_retention_secs must be at least 60".to_string(),
        ));
    }

    if filing.dedup_retention_secs <= filing.timeout_secs {
        return Err(ConfigError::Validation(
            "filing.dedup_retention_secs must be greater than filing.timeout_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.ack_deadline_ms == 0 || server.ack_deadline_ms > 3_000 {
        return Err(ConfigError::Validation(
            "server.ack_deadline_ms must be in range 1..=3000".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    jira: Option<JiraPatch>,
    filing: Option<FilingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JiraPatch {
    base_url: Option<String>,
    project: Option<String>,
    username: Option<String>,
    token: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FilingPatch {
    timeout_secs: Option<u64>,
    dedup_retention_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    ack_deadline_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
