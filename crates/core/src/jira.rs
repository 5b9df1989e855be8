//! Jira REST client used as the production [`TrackerClient`].
//!
//! Issues are created with a single `POST /rest/api/2/issue`; the returned key
//! becomes the [`TicketReference`] shown back to the user.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::JiraConfig;
use crate::tracker::{RenderedIssue, TicketReference, TrackerClient, TrackerError};

#[derive(Clone, Debug)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    username: Option<String>,
    token: SecretString,
}

#[derive(Debug, Serialize)]
struct CreateIssueRequest<'a> {
    fields: IssueFields<'a>,
}

#[derive(Debug, Serialize)]
struct IssueFields<'a> {
    project: ProjectRef<'a>,
    summary: &'a str,
    description: &'a str,
    issuetype: IssueTypeRef<'a>,
}

#[derive(Debug, Serialize)]
struct ProjectRef<'a> {
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct IssueTypeRef<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateIssueResponse {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
    #[serde(default)]
    errors: BTreeMap<String, String>,
}

impl JiraErrorBody {
    fn summary(&self) -> String {
        let mut parts = self.error_messages.clone();
        parts.extend(self.errors.iter().map(|(field, message)| format!("{field}: {message}")));
        if parts.is_empty() {
            "no error details returned".to_owned()
        } else {
            parts.join("; ")
        }
    }
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|error| TrackerError::Request(format!("could not build http client: {error}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            project: config.project.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn create_issue_url(&self) -> String {
        format!("{}/rest/api/2/issue", self.base_url)
    }

    fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.base_url)
    }

    fn create_issue_request<'a>(&'a self, issue: &'a RenderedIssue) -> CreateIssueRequest<'a> {
        CreateIssueRequest {
            fields: IssueFields {
                project: ProjectRef { key: &self.project },
                summary: &issue.title,
                description: &issue.body,
                issuetype: IssueTypeRef { name: issue.issue_type.as_str() },
            },
        }
    }
}

#[async_trait]
impl TrackerClient for JiraClient {
    async fn file(&self, issue: &RenderedIssue) -> Result<TicketReference, TrackerError> {
        debug!(project = %self.project, issue_type = %issue.issue_type, "creating jira issue");

        let request = self.http.post(self.create_issue_url()).json(&self.create_issue_request(issue));
        let request = match &self.username {
            Some(username) => request.basic_auth(username, Some(self.token.expose_secret())),
            None => request.bearer_auth(self.token.expose_secret()),
        };

        let response = request
            .send()
            .await
            .map_err(|error| TrackerError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<JiraErrorBody>().await.unwrap_or_default();
            warn!(status = status.as_u16(), project = %self.project, "jira rejected issue");
            return Err(TrackerError::Rejected { status: status.as_u16(), message: body.summary() });
        }

        let created = response
            .json::<CreateIssueResponse>()
            .await
            .map_err(|error| TrackerError::InvalidResponse(error.to_string()))?;

        Ok(TicketReference::new(created.key.clone()).with_url(self.browse_url(&created.key)))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{JiraClient, JiraErrorBody};
    use crate::config::JiraConfig;
    use crate::tracker::{IssueType, RenderedIssue};

    fn client(base_url: &str) -> JiraClient {
        JiraClient::new(&JiraConfig {
            base_url: base_url.to_owned(),
            project: "MGMT".to_owned(),
            username: None,
            token: SecretString::from("token".to_owned()),
            request_timeout_secs: 5,
        })
        .expect("client should build")
    }

    #[test]
    fn create_issue_request_matches_jira_field_layout() {
        let client = client("https://jira.example.com/");
        let issue = RenderedIssue {
            title: "Installer hangs".to_owned(),
            body: "h3. Symptomatic Behavior\nhangs".to_owned(),
            issue_type: IssueType::Bug,
        };

        let body = serde_json::to_value(client.create_issue_request(&issue)).expect("serialize");

        assert_eq!(
            body,
            serde_json::json!({
                "fields": {
                    "project": {"key": "MGMT"},
                    "summary": "Installer hangs",
                    "description": "h3. Symptomatic Behavior\nhangs",
                    "issuetype": {"name": "Bug"}
                }
            })
        );
    }

    #[test]
    fn urls_ignore_trailing_slash_in_base_url() {
        let client = client("https://jira.example.com/");

        assert_eq!(client.create_issue_url(), "https://jira.example.com/rest/api/2/issue");
        assert_eq!(client.browse_url("MGMT-7"), "https://jira.example.com/browse/MGMT-7");
    }

    #[test]
    fn error_body_summary_joins_messages_and_field_errors() {
        let body: JiraErrorBody = serde_json::from_value(serde_json::json!({
            "errorMessages": ["Project is archived"],
            "errors": {"issuetype": "issue type is required"}
        }))
        .expect("deserialize");

        assert_eq!(body.summary(), "Project is archived; issuetype: issue type is required");
        assert_eq!(JiraErrorBody::default().summary(), "no error details returned");
    }
}
