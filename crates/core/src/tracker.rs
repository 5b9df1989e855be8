use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueType {
    Bug,
    Story,
    Task,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "Bug",
            Self::Story => "Story",
            Self::Task => "Task",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the tracker needs to create one ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedIssue {
    pub title: String,
    pub body: String,
    pub issue_type: IssueType,
}

/// Tracker-assigned identifier of a filed ticket, e.g. `MGMT-1234`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TicketReference {
    pub key: String,
    pub url: Option<String>,
}

impl TicketReference {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), url: None }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl fmt::Display for TicketReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Request(String),
    #[error("tracker rejected the issue with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("tracker returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// Creates tickets. A single call is atomic from the tracker's point of view:
/// it either creates exactly one ticket or none.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn file(&self, issue: &RenderedIssue) -> Result<TicketReference, TrackerError>;
}
