pub mod config;
pub mod errors;
pub mod jira;
pub mod ledger;
pub mod template;
pub mod tracker;

pub use errors::FilingError;
pub use jira::JiraClient;
pub use ledger::{Admission, SubmissionKey, SubmissionLedger};
pub use template::{FieldValues, IssueTemplate, TemplateError};
pub use tracker::{IssueType, RenderedIssue, TicketReference, TrackerClient, TrackerError};
