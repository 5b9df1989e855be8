use std::time::Duration;

use thiserror::Error;

use crate::{template::TemplateError, tracker::TrackerError};

/// Why a single submission could not be turned into a ticket.
///
/// Filing failures are terminal for the submission that caused them: they are
/// shown to the user through the view and logged, never retried.
#[derive(Debug, Error)]
pub enum FilingError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("issue tracker did not respond within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("submission is missing required field `{0}`")]
    MissingField(String),
}

impl FilingError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Tracker(TrackerError::Rejected { message, .. }) => {
                format!("Jira rejected the issue: {message}")
            }
            Self::Tracker(TrackerError::Request(_) | TrackerError::InvalidResponse(_))
            | Self::TimedOut(_) => {
                "Jira could not be reached. Please try submitting the form again later."
                    .to_owned()
            }
            Self::Template(_) => "The issue body could not be rendered.".to_owned(),
            Self::MissingField(field) => format!("The form was submitted without `{field}`."),
        }
    }

    /// Internal failures point at a bug in this process rather than at the tracker.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Template(_) | Self::MissingField(_))
    }
}
