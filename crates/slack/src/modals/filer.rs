//! Turns a validated view submission into exactly one tracker call.
//!
//! The submission is answered at once with a pending view. Filing runs as a
//! tracked background task that records its result in the ledger and then
//! replaces the pending view with the confirmation or the failure notice.
//! Redeliveries of the same submission are answered from the ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jirabot_core::{
    Admission, FieldValues, FilingError, IssueTemplate, IssueType, RenderedIssue, SubmissionKey,
    SubmissionLedger, TicketReference, TrackerClient,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::{FlowId, ViewUpdater};
use crate::blocks::{failure_view, filed_view, pending_view, ModalView, ViewSubmissionResponse};
use crate::handler::{HandlerContext, HandlerError, HandlerOutcome, PartialHandler};
use crate::interactions::{InteractionCallback, InteractionType};
use crate::tasks::InFlightTasks;

/// What a flow files and how.
pub struct IssueFlowParameters {
    pub id: FlowId,
    pub issue_type: IssueType,
    pub template: IssueTemplate,
    /// Field whose value becomes the issue summary.
    pub title_field: String,
    /// Every field the form can submit. Absent ones render as empty strings.
    pub fields: Vec<String>,
}

#[derive(Clone)]
pub struct FilingServices {
    pub tracker: Arc<dyn TrackerClient>,
    pub updater: Arc<dyn ViewUpdater>,
    pub ledger: Arc<SubmissionLedger>,
    pub tasks: InFlightTasks,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilingOutcome {
    Filed(TicketReference),
    Failed(String),
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FilingWaitError {
    #[error("filing did not finish in time")]
    TimedOut,
    #[error("filing task ended without reporting an outcome")]
    Abandoned,
}

/// Completion handle for a background filing.
#[derive(Debug)]
pub struct FilingTask {
    outcome: oneshot::Receiver<FilingOutcome>,
}

impl FilingTask {
    pub async fn wait(self, timeout: Duration) -> Result<FilingOutcome, FilingWaitError> {
        match tokio::time::timeout(timeout, self.outcome).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(FilingWaitError::Abandoned),
            Err(_) => Err(FilingWaitError::TimedOut),
        }
    }
}

#[derive(Debug)]
pub struct SubmissionReceipt {
    pub response: ViewSubmissionResponse,
    /// Present only when this delivery started a filing.
    pub task: Option<FilingTask>,
}

impl SubmissionReceipt {
    fn respond(response: ViewSubmissionResponse) -> Self {
        Self { response, task: None }
    }
}

pub struct IssueFiler {
    parameters: Arc<IssueFlowParameters>,
    services: FilingServices,
}

impl IssueFiler {
    pub fn new(parameters: IssueFlowParameters, services: FilingServices) -> Self {
        Self { parameters: Arc::new(parameters), services }
    }

    pub async fn submit(
        &self,
        callback: &InteractionCallback,
        ctx: &HandlerContext,
    ) -> Result<SubmissionReceipt, HandlerError> {
        let key = callback.submission_key()?;

        match self.services.ledger.admit(&key) {
            Admission::Fresh => Ok(self.start_filing(key, callback.field_values(), ctx)),
            Admission::Pending => {
                info!(
                    event_name = "filing.duplicate",
                    correlation_id = %ctx.correlation_id,
                    flow_id = %key.flow_id,
                    view_id = %key.view_id,
                    state = "pending",
                    "redelivered submission is still being filed"
                );
                Ok(SubmissionReceipt::respond(ViewSubmissionResponse::update(self.tag(pending_view()))))
            }
            Admission::Filed(ticket) => {
                info!(
                    event_name = "filing.duplicate",
                    correlation_id = %ctx.correlation_id,
                    flow_id = %key.flow_id,
                    view_id = %key.view_id,
                    ticket = %ticket,
                    state = "filed",
                    "redelivered submission was already filed"
                );
                Ok(SubmissionReceipt::respond(ViewSubmissionResponse::update(self.tag(filed_view(&ticket)))))
            }
            Admission::Failed(reason) => {
                info!(
                    event_name = "filing.duplicate",
                    correlation_id = %ctx.correlation_id,
                    flow_id = %key.flow_id,
                    view_id = %key.view_id,
                    state = "failed",
                    "redelivered submission already failed"
                );
                Ok(SubmissionReceipt::respond(ViewSubmissionResponse::update(self.tag(failure_view(&reason)))))
            }
        }
    }

    fn start_filing(
        &self,
        key: SubmissionKey,
        mut fields: FieldValues,
        ctx: &HandlerContext,
    ) -> SubmissionReceipt {
        for field in &self.parameters.fields {
            fields.ensure_field(field);
        }

        let issue = match self.render(&fields) {
            Ok(issue) => issue,
            Err(failure) => {
                // Nothing reached the tracker, so the claim can be retried.
                self.services.ledger.release(&key);
                error!(
                    event_name = "filing.failed",
                    correlation_id = %ctx.correlation_id,
                    flow_id = %key.flow_id,
                    view_id = %key.view_id,
                    internal = failure.is_internal(),
                    error = %failure,
                    "issue could not be rendered"
                );
                return SubmissionReceipt::respond(ViewSubmissionResponse::update(
                    self.tag(failure_view(&failure.user_message())),
                ));
            }
        };

        info!(
            event_name = "filing.submitted",
            correlation_id = %ctx.correlation_id,
            flow_id = %key.flow_id,
            user_id = %key.user_id,
            view_id = %key.view_id,
            issue_type = %issue.issue_type,
            "filing issue"
        );

        let (sender, receiver) = oneshot::channel();
        let services = self.services.clone();
        let correlation_id = ctx.correlation_id.clone();
        self.services.tasks.spawn(async move {
            let outcome = file_issue(&services, &key, &issue, &correlation_id).await;
            let mut view = match &outcome {
                FilingOutcome::Filed(ticket) => filed_view(ticket),
                FilingOutcome::Failed(reason) => failure_view(reason),
            };
            view.private_metadata = key.flow_id.clone();

            if let Err(update_error) = services.updater.update_view(&key.view_id, &view).await {
                warn!(
                    event_name = "filing.view_update_failed",
                    correlation_id = %correlation_id,
                    view_id = %key.view_id,
                    error = %update_error,
                    "could not show filing result"
                );
            }
            // The receiver is gone unless a caller is waiting on the handle.
            let _ = sender.send(outcome);
        });

        SubmissionReceipt {
            response: ViewSubmissionResponse::update(self.tag(pending_view())),
            task: Some(FilingTask { outcome: receiver }),
        }
    }

    fn render(&self, fields: &FieldValues) -> Result<RenderedIssue, FilingError> {
        let title_field = &self.parameters.title_field;
        if fields.is_blank(title_field) {
            return Err(FilingError::MissingField(title_field.clone()));
        }

        Ok(RenderedIssue {
            title: fields.get(title_field).unwrap_or_default().trim().to_owned(),
            body: self.parameters.template.render(fields)?,
            issue_type: self.parameters.issue_type,
        })
    }

    fn tag(&self, mut view: ModalView) -> ModalView {
        view.private_metadata = self.parameters.id.as_str().to_owned();
        view
    }
}

async fn file_issue(
    services: &FilingServices,
    key: &SubmissionKey,
    issue: &RenderedIssue,
    correlation_id: &str,
) -> FilingOutcome {
    let result = match tokio::time::timeout(services.timeout, services.tracker.file(issue)).await {
        Ok(Ok(ticket)) => Ok(ticket),
        Ok(Err(tracker_error)) => Err(FilingError::from(tracker_error)),
        Err(_) => Err(FilingError::TimedOut(services.timeout)),
    };

    match result {
        Ok(ticket) => {
            services.ledger.record_filed(key, ticket.clone());
            info!(
                event_name = "filing.succeeded",
                correlation_id,
                flow_id = %key.flow_id,
                view_id = %key.view_id,
                ticket = %ticket,
                "issue filed"
            );
            FilingOutcome::Filed(ticket)
        }
        Err(failure) => {
            let reason = failure.user_message();
            services.ledger.record_failed(key, reason.clone());
            warn!(
                event_name = "filing.failed",
                correlation_id,
                flow_id = %key.flow_id,
                view_id = %key.view_id,
                title = %issue.title,
                error = %failure,
                "issue filing failed"
            );
            FilingOutcome::Failed(reason)
        }
    }
}

#[async_trait]
impl PartialHandler<InteractionCallback> for IssueFiler {
    fn name(&self) -> &str {
        "issue_filer"
    }

    async fn handle(&self, callback: &InteractionCallback, ctx: &HandlerContext) -> HandlerOutcome {
        if callback.interaction_type != InteractionType::ViewSubmission {
            return HandlerOutcome::Declined;
        }

        let receipt = match self.submit(callback, ctx).await {
            Ok(receipt) => receipt,
            Err(error) => return HandlerOutcome::failed(error),
        };
        match receipt.response.to_payload() {
            Ok(payload) => HandlerOutcome::respond(payload),
            Err(error) => HandlerOutcome::failed(error.into()),
        }
    }
}
