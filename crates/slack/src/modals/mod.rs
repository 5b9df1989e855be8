//! Modal flows.
//!
//! A [`Flow`] pairs the view a shortcut opens with follow-up chains keyed by
//! interaction type. The [`FlowRegistry`] is filled once during bootstrap and
//! only read afterwards; the [`InteractionRouter`] resolves every callback
//! through it.

pub mod bug;
pub mod filer;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::blocks::ModalView;
use crate::handler::{HandlerChain, HandlerContext, HandlerError, HandlerOutcome, PartialHandler};
use crate::interactions::{InteractionCallback, InteractionType};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replaces the content of a view that is already open.
#[async_trait]
pub trait ViewUpdater: Send + Sync {
    async fn update_view(&self, view_id: &str, view: &ModalView) -> Result<(), HandlerError>;
}

/// Opens a new view in response to a trigger.
#[async_trait]
pub trait ViewPresenter: Send + Sync {
    async fn open_view(&self, trigger_id: &str, view: &ModalView) -> Result<(), HandlerError>;
}

pub struct Flow {
    id: FlowId,
    initial_view: ModalView,
    follow_ups: HashMap<InteractionType, HandlerChain<InteractionCallback>>,
}

impl Flow {
    /// The view's private metadata is set to the flow id so later callbacks
    /// from the same view route back here.
    pub fn for_view(id: impl Into<String>, mut initial_view: ModalView) -> Self {
        let id = FlowId::new(id);
        initial_view.private_metadata = id.as_str().to_owned();
        Self { id, initial_view, follow_ups: HashMap::new() }
    }

    pub fn with_follow_up(
        mut self,
        interaction_type: InteractionType,
        chain: HandlerChain<InteractionCallback>,
    ) -> Self {
        self.follow_ups.insert(interaction_type, chain);
        self
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn initial_view(&self) -> &ModalView {
        &self.initial_view
    }

    pub fn follow_up(&self, interaction_type: InteractionType) -> Option<&HandlerChain<InteractionCallback>> {
        self.follow_ups.get(&interaction_type)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("flow `{0}` is already registered")]
    DuplicateFlow(FlowId),
}

#[derive(Default)]
pub struct FlowRegistry {
    flows: HashMap<FlowId, Flow>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, flow: Flow) -> Result<(), RegistryError> {
        if self.flows.contains_key(flow.id()) {
            return Err(RegistryError::DuplicateFlow(flow.id().clone()));
        }
        self.flows.insert(flow.id().clone(), flow);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Flow> {
        self.flows.get(&FlowId::new(id))
    }

    pub fn render_initial(&self, id: &str) -> Option<&ModalView> {
        self.get(id).map(Flow::initial_view)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn ids(&self) -> Vec<FlowId> {
        let mut ids = self.flows.keys().cloned().collect::<Vec<_>>();
        ids.sort_by(|left, right| left.as_str().cmp(right.as_str()));
        ids
    }
}

pub struct InteractionRouter {
    registry: Arc<FlowRegistry>,
    presenter: Arc<dyn ViewPresenter>,
}

impl InteractionRouter {
    pub fn new(registry: Arc<FlowRegistry>, presenter: Arc<dyn ViewPresenter>) -> Self {
        Self { registry, presenter }
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    async fn open_initial_view(&self, flow: &Flow, callback: &InteractionCallback) -> HandlerOutcome {
        let Some(trigger_id) = callback.trigger_id.as_deref() else {
            return HandlerOutcome::failed(HandlerError::Decode {
                kind: "shortcut",
                message: "missing trigger_id".to_owned(),
            });
        };

        match self.presenter.open_view(trigger_id, flow.initial_view()).await {
            Ok(()) => HandlerOutcome::handled(),
            Err(error) => HandlerOutcome::failed(error),
        }
    }
}

#[async_trait]
impl PartialHandler<InteractionCallback> for InteractionRouter {
    fn name(&self) -> &str {
        "interaction_router"
    }

    async fn handle(&self, callback: &InteractionCallback, ctx: &HandlerContext) -> HandlerOutcome {
        let identifier = callback.flow_identifier().unwrap_or_default();
        let Some(flow) = self.registry.get(identifier) else {
            warn!(
                event_name = "flow.routing_miss",
                correlation_id = %ctx.correlation_id,
                flow_id = identifier,
                interaction_type = callback.interaction_type.as_str(),
                user_id = %callback.user.id,
                "interaction references an unregistered flow"
            );
            return HandlerOutcome::failed(HandlerError::RoutingMiss(identifier.to_owned()));
        };

        if callback.interaction_type == InteractionType::Shortcut {
            return self.open_initial_view(flow, callback).await;
        }

        match flow.follow_up(callback.interaction_type) {
            Some(chain) => chain.handle(callback, ctx).await,
            None => HandlerOutcome::Declined,
        }
    }
}
