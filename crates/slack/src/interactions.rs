//! Interaction callback payloads.
//!
//! Slack posts shortcuts, view submissions and view closures as loosely typed
//! JSON. The router decodes them into [`InteractionCallback`] as soon as the
//! envelope kind is known; nothing past that point sees the raw form.

use std::collections::HashMap;

use jirabot_core::{FieldValues, SubmissionKey};
use serde::Deserialize;
use serde_json::Value;

use crate::handler::HandlerError;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Shortcut,
    ViewSubmission,
    ViewClosed,
    BlockActions,
    #[serde(other)]
    Unsupported,
}

impl InteractionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shortcut => "shortcut",
            Self::ViewSubmission => "view_submission",
            Self::ViewClosed => "view_closed",
            Self::BlockActions => "block_actions",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SelectedOption {
    pub value: String,
}

/// A single element's state inside a submitted view.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ActionValue {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub selected_option: Option<SelectedOption>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ViewState {
    #[serde(default)]
    pub values: HashMap<String, HashMap<String, ActionValue>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ViewPayload {
    pub id: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub private_metadata: String,
    #[serde(default)]
    pub state: ViewState,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct InteractionCallback {
    #[serde(rename = "type")]
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub callback_id: Option<String>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    pub user: UserRef,
    #[serde(default)]
    pub view: Option<ViewPayload>,
}

impl InteractionCallback {
    pub fn decode(payload: Value) -> Result<Self, HandlerError> {
        serde_json::from_value(payload).map_err(|error| HandlerError::Decode {
            kind: "interactive",
            message: error.to_string(),
        })
    }

    /// Shortcuts name their flow through `callback_id`; everything that
    /// happens on an open view carries it in the view's private metadata.
    pub fn flow_identifier(&self) -> Option<&str> {
        let identifier = match self.interaction_type {
            InteractionType::Shortcut => self.callback_id.as_deref(),
            _ => self.view.as_ref().map(|view| view.private_metadata.as_str()),
        };
        identifier.filter(|identifier| !identifier.is_empty())
    }

    /// Flattens the view state into form values.
    ///
    /// Text inputs are keyed by block id. Selection widgets are keyed by
    /// `{block_id}_{element_type}` and carry the selected option's value.
    pub fn field_values(&self) -> FieldValues {
        let Some(view) = &self.view else {
            return FieldValues::new();
        };

        let mut fields = FieldValues::new();
        for (block_id, actions) in &view.state.values {
            for action in actions.values() {
                match &action.selected_option {
                    Some(option) => {
                        fields.insert(format!("{block_id}_{}", action.element_type), option.value.clone());
                    }
                    None if action.element_type.ends_with("select") => {
                        fields.insert(format!("{block_id}_{}", action.element_type), "");
                    }
                    None => {
                        fields.insert(block_id.clone(), action.value.clone().unwrap_or_default());
                    }
                }
            }
        }
        fields
    }

    pub fn submission_key(&self) -> Result<SubmissionKey, HandlerError> {
        let view = self.view.as_ref().ok_or(HandlerError::MissingView)?;
        Ok(SubmissionKey::new(view.private_metadata.clone(), self.user.id.clone(), view.id.clone()))
    }
}
