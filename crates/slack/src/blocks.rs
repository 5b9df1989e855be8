use std::collections::BTreeMap;

use jirabot_core::TicketReference;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionObject {
    pub text: TextObject,
    pub value: String,
}

impl OptionObject {
    /// An option whose label and value are the same string.
    pub fn labelled(value: impl Into<String>) -> Self {
        let value = value.into();
        Self { text: TextObject::plain(value.clone()), value }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputElement {
    PlainTextInput {
        action_id: String,
        #[serde(skip_serializing_if = "is_false")]
        multiline: bool,
    },
    StaticSelect {
        action_id: String,
        placeholder: TextObject,
        options: Vec<OptionObject>,
    },
}

impl InputElement {
    pub fn plain_text(action_id: impl Into<String>) -> Self {
        Self::PlainTextInput { action_id: action_id.into(), multiline: false }
    }

    pub fn multiline_text(action_id: impl Into<String>) -> Self {
        Self::PlainTextInput { action_id: action_id.into(), multiline: true }
    }

    pub fn static_select<I, S>(action_id: impl Into<String>, placeholder: &str, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StaticSelect {
            action_id: action_id.into(),
            placeholder: TextObject::plain(placeholder),
            options: options.into_iter().map(OptionObject::labelled).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        text: TextObject,
    },
    Divider,
    Input {
        block_id: String,
        label: TextObject,
        element: InputElement,
        #[serde(skip_serializing_if = "is_false")]
        optional: bool,
    },
    Context {
        elements: Vec<TextObject>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewType {
    #[default]
    Modal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModalView {
    #[serde(rename = "type")]
    pub view_type: ViewType,
    pub title: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit: Option<TextObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<TextObject>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_metadata: String,
    pub blocks: Vec<Block>,
}

pub struct ModalBuilder {
    title: String,
    submit: Option<String>,
    close: Option<String>,
    private_metadata: String,
    blocks: Vec<Block>,
}

impl ModalBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            submit: None,
            close: None,
            private_metadata: String::new(),
            blocks: Vec::new(),
        }
    }

    pub fn submit(mut self, label: impl Into<String>) -> Self {
        self.submit = Some(label.into());
        self
    }

    pub fn close(mut self, label: impl Into<String>) -> Self {
        self.close = Some(label.into());
        self
    }

    pub fn private_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.private_metadata = metadata.into();
        self
    }

    pub fn section<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(builder.build());
        self
    }

    pub fn divider(mut self) -> Self {
        self.blocks.push(Block::Divider);
        self
    }

    pub fn input<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut InputBuilder),
    {
        let block_id = block_id.into();
        let mut builder = InputBuilder::default();
        build(&mut builder);
        self.blocks.push(builder.build(block_id));
        self
    }

    pub fn context(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Context { elements: vec![TextObject::mrkdwn(text)] });
        self
    }

    pub fn build(self) -> ModalView {
        ModalView {
            view_type: ViewType::Modal,
            title: TextObject::plain(self.title),
            submit: self.submit.map(TextObject::plain),
            close: self.close.map(TextObject::plain),
            private_metadata: self.private_metadata,
            blocks: self.blocks,
        }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    block_id: Option<String>,
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn block_id(&mut self, block_id: impl Into<String>) -> &mut Self {
        self.block_id = Some(block_id.into());
        self
    }

    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Block {
        Block::Section {
            block_id: self.block_id,
            text: self.text.unwrap_or_else(|| TextObject::plain("")),
        }
    }
}

#[derive(Default)]
pub struct InputBuilder {
    label: String,
    element: Option<InputElement>,
    optional: bool,
}

impl InputBuilder {
    pub fn label(&mut self, label: impl Into<String>) -> &mut Self {
        self.label = label.into();
        self
    }

    pub fn element(&mut self, element: InputElement) -> &mut Self {
        self.element = Some(element);
        self
    }

    pub fn optional(&mut self) -> &mut Self {
        self.optional = true;
        self
    }

    fn build(self, block_id: String) -> Block {
        let element = self.element.unwrap_or_else(|| InputElement::plain_text(block_id.clone()));
        Block::Input { block_id, label: TextObject::plain(self.label), element, optional: self.optional }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Errors,
    Update,
}

/// Body of the acknowledgement sent for a `view_submission`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewSubmissionResponse {
    pub response_action: ResponseAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<ModalView>,
}

impl ViewSubmissionResponse {
    pub fn errors<I, K, V>(errors: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            response_action: ResponseAction::Errors,
            errors: Some(errors.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            view: None,
        }
    }

    pub fn update(view: ModalView) -> Self {
        Self { response_action: ResponseAction::Update, errors: None, view: Some(view) }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

pub fn pending_view() -> ModalView {
    ModalBuilder::new("Filing Issue")
        .close("Close")
        .section(|section| {
            section.mrkdwn(
                ":hourglass_flowing_sand: A Jira issue is being filed. This window will update once it is created.",
            );
        })
        .build()
}

pub fn filed_view(ticket: &TicketReference) -> ModalView {
    let link = match &ticket.url {
        Some(url) => format!("<{url}|{key}>", key = ticket.key),
        None => format!("`{}`", ticket.key),
    };

    ModalBuilder::new("Issue Filed")
        .close("Close")
        .section(|section| {
            section.block_id("filing.result").mrkdwn(format!(":white_check_mark: Filed {link}."));
        })
        .context("Follow up on the issue in Jira; replies to this window are not monitored.")
        .build()
}

pub fn failure_view(reason: &str) -> ModalView {
    ModalBuilder::new("Filing Failed")
        .close("Close")
        .section(|section| {
            section.block_id("filing.result").mrkdwn(format!(":warning: {reason}"));
        })
        .context("Nothing was filed automatically. You can submit the form again.")
        .build()
}

fn is_false(value: &bool) -> bool {
    !*value
}
