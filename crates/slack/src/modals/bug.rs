//! The "File a Bug" form.

use std::sync::Arc;

use jirabot_core::{FieldValues, IssueTemplate, IssueType, TemplateError};

use super::filer::{FilingServices, IssueFiler, IssueFlowParameters};
use super::{Flow, FlowId};
use crate::blocks::{InputElement, ModalBuilder, ModalView, ViewSubmissionResponse};
use crate::handler::{HandlerChain, HandlerContext, HandlerFn, HandlerOutcome, PartialHandler};
use crate::interactions::{InteractionCallback, InteractionType};

pub const IDENTIFIER: &str = "bug";
/// Name of the global shortcut whose callback id is [`IDENTIFIER`].
pub const SHORTCUT_NAME: &str = "File a Bug";

pub const BLOCK_TITLE: &str = "title";
pub const BLOCK_CATEGORY: &str = "category";
pub const BLOCK_CATEGORY_QUALIFIER: &str = "category_free_text_optional";
pub const BLOCK_SYMPTOM: &str = "symptom";
pub const BLOCK_EXPECTED: &str = "expected";

/// Flattened key of the category select.
pub const FIELD_CATEGORY: &str = "category_static_select";

pub const COMPONENT_ASSISTED_INSTALLER: &str = "Assisted Installer";
pub const COMPONENT_MGMT_UI: &str = "MGMT UI";
pub const COMPONENT_SNO: &str = "SNO";
pub const COMPONENT_OTHER: &str = "Other";

pub const QUALIFIER_REQUIRED: &str = "Provide a description of the other component.";

const TEMPLATE: &str = r#"h3. Symptomatic Behavior
{{ symptom }}

h3. Expected Behavior
{{ expected }}

h3. Category
{% if category_static_select == "Other" %}Other: {{ category_free_text_optional }}{% else %}{{ category_static_select }}{% endif %}"#;

pub fn view() -> ModalView {
    ModalBuilder::new("File a Bug")
        .submit("Submit")
        .close("Cancel")
        .private_metadata(IDENTIFIER)
        .section(|section| {
            section.plain("Use this form to report a bug in the test platform or infrastructure.");
        })
        .input(BLOCK_TITLE, |input| {
            input.label("Provide a title for this bug:").element(InputElement::plain_text("title_input"));
        })
        .input(BLOCK_CATEGORY, |input| {
            input.label("What component is affected?").element(InputElement::static_select(
                "category_select",
                "Select a category...",
                [COMPONENT_ASSISTED_INSTALLER, COMPONENT_MGMT_UI, COMPONENT_SNO, COMPONENT_OTHER],
            ));
        })
        .input(BLOCK_CATEGORY_QUALIFIER, |input| {
            input
                .label("If other, what best describes the bugged component?")
                .element(InputElement::plain_text("category_qualifier_input"))
                .optional();
        })
        .divider()
        .input(BLOCK_SYMPTOM, |input| {
            input
                .label("What incorrect behavior did you notice?")
                .element(InputElement::multiline_text("symptom_input"));
        })
        .input(BLOCK_EXPECTED, |input| {
            input
                .label("What behavior did you expect instead?")
                .element(InputElement::multiline_text("expected_input"));
        })
        .build()
}

/// The qualifier is required only when the category is "Other".
pub fn validate(fields: &FieldValues) -> Option<ViewSubmissionResponse> {
    let other_selected = fields.get(FIELD_CATEGORY) == Some(COMPONENT_OTHER);
    if other_selected && fields.is_blank(BLOCK_CATEGORY_QUALIFIER) {
        return Some(ViewSubmissionResponse::errors([(BLOCK_CATEGORY_QUALIFIER, QUALIFIER_REQUIRED)]));
    }
    None
}

fn validate_submission(callback: &InteractionCallback, _ctx: &HandlerContext) -> HandlerOutcome {
    match validate(&callback.field_values()) {
        None => HandlerOutcome::Declined,
        Some(response) => match response.to_payload() {
            Ok(payload) => HandlerOutcome::respond(payload),
            Err(error) => HandlerOutcome::failed(error.into()),
        },
    }
}

pub fn issue_parameters() -> Result<IssueFlowParameters, TemplateError> {
    Ok(IssueFlowParameters {
        id: FlowId::new(IDENTIFIER),
        issue_type: IssueType::Bug,
        template: IssueTemplate::parse(IDENTIFIER, TEMPLATE)?,
        title_field: BLOCK_TITLE.to_owned(),
        fields: [BLOCK_TITLE, FIELD_CATEGORY, BLOCK_CATEGORY_QUALIFIER, BLOCK_SYMPTOM, BLOCK_EXPECTED]
            .into_iter()
            .map(str::to_owned)
            .collect(),
    })
}

/// Builds the bug flow: validation first, then filing.
pub fn register(services: FilingServices) -> Result<Flow, TemplateError> {
    let submission = HandlerChain::new(vec![
        Arc::new(HandlerFn::new(format!("{IDENTIFIER}.validate"), validate_submission))
            as Arc<dyn PartialHandler<InteractionCallback>>,
        Arc::new(IssueFiler::new(issue_parameters()?, services)) as Arc<dyn PartialHandler<InteractionCallback>>,
    ]);

    Ok(Flow::for_view(IDENTIFIER, view()).with_follow_up(InteractionType::ViewSubmission, submission))
}

#[cfg(test)]
mod tests {
    use jirabot_core::FieldValues;
    use serde_json::json;

    use super::{issue_parameters, validate, view, BLOCK_CATEGORY_QUALIFIER, QUALIFIER_REQUIRED};

    fn fields(category: &str, qualifier: &str) -> FieldValues {
        FieldValues::from_iter([
            ("title", "Installer stalls"),
            ("category_static_select", category),
            ("category_free_text_optional", qualifier),
            ("symptom", "stuck at 44%"),
            ("expected", "install finishes"),
        ])
    }

    #[test]
    fn other_without_qualifier_is_rejected() {
        let response = validate(&fields("Other", "")).expect("invalid");

        assert_eq!(
            response.to_payload().expect("payload"),
            json!({"response_action": "errors", "errors": {"category_free_text_optional": QUALIFIER_REQUIRED}})
        );
    }

    #[test]
    fn whitespace_qualifier_counts_as_empty() {
        assert!(validate(&fields("Other", "   ")).is_some());
    }

    #[test]
    fn other_with_qualifier_and_named_components_pass() {
        assert!(validate(&fields("Other", "Console plugin")).is_none());
        assert!(validate(&fields("SNO", "")).is_none());
        assert!(validate(&fields("MGMT UI", "")).is_none());
    }

    #[test]
    fn template_renders_category_branches() {
        let parameters = issue_parameters().expect("template parses");

        let other = parameters.template.render(&fields("Other", "Console plugin")).expect("render");
        let sno = parameters.template.render(&fields("SNO", "")).expect("render");

        assert!(other.ends_with("h3. Category\nOther: Console plugin"));
        assert!(sno.contains("h3. Symptomatic Behavior\nstuck at 44%\n\nh3. Expected Behavior\ninstall finishes"));
        assert!(sno.ends_with("h3. Category\nSNO"));
    }

    #[test]
    fn view_declares_every_block_and_routes_back_to_the_flow() {
        let rendered = serde_json::to_value(view()).expect("json");

        assert_eq!(rendered["private_metadata"], "bug");
        let block_ids = rendered["blocks"]
            .as_array()
            .expect("blocks")
            .iter()
            .filter_map(|block| block["block_id"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(block_ids, vec!["title", "category", BLOCK_CATEGORY_QUALIFIER, "symptom", "expected"]);
        assert_eq!(rendered["blocks"][3]["optional"], true);
        assert_eq!(rendered["blocks"][2]["element"]["type"], "static_select");
    }
}
