//! Flat knowledge-model entities and questionnaire replies as stored in the
//! document context.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The parts of a stored document context the resolver reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDocumentContext {
    /// Questionnaire with its replies.
    #[serde(default)]
    pub questionnaire: RawQuestionnaire,
    /// Knowledge model the questionnaire is filled against.
    #[serde(default)]
    pub knowledge_model: RawKnowledgeModel,
}

/// Questionnaire header and replies keyed by path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestionnaire {
    /// Questionnaire identity.
    #[serde(default)]
    pub uuid: Uuid,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current phase.
    #[serde(default)]
    pub phase_uuid: Option<Uuid>,
    /// Replies keyed by `chapterUuid.questionUuid[.itemUuid.questionUuid...]`.
    #[serde(default)]
    pub replies: BTreeMap<String, RawReply>,
}

/// A recorded reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReply {
    /// Reply payload.
    pub value: RawReplyValue,
    /// When the reply was given.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Reply payload per question kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RawReplyValue {
    /// Free value.
    #[serde(rename = "StringReply")]
    String {
        /// Entered text.
        value: String,
    },
    /// Selected answer.
    #[serde(rename = "AnswerReply")]
    Answer {
        /// Answer UUID.
        value: Uuid,
    },
    /// Selected choices.
    #[serde(rename = "MultiChoiceReply")]
    MultiChoice {
        /// Choice UUIDs.
        value: Vec<Uuid>,
    },
    /// Items of a list question.
    #[serde(rename = "ItemListReply")]
    ItemList {
        /// Item UUIDs.
        value: Vec<Uuid>,
    },
    /// Value picked from an integration or typed in.
    #[serde(rename = "IntegrationReply")]
    Integration {
        /// Integration payload.
        value: RawIntegrationValue,
    },
    /// Item picked from another list question.
    #[serde(rename = "ItemSelectReply")]
    ItemSelect {
        /// Item UUID.
        value: Uuid,
    },
    /// Reply type this worker does not render.
    #[serde(other)]
    Unknown,
}

/// Integration reply payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RawIntegrationValue {
    /// Typed in by the user.
    #[serde(rename = "PlainType")]
    Plain {
        /// Entered text.
        value: String,
    },
    /// Selected from the integration.
    #[serde(rename = "IntegrationType")]
    Integration {
        /// External identifier.
        #[serde(default)]
        id: Option<String>,
        /// Display value.
        value: String,
    },
    /// Unrecognized payload type.
    #[serde(other)]
    Unknown,
}

/// Knowledge model with top-level orderings and its flat entity maps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawKnowledgeModel {
    /// Knowledge model identity.
    #[serde(default)]
    pub uuid: Uuid,
    /// Chapters in display order.
    #[serde(default)]
    pub chapter_uuids: Vec<Uuid>,
    /// Tags in display order.
    #[serde(default)]
    pub tag_uuids: Vec<Uuid>,
    /// Integrations in display order.
    #[serde(default)]
    pub integration_uuids: Vec<Uuid>,
    /// Metrics in display order.
    #[serde(default)]
    pub metric_uuids: Vec<Uuid>,
    /// Phases in order of progression.
    #[serde(default)]
    pub phase_uuids: Vec<Uuid>,
    /// Entities keyed by UUID.
    #[serde(default)]
    pub entities: RawEntities,
}

/// UUID-keyed entity maps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEntities {
    /// Chapters.
    pub chapters: BTreeMap<Uuid, RawChapter>,
    /// Questions.
    pub questions: BTreeMap<Uuid, RawQuestion>,
    /// Answers of options questions.
    pub answers: BTreeMap<Uuid, RawAnswer>,
    /// Choices of multi-choice questions.
    pub choices: BTreeMap<Uuid, RawChoice>,
    /// References.
    pub references: BTreeMap<Uuid, RawReference>,
    /// Experts.
    pub experts: BTreeMap<Uuid, RawExpert>,
    /// Integrations.
    pub integrations: BTreeMap<Uuid, RawIntegration>,
    /// Tags.
    pub tags: BTreeMap<Uuid, RawTag>,
    /// Metrics.
    pub metrics: BTreeMap<Uuid, RawMetric>,
    /// Phases.
    pub phases: BTreeMap<Uuid, RawPhase>,
}

impl RawEntities {
    /// Drop questions and references of unknown type, returning how many went.
    ///
    /// Links to them then resolve like links to missing entities.
    pub fn retain_known(&mut self) -> usize {
        let before = self.questions.len() + self.references.len();
        self.questions
            .retain(|_, question| !matches!(question.kind, RawQuestionKind::Unknown));
        self.references
            .retain(|_, reference| !matches!(reference, RawReference::Unknown));
        before - self.questions.len() - self.references.len()
    }
}

/// Chapter entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChapter {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Introductory text.
    #[serde(default)]
    pub text: Option<String>,
    /// Top-level questions in order.
    #[serde(default)]
    pub question_uuids: Vec<Uuid>,
}

/// Question entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestion {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Help text.
    #[serde(default)]
    pub text: Option<String>,
    /// Phase from which the question must be answered.
    #[serde(default)]
    pub required_phase_uuid: Option<Uuid>,
    /// Tags.
    #[serde(default)]
    pub tag_uuids: Vec<Uuid>,
    /// References.
    #[serde(default)]
    pub reference_uuids: Vec<Uuid>,
    /// Experts.
    #[serde(default)]
    pub expert_uuids: Vec<Uuid>,
    /// Variant-specific fields.
    #[serde(flatten)]
    pub kind: RawQuestionKind,
}

/// Question variants, tagged by `questionType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "questionType", rename_all_fields = "camelCase")]
pub enum RawQuestionKind {
    /// Free value of a given type.
    #[serde(rename = "ValueQuestion")]
    Value {
        /// Value type, e.g. `StringQuestionValueType`.
        #[serde(default)]
        value_type: String,
    },
    /// Single answer with follow-up questions.
    #[serde(rename = "OptionsQuestion")]
    Options {
        /// Answers in order.
        #[serde(default)]
        answer_uuids: Vec<Uuid>,
    },
    /// Several choices.
    #[serde(rename = "MultiChoiceQuestion")]
    MultiChoice {
        /// Choices in order.
        #[serde(default)]
        choice_uuids: Vec<Uuid>,
    },
    /// Repeated item of template questions.
    #[serde(rename = "ListQuestion")]
    List {
        /// Questions asked for every item.
        #[serde(default)]
        item_template_question_uuids: Vec<Uuid>,
    },
    /// Value looked up in an integration.
    #[serde(rename = "IntegrationQuestion")]
    Integration {
        /// Integration used.
        integration_uuid: Uuid,
        /// Integration properties.
        #[serde(default)]
        props: BTreeMap<String, String>,
    },
    /// Item picked from a list question.
    #[serde(rename = "ItemSelectQuestion")]
    ItemSelect {
        /// List question providing the items.
        #[serde(default)]
        list_question_uuid: Option<Uuid>,
    },
    /// Question type this worker does not render.
    #[serde(other)]
    Unknown,
}

/// Answer entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnswer {
    /// Identity.
    pub uuid: Uuid,
    /// Label.
    pub label: String,
    /// Advice shown when selected.
    #[serde(default)]
    pub advice: Option<String>,
    /// Questions asked when selected.
    #[serde(default)]
    pub follow_up_uuids: Vec<Uuid>,
    /// Metric contributions.
    #[serde(default)]
    pub metric_measures: Vec<RawMetricMeasure>,
}

/// Contribution of an answer to a metric.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetricMeasure {
    /// Metric.
    pub metric_uuid: Uuid,
    /// Measure in `0.0..=1.0`.
    pub measure: f64,
    /// Weight in `0.0..=1.0`.
    pub weight: f64,
}

/// Choice entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChoice {
    /// Identity.
    pub uuid: Uuid,
    /// Label.
    pub label: String,
}

/// Reference variants, tagged by `referenceType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "referenceType", rename_all_fields = "camelCase")]
pub enum RawReference {
    /// Link to an external resource.
    #[serde(rename = "URLReference")]
    Url {
        /// Identity.
        uuid: Uuid,
        /// Target URL.
        url: String,
        /// Link text.
        #[serde(default)]
        label: String,
    },
    /// Link to a resource page.
    #[serde(rename = "ResourcePageReference")]
    ResourcePage {
        /// Identity.
        uuid: Uuid,
        /// Resource page.
        #[serde(default)]
        resource_page_uuid: Option<Uuid>,
    },
    /// Link to another entity of the model.
    #[serde(rename = "CrossReference")]
    Cross {
        /// Identity.
        uuid: Uuid,
        /// Target entity.
        target_uuid: Uuid,
        /// Description.
        #[serde(default)]
        description: String,
    },
    /// Reference type this worker does not render.
    #[serde(other)]
    Unknown,
}

impl RawReference {
    /// Identity of the reference, if its type is known.
    #[must_use]
    pub const fn uuid(&self) -> Option<Uuid> {
        match self {
            Self::Url { uuid, .. } | Self::ResourcePage { uuid, .. } | Self::Cross { uuid, .. } => Some(*uuid),
            Self::Unknown => None,
        }
    }
}

/// Expert entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExpert {
    /// Identity.
    pub uuid: Uuid,
    /// Name.
    pub name: String,
    /// Contact.
    #[serde(default)]
    pub email: String,
}

/// Integration entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIntegration {
    /// Identity.
    pub uuid: Uuid,
    /// Short identifier.
    #[serde(default)]
    pub id: String,
    /// Display name.
    pub name: String,
    /// URL template of a selected item.
    #[serde(default)]
    pub item_url: Option<String>,
}

/// Tag entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTag {
    /// Identity.
    pub uuid: Uuid,
    /// Name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Display color.
    #[serde(default)]
    pub color: String,
}

/// Metric entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetric {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Abbreviation.
    #[serde(default)]
    pub abbreviation: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Phase entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPhase {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}
