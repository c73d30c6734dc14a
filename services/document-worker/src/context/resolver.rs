//! Link resolution of flat knowledge-model entities into an arena.
//!
//! Entities live in one vector per kind and refer to each other by index.
//! Every UUID is looked up exactly once while building the arena; UUIDs that
//! do not resolve to an entity of the expected kind are dropped.

use super::entities::{
    RawDocumentContext, RawEntities, RawIntegrationValue, RawQuestionKind, RawReference, RawReplyValue,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Kind of an arena entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// [`Chapter`]
    Chapter,
    /// [`Question`]
    Question,
    /// [`Answer`]
    Answer,
    /// [`Choice`]
    Choice,
    /// [`Reference`]
    Reference,
    /// [`Expert`]
    Expert,
    /// [`Integration`]
    Integration,
    /// [`Tag`]
    Tag,
    /// [`Metric`]
    Metric,
    /// [`Phase`]
    Phase,
}

/// Typed index into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    /// Entity kind.
    pub kind: EntityKind,
    /// Position in the vector of that kind.
    pub index: usize,
}

impl EntityRef {
    /// Reference to an entity.
    #[must_use]
    pub const fn new(kind: EntityKind, index: usize) -> Self {
        Self { kind, index }
    }
}

/// Chapter with its top-level questions.
#[derive(Debug, Clone)]
pub struct Chapter {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Introductory text.
    pub text: Option<String>,
    /// Top-level questions.
    pub questions: Vec<usize>,
}

/// Question variant with resolved links.
#[derive(Debug, Clone)]
pub enum QuestionKind {
    /// Free value.
    Value {
        /// Value type.
        value_type: String,
    },
    /// Single answer.
    Options {
        /// Answers.
        answers: Vec<usize>,
    },
    /// Several choices.
    MultiChoice {
        /// Choices.
        choices: Vec<usize>,
    },
    /// Repeated items.
    List {
        /// Questions asked per item.
        item_template_questions: Vec<usize>,
    },
    /// Integration lookup.
    Integration {
        /// Integration, if it resolved.
        integration: Option<usize>,
        /// Integration properties.
        props: BTreeMap<String, String>,
    },
    /// Item of another list question.
    ItemSelect {
        /// List question, if it resolved.
        list_question: Option<usize>,
    },
}

impl QuestionKind {
    /// Variant name as exposed to templates.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Value { .. } => "ValueQuestion",
            Self::Options { .. } => "OptionsQuestion",
            Self::MultiChoice { .. } => "MultiChoiceQuestion",
            Self::List { .. } => "ListQuestion",
            Self::Integration { .. } => "IntegrationQuestion",
            Self::ItemSelect { .. } => "ItemSelectQuestion",
        }
    }
}

/// Question with resolved links and attached replies.
#[derive(Debug, Clone)]
pub struct Question {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Help text.
    pub text: Option<String>,
    /// Variant.
    pub kind: QuestionKind,
    /// Phase from which the question is required.
    pub required_phase: Option<usize>,
    /// Whether the questionnaire's current phase requires an answer.
    pub required: bool,
    /// Tags.
    pub tags: Vec<usize>,
    /// References.
    pub references: Vec<usize>,
    /// Experts.
    pub experts: Vec<usize>,
    /// Replies keyed by their full path.
    pub replies: BTreeMap<String, Reply>,
    /// Chapter the question belongs to, if reachable from one.
    pub chapter: Option<usize>,
    /// Question whose answer or item template contains this one.
    pub parent: Option<usize>,
}

/// Answer of an options question.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Identity.
    pub uuid: Uuid,
    /// Label.
    pub label: String,
    /// Advice.
    pub advice: Option<String>,
    /// Follow-up questions.
    pub follow_ups: Vec<usize>,
    /// Metric contributions.
    pub metric_measures: Vec<MetricMeasure>,
}

/// Contribution of an answer to a metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricMeasure {
    /// Metric.
    pub metric: usize,
    /// Measure.
    pub measure: f64,
    /// Weight.
    pub weight: f64,
}

/// Choice of a multi-choice question.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Identity.
    pub uuid: Uuid,
    /// Label.
    pub label: String,
}

/// Reference variant.
#[derive(Debug, Clone)]
pub enum ReferenceKind {
    /// External link.
    Url {
        /// Target URL.
        url: String,
        /// Link text.
        label: String,
    },
    /// Resource page.
    ResourcePage {
        /// Page identity.
        resource_page_uuid: Option<Uuid>,
    },
    /// Another entity of the model.
    Cross {
        /// Target, if it resolved.
        target: Option<EntityRef>,
        /// Description.
        description: String,
    },
}

/// Reference attached to questions.
#[derive(Debug, Clone)]
pub struct Reference {
    /// Identity.
    pub uuid: Uuid,
    /// Variant.
    pub kind: ReferenceKind,
}

/// Expert attached to questions.
#[derive(Debug, Clone)]
pub struct Expert {
    /// Identity.
    pub uuid: Uuid,
    /// Name.
    pub name: String,
    /// Contact.
    pub email: String,
}

/// Integration used by integration questions.
#[derive(Debug, Clone)]
pub struct Integration {
    /// Identity.
    pub uuid: Uuid,
    /// Short identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// URL template of a selected item.
    pub item_url: Option<String>,
}

/// Tag.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Identity.
    pub uuid: Uuid,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Display color.
    pub color: String,
}

/// Metric.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Abbreviation.
    pub abbreviation: Option<String>,
    /// Description.
    pub description: Option<String>,
}

/// Phase.
#[derive(Debug, Clone)]
pub struct Phase {
    /// Identity.
    pub uuid: Uuid,
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
}

/// Reply payload with resolved links.
#[derive(Debug, Clone)]
pub enum ReplyValue {
    /// Free value.
    String(String),
    /// Selected answer; `None` if the answer no longer exists.
    Answer(Option<usize>),
    /// Selected choices that still exist.
    MultiChoice(Vec<usize>),
    /// Item UUIDs.
    ItemList(Vec<Uuid>),
    /// Integration value.
    Integration {
        /// External identifier, absent for typed-in values.
        id: Option<String>,
        /// Display value.
        value: String,
    },
    /// Selected item UUID.
    ItemSelect(Uuid),
}

impl ReplyValue {
    /// Variant name as exposed to templates.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::String(_) => "StringReply",
            Self::Answer(_) => "AnswerReply",
            Self::MultiChoice(_) => "MultiChoiceReply",
            Self::ItemList(_) => "ItemListReply",
            Self::Integration { .. } => "IntegrationReply",
            Self::ItemSelect(_) => "ItemSelectReply",
        }
    }
}

/// A reply attached to the question it answers.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Full reply path.
    pub path: String,
    /// Payload.
    pub value: ReplyValue,
    /// When the reply was given.
    pub created_at: Option<DateTime<Utc>>,
}

/// Questionnaire header.
#[derive(Debug, Clone, Default)]
pub struct QuestionnaireInfo {
    /// Identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
}

/// The resolved rendering graph.
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    /// Questionnaire header.
    pub questionnaire: QuestionnaireInfo,
    /// Knowledge model identity.
    pub knowledge_model_uuid: Uuid,
    /// Chapters.
    pub chapters: Vec<Chapter>,
    /// Questions.
    pub questions: Vec<Question>,
    /// Answers.
    pub answers: Vec<Answer>,
    /// Choices.
    pub choices: Vec<Choice>,
    /// References.
    pub references: Vec<Reference>,
    /// Experts.
    pub experts: Vec<Expert>,
    /// Integrations.
    pub integrations: Vec<Integration>,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Metrics.
    pub metrics: Vec<Metric>,
    /// Phases.
    pub phases: Vec<Phase>,
    /// Chapters in display order.
    pub chapter_order: Vec<usize>,
    /// Tags in display order.
    pub tag_order: Vec<usize>,
    /// Integrations in display order.
    pub integration_order: Vec<usize>,
    /// Metrics in display order.
    pub metric_order: Vec<usize>,
    /// Phases in order of progression.
    pub phase_order: Vec<usize>,
    /// Current phase of the questionnaire.
    pub current_phase: Option<usize>,
    index: HashMap<Uuid, EntityRef>,
}

impl DocumentContext {
    /// Resolve the knowledge model and replies of a stored document context.
    ///
    /// # Errors
    ///
    /// Returns error if the context does not have the expected shape.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw = RawDocumentContext::deserialize(value)?;
        Ok(Self::resolve(raw))
    }

    /// Resolve a parsed context.
    #[must_use]
    pub fn resolve(raw: RawDocumentContext) -> Self {
        let RawDocumentContext {
            questionnaire,
            knowledge_model: mut km,
        } = raw;
        let unknown_entities = km.entities.retain_known();
        let mut unknown_replies = 0;
        let mut linker = Linker::new(&km.entities);
        let mut ctx = Self {
            knowledge_model_uuid: km.uuid,
            questionnaire: QuestionnaireInfo {
                uuid: questionnaire.uuid,
                name: questionnaire.name,
            },
            ..Self::default()
        };

        ctx.build_entities(&mut linker, km.entities);
        ctx.chapter_order = linker.many(&km.chapter_uuids, EntityKind::Chapter);
        ctx.tag_order = linker.many(&km.tag_uuids, EntityKind::Tag);
        ctx.integration_order = linker.many(&km.integration_uuids, EntityKind::Integration);
        ctx.metric_order = linker.many(&km.metric_uuids, EntityKind::Metric);
        ctx.phase_order = linker.many(&km.phase_uuids, EntityKind::Phase);
        ctx.current_phase = questionnaire
            .phase_uuid
            .and_then(|uuid| linker.one(uuid, EntityKind::Phase));

        ctx.assign_tree();
        ctx.compute_required();

        for (path, reply) in questionnaire.replies {
            let target = path
                .rsplit('.')
                .next()
                .and_then(|segment| segment.parse::<Uuid>().ok())
                .and_then(|uuid| linker.one(uuid, EntityKind::Question));
            let Some(question) = target else {
                linker.dropped += 1;
                continue;
            };
            let value = match reply.value {
                RawReplyValue::String { value } => ReplyValue::String(value),
                RawReplyValue::Answer { value } => ReplyValue::Answer(linker.one(value, EntityKind::Answer)),
                RawReplyValue::MultiChoice { value } => {
                    ReplyValue::MultiChoice(linker.many(&value, EntityKind::Choice))
                }
                RawReplyValue::ItemList { value } => ReplyValue::ItemList(value),
                RawReplyValue::Integration {
                    value: RawIntegrationValue::Plain { value },
                } => ReplyValue::Integration { id: None, value },
                RawReplyValue::Integration {
                    value: RawIntegrationValue::Integration { id, value },
                } => ReplyValue::Integration { id, value },
                RawReplyValue::ItemSelect { value } => ReplyValue::ItemSelect(value),
                RawReplyValue::Unknown
                | RawReplyValue::Integration {
                    value: RawIntegrationValue::Unknown,
                } => {
                    unknown_replies += 1;
                    continue;
                }
            };
            ctx.questions[question].replies.insert(
                path.clone(),
                Reply {
                    path,
                    value,
                    created_at: reply.created_at,
                },
            );
        }

        debug!(
            questions = ctx.questions.len(),
            dropped_references = linker.dropped,
            unknown_entities,
            unknown_replies,
            "Document context resolved"
        );
        ctx.index = linker.index;
        ctx
    }

    fn build_entities(&mut self, linker: &mut Linker, entities: RawEntities) {
        self.chapters = entities
            .chapters
            .into_values()
            .map(|raw| Chapter {
                uuid: raw.uuid,
                title: raw.title,
                text: raw.text,
                questions: linker.many(&raw.question_uuids, EntityKind::Question),
            })
            .collect();

        // Unknown kinds were removed before linking, so positions stay aligned.
        self.questions = entities
            .questions
            .into_values()
            .filter_map(|raw| {
                let kind = match raw.kind {
                    RawQuestionKind::Value { value_type } => QuestionKind::Value { value_type },
                    RawQuestionKind::Options { answer_uuids } => QuestionKind::Options {
                        answers: linker.many(&answer_uuids, EntityKind::Answer),
                    },
                    RawQuestionKind::MultiChoice { choice_uuids } => QuestionKind::MultiChoice {
                        choices: linker.many(&choice_uuids, EntityKind::Choice),
                    },
                    RawQuestionKind::List {
                        item_template_question_uuids,
                    } => QuestionKind::List {
                        item_template_questions: linker.many(&item_template_question_uuids, EntityKind::Question),
                    },
                    RawQuestionKind::Integration { integration_uuid, props } => QuestionKind::Integration {
                        integration: linker.one(integration_uuid, EntityKind::Integration),
                        props,
                    },
                    RawQuestionKind::ItemSelect { list_question_uuid } => QuestionKind::ItemSelect {
                        list_question: list_question_uuid.and_then(|uuid| linker.one(uuid, EntityKind::Question)),
                    },
                    RawQuestionKind::Unknown => return None,
                };
                Some(Question {
                    uuid: raw.uuid,
                    title: raw.title,
                    text: raw.text,
                    kind,
                    required_phase: raw
                        .required_phase_uuid
                        .and_then(|uuid| linker.one(uuid, EntityKind::Phase)),
                    required: false,
                    tags: linker.many(&raw.tag_uuids, EntityKind::Tag),
                    references: linker.many(&raw.reference_uuids, EntityKind::Reference),
                    experts: linker.many(&raw.expert_uuids, EntityKind::Expert),
                    replies: BTreeMap::new(),
                    chapter: None,
                    parent: None,
                })
            })
            .collect();

        self.answers = entities
            .answers
            .into_values()
            .map(|raw| Answer {
                uuid: raw.uuid,
                label: raw.label,
                advice: raw.advice,
                follow_ups: linker.many(&raw.follow_up_uuids, EntityKind::Question),
                metric_measures: raw
                    .metric_measures
                    .into_iter()
                    .filter_map(|m| {
                        let metric = linker.one(m.metric_uuid, EntityKind::Metric)?;
                        Some(MetricMeasure {
                            metric,
                            measure: m.measure,
                            weight: m.weight,
                        })
                    })
                    .collect(),
            })
            .collect();

        self.choices = entities
            .choices
            .into_values()
            .map(|raw| Choice {
                uuid: raw.uuid,
                label: raw.label,
            })
            .collect();

        self.references = entities
            .references
            .into_values()
            .filter_map(|raw| {
                let uuid = raw.uuid()?;
                let kind = match raw {
                    RawReference::Url { url, label, .. } => ReferenceKind::Url { url, label },
                    RawReference::ResourcePage { resource_page_uuid, .. } => {
                        ReferenceKind::ResourcePage { resource_page_uuid }
                    }
                    RawReference::Cross {
                        target_uuid,
                        description,
                        ..
                    } => ReferenceKind::Cross {
                        target: linker.any(target_uuid),
                        description,
                    },
                    RawReference::Unknown => return None,
                };
                Some(Reference { uuid, kind })
            })
            .collect();

        self.experts = entities
            .experts
            .into_values()
            .map(|raw| Expert {
                uuid: raw.uuid,
                name: raw.name,
                email: raw.email,
            })
            .collect();
        self.integrations = entities
            .integrations
            .into_values()
            .map(|raw| Integration {
                uuid: raw.uuid,
                id: raw.id,
                name: raw.name,
                item_url: raw.item_url,
            })
            .collect();
        self.tags = entities
            .tags
            .into_values()
            .map(|raw| Tag {
                uuid: raw.uuid,
                name: raw.name,
                description: raw.description,
                color: raw.color,
            })
            .collect();
        self.metrics = entities
            .metrics
            .into_values()
            .map(|raw| Metric {
                uuid: raw.uuid,
                title: raw.title,
                abbreviation: raw.abbreviation,
                description: raw.description,
            })
            .collect();
        self.phases = entities
            .phases
            .into_values()
            .map(|raw| Phase {
                uuid: raw.uuid,
                title: raw.title,
                description: raw.description,
            })
            .collect();
    }

    /// Assign chapter and parent of every question reachable from a chapter,
    /// visiting each question once even when follow-ups form cycles.
    fn assign_tree(&mut self) {
        let mut visited = vec![false; self.questions.len()];
        let mut stack: Vec<(usize, usize, Option<usize>)> = Vec::new();

        for &chapter in &self.chapter_order {
            stack.extend(
                self.chapters[chapter]
                    .questions
                    .iter()
                    .rev()
                    .map(|&question| (question, chapter, None)),
            );
            while let Some((question, chapter, parent)) = stack.pop() {
                if std::mem::replace(&mut visited[question], true) {
                    continue;
                }
                self.questions[question].chapter = Some(chapter);
                self.questions[question].parent = parent;

                let children: Vec<usize> = match &self.questions[question].kind {
                    QuestionKind::Options { answers } => answers
                        .iter()
                        .flat_map(|&answer| self.answers[answer].follow_ups.iter().copied())
                        .collect(),
                    QuestionKind::List {
                        item_template_questions,
                    } => item_template_questions.clone(),
                    _ => Vec::new(),
                };
                stack.extend(
                    children
                        .into_iter()
                        .rev()
                        .filter(|&child| !visited[child])
                        .map(|child| (child, chapter, Some(question))),
                );
            }
        }
    }

    fn compute_required(&mut self) {
        let mut rank = vec![None; self.phases.len()];
        for (position, &phase) in self.phase_order.iter().enumerate() {
            rank[phase] = Some(position);
        }
        let current = self.current_phase.and_then(|phase| rank[phase]);
        for question in &mut self.questions {
            let needed = question.required_phase.and_then(|phase| rank[phase]);
            question.required = matches!((needed, current), (Some(needed), Some(current)) if needed <= current);
        }
    }

    /// Arena position of an entity.
    #[must_use]
    pub fn lookup(&self, uuid: Uuid) -> Option<EntityRef> {
        self.index.get(&uuid).copied()
    }

    /// A question by UUID.
    #[must_use]
    pub fn question(&self, uuid: Uuid) -> Option<&Question> {
        match self.lookup(uuid)? {
            EntityRef {
                kind: EntityKind::Question,
                index,
            } => self.questions.get(index),
            _ => None,
        }
    }

    /// UUID of an arena entity.
    #[must_use]
    pub fn uuid_of(&self, entity: EntityRef) -> Uuid {
        let i = entity.index;
        match entity.kind {
            EntityKind::Chapter => self.chapters[i].uuid,
            EntityKind::Question => self.questions[i].uuid,
            EntityKind::Answer => self.answers[i].uuid,
            EntityKind::Choice => self.choices[i].uuid,
            EntityKind::Reference => self.references[i].uuid,
            EntityKind::Expert => self.experts[i].uuid,
            EntityKind::Integration => self.integrations[i].uuid,
            EntityKind::Tag => self.tags[i].uuid,
            EntityKind::Metric => self.metrics[i].uuid,
            EntityKind::Phase => self.phases[i].uuid,
        }
    }
}

/// UUID index shared by all link lookups of one resolution.
struct Linker {
    index: HashMap<Uuid, EntityRef>,
    dropped: usize,
}

impl Linker {
    fn new(entities: &RawEntities) -> Self {
        fn add<V>(index: &mut HashMap<Uuid, EntityRef>, map: &BTreeMap<Uuid, V>, kind: EntityKind) {
            for (position, uuid) in map.keys().enumerate() {
                index.insert(*uuid, EntityRef::new(kind, position));
            }
        }

        let mut index = HashMap::new();
        add(&mut index, &entities.chapters, EntityKind::Chapter);
        add(&mut index, &entities.questions, EntityKind::Question);
        add(&mut index, &entities.answers, EntityKind::Answer);
        add(&mut index, &entities.choices, EntityKind::Choice);
        add(&mut index, &entities.references, EntityKind::Reference);
        add(&mut index, &entities.experts, EntityKind::Expert);
        add(&mut index, &entities.integrations, EntityKind::Integration);
        add(&mut index, &entities.tags, EntityKind::Tag);
        add(&mut index, &entities.metrics, EntityKind::Metric);
        add(&mut index, &entities.phases, EntityKind::Phase);
        Self { index, dropped: 0 }
    }

    fn any(&mut self, uuid: Uuid) -> Option<EntityRef> {
        let found = self.index.get(&uuid).copied();
        if found.is_none() {
            self.dropped += 1;
        }
        found
    }

    fn one(&mut self, uuid: Uuid, kind: EntityKind) -> Option<usize> {
        match self.any(uuid) {
            Some(entity) if entity.kind == kind => Some(entity.index),
            Some(_) => {
                self.dropped += 1;
                None
            }
            None => None,
        }
    }

    fn many(&mut self, uuids: &[Uuid], kind: EntityKind) -> Vec<usize> {
        uuids.iter().filter_map(|&uuid| self.one(uuid, kind)).collect()
    }
}
