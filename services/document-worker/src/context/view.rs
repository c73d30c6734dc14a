//! Template views over the resolved graph.
//!
//! Views hold the shared graph plus an arena reference and materialize
//! fields on access, so cyclic links never have to be copied.

use super::resolver::{DocumentContext, EntityKind, EntityRef, QuestionKind, ReferenceKind, Reply, ReplyValue};
use minijinja::value::{from_args, Enumerator, Object, Value};
use minijinja::{Error, ErrorKind, State};
use std::sync::Arc;
use uuid::Uuid;

/// Root object exposed to templates as `doc`.
#[derive(Debug)]
pub struct DocView(Arc<DocumentContext>);

impl DocView {
    /// Template value of a resolved graph.
    #[must_use]
    pub fn value(ctx: Arc<DocumentContext>) -> Value {
        Value::from_object(Self(ctx))
    }
}

impl Object for DocView {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let ctx = &self.0;
        let value = match key.as_str()? {
            "questionnaire" => [
                ("uuid", Value::from(ctx.questionnaire.uuid.to_string())),
                ("name", Value::from(ctx.questionnaire.name.clone())),
            ]
            .into_iter()
            .collect(),
            "knowledge_model_uuid" => Value::from(ctx.knowledge_model_uuid.to_string()),
            "chapters" => views(ctx, EntityKind::Chapter, &ctx.chapter_order),
            "tags" => views(ctx, EntityKind::Tag, &ctx.tag_order),
            "integrations" => views(ctx, EntityKind::Integration, &ctx.integration_order),
            "metrics" => views(ctx, EntityKind::Metric, &ctx.metric_order),
            "phases" => views(ctx, EntityKind::Phase, &ctx.phase_order),
            "current_phase" => optional(ctx, EntityKind::Phase, ctx.current_phase),
            _ => return None,
        };
        Some(value)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&[
            "questionnaire",
            "knowledge_model_uuid",
            "chapters",
            "tags",
            "integrations",
            "metrics",
            "phases",
            "current_phase",
        ])
    }

    fn call_method(self: &Arc<Self>, _state: &State<'_, '_>, method: &str, args: &[Value]) -> Result<Value, Error> {
        match method {
            "entity" => {
                let (uuid,): (String,) = from_args(args)?;
                let uuid = uuid
                    .parse::<Uuid>()
                    .map_err(|err| Error::new(ErrorKind::InvalidOperation, format!("invalid UUID: {err}")))?;
                Ok(self
                    .0
                    .lookup(uuid)
                    .map_or_else(Value::default, |entity| view(&self.0, entity)))
            }
            _ => Err(Error::from(ErrorKind::UnknownMethod)),
        }
    }
}

/// One arena entity.
#[derive(Debug)]
struct EntityView {
    ctx: Arc<DocumentContext>,
    entity: EntityRef,
}

fn view(ctx: &Arc<DocumentContext>, entity: EntityRef) -> Value {
    Value::from_object(EntityView {
        ctx: Arc::clone(ctx),
        entity,
    })
}

fn views(ctx: &Arc<DocumentContext>, kind: EntityKind, indices: &[usize]) -> Value {
    indices
        .iter()
        .map(|&index| view(ctx, EntityRef::new(kind, index)))
        .collect()
}

fn optional(ctx: &Arc<DocumentContext>, kind: EntityKind, index: Option<usize>) -> Value {
    index.map_or_else(Value::default, |index| view(ctx, EntityRef::new(kind, index)))
}

fn text(value: &str) -> Value {
    Value::from(value.to_string())
}

fn optional_text(value: Option<&String>) -> Value {
    value.map_or_else(Value::default, |value| text(value))
}

fn reply_value(ctx: &Arc<DocumentContext>, reply: &Reply) -> Value {
    let (value, id) = match &reply.value {
        ReplyValue::String(value) => (text(value), Value::default()),
        ReplyValue::Answer(answer) => (optional(ctx, EntityKind::Answer, *answer), Value::default()),
        ReplyValue::MultiChoice(choices) => (views(ctx, EntityKind::Choice, choices), Value::default()),
        ReplyValue::ItemList(items) => (
            items.iter().map(|item| Value::from(item.to_string())).collect(),
            Value::default(),
        ),
        ReplyValue::Integration { id, value } => (text(value), optional_text(id.as_ref())),
        ReplyValue::ItemSelect(item) => (Value::from(item.to_string()), Value::default()),
    };
    [
        ("path", text(&reply.path)),
        ("type", Value::from(reply.value.name())),
        ("value", value),
        ("id", id),
        (
            "created_at",
            reply
                .created_at
                .map_or_else(Value::default, |at| Value::from(at.to_rfc3339())),
        ),
    ]
    .into_iter()
    .collect()
}

impl EntityView {
    fn keys(&self) -> &'static [&'static str] {
        match self.entity.kind {
            EntityKind::Chapter => &["uuid", "title", "text", "questions"],
            EntityKind::Question => &[
                "uuid",
                "type",
                "title",
                "text",
                "required",
                "required_phase",
                "tags",
                "references",
                "experts",
                "replies",
                "chapter",
                "parent",
                "answers",
                "choices",
                "item_template_questions",
                "integration",
                "props",
                "list_question",
                "value_type",
            ],
            EntityKind::Answer => &["uuid", "label", "advice", "follow_ups", "metric_measures"],
            EntityKind::Choice => &["uuid", "label"],
            EntityKind::Reference => &["uuid", "type", "url", "label", "resource_page_uuid", "target", "description"],
            EntityKind::Expert => &["uuid", "name", "email"],
            EntityKind::Integration => &["uuid", "id", "name", "item_url"],
            EntityKind::Tag => &["uuid", "name", "description", "color"],
            EntityKind::Metric => &["uuid", "title", "abbreviation", "description"],
            EntityKind::Phase => &["uuid", "title", "description"],
        }
    }

    fn field(&self, key: &str) -> Option<Value> {
        let ctx = &self.ctx;
        let i = self.entity.index;
        if key == "uuid" {
            return Some(Value::from(ctx.uuid_of(self.entity).to_string()));
        }
        let value = match self.entity.kind {
            EntityKind::Chapter => {
                let chapter = &ctx.chapters[i];
                match key {
                    "title" => text(&chapter.title),
                    "text" => optional_text(chapter.text.as_ref()),
                    "questions" => views(ctx, EntityKind::Question, &chapter.questions),
                    _ => return None,
                }
            }
            EntityKind::Question => return self.question_field(key),
            EntityKind::Answer => {
                let answer = &ctx.answers[i];
                match key {
                    "label" => text(&answer.label),
                    "advice" => optional_text(answer.advice.as_ref()),
                    "follow_ups" => views(ctx, EntityKind::Question, &answer.follow_ups),
                    "metric_measures" => answer
                        .metric_measures
                        .iter()
                        .map(|m| {
                            [
                                ("metric", view(ctx, EntityRef::new(EntityKind::Metric, m.metric))),
                                ("measure", Value::from(m.measure)),
                                ("weight", Value::from(m.weight)),
                            ]
                            .into_iter()
                            .collect::<Value>()
                        })
                        .collect(),
                    _ => return None,
                }
            }
            EntityKind::Choice => match key {
                "label" => text(&ctx.choices[i].label),
                _ => return None,
            },
            EntityKind::Reference => match (&ctx.references[i].kind, key) {
                (ReferenceKind::Url { .. }, "type") => Value::from("URLReference"),
                (ReferenceKind::ResourcePage { .. }, "type") => Value::from("ResourcePageReference"),
                (ReferenceKind::Cross { .. }, "type") => Value::from("CrossReference"),
                (ReferenceKind::Url { url, .. }, "url") => text(url),
                (ReferenceKind::Url { label, .. }, "label") => text(label),
                (ReferenceKind::ResourcePage { resource_page_uuid }, "resource_page_uuid") => {
                    resource_page_uuid.map_or_else(Value::default, |uuid| Value::from(uuid.to_string()))
                }
                (ReferenceKind::Cross { target, .. }, "target") => {
                    target.map_or_else(Value::default, |target| view(ctx, target))
                }
                (ReferenceKind::Cross { description, .. }, "description") => text(description),
                _ => return None,
            },
            EntityKind::Expert => {
                let expert = &ctx.experts[i];
                match key {
                    "name" => text(&expert.name),
                    "email" => text(&expert.email),
                    _ => return None,
                }
            }
            EntityKind::Integration => {
                let integration = &ctx.integrations[i];
                match key {
                    "id" => text(&integration.id),
                    "name" => text(&integration.name),
                    "item_url" => optional_text(integration.item_url.as_ref()),
                    _ => return None,
                }
            }
            EntityKind::Tag => {
                let tag = &ctx.tags[i];
                match key {
                    "name" => text(&tag.name),
                    "description" => optional_text(tag.description.as_ref()),
                    "color" => text(&tag.color),
                    _ => return None,
                }
            }
            EntityKind::Metric => {
                let metric = &ctx.metrics[i];
                match key {
                    "title" => text(&metric.title),
                    "abbreviation" => optional_text(metric.abbreviation.as_ref()),
                    "description" => optional_text(metric.description.as_ref()),
                    _ => return None,
                }
            }
            EntityKind::Phase => {
                let phase = &ctx.phases[i];
                match key {
                    "title" => text(&phase.title),
                    "description" => optional_text(phase.description.as_ref()),
                    _ => return None,
                }
            }
        };
        Some(value)
    }

    fn question_field(&self, key: &str) -> Option<Value> {
        let ctx = &self.ctx;
        let question = &ctx.questions[self.entity.index];
        let value = match (key, &question.kind) {
            ("type", kind) => Value::from(kind.name()),
            ("title", _) => text(&question.title),
            ("text", _) => optional_text(question.text.as_ref()),
            ("required", _) => Value::from(question.required),
            ("required_phase", _) => optional(ctx, EntityKind::Phase, question.required_phase),
            ("tags", _) => views(ctx, EntityKind::Tag, &question.tags),
            ("references", _) => views(ctx, EntityKind::Reference, &question.references),
            ("experts", _) => views(ctx, EntityKind::Expert, &question.experts),
            ("replies", _) => question
                .replies
                .iter()
                .map(|(path, reply)| (path.clone(), reply_value(ctx, reply)))
                .collect(),
            ("chapter", _) => optional(ctx, EntityKind::Chapter, question.chapter),
            ("parent", _) => optional(ctx, EntityKind::Question, question.parent),
            ("answers", QuestionKind::Options { answers }) => views(ctx, EntityKind::Answer, answers),
            ("choices", QuestionKind::MultiChoice { choices }) => views(ctx, EntityKind::Choice, choices),
            (
                "item_template_questions",
                QuestionKind::List {
                    item_template_questions,
                },
            ) => views(ctx, EntityKind::Question, item_template_questions),
            ("integration", QuestionKind::Integration { integration, .. }) => {
                optional(ctx, EntityKind::Integration, *integration)
            }
            ("props", QuestionKind::Integration { props, .. }) => Value::from_serialize(props),
            ("list_question", QuestionKind::ItemSelect { list_question }) => {
                optional(ctx, EntityKind::Question, *list_question)
            }
            ("value_type", QuestionKind::Value { value_type }) => text(value_type),
            _ => return None,
        };
        Some(value)
    }
}

impl Object for EntityView {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.field(key.as_str()?)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(self.keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::Environment;
    use serde_json::json;

    fn render(source: &str, ctx: DocumentContext) -> String {
        let env = Environment::new();
        env.render_str(source, minijinja::context! { doc => DocView::value(Arc::new(ctx)) })
            .unwrap()
    }

    fn sample() -> (DocumentContext, Uuid, Uuid) {
        let chapter = Uuid::new_v4();
        let question = Uuid::new_v4();
        let ctx = DocumentContext::from_json(&json!({
            "questionnaire": {
                "uuid": Uuid::new_v4(), "name": "Plan",
                "replies": {
                    format!("{chapter}.{question}"): {"value": {"type": "StringReply", "value": "Genomics"}}
                }
            },
            "knowledgeModel": {
                "chapterUuids": [chapter],
                "entities": {
                    "chapters": {chapter.to_string(): {"uuid": chapter, "title": "Intro", "questionUuids": [question]}},
                    "questions": {question.to_string(): {
                        "uuid": question, "title": "Project name",
                        "questionType": "ValueQuestion", "valueType": "StringQuestionValueType"
                    }}
                }
            }
        }))
        .unwrap();
        (ctx, chapter, question)
    }

    #[test]
    fn test_navigates_chapters_and_replies() {
        let (ctx, _, _) = sample();
        let source = "{% for c in doc.chapters %}{{ c.title }}:{% for q in c.questions %}\
            {{ q.title }}={{ q.replies[c.uuid ~ '.' ~ q.uuid].value }}{% endfor %}{% endfor %}";
        assert_eq!(render(source, ctx), "Intro:Project name=Genomics");
    }

    #[test]
    fn test_parent_links_point_back() {
        let (ctx, _, question) = sample();
        let source = format!("{{{{ doc.entity('{question}').chapter.title }}}}");
        assert_eq!(render(&source, ctx), "Intro");
    }

    #[test]
    fn test_unknown_field_is_undefined() {
        let (ctx, _, _) = sample();
        assert_eq!(render("{{ doc.chapters[0].nope is undefined }}", ctx), "true");
    }
}
