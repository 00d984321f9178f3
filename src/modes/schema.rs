use std::collections::BTreeMap;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::types::ItemKind;

/// Wire shape a mode asks the generator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    Points,
    Decisions,
    Timeline,
    Tasks,
}

/// A wire item before attribution checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub text: String,
    pub source_msg_ids: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PointsDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub points: Vec<PointEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PointEntry {
    pub text: String,
    pub source_msg_ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DecisionsDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub decisions: Vec<DecisionEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DecisionEntry {
    pub decision: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub source_msg_ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TimelineDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub timeline: Vec<EventEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EventEntry {
    pub timestamp: String,
    pub event: String,
    pub source_msg_ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TasksDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TaskEntry {
    pub task: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    pub source_msg_ids: Vec<String>,
}

impl OutputSchema {
    pub fn item_kind(&self) -> ItemKind {
        match self {
            OutputSchema::Points => ItemKind::Point,
            OutputSchema::Decisions => ItemKind::Decision,
            OutputSchema::Timeline => ItemKind::Event,
            OutputSchema::Tasks => ItemKind::Task,
        }
    }

    pub fn collection_key(&self) -> &'static str {
        match self {
            OutputSchema::Points => "points",
            OutputSchema::Decisions => "decisions",
            OutputSchema::Timeline => "timeline",
            OutputSchema::Tasks => "tasks",
        }
    }

    /// Field carrying the item's main text.
    pub fn text_field(&self) -> &'static str {
        match self {
            OutputSchema::Points => "text",
            OutputSchema::Decisions => "decision",
            OutputSchema::Timeline => "event",
            OutputSchema::Tasks => "task",
        }
    }

    pub fn attribute_fields(&self) -> &'static [&'static str] {
        match self {
            OutputSchema::Points => &[],
            OutputSchema::Decisions => &["rationale", "owner", "date"],
            OutputSchema::Timeline => &["timestamp"],
            OutputSchema::Tasks => &["owner", "due", "priority"],
        }
    }

    pub fn json_schema(&self) -> Value {
        let schema = match self {
            OutputSchema::Points => schema_for!(PointsDocument),
            OutputSchema::Decisions => schema_for!(DecisionsDocument),
            OutputSchema::Timeline => schema_for!(TimelineDocument),
            OutputSchema::Tasks => schema_for!(TasksDocument),
        };
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }

    /// Deserializes `value` into this schema's wire document.
    pub fn decode(&self, value: Value) -> Result<RawDocument, serde_json::Error> {
        let document = match self {
            OutputSchema::Points => {
                let doc: PointsDocument = serde_json::from_value(value)?;
                RawDocument {
                    title: doc.title,
                    summary: doc.summary,
                    entries: doc
                        .points
                        .into_iter()
                        .map(|entry| RawEntry {
                            text: entry.text,
                            source_msg_ids: entry.source_msg_ids,
                            attributes: BTreeMap::new(),
                        })
                        .collect(),
                }
            }
            OutputSchema::Decisions => {
                let doc: DecisionsDocument = serde_json::from_value(value)?;
                RawDocument {
                    title: doc.title,
                    summary: doc.summary,
                    entries: doc
                        .decisions
                        .into_iter()
                        .map(|entry| RawEntry {
                            text: entry.decision,
                            source_msg_ids: entry.source_msg_ids,
                            attributes: collect_attributes([
                                ("rationale", entry.rationale),
                                ("owner", entry.owner),
                                ("date", entry.date),
                            ]),
                        })
                        .collect(),
                }
            }
            OutputSchema::Timeline => {
                let doc: TimelineDocument = serde_json::from_value(value)?;
                RawDocument {
                    title: doc.title,
                    summary: doc.summary,
                    entries: doc
                        .timeline
                        .into_iter()
                        .map(|entry| RawEntry {
                            text: entry.event,
                            source_msg_ids: entry.source_msg_ids,
                            attributes: collect_attributes([("timestamp", Some(entry.timestamp))]),
                        })
                        .collect(),
                }
            }
            OutputSchema::Tasks => {
                let doc: TasksDocument = serde_json::from_value(value)?;
                RawDocument {
                    title: doc.title,
                    summary: doc.summary,
                    entries: doc
                        .tasks
                        .into_iter()
                        .map(|entry| RawEntry {
                            text: entry.task,
                            source_msg_ids: entry.source_msg_ids,
                            attributes: collect_attributes([
                                ("owner", entry.owner),
                                ("due", entry.due),
                                ("priority", entry.priority),
                            ]),
                        })
                        .collect(),
                }
            }
        };
        Ok(document)
    }
}

fn collect_attributes<const N: usize>(
    fields: [(&'static str, Option<String>); N],
) -> BTreeMap<String, String> {
    fields
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?;
            let value = value.trim();
            (!value.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}
