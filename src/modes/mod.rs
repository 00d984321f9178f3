use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{SummarizeError, invalid_input},
    types::{ItemKind, Message},
};

pub mod prompts;
pub mod schema;

pub use schema::OutputSchema;

/// Versions stay resolvable for this many releases behind the latest one.
pub const DEPRECATION_WINDOW: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeFamily {
    Pointwise,
    KeyDecisions,
    Timeline,
    ActionItems,
}

impl ModeFamily {
    pub const ALL: [ModeFamily; 4] = [
        ModeFamily::Pointwise,
        ModeFamily::KeyDecisions,
        ModeFamily::Timeline,
        ModeFamily::ActionItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeFamily::Pointwise => "pointwise",
            ModeFamily::KeyDecisions => "key_decisions",
            ModeFamily::Timeline => "timeline",
            ModeFamily::ActionItems => "action_items",
        }
    }

    pub fn capability(&self) -> &'static ModeCapability {
        match self {
            ModeFamily::Pointwise => &CAPABILITIES[0],
            ModeFamily::KeyDecisions => &CAPABILITIES[1],
            ModeFamily::Timeline => &CAPABILITIES[2],
            ModeFamily::ActionItems => &CAPABILITIES[3],
        }
    }

    pub fn latest_version(&self) -> u32 {
        self.capability().latest_version
    }

    pub fn oldest_supported_version(&self) -> u32 {
        self.latest_version()
            .saturating_sub(DEPRECATION_WINDOW)
            .max(1)
    }

    pub fn item_kind(&self) -> ItemKind {
        self.capability().schema.item_kind()
    }
}

impl fmt::Display for ModeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeFamily {
    type Err = SummarizeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ModeFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == raw)
            .ok_or_else(|| {
                invalid_input(format!(
                    "unknown mode '{}'; expected one of: {}",
                    raw,
                    ModeFamily::ALL.map(|family| family.as_str()).join(", ")
                ))
            })
    }
}

pub type PromptBuilder = fn(&PromptInput<'_>) -> String;

/// One row of the capability table: everything needed to run a mode family.
#[derive(Debug)]
pub struct ModeCapability {
    pub family: ModeFamily,
    pub latest_version: u32,
    pub schema: OutputSchema,
    pub build_prompt: PromptBuilder,
}

static CAPABILITIES: [ModeCapability; 4] = [
    ModeCapability {
        family: ModeFamily::Pointwise,
        latest_version: 4,
        schema: OutputSchema::Points,
        build_prompt: prompts::build_prompt,
    },
    ModeCapability {
        family: ModeFamily::KeyDecisions,
        latest_version: 2,
        schema: OutputSchema::Decisions,
        build_prompt: prompts::build_prompt,
    },
    ModeCapability {
        family: ModeFamily::Timeline,
        latest_version: 1,
        schema: OutputSchema::Timeline,
        build_prompt: prompts::build_prompt,
    },
    ModeCapability {
        family: ModeFamily::ActionItems,
        latest_version: 3,
        schema: OutputSchema::Tasks,
        build_prompt: prompts::build_prompt,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMode {
    pub family: ModeFamily,
    pub version: u32,
}

impl ResolvedMode {
    /// Resolves `family` or `family@N`. A bare family picks the latest
    /// version; explicit versions must fall inside the deprecation window.
    pub fn resolve(raw: &str) -> Result<Self, SummarizeError> {
        let raw = raw.trim();
        let (family_part, version_part) = match raw.split_once('@') {
            Some((family, version)) => (family, Some(version)),
            None => (raw, None),
        };
        let family: ModeFamily = family_part.parse()?;

        let version = match version_part {
            None => family.latest_version(),
            Some(text) => text.parse::<u32>().map_err(|_| {
                invalid_input(format!("mode version '{}' is not a number", text))
            })?,
        };

        if version > family.latest_version() || version == 0 {
            return Err(invalid_input(format!(
                "mode {} has no version {}; latest is {}",
                family,
                version,
                family.latest_version()
            )));
        }
        if version < family.oldest_supported_version() {
            return Err(invalid_input(format!(
                "mode {}@{} is retired; oldest supported version is {}",
                family,
                version,
                family.oldest_supported_version()
            )));
        }

        Ok(Self { family, version })
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.family, self.version)
    }

    pub fn schema(&self) -> OutputSchema {
        self.family.capability().schema
    }

    pub fn build_prompt(&self, messages: &[Message], options: &ModeOptions) -> String {
        let capability = self.family.capability();
        (capability.build_prompt)(&PromptInput {
            mode: *self,
            schema: capability.schema,
            messages,
            options,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOptions {
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

pub struct PromptInput<'a> {
    pub mode: ResolvedMode,
    pub schema: OutputSchema,
    pub messages: &'a [Message],
    pub options: &'a ModeOptions,
}
