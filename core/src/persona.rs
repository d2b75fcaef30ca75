//! Character persona: identity card (JSON) and numeric trait weights.
//!
//! Loading never fails past this module. A missing or malformed card leaves
//! `record` unset; a missing `[PERSONA]` section leaves `traits` unset. Both
//! cases are logged.

use crate::config::CharConfig;
use crate::{Result, TarsError};
use ini::Ini;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Section of the trait file that holds the weights
pub const PERSONA_SECTION: &str = "PERSONA";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersonaRecord {
    pub name: String,
    pub description: String,
    pub personality: String,
    pub scenario: String,
    /// Greeting with `{{user}}`, `{{char}}` and `{{time}}` already substituted
    pub greeting: String,
    pub example_dialogue: String,
}

#[derive(Debug, Default, Deserialize)]
struct CharacterCard {
    #[serde(default)]
    char_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    scenario: String,
    #[serde(default)]
    first_mes: String,
    #[serde(default)]
    mes_example: String,
}

#[derive(Clone, Debug, Default)]
pub struct PersonaStore {
    pub record: Option<PersonaRecord>,
    pub traits: Option<BTreeMap<String, i64>>,
}

impl PersonaStore {
    pub fn load(cfg: &CharConfig) -> Self {
        let record = match load_card(&cfg.character_card_path, &cfg.user_name) {
            Ok(r) => {
                info!(target = "persona", name = %r.name, "Character loaded");
                Some(r)
            }
            Err(e) => {
                error!(target = "persona", path = %cfg.character_card_path.display(), error = %e, "Failed to load character card");
                None
            }
        };
        let traits = match load_traits(&cfg.persona_path) {
            Ok(t) => {
                info!(target = "persona", count = t.len(), "Persona traits loaded");
                Some(t)
            }
            Err(e) => {
                error!(target = "persona", path = %cfg.persona_path.display(), error = %e, "Failed to load persona traits");
                None
            }
        };
        Self { record, traits }
    }

    pub fn name(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.name.as_str())
    }

    pub fn greeting(&self) -> Option<&str> {
        self.record
            .as_ref()
            .map(|r| r.greeting.as_str())
            .filter(|g| !g.is_empty())
    }

    pub fn trait_weight(&self, key: &str) -> Option<i64> {
        self.traits
            .as_ref()
            .and_then(|t| t.get(&key.to_lowercase()).copied())
    }

    /// Description / personality / scenario block used to condition the dialogue model
    pub fn character_card(&self) -> Option<String> {
        self.record.as_ref().map(|r| {
            format!(
                "\nDescription: {}\n\nPersonality: {}\n\nWorld Scenario: {}\n",
                r.description, r.personality, r.scenario
            )
        })
    }
}

/// Read the JSON card and substitute greeting placeholders.
pub fn load_card(path: &Path, user_name: &str) -> Result<PersonaRecord> {
    let raw = fs::read_to_string(path)?;
    let card: CharacterCard = serde_json::from_str(&raw)?;
    let time = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();
    let greeting = substitute_placeholders(&card.first_mes, user_name, &card.char_name, &time);
    Ok(PersonaRecord {
        name: card.char_name,
        description: card.description,
        personality: card.personality,
        scenario: card.scenario,
        greeting,
        example_dialogue: card.mes_example,
    })
}

/// Read integer weights from the `[PERSONA]` section of the INI trait file.
///
/// Keys are lowercased. Values must be integers; quoted integers are accepted.
pub fn load_traits(path: &Path) -> Result<BTreeMap<String, i64>> {
    let raw = fs::read_to_string(path)?;
    let doc = Ini::load_from_str(&raw)
        .map_err(|e| TarsError::PersonaError(format!("invalid trait file: {e}")))?;
    let section = doc.section(Some(PERSONA_SECTION)).ok_or_else(|| {
        TarsError::PersonaError(format!("[{PERSONA_SECTION}] section not found"))
    })?;

    let mut traits = BTreeMap::new();
    for (key, value) in section.iter() {
        let weight = value.trim().trim_matches('"').trim().parse::<i64>().map_err(|_| {
            TarsError::PersonaError(format!("trait '{key}' is not an integer: {value}"))
        })?;
        traits.insert(key.to_lowercase(), weight);
    }
    Ok(traits)
}

/// Replace `{{user}}`, `{{char}}` and `{{time}}` in a single left-to-right pass.
///
/// Substituted text is never rescanned, so the result does not depend on the
/// order of placeholders and a second pass over the output is a no-op unless
/// the substituted values themselves contain placeholder tokens.
pub fn substitute_placeholders(template: &str, user: &str, char_name: &str, time: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let replacement = after.find("}}").and_then(|end| match &after[..end] {
            "user" => Some((user, end)),
            "char" => Some((char_name, end)),
            "time" => Some((time, end)),
            _ => None,
        });
        match replacement {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
