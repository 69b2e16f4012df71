//! Plan data model.
//!
//! `RawPlan` and friends are the loose serde-facing mirror of whatever the
//! generator handed back; the validator turns them into the sum-typed
//! `Plan`/`DetailRow`/`ModifierRow` shapes that the rest of the pipeline
//! trusts without re-checking field presence.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::registry::{ScalingBase, Slot, TableRegistry};

/// Upper bound on detail rows in a plan.
pub const MAX_DETAILS: usize = 20;
/// Upper bound on modifier rows in a plan.
pub const MAX_MODIFIERS: usize = 30;

/// One request = one game character.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub name: String,
    /// Element used for slot-derived damage rows, e.g. `"pyro"`.
    pub element: String,
    pub registry: TableRegistry,
    /// Free-text skill description lines, used only to bias inference.
    pub hints: Vec<String>,
    pub mode: OutputMode,
    pub primary_stat: ScalingBase,
}

impl PlanRequest {
    pub fn new(name: impl Into<String>, element: impl Into<String>, registry: TableRegistry) -> Self {
        PlanRequest {
            name: name.into(),
            element: element.into(),
            registry,
            hints: Vec::new(),
            mode: OutputMode::Showcase,
            primary_stat: ScalingBase::Atk,
        }
    }
}

/// Output mode selects which modifier-key vocabulary applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Showcase,
    Compat,
}

const SHOWCASE_KEYS: &[&str] = &[
    "atk_pct",
    "hp_pct",
    "def_pct",
    "atk_flat",
    "hp_flat",
    "def_flat",
    "em",
    "crit_rate",
    "crit_dmg",
    "energy_recharge",
    "dmg_bonus",
    "pyro_dmg_bonus",
    "hydro_dmg_bonus",
    "electro_dmg_bonus",
    "cryo_dmg_bonus",
    "anemo_dmg_bonus",
    "geo_dmg_bonus",
    "dendro_dmg_bonus",
    "physical_dmg_bonus",
    "heal_bonus",
    "shield_strength",
    "res_shred",
    "def_shred",
    "def_ignore",
    "normal_multi",
    "skill_multi",
    "burst_multi",
    "all_multi",
    "x_multi",
];

const COMPAT_KEYS: &[&str] = &[
    "atk_pct",
    "hp_pct",
    "def_pct",
    "em",
    "crit_rate",
    "crit_dmg",
    "energy_recharge",
    "dmg_bonus",
    "heal_bonus",
    "shield_strength",
    "all_multi",
];

impl OutputMode {
    pub fn whitelist(&self) -> &'static [&'static str] {
        match self {
            OutputMode::Showcase => SHOWCASE_KEYS,
            OutputMode::Compat => COMPAT_KEYS,
        }
    }

    pub fn allows_key(&self, key: &str) -> bool {
        self.whitelist().contains(&key)
    }
}

/// Keys using the proportional-multiplier convention (delta from a 100%
/// baseline, not total percent).
pub fn is_multiplier_key(key: &str) -> bool {
    key.ends_with("_multi")
}

/// Keys whose values are percentage-like and therefore range-checkable.
pub fn is_percent_key(key: &str) -> bool {
    key != "em" && !key.ends_with("_flat")
}

pub fn is_crit_rate_key(key: &str) -> bool {
    key == "crit_rate"
}

/// What a showcase calculation computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKind {
    PlainDamage,
    Heal,
    Shield,
    Reaction,
}

impl DetailKind {
    /// Normalizes the loose kind strings the generator produces.
    pub fn parse(s: &str) -> Option<DetailKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain_damage" | "damage" | "dmg" | "attack" | "plain" => Some(DetailKind::PlainDamage),
            "heal" | "healing" | "regen" => Some(DetailKind::Heal),
            "shield" | "absorb" | "barrier" => Some(DetailKind::Shield),
            "reaction" | "transformative" | "transformative_reaction" => Some(DetailKind::Reaction),
            _ => None,
        }
    }
}

/// Canonicalizes a reaction identifier, accepting case and punctuation
/// variants. Returns `None` for unrecognized reactions.
pub fn canonical_reaction(s: &str) -> Option<&'static str> {
    let folded: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match folded.as_str() {
        "overload" | "overloaded" => Some("overload"),
        "swirl" => Some("swirl"),
        "electrocharged" => Some("electrocharged"),
        "superconduct" => Some("superconduct"),
        "shattered" | "shatter" => Some("shattered"),
        "burning" => Some("burning"),
        "bloom" => Some("bloom"),
        "hyperbloom" => Some("hyperbloom"),
        "burgeon" => Some("burgeon"),
        _ => None,
    }
}

/// Element a transformative reaction deals damage as.
pub fn reaction_element(reaction: &str) -> &'static str {
    match reaction {
        "overload" | "burning" => "pyro",
        "swirl" => "anemo",
        "electrocharged" => "electro",
        "superconduct" => "cryo",
        "shattered" => "physical",
        "bloom" | "hyperbloom" | "burgeon" => "dendro",
        _ => "physical",
    }
}

/// Primitive default-state flag values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Num(f64),
}

/// One validated showcase calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub title: String,
    pub kind: DetailKind,
    pub slot: Option<Slot>,
    pub table: Option<String>,
    /// Routing key; defaults to the slot name when the generator omits it.
    pub key: String,
    pub element: Option<String>,
    pub reaction: Option<String>,
    pub scale: Option<ScalingBase>,
    pub index: Option<usize>,
    /// Custom expression overriding table-derived rendering.
    pub formula: Option<String>,
    pub states: IndexMap<String, StateValue>,
    /// Guard expression; a dropped guard merely disables nothing.
    pub check: Option<String>,
    pub tier: Option<u8>,
}

/// A validated modifier value: a constant or a checked expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModValue {
    Num(f64),
    Expr(String),
}

/// One validated conditional/unconditional adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifierRow {
    pub title: String,
    pub weight: Option<i32>,
    pub tier: Option<u8>,
    pub check: Option<String>,
    pub values: IndexMap<String, ModValue>,
    /// Keys already rebased from total percent to delta. The rebased value
    /// can land back inside the trigger band, so the pass needs this marker
    /// to stay idempotent.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub rebased: BTreeSet<String>,
}

/// A validated plan, constructed once per request and discarded after
/// rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub details: Vec<DetailRow>,
    pub modifiers: Vec<ModifierRow>,
    pub main_stats: String,
    pub default_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw (generator-facing) mirror types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPlan {
    #[serde(default, alias = "rows")]
    pub details: Vec<RawDetail>,
    #[serde(default, alias = "buffs")]
    pub modifiers: Vec<RawModifier>,
    #[serde(default, alias = "mainStats", alias = "primary_attributes")]
    pub main_stats: Option<String>,
    #[serde(default, alias = "defaultKey", alias = "default_routing")]
    pub default_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDetail {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub reaction: Option<String>,
    #[serde(default, alias = "stat")]
    pub scale: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default, alias = "expr")]
    pub formula: Option<String>,
    #[serde(default)]
    pub states: IndexMap<String, StateValue>,
    #[serde(default, alias = "cond", alias = "when")]
    pub check: Option<String>,
    #[serde(default, alias = "constellation")]
    pub tier: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawModifier {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "order")]
    pub weight: Option<i32>,
    #[serde(default, alias = "constellation")]
    pub tier: Option<u8>,
    #[serde(default, alias = "cond", alias = "when")]
    pub check: Option<String>,
    #[serde(default, alias = "stats")]
    pub values: IndexMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_normalization_accepts_aliases() {
        assert_eq!(DetailKind::parse("Damage"), Some(DetailKind::PlainDamage));
        assert_eq!(DetailKind::parse("HEALING"), Some(DetailKind::Heal));
        assert_eq!(DetailKind::parse("barrier"), Some(DetailKind::Shield));
        assert_eq!(DetailKind::parse("transformative"), Some(DetailKind::Reaction));
        assert_eq!(DetailKind::parse("summon"), None);
    }

    #[test]
    fn reaction_canonicalization_is_case_and_punctuation_insensitive() {
        assert_eq!(canonical_reaction("Overloaded"), Some("overload"));
        assert_eq!(canonical_reaction("Electro-Charged"), Some("electrocharged"));
        assert_eq!(canonical_reaction("SHATTER"), Some("shattered"));
        assert_eq!(canonical_reaction("fusion"), None);
    }

    #[test]
    fn whitelists_differ_per_mode() {
        assert!(OutputMode::Showcase.allows_key("res_shred"));
        assert!(!OutputMode::Compat.allows_key("res_shred"));
        assert!(OutputMode::Compat.allows_key("crit_rate"));
    }

    #[test]
    fn raw_plan_tolerates_aliases_and_missing_fields() {
        let raw: RawPlan = serde_json::from_str(
            r#"{
                "rows": [{ "title": "Hit", "type": "damage", "slot": "skill", "table": "Skill Damage" }],
                "buffs": [{ "title": "B", "stats": { "atk_pct": 20 } }],
                "mainStats": "atk,crit_rate"
            }"#,
        )
        .unwrap();
        assert_eq!(raw.details.len(), 1);
        assert_eq!(raw.modifiers.len(), 1);
        assert_eq!(raw.main_stats.as_deref(), Some("atk,crit_rate"));
    }
}
