//! Table/Context Registry.
//!
//! Per-request description of which named tables are legally referenceable,
//! derived from the upstream data source. Every table reference that survives
//! validation must exist here for the claimed slot. The registry is also the
//! single source of schema inference: array shapes and scaling bases are
//! derived from sample values and text hints, never from free-text guessing.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Conventional suffix marking the structured (multi-component) variant of a
/// table, e.g. `"Skill Damage (multi)"` next to `"Skill Damage"`.
pub const STRUCTURED_SUFFIX: &str = " (multi)";

/// The closed set of skill slots through which tables are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Normal,
    Skill,
    Burst,
    Passive,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Normal, Slot::Skill, Slot::Burst, Slot::Passive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Normal => "normal",
            Slot::Skill => "skill",
            Slot::Burst => "burst",
            Slot::Passive => "passive",
        }
    }

    pub fn parse(s: &str) -> Option<Slot> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "attack" | "normal_attack" => Some(Slot::Normal),
            "skill" | "elemental_skill" => Some(Slot::Skill),
            "burst" | "elemental_burst" | "ultimate" => Some(Slot::Burst),
            "passive" | "talent" => Some(Slot::Passive),
            _ => None,
        }
    }
}

/// Declared unit of a table, when the upstream source supplies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitHint {
    PctAtk,
    PctHp,
    PctDef,
    PctEm,
    Flat,
    /// Percentage modifier applied to an already-computed base. Tables with
    /// this unit must never appear as direct-lookup detail rows.
    Modifier,
}

/// Sample value of a table at a representative level/rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSample {
    Scalar(f64),
    /// Multi-component or multi-hit scaling, at most 10 elements.
    Array(Vec<f64>),
    /// Descriptive text such as `"92% ×2"` or `"1.5% Max HP + 150"`, used to
    /// disambiguate array semantics.
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub sample: TableSample,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitHint>,
}

/// Recognized renderings of an array-valued table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayShape {
    /// Plain multi-hit percentages, summed.
    MultiHitSum,
    /// `[stat%, flat]` pair; the conservative fallback.
    StatFlatPair,
    /// `[stat%, stat%]` pair over two different stats.
    StatStatPair,
    /// `[value%, repeat count]`; rendered as multiplication.
    PctTimesCount,
    /// Explicit caller-chosen index into the array.
    IndexedPick,
}

/// Which of the four base stats a percentage table scales from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingBase {
    Atk,
    Hp,
    Def,
    Em,
}

impl ScalingBase {
    pub fn stat_field(&self) -> &'static str {
        match self {
            ScalingBase::Atk => "atk",
            ScalingBase::Hp => "hp",
            ScalingBase::Def => "def",
            ScalingBase::Em => "em",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRegistry {
    slots: IndexMap<Slot, IndexMap<String, TableEntry>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: Slot, name: impl Into<String>, sample: TableSample) {
        self.slots
            .entry(slot)
            .or_default()
            .insert(name.into(), TableEntry { sample, unit: None });
    }

    pub fn insert_with_unit(
        &mut self,
        slot: Slot,
        name: impl Into<String>,
        sample: TableSample,
        unit: UnitHint,
    ) {
        self.slots.entry(slot).or_default().insert(
            name.into(),
            TableEntry {
                sample,
                unit: Some(unit),
            },
        );
    }

    pub fn has(&self, slot: Slot, name: &str) -> bool {
        self.slots
            .get(&slot)
            .map(|t| t.contains_key(name))
            .unwrap_or(false)
    }

    pub fn entry(&self, slot: Slot, name: &str) -> Option<&TableEntry> {
        self.slots.get(&slot).and_then(|t| t.get(name))
    }

    pub fn tables(&self, slot: Slot) -> impl Iterator<Item = (&String, &TableEntry)> {
        self.slots.get(&slot).into_iter().flatten()
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots.keys().copied()
    }

    /// Returns the structured-variant name for `name` when the registry holds
    /// one for this slot.
    pub fn structured_variant(&self, slot: Slot, name: &str) -> Option<String> {
        let variant = format!("{name}{STRUCTURED_SUFFIX}");
        if self.has(slot, &variant) {
            Some(variant)
        } else {
            None
        }
    }

    /// Numeric stand-in values for a table, for the runtime checker's
    /// synthetic lookup. Text samples contribute the numbers they contain.
    pub fn numeric_sample(&self, slot: Slot, name: &str) -> Vec<f64> {
        match self.entry(slot, name).map(|e| &e.sample) {
            Some(TableSample::Scalar(v)) => vec![*v],
            Some(TableSample::Array(vs)) => vs.clone(),
            Some(TableSample::Text(t)) => {
                let nums = numbers_in(t);
                if nums.is_empty() {
                    vec![100.0]
                } else {
                    nums
                }
            }
            None => vec![100.0],
        }
    }

    /// Infers how an array-valued table should be rendered. An explicit
    /// caller-chosen index always wins; otherwise the sample's text and
    /// element count decide, and the unrecognized leftovers fall back to the
    /// conservative stat+flat interpretation.
    pub fn array_shape(&self, slot: Slot, name: &str, explicit_index: Option<usize>) -> ArrayShape {
        if explicit_index.is_some() {
            return ArrayShape::IndexedPick;
        }
        let entry = match self.entry(slot, name) {
            Some(e) => e,
            None => return ArrayShape::StatFlatPair,
        };
        match &entry.sample {
            TableSample::Text(t) => {
                let lower = t.to_ascii_lowercase();
                if is_times_count_text(&lower) {
                    ArrayShape::PctTimesCount
                } else if lower.matches('%').count() >= 2 {
                    ArrayShape::StatStatPair
                } else if lower.contains('%') && lower.contains('+') {
                    ArrayShape::StatFlatPair
                } else {
                    ArrayShape::StatFlatPair
                }
            }
            TableSample::Array(vs) => match vs.len() {
                0 | 1 => ArrayShape::MultiHitSum,
                2 => {
                    // A small integral second component reads as a repeat
                    // count next to a percentage first component.
                    let count_like =
                        vs[1].fract() == 0.0 && vs[1] >= 2.0 && vs[1] <= 10.0 && vs[0] > 10.0;
                    if count_like {
                        ArrayShape::PctTimesCount
                    } else {
                        ArrayShape::StatFlatPair
                    }
                }
                _ => ArrayShape::MultiHitSum,
            },
            TableSample::Scalar(_) => ArrayShape::MultiHitSum,
        }
    }

    /// Infers the scaling base for a table. Priority: per-table unit hint,
    /// then per-table text-sample hint, then the default-skill-slot rule
    /// (plain percentage with no stat marker scales from the primary stat),
    /// then description-level hints last. Description hints over-trigger on
    /// multi-mechanic skills, hence their last place.
    pub fn scaling_base(
        &self,
        slot: Slot,
        name: &str,
        primary: ScalingBase,
        description_hints: &[String],
    ) -> ScalingBase {
        if let Some(entry) = self.entry(slot, name) {
            if let Some(unit) = entry.unit {
                match unit {
                    UnitHint::PctAtk => return ScalingBase::Atk,
                    UnitHint::PctHp => return ScalingBase::Hp,
                    UnitHint::PctDef => return ScalingBase::Def,
                    UnitHint::PctEm => return ScalingBase::Em,
                    UnitHint::Flat | UnitHint::Modifier => {}
                }
            }
            if let TableSample::Text(t) = &entry.sample {
                if let Some(base) = stat_marker(t) {
                    return base;
                }
            }
            if slot == Slot::Skill {
                let plain_pct = match &entry.sample {
                    TableSample::Scalar(_) | TableSample::Array(_) => true,
                    TableSample::Text(t) => t.contains('%') && stat_marker(t).is_none(),
                };
                if plain_pct {
                    return primary;
                }
            }
        }
        for hint in description_hints {
            if let Some(base) = stat_marker(hint) {
                return base;
            }
        }
        ScalingBase::Atk
    }
}

fn is_times_count_text(lower: &str) -> bool {
    if lower.contains('\u{d7}') {
        return true;
    }
    // "92% x2" / "92% * 2" spellings.
    static PAT: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"%\s*[x*]\s*\d").unwrap());
    PAT.is_match(lower)
}

fn stat_marker(text: &str) -> Option<ScalingBase> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("max hp") || lower.contains("hp%") || lower.contains("% hp") {
        return Some(ScalingBase::Hp);
    }
    if lower.contains("def") {
        return Some(ScalingBase::Def);
    }
    if lower.contains("elemental mastery") || lower.contains(" em ") || lower.ends_with(" em") {
        return Some(ScalingBase::Em);
    }
    if lower.contains("atk") {
        return Some(ScalingBase::Atk);
    }
    None
}

fn numbers_in(text: &str) -> Vec<f64> {
    static NUM: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"\d+(?:\.\d+)?").unwrap());
    NUM.find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .take(10)
        .collect()
}
