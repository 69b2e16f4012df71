//! Heuristic fallback planner.
//!
//! When every generator attempt is rejected, a plan is built from table names
//! alone. The rows go through the same validate/repair/render path as
//! generated ones, so this stays deliberately naive: name patterns pick the
//! row kind, and everything else is left for inference downstream.

use indexmap::IndexMap;
use tracing::info;

use crate::plan::{PlanRequest, RawDetail, RawPlan};
use crate::registry::{Slot, UnitHint};

const DAMAGE_MARKERS: &[&str] = &["dmg", "damage", "hit", "strike", "slash", "thrust"];
const HEAL_MARKERS: &[&str] = &["heal", "regen", "restore", "recovery"];
const SHIELD_MARKERS: &[&str] = &["shield", "absorb", "barrier"];

pub fn heuristic_plan(req: &PlanRequest) -> RawPlan {
    let mut details = Vec::new();
    for slot in [Slot::Normal, Slot::Skill, Slot::Burst, Slot::Passive] {
        for (name, entry) in req.registry.tables(slot) {
            // Modifier tables are buff fodder, never direct rows.
            if entry.unit == Some(UnitHint::Modifier) {
                continue;
            }
            if let Some(kind) = classify(name) {
                details.push(table_row(slot, name, kind));
            }
        }
    }

    // A registry whose names match nothing still yields one row per
    // offensive slot, so the request does not come back empty-handed.
    if details.is_empty() {
        for slot in [Slot::Skill, Slot::Burst, Slot::Normal] {
            if let Some((name, _)) = req
                .registry
                .tables(slot)
                .find(|(_, e)| e.unit != Some(UnitHint::Modifier))
            {
                details.push(table_row(slot, name, "damage"));
                break;
            }
        }
    }
    info!(rows = details.len(), "built heuristic fallback plan");

    let default_key = details
        .iter()
        .rev()
        .find(|d| d.slot.as_deref() == Some("burst"))
        .or_else(|| details.first())
        .and_then(|d| d.key.clone().or_else(|| d.slot.clone()));

    RawPlan {
        details,
        modifiers: Vec::new(),
        main_stats: Some(format!(
            "{},crit_rate,crit_dmg",
            req.primary_stat.stat_field()
        )),
        default_key,
    }
}

fn classify(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if matches(HEAL_MARKERS) {
        Some("heal")
    } else if matches(SHIELD_MARKERS) {
        Some("shield")
    } else if matches(DAMAGE_MARKERS) {
        Some("damage")
    } else {
        None
    }
}

fn table_row(slot: Slot, name: &str, kind: &str) -> RawDetail {
    RawDetail {
        title: Some(name.to_string()),
        kind: Some(kind.to_string()),
        slot: Some(slot.as_str().to_string()),
        table: Some(name.to_string()),
        key: None,
        element: None,
        reaction: None,
        scale: None,
        index: None,
        formula: None,
        states: IndexMap::new(),
        check: None,
        tier: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TableRegistry, TableSample};

    #[test]
    fn classifies_rows_by_table_name() {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
        registry.insert(Slot::Burst, "Healing Over Time", TableSample::Scalar(8.0));
        registry.insert(Slot::Burst, "Shield Absorption", TableSample::Scalar(12.0));
        registry.insert(Slot::Skill, "Duration", TableSample::Scalar(10.0));
        let req = PlanRequest::new("Tester", "pyro", registry);

        let raw = heuristic_plan(&req);
        let kinds: Vec<_> = raw.details.iter().map(|d| d.kind.as_deref()).collect();
        assert_eq!(
            kinds,
            vec![Some("damage"), Some("heal"), Some("shield")]
        );
        assert_eq!(raw.main_stats.as_deref(), Some("atk,crit_rate,crit_dmg"));
    }

    #[test]
    fn unmatched_registry_still_produces_one_row() {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Mysterious Table", TableSample::Scalar(42.0));
        let req = PlanRequest::new("Tester", "geo", registry);

        let raw = heuristic_plan(&req);
        assert_eq!(raw.details.len(), 1);
        assert_eq!(raw.details[0].table.as_deref(), Some("Mysterious Table"));
    }
}
