//! Plan Schema Validator.
//!
//! Consumes a raw plan and the registry, clamps list sizes, normalizes
//! enums, and checks every expression through the safety grammar and
//! reference checkers. Row-level problems degrade by omission; an invalid
//! custom formula is fatal because a bad formula corrupts output, while an
//! invalid guard merely disables a row and is dropped silently.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::ForgeError;
use crate::plan::{
    canonical_reaction, DetailKind, DetailRow, ModValue, ModifierRow, Plan, PlanRequest, RawDetail,
    RawModifier, RawPlan, MAX_DETAILS, MAX_MODIFIERS,
};
use crate::registry::{ScalingBase, Slot};

const DEFAULT_MAIN_STATS: &str = "atk,crit_rate,crit_dmg";

/// Validates a raw plan into a trusted [`Plan`], or fails with a reason
/// suitable for a retry correction hint.
pub fn validate(req: &PlanRequest, raw: RawPlan) -> Result<Plan, ForgeError> {
    let mut details = raw.details;
    let mut modifiers = raw.modifiers;
    if details.len() > MAX_DETAILS {
        warn!(dropped = details.len() - MAX_DETAILS, "clamping detail rows");
        details.truncate(MAX_DETAILS);
    }
    if modifiers.len() > MAX_MODIFIERS {
        warn!(
            dropped = modifiers.len() - MAX_MODIFIERS,
            "clamping modifier rows"
        );
        modifiers.truncate(MAX_MODIFIERS);
    }

    let mut out_details = Vec::new();
    for raw_row in details {
        if let Some(row) = validate_detail(req, raw_row)? {
            out_details.push(row);
        }
    }
    if out_details.is_empty() {
        return Err(ForgeError::EmptyPlan);
    }

    let mut out_modifiers = Vec::new();
    for raw_row in modifiers {
        if let Some(row) = validate_modifier(req, raw_row) {
            out_modifiers.push(row);
        }
    }

    let default_key = raw.default_key.filter(|k| {
        let survives = out_details.iter().any(|d| &d.key == k);
        if !survives {
            debug!(key = %k, "default routing key no longer matches a surviving row");
        }
        survives
    });

    Ok(Plan {
        details: out_details,
        modifiers: out_modifiers,
        main_stats: raw
            .main_stats
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MAIN_STATS.to_string()),
        default_key,
    })
}

/// Checks a formula/value expression: safety grammar, reference forms, and
/// registry membership for every table it touches.
fn check_expression(req: &PlanRequest, s: &str) -> Result<Vec<(Slot, String)>, String> {
    if !fexpr::is_safe_value_expression(s) {
        return Err("expression failed the safety grammar".to_string());
    }
    let refs = fexpr::table_refs(s)?;
    fexpr::check_total_calls(s)?;
    fexpr::check_dmg_calls(s)?;
    fexpr::free_vars(s)?;
    let mut resolved = Vec::new();
    for r in &refs {
        let slot = Slot::parse(&r.slot).ok_or_else(|| format!("unknown slot `{}`", r.slot))?;
        if !req.registry.has(slot, &r.table) {
            return Err(format!(
                "table `{}` does not exist for slot `{}`",
                r.table,
                slot.as_str()
            ));
        }
        resolved.push((slot, r.table.clone()));
    }
    Ok(resolved)
}

/// Validates a guard expression; failures are non-fatal and drop the guard.
fn sanitize_check(req: &PlanRequest, title: &str, check: Option<String>) -> Option<String> {
    let check = check?.trim().to_string();
    if check.is_empty() {
        return None;
    }
    match check_expression(req, &check) {
        Ok(_) => Some(check),
        Err(reason) => {
            warn!(row = %title, %reason, "dropping invalid guard expression");
            None
        }
    }
}

fn validate_detail(req: &PlanRequest, raw: RawDetail) -> Result<Option<DetailRow>, ForgeError> {
    let title = match raw.title.map(|t| t.trim().to_string()) {
        Some(t) if !t.is_empty() => t,
        _ => {
            warn!("dropping detail row without a title");
            return Ok(None);
        }
    };
    let kind = match raw.kind.as_deref().and_then(DetailKind::parse) {
        Some(k) => k,
        None => {
            warn!(row = %title, kind = ?raw.kind, "dropping detail row with unknown kind");
            return Ok(None);
        }
    };

    let tier = raw.tier.filter(|t| (1..=6).contains(t));
    let scale = raw.scale.as_deref().and_then(parse_scale);
    let element = raw
        .element
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| fexpr::idents::is_element(e));

    if kind == DetailKind::Reaction {
        let reaction = match raw.reaction.as_deref().and_then(canonical_reaction) {
            Some(r) => r.to_string(),
            None => {
                warn!(row = %title, reaction = ?raw.reaction, "dropping reaction row with unrecognized reaction");
                return Ok(None);
            }
        };
        // Reaction rows never reference a table.
        let check = sanitize_check(req, &title, raw.check);
        return Ok(Some(DetailRow {
            key: raw.key.unwrap_or_else(|| "reaction".to_string()),
            title,
            kind,
            slot: None,
            table: None,
            element: None,
            reaction: Some(reaction),
            scale: None,
            index: None,
            formula: None,
            states: raw.states,
            check,
            tier,
        }));
    }

    let slot = raw.slot.as_deref().and_then(Slot::parse);

    if let Some(formula) = raw.formula.map(|f| f.trim().to_string()).filter(|f| !f.is_empty()) {
        // A custom formula must itself reference at least one registry
        // table; anything wrong with it is fatal for the whole attempt.
        let refs = check_expression(req, &formula).map_err(|reason| {
            ForgeError::IllegalExpression {
                field: format!("formula of `{title}`"),
                reason,
            }
        })?;
        if refs.is_empty() {
            return Err(ForgeError::IllegalExpression {
                field: format!("formula of `{title}`"),
                reason: "custom expression references no registry table".to_string(),
            });
        }
        let check = sanitize_check(req, &title, raw.check);
        let key = raw
            .key
            .or_else(|| slot.map(|s| s.as_str().to_string()))
            .unwrap_or_else(|| "custom".to_string());
        return Ok(Some(DetailRow {
            title,
            kind,
            slot,
            table: None,
            key,
            element,
            reaction: None,
            scale,
            index: raw.index,
            formula: Some(formula),
            states: raw.states,
            check,
            tier,
        }));
    }

    let slot = match slot {
        Some(s) => s,
        None => {
            warn!(row = %title, slot = ?raw.slot, "dropping table row with unknown slot");
            return Ok(None);
        }
    };
    let table = match raw.table.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => {
            warn!(row = %title, "dropping table row without a table name");
            return Ok(None);
        }
    };
    if !req.registry.has(slot, &table) {
        warn!(row = %title, slot = slot.as_str(), table = %table, "dropping row referencing unknown table");
        return Ok(None);
    }
    // Auto-upgrade to the structured variant when the registry holds one.
    let table = req
        .registry
        .structured_variant(slot, &table)
        .inspect(|variant| debug!(row = %title, %variant, "upgrading table to structured variant"))
        .unwrap_or(table);

    let check = sanitize_check(req, &title, raw.check);
    let key = raw.key.unwrap_or_else(|| slot.as_str().to_string());
    Ok(Some(DetailRow {
        title,
        kind,
        slot: Some(slot),
        table: Some(table),
        key,
        element,
        reaction: None,
        scale,
        index: raw.index,
        formula: None,
        states: raw.states,
        check,
        tier,
    }))
}

fn validate_modifier(req: &PlanRequest, raw: RawModifier) -> Option<ModifierRow> {
    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let mut values = IndexMap::new();
    for (key, value) in raw.values {
        if !req.mode.allows_key(&key) {
            // Invalid keys are dropped, never rewritten into arbitrary
            // identifiers.
            warn!(row = %title, %key, "dropping modifier key outside the whitelist");
            continue;
        }
        match value {
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    values.insert(key, ModValue::Num(v));
                }
            }
            serde_json::Value::String(s) => match check_expression(req, &s) {
                Ok(_) => {
                    values.insert(key, ModValue::Expr(s));
                }
                Err(reason) => {
                    warn!(row = %title, %key, %reason, "dropping invalid modifier expression");
                }
            },
            other => {
                warn!(row = %title, %key, value = %other, "dropping non-scalar modifier value");
            }
        }
    }
    if values.is_empty() {
        warn!(row = %title, "dropping modifier row with no surviving values");
        return None;
    }
    let check = sanitize_check(req, &title, raw.check);
    Some(ModifierRow {
        title,
        weight: raw.weight,
        tier: raw.tier.filter(|t| (1..=6).contains(t)),
        check,
        values,
        rebased: BTreeSet::new(),
    })
}

fn parse_scale(s: &str) -> Option<ScalingBase> {
    match s.trim().to_ascii_lowercase().as_str() {
        "atk" | "attack" => Some(ScalingBase::Atk),
        "hp" | "max_hp" => Some(ScalingBase::Hp),
        "def" | "defense" => Some(ScalingBase::Def),
        "em" | "mastery" | "elemental_mastery" => Some(ScalingBase::Em),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TableRegistry, TableSample};
    use pretty_assertions::assert_eq;

    fn request() -> PlanRequest {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
        registry.insert(Slot::Burst, "Burst Damage", TableSample::Scalar(300.0));
        registry.insert(Slot::Skill, "Multi Hit", TableSample::Scalar(50.0));
        registry.insert(
            Slot::Skill,
            "Multi Hit (multi)",
            TableSample::Array(vec![50.0, 50.0]),
        );
        PlanRequest::new("Tester", "pyro", registry)
    }

    fn detail(kind: &str, slot: &str, table: &str) -> RawDetail {
        RawDetail {
            title: Some(format!("{table} row")),
            kind: Some(kind.to_string()),
            slot: Some(slot.to_string()),
            table: Some(table.to_string()),
            ..RawDetail::default()
        }
    }

    #[test]
    fn accepts_registry_backed_rows_and_defaults_routing_key() {
        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Skill Damage")],
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.details.len(), 1);
        assert_eq!(plan.details[0].key, "skill");
        assert_eq!(plan.main_stats, DEFAULT_MAIN_STATS);
    }

    #[test]
    fn drops_rows_with_unknown_tables_and_fails_when_empty() {
        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Nonexistent")],
            ..RawPlan::default()
        };
        assert!(matches!(
            validate(&request(), raw),
            Err(ForgeError::EmptyPlan)
        ));
    }

    #[test]
    fn upgrades_to_structured_variant() {
        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Multi Hit")],
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.details[0].table.as_deref(), Some("Multi Hit (multi)"));
    }

    #[test]
    fn unknown_reaction_rows_are_dropped() {
        let mut reaction = RawDetail {
            title: Some("Boom".into()),
            kind: Some("reaction".into()),
            reaction: Some("fusion".into()),
            ..RawDetail::default()
        };
        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Skill Damage"), reaction.clone()],
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.details.len(), 1);

        reaction.reaction = Some("Overloaded".into());
        let raw = RawPlan {
            details: vec![reaction],
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.details[0].reaction.as_deref(), Some("overload"));
        assert_eq!(plan.details[0].table, None);
    }

    #[test]
    fn invalid_guard_is_dropped_silently_but_invalid_formula_is_fatal() {
        let mut row = detail("damage", "skill", "Skill Damage");
        row.check = Some("flags.x = 1".into()); // assignment, illegal
        let raw = RawPlan {
            details: vec![row],
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.details[0].check, None);

        let bad_formula = RawDetail {
            title: Some("Custom".into()),
            kind: Some("damage".into()),
            formula: Some("dmg(tables.skill[\"Skill Damage\"], \"pyro\", { hitMode: \"avg\" })".into()),
            ..RawDetail::default()
        };
        let raw = RawPlan {
            details: vec![bad_formula],
            ..RawPlan::default()
        };
        let err = validate(&request(), raw).unwrap_err();
        match err {
            ForgeError::IllegalExpression { reason, .. } => {
                assert!(reason.contains("string literal"), "{reason}");
            }
            other => panic!("expected IllegalExpression, got {other:?}"),
        }
    }

    #[test]
    fn custom_formula_must_reference_a_registry_table() {
        let row = RawDetail {
            title: Some("Custom".into()),
            kind: Some("damage".into()),
            formula: Some("total(stat.atk) * 2".into()),
            ..RawDetail::default()
        };
        let raw = RawPlan {
            details: vec![row],
            ..RawPlan::default()
        };
        assert!(matches!(
            validate(&request(), raw),
            Err(ForgeError::IllegalExpression { .. })
        ));
    }

    #[test]
    fn modifier_keys_outside_whitelist_are_dropped_individually() {
        let mut values = IndexMap::new();
        values.insert("atk_pct".to_string(), serde_json::json!(20.0));
        values.insert("win_rate".to_string(), serde_json::json!(99.0));
        values.insert(
            "dmg_bonus".to_string(),
            serde_json::json!("pct(tables.burst[\"Burst Damage\"])"),
        );
        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Skill Damage")],
            modifiers: vec![RawModifier {
                title: Some("Buff".into()),
                values,
                ..RawModifier::default()
            }],
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        let row = &plan.modifiers[0];
        assert_eq!(row.values.len(), 2);
        assert!(row.values.contains_key("atk_pct"));
        assert!(!row.values.contains_key("win_rate"));
    }

    #[test]
    fn default_key_survives_only_when_it_matches_a_row() {
        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Skill Damage")],
            default_key: Some("burst".into()),
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.default_key, None);

        let raw = RawPlan {
            details: vec![detail("damage", "skill", "Skill Damage")],
            default_key: Some("skill".into()),
            ..RawPlan::default()
        };
        let plan = validate(&request(), raw).unwrap();
        assert_eq!(plan.default_key.as_deref(), Some("skill"));
    }
}
