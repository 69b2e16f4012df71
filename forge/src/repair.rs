//! Canonicalization/Repair Engine.
//!
//! A library of independent, narrowly-scoped rewrite passes, each gated so
//! it only fires when its precondition is unambiguous from the registry and
//! plan shape alone, never from free-text guessing of intent. The catalogue
//! grows as new generator failure modes are observed; every pass is
//! unit-testable in isolation against a synthetic plan fixture.
//!
//! Passes that do not commute are sequenced explicitly in [`repair`]:
//! folding modifier tables must run before dead-flag pruning (it introduces
//! the flags the pruner must consider live), and double-count dropping must
//! run after folding (a folded table is no longer consumed by a detail row).

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::plan::{
    is_multiplier_key, DetailKind, ModValue, ModifierRow, Plan, PlanRequest, StateValue,
};
use crate::registry::{ArrayShape, Slot, UnitHint};

/// State threaded functionally through the passes instead of loose global
/// flags: what the plan currently sets and consumes, plus the flags the
/// folding pass introduced during this run.
#[derive(Debug, Default)]
pub struct RepairContext {
    /// Flags set by some detail row's default-state map.
    pub set_flags: BTreeSet<String>,
    /// Tables consumed directly by a detail row (by name or by formula).
    pub consumed: BTreeSet<(Slot, String)>,
    /// Flags introduced by `fold_modifier_tables` that still need a setter.
    pub pending_flags: Vec<String>,
}

impl RepairContext {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut ctx = RepairContext::default();
        for row in &plan.details {
            for flag in row.states.keys() {
                ctx.set_flags.insert(flag.clone());
            }
            if let (Some(slot), Some(table)) = (row.slot, row.table.as_ref()) {
                ctx.consumed.insert((slot, table.clone()));
            }
            if let Some(formula) = &row.formula {
                for r in fexpr::table_refs(formula).unwrap_or_default() {
                    if let Some(slot) = Slot::parse(&r.slot) {
                        ctx.consumed.insert((slot, r.table));
                    }
                }
            }
        }
        ctx
    }
}

/// Which passes fired, for logging and the idempotence tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub fired: Vec<&'static str>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.fired.is_empty()
    }
}

/// Runs the full pass catalogue over a validated plan.
pub fn repair(req: &PlanRequest, mut plan: Plan) -> (Plan, RepairReport) {
    let mut ctx = RepairContext::from_plan(&plan);
    let mut report = RepairReport::default();

    let passes: &[(&'static str, fn(&PlanRequest, &mut Plan, &mut RepairContext) -> bool)] = &[
        ("fold_modifier_tables", fold_modifier_tables),
        ("ensure_state_flag", ensure_state_flag),
        ("multiply_double_hits", multiply_double_hits),
        ("drop_double_counted", drop_double_counted),
        ("rebase_total_multipliers", rebase_total_multipliers),
        ("prune_dead_flags", prune_dead_flags),
    ];
    for (name, pass) in passes {
        if pass(req, &mut plan, &mut ctx) {
            debug!(pass = name, "repair pass fired");
            report.fired.push(name);
        }
    }
    (plan, report)
}

fn flag_slug(table: &str) -> String {
    let mut out = String::with_capacity(table.len());
    let mut last_underscore = false;
    for c in table.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore && !out.is_empty() {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Pass (a): tables whose declared unit marks them as percentage modifiers
/// to an already-computed base must not appear as direct-lookup detail rows.
/// Each such row is removed and folded into a modifier row keyed by a
/// derived bonus key, guarded by a derived state flag.
fn fold_modifier_tables(req: &PlanRequest, plan: &mut Plan, ctx: &mut RepairContext) -> bool {
    let mut folded = Vec::new();
    plan.details.retain(|row| {
        if row.kind == DetailKind::Reaction || row.formula.is_some() {
            return true;
        }
        let (slot, table) = match (row.slot, row.table.as_ref()) {
            (Some(s), Some(t)) => (s, t),
            _ => return true,
        };
        let is_modifier_table = req
            .registry
            .entry(slot, table)
            .map(|e| e.unit == Some(UnitHint::Modifier))
            .unwrap_or(false);
        if !is_modifier_table {
            return true;
        }
        warn!(row = %row.title, table = %table, "folding modifier-unit table out of detail rows");
        folded.push((row.title.clone(), slot, table.clone(), row.tier));
        ctx.consumed.remove(&(slot, table.clone()));
        false
    });
    if folded.is_empty() {
        return false;
    }
    for (title, slot, table, tier) in folded {
        let flag = flag_slug(&table);
        let key = derived_bonus_key(req);
        let check = format!("flags.{flag}");
        let already = plan
            .modifiers
            .iter()
            .any(|m| m.check.as_deref() == Some(check.as_str()));
        if already {
            continue;
        }
        let mut values = IndexMap::new();
        values.insert(
            key.to_string(),
            ModValue::Expr(format!("tables.{}[\"{}\"]", slot.as_str(), table)),
        );
        plan.modifiers.push(ModifierRow {
            title,
            weight: None,
            tier,
            check: Some(check),
            values,
            rebased: BTreeSet::new(),
        });
        ctx.pending_flags.push(flag);
    }
    true
}

fn derived_bonus_key(req: &PlanRequest) -> &'static str {
    let elem_key: Option<&'static str> = match req.element.as_str() {
        "pyro" => Some("pyro_dmg_bonus"),
        "hydro" => Some("hydro_dmg_bonus"),
        "electro" => Some("electro_dmg_bonus"),
        "cryo" => Some("cryo_dmg_bonus"),
        "anemo" => Some("anemo_dmg_bonus"),
        "geo" => Some("geo_dmg_bonus"),
        "dendro" => Some("dendro_dmg_bonus"),
        "physical" => Some("physical_dmg_bonus"),
        _ => None,
    };
    match elem_key {
        Some(k) if req.mode.allows_key(k) => k,
        _ => "dmg_bonus",
    }
}

/// Companion to pass (a): every flag introduced by folding must be set by at
/// least one detail row, otherwise the new modifier would be dead on
/// arrival.
fn ensure_state_flag(_req: &PlanRequest, plan: &mut Plan, ctx: &mut RepairContext) -> bool {
    let mut changed = false;
    for flag in std::mem::take(&mut ctx.pending_flags) {
        if ctx.set_flags.contains(&flag) {
            continue;
        }
        let target = plan
            .details
            .iter_mut()
            .find(|r| r.kind != DetailKind::Reaction);
        if let Some(row) = target {
            debug!(row = %row.title, %flag, "setting state flag for folded modifier");
            row.states.insert(flag.clone(), StateValue::Bool(true));
            ctx.set_flags.insert(flag);
            changed = true;
        }
    }
    changed
}

static DOUBLE_HIT_SUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"tables\.([A-Za-z_]+)\["([^"]+)"\]\[0\]\s*\+\s*tables\.([A-Za-z_]+)\["([^"]+)"\]\[1\]"#)
        .unwrap()
});

/// Pass (b): tables whose sample marks them as `value x repeat-count` must
/// be multiplied, not summed. Rewrites the common `[0] + [1]` mistake in
/// custom formulas; table-derived rows get the right shape from rendering.
fn multiply_double_hits(req: &PlanRequest, plan: &mut Plan, _ctx: &mut RepairContext) -> bool {
    let mut changed = false;
    for row in &mut plan.details {
        let formula = match &row.formula {
            Some(f) => f.clone(),
            None => continue,
        };
        let rewritten = DOUBLE_HIT_SUM
            .replace_all(&formula, |caps: &regex::Captures| {
                let whole = caps.get(0).unwrap().as_str().to_string();
                if caps[1] != caps[3] || caps[2] != caps[4] {
                    return whole;
                }
                let slot = match Slot::parse(&caps[1]) {
                    Some(s) => s,
                    None => return whole,
                };
                if req.registry.array_shape(slot, &caps[2], None) != ArrayShape::PctTimesCount {
                    return whole;
                }
                format!(
                    "tables.{}[\"{}\"][0] * tables.{}[\"{}\"][1]",
                    &caps[1], &caps[2], &caps[3], &caps[4]
                )
            })
            .into_owned();
        if rewritten != formula {
            warn!(row = %row.title, "rewriting double-hit sum as multiplication");
            row.formula = Some(rewritten);
            changed = true;
        }
    }
    changed
}

/// Pass (d): a modifier expression that re-derives a base value from a table
/// already consumed by a detail row double-counts it downstream; the key is
/// deleted rather than rewritten.
fn drop_double_counted(_req: &PlanRequest, plan: &mut Plan, ctx: &mut RepairContext) -> bool {
    let mut changed = false;
    for row in &mut plan.modifiers {
        let title = row.title.clone();
        row.values.retain(|key, value| {
            let expr = match value {
                ModValue::Expr(e) => e,
                ModValue::Num(_) => return true,
            };
            let refs = match fexpr::table_refs(expr) {
                Ok(r) if !r.is_empty() => r,
                _ => return true,
            };
            let all_consumed = refs.iter().all(|r| {
                Slot::parse(&r.slot)
                    .map(|slot| ctx.consumed.contains(&(slot, r.table.clone())))
                    .unwrap_or(false)
            });
            if all_consumed {
                warn!(row = %title, %key, "dropping modifier key that re-derives a consumed table");
                changed = true;
                false
            } else {
                true
            }
        });
    }
    plan.modifiers.retain(|m| !m.values.is_empty());
    changed
}

/// Pass (e): proportional-multiplier keys use the delta-from-baseline
/// convention. A raw value in the ambiguous 100-400 band is read as a total
/// percent and rebased to a delta. The delta can itself land back in the
/// band (any total of 200% or more does), so each rebased key is marked on
/// the row and never rebased again.
fn rebase_total_multipliers(_req: &PlanRequest, plan: &mut Plan, _ctx: &mut RepairContext) -> bool {
    let mut changed = false;
    for row in &mut plan.modifiers {
        let ModifierRow {
            title,
            values,
            rebased,
            ..
        } = row;
        for (key, value) in values.iter_mut() {
            if !is_multiplier_key(key) || rebased.contains(key) {
                continue;
            }
            if let ModValue::Num(v) = value {
                if (100.0..=400.0).contains(v) {
                    // Subtraction in f64 can smear the printed value
                    // (137.9 - 100 is 37.900000000000006); round to 4
                    // decimals so the artifact prints what the plan said.
                    let delta = ((*v - 100.0) * 1e4).round() / 1e4;
                    warn!(row = %title, %key, from = *v, to = delta, "rebasing total-percent multiplier to delta");
                    *value = ModValue::Num(delta);
                    rebased.insert(key.clone());
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Pass (c): a guard referencing a state flag no row ever sets can never
/// hold. For a conjunction the offending clause is dropped; for a
/// disjunction partial weakening is unsound, so the whole guard goes.
fn prune_dead_flags(_req: &PlanRequest, plan: &mut Plan, ctx: &mut RepairContext) -> bool {
    let mut changed = false;
    let set_flags = &ctx.set_flags;
    let mut prune = |check: &mut Option<String>, owner: &str| {
        let guard = match check.as_deref() {
            Some(g) => g,
            None => return,
        };
        let vars = match fexpr::free_vars(guard) {
            Ok(v) => v,
            Err(_) => return,
        };
        let dead: Vec<&String> = vars.iter().filter(|v| !set_flags.contains(*v)).collect();
        if dead.is_empty() {
            return;
        }
        if fexpr::split_top_level(guard, "||").len() > 1 {
            warn!(row = %owner, ?dead, "dropping disjunctive guard with dead flag");
            *check = None;
            changed = true;
            return;
        }
        let kept: Vec<String> = fexpr::split_top_level(guard, "&&")
            .into_iter()
            .map(str::trim)
            .filter(|clause| {
                fexpr::free_vars(clause)
                    .map(|vs| vs.iter().all(|v| set_flags.contains(v)))
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();
        warn!(row = %owner, ?dead, "weakening guard with dead flag clauses");
        *check = if kept.is_empty() {
            None
        } else {
            Some(kept.join(" && "))
        };
        changed = true;
    };

    for row in &mut plan.details {
        let title = row.title.clone();
        prune(&mut row.check, &title);
    }
    for row in &mut plan.modifiers {
        let title = row.title.clone();
        prune(&mut row.check, &title);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DetailRow, PlanRequest};
    use crate::registry::{TableRegistry, TableSample};
    use pretty_assertions::assert_eq;

    fn request() -> PlanRequest {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
        registry.insert(
            Slot::Burst,
            "Twin Strike",
            TableSample::Text("92% \u{d7}2".into()),
        );
        registry.insert_with_unit(
            Slot::Passive,
            "Ember Bonus",
            TableSample::Scalar(25.0),
            UnitHint::Modifier,
        );
        PlanRequest::new("Tester", "pyro", registry)
    }

    fn damage_row(title: &str, slot: Slot, table: &str) -> DetailRow {
        DetailRow {
            title: title.to_string(),
            kind: DetailKind::PlainDamage,
            slot: Some(slot),
            table: Some(table.to_string()),
            key: slot.as_str().to_string(),
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

    fn plan_with(details: Vec<DetailRow>, modifiers: Vec<ModifierRow>) -> Plan {
        Plan {
            details,
            modifiers,
            main_stats: "atk".to_string(),
            default_key: None,
        }
    }

    #[test]
    fn folds_modifier_unit_tables_and_sets_the_guard_flag() {
        let plan = plan_with(
            vec![
                damage_row("Skill Hit", Slot::Skill, "Skill Damage"),
                damage_row("Ember", Slot::Passive, "Ember Bonus"),
            ],
            vec![],
        );
        let (repaired, report) = repair(&request(), plan);
        assert!(report.fired.contains(&"fold_modifier_tables"));
        assert!(report.fired.contains(&"ensure_state_flag"));
        assert_eq!(repaired.details.len(), 1);
        let modifier = &repaired.modifiers[0];
        assert_eq!(modifier.check.as_deref(), Some("flags.ember_bonus"));
        assert_eq!(
            modifier.values.get("pyro_dmg_bonus"),
            Some(&ModValue::Expr("tables.passive[\"Ember Bonus\"]".into()))
        );
        assert_eq!(
            repaired.details[0].states.get("ember_bonus"),
            Some(&StateValue::Bool(true))
        );
    }

    #[test]
    fn rewrites_double_hit_sum_to_multiplication() {
        let mut row = damage_row("Twin", Slot::Burst, "Twin Strike");
        row.table = None;
        row.formula = Some(
            "dmg(pct(tables.burst[\"Twin Strike\"][0] + tables.burst[\"Twin Strike\"][1]) * total(stat.atk), \"pyro\")"
                .to_string(),
        );
        let plan = plan_with(vec![row], vec![]);
        let (repaired, report) = repair(&request(), plan);
        assert!(report.fired.contains(&"multiply_double_hits"));
        assert!(repaired.details[0]
            .formula
            .as_deref()
            .unwrap()
            .contains("[0] * tables.burst[\"Twin Strike\"][1]"));
    }

    #[test]
    fn drops_modifier_keys_that_double_count_consumed_tables() {
        let mut values = IndexMap::new();
        values.insert(
            "skill_multi".to_string(),
            ModValue::Expr("tables.skill[\"Skill Damage\"]".into()),
        );
        values.insert("atk_pct".to_string(), ModValue::Num(20.0));
        let plan = plan_with(
            vec![damage_row("Skill Hit", Slot::Skill, "Skill Damage")],
            vec![ModifierRow {
                title: "Sloppy".into(),
                weight: None,
                tier: None,
                check: None,
                values,
                rebased: BTreeSet::new(),
            }],
        );
        let (repaired, report) = repair(&request(), plan);
        assert!(report.fired.contains(&"drop_double_counted"));
        let row = &repaired.modifiers[0];
        assert!(!row.values.contains_key("skill_multi"));
        assert!(row.values.contains_key("atk_pct"));
    }

    #[test]
    fn rebases_total_percent_multiplier_to_delta() {
        let mut values = IndexMap::new();
        values.insert("x_multi".to_string(), ModValue::Num(137.9));
        values.insert("all_multi".to_string(), ModValue::Num(250.0));
        values.insert("crit_rate".to_string(), ModValue::Num(137.9));
        let plan = plan_with(
            vec![damage_row("Skill Hit", Slot::Skill, "Skill Damage")],
            vec![ModifierRow {
                title: "Multi".into(),
                weight: None,
                tier: None,
                check: None,
                values,
                rebased: BTreeSet::new(),
            }],
        );
        let (repaired, report) = repair(&request(), plan);
        assert!(report.fired.contains(&"rebase_total_multipliers"));
        let row = &repaired.modifiers[0];
        // Rounded, so the stored delta is exactly what the convention says.
        assert_eq!(row.values.get("x_multi"), Some(&ModValue::Num(37.9)));
        assert_eq!(row.values.get("all_multi"), Some(&ModValue::Num(150.0)));
        assert!(row.rebased.contains("x_multi"));
        assert!(row.rebased.contains("all_multi"));
        // Non-multiplier keys are untouched.
        assert_eq!(row.values.get("crit_rate"), Some(&ModValue::Num(137.9)));
    }

    #[test]
    fn prunes_dead_flag_clauses_from_conjunctions() {
        let mut setter = damage_row("Skill Hit", Slot::Skill, "Skill Damage");
        setter.states.insert("ready".into(), StateValue::Bool(true));
        let mut guarded = damage_row("Guarded", Slot::Skill, "Skill Damage");
        guarded.check = Some("flags.ready && flags.zzz".to_string());
        let plan = plan_with(vec![setter, guarded], vec![]);
        let (repaired, report) = repair(&request(), plan);
        assert!(report.fired.contains(&"prune_dead_flags"));
        assert_eq!(repaired.details[1].check.as_deref(), Some("flags.ready"));
    }

    #[test]
    fn drops_whole_disjunctive_guard_with_dead_flag() {
        let mut guarded = damage_row("Guarded", Slot::Skill, "Skill Damage");
        guarded.check = Some("flags.ready || flags.zzz".to_string());
        let plan = plan_with(vec![guarded], vec![]);
        let (repaired, _) = repair(&request(), plan);
        assert_eq!(repaired.details[0].check, None);
    }

    #[test]
    fn repair_is_idempotent_on_canonical_plans() {
        let mut values = IndexMap::new();
        values.insert("x_multi".to_string(), ModValue::Num(137.9));
        // A total of 250% rebases to a delta of 150, which sits back inside
        // the trigger band; the marker must stop a second rebase.
        values.insert("all_multi".to_string(), ModValue::Num(250.0));
        let mut guarded = damage_row("Guarded", Slot::Skill, "Skill Damage");
        guarded.check = Some("flags.ready && flags.zzz".to_string());
        guarded.states.insert("ready".into(), StateValue::Bool(true));
        let plan = plan_with(
            vec![
                guarded,
                damage_row("Ember", Slot::Passive, "Ember Bonus"),
            ],
            vec![ModifierRow {
                title: "Multi".into(),
                weight: None,
                tier: None,
                check: None,
                values,
                rebased: BTreeSet::new(),
            }],
        );
        let (once, first) = repair(&request(), plan);
        assert!(!first.is_clean());
        assert_eq!(
            once.modifiers[0].values.get("all_multi"),
            Some(&ModValue::Num(150.0))
        );
        let (twice, second) = repair(&request(), once.clone());
        assert!(second.is_clean(), "second run fired {:?}", second.fired);
        assert_eq!(once, twice);
    }
}
