//! Code Renderer.
//!
//! Lowers a validated, canonicalized plan to artifact text. Pure and total:
//! rendering the same plan twice yields byte-identical text, and no semantic
//! validation happens here, since the upstream pipeline already guarantees
//! every reference resolves.

use std::fmt::Write;

use indexmap::IndexMap;

use crate::plan::{reaction_element, DetailKind, DetailRow, ModValue, Plan, PlanRequest, StateValue};
use crate::registry::{ArrayShape, ScalingBase, Slot, TableSample};

/// The fixed positional context every closure receives.
const CTX_PARAMS: &str = "(tables, stat, pct, flags, tier, env, meta)";

pub fn render(req: &PlanRequest, plan: &Plan) -> String {
    let mut out = String::new();
    render_details(req, plan, &mut out);
    render_buffs(plan, &mut out);
    render_default_target(plan, &mut out);
    let _ = writeln!(out, "main_stats = \"{}\"", sanitize(&plan.main_stats));
    render_default_flags(plan, &mut out);
    out
}

fn render_details(req: &PlanRequest, plan: &Plan, out: &mut String) {
    let _ = writeln!(out, "details = [");
    for row in &plan.details {
        let _ = writeln!(out, "  {{");
        let _ = writeln!(out, "    title: \"{}\",", sanitize(&row.title));
        if let Some(slot) = row.slot {
            let _ = writeln!(out, "    slot: \"{}\",", slot.as_str());
        }
        let _ = writeln!(out, "    key: \"{}\",", sanitize(&row.key));
        if let Some(tier) = row.tier {
            let _ = writeln!(out, "    tier: {tier},");
        }
        if !row.states.is_empty() {
            let _ = writeln!(out, "    states: {},", state_map(&row.states));
        }
        if let Some(check) = &row.check {
            let _ = writeln!(out, "    when: {CTX_PARAMS} => {check},");
        }
        let _ = writeln!(out, "    formula: {CTX_PARAMS} => {},", formula_body(req, row));
        let _ = writeln!(out, "  }},");
    }
    let _ = writeln!(out, "]");
}

fn render_buffs(plan: &Plan, out: &mut String) {
    let _ = writeln!(out, "buffs = [");
    for row in &plan.modifiers {
        let _ = writeln!(out, "  {{");
        let _ = writeln!(out, "    title: \"{}\",", sanitize(&row.title));
        if let Some(weight) = row.weight {
            let _ = writeln!(out, "    weight: {weight},");
        }
        if let Some(tier) = row.tier {
            let _ = writeln!(out, "    tier: {tier},");
        }
        if let Some(check) = &row.check {
            let _ = writeln!(out, "    when: {CTX_PARAMS} => {check},");
        }
        let _ = writeln!(out, "    values: {{");
        for (key, value) in &row.values {
            match value {
                ModValue::Num(v) => {
                    let _ = writeln!(out, "      {key}: {},", fmt_num(*v));
                }
                ModValue::Expr(e) => {
                    let _ = writeln!(out, "      {key}: {CTX_PARAMS} => {e},");
                }
            }
        }
        let _ = writeln!(out, "    }},");
        let _ = writeln!(out, "  }},");
    }
    let _ = writeln!(out, "]");
}

fn render_default_target(plan: &Plan, out: &mut String) {
    let key = plan
        .default_key
        .clone()
        .or_else(|| plan.details.first().map(|d| d.key.clone()))
        .unwrap_or_default();
    let index = plan
        .details
        .iter()
        .position(|d| d.key == key)
        .unwrap_or(0);
    let _ = writeln!(
        out,
        "default_target = {{ key: \"{}\", index: {} }}",
        sanitize(&key),
        index
    );
}

fn render_default_flags(plan: &Plan, out: &mut String) {
    let mut merged: IndexMap<&str, &StateValue> = IndexMap::new();
    for row in &plan.details {
        for (flag, value) in &row.states {
            merged.entry(flag.as_str()).or_insert(value);
        }
    }
    if merged.is_empty() {
        return;
    }
    let _ = write!(out, "default_flags = {{ ");
    for (i, (flag, value)) in merged.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, ", ");
        }
        let _ = write!(out, "{flag}: {}", state_value(value));
    }
    let _ = writeln!(out, " }}");
}

fn state_map(states: &IndexMap<String, StateValue>) -> String {
    let mut parts = Vec::with_capacity(states.len());
    for (flag, value) in states {
        parts.push(format!("{flag}: {}", state_value(value)));
    }
    format!("{{ {} }}", parts.join(", "))
}

fn state_value(value: &StateValue) -> String {
    match value {
        StateValue::Bool(b) => b.to_string(),
        StateValue::Num(v) => fmt_num(*v),
    }
}

/// Numeric formatting for the artifact; `f64` Display is shortest-roundtrip
/// and therefore deterministic.
fn fmt_num(v: f64) -> String {
    format!("{v}")
}

/// Strings in the artifact notation have no escape sequences, so quotes are
/// replaced rather than escaped.
fn sanitize(s: &str) -> String {
    s.replace(['"', '\\', '\n'], "'")
}

fn lookup(slot: Slot, table: &str) -> String {
    format!("tables.{}[\"{}\"]", slot.as_str(), sanitize(table))
}

fn scaled(lookup: &str, base: ScalingBase) -> String {
    format!("pct({lookup}) * total(stat.{})", base.stat_field())
}

fn formula_body(req: &PlanRequest, row: &DetailRow) -> String {
    if let Some(formula) = &row.formula {
        return formula.clone();
    }
    if row.kind == DetailKind::Reaction {
        let reaction = row.reaction.as_deref().unwrap_or("swirl");
        return format!(
            "dmg(total(stat.em), \"{}\", \"{}\")",
            reaction_element(reaction),
            reaction
        );
    }

    // Validation guarantees slot and table for non-reaction, non-formula rows.
    let (slot, table) = match (row.slot, row.table.as_deref()) {
        (Some(s), Some(t)) => (s, t),
        _ => return "0".to_string(),
    };
    let entry = req.registry.entry(slot, table);
    let is_flat = entry
        .map(|e| e.unit == Some(crate::registry::UnitHint::Flat))
        .unwrap_or(false);
    let base = row.scale.unwrap_or_else(|| {
        req.registry
            .scaling_base(slot, table, req.primary_stat, &req.hints)
    });
    let at = lookup(slot, table);

    let body = match entry.map(|e| &e.sample) {
        Some(TableSample::Scalar(_)) | None => {
            if is_flat {
                at
            } else {
                scaled(&at, base)
            }
        }
        Some(TableSample::Array(_)) | Some(TableSample::Text(_)) => {
            let shape = req.registry.array_shape(slot, table, row.index);
            let len = req.registry.numeric_sample(slot, table).len().max(1);
            match shape {
                ArrayShape::IndexedPick => {
                    let i = row.index.unwrap_or(0);
                    scaled(&format!("{at}[{i}]"), base)
                }
                ArrayShape::MultiHitSum => {
                    let terms: Vec<String> = (0..len).map(|i| format!("{at}[{i}]")).collect();
                    scaled(&terms.join(" + "), base)
                }
                ArrayShape::StatFlatPair => {
                    format!("{} + {at}[1]", scaled(&format!("{at}[0]"), base))
                }
                ArrayShape::StatStatPair => {
                    let secondary = if base == ScalingBase::Em {
                        ScalingBase::Atk
                    } else {
                        ScalingBase::Em
                    };
                    format!(
                        "{} + {}",
                        scaled(&format!("{at}[0]"), base),
                        scaled(&format!("{at}[1]"), secondary)
                    )
                }
                ArrayShape::PctTimesCount => {
                    format!("pct({at}[0]) * {at}[1] * total(stat.{})", base.stat_field())
                }
            }
        }
    };

    match row.kind {
        DetailKind::PlainDamage => {
            let element = row
                .element
                .clone()
                .unwrap_or_else(|| match slot {
                    Slot::Normal => "physical".to_string(),
                    _ => req.element.clone(),
                });
            format!("dmg({body}, \"{element}\")")
        }
        DetailKind::Heal | DetailKind::Shield => body,
        DetailKind::Reaction => unreachable!("handled above"),
    }
}
