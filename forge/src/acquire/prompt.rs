//! Prompt assembly for plan generation.

use std::fmt::Write;

use itertools::Itertools;

use crate::plan::{OutputMode, PlanRequest};
use crate::registry::{TableSample, UnitHint};

/// Builds the full generation prompt. `correction` carries the hint derived
/// from the previous attempt's rejection, if any.
pub fn build_prompt(req: &PlanRequest, correction: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are producing a damage-calculation plan for the game character \
         `{}` (element: {}).",
        req.name, req.element
    );
    out.push('\n');
    out.push_str("Available scaling tables, by slot:\n");
    for slot in req.registry.slots() {
        let _ = writeln!(out, "  {}:", slot.as_str());
        for (name, entry) in req.registry.tables(slot) {
            let _ = writeln!(
                out,
                "    - \"{}\" = {}{}",
                name,
                sample_preview(&entry.sample),
                unit_note(entry.unit)
            );
        }
    }
    if !req.hints.is_empty() {
        out.push('\n');
        out.push_str("Skill descriptions:\n");
        for hint in &req.hints {
            let _ = writeln!(out, "  {hint}");
        }
    }
    out.push('\n');
    out.push_str(OUTPUT_CONTRACT);
    let _ = writeln!(
        out,
        "Allowed modifier keys: {}.",
        req.mode.whitelist().join(", ")
    );
    if req.mode == OutputMode::Compat {
        out.push_str("Use only the compat key vocabulary above.\n");
    }
    if let Some(hint) = correction {
        out.push('\n');
        let _ = writeln!(out, "{hint}");
    }
    out
}

const OUTPUT_CONTRACT: &str = "\
Reply with exactly one JSON object and nothing else, shaped as:
{
  \"details\": [{ \"title\", \"kind\", \"slot\", \"table\", \"key\"?, \"element\"?,
                \"reaction\"?, \"scale\"?, \"index\"?, \"formula\"?, \"states\"?,
                \"check\"?, \"tier\"? }],
  \"modifiers\": [{ \"title\", \"check\"?, \"tier\"?, \"values\": { key: number or expression } }],
  \"main_stats\": \"comma,separated,stats\",
  \"default_key\"?: \"key\"
}
`kind` is one of plain_damage, heal, shield, reaction. Table rows name a slot
and a table from the inventory verbatim. Custom formulas may only use
tables.<slot>[\"Name\"], total(stat.<field>), pct(x), flags.<name>, dmg(x,
element[, reaction]), min/max/floor/abs, arithmetic, and comparisons.
";

fn sample_preview(sample: &TableSample) -> String {
    match sample {
        TableSample::Scalar(v) => format!("{v}"),
        TableSample::Array(vs) => {
            format!("[{}]", vs.iter().map(|v| format!("{v}")).join(", "))
        }
        TableSample::Text(t) => format!("\"{t}\""),
    }
}

fn unit_note(unit: Option<UnitHint>) -> &'static str {
    match unit {
        Some(UnitHint::PctAtk) => " (% of ATK)",
        Some(UnitHint::PctHp) => " (% of Max HP)",
        Some(UnitHint::PctDef) => " (% of DEF)",
        Some(UnitHint::PctEm) => " (% of Elemental Mastery)",
        Some(UnitHint::Flat) => " (flat value)",
        Some(UnitHint::Modifier) => " (party/self buff value)",
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Slot, TableRegistry};

    #[test]
    fn prompt_lists_tables_and_appends_correction() {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
        let mut req = PlanRequest::new("Tester", "pyro", registry);
        req.hints.push("Deals Pyro damage in a line.".to_string());

        let base = build_prompt(&req, None);
        assert!(base.contains("\"Skill Damage\""));
        assert!(base.contains("Deals Pyro damage"));
        assert!(!base.contains("rejected"));

        let retry = build_prompt(&req, Some("The previous plan was rejected: bad."));
        assert!(retry.contains("rejected: bad"));
    }
}
