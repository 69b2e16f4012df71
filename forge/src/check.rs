//! Sandboxed Runtime Checker.
//!
//! Two fail-closed phases over the rendered artifact: a syntax phase that
//! parses the text in a context with no ambient capabilities, and a semantic
//! phase that evaluates every detail and buff closure against synthetic
//! stand-ins at two magnitudes. Running at two magnitudes catches the two
//! opposite unit bugs: a missing normalization factor explodes at the large
//! magnitude, and a wrongly-subtracted baseline collapses toward a large
//! negative number at the small one. The stand-ins are plain maps with
//! default-valued lookup, so no proxy machinery is involved.

use std::collections::HashMap;
use std::rc::Rc;

use fexpr::{eval_module, Interpreter, Module, Scope, Value};
use tracing::debug;

use crate::error::ForgeError;
use crate::plan::{is_crit_rate_key, is_percent_key, PlanRequest};
use crate::registry::Slot;

/// Absolute ceiling on any numeric result; generous on purpose.
const MAX_ABS_RESULT: f64 = 1e9;
/// Detail results more negative than this signal a subtracted baseline.
const MIN_RESULT: f64 = -1e3;
/// Magnitude scales for the semantic phase.
const MAGNITUDES: [f64; 2] = [1000.0, 25.0];

pub fn runtime_check(req: &PlanRequest, artifact: &str) -> Result<(), ForgeError> {
    // Phase 1: the artifact must load cleanly.
    let module = fexpr::parse_module(artifact)
        .map_err(|e| ForgeError::RuntimeCheck(format!("syntax phase: {e}")))?;
    for required in ["details", "buffs", "default_target", "main_stats"] {
        if module.get(required).is_none() {
            return Err(ForgeError::RuntimeCheck(format!(
                "artifact is missing the `{required}` binding"
            )));
        }
    }

    // Phase 2: evaluate everything at both magnitudes.
    for scale in MAGNITUDES {
        check_at_magnitude(req, &module, scale)?;
    }
    Ok(())
}

fn check_at_magnitude(req: &PlanRequest, module: &Module, scale: f64) -> Result<(), ForgeError> {
    debug!(scale, "runtime check semantic phase");
    let mut interp = Interpreter::new(1.0);
    let scope = Scope::root();
    let bindings = eval_module(module, &mut interp, &scope)
        .map_err(|e| ForgeError::RuntimeCheck(format!("semantic phase at scale {scale}: {e}")))?;
    let get = |name: &str| {
        bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };

    let args = context_args(req, scale);

    if let Some(Value::List(details)) = get("details") {
        for entry in details.iter() {
            check_detail_entry(&mut interp, entry, &args, scale)?;
        }
    }
    if let Some(Value::List(buffs)) = get("buffs") {
        for entry in buffs.iter() {
            check_buff_entry(&mut interp, entry, &args, scale)?;
        }
    }
    Ok(())
}

fn check_detail_entry(
    interp: &mut Interpreter,
    entry: &Value,
    args: &[Value],
    scale: f64,
) -> Result<(), ForgeError> {
    let map = match entry {
        Value::Map(m) => m,
        _ => return Err(ForgeError::RuntimeCheck("detail entry is not an object".into())),
    };
    let title = entry_title(map);
    if let Some(when) = map.get("when") {
        let guard = interp
            .call(when, args)
            .map_err(|e| ForgeError::RuntimeCheck(format!("guard of `{title}`: {e}")))?;
        if !matches!(guard, Value::Bool(_) | Value::Num(_)) {
            return Err(ForgeError::RuntimeCheck(format!(
                "guard of `{title}` returned a non-boolean value"
            )));
        }
    }
    let formula = map
        .get("formula")
        .ok_or_else(|| ForgeError::RuntimeCheck(format!("detail `{title}` has no formula")))?;
    let result = interp
        .call(formula, args)
        .map_err(|e| ForgeError::RuntimeCheck(format!("formula of `{title}`: {e}")))?;
    let n = numeric_result(&result, &title)?;
    bound_result(n, &title, scale)
}

fn check_buff_entry(
    interp: &mut Interpreter,
    entry: &Value,
    args: &[Value],
    scale: f64,
) -> Result<(), ForgeError> {
    let map = match entry {
        Value::Map(m) => m,
        _ => return Err(ForgeError::RuntimeCheck("buff entry is not an object".into())),
    };
    let title = entry_title(map);
    if let Some(when) = map.get("when") {
        interp
            .call(when, args)
            .map_err(|e| ForgeError::RuntimeCheck(format!("guard of `{title}`: {e}")))?;
    }
    let values = match map.get("values") {
        Some(Value::Map(m)) => Rc::clone(m),
        _ => {
            return Err(ForgeError::RuntimeCheck(format!(
                "buff `{title}` has no values map"
            )))
        }
    };
    for (key, value) in values.iter() {
        let n = match value {
            Value::Num(n) => *n,
            Value::Closure(_) | Value::Builtin(_) => {
                let out = interp.call(value, args).map_err(|e| {
                    ForgeError::RuntimeCheck(format!("value `{key}` of `{title}`: {e}"))
                })?;
                numeric_result(&out, &format!("{title}.{key}"))?
            }
            other => {
                return Err(ForgeError::RuntimeCheck(format!(
                    "value `{key}` of `{title}` is not numeric: {other:?}"
                )))
            }
        };
        if !n.is_finite() {
            return Err(ForgeError::RuntimeCheck(format!(
                "value `{key}` of `{title}` is not finite at scale {scale}"
            )));
        }
        if is_crit_rate_key(key) && !(-100.0..=400.0).contains(&n) {
            return Err(ForgeError::RuntimeCheck(format!(
                "crit-rate key `{key}` of `{title}` is implausible: {n}"
            )));
        }
        if is_percent_key(key) && !(-100.0..=10_000.0).contains(&n) {
            return Err(ForgeError::RuntimeCheck(format!(
                "percentage key `{key}` of `{title}` is implausible: {n}"
            )));
        }
    }
    Ok(())
}

fn entry_title(map: &Rc<HashMap<String, Value>>) -> String {
    match map.get("title") {
        Some(Value::Str(s)) => s.clone(),
        _ => "<untitled>".to_string(),
    }
}

fn numeric_result(value: &Value, title: &str) -> Result<f64, ForgeError> {
    match value {
        Value::Num(n) => Ok(*n),
        // A boolean out of a value closure is a strong signal of type
        // confusion in a generator-authored expression.
        Value::Bool(true) => Err(ForgeError::RuntimeCheck(format!(
            "`{title}` returned boolean true instead of a number"
        ))),
        other => Err(ForgeError::RuntimeCheck(format!(
            "`{title}` returned a non-numeric value: {other:?}"
        ))),
    }
}

fn bound_result(n: f64, title: &str, scale: f64) -> Result<(), ForgeError> {
    if !n.is_finite() {
        return Err(ForgeError::RuntimeCheck(format!(
            "`{title}` is not finite at scale {scale}"
        )));
    }
    if n.abs() > MAX_ABS_RESULT {
        return Err(ForgeError::RuntimeCheck(format!(
            "`{title}` explodes at scale {scale}: {n}"
        )));
    }
    if n < MIN_RESULT {
        return Err(ForgeError::RuntimeCheck(format!(
            "`{title}` collapses negative at scale {scale}: {n}"
        )));
    }
    Ok(())
}

/// The synthetic positional context `(tables, stat, pct, flags, tier, env,
/// meta)`, built from plain data at the given magnitude.
fn context_args(req: &PlanRequest, scale: f64) -> Vec<Value> {
    let mut tables = HashMap::new();
    for slot in Slot::ALL {
        let mut slot_map = HashMap::new();
        for (name, _) in req.registry.tables(slot) {
            let nums = req.registry.numeric_sample(slot, name);
            let value = if nums.len() == 1 {
                Value::Num(nums[0])
            } else {
                Value::List(Rc::new(nums.into_iter().map(Value::Num).collect()))
            };
            slot_map.insert(name.clone(), value);
        }
        tables.insert(slot.as_str().to_string(), Value::Map(Rc::new(slot_map)));
    }

    let stat: HashMap<String, Value> = [
        ("atk", scale),
        ("hp", scale * 20.0),
        ("def", scale),
        ("em", scale / 5.0),
        ("crit_rate", 5.0),
        ("crit_dmg", 50.0),
        ("energy_recharge", 100.0),
        ("heal_bonus", 0.0),
        ("shield_strength", 0.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), Value::Num(v)))
    .collect();

    vec![
        Value::Map(Rc::new(tables)),
        Value::Map(Rc::new(stat)),
        Value::Builtin("pct"),
        // Representative flag/count values come from the default-valued
        // lookup: every flag reads as 1.
        Value::Map(Rc::new(HashMap::new())),
        Value::Num(6.0),
        Value::Map(Rc::new(HashMap::new())),
        Value::Map(Rc::new(HashMap::new())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TableRegistry, TableSample};

    fn request() -> PlanRequest {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
        PlanRequest::new("Tester", "pyro", registry)
    }

    fn artifact(formula: &str) -> String {
        format!(
            "details = [{{ title: \"Row\", key: \"skill\", formula: (tables, stat, pct, flags, tier, env, meta) => {formula} }}]\n\
             buffs = []\n\
             default_target = {{ key: \"skill\", index: 0 }}\n\
             main_stats = \"atk\"\n"
        )
    }

    #[test]
    fn accepts_a_plausible_artifact() {
        let text = artifact("dmg(pct(tables.skill[\"Skill Damage\"]) * total(stat.atk), \"pyro\")");
        runtime_check(&request(), &text).unwrap();
    }

    #[test]
    fn syntax_phase_rejects_malformed_text() {
        let err = runtime_check(&request(), "details = [").unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("syntax phase")));
    }

    #[test]
    fn missing_bindings_fail_closed() {
        let err = runtime_check(&request(), "details = []").unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("buffs")));
    }

    #[test]
    fn unrecognized_element_fails() {
        let text = artifact("dmg(100, \"plasma\")");
        let err = runtime_check(&request(), &text).unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("plasma")));
    }

    #[test]
    fn missing_normalization_explodes_at_large_magnitude() {
        let text = artifact(
            "tables.skill[\"Skill Damage\"] * total(stat.atk) * total(stat.hp)",
        );
        let err = runtime_check(&request(), &text).unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("explodes")));
    }

    #[test]
    fn subtracted_baseline_collapses_at_small_magnitude() {
        let text = artifact("pct(tables.skill[\"Skill Damage\"]) * (total(stat.atk) - 900)");
        let err = runtime_check(&request(), &text).unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("collapses")));
    }

    #[test]
    fn boolean_result_from_value_closure_fails() {
        let text = artifact("flags.ready == true");
        let err = runtime_check(&request(), &text).unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("boolean")));
    }

    #[test]
    fn implausible_buff_percentages_fail() {
        let text = "details = [{ title: \"Row\", key: \"skill\", formula: (tables, stat, pct, flags, tier, env, meta) => 1 }]\n\
                    buffs = [{ title: \"B\", values: { crit_rate: 500 } }]\n\
                    default_target = { key: \"skill\", index: 0 }\n\
                    main_stats = \"atk\"\n";
        let err = runtime_check(&request(), text).unwrap_err();
        assert!(matches!(err, ForgeError::RuntimeCheck(m) if m.contains("crit-rate")));
    }
}
