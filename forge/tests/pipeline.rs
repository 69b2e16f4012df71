//! End-to-end pipeline tests: generator reply in, checked artifact out.

use forge::acquire::{acquire, AcquireConfig, NoCache, StubGenerator};
use forge::registry::{Slot, TableRegistry, TableSample, UnitHint};
use forge::{runtime_check, ForgeError, OutputMode, PlanRequest};
use regex::Regex;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn request() -> PlanRequest {
    let mut registry = TableRegistry::new();
    registry.insert(Slot::Normal, "Gale Slash", TableSample::Array(vec![45.0, 48.0, 61.0]));
    registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
    registry.insert(Slot::Burst, "Twin Strike", TableSample::Array(vec![92.0, 2.0]));
    registry.insert(Slot::Burst, "Healing", TableSample::Scalar(8.0));
    registry.insert_with_unit(
        Slot::Passive,
        "Ember Bonus",
        TableSample::Scalar(25.0),
        UnitHint::Modifier,
    );
    PlanRequest::new("Tester", "pyro", registry)
}

const MESSY_REPLY: &str = r#"Sure! Here is the plan you asked for:
```json
{
  "details": [
    { "title": "Skill Hit", "kind": "damage", "slot": "skill", "table": "Skill Damage" },
    { "title": "Twin Strike", "kind": "damage", "slot": "burst", "table": "Twin Strike" },
    { "title": "Ember", "kind": "damage", "slot": "passive", "table": "Ember Bonus" }
  ],
  "modifiers": [
    {
      "title": "Burst Stance",
      "check": "flags.burst_mode && flags.ember_bonus",
      "values": { "x_multi": 137.9, "atk_pct": 20 }
    }
  ],
  "main_stats": "atk,crit_rate,crit_dmg",
  "default_key": "burst"
}
```"#;

#[tokio::test]
async fn messy_generated_plan_becomes_a_checked_artifact() {
    init_tracing();
    let req = request();
    let generator = StubGenerator::new([MESSY_REPLY]);
    let outcome = acquire(&req, &generator, &NoCache, &AcquireConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert!(!outcome.from_fallback);

    // The modifier-unit table was folded out of the detail rows into a
    // guarded buff, and a detail row now sets its flag.
    assert_eq!(outcome.plan.details.len(), 2);
    assert!(outcome.artifact.contains("flags.ember_bonus"));
    assert!(outcome.artifact.contains("pyro_dmg_bonus"));
    assert!(outcome.artifact.contains("ember_bonus: true"));

    // The total-percent multiplier was rebased to a delta.
    assert!(outcome.artifact.contains("x_multi: 37.9"));
    assert!(!outcome.artifact.contains("137.9"));

    // Nothing ever sets burst_mode, so that clause is gone while the live
    // one survives.
    assert!(!outcome.artifact.contains("burst_mode"));

    // The two-element [value, count] table renders as a multiplication.
    assert!(outcome
        .artifact
        .contains("pct(tables.burst[\"Twin Strike\"][0]) * tables.burst[\"Twin Strike\"][1]"));

    fexpr::parse_module(&outcome.artifact).unwrap();
    runtime_check(&req, &outcome.artifact).unwrap();
}

#[tokio::test]
async fn heuristic_fallback_covers_every_table_shape() {
    init_tracing();
    let req = request();
    let generator = StubGenerator::new(["nope", "still nope", "nope again"]);
    let outcome = acquire(&req, &generator, &NoCache, &AcquireConfig::default())
        .await
        .unwrap();

    assert!(outcome.from_fallback);
    assert!(!outcome.soft_errors.is_empty());

    // Name matching picked up the damage and heal tables but not the
    // modifier-unit one.
    assert!(outcome.artifact.contains("Gale Slash"));
    assert!(outcome.artifact.contains("Skill Damage"));
    assert!(outcome.artifact.contains("Healing"));
    assert!(!outcome.artifact.contains("Ember Bonus"));

    // Three-hit arrays sum, [value, count] pairs multiply.
    assert!(outcome.artifact.contains(
        "tables.normal[\"Gale Slash\"][0] + tables.normal[\"Gale Slash\"][1] + tables.normal[\"Gale Slash\"][2]"
    ));
    assert!(outcome
        .artifact
        .contains("pct(tables.burst[\"Twin Strike\"][0]) * tables.burst[\"Twin Strike\"][1]"));

    fexpr::parse_module(&outcome.artifact).unwrap();
    runtime_check(&req, &outcome.artifact).unwrap();
}

#[tokio::test]
async fn artifact_table_references_all_resolve() {
    init_tracing();
    let req = request();
    let generator = StubGenerator::new([MESSY_REPLY]);
    let outcome = acquire(&req, &generator, &NoCache, &AcquireConfig::default())
        .await
        .unwrap();

    let table_ref = Regex::new(r#"tables\.([a-z]+)\["([^"]+)"\]"#).unwrap();
    let mut seen = 0;
    for caps in table_ref.captures_iter(&outcome.artifact) {
        let slot = Slot::parse(&caps[1]).unwrap();
        assert!(
            req.registry.has(slot, &caps[2]),
            "dangling reference to {}/{}",
            &caps[1],
            &caps[2]
        );
        seen += 1;
    }
    assert!(seen >= 3);
}

#[tokio::test]
async fn compat_mode_narrows_the_modifier_vocabulary() {
    init_tracing();
    let mut req = request();
    req.mode = OutputMode::Compat;
    let generator = StubGenerator::new([MESSY_REPLY]);
    let outcome = acquire(&req, &generator, &NoCache, &AcquireConfig::default())
        .await
        .unwrap();

    // x_multi is showcase-only; the folded bonus falls back to the generic
    // key because element-specific bonuses are not in the compat whitelist.
    assert!(!outcome.artifact.contains("x_multi"));
    assert!(outcome.artifact.contains("atk_pct: 20"));
    assert!(!outcome.artifact.contains("pyro_dmg_bonus"));
    assert!(outcome.artifact.contains("dmg_bonus"));
}

#[tokio::test]
async fn tampered_artifact_fails_the_runtime_check() {
    init_tracing();
    let req = request();
    let generator = StubGenerator::new([MESSY_REPLY]);
    let outcome = acquire(&req, &generator, &NoCache, &AcquireConfig::default())
        .await
        .unwrap();

    let tampered = outcome.artifact.replace("\"pyro\"", "\"plasma\"");
    let err = runtime_check(&req, &tampered).unwrap_err();
    assert!(matches!(err, ForgeError::RuntimeCheck(_)));
}
