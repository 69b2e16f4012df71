//! Plan acquisition orchestrator.
//!
//! Drives the generate → validate → repair → render → runtime-check loop.
//! Each rejected attempt feeds a correction hint into the next prompt while
//! the sampling temperature steps down; when every attempt is rejected the
//! heuristic planner produces a best-effort artifact instead of failing the
//! request outright.

pub mod cache;
pub mod generator;
pub mod heuristic;
pub mod prompt;

use tracing::{info, warn};

pub use cache::{Fingerprint, MemoryCache, NoCache, ResponseCache};
pub use generator::{GeneratorConfig, OpenAiGenerator, PlanGenerator, StubGenerator};
pub use heuristic::heuristic_plan;
pub use prompt::build_prompt;

use crate::check::runtime_check;
use crate::error::ForgeError;
use crate::plan::{Plan, PlanRequest, RawPlan};
use crate::render::render;
use crate::repair::repair;
use crate::validate::validate;

#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// One attempt per entry; cooler retries make the generator follow the
    /// correction hint instead of improvising again.
    pub temperatures: Vec<f64>,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        AcquireConfig {
            temperatures: vec![0.7, 0.4, 0.15],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquireOutcome {
    pub artifact: String,
    pub plan: Plan,
    pub attempts: usize,
    pub from_fallback: bool,
    /// Defects tolerated on the fallback path only.
    pub soft_errors: Vec<String>,
}

pub async fn acquire(
    req: &PlanRequest,
    generator: &dyn PlanGenerator,
    cache: &dyn ResponseCache,
    config: &AcquireConfig,
) -> Result<AcquireOutcome, ForgeError> {
    let mut last_err: Option<ForgeError> = None;
    let attempts = config.temperatures.len();

    for (attempt, &temperature) in config.temperatures.iter().enumerate() {
        let correction = last_err.as_ref().map(|e| e.correction_hint());
        let prompt = build_prompt(req, correction.as_deref());
        let key = Fingerprint::of(req, attempt, "plan");

        let text = match cache.fetch(&key).await {
            Some(hit) => hit,
            None => match generator.generate(&prompt, temperature).await {
                Ok(text) => {
                    cache.store(&key, &text).await;
                    text
                }
                Err(e) => {
                    warn!(attempt, %e, "generator call failed");
                    last_err = Some(e);
                    continue;
                }
            },
        };

        match run_pipeline(req, &text) {
            Ok((plan, artifact)) => {
                info!(name = %req.name, attempt, "plan accepted");
                return Ok(AcquireOutcome {
                    artifact,
                    plan,
                    attempts: attempt + 1,
                    from_fallback: false,
                    soft_errors: Vec::new(),
                });
            }
            Err(e) => {
                warn!(attempt, %e, "plan rejected");
                last_err = Some(e);
            }
        }
    }

    fallback(req, attempts, last_err)
}

/// Runs one generator reply through the whole pipeline.
fn run_pipeline(req: &PlanRequest, text: &str) -> Result<(Plan, String), ForgeError> {
    let payload = extract_payload(text).ok_or_else(|| {
        ForgeError::MalformedPayload("no balanced JSON object in reply".to_string())
    })?;
    let raw: RawPlan = serde_json::from_str(payload)
        .map_err(|e| ForgeError::MalformedPayload(e.to_string()))?;
    let plan = validate(req, raw)?;
    let (plan, report) = repair(req, plan);
    if !report.is_clean() {
        info!(passes = ?report.fired, "repair passes fired");
    }
    let artifact = render(req, &plan);
    runtime_check(req, &artifact)?;
    Ok((plan, artifact))
}

/// Best-effort path once generation is out of attempts. Validation failures
/// here are terminal; a runtime-check failure is downgraded to a soft error
/// so the caller still gets an artifact to inspect.
fn fallback(
    req: &PlanRequest,
    attempts: usize,
    last_err: Option<ForgeError>,
) -> Result<AcquireOutcome, ForgeError> {
    warn!(name = %req.name, "all attempts rejected, using heuristic fallback");
    let mut soft_errors = Vec::new();
    if let Some(e) = &last_err {
        soft_errors.push(format!("last generator attempt: {e}"));
    }

    let raw = heuristic_plan(req);
    let plan = match validate(req, raw) {
        Ok(plan) => plan,
        Err(e) => {
            return Err(ForgeError::Exhausted {
                attempts,
                last: Box::new(e),
            })
        }
    };
    let (plan, _) = repair(req, plan);
    let artifact = render(req, &plan);
    if let Err(e) = runtime_check(req, &artifact) {
        soft_errors.push(format!("fallback artifact: {e}"));
    }

    Ok(AcquireOutcome {
        artifact,
        plan,
        attempts,
        from_fallback: true,
        soft_errors,
    })
}

/// Finds the first balanced top-level `{...}` in a reply, skipping markdown
/// fences and prose around it. String-aware so braces inside quoted titles do
/// not unbalance the scan.
pub fn extract_payload(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + idx + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
