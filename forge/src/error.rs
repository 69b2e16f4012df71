use thiserror::Error;

/// Errors that can occur while turning a raw formula plan into an accepted
/// artifact. Field-level problems degrade by omission inside the validator
/// and never surface here; these variants are attempt-level.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The generator response did not contain a structured payload, or the
    /// payload was missing required top-level fields.
    #[error("malformed plan payload: {0}")]
    MalformedPayload(String),

    /// A schema violation that could not degrade gracefully.
    #[error("schema violation: {0}")]
    Schema(String),

    /// Every detail row was dropped. No plan is better than an empty one.
    #[error("validation left zero detail rows")]
    EmptyPlan,

    /// A custom formula failed the safety grammar or a reference check.
    /// Unlike a bad guard, a bad formula corrupts output, so this is fatal.
    #[error("illegal expression in {field}: {reason}")]
    IllegalExpression { field: String, reason: String },

    /// The rendered artifact failed the sandboxed runtime check.
    #[error("runtime check failed: {0}")]
    RuntimeCheck(String),

    /// The generator collaborator itself failed (network, bad response).
    #[error("generator error: {0}")]
    Generator(String),

    /// All attempts were exhausted; `last` is the final attempt's failure.
    #[error("plan acquisition exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<ForgeError>,
    },
}

impl ForgeError {
    /// Short diagnostic used as the correction hint on the next attempt.
    pub fn correction_hint(&self) -> String {
        match self {
            ForgeError::MalformedPayload(m) => format!(
                "The previous reply was not a single well-formed JSON object ({m}). \
                 Reply with exactly one JSON object and nothing else."
            ),
            other => format!("The previous plan was rejected: {other}. Fix that and resend."),
        }
    }
}
