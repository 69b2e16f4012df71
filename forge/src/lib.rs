//! Formula forge: turns unreliable generator output into validated,
//! repaired, rendered, and sandbox-checked calculation artifacts.
//!
//! The pipeline runs in fixed order:
//!
//! 1. **Validate** (`validate`) — the loose [`plan::RawPlan`] becomes a typed
//!    [`plan::Plan`]; unsalvageable rows are dropped, illegal expressions are
//!    fatal.
//! 2. **Repair** (`repair`) — an ordered set of idempotent passes fixes the
//!    recurring generator mistakes (misplaced modifier tables, double-counted
//!    buffs, mis-based multipliers, dead flags).
//! 3. **Render** (`render`) — the plan becomes a deterministic textual
//!    artifact of closures over the standard evaluation context.
//! 4. **Check** (`check`) — the artifact is parsed and evaluated against
//!    synthetic stand-ins at two magnitudes before anyone trusts it.
//!
//! `acquire` wraps the whole loop with generator retries, correction hints,
//! response caching, and the heuristic fallback.

pub mod acquire;
pub mod check;
pub mod error;
pub mod plan;
pub mod registry;
pub mod render;
pub mod repair;
pub mod validate;

pub use acquire::{acquire, AcquireConfig, AcquireOutcome};
pub use check::runtime_check;
pub use error::ForgeError;
pub use plan::{DetailKind, DetailRow, ModifierRow, OutputMode, Plan, PlanRequest, RawPlan};
pub use registry::{ScalingBase, Slot, TableRegistry, TableSample, UnitHint};
pub use render::render;
pub use repair::{repair, RepairReport};
pub use validate::validate;
