//! Domain models for Rocket PhaseGate.
//!
//! # Core Concepts
//!
//! ## Workflow Entities
//!
//! - [`Feature`]: A unit of work moving through phases 0 (Planning) to 8 (Complete).
//!   Phase and status change only through the transition guard in [`crate::db`].
//! - [`PhaseTransition`]: Append-only record of every phase move. Its order defines
//!   the feature's phase history.
//! - [`QualityGate`]: Append-only approval or rejection of a named checkpoint.
//! - [`Blocker`]: An obstruction with an OPEN → RESOLVED/ESCALATED lifecycle.
//! - [`AgentInvocation`]: One bracketed window of agent work inside a phase.
//! - [`TaskList`]: Last-write-wins task list per feature phase.
//!
//! ## Knowledge Entities
//!
//! - [`Learning`]: Immutable knowledge record. Refinements form an evolution chain
//!   through `predecessor_id`; only the superseded flag of a predecessor ever changes.
//! - [`LearningConflict`]: Contradiction or overlap between two learnings.
//! - [`PropagationTarget`] / [`PropagationRecord`]: Candidate destinations and
//!   evidence of completed propagation.
//!
//! ## Derived Entities
//!
//! - [`FeatureEval`], [`SystemHealthEval`], [`EvalAlert`]: Recomputable health
//!   snapshots. Old snapshots are retained for trends.

/// Declares an enum whose variants map to fixed strings, used both on the wire
/// (serde) and in SQLite columns.
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "invalid {} '{}', expected one of: {}",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

mod conflict;
mod eval;
mod feature;
mod gate;
mod history;
mod invocation;
mod learning;
mod phase;
mod propagation;
mod task;

pub use conflict::*;
pub use eval::*;
pub use feature::*;
pub use gate::*;
pub use history::*;
pub use invocation::*;
pub use learning::*;
pub use phase::*;
pub use propagation::*;
pub use task::*;

/// Round to hundredths, the precision confidence and relevance scores are kept at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
