use serde::{Deserialize, Serialize};

use super::{AgentInvocation, Blocker, Feature, PhaseTransition, QualityGate, TaskList};

/// The full recorded history of one feature.
///
/// This is the read model behind the dashboard's feature view: the current
/// feature row plus every append-only record attached to it, each list in
/// chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureHistory {
    pub feature: Feature,
    pub transitions: Vec<PhaseTransition>,
    pub gates: Vec<QualityGate>,
    pub blockers: Vec<Blocker>,
    pub invocations: Vec<AgentInvocation>,
    pub task_lists: Vec<TaskList>,
}
