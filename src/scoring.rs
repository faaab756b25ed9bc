//! Health and eval arithmetic.
//!
//! Everything here is pure: the store gathers the inputs inside a read
//! transaction and persists whatever these functions return.

use crate::config::{AlertConfig, HealthConfig, Threshold};
use crate::models::{
    round2, AlertCandidate, AlertDimension, AlertSeverity, FeatureBreakdown, HealthStatus,
    PhaseTransition, TransitionKind,
};

/// Raw facts about one feature, collected from the store.
#[derive(Debug, Clone)]
pub struct FeatureInputs<'a> {
    pub complexity_level: u8,
    pub invocation_minutes: f64,
    pub gates_approved: u32,
    pub gates_rejected: u32,
    pub transitions: &'a [PhaseTransition],
    pub open_blockers: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScores {
    pub efficiency: f64,
    pub quality: f64,
    pub overall: f64,
    pub status: HealthStatus,
    pub breakdown: FeatureBreakdown,
}

/// 100 while actual time stays within the expectation, then inversely
/// proportional to the overrun.
pub fn efficiency_score(ratio: f64) -> f64 {
    if ratio <= 1.0 {
        100.0
    } else {
        (100.0 / ratio).clamp(0.0, 100.0)
    }
}

/// Count backward transitions that never led anywhere new.
///
/// A backward move out of phase F is thrashing when no forward transition
/// reaches beyond F before the second backward move that follows it, i.e.
/// within the same or the next rework iteration. `transitions` must be in
/// chronological order.
pub fn count_thrashing(transitions: &[PhaseTransition]) -> u32 {
    let backward: Vec<usize> = transitions
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind == TransitionKind::Backward)
        .map(|(i, _)| i)
        .collect();

    backward
        .iter()
        .enumerate()
        .filter(|(n, &start)| {
            let left_from = transitions[start].from_phase;
            let end = backward.get(n + 2).copied().unwrap_or(transitions.len());
            !transitions[start + 1..end]
                .iter()
                .any(|t| t.kind == TransitionKind::Forward && t.to_phase > left_from)
        })
        .count() as u32
}

pub fn score_feature(config: &HealthConfig, inputs: &FeatureInputs<'_>) -> FeatureScores {
    let expected_minutes = config.expected_minutes_for(inputs.complexity_level);
    let ratio = inputs.invocation_minutes / expected_minutes;
    let efficiency = round2(efficiency_score(ratio));

    let decided = inputs.gates_approved + inputs.gates_rejected;
    let approval_rate = if decided == 0 {
        1.0
    } else {
        inputs.gates_approved as f64 / decided as f64
    };
    let backward_transitions = inputs
        .transitions
        .iter()
        .filter(|t| t.kind == TransitionKind::Backward)
        .count() as u32;
    let thrash_count = count_thrashing(inputs.transitions);

    let quality = round2(
        (100.0 * approval_rate
            - config.thrash_penalty * thrash_count as f64
            - config.blocker_penalty * inputs.open_blockers as f64)
            .clamp(0.0, 100.0),
    );

    let overall = round2(config.efficiency_weight * efficiency + config.quality_weight * quality);

    FeatureScores {
        efficiency,
        quality,
        overall,
        status: HealthStatus::from_score(overall, config.healthy_min, config.concerning_min),
        breakdown: FeatureBreakdown {
            actual_minutes: round2(inputs.invocation_minutes),
            expected_minutes,
            efficiency_ratio: round2(ratio),
            gates_approved: inputs.gates_approved,
            gates_rejected: inputs.gates_rejected,
            approval_rate: round2(approval_rate),
            backward_transitions,
            thrash_count,
            open_blockers: inputs.open_blockers,
        },
    }
}

/// Threshold checks for one feature's snapshot.
pub fn feature_alerts(
    config: &AlertConfig,
    overall: f64,
    breakdown: &FeatureBreakdown,
) -> Vec<AlertCandidate> {
    [
        check_below(AlertDimension::OverallScore, overall, config.overall_score),
        check_at_or_above(
            AlertDimension::EfficiencyRatio,
            breakdown.efficiency_ratio,
            config.efficiency_ratio,
        ),
        check_at_or_above(
            AlertDimension::ThrashCount,
            breakdown.thrash_count as f64,
            config.thrash_count,
        ),
        check_at_or_above(
            AlertDimension::OpenBlockers,
            breakdown.open_blockers as f64,
            config.open_blockers,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Threshold checks for a system-wide snapshot.
pub fn system_alerts(
    config: &AlertConfig,
    overall: f64,
    open_conflicts: u32,
    oldest_open_conflict_hours: f64,
) -> Vec<AlertCandidate> {
    [
        check_below(AlertDimension::OverallScore, overall, config.overall_score),
        check_at_or_above(
            AlertDimension::OpenConflicts,
            open_conflicts as f64,
            config.open_conflicts,
        ),
        check_at_or_above(
            AlertDimension::ConflictAgeHours,
            oldest_open_conflict_hours,
            config.conflict_age_hours,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn check_below(
    dimension: AlertDimension,
    value: f64,
    threshold: Threshold,
) -> Option<AlertCandidate> {
    let (severity, limit) = if value < threshold.critical {
        (AlertSeverity::Critical, threshold.critical)
    } else if value < threshold.warning {
        (AlertSeverity::Warning, threshold.warning)
    } else {
        return None;
    };
    Some(AlertCandidate {
        severity,
        dimension,
        current_value: value,
        threshold: limit,
        message: format!("{} {:.2} is below {:.2}", dimension, value, limit),
    })
}

fn check_at_or_above(
    dimension: AlertDimension,
    value: f64,
    threshold: Threshold,
) -> Option<AlertCandidate> {
    let (severity, limit) = if value >= threshold.critical {
        (AlertSeverity::Critical, threshold.critical)
    } else if value >= threshold.warning {
        (AlertSeverity::Warning, threshold.warning)
    } else {
        return None;
    };
    Some(AlertCandidate {
        severity,
        dimension,
        current_value: value,
        threshold: limit,
        message: format!("{} {:.2} reached {:.2}", dimension, value, limit),
    })
}
