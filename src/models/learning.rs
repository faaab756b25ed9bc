use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::round2;

/// A captured, versionable unit of knowledge.
///
/// Learnings are immutable apart from their scoring fields and the superseded
/// marker. Refining one creates a new record whose `predecessor_id` points at
/// the old one; the old record is marked superseded and otherwise untouched.
/// Iteration numbers strictly increase along a chain, so chains cannot cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Learning {
    pub id: Uuid,
    pub predecessor_id: Option<Uuid>,
    /// 1 for a chain root, predecessor's iteration + 1 otherwise.
    pub iteration: u32,
    pub category: LearningCategory,
    pub title: String,
    pub content: String,
    /// What changed relative to the predecessor.
    pub delta_summary: Option<String>,
    pub confidence: f64,
    pub validation_count: u32,
    pub reference_count: u32,
    pub importance: Importance,
    pub tags: Vec<String>,
    pub source_feature: Option<String>,
    pub source_phase: Option<u8>,
    pub source_agent: Option<String>,
    pub is_superseded: bool,
    pub superseded_by: Option<Uuid>,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub last_validated_by: Option<String>,
    pub last_referenced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

sql_enum! {
    pub enum LearningCategory {
        Decision => "decision",
        Pattern => "pattern",
        Gotcha => "gotcha",
        Convention => "convention",
        Architecture => "architecture",
        Rationale => "rationale",
        Optimization => "optimization",
        Integration => "integration",
    }
}

sql_enum! {
    pub enum Importance {
        High => "HIGH",
        Medium => "MEDIUM",
        Low => "LOW",
    }
}

/// Add `increment` to `confidence`, capped at 1.00 and kept at hundredths.
pub fn bump_confidence(confidence: f64, increment: f64) -> f64 {
    round2((confidence + increment).min(1.0))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLearningInput {
    pub category: LearningCategory,
    pub title: String,
    pub content: String,
    /// Initial confidence, 0.00 to 1.00.
    pub confidence: f64,
    #[serde(default = "default_importance")]
    pub importance: Importance,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source_feature: Option<String>,
    #[serde(default)]
    pub source_phase: Option<u8>,
    #[serde(default)]
    pub source_agent: Option<String>,
}

fn default_importance() -> Importance {
    Importance::Medium
}

/// Input for refining a learning. Unset fields are inherited from the predecessor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolveLearningInput {
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub delta_summary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub category: Option<LearningCategory>,
    #[serde(default)]
    pub importance: Option<Importance>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub source_feature: Option<String>,
    #[serde(default)]
    pub source_phase: Option<u8>,
    #[serde(default)]
    pub source_agent: Option<String>,
}

/// Filter for learning listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningFilter {
    pub category: Option<LearningCategory>,
    /// Exclude superseded learnings.
    #[serde(default)]
    pub active_only: bool,
    pub min_confidence: Option<f64>,
}
