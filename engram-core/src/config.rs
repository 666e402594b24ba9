//! Configuration types

use crate::{EchoDepth, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path; `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Tombstone on delete instead of removing the row.
    pub use_tombstone_deletion: bool,
    /// Purge tombstoned rows older than this many days.
    pub purge_tombstoned_after_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: 5000,
            use_tombstone_deletion: true,
            purge_tombstoned_after_days: 30,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    pub collection_name: String,
    /// Fixed embedding dimensionality for the collection.
    pub dimensions: usize,
    /// Over-fetch multiplier applied when post-filters are present.
    pub filter_overfetch: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            collection_name: "engram_memories".to_string(),
            dimensions: 384,
            filter_overfetch: 3,
        }
    }
}

/// Fading-memory decay parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    pub enable_forgetting: bool,
    /// Per-day decay rate for the short memory layer.
    pub sml_decay_rate: f64,
    /// Per-day decay rate for the long memory layer.
    pub lml_decay_rate: f64,
    /// β in the access-count dampening term `1 + β·ln(1+n)`.
    pub access_dampening_factor: f64,
    /// Strength below which a memory is forgotten (strict).
    pub forgetting_threshold: f64,
    /// Access count required for SML→LML promotion.
    pub promotion_access_threshold: i64,
    /// Strength required for SML→LML promotion.
    pub promotion_strength_threshold: f64,
    /// Strength added on each retrieval access (bounded by 1.0).
    pub access_strength_boost: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enable_forgetting: true,
            sml_decay_rate: 0.1,
            lml_decay_rate: 0.01,
            access_dampening_factor: 0.3,
            forgetting_threshold: 0.05,
            promotion_access_threshold: 10,
            promotion_strength_threshold: 0.7,
            access_strength_boost: 0.1,
        }
    }
}

/// Multi-timescale trace parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    pub enable_multi_trace: bool,
    pub s_fast_decay_rate: f64,
    pub s_mid_decay_rate: f64,
    pub s_slow_decay_rate: f64,
    pub s_fast_weight: f64,
    pub s_mid_weight: f64,
    pub s_slow_weight: f64,
    /// Fraction transferred fast→mid on each sleep cycle.
    pub cascade_fast_to_mid: f64,
    /// Additional fraction transferred mid→slow during deep sleep.
    pub cascade_mid_to_slow: f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enable_multi_trace: true,
            s_fast_decay_rate: 0.3,
            s_mid_decay_rate: 0.05,
            s_slow_decay_rate: 0.005,
            s_fast_weight: 0.5,
            s_mid_weight: 0.35,
            s_slow_weight: 0.15,
            cascade_fast_to_mid: 0.15,
            cascade_mid_to_slow: 0.10,
        }
    }
}

/// Echo encoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoConfig {
    pub enable_echo: bool,
    /// Pick depth from content signals instead of `default_depth`.
    pub auto_depth: bool,
    pub default_depth: EchoDepth,
    /// Embed the question-form instead of raw content when available.
    pub use_question_embedding: bool,
    pub reecho_on_access: bool,
    /// Access count at which a retrieval triggers re-echo.
    pub reecho_threshold: i64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enable_echo: true,
            auto_depth: true,
            default_depth: EchoDepth::Medium,
            use_question_embedding: true,
            reecho_on_access: true,
            reecho_threshold: 5,
        }
    }
}

/// Category graph settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub auto_categorize: bool,
    /// Fall through to the LLM when keyword matching is not confident.
    pub use_llm_categorization: bool,
    /// Re-rank boost for a direct category match.
    pub category_boost_weight: f64,
    /// Re-rank boost for a related-category match.
    pub cross_category_boost: f64,
    /// Categories unaccessed for this many days decay.
    pub decay_after_days: i64,
    /// Keyword overlap ratio at which two categories merge.
    pub merge_keyword_overlap: f64,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            auto_categorize: true,
            use_llm_categorization: false,
            category_boost_weight: 0.15,
            cross_category_boost: 0.08,
            decay_after_days: 30,
            merge_keyword_overlap: 0.8,
        }
    }
}

/// Re-rank weights per sharing scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeWeights {
    pub agent: f64,
    pub connector: f64,
    pub category: f64,
    pub global: f64,
}

impl Default for ScopeWeights {
    fn default() -> Self {
        Self {
            agent: 1.0,
            connector: 0.97,
            category: 0.94,
            global: 0.92,
        }
    }
}

/// Hybrid retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight for semantic similarity in the hybrid score (1-α for keywords).
    pub hybrid_alpha: f64,
    /// Memories below this strength are dropped from results.
    pub min_strength: f64,
    /// Enable keyword scoring by default.
    pub keyword_search: bool,
    /// Boost strength and access count on retrieval hits.
    pub boost_on_access: bool,
    pub scope_weights: ScopeWeights,
    /// Echo re-rank boost cap.
    pub echo_boost_cap: f64,
    /// Knowledge-graph entity boost.
    pub graph_boost_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.7,
            min_strength: 0.1,
            keyword_search: false,
            boost_on_access: true,
            scope_weights: ScopeWeights::default(),
            echo_boost_cap: 0.3,
            graph_boost_weight: 0.1,
        }
    }
}

/// Episodic scene grouping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicConfig {
    /// Time window for scene attachment, minutes.
    pub time_window_minutes: i64,
    /// Topic cosine similarity threshold for scene attachment.
    pub topic_threshold: f64,
    /// Number of recent scenes considered as attachment candidates.
    pub candidate_limit: usize,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            time_window_minutes: 30,
            topic_threshold: 0.7,
            candidate_limit: 25,
        }
    }
}

/// Write quota windows; 0 disables a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WriteQuotas {
    pub per_user_hourly: i64,
    pub per_user_daily: i64,
    pub per_agent_hourly: i64,
    pub per_agent_daily: i64,
}

/// Policy gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub gateway_enabled: bool,
    /// Refuse session creation for agents without an explicit policy.
    pub require_agent_policy: bool,
    /// Agents that must always present a capability token.
    pub restricted_agents: Vec<String>,
    pub quotas: WriteQuotas,
    pub default_session_ttl_minutes: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            gateway_enabled: true,
            require_agent_policy: false,
            restricted_agents: Vec::new(),
            quotas: WriteQuotas::default(),
            default_session_ttl_minutes: 24 * 60,
        }
    }
}

/// Staging pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingConfig {
    pub enable_staging: bool,
    pub enable_auto_merge: bool,
    pub auto_merge_trust_threshold: f64,
    pub auto_merge_min_total: i64,
    pub auto_merge_min_approved: i64,
    pub auto_merge_max_reject_rate: f64,
    /// Similarity at which a new write is checked for conflicts against its
    /// nearest neighbour.
    pub conflict_similarity_threshold: f64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            enable_staging: true,
            enable_auto_merge: true,
            auto_merge_trust_threshold: 0.85,
            auto_merge_min_total: 10,
            auto_merge_min_approved: 7,
            auto_merge_max_reject_rate: 0.2,
            conflict_similarity_threshold: 0.85,
        }
    }
}

/// Handoff bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffConfig {
    pub enabled: bool,
    /// Auto-create a policy for allowlisted agents requesting handoff caps.
    pub allow_auto_trusted_bootstrap: bool,
    pub auto_trusted_agents: Vec<String>,
    /// Idle gap after which an auto-checkpoint pauses the session, minutes.
    pub idle_pause_minutes: i64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_auto_trusted_bootstrap: false,
            auto_trusted_agents: Vec::new(),
            idle_pause_minutes: 30,
        }
    }
}

/// Master configuration for a kernel instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngramConfig {
    pub storage: StorageConfig,
    pub vector: VectorConfig,
    pub decay: DecayConfig,
    pub traces: TraceConfig,
    pub echo: EchoConfig,
    pub categories: CategoryConfig,
    pub retrieval: RetrievalConfig,
    pub episodic: EpisodicConfig,
    pub policy: PolicyConfig,
    pub staging: StagingConfig,
    pub handoff: HandoffConfig,
}

impl EngramConfig {
    /// Validate cross-field constraints. Called once at kernel construction.
    pub fn validate(&self) -> Result<(), ValidationError> {
        fn unit(name: &str, value: f64) -> Result<(), ValidationError> {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::ConfigConstraint {
                    constraint: format!("{} must be in [0, 1], got {}", name, value),
                });
            }
            Ok(())
        }

        if self.decay.sml_decay_rate <= self.decay.lml_decay_rate {
            return Err(ValidationError::ConfigConstraint {
                constraint: format!(
                    "sml_decay_rate ({}) must exceed lml_decay_rate ({})",
                    self.decay.sml_decay_rate, self.decay.lml_decay_rate
                ),
            });
        }
        unit("forgetting_threshold", self.decay.forgetting_threshold)?;
        unit(
            "promotion_strength_threshold",
            self.decay.promotion_strength_threshold,
        )?;
        unit("access_strength_boost", self.decay.access_strength_boost)?;

        let weight_sum =
            self.traces.s_fast_weight + self.traces.s_mid_weight + self.traces.s_slow_weight;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(ValidationError::ConfigConstraint {
                constraint: format!("trace weights must sum to 1.0, got {}", weight_sum),
            });
        }
        unit("cascade_fast_to_mid", self.traces.cascade_fast_to_mid)?;
        unit("cascade_mid_to_slow", self.traces.cascade_mid_to_slow)?;

        unit("hybrid_alpha", self.retrieval.hybrid_alpha)?;
        unit("min_strength", self.retrieval.min_strength)?;
        unit("echo_boost_cap", self.retrieval.echo_boost_cap)?;
        unit("topic_threshold", self.episodic.topic_threshold)?;
        unit(
            "auto_merge_trust_threshold",
            self.staging.auto_merge_trust_threshold,
        )?;
        unit(
            "auto_merge_max_reject_rate",
            self.staging.auto_merge_max_reject_rate,
        )?;
        unit(
            "conflict_similarity_threshold",
            self.staging.conflict_similarity_threshold,
        )?;

        if self.vector.dimensions == 0 {
            return Err(ValidationError::ConfigConstraint {
                constraint: "vector dimensions must be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        EngramConfig::default().validate().unwrap();
    }

    #[test]
    fn test_inverted_decay_rates_rejected() {
        let mut config = EngramConfig::default();
        config.decay.sml_decay_rate = 0.01;
        config.decay.lml_decay_rate = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trace_weights_must_sum_to_one() {
        let mut config = EngramConfig::default();
        config.traces.s_fast_weight = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = EngramConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngramConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
