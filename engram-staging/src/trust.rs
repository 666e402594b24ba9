//! Trust-based auto-merge guardrails

use engram_core::{AgentTrust, CommitChecks, StagingConfig};

/// Whether a freshly-staged commit may bypass review.
///
/// Requires a clean commit (no duplicate, conflict, or PII), a trust score
/// at or above the threshold, and a proposal history deep enough to make the
/// score meaningful.
pub fn auto_merge_allowed(
    trust: &AgentTrust,
    checks: &CommitChecks,
    config: &StagingConfig,
) -> bool {
    if !config.enable_auto_merge {
        return false;
    }
    if checks.duplicate_of.is_some() || !checks.conflicts.is_empty() || checks.pii_risk {
        return false;
    }
    if trust.trust_score < config.auto_merge_trust_threshold {
        return false;
    }
    if trust.total_proposals < config.auto_merge_min_total.max(1) {
        return false;
    }
    if trust.approved_proposals < config.auto_merge_min_approved.max(1) {
        return false;
    }
    trust.rejection_rate() <= config.auto_merge_max_reject_rate.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{EngramIdType, MemoryId};

    fn trusted() -> AgentTrust {
        AgentTrust {
            user_id: "u1".to_string(),
            agent_id: "a1".to_string(),
            total_proposals: 20,
            approved_proposals: 19,
            rejected_proposals: 1,
            auto_stashed_proposals: 0,
            last_proposed_at: Some(Utc::now()),
            last_approved_at: Some(Utc::now()),
            trust_score: 0.9,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_trusted_clean_commit_merges() {
        assert!(auto_merge_allowed(
            &trusted(),
            &CommitChecks::default(),
            &StagingConfig::default()
        ));
    }

    #[test]
    fn test_low_trust_blocks() {
        let mut trust = trusted();
        trust.trust_score = 0.5;
        assert!(!auto_merge_allowed(
            &trust,
            &CommitChecks::default(),
            &StagingConfig::default()
        ));
    }

    #[test]
    fn test_thin_history_blocks() {
        let mut trust = trusted();
        trust.total_proposals = 5;
        assert!(!auto_merge_allowed(
            &trust,
            &CommitChecks::default(),
            &StagingConfig::default()
        ));
    }

    #[test]
    fn test_high_reject_rate_blocks() {
        let mut trust = trusted();
        trust.rejected_proposals = 6;
        assert!(!auto_merge_allowed(
            &trust,
            &CommitChecks::default(),
            &StagingConfig::default()
        ));
    }

    #[test]
    fn test_risky_checks_block() {
        let mut checks = CommitChecks::default();
        checks.duplicate_of = Some(MemoryId::nil());
        assert!(!auto_merge_allowed(
            &trusted(),
            &checks,
            &StagingConfig::default()
        ));

        let mut checks = CommitChecks::default();
        checks.pii_risk = true;
        assert!(!auto_merge_allowed(
            &trusted(),
            &checks,
            &StagingConfig::default()
        ));
    }

    #[test]
    fn test_disabled_feature_blocks() {
        let mut config = StagingConfig::default();
        config.enable_auto_merge = false;
        assert!(!auto_merge_allowed(
            &trusted(),
            &CommitChecks::default(),
            &config
        ));
    }
}
