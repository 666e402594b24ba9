//! Engram Decay - fading-memory retention
//!
//! Time-elapsed exponential decay per tier with access-count dampening, the
//! Benna-Fusi style three-trace cascade, and reference-aware retention. The
//! decay sweep is driven by the sleep cycle; nothing here spawns threads.

mod engine;
mod refs;
mod traces;

pub use engine::{DecayEngine, DecayStats};
pub use refs::RefCountManager;
pub use traces::{
    boost_fast_trace, cascade_traces, decay_traces, effective_strength, initialize_traces,
};

use engram_core::{DecayConfig, MemoryTier};

/// Decayed strength after `elapsed_days` without access.
///
/// `s' = s · exp(−r · Δdays / dampening)` where dampening grows with the
/// access count and any weak references held on the memory.
pub fn decayed_strength(
    strength: f64,
    elapsed_days: f64,
    tier: MemoryTier,
    access_count: i64,
    weak_refs: i64,
    config: &DecayConfig,
) -> f64 {
    if strength.is_nan() {
        return 0.0;
    }
    let rate = match tier {
        MemoryTier::Sml => config.sml_decay_rate,
        MemoryTier::Lml => config.lml_decay_rate,
    };
    let dampening = (1.0 + config.access_dampening_factor * (1.0 + access_count.max(0) as f64).ln())
        * weak_dampening_factor(weak_refs);
    let decayed = strength * (-rate * elapsed_days.max(0.0) / dampening).exp();
    decayed.clamp(0.0, 1.0)
}

/// Weak references slow forgetting multiplicatively, saturating at 10 refs.
pub fn weak_dampening_factor(weak_refs: i64) -> f64 {
    1.0 + 0.15 * weak_refs.clamp(0, 10) as f64
}

/// A memory is forgotten when strength drops strictly below the threshold.
pub fn should_forget(strength: f64, config: &DecayConfig) -> bool {
    if strength.is_nan() {
        return true;
    }
    strength < config.forgetting_threshold
}

/// SML memories promote to LML once both access and strength thresholds hold.
pub fn should_promote(
    tier: MemoryTier,
    access_count: i64,
    strength: f64,
    config: &DecayConfig,
) -> bool {
    if tier != MemoryTier::Sml {
        return false;
    }
    access_count >= config.promotion_access_threshold
        && strength >= config.promotion_strength_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> DecayConfig {
        DecayConfig::default()
    }

    #[test]
    fn test_no_elapsed_time_no_decay() {
        let s = decayed_strength(0.8, 0.0, MemoryTier::Sml, 0, 0, &config());
        assert!((s - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_lml_decays_slower_than_sml() {
        let sml = decayed_strength(1.0, 10.0, MemoryTier::Sml, 0, 0, &config());
        let lml = decayed_strength(1.0, 10.0, MemoryTier::Lml, 0, 0, &config());
        assert!(lml > sml);
    }

    #[test]
    fn test_access_count_dampens_decay() {
        let untouched = decayed_strength(1.0, 10.0, MemoryTier::Sml, 0, 0, &config());
        let accessed = decayed_strength(1.0, 10.0, MemoryTier::Sml, 20, 0, &config());
        assert!(accessed > untouched);
    }

    #[test]
    fn test_weak_refs_dampen_and_saturate() {
        let none = decayed_strength(1.0, 10.0, MemoryTier::Sml, 0, 0, &config());
        let some = decayed_strength(1.0, 10.0, MemoryTier::Sml, 0, 5, &config());
        let ten = decayed_strength(1.0, 10.0, MemoryTier::Sml, 0, 10, &config());
        let hundred = decayed_strength(1.0, 10.0, MemoryTier::Sml, 0, 100, &config());
        assert!(some > none);
        assert_eq!(ten, hundred);
    }

    #[test]
    fn test_nan_strength_is_forgotten() {
        assert_eq!(
            decayed_strength(f64::NAN, 1.0, MemoryTier::Sml, 0, 0, &config()),
            0.0
        );
        assert!(should_forget(f64::NAN, &config()));
    }

    #[test]
    fn test_forget_threshold_is_strict() {
        let config = config();
        assert!(!should_forget(config.forgetting_threshold, &config));
        assert!(should_forget(config.forgetting_threshold - 1e-9, &config));
    }

    #[test]
    fn test_promotion_requires_sml_and_both_thresholds() {
        let config = config();
        assert!(should_promote(MemoryTier::Sml, 10, 0.7, &config));
        assert!(!should_promote(MemoryTier::Lml, 10, 0.7, &config));
        assert!(!should_promote(MemoryTier::Sml, 9, 0.7, &config));
        assert!(!should_promote(MemoryTier::Sml, 10, 0.69, &config));
    }

    proptest! {
        /// Decay is monotonically non-increasing in elapsed time.
        #[test]
        fn prop_decay_monotonic(
            strength in 0.0f64..=1.0,
            d1 in 0.0f64..365.0,
            d2 in 0.0f64..365.0,
            access in 0i64..1000,
        ) {
            let (lo, hi) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
            let early = decayed_strength(strength, lo, MemoryTier::Sml, access, 0, &config());
            let late = decayed_strength(strength, hi, MemoryTier::Sml, access, 0, &config());
            prop_assert!(early >= late);
        }

        /// Decayed strength stays in [0, 1].
        #[test]
        fn prop_decay_bounded(
            strength in 0.0f64..=1.0,
            days in 0.0f64..10_000.0,
            access in 0i64..10_000,
            weak in 0i64..100,
        ) {
            let s = decayed_strength(strength, days, MemoryTier::Sml, access, weak, &config());
            prop_assert!((0.0..=1.0).contains(&s));
        }
    }
}
