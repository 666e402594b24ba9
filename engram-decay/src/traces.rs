//! Multi-timescale strength traces
//!
//! Each memory carries three traces (fast, mid, slow) decaying at different
//! rates. Sleep cycles cascade strength from faster traces to slower ones;
//! deep sleep additionally consolidates mid into slow. Access boosts only the
//! fast trace.

use engram_core::{MemoryTraces, TraceConfig};

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Initialize traces for a memory.
///
/// New memories hold all strength in the fast trace; memories migrated from
/// a single-strength store spread across fast and mid.
pub fn initialize_traces(strength: f64, is_new: bool, config: &TraceConfig) -> MemoryTraces {
    let strength = clamp(strength);
    let (s_fast, s_mid, s_slow) = if is_new {
        (strength, 0.0, 0.0)
    } else {
        (strength, strength * 0.5, 0.0)
    };
    with_effective(s_fast, s_mid, s_slow, config)
}

/// Weighted combination of the three traces.
pub fn effective_strength(s_fast: f64, s_mid: f64, s_slow: f64, config: &TraceConfig) -> f64 {
    clamp(
        config.s_fast_weight * s_fast + config.s_mid_weight * s_mid + config.s_slow_weight * s_slow,
    )
}

/// Decay each trace independently at its own rate.
///
/// Access count provides dampening, mirroring the access-dampened decay of
/// the single-strength model.
pub fn decay_traces(
    traces: MemoryTraces,
    elapsed_days: f64,
    access_count: i64,
    config: &TraceConfig,
) -> MemoryTraces {
    let elapsed = elapsed_days.max(0.0);
    let dampening = 1.0 + 0.5 * (1.0 + access_count.max(0) as f64).ln();

    let s_fast = traces.s_fast * (-config.s_fast_decay_rate * elapsed / dampening).exp();
    let s_mid = traces.s_mid * (-config.s_mid_decay_rate * elapsed / dampening).exp();
    let s_slow = traces.s_slow * (-config.s_slow_decay_rate * elapsed / dampening).exp();

    with_effective(clamp(s_fast), clamp(s_mid), clamp(s_slow), config)
}

/// Transfer strength from faster traces to slower traces.
///
/// Normal sleep: fast → mid only. Deep sleep: fast → mid and mid → slow.
pub fn cascade_traces(traces: MemoryTraces, deep_sleep: bool, config: &TraceConfig) -> MemoryTraces {
    let fast_to_mid = traces.s_fast * config.cascade_fast_to_mid;
    let s_fast = traces.s_fast - fast_to_mid;
    let mut s_mid = traces.s_mid + fast_to_mid;
    let mut s_slow = traces.s_slow;

    if deep_sleep {
        let mid_to_slow = s_mid * config.cascade_mid_to_slow;
        s_mid -= mid_to_slow;
        s_slow += mid_to_slow;
    }

    with_effective(clamp(s_fast), clamp(s_mid), clamp(s_slow), config)
}

/// On access, only the fast trace is boosted; consolidated traces are left
/// untouched.
pub fn boost_fast_trace(traces: MemoryTraces, boost: f64, config: &TraceConfig) -> MemoryTraces {
    with_effective(
        clamp(traces.s_fast + boost),
        traces.s_mid,
        traces.s_slow,
        config,
    )
}

fn with_effective(s_fast: f64, s_mid: f64, s_slow: f64, config: &TraceConfig) -> MemoryTraces {
    MemoryTraces {
        s_fast,
        s_mid,
        s_slow,
        effective: effective_strength(s_fast, s_mid, s_slow, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> TraceConfig {
        TraceConfig::default()
    }

    #[test]
    fn test_new_memory_is_all_fast() {
        let traces = initialize_traces(0.9, true, &config());
        assert_eq!(traces.s_fast, 0.9);
        assert_eq!(traces.s_mid, 0.0);
        assert_eq!(traces.s_slow, 0.0);
    }

    #[test]
    fn test_migrated_memory_spreads_to_mid() {
        let traces = initialize_traces(0.8, false, &config());
        assert_eq!(traces.s_fast, 0.8);
        assert_eq!(traces.s_mid, 0.4);
    }

    #[test]
    fn test_fast_decays_faster_than_slow() {
        let start = MemoryTraces {
            s_fast: 1.0,
            s_mid: 1.0,
            s_slow: 1.0,
            effective: 1.0,
        };
        let decayed = decay_traces(start, 10.0, 0, &config());
        assert!(decayed.s_fast < decayed.s_mid);
        assert!(decayed.s_mid < decayed.s_slow);
    }

    #[test]
    fn test_cascade_conserves_total_strength() {
        let start = MemoryTraces {
            s_fast: 0.8,
            s_mid: 0.3,
            s_slow: 0.1,
            effective: 0.0,
        };
        let after = cascade_traces(start, false, &config());
        let total_before = start.s_fast + start.s_mid + start.s_slow;
        let total_after = after.s_fast + after.s_mid + after.s_slow;
        assert!((total_before - total_after).abs() < 1e-12);
        assert!(after.s_fast < start.s_fast);
        assert!(after.s_mid > start.s_mid);
        assert_eq!(after.s_slow, start.s_slow);
    }

    #[test]
    fn test_deep_sleep_feeds_slow_trace() {
        let start = MemoryTraces {
            s_fast: 0.8,
            s_mid: 0.3,
            s_slow: 0.1,
            effective: 0.0,
        };
        let after = cascade_traces(start, true, &config());
        assert!(after.s_slow > start.s_slow);
    }

    #[test]
    fn test_boost_touches_only_fast() {
        let start = MemoryTraces {
            s_fast: 0.5,
            s_mid: 0.3,
            s_slow: 0.2,
            effective: 0.0,
        };
        let boosted = boost_fast_trace(start, 0.3, &config());
        assert_eq!(boosted.s_fast, 0.8);
        assert_eq!(boosted.s_mid, 0.3);
        assert_eq!(boosted.s_slow, 0.2);

        let saturated = boost_fast_trace(start, 2.0, &config());
        assert_eq!(saturated.s_fast, 1.0);
    }

    proptest! {
        /// Effective strength is a convex combination: bounded by the trace
        /// extremes.
        #[test]
        fn prop_effective_is_convex(
            f in 0.0f64..=1.0,
            m in 0.0f64..=1.0,
            s in 0.0f64..=1.0,
        ) {
            let config = config();
            let effective = effective_strength(f, m, s, &config);
            let lo = f.min(m).min(s);
            let hi = f.max(m).max(s);
            prop_assert!(effective >= lo - 1e-12);
            prop_assert!(effective <= hi + 1e-12);
        }

        /// Every trace stays within [0, 1] through decay and cascade.
        #[test]
        fn prop_traces_bounded(
            f in 0.0f64..=1.0,
            m in 0.0f64..=1.0,
            s in 0.0f64..=1.0,
            days in 0.0f64..1000.0,
            deep in proptest::bool::ANY,
        ) {
            let config = config();
            let traces = MemoryTraces { s_fast: f, s_mid: m, s_slow: s, effective: 0.0 };
            let decayed = decay_traces(traces, days, 0, &config);
            let cascaded = cascade_traces(decayed, deep, &config);
            for value in [cascaded.s_fast, cascaded.s_mid, cascaded.s_slow, cascaded.effective] {
                prop_assert!((0.0..=1.0).contains(&value));
            }
        }
    }
}
