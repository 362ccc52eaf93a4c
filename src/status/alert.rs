//! Outage alerts driven by a decayed failure counter.
//!
//! Failures push the counter up by one (capped at the threshold) and
//! successes pull it down by the decay rate (floored at zero). An alert is
//! raised once the counter reaches the threshold and cleared only when it
//! has drained back to zero, so the alert channel reacts more slowly than
//! the status display.

use crate::archive::Sample;
use crate::publish::MessageRef;

#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    pub threshold: u32,
    pub decay_rate: f64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            decay_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    Raise,
    Clear,
    NoChange,
}

/// Per-target alert state.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub alerting: bool,
    /// Counter value after the latest evaluation
    pub counter: f64,
    /// Message announcing the current alert, if one was posted
    pub message: Option<MessageRef>,
}

/// Integrate the archive, oldest first, into a decayed failure counter.
pub fn decayed_failures(archive: &[Sample], policy: &AlertPolicy) -> f64 {
    let cap = f64::from(policy.threshold);
    archive.iter().fold(0.0, |counter, sample| {
        if sample.is_failure() {
            (counter + 1.0).min(cap)
        } else {
            (counter - policy.decay_rate).max(0.0)
        }
    })
}

/// Decide whether a target's outage alert should change.
pub fn evaluate_alert(state: &mut AlertState, archive: &[Sample], policy: &AlertPolicy) -> AlertTransition {
    let counter = decayed_failures(archive, policy);
    state.counter = counter;

    if !state.alerting && counter >= f64::from(policy.threshold) {
        state.alerting = true;
        AlertTransition::Raise
    } else if state.alerting && counter <= 0.0 {
        state.alerting = false;
        AlertTransition::Clear
    } else {
        AlertTransition::NoChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::{fail, ok};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + ChronoDuration::minutes(min)
    }

    fn archive(pattern: &str) -> Vec<Sample> {
        pattern
            .chars()
            .enumerate()
            .map(|(i, c)| if c == 'x' { fail(t(i as i64)) } else { ok(t(i as i64), 3, 24) })
            .collect()
    }

    #[test]
    fn test_counter_bounds() {
        let policy = AlertPolicy { threshold: 3, decay_rate: 0.5 };
        for pattern in ["", "xxxxxxxxxx", "..........", "x.x.xx..xxx.", "xxxxx.........."] {
            let counter = decayed_failures(&archive(pattern), &policy);
            assert!((0.0..=3.0).contains(&counter), "{pattern}: {counter}");
        }
    }

    #[test]
    fn test_raise_and_clear() {
        let policy = AlertPolicy { threshold: 3, decay_rate: 0.5 };
        let mut state = AlertState::default();

        assert_eq!(evaluate_alert(&mut state, &archive("..xx"), &policy), AlertTransition::NoChange);
        assert_eq!(evaluate_alert(&mut state, &archive("..xxx"), &policy), AlertTransition::Raise);
        assert!(state.alerting);

        // Still failing: no second raise
        assert_eq!(evaluate_alert(&mut state, &archive("..xxxx"), &policy), AlertTransition::NoChange);

        // Counter at 3 needs six successes to drain
        assert_eq!(evaluate_alert(&mut state, &archive("..xxxx....."), &policy), AlertTransition::NoChange);
        assert_eq!(evaluate_alert(&mut state, &archive("..xxxx......"), &policy), AlertTransition::Clear);
        assert!(!state.alerting);
        assert_eq!(state.counter, 0.0);

        // Clear only from alerting
        assert_eq!(evaluate_alert(&mut state, &archive("......"), &policy), AlertTransition::NoChange);
    }

    #[test]
    fn test_interleaved_successes_delay_raise() {
        let policy = AlertPolicy { threshold: 3, decay_rate: 1.0 };
        let mut state = AlertState::default();
        // Every success cancels a failure, so the counter never reaches 3
        assert_eq!(evaluate_alert(&mut state, &archive("x.x.x.x.x.x.x"), &policy), AlertTransition::NoChange);

        let policy = AlertPolicy { threshold: 3, decay_rate: 0.25 };
        assert_eq!(evaluate_alert(&mut state, &archive("x.x.x.x.x.x.x"), &policy), AlertTransition::Raise);
    }

    #[test]
    fn test_short_blip_does_not_alert() {
        let policy = AlertPolicy::default();
        let mut state = AlertState::default();
        assert_eq!(evaluate_alert(&mut state, &archive("....xxx"), &policy), AlertTransition::NoChange);
        assert!(!state.alerting);
    }
}
