//! Activity pings: notify groups when a server fills up.
//!
//! Each watcher is a two-state machine:
//!
//! ```text
//!           active >= threshold (emit)
//!   Ready ─────────────────────────────► Triggered(since)
//!     ▲                                         │
//!     └─────────────────────────────────────────┘
//!      active <= threshold - hysteresis  and  now - since > cooldown
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::archive::Sample;

/// Tunables shared by every watcher.
#[derive(Debug, Clone, Copy)]
pub struct PingPolicy {
    pub hysteresis: u32,
    pub cooldown: Duration,
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            hysteresis: 3,
            cooldown: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl PingPolicy {
    fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.cooldown).unwrap_or(ChronoDuration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Ready,
    Triggered { since: DateTime<Utc> },
}

/// One (target, threshold) watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct PingWatcher {
    pub threshold: u32,
    pub group: String,
    pub state: WatcherState,
}

impl PingWatcher {
    pub fn new(threshold: u32, group: &str) -> Self {
        Self {
            threshold,
            group: group.to_string(),
            state: WatcherState::Ready,
        }
    }

    /// Player count at or below which a cooled-down watcher re-arms.
    fn reset_ceiling(&self, policy: &PingPolicy) -> i64 {
        i64::from(self.threshold) - i64::from(policy.hysteresis)
    }

    /// Apply one observation. Returns true when the watcher fires.
    fn observe(&mut self, active: u32, now: DateTime<Utc>, policy: &PingPolicy) -> bool {
        match self.state {
            WatcherState::Ready if active >= self.threshold => {
                self.state = WatcherState::Triggered { since: now };
                true
            }
            WatcherState::Triggered { since }
                if i64::from(active) <= self.reset_ceiling(policy) && now - since > policy.cooldown() =>
            {
                self.state = WatcherState::Ready;
                false
            }
            _ => false,
        }
    }

    /// One display row, e.g. `12 PLAYER PING: READY`.
    pub fn describe(&self, now: DateTime<Utc>, policy: &PingPolicy) -> String {
        let start = format!("{} PLAYER PING: ", self.threshold);
        match self.state {
            WatcherState::Ready => format!("{}READY", start),
            WatcherState::Triggered { since } => {
                // Clock skew can put `since` in the future
                let elapsed = (now - since).max(ChronoDuration::zero());
                let cooldown = policy.cooldown();
                if elapsed > cooldown {
                    return format!("{}RESETS BELOW {} PLAYERS", start, self.reset_ceiling(policy) + 1);
                }
                let remaining = cooldown.checked_sub(&elapsed).unwrap_or(cooldown);
                format!(
                    "{}ON COOLDOWN {}h {}m",
                    start,
                    remaining.num_hours(),
                    remaining.num_minutes() % 60
                )
            }
        }
    }
}

/// Evaluate every watcher of a target against a fresh sample.
///
/// Returns the groups to mention, in ascending threshold order. Failed
/// polls and password-protected servers leave every watcher untouched.
pub fn evaluate_pings(
    watchers: &mut [PingWatcher],
    sample: &Sample,
    now: DateTime<Utc>,
    policy: &PingPolicy,
) -> Vec<String> {
    let Some(info) = sample.info() else {
        return Vec::new();
    };
    if info.is_private() {
        return Vec::new();
    }

    let active = info.active_players();
    watchers
        .iter_mut()
        .filter_map(|w| w.observe(active, now, policy).then(|| w.group.clone()))
        .collect()
}

/// Format groups as chat mentions.
pub fn mentions(groups: &[String]) -> String {
    groups
        .iter()
        .map(|g| format!("<@&{}>", g))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Code-fenced table of every watcher's state.
pub fn render_ping_activity(watchers: &[PingWatcher], now: DateTime<Utc>, policy: &PingPolicy) -> String {
    let rows: Vec<String> = watchers.iter().map(|w| w.describe(now, policy)).collect();
    format!("```{}```", rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::{fail, info, ok};
    use crate::archive::Visibility;
    use chrono::TimeZone;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + ChronoDuration::minutes(min)
    }

    fn watchers() -> Vec<PingWatcher> {
        vec![PingWatcher::new(5, "five"), PingWatcher::new(12, "twelve")]
    }

    #[test]
    fn test_fires_at_threshold() {
        let policy = PingPolicy::default();
        let mut w = watchers();
        let groups = evaluate_pings(&mut w, &ok(t(0), 5, 24), t(0), &policy);
        assert_eq!(groups, vec!["five".to_string()]);
        assert_eq!(w[0].state, WatcherState::Triggered { since: t(0) });
        assert_eq!(w[1].state, WatcherState::Ready);

        let groups = evaluate_pings(&mut w, &ok(t(1), 20, 24), t(1), &policy);
        assert_eq!(groups, vec!["twelve".to_string()]);
    }

    #[test]
    fn test_never_fires_twice_without_reset() {
        let policy = PingPolicy::default();
        let mut w = watchers();
        let mut fired = 0;
        for (i, players) in [5, 6, 2, 7, 1, 9].iter().enumerate() {
            let now = t(i as i64);
            fired += evaluate_pings(&mut w[..1], &ok(now, *players, 24), now, &policy).len();
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_cooldown_dwell() {
        let policy = PingPolicy::default();
        let mut w = watchers();
        evaluate_pings(&mut w, &ok(t(0), 5, 24), t(0), &policy);

        // Empty server right away still waits out the cooldown
        evaluate_pings(&mut w, &ok(t(1), 0, 24), t(1), &policy);
        assert!(matches!(w[0].state, WatcherState::Triggered { .. }));

        evaluate_pings(&mut w, &ok(t(120), 0, 24), t(120), &policy);
        assert!(matches!(w[0].state, WatcherState::Triggered { .. }), "exactly at cooldown");

        evaluate_pings(&mut w, &ok(t(121), 0, 24), t(121), &policy);
        assert_eq!(w[0].state, WatcherState::Ready);
    }

    #[test]
    fn test_hysteresis_band() {
        let policy = PingPolicy::default();
        let mut w = vec![PingWatcher::new(10, "ten")];
        evaluate_pings(&mut w, &ok(t(0), 10, 24), t(0), &policy);

        // 8 is above threshold - hysteresis, no reset even after cooldown
        evaluate_pings(&mut w, &ok(t(200), 8, 24), t(200), &policy);
        assert!(matches!(w[0].state, WatcherState::Triggered { .. }));

        evaluate_pings(&mut w, &ok(t(201), 7, 24), t(201), &policy);
        assert_eq!(w[0].state, WatcherState::Ready);
    }

    #[test]
    fn test_failures_and_private_are_ignored() {
        let policy = PingPolicy::default();
        let mut w = watchers();
        assert!(evaluate_pings(&mut w, &fail(t(0)), t(0), &policy).is_empty());

        let mut i = info(20, 0, 24);
        i.visibility = Visibility::Private;
        let private = Sample::success(t(1), i, None);
        assert!(evaluate_pings(&mut w, &private, t(1), &policy).is_empty());
        assert!(w.iter().all(|w| w.state == WatcherState::Ready));
    }

    #[test]
    fn test_bots_do_not_count() {
        let policy = PingPolicy::default();
        let mut w = watchers();
        let sample = Sample::success(t(0), info(8, 4, 24), None);
        assert!(evaluate_pings(&mut w, &sample, t(0), &policy).is_empty());
    }

    #[test]
    fn test_describe() {
        let policy = PingPolicy::default();
        let mut w = PingWatcher::new(12, "twelve");
        assert_eq!(w.describe(t(0), &policy), "12 PLAYER PING: READY");

        w.state = WatcherState::Triggered { since: t(0) };
        assert_eq!(w.describe(t(35), &policy), "12 PLAYER PING: ON COOLDOWN 1h 25m");
        assert_eq!(w.describe(t(121), &policy), "12 PLAYER PING: RESETS BELOW 10 PLAYERS");
    }

    #[test]
    fn test_mentions_and_render() {
        assert_eq!(mentions(&["1".to_string(), "2".to_string()]), "<@&1> <@&2>");
        assert_eq!(mentions(&[]), "");

        let rendered = render_ping_activity(&watchers(), t(0), &PingPolicy::default());
        assert_eq!(rendered, "```5 PLAYER PING: READY\n12 PLAYER PING: READY```");
    }

    #[test]
    fn test_describe_tolerates_skew_and_huge_cooldown() {
        let policy = PingPolicy {
            hysteresis: 3,
            cooldown: Duration::from_secs(u64::MAX),
        };
        let mut w = PingWatcher::new(5, "five");
        w.state = WatcherState::Triggered { since: t(10) };
        assert!(w.describe(t(0), &policy).starts_with("5 PLAYER PING: ON COOLDOWN"));

        w.state = WatcherState::Triggered { since: t(0) };
        let row = w.describe(t(0), &PingPolicy::default());
        assert_eq!(row, "5 PLAYER PING: ON COOLDOWN 2h 0m");
    }
}
