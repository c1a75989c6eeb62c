//! Nap countdown.
//!
//! The budget is counted from session start until sleep onset is first
//! confirmed, then from the onset itself.

use crate::config::chrono_duration;
use crate::core::state_machine::{SleepState, Transition};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct NapCountdown {
    budget: Duration,
    reference: DateTime<Utc>,
    rebased: bool,
}

impl NapCountdown {
    /// Start counting `budget` from `session_start`.
    pub fn new(budget: std::time::Duration, session_start: DateTime<Utc>) -> Self {
        Self {
            budget: chrono_duration(budget),
            reference: session_start,
            rebased: false,
        }
    }

    /// Move the reference to sleep onset on the first entry into Asleep.
    ///
    /// Returns the new reference when it moved.
    pub fn on_transition(&mut self, transition: &Transition) -> Option<DateTime<Utc>> {
        if self.rebased || transition.to != SleepState::Asleep {
            return None;
        }
        self.reference = transition.sleep_start_time.unwrap_or(transition.at);
        self.rebased = true;
        Some(self.reference)
    }

    /// Time the budget is counted from.
    pub fn reference(&self) -> DateTime<Utc> {
        self.reference
    }

    /// Whether the reference already points at sleep onset.
    pub fn is_rebased(&self) -> bool {
        self.rebased
    }

    /// When the wake is due.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.reference + self.budget
    }

    /// Time left at `now`, never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline() - now).max(Duration::zero())
    }

    /// Whether the deadline has been reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn transition(from: SleepState, to: SleepState, at: i64, onset: Option<i64>) -> Transition {
        Transition {
            from,
            to,
            at: t(at),
            sleep_start_time: onset.map(t),
        }
    }

    #[test]
    fn test_counts_from_session_start_before_onset() {
        let countdown = NapCountdown::new(std::time::Duration::from_secs(1_200), t(0));
        assert_eq!(countdown.deadline(), t(1_200));
        assert_eq!(countdown.remaining(t(200)), Duration::seconds(1_000));
        assert!(!countdown.is_expired(t(1_199)));
        assert!(countdown.is_expired(t(1_200)));
        assert_eq!(countdown.remaining(t(5_000)), Duration::zero());
    }

    #[test]
    fn test_rebases_once_on_first_onset() {
        let mut countdown = NapCountdown::new(std::time::Duration::from_secs(1_200), t(0));

        let potential = transition(SleepState::Awake, SleepState::PotentialSleep, 100, None);
        assert_eq!(countdown.on_transition(&potential), None);

        let asleep = transition(SleepState::PotentialSleep, SleepState::Asleep, 280, Some(100));
        assert_eq!(countdown.on_transition(&asleep), Some(t(100)));
        assert_eq!(countdown.deadline(), t(1_300));
        assert!(countdown.is_rebased());

        let again = transition(SleepState::Disturbed, SleepState::Asleep, 900, Some(100));
        assert_eq!(countdown.on_transition(&again), None);
        assert_eq!(countdown.deadline(), t(1_300));
    }
}
