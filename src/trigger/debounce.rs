use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::clock::Clock;
use crate::constants::{DEFAULT_DEBOUNCE_MS, MAX_DEBOUNCE_MS, MIN_DEBOUNCE_MS};
use crate::context::PathKey;
use crate::utils::ContextError;

/// One editor instance's logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Check a configured debounce duration
pub fn validate_debounce_ms(millis: u64) -> Result<Duration, ContextError> {
    if (MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&millis) {
        Ok(Duration::from_millis(millis))
    } else {
        Err(ContextError::Configuration(format!(
            "debounce_ms must be within {}..={}, got {}",
            MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS, millis
        )))
    }
}

/// Per-session debounce state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
}

#[derive(Debug)]
struct PendingTrigger {
    deadline: Instant,
    key: Option<PathKey>,
    edits: usize,
}

/// A quiet period that elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    pub session: SessionId,
    /// File touched by the last edit of the burst
    pub key: Option<PathKey>,
    /// Edits collapsed into this trigger
    pub coalesced: usize,
}

/// Collapses bursts of edits into one trigger per quiet period
///
/// Each session is `Idle` or `Pending`. An edit (re)arms the session's single
/// deadline; [`DebounceCoordinator::poll_expired`] fires and clears every
/// deadline that has passed. Time comes from the injected [`Clock`], so the
/// coordinator never sleeps itself.
pub struct DebounceCoordinator {
    clock: Arc<dyn Clock>,
    duration: Duration,
    pending: HashMap<SessionId, PendingTrigger>,
}

impl fmt::Debug for DebounceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceCoordinator")
            .field("duration", &self.duration)
            .field("pending", &self.pending)
            .finish()
    }
}

impl DebounceCoordinator {
    pub fn new(clock: Arc<dyn Clock>, duration: Duration) -> Self {
        Self {
            clock,
            duration,
            pending: HashMap::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Change the quiet period for edits arriving from now on
    ///
    /// Already armed deadlines keep the duration they were armed with.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Reconfigure from a raw millisecond value
    ///
    /// Invalid values fall back to the default duration and the error is
    /// returned so the caller can surface it.
    pub fn set_duration_ms(&mut self, millis: u64) -> Result<(), ContextError> {
        match validate_debounce_ms(millis) {
            Ok(duration) => {
                self.set_duration(duration);
                Ok(())
            },
            Err(e) => {
                warn!("{}; using {}ms", e, DEFAULT_DEBOUNCE_MS);
                self.set_duration(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
                Err(e)
            },
        }
    }

    /// Record an edit: replace any pending deadline with a fresh one
    pub fn on_edit(&mut self, session: SessionId, key: Option<PathKey>) -> Instant {
        let deadline = self.clock.now() + self.duration;
        let edits = match self.pending.remove(&session) {
            Some(previous) => previous.edits + 1,
            None => 1,
        };

        debug!("{} armed, {} edit(s) in burst", session, edits);
        self.pending.insert(
            session,
            PendingTrigger {
                deadline,
                key,
                edits,
            },
        );
        deadline
    }

    /// Drop the session's pending trigger without firing
    pub fn cancel(&mut self, session: SessionId) -> bool {
        let cancelled = self.pending.remove(&session).is_some();
        if cancelled {
            debug!("{} trigger cancelled", session);
        }
        cancelled
    }

    /// Cancel every pending trigger
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn state(&self, session: SessionId) -> DebounceState {
        match self.pending.get(&session) {
            Some(pending) => DebounceState::Pending {
                deadline: pending.deadline,
            },
            None => DebounceState::Idle,
        }
    }

    /// Earliest armed deadline across sessions
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fire every session whose deadline has passed, earliest first
    pub fn poll_expired(&mut self) -> Vec<Fired> {
        let now = self.clock.now();
        let mut expired: Vec<(Instant, SessionId)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(session, pending)| (pending.deadline, *session))
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|(_, session)| {
                self.pending.remove(&session).map(|pending| Fired {
                    session,
                    key: pending.key,
                    coalesced: pending.edits,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::ManualClock;

    const SESSION: SessionId = SessionId(1);

    fn coordinator(millis: u64) -> (ManualClock, DebounceCoordinator) {
        let clock = ManualClock::new();
        let debounce =
            DebounceCoordinator::new(Arc::new(clock.clone()), Duration::from_millis(millis));
        (clock, debounce)
    }

    #[test]
    fn test_burst_fires_once_after_last_edit() {
        let (clock, mut debounce) = coordinator(300);

        debounce.on_edit(SESSION, Some(PathKey::new("a.ts")));
        clock.advance(Duration::from_millis(20));
        debounce.on_edit(SESSION, Some(PathKey::new("a.ts")));
        clock.advance(Duration::from_millis(20));
        debounce.on_edit(SESSION, Some(PathKey::new("a.ts")));

        clock.advance(Duration::from_millis(299));
        assert!(debounce.poll_expired().is_empty());
        assert_eq!(debounce.pending_count(), 1);

        clock.advance(Duration::from_millis(1));
        let fired = debounce.poll_expired();
        assert_eq!(
            fired,
            vec![Fired {
                session: SESSION,
                key: Some(PathKey::new("a.ts")),
                coalesced: 3,
            }]
        );
        assert_eq!(debounce.state(SESSION), DebounceState::Idle);

        clock.advance(Duration::from_secs(5));
        assert!(debounce.poll_expired().is_empty());
    }

    #[test]
    fn test_edits_further_apart_than_window_fire_separately() {
        let (clock, mut debounce) = coordinator(100);

        debounce.on_edit(SESSION, None);
        clock.advance(Duration::from_millis(150));
        assert_eq!(debounce.poll_expired().len(), 1);

        debounce.on_edit(SESSION, None);
        clock.advance(Duration::from_millis(150));
        let fired = debounce.poll_expired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].coalesced, 1);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let (clock, mut debounce) = coordinator(100);

        debounce.on_edit(SESSION, None);
        assert!(matches!(debounce.state(SESSION), DebounceState::Pending { .. }));
        assert!(debounce.cancel(SESSION));
        assert!(!debounce.cancel(SESSION));

        clock.advance(Duration::from_millis(500));
        assert!(debounce.poll_expired().is_empty());
    }

    #[test]
    fn test_sessions_are_independent() {
        let (clock, mut debounce) = coordinator(100);

        debounce.on_edit(SessionId(1), None);
        clock.advance(Duration::from_millis(50));
        debounce.on_edit(SessionId(2), None);

        clock.advance(Duration::from_millis(50));
        let fired = debounce.poll_expired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].session, SessionId(1));

        clock.advance(Duration::from_millis(50));
        assert_eq!(debounce.poll_expired()[0].session, SessionId(2));
    }

    #[test]
    fn test_next_deadline_tracks_rearm() {
        let (clock, mut debounce) = coordinator(100);
        assert_eq!(debounce.next_deadline(), None);

        let first = debounce.on_edit(SESSION, None);
        clock.advance(Duration::from_millis(30));
        let second = debounce.on_edit(SESSION, None);

        assert_eq!(second - first, Duration::from_millis(30));
        assert_eq!(debounce.next_deadline(), Some(second));
    }

    #[test]
    fn test_reconfigure_duration() {
        let (clock, mut debounce) = coordinator(300);
        debounce.set_duration_ms(50).unwrap();

        debounce.on_edit(SESSION, None);
        clock.advance(Duration::from_millis(50));
        assert_eq!(debounce.poll_expired().len(), 1);
    }

    #[test]
    fn test_invalid_duration_falls_back_to_default() {
        let (_clock, mut debounce) = coordinator(50);

        let err = debounce.set_duration_ms(0).unwrap_err();
        assert!(matches!(err, ContextError::Configuration(_)));
        assert_eq!(debounce.duration(), Duration::from_millis(DEFAULT_DEBOUNCE_MS));

        assert!(debounce.set_duration_ms(MAX_DEBOUNCE_MS + 1).is_err());
        assert!(validate_debounce_ms(MAX_DEBOUNCE_MS).is_ok());
    }
}
