use std::time::{Duration, Instant};

use crate::config::PipeConfig;
use crate::session::PipeSession;

/// Liveness state of a session as seen by the sweep and the monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Active,
    CandidateDead,
    Destroyed,
}

/// Classify a session at `now`.
///
/// A session is a candidate when it is not live, when its failed-retry count
/// reached the ceiling, or when it had no traffic for three notify intervals.
pub fn assess(session: &PipeSession, now: Instant, config: &PipeConfig) -> LivenessState {
    if session.is_destroyed() {
        return LivenessState::Destroyed;
    }
    if !session.is_live() || session.query_failed_retries() >= config.max_failed_retries {
        return LivenessState::CandidateDead;
    }
    if idle_for(session, now) > config.idle_window() {
        return LivenessState::CandidateDead;
    }
    LivenessState::Active
}

/// Time since the last confirmed traffic, or since setup.
pub fn idle_for(session: &PipeSession, now: Instant) -> Duration {
    now.saturating_duration_since(session.timers().last_traffic())
}

/// Whether the closing-wait has elapsed since liveness was last confirmed.
pub fn closing_wait_elapsed(session: &PipeSession, now: Instant, config: &PipeConfig) -> bool {
    let wait = session.wait_closing_or(config.wait_closing);
    now.saturating_duration_since(session.timers().last_live_detected) > wait
}

/// Whether a candidate should be destroyed now.
pub fn should_destroy(session: &PipeSession, now: Instant, config: &PipeConfig) -> bool {
    match assess(session, now, config) {
        LivenessState::Active => false,
        LivenessState::CandidateDead => closing_wait_elapsed(session, now, config),
        LivenessState::Destroyed => true,
    }
}

/// Notify pacing: the elapsed time since the last notify, weighted by
/// `2 + pipe_sequence - notify_sequence`, must reach twice the notify
/// interval. A session never notified is always due.
pub fn notify_due(session: &PipeSession, now: Instant, config: &PipeConfig) -> bool {
    let Some(last) = session.timers().last_pipe_notified else {
        return true;
    };
    let lag = session
        .pipe_sequence()
        .saturating_sub(session.notify_sequence());
    let weight = u32::try_from(lag.saturating_add(2)).unwrap_or(u32::MAX);
    let weighted = now.saturating_duration_since(last).saturating_mul(weight);
    weighted >= config.notify_interval * 2
}

/// Client query loop give-up rule: too many failures, or no data for three
/// notify intervals.
pub fn query_expired(session: &PipeSession, now: Instant, config: &PipeConfig) -> bool {
    session.query_failed_retries() >= config.max_failed_retries
        || idle_for(session, now) > config.idle_window()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::handler::NoopHandler;

    fn live_session() -> PipeSession {
        let session = PipeSession::new(Arc::new(NoopHandler));
        session.set_key("Ab12Cd".parse().unwrap());
        session.set_alive(true);
        session
    }

    #[test]
    fn fresh_session_is_active() {
        let config = PipeConfig::default();
        let session = live_session();
        assert_eq!(
            assess(&session, Instant::now(), &config),
            LivenessState::Active
        );
    }

    #[test]
    fn retry_ceiling_forces_candidate() {
        let config = PipeConfig::default();
        let session = live_session();
        for _ in 0..3 {
            session.record_failure();
        }
        assert_eq!(
            assess(&session, Instant::now(), &config),
            LivenessState::CandidateDead
        );
    }

    #[test]
    fn idle_beyond_window_is_candidate() {
        let config = PipeConfig::default();
        let session = live_session();
        let start = session.timers().last_setup;
        assert_eq!(
            assess(&session, start + Duration::from_secs(75), &config),
            LivenessState::Active
        );
        assert_eq!(
            assess(&session, start + Duration::from_secs(76), &config),
            LivenessState::CandidateDead
        );

        session.record_traffic(start + Duration::from_secs(70));
        assert_eq!(
            assess(&session, start + Duration::from_secs(76), &config),
            LivenessState::Active
        );
    }

    #[test]
    fn destroy_waits_for_closing_grace() {
        let config = PipeConfig::default();
        let session = live_session();
        session.set_alive(false);
        let lld = session.timers().last_live_detected;

        assert!(!should_destroy(&session, lld + Duration::from_secs(5), &config));
        assert!(should_destroy(&session, lld + Duration::from_secs(6), &config));

        let patient = PipeSession::new(Arc::new(NoopHandler))
            .with_wait_closing(Duration::from_secs(60));
        let lld = patient.timers().last_live_detected;
        assert!(!should_destroy(&patient, lld + Duration::from_secs(6), &config));
    }

    #[test]
    fn notify_pacing_weighs_sequence_lag() {
        let config = PipeConfig::default();
        let session = live_session();
        let start = Instant::now();
        assert!(notify_due(&session, start, &config));

        session.mark_notified(start);
        // lag 0: weight 2, needs 25s
        assert!(!notify_due(&session, start + Duration::from_secs(24), &config));
        assert!(notify_due(&session, start + Duration::from_secs(25), &config));

        // lag 8: weight 10, needs 5s
        session.raise_pipe_sequence(9);
        assert!(!notify_due(&session, start + Duration::from_secs(4), &config));
        assert!(notify_due(&session, start + Duration::from_secs(5), &config));
    }

    #[test]
    fn query_gives_up() {
        let config = PipeConfig::default();
        let session = live_session();
        let start = session.timers().last_setup;
        assert!(!query_expired(&session, start, &config));
        assert!(query_expired(&session, start + Duration::from_secs(80), &config));

        for _ in 0..3 {
            session.record_failure();
        }
        assert!(query_expired(&session, start, &config));
    }
}
