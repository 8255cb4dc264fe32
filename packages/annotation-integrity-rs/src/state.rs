use serde::{Deserialize, Serialize};

use crate::model::DisplayState;

/// Outcome of one span in a verification pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Located and its context hash matches.
    Verified,
    /// Located, hash not checked yet.
    Unverified,
    /// Located but verification failed.
    Failed,
    /// Target gone and every recovery tier failed.
    Unresolved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraceWindow {
    pub started_at_ms: Option<u64>,
    pub now_ms: u64,
    pub grace_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedState {
    pub state: DisplayState,
    pub grace_started_at_ms: Option<u64>,
}

/// Display state as a pure function of span outcomes, chain status and the
/// grace window. Recomputing with the same inputs yields the same state.
pub fn derive_display_state(spans: &[SpanStatus], chain_intact: Option<bool>, grace: GraceWindow) -> DerivedState {
    let resolved = spans
        .iter()
        .filter(|status| **status != SpanStatus::Unresolved)
        .count();
    if resolved == 0 {
        return DerivedState {
            state: DisplayState::Orphan,
            grace_started_at_ms: grace.started_at_ms,
        };
    }

    let failed = spans.contains(&SpanStatus::Failed) || chain_intact == Some(false);
    if failed {
        let started = grace.started_at_ms.unwrap_or(grace.now_ms);
        let state = if grace.now_ms.saturating_sub(started) < grace.grace_ms {
            DisplayState::BrokenGrace
        } else {
            DisplayState::Orphan
        };
        return DerivedState {
            state,
            grace_started_at_ms: Some(started),
        };
    }

    let state = if resolved < spans.len() {
        DisplayState::ActivePartial
    } else if spans.contains(&SpanStatus::Unverified) {
        DisplayState::ActiveUnverified
    } else {
        DisplayState::Active
    };
    DerivedState {
        state,
        grace_started_at_ms: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: u64 = 10_000;

    fn window(started_at_ms: Option<u64>, now_ms: u64) -> GraceWindow {
        GraceWindow {
            started_at_ms,
            now_ms,
            grace_ms: GRACE,
        }
    }

    fn state(spans: &[SpanStatus], chain: Option<bool>) -> DisplayState {
        derive_display_state(spans, chain, window(None, 0)).state
    }

    #[test]
    fn all_verified_is_active() {
        assert_eq!(state(&[SpanStatus::Verified, SpanStatus::Verified], Some(true)), DisplayState::Active);
    }

    #[test]
    fn partial_resolution() {
        assert_eq!(
            state(&[SpanStatus::Verified, SpanStatus::Unresolved], None),
            DisplayState::ActivePartial
        );
    }

    #[test]
    fn pending_hash_is_unverified() {
        assert_eq!(
            state(&[SpanStatus::Verified, SpanStatus::Unverified], None),
            DisplayState::ActiveUnverified
        );
    }

    #[test]
    fn nothing_resolved_is_orphan() {
        assert_eq!(state(&[SpanStatus::Unresolved], None), DisplayState::Orphan);
        assert_eq!(state(&[], None), DisplayState::Orphan);
    }

    #[test]
    fn failure_enters_grace_then_expires() {
        let first = derive_display_state(&[SpanStatus::Failed], None, window(None, 1_000));
        assert_eq!(first.state, DisplayState::BrokenGrace);
        assert_eq!(first.grace_started_at_ms, Some(1_000));

        let still = derive_display_state(&[SpanStatus::Failed], None, window(Some(1_000), 10_999));
        assert_eq!(still.state, DisplayState::BrokenGrace);

        let expired = derive_display_state(&[SpanStatus::Failed], None, window(Some(1_000), 11_000));
        assert_eq!(expired.state, DisplayState::Orphan);
        assert_eq!(expired.grace_started_at_ms, Some(1_000));
    }

    #[test]
    fn broken_chain_counts_as_failure() {
        assert_eq!(state(&[SpanStatus::Verified], Some(false)), DisplayState::BrokenGrace);
    }

    #[test]
    fn recovery_clears_grace() {
        let recovered = derive_display_state(&[SpanStatus::Verified], Some(true), window(Some(1_000), 50_000));
        assert_eq!(recovered.state, DisplayState::Active);
        assert_eq!(recovered.grace_started_at_ms, None);
    }
}
