use policy_manifest_rs::PolicyManifest;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_EVERY_OPS: u32 = 50;
const DEFAULT_EVERY_MS: u64 = 5_000;
const DEFAULT_DEBOUNCE_MS: u64 = 200;
const DEFAULT_GRACE_MS: u64 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointPolicy {
    pub enabled: Option<bool>,
    pub every_ops: Option<u32>,
    pub every_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    /// How long a failed annotation stays in `broken_grace`.
    pub grace_ms: Option<u64>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            enabled: Some(true),
            every_ops: Some(DEFAULT_EVERY_OPS),
            every_ms: Some(DEFAULT_EVERY_MS),
            debounce_ms: Some(DEFAULT_DEBOUNCE_MS),
            grace_ms: Some(DEFAULT_GRACE_MS),
        }
    }
}

impl CheckpointPolicy {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn every_ops(&self) -> u64 {
        u64::from(self.every_ops.unwrap_or(DEFAULT_EVERY_OPS).max(1))
    }

    pub fn every_ms(&self) -> u64 {
        self.every_ms.unwrap_or(DEFAULT_EVERY_MS).max(1)
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)
    }

    pub fn grace_ms(&self) -> u64 {
        self.grace_ms.unwrap_or(DEFAULT_GRACE_MS)
    }
}

impl From<&PolicyManifest> for CheckpointPolicy {
    fn from(manifest: &PolicyManifest) -> Self {
        let checkpoint = &manifest.integrity_policy.checkpoint;
        Self {
            enabled: Some(checkpoint.enabled),
            every_ops: Some(checkpoint.every_ops),
            every_ms: Some(checkpoint.every_ms),
            ..Self::default()
        }
    }
}

/// Checkpoint claimed by `poll`; hand it back through `complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointTicket {
    pub ops_covered: u64,
    pub high_priority: bool,
    pub started_at_ms: u64,
}

/// Owns a single outstanding timer (`next_deadline`) and a pending flag.
///
/// Time is always passed in explicitly; the host drives `poll` from its own
/// timer or event loop.
#[derive(Clone, Debug)]
pub struct CheckpointScheduler {
    policy: CheckpointPolicy,
    ops_since_last: u64,
    last_checkpoint_ms: u64,
    last_op_ms: Option<u64>,
    deadline: Option<u64>,
    pending: Option<CheckpointTicket>,
    high_priority: bool,
    disposed: bool,
}

impl CheckpointScheduler {
    pub fn new(policy: CheckpointPolicy, now_ms: u64) -> Self {
        Self {
            policy,
            ops_since_last: 0,
            last_checkpoint_ms: now_ms,
            last_op_ms: None,
            deadline: None,
            pending: None,
            high_priority: false,
            disposed: false,
        }
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    pub fn ops_since_last(&self) -> u64 {
        self.ops_since_last
    }

    pub fn last_checkpoint_ms(&self) -> u64 {
        self.last_checkpoint_ms
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// Count thresholds are met, or the interval elapsed with work queued.
    pub fn should_checkpoint(&self, now_ms: u64) -> bool {
        if self.ops_since_last == 0 {
            return false;
        }
        self.ops_since_last >= self.policy.every_ops()
            || now_ms.saturating_sub(self.last_checkpoint_ms) >= self.policy.every_ms()
    }

    /// While a checkpoint is pending this only increments the counter.
    pub fn record_operations(&mut self, count: u64, now_ms: u64) {
        if count == 0 {
            return;
        }
        self.ops_since_last = self.ops_since_last.saturating_add(count);
        self.last_op_ms = Some(now_ms);
        if self.pending.is_none() {
            self.reschedule(now_ms);
        }
    }

    /// Recovery-critical path: skip the debounce and fire on the next poll.
    pub fn trigger_high_priority(&mut self, now_ms: u64) {
        if self.disposed {
            return;
        }
        self.high_priority = true;
        if self.pending.is_none() {
            self.deadline = Some(now_ms);
        }
    }

    /// Claim the checkpoint when its deadline has passed.
    pub fn poll(&mut self, now_ms: u64) -> Option<CheckpointTicket> {
        if self.disposed || self.pending.is_some() {
            return None;
        }
        match self.deadline {
            Some(deadline) if deadline <= now_ms => Some(self.begin(now_ms)),
            _ => None,
        }
    }

    /// Claim a checkpoint immediately, whatever the deadline. `None` while
    /// another one is pending.
    pub fn begin_now(&mut self, now_ms: u64) -> Option<CheckpointTicket> {
        if self.pending.is_some() {
            return None;
        }
        Some(self.begin(now_ms))
    }

    fn begin(&mut self, now_ms: u64) -> CheckpointTicket {
        let ticket = CheckpointTicket {
            ops_covered: self.ops_since_last,
            high_priority: std::mem::take(&mut self.high_priority),
            started_at_ms: now_ms,
        };
        self.deadline = None;
        self.pending = Some(ticket);
        ticket
    }

    /// Applied even after `dispose`; operations recorded while the checkpoint
    /// ran stay counted for the next one.
    pub fn complete(&mut self, ticket: CheckpointTicket, now_ms: u64) {
        self.pending = None;
        self.ops_since_last = self.ops_since_last.saturating_sub(ticket.ops_covered);
        self.last_checkpoint_ms = now_ms;
        debug!(
            ops_covered = ticket.ops_covered,
            ops_remaining = self.ops_since_last,
            high_priority = ticket.high_priority,
            "checkpoint completed"
        );
        self.reschedule(now_ms);
    }

    /// Clears the timer. A checkpoint already running still completes.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.deadline = None;
    }

    fn reschedule(&mut self, now_ms: u64) {
        if self.disposed {
            self.deadline = None;
            return;
        }
        if self.high_priority {
            self.deadline = Some(now_ms);
            return;
        }
        if !self.policy.enabled() || self.ops_since_last == 0 {
            self.deadline = None;
            return;
        }

        let interval_deadline = self.last_checkpoint_ms.saturating_add(self.policy.every_ms());
        let count_deadline = (self.ops_since_last >= self.policy.every_ops()).then(|| {
            self.last_op_ms
                .unwrap_or(now_ms)
                .saturating_add(self.policy.debounce_ms())
        });
        let deadline = match count_deadline {
            Some(count) => count.min(interval_deadline),
            None => interval_deadline,
        };
        // an overdue deadline fires on the next poll
        self.deadline = Some(deadline.max(now_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(every_ops: u32, every_ms: u64, debounce_ms: u64) -> CheckpointPolicy {
        CheckpointPolicy {
            every_ops: Some(every_ops),
            every_ms: Some(every_ms),
            debounce_ms: Some(debounce_ms),
            ..CheckpointPolicy::default()
        }
    }

    #[test]
    fn idle_scheduler_has_no_deadline() {
        let scheduler = CheckpointScheduler::new(CheckpointPolicy::default(), 0);
        assert_eq!(scheduler.next_deadline(), None);
        assert!(!scheduler.should_checkpoint(1_000_000));
    }

    #[test]
    fn interval_fires_once_operations_exist() {
        let mut scheduler = CheckpointScheduler::new(policy(50, 5_000, 200), 0);
        scheduler.record_operations(1, 100);
        assert_eq!(scheduler.next_deadline(), Some(5_000));
        assert_eq!(scheduler.poll(4_999), None);
        assert!(scheduler.should_checkpoint(5_000));
        let ticket = scheduler.poll(5_000).expect("due");
        assert_eq!(ticket.ops_covered, 1);
    }

    #[test]
    fn op_threshold_fires_after_debounce() {
        let mut scheduler = CheckpointScheduler::new(policy(3, 60_000, 10), 0);
        scheduler.record_operations(2, 100);
        assert_eq!(scheduler.next_deadline(), Some(60_000));
        scheduler.record_operations(1, 105);
        assert_eq!(scheduler.next_deadline(), Some(115));
        scheduler.record_operations(1, 110);
        assert_eq!(scheduler.next_deadline(), Some(120));
        assert!(scheduler.poll(120).is_some());
    }

    #[test]
    fn interval_caps_the_debounce() {
        let mut scheduler = CheckpointScheduler::new(policy(1, 40, 30), 0);
        scheduler.record_operations(1, 35);
        assert_eq!(scheduler.next_deadline(), Some(40));
    }

    #[test]
    fn ops_during_pending_only_count() {
        let mut scheduler = CheckpointScheduler::new(policy(2, 1_000, 0), 0);
        scheduler.record_operations(2, 10);
        let ticket = scheduler.poll(10).expect("due");
        assert!(scheduler.is_pending());

        scheduler.record_operations(5, 12);
        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.poll(2_000), None);
        assert_eq!(scheduler.ops_since_last(), 7);

        scheduler.complete(ticket, 20);
        assert_eq!(scheduler.ops_since_last(), 5);
        assert_eq!(scheduler.last_checkpoint_ms(), 20);
        assert_eq!(scheduler.next_deadline(), Some(20));
    }

    #[test]
    fn high_priority_bypasses_debounce() {
        let mut scheduler = CheckpointScheduler::new(policy(50, 5_000, 200), 0);
        scheduler.record_operations(1, 10);
        scheduler.trigger_high_priority(11);
        assert_eq!(scheduler.next_deadline(), Some(11));
        let ticket = scheduler.poll(11).expect("due");
        assert!(ticket.high_priority);
    }

    #[test]
    fn high_priority_during_pending_runs_right_after() {
        let mut scheduler = CheckpointScheduler::new(policy(1, 5_000, 200), 0);
        scheduler.record_operations(1, 10);
        let ticket = scheduler.begin_now(10).expect("begin");
        scheduler.trigger_high_priority(12);
        assert_eq!(scheduler.next_deadline(), None);
        scheduler.complete(ticket, 15);
        assert_eq!(scheduler.next_deadline(), Some(15));
        assert!(scheduler.poll(15).expect("due").high_priority);
    }

    #[test]
    fn dispose_clears_timer_but_completion_applies() {
        let mut scheduler = CheckpointScheduler::new(policy(1, 5_000, 0), 0);
        scheduler.record_operations(3, 10);
        let ticket = scheduler.poll(10).expect("due");
        scheduler.dispose();
        scheduler.complete(ticket, 30);
        assert_eq!(scheduler.ops_since_last(), 0);
        assert_eq!(scheduler.last_checkpoint_ms(), 30);
        scheduler.record_operations(4, 40);
        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.poll(100_000), None);
    }

    #[test]
    fn disabled_policy_never_schedules() {
        let mut scheduler = CheckpointScheduler::new(
            CheckpointPolicy {
                enabled: Some(false),
                ..CheckpointPolicy::default()
            },
            0,
        );
        scheduler.record_operations(500, 10);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn policy_follows_manifest() {
        let mut manifest = PolicyManifest::default();
        manifest.integrity_policy.checkpoint.every_ops = 7;
        let policy = CheckpointPolicy::from(&manifest);
        assert_eq!(policy.every_ops(), 7);
        assert_eq!(policy.every_ms(), 5_000);
        assert_eq!(policy.grace_ms(), 10_000);
    }
}
