use crate::types::{ConflictDecision, Resolution, StructuralOp, StructuralOpKind};

/// Pairwise structural conflict between `a` and `b`, or `None` when both can
/// apply. The outcome depends only on the two operations, never on which one
/// arrived first.
pub fn resolve_pair(a: &StructuralOp, b: &StructuralOp) -> Option<ConflictDecision> {
    let (resolution, reason) = classify(a, b)?;
    Some(ConflictDecision {
        a: a.id.clone(),
        b: b.id.clone(),
        resolution,
        reason,
    })
}

fn earlier_wins(a: &StructuralOp, b: &StructuralOp) -> Resolution {
    if a.precedes(b) {
        Resolution::AWins
    } else {
        Resolution::BWins
    }
}

fn later_wins(a: &StructuralOp, b: &StructuralOp) -> Resolution {
    if a.precedes(b) {
        Resolution::BWins
    } else {
        Resolution::AWins
    }
}

fn classify(a: &StructuralOp, b: &StructuralOp) -> Option<(Resolution, String)> {
    use StructuralOpKind::{Join, Reparent, Split};

    match (&a.op, &b.op) {
        (
            Split {
                block_id: block_a,
                offset: offset_a,
                new_block_id: new_a,
            },
            Split {
                block_id: block_b,
                offset: offset_b,
                new_block_id: new_b,
            },
        ) => {
            if new_a == new_b {
                return Some((
                    earlier_wins(a, b),
                    format!("both splits create block {new_a}; earlier split kept"),
                ));
            }
            if block_a == block_b && offset_a == offset_b {
                return Some((
                    earlier_wins(a, b),
                    format!("concurrent splits of {block_a} at offset {offset_a}; earlier split kept"),
                ));
            }
            None
        }
        (
            Join {
                left_block_id: left_a,
                right_block_id: right_a,
                ..
            },
            Join {
                left_block_id: left_b,
                right_block_id: right_b,
                ..
            },
        ) => {
            if left_a == right_b && left_b == right_a {
                return Some((
                    Resolution::Dropped,
                    format!("joins of {left_a} and {left_b} form a cycle; both dropped"),
                ));
            }
            if right_a == right_b {
                return Some((
                    earlier_wins(a, b),
                    format!("block {right_a} joined into two targets; earlier join kept"),
                ));
            }
            None
        }
        (Split { .. }, Join { .. }) => split_against_join(a, b).map(|reason| (Resolution::BWins, reason)),
        (Join { .. }, Split { .. }) => split_against_join(b, a).map(|reason| (Resolution::AWins, reason)),
        (
            Reparent {
                block_id: block_a,
                new_parent_id: parent_a,
                ..
            },
            Reparent {
                block_id: block_b,
                new_parent_id: parent_b,
                ..
            },
        ) => {
            if block_a == block_b {
                return Some((
                    later_wins(a, b),
                    format!("concurrent reparents of {block_a}; last writer wins"),
                ));
            }
            let cycle = parent_a.as_deref() == Some(block_b.as_str())
                && parent_b.as_deref() == Some(block_a.as_str());
            if cycle {
                return Some((
                    earlier_wins(a, b),
                    format!("reparenting {block_a} and {block_b} under each other; earlier reparent kept"),
                ));
            }
            None
        }
        (Reparent { .. }, Join { .. }) => {
            reparent_against_join(a, b).map(|reason| (Resolution::BWins, reason))
        }
        (Join { .. }, Reparent { .. }) => {
            reparent_against_join(b, a).map(|reason| (Resolution::AWins, reason))
        }
        (Split { .. }, Reparent { .. }) | (Reparent { .. }, Split { .. }) => None,
    }
}

/// A join wins over any split touching the blocks it merges.
fn split_against_join(split: &StructuralOp, join: &StructuralOp) -> Option<String> {
    let (
        StructuralOpKind::Split {
            block_id,
            new_block_id,
            ..
        },
        StructuralOpKind::Join {
            left_block_id,
            right_block_id,
            ..
        },
    ) = (&split.op, &join.op)
    else {
        return None;
    };

    let touched = [block_id, new_block_id]
        .iter()
        .any(|id| *id == left_block_id || *id == right_block_id);
    touched.then(|| format!("join of {left_block_id} and {right_block_id} supersedes split of {block_id}"))
}

fn reparent_against_join(reparent: &StructuralOp, join: &StructuralOp) -> Option<String> {
    let (
        StructuralOpKind::Reparent {
            block_id,
            new_parent_id,
            ..
        },
        StructuralOpKind::Join {
            left_block_id,
            right_block_id,
            ..
        },
    ) = (&reparent.op, &join.op)
    else {
        return None;
    };

    let consumed = block_id == right_block_id || new_parent_id.as_ref() == Some(right_block_id);
    consumed.then(|| format!("join into {left_block_id} consumes {right_block_id}; reparent of {block_id} dropped"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpId;

    fn id(peer: &str, counter: u64) -> OpId {
        OpId::new(peer, counter)
    }

    fn resolution(a: &StructuralOp, b: &StructuralOp) -> Option<Resolution> {
        resolve_pair(a, b).map(|decision| decision.resolution)
    }

    #[test]
    fn independent_ops_do_not_conflict() {
        let a = StructuralOp::split(id("a", 1), 1, "b1", 3, "n1");
        let b = StructuralOp::split(id("b", 1), 1, "b2", 3, "n2");
        assert_eq!(resolve_pair(&a, &b), None);
    }

    #[test]
    fn same_position_splits_keep_the_earlier() {
        let a = StructuralOp::split(id("a", 1), 2, "b1", 3, "n1");
        let b = StructuralOp::split(id("b", 1), 1, "b1", 3, "n2");
        assert_eq!(resolution(&a, &b), Some(Resolution::BWins));
        assert_eq!(resolution(&b, &a), Some(Resolution::AWins));
    }

    #[test]
    fn mutual_joins_are_both_dropped() {
        let a = StructuralOp::join(id("a", 1), 1, "x", "y", 4);
        let b = StructuralOp::join(id("b", 1), 1, "y", "x", 4);
        let decision = resolve_pair(&a, &b).expect("conflict");
        assert_eq!(decision.resolution, Resolution::Dropped);
        assert!(decision.reason.contains("cycle"));
    }

    #[test]
    fn join_beats_split_on_shared_block() {
        let split = StructuralOp::split(id("a", 1), 1, "y", 2, "n1");
        let join = StructuralOp::join(id("b", 1), 9, "x", "y", 4);
        assert_eq!(resolution(&split, &join), Some(Resolution::BWins));
        assert_eq!(resolution(&join, &split), Some(Resolution::AWins));
    }

    #[test]
    fn reparent_of_same_block_is_last_writer_wins() {
        let early = StructuralOp::reparent(id("a", 1), 1, "item", Some("list-1"), 0);
        let late = StructuralOp::reparent(id("b", 1), 2, "item", Some("list-2"), 0);
        assert_eq!(resolution(&early, &late), Some(Resolution::BWins));
        assert_eq!(resolution(&late, &early), Some(Resolution::AWins));
    }

    #[test]
    fn reparent_cycle_keeps_the_earlier() {
        let a = StructuralOp::reparent(id("a", 1), 1, "x", Some("y"), 0);
        let b = StructuralOp::reparent(id("b", 1), 1, "y", Some("x"), 0);
        assert_eq!(resolution(&a, &b), Some(Resolution::AWins));
    }

    #[test]
    fn reparent_into_consumed_block_loses() {
        let reparent = StructuralOp::reparent(id("a", 1), 5, "child", Some("y"), 0);
        let join = StructuralOp::join(id("b", 1), 1, "x", "y", 4);
        assert_eq!(resolution(&reparent, &join), Some(Resolution::BWins));
    }
}
