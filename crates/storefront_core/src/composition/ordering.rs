//! Sibling ordering for composition nodes.
//!
//! # Invariants
//! - Siblings without hints keep insertion order.
//! - `before`/`after` hints naming an existing sibling are always honored
//!   when the hints of a sibling group are acyclic.
//! - Default-hinted siblings precede siblings whose hints name nothing
//!   present, ties broken by insertion order.
//! - Contradictory hints (any cycle) leave the whole group in insertion order.
//! - Ordering is deterministic and never panics on inconsistent input.

use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

/// Sentinel target meaning "place first".
pub const FIRST: &str = "-";

/// Placement of a node relative to one sibling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingHint {
    Before(String),
    After(String),
}

impl Default for OrderingHint {
    fn default() -> Self {
        Self::Before(FIRST.to_string())
    }
}

impl OrderingHint {
    pub fn before(id: impl Into<String>) -> Self {
        Self::Before(id.into())
    }

    pub fn after(id: impl Into<String>) -> Self {
        Self::After(id.into())
    }

    pub fn first() -> Self {
        Self::default()
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Before(target) if target == FIRST)
    }

    fn before_target(&self) -> Option<&str> {
        match self {
            Self::Before(target) if target != FIRST => Some(target.as_str()),
            _ => None,
        }
    }

    fn after_target(&self) -> Option<&str> {
        match self {
            Self::After(target) => Some(target.as_str()),
            Self::Before(_) => None,
        }
    }
}

/// Pairwise precedence between two siblings.
///
/// Explicit references are consulted first, then the default-first rule,
/// otherwise the pair is `Equal` (insertion order decides). This relation is
/// not transitive in general, which is why `order_siblings` does not feed it
/// to a comparison sort.
pub fn compare_siblings(
    (a_id, a_hint): (&str, &OrderingHint),
    (b_id, b_hint): (&str, &OrderingHint),
) -> Ordering {
    if a_hint.before_target() == Some(b_id) || b_hint.after_target() == Some(a_id) {
        return Ordering::Less;
    }
    if b_hint.before_target() == Some(a_id) || a_hint.after_target() == Some(b_id) {
        return Ordering::Greater;
    }
    match (a_hint.is_default(), b_hint.is_default()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Outcome of ordering one sibling group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingOrder {
    /// Permutation of input positions.
    pub order: Vec<usize>,
    /// Sibling ids forming a contradictory cycle, when one was found.
    pub conflict: Option<Vec<String>>,
}

/// Orders siblings given in insertion order.
///
/// Explicit hints become precedence edges. Nodes are emitted by a stable
/// topological pass that prefers, among ready nodes, the one whose most
/// urgent successor ranks earliest (default-first, then insertion order).
pub fn order_siblings(siblings: &[(&str, &OrderingHint)]) -> SiblingOrder {
    let count = siblings.len();
    let positions: HashMap<&str, usize> = siblings
        .iter()
        .enumerate()
        .map(|(position, (id, _))| (*id, position))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (position, (_, hint)) in siblings.iter().enumerate() {
        if let Some(&target) = hint.before_target().and_then(|id| positions.get(id)) {
            if target != position {
                successors[position].push(target);
            }
        }
        if let Some(&target) = hint.after_target().and_then(|id| positions.get(id)) {
            if target != position {
                successors[target].push(position);
            }
        }
    }

    if let Some(cycle) = find_cycle(&successors) {
        return SiblingOrder {
            order: (0..count).collect(),
            conflict: Some(
                cycle
                    .into_iter()
                    .map(|position| siblings[position].0.to_string())
                    .collect(),
            ),
        };
    }

    // Defaults first, then everything else, each in insertion order.
    let mut rank = vec![0usize; count];
    let mut next_rank = 0;
    for pass_defaults in [true, false] {
        for (position, (_, hint)) in siblings.iter().enumerate() {
            if hint.is_default() == pass_defaults {
                rank[position] = next_rank;
                next_rank += 1;
            }
        }
    }

    let mut urgency: Vec<Option<usize>> = vec![None; count];
    for position in 0..count {
        effective_rank(position, &successors, &rank, &mut urgency);
    }

    let mut indegree = vec![0usize; count];
    for targets in &successors {
        for &target in targets {
            indegree[target] += 1;
        }
    }

    let mut ready = BinaryHeap::new();
    for position in 0..count {
        if indegree[position] == 0 {
            ready.push(Reverse(ready_key(position, &urgency, &rank)));
        }
    }

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse((_, _, position))) = ready.pop() {
        order.push(position);
        for &target in &successors[position] {
            indegree[target] -= 1;
            if indegree[target] == 0 {
                ready.push(Reverse(ready_key(target, &urgency, &rank)));
            }
        }
    }

    SiblingOrder {
        order,
        conflict: None,
    }
}

fn ready_key(position: usize, urgency: &[Option<usize>], rank: &[usize]) -> (usize, usize, usize) {
    (
        urgency[position].unwrap_or(rank[position]),
        rank[position],
        position,
    )
}

fn effective_rank(
    position: usize,
    successors: &[Vec<usize>],
    rank: &[usize],
    memo: &mut [Option<usize>],
) -> usize {
    if let Some(known) = memo[position] {
        return known;
    }
    let mut best = rank[position];
    for &target in &successors[position] {
        best = best.min(effective_rank(target, successors, rank, memo));
    }
    memo[position] = Some(best);
    best
}

fn find_cycle(successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn walk(
        position: usize,
        successors: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[position] = Mark::InProgress;
        stack.push(position);
        for &target in &successors[position] {
            match marks[target] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&entry| entry == target).unwrap_or(0);
                    return Some(stack[start..].to_vec());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = walk(target, successors, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[position] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; successors.len()];
    let mut stack = Vec::new();
    for position in 0..successors.len() {
        if marks[position] == Mark::Unvisited {
            if let Some(cycle) = walk(position, successors, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}
