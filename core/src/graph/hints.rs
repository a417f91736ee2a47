//! Externally supplied dependency hints and index-base disambiguation.
//!
//! Upstream hint generators are not reliable about whether their step indices
//! are 0-based or 1-based. Rather than assuming a convention, we count how
//! many hint edges land inside the plan under each hypothesis and pick the
//! one that explains more of them.

use serde::{Deserialize, Serialize};

/// One dependency hint from an upstream planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DependencyHint {
    /// An ordered `(producer, consumer)` pair: `to` depends on `from`.
    Edge { from: usize, to: usize },
    /// A step plus the set of steps it requires.
    Prereqs { step: usize, requires: Vec<usize> },
}

/// The index convention a hint batch was authored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBase {
    Zero,
    One,
}

/// Flatten hints into raw `(producer, consumer)` pairs in their original
/// (undisambiguated) numbering.
fn raw_edges(hints: &[DependencyHint]) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for hint in hints {
        match hint {
            DependencyHint::Edge { from, to } => edges.push((*from, *to)),
            DependencyHint::Prereqs { step, requires } => {
                for req in requires {
                    edges.push((*req, *step));
                }
            }
        }
    }
    edges
}

/// Decide which base the hints were authored in for an `n`-step plan.
///
/// The base explaining more edges wins. On an exact tie, 1-based wins iff
/// some hint references index `n` exactly — a telltale of 1-based authorship,
/// since no 0-based hint can legally name `n`.
pub fn resolve_index_base(hints: &[DependencyHint], n: usize) -> IndexBase {
    let edges = raw_edges(hints);
    let valid_zero = edges.iter().filter(|(f, t)| *f < n && *t < n).count();
    let valid_one = edges
        .iter()
        .filter(|(f, t)| (1..=n).contains(f) && (1..=n).contains(t))
        .count();

    if valid_one > valid_zero {
        IndexBase::One
    } else if valid_zero > valid_one {
        IndexBase::Zero
    } else if edges.iter().any(|(f, t)| *f == n || *t == n) {
        IndexBase::One
    } else {
        IndexBase::Zero
    }
}

/// Rebase hints to 0-based `(producer, consumer)` edges, dropping self-loops
/// and anything still out of range after rebasing.
pub fn normalize_hints(hints: &[DependencyHint], n: usize) -> Vec<(usize, usize)> {
    let base = resolve_index_base(hints, n);
    let offset = match base {
        IndexBase::Zero => 0usize,
        IndexBase::One => 1usize,
    };
    if base == IndexBase::One {
        log::debug!("dependency hints interpreted as 1-based");
    }

    let mut edges = Vec::new();
    for (from, to) in raw_edges(hints) {
        let (Some(from), Some(to)) = (from.checked_sub(offset), to.checked_sub(offset)) else {
            continue;
        };
        if from >= n || to >= n || from == to {
            continue;
        }
        if !edges.contains(&(from, to)) {
            edges.push((from, to));
        }
    }
    edges
}
