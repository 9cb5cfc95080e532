/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Read-only fan-out over snapshot data.
//!
//! The match algorithm itself is sequential (greedy node ordering and
//! scratch bits interact), but the helpers around it — querying, node
//! duplication, the eligibility pre-pass — process disjoint index ranges
//! and merge cleanly.  Workers receive ranges of the input slice and post
//! results to a shared channel; the driver reassembles them in input
//! order, so callers observe a deterministic result regardless of worker
//! interleaving.

use std::sync::mpsc;
use std::thread;

/// Apply `f` to every element of `items`, fanning out across `workers`
/// threads over disjoint ranges.  Results come back in input order.
///
/// With one worker (or a tiny input) the fan-out degenerates to a plain
/// map on the calling thread.
pub fn fan_out<T, R, F>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let workers = workers.max(1);
    if workers == 1 || items.len() < workers * 2 {
        return items.iter().map(f).collect();
    }

    let chunk = items.len().div_ceil(workers);
    let (tx, rx) = mpsc::channel::<(usize, Vec<R>)>();

    thread::scope(|scope| {
        for (wi, range) in items.chunks(chunk).enumerate() {
            let tx = tx.clone();
            let f = &f;
            scope.spawn(move || {
                let out: Vec<R> = range.iter().map(f).collect();
                // The receiver outlives every sender inside the scope.
                let _ = tx.send((wi, out));
            });
        }
        drop(tx);

        let mut pieces: Vec<(usize, Vec<R>)> = rx.iter().collect();
        pieces.sort_by_key(|(wi, _)| *wi);
        pieces.into_iter().flat_map(|(_, v)| v).collect()
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_come_back_in_input_order() {
        let items: Vec<u64> = (0..1000).collect();
        let doubled = fan_out(&items, 4, |&x| x * 2);
        let expected: Vec<u64> = items.iter().map(|x| x * 2).collect();
        assert_eq!(doubled, expected);
    }

    #[test]
    fn single_worker_maps_inline() {
        let items = vec![1, 2, 3];
        assert_eq!(fan_out(&items, 1, |&x| x + 1), vec![2, 3, 4]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let items: Vec<u32> = Vec::new();
        assert!(fan_out(&items, 8, |&x| x).is_empty());
    }

    #[test]
    fn tiny_input_avoids_thread_spawn() {
        let items = vec![5];
        assert_eq!(fan_out(&items, 8, |&x| x * x), vec![25]);
    }
}
