/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The node-bucket fast path.
//!
//! When every chunk of a request maps to whole, interchangeable nodes, the
//! matcher does not need to walk vnodes one by one — it can count.  Nodes
//! with equal static resource signatures form a [`NodeBucket`], which
//! tracks its members in three bitmaps: free now, busy, and busy-later
//! (free now but calendared).  Matching flips bits on a working copy;
//! checkpoints between chunks make backtracking cheap; the truth is only
//! changed when a request actually runs or ends.

use tracing::debug;

use crate::calendar::{Calendar, EventKind};
use crate::error::{FailCode, SchedError, Severity};
use crate::job::Request;
use crate::node::{find_nspec, NodeIdx, NodePool, Nspec};
use crate::resource::{check_avail_resources, CheckFlags, ResDefTable, Resource};

// ── Bitmap ────────────────────────────────────────────────────────────────────

/// A growable bitmap over node indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Bitmap {
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn get(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .map(|w| w & (1 << (bit % 64)) != 0)
            .unwrap_or(false)
    }

    pub fn set(&mut self, bit: usize) {
        if bit / 64 >= self.words.len() {
            self.words.resize(bit / 64 + 1, 0);
        }
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    pub fn clear(&mut self, bit: usize) {
        if let Some(w) = self.words.get_mut(bit / 64) {
            *w &= !(1 << (bit % 64));
        }
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Indices of set bits, ascending.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..64).filter_map(move |b| {
                if w & (1 << b) != 0 {
                    Some(wi * 64 + b)
                } else {
                    None
                }
            })
        })
    }
}

// ── BitPool ───────────────────────────────────────────────────────────────────

/// One membership pool with its three generations: the committed truth,
/// the working copy matching mutates, and a checkpoint for backtracking.
#[derive(Debug, Clone, Default)]
pub struct BitPool {
    pub truth: Bitmap,
    pub working: Bitmap,
    pub checkpoint: Bitmap,
}

impl BitPool {
    pub fn new(len: usize) -> Self {
        BitPool {
            truth: Bitmap::new(len),
            working: Bitmap::new(len),
            checkpoint: Bitmap::new(len),
        }
    }

    pub fn working_from_truth(&mut self) {
        self.working = self.truth.clone();
    }

    pub fn checkpoint_from_working(&mut self) {
        self.checkpoint = self.working.clone();
    }

    pub fn working_from_checkpoint(&mut self) {
        self.working = self.checkpoint.clone();
    }
}

// ── NodeBucket ────────────────────────────────────────────────────────────────

/// A set of interchangeable nodes (equal static resource signatures).
#[derive(Debug, Clone)]
pub struct NodeBucket {
    pub name: String,
    /// One member's worth of resources; every member matches it.
    pub res_spec: Vec<Resource>,
    pub members: Vec<NodeIdx>,
    pub free_pool: BitPool,
    pub busy_pool: BitPool,
    pub busy_later_pool: BitPool,
}

/// Group nodes into buckets by resource signature and seed the truth
/// pools from current node state.
pub fn create_node_buckets(
    defs: &ResDefTable,
    pool: &mut NodePool,
    nodes: &[NodeIdx],
) -> Vec<NodeBucket> {
    let len = pool.len();
    let mut buckets: Vec<NodeBucket> = Vec::new();
    let mut by_sig: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();

    for &ni in nodes {
        if pool.get(ni).nodesig.is_none() {
            let mut node = pool.get(ni).clone();
            node.compute_nodesig(defs);
            *pool.get_mut(ni) = node;
        }
        let sig = pool.get(ni).nodesig.unwrap_or_default();
        let bi = *by_sig.entry(sig).or_insert_with(|| {
            buckets.push(NodeBucket {
                name: format!("bucket:{:016x}", sig),
                res_spec: pool.dup_resolved_list(ni),
                members: Vec::new(),
                free_pool: BitPool::new(len),
                busy_pool: BitPool::new(len),
                busy_later_pool: BitPool::new(len),
            });
            buckets.len() - 1
        });

        let bucket = &mut buckets[bi];
        bucket.members.push(ni);
        let node = pool.get(ni);
        if node.num_jobs > 0 || node.num_run_resv > 0 || !node.state.is_free() {
            bucket.busy_pool.truth.set(ni);
        } else if node.num_events > 0 {
            bucket.busy_later_pool.truth.set(ni);
        } else {
            bucket.free_pool.truth.set(ni);
        }
        pool.get_mut(ni).bucket = Some(bi);
    }
    debug!(count = buckets.len(), "created node buckets");
    buckets
}

/// Flip one node's truth bit on run: free or busy-later becomes busy.
pub fn bucket_node_on_run(buckets: &mut [NodeBucket], node: NodeIdx, bucket: Option<usize>) {
    if let Some(bi) = bucket {
        let b = &mut buckets[bi];
        if b.free_pool.truth.get(node) {
            b.free_pool.truth.clear(node);
        } else {
            b.busy_later_pool.truth.clear(node);
        }
        b.busy_pool.truth.set(node);
    }
}

/// Flip one node's truth bit on end: busy returns to free or busy-later,
/// depending on whether calendared events still touch the node.
pub fn bucket_node_on_end(
    buckets: &mut [NodeBucket],
    node: NodeIdx,
    bucket: Option<usize>,
    has_events: bool,
) {
    if let Some(bi) = bucket {
        let b = &mut buckets[bi];
        b.busy_pool.truth.clear(node);
        if has_events {
            b.busy_later_pool.truth.set(node);
        } else {
            b.free_pool.truth.set(node);
        }
    }
}

// ── Chunk mapping ─────────────────────────────────────────────────────────────

/// Per-chunk bucket candidates and the nodes finally selected.
#[derive(Debug, Clone)]
pub struct ChunkMap {
    pub chunk_idx: usize,
    pub candidate_buckets: Vec<usize>,
    pub node_bits: Bitmap,
}

/// Should this request take the bucket path at all?
///
/// Buckets count whole nodes, so the request must place one chunk per node
/// (scatter/vscatter with excl), must not provision, and must not live
/// inside a reservation universe.
pub fn job_should_use_buckets(job: &Request) -> bool {
    (job.place.scatter || job.place.vscatter)
        && job.place.excl
        && job.aoe.is_none()
        && job.eoe.is_none()
        && !job.in_resv
}

/// Can the request run to completion on this node before the node's next
/// calendared run event?
pub fn node_can_fit_job_time(
    calendar: &Calendar,
    jobs: &[Request],
    node: NodeIdx,
    end_time: i64,
) -> bool {
    for ev in calendar.enabled() {
        if ev.kind != EventKind::Run || ev.time > end_time {
            continue;
        }
        if let Some(job) = jobs.get(ev.job) {
            if find_nspec(&job.nspecs, node).is_some() {
                return false;
            }
        }
    }
    true
}

/// Map each chunk to the buckets that could satisfy it.
pub fn find_correct_buckets(
    defs: &ResDefTable,
    buckets: &[NodeBucket],
    job: &Request,
    err: &mut SchedError,
) -> Option<Vec<ChunkMap>> {
    let mut maps = Vec::new();
    for (ci, chunk) in job.select.chunks.iter().enumerate() {
        let mut candidates = Vec::new();
        for (bi, bucket) in buckets.iter().enumerate() {
            let flags = CheckFlags {
                compare_total: true,
                unset_res_zero: true,
                check_all_bools: true,
                ..CheckFlags::NONE
            };
            let n = check_avail_resources(
                defs,
                &bucket.res_spec,
                &chunk.reqs,
                flags,
                None,
                FailCode::InsufficientResource,
                None,
                None,
            );
            if n >= 1.0 {
                candidates.push(bi);
            }
        }
        if candidates.is_empty() {
            err.set(Severity::NeverRun, FailCode::NoTotalNodes);
            return None;
        }
        maps.push(ChunkMap {
            chunk_idx: ci,
            candidate_buckets: candidates,
            node_bits: Bitmap::new(0),
        });
    }
    Some(maps)
}

/// Allocate whole nodes from the candidate buckets for every chunk.
///
/// Mutates working pools only; the truth is untouched.  Free nodes are
/// taken first, then busy-later nodes whose next busy time is past the
/// request's end.
pub fn bucket_match(
    buckets: &mut [NodeBucket],
    cmaps: &mut [ChunkMap],
    job: &Request,
    calendar: &Calendar,
    jobs: &[Request],
    server_time: i64,
    err: &mut SchedError,
) -> bool {
    for b in buckets.iter_mut() {
        b.free_pool.working_from_truth();
        b.busy_later_pool.working_from_truth();
    }
    let end_time = server_time + job.duration;

    for cmap in cmaps.iter_mut() {
        let chunk = &job.select.chunks[cmap.chunk_idx];
        let mut needed = chunk.count;
        cmap.node_bits = Bitmap::new(0);

        for b in buckets.iter_mut() {
            b.free_pool.checkpoint_from_working();
            b.busy_later_pool.checkpoint_from_working();
        }

        for &bi in &cmap.candidate_buckets {
            if needed == 0 {
                break;
            }
            let bucket = &mut buckets[bi];

            let free_now: Vec<usize> = bucket.free_pool.working.iter_set().collect();
            for ni in free_now {
                if needed == 0 {
                    break;
                }
                bucket.free_pool.working.clear(ni);
                cmap.node_bits.set(ni);
                needed -= 1;
            }

            let later: Vec<usize> = bucket.busy_later_pool.working.iter_set().collect();
            for ni in later {
                if needed == 0 {
                    break;
                }
                if node_can_fit_job_time(calendar, jobs, ni, end_time) {
                    bucket.busy_later_pool.working.clear(ni);
                    cmap.node_bits.set(ni);
                    needed -= 1;
                }
            }
        }

        if needed > 0 {
            debug!(
                job = %job.name,
                chunk = chunk.seq_num,
                short = needed,
                "bucket match failed"
            );
            for b in buckets.iter_mut() {
                b.free_pool.working_from_checkpoint();
                b.busy_later_pool.working_from_checkpoint();
            }
            err.set(Severity::NotRun, FailCode::NoFreeNodes);
            return false;
        }
    }
    true
}

/// Convert a successful bucket match into the nspec solution.
pub fn bucket_to_nspecs(job: &Request, cmaps: &[ChunkMap], sub_seq: &mut u32) -> Vec<Nspec> {
    let mut out = Vec::new();
    for cmap in cmaps {
        let chunk = &job.select.chunks[cmap.chunk_idx];
        for ni in cmap.node_bits.iter_set() {
            let mut ns = Nspec::new(ni);
            ns.resources = chunk.reqs.clone();
            ns.end_of_chunk = true;
            ns.seq_num = chunk.seq_num;
            ns.sub_seq_num = *sub_seq;
            *sub_seq += 1;
            out.push(ns);
        }
    }
    out
}

/// The full bucket code path: candidates, match, nspecs.
pub fn check_node_buckets(
    defs: &ResDefTable,
    buckets: &mut [NodeBucket],
    calendar: &Calendar,
    jobs: &[Request],
    server_time: i64,
    job: &Request,
    err: &mut SchedError,
) -> Option<Vec<Nspec>> {
    let mut cmaps = find_correct_buckets(defs, buckets, job, err)?;
    if !bucket_match(buckets, &mut cmaps, job, calendar, jobs, server_time, err) {
        return None;
    }
    let mut sub_seq = 0;
    Some(bucket_to_nspecs(job, &cmaps, &mut sub_seq))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::TimedEvent;
    use crate::node::Node;
    use crate::resource::{ResKind, Resource};
    use crate::select::{Place, SelSpec};

    fn defs() -> ResDefTable {
        ResDefTable::with_builtins()
    }

    fn node(defs: &ResDefTable, rank: u32, name: &str, host: &str, cpus: &str) -> Node {
        let mut n = Node::new(rank, name, host);
        n.res.push(
            Resource::with_avail(defs.lookup("ncpus").unwrap(), ResKind::Long, cpus).unwrap(),
        );
        n
    }

    fn scatter_excl_job(defs: &ResDefTable, select: &str) -> Request {
        let mut job = Request::new_job(
            "j1",
            SelSpec::parse(defs, select).unwrap(),
            Place::parse("scatter:excl").unwrap(),
        );
        job.duration = 3600;
        job
    }

    #[test]
    fn bitmap_set_get_count() {
        let mut bm = Bitmap::new(10);
        bm.set(3);
        bm.set(64);
        assert!(bm.get(3));
        assert!(bm.get(64));
        assert!(!bm.get(4));
        assert_eq!(bm.count(), 2);
        assert_eq!(bm.iter_set().collect::<Vec<_>>(), vec![3, 64]);
    }

    #[test]
    fn buckets_group_by_signature() {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "a", "ha", "4"));
        pool.push(node(&d, 1, "b", "hb", "4"));
        pool.push(node(&d, 2, "c", "hc", "16"));
        let nodes = pool.indices();
        let buckets = create_node_buckets(&d, &mut pool, &nodes);
        assert_eq!(buckets.len(), 2);
        let four = buckets.iter().find(|b| b.members.len() == 2).unwrap();
        assert_eq!(four.free_pool.truth.count(), 2);
    }

    #[test]
    fn busy_node_lands_in_busy_pool() {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "a", "ha", "4"));
        pool.get_mut(0).num_jobs = 1;
        let nodes = pool.indices();
        let buckets = create_node_buckets(&d, &mut pool, &nodes);
        assert_eq!(buckets[0].busy_pool.truth.count(), 1);
        assert_eq!(buckets[0].free_pool.truth.count(), 0);
    }

    #[test]
    fn match_takes_whole_free_nodes() {
        let d = defs();
        let mut pool = NodePool::new();
        for i in 0..3 {
            pool.push(node(&d, i, &format!("n{}", i), &format!("h{}", i), "4"));
        }
        let nodes = pool.indices();
        let mut buckets = create_node_buckets(&d, &mut pool, &nodes);
        let job = scatter_excl_job(&d, "2:ncpus=4");
        let mut err = SchedError::new();
        let ns = check_node_buckets(&d, &mut buckets, &Calendar::new(), &[], 0, &job, &mut err)
            .unwrap();
        assert_eq!(ns.len(), 2);
        assert!(ns.iter().all(|n| n.end_of_chunk));
        // truth untouched until commit
        assert_eq!(buckets[0].free_pool.truth.count(), 3);
    }

    #[test]
    fn match_fails_when_not_enough_nodes() {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "n0", "h0", "4"));
        let nodes = pool.indices();
        let mut buckets = create_node_buckets(&d, &mut pool, &nodes);
        let job = scatter_excl_job(&d, "2:ncpus=4");
        let mut err = SchedError::new();
        assert!(check_node_buckets(&d, &mut buckets, &Calendar::new(), &[], 0, &job, &mut err)
            .is_none());
        assert_eq!(err.code, FailCode::NoFreeNodes);
    }

    #[test]
    fn impossible_chunk_is_never_run() {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "n0", "h0", "4"));
        let nodes = pool.indices();
        let buckets = create_node_buckets(&d, &mut pool, &nodes);
        let job = scatter_excl_job(&d, "1:ncpus=64");
        let mut err = SchedError::new();
        assert!(find_correct_buckets(&d, &buckets, &job, &mut err).is_none());
        assert_eq!(err.severity, Severity::NeverRun);
        assert_eq!(err.code, FailCode::NoTotalNodes);
    }

    #[test]
    fn busy_later_node_used_only_if_job_fits_before_event() {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "n0", "h0", "4"));
        pool.get_mut(0).num_events = 1;
        let nodes = pool.indices();
        let mut buckets = create_node_buckets(&d, &mut pool, &nodes);
        assert_eq!(buckets[0].busy_later_pool.truth.count(), 1);

        // A reservation starts on n0 at t=1000.
        let mut resv = Request::new_resv("r1", SelSpec::parse(&d, "1:ncpus=4").unwrap(), Place::free());
        let mut ns = Nspec::new(0);
        ns.end_of_chunk = true;
        resv.nspecs.push(ns);
        let jobs = vec![resv];
        let mut cal = Calendar::new();
        cal.add(TimedEvent {
            kind: EventKind::Run,
            time: 1000,
            job: 0,
            disabled: false,
        });

        let mut short = scatter_excl_job(&d, "1:ncpus=4");
        short.duration = 500;
        let mut err = SchedError::new();
        assert!(
            check_node_buckets(&d, &mut buckets, &cal, &jobs, 0, &short, &mut err).is_some()
        );

        let mut long = scatter_excl_job(&d, "1:ncpus=4");
        long.duration = 2000;
        let mut err = SchedError::new();
        assert!(
            check_node_buckets(&d, &mut buckets, &cal, &jobs, 0, &long, &mut err).is_none()
        );
    }

    #[test]
    fn run_end_flips_truth_bits() {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "n0", "h0", "4"));
        let nodes = pool.indices();
        let mut buckets = create_node_buckets(&d, &mut pool, &nodes);
        bucket_node_on_run(&mut buckets, 0, Some(0));
        assert!(buckets[0].busy_pool.truth.get(0));
        assert!(!buckets[0].free_pool.truth.get(0));
        bucket_node_on_end(&mut buckets, 0, Some(0), false);
        assert!(buckets[0].free_pool.truth.get(0));
    }

    #[test]
    fn bucket_path_gate() {
        let d = defs();
        let mut ok = scatter_excl_job(&d, "1:ncpus=1");
        assert!(job_should_use_buckets(&ok));
        ok.aoe = Some("rhel8".to_string());
        assert!(!job_should_use_buckets(&ok));
        let free = Request::new_job(
            "j2",
            SelSpec::parse(&d, "1:ncpus=1").unwrap(),
            Place::free(),
        );
        assert!(!job_should_use_buckets(&free));
    }
}
