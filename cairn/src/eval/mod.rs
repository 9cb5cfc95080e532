/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The selspec evaluator: turns a parsed request plus a snapshot into a
//! concrete node solution.
//!
//! [`Evaluator::is_ok_to_run`] is the public entry point.  It applies the
//! calendar boundary checks, picks the placement-set universe, consults
//! the bucket fast path when the request qualifies, and otherwise drives
//! [`Evaluator::eval_selspec`]:
//!
//! ```text
//! eval_selspec            placement sets in order, spanning fallback
//!   eval_placement        pack / scatter / vscatter / free per hostset
//!     eval_complex_selspec  one chunk spec after another
//!       eval_simple_selspec   one chunk against a node list
//! ```
//!
//! Tentative consumption always happens on a clone of the node pool; the
//! real pool is only touched when the caller commits a returned solution.
//! Pool clones keep node indices valid, so a solution built against a
//! shadow needs no re-resolution.

pub mod eligibility;
pub mod shrink;
pub mod simulate;

use tracing::debug;

use crate::bucket::{check_node_buckets, job_should_use_buckets};
use crate::calendar::Calendar;
use crate::config::SchedConfig;
use crate::error::{FailCode, SchedError, Severity};
use crate::job::Request;
use crate::node::{NodeIdx, NodePool, Nspec};
use crate::partition::{can_fit_nodepart, Partition, PartitionFlags};
use crate::resource::{
    add_resource_list, check_avail_resources, CheckFlags, ResDefTable, Resource, ResourceReq,
    UNLIMITED,
};
use crate::select::Chunk;
use crate::snapshot::Snapshot;

use eligibility::{
    can_fit_on_vnode, check_node_array_eligibility, is_powerok, is_provisionable,
    is_vnode_eligible_chunk, Provision,
};
use simulate::check_resources_for_node;

// ── Context & flags ───────────────────────────────────────────────────────────

/// Read-only cycle context threaded through the evaluation tree.
pub struct EvalCtx<'a> {
    pub cfg: &'a SchedConfig,
    pub defs: &'a ResDefTable,
    pub calendar: &'a Calendar,
    pub jobs: &'a [Request],
    pub server_time: i64,
    pub has_multi_vnode: bool,
    pub provision_enable: bool,
    pub power_provisioning: bool,
}

/// Behavior switches threaded down the evaluation tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalFlags {
    /// A chunk may be broken across the vnodes of one host.
    pub ok_break: bool,
    /// The winning solution takes every vnode of the set.
    pub excl_set: bool,
    /// Retry over all nodes when no placement set fits.
    pub span_psets: bool,
}

impl EvalFlags {
    fn with_break(mut self) -> Self {
        self.ok_break = true;
        self
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Drives one request's evaluation against a snapshot.
///
/// Holds the per-evaluation monotonic sub-sequence counter and the
/// round-robin rotation point; everything else is per-call state.
pub struct Evaluator<'a> {
    cfg: &'a SchedConfig,
    sub_seq: u32,
    /// Name of the last node allocated under pack round-robin.
    last_node: Option<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(cfg: &'a SchedConfig) -> Self {
        Evaluator {
            cfg,
            sub_seq: 0,
            last_node: None,
        }
    }

    fn next_sub_seq(&mut self) -> u32 {
        let s = self.sub_seq;
        self.sub_seq += 1;
        s
    }

    // ── Top-level entry ───────────────────────────────────────────────────────

    /// Can the request run right now, and where?
    ///
    /// On success the returned nspec list satisfies every invariant of the
    /// solution: chunk sums match the select, the place directive holds,
    /// and `end_of_chunk` marks reconstruct chunk boundaries.
    pub fn is_ok_to_run(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
    ) -> Result<Vec<Nspec>, SchedError> {
        if let Some(code) = shrink::check_ded_time_boundary(self.cfg, snap.server_time, job) {
            return Err(SchedError::with(Severity::NotRun, code));
        }
        if let Some(code) =
            shrink::check_prime_boundary(self.cfg, snap.prime_status_end, snap.server_time, job)
        {
            return Err(SchedError::with(Severity::NotRun, code));
        }

        let grouping: Option<Vec<String>> = if let Some(g) = &job.place.group {
            Some(vec![g.clone()])
        } else if !self.cfg.node_group_key.is_empty() {
            Some(self.cfg.node_group_key.clone())
        } else {
            None
        };

        if grouping.is_none() && job_should_use_buckets(job) {
            let mut err = SchedError::new();
            let Snapshot {
                ref defs,
                ref mut buckets,
                ref calendar,
                ref jobs,
                server_time,
                ..
            } = *snap;
            if let Some(ns) =
                check_node_buckets(defs, buckets, calendar, jobs, server_time, job, &mut err)
            {
                return Ok(ns);
            }
            return Err(err);
        }

        let flags = EvalFlags {
            span_psets: !snap.dont_span_psets,
            ..EvalFlags::default()
        };
        let all_nodes = snap.pool.indices();
        let parts: Option<Vec<Partition>> = grouping.as_ref().map(|names| {
            let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
            snap.np_cache
                .find_or_create(
                    &snap.defs,
                    &snap.pool,
                    &all_nodes,
                    &name_refs,
                    PartitionFlags { create_rest: true },
                    None,
                )
                .to_vec()
        });

        self.eval_selspec(snap, job, &all_nodes, parts.as_deref(), flags)
    }

    /// Collect every blocking condition for a request in one pass.
    ///
    /// Where [`Evaluator::is_ok_to_run`] stops at the first rejection,
    /// this reports them all, so a submission can be annotated with the
    /// complete list of reasons: calendar-boundary conflicts first, then
    /// — via the return-all mode of the resource matcher — every chunk
    /// request the whole pool's total resources cannot cover.  Read-only;
    /// an empty list means nothing statically blocks the request.
    pub fn list_blockers(&self, snap: &Snapshot, job: &Request) -> Vec<SchedError> {
        let mut blockers: Vec<SchedError> = Vec::new();

        if let Some(code) = shrink::check_ded_time_boundary(self.cfg, snap.server_time, job) {
            blockers.push(SchedError::with(Severity::NotRun, code));
        }
        if let Some(code) =
            shrink::check_prime_boundary(self.cfg, snap.prime_status_end, snap.server_time, job)
        {
            blockers.push(SchedError::with(Severity::NotRun, code));
        }

        // Aggregate the whole pool, indirects resolved, so a mismatch here
        // means "no amount of waiting helps".
        let mut agg: Vec<Resource> = Vec::new();
        for ni in 0..snap.pool.len() {
            let resolved = snap.pool.dup_resolved_list(ni);
            add_resource_list(&snap.defs, &mut agg, &resolved, false);
        }

        let flags = CheckFlags {
            compare_total: true,
            unset_res_zero: true,
            check_all_bools: true,
            return_all_err: true,
            ..CheckFlags::NONE
        };
        for chunk in &job.select.chunks {
            let before = blockers.len();
            let mut err = SchedError::new();
            check_avail_resources(
                &snap.defs,
                &agg,
                &chunk.reqs,
                flags,
                None,
                FailCode::InsufficientResource,
                Some(&mut err),
                Some(&mut blockers),
            );
            if blockers.len() > before {
                continue;
            }
            // Every request fits once; the chunk count can still exceed
            // the pool.  Report each consumable that falls short of
            // count × amount.
            for req in &chunk.reqs {
                let def = snap.defs.get(req.def);
                if !def.consumable || req.amount <= 0.0 {
                    continue;
                }
                let avail = match crate::resource::find_resource(&agg, req.def) {
                    Some(res) if res.avail != UNLIMITED => res.avail,
                    _ => continue,
                };
                let needed = chunk.count as f64 * req.amount;
                if avail < needed {
                    let mut e =
                        SchedError::with(Severity::NotRun, FailCode::InsufficientResource);
                    e.rdef = Some(def.name.clone());
                    e.arg1 = Some(format!(
                        "(R: {} A: {} T: {})",
                        crate::resource::amount_to_str(def.kind, needed),
                        crate::resource::amount_to_str(def.kind, avail),
                        crate::resource::amount_to_str(def.kind, avail)
                    ));
                    blockers.push(e);
                }
            }
        }

        debug!(job = %job.name, count = blockers.len(), "collected run blockers");
        blockers
    }

    // ── eval_selspec ──────────────────────────────────────────────────────────

    /// Evaluate a request against a node list, optionally constrained to
    /// placement sets tried in order.
    pub fn eval_selspec(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
        nodes: &[NodeIdx],
        nodepart: Option<&[Partition]>,
        mut flags: EvalFlags,
    ) -> Result<Vec<Nspec>, SchedError> {
        let mut err = SchedError::new();
        let mut failerr = SchedError::new();

        let server_time = snap.server_time;
        let has_multi_vnode = snap.has_multi_vnode;
        let provision_enable = snap.provision_enable;
        let power_provisioning = snap.power_provisioning;

        let Snapshot {
            ref mut pool,
            ref mut np_cache,
            ref defs,
            ref calendar,
            ref jobs,
            ref hostsets,
            ..
        } = *snap;

        let ctx = EvalCtx {
            cfg: self.cfg,
            defs,
            calendar,
            jobs,
            server_time,
            has_multi_vnode,
            provision_enable,
            power_provisioning,
        };

        pool.clear_search_bits(nodes);

        let pl = job.place.clone();
        check_node_array_eligibility(&ctx, pool, job, &pl, nodes, &mut err);
        failerr.absorb_if_unset(&err);
        err.clear();

        // Host partitions for the full node list, built once.
        let all_hostsets: Vec<Partition> = if nodes.len() == pool.len() {
            hostsets.clone()
        } else {
            np_cache
                .find_or_create(defs, pool, nodes, &["host"], PartitionFlags::default(), None)
                .to_vec()
        };

        if nodepart.is_none() {
            if ctx.has_multi_vnode && ok_break_chunk(pool, nodes) {
                flags = flags.with_break();
            }
            let result =
                self.eval_placement(&ctx, pool, &all_hostsets, job, nodes, flags, &mut err);
            return match result {
                Some(mut ns) => {
                    if flags.excl_set {
                        self.alloc_rest_nodepart(&mut ns, nodes);
                    }
                    Ok(ns)
                }
                None => {
                    if !err.is_set() && failerr.is_set() {
                        err = failerr;
                    }
                    Err(err)
                }
            };
        }

        let parts = nodepart.unwrap_or(&[]);
        let mut can_fit = false;
        for part in parts {
            err.clear();
            if can_fit_nodepart(defs, part, &job.select, false, &mut err) {
                debug!(job = %job.name, set = %part.name, "evaluating placement set");
                let mut pflags = flags;
                if part.ok_break {
                    pflags = pflags.with_break();
                }
                if part.excl {
                    pflags.excl_set = true;
                }

                let part_hostsets: Vec<Partition> = np_cache
                    .find_or_create(
                        defs,
                        pool,
                        &part.nodes,
                        &["host"],
                        PartitionFlags::default(),
                        None,
                    )
                    .to_vec();
                match self.eval_placement(
                    &ctx,
                    pool,
                    &part_hostsets,
                    job,
                    &part.nodes,
                    pflags,
                    &mut err,
                ) {
                    Some(mut ns) => {
                        job.nodepart_name = Some(part.name.clone());
                        if part.excl {
                            let member_nodes = part.nodes.clone();
                            self.alloc_rest_for(&mut ns, &member_nodes);
                        }
                        return Ok(ns);
                    }
                    None => {
                        failerr.absorb_if_unset(&err);
                    }
                }
            } else {
                debug!(job = %job.name, set = %part.name, reason = %err, "placement set is too small");
                err.set(Severity::NotRun, FailCode::SetTooSmall);
                err.arg1 = Some("Placement".to_string());
                err.arg2 = Some(part.name.clone());
                failerr.absorb_if_unset(&err);
            }

            if !can_fit {
                let mut total_err = SchedError::new();
                if can_fit_nodepart(defs, part, &job.select, true, &mut total_err) {
                    can_fit = true;
                }
            }
        }

        if !can_fit {
            if flags.span_psets {
                debug!(job = %job.name, "request won't fit into any placement set, will use all nodes");
                job.can_not_fit = true;
                let mut sflags = flags;
                if ctx.has_multi_vnode && ok_break_chunk(pool, nodes) {
                    sflags = sflags.with_break();
                }
                err.clear();
                if let Some(ns) =
                    self.eval_placement(&ctx, pool, &all_hostsets, job, nodes, sflags, &mut err)
                {
                    return Ok(ns);
                }
            } else {
                // Stronger than anything recorded while probing the sets.
                let mut span_err = SchedError::with(Severity::NeverRun, FailCode::CantSpanPset);
                std::mem::swap(&mut err, &mut span_err);
                return Err(err);
            }
        }

        if !err.is_set() && failerr.is_set() {
            err = failerr;
        }
        if !err.is_set() {
            err.set(Severity::NotRun, FailCode::NoNodeResources);
        }
        Err(err)
    }

    // ── eval_placement ────────────────────────────────────────────────────────

    /// Place every chunk under the request's arrangement directive,
    /// walking the given host sets.
    #[allow(clippy::too_many_arguments)]
    fn eval_placement(
        &mut self,
        ctx: &EvalCtx<'_>,
        pool: &mut NodePool,
        hostsets: &[Partition],
        job: &mut Request,
        nodes: &[NodeIdx],
        flags: EvalFlags,
        err: &mut SchedError,
    ) -> Option<Vec<Nspec>> {
        let reordered: Vec<NodeIdx> = if (job.place.pack && job.select.total_chunks == 1)
            || (self.cfg.provision_policy == crate::config::ProvisionPolicy::Avoid
                && job.aoe.is_some())
        {
            self.reorder_nodes(ctx, pool, job, nodes)
        } else {
            nodes.to_vec()
        };

        // Single-vnoded systems short-circuit to the chunk-by-chunk walk
        // (multi-chunk pack still needs hostset iteration).
        if !ctx.has_multi_vnode && (!job.place.pack || job.select.total_chunks == 1) {
            return self.eval_complex_selspec(ctx, pool, job, &reordered, flags, err, 0);
        }

        let pl = job.place.clone();
        let total = job.select.total_chunks;
        let mut remaining: Vec<u32> = job.select.chunks.iter().map(|c| c.count).collect();
        let chunks: Vec<Chunk> = job.select.chunks.clone();
        let mut out: Vec<Nspec> = Vec::new();
        let mut tot = 0u32;
        let mut failerr = SchedError::new();

        for hs in hostsets {
            if tot == total {
                break;
            }
            let sharing = hs
                .nodes
                .first()
                .map(|&n| pool.get(n).sharing)
                .unwrap_or_default();
            let do_exclhost = crate::node::is_exclhost(&pl, sharing);
            let mut hflags = flags;
            hflags.excl_set = do_exclhost;

            debug!(job = %job.name, host = %hs.res_val, "evaluating host");
            let chunk_start = out.len();
            let mut any_succ = false;

            if pl.pack {
                err.clear();
                match self.eval_complex_selspec(
                    ctx,
                    pool,
                    job,
                    &hs.nodes,
                    hflags.with_break(),
                    err,
                    0,
                ) {
                    Some(ns) => {
                        tot = total;
                        out.extend(ns);
                        if do_exclhost {
                            let rest: Vec<Nspec> = {
                                let mut tail = out.split_off(chunk_start);
                                self.alloc_rest_for(&mut tail, &hs.nodes);
                                tail
                            };
                            out.extend(rest);
                        }
                    }
                    None => {
                        failerr.absorb_if_unset(err);
                        err.clear();
                    }
                }
            } else if pl.vscatter {
                for (ci, chunk) in chunks.iter().enumerate() {
                    if remaining[ci] == 0 {
                        continue;
                    }
                    if hs.free_nodes > 0 && host_aggregate_fits(ctx, hs, chunk, err) {
                        for &ni in &hs.nodes {
                            pool.get_mut(ni).scratch.visited = false;
                        }
                        loop {
                            if remaining[ci] == 0 {
                                break;
                            }
                            match self.eval_simple_selspec(ctx, pool, chunk, &hs.nodes, job, hflags, err)
                            {
                                Some(ns_chunk) => {
                                    any_succ = true;
                                    tot += 1;
                                    remaining[ci] -= 1;
                                    for ns in &ns_chunk {
                                        pool.get_mut(ns.node).scratch.scattered = true;
                                    }
                                    out.extend(ns_chunk);
                                }
                                None => {
                                    failerr.absorb_if_unset(err);
                                    err.clear();
                                    break;
                                }
                            }
                        }
                    } else {
                        log_host_too_small(job, hs, err);
                        failerr.absorb_if_unset(err);
                        err.clear();
                    }
                }
                if do_exclhost && any_succ {
                    let mut tail = out.split_off(chunk_start);
                    self.alloc_rest_for(&mut tail, &hs.nodes);
                    out.extend(tail);
                }
            } else if pl.scatter {
                let mut placed_here = false;
                for (ci, chunk) in chunks.iter().enumerate() {
                    if placed_here || remaining[ci] == 0 {
                        continue;
                    }
                    if hs.free_nodes > 0 && host_aggregate_fits(ctx, hs, chunk, err) {
                        for &ni in &hs.nodes {
                            pool.get_mut(ni).scratch.visited = false;
                        }
                        match self.eval_simple_selspec(
                            ctx,
                            pool,
                            chunk,
                            &hs.nodes,
                            job,
                            hflags.with_break(),
                            err,
                        ) {
                            Some(ns_chunk) => {
                                placed_here = true;
                                any_succ = true;
                                tot += 1;
                                remaining[ci] -= 1;
                                out.extend(ns_chunk);
                            }
                            None => {
                                failerr.absorb_if_unset(err);
                                err.clear();
                            }
                        }
                    } else {
                        log_host_too_small(job, hs, err);
                        failerr.absorb_if_unset(err);
                        err.clear();
                    }
                }
                if do_exclhost && any_succ {
                    let mut tail = out.split_off(chunk_start);
                    self.alloc_rest_for(&mut tail, &hs.nodes);
                    out.extend(tail);
                }
            } else if pl.free {
                // Allocate as much as the host holds, consuming tentatively
                // on a shadow of the pool.
                let mut shadow = pool.clone();
                for (ci, chunk) in chunks.iter().enumerate() {
                    if remaining[ci] == 0 {
                        continue;
                    }
                    if hs.free_nodes > 0 && host_aggregate_fits(ctx, hs, chunk, err) {
                        for &ni in &hs.nodes {
                            shadow.get_mut(ni).scratch.visited = false;
                        }
                        loop {
                            match self.eval_simple_selspec(
                                ctx,
                                &mut shadow,
                                chunk,
                                &hs.nodes,
                                job,
                                hflags.with_break(),
                                err,
                            ) {
                                Some(ns_chunk) => {
                                    any_succ = true;
                                    tot += 1;
                                    remaining[ci] -= 1;
                                    apply_nspec_assigned(&mut shadow, ctx.defs, &ns_chunk);
                                    out.extend(ns_chunk);
                                    if remaining[ci] == 0 {
                                        break;
                                    }
                                }
                                None => {
                                    failerr.absorb_if_unset(err);
                                    err.clear();
                                    break;
                                }
                            }
                        }
                    } else {
                        log_host_too_small(job, hs, err);
                        failerr.absorb_if_unset(err);
                        err.clear();
                    }
                }
                if do_exclhost && any_succ {
                    let mut tail = out.split_off(chunk_start);
                    self.alloc_rest_for(&mut tail, &hs.nodes);
                    out.extend(tail);
                }
            } else {
                debug!(job = %job.name, "unexpected placement: not scatter, vscatter, pack, or free");
            }
        }

        if tot == total {
            return Some(out);
        }
        if !err.is_set() && failerr.is_set() {
            *err = failerr;
        }
        None
    }

    // ── eval_complex_selspec ──────────────────────────────────────────────────

    /// Walk a plus'd select spec chunk by chunk against one node list.
    ///
    /// Non-scatter arrangements consume tentatively on a shadow pool.  If
    /// the solution lands on nodes that refuse multi-node work, the walk
    /// re-satisfies once with `will_use_multinode` set (the no-multinode
    /// node set never grows during a cycle, so one retry terminates).
    #[allow(clippy::too_many_arguments)]
    fn eval_complex_selspec(
        &mut self,
        ctx: &EvalCtx<'_>,
        pool: &mut NodePool,
        job: &mut Request,
        nodes: &[NodeIdx],
        flags: EvalFlags,
        err: &mut SchedError,
        depth: u8,
    ) -> Option<Vec<Nspec>> {
        if job.select.total_chunks == 1 {
            let chunk = job.select.chunks[0].clone();
            return self.eval_simple_selspec(ctx, pool, &chunk, nodes, job, flags, err);
        }

        let scatter = job.place.scatter || job.place.vscatter;
        let mut shadow_store;
        let work: &mut NodePool = if scatter {
            for &ni in nodes {
                pool.get_mut(ni).scratch.scattered = false;
            }
            &mut *pool
        } else {
            shadow_store = pool.clone();
            &mut shadow_store
        };

        let chunks: Vec<Chunk> = job.select.chunks.clone();
        let mut out: Vec<Nspec> = Vec::new();
        let mut num_nodes_used = 0usize;
        let mut num_no_multi = 0usize;
        let mut ok = true;

        'outer: for chunk in &chunks {
            for &ni in nodes {
                work.get_mut(ni).scratch.visited = false;
            }
            for _ in 0..chunk.count {
                match self.eval_simple_selspec(ctx, work, chunk, nodes, job, flags, err) {
                    Some(ns_chunk) => {
                        for ns in &ns_chunk {
                            num_nodes_used += 1;
                            if work.get(ns.node).no_multinode_jobs {
                                num_no_multi += 1;
                            }
                            if scatter {
                                work.get_mut(ns.node).scratch.scattered = true;
                            }
                        }
                        if !scatter {
                            apply_nspec_assigned(work, ctx.defs, &ns_chunk);
                        }
                        out.extend(ns_chunk);
                    }
                    None => {
                        ok = false;
                        break 'outer;
                    }
                }
            }
        }

        if !ok {
            return None;
        }
        if num_no_multi == 0 || (num_no_multi == 1 && num_nodes_used == 1) {
            return Some(out);
        }

        // The solution uses nodes which asked to be excluded from
        // multi-node work: re-satisfy without them.
        if depth > 0 {
            return None;
        }
        job.will_use_multinode = true;
        debug!(job = %job.name, "used multiple nodes with no_multinode_jobs set, re-satisfying");
        self.eval_complex_selspec(ctx, pool, job, nodes, flags, err, depth + 1)
    }

    // ── eval_simple_selspec ───────────────────────────────────────────────────

    /// Match one chunk against a node list, producing at most one chunk's
    /// worth of nspecs.
    #[allow(clippy::too_many_arguments)]
    fn eval_simple_selspec(
        &mut self,
        ctx: &EvalCtx<'_>,
        pool: &mut NodePool,
        chunk: &Chunk,
        nodes: &[NodeIdx],
        job: &Request,
        mut flags: EvalFlags,
        err: &mut SchedError,
    ) -> Option<Vec<Nspec>> {
        // If the whole chunk fits on a single vnode, prefer that over
        // breaking it up.
        if flags.ok_break && can_fit_on_vnode(ctx, pool, &chunk.reqs, nodes) {
            flags.ok_break = false;
        }

        // Breaking consumes partial amounts as it walks, so it works on a
        // clone: indirect-resource accounting rolls back for free on
        // failure.
        let mut shadow_store;
        let work: &mut NodePool = if flags.ok_break {
            shadow_store = pool.clone();
            &mut shadow_store
        } else {
            &mut *pool
        };

        debug!(job = %job.name, subchunk = chunk.sub_chunk_text(), "evaluating subchunk");

        let split = chunk
            .reqs
            .iter()
            .position(|r| ctx.defs.get(r.def).consumable)
            .unwrap_or(chunk.reqs.len());
        let noncons = &chunk.reqs[..split];
        let mut cons_remaining: Vec<ResourceReq> = chunk.reqs[split..].to_vec();

        let aoe_def = ctx.defs.lookup("aoe");
        let prov_needed = job.aoe.is_some()
            && (job.place.pack || chunk.reqs.iter().any(|r| Some(r.def) == aoe_def));

        let mut out: Vec<Nspec> = Vec::new();
        let mut chunks_found = false;
        let mut failerr = SchedError::new();

        for &ni in nodes {
            if work.get(ni).scratch.blocks_search() {
                continue;
            }
            err.clear();

            if !work.get(ni).licensed {
                err.set(Severity::NotRun, FailCode::NodeUnlicensed);
            } else if is_vnode_eligible_chunk(ctx, work, ni, noncons, Some(job), err) {
                let allocated = if flags.ok_break {
                    self.alloc_partial_chunk(ctx, work, ni, &mut cons_remaining, job, prov_needed, err)
                } else {
                    self.alloc_whole_chunk(ctx, work, ni, &cons_remaining, job, prov_needed, err)
                };
                match allocated {
                    Some(mut ns) => {
                        ns.seq_num = chunk.seq_num;
                        ns.sub_seq_num = self.next_sub_seq();
                        if flags.ok_break {
                            let done = cons_remaining.iter().all(|r| r.amount <= 0.0);
                            if done {
                                ns.end_of_chunk = true;
                                out.push(ns);
                                chunks_found = true;
                                break;
                            }
                            out.push(ns);
                            continue;
                        }
                        ns.end_of_chunk = true;
                        out.push(ns);
                        chunks_found = true;
                        break;
                    }
                    None => {
                        work.get_mut(ni).scratch.visited = true;
                        failerr.absorb_if_unset(err);
                    }
                }
            } else {
                work.get_mut(ni).scratch.visited = true;
                failerr.absorb_if_unset(err);
            }

            if err.is_set() {
                debug!(node = %work.get(ni).name, reason = %err, "node rejected");
                // A node that can never satisfy the chunk rules out every
                // node with the same signature for the rest of the cycle.
                // Skipped while breaking, where the chunk degenerates to
                // single units.
                if !flags.ok_break {
                    if let Some(sig) = work.get(ni).nodesig {
                        let total_flags = CheckFlags {
                            compare_total: true,
                            unset_res_zero: true,
                            check_all_bools: true,
                            ..CheckFlags::NONE
                        };
                        let mut sweep_err = SchedError::new();
                        if eligibility::check_avail_on_node(
                            ctx,
                            work,
                            ni,
                            &chunk.reqs,
                            total_flags,
                            FailCode::InsufficientResource,
                            Some(&mut sweep_err),
                        ) == 0.0
                        {
                            debug!(signature = sig, "marking equivalent nodes ineligible");
                            for &other in nodes {
                                if work.get(other).nodesig == Some(sig) {
                                    work.get_mut(other).scratch.visited = true;
                                }
                            }
                        }
                    }
                }
            }
        }

        if chunks_found {
            debug!(job = %job.name, subchunk = chunk.sub_chunk_text(), "allocated one subchunk");
            err.clear();
            return Some(out);
        }

        debug!(job = %job.name, subchunk = %chunk.text, "failed to satisfy subchunk");
        if !err.is_set() && failerr.is_set() {
            *err = failerr;
        }
        // Not specific to one node anymore.
        err.arg1 = None;
        None
    }

    /// Allocate a whole chunk's consumables from one vnode.
    #[allow(clippy::too_many_arguments)]
    fn alloc_whole_chunk(
        &mut self,
        ctx: &EvalCtx<'_>,
        work: &mut NodePool,
        ni: NodeIdx,
        cons: &[ResourceReq],
        job: &Request,
        prov_needed: bool,
        err: &mut SchedError,
    ) -> Option<Nspec> {
        let num_chunks = if cons.is_empty() {
            UNLIMITED
        } else {
            check_resources_for_node(ctx, work, ni, job, cons, err)
        };
        if num_chunks < 1.0 {
            return None;
        }

        let mut go_provision = false;
        match is_provisionable(ctx, work, ni, job, prov_needed, err) {
            Provision::NotProvisionable => return None,
            Provision::Needed => {
                go_provision = true;
                if job.select.total_chunks > 1 && !job.place.scatter && !job.place.vscatter {
                    work.get_mut(ni).current_aoe = job.aoe.clone();
                }
                debug!(node = %work.get(ni).name, aoe = ?job.aoe, "vnode selected for provisioning");
            }
            Provision::NotNeeded => {}
        }
        match is_powerok(ctx, work, ni, job, err) {
            Provision::NotProvisionable => return None,
            Provision::Needed => {
                if job.select.total_chunks > 1 && !job.place.scatter && !job.place.vscatter {
                    work.get_mut(ni).current_eoe = job.eoe.clone();
                }
                debug!(node = %work.get(ni).name, eoe = ?job.eoe, "vnode selected for power provisioning");
            }
            Provision::NotNeeded => {}
        }

        let mut ns = Nspec::new(ni);
        ns.resources = cons.to_vec();
        if go_provision {
            ns.go_provision = true;
            if let (Some(def), Some(aoe)) = (ctx.defs.lookup("aoe"), &job.aoe) {
                ns.resources.insert(
                    0,
                    ResourceReq {
                        def,
                        amount: 0.0,
                        str_val: aoe.clone(),
                    },
                );
            }
        }

        if job.place.pack && self.cfg.smp_cluster_dist == crate::config::SmpClusterDist::RoundRobin
        {
            self.last_node = Some(work.get(ni).name.clone());
        }
        debug!(node = %work.get(ni).name, "node allocated to job");
        Some(ns)
    }

    /// Allocate whatever part of the remaining consumables this vnode can
    /// cover, decrementing `cons_remaining` and consuming on the shadow.
    #[allow(clippy::too_many_arguments)]
    fn alloc_partial_chunk(
        &mut self,
        ctx: &EvalCtx<'_>,
        work: &mut NodePool,
        ni: NodeIdx,
        cons_remaining: &mut [ResourceReq],
        job: &Request,
        prov_needed: bool,
        err: &mut SchedError,
    ) -> Option<Nspec> {
        let mut ns = Nspec::new(ni);
        let mut allocated = false;
        let mut go_provision = false;

        for req in cons_remaining.iter_mut() {
            if req.amount <= 0.0 {
                continue;
            }
            let unit = ResourceReq {
                def: req.def,
                amount: 1.0,
                str_val: req.str_val.clone(),
            };
            let units = check_resources_for_node(ctx, work, ni, job, std::slice::from_ref(&unit), err);
            if units < 1.0 {
                continue;
            }

            match is_provisionable(ctx, work, ni, job, prov_needed, err) {
                Provision::NotProvisionable => return None,
                Provision::Needed => {
                    go_provision = true;
                    if job.select.total_chunks > 1 && !job.place.scatter && !job.place.vscatter {
                        work.get_mut(ni).current_aoe = job.aoe.clone();
                    }
                }
                Provision::NotNeeded => {}
            }
            match is_powerok(ctx, work, ni, job, err) {
                Provision::NotProvisionable => return None,
                Provision::Needed => {
                    if job.select.total_chunks > 1 && !job.place.scatter && !job.place.vscatter {
                        work.get_mut(ni).current_eoe = job.eoe.clone();
                    }
                }
                Provision::NotNeeded => {}
            }

            let amount = if units == UNLIMITED {
                req.amount
            } else {
                units.min(req.amount)
            };
            ns.resources.push(ResourceReq {
                def: req.def,
                amount,
                str_val: req.str_val.clone(),
            });
            req.amount -= amount;
            work.add_assigned(ni, req.def, amount);
            let kind = ctx.defs.get(req.def).kind;
            debug!(
                node = %work.get(ni).name,
                resource = %ctx.defs.name(req.def),
                amount = %crate::resource::amount_to_str(kind, amount),
                "vnode allocated partial chunk"
            );
            allocated = true;
        }

        if !allocated {
            return None;
        }
        if go_provision {
            ns.go_provision = true;
            if let (Some(def), Some(aoe)) = (ctx.defs.lookup("aoe"), &job.aoe) {
                ns.resources.insert(
                    0,
                    ResourceReq {
                        def,
                        amount: 0.0,
                        str_val: aoe.clone(),
                    },
                );
            }
        }
        Some(ns)
    }

    // ── Node ordering & helpers ───────────────────────────────────────────────

    /// Reorder a node list for the current policy: avoid-provision sorts
    /// matching AOEs first; pack round-robin rotates past the last
    /// allocated host.
    fn reorder_nodes(
        &mut self,
        ctx: &EvalCtx<'_>,
        pool: &NodePool,
        job: &Request,
        nodes: &[NodeIdx],
    ) -> Vec<NodeIdx> {
        let mut v = nodes.to_vec();

        if job.aoe.is_some() && ctx.cfg.provision_policy == crate::config::ProvisionPolicy::Avoid {
            v.sort_by_key(|&n| pool.get(n).current_aoe.as_deref() != job.aoe.as_deref());
            debug!(job = %job.name, aoe = ?job.aoe, "re-sorted nodes by instantiated AOE");
            return v;
        }

        match ctx.cfg.smp_cluster_dist {
            crate::config::SmpClusterDist::Pack => v,
            crate::config::SmpClusterDist::RoundRobin => {
                v.sort_by(|&a, &b| pool.get(a).host.cmp(&pool.get(b).host));
                let last = match &self.last_node {
                    Some(n) => n.clone(),
                    None => return v,
                };
                let Some(pos) = v.iter().position(|&n| pool.get(n).name == last) else {
                    return v;
                };
                // Resume at the first vnode of the next host.
                let last_host = pool.get(v[pos]).host.clone();
                let next = v
                    .iter()
                    .skip(pos)
                    .position(|&n| !pool.get(n).host.eq_ignore_ascii_case(&last_host))
                    .map(|off| pos + off)
                    .unwrap_or(v.len());
                let len = v.len();
                v.rotate_left(next % len.max(1));
                v
            }
        }
    }

    /// Extend a solution with the unallocated remainder of a node list
    /// (exclusive sets hand the whole set to the winner).
    fn alloc_rest_for(&mut self, out: &mut Vec<Nspec>, nodes: &[NodeIdx]) {
        let max_seq = out.iter().map(|ns| ns.seq_num).max().unwrap_or(0);
        for &ni in nodes {
            if out.iter().all(|ns| ns.node != ni) {
                let mut ns = Nspec::new(ni);
                ns.end_of_chunk = true;
                ns.seq_num = max_seq;
                ns.sub_seq_num = self.next_sub_seq();
                out.push(ns);
            }
        }
    }

    fn alloc_rest_nodepart(&mut self, out: &mut Vec<Nspec>, nodes: &[NodeIdx]) {
        self.alloc_rest_for(out, nodes);
    }
}

/// Is it OK to break a chunk across this node list?  Only when every node
/// lives on one host.
pub fn ok_break_chunk(pool: &NodePool, nodes: &[NodeIdx]) -> bool {
    let mut host: Option<&str> = None;
    for &ni in nodes {
        let h = pool.get(ni).host.as_str();
        match host {
            None => host = Some(h),
            Some(prev) if prev.eq_ignore_ascii_case(h) => {}
            Some(_) => return false,
        }
    }
    true
}

/// Consume a chunk's allocations on a pool (indirect-aware).
fn apply_nspec_assigned(pool: &mut NodePool, defs: &ResDefTable, nspecs: &[Nspec]) {
    for ns in nspecs {
        for req in &ns.resources {
            if defs.get(req.def).consumable {
                pool.add_assigned(ns.node, req.def, req.amount);
            }
        }
    }
}

fn host_aggregate_fits(
    ctx: &EvalCtx<'_>,
    hs: &Partition,
    chunk: &Chunk,
    err: &mut SchedError,
) -> bool {
    let flags = CheckFlags {
        unset_res_zero: true,
        ..CheckFlags::NONE
    };
    check_avail_resources(
        ctx.defs,
        &hs.res,
        &chunk.reqs,
        flags,
        None,
        FailCode::InsufficientResource,
        Some(err),
        None,
    ) > 0.0
}

fn log_host_too_small(job: &Request, hs: &Partition, err: &SchedError) {
    if hs.free_nodes == 0 {
        debug!(job = %job.name, host = %hs.res_val, "no free nodes available");
    } else {
        debug!(job = %job.name, host = %hs.res_val, reason = %err, "insufficient host-level resources");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{create_execvnode, Node};
    use crate::resource::{find_resource, ResKind, Resource};
    use crate::select::{Place, SelSpec};

    fn defs() -> ResDefTable {
        ResDefTable::with_builtins()
    }

    fn node(defs: &ResDefTable, rank: u32, name: &str, host: &str, cpus: &str, mem: Option<&str>) -> Node {
        let mut n = Node::new(rank, name, host);
        n.res.push(
            Resource::with_avail(defs.lookup("ncpus").unwrap(), ResKind::Long, cpus).unwrap(),
        );
        n.res.push(
            Resource::with_avail(defs.lookup("host").unwrap(), ResKind::String, host).unwrap(),
        );
        if let Some(mem) = mem {
            n.res
                .push(Resource::with_avail(defs.lookup("mem").unwrap(), ResKind::Size, mem).unwrap());
        }
        n
    }

    fn snapshot(nodes: Vec<Node>) -> Snapshot {
        let d = defs();
        let mut pool = NodePool::new();
        for n in nodes {
            pool.push(n);
        }
        Snapshot::build(d, pool, 1_000).unwrap()
    }

    fn job(snap: &Snapshot, select: &str, place: &str) -> Request {
        let mut j = Request::new_job(
            "job1",
            SelSpec::parse(&snap.defs, select).unwrap(),
            Place::parse(place).unwrap(),
        );
        j.duration = 3_600;
        j
    }

    /// Sum one consumable across a solution.
    fn solution_sum(snap: &Snapshot, ns: &[Nspec], res: &str) -> f64 {
        let def = snap.defs.lookup(res).unwrap();
        ns.iter()
            .flat_map(|n| n.resources.iter())
            .filter(|r| r.def == def)
            .map(|r| r.amount)
            .sum()
    }

    // ── Scenario: simple single chunk ─────────────────────────────────────────

    #[test]
    fn simple_single_chunk_free_placement() {
        let d = defs();
        let mut snap = snapshot(vec![node(&d, 0, "v1", "hostA", "8", Some("16gb"))]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=4:mem=8gb", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 1);
        assert!(ns[0].end_of_chunk);
        assert_eq!(solution_sum(&snap, &ns, "ncpus"), 4.0);
        assert_eq!(
            create_execvnode(&snap.pool, &snap.defs, &ns),
            "(v1:ncpus=4:mem=8388608kb)"
        );
    }

    #[test]
    fn evaluation_logs_flow_through_a_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
        let d = defs();
        let mut snap = snapshot(vec![node(&d, 0, "v1", "hostA", "2", None)]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=4", "free");
        let err = ev.is_ok_to_run(&mut snap, &mut j).unwrap_err();
        assert_eq!(err.code, FailCode::InsufficientResource);
    }

    // ── Scenario: scatter across hosts ────────────────────────────────────────

    #[test]
    fn scatter_places_one_chunk_per_host() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "a1", "hostA", "4", None),
            node(&d, 1, "b1", "hostB", "4", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=2", "scatter");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 2);
        let hosts: Vec<&str> = ns
            .iter()
            .map(|n| snap.pool.get(n.node).host.as_str())
            .collect();
        assert_ne!(hosts[0], hosts[1], "no host receives both chunks");
        assert_eq!(solution_sum(&snap, &ns, "ncpus"), 4.0);
    }

    #[test]
    fn scatter_fails_when_hosts_run_out() {
        let d = defs();
        let mut snap = snapshot(vec![node(&d, 0, "a1", "hostA", "8", None)]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=2", "scatter");
        assert!(ev.is_ok_to_run(&mut snap, &mut j).is_err());
    }

    // ── Scenario: break within a host ─────────────────────────────────────────

    #[test]
    fn pack_breaks_chunk_across_vnodes_of_one_host() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "v1", "hostA", "4", None),
            node(&d, 1, "v2", "hostA", "4", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=6", "pack");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 2);
        assert!(!ns[0].end_of_chunk);
        assert!(ns[1].end_of_chunk);
        assert_eq!(solution_sum(&snap, &ns, "ncpus"), 6.0);
        assert_eq!(ns[0].seq_num, ns[1].seq_num);
    }

    #[test]
    fn chunk_prefers_single_vnode_over_breaking() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "v1", "hostA", "4", None),
            node(&d, 1, "v2", "hostA", "8", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=6", "pack");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 1, "fits whole on v2, no break");
        assert_eq!(snap.pool.get(ns[0].node).name, "v2");
    }

    // ── Scenario: cannot span placement sets ──────────────────────────────────

    fn switch_snapshot() -> Snapshot {
        let mut d = defs();
        d.add(crate::resource::ResourceDef {
            name: "switch".to_string(),
            kind: ResKind::String,
            consumable: false,
            host_level: false,
            rassn: false,
        });
        let mut pool = NodePool::new();
        for (i, (name, host, sw)) in [
            ("a1", "hostA", "sw1"),
            ("b1", "hostB", "sw2"),
        ]
        .iter()
        .enumerate()
        {
            let mut n = Node::new(i as u32, *name, *host);
            n.res.push(
                Resource::with_avail(d.lookup("ncpus").unwrap(), ResKind::Long, "4").unwrap(),
            );
            n.res.push(
                Resource::with_avail(d.lookup("host").unwrap(), ResKind::String, host).unwrap(),
            );
            n.res.push(
                Resource::with_avail(d.lookup("switch").unwrap(), ResKind::String, sw).unwrap(),
            );
            pool.push(n);
        }
        Snapshot::build(d, pool, 1_000).unwrap()
    }

    #[test]
    fn cannot_span_placement_sets_is_never_run() {
        let mut snap = switch_snapshot();
        snap.dont_span_psets = true;
        let cfg = SchedConfig {
            node_group_key: vec!["switch".to_string()],
            do_not_span_psets: true,
            ..SchedConfig::default()
        };
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=6", "free");
        let err = ev.is_ok_to_run(&mut snap, &mut j).unwrap_err();
        assert_eq!(err.severity, Severity::NeverRun);
        assert_eq!(err.code, FailCode::CantSpanPset);
    }

    #[test]
    fn spanning_allowed_uses_all_nodes() {
        let mut snap = switch_snapshot();
        let cfg = SchedConfig {
            node_group_key: vec!["switch".to_string()],
            ..SchedConfig::default()
        };
        let mut ev = Evaluator::new(&cfg);
        // 2 chunks of 4 need both switches
        let mut j = job(&snap, "2:ncpus=4", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 2);
        assert!(j.can_not_fit);
        assert_eq!(solution_sum(&snap, &ns, "ncpus"), 8.0);
    }

    #[test]
    fn fitting_placement_set_wins_and_is_recorded() {
        let mut snap = switch_snapshot();
        let cfg = SchedConfig {
            node_group_key: vec!["switch".to_string()],
            ..SchedConfig::default()
        };
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=4", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 1);
        assert!(j.nodepart_name.as_deref().unwrap().starts_with("switch="));
        assert!(!j.can_not_fit);
    }

    // ── vscatter ──────────────────────────────────────────────────────────────

    #[test]
    fn vscatter_places_at_most_one_chunk_per_vnode() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "v1", "hostA", "8", None),
            node(&d, 1, "v2", "hostA", "8", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=2", "vscatter");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 2);
        assert_ne!(ns[0].node, ns[1].node, "no vnode receives both chunks");
    }

    #[test]
    fn vscatter_fails_when_vnodes_run_out() {
        let d = defs();
        let mut snap = snapshot(vec![node(&d, 0, "v1", "hostA", "8", None)]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=2", "vscatter");
        assert!(ev.is_ok_to_run(&mut snap, &mut j).is_err());
    }

    // ── free placement consumes tentatively ───────────────────────────────────

    #[test]
    fn free_placement_multiple_chunks_share_one_vnode() {
        let d = defs();
        let mut snap = snapshot(vec![node(&d, 0, "v1", "hostA", "8", None)]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "3:ncpus=2", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 3);
        assert_eq!(solution_sum(&snap, &ns, "ncpus"), 6.0);
        assert!(ns.iter().all(|n| n.node == 0));
        // tentative consumption must not leak into the real pool
        let ncpus = snap.defs.lookup("ncpus").unwrap();
        assert_eq!(
            find_resource(&snap.pool.get(0).res, ncpus).unwrap().assigned,
            0.0
        );
    }

    #[test]
    fn free_placement_overflows_to_second_host() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "a1", "hostA", "4", None),
            node(&d, 1, "b1", "hostB", "4", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=4", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(ns.len(), 2);
        let mut nodes: Vec<NodeIdx> = ns.iter().map(|n| n.node).collect();
        nodes.sort_unstable();
        assert_eq!(nodes, vec![0, 1]);
    }

    // ── end_of_chunk bookkeeping ──────────────────────────────────────────────

    #[test]
    fn end_of_chunk_count_equals_total_chunks() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "v1", "hostA", "4", None),
            node(&d, 1, "v2", "hostA", "4", None),
            node(&d, 2, "v3", "hostB", "8", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=4+1:ncpus=2", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        let ends = ns.iter().filter(|n| n.end_of_chunk).count();
        assert_eq!(ends as u32, j.select.total_chunks);
        assert_eq!(solution_sum(&snap, &ns, "ncpus"), 10.0);
    }

    // ── exclusivity ───────────────────────────────────────────────────────────

    #[test]
    fn excl_request_rejects_busy_node() {
        let d = defs();
        let mut snap = snapshot(vec![node(&d, 0, "v1", "hostA", "8", None)]);
        snap.pool.get_mut(0).num_jobs = 1;
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=1", "free:excl");
        let err = ev.is_ok_to_run(&mut snap, &mut j).unwrap_err();
        assert_eq!(err.code, FailCode::NodeNotExcl);
    }

    #[test]
    fn exclhost_takes_every_vnode_of_the_host() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "v1", "hostA", "4", None),
            node(&d, 1, "v2", "hostA", "4", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=2", "pack:exclhost");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        let mut nodes: Vec<NodeIdx> = ns.iter().map(|n| n.node).collect();
        nodes.sort_unstable();
        assert_eq!(nodes, vec![0, 1], "whole host allocated");
        // the filler nspec carries no resources
        assert!(ns.iter().any(|n| n.resources.is_empty()));
    }

    // ── equivalence classes ───────────────────────────────────────────────────

    #[test]
    fn nodesig_sweep_marks_twin_nodes_visited() {
        let d = defs();
        // Three identical small nodes plus one big one; chunk fits only on
        // the big node.
        let mut snap = snapshot(vec![
            node(&d, 0, "s1", "h1", "2", None),
            node(&d, 1, "s2", "h2", "2", None),
            node(&d, 2, "s3", "h3", "2", None),
            node(&d, 3, "big", "h4", "16", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=8", "free");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(snap.pool.get(ns[0].node).name, "big");
    }

    // ── no-multinode re-satisfy ───────────────────────────────────────────────

    #[test]
    fn no_multinode_nodes_excluded_on_resatisfy() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "nm", "h1", "4", None),
            node(&d, 1, "ok1", "h2", "4", None),
            node(&d, 2, "ok2", "h3", "4", None),
        ]);
        snap.pool.get_mut(0).no_multinode_jobs = true;
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "2:ncpus=4", "scatter");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert!(j.will_use_multinode);
        assert!(ns.iter().all(|n| n.node != 0), "no_multinode node avoided");
    }

    // ── list_blockers ─────────────────────────────────────────────────────────

    #[test]
    fn list_blockers_reports_every_blocking_condition() {
        let d = defs();
        let snap = snapshot(vec![node(&d, 0, "v1", "hostA", "2", Some("1gb"))]);
        let cfg = SchedConfig {
            dedicated_time: vec![crate::config::TimeWindow {
                from: 2_000,
                to: 9_000,
            }],
            ..SchedConfig::default()
        };
        let ev = Evaluator::new(&cfg);
        // Crosses the dedicated window and over-asks on both consumables.
        let j = job(&snap, "1:ncpus=4:mem=8gb", "free");

        let blockers = ev.list_blockers(&snap, &j);
        assert_eq!(blockers.len(), 3);
        assert_eq!(blockers[0].code, FailCode::CrossDedTimeBoundary);
        let rdefs: Vec<&str> = blockers.iter().filter_map(|e| e.rdef.as_deref()).collect();
        assert!(rdefs.contains(&"ncpus"));
        assert!(rdefs.contains(&"mem"));
    }

    #[test]
    fn list_blockers_is_empty_for_a_satisfiable_request() {
        let d = defs();
        let snap = snapshot(vec![node(&d, 0, "v1", "hostA", "8", Some("16gb"))]);
        let cfg = SchedConfig::default();
        let ev = Evaluator::new(&cfg);
        let j = job(&snap, "1:ncpus=4:mem=8gb", "free");
        assert!(ev.list_blockers(&snap, &j).is_empty());
    }

    #[test]
    fn list_blockers_counts_chunks_against_the_pool_total() {
        let d = defs();
        // Two 4-cpu hosts: 3 chunks of 4 cpus exceed the total of 8.
        let snap = snapshot(vec![
            node(&d, 0, "a1", "hostA", "4", None),
            node(&d, 1, "b1", "hostB", "4", None),
        ]);
        let cfg = SchedConfig::default();
        let ev = Evaluator::new(&cfg);

        let two = job(&snap, "2:ncpus=4", "free");
        assert!(ev.list_blockers(&snap, &two).is_empty());

        let three = job(&snap, "3:ncpus=4", "free");
        let blockers = ev.list_blockers(&snap, &three);
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].code, FailCode::InsufficientResource);
        assert_eq!(blockers[0].rdef.as_deref(), Some("ncpus"));
        assert_eq!(blockers[0].arg1.as_deref(), Some("(R: 12 A: 8 T: 8)"));
    }

    // ── Roundtrip through the release engine ──────────────────────────────────

    #[test]
    fn evaluated_solution_round_trips_through_release() {
        use crate::node::create_exec_host;
        use crate::release::{release_given_nodelist, ReleaseInput, VnodeMap, VnodeMeta};

        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "v1", "hostA", "8", Some("16gb")),
            node(&d, 1, "v2", "hostB", "8", None),
        ]);
        let cfg = SchedConfig::default();
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=4:mem=8gb+1:ncpus=2", "scatter");
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();

        let exec_vnode = create_execvnode(&snap.pool, &snap.defs, &ns);
        let exec_host = create_exec_host(&snap.pool, &snap.defs, &ns);
        let schedselect: Vec<String> = {
            let chunks = crate::release::parse_execvnode(&exec_vnode).unwrap();
            chunks
                .iter()
                .map(|c| {
                    let inner: Vec<String> = c.vnodes[0]
                        .resources
                        .iter()
                        .map(|(n, v)| format!("{}={}", n, v))
                        .collect();
                    format!("1:{}", inner.join(":"))
                })
                .collect()
        };
        let schedselect = schedselect.join("+");

        let mut vnmap = VnodeMap::new();
        vnmap.insert(
            "v1".to_string(),
            VnodeMeta {
                parent_mom: "hostA".to_string(),
                vntype: None,
            },
        );
        vnmap.insert(
            "v2".to_string(),
            VnodeMeta {
                parent_mom: "hostB".to_string(),
                vntype: None,
            },
        );

        let input = ReleaseInput {
            job_id: "job1",
            exec_vnode: &exec_vnode,
            exec_host: &exec_host,
            exec_host2: &exec_host,
            schedselect: &schedselect,
        };
        let out = release_given_nodelist(&input, "", "", &vnmap, &snap.defs).unwrap();
        assert_eq!(out.exec_vnode, exec_vnode);
        assert_eq!(out.exec_host, exec_host);
        assert_eq!(out.exec_host2, exec_host);
        assert_eq!(out.schedselect, schedselect);
        assert_eq!(out.deallocated_execvnode, "");
    }

    // ── reorder ───────────────────────────────────────────────────────────────

    #[test]
    fn avoid_provision_prefers_matching_aoe() {
        let d = defs();
        let mut snap = snapshot(vec![
            node(&d, 0, "plain", "h1", "4", None),
            node(&d, 1, "ready", "h2", "4", None),
        ]);
        for i in [0usize, 1] {
            let aoe = d.lookup("aoe").unwrap();
            snap.pool.get_mut(i).res.push(
                Resource::with_avail(aoe, ResKind::StringSet, "rhel8,sles15").unwrap(),
            );
            snap.pool.get_mut(i).provision_enable = true;
        }
        snap.pool.get_mut(1).current_aoe = Some("rhel8".to_string());
        snap.provision_enable = true;
        let cfg = SchedConfig {
            provision_policy: crate::config::ProvisionPolicy::Avoid,
            ..SchedConfig::default()
        };
        let mut ev = Evaluator::new(&cfg);
        let mut j = job(&snap, "1:ncpus=1", "free");
        j.aoe = Some("rhel8".to_string());
        let ns = ev.is_ok_to_run(&mut snap, &mut j).unwrap();
        assert_eq!(snap.pool.get(ns[0].node).name, "ready");
    }
}
