/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Placement sets: partitions of the node pool over a grouping resource.
//!
//! For every `(resource, value)` pair present on any non-stale vnode there
//! is one [`Partition`] holding the member vnodes and a lazily-maintained
//! aggregate resource list.  A partition whose members all live on one host
//! may have chunks broken across its vnodes (`ok_break`).
//!
//! Building partitions is not free, so results are memoized in a
//! [`PartitionCache`] keyed by the grouping-resource list and the identity
//! of the node list they were built from.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{FailCode, SchedError};
use crate::node::{NodeIdx, NodePool};
use crate::resource::{
    add_resource_list, check_avail_resources, find_resource, match_resource, CheckFlags,
    ResDefTable, Resource,
};
use crate::select::SelSpec;

// ── Partition ─────────────────────────────────────────────────────────────────

/// Flags controlling partition construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionFlags {
    /// Also create one `"<res>=unset"` partition collecting vnodes without
    /// the grouping resource.
    pub create_rest: bool,
}

/// One placement set.
#[derive(Debug, Clone)]
pub struct Partition {
    /// `"<resource>=<value>"`.
    pub name: String,
    /// Grouping resource definition.
    pub def: usize,
    /// The grouping value shared by all members.
    pub res_val: String,
    /// All members share one host, so chunks may break across them.
    pub ok_break: bool,
    /// The winning request takes the whole set.
    pub excl: bool,
    pub rank: u32,
    pub nodes: Vec<NodeIdx>,
    pub free_nodes: usize,
    /// Aggregated availability over the current members.
    pub res: Vec<Resource>,
}

impl Partition {
    pub fn tot_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// The synthetic value used for the `create_rest` partition.
const UNSET_VAL: &str = "\"\"";

/// Break a node list apart into placement sets over `resnames`.
///
/// Stale vnodes are skipped.  Vnodes without a grouping resource are
/// ignored unless `flags.create_rest` is set.
pub fn create_node_partitions(
    defs: &ResDefTable,
    pool: &NodePool,
    nodes: &[NodeIdx],
    resnames: &[&str],
    flags: PartitionFlags,
    rank_base: u32,
) -> Vec<Partition> {
    let mut parts: Vec<Partition> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for res_name in resnames {
        let def = match defs.lookup(res_name) {
            Some(d) => d,
            None => continue,
        };
        for &ni in nodes {
            let node = pool.get(ni);
            if node.state.stale {
                continue;
            }
            let values: Vec<String> = match pool.resolved(ni, def) {
                Some(r) => r.str_avail.clone(),
                None if flags.create_rest => vec![UNSET_VAL.to_string()],
                None => continue,
            };
            for val in values {
                let name = format!("{}={}", res_name, val);
                let idx = *by_name.entry(name.clone()).or_insert_with(|| {
                    parts.push(Partition {
                        name,
                        def,
                        res_val: val.clone(),
                        ok_break: true,
                        excl: false,
                        rank: rank_base + parts.len() as u32,
                        nodes: Vec::new(),
                        free_nodes: 0,
                        res: Vec::new(),
                    });
                    parts.len() - 1
                });
                let part = &mut parts[idx];
                part.nodes.push(ni);
                if node.state.is_free() {
                    part.free_nodes += 1;
                }
                // ok_break holds while every member shares the first
                // member's host.
                if part.ok_break {
                    let first_host = &pool.get(part.nodes[0]).host;
                    if !node.host.eq_ignore_ascii_case(first_host) {
                        part.ok_break = false;
                    }
                }
            }
        }
    }

    for part in &mut parts {
        partition_update(defs, pool, part);
    }
    debug!(
        count = parts.len(),
        resources = ?resnames,
        "created placement sets"
    );
    parts
}

/// Recompute a partition's aggregate metadata from its current members.
pub fn partition_update(defs: &ResDefTable, pool: &NodePool, part: &mut Partition) {
    part.res.clear();
    part.free_nodes = 0;
    for &ni in &part.nodes {
        let node = pool.get(ni);
        let include_assigned = !node.state.is_free();
        if node.state.is_free() {
            part.free_nodes += 1;
        }
        let resolved = pool.dup_resolved_list(ni);
        add_resource_list(defs, &mut part.res, &resolved, include_assigned);
    }
}

/// Recompute aggregates for every partition in an array.  Not atomic.
pub fn partition_update_array(defs: &ResDefTable, pool: &NodePool, parts: &mut [Partition]) {
    for part in parts {
        partition_update(defs, pool, part);
    }
}

/// Quick aggregate check: could `spec` ever fit in this partition?
///
/// Each chunk's requests are compared against the partition's aggregate
/// resources; failures are reported as [`FailCode::SetTooSmall`] by the
/// caller.  With `compare_total` the check ignores assigned amounts,
/// answering "could it ever fit" instead of "does it fit now".
pub fn can_fit_nodepart(
    defs: &ResDefTable,
    part: &Partition,
    spec: &SelSpec,
    compare_total: bool,
    err: &mut SchedError,
) -> bool {
    if part.free_nodes == 0 && !compare_total {
        err.set(crate::error::Severity::NotRun, FailCode::NoFreeNodes);
        return false;
    }
    for chunk in &spec.chunks {
        let flags = CheckFlags {
            unset_res_zero: true,
            compare_total,
            ..CheckFlags::NONE
        };
        let n = check_avail_resources(
            defs,
            &part.res,
            &chunk.reqs,
            flags,
            None,
            FailCode::InsufficientResource,
            Some(err),
            None,
        );
        if n < chunk.count as f64 {
            if !err.is_set() {
                // The aggregate holds some chunks, just not enough; name
                // the limiting resource in the report.
                for req in &chunk.reqs {
                    if let Some(res) = find_resource(&part.res, req.def) {
                        let m = match_resource(
                            defs,
                            res,
                            req,
                            flags,
                            FailCode::InsufficientResource,
                            None,
                        );
                        if m < chunk.count as f64 {
                            err.set(
                                crate::error::Severity::NotRun,
                                FailCode::InsufficientResource,
                            );
                            err.rdef = Some(defs.name(req.def).to_string());
                            break;
                        }
                    }
                }
                if !err.is_set() {
                    err.set(crate::error::Severity::NotRun, FailCode::InsufficientResource);
                }
            }
            return false;
        }
    }
    true
}

// ── Cache ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    resnames: Vec<String>,
    /// Identity of the node list the partitions were built from.
    node_ids: Vec<NodeIdx>,
}

/// Memoized partition results for one scheduling cycle.
///
/// Keyed by (grouping-resource list, node list); the node list is compared
/// by identity of its indices, which is exact within one snapshot.
#[derive(Debug, Clone, Default)]
pub struct PartitionCache {
    map: HashMap<CacheKey, Vec<Partition>>,
    next_rank: u32,
}

impl PartitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up partitions for `(resnames, nodes)`, creating and caching
    /// them if absent.  `sort` orders the partitions before caching
    /// (typically tightest-fit first).
    pub fn find_or_create(
        &mut self,
        defs: &ResDefTable,
        pool: &NodePool,
        nodes: &[NodeIdx],
        resnames: &[&str],
        flags: PartitionFlags,
        sort: Option<&dyn Fn(&Partition, &Partition) -> std::cmp::Ordering>,
    ) -> &[Partition] {
        let key = CacheKey {
            resnames: resnames.iter().map(|s| s.to_string()).collect(),
            node_ids: nodes.to_vec(),
        };
        if !self.map.contains_key(&key) {
            let mut parts =
                create_node_partitions(defs, pool, nodes, resnames, flags, self.next_rank);
            self.next_rank += parts.len() as u32;
            if let Some(cmp) = sort {
                parts.sort_by(|a, b| cmp(a, b));
            }
            self.map.insert(key.clone(), parts);
        }
        self.map.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
