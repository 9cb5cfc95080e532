/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The vnode model and the node arena.
//!
//! Vnodes form a cyclic graph with hostsets and placement sets, so they
//! live in an arena ([`NodePool`]) and everything else refers to them by
//! [`NodeIdx`].  A shadow evaluation clones the whole pool; indices stay
//! valid across the clone, so a tentative solution built against a shadow
//! needs no re-resolution against the real pool.
//!
//! Per-cycle search state lives in [`Scratch`]: reset at cycle start,
//! flipped during matching, never persisted.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::resource::{
    amount_to_str, find_resource, find_resource_mut, DefId, ResDefTable, Resource, ResourceReq,
};
use crate::select::Place;

/// Index of a [`Node`] inside its [`NodePool`].
pub type NodeIdx = usize;

// ── Sharing ───────────────────────────────────────────────────────────────────

/// A vnode's sharing policy, combined with the request's `place` directive
/// to decide exclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VnodeSharing {
    #[default]
    DefaultShared,
    DefaultExcl,
    DefaultExclhost,
    ForceExcl,
    ForceExclhost,
    IgnoreExcl,
}

impl VnodeSharing {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default_shared" => Some(Self::DefaultShared),
            "default_excl" => Some(Self::DefaultExcl),
            "default_exclhost" => Some(Self::DefaultExclhost),
            "force_excl" => Some(Self::ForceExcl),
            "force_exclhost" => Some(Self::ForceExclhost),
            "ignore_excl" => Some(Self::IgnoreExcl),
            _ => None,
        }
    }
}

/// Is a request/node combination exclusive?  The node's sharing policy can
/// force or ignore exclusivity regardless of the place directive.
pub fn is_excl(pl: &Place, sharing: VnodeSharing) -> bool {
    match sharing {
        VnodeSharing::ForceExcl | VnodeSharing::ForceExclhost => true,
        VnodeSharing::IgnoreExcl => false,
        _ => {
            if pl.excl {
                true
            } else if pl.share {
                false
            } else {
                matches!(
                    sharing,
                    VnodeSharing::DefaultExcl | VnodeSharing::DefaultExclhost
                )
            }
        }
    }
}

/// Does a request/node combination take the whole host?
pub fn is_exclhost(pl: &Place, sharing: VnodeSharing) -> bool {
    sharing == VnodeSharing::ForceExclhost
        || (sharing == VnodeSharing::DefaultExclhost && !pl.excl && !pl.share)
        || pl.exclhost
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Vnode state bits.  A node with no blocking bit set is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeState {
    pub down: bool,
    pub offline: bool,
    pub job_busy: bool,
    pub job_exclusive: bool,
    pub resv_exclusive: bool,
    pub provisioning: bool,
    pub stale: bool,
    /// High load average reported by the host.
    pub busy: bool,
    pub maintenance: bool,
}

impl NodeState {
    pub fn is_free(&self) -> bool {
        *self == NodeState::default()
    }

    /// Parse a comma-separated state string (`"down,offline"`).  Unknown
    /// names are ignored; `"free"` clears nothing because nothing is set.
    pub fn parse(s: &str) -> NodeState {
        let mut st = NodeState::default();
        for tok in s.split(',') {
            match tok.trim() {
                "down" => st.down = true,
                "offline" => st.offline = true,
                "job-busy" => st.job_busy = true,
                "job-exclusive" => st.job_exclusive = true,
                "resv-exclusive" => st.resv_exclusive = true,
                "provisioning" => st.provisioning = true,
                "stale" => st.stale = true,
                "busy" => st.busy = true,
                "maintenance" => st.maintenance = true,
                _ => {}
            }
        }
        st
    }

    /// The most significant set state name, `"free"` when none.
    pub fn as_str(&self) -> &'static str {
        if self.down {
            "down"
        } else if self.offline {
            "offline"
        } else if self.stale {
            "stale"
        } else if self.provisioning {
            "provisioning"
        } else if self.maintenance {
            "maintenance"
        } else if self.job_exclusive {
            "job-exclusive"
        } else if self.resv_exclusive {
            "resv-exclusive"
        } else if self.job_busy {
            "job-busy"
        } else if self.busy {
            "busy"
        } else {
            "free"
        }
    }
}

// ── Scratch ───────────────────────────────────────────────────────────────────

/// Per-cycle search bits.  Never persisted across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scratch {
    /// Probed and rejected (or consumed) during the current sub-search.
    pub visited: bool,
    /// Already holds a chunk under scatter/vscatter.
    pub scattered: bool,
    /// Ruled out for this request for the rest of the evaluation.
    pub ineligible: bool,
    /// Ruled out for the whole cycle (equivalence-class sweeps).
    pub cycle_ineligible: bool,
}

impl Scratch {
    /// True when any bit blocks the node from the current search.
    pub fn blocks_search(&self) -> bool {
        self.visited || self.scattered || self.ineligible || self.cycle_ineligible
    }

    /// Reset the per-search bits, keeping the per-cycle one.
    pub fn clear_search(&mut self) {
        self.visited = false;
        self.scattered = false;
        self.ineligible = false;
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// One vnode.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique, stable rank (ordering of discovery).
    pub rank: u32,
    pub name: String,
    /// Parent execution host (the natural vnode's short hostname).
    pub host: String,
    pub sharing: VnodeSharing,
    pub state: NodeState,
    pub licensed: bool,
    pub res: Vec<Resource>,
    /// Back-reference into the snapshot's hostset list.
    pub hostset: Option<usize>,
    /// Back-reference into the snapshot's bucket list.
    pub bucket: Option<usize>,
    pub scratch: Scratch,

    pub num_jobs: u32,
    pub num_run_resv: u32,
    pub num_susp_jobs: u32,
    /// Indices of running jobs (into the snapshot's request list).
    pub jobs: Vec<usize>,
    /// Indices of running reservations.
    pub run_resvs: Vec<usize>,
    /// Number of calendared events still touching this node.
    pub num_events: u32,

    pub max_running: Option<u32>,
    pub max_user_run: Option<u32>,
    pub max_group_run: Option<u32>,
    pub user_counts: HashMap<String, u32>,
    pub group_counts: HashMap<String, u32>,

    pub no_multinode_jobs: bool,
    pub resv_enable: bool,
    pub provision_enable: bool,
    pub power_provisioning: bool,
    pub current_aoe: Option<String>,
    pub current_eoe: Option<String>,
    /// The parent host carries more than one vnode.
    pub is_multivnoded: bool,
    /// The server-universe mirror of this vnode is provisioning (only
    /// meaningful when evaluating inside a reservation).
    pub svr_provisioning: bool,

    /// Equivalence-class hash over the static resource set.
    pub nodesig: Option<u64>,
}

impl Node {
    pub fn new(rank: u32, name: impl Into<String>, host: impl Into<String>) -> Self {
        Node {
            rank,
            name: name.into(),
            host: host.into(),
            sharing: VnodeSharing::default(),
            state: NodeState::default(),
            licensed: true,
            res: Vec::new(),
            hostset: None,
            bucket: None,
            scratch: Scratch::default(),
            num_jobs: 0,
            num_run_resv: 0,
            num_susp_jobs: 0,
            jobs: Vec::new(),
            run_resvs: Vec::new(),
            num_events: 0,
            max_running: None,
            max_user_run: None,
            max_group_run: None,
            user_counts: HashMap::new(),
            group_counts: HashMap::new(),
            no_multinode_jobs: false,
            resv_enable: true,
            provision_enable: false,
            power_provisioning: false,
            current_aoe: None,
            current_eoe: None,
            is_multivnoded: false,
            svr_provisioning: false,
            nodesig: None,
        }
    }

    /// Whether hard per-user/per-group limits are configured.
    pub fn has_hard_limit(&self) -> bool {
        self.max_user_run.is_some() || self.max_group_run.is_some()
    }

    /// Compute the equivalence-class hash over the static resource set.
    ///
    /// Two nodes with equal signatures are interchangeable for chunk
    /// eligibility purposes, letting a rejection on one rule out all of
    /// them for the rest of the cycle.
    pub fn compute_nodesig(&mut self, defs: &ResDefTable) {
        let mut entries: Vec<(String, String, String)> = self
            .res
            .iter()
            .filter(|r| defs.name(r.def) != "host" && defs.name(r.def) != "vnode")
            .map(|r| {
                (
                    defs.name(r.def).to_string(),
                    format!("{}", r.avail),
                    r.str_avail.join(","),
                )
            })
            .collect();
        entries.sort();
        let mut h = DefaultHasher::new();
        entries.hash(&mut h);
        self.nodesig = Some(h.finish());
    }
}

// ── NodePool ──────────────────────────────────────────────────────────────────

/// Arena of vnodes.  Cloning the pool produces a shadow whose indices are
/// interchangeable with the original's.
#[derive(Debug, Clone, Default)]
pub struct NodePool {
    pub nodes: Vec<Node>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: Node) -> NodeIdx {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn get(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx]
    }

    pub fn get_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx]
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeIdx> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn indices(&self) -> Vec<NodeIdx> {
        (0..self.nodes.len()).collect()
    }

    /// Validate indirect resources: targets exist, carry the same
    /// definition directly, and no chain is longer than one hop.
    pub fn link_indirect(&self) -> Result<(), String> {
        for (i, node) in self.nodes.iter().enumerate() {
            for res in &node.res {
                if let Some(target) = res.indirect {
                    if target >= self.nodes.len() {
                        return Err(format!(
                            "vnode {} resource indirect to nonexistent vnode index {}",
                            node.name, target
                        ));
                    }
                    if target == i {
                        return Err(format!("vnode {} resource indirect to itself", node.name));
                    }
                    match find_resource(&self.nodes[target].res, res.def) {
                        None => {
                            return Err(format!(
                                "vnode {} indirect resource missing on target {}",
                                node.name, self.nodes[target].name
                            ))
                        }
                        Some(t) if t.indirect.is_some() => {
                            return Err(format!(
                                "vnode {} indirect resource chains through {}",
                                node.name, self.nodes[target].name
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a node's resource, following one level of indirection.
    pub fn resolved(&self, idx: NodeIdx, def: DefId) -> Option<&Resource> {
        let res = find_resource(&self.nodes[idx].res, def)?;
        match res.indirect {
            Some(target) => find_resource(&self.nodes[target].res, def),
            None => Some(res),
        }
    }

    /// Add to a node's assigned amount, following indirection.
    pub fn add_assigned(&mut self, idx: NodeIdx, def: DefId, amount: f64) {
        let target = match find_resource(&self.nodes[idx].res, def) {
            Some(r) => r.indirect.unwrap_or(idx),
            None => return,
        };
        let mut clamped = false;
        if let Some(res) = find_resource_mut(&mut self.nodes[target].res, def) {
            res.assigned += amount;
            if res.assigned < 0.0 {
                res.assigned = 0.0;
                clamped = true;
            }
        }
        if clamped {
            tracing::debug!(
                node = %self.nodes[target].name,
                resource = def,
                "assigned amount went negative, clamping to 0"
            );
        }
    }

    /// Materialize a node's resource list with indirect entries replaced by
    /// their targets' values.  Used where a standalone copy must carry the
    /// true amounts (the calendar walk mutates such a copy).
    pub fn dup_resolved_list(&self, idx: NodeIdx) -> Vec<Resource> {
        self.nodes[idx]
            .res
            .iter()
            .map(|r| match r.indirect {
                Some(target) => find_resource(&self.nodes[target].res, r.def)
                    .cloned()
                    .unwrap_or_else(|| r.clone()),
                None => {
                    let mut c = r.clone();
                    c.indirect = None;
                    c
                }
            })
            .collect()
    }

    /// Clear the per-search scratch bits on the listed nodes.
    pub fn clear_search_bits(&mut self, nodes: &[NodeIdx]) {
        for &i in nodes {
            self.nodes[i].scratch.clear_search();
        }
    }
}

// ── Nspec ─────────────────────────────────────────────────────────────────────

/// One allocation of resources from one vnode.  The concatenation of a
/// job's nspecs is its assignment; `end_of_chunk` marks chunk boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Nspec {
    pub node: NodeIdx,
    pub resources: Vec<ResourceReq>,
    pub end_of_chunk: bool,
    /// Sequence number of the originating chunk.
    pub seq_num: u32,
    /// Monotonic disambiguator within one evaluation.
    pub sub_seq_num: u32,
    /// This nspec triggers AOE provisioning on its vnode.
    pub go_provision: bool,
}

impl Nspec {
    pub fn new(node: NodeIdx) -> Self {
        Nspec {
            node,
            resources: Vec::new(),
            end_of_chunk: false,
            seq_num: 0,
            sub_seq_num: 0,
            go_provision: false,
        }
    }
}

/// Find the nspec for a given node, if any.
pub fn find_nspec(nspecs: &[Nspec], node: NodeIdx) -> Option<&Nspec> {
    nspecs.iter().find(|ns| ns.node == node)
}

/// Build the `exec_vnode` string from a node solution.
///
/// Each chunk becomes a parenthesized super-chunk; consumables are emitted
/// as `name=value` with sizes in kilobytes; the provisioning AOE rides
/// along on the first nspec of a provisioned chunk.
pub fn create_execvnode(pool: &NodePool, defs: &ResDefTable, nspecs: &[Nspec]) -> String {
    let mut out = String::new();
    let mut start_of_chunk = true;
    for (i, ns) in nspecs.iter().enumerate() {
        if i > 0 {
            out.push('+');
        }
        if start_of_chunk {
            out.push('(');
        }
        out.push_str(&pool.get(ns.node).name);
        for req in &ns.resources {
            let def = defs.get(req.def);
            if def.consumable {
                out.push(':');
                out.push_str(&def.name);
                out.push('=');
                out.push_str(&amount_to_str(def.kind, req.amount));
            } else if ns.go_provision && def.name == "aoe" {
                out.push_str(":aoe=");
                out.push_str(&req.str_val);
            }
        }
        start_of_chunk = ns.end_of_chunk;
        if ns.end_of_chunk {
            out.push(')');
        }
    }
    out
}

/// Build the short-form `exec_host` string (`host/J[*C]+…`), one entry per
/// chunk lead, `*C` omitted for single-cpu allocations.
pub fn create_exec_host(pool: &NodePool, defs: &ResDefTable, nspecs: &[Nspec]) -> String {
    let ncpus = defs.lookup("ncpus");
    let mut per_host_index: HashMap<String, u32> = HashMap::new();
    let mut parts: Vec<String> = Vec::new();
    let mut start_of_chunk = true;
    for ns in nspecs {
        if start_of_chunk {
            let host = pool.get(ns.node).host.clone();
            let slot = per_host_index.entry(host.clone()).or_insert(0);
            let cpus: f64 = ns
                .resources
                .iter()
                .filter(|r| Some(r.def) == ncpus)
                .map(|r| r.amount)
                .sum();
            if cpus > 1.0 {
                parts.push(format!("{}/{}*{:.0}", host, slot, cpus));
            } else {
                parts.push(format!("{}/{}", host, slot));
            }
            *slot += 1;
        }
        start_of_chunk = ns.end_of_chunk;
    }
    parts.join("+")
}

// ── Run / end updates ─────────────────────────────────────────────────────────

/// Apply one nspec of a starting request to its vnode.
///
/// Adds the consumable amounts to `assigned` (through indirection),
/// registers the running work, flips busy/exclusive state, and records any
/// provisioning outcome.  The caller is responsible for the matching
/// placement-set and bucket updates.
#[allow(clippy::too_many_arguments)]
pub fn update_node_on_run(
    pool: &mut NodePool,
    defs: &ResDefTable,
    ns: &Nspec,
    job_idx: usize,
    is_resv: bool,
    pl: &Place,
    user: &str,
    group: &str,
    aoe: Option<&str>,
    eoe: Option<&str>,
) {
    let idx = ns.node;
    if pool.get(idx).state.offline || pool.get(idx).state.down {
        return;
    }

    {
        let node = pool.get_mut(idx);
        if is_resv {
            node.num_run_resv += 1;
            if !node.run_resvs.contains(&job_idx) {
                node.run_resvs.push(job_idx);
            }
        } else {
            node.num_jobs += 1;
            if !node.jobs.contains(&job_idx) {
                node.jobs.push(job_idx);
            }
        }
    }

    for req in &ns.resources {
        if defs.get(req.def).consumable {
            pool.add_assigned(idx, req.def, req.amount);
        }
    }

    let sharing = pool.get(idx).sharing;
    let excl = is_excl(pl, sharing);

    {
        let has_limit = pool.get(idx).has_hard_limit();
        let node = pool.get_mut(idx);
        if has_limit && !is_resv {
            *node.user_counts.entry(user.to_string()).or_insert(0) += 1;
            *node.group_counts.entry(group.to_string()).or_insert(0) += 1;
        }
    }

    // With no cpus left the node is job-busy.
    if let Some(ncpus) = defs.lookup("ncpus") {
        if let Some(res) = pool.resolved(idx, ncpus) {
            if crate::resource::dynamic_avail(res) == 0.0 {
                pool.get_mut(idx).state.job_busy = true;
            }
        }
    }

    if ns.go_provision {
        let node = pool.get_mut(idx);
        node.state.provisioning = true;
        node.current_aoe = aoe.map(|s| s.to_string());
    }
    if !is_resv {
        if let Some(eoe) = eoe {
            pool.get_mut(idx).current_eoe = Some(eoe.to_string());
        }
    }

    if excl {
        let node = pool.get_mut(idx);
        if is_resv {
            node.state.resv_exclusive = true;
        } else {
            node.state.job_exclusive = true;
        }
    }
}

/// Reverse the effect of [`update_node_on_run`] for one vnode of an ending
/// request.
pub fn update_node_on_end(
    pool: &mut NodePool,
    defs: &ResDefTable,
    nspecs: &[Nspec],
    idx: NodeIdx,
    job_idx: usize,
    is_resv: bool,
    pl: &Place,
    user: &str,
    group: &str,
) {
    if pool.get(idx).state.offline || pool.get(idx).state.down {
        return;
    }

    {
        let node = pool.get_mut(idx);
        if is_resv {
            node.num_run_resv = node.num_run_resv.saturating_sub(1);
            node.run_resvs.retain(|&j| j != job_idx);
        } else {
            node.num_jobs = node.num_jobs.saturating_sub(1);
            node.jobs.retain(|&j| j != job_idx);
        }
        node.state.job_busy = false;
    }

    let sharing = pool.get(idx).sharing;
    if is_excl(pl, sharing) {
        let node = pool.get_mut(idx);
        if is_resv {
            node.state.resv_exclusive = false;
        } else {
            node.state.job_exclusive = false;
        }
    }

    for ns in nspecs.iter().filter(|ns| ns.node == idx) {
        for req in &ns.resources {
            if defs.get(req.def).consumable {
                pool.add_assigned(idx, req.def, -req.amount);
            }
        }
        let has_limit = pool.get(idx).has_hard_limit();
        if has_limit && !is_resv {
            let node = pool.get_mut(idx);
            if let Some(c) = node.user_counts.get_mut(user) {
                *c = c.saturating_sub(1);
            }
            if let Some(c) = node.group_counts.get_mut(group) {
                *c = c.saturating_sub(1);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
