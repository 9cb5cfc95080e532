/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-vnode eligibility: the static gates a node must pass before the
//! matcher spends any effort on it.
//!
//! Node-level checks ([`is_vnode_eligible`]) look at state, sharing, and
//! per-node limits; chunk-level checks ([`is_vnode_eligible_chunk`]) match
//! the chunk's non-consumables.  Provisioning ([`is_provisionable`]) and
//! power ([`is_powerok`]) gates sit apart because they can demand work
//! (instantiating an AOE/EOE) rather than merely reject.

use crate::error::{FailCode, SchedError, Severity};
use crate::job::Request;
use crate::node::{is_excl, NodeIdx, NodePool};
use crate::parallel::fan_out;
use crate::resource::{check_avail_resources, CheckFlags, ResourceReq};
use crate::select::Place;

use super::EvalCtx;

/// Outcome of a provisioning gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provision {
    NotNeeded,
    Needed,
    NotProvisionable,
}

/// Match `reqs` against a node's resources, resolving indirects only when
/// the node actually carries one.
pub fn check_avail_on_node(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    idx: NodeIdx,
    reqs: &[ResourceReq],
    flags: CheckFlags,
    fail_code: FailCode,
    err: Option<&mut SchedError>,
) -> f64 {
    let node = pool.get(idx);
    if node.res.iter().any(|r| r.indirect.is_some()) {
        let resolved = pool.dup_resolved_list(idx);
        check_avail_resources(ctx.defs, &resolved, reqs, flags, None, fail_code, err, None)
    } else {
        check_avail_resources(ctx.defs, &node.res, reqs, flags, None, fail_code, err, None)
    }
}

fn value_in_set(pool: &NodePool, idx: NodeIdx, def_name: &str, value: &str, ctx: &EvalCtx<'_>) -> bool {
    let def = match ctx.defs.lookup(def_name) {
        Some(d) => d,
        None => return false,
    };
    pool.resolved(idx, def)
        .map(|r| r.str_avail.iter().any(|s| s.eq_ignore_ascii_case(value)))
        .unwrap_or(false)
}

/// Is the requested AOE advertised by this vnode?
pub fn is_aoe_avail_on_vnode(ctx: &EvalCtx<'_>, pool: &NodePool, idx: NodeIdx, job: &Request) -> bool {
    match &job.aoe {
        Some(aoe) => value_in_set(pool, idx, "aoe", aoe, ctx),
        None => false,
    }
}

/// Is the requested EOE advertised by this vnode?
pub fn is_eoe_avail_on_vnode(ctx: &EvalCtx<'_>, pool: &NodePool, idx: NodeIdx, job: &Request) -> bool {
    match &job.eoe {
        Some(eoe) => value_in_set(pool, idx, "eoe", eoe, ctx),
        None => false,
    }
}

/// Static node-level eligibility for a request.
///
/// The exclusivity check runs first: a default-exclhost node with running
/// work must be rejected before the state checks can claim it for a
/// different reason.
pub fn is_vnode_eligible(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    idx: NodeIdx,
    job: &Request,
    pl: &Place,
    err: &mut SchedError,
) -> bool {
    let node = pool.get(idx);

    if is_excl(pl, node.sharing) && (node.num_jobs > 0 || node.num_run_resv > 0) {
        err.set(Severity::NotRun, FailCode::NodeNotExcl);
        err.arg1 = Some(if job.is_resv { "Reservation" } else { "Job" }.to_string());
        return false;
    }

    if job.eoe.is_some() && !is_eoe_avail_on_vnode(ctx, pool, idx, job) {
        err.set(Severity::NotRun, FailCode::EoeNotAvailable);
        err.arg1 = job.eoe.clone();
        return false;
    }

    if !node.state.is_free() {
        err.set(Severity::NotRun, FailCode::InvalidNodeState);
        err.arg1 = Some(node.state.as_str().to_string());
        return false;
    }

    // Inside a reservation the node may have been provisioned and be
    // unusable in the server's universe even though the reservation's
    // mirror looks free.
    if job.in_resv && !job.is_resv && node.svr_provisioning {
        err.set(Severity::NotRun, FailCode::InvalidNodeState);
        err.arg1 = Some("provisioning".to_string());
        return false;
    }

    if job.is_resv && !node.resv_enable {
        err.set(Severity::NotRun, FailCode::NodeResvEnable);
        return false;
    }

    if !job.is_resv && !job.qrun {
        if let Some(max) = node.max_running {
            if node.num_jobs >= max {
                err.set(Severity::NotRun, FailCode::NodeJobLimitReached);
                return false;
            }
        }
        if let Some(max) = node.max_user_run {
            if node.user_counts.get(&job.user).copied().unwrap_or(0) >= max {
                err.set(Severity::NotRun, FailCode::NodeUserLimitReached);
                return false;
            }
        }
        if let Some(max) = node.max_group_run {
            if node.group_counts.get(&job.group).copied().unwrap_or(0) >= max {
                err.set(Severity::NotRun, FailCode::NodeGroupLimitReached);
                return false;
            }
        }
    }

    if node.no_multinode_jobs && job.will_use_multinode {
        err.set(Severity::NotRun, FailCode::NodeNoMultJobs);
        return false;
    }

    true
}

/// Chunk-level eligibility: the chunk's non-consumables must match.
pub fn is_vnode_eligible_chunk(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    idx: NodeIdx,
    noncons: &[ResourceReq],
    job: Option<&Request>,
    err: &mut SchedError,
) -> bool {
    if let Some(job) = job {
        if pool.get(idx).no_multinode_jobs && job.will_use_multinode {
            err.set(Severity::NotRun, FailCode::NodeNoMultJobs);
            return false;
        }
    }

    if !noncons.is_empty() {
        let flags = CheckFlags {
            check_all_bools: true,
            only_noncons: true,
            unset_res_zero: true,
            ..CheckFlags::NONE
        };
        if check_avail_on_node(
            ctx,
            pool,
            idx,
            noncons,
            flags,
            FailCode::InsufficientResource,
            Some(err),
        ) == 0.0
        {
            return false;
        }
    }
    true
}

/// AOE provisioning gate.
///
/// `prov_needed` is computed per chunk by the matcher: provisioning only
/// comes into play for pack placement or a chunk that names an `aoe`.
pub fn is_provisionable(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    idx: NodeIdx,
    job: &Request,
    prov_needed: bool,
    err: &mut SchedError,
) -> Provision {
    if (job.aoe.is_none() && !job.is_resv) || !prov_needed {
        return Provision::NotNeeded;
    }
    let node = pool.get(idx);

    let needs = if job.is_resv {
        job.aoe.is_some()
    } else {
        match (&job.aoe, &node.current_aoe) {
            (Some(want), Some(cur)) => want != cur,
            (Some(_), None) => true,
            (None, _) => false,
        }
    };

    let mut ret = Provision::NotNeeded;
    if needs {
        ret = Provision::Needed;

        if node.is_multivnoded {
            err.set(Severity::NotRun, FailCode::IsMultiVnode);
            return Provision::NotProvisionable;
        }
        // Not NeverRun: enough nodes may already carry the right AOE.
        if !ctx.provision_enable {
            err.set(Severity::NotRun, FailCode::ProvDisableOnServer);
            return Provision::NotProvisionable;
        }
        if !node.provision_enable {
            err.set(Severity::NotRun, FailCode::ProvDisableOnNode);
            return Provision::NotProvisionable;
        }
        if node.num_susp_jobs > 0 || node.num_jobs > 0 {
            err.set(Severity::NotRun, FailCode::ProvResresvConflict);
            return Provision::NotProvisionable;
        }
    }

    // A node cannot be shared between AOE-less work and AOE work.
    if !job.is_resv {
        for &ri in &node.run_resvs {
            if ctx.jobs.get(ri).map(|r| r.aoe.is_none()).unwrap_or(false) {
                err.set(Severity::NotRun, FailCode::ProvResresvConflict);
                return Provision::NotProvisionable;
            }
        }
    }
    if job.is_resv && job.aoe.is_none() {
        for &ji in &node.jobs {
            if ctx.jobs.get(ji).map(|j| j.aoe.is_some()).unwrap_or(false) {
                err.set(Severity::NotRun, FailCode::ProvResresvConflict);
                return Provision::NotProvisionable;
            }
        }
    }

    ret
}

/// EOE power gate, shaped like [`is_provisionable`].
pub fn is_powerok(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    idx: NodeIdx,
    job: &Request,
    err: &mut SchedError,
) -> Provision {
    if job.is_resv || job.eoe.is_none() {
        return Provision::NotNeeded;
    }
    if !ctx.power_provisioning {
        err.set(Severity::NotRun, FailCode::ProvDisableOnServer);
        return Provision::NotProvisionable;
    }
    let node = pool.get(idx);
    if !node.power_provisioning {
        err.set(Severity::NotRun, FailCode::ProvDisableOnNode);
        return Provision::NotProvisionable;
    }

    let mut ret = Provision::NotNeeded;
    let wanted = job.eoe.as_deref().unwrap_or_default();
    if node.current_eoe.as_deref() != Some(wanted) {
        ret = Provision::Needed;
        if node.num_susp_jobs > 0 || node.num_jobs > 0 {
            err.set(Severity::NotRun, FailCode::ProvResresvConflict);
            return Provision::NotProvisionable;
        }
    }

    for &ri in &node.run_resvs {
        if ctx.jobs.get(ri).map(|r| r.eoe.is_none()).unwrap_or(false) {
            err.set(Severity::NotRun, FailCode::ProvResresvConflict);
            return Provision::NotProvisionable;
        }
    }

    ret
}

/// Can the whole chunk land on a single vnode of this list?
pub fn can_fit_on_vnode(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    reqs: &[ResourceReq],
    nodes: &[NodeIdx],
) -> bool {
    let noncons: Vec<ResourceReq> = reqs
        .iter()
        .filter(|r| !ctx.defs.get(r.def).consumable)
        .cloned()
        .collect();
    for &ni in nodes {
        let mut scratch_err = SchedError::new();
        if is_vnode_eligible_chunk(ctx, pool, ni, &noncons, None, &mut scratch_err) {
            let flags = CheckFlags {
                unset_res_zero: true,
                ..CheckFlags::NONE
            };
            if check_avail_on_node(ctx, pool, ni, reqs, flags, FailCode::InsufficientResource, None)
                > 0.0
            {
                return true;
            }
        }
    }
    false
}

/// Pre-pass over a node list: mark nodes statically ineligible for this
/// request so the matcher skips them.  The per-node verdicts are computed
/// read-only (and fanned out), then applied by the driver.
pub fn check_node_array_eligibility(
    ctx: &EvalCtx<'_>,
    pool: &mut NodePool,
    job: &Request,
    pl: &Place,
    nodes: &[NodeIdx],
    err: &mut SchedError,
) {
    let verdicts: Vec<(NodeIdx, Option<SchedError>)> = {
        let pool_ref: &NodePool = pool;
        fan_out(nodes, 4, |&ni| {
            if pool_ref.get(ni).scratch.cycle_ineligible {
                return (ni, None);
            }
            let mut node_err = SchedError::new();
            if is_vnode_eligible(ctx, pool_ref, ni, job, pl, &mut node_err) {
                (ni, None)
            } else {
                (ni, Some(node_err))
            }
        })
    };

    for (ni, verdict) in verdicts {
        if let Some(node_err) = verdict {
            pool.get_mut(ni).scratch.ineligible = true;
            tracing::debug!(node = %pool.get(ni).name, reason = %node_err, "node ineligible");
            err.absorb_if_unset(&node_err);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::config::SchedConfig;
    use crate::node::{Node, VnodeSharing};
    use crate::resource::{ResDefTable, ResKind, Resource};
    use crate::select::SelSpec;

    struct Fixture {
        cfg: SchedConfig,
        defs: ResDefTable,
        calendar: Calendar,
        jobs: Vec<Request>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                cfg: SchedConfig::default(),
                defs: ResDefTable::with_builtins(),
                calendar: Calendar::new(),
                jobs: Vec::new(),
            }
        }

        fn ctx(&self) -> EvalCtx<'_> {
            EvalCtx {
                cfg: &self.cfg,
                defs: &self.defs,
                calendar: &self.calendar,
                jobs: &self.jobs,
                server_time: 0,
                has_multi_vnode: false,
                provision_enable: true,
                power_provisioning: false,
            }
        }
    }

    fn cpu_node(defs: &ResDefTable, rank: u32, name: &str, cpus: &str) -> Node {
        let mut n = Node::new(rank, name, "hostA");
        n.res.push(
            Resource::with_avail(defs.lookup("ncpus").unwrap(), ResKind::Long, cpus).unwrap(),
        );
        n
    }

    fn job(fx: &Fixture, select: &str) -> Request {
        Request::new_job("j1", SelSpec::parse(&fx.defs, select).unwrap(), Place::free())
    }

    #[test]
    fn busy_node_rejected_for_excl_request() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).num_jobs = 1;
        let j = job(&fx, "1:ncpus=1");
        let pl = Place {
            excl: true,
            ..Place::free()
        };
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &pl, &mut err));
        assert_eq!(err.code, FailCode::NodeNotExcl);
        assert_eq!(err.arg1.as_deref(), Some("Job"));
    }

    #[test]
    fn excl_check_precedes_state_check() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).num_jobs = 1;
        pool.get_mut(0).state.job_busy = true;
        pool.get_mut(0).sharing = VnodeSharing::ForceExclhost;
        let j = job(&fx, "1:ncpus=1");
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::NodeNotExcl);
    }

    #[test]
    fn non_free_state_is_reported_with_name() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).state.offline = true;
        let j = job(&fx, "1:ncpus=1");
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::InvalidNodeState);
        assert_eq!(err.arg1.as_deref(), Some("offline"));
    }

    #[test]
    fn resv_rejected_on_resv_disabled_node() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).resv_enable = false;
        let resv = Request::new_resv(
            "r1",
            SelSpec::parse(&fx.defs, "1:ncpus=1").unwrap(),
            Place::free(),
        );
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &resv, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::NodeResvEnable);
    }

    #[test]
    fn job_limit_enforced_unless_qrun() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).max_running = Some(1);
        pool.get_mut(0).num_jobs = 1;
        // still free state: the running job did not exhaust cpus
        let mut j = job(&fx, "1:ncpus=1");
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::NodeJobLimitReached);

        j.qrun = true;
        let mut err = SchedError::new();
        assert!(is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
    }

    #[test]
    fn user_limit_counts_only_that_user() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).max_user_run = Some(1);
        pool.get_mut(0).user_counts.insert("alice".to_string(), 1);
        let mut j = job(&fx, "1:ncpus=1");
        j.user = "alice".to_string();
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::NodeUserLimitReached);

        j.user = "bob".to_string();
        let mut err = SchedError::new();
        assert!(is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
    }

    #[test]
    fn multinode_job_rejected_on_no_multinode_node() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.get_mut(0).no_multinode_jobs = true;
        let mut j = job(&fx, "2:ncpus=1");
        j.will_use_multinode = true;
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::NodeNoMultJobs);
    }

    #[test]
    fn chunk_noncons_mismatch_rejects() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        let mut n = cpu_node(&fx.defs, 0, "v1", "8");
        n.res.push(
            Resource::with_avail(fx.defs.lookup("arch").unwrap(), ResKind::String, "linux")
                .unwrap(),
        );
        pool.push(n);
        let arch = fx.defs.lookup("arch").unwrap();
        let want_aix = vec![ResourceReq {
            def: arch,
            amount: 0.0,
            str_val: "aix".to_string(),
        }];
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible_chunk(&fx.ctx(), &pool, 0, &want_aix, None, &mut err));
        assert_eq!(err.code, FailCode::InsufficientResource);
        assert_eq!(err.rdef.as_deref(), Some("arch"));
    }

    #[test]
    fn eoe_must_be_advertised() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        let mut n = cpu_node(&fx.defs, 0, "v1", "8");
        n.res.push(
            Resource::with_avail(fx.defs.lookup("eoe").unwrap(), ResKind::StringSet, "low,med")
                .unwrap(),
        );
        pool.push(n);
        let mut j = job(&fx, "1:ncpus=1");
        j.eoe = Some("high".to_string());
        let mut err = SchedError::new();
        assert!(!is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
        assert_eq!(err.code, FailCode::EoeNotAvailable);

        j.eoe = Some("med".to_string());
        let mut err = SchedError::new();
        assert!(is_vnode_eligible(&fx.ctx(), &pool, 0, &j, &Place::free(), &mut err));
    }

    #[test]
    fn provisioning_needed_when_aoe_differs() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        let mut n = cpu_node(&fx.defs, 0, "v1", "8");
        n.provision_enable = true;
        n.current_aoe = Some("sles15".to_string());
        pool.push(n);
        let mut j = job(&fx, "1:ncpus=1");
        j.aoe = Some("rhel8".to_string());
        let mut err = SchedError::new();
        assert_eq!(
            is_provisionable(&fx.ctx(), &pool, 0, &j, true, &mut err),
            Provision::Needed
        );
    }

    #[test]
    fn provisioning_refused_with_running_jobs() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        let mut n = cpu_node(&fx.defs, 0, "v1", "8");
        n.provision_enable = true;
        n.num_jobs = 1;
        pool.push(n);
        let mut j = job(&fx, "1:ncpus=1");
        j.aoe = Some("rhel8".to_string());
        let mut err = SchedError::new();
        assert_eq!(
            is_provisionable(&fx.ctx(), &pool, 0, &j, true, &mut err),
            Provision::NotProvisionable
        );
        assert_eq!(err.code, FailCode::ProvResresvConflict);
    }

    #[test]
    fn provisioning_refused_on_multivnoded_host() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        let mut n = cpu_node(&fx.defs, 0, "v1", "8");
        n.provision_enable = true;
        n.is_multivnoded = true;
        pool.push(n);
        let mut j = job(&fx, "1:ncpus=1");
        j.aoe = Some("rhel8".to_string());
        let mut err = SchedError::new();
        assert_eq!(
            is_provisionable(&fx.ctx(), &pool, 0, &j, true, &mut err),
            Provision::NotProvisionable
        );
        assert_eq!(err.code, FailCode::IsMultiVnode);
    }

    #[test]
    fn can_fit_on_vnode_finds_single_node_fit() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "2"));
        pool.push(cpu_node(&fx.defs, 1, "v2", "8"));
        let ncpus = fx.defs.lookup("ncpus").unwrap();
        let req = vec![ResourceReq {
            def: ncpus,
            amount: 6.0,
            str_val: "6".to_string(),
        }];
        assert!(can_fit_on_vnode(&fx.ctx(), &pool, &req, &[0, 1]));
        assert!(!can_fit_on_vnode(&fx.ctx(), &pool, &req, &[0]));
    }

    #[test]
    fn eligibility_prepass_marks_and_reports_first_reason() {
        let fx = Fixture::new();
        let mut pool = NodePool::new();
        pool.push(cpu_node(&fx.defs, 0, "v1", "8"));
        pool.push(cpu_node(&fx.defs, 1, "v2", "8"));
        pool.get_mut(0).state.down = true;
        let j = job(&fx, "1:ncpus=1");
        let mut err = SchedError::new();
        let nodes = pool.indices();
        check_node_array_eligibility(&fx.ctx(), &mut pool, &j, &Place::free(), &nodes, &mut err);
        assert!(pool.get(0).scratch.ineligible);
        assert!(!pool.get(1).scratch.ineligible);
        assert_eq!(err.code, FailCode::InvalidNodeState);
    }
}
