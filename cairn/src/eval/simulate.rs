/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Calendar-aware availability: how many chunks a node can hold for the
//! whole duration of a request, not just right now.
//!
//! The walk replays the time-ordered event list against a shadow copy of
//! the node's resources, consuming on run events and releasing on end
//! events, keeping the minimum chunk count observed.  Requests inside a
//! reservation skip the walk — their universe is already carved out.

use crate::error::{FailCode, SchedError, Severity};
use crate::job::Request;
use crate::node::{find_nspec, is_excl, NodeIdx, NodePool};
use crate::resource::{
    check_avail_resources, find_resource_mut, CheckFlags, ResourceReq, UNLIMITED,
};

use super::EvalCtx;

/// Number of whole chunks of `reqs` this node can satisfy over the
/// request's remaining duration.  `0` means a conflict; `err` carries the
/// reason ([`FailCode::ReservationConflict`] for a timed collision,
/// [`FailCode::ProvResresvConflict`] across AOE boundaries).
pub fn check_resources_for_node(
    ctx: &EvalCtx<'_>,
    pool: &NodePool,
    idx: NodeIdx,
    job: &Request,
    reqs: &[ResourceReq],
    err: &mut SchedError,
) -> f64 {
    let flags = CheckFlags {
        check_all_bools: true,
        unset_res_zero: true,
        ..CheckFlags::NONE
    };

    let mut min_chunks = {
        let node = pool.get(idx);
        if node.res.iter().any(|r| r.indirect.is_some()) {
            let resolved = pool.dup_resolved_list(idx);
            check_avail_resources(
                ctx.defs,
                &resolved,
                reqs,
                flags,
                None,
                FailCode::InsufficientResource,
                Some(err),
                None,
            )
        } else {
            check_avail_resources(
                ctx.defs,
                &node.res,
                reqs,
                flags,
                None,
                FailCode::InsufficientResource,
                Some(err),
                None,
            )
        }
    };

    let now = ctx.server_time;
    // A shrunk request is bounded by its committed hard duration when an
    // event already sits inside that window.
    let use_hard = job.hard_duration > 0
        && job.hard_duration != job.duration
        && ctx
            .calendar
            .exists_event_within(now, now + job.hard_duration + 1);
    let end_time = now + job.time_left(use_hard);

    if min_chunks <= 0.0
        || !ctx.calendar.exists_run_event_before(end_time)
        || (job.in_resv && !job.is_resv)
    {
        return min_chunks.max(0.0);
    }

    let mut shadow = pool.dup_resolved_list(idx);
    let node_sharing = pool.get(idx).sharing;
    let requester_excl = is_excl(&job.place, node_sharing);

    for ev in ctx.calendar.enabled() {
        if min_chunks <= 0.0 {
            break;
        }
        if ev.time < now {
            continue;
        }
        let other = match ctx.jobs.get(ev.job) {
            Some(o) => o,
            None => continue,
        };
        // Work inside a reservation is already accounted by its owner.
        if other.in_resv && !other.is_resv {
            continue;
        }
        if other.name == job.name {
            continue;
        }
        let ns = match find_nspec(&other.nspecs, idx) {
            Some(ns) => ns,
            None => continue,
        };
        // Endpoint-inclusive: a run at exactly the requester's end still
        // conflicts.
        if ev.time > end_time {
            continue;
        }

        // A provisioning request and a non-provisioning one cannot share
        // the node inside the window.
        if job.aoe.is_some() && other.aoe.is_none() {
            err.set(Severity::NotRun, FailCode::ProvResresvConflict);
            min_chunks = 0.0;
            break;
        }

        if is_excl(&other.place, node_sharing) || requester_excl {
            min_chunks = 0.0;
            break;
        }

        let is_run = ev.kind == crate::calendar::EventKind::Run;
        for req in &ns.resources {
            if ctx.defs.get(req.def).consumable {
                if let Some(res) = find_resource_mut(&mut shadow, req.def) {
                    if is_run {
                        res.assigned += req.amount;
                    } else {
                        res.assigned -= req.amount;
                    }
                }
            }
        }
        if is_run {
            let mut walk_err = SchedError::new();
            let chunks = check_avail_resources(
                ctx.defs,
                &shadow,
                reqs,
                flags,
                None,
                FailCode::InsufficientResource,
                Some(&mut walk_err),
                None,
            );
            if chunks < min_chunks {
                min_chunks = chunks;
                if chunks == 0.0 {
                    *err = walk_err;
                }
            }
        }
    }

    if min_chunks <= 0.0 && err.code != FailCode::ProvResresvConflict {
        err.set(Severity::NotRun, FailCode::ReservationConflict);
    }
    if min_chunks == UNLIMITED {
        UNLIMITED
    } else {
        min_chunks.max(0.0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
