/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shrink-to-fit: find the longest duration at which an STF request can
//! run without crossing dedicated/prime boundaries or calendared events.
//!
//! The search is deterministic and cheap on retries:
//!
//! 1. Try the full duration.
//! 2. On a boundary conflict, shrink to the boundary.
//! 3. Otherwise prove the minimum duration runs at all, then walk run
//!    events backwards from the farthest one inside the window, dividing
//!    the remaining span into shrinking segments (at most five probes).
//! 4. Commit the best duration found; pin `hard_duration` on success.
//!
//! Failures restore the original duration — a rejected STF request leaves
//! no trace.

use tracing::info;

use crate::config::SchedConfig;
use crate::error::{FailCode, SchedError};
use crate::job::Request;
use crate::node::Nspec;
use crate::snapshot::Snapshot;

use super::Evaluator;

/// Maximum number of event-aligned durations tried by the backward walk.
const SHRINK_MAX_RETRY: u32 = 5;

// ── Boundary checks ───────────────────────────────────────────────────────────

/// Would running now at the current duration cross into (or out of)
/// dedicated time?
pub fn check_ded_time_boundary(cfg: &SchedConfig, now: i64, job: &Request) -> Option<FailCode> {
    let window = cfg.next_dedtime(now)?;
    if cfg.is_ded_time(now) {
        if now + job.duration > window.to {
            return Some(FailCode::CrossDedTimeBoundary);
        }
    } else if now + job.duration > window.from {
        return Some(FailCode::CrossDedTimeBoundary);
    }
    None
}

/// Would running now at the current duration spill past the prime-time
/// boundary (when backfill around prime is in force)?
pub fn check_prime_boundary(
    cfg: &SchedConfig,
    prime_status_end: Option<i64>,
    now: i64,
    job: &Request,
) -> Option<FailCode> {
    if !cfg.backfill_prime {
        return None;
    }
    let end = prime_status_end?;
    if now + job.duration > end + cfg.prime_spill {
        return Some(FailCode::CrossPrimeBoundary);
    }
    None
}

/// Duration that fits before the dedicated-time boundary.
///
/// `Some(duration)` — possibly the unchanged full duration when nothing is
/// hit; `None` — even the minimum duration crosses.
pub fn time_to_ded_boundary(cfg: &SchedConfig, now: i64, job: &Request) -> Option<i64> {
    let window = match cfg.next_dedtime(now) {
        Some(w) => w,
        None => return Some(job.duration),
    };
    let end = now + job.duration;
    let min_end = now + job.min_duration;

    if cfg.is_ded_time(now) {
        if min_end > window.to {
            return None;
        }
        if end > window.to {
            return Some(window.to - now);
        }
        return Some(job.duration);
    }

    // Ends inside the window, or spans it entirely.
    if (end > window.from && end < window.to) || (now <= window.from && end >= window.to) {
        if min_end > window.from {
            return None;
        }
        return Some(window.from - now);
    }
    Some(job.duration)
}

/// Duration that fits before the prime boundary; `None` when even the
/// minimum duration crosses.
pub fn time_to_prime_boundary(
    cfg: &SchedConfig,
    prime_status_end: Option<i64>,
    now: i64,
    job: &Request,
) -> Option<i64> {
    if !cfg.backfill_prime {
        return Some(job.duration);
    }
    let end = match prime_status_end {
        Some(e) => e,
        None => return Some(job.duration),
    };
    let boundary = end + cfg.prime_spill;
    if now + job.duration <= boundary {
        return Some(job.duration);
    }
    if now + job.min_duration <= boundary {
        return Some(boundary - now);
    }
    None
}

// ── Shrink driver ─────────────────────────────────────────────────────────────

impl<'a> Evaluator<'a> {
    /// Evaluate a shrink-to-fit request: full duration first, then the
    /// shrink heuristic.  On success the found duration is committed and
    /// `hard_duration` pinned to it; on failure the original duration is
    /// restored.
    pub fn is_ok_to_run_stf(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
    ) -> Result<Vec<Nspec>, SchedError> {
        let orig_duration = job.duration;

        let first_err = match self.is_ok_to_run(snap, job) {
            Ok(ns) => return Ok(ns),
            Err(e) => e,
        };
        if matches!(
            first_err.code,
            FailCode::DedTime | FailCode::PrimeOnly | FailCode::NonprimeOnly
        ) {
            return Err(first_err);
        }

        match self.shrink_job_algorithm(snap, job, first_err) {
            Ok(ns) => {
                job.hard_duration = job.duration;
                Ok(ns)
            }
            Err(e) => {
                job.duration = orig_duration;
                Err(e)
            }
        }
    }

    /// The generic shrink heuristic: boundary first, then minimum
    /// walltime, then the event-aligned backward walk.
    pub fn shrink_job_algorithm(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
        first_err: SchedError,
    ) -> Result<Vec<Nspec>, SchedError> {
        let mut err = first_err;

        if matches!(
            err.code,
            FailCode::CrossPrimeBoundary | FailCode::CrossDedTimeBoundary
        ) {
            match self.shrink_to_boundary(snap, job, &err) {
                Ok(ns) => return Ok(ns),
                Err(e) => err = e,
            }
            // The minimum duration itself hits the boundary: hopeless.
            if matches!(
                err.code,
                FailCode::CrossPrimeBoundary | FailCode::CrossDedTimeBoundary
            ) {
                return Err(err);
            }
        }

        let transient_duration = job.duration;
        let ns_min = self.shrink_to_minwt(snap, job)?;

        // Minimum runs; try to keep as much duration as possible.
        job.duration = transient_duration;
        match self.shrink_to_run_event(snap, job) {
            Ok(ns) => Ok(ns),
            Err(_) => {
                job.duration = job.min_duration;
                Ok(ns_min)
            }
        }
    }

    /// Shrink to the nearest prime/dedicated boundary and try there.
    pub fn shrink_to_boundary(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
        first_err: &SchedError,
    ) -> Result<Vec<Nspec>, SchedError> {
        let orig_duration = job.duration;
        let now = snap.server_time;

        let to_ded =
            time_to_ded_boundary(self.cfg, now, job).ok_or_else(|| first_err.clone())?;
        let to_prime = time_to_prime_boundary(self.cfg, snap.prime_status_end, now, job)
            .ok_or_else(|| first_err.clone())?;

        job.duration = to_ded.min(to_prime);
        let result = self.is_ok_to_run(snap, job);
        if result.is_ok() && orig_duration > job.duration {
            info!(
                job = %job.name,
                duration = job.duration,
                "considering shrinking job due to a prime/dedicated time conflict"
            );
        }
        result
    }

    /// Shrink to the minimum duration and try there.
    pub fn shrink_to_minwt(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
    ) -> Result<Vec<Nspec>, SchedError> {
        job.duration = job.min_duration;
        self.is_ok_to_run(snap, job)
    }

    /// Walk run events backwards from the farthest inside the window,
    /// probing at most [`SHRINK_MAX_RETRY`] event-aligned durations.
    ///
    /// Each failed probe shrinks the window to the next of `retry_count`
    /// equal segments, so a calendar crowded with events costs a bounded
    /// number of evaluations.
    pub fn shrink_to_run_event(
        &mut self,
        snap: &mut Snapshot,
        job: &mut Request,
    ) -> Result<Vec<Nspec>, SchedError> {
        let orig_duration = job.duration;
        let now = snap.server_time;
        let min_end = now + job.min_duration;
        let full_end = now + job.duration;

        let events: Vec<i64> = snap
            .calendar
            .run_events_before(full_end)
            .iter()
            .map(|e| e.time)
            .collect();

        // No event between the minimum and full end: the full duration is
        // the only candidate.
        if events.last().map(|&t| t < min_end).unwrap_or(true) {
            return self.is_ok_to_run(snap, job);
        }

        let mut retry_count = SHRINK_MAX_RETRY;
        let mut seg_end = *events.last().unwrap_or(&full_end);
        let mut last_tried: Option<i64> = None;
        let mut last_skipped: Option<usize> = None;
        let mut last_err = SchedError::new();
        let mut i = events.len() as i64 - 1;

        while retry_count != 0 {
            if i < 0 {
                match last_skipped.take() {
                    // Nothing left to probe.
                    None => break,
                    Some(j) => {
                        i = j as i64;
                        retry_count = 1;
                    }
                }
            }
            let t = events[i as usize];
            if t < min_end {
                break;
            }
            if t > seg_end || Some(t) == last_tried {
                last_skipped = Some(i as usize);
                i -= 1;
                continue;
            }

            job.duration = t - now;
            match self.is_ok_to_run(snap, job) {
                Ok(ns) => {
                    if job.duration == job.min_duration {
                        info!(job = %job.name, "considering shrinking job to its minimum walltime");
                    } else if orig_duration > job.duration {
                        info!(
                            job = %job.name,
                            duration = job.duration,
                            "considering shrinking job due to a reservation/top job conflict"
                        );
                    }
                    return Ok(ns);
                }
                Err(e) => last_err = e,
            }

            last_skipped = None;
            last_tried = Some(t);
            seg_end = min_end
                + (job.duration - job.min_duration) * (retry_count as i64 - 1)
                    / retry_count as i64;
            retry_count -= 1;
            i -= 1;
        }

        if !last_err.is_set() {
            last_err.set(crate::error::Severity::NotRun, FailCode::NoNodeResources);
        }
        Err(last_err)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
