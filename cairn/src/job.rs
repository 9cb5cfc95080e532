/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The request model: one job or reservation as the engine sees it.
//!
//! The engine never owns job lifecycle — it receives requests inside a
//! snapshot and answers placement questions about them.  A running request
//! additionally carries the nspec list it holds, which is what the
//! calendar simulator and the release engine consume.

use crate::node::Nspec;
use crate::select::{Place, SelSpec};

/// A job or reservation evaluated against the snapshot.
#[derive(Debug, Clone)]
pub struct Request {
    pub name: String,
    pub is_resv: bool,
    pub select: SelSpec,
    pub place: Place,
    pub user: String,
    pub group: String,

    /// Requested (possibly already shrunk) duration, seconds.
    pub duration: i64,
    /// Smallest acceptable duration for a shrink-to-fit request.
    pub min_duration: i64,
    /// Duration committed after a successful shrink.
    pub hard_duration: i64,

    /// Requested provisioning environment, if any.
    pub aoe: Option<String>,
    /// Requested power environment, if any.
    pub eoe: Option<String>,

    /// The request lives inside a reservation's universe.
    pub in_resv: bool,
    /// Admin-forced run: per-node limits are not enforced.
    pub qrun: bool,

    /// Set when a prior pass selected nodes that refuse multi-node work;
    /// the evaluator re-satisfies the request with those nodes excluded.
    pub will_use_multinode: bool,

    /// Concrete assignment when running (or tentatively placed).
    pub nspecs: Vec<Nspec>,
    /// Name of the placement set that satisfied the request.
    pub nodepart_name: Option<String>,
    /// The request did not fit in any placement set and spanned.
    pub can_not_fit: bool,
}

impl Request {
    fn new(name: &str, is_resv: bool, select: SelSpec, place: Place) -> Self {
        Request {
            name: name.to_string(),
            is_resv,
            select,
            place,
            user: String::new(),
            group: String::new(),
            duration: 0,
            min_duration: 0,
            hard_duration: 0,
            aoe: None,
            eoe: None,
            in_resv: false,
            qrun: false,
            will_use_multinode: false,
            nspecs: Vec::new(),
            nodepart_name: None,
            can_not_fit: false,
        }
    }

    pub fn new_job(name: &str, select: SelSpec, place: Place) -> Self {
        Self::new(name, false, select, place)
    }

    pub fn new_resv(name: &str, select: SelSpec, place: Place) -> Self {
        Self::new(name, true, select, place)
    }

    /// A shrink-to-fit request carries a real minimum below its duration.
    pub fn is_stf(&self) -> bool {
        self.min_duration > 0 && self.min_duration < self.duration
    }

    /// Seconds of runtime left, optionally measured against the committed
    /// hard duration instead of the requested one.
    pub fn time_left(&self, use_hard: bool) -> i64 {
        if use_hard && self.hard_duration > 0 {
            self.hard_duration
        } else {
            self.duration
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
