/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cairn – chunk placement and node-release engine for batch scheduling.
//!
//! The engine answers three questions about a cluster snapshot:
//!
//! 1. Can this request run, and on exactly which vnodes?
//!    ([`eval::Evaluator::is_ok_to_run`])
//! 2. How short must a shrink-to-fit request become to run?
//!    ([`eval::Evaluator::is_ok_to_run_stf`])
//! 3. Given a running job and nodes to free, what do its assignment
//!    strings become?  ([`release`])
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── resource/select – typed resources, select/place parsing
//! ├── node            – vnode arena, nspecs, run/end accounting
//! ├── partition       – placement sets and their cache
//! ├── bucket          – whole-node fast path (bitmaps)
//! ├── calendar        – time-ordered run/end events
//! ├── job/snapshot    – request model, per-cycle cluster view
//! ├── eval            – the selspec evaluator, eligibility, STF shrink
//! ├── release         – node-release engine for running jobs
//! ├── wire            – vnode-list DIS codec + definition-file parser
//! ├── config          – YAML scheduler configuration
//! └── parallel        – read-only fan-out helper
//! ```

pub mod bucket;
pub mod calendar;
pub mod config;
pub mod error;
pub mod eval;
pub mod job;
pub mod node;
pub mod parallel;
pub mod partition;
pub mod release;
pub mod resource;
pub mod select;
pub mod snapshot;
pub mod wire;

pub use error::{FailCode, ParseError, SchedError, Severity};
pub use eval::Evaluator;
pub use job::Request;
pub use node::{Node, NodeIdx, NodePool, Nspec};
pub use select::{Place, SelSpec};
pub use snapshot::Snapshot;
