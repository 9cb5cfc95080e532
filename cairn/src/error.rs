/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the placement engine.
//!
//! Two error layers model the two failure surfaces:
//!
//! * [`SchedError`] — why an evaluation could not produce a node solution.
//!   Carried alongside the empty-solution sentinel so callers can
//!   distinguish "retry next cycle" from "never with this configuration".
//! * [`ParseError`] — a malformed `select`/`place`/assignment string handed
//!   to one of the parsers.  These are caller bugs or bad user input, never
//!   cycle state.
//!
//! Every [`SchedError`] variant carries enough structured data to be logged
//! with full context (offending resource, requested vs available amounts)
//! and to be compared for severity: a [`Severity::NeverRun`] verdict must
//! never be replaced by a [`Severity::NotRun`] one.

use thiserror::Error;

// ── Severity ──────────────────────────────────────────────────────────────────

/// How permanent a scheduling failure is.
///
/// Ordering matters: `Unset < NotRun < NeverRun`.  [`SchedError::keep_worse`]
/// relies on the derived `Ord` to guarantee a permanent verdict is never
/// downgraded by a later transient one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    /// No verdict recorded yet.
    #[default]
    Unset,
    /// Recoverable this configuration — worth retrying in a later cycle.
    NotRun,
    /// Permanent for this configuration — retrying cannot help.
    NeverRun,
}

// ── Failure codes ─────────────────────────────────────────────────────────────

/// The reason a request could not be satisfied.
///
/// One flat enum covers every failure shape the engine's callers need to
/// distinguish; the optional arguments on [`SchedError`] carry the offending
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailCode {
    #[default]
    Success,
    /// Internal inconsistency inside the engine itself.
    SchdError,
    NoNodeResources,
    NoFreeNodes,
    NoTotalNodes,
    InsufficientResource,
    InsufficientQueueResource,
    InsufficientServerResource,
    /// Exclusive placement requested but the vnode has running work.
    NodeNotExcl,
    InvalidNodeState,
    NodeResvEnable,
    NodeJobLimitReached,
    NodeUserLimitReached,
    NodeGroupLimitReached,
    NodeNoMultJobs,
    NodeUnlicensed,
    NodeHighLoad,
    /// A placement set's aggregate resources cannot hold the request.
    SetTooSmall,
    /// No placement set fits and spanning placement sets is forbidden.
    CantSpanPset,
    CrossPrimeBoundary,
    CrossDedTimeBoundary,
    DedTime,
    PrimeOnly,
    NonprimeOnly,
    AoeNotAvailable,
    EoeNotAvailable,
    ProvDisableOnServer,
    ProvDisableOnNode,
    /// Provisioning would conflict with work already on the vnode.
    ProvResresvConflict,
    IsMultiVnode,
    /// A calendared reservation would collide inside the request's window.
    ReservationConflict,
    MaxRunSubjobs,
    QueueNotExec,
    QueueNotStarted,
}

// ── SchedError ────────────────────────────────────────────────────────────────

/// A scheduling failure: severity, reason, and the offending values.
///
/// Evaluators return an empty node solution on failure; the reason travels
/// in a value of this type.  The engine frequently tries many nodes or
/// placement sets in sequence and must report the *first meaningful*
/// failure, not the last one probed — see [`SchedError::keep_worse`] and
/// [`SchedError::absorb_if_unset`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedError {
    pub severity: Severity,
    pub code: FailCode,
    /// Primary context, e.g. `"(ncpus R: 4 A: 2 T: 8)"` or a state name.
    pub arg1: Option<String>,
    /// Secondary context, e.g. the placement-set name.
    pub arg2: Option<String>,
    /// Name of the resource definition that failed to match, if any.
    pub rdef: Option<String>,
}

impl SchedError {
    /// A fresh, unset error.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set severity and failure code, clearing any previous arguments.
    pub fn set(&mut self, severity: Severity, code: FailCode) {
        self.severity = severity;
        self.code = code;
        self.arg1 = None;
        self.arg2 = None;
        self.rdef = None;
    }

    /// Shorthand constructor.
    pub fn with(severity: Severity, code: FailCode) -> Self {
        let mut e = Self::new();
        e.set(severity, code);
        e
    }

    /// Reset to the unset state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_set(&self) -> bool {
        self.severity != Severity::Unset
    }

    /// Record `other` only if no verdict has been recorded yet.
    ///
    /// Mirrors the first-failure retention used while probing a node list:
    /// the first concrete rejection is the one reported if nothing succeeds.
    pub fn absorb_if_unset(&mut self, other: &SchedError) {
        if !self.is_set() && other.is_set() {
            *self = other.clone();
        }
    }

    /// Replace this error with `other` unless that would downgrade a
    /// permanent verdict to a transient one.
    pub fn keep_worse(&mut self, other: SchedError) {
        if other.severity >= self.severity {
            *self = other;
        }
    }

    /// Move the verdict out, leaving `self` unset.
    pub fn take(&mut self) -> SchedError {
        std::mem::take(self)
    }
}

impl std::fmt::Display for SchedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use FailCode::*;
        match self.code {
            Success => write!(f, "success"),
            SchdError => write!(f, "internal scheduling error"),
            NoNodeResources => write!(f, "not enough resources on any node"),
            NoFreeNodes => write!(f, "not enough free nodes available"),
            NoTotalNodes => write!(f, "not enough total nodes available"),
            InsufficientResource => match (&self.rdef, &self.arg1) {
                (Some(r), Some(a)) => write!(f, "insufficient amount of resource: {} {}", r, a),
                (Some(r), None) => write!(f, "insufficient amount of resource: {}", r),
                _ => write!(f, "insufficient amount of resource"),
            },
            InsufficientQueueResource => write!(f, "insufficient resource at the queue level"),
            InsufficientServerResource => write!(f, "insufficient resource at the server level"),
            NodeNotExcl => match &self.arg1 {
                Some(kind) => write!(f, "{} requested exclusive access, node is in use", kind),
                None => write!(f, "exclusive access requested, node is in use"),
            },
            InvalidNodeState => match &self.arg1 {
                Some(state) => write!(f, "node is in an ineligible state: {}", state),
                None => write!(f, "node is in an ineligible state"),
            },
            NodeResvEnable => write!(f, "node not eligible for advance reservations"),
            NodeJobLimitReached => write!(f, "node job limit reached"),
            NodeUserLimitReached => write!(f, "node per-user job limit reached"),
            NodeGroupLimitReached => write!(f, "node per-group job limit reached"),
            NodeNoMultJobs => write!(f, "node does not accept multi-node requests"),
            NodeUnlicensed => write!(f, "node is unlicensed"),
            NodeHighLoad => write!(f, "node load is too high"),
            SetTooSmall => match (&self.arg1, &self.arg2) {
                (Some(kind), Some(name)) => write!(f, "{} set {} is too small", kind, name),
                _ => write!(f, "placement set is too small"),
            },
            CantSpanPset => write!(f, "request cannot span placement sets"),
            CrossPrimeBoundary => write!(f, "request crosses a prime-time boundary"),
            CrossDedTimeBoundary => write!(f, "request crosses a dedicated-time boundary"),
            DedTime => write!(f, "dedicated time conflict"),
            PrimeOnly => write!(f, "request may only run in prime time"),
            NonprimeOnly => write!(f, "request may only run in non-prime time"),
            AoeNotAvailable => match &self.arg1 {
                Some(aoe) => write!(f, "AOE {} not available on node", aoe),
                None => write!(f, "requested AOE not available on node"),
            },
            EoeNotAvailable => match &self.arg1 {
                Some(eoe) => write!(f, "EOE {} not available on node", eoe),
                None => write!(f, "requested EOE not available on node"),
            },
            ProvDisableOnServer => write!(f, "provisioning disabled on the server"),
            ProvDisableOnNode => write!(f, "provisioning disabled on the node"),
            ProvResresvConflict => write!(f, "provisioning conflicts with running work"),
            IsMultiVnode => write!(f, "cannot provision a multi-vnode host"),
            ReservationConflict => write!(f, "conflict with an advance reservation"),
            MaxRunSubjobs => write!(f, "maximum running subjobs reached"),
            QueueNotExec => write!(f, "queue is not an execution queue"),
            QueueNotStarted => write!(f, "queue is not started"),
        }
    }
}

// ── ParseError ────────────────────────────────────────────────────────────────

/// A malformed specification string (select, place, or assignment grammar).
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty specification")]
    Empty,

    #[error("invalid chunk count in '{0}'")]
    BadChunkCount(String),

    #[error("malformed resource request '{0}' (expected name=value)")]
    BadResource(String),

    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("duplicate resource '{0}' within one chunk")]
    DuplicateResource(String),

    #[error("invalid value '{value}' for resource '{name}'")]
    BadValue { name: String, value: String },

    #[error("invalid place directive '{0}'")]
    BadPlace(String),

    #[error("place directives pack, scatter, vscatter and free are mutually exclusive")]
    ConflictingPlace,

    #[error("malformed assignment string '{0}'")]
    BadAssignment(String),

    #[error("assignment strings have mismatched chunk structure")]
    ChunkMismatch,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
