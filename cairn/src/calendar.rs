/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The scheduling calendar: a time-ordered list of run/end events.
//!
//! Events are globally ordered by time with runs sorting before ends at the
//! same instant, so replaying the list always consumes resources before it
//! releases them.  The calendar never blocks; the simulator and the shrink
//! driver replay it from memory.

/// What a timed event does to its job's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    /// The job starts: its per-node requirements are consumed.
    Run,
    /// The job ends: its per-node requirements are released.
    End,
}

/// One calendared event, referencing a request in the snapshot's job list.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub kind: EventKind,
    pub time: i64,
    /// Index into the snapshot's request list.
    pub job: usize,
    pub disabled: bool,
}

/// Time-ordered event list.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    events: Vec<TimedEvent>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping the (time, run-before-end) order stable.
    pub fn add(&mut self, ev: TimedEvent) {
        let pos = self
            .events
            .partition_point(|e| (e.time, e.kind) <= (ev.time, ev.kind));
        self.events.insert(pos, ev);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All events in order, disabled ones included.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Enabled events in order.
    pub fn enabled(&self) -> impl Iterator<Item = &TimedEvent> {
        self.events.iter().filter(|e| !e.disabled)
    }

    /// Is there an enabled run event at or before `end_time`?  A run at
    /// exactly the requester's end still overlaps its window.
    pub fn exists_run_event_before(&self, end_time: i64) -> bool {
        self.enabled()
            .any(|e| e.kind == EventKind::Run && e.time <= end_time)
    }

    /// Is there any enabled event inside `[from, to)`?
    pub fn exists_event_within(&self, from: i64, to: i64) -> bool {
        self.enabled().any(|e| e.time >= from && e.time < to)
    }

    /// Enabled run events with `time < end_time`, in time order.
    pub fn run_events_before(&self, end_time: i64) -> Vec<&TimedEvent> {
        self.enabled()
            .filter(|e| e.kind == EventKind::Run && e.time < end_time)
            .collect()
    }

    /// Drop every event belonging to `job`.
    pub fn remove_job_events(&mut self, job: usize) {
        self.events.retain(|e| e.job != job);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, time: i64, job: usize) -> TimedEvent {
        TimedEvent {
            kind,
            time,
            job,
            disabled: false,
        }
    }

    #[test]
    fn runs_sort_before_ends_at_same_time() {
        let mut cal = Calendar::new();
        cal.add(ev(EventKind::End, 100, 0));
        cal.add(ev(EventKind::Run, 100, 1));
        cal.add(ev(EventKind::Run, 50, 2));
        let order: Vec<(i64, EventKind)> = cal.events().iter().map(|e| (e.time, e.kind)).collect();
        assert_eq!(
            order,
            vec![(50, EventKind::Run), (100, EventKind::Run), (100, EventKind::End)]
        );
    }

    #[test]
    fn disabled_events_are_skipped() {
        let mut cal = Calendar::new();
        let mut e = ev(EventKind::Run, 10, 0);
        e.disabled = true;
        cal.add(e);
        assert!(!cal.exists_run_event_before(100));
        assert!(cal.run_events_before(100).is_empty());
    }

    #[test]
    fn run_events_before_respects_bound() {
        let mut cal = Calendar::new();
        cal.add(ev(EventKind::Run, 10, 0));
        cal.add(ev(EventKind::Run, 20, 1));
        cal.add(ev(EventKind::End, 15, 0));
        let before = cal.run_events_before(15);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].time, 10);
    }

    #[test]
    fn remove_job_events_drops_both_run_and_end() {
        let mut cal = Calendar::new();
        cal.add(ev(EventKind::Run, 10, 7));
        cal.add(ev(EventKind::End, 20, 7));
        cal.add(ev(EventKind::Run, 30, 8));
        cal.remove_job_events(7);
        assert_eq!(cal.events().len(), 1);
        assert_eq!(cal.events()[0].job, 8);
    }
}
