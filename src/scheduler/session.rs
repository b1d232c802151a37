//! Session state threaded through the reconciliation loop

use chrono::{Local, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::tasks::{GridTask, TaskStatus};

/// Wall-clock source, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Per-ladder scheduling state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleState {
    pub last_execution_time: Option<NaiveDateTime>,
    pub current_phase: TaskStatus,
}

/// Whether a grid task should run on this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Execute,
    Paused,
    OutsideWindow,
    IntervalPending { remaining: Duration },
}

impl CycleState {
    fn new(phase: TaskStatus) -> Self {
        Self {
            last_execution_time: None,
            current_phase: phase,
        }
    }

    /// Paused never runs, Running always runs; Ready and Executed need the
    /// window open and the interval elapsed since the last execution.
    pub fn eligibility(&self, task: &GridTask, now: NaiveDateTime) -> Eligibility {
        match task.status {
            TaskStatus::Paused => return Eligibility::Paused,
            TaskStatus::Running => return Eligibility::Execute,
            TaskStatus::Ready | TaskStatus::Executed => {}
        }

        if !task.window.contains(now.time()) {
            return Eligibility::OutsideWindow;
        }

        if let Some(last) = self.last_execution_time {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < task.interval {
                return Eligibility::IntervalPending {
                    remaining: task.interval - elapsed,
                };
            }
        }

        Eligibility::Execute
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub logged_in: bool,
    pub executed_logins: HashSet<String>,
    pub in_blackout: bool,
    ladders: HashMap<String, CycleState>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a ladder, created on first sight
    pub fn cycle_state(&mut self, ladder_id: &str, phase: TaskStatus) -> &mut CycleState {
        let state = self
            .ladders
            .entry(ladder_id.to_string())
            .or_insert_with(|| CycleState::new(phase));
        state.current_phase = phase;
        state
    }

    pub fn get(&self, ladder_id: &str) -> Option<&CycleState> {
        self.ladders.get(ladder_id)
    }

    /// Drop state for ladders no longer configured
    pub fn retain_ladders(&mut self, configured: &HashSet<&str>) {
        self.ladders
            .retain(|ladder_id, _| configured.contains(ladder_id.as_str()));
    }

    pub fn ladder_count(&self) -> usize {
        self.ladders.len()
    }

    /// Forget logins after the terminal session went away
    pub fn reset_session(&mut self) {
        self.logged_in = false;
        self.executed_logins.clear();
    }
}
