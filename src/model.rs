use serde::{Deserialize, Serialize};

/// Kind of population change.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Death,
    Birth,
    Immigration,
}

impl EventKind {
    /// Event kinds in the order used for the weighted draw.
    pub const ALL: [EventKind; 3] = [EventKind::Death, EventKind::Birth, EventKind::Immigration];

    /// Population after an event of this kind hits `pop`; never drops below zero.
    pub fn apply(self, pop: u64, immigration_size: u64) -> u64 {
        match self {
            EventKind::Death => pop.saturating_sub(1),
            EventKind::Birth => pop.saturating_add(1),
            EventKind::Immigration => pop.saturating_add(immigration_size),
        }
    }
}

/// Single population change of a trajectory.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Event {
    /// One-based event index.
    pub index: u64,
    /// Time at which the event happened.
    pub time: f64,
    /// Population after the event.
    pub population: u64,
    pub kind: EventKind,
}

/// Reason a simulation run stopped.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The next event would happen after the time budget.
    MaxTimeReached,
    /// All rates vanished: the population is absorbed.
    ZeroTotalRate,
    /// The event budget was used up before the time budget.
    MaxEventsReached,
    /// The run was cancelled from outside.
    Cancelled,
}

/// Complete event record of one simulation run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub scenario: String,
    pub scenario_idx: usize,
    pub rep_idx: usize,

    /// Seed and stream of the run's random number generator.
    pub seed: u64,
    pub stream: u64,

    pub init_pop: u64,
    pub immigration_size: u64,

    pub events: Vec<Event>,

    /// Time up to which the trajectory describes the population.
    pub end_time: f64,

    pub termination: Termination,
}

impl Trajectory {
    /// Population after the last event.
    pub fn final_pop(&self) -> u64 {
        self.events.last().map_or(self.init_pop, |event| event.population)
    }

    /// Population at time `time`, right-continuous in time.
    pub fn population_at(&self, time: f64) -> u64 {
        let n_done = self.events.partition_point(|event| event.time <= time);
        match n_done {
            0 => self.init_pop,
            n => self.events[n - 1].population,
        }
    }
}
