use crate::model::{Event, EventKind, Termination, Trajectory};
use crate::rates::RateModel;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Exp, weighted::WeightedIndex};
use std::{
    ops::ControlFlow,
    sync::atomic::{AtomicBool, Ordering},
};

/// Identity of a run, copied into its trajectory.
#[derive(Debug, Clone)]
pub struct RunId {
    pub scenario: String,
    pub scenario_idx: usize,
    pub rep_idx: usize,
    /// Seed and stream the run's generator was built from.
    pub seed: u64,
    pub stream: u64,
}

/// Budget of a single run.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_time: f64,
    pub max_events: Option<u64>,
}

/// Population state of a running simulation.
#[derive(Debug, Clone, Copy)]
struct State {
    pop: u64,
    time: f64,
    n_events: u64,
}

/// Exact event-by-event simulation engine.
///
/// Holds the rate model, current state, and random number generator, and
/// produces one [`Trajectory`] per [`Engine::perform_simulation`] call.
pub struct Engine<'a, M: RateModel> {
    model: &'a M,
    limits: Limits,
    state: State,
    rng: ChaCha12Rng,
}

impl<'a, M: RateModel> Engine<'a, M> {
    /// Create a new `Engine` starting from `init_pop` at time zero.
    ///
    /// The generator must be private to this engine; see
    /// [`crate::runner::ScenarioRunner`] for how independent streams are derived.
    pub fn new(model: &'a M, init_pop: u64, limits: Limits, rng: ChaCha12Rng) -> Self {
        let state = State {
            pop: init_pop,
            time: 0.0,
            n_events: 0,
        };
        Self {
            model,
            limits,
            state,
            rng,
        }
    }

    /// Run until a termination condition holds and return the trajectory.
    pub fn perform_simulation(mut self, id: RunId, cancel: &AtomicBool) -> Result<Trajectory> {
        let init_pop = self.state.pop;

        let mut events = Vec::new();
        let termination = loop {
            if cancel.load(Ordering::Relaxed) {
                break Termination::Cancelled;
            }
            match self.perform_step().context("failed to perform step")? {
                ControlFlow::Continue(event) => events.push(event),
                ControlFlow::Break(termination) => break termination,
            }
        };

        // An absorbed population stays put until the time budget runs out.
        let end_time = match termination {
            Termination::MaxTimeReached | Termination::ZeroTotalRate => self.limits.max_time,
            Termination::MaxEventsReached | Termination::Cancelled => self.state.time,
        };

        log::debug!(
            "{} rep {}: {termination:?} after {} events at t = {:.3}",
            id.scenario,
            id.rep_idx,
            self.state.n_events,
            self.state.time
        );

        Ok(Trajectory {
            scenario: id.scenario,
            scenario_idx: id.scenario_idx,
            rep_idx: id.rep_idx,
            seed: id.seed,
            stream: id.stream,
            init_pop,
            immigration_size: self.model.immigration_size(),
            events,
            end_time,
            termination,
        })
    }

    /// Advance the chain by one event, or report why the run ends.
    fn perform_step(&mut self) -> Result<ControlFlow<Termination, Event>> {
        let rates = self.model.rates(self.state.pop);
        let total = rates.total();
        if !(total.is_finite() && total > 0.0) {
            return Ok(ControlFlow::Break(Termination::ZeroTotalRate));
        }

        if let Some(max_events) = self.limits.max_events {
            if self.state.n_events >= max_events {
                return Ok(ControlFlow::Break(Termination::MaxEventsReached));
            }
        }

        // Minimum of the competing exponential clocks.
        let wait_dist = Exp::new(total)?;
        let wait = wait_dist.sample(&mut self.rng);
        let mut time = self.state.time + wait;
        if time > self.limits.max_time {
            return Ok(ControlFlow::Break(Termination::MaxTimeReached));
        }
        if time <= self.state.time {
            time = next_after(self.state.time);
        }

        // Zero-weight kinds are never drawn.
        let kind_dist = WeightedIndex::new(rates.weights())?;
        let kind = EventKind::ALL[kind_dist.sample(&mut self.rng)];

        self.state.pop = kind.apply(self.state.pop, self.model.immigration_size());
        self.state.time = time;
        self.state.n_events += 1;

        Ok(ControlFlow::Continue(Event {
            index: self.state.n_events,
            time,
            population: self.state.pop,
            kind,
        }))
    }
}

/// Smallest representable time strictly after a non-negative `time`.
fn next_after(time: f64) -> f64 {
    f64::from_bits(time.to_bits() + 1)
}
