use crate::config::Scenario;
use crate::engine::{Engine, Limits, RunId};
use crate::model::Trajectory;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Result of one (scenario, repetition) run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed(Trajectory),
    Failed { error: String },
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub scenario_idx: usize,
    pub rep_idx: usize,
    pub outcome: RunOutcome,
}

impl RunRecord {
    pub fn trajectory(&self) -> Option<&Trajectory> {
        match &self.outcome {
            RunOutcome::Completed(traj) => Some(traj),
            RunOutcome::Failed { .. } => None,
        }
    }
}

/// Runs every scenario a number of times on the rayon thread pool.
///
/// Run `r` of scenario `s` draws from stream `s * n_reps + r` of a ChaCha
/// generator seeded with the batch seed, so no two runs share random state.
pub struct ScenarioRunner {
    scenarios: Vec<Arc<Scenario>>,
    n_reps: usize,
    seed: u64,
    cancel: Arc<AtomicBool>,
}

impl ScenarioRunner {
    /// Create a runner; without a `seed` one is drawn from the OS.
    pub fn new(scenarios: Vec<Scenario>, n_reps: usize, seed: Option<u64>) -> Result<Self> {
        let seed = match seed {
            Some(seed) => seed,
            None => ChaCha12Rng::try_from_os_rng()
                .context("failed to seed from the OS")?
                .random(),
        };
        log::info!("batch seed {seed}");

        Ok(Self {
            scenarios: scenarios.into_iter().map(Arc::new).collect(),
            n_reps,
            seed,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle that stops all in-flight runs when set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Perform all runs and return their records sorted by scenario and repetition.
    pub fn run(&self) -> Vec<RunRecord> {
        let n_runs = self.scenarios.len() * self.n_reps;
        let n_done = AtomicUsize::new(0);

        let mut records: Vec<RunRecord> = (0..n_runs)
            .into_par_iter()
            .map(|run_id| {
                let scenario_idx = run_id / self.n_reps;
                let rep_idx = run_id % self.n_reps;

                let outcome = match self.run_one(scenario_idx, rep_idx) {
                    Ok(traj) => RunOutcome::Completed(traj),
                    Err(error) => {
                        log::warn!("scenario {scenario_idx} rep {rep_idx} failed: {error:#}");
                        RunOutcome::Failed {
                            error: format!("{error:#}"),
                        }
                    }
                };

                let n_done = n_done.fetch_add(1, Ordering::Relaxed) + 1;
                if n_done % self.n_reps == 0 || n_done == n_runs {
                    let progress = 100.0 * n_done as f64 / n_runs as f64;
                    log::info!("completed {progress:06.2}%");
                }

                RunRecord {
                    scenario_idx,
                    rep_idx,
                    outcome,
                }
            })
            .collect();

        records.sort_by_key(|rec| (rec.scenario_idx, rec.rep_idx));
        records
    }

    /// Perform a single run with its own generator stream.
    pub fn run_one(&self, scenario_idx: usize, rep_idx: usize) -> Result<Trajectory> {
        let scn: &Scenario = self
            .scenarios
            .get(scenario_idx)
            .with_context(|| format!("no scenario {scenario_idx}"))?;

        let stream = (scenario_idx * self.n_reps + rep_idx) as u64;
        let mut rng = ChaCha12Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);

        let limits = Limits {
            max_time: scn.max_time,
            max_events: Some(scn.max_events),
        };
        let id = RunId {
            scenario: scn.name.clone(),
            scenario_idx,
            rep_idx,
            seed: self.seed,
            stream,
        };

        Engine::new(scn, scn.init_pop, limits, rng)
            .perform_simulation(id, &self.cancel)
            .with_context(|| format!("failed to simulate {:?} rep {rep_idx}", scn.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Termination;
    use crate::rates::DeathPolicy;

    fn scenario(name: &str, death: DeathPolicy) -> Scenario {
        Scenario {
            name: name.to_string(),
            b0: 0.5,
            theta: 2.0,
            death,
            iota: 0.5,
            iota_size: 1,
            init_pop: 5,
            max_time: 20.0,
            max_events: 50_000,
        }
    }

    fn scenarios() -> Vec<Scenario> {
        vec![
            scenario(
                "programmed",
                DeathPolicy::Programmed {
                    g: 3.0,
                    at_zero: 0.0,
                },
            ),
            scenario(
                "costly",
                DeathPolicy::Costly {
                    max: 1.0,
                    center: 8.0,
                    sigma: 3.0,
                },
            ),
        ]
    }

    #[test]
    fn records_are_complete_and_ordered() {
        let runner = ScenarioRunner::new(scenarios(), 6, Some(1)).expect("runner");
        let records = runner.run();
        assert_eq!(records.len(), 12);
        for (i, rec) in records.iter().enumerate() {
            assert_eq!(rec.scenario_idx, i / 6);
            assert_eq!(rec.rep_idx, i % 6);
            let traj = rec.trajectory().expect("completed run");
            assert_eq!(traj.scenario_idx, rec.scenario_idx);
            assert_eq!(traj.rep_idx, rec.rep_idx);
            assert_eq!(traj.stream, i as u64);
        }
    }

    #[test]
    fn runs_use_distinct_streams() {
        let runner = ScenarioRunner::new(scenarios(), 8, Some(5)).expect("runner");
        let records = runner.run();
        let first_times: Vec<f64> = records
            .iter()
            .filter_map(|rec| rec.trajectory())
            .filter_map(|traj| traj.events.first().map(|event| event.time))
            .collect();
        assert_eq!(first_times.len(), 16);
        for i in 0..first_times.len() {
            for j in i + 1..first_times.len() {
                assert_ne!(first_times[i], first_times[j]);
            }
        }
    }

    #[test]
    fn batch_is_reproducible_from_seed() {
        let a = ScenarioRunner::new(scenarios(), 4, Some(77)).expect("runner").run();
        let b = ScenarioRunner::new(scenarios(), 4, Some(77)).expect("runner").run();
        assert_eq!(a, b);

        // A single run replays its batch counterpart.
        let runner = ScenarioRunner::new(scenarios(), 4, Some(77)).expect("runner");
        let replay = runner.run_one(1, 2).expect("run");
        assert_eq!(a[6].trajectory(), Some(&replay));
    }

    #[test]
    fn cancelled_batch_still_returns_every_record() {
        let runner = ScenarioRunner::new(scenarios(), 3, Some(2)).expect("runner");
        runner.cancel_handle().store(true, Ordering::Relaxed);
        let records = runner.run();
        assert_eq!(records.len(), 6);
        for rec in &records {
            let traj = rec.trajectory().expect("completed run");
            assert_eq!(traj.termination, Termination::Cancelled);
        }
    }

    #[test]
    fn growth_without_death_stops_at_default_event_budget() {
        let cfg = Config::from_toml(
            r#"
[run]
n_reps = 1

[[scenario]]
name = "unchecked"
b0 = 1.0
theta = 0.0
iota = 0.0
init_pop = 1
max_time = 1000.0
death = { policy = "none" }
"#,
        )
        .expect("valid config");
        let max_events = cfg.scenarios[0].max_events;

        let runner = ScenarioRunner::new(cfg.scenarios, 1, Some(3)).expect("runner");
        let traj = runner.run_one(0, 0).expect("run");
        assert_eq!(traj.termination, Termination::MaxEventsReached);
        assert_eq!(traj.events.len() as u64, max_events);
        assert_eq!(traj.final_pop(), 1 + max_events);
    }

    #[test]
    fn unknown_scenario_is_an_error() {
        let runner = ScenarioRunner::new(scenarios(), 3, Some(2)).expect("runner");
        assert!(runner.run_one(5, 0).is_err());
    }
}
