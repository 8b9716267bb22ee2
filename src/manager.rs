use crate::analysis::{Analyzer, Results};
use crate::config::Config;
use crate::runner::{RunRecord, ScenarioRunner};
use anyhow::{Context, Result, bail};
use glob::glob;
use rmp_serde::{decode, encode};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// File-system front end of a simulation directory.
///
/// The directory holds `config.toml`; simulation and analysis write their
/// records next to it.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Run every scenario and save one record file per scenario.
    pub fn simulate(&self) -> Result<()> {
        let runner = ScenarioRunner::new(
            self.cfg.scenarios.clone(),
            self.cfg.run.n_reps,
            self.cfg.run.seed,
        )
        .context("failed to construct runner")?;

        let records = runner.run();

        for (scenario_idx, scn) in self.cfg.scenarios.iter().enumerate() {
            let scn_records: Vec<&RunRecord> = records
                .iter()
                .filter(|rec| rec.scenario_idx == scenario_idx)
                .collect();

            let file = self.scenario_file(scenario_idx);
            write_msgpack(&file, &scn_records)
                .with_context(|| format!("failed to save {file:?}"))?;
            log::info!(
                "saved {} records of {:?} to {file:?}",
                scn_records.len(),
                scn.name
            );
        }

        Ok(())
    }

    /// Analyze all saved records and save the results.
    pub fn analyze(&self) -> Result<Results> {
        let n_files = self
            .count_scenario_files()
            .context("failed to count scenario files")?;
        if n_files != self.cfg.scenarios.len() {
            bail!(
                "expected {} scenario files, but found {n_files}",
                self.cfg.scenarios.len()
            );
        }

        let mut records = Vec::new();
        for scenario_idx in 0..n_files {
            let file = self.scenario_file(scenario_idx);
            let scn_records: Vec<RunRecord> =
                read_msgpack(&file).with_context(|| format!("failed to load {file:?}"))?;
            records.extend(scn_records);
        }

        let analyzer = Analyzer::new(self.cfg.sampling.clone());
        let results = analyzer
            .analyze(&self.cfg.scenarios, &records)
            .context("failed to analyze records")?;

        for summary in &results.summaries {
            let (gini, top_share) = summary
                .hosts
                .as_ref()
                .map_or((f64::NAN, f64::NAN), |hosts| {
                    (
                        hosts.gini.unwrap_or(f64::NAN),
                        hosts.top_share.unwrap_or(f64::NAN),
                    )
                });
            log::info!(
                "{} ({}): mean {:.3} ± {:.3}, extinction {:.3}, host gini {gini:.3}, top share {top_share:.3}",
                summary.scenario,
                summary.death_policy,
                summary.mean.mean,
                summary.mean.std_dev,
                summary.extinction_prob,
            );
        }

        let file = self.results_file();
        write_msgpack(&file, &results).with_context(|| format!("failed to save {file:?}"))?;
        log::info!("saved {file:?}");

        Ok(results)
    }

    /// Remove every generated file.
    pub fn clean(&self) -> Result<()> {
        let mut files = self.glob_files("scenario-*.msgpack")?;
        files.extend(self.glob_files("results.msgpack")?);
        for file in files {
            fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
            log::info!("removed {file:?}");
        }
        Ok(())
    }

    fn count_scenario_files(&self) -> Result<usize> {
        Ok(self.glob_files("scenario-*.msgpack")?.len())
    }

    fn glob_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join(pattern);
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let files = glob(pattern)
            .context("failed to glob files")?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        Ok(files)
    }

    fn scenario_file(&self, scenario_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("scenario-{scenario_idx:04}.msgpack"))
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.msgpack")
    }
}

fn write_msgpack<T: Serialize + ?Sized>(file: &Path, val: &T) -> Result<()> {
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, val).context("failed to serialize value")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

fn read_msgpack<T: DeserializeOwned>(file: &Path) -> Result<T> {
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    decode::from_read(&mut reader).context("failed to deserialize value")
}
