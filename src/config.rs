use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::features::EligibilityThresholds;
use crate::model::FitOptions;
use crate::reconstruct::RESCALE_ITERATIONS;

pub const ENV_PREFIX: &str = "ALLNBA_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Season to predict. `None` picks the latest season in the game logs.
    pub target_season: Option<i32>,
    pub min_minutes_frac: f64,
    pub min_games_frac: f64,
    pub test_fraction: f64,
    pub magnitude_seed: u64,
    pub indicator_seed: u64,
    pub logistic_l2: f64,
    pub rescale_iterations: usize,
    /// Abort on label rows that match no player-season.
    pub strict_join: bool,
    pub label_total_tolerance: f64,
    pub overfit_margin: f64,
    pub paths: DataPaths,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let thresholds = EligibilityThresholds::default();
        Self {
            target_season: None,
            min_minutes_frac: thresholds.min_minutes_frac,
            min_games_frac: thresholds.min_games_frac,
            test_fraction: 0.25,
            magnitude_seed: 42,
            indicator_seed: 7,
            logistic_l2: 1e-3,
            rescale_iterations: RESCALE_ITERATIONS,
            strict_join: true,
            label_total_tolerance: 0.05,
            overfit_margin: 0.10,
            paths: DataPaths::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub game_logs: PathBuf,
    /// Precomputed games per team-season; derived from the logs when absent.
    pub team_games: Option<PathBuf>,
    pub labels: PathBuf,
    pub aliases: Option<PathBuf>,
    pub unavailable: Option<PathBuf>,
    pub out_dir: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            game_logs: PathBuf::from("data/game_logs.csv"),
            team_games: None,
            labels: PathBuf::from("data/vote_shares.csv"),
            aliases: None,
            unavailable: None,
            out_dir: PathBuf::from("out"),
        }
    }
}

impl DataPaths {
    pub fn model_path(&self) -> PathBuf {
        self.out_dir.join("model.json")
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.out_dir.join("predictions.csv")
    }

    pub fn team_shares_path(&self) -> PathBuf {
        self.out_dir.join("team_shares.csv")
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Defaults, then the optional file, then `ALLNBA_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env(opt_env)?;
        Ok(cfg)
    }

    /// Overrides fields from `ALLNBA_<FIELD>` variables. Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("TARGET_SEASON") {
            self.target_season = Some(parse_var("TARGET_SEASON", &v)?);
        }
        override_parsed(&get, "MIN_MINUTES_FRAC", &mut self.min_minutes_frac)?;
        override_parsed(&get, "MIN_GAMES_FRAC", &mut self.min_games_frac)?;
        override_parsed(&get, "TEST_FRACTION", &mut self.test_fraction)?;
        override_parsed(&get, "MAGNITUDE_SEED", &mut self.magnitude_seed)?;
        override_parsed(&get, "INDICATOR_SEED", &mut self.indicator_seed)?;
        override_parsed(&get, "LOGISTIC_L2", &mut self.logistic_l2)?;
        override_parsed(&get, "RESCALE_ITERATIONS", &mut self.rescale_iterations)?;
        override_parsed(&get, "STRICT_JOIN", &mut self.strict_join)?;
        override_parsed(&get, "LABEL_TOTAL_TOLERANCE", &mut self.label_total_tolerance)?;
        override_parsed(&get, "OVERFIT_MARGIN", &mut self.overfit_margin)?;

        if let Some(v) = get("GAME_LOGS") {
            self.paths.game_logs = PathBuf::from(v);
        }
        if let Some(v) = get("TEAM_GAMES") {
            self.paths.team_games = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LABELS") {
            self.paths.labels = PathBuf::from(v);
        }
        if let Some(v) = get("ALIASES") {
            self.paths.aliases = Some(PathBuf::from(v));
        }
        if let Some(v) = get("UNAVAILABLE") {
            self.paths.unavailable = Some(PathBuf::from(v));
        }
        if let Some(v) = get("OUT_DIR") {
            self.paths.out_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) || self.test_fraction == 0.0 {
            return Err(anyhow!("test_fraction must be in (0, 1), got {}", self.test_fraction));
        }
        for (name, v) in [
            ("min_minutes_frac", self.min_minutes_frac),
            ("min_games_frac", self.min_games_frac),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(anyhow!("{name} must be in [0, 1], got {v}"));
            }
        }
        if self.logistic_l2 < 0.0 {
            return Err(anyhow!("logistic_l2 must be non-negative"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> EligibilityThresholds {
        EligibilityThresholds {
            min_minutes_frac: self.min_minutes_frac,
            min_games_frac: self.min_games_frac,
        }
    }

    pub fn fit_options(&self, target_season: i32) -> FitOptions {
        FitOptions {
            target_season,
            test_fraction: self.test_fraction,
            magnitude_seed: self.magnitude_seed,
            indicator_seed: self.indicator_seed,
            logistic_l2: self.logistic_l2,
            overfit_margin: self.overfit_margin,
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(v) = get(name) {
        *slot = parse_var(name, &v)?;
    }
    Ok(())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| anyhow!("{ENV_PREFIX}{name}={raw:?}: {err}"))
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|val| if val.trim().is_empty() { None } else { Some(val) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.min_minutes_frac, 0.4);
        assert_eq!(cfg.min_games_frac, 0.3);
        assert_eq!(cfg.test_fraction, 0.25);
        assert_eq!(cfg.rescale_iterations, 10);
        assert!(cfg.strict_join);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"target_season": 2024, "paths": {"out_dir": "/tmp/x"}}"#).unwrap();
        let cfg = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.target_season, Some(2024));
        assert_eq!(cfg.paths.out_dir, PathBuf::from("/tmp/x"));
        assert_eq!(cfg.paths.labels, PathBuf::from("data/vote_shares.csv"));
        assert_eq!(cfg.magnitude_seed, 42);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = PipelineConfig::default();
        cfg.apply_env(lookup(&[
            ("ALLNBA_TARGET_SEASON", "2023"),
            ("ALLNBA_STRICT_JOIN", "false"),
            ("ALLNBA_MAGNITUDE_SEED", " 11 "),
            ("ALLNBA_OUT_DIR", "results"),
        ]))
        .unwrap();
        assert_eq!(cfg.target_season, Some(2023));
        assert!(!cfg.strict_join);
        assert_eq!(cfg.magnitude_seed, 11);
        assert_eq!(cfg.paths.model_path(), PathBuf::from("results/model.json"));
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut cfg = PipelineConfig::default();
        let err = cfg
            .apply_env(lookup(&[("ALLNBA_TEST_FRACTION", "quarter")]))
            .unwrap_err();
        assert!(err.to_string().contains("ALLNBA_TEST_FRACTION"));
    }

    #[test]
    fn league_total_is_not_a_setting() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert!(json.get("league_total").is_none());

        let mut cfg = PipelineConfig::default();
        cfg.apply_env(lookup(&[("ALLNBA_LEAGUE_TOTAL", "10")])).unwrap();
        assert_eq!(cfg, PipelineConfig::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"league_total": 12.0}"#).unwrap();
        assert_eq!(PipelineConfig::from_file(&path).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let cfg = PipelineConfig {
            test_fraction: 1.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
