use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use allnba_share::config::PipelineConfig;
use allnba_share::pipeline::{self, PredictionOutput};

#[derive(Parser)]
#[command(name = "allnba_share")]
#[command(about = "Estimate All-NBA voting shares and per-team totals", long_about = None)]
struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    inputs: InputArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct InputArgs {
    /// Season to predict (defaults to the latest season in the logs)
    #[arg(long, global = true)]
    season: Option<i32>,
    /// Player game logs, CSV or Parquet
    #[arg(long, global = true)]
    game_logs: Option<PathBuf>,
    /// Games per team-season; derived from the logs when omitted
    #[arg(long, global = true)]
    team_games: Option<PathBuf>,
    /// Vote share table
    #[arg(long, global = true)]
    labels: Option<PathBuf>,
    /// Name alias table
    #[arg(long, global = true)]
    aliases: Option<PathBuf>,
    /// Players ruled out for the target season, one per line
    #[arg(long, global = true)]
    unavailable: Option<PathBuf>,
    /// Directory for model.json and the CSV outputs
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,
    /// Warn on unmatched label rows instead of failing
    #[arg(long, global = true)]
    lenient_join: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fit both stages and write the model artifact
    Fit,
    /// Score every player-season with a saved model
    Predict,
    /// Fit then predict in one pass
    Run {
        /// Also write an xlsx report
        #[arg(long)]
        xlsx: Option<PathBuf>,
    },
}

impl InputArgs {
    fn apply(self, cfg: &mut PipelineConfig) {
        if let Some(season) = self.season {
            cfg.target_season = Some(season);
        }
        if let Some(path) = self.game_logs {
            cfg.paths.game_logs = path;
        }
        if let Some(path) = self.team_games {
            cfg.paths.team_games = Some(path);
        }
        if let Some(path) = self.labels {
            cfg.paths.labels = path;
        }
        if let Some(path) = self.aliases {
            cfg.paths.aliases = Some(path);
        }
        if let Some(path) = self.unavailable {
            cfg.paths.unavailable = Some(path);
        }
        if let Some(dir) = self.out_dir {
            cfg.paths.out_dir = dir;
        }
        if self.lenient_join {
            cfg.strict_join = false;
        }
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = PipelineConfig::load(cli.config.as_deref())?;
    cli.inputs.apply(&mut cfg);
    cfg.validate()?;

    match cli.command {
        Command::Fit => {
            let model = pipeline::run_fit(&cfg)?;
            println!("Model fit for season {}", model.target_season);
            println!("Artifact: {}", cfg.paths.model_path().display());
            println!(
                "Magnitude R2 train/test: {:.3}/{:.3}",
                model.evaluation.magnitude_train.r2, model.evaluation.magnitude_test.r2
            );
            println!(
                "Indicator AUC train/test: {}/{}",
                fmt_opt(model.evaluation.indicator_train.auc),
                fmt_opt(model.evaluation.indicator_test.auc)
            );
        }
        Command::Predict => {
            let out = pipeline::run_predict(&cfg)?;
            print_teams(&out);
        }
        Command::Run { xlsx } => {
            let out = pipeline::run(&cfg, xlsx.as_deref())?;
            print_teams(&out);
        }
    }
    Ok(())
}

fn print_teams(out: &PredictionOutput) {
    println!("Expected All-NBA share by team, {}", out.season);
    for team in &out.teams {
        println!("{:<6} {:>7.3}", team.team, team.expected_share);
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.3}"))
        .unwrap_or_else(|| "n/a".to_string())
}
