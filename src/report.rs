use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::model::TwoStageModel;
use crate::reconstruct::{PredictionRow, TeamShare};

pub struct ReportSummary {
    pub predictions: usize,
    pub teams: usize,
    pub coefficients: usize,
}

enum Cell {
    Text(String),
    Number(f64),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

/// Field order of `PredictionRow`.
const PREDICTION_COLUMNS: [&str; 9] = [
    "player_id",
    "player_name",
    "team",
    "season",
    "p_vote",
    "magnitude",
    "expected_share",
    "adjusted_share",
    "share",
];
const TEAM_COLUMNS: [&str; 2] = ["team", "expected_share"];

// Header goes out even when there are no rows to serialize.
fn headed_writer<W: Write>(out: W, columns: &[&str]) -> Result<csv::Writer<W>> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(columns)?;
    Ok(wtr)
}

pub fn write_predictions_csv(path: &Path, rows: &[PredictionRow]) -> Result<()> {
    create_parent(path)?;
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    write_predictions(file, rows).with_context(|| format!("write {}", path.display()))
}

pub fn write_predictions<W: Write>(out: W, rows: &[PredictionRow]) -> Result<()> {
    let mut wtr = headed_writer(out, &PREDICTION_COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_team_shares_csv(path: &Path, teams: &[TeamShare]) -> Result<()> {
    create_parent(path)?;
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    write_team_shares(file, teams).with_context(|| format!("write {}", path.display()))
}

pub fn write_team_shares<W: Write>(out: W, teams: &[TeamShare]) -> Result<()> {
    let mut wtr = headed_writer(out, &TEAM_COLUMNS)?;
    for team in teams {
        wtr.serialize(team)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Predictions, team totals, coefficients and fit scores in one workbook.
pub fn write_workbook(
    path: &Path,
    model: &TwoStageModel,
    predictions: &[PredictionRow],
    teams: &[TeamShare],
) -> Result<ReportSummary> {
    create_parent(path)?;
    let prediction_rows = std::iter::once(header(&[
        "player_id",
        "player_name",
        "team",
        "season",
        "p_vote",
        "magnitude",
        "expected_share",
        "adjusted_share",
        "share",
    ]))
    .chain(predictions.iter().map(prediction_row))
    .collect::<Vec<_>>();

    let team_rows = std::iter::once(header(&["team", "expected_share"]))
        .chain(
            teams
                .iter()
                .map(|t| vec![Cell::from(t.team.clone()), Cell::from(t.expected_share)]),
        )
        .collect::<Vec<_>>();

    let coefficient_rows = coefficient_rows(model);
    let evaluation_rows = evaluation_rows(model);

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Predictions")?;
        write_rows(sheet, &prediction_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Teams")?;
        write_rows(sheet, &team_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Coefficients")?;
        write_rows(sheet, &coefficient_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Evaluation")?;
        write_rows(sheet, &evaluation_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(ReportSummary {
        predictions: predictions.len(),
        teams: teams.len(),
        coefficients: coefficient_rows.len().saturating_sub(1),
    })
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::from(*n)).collect()
}

fn prediction_row(row: &PredictionRow) -> Vec<Cell> {
    vec![
        Cell::from(row.player_id.to_string()),
        Cell::from(row.player_name.clone()),
        Cell::from(row.team.clone()),
        Cell::from(f64::from(row.season)),
        Cell::from(row.p_vote),
        Cell::from(row.magnitude),
        Cell::from(row.expected_share),
        Cell::from(row.adjusted_share),
        Cell::from(row.share),
    ]
}

fn coefficient_rows(model: &TwoStageModel) -> Vec<Vec<Cell>> {
    let mut rows = vec![
        header(&["term", "magnitude", "indicator"]),
        vec![
            Cell::from("intercept"),
            Cell::from(model.magnitude.intercept),
            Cell::from(model.indicator.coefficients.intercept),
        ],
    ];
    for (idx, name) in model.predictors.iter().enumerate() {
        rows.push(vec![
            Cell::from(name.clone()),
            Cell::from(model.magnitude.slopes.get(idx).copied().unwrap_or(f64::NAN)),
            Cell::from(
                model
                    .indicator
                    .coefficients
                    .slopes
                    .get(idx)
                    .copied()
                    .unwrap_or(f64::NAN),
            ),
        ]);
    }
    rows
}

fn evaluation_rows(model: &TwoStageModel) -> Vec<Vec<Cell>> {
    let eval = &model.evaluation;
    let auc = |v: Option<f64>| v.map(Cell::from).unwrap_or_else(|| Cell::from("n/a"));
    vec![
        header(&["stage", "split", "rows", "score", "metric"]),
        vec![
            Cell::from("magnitude"),
            Cell::from("train"),
            Cell::from(eval.magnitude_train.samples as f64),
            Cell::from(eval.magnitude_train.r2),
            Cell::from("r2"),
        ],
        vec![
            Cell::from("magnitude"),
            Cell::from("test"),
            Cell::from(eval.magnitude_test.samples as f64),
            Cell::from(eval.magnitude_test.r2),
            Cell::from("r2"),
        ],
        vec![
            Cell::from("indicator"),
            Cell::from("train"),
            Cell::from(eval.indicator_train.samples as f64),
            auc(eval.indicator_train.auc),
            Cell::from("auc"),
        ],
        vec![
            Cell::from("indicator"),
            Cell::from("test"),
            Cell::from(eval.indicator_test.samples as f64),
            auc(eval.indicator_test.auc),
            Cell::from("auc"),
        ],
        vec![
            Cell::from("generated_at"),
            Cell::from(model.generated_at.clone()),
        ],
    ]
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            let written = match value {
                Cell::Text(text) => worksheet.write_string(r, c, text),
                // xlsx has no NaN; leave the cell blank.
                Cell::Number(v) if !v.is_finite() => continue,
                Cell::Number(v) => worksheet.write_number(r, c, *v),
            };
            written.with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
