use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::PlayerSeasonRecord;

/// Markers reference sites append to names (Hall of Fame, active, etc.).
const DECORATIVE_MARKERS: &[char] = &['*', '†', '‡', '^', '+'];

/// One row of the external voting table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteShareRow {
    pub player: String,
    pub season: i32,
    pub share: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct AliasRow {
    source_name: String,
    log_name: String,
}

/// Maps voting-table spellings onto game-log spellings.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    by_source: HashMap<String, String>,
}

impl AliasTable {
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        let table =
            Self::from_reader(file).with_context(|| format!("parse aliases {}", path.display()))?;
        tracing::info!(path = %path.display(), aliases = table.len(), "loaded alias table");
        Ok(table)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
        let mut by_source = HashMap::new();
        for (idx, record) in reader.deserialize::<AliasRow>().enumerate() {
            let row = record.with_context(|| format!("alias line {}", idx + 2))?;
            by_source.insert(clean_label_name(&row.source_name), row.log_name);
        }
        Ok(Self { by_source })
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let by_source = pairs
            .into_iter()
            .map(|(source, log)| (clean_label_name(source), log.to_string()))
            .collect();
        Self { by_source }
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    /// Cleaned name, replaced by its alias when one exists.
    pub fn resolve(&self, raw: &str) -> String {
        let cleaned = clean_label_name(raw);
        match self.by_source.get(&cleaned) {
            Some(alias) => alias.clone(),
            None => cleaned,
        }
    }
}

pub fn clean_label_name(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || DECORATIVE_MARKERS.contains(&c));
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_name(input: &str) -> String {
    let lower = input.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut prev_us = false;
    for ch in lower.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            prev_us = false;
        } else if ch == '\'' {
            // O'Neal and ONeal are the same player.
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

pub fn load_vote_shares(path: &Path) -> Result<Vec<VoteShareRow>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rows =
        read_vote_shares(file).with_context(|| format!("parse vote shares {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = rows.len(), "loaded vote shares");
    Ok(rows)
}

pub fn read_vote_shares<R: Read>(rdr: R) -> Result<Vec<VoteShareRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut out = Vec::new();
    for (idx, record) in reader.deserialize::<VoteShareRow>().enumerate() {
        let row = record.with_context(|| format!("vote share line {}", idx + 2))?;
        if !(0.0..=1.0).contains(&row.share) {
            return Err(PipelineError::InvalidShare {
                player: row.player,
                season: row.season,
                share: row.share,
            }
            .into());
        }
        out.push(row);
    }
    Ok(out)
}

/// Sum of label shares per season.
pub fn season_label_totals(labels: &[VoteShareRow]) -> BTreeMap<i32, f64> {
    let mut out = BTreeMap::new();
    for row in labels {
        *out.entry(row.season).or_insert(0.0) += row.share;
    }
    out
}

/// Seasons whose label total is further than `tolerance` from `expected`.
pub fn check_label_totals(
    labels: &[VoteShareRow],
    expected: f64,
    tolerance: f64,
) -> Vec<(i32, f64)> {
    let mut off = Vec::new();
    for (season, total) in season_label_totals(labels) {
        if (total - expected).abs() > tolerance {
            tracing::warn!(season, total, expected, "label shares do not sum to the league total");
            off.push((season, total));
        }
    }
    off
}

#[derive(Debug, Clone, Default)]
pub struct JoinReport {
    pub matched: usize,
    /// Labels whose name matches no player-season at all.
    pub misses: Vec<String>,
    pub ambiguous: Vec<(String, usize)>,
    /// Labels that name a player-season dropped by the eligibility filter.
    pub ineligible: Vec<String>,
}

impl JoinReport {
    pub fn is_clean(&self) -> bool {
        self.misses.is_empty() && self.ambiguous.is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        if let Some((key, count)) = self.ambiguous.first() {
            return Err(PipelineError::AmbiguousJoin {
                key: key.clone(),
                count: *count,
            }
            .into());
        }
        if !self.misses.is_empty() {
            return Err(PipelineError::JoinMiss {
                misses: self.misses,
            }
            .into());
        }
        Ok(self)
    }
}

/// Writes label shares onto matching rows; rows without a label keep share 0.
///
/// `filtered` holds the player-seasons removed by the eligibility filter. A
/// label that only matches one of those is reported as ineligible, not missed.
pub fn join_labels(
    rows: &mut [PlayerSeasonRecord],
    filtered: &[PlayerSeasonRecord],
    labels: &[VoteShareRow],
    aliases: &AliasTable,
) -> JoinReport {
    let mut index: HashMap<(String, i32), Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter_mut().enumerate() {
        row.share = 0.0;
        index
            .entry((normalize_name(&row.player_name), row.season))
            .or_default()
            .push(idx);
    }
    let dropped = filtered
        .iter()
        .map(|row| (normalize_name(&row.player_name), row.season))
        .collect::<HashSet<_>>();

    let mut report = JoinReport::default();
    for label in labels {
        let key = (normalize_name(&aliases.resolve(&label.player)), label.season);
        match index.get(&key).map(Vec::as_slice) {
            Some([idx]) => {
                rows[*idx].share = label.share;
                report.matched += 1;
            }
            Some(many) if many.len() > 1 => {
                report
                    .ambiguous
                    .push((format!("{} ({})", key.0, key.1), many.len()));
            }
            _ if dropped.contains(&key) => {
                tracing::warn!(
                    player = %label.player,
                    season = label.season,
                    share = label.share,
                    "vote-getter failed the eligibility filter; label unused"
                );
                report
                    .ineligible
                    .push(format!("{} ({})", label.player, label.season));
            }
            _ => {
                report
                    .misses
                    .push(format!("{} ({})", label.player, label.season));
            }
        }
    }

    if !report.is_clean() {
        tracing::warn!(
            misses = report.misses.len(),
            ambiguous = report.ambiguous.len(),
            "label join incomplete"
        );
    }
    tracing::info!(
        matched = report.matched,
        ineligible = report.ineligible.len(),
        labels = labels.len(),
        "joined labels"
    );
    report
}

/// Players ruled out for the target season's postseason.
#[derive(Debug, Clone, Default)]
pub struct UnavailableList {
    names: Vec<String>,
}

impl UnavailableList {
    pub fn load(path: &Path, aliases: &AliasTable) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&raw, aliases))
    }

    pub fn parse(raw: &str, aliases: &AliasTable) -> Self {
        let mut names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| normalize_name(&aliases.resolve(line)))
            .collect::<Vec<_>>();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn contains(&self, player_name: &str) -> bool {
        self.names
            .binary_search(&normalize_name(player_name))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
