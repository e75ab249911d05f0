use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use serde::{Deserialize, Deserializer, Serialize};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// One player's line in one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameLogRow {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub game_id: String,
    pub game_date: NaiveDate,
    pub season: i32,
    pub wl: String,
    #[serde(rename = "min", deserialize_with = "blank_as_zero")]
    pub minutes: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub fgm: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub fga: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub fg3m: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub fg3a: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub ftm: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub fta: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub oreb: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub reb: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub ast: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub stl: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub blk: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub tov: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub pf: f64,
    #[serde(deserialize_with = "blank_as_zero")]
    pub pts: f64,
}

// DNP rows export minutes and stats as blanks.
fn blank_as_zero<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(0.0))
}

impl GameLogRow {
    pub fn is_win(&self) -> bool {
        self.wl.trim().eq_ignore_ascii_case("w")
    }

    /// Counting stats in `COUNTING_STATS` order.
    pub fn counting_stats(&self) -> [f64; COUNTING_STAT_COUNT] {
        [
            self.fgm, self.fga, self.fg3m, self.fg3a, self.ftm, self.fta, self.oreb, self.reb,
            self.ast, self.stl, self.blk, self.tov, self.pf, self.pts,
        ]
    }
}

pub const COUNTING_STAT_COUNT: usize = 14;

pub const COUNTING_STATS: [&str; COUNTING_STAT_COUNT] = [
    "fgm", "fga", "fg3m", "fg3a", "ftm", "fta", "oreb", "reb", "ast", "stl", "blk", "tov", "pf",
    "pts",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSeasonGames {
    pub team: String,
    pub season: i32,
    pub games: u32,
}

/// Games played per (team, season).
pub type TeamGamesTable = HashMap<(String, i32), u32>;

pub fn load_game_logs(path: &Path) -> Result<Vec<GameLogRow>> {
    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
    let rows = if is_parquet {
        read_parquet_logs(path)?
    } else {
        let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        read_csv_logs(file).with_context(|| format!("parse game logs {}", path.display()))?
    };
    tracing::info!(path = %path.display(), rows = rows.len(), "loaded game logs");
    Ok(rows)
}

pub fn read_csv_logs<R: Read>(rdr: R) -> Result<Vec<GameLogRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut out = Vec::new();
    for (idx, record) in reader.deserialize::<GameLogRow>().enumerate() {
        // Header is line 1.
        let row = record.with_context(|| format!("game log line {}", idx + 2))?;
        out.push(row);
    }
    Ok(out)
}

fn read_parquet_logs(path: &Path) -> Result<Vec<GameLogRow>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader game logs")?;
    let iter = reader.get_row_iter(None).context("iterate game log rows")?;

    let mut out = Vec::new();
    for (idx, row) in iter.enumerate() {
        let row = row.with_context(|| format!("read parquet row {idx}"))?;
        out.push(parquet_row_to_log(&row).with_context(|| format!("parquet row {idx}"))?);
    }
    Ok(out)
}

fn parquet_row_to_log(row: &Row) -> Result<GameLogRow> {
    let cols = row
        .get_column_iter()
        .map(|(name, field)| (name.to_ascii_lowercase(), field))
        .collect::<HashMap<_, _>>();
    let field = |name: &str| {
        cols.get(name)
            .copied()
            .ok_or_else(|| anyhow!("missing column {name}"))
    };
    let num = |name: &str| -> Result<f64> {
        match field(name)? {
            Field::Null => Err(anyhow!("column {name} is null")),
            f => field_to_f64(f).ok_or_else(|| anyhow!("column {name} is not numeric: {f}")),
        }
    };
    // Null minutes and stats mean the player did not log any.
    let stat = |name: &str| -> Result<f64> {
        match field(name)? {
            Field::Null => Ok(0.0),
            _ => num(name),
        }
    };
    let text = |name: &str| -> Result<String> { Ok(field_to_string(field(name)?)) };

    let game_date = match field("game_date")? {
        Field::Date(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_CE_DAYS)
            .ok_or_else(|| anyhow!("game_date out of range: {days}"))?,
        other => {
            let raw = field_to_string(other);
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .with_context(|| format!("parse game_date {raw:?}"))?
        }
    };

    Ok(GameLogRow {
        player_id: num("player_id")? as u64,
        player_name: text("player_name")?,
        team: text("team")?,
        game_id: text("game_id")?,
        game_date,
        season: num("season")? as i32,
        wl: text("wl")?,
        minutes: stat("min")?,
        fgm: stat("fgm")?,
        fga: stat("fga")?,
        fg3m: stat("fg3m")?,
        fg3a: stat("fg3a")?,
        ftm: stat("ftm")?,
        fta: stat("fta")?,
        oreb: stat("oreb")?,
        reb: stat("reb")?,
        ast: stat("ast")?,
        stl: stat("stl")?,
        blk: stat("blk")?,
        tov: stat("tov")?,
        pf: stat("pf")?,
        pts: stat("pts")?,
    })
}

fn field_to_f64(field: &Field) -> Option<f64> {
    match field {
        Field::Double(v) => Some(*v),
        Field::Float(v) => Some(*v as f64),
        Field::Long(v) => Some(*v as f64),
        Field::Int(v) => Some(*v as f64),
        Field::Short(v) => Some(*v as f64),
        Field::Byte(v) => Some(*v as f64),
        Field::UInt(v) => Some(*v as f64),
        Field::ULong(v) => Some(*v as f64),
        Field::Str(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn field_to_string(field: &Field) -> String {
    match field {
        Field::Str(s) => s.clone(),
        Field::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn load_team_games(path: &Path) -> Result<TeamGamesTable> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    read_team_games(file).with_context(|| format!("parse team games {}", path.display()))
}

pub fn read_team_games<R: Read>(rdr: R) -> Result<TeamGamesTable> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut out = TeamGamesTable::new();
    for (idx, record) in reader.deserialize::<TeamSeasonGames>().enumerate() {
        let row = record.with_context(|| format!("team games line {}", idx + 2))?;
        out.insert((row.team, row.season), row.games);
    }
    Ok(out)
}

/// Counts distinct game ids per (team, season) when no precomputed table is supplied.
pub fn derive_team_games(logs: &[GameLogRow]) -> TeamGamesTable {
    let mut seen: HashSet<(&str, i32, &str)> = HashSet::new();
    let mut out = TeamGamesTable::new();
    for row in logs {
        if seen.insert((row.team.as_str(), row.season, row.game_id.as_str())) {
            *out.entry((row.team.clone(), row.season)).or_insert(0) += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGS: &str = "\
player_id,player_name,team,game_id,game_date,season,wl,min,fgm,fga,fg3m,fg3a,ftm,fta,oreb,reb,ast,stl,blk,tov,pf,pts
1,Alpha One,AAA,g1,2023-11-01,2024,W,36,10,20,2,6,5,6,1,8,7,1,0,3,2,27
2,Beta Two,AAA,g1,2023-11-01,2024,W,30,4,9,1,3,0,0,2,6,2,0,1,1,3,9
1,Alpha One,AAA,g2,2023-11-03,2024,L,34,8,18,1,5,4,4,0,5,9,2,1,4,1,21
";

    #[test]
    fn csv_logs_parse_with_renamed_minutes() {
        let rows = read_csv_logs(LOGS.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].minutes, 36.0);
        assert_eq!(rows[0].game_date, NaiveDate::from_ymd_opt(2023, 11, 1).unwrap());
        assert!(rows[0].is_win());
        assert!(!rows[2].is_win());
        assert_eq!(rows[1].counting_stats()[13], 9.0);
    }

    #[test]
    fn derived_team_games_count_distinct_games() {
        let rows = read_csv_logs(LOGS.as_bytes()).unwrap();
        let games = derive_team_games(&rows);
        assert_eq!(games.get(&("AAA".to_string(), 2024)), Some(&2));
    }

    #[test]
    fn team_games_table_parses() {
        let raw = "team,season,games\nAAA,2024,82\nBBB,2024,80\n";
        let table = read_team_games(raw.as_bytes()).unwrap();
        assert_eq!(table.get(&("BBB".to_string(), 2024)), Some(&80));
    }

    #[test]
    fn blank_minutes_and_stats_read_as_zero() {
        let raw = "\
player_id,player_name,team,game_id,game_date,season,wl,min,fgm,fga,fg3m,fg3a,ftm,fta,oreb,reb,ast,stl,blk,tov,pf,pts
3,Gamma Three,AAA,g1,2023-11-01,2024,W,,,,,,,,,,,,,,,
";
        let rows = read_csv_logs(raw.as_bytes()).unwrap();
        assert_eq!(rows[0].minutes, 0.0);
        assert!(rows[0].counting_stats().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn blank_season_is_still_an_error() {
        let raw = "\
player_id,player_name,team,game_id,game_date,season,wl,min,fgm,fga,fg3m,fg3a,ftm,fta,oreb,reb,ast,stl,blk,tov,pf,pts
3,Gamma Three,AAA,g1,2023-11-01,,W,12,1,2,0,0,0,0,0,1,0,0,0,0,1,2
";
        assert!(read_csv_logs(raw.as_bytes()).is_err());
    }

    const PARQUET_SCHEMA: &str = "
        message game_logs {
            REQUIRED INT64 player_id;
            REQUIRED BYTE_ARRAY player_name (UTF8);
            REQUIRED BYTE_ARRAY team (UTF8);
            REQUIRED BYTE_ARRAY game_id (UTF8);
            REQUIRED INT32 game_date (DATE);
            OPTIONAL INT32 season;
            REQUIRED BYTE_ARRAY wl (UTF8);
            OPTIONAL DOUBLE min;
            REQUIRED DOUBLE fgm;
            REQUIRED DOUBLE fga;
            REQUIRED DOUBLE fg3m;
            REQUIRED DOUBLE fg3a;
            REQUIRED DOUBLE ftm;
            REQUIRED DOUBLE fta;
            REQUIRED DOUBLE oreb;
            REQUIRED DOUBLE reb;
            REQUIRED DOUBLE ast;
            REQUIRED DOUBLE stl;
            REQUIRED DOUBLE blk;
            REQUIRED DOUBLE tov;
            REQUIRED DOUBLE pf;
            REQUIRED DOUBLE pts;
        }
    ";

    /// Writes two rows for player ids 1 and 2. `None` entries are written as nulls.
    fn write_parquet_logs(path: &Path, seasons: [Option<i32>; 2], minutes: [Option<f64>; 2]) {
        use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int32Type, Int64Type};
        use parquet::file::properties::WriterProperties;
        use parquet::file::writer::SerializedFileWriter;
        use parquet::schema::parser::parse_message_type;
        use std::sync::Arc;

        fn optional<T: Copy>(values: [Option<T>; 2]) -> (Vec<T>, Vec<i16>) {
            let present = values.iter().flatten().copied().collect();
            let levels = values.iter().map(|v| i16::from(v.is_some())).collect();
            (present, levels)
        }
        let text = |a: &str, b: &str| vec![ByteArray::from(a), ByteArray::from(b)];
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let days = |d: NaiveDate| (d - epoch).num_days() as i32;

        let schema = Arc::new(parse_message_type(PARQUET_SCHEMA).unwrap());
        let props = Arc::new(WriterProperties::builder().build());
        let file = fs::File::create(path).unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
        let mut group = writer.next_row_group().unwrap();
        let mut idx = 0;
        while let Some(mut col) = group.next_column().unwrap() {
            let written = match idx {
                0 => col.typed::<Int64Type>().write_batch(&[1, 2], None, None),
                1 => col
                    .typed::<ByteArrayType>()
                    .write_batch(&text("Alpha One", "Beta Two"), None, None),
                2 => col
                    .typed::<ByteArrayType>()
                    .write_batch(&text("AAA", "AAA"), None, None),
                3 => col
                    .typed::<ByteArrayType>()
                    .write_batch(&text("g1", "g1"), None, None),
                4 => {
                    let date = NaiveDate::from_ymd_opt(2023, 11, 1).unwrap();
                    col.typed::<Int32Type>()
                        .write_batch(&[days(date), days(date)], None, None)
                }
                5 => {
                    let (values, levels) = optional(seasons);
                    col.typed::<Int32Type>().write_batch(&values, Some(&levels), None)
                }
                6 => col.typed::<ByteArrayType>().write_batch(&text("W", "W"), None, None),
                7 => {
                    let (values, levels) = optional(minutes);
                    col.typed::<DoubleType>().write_batch(&values, Some(&levels), None)
                }
                n => col
                    .typed::<DoubleType>()
                    .write_batch(&[n as f64, n as f64], None, None),
            };
            written.unwrap();
            col.close().unwrap();
            idx += 1;
        }
        group.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn parquet_logs_load_with_null_minutes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.parquet");
        write_parquet_logs(&path, [Some(2024), Some(2024)], [Some(36.5), None]);

        let rows = load_game_logs(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].player_id, 1);
        assert_eq!(rows[0].player_name, "Alpha One");
        assert_eq!(rows[0].game_date, NaiveDate::from_ymd_opt(2023, 11, 1).unwrap());
        assert_eq!(rows[0].season, 2024);
        assert!(rows[0].is_win());
        assert_eq!(rows[0].minutes, 36.5);
        assert_eq!(rows[1].minutes, 0.0);
        // Stat columns were written as their column index.
        assert_eq!(rows[1].fgm, 8.0);
        assert_eq!(rows[1].pts, 21.0);
    }

    #[test]
    fn parquet_null_season_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.parquet");
        write_parquet_logs(&path, [Some(2024), None], [Some(30.0), Some(28.0)]);

        let err = load_game_logs(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("parquet row 1"), "{msg}");
        assert!(msg.contains("column season is null"), "{msg}");
    }

    #[test]
    fn malformed_row_reports_line() {
        let raw = "player_id,player_name\nabc,Broken\n";
        let err = read_csv_logs(raw.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
