//! Table schemas and row extraction from API-Football payloads
//!
//! Each extractor flattens one upstream item into a [`Row`] keyed by the
//! column names of its [`Schema`]. Fields are passed through as scalar JSON
//! values; missing or nested values become `null`.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

/// Column name → scalar value.
pub type Row = BTreeMap<String, Value>;

/// Columns of a CSV table and the columns that identify a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub key: &'static [&'static str],
}

impl Schema {
    /// Cells of `row` in column order.
    pub fn cells(&self, row: &Row) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| cell(row.get(*c).unwrap_or(&Value::Null)))
            .collect()
    }
}

pub const TEAMS: Schema = Schema {
    name: "teams",
    columns: &[
        "team_id",
        "team_name",
        "country",
        "code",
        "founded",
        "national",
        "logo",
        "venue_name",
        "venue_city",
        "venue_capacity",
        "qualification",
        "is_host",
    ],
    key: &["team_id"],
};

pub const SQUADS: Schema = Schema {
    name: "squads",
    columns: &[
        "player_id",
        "player_name",
        "team_id",
        "team_name",
        "age",
        "number",
        "position",
        "photo",
    ],
    key: &["team_id", "player_id"],
};

pub const PLAYER_STATISTICS: Schema = Schema {
    name: "player_statistics",
    columns: &[
        "player_id",
        "player_name",
        "firstname",
        "lastname",
        "nationality",
        "birth_date",
        "birth_place",
        "birth_country",
        "age",
        "height",
        "weight",
        "injured",
        "photo",
        "national_team_id",
        "national_team_name",
        "season",
        "team_id",
        "team_name",
        "league_id",
        "league_name",
        "league_country",
        "position",
        "appearances",
        "lineups",
        "minutes",
        "rating",
        "captain",
        "substitutes_in",
        "substitutes_out",
        "substitutes_bench",
        "shots_total",
        "shots_on_target",
        "goals",
        "goals_conceded",
        "assists",
        "saves",
        "passes_total",
        "passes_key",
        "passes_accuracy",
        "tackles_total",
        "tackles_blocks",
        "tackles_interceptions",
        "duels_total",
        "duels_won",
        "dribbles_attempts",
        "dribbles_success",
        "dribbles_past",
        "fouls_drawn",
        "fouls_committed",
        "cards_yellow",
        "cards_yellowred",
        "cards_red",
        "penalty_won",
        "penalty_committed",
        "penalty_scored",
        "penalty_missed",
        "penalty_saved",
    ],
    key: &["player_id", "season", "team_id", "league_id"],
};

pub const FIXTURES: Schema = Schema {
    name: "fixtures",
    columns: &[
        "fixture_id",
        "date",
        "venue",
        "competition_id",
        "competition_name",
        "season",
        "round",
        "home_team_id",
        "home_team_name",
        "home_goals",
        "away_team_id",
        "away_team_name",
        "away_goals",
        "home_winner",
        "away_winner",
        "halftime_home",
        "halftime_away",
        "fulltime_home",
        "fulltime_away",
        "extratime_home",
        "extratime_away",
        "penalty_home",
        "penalty_away",
    ],
    key: &["fixture_id"],
};

/// Statistics columns and their JSON pointer inside one `statistics[]` entry.
/// Upstream spells some fields its own way ("appearences", "commited").
const STAT_FIELDS: &[(&str, &str)] = &[
    ("position", "/games/position"),
    ("appearances", "/games/appearences"),
    ("lineups", "/games/lineups"),
    ("minutes", "/games/minutes"),
    ("rating", "/games/rating"),
    ("captain", "/games/captain"),
    ("substitutes_in", "/substitutes/in"),
    ("substitutes_out", "/substitutes/out"),
    ("substitutes_bench", "/substitutes/bench"),
    ("shots_total", "/shots/total"),
    ("shots_on_target", "/shots/on"),
    ("goals", "/goals/total"),
    ("goals_conceded", "/goals/conceded"),
    ("assists", "/goals/assists"),
    ("saves", "/goals/saves"),
    ("passes_total", "/passes/total"),
    ("passes_key", "/passes/key"),
    ("passes_accuracy", "/passes/accuracy"),
    ("tackles_total", "/tackles/total"),
    ("tackles_blocks", "/tackles/blocks"),
    ("tackles_interceptions", "/tackles/interceptions"),
    ("duels_total", "/duels/total"),
    ("duels_won", "/duels/won"),
    ("dribbles_attempts", "/dribbles/attempts"),
    ("dribbles_success", "/dribbles/success"),
    ("dribbles_past", "/dribbles/past"),
    ("fouls_drawn", "/fouls/drawn"),
    ("fouls_committed", "/fouls/committed"),
    ("cards_yellow", "/cards/yellow"),
    ("cards_yellowred", "/cards/yellowred"),
    ("cards_red", "/cards/red"),
    ("penalty_won", "/penalty/won"),
    ("penalty_committed", "/penalty/commited"),
    ("penalty_scored", "/penalty/scored"),
    ("penalty_missed", "/penalty/missed"),
    ("penalty_saved", "/penalty/saved"),
];

/// Render a scalar as CSV cell text. `null` is the empty string; nested
/// values are written as compact JSON.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Scalar at `pointer`, or `null` when absent or not a scalar.
fn pick(item: &Value, pointer: &str) -> Value {
    match item.pointer(pointer) {
        Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => v.clone(),
        _ => Value::Null,
    }
}

fn put(row: &mut Row, column: &str, value: Value) {
    row.insert(column.to_string(), value);
}

/// File-system friendly form of a team or competition name.
pub fn safe_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

/// A team discovered in the team stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    pub id: u64,
    pub name: String,
    pub row: Row,
}

/// Flatten a `/teams` item. `qualification` names the competition the team
/// was found through.
pub fn team_row(item: &Value, qualification: &str, host_nations: &[String]) -> Option<Team> {
    let id = item.pointer("/team/id")?.as_u64()?;
    let name = item
        .pointer("/team/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut row = Row::new();
    put(&mut row, "team_id", Value::from(id));
    put(&mut row, "team_name", Value::from(name.clone()));
    put(&mut row, "country", pick(item, "/team/country"));
    put(&mut row, "code", pick(item, "/team/code"));
    put(&mut row, "founded", pick(item, "/team/founded"));
    put(&mut row, "national", pick(item, "/team/national"));
    put(&mut row, "logo", pick(item, "/team/logo"));
    put(&mut row, "venue_name", pick(item, "/venue/name"));
    put(&mut row, "venue_city", pick(item, "/venue/city"));
    put(&mut row, "venue_capacity", pick(item, "/venue/capacity"));
    put(&mut row, "qualification", Value::from(qualification));
    put(
        &mut row,
        "is_host",
        Value::from(host_nations.iter().any(|h| h == &name)),
    );
    Some(Team { id, name, row })
}

/// True when a `/teams` item is a national team.
pub fn is_national(item: &Value) -> bool {
    item.pointer("/team/national")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Rebuild a team from a row read back from the teams CSV.
pub fn team_from_record(record: &BTreeMap<String, String>) -> Option<Team> {
    let id = record.get("team_id")?.parse().ok()?;
    let name = record.get("team_name")?.clone();
    let row = record
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
        .collect();
    Some(Team { id, name, row })
}

/// A squad member whose statistics are fetched next.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadPlayer {
    pub id: u64,
    pub name: String,
}

/// Flatten the first item of a `/players/squads` response into one row per
/// player.
pub fn squad_rows(rows: &[Value], team: &Team) -> (Vec<Row>, Vec<SquadPlayer>) {
    let players = rows
        .first()
        .and_then(|item| item.get("players"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut out = Vec::with_capacity(players.len());
    let mut members = Vec::with_capacity(players.len());
    for p in players {
        let Some(id) = p.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let name = p
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut row = Row::new();
        put(&mut row, "player_id", Value::from(id));
        put(&mut row, "player_name", Value::from(name.clone()));
        put(&mut row, "team_id", Value::from(team.id));
        put(&mut row, "team_name", Value::from(team.name.clone()));
        put(&mut row, "age", pick(p, "/age"));
        put(&mut row, "number", pick(p, "/number"));
        put(&mut row, "position", pick(p, "/position"));
        put(&mut row, "photo", pick(p, "/photo"));
        out.push(row);
        members.push(SquadPlayer { id, name });
    }
    (out, members)
}

/// Flatten a `/players` item: one row per `statistics[]` entry.
pub fn statistics_rows(item: &Value, team: &Team) -> Vec<Row> {
    let Some(player) = item.get("player") else {
        return Vec::new();
    };
    let entries = item
        .get("statistics")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut base = Row::new();
    put(&mut base, "player_id", pick(player, "/id"));
    put(&mut base, "player_name", pick(player, "/name"));
    put(&mut base, "firstname", pick(player, "/firstname"));
    put(&mut base, "lastname", pick(player, "/lastname"));
    put(&mut base, "nationality", pick(player, "/nationality"));
    put(&mut base, "birth_date", pick(player, "/birth/date"));
    put(&mut base, "birth_place", pick(player, "/birth/place"));
    put(&mut base, "birth_country", pick(player, "/birth/country"));
    put(&mut base, "age", pick(player, "/age"));
    put(&mut base, "height", pick(player, "/height"));
    put(&mut base, "weight", pick(player, "/weight"));
    put(&mut base, "injured", pick(player, "/injured"));
    put(&mut base, "photo", pick(player, "/photo"));
    put(&mut base, "national_team_id", Value::from(team.id));
    put(&mut base, "national_team_name", Value::from(team.name.clone()));

    entries
        .iter()
        .map(|stat| {
            let mut row = base.clone();
            put(&mut row, "season", pick(stat, "/league/season"));
            put(&mut row, "team_id", pick(stat, "/team/id"));
            put(&mut row, "team_name", pick(stat, "/team/name"));
            put(&mut row, "league_id", pick(stat, "/league/id"));
            put(&mut row, "league_name", pick(stat, "/league/name"));
            put(&mut row, "league_country", pick(stat, "/league/country"));
            for (column, pointer) in STAT_FIELDS {
                put(&mut row, column, pick(stat, pointer));
            }
            row
        })
        .collect()
}

/// Flatten a `/fixtures` item when either side is one of `team_ids`.
pub fn fixture_row(item: &Value, team_ids: &HashSet<u64>) -> Option<Row> {
    let home = item.pointer("/teams/home/id").and_then(Value::as_u64);
    let away = item.pointer("/teams/away/id").and_then(Value::as_u64);
    let involved = [home, away]
        .into_iter()
        .flatten()
        .any(|id| team_ids.contains(&id));
    if !involved {
        return None;
    }

    let mut row = Row::new();
    put(&mut row, "fixture_id", pick(item, "/fixture/id"));
    put(&mut row, "date", pick(item, "/fixture/date"));
    put(&mut row, "venue", pick(item, "/fixture/venue/name"));
    put(&mut row, "competition_id", pick(item, "/league/id"));
    put(&mut row, "competition_name", pick(item, "/league/name"));
    put(&mut row, "season", pick(item, "/league/season"));
    put(&mut row, "round", pick(item, "/league/round"));
    put(&mut row, "home_team_id", pick(item, "/teams/home/id"));
    put(&mut row, "home_team_name", pick(item, "/teams/home/name"));
    put(&mut row, "home_goals", pick(item, "/goals/home"));
    put(&mut row, "away_team_id", pick(item, "/teams/away/id"));
    put(&mut row, "away_team_name", pick(item, "/teams/away/name"));
    put(&mut row, "away_goals", pick(item, "/goals/away"));
    put(&mut row, "home_winner", pick(item, "/teams/home/winner"));
    put(&mut row, "away_winner", pick(item, "/teams/away/winner"));
    for period in ["halftime", "fulltime", "extratime", "penalty"] {
        for side in ["home", "away"] {
            put(
                &mut row,
                &format!("{period}_{side}"),
                pick(item, &format!("/score/{period}/{side}")),
            );
        }
    }
    Some(row)
}
