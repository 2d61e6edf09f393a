//! Sanity checks on scraped team data
//!
//! An empty squad means the unit failed. Thin squads, players without an
//! id and patchy statistics are saved anyway and reported as warnings.

use std::collections::HashSet;

use serde_json::Value;

use crate::records::SquadPlayer;

/// Statistics coverage below this share of the squad is reported.
const MIN_COVERAGE_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(String),
    Warning(String),
    Invalid(String),
}

impl Verdict {
    pub fn message(&self) -> &str {
        match self {
            Verdict::Valid(m) | Verdict::Warning(m) | Verdict::Invalid(m) => m,
        }
    }
}

/// Check a `/players/squads` response against the players kept from it.
pub fn squad(raw: &[Value], players: &[SquadPlayer], min_size: usize) -> Verdict {
    let listed = raw
        .first()
        .and_then(|item| item.get("players"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    if players.is_empty() {
        return Verdict::Invalid(format!("empty squad ({listed} players listed)"));
    }
    if listed > players.len() {
        return Verdict::Warning(format!(
            "{} of {listed} players have no id",
            listed - players.len()
        ));
    }
    if players.len() < min_size {
        return Verdict::Warning(format!(
            "only {} players, expected at least {min_size}",
            players.len()
        ));
    }
    Verdict::Valid(format!("{} players", players.len()))
}

/// Check statistics coverage: `covered` holds the ids of players who got at
/// least one statistics row, `rows` the number of rows fetched.
pub fn statistics(squad: &[SquadPlayer], covered: &HashSet<u64>, rows: usize) -> Verdict {
    if rows == 0 {
        return Verdict::Warning("no statistics rows".to_string());
    }
    let with_data = squad.iter().filter(|p| covered.contains(&p.id)).count();
    let coverage = with_data as f64 / squad.len().max(1) as f64 * 100.0;
    let message = format!(
        "{rows} rows, {with_data}/{} players ({coverage:.0}%)",
        squad.len()
    );
    if coverage < MIN_COVERAGE_PERCENT {
        return Verdict::Warning(format!("low coverage: {message}"));
    }
    Verdict::Valid(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn players(ids: &[u64]) -> Vec<SquadPlayer> {
        ids.iter()
            .map(|&id| SquadPlayer {
                id,
                name: format!("Player {id}"),
            })
            .collect()
    }

    fn raw(count: usize) -> Vec<Value> {
        let listed: Vec<Value> = (0..count).map(|i| json!({"id": i + 1})).collect();
        vec![json!({"team": {"id": 26}, "players": listed})]
    }

    #[test]
    fn empty_squad_is_invalid() {
        assert!(matches!(squad(&[], &[], 10), Verdict::Invalid(_)));
        assert!(matches!(squad(&raw(3), &[], 10), Verdict::Invalid(_)));
    }

    #[test]
    fn small_squad_warns() {
        let ids: Vec<u64> = (1..=4).collect();
        let verdict = squad(&raw(4), &players(&ids), 10);
        assert_eq!(
            verdict,
            Verdict::Warning("only 4 players, expected at least 10".into())
        );
        assert_eq!(squad(&raw(4), &players(&ids), 4), Verdict::Valid("4 players".into()));
    }

    #[test]
    fn players_without_id_warn() {
        let ids: Vec<u64> = (1..=23).collect();
        let verdict = squad(&raw(25), &players(&ids), 10);
        assert_eq!(verdict.message(), "2 of 25 players have no id");
    }

    #[test]
    fn statistics_without_rows_warn() {
        let verdict = statistics(&players(&[1, 2]), &HashSet::new(), 0);
        assert!(matches!(verdict, Verdict::Warning(_)));
    }

    #[test]
    fn statistics_coverage_threshold() {
        let squad = players(&[1, 2, 3, 4]);
        let half: HashSet<u64> = [1, 2].into();
        assert_eq!(
            statistics(&squad, &half, 6),
            Verdict::Valid("6 rows, 2/4 players (50%)".into())
        );

        let one: HashSet<u64> = [4, 99].into();
        let verdict = statistics(&squad, &one, 3);
        assert_eq!(verdict.message(), "low coverage: 3 rows, 1/4 players (25%)");
    }
}
