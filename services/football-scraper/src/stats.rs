//! Per-player aggregates over the saved statistics table

use std::collections::BTreeMap;

use serde::Serialize;

use crate::persistence::Record;

/// Totals of one player across every saved season and competition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerAggregate {
    pub player_id: String,
    pub player_name: String,
    pub nationality: String,
    pub appearances: u64,
    pub minutes: u64,
    pub goals: u64,
    pub assists: u64,
    pub shots_total: u64,
    pub shots_on_target: u64,
    pub passes_total: u64,
    pub passes_key: u64,
    pub tackles_total: u64,
    pub duels_won: u64,
    pub dribbles_success: u64,
    pub cards_yellow: u64,
    pub cards_red: u64,
    /// Mean of the rated entries; `None` when no entry has a rating
    pub rating: Option<f64>,
    pub first_season: Option<u32>,
    pub last_season: Option<u32>,
    /// Statistics rows folded into this aggregate
    pub entries: usize,
    pub goals_per_90: f64,
    pub assists_per_90: f64,
    pub goal_contributions_per_90: f64,
}

fn number<T: std::str::FromStr>(record: &Record, column: &str) -> Option<T> {
    record
        .get(column)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

fn per_90(value: u64, minutes: u64) -> f64 {
    if minutes == 0 {
        0.0
    } else {
        value as f64 / minutes as f64 * 90.0
    }
}

#[derive(Default)]
struct Accumulator {
    sums: BTreeMap<&'static str, u64>,
    rating_sum: f64,
    rated: usize,
    first_season: Option<u32>,
    last_season: Option<u32>,
    entries: usize,
}

const SUMMED: &[&str] = &[
    "appearances",
    "minutes",
    "goals",
    "assists",
    "shots_total",
    "shots_on_target",
    "passes_total",
    "passes_key",
    "tackles_total",
    "duels_won",
    "dribbles_success",
    "cards_yellow",
    "cards_red",
];

/// Group statistics rows by player id, name and nationality.
/// Empty cells count as zero; ratings are averaged over rated rows only.
pub fn aggregate(records: &[Record]) -> Vec<PlayerAggregate> {
    let mut groups: BTreeMap<(String, String, String), Accumulator> = BTreeMap::new();

    for record in records {
        let field = |c: &str| record.get(c).cloned().unwrap_or_default();
        let key = (field("player_id"), field("player_name"), field("nationality"));
        if key.0.is_empty() {
            continue;
        }
        let acc = groups.entry(key).or_default();
        for column in SUMMED {
            *acc.sums.entry(*column).or_default() += number::<u64>(record, column).unwrap_or(0);
        }
        if let Some(rating) = number::<f64>(record, "rating") {
            acc.rating_sum += rating;
            acc.rated += 1;
        }
        if let Some(season) = number::<u32>(record, "season") {
            acc.first_season = Some(acc.first_season.map_or(season, |s| s.min(season)));
            acc.last_season = Some(acc.last_season.map_or(season, |s| s.max(season)));
        }
        acc.entries += 1;
    }

    groups
        .into_iter()
        .map(|((player_id, player_name, nationality), acc)| {
            let sum = |c: &str| acc.sums.get(c).copied().unwrap_or(0);
            let minutes = sum("minutes");
            let goals = sum("goals");
            let assists = sum("assists");
            PlayerAggregate {
                player_id,
                player_name,
                nationality,
                appearances: sum("appearances"),
                minutes,
                goals,
                assists,
                shots_total: sum("shots_total"),
                shots_on_target: sum("shots_on_target"),
                passes_total: sum("passes_total"),
                passes_key: sum("passes_key"),
                tackles_total: sum("tackles_total"),
                duels_won: sum("duels_won"),
                dribbles_success: sum("dribbles_success"),
                cards_yellow: sum("cards_yellow"),
                cards_red: sum("cards_red"),
                rating: (acc.rated > 0).then(|| acc.rating_sum / acc.rated as f64),
                first_season: acc.first_season,
                last_season: acc.last_season,
                entries: acc.entries,
                goals_per_90: per_90(goals, minutes),
                assists_per_90: per_90(assists, minutes),
                goal_contributions_per_90: per_90(goals + assists, minutes),
            }
        })
        .collect()
}

/// Highest scorers first; ties by assists, then name.
pub fn top_by_goals(players: &[PlayerAggregate], n: usize) -> Vec<&PlayerAggregate> {
    let mut sorted: Vec<&PlayerAggregate> = players.iter().collect();
    sorted.sort_by(|a, b| {
        b.goals
            .cmp(&a.goals)
            .then(b.assists.cmp(&a.assists))
            .then_with(|| a.player_name.cmp(&b.player_name))
    });
    sorted.truncate(n);
    sorted
}

/// Best mean rating first. Unrated players are left out.
pub fn top_by_rating(players: &[PlayerAggregate], n: usize) -> Vec<&PlayerAggregate> {
    let mut rated: Vec<&PlayerAggregate> = players.iter().filter(|p| p.rating.is_some()).collect();
    rated.sort_by(|a, b| {
        let (ra, rb) = (a.rating.unwrap_or(0.0), b.rating.unwrap_or(0.0));
        rb.total_cmp(&ra)
            .then_with(|| a.player_name.cmp(&b.player_name))
    });
    rated.truncate(n);
    rated
}

/// Text report with both leaderboards.
pub fn render_report(players: &[PlayerAggregate], n: usize) -> String {
    let mut out = format!("Players: {}\n\nTop {n} by goals\n", players.len());
    for (i, p) in top_by_goals(players, n).iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. {:<28} {:<16} {:>4} goals {:>4} assists {:>6} min  {:.2}/90\n",
            i + 1,
            p.player_name,
            p.nationality,
            p.goals,
            p.assists,
            p.minutes,
            p.goals_per_90
        ));
    }
    out.push_str(&format!("\nTop {n} by rating\n"));
    for (i, p) in top_by_rating(players, n).iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. {:<28} {:<16} {:>5.2} over {} entries\n",
            i + 1,
            p.player_name,
            p.nationality,
            p.rating.unwrap_or_default(),
            p.entries
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn messi(season: &str, goals: &str, minutes: &str, rating: &str) -> Record {
        record(&[
            ("player_id", "154"),
            ("player_name", "L. Messi"),
            ("nationality", "Argentina"),
            ("season", season),
            ("goals", goals),
            ("assists", "2"),
            ("minutes", minutes),
            ("appearances", "5"),
            ("rating", rating),
        ])
    }

    #[test]
    fn sums_and_means_per_player() {
        let records = vec![
            messi("2022", "7", "600", "8.0"),
            messi("2024", "3", "300", ""),
            messi("2023", "", "0", "7.0"),
            record(&[
                ("player_id", "278"),
                ("player_name", "K. Mbappe"),
                ("nationality", "France"),
                ("season", "2022"),
                ("goals", "8"),
                ("minutes", "540"),
            ]),
        ];
        let players = aggregate(&records);
        assert_eq!(players.len(), 2);

        let messi = players.iter().find(|p| p.player_id == "154").unwrap();
        assert_eq!(messi.goals, 10);
        assert_eq!(messi.assists, 6);
        assert_eq!(messi.minutes, 900);
        assert_eq!(messi.appearances, 15);
        assert_eq!(messi.rating, Some(7.5));
        assert_eq!(messi.first_season, Some(2022));
        assert_eq!(messi.last_season, Some(2024));
        assert_eq!(messi.entries, 3);
        assert!((messi.goals_per_90 - 1.0).abs() < 1e-9);
        assert!((messi.goal_contributions_per_90 - 1.6).abs() < 1e-9);

        let mbappe = players.iter().find(|p| p.player_id == "278").unwrap();
        assert_eq!(mbappe.rating, None);
        assert_eq!(mbappe.assists, 0);
    }

    #[test]
    fn zero_minutes_gives_zero_rates() {
        let players = aggregate(&[messi("2022", "1", "0", "")]);
        assert_eq!(players[0].goals_per_90, 0.0);
    }

    #[test]
    fn rows_without_player_id_are_ignored() {
        assert!(aggregate(&[record(&[("goals", "3")])]).is_empty());
    }

    #[test]
    fn leaderboards_are_ordered_and_bounded() {
        let records = vec![
            messi("2022", "7", "600", "8.1"),
            record(&[
                ("player_id", "278"),
                ("player_name", "K. Mbappe"),
                ("nationality", "France"),
                ("goals", "8"),
                ("minutes", "540"),
                ("rating", "7.9"),
            ]),
            record(&[
                ("player_id", "1"),
                ("player_name", "Keeper"),
                ("nationality", "Wales"),
                ("goals", "0"),
            ]),
        ];
        let players = aggregate(&records);

        let goals: Vec<&str> = top_by_goals(&players, 2)
            .iter()
            .map(|p| p.player_name.as_str())
            .collect();
        assert_eq!(goals, vec!["K. Mbappe", "L. Messi"]);

        let rating: Vec<&str> = top_by_rating(&players, 10)
            .iter()
            .map(|p| p.player_name.as_str())
            .collect();
        assert_eq!(rating, vec!["L. Messi", "K. Mbappe"]);

        let report = render_report(&players, 2);
        assert!(report.contains("Top 2 by goals"));
        assert!(!report.contains("Keeper"));
    }
}
