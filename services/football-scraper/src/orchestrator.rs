//! Fetch orchestrator
//!
//! Drives the pipeline teams → squads → player statistics → fixtures one
//! request at a time. Every finished unit of work goes straight to the
//! sink, and team-level progress goes to the checkpoint, so an interrupted
//! or crashed run can resume where it stopped.
//!
//! Failed units are logged and skipped. Failed statistics units are queued
//! in the checkpoint and retried when the run resumes. Only conditions that
//! make further requests pointless (no usable key, quota wait over budget)
//! end the run with an error; cancellation ends it with an `interrupted`
//! summary. A run also pauses itself when upstream reports the daily quota
//! nearly spent, or when too many units fail in a row.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use api_client::{ApiClient, FetchRequest, FetchResult};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Competition, ScrapeConfig};
use crate::error::Result;
use crate::persistence::RowSink;
use crate::progress::ProgressTracker;
use crate::records::{
    self, FIXTURES, PLAYER_STATISTICS, Row, SQUADS, SquadPlayer, TEAMS, Team, safe_name,
};
use crate::validate::{self, Verdict};

pub const TEAMS_FILE: &str = "teams/world_cup_2026_teams.csv";
pub const ALL_SQUADS_FILE: &str = "players/all_squads.csv";
pub const ALL_STATISTICS_FILE: &str = "statistics/all_player_statistics.csv";

/// Qualification label of teams found through the World Cup league itself.
const WORLD_CUP_LABEL: &str = "World Cup";

pub fn squad_file(team: &str) -> PathBuf {
    PathBuf::from(format!("players/{}_squad.csv", safe_name(team)))
}

pub fn statistics_file(team: &str) -> PathBuf {
    PathBuf::from(format!("statistics/{}_player_statistics.csv", safe_name(team)))
}

pub fn fixtures_file(competition: &str) -> PathBuf {
    PathBuf::from(format!("statistics/{}_fixtures.csv", safe_name(competition)))
}

/// What a run fetches.
#[derive(Debug, Clone)]
pub struct ScrapePlan {
    pub world_cup_league: u32,
    pub reference_season: u32,
    pub qualification_season: u32,
    pub qualifications: Vec<Competition>,
    pub seasons: Vec<u32>,
    pub competitions: Vec<Competition>,
    pub host_nations: Vec<String>,
    /// Process only the first N teams of the list
    pub max_teams: Option<usize>,
    /// Skip work recorded as done in the checkpoint and on disk
    pub resume: bool,
    pub quota_check_every: usize,
    pub min_upstream_remaining: u64,
    pub max_consecutive_failures: usize,
    pub min_squad_size: usize,
}

impl ScrapePlan {
    pub fn from_config(scrape: &ScrapeConfig) -> Self {
        Self {
            world_cup_league: scrape.world_cup_league,
            reference_season: scrape.reference_season,
            qualification_season: scrape.qualification_season,
            qualifications: scrape.qualifications.clone(),
            seasons: scrape.seasons.clone(),
            competitions: scrape.competitions.clone(),
            host_nations: scrape.host_nations.clone(),
            max_teams: None,
            resume: true,
            quota_check_every: scrape.quota_check_every,
            min_upstream_remaining: scrape.min_upstream_remaining,
            max_consecutive_failures: scrape.max_consecutive_failures,
            min_squad_size: scrape.min_squad_size,
        }
    }
}

/// Pipeline stage, for counting and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Teams,
    Squads,
    Statistics,
    Fixtures,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Teams => "teams",
            Stage::Squads => "squads",
            Stage::Statistics => "statistics",
            Stage::Fixtures => "fixtures",
        }
    }
}

/// Unit counts of one stage.
///
/// `skipped` counts units not fetched because an earlier run finished them;
/// `failed` counts units fetched without success and logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Why a run stopped before finishing, without being interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Pause {
    /// Enabled keys have this many requests left upstream
    QuotaLow { remaining: u64 },
    ConsecutiveFailures { count: usize },
}

impl Pause {
    pub fn describe(&self) -> String {
        match self {
            Pause::QuotaLow { remaining } => {
                format!("upstream quota low ({remaining} requests left)")
            }
            Pause::ConsecutiveFailures { count } => format!("{count} consecutive failures"),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub teams: StageCounts,
    pub squads: StageCounts,
    pub statistics: StageCounts,
    pub fixtures: StageCounts,
    /// Upstream attempts, retries included
    pub total_requests: u64,
    pub rows_written: usize,
    /// Saved squads and statistics that failed a sanity check
    pub warnings: usize,
    pub interrupted: bool,
    pub paused: Option<Pause>,
}

impl RunSummary {
    fn stage_mut(&mut self, stage: Stage) -> &mut StageCounts {
        match stage {
            Stage::Teams => &mut self.teams,
            Stage::Squads => &mut self.squads,
            Stage::Statistics => &mut self.statistics,
            Stage::Fixtures => &mut self.fixtures,
        }
    }

    pub fn failed_units(&self) -> usize {
        self.teams.failed + self.squads.failed + self.statistics.failed + self.fixtures.failed
    }
}

/// Rows fetched for one team's statistics and the players they cover.
struct StatisticsOutcome {
    rows: usize,
    covered: HashSet<u64>,
}

/// Runs the pipeline against a borrowed client and sink.
pub struct Orchestrator<'a> {
    client: &'a mut ApiClient,
    sink: &'a mut dyn RowSink,
    progress: Option<&'a mut ProgressTracker>,
    plan: ScrapePlan,
    summary: RunSummary,
    requests_at_start: u64,
    consecutive_failures: usize,
    /// Teams whose squad this run fetched or tried to
    teams_started: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a mut ApiClient, sink: &'a mut dyn RowSink, plan: ScrapePlan) -> Self {
        let requests_at_start = client.total_requests();
        Self {
            client,
            sink,
            progress: None,
            plan,
            summary: RunSummary::default(),
            requests_at_start,
            consecutive_failures: 0,
            teams_started: 0,
        }
    }

    /// Record team progress in `tracker` and honor it when resuming.
    pub fn with_progress(mut self, tracker: &'a mut ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = self.summary.clone();
        summary.total_requests = self.client.total_requests() - self.requests_at_start;
        summary
    }

    /// Full pipeline: teams, then every team's squad and statistics, then
    /// fixtures of the scraped teams.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_pipeline().await;
        self.finish(result).await.map(|_| ())
    }

    /// Team stage only. Returns the (untruncated) team list.
    pub async fn run_teams(&mut self) -> Result<Vec<Team>> {
        let result = self.collect_teams().await;
        Ok(self.finish(result).await?.unwrap_or_default())
    }

    /// Squad and statistics of the first team whose name contains `name`,
    /// case-insensitively. Returns the team, or `None` when nothing matched.
    pub async fn run_team(&mut self, name: &str) -> Result<Option<Team>> {
        let result = self.scrape_named_team(name).await;
        Ok(self.finish(result).await?.flatten())
    }

    /// Fill statistics gaps of saved teams: every squad player and season
    /// with no saved row is fetched, unless upstream already answered that
    /// unit with nothing.
    pub async fn repair(&mut self) -> Result<()> {
        let result = self.repair_statistics().await;
        self.finish(result).await.map(|_| ())
    }

    /// Settle the outcome, then write whatever the checkpoint holds in
    /// memory.
    async fn finish<T>(&mut self, result: Result<Option<T>>) -> Result<Option<T>> {
        let settled = self.settle(result);
        if let Some(progress) = self.progress.as_deref_mut() {
            if let Err(e) = progress.save().await {
                warn!(error = %e, "could not save progress");
            }
        }
        settled
    }

    /// Turn cancellation into an interrupted summary; pass other errors on.
    /// `Ok(None)` means the work stopped early.
    fn settle<T>(&mut self, result: Result<Option<T>>) -> Result<Option<T>> {
        match result {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                if let Some(pause) = self.summary.paused {
                    warn!(reason = %pause.describe(), "run paused, finished units are saved");
                } else {
                    self.summary.interrupted = true;
                }
                Ok(None)
            }
            Err(e) if e.is_cancelled() => {
                info!("run interrupted, finished units are saved");
                self.summary.interrupted = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn should_stop(&self) -> bool {
        self.summary.paused.is_some() || self.client.cancel_signal().is_cancelled()
    }

    async fn run_pipeline(&mut self) -> Result<Option<()>> {
        let Some(mut teams) = self.collect_teams().await? else {
            return Ok(None);
        };
        if let Some(max) = self.plan.max_teams {
            teams.truncate(max);
        }
        info!(teams = teams.len(), "scraping squads and statistics");

        for team in &teams {
            if self.scrape_team(team).await?.is_none() {
                return Ok(None);
            }
        }

        let ids: HashSet<u64> = teams.iter().map(|t| t.id).collect();
        self.scrape_fixtures(&ids).await
    }

    async fn scrape_named_team(&mut self, name: &str) -> Result<Option<Option<Team>>> {
        let Some(teams) = self.collect_teams().await? else {
            return Ok(None);
        };
        let Some(team) = find_team(&teams, name).cloned() else {
            warn!(query = name, "no team matches");
            return Ok(Some(None));
        };
        Ok(self.scrape_team(&team).await?.map(|_| Some(team)))
    }

    /// Fetch one request. `Ok(None)` means the unit failed and was logged.
    /// A successful result is not counted until the caller accepts it.
    async fn fetch(&mut self, stage: Stage, request: &FetchRequest) -> Result<Option<FetchResult>> {
        let result = self.client.call(request).await?;
        if result.is_success() {
            return Ok(Some(result));
        }

        let detail = result.detail.as_deref().unwrap_or("");
        warn!(
            stage = stage.label(),
            request = %request,
            credential_id = result.credential_id.as_deref().unwrap_or("-"),
            attempts = result.retry_count + 1,
            status = result.status.label(),
            detail,
            "unit failed, skipping"
        );
        if let Some(progress) = self.progress.as_deref_mut() {
            progress.record_error(format!("{request}: {} {detail}", result.status.label()));
        }
        self.record_outcome(stage, false);
        Ok(None)
    }

    /// Count a finished unit. Failures in a row beyond the configured limit
    /// pause the run.
    fn record_outcome(&mut self, stage: Stage, succeeded: bool) {
        let outcome = if succeeded { "succeeded" } else { "failed" };
        metrics::counter!("scraper_units_total", "stage" => stage.label(), "outcome" => outcome)
            .increment(1);

        let counts = self.summary.stage_mut(stage);
        if succeeded {
            counts.succeeded += 1;
            self.consecutive_failures = 0;
            return;
        }
        counts.failed += 1;
        self.consecutive_failures += 1;

        let limit = self.plan.max_consecutive_failures;
        if limit > 0 && self.consecutive_failures >= limit && self.summary.paused.is_none() {
            warn!(
                failures = self.consecutive_failures,
                "too many consecutive failures, pausing run"
            );
            self.summary.paused = Some(Pause::ConsecutiveFailures {
                count: self.consecutive_failures,
            });
        }
    }

    fn warn_verdict(&mut self, team: &Team, what: &str, verdict: &Verdict) {
        match verdict {
            Verdict::Valid(message) => debug!(team = %team.name, what, %message, "validated"),
            Verdict::Warning(message) | Verdict::Invalid(message) => {
                warn!(team = %team.name, what, %message, "validation warning");
                self.summary.warnings += 1;
            }
        }
    }

    fn append(&mut self, path: &Path, schema: &records::Schema, rows: &[Row]) -> Result<usize> {
        let written = self.sink.append(path, schema, rows)?;
        self.summary.rows_written += written;
        Ok(written)
    }

    fn skip(&mut self, stage: Stage) {
        self.summary.stage_mut(stage).skipped += 1;
        metrics::counter!("scraper_units_total", "stage" => stage.label(), "outcome" => "skipped")
            .increment(1);
    }

    /// Team list from the saved table when resuming a finished team stage,
    /// otherwise from upstream. The stage counts as finished only when
    /// every source answered.
    async fn collect_teams(&mut self) -> Result<Option<Vec<Team>>> {
        let saved = if self.plan.resume {
            self.saved_team_list()?
        } else {
            Vec::new()
        };
        let stage_done = self
            .progress
            .as_deref()
            .is_some_and(|p| p.state().teams_collected);
        if self.plan.resume && stage_done && !saved.is_empty() {
            info!(teams = saved.len(), "reusing saved team list");
            self.skip(Stage::Teams);
            return Ok(Some(saved));
        }

        // Teams saved by an earlier partial run stay in the list even if
        // their source fails again.
        let mut teams = saved;
        let mut sources = vec![(
            FetchRequest::teams(self.plan.world_cup_league, self.plan.reference_season),
            WORLD_CUP_LABEL.to_string(),
            false,
        )];
        for q in &self.plan.qualifications {
            sources.push((
                FetchRequest::teams(q.id, self.plan.qualification_season),
                q.name.clone(),
                true,
            ));
        }

        let mut complete = true;
        for (request, label, national_only) in sources {
            if self.should_stop() {
                return Ok(None);
            }
            let Some(result) = self.fetch(Stage::Teams, &request).await? else {
                complete = false;
                continue;
            };
            self.record_outcome(Stage::Teams, true);

            let mut found = Vec::new();
            for item in result.rows() {
                if national_only && !records::is_national(item) {
                    continue;
                }
                let Some(team) = records::team_row(item, &label, &self.plan.host_nations) else {
                    continue;
                };
                if teams.iter().chain(found.iter()).any(|t: &Team| t.id == team.id) {
                    continue;
                }
                found.push(team);
            }

            let rows: Vec<Row> = found.iter().map(|t| t.row.clone()).collect();
            self.append(Path::new(TEAMS_FILE), &TEAMS, &rows)?;
            info!(source = %label, new_teams = found.len(), "collected teams");
            teams.extend(found);
        }

        if !complete {
            warn!("some team lists failed, the team stage runs again on resume");
        } else if let Some(progress) = self.progress.as_deref_mut() {
            progress.complete_team_stage().await?;
        }
        info!(teams = teams.len(), "team stage finished");
        Ok(Some(teams))
    }

    fn saved_team_list(&self) -> Result<Vec<Team>> {
        Ok(self
            .sink
            .read(Path::new(TEAMS_FILE))?
            .iter()
            .filter_map(records::team_from_record)
            .collect())
    }

    fn team_completed(&self, team_id: u64) -> bool {
        self.progress
            .as_deref()
            .is_some_and(|p| p.is_team_completed(team_id))
    }

    /// Squad then statistics of one team. `Ok(None)` means the run stopped.
    async fn scrape_team(&mut self, team: &Team) -> Result<Option<()>> {
        if self.plan.resume && self.team_completed(team.id) {
            info!(team = %team.name, "already completed, skipping");
            self.skip(Stage::Squads);
            return self.retry_pending_statistics(team).await;
        }
        if self.should_stop() || !self.check_quota().await? {
            return Ok(None);
        }

        let request = FetchRequest::squad(team.id);
        let Some(result) = self.fetch(Stage::Squads, &request).await? else {
            let reason = format!("squad request failed: {request}");
            if let Some(progress) = self.progress.as_deref_mut() {
                progress.fail_team(team.id, &team.name, &reason).await?;
            }
            return Ok(Some(()));
        };

        let (rows, players) = records::squad_rows(result.rows(), team);
        let verdict = validate::squad(result.rows(), &players, self.plan.min_squad_size);
        if let Verdict::Invalid(reason) = &verdict {
            warn!(team = %team.name, %reason, "squad rejected");
            self.record_outcome(Stage::Squads, false);
            if let Some(progress) = self.progress.as_deref_mut() {
                progress.record_error(format!("{request}: {reason}"));
                progress.fail_team(team.id, &team.name, reason).await?;
            }
            return Ok(Some(()));
        }
        self.record_outcome(Stage::Squads, true);
        self.warn_verdict(team, "squad", &verdict);

        self.append(&squad_file(&team.name), &SQUADS, &rows)?;
        self.append(Path::new(ALL_SQUADS_FILE), &SQUADS, &rows)?;
        info!(team = %team.name, players = players.len(), "saved squad");

        let Some(outcome) = self.scrape_statistics(team, &players).await? else {
            return Ok(None);
        };
        let verdict = validate::statistics(&players, &outcome.covered, outcome.rows);
        self.warn_verdict(team, "statistics", &verdict);

        if let Some(progress) = self.progress.as_deref_mut() {
            progress
                .complete_team(team.id, &team.name, players.len(), outcome.rows)
                .await?;
        }
        info!(team = %team.name, stats_rows = outcome.rows, "team completed");
        Ok(Some(()))
    }

    /// Statistics of every squad player for every season. `None` means the
    /// run stopped.
    async fn scrape_statistics(
        &mut self,
        team: &Team,
        players: &[SquadPlayer],
    ) -> Result<Option<StatisticsOutcome>> {
        let seasons = self.plan.seasons.clone();
        let mut outcome = StatisticsOutcome {
            rows: 0,
            covered: HashSet::new(),
        };

        for player in players {
            for &season in &seasons {
                if self.should_stop() {
                    return Ok(None);
                }
                if let Some(rows) = self.statistics_unit(team, player.id, season).await? {
                    outcome.rows += rows;
                    if rows > 0 {
                        outcome.covered.insert(player.id);
                    }
                }
            }
        }
        Ok(Some(outcome))
    }

    /// One player-season of statistics. Returns the rows fetched, or `None`
    /// when the unit failed and was queued for a retry.
    async fn statistics_unit(
        &mut self,
        team: &Team,
        player_id: u64,
        season: u32,
    ) -> Result<Option<usize>> {
        let request = FetchRequest::player_statistics(player_id, season);
        let Some(result) = self.fetch(Stage::Statistics, &request).await? else {
            if let Some(progress) = self.progress.as_deref_mut() {
                progress.add_pending_statistics(team.id, player_id, season);
            }
            return Ok(None);
        };
        self.record_outcome(Stage::Statistics, true);

        let rows: Vec<Row> = result
            .rows()
            .iter()
            .flat_map(|item| records::statistics_rows(item, team))
            .collect();
        self.append(&statistics_file(&team.name), &PLAYER_STATISTICS, &rows)?;
        self.append(Path::new(ALL_STATISTICS_FILE), &PLAYER_STATISTICS, &rows)?;

        if let Some(progress) = self.progress.as_deref_mut() {
            progress.resolve_pending_statistics(player_id, season);
            if rows.is_empty() {
                progress.note_empty_statistics(player_id, season);
            }
        }
        Ok(Some(rows.len()))
    }

    /// Statistics units of a completed team that failed in an earlier run.
    async fn retry_pending_statistics(&mut self, team: &Team) -> Result<Option<()>> {
        let pending = self
            .progress
            .as_deref()
            .map(|p| p.pending_statistics(team.id))
            .unwrap_or_default();
        if pending.is_empty() {
            return Ok(Some(()));
        }
        info!(team = %team.name, units = pending.len(), "retrying failed statistics");

        for (player_id, season) in pending {
            if self.should_stop() {
                return Ok(None);
            }
            self.statistics_unit(team, player_id, season).await?;
        }
        if let Some(progress) = self.progress.as_deref_mut() {
            progress.save().await?;
        }
        Ok(Some(()))
    }

    /// Every `quota_check_every` teams, ask upstream how many requests the
    /// enabled keys have left and pause at or below the reserve. Returns
    /// false when the run paused.
    async fn check_quota(&mut self) -> Result<bool> {
        let every = self.plan.quota_check_every;
        let due = every > 0 && self.teams_started % every == 0;
        self.teams_started += 1;
        if !due {
            return Ok(true);
        }

        let Some(remaining) = self.upstream_remaining().await? else {
            warn!("no key reported its upstream quota, continuing");
            return Ok(true);
        };
        let reserve = self.plan.min_upstream_remaining;
        if remaining <= reserve {
            warn!(remaining, reserve, "upstream quota low, pausing run");
            self.summary.paused = Some(Pause::QuotaLow { remaining });
            return Ok(false);
        }
        info!(remaining, "upstream quota checked");
        Ok(true)
    }

    /// Requests left today summed over enabled keys, or `None` when no key
    /// answered.
    async fn upstream_remaining(&self) -> Result<Option<u64>> {
        let pool = self.client.pool();
        let ids: Vec<String> = pool
            .ids()
            .into_iter()
            .filter(|id| pool.credential(id).is_some_and(|c| c.enabled))
            .collect();

        let mut total = None;
        for id in ids {
            let result = self.client.account_status(&id).await?;
            let left = if result.is_success() {
                remaining_requests(result.payload.as_ref())
            } else {
                None
            };
            match left {
                Some(left) => *total.get_or_insert(0) += left,
                None => debug!(credential_id = %id, "account status unavailable"),
            }
        }
        Ok(total)
    }

    async fn repair_statistics(&mut self) -> Result<Option<()>> {
        let mut teams = self.saved_team_list()?;
        if teams.is_empty() {
            warn!("no saved team list, nothing to repair");
            return Ok(Some(()));
        }
        if let Some(max) = self.plan.max_teams {
            teams.truncate(max);
        }

        for team in &teams {
            let missing = self.missing_statistics(team)?;
            if missing.is_empty() {
                debug!(team = %team.name, "statistics complete");
                continue;
            }
            if self.should_stop() || !self.check_quota().await? {
                return Ok(None);
            }
            info!(team = %team.name, units = missing.len(), "filling statistics gaps");

            for (player_id, season) in missing {
                if self.should_stop() {
                    return Ok(None);
                }
                self.statistics_unit(team, player_id, season).await?;
            }
            if let Some(progress) = self.progress.as_deref_mut() {
                progress.save().await?;
            }
        }
        Ok(Some(()))
    }

    /// Player-seasons of a saved squad with no saved statistics row.
    fn missing_statistics(&self, team: &Team) -> Result<Vec<(u64, u32)>> {
        let squad: Vec<u64> = self
            .sink
            .read(&squad_file(&team.name))?
            .iter()
            .filter_map(|r| r.get("player_id")?.parse().ok())
            .collect();
        let saved: HashSet<(u64, u32)> = self
            .sink
            .read(&statistics_file(&team.name))?
            .iter()
            .filter_map(|r| {
                let player = r.get("player_id")?.parse().ok()?;
                let season = r.get("season")?.parse().ok()?;
                Some((player, season))
            })
            .collect();
        let known_empty = |player: u64, season: u32| {
            self.progress
                .as_deref()
                .is_some_and(|p| p.is_empty_statistics(player, season))
        };

        let mut missing = Vec::new();
        for &player in &squad {
            for &season in &self.plan.seasons {
                if !saved.contains(&(player, season)) && !known_empty(player, season) {
                    missing.push((player, season));
                }
            }
        }
        Ok(missing)
    }

    /// Fixtures of every competition and season involving `team_ids`.
    async fn scrape_fixtures(&mut self, team_ids: &HashSet<u64>) -> Result<Option<()>> {
        let competitions = self.plan.competitions.clone();
        let seasons = self.plan.seasons.clone();

        for competition in &competitions {
            let file = fixtures_file(&competition.name);
            for &season in &seasons {
                let done = self.plan.resume
                    && self
                        .progress
                        .as_deref()
                        .is_some_and(|p| p.is_fixture_unit_completed(competition.id, season));
                if done {
                    self.skip(Stage::Fixtures);
                    continue;
                }
                if self.should_stop() {
                    return Ok(None);
                }

                let request = FetchRequest::fixtures(competition.id, season);
                let Some(result) = self.fetch(Stage::Fixtures, &request).await? else {
                    continue;
                };
                self.record_outcome(Stage::Fixtures, true);
                let rows: Vec<Row> = result
                    .rows()
                    .iter()
                    .filter_map(|item| records::fixture_row(item, team_ids))
                    .collect();
                let written = self.append(&file, &FIXTURES, &rows)?;
                if let Some(progress) = self.progress.as_deref_mut() {
                    progress
                        .complete_fixture_unit(competition.id, season)
                        .await?;
                }
                info!(
                    competition = %competition.name,
                    season,
                    fixtures = written,
                    "saved fixtures"
                );
            }
        }
        Ok(Some(()))
    }
}

/// `limit_day - current` from an account status envelope.
fn remaining_requests(payload: Option<&Value>) -> Option<u64> {
    let requests = payload?.pointer("/response/requests")?;
    let current = requests.get("current")?.as_u64()?;
    let limit = requests.get("limit_day")?.as_u64()?;
    Some(limit.saturating_sub(current))
}

/// First team whose name contains `query`, ignoring case.
pub fn find_team<'t>(teams: &'t [Team], query: &str) -> Option<&'t Team> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return None;
    }
    teams
        .iter()
        .find(|t| t.name.to_lowercase() == query)
        .or_else(|| teams.iter().find(|t| t.name.to_lowercase().contains(&query)))
}

/// Human-readable summary lines.
pub fn render_summary(summary: &RunSummary) -> String {
    let line = |stage: &str, c: &StageCounts| {
        format!(
            "  {stage:<11} {:>5} succeeded {:>5} skipped {:>5} failed\n",
            c.succeeded, c.skipped, c.failed
        )
    };
    let mut out = String::from("Run summary\n");
    out.push_str(&line("teams", &summary.teams));
    out.push_str(&line("squads", &summary.squads));
    out.push_str(&line("statistics", &summary.statistics));
    out.push_str(&line("fixtures", &summary.fixtures));
    out.push_str(&format!("  requests    {:>5}\n", summary.total_requests));
    out.push_str(&format!("  rows        {:>5}\n", summary.rows_written));
    if summary.warnings > 0 {
        out.push_str(&format!("  warnings    {:>5}\n", summary.warnings));
    }
    if summary.interrupted {
        out.push_str("  interrupted: re-run to resume\n");
    }
    if let Some(pause) = &summary.paused {
        out.push_str(&format!("  paused: {}, re-run to resume\n", pause.describe()));
    }
    out
}
