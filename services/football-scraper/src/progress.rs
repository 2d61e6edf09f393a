//! Scrape checkpoint
//!
//! A JSON file next to the CSV output recording which teams finished and
//! which failed. Every change is persisted with an atomic temp-file +
//! rename, so an interrupted run always leaves a readable checkpoint.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// File name of the checkpoint under the output directory.
pub const PROGRESS_FILE: &str = "scrape_progress.json";

/// Errors kept in the checkpoint; older ones are dropped.
const MAX_ERRORS: usize = 200;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTeam {
    pub team_id: u64,
    pub team_name: String,
    pub squad_size: usize,
    pub stats_rows: usize,
    pub completed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTeam {
    pub team_id: u64,
    pub team_name: String,
    pub reason: String,
    pub failed_at: u64,
}

/// A player-season of statistics that failed and is retried on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStatistics {
    pub team_id: u64,
    pub player_id: u64,
    pub season: u32,
}

/// On-disk checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub run_id: String,
    pub started_at: u64,
    pub last_updated: u64,
    /// Set once every team-list request of the run has been saved.
    #[serde(default)]
    pub teams_collected: bool,
    #[serde(default)]
    pub completed_teams: Vec<CompletedTeam>,
    #[serde(default)]
    pub failed_teams: Vec<FailedTeam>,
    /// Competition-season fixture units already saved, as `league:season`.
    #[serde(default)]
    pub completed_fixtures: Vec<String>,
    /// Statistics units of completed teams still to be fetched.
    #[serde(default)]
    pub pending_statistics: Vec<PendingStatistics>,
    /// Player-seasons upstream answered with no statistics, as
    /// `player:season`. Gap filling does not ask for them again.
    #[serde(default)]
    pub empty_statistics: BTreeSet<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Progress {
    fn fresh() -> Self {
        let now = now_secs();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            last_updated: now,
            teams_collected: false,
            completed_teams: Vec::new(),
            failed_teams: Vec::new(),
            completed_fixtures: Vec::new(),
            pending_statistics: Vec::new(),
            empty_statistics: BTreeSet::new(),
            errors: Vec::new(),
        }
    }
}

/// Owns the checkpoint file for one run.
pub struct ProgressTracker {
    path: PathBuf,
    state: Progress,
}

impl ProgressTracker {
    /// Open the checkpoint at `path`. With `resume`, an existing file is
    /// continued; otherwise a new run starts and the file is overwritten on
    /// the first save.
    pub async fn open(path: PathBuf, resume: bool) -> Result<Self> {
        let state = match Self::read(&path).await? {
            Some(state) if resume => {
                info!(
                    path = %path.display(),
                    run_id = %state.run_id,
                    completed = state.completed_teams.len(),
                    failed = state.failed_teams.len(),
                    "resuming from checkpoint"
                );
                state
            }
            Some(_) => {
                info!(path = %path.display(), "ignoring existing checkpoint, starting fresh");
                Progress::fresh()
            }
            None => Progress::fresh(),
        };
        Ok(Self { path, state })
    }

    /// Read a checkpoint without taking ownership of it.
    pub async fn read(path: &Path) -> Result<Option<Progress>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| Error::Progress(format!("parsing {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Delete the checkpoint. Returns whether a file was removed.
    pub async fn reset(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "checkpoint removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn state(&self) -> &Progress {
        &self.state
    }

    pub fn is_team_completed(&self, team_id: u64) -> bool {
        self.state
            .completed_teams
            .iter()
            .any(|t| t.team_id == team_id)
    }

    pub fn is_fixture_unit_completed(&self, league: u32, season: u32) -> bool {
        let unit = format!("{league}:{season}");
        self.state.completed_fixtures.contains(&unit)
    }

    pub async fn complete_team(
        &mut self,
        team_id: u64,
        team_name: &str,
        squad_size: usize,
        stats_rows: usize,
    ) -> Result<()> {
        self.state.failed_teams.retain(|t| t.team_id != team_id);
        if !self.is_team_completed(team_id) {
            self.state.completed_teams.push(CompletedTeam {
                team_id,
                team_name: team_name.to_string(),
                squad_size,
                stats_rows,
                completed_at: now_secs(),
            });
        }
        self.save().await
    }

    /// Record a failed team. A later success replaces the entry.
    pub async fn fail_team(&mut self, team_id: u64, team_name: &str, reason: &str) -> Result<()> {
        self.state.failed_teams.retain(|t| t.team_id != team_id);
        self.state.failed_teams.push(FailedTeam {
            team_id,
            team_name: team_name.to_string(),
            reason: reason.to_string(),
            failed_at: now_secs(),
        });
        self.save().await
    }

    pub async fn complete_team_stage(&mut self) -> Result<()> {
        self.state.teams_collected = true;
        self.save().await
    }

    pub async fn complete_fixture_unit(&mut self, league: u32, season: u32) -> Result<()> {
        let unit = format!("{league}:{season}");
        if !self.state.completed_fixtures.contains(&unit) {
            self.state.completed_fixtures.push(unit);
        }
        self.save().await
    }

    /// Statistics units of `team_id` waiting for a retry.
    pub fn pending_statistics(&self, team_id: u64) -> Vec<(u64, u32)> {
        self.state
            .pending_statistics
            .iter()
            .filter(|p| p.team_id == team_id)
            .map(|p| (p.player_id, p.season))
            .collect()
    }

    /// Queue a failed statistics unit. Kept in memory until the next save.
    pub fn add_pending_statistics(&mut self, team_id: u64, player_id: u64, season: u32) {
        let unit = PendingStatistics {
            team_id,
            player_id,
            season,
        };
        if !self.state.pending_statistics.contains(&unit) {
            self.state.pending_statistics.push(unit);
        }
    }

    pub fn resolve_pending_statistics(&mut self, player_id: u64, season: u32) {
        self.state
            .pending_statistics
            .retain(|p| p.player_id != player_id || p.season != season);
    }

    pub fn note_empty_statistics(&mut self, player_id: u64, season: u32) {
        self.state
            .empty_statistics
            .insert(format!("{player_id}:{season}"));
    }

    pub fn is_empty_statistics(&self, player_id: u64, season: u32) -> bool {
        self.state
            .empty_statistics
            .contains(&format!("{player_id}:{season}"))
    }

    /// Remember a skipped unit. Kept in memory until the next save.
    pub fn record_error(&mut self, message: String) {
        if self.state.errors.len() >= MAX_ERRORS {
            self.state.errors.remove(0);
        }
        self.state.errors.push(message);
    }

    pub async fn save(&mut self) -> Result<()> {
        self.state.last_updated = now_secs();
        write_atomic(&self.path, &self.state).await
    }
}

/// Write the checkpoint atomically: temp file in the same directory, then
/// rename over the target.
async fn write_atomic(path: &Path, progress: &Progress) -> Result<()> {
    let json = serde_json::to_string_pretty(progress)
        .map_err(|e| Error::Progress(format!("serializing checkpoint: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(dir).await?;

    let tmp_path = dir.join(format!(".{PROGRESS_FILE}.tmp.{}", std::process::id()));
    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!(error = %e, "checkpoint rename failed");
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Io(e));
    }

    debug!(path = %path.display(), "persisted checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_tracker_has_no_file_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);

        let mut tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
        assert!(!path.exists());
        assert!(!tracker.state().run_id.is_empty());

        tracker.save().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn completed_teams_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);

        let run_id = {
            let mut tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
            tracker.fail_team(26, "Argentina", "HTTP 500").await.unwrap();
            tracker.complete_team(2, "France", 26, 80).await.unwrap();
            tracker.complete_team(26, "Argentina", 25, 70).await.unwrap();
            tracker.complete_fixture_unit(1, 2022).await.unwrap();
            tracker.complete_team_stage().await.unwrap();
            tracker.state().run_id.clone()
        };

        let tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
        assert_eq!(tracker.state().run_id, run_id);
        assert!(tracker.state().teams_collected);
        assert!(tracker.is_team_completed(26));
        assert!(tracker.is_team_completed(2));
        assert!(!tracker.is_team_completed(3));
        // The later success cleared the failure.
        assert!(tracker.state().failed_teams.is_empty());
        assert!(tracker.is_fixture_unit_completed(1, 2022));
        assert!(!tracker.is_fixture_unit_completed(1, 2023));
    }

    #[tokio::test]
    async fn fresh_open_ignores_existing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        {
            let mut tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
            tracker.complete_team(26, "Argentina", 25, 70).await.unwrap();
        }

        let tracker = ProgressTracker::open(path.clone(), false).await.unwrap();
        assert!(!tracker.is_team_completed(26));
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        let mut tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
        tracker.record_error("players?id=1&season=2022: HTTP 404".into());
        tracker.save().await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(PROGRESS_FILE)]);

        let saved = ProgressTracker::read(&path).await.unwrap().unwrap();
        assert_eq!(saved.errors.len(), 1);
    }

    #[tokio::test]
    async fn pending_statistics_survive_reload_until_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        {
            let mut tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
            tracker.add_pending_statistics(26, 154, 2022);
            tracker.add_pending_statistics(26, 154, 2022);
            tracker.add_pending_statistics(26, 6009, 2023);
            tracker.note_empty_statistics(6009, 2022);
            tracker.complete_team(26, "Argentina", 25, 70).await.unwrap();
        }

        let mut tracker = ProgressTracker::open(path, true).await.unwrap();
        assert_eq!(
            tracker.pending_statistics(26),
            vec![(154, 2022), (6009, 2023)]
        );
        assert!(tracker.pending_statistics(2).is_empty());
        assert!(tracker.is_empty_statistics(6009, 2022));
        assert!(!tracker.is_empty_statistics(6009, 2023));

        tracker.resolve_pending_statistics(154, 2022);
        assert_eq!(tracker.pending_statistics(26), vec![(6009, 2023)]);
    }

    #[tokio::test]
    async fn errors_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::open(dir.path().join(PROGRESS_FILE), true)
            .await
            .unwrap();
        for i in 0..(MAX_ERRORS + 5) {
            tracker.record_error(format!("error {i}"));
        }
        assert_eq!(tracker.state().errors.len(), MAX_ERRORS);
        assert_eq!(tracker.state().errors[0], "error 5");
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        std::fs::write(&path, "{not json").unwrap();
        let err = ProgressTracker::open(path, true).await.err().unwrap();
        assert!(matches!(err, Error::Progress(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn reset_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        let mut tracker = ProgressTracker::open(path.clone(), true).await.unwrap();
        tracker.save().await.unwrap();

        assert!(ProgressTracker::reset(&path).await.unwrap());
        assert!(!path.exists());
        assert!(!ProgressTracker::reset(&path).await.unwrap());
    }
}
