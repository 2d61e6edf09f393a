//! Prometheus metrics
//!
//! The scraper is a batch job, so instead of serving `/metrics` it renders
//! the registry to `<output>/metrics.prom` when a command finishes. Metrics
//! emitted across the workspace:
//!
//! - `scraper_requests_total` (counter): labels `endpoint`, `status`
//! - `scraper_request_duration_seconds` (histogram): label `endpoint`
//! - `scraper_retries_total` (counter): label `endpoint`
//! - `scraper_quota_waits_total` (counter)
//! - `scraper_credentials_disabled_total` (counter)
//! - `scraper_credentials_active` (gauge)
//! - `scraper_units_total` (counter): labels `stage`, `outcome`

use std::path::Path;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

/// File name of the snapshot under the output directory.
pub const METRICS_FILE: &str = "metrics.prom";

/// Request durations include backoff and quota waits, so buckets reach
/// into minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("scraper_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Render the current registry to `path`.
pub async fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, handle.render()).await?;
    debug!(path = %path.display(), "wrote metrics snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder/handle pair; `install_recorder` may only run once
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!("scraper_request_duration_seconds", "endpoint" => "teams")
            .record(7.2);

        let output = handle.render();
        assert!(
            output.contains("scraper_request_duration_seconds_bucket"),
            "got: {output}"
        );
        assert!(output.contains("endpoint=\"teams\""), "got: {output}");
    }

    #[tokio::test]
    async fn snapshot_written_to_disk() {
        let (recorder, handle) = isolated_recorder();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(METRICS_FILE);

        {
            let _guard = metrics::set_default_local_recorder(&recorder);
            metrics::counter!("scraper_units_total", "stage" => "squads", "outcome" => "failed")
                .increment(2);
        }
        write_snapshot(&handle, &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("scraper_units_total"), "got: {text}");
        assert!(text.contains("outcome=\"failed\""), "got: {text}");
    }
}
