use crate::config::RunConfig;
use crate::detector::{Classification, RunState, StallQuotaDetector, Thresholds};
use crate::engine::process::{self, EngineProcess};
use crate::engine::EngineCommand;
use crate::error::{Error, Result};
use crate::identity::{IdentityPool, Route};
use crate::poller::StatsSource;
use crate::rotator::{self, RotationAction};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Launching(usize),
    Monitoring(usize),
    Rotating { from: usize, to: usize },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The finished streak hit its threshold: nothing left to copy anywhere.
    AllDone,
    /// Every identity in the configured range was consumed.
    RangeExhausted,
    /// Interrupt signal received; the engine was torn down best-effort.
    Interrupted,
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub identities_launched: usize,
    pub identities_exhausted: usize,
    pub bytes_copied: u64,
    pub elapsed: Duration,
}

/// Drives the whole run: one engine process per identity, polled on a fixed
/// cadence, rotated or stopped on the detector's verdict.
pub struct Supervisor<C: StatsSource> {
    config: RunConfig,
    pool: IdentityPool,
    client: C,
    detector: StallQuotaDetector,
    multi: Option<Arc<MultiProgress>>,
}

impl<C: StatsSource> Supervisor<C> {
    pub fn new(
        config: RunConfig,
        pool: IdentityPool,
        client: C,
        multi: Option<Arc<MultiProgress>>,
    ) -> Self {
        let detector = StallQuotaDetector::new(Thresholds::from(&config));
        Self {
            config,
            pool,
            client,
            detector,
            multi,
        }
    }

    pub async fn run(mut self) -> Result<RunSummary> {
        process::preflight(&self.config.engine_binary).await?;

        let begin = self.config.begin_index;
        let end = self.pool.clamp_end(self.config.end_index);
        if begin > end {
            return Err(Error::Config(format!(
                "begin_index {begin} is past the last available identity {end}"
            )));
        }

        let started = Instant::now();
        let mut state = RunState::new(begin);
        log::info!(
            "Start: {} ({} identities in range)",
            state.job_started_at.format("%H:%M:%S"),
            end - begin + 1
        );

        let mut machine = SupervisorState::Launching(begin);
        let mut engine: Option<EngineProcess> = None;
        let mut bar: Option<ProgressBar> = None;
        let mut launched = 0usize;
        let mut bytes_copied = 0u64;
        let mut outcome = RunOutcome::RangeExhausted;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            match machine {
                SupervisorState::Launching(index) => {
                    let (route, dst_profile) = {
                        let identity = self.pool.get(index).ok_or_else(|| {
                            Error::Config(format!("no identity with ordinal {index}"))
                        })?;
                        (
                            Route::for_identity(&self.config, identity),
                            identity.dst_profile(),
                        )
                    };

                    persist_current_identity(&self.config.state_file, index)?;

                    if self.config.check_paths && index == begin {
                        self.check_route(&route).await?;
                    }

                    let command = EngineCommand::copy(&self.config, &route);
                    log::debug!(
                        "engine invocation: {} {}",
                        command.binary,
                        command.args().join(" ")
                    );
                    let engine_process = EngineProcess::start(&command)?;
                    launched += 1;
                    state.begin_identity(index);
                    engine = Some(engine_process);
                    log::info!(
                        ">> identity {index} ({dst_profile}) under way: {} -> {}",
                        route.source,
                        route.dest
                    );

                    // give the rc server a moment before the first poll
                    tokio::select! {
                        _ = &mut ctrl_c => {
                            log::info!("interrupt received; terminating engine and stopping");
                            if let Some(mut process) = engine.take() {
                                rotator::terminate_quietly(&mut process).await;
                            }
                            bytes_copied += state.last_bytes;
                            outcome = RunOutcome::Interrupted;
                            machine = SupervisorState::Finished;
                            continue;
                        }
                        _ = sleep(self.config.startup_grace()) => {}
                    }

                    // bind a pid for operator visibility; the child handle is
                    // what termination actually uses
                    match self.client.pid().await {
                        Ok(pid) => {
                            if let Some(process) = engine.as_mut() {
                                process.bind_engine_pid(pid);
                            }
                        }
                        Err(e) => log::debug!("engine pid not resolvable yet: {e}"),
                    }

                    if let Some(multi) = &self.multi {
                        let pb = multi.add(ProgressBar::new(
                            self.config.max_gb_per_identity * 1_000_000_000,
                        ));
                        pb.set_style(progress_style()?);
                        pb.set_prefix(dst_profile);
                        bar = Some(pb);
                    }

                    machine = SupervisorState::Monitoring(index);
                }

                SupervisorState::Monitoring(index) => {
                    let poll = self.client.stats().await;

                    if let (Some(pb), Ok(snapshot)) = (bar.as_ref(), poll.as_ref()) {
                        pb.set_position(snapshot.bytes_transferred);
                        pb.set_message(format!(
                            "{:.2} MB/s | checks: {}",
                            snapshot.rate_mb_per_sec(),
                            snapshot.files_checked
                        ));
                    }

                    let classification = self.detector.classify(&mut state, &poll);
                    match rotator::act(classification) {
                        RotationAction::KeepPolling => {
                            tokio::select! {
                                _ = &mut ctrl_c => {
                                    log::info!("interrupt received; terminating engine and stopping");
                                    if let Some(mut process) = engine.take() {
                                        rotator::terminate_quietly(&mut process).await;
                                    }
                                    bytes_copied += state.last_bytes;
                                    outcome = RunOutcome::Interrupted;
                                    machine = SupervisorState::Finished;
                                    continue;
                                }
                                _ = sleep(self.config.poll_interval()) => {}
                            }
                        }
                        RotationAction::TerminateAndRotate => {
                            log::info!("identity {index}: {}", describe(classification));
                            if matches!(
                                classification,
                                Classification::AccountExhausted | Classification::Stalled
                            ) {
                                self.pool.mark_exhausted(index);
                            }
                            if let Some(mut process) = engine.take() {
                                rotator::terminate_quietly(&mut process).await;
                            }
                            if let Some(pb) = bar.take() {
                                pb.finish_with_message(describe(classification));
                            }
                            bytes_copied += state.last_bytes;

                            let next = index + 1;
                            machine = if next > end {
                                SupervisorState::Finished
                            } else {
                                SupervisorState::Rotating { from: index, to: next }
                            };
                        }
                        RotationAction::TerminateAndStop => {
                            log::info!("identity {index}: {}", describe(classification));
                            if let Some(mut process) = engine.take() {
                                rotator::terminate_quietly(&mut process).await;
                            }
                            if let Some(pb) = bar.take() {
                                pb.finish_with_message(describe(classification));
                            }
                            bytes_copied += state.last_bytes;
                            outcome = RunOutcome::AllDone;
                            machine = SupervisorState::Finished;
                        }
                    }
                }

                SupervisorState::Rotating { from, to } => {
                    log::info!("rotating identity {from} -> {to}");
                    machine = SupervisorState::Launching(to);
                }

                SupervisorState::Finished => {
                    let summary = RunSummary {
                        outcome,
                        identities_launched: launched,
                        identities_exhausted: self.pool.exhausted_count(),
                        bytes_copied,
                        elapsed: started.elapsed(),
                    };
                    log::info!("Elapsed Time: {}", format_elapsed(summary.elapsed));
                    return Ok(summary);
                }
            }
        }
    }

    async fn check_route(&self, route: &Route) -> Result<()> {
        log::info!("checking source path {} ...", route.source);
        let output = process::run_probe(&EngineCommand::size(&self.config, &route.source)).await?;
        log::info!("source path ok:\n{}", output.trim_end());

        log::info!("checking destination path {} ...", route.dest);
        let output = process::run_probe(&EngineCommand::size(&self.config, &route.dest)).await?;
        log::info!("destination path ok:\n{}", output.trim_end());
        Ok(())
    }
}

fn describe(classification: Classification) -> &'static str {
    match classification {
        Classification::Continue => "in progress",
        Classification::AccountExhausted => "quota ceiling reached",
        Classification::Stalled => "transfer stalled",
        Classification::JobFinished => "no more work for this identity",
        Classification::AllDone => "finished streak threshold reached",
    }
}

fn progress_style() -> Result<ProgressStyle> {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .map(|style| style.progress_chars("#>-"))
        .map_err(|e| Error::Internal(e.to_string()))
}

/// Overwrite the single-line identity marker. One writer, no locking.
fn persist_current_identity(path: &Path, index: usize) -> Result<()> {
    std::fs::write(path, format!("{index}\n"))?;
    Ok(())
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityPool;
    use crate::poller::RcClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SA_KEY: &str = r#"{"type":"service_account","client_email":"sa@example.iam.gserviceaccount.com"}"#;

    fn test_config(dir: &tempfile::TempDir, accounts: usize) -> RunConfig {
        let accounts_dir = dir.path().join("accounts");
        std::fs::create_dir(&accounts_dir).unwrap();
        for i in 1..=accounts {
            std::fs::write(accounts_dir.join(format!("sa-{i:02}.json")), SA_KEY).unwrap();
        }

        let mut config: RunConfig =
            toml::from_str(&format!("destination_id = \"{}\"", "d".repeat(33))).unwrap();
        config.accounts_dir = accounts_dir;
        config.engine_config_file = dir.path().join("engine.conf");
        config.engine_binary = "sleep".to_string();
        config.state_file = dir.path().join("current_identity.txt");
        config.log_file = dir.path().join("engine.log");
        config.startup_grace_secs = 0;
        config.poll_interval_secs = 0;
        config
    }

    async fn supervisor_for(
        config: RunConfig,
        server: &MockServer,
    ) -> Supervisor<RcClient> {
        let pool = IdentityPool::generate(&config).unwrap();
        let client = RcClient::new(&server.address().to_string()).unwrap();
        Supervisor::new(config, pool, client, None)
    }

    #[tokio::test]
    async fn rotates_on_quota_until_the_range_is_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/pid"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"pid": 4242})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/core/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bytes": 2_000_000_000u64,
                "checks": 3,
                "speed": 1.0e6,
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, 2);
        config.max_gb_per_identity = 1;
        let state_file = config.state_file.clone();

        let summary = supervisor_for(config, &server).await.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::RangeExhausted);
        assert_eq!(summary.identities_launched, 2);
        assert_eq!(summary.identities_exhausted, 2);
        assert_eq!(summary.bytes_copied, 4_000_000_000);

        // marker holds the last identity that was launched
        let marker = std::fs::read_to_string(state_file).unwrap();
        assert_eq!(marker, "2\n");
    }

    #[tokio::test]
    async fn failure_bursts_accumulate_into_all_done() {
        // nothing mounted: every poll gets a 404 from the mock server
        let server = MockServer::start().await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, 3);
        config.all_done_streak = 2;

        let summary = supervisor_for(config, &server).await.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::AllDone);
        // the third identity is never launched
        assert_eq!(summary.identities_launched, 2);
        assert_eq!(summary.identities_exhausted, 0);
        assert_eq!(summary.bytes_copied, 0);
    }

    #[tokio::test]
    async fn begin_index_past_the_pool_is_a_config_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, 2);
        config.begin_index = 5;
        config.end_index = 9;

        let err = supervisor_for(config, &server).await.run().await.unwrap_err();
        assert!(err.to_string().contains("past the last available identity"));
    }

    #[test]
    fn elapsed_formats_as_wall_clock() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_elapsed(Duration::from_secs(86399)), "23:59:59");
    }
}
