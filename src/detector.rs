use crate::config::RunConfig;
use crate::poller::PollOutcome;
use chrono::{DateTime, Utc};

/// Verdict for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Keep monitoring the current identity.
    Continue,
    /// The identity's transferred bytes hit the quota ceiling.
    AccountExhausted,
    /// No byte progress for too long after the transfer had started.
    Stalled,
    /// The engine's control channel went away: no more work for this identity.
    JobFinished,
    /// Enough consecutive identities finished with no work; the run is over.
    AllDone,
}

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub max_gb_per_identity: u64,
    pub max_dead_polls: u32,
    pub max_failed_poll_burst: u32,
    pub all_done_streak: u32,
    pub success_streak_reset: u32,
    pub quota_over_stall: bool,
}

impl From<&RunConfig> for Thresholds {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_gb_per_identity: config.max_gb_per_identity,
            max_dead_polls: config.max_dead_polls,
            max_failed_poll_burst: config.max_failed_poll_burst,
            all_done_streak: config.all_done_streak,
            success_streak_reset: config.success_streak_reset,
            quota_over_stall: config.quota_over_stall,
        }
    }
}

/// Rolling counters for the whole run, threaded through every poll cycle.
/// Per-identity fields reset on rotation; the finished-identity streak is the
/// only counter that survives it.
#[derive(Debug)]
pub struct RunState {
    pub current_identity_index: usize,
    pub consecutive_poll_failures: u32,
    pub consecutive_no_progress_cycles: u32,
    pub consecutive_successful_polls: u32,
    pub finished_identity_streak: u32,
    pub transfer_started: bool,
    pub last_bytes: u64,
    pub job_started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(begin_index: usize) -> Self {
        Self {
            current_identity_index: begin_index,
            consecutive_poll_failures: 0,
            consecutive_no_progress_cycles: 0,
            consecutive_successful_polls: 0,
            finished_identity_streak: 0,
            transfer_started: false,
            last_bytes: 0,
            job_started_at: Utc::now(),
        }
    }

    pub fn begin_identity(&mut self, index: usize) {
        self.current_identity_index = index;
        self.consecutive_poll_failures = 0;
        self.consecutive_no_progress_cycles = 0;
        self.consecutive_successful_polls = 0;
        self.transfer_started = false;
        self.last_bytes = 0;
    }
}

pub struct StallQuotaDetector {
    thresholds: Thresholds,
}

impl StallQuotaDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn classify(&self, state: &mut RunState, outcome: &PollOutcome) -> Classification {
        match outcome {
            Err(failure) => {
                state.consecutive_successful_polls = 0;
                state.consecutive_poll_failures += 1;
                log::debug!(
                    "poll failed ({}/{}): {failure}",
                    state.consecutive_poll_failures,
                    self.thresholds.max_failed_poll_burst
                );

                if state.consecutive_poll_failures < self.thresholds.max_failed_poll_burst {
                    return Classification::Continue;
                }

                // The engine exposes no exit signal besides its control
                // channel going away, so a full burst of failed polls is read
                // as "process exited, no more work for this identity".
                state.finished_identity_streak += 1;
                if state.finished_identity_streak >= self.thresholds.all_done_streak {
                    Classification::AllDone
                } else {
                    Classification::JobFinished
                }
            }
            Ok(snapshot) => {
                state.consecutive_poll_failures = 0;
                state.consecutive_successful_polls += 1;
                if state.transfer_started
                    && state.consecutive_successful_polls >= self.thresholds.success_streak_reset
                {
                    // a healthy stretch of polls means earlier finished
                    // identities were real end-of-work, not a dying run
                    state.finished_identity_streak = 0;
                    state.consecutive_successful_polls = 0;
                }

                if snapshot.bytes_transferred > state.last_bytes {
                    state.consecutive_no_progress_cycles = 0;
                    state.transfer_started = true;
                } else if state.transfer_started {
                    state.consecutive_no_progress_cycles += 1;
                }
                state.last_bytes = snapshot.bytes_transferred;

                let quota_hit =
                    snapshot.gigabytes() >= self.thresholds.max_gb_per_identity as f64;
                let stalled =
                    state.consecutive_no_progress_cycles >= self.thresholds.max_dead_polls;

                match (quota_hit, stalled) {
                    (false, false) => Classification::Continue,
                    (true, false) => {
                        state.finished_identity_streak = 0;
                        Classification::AccountExhausted
                    }
                    (false, true) => {
                        state.finished_identity_streak = 0;
                        Classification::Stalled
                    }
                    (true, true) => {
                        state.finished_identity_streak = 0;
                        if self.thresholds.quota_over_stall {
                            Classification::AccountExhausted
                        } else {
                            Classification::Stalled
                        }
                    }
                }
            }
        }
    }
}
