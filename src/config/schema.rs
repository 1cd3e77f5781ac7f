use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_extras"))]
pub struct RunConfig {
    /// Drive id of the source: a team drive (19 chars) or a publicly shared
    /// folder (33 chars). Leave unset to copy from a local path.
    #[serde(default)]
    pub source_id: Option<String>,

    #[serde(default)]
    pub source_path: String,

    /// Folder id override for the source path, for paths whose names the
    /// engine cannot resolve. Only valid against a team-drive source.
    #[serde(default)]
    pub source_path_id: Option<String>,

    #[validate(length(min = 1))]
    pub destination_id: String,

    #[serde(default)]
    pub destination_path: String,

    /// Directory holding one service-account credential JSON per identity.
    #[serde(default = "default_accounts_dir")]
    pub accounts_dir: PathBuf,

    /// Where the generated engine config file is written.
    #[serde(default = "default_engine_config_file")]
    pub engine_config_file: PathBuf,

    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,

    /// Remote-control port; use a different port per concurrent run.
    #[serde(default = "default_rc_port")]
    pub rc_port: u16,

    #[serde(default = "default_begin_index")]
    #[validate(range(min = 1))]
    pub begin_index: usize,

    #[serde(default = "default_end_index")]
    pub end_index: usize,

    /// OAuth client; falls back to the CLIENT_ID / CLIENT_SECRET / TOKEN
    /// environment variables when unset.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_max_gb")]
    pub max_gb_per_identity: u64,

    #[serde(default = "default_max_dead_polls")]
    pub max_dead_polls: u32,

    #[serde(default = "default_max_failed_poll_burst")]
    pub max_failed_poll_burst: u32,

    #[serde(default = "default_all_done_streak")]
    pub all_done_streak: u32,

    #[serde(default = "default_success_streak_reset")]
    pub success_streak_reset: u32,

    /// When quota and stall trip in the same poll cycle, quota wins by
    /// default; set false to report the stall instead.
    #[serde(default = "default_quota_over_stall")]
    pub quota_over_stall: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,

    #[serde(default = "default_tpslimit")]
    pub tpslimit: u32,

    #[serde(default = "default_transfers")]
    pub transfers: u32,

    #[serde(default = "default_checkers")]
    pub checkers: u32,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: String,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Single-line marker recording the active identity ordinal. Overwritten
    /// on every rotation; for operator visibility only, never auto-resumed.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub disable_list_r: bool,

    #[serde(default)]
    pub crypt: bool,

    #[serde(default)]
    pub crypt_password: Option<String>,

    #[serde(default)]
    pub cache: bool,

    /// Probe source and destination with the engine's `size` subcommand
    /// before the first identity is launched.
    #[serde(default)]
    pub check_paths: bool,
}

impl RunConfig {
    pub fn rc_addr(&self) -> String {
        format!("localhost:{}", self.rc_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
}

fn validate_extras(config: &RunConfig) -> Result<(), ValidationError> {
    if config.crypt && config.crypt_password.is_none() {
        let mut err = ValidationError::new("crypt_password_required");
        err.message = Some("crypt = true requires crypt_password".into());
        return Err(err);
    }
    if config.begin_index > config.end_index {
        let mut err = ValidationError::new("empty_identity_range");
        err.message = Some("begin_index is past end_index".into());
        return Err(err);
    }
    Ok(())
}

fn default_accounts_dir() -> PathBuf {
    PathBuf::from("accounts")
}

fn default_engine_config_file() -> PathBuf {
    PathBuf::from("rclone.conf")
}

fn default_engine_binary() -> String {
    "rclone".to_string()
}

fn default_rc_port() -> u16 {
    5572
}

fn default_begin_index() -> usize {
    1
}

fn default_end_index() -> usize {
    600
}

fn default_max_gb() -> u64 {
    650
}

fn default_max_dead_polls() -> u32 {
    100
}

fn default_max_failed_poll_burst() -> u32 {
    3
}

fn default_all_done_streak() -> u32 {
    4
}

fn default_success_streak_reset() -> u32 {
    9
}

fn default_quota_over_stall() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    4
}

fn default_startup_grace_secs() -> u64 {
    5
}

fn default_tpslimit() -> u32 {
    5
}

fn default_transfers() -> u32 {
    5
}

fn default_checkers() -> u32 {
    10
}

fn default_chunk_size() -> String {
    "256M".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("engine_copy.log")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("current_identity.txt")
}
