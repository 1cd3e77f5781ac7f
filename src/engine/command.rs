use crate::config::RunConfig;
use crate::identity::Route;
use std::path::PathBuf;
use tokio::process::Command;

/// The flags the launcher is allowed to hand the engine. Anything new has to
/// be added here first; there is no free-form flag passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFlag {
    Config(PathBuf),
    DryRun,
    FastList,
    ServerSideAcrossConfigs,
    RemoteControl { addr: String },
    NoRemoteAuth,
    LowLevelRetries(u32),
    LogLevel(&'static str),
    IgnoreExisting,
    Checkers(u32),
    TpsLimit(u32),
    Transfers(u32),
    ChunkSize(String),
    DisableListR,
    AcknowledgeAbuse,
    LogFile(PathBuf),
}

impl EngineFlag {
    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            EngineFlag::Config(path) => {
                args.push("--config".into());
                args.push(path.display().to_string());
            }
            EngineFlag::DryRun => args.push("--dry-run".into()),
            EngineFlag::FastList => args.push("--fast-list".into()),
            EngineFlag::ServerSideAcrossConfigs => {
                args.push("--drive-server-side-across-configs".into())
            }
            EngineFlag::RemoteControl { addr } => {
                args.push("--rc".into());
                args.push(format!("--rc-addr={addr}"));
            }
            EngineFlag::NoRemoteAuth => args.push("--rc-no-auth".into()),
            EngineFlag::LowLevelRetries(n) => {
                args.push("--low-level-retries".into());
                args.push(n.to_string());
            }
            EngineFlag::LogLevel(level) => {
                args.push("--log-level".into());
                args.push((*level).into());
            }
            EngineFlag::IgnoreExisting => args.push("--ignore-existing".into()),
            EngineFlag::Checkers(n) => {
                args.push("--checkers".into());
                args.push(n.to_string());
            }
            EngineFlag::TpsLimit(n) => {
                args.push("--tpslimit".into());
                args.push(n.to_string());
            }
            EngineFlag::Transfers(n) => {
                args.push("--transfers".into());
                args.push(n.to_string());
            }
            EngineFlag::ChunkSize(size) => {
                args.push("--drive-chunk-size".into());
                args.push(size.clone());
            }
            EngineFlag::DisableListR => {
                args.push("--disable".into());
                args.push("ListR".into());
            }
            EngineFlag::AcknowledgeAbuse => args.push("--drive-acknowledge-abuse".into()),
            EngineFlag::LogFile(path) => args.push(format!("--log-file={}", path.display())),
        }
    }
}

/// A fully assembled engine invocation. Arguments are passed as a vector,
/// never through a shell.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub binary: String,
    pub subcommand: &'static str,
    pub flags: Vec<EngineFlag>,
    pub targets: Vec<String>,
}

impl EngineCommand {
    /// The copy invocation for one identity's route.
    pub fn copy(config: &RunConfig, route: &Route) -> Self {
        let mut flags = vec![EngineFlag::Config(config.engine_config_file.clone())];
        if config.dry_run {
            flags.push(EngineFlag::DryRun);
        }
        flags.extend([
            EngineFlag::FastList,
            EngineFlag::ServerSideAcrossConfigs,
            EngineFlag::RemoteControl {
                addr: config.rc_addr(),
            },
            EngineFlag::NoRemoteAuth,
            EngineFlag::LowLevelRetries(1),
            EngineFlag::LogLevel("DEBUG"),
            EngineFlag::IgnoreExisting,
            EngineFlag::Checkers(config.checkers),
            EngineFlag::TpsLimit(config.tpslimit),
            EngineFlag::Transfers(config.transfers),
            EngineFlag::ChunkSize(config.chunk_size.clone()),
        ]);
        if config.disable_list_r {
            flags.push(EngineFlag::DisableListR);
        }
        flags.push(EngineFlag::AcknowledgeAbuse);
        flags.push(EngineFlag::LogFile(config.log_file.clone()));

        Self {
            binary: config.engine_binary.clone(),
            subcommand: "copy",
            flags,
            targets: vec![route.source.clone(), route.dest.clone()],
        }
    }

    /// The `size` probe used by the pre-run path check.
    pub fn size(config: &RunConfig, target: &str) -> Self {
        Self {
            binary: config.engine_binary.clone(),
            subcommand: "size",
            flags: vec![
                EngineFlag::Config(config.engine_config_file.clone()),
                EngineFlag::DisableListR,
            ],
            targets: vec![target.to_string()],
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand.to_string()];
        for flag in &self.flags {
            flag.push_args(&mut args);
        }
        args.extend(self.targets.iter().cloned());
        args
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(self.args());
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Route;

    fn config() -> RunConfig {
        toml::from_str(&format!("destination_id = \"{}\"", "d".repeat(33))).unwrap()
    }

    fn route() -> Route {
        Route {
            source: "src001:music".to_string(),
            dest: "dst001:music".to_string(),
        }
    }

    fn window(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    }

    #[test]
    fn copy_invocation_renders_the_recognized_flag_set() {
        let args = EngineCommand::copy(&config(), &route()).args();

        assert_eq!(args[0], "copy");
        assert_eq!(window(&args, "--config").as_deref(), Some("rclone.conf"));
        assert!(args.contains(&"--fast-list".to_string()));
        assert!(args.contains(&"--drive-server-side-across-configs".to_string()));
        assert!(args.contains(&"--rc".to_string()));
        assert!(args.contains(&"--rc-addr=localhost:5572".to_string()));
        assert!(args.contains(&"--rc-no-auth".to_string()));
        assert_eq!(window(&args, "--low-level-retries").as_deref(), Some("1"));
        assert_eq!(window(&args, "--log-level").as_deref(), Some("DEBUG"));
        assert!(args.contains(&"--ignore-existing".to_string()));
        assert_eq!(window(&args, "--checkers").as_deref(), Some("10"));
        assert_eq!(window(&args, "--tpslimit").as_deref(), Some("5"));
        assert_eq!(window(&args, "--transfers").as_deref(), Some("5"));
        assert_eq!(window(&args, "--drive-chunk-size").as_deref(), Some("256M"));
        assert!(args.contains(&"--drive-acknowledge-abuse".to_string()));
        assert!(args.contains(&"--log-file=engine_copy.log".to_string()));

        // route targets come last, in source/destination order
        assert_eq!(args[args.len() - 2], "src001:music");
        assert_eq!(args[args.len() - 1], "dst001:music");

        assert!(!args.contains(&"--dry-run".to_string()));
        assert!(!args.contains(&"--disable".to_string()));
    }

    #[test]
    fn optional_flags_are_rendered_when_configured() {
        let mut cfg = config();
        cfg.dry_run = true;
        cfg.disable_list_r = true;
        let args = EngineCommand::copy(&cfg, &route()).args();

        assert!(args.contains(&"--dry-run".to_string()));
        assert_eq!(window(&args, "--disable").as_deref(), Some("ListR"));
    }

    #[test]
    fn size_probe_is_minimal() {
        let args = EngineCommand::size(&config(), "dst001:music").args();
        assert_eq!(
            args,
            vec![
                "size",
                "--config",
                "rclone.conf",
                "--disable",
                "ListR",
                "dst001:music"
            ]
        );
    }
}
