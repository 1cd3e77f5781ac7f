use clap::{Parser, Subcommand};
use sacopy::config::ConfigLoader;
use sacopy::identity::{self, IdentityPool};
use sacopy::poller::RcClient;
use sacopy::supervisor::{format_elapsed, RunOutcome, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sacopy")]
#[command(version = "0.1.0")]
#[command(about = "Bulk drive copy across a rotating pool of service-account identities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a copy job from a config file
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show progress bars (stderr)
        #[arg(short, long, default_value_t = true)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(indicatif::MultiProgress::new());

    match cli.command {
        Commands::Run { config, progress } => {
            if progress {
                let multi_clone = multi.clone();
                indicatif_log_bridge::LogWrapper::new((*multi_clone).clone(), logger)
                    .try_init()
                    .unwrap();
            } else {
                log::set_boxed_logger(Box::new(logger)).unwrap();
                log::set_max_level(log::LevelFilter::Info);
            }

            log::info!("Loading config from {:?}", config);
            let run_config = ConfigLoader::load(&config)?;
            log::info!(
                "Generating engine profiles from {:?}",
                run_config.accounts_dir
            );
            let pool = IdentityPool::generate(&run_config)?;
            log::info!("{} identities available", pool.len());

            let client = RcClient::new(&run_config.rc_addr())?;
            let supervisor = Supervisor::new(
                run_config,
                pool,
                client,
                progress.then(|| multi.clone()),
            );

            let summary = supervisor.run().await?;

            println!("\n✅ Copy run finished:");
            println!(
                "   Outcome: {}",
                match summary.outcome {
                    RunOutcome::AllDone => "all identities report no more work",
                    RunOutcome::RangeExhausted => "identity range exhausted",
                    RunOutcome::Interrupted => "interrupted",
                }
            );
            println!("   Identities Launched: {}", summary.identities_launched);
            println!("   Identities Exhausted: {}", summary.identities_exhausted);
            println!("   GB Copied: {:.1}", summary.bytes_copied as f64 / 1e9);
            println!("   Total Time: {}", format_elapsed(summary.elapsed));
        }
        Commands::Check { config } => {
            match ConfigLoader::load(&config) {
                Ok(cfg) => {
                    println!("✅ Config is valid:");
                    println!("   Destination: {}", cfg.destination_id);
                    println!("   Accounts dir: {:?}", cfg.accounts_dir);
                    match identity::discover_credentials(&cfg.accounts_dir) {
                        Ok(files) => println!("   Credential files: {}", files.len()),
                        Err(e) => println!("   Credential files: {}", e),
                    }
                    println!("   Identity range: {}..={}", cfg.begin_index, cfg.end_index);
                    println!("   Quota: {} GB per identity", cfg.max_gb_per_identity);
                    println!("   Control channel: {}", cfg.rc_addr());
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
