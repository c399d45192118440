//! skillgate - Entry Point
//!
//! Modes:
//! - Default: validate every skill in the skills directory and print a summary
//! - --report <skill>: full report for one skill
//! - --validate-js <file>: check a browser-side JS skill
//! - --watch / -w: keep watching the directory and reload on change

use skillgate::skills::RegistrySnapshot;
use skillgate::GateConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Parsed command line
struct Cli {
    dir: Option<PathBuf>,
    watch: bool,
    report: Option<String>,
    validate_js: Option<PathBuf>,
    json_logs: bool,
    help: bool,
}

impl Cli {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let value_of = |flag: &str| -> anyhow::Result<Option<String>> {
            match args.iter().position(|a| a == flag) {
                Some(i) => args
                    .get(i + 1)
                    .filter(|v| !v.starts_with('-'))
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| anyhow::anyhow!("{} needs a value", flag)),
                None => Ok(None),
            }
        };

        Ok(Self {
            dir: value_of("--dir")?.map(PathBuf::from),
            watch: args.iter().any(|a| a == "--watch" || a == "-w"),
            report: value_of("--report")?,
            validate_js: value_of("--validate-js")?.map(PathBuf::from),
            json_logs: args.iter().any(|a| a == "--json-logs"),
            help: args.iter().any(|a| a == "--help" || a == "-h"),
        })
    }
}

fn print_help() {
    println!("skillgate v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: skillgate [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --dir <path>          Skills directory (overrides SKILLGATE_SKILLS_DIR)");
    println!("  --watch, -w           Keep running and reload skills on change");
    println!("  --report <skill>      Show the full validation report of one skill");
    println!("  --validate-js <file>  Check a browser-side JS skill without installing it");
    println!("  --json-logs           Log to stderr as JSON");
    println!("  --help, -h            Show this help");
    println!();
    println!("Environment variables:");
    println!("  SKILLGATE_SKILLS_DIR         Skills directory");
    println!("  SKILLGATE_PROBE_TIMEOUT_MS   Handler probe timeout (default: 3000)");
    println!("  SKILLGATE_POLL_INTERVAL_MS   Watcher polling interval (default: 2000)");
    println!("  SKILLGATE_EXPECTED_ERRORS    Error kinds tolerated during probes");
    println!("  SKILLGATE_SANDBOX            default | strict | relaxed | disabled");
    println!("  SKILLGATE_JS_REGISTER_CALL   Registration call for JS skills");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let cli = Cli::parse(&args)?;

    if cli.help {
        print_help();
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let mut config = GateConfig::from_env()?;
    if let Some(dir) = cli.dir {
        config.skills_dir = dir;
    }
    let registry = Arc::new(config.registry());

    if let Some(path) = cli.validate_js {
        let report = registry.validate_js_file(&path);
        println!("{}", report.summary());
        if !report.passed {
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("skillgate v{} on {}", env!("CARGO_PKG_VERSION"), config.skills_dir.display());
    let snapshot = registry.load().await;

    if let Some(name) = cli.report {
        println!("{}", registry.diagnose(&name)?);
        return Ok(());
    }

    println!("{}", registry.summary());

    if cli.watch {
        let watcher = config.watcher(Arc::clone(&registry));
        watcher.start(|snapshot: &RegistrySnapshot| {
            let names: Vec<&str> = snapshot.tools().iter().map(|t| t.name.as_str()).collect();
            info!("Tool registry now has {} tools: {}", names.len(), names.join(", "));
        });
        info!("Watching for changes, press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        if !watcher.stop(Duration::from_secs(3)).await {
            warn!("Skill watcher did not stop within 3s, exiting anyway");
        }
    } else if snapshot.statuses().iter().any(|s| !s.ok) {
        std::process::exit(1);
    }

    Ok(())
}
