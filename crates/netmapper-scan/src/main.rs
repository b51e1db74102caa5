//! CLI entry point for the netmapper reconnaissance pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser};

use netmapper_core::TargetDescriptor;

use netmapper_scan::config::{ScanConfig, ScanMode};
use netmapper_scan::layout::RunLayout;
use netmapper_scan::logging;
use netmapper_scan::pipeline::{Interrupt, Pipeline, PipelineOutcome};
use netmapper_scan::runner::{verify_nmap, ProcessRunner};

#[derive(Parser)]
#[command(name = "netmapper")]
#[command(about = "Network discovery, service enumeration and weak-credential checks")]
#[command(group(ArgGroup::new("targets").required(true).args(["target", "targets_file"])))]
struct Cli {
    /// Target network (CIDR, e.g. 192.168.1.0/24), single address, or comma-separated addresses.
    #[arg(short, long)]
    target: Option<String>,

    /// File with one address per line. Blank lines and `#` comments are ignored.
    #[arg(long)]
    targets_file: Option<PathBuf>,

    /// Output directory (default: network_scan_<timestamp>).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent workers per stage.
    #[arg(long)]
    threads: Option<usize>,

    /// Hosts per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    skip_fingerprinting: bool,

    #[arg(long)]
    skip_vuln_scan: bool,

    #[arg(long)]
    skip_cred_check: bool,

    /// Use a TCP connect scan instead of a SYN scan (no root needed).
    #[arg(long)]
    tcp_scan: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    /// Config file prefix (default: netmapper).
    #[arg(short, long, default_value = "netmapper")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let target = resolve_target(&cli)?;
    let config = apply_overrides(ScanConfig::load(&cli.config)?, &cli);
    config.validate()?;

    let root = cli.output.clone().unwrap_or_else(default_output_dir);
    std::fs::create_dir_all(&root)?;
    let layout = RunLayout::new(root);
    logging::init(&layout.log_file(), cli.verbose)?;

    let runner = Arc::new(ProcessRunner);
    match verify_nmap(runner.as_ref(), &config.nmap_path).await {
        Some(version) => tracing::info!(nmap_version = %version, "Nmap verified"),
        None => tracing::warn!(
            nmap_path = %config.nmap_path,
            "nmap not found, scans will come back empty"
        ),
    }

    let interrupt = Interrupt::new();
    interrupt.listen_for_ctrl_c();

    let pipeline = Pipeline::new(runner, config, layout, interrupt);
    match pipeline.run(target).await? {
        PipelineOutcome::Completed {
            run,
            report,
            interrupted,
        } => {
            tracing::info!(
                hosts = run.hosts.len(),
                vulnerable = run.vulnerable_hosts.len(),
                report = %report.display(),
                interrupted,
                "Scan finished"
            );
        }
        PipelineOutcome::AbortedNoHosts => {
            tracing::warn!(
                output = %pipeline.layout().root().display(),
                "No live hosts found, exiting"
            );
        }
    }

    Ok(())
}

fn resolve_target(cli: &Cli) -> anyhow::Result<TargetDescriptor> {
    if let Some(path) = &cli.targets_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read targets file {}: {e}", path.display()))?;
        return Ok(TargetDescriptor::from_lines(&content)?);
    }
    match cli.target.as_deref() {
        Some(spec) => Ok(TargetDescriptor::resolve(spec)?),
        None => anyhow::bail!("Specify --target or --targets-file"),
    }
}

fn apply_overrides(mut config: ScanConfig, cli: &Cli) -> ScanConfig {
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if cli.tcp_scan {
        config.scan_mode = ScanMode::Connect;
    }
    config.fingerprinting &= !cli.skip_fingerprinting;
    config.vulnerability_scan &= !cli.skip_vuln_scan;
    config.credential_check &= !cli.skip_cred_check;
    config
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(format!(
        "network_scan_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}
