use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netwatch::config::Config;
use netwatch::connectivity::{self, HttpMethod, RecordType};
use netwatch::ping;
use netwatch::ports::{load_ports_from_path, parse_ports_str, ScanPreset};
use netwatch::scanner;
use netwatch::server;
use netwatch::types::{PingResult, ScanOutcome, ScanSummary, TestResult};
use netwatch::validate::{PingRequest, ScanRequest, TestOptions, TestRequest};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// netwatch: async TCP port scanner, ping runner and connectivity tests.
#[derive(Debug, Parser)]
#[command(name = "netwatch", version, about, long_about = None)]
struct Cli {
    /// JSON config file with defaults and validation bounds.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON instead of tables.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// TCP connect scan of one host.
    Scan(ScanArgs),
    /// Ping one or more hosts with the system ping utility.
    Ping(PingArgs),
    /// Run a single connectivity test.
    Test {
        #[command(subcommand)]
        test: TestCommand,
    },
    /// Serve the JSON API.
    Serve {
        /// Listen address, e.g. 127.0.0.1:8080.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[derive(Debug, clap::Args)]
struct ScanArgs {
    /// IP address or hostname.
    target: String,

    /// Ports and ranges, e.g. "22,80,8000-8010".
    #[arg(long, conflicts_with_all = ["ports_file", "preset"])]
    ports: Option<String>,

    /// File with one port or range per line (`#` comments allowed).
    #[arg(long = "ports-file", conflicts_with = "preset")]
    ports_file: Option<PathBuf>,

    /// Named port list used when no ports are given.
    #[arg(long, value_enum)]
    preset: Option<ScanPreset>,

    /// Per-port connect timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Ports probed at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Read a short banner from open ports.
    #[arg(long, default_value_t = false)]
    banners: bool,

    /// Write results as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only list open ports in the table.
    #[arg(long = "open-only", default_value_t = false)]
    open_only: bool,
}

#[derive(Debug, clap::Args)]
struct PingArgs {
    #[arg(required = true)]
    hosts: Vec<String>,

    /// Echo requests per host.
    #[arg(short, long)]
    count: Option<u32>,

    /// Per-reply timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum TestCommand {
    /// Can a TCP connection be opened?
    Tcp {
        host: String,
        port: u16,
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
    },
    /// Does the URL answer with a 2xx status?
    Http {
        url: String,
        #[arg(long, value_enum, default_value_t = HttpMethod::Get)]
        method: HttpMethod,
        /// Report redirects instead of following them.
        #[arg(long = "no-follow", default_value_t = false)]
        no_follow: bool,
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
    },
    /// Resolve a name, optionally against a specific nameserver.
    Dns {
        hostname: String,
        #[arg(long = "record-type", value_enum, default_value_t = RecordType::A)]
        record_type: RecordType,
        /// Nameserver IP, optionally with port (default 53).
        #[arg(long)]
        nameserver: Option<String>,
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("netwatch={default_level},tower_http={default_level}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Scan(args) => run_scan(&config, args, cli.json).await,
        Command::Ping(args) => run_ping(&config, args, cli.json).await,
        Command::Test { test } => run_connectivity_test(&config, test, cli.json).await,
        Command::Serve { bind } => {
            let mut config = config;
            if let Some(b) = bind {
                config.server.bind = b;
            }
            server::serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_scan(config: &Config, args: ScanArgs, json: bool) -> Result<ExitCode> {
    let explicit = match (&args.ports, &args.ports_file) {
        (Some(spec), _) => Some(parse_ports_str(spec)?),
        (None, Some(path)) => Some(load_ports_from_path(path)?),
        (None, None) => None,
    };
    let req = ScanRequest {
        ip: args.target.clone(),
        ports: explicit.map(|p| p.into_iter().map(i64::from).collect()),
        scan_type: args.preset,
        timeout: args.timeout_ms,
        ..Default::default()
    };
    let mut plan = req.validate(config)?;
    if let Some(c) = args.concurrency {
        plan.options.concurrency = c;
    }
    plan.options.grab_banners |= args.banners;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, finishing the current batch");
                cancel.cancel();
            }
        });
    }

    info!(
        host = %plan.host,
        ports = plan.ports.len(),
        concurrency = plan.options.concurrency,
        timeout_ms = plan.options.timeout.as_millis() as u64,
        "starting scan"
    );
    let start = Instant::now();
    let ports = scanner::scan_ports_with_cancel(&plan.host, &plan.ports, plan.options, cancel).await;
    let summary = ScanSummary::from_results(&ports, start.elapsed().as_millis() as u64);
    let outcome = ScanOutcome { ports, summary };

    if json {
        print_json(&outcome)?;
    } else {
        print_scan_table(&plan.host, &outcome, args.open_only);
    }
    if let Some(path) = args.output.as_deref() {
        write_json_file(path, &outcome)?;
        eprintln!("Wrote JSON results to {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_ping(config: &Config, args: PingArgs, json: bool) -> Result<ExitCode> {
    let mut hosts = Vec::with_capacity(args.hosts.len());
    let mut opts = None;
    for host in &args.hosts {
        let req = PingRequest {
            ip: host.clone(),
            count: args.count,
            timeout: args.timeout_ms,
        };
        let (host, o) = req.validate(config)?;
        hosts.push(host);
        opts = Some(o);
    }
    let Some(opts) = opts else {
        return Ok(ExitCode::FAILURE);
    };

    let results = ping::ping_hosts(&hosts, opts).await;
    if json {
        print_json(&results)?;
    } else {
        for r in results.values() {
            print_ping(r);
        }
    }
    let all_alive = results.values().all(|r| r.alive);
    Ok(if all_alive { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run_connectivity_test(config: &Config, test: TestCommand, json: bool) -> Result<ExitCode> {
    let req = match test {
        TestCommand::Tcp {
            host,
            port,
            timeout_ms,
        } => TestRequest {
            kind: "tcp".into(),
            target: host,
            port: Some(i64::from(port)),
            options: TestOptions {
                timeout: timeout_ms,
                ..Default::default()
            },
        },
        TestCommand::Http {
            url,
            method,
            no_follow,
            timeout_ms,
        } => TestRequest {
            kind: "http".into(),
            target: url,
            port: None,
            options: TestOptions {
                timeout: timeout_ms,
                method: Some(format!("{method:?}")),
                follow_redirects: Some(!no_follow),
                ..Default::default()
            },
        },
        TestCommand::Dns {
            hostname,
            record_type,
            nameserver,
            timeout_ms,
        } => TestRequest {
            kind: "dns".into(),
            target: hostname,
            port: None,
            options: TestOptions {
                timeout: timeout_ms,
                record_type: Some(format!("{record_type:?}")),
                nameserver,
                ..Default::default()
            },
        },
    };
    let spec = req.validate(config)?;
    let result = connectivity::run_test(&spec).await;

    if json {
        print_json(&result)?;
    } else {
        print_test(&req.target, &result);
    }
    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serializing results")?;
    println!("{out}");
    Ok(())
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn print_scan_table(host: &str, outcome: &ScanOutcome, open_only: bool) {
    let rows: Vec<_> = outcome
        .ports
        .iter()
        .filter(|p| !open_only || p.status == netwatch::types::PortStatus::Open)
        .collect();

    let mut service_w = "service".len();
    let mut banner_w = "banner".len();
    for r in &rows {
        service_w = service_w.max(r.service.as_deref().map_or(0, str::len));
        if let Some(b) = &r.banner {
            banner_w = banner_w.max(b.len().min(60));
        }
    }
    let port_w = 5usize;
    let status_w = "filtered".len();
    let lat_w = "latency_ms".len();

    let s = &outcome.summary;
    println!(
        "\n{host}: {} open, {} closed, {} filtered of {} ports in {} ms",
        s.open_ports, s.closed_ports, s.filtered_ports, s.total_ports, s.duration_ms
    );
    println!(
        "{:>port_w$}  {:<status_w$}  {:<service_w$}  {:>lat_w$}  {:<banner_w$}",
        "port", "status", "service", "latency_ms", "banner",
    );
    println!(
        "{:->port_w$}  {:-<status_w$}  {:-<service_w$}  {:->lat_w$}  {:-<banner_w$}",
        "", "", "", "", "",
    );
    for r in rows {
        let mut bsnip = r.banner.clone().unwrap_or_default();
        if bsnip.len() > 60 {
            let mut cut = 60;
            while !bsnip.is_char_boundary(cut) {
                cut -= 1;
            }
            bsnip.truncate(cut);
        }
        let latency = r
            .response_time_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        println!(
            "{:>port_w$}  {:<status_w$}  {:<service_w$}  {:>lat_w$}  {:<banner_w$}",
            r.port,
            r.status.to_string(),
            r.service.as_deref().unwrap_or(""),
            latency,
            bsnip,
        );
    }
}

fn print_ping(r: &PingResult) {
    if r.alive {
        println!(
            "{}: alive, {} replies, loss {:.1}%, rtt min/avg/max {:.2}/{:.2}/{:.2} ms",
            r.host,
            r.times.len(),
            r.packet_loss,
            r.min_time,
            r.avg_time,
            r.max_time
        );
    } else {
        println!(
            "{}: unreachable ({})",
            r.host,
            r.error.as_deref().unwrap_or("no replies")
        );
    }
}

fn print_test(target: &str, r: &TestResult) {
    let verdict = if r.success { "OK" } else { "FAIL" };
    println!("{verdict} {target} in {} ms", r.response_time_ms);
    if let Some(e) = &r.error {
        println!("  error: {e}");
    }
    if let Some(d) = &r.details {
        if let Some(code) = d.status_code {
            println!("  status: {code}");
        }
        if let Some(addrs) = &d.resolved_addresses {
            for a in addrs {
                println!("  {a}");
            }
        }
        if let Some(ns) = &d.nameserver {
            println!("  nameserver: {ns}");
        }
        if let Some(b) = &d.banner {
            println!("  banner: {b}");
        }
    }
}
