use clap::{Arg, ArgAction, Command};
use std::io::Read;

use warden_runtime::{lifecycle, WardenConfig, WardenPaths};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    Command::new("warden")
        .version(VERSION)
        .about("Warden - policy and observation runtime for AI coding agents")
        .subcommand(
            Command::new("pre-tool")
                .about("PreToolUse hook: evaluate the gate pipeline against stdin")
                .arg(
                    Arg::new("permission")
                        .long("permission")
                        .action(ArgAction::SetTrue)
                        .help("Run as a PermissionRequest auto-approver instead"),
                ),
        )
        .subcommand(Command::new("post-tool").about("PostToolUse hook: track state from stdin"))
        .subcommand(Command::new("gateway").about("Run the memory gateway (single writer)"))
        .subcommand(Command::new("daemon").about("Run the gate pipeline fast-path daemon"))
        .subcommand(
            Command::new("session-start")
                .about("SessionStart hook: rotate logs, drain queues, inject memories")
                .arg(Arg::new("session").long("session").default_value("main")),
        )
        .subcommand(
            Command::new("session-end")
                .about("Stop hook: write handoff digest, clear locks")
                .arg(Arg::new("session").long("session").default_value("main")),
        )
        .subcommand(Command::new("status").about("Show gateway and queue status"))
}

fn read_stdin() -> String {
    let mut raw = String::new();
    let _ = std::io::stdin().read_to_string(&mut raw);
    raw
}

fn stdin_session_id(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| {
            v.get("session_id")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "main".to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let code = run(matches).await;
    std::process::exit(code);
}

async fn run(matches: clap::ArgMatches) -> i32 {
    match matches.subcommand() {
        Some(("pre-tool", sub)) => {
            let raw = read_stdin();
            if sub.get_flag("permission") {
                // Fail-open to the user prompt, never to execution.
                if let Some(decision) = warden_runtime::hooks::permission_decision(&raw) {
                    println!("{decision}");
                }
                return 0;
            }
            warden_runtime::hooks::pre_tool_entry(&raw).await
        }
        Some(("post-tool", _)) => {
            let raw = read_stdin();
            warden_runtime::hooks::post_tool_entry(&raw).await
        }
        Some(("gateway", _)) => {
            let paths = WardenPaths::resolve();
            let config = WardenConfig::load(&paths).unwrap_or_default();
            if let Err(e) = paths.ensure_dirs() {
                eprintln!("warden gateway: {e}");
                return 1;
            }
            match warden_runtime::Gateway::open(paths, &config).await {
                Ok(gateway) => {
                    if let Err(e) = gateway.serve().await {
                        eprintln!("warden gateway: {e}");
                        return 1;
                    }
                    0
                }
                Err(e) => {
                    eprintln!("warden gateway: {e}");
                    1
                }
            }
        }
        Some(("daemon", _)) => {
            let paths = WardenPaths::resolve();
            let config = WardenConfig::load(&paths).unwrap_or_default();
            if let Err(e) = warden_runtime::daemon::serve(paths, config).await {
                eprintln!("warden daemon: {e}");
                return 1;
            }
            0
        }
        Some(("session-start", sub)) => {
            let paths = WardenPaths::resolve();
            let config = WardenConfig::load(&paths).unwrap_or_default();
            let raw = if atty_stdin_has_data() { read_stdin() } else { String::new() };
            let session_id = if raw.is_empty() {
                sub.get_one::<String>("session").cloned().unwrap_or_default()
            } else {
                stdin_session_id(&raw)
            };

            let report = lifecycle::session_start(&paths, &config, &session_id).await;
            for warning in &report.integrity_warnings {
                eprintln!("{warning}");
            }
            if !report.injected.is_empty() {
                println!("Prior-session memory:");
                for line in &report.injected {
                    println!("  {line}");
                }
            }
            0
        }
        Some(("session-end", sub)) => {
            let paths = WardenPaths::resolve();
            let raw = if atty_stdin_has_data() { read_stdin() } else { String::new() };
            let session_id = if raw.is_empty() {
                sub.get_one::<String>("session").cloned().unwrap_or_default()
            } else {
                stdin_session_id(&raw)
            };
            lifecycle::session_end(&paths, &session_id);
            0
        }
        Some(("status", _)) => {
            let paths = WardenPaths::resolve();
            let config = WardenConfig::load(&paths).unwrap_or_default();
            let client =
                warden_runtime::GatewayClient::new(paths.gateway_socket(), config.gateway_timeout);
            match client.ping().await {
                Ok(()) => {
                    println!("gateway: up ({})", paths.gateway_socket().display());
                    for collection in warden_runtime::gateway::protocol::COLLECTIONS {
                        if let Ok(count) = client.count(collection).await {
                            println!("  {collection}: {count}");
                        }
                    }
                }
                Err(_) => println!("gateway: down ({})", paths.gateway_socket().display()),
            }
            let queue = paths.capture_queue();
            let queued = std::fs::read_to_string(&queue)
                .map(|raw| raw.lines().count())
                .unwrap_or(0);
            println!("capture queue: {queued} lines");
            0
        }
        _ => {
            let _ = cli().print_help();
            println!();
            0
        }
    }
}

/// Hook subcommands read stdin; interactive use shouldn't hang on a TTY.
fn atty_stdin_has_data() -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata("/dev/stdin")
        .map(|m| {
            let ft = m.file_type();
            ft.is_fifo() || ft.is_file() || ft.is_socket()
        })
        .unwrap_or(false)
}
