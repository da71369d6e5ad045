//! TideKV - An In-Memory Keyspace Engine
//!
//! This is the interactive shell. It reads one command per line from
//! stdin, runs it through a [`CommandHandler`] and prints the reply the
//! way `redis-cli` does. Pub/sub messages are printed as they arrive.

use std::sync::Arc;
use std::time::Duration;
use tidekv::{CommandHandler, Database, EngineConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Shell configuration
struct Config {
    /// Background expiry sweep interval
    sweep_interval: Duration,
    /// Per-subscriber pub/sub queue capacity
    pubsub_buffer: usize,
    /// Interpreter steps per script run (0 = unlimited)
    script_step_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            sweep_interval: engine.expiry.base_interval,
            pubsub_buffer: engine.pubsub_buffer,
            script_step_limit: engine.script_step_limit,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--sweep-interval-ms" => {
                    let ms: u64 = parse_value(&args, i);
                    config.sweep_interval = Duration::from_millis(ms.max(1));
                    i += 2;
                }
                "--pubsub-buffer" => {
                    config.pubsub_buffer = parse_value(&args, i);
                    i += 2;
                }
                "--script-step-limit" => {
                    config.script_step_limit = parse_value(&args, i);
                    i += 2;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("TideKV version {}", tidekv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_sweep_interval(self.sweep_interval)
            .with_pubsub_buffer(self.pubsub_buffer)
            .with_script_step_limit(self.script_step_limit)
    }
}

/// The numeric value following the flag at `i`, or exit with a message.
fn parse_value<T: std::str::FromStr>(args: &[String], i: usize) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", args[i]);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", args[i], raw);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
TideKV - An In-Memory Keyspace Engine

USAGE:
    tidekv [OPTIONS]

OPTIONS:
        --sweep-interval-ms <MS>   Expiry sweep interval (default: 100)
        --pubsub-buffer <N>        Messages queued per subscriber (default: 1024)
        --script-step-limit <N>    Interpreter steps per script, 0 = unlimited
    -v, --version                  Print version information
    -h, --help                     Print this help message

USAGE:
    Type one command per line. Arguments are separated by spaces;
    quote them with "..." or '...' to include spaces.

    tidekv> SET name "Tide"
    OK
    tidekv> GET name
    "Tide"

    Set RUST_LOG=debug for per-command logging.
"#
    );
}

fn print_banner() {
    println!(
        r#"
TideKV v{} - In-Memory Keyspace Engine
──────────────────────────────────────────────
Type commands, QUIT or Ctrl+C to exit.
"#,
        tidekv::VERSION,
    );
}

/// Splits a command line into arguments, honouring quotes.
///
/// Double-quoted arguments understand `\n`, `\t`, `\\` and `\"`; single
/// quotes are literal.
fn split_args(line: &str) -> Result<Vec<String>, &'static str> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            return Ok(args);
        };

        let mut current = String::new();
        if first == '"' || first == '\'' {
            chars.next();
            loop {
                match chars.next() {
                    None => return Err("unbalanced quotes"),
                    Some(c) if c == first => break,
                    Some('\\') if first == '"' => match chars.next() {
                        Some('n') => current.push('\n'),
                        Some('t') => current.push('\t'),
                        Some('r') => current.push('\r'),
                        Some(c) => current.push(c),
                        None => return Err("unbalanced quotes"),
                    },
                    Some(c) => current.push(c),
                }
            }
            if chars.peek().is_some_and(|c| !c.is_whitespace()) {
                return Err("closing quote must be followed by a space");
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                current.push(c);
            }
        }
        args.push(current);
    }
}

fn drain_messages(client: &mut CommandHandler) {
    while let Some(msg) = client.try_next_message() {
        println!("{}", msg.to_reply());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging on stderr so replies stay clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    print_banner();

    let db = Arc::new(Database::with_config(config.engine_config()));
    info!(
        pubsub_buffer = db.config().pubsub_buffer,
        script_step_limit = db.config().script_step_limit,
        "Engine initialized with 64 shards"
    );

    // Start the background expiry sweeper
    let _sweeper = db.start_sweeper();
    info!("Background expiry sweeper started");

    let mut client = CommandHandler::new(Arc::clone(&db));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let args = match split_args(&line) {
                    Ok(args) if args.is_empty() => continue,
                    Ok(args) => args,
                    Err(e) => {
                        println!("(error) ERR {}", e);
                        continue;
                    }
                };
                let quit = args[0].eq_ignore_ascii_case("quit");
                match client.execute(args.into_iter().map(bytes::Bytes::from).collect()) {
                    Ok(reply) => println!("{}", reply),
                    Err(e) => println!("(error) {}", e),
                }
                drain_messages(&mut client);
                if quit {
                    break;
                }
            }
            _ = ticker.tick() => drain_messages(&mut client),
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!(commands = db.commands_processed(), "Shell closed");
    Ok(())
}
