use std::process;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kernelink::{Command, EngineEndpoint, Resolution, Session, SessionConfig};

struct Args {
    engine: Option<String>,
    startup_timeout: Option<Duration>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: kernelink-repl [--engine <endpoint>] [--startup-timeout <secs>]");
            eprintln!();
            eprintln!("Reads one engine command per line from stdin and prints each reply.");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --engine <endpoint>        unix:<path>, tcp:<host:port>, or a command to spawn");
            eprintln!("                             [env: KERNELINK_ENGINE]");
            eprintln!("  --startup-timeout <secs>   Seconds to wait for the engine [default: 60]");
            eprintln!("                             [env: KERNELINK_STARTUP_TIMEOUT_SECS]");
            process::exit(2);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        engine: None,
        startup_timeout: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--engine" => {
                i += 1;
                parsed.engine = Some(args.get(i).ok_or("--engine requires a value")?.clone());
            }
            "--startup-timeout" => {
                i += 1;
                let raw = args.get(i).ok_or("--startup-timeout requires a value")?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --startup-timeout '{raw}'"))?;
                parsed.startup_timeout = Some(Duration::from_secs(secs));
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("KERNELINK_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("kernelink={level},kernelink_repl={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = SessionConfig::from_env()?.with_client_name("kernelink-repl");
    if let Some(engine) = &args.engine {
        let endpoint: EngineEndpoint = engine.parse().context("invalid --engine")?;
        config = config.with_endpoint(endpoint);
    }
    if let Some(timeout) = args.startup_timeout {
        config = config.with_startup_timeout(timeout);
    }

    let session = Session::open(&config).await.context("failed to open session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = session.submit_command::<String>(Command::raw(line), Resolution::Text)?;
        match reply.await {
            Ok(text) => println!("{text}"),
            Err(e) if e.is_channel_closed() => return Err(e.into()),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    session.shutdown().await?;
    Ok(())
}
