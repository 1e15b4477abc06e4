use std::env;

use plaudit_config::{LogFormat, Logging};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: plaudit serve --config <path>\n       plaudit verify-audit <jsonl-path> [--mirror <path>]";

fn init_tracing(logging: &Logging) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .init(),
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn serve(args: &[String]) -> i32 {
    let config_path =
        flag_value(args, "--config").unwrap_or_else(|| "./config/example-config.yaml".to_string());

    let cfg = match plaudit_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return 1;
        }
    };
    init_tracing(&cfg.logging);
    tracing::info!(config = %config_path, store = %cfg.store.kind, "starting plaudit");

    match plaudit_server::serve(cfg).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            1
        }
    }
}

fn verify_audit(args: &[String]) -> i32 {
    let Some(path) = args.first().filter(|a| !a.starts_with("--")) else {
        eprintln!("{USAGE}");
        return 2;
    };
    let mirror = flag_value(args, "--mirror");
    match plaudit_server::verify_audit_chain_with_mirror(path, mirror.as_deref()) {
        Ok(summary) => {
            println!("{summary}");
            0
        }
        Err(e) => {
            eprintln!("audit chain invalid: {e}");
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let code = match args.first().map(String::as_str) {
        Some("serve") => serve(&args[1..]).await,
        Some("verify-audit") => verify_audit(&args[1..]),
        _ => {
            eprintln!("{USAGE}");
            2
        }
    };
    std::process::exit(code);
}
