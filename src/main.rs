use std::path::PathBuf;

use devnetd::apikeys::{hash_token, ApiKeyStore};
use devnetd::config::Config;

#[tokio::main]
async fn main() {
    devnetd::telemetry::init();

    let data_dir = std::env::var("DEVNETD_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/var/lib/devnetd"));
    let config = match Config::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("devnetd: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("issue-api-key") => {
            let Some(label) = args.next() else {
                eprintln!("usage: devnetd issue-api-key <label>");
                std::process::exit(1);
            };
            if let Err(e) = issue_api_key(&config, &label).await {
                eprintln!("devnetd: failed to issue api key: {e}");
                std::process::exit(1);
            }
        }
        Some("revoke-api-key") => {
            let Some(label) = args.next() else {
                eprintln!("usage: devnetd revoke-api-key <label>");
                std::process::exit(1);
            };
            if let Err(e) = revoke_api_key(&config, &label).await {
                eprintln!("devnetd: failed to revoke api key: {e}");
                std::process::exit(1);
            }
        }
        _ => run_daemon(config).await,
    }
}

/// Generates a bearer token, persists only its hash, and prints the raw
/// token once — this is the only time it is ever recoverable.
async fn issue_api_key(config: &Config, label: &str) -> devnetd::error::Result<()> {
    use rand::Rng;
    let store = ApiKeyStore::open(&config.api_keys_path).await?;
    let token: String = rand::thread_rng().sample_iter(rand::distributions::Alphanumeric).take(40).map(char::from).collect();
    store.issue(label, hash_token(&token))?;
    println!("{token}");
    Ok(())
}

async fn revoke_api_key(config: &Config, label: &str) -> devnetd::error::Result<()> {
    let store = ApiKeyStore::open(&config.api_keys_path).await?;
    store.revoke(label)
}

async fn run_daemon(config: Config) {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
        let _ = shutdown_tx.send(());
    });

    if let Err(e) = devnetd::wiring::run(config, shutdown_rx).await {
        tracing::error!(error = %e, "devnetd exited with error");
        std::process::exit(1);
    }
}
