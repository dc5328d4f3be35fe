use std::path::PathBuf;
use std::sync::Arc;

use mailshake::config::ShakeConfig;
use mailshake::engine::MailShaker;
use mailshake::observer::ConsoleObserver;

fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| {
        eprintln!("Usage: mailshake <config.json>");
        std::process::exit(2);
    });

    let config = ShakeConfig::from_file(&config_path)?;
    let mut shaker = MailShaker::from_config(config).with_observer(Arc::new(ConsoleObserver));

    eprintln!("mailshake v{} — {}", env!("CARGO_PKG_VERSION"), shaker.name());
    let summary = shaker.shake()?;
    eprintln!("{summary}");
    Ok(())
}
