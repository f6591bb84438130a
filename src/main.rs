use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use loopback_bench::{scenario, BenchConfig, BenchError, Report};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BenchConfig::parse();

    tokio::select! {
        result = run_all(&config) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping benchmarks...");
        }
    }

    Ok(())
}

async fn run_all(config: &BenchConfig) -> Result<Vec<Report>, BenchError> {
    let mut reports = Vec::new();

    for options in config.runs() {
        match scenario::run(&options).await {
            Ok(report) => {
                info!(
                    scenario = %report.scenario,
                    parallelism = report.parallelism,
                    elapsed = ?report.elapsed,
                    rps = report.requests_per_sec(),
                    "benchmark run finished"
                );
                println!("{report}");
                reports.push(report);
            }
            Err(err) => {
                error!(
                    scenario = %options.scenario,
                    parallelism = options.parallelism,
                    %err,
                    "benchmark run failed"
                );
                return Err(err);
            }
        }
    }

    Ok(reports)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
