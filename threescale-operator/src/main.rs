use std::process::exit;

use anyhow::Context;
use controller::main_controller;
use kube::Client;
use log::info;
use threescale_operator_core::resources::operator::OperatorRelease;
use tokio_util::sync::CancellationToken;

mod context;
mod controller;
mod dependency;
mod events;
mod helpers;
mod portal;
mod status;
mod upgrade;

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    configure_logger();

    let release = get_release();
    let client = create_client().await;
    let cancellation = CancellationToken::new();

    info!(
        "Starting 3scale operator {} (product {})...",
        release.version, release.product_version
    );

    let shutdown = tokio::spawn(cancel_on_signal(cancellation.clone()));

    main_controller(client, release, cancellation.clone()).await;

    cancellation.cancel();
    shutdown.abort();

    Ok(())
}

/// Abandons in-flight cluster calls once the operator is asked to stop.
async fn cancel_on_signal(cancellation: CancellationToken) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Couldn't listen for the shutdown signal")?;
    info!("Shutdown requested, cancelling in-flight calls...");
    cancellation.cancel();

    Ok(())
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            log::error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

fn get_release() -> OperatorRelease {
    match OperatorRelease::from_env() {
        Ok(release) => release,
        Err(error) => {
            log::error!("Couldn't retrieve release info! {error:?}");
            exit(7)
        }
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
