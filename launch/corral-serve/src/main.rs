// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Corral control-plane server.
//!
//! Bootstraps the fleet manager against the container engine, subscribes to
//! the request subject, and runs the dispatcher loop and the ingest
//! endpoint until ctrl-c.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use corral_fleet::admin::AdminClient;
use corral_fleet::dispatch::Dispatcher;
use corral_fleet::leadership::LeaderGuard;
use corral_fleet::runtime::{ContainerRuntime, DockerRuntime};
use corral_fleet::{FleetConfig, FleetManager, ingest, logging};

#[derive(Parser, Debug)]
#[command(name = "corral-serve", about = "Model container fleet control plane")]
struct Flags {
    /// Container engine address (tcp:// or http(s)://).
    #[arg(long, env = "CORRAL_FLEET_DOCKER_HOST")]
    docker_host: Option<String>,

    /// Message bus address.
    #[arg(long, env = "CORRAL_FLEET_NATS_URL")]
    nats_url: Option<String>,

    /// Bind address of the model descriptor ingest endpoint.
    #[arg(long, env = "CORRAL_FLEET_INGEST_ADDR")]
    ingest_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let flags = Flags::parse();

    let mut config = FleetConfig::from_settings()?;
    if let Some(docker_host) = flags.docker_host {
        config.docker_host = docker_host;
    }
    if let Some(nats_url) = flags.nats_url {
        config.nats_url = nats_url;
    }
    if let Some(ingest_addr) = flags.ingest_addr {
        config.ingest_addr = ingest_addr;
    }

    run(config).await
}

async fn run(config: FleetConfig) -> Result<()> {
    // hold the leadership claim for the life of the serve loop
    let _leader = if config.etcd_endpoints.is_empty() {
        tracing::warn!(
            "no etcd endpoints configured; assuming this is the only active controller instance"
        );
        None
    } else {
        Some(
            LeaderGuard::acquire(
                &config.etcd_endpoints,
                &config.leader_key,
                config.leader_lease_secs,
            )
            .await?,
        )
    };

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(&config.docker_host)?);
    let fleet = Arc::new(FleetManager::connect(runtime, &config).await?);
    let admin = AdminClient::new(&config.admin_url, &config.query_url);

    let nats = async_nats::connect(&config.nats_url).await?;
    let subscription = nats.subscribe(config.request_subject.clone()).await?;
    tracing::info!(
        subject = %config.request_subject,
        nats = %config.nats_url,
        "listening for fleet requests"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let ingest_task = tokio::spawn(ingest::serve(
        config.ingest_addr.clone(),
        cancel.child_token(),
    ));

    let dispatcher = Dispatcher::new(fleet, admin);
    dispatcher
        .serve(nats, subscription, config.response_subject.clone(), cancel.clone())
        .await?;

    cancel.cancel();
    ingest_task.await??;
    Ok(())
}
