// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The container runtime boundary.
//!
//! Everything the fleet manager needs from a container engine is expressed
//! through [`ContainerRuntime`]; the rest of the crate never talks to an
//! engine directly. [`docker::DockerRuntime`] implements it against the
//! Docker Engine HTTP API.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod docker;
#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use docker::DockerRuntime;

/// A container as observed from the runtime.
///
/// Never retained long-term; every reconciliation re-queries the runtime, so
/// staleness is bounded by call latency. Field casing follows the engine's
/// wire format, which is also what goes out on the bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerRecord {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
}

impl ContainerRecord {
    /// Hostname other fleet members can reach this container under.
    /// The engine reports names with a leading slash.
    pub fn hostname(&self) -> String {
        self.names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub tty: bool,
}

/// Demultiplexed output of a container's log stream.
#[derive(Debug, Clone, Default)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Primitives the fleet manager is built on.
///
/// `list` is the single read path: presence filters (`key`) or value filters
/// (`key=value`), returning only running containers, and an empty list (not
/// an error) when nothing matches. All mutation is create/start/stop; there
/// is no restart-in-place.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running containers matching all of the given label filters.
    async fn list(&self, label_filters: &[String]) -> Result<Vec<ContainerRecord>>;

    /// Create a container; returns its id.
    async fn create(&self, spec: ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a container, giving it `grace` to exit before the engine kills it.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Return the id of the named network, creating it if missing.
    async fn ensure_network(&self, name: &str) -> Result<String>;

    /// Attach a container to a network.
    async fn connect_network(&self, network_id: &str, container_id: &str) -> Result<()>;

    /// Fetch a container's log output.
    async fn logs(&self, id: &str) -> Result<ContainerLogs>;
}
