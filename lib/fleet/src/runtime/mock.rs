// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory container runtime for tests.
//!
//! Tracks a fleet of fake containers, counts every primitive call, and can
//! be told to fail creates or stops to exercise abort paths.

use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ContainerLogs, ContainerRecord, ContainerRuntime, ContainerSpec};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CallCounts {
    pub creates: u32,
    pub starts: u32,
    pub stops: u32,
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    specs: Vec<ContainerSpec>,
    counts: CallCounts,
    fail_creates: bool,
    fail_stops: bool,
    next_id: u64,
}

struct MockContainer {
    record: ContainerRecord,
    running: bool,
}

#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running container with the given name and labels.
    pub fn seed(&self, name: &str, labels: &[(&str, &str)]) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        let record = ContainerRecord {
            id: id.clone(),
            names: vec![format!("/{name}")],
            image: "seeded".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        state.containers.push(MockContainer {
            record,
            running: true,
        });
        id
    }

    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().fail_creates = fail;
    }

    pub fn fail_stops(&self, fail: bool) {
        self.state.lock().fail_stops = fail;
    }

    pub fn counts(&self) -> CallCounts {
        self.state.lock().counts
    }

    /// Specs of every container created through the runtime, in order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().specs.clone()
    }

    /// Names of containers currently running.
    pub fn running(&self) -> Vec<String> {
        self.state
            .lock()
            .containers
            .iter()
            .filter(|c| c.running)
            .map(|c| c.record.hostname())
            .collect()
    }
}

fn matches_filter(record: &ContainerRecord, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => record.labels.get(key).is_some_and(|v| v == value),
        None => record.labels.contains_key(filter),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list(&self, label_filters: &[String]) -> Result<Vec<ContainerRecord>> {
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|c| c.running)
            .filter(|c| label_filters.iter().all(|f| matches_filter(&c.record, f)))
            .map(|c| c.record.clone())
            .collect())
    }

    async fn create(&self, spec: ContainerSpec) -> Result<String> {
        let mut state = self.state.lock();
        if state.fail_creates {
            bail!("injected create failure");
        }
        state.counts.creates += 1;
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        let record = ContainerRecord {
            id: id.clone(),
            names: vec![format!("/{}", spec.name)],
            image: spec.image.clone(),
            labels: spec.labels.clone(),
        };
        state.containers.push(MockContainer {
            record,
            running: false,
        });
        state.specs.push(spec);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.counts.starts += 1;
        match state.containers.iter_mut().find(|c| c.record.id == id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => bail!("no such container {id}"),
        }
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_stops {
            bail!("injected stop failure");
        }
        state.counts.stops += 1;
        match state.containers.iter_mut().find(|c| c.record.id == id) {
            Some(container) => {
                container.running = false;
                Ok(())
            }
            None => bail!("no such container {id}"),
        }
    }

    async fn ensure_network(&self, name: &str) -> Result<String> {
        Ok(format!("net-{name}"))
    }

    async fn connect_network(&self, _network_id: &str, _container_id: &str) -> Result<()> {
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<ContainerLogs> {
        let state = self.state.lock();
        if state.containers.iter().any(|c| c.record.id == id) {
            Ok(ContainerLogs {
                stdout: format!("logs for {id}\n"),
                stderr: String::new(),
            })
        } else {
            bail!("no such container {id}")
        }
    }
}
