// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The fleet reconciler.
//!
//! Owns every mutation of the container fleet: scale-up, scale-down, and
//! versioned teardown, all keyed by [`ModelIdentity`]. The replica set for
//! an identity only ever grows or shrinks; there is no update-in-place.
//!
//! Reconciliation is best effort and not atomic: a failure mid-scale keeps
//! the progress already made and reports it in [`ScaleReport`]. Concurrent
//! invocation for the same identity from more than one controller instance
//! can overshoot or undershoot the target; a single active instance is a
//! precondition (see [`crate::leadership`]).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::labels::{
    CONTAINER_LABEL, MODEL_CONTAINER_LABEL, ModelIdentity, QUERY_FRONTEND_LABEL,
};
use crate::runtime::{ContainerLogs, ContainerRecord, ContainerRuntime, ContainerSpec};

/// Environment injected into every model replica. These four variables are
/// the entire contract between a replica and the rest of the fleet.
const ENV_MODEL_NAME: &str = "CORRAL_MODEL_NAME";
const ENV_MODEL_VERSION: &str = "CORRAL_MODEL_VERSION";
const ENV_QUERY_FRONTEND: &str = "CORRAL_QUERY_FRONTEND";
const ENV_INPUT_TYPE: &str = "CORRAL_INPUT_TYPE";

/// Replica target supplied per reconciliation call. Not persisted anywhere;
/// the caller resupplies it every time.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub identity: ModelIdentity,
    pub input_type: String,
    pub image: String,
    pub replicas: u32,
}

/// What a reconciliation actually did versus what was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleReport {
    pub identity: ModelIdentity,
    pub desired: u32,
    pub observed: u32,
    pub started: u32,
    pub stopped: u32,
}

/// The controller object owning the runtime connection, the fleet network
/// id, and the default label set. Created once at startup and shared.
pub struct FleetManager {
    runtime: Arc<dyn ContainerRuntime>,
    network_id: String,
    default_labels: HashMap<String, String>,
    stop_timeout: Duration,
}

impl FleetManager {
    /// Ensure the shared fleet network exists and build the controller.
    ///
    /// The system-identity label is folded into the default label set so
    /// every container created here is discoverable as controller-managed.
    pub async fn connect(
        runtime: Arc<dyn ContainerRuntime>,
        config: &FleetConfig,
    ) -> Result<Self, FleetError> {
        let network_id = runtime
            .ensure_network(&config.network)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "network setup",
                target: config.network.clone(),
                source,
            })?;
        let mut default_labels = config.default_labels.clone();
        default_labels.insert(CONTAINER_LABEL.to_string(), String::new());
        Ok(Self {
            runtime,
            network_id,
            default_labels,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        })
    }

    /// List running containers carrying the given label filter. The single
    /// read primitive everything else is built from.
    pub async fn containers_with_label(
        &self,
        label: &str,
    ) -> Result<Vec<ContainerRecord>, FleetError> {
        let filters = [label.to_string()];
        self.runtime
            .list(&filters)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "container list",
                target: label.to_string(),
                source,
            })
    }

    /// Current replicas of a model identity.
    pub async fn replicas(
        &self,
        identity: &ModelIdentity,
    ) -> Result<Vec<ContainerRecord>, FleetError> {
        self.containers_with_label(&identity.replica_filter()).await
    }

    /// Drive the replica set for `desired.identity` toward
    /// `desired.replicas` by starting or stopping containers sequentially.
    ///
    /// Aborts on the first runtime error; progress already made is kept and
    /// returned inside [`FleetError::ScaleAborted`]. Which replicas survive
    /// a shrink is whatever order the runtime listed them in.
    pub async fn set_replica_count(
        &self,
        desired: &DesiredState,
    ) -> Result<ScaleReport, FleetError> {
        let current = self.replicas(&desired.identity).await?;
        let observed = current.len() as u32;
        let mut report = ScaleReport {
            identity: desired.identity.clone(),
            desired: desired.replicas,
            observed,
            started: 0,
            stopped: 0,
        };

        match observed.cmp(&desired.replicas) {
            Ordering::Less => {
                let missing = desired.replicas - observed;
                tracing::info!(
                    identity = %desired.identity,
                    observed,
                    adding = missing,
                    "scaling up"
                );
                for _ in 0..missing {
                    match self
                        .start_container(&desired.identity, &desired.input_type, &desired.image)
                        .await
                    {
                        Ok(_) => report.started += 1,
                        Err(source) => {
                            return Err(FleetError::ScaleAborted {
                                report,
                                source: Box::new(source),
                            });
                        }
                    }
                }
            }
            Ordering::Greater => {
                let extra = observed - desired.replicas;
                tracing::info!(
                    identity = %desired.identity,
                    observed,
                    removing = extra,
                    "scaling down"
                );
                for container in current.iter().take(extra as usize) {
                    match self.stop_container(&container.id).await {
                        Ok(()) => report.stopped += 1,
                        Err(source) => {
                            return Err(FleetError::ScaleAborted {
                                report,
                                source: Box::new(source),
                            });
                        }
                    }
                }
            }
            Ordering::Equal => {
                tracing::debug!(identity = %desired.identity, observed, "replica count already satisfied");
            }
        }

        Ok(report)
    }

    /// Create, wire up, and start one model replica; returns its id.
    ///
    /// Requires the singleton query frontend to be running. A failure after
    /// create leaves the created container behind for the caller to clean
    /// up; nothing here retries.
    pub async fn start_container(
        &self,
        identity: &ModelIdentity,
        input_type: &str,
        image: &str,
    ) -> Result<String, FleetError> {
        let frontends = self.containers_with_label(QUERY_FRONTEND_LABEL).await?;
        let Some(frontend) = frontends.first() else {
            tracing::warn!(identity = %identity, "no query frontend running");
            return Err(FleetError::NoQueryFrontend);
        };
        let frontend_host = frontend.hostname();

        let encoded = identity.encode();
        let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
        let container_name = format!("{encoded}-{suffix}");

        let mut labels = self.default_labels.clone();
        labels.insert(MODEL_CONTAINER_LABEL.to_string(), encoded);

        let spec = ContainerSpec {
            name: container_name.clone(),
            image: image.to_string(),
            env: vec![
                format!("{ENV_MODEL_NAME}={}", identity.name),
                format!("{ENV_MODEL_VERSION}={}", identity.version),
                format!("{ENV_QUERY_FRONTEND}={frontend_host}"),
                format!("{ENV_INPUT_TYPE}={input_type}"),
            ],
            labels,
            tty: true,
        };

        let id = self
            .runtime
            .create(spec)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "container create",
                target: container_name.clone(),
                source,
            })?;
        tracing::debug!(identity = %identity, container = %id, name = %container_name, "created container");

        self.runtime
            .connect_network(&self.network_id, &id)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "network connect",
                target: id.clone(),
                source,
            })?;

        self.runtime
            .start(&id)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "container start",
                target: id.clone(),
                source,
            })?;
        tracing::info!(identity = %identity, container = %id, frontend = %frontend_host, "started replica");

        Ok(id)
    }

    /// Stop every replica whose decoded identity appears in `models`
    /// (name → versions). A model container carrying a label that does not
    /// decode fails the whole call: that is a fleet invariant violation,
    /// not something to skip over. Returns how many containers were stopped.
    pub async fn stop_models(
        &self,
        models: &HashMap<String, Vec<String>>,
    ) -> Result<usize, FleetError> {
        let containers = self.containers_with_label(MODEL_CONTAINER_LABEL).await?;
        let mut stopped = 0;
        for container in &containers {
            let label = container
                .labels
                .get(MODEL_CONTAINER_LABEL)
                .cloned()
                .unwrap_or_default();
            let identity = ModelIdentity::decode(&label)?;
            let requested = models
                .get(&identity.name)
                .is_some_and(|versions| versions.iter().any(|v| *v == identity.version));
            if requested {
                self.stop_container(&container.id).await?;
                tracing::info!(identity = %identity, container = %container.id, "stopped replica");
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Stop every model replica in the fleet, leaving infrastructure up.
    pub async fn stop_all_model_containers(&self) -> Result<usize, FleetError> {
        self.stop_matching(MODEL_CONTAINER_LABEL).await
    }

    /// Fleet-wide teardown: stop every controller-managed container,
    /// infrastructure included.
    pub async fn stop_all(&self) -> Result<usize, FleetError> {
        self.stop_matching(CONTAINER_LABEL).await
    }

    /// Fetch a container's demultiplexed log output.
    pub async fn container_logs(&self, id: &str) -> Result<ContainerLogs, FleetError> {
        self.runtime
            .logs(id)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "container logs",
                target: id.to_string(),
                source,
            })
    }

    async fn stop_matching(&self, label: &str) -> Result<usize, FleetError> {
        let containers = self.containers_with_label(label).await?;
        let mut stopped = 0;
        for container in &containers {
            self.stop_container(&container.id).await?;
            stopped += 1;
        }
        tracing::info!(label, stopped, "stopped containers");
        Ok(stopped)
    }

    async fn stop_container(&self, id: &str) -> Result<(), FleetError> {
        self.runtime
            .stop(id, self.stop_timeout)
            .await
            .map_err(|source| FleetError::Runtime {
                op: "container stop",
                target: id.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    async fn manager(mock: &Arc<MockRuntime>) -> FleetManager {
        let config = FleetConfig {
            default_labels: HashMap::from([("team".to_string(), "ml".to_string())]),
            ..FleetConfig::default()
        };
        FleetManager::connect(mock.clone() as Arc<dyn ContainerRuntime>, &config)
            .await
            .unwrap()
    }

    fn seed_frontend(mock: &MockRuntime) {
        mock.seed(
            "query-frontend",
            &[(CONTAINER_LABEL, ""), (QUERY_FRONTEND_LABEL, "")],
        );
    }

    fn seed_replica(mock: &MockRuntime, name: &str, version: &str) -> String {
        let identity = ModelIdentity::new(name, version);
        mock.seed(
            &format!("{}-{}", identity.encode(), rand::random::<u16>()),
            &[
                (CONTAINER_LABEL, ""),
                (MODEL_CONTAINER_LABEL, &identity.encode()),
            ],
        )
    }

    fn desired(replicas: u32) -> DesiredState {
        DesiredState {
            identity: ModelIdentity::new("resnet", "1"),
            input_type: "doubles".to_string(),
            image: "corral/resnet:1".to_string(),
            replicas,
        }
    }

    #[tokio::test]
    async fn scale_is_a_noop_when_target_met() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        seed_replica(&mock, "resnet", "1");
        seed_replica(&mock, "resnet", "1");
        let fleet = manager(&mock).await;

        let report = fleet.set_replica_count(&desired(2)).await.unwrap();
        assert_eq!((report.started, report.stopped), (0, 0));
        assert_eq!(report.observed, 2);
        assert_eq!(mock.counts(), Default::default());
    }

    #[tokio::test]
    async fn scale_up_from_zero_starts_each_replica() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        let fleet = manager(&mock).await;

        let report = fleet.set_replica_count(&desired(3)).await.unwrap();
        assert_eq!(report.started, 3);
        assert_eq!(report.observed, 0);
        let counts = mock.counts();
        assert_eq!((counts.creates, counts.starts, counts.stops), (3, 3, 0));

        // every replica gets a fresh unique name under the encoded prefix
        let specs = mock.created_specs();
        let names: std::collections::HashSet<_> =
            specs.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("resnet_1-")));
    }

    #[tokio::test]
    async fn scale_down_stops_the_extras() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        for _ in 0..5 {
            seed_replica(&mock, "resnet", "1");
        }
        let fleet = manager(&mock).await;

        let report = fleet.set_replica_count(&desired(2)).await.unwrap();
        assert_eq!(report.stopped, 3);
        let counts = mock.counts();
        assert_eq!((counts.creates, counts.stops), (0, 3));
        assert_eq!(fleet.replicas(&desired(2).identity).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scale_up_abort_keeps_partial_progress() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        seed_replica(&mock, "resnet", "1");
        let fleet = manager(&mock).await;

        // first start succeeds, then creates begin to fail
        let report = fleet.set_replica_count(&desired(2)).await.unwrap();
        assert_eq!(report.started, 1);
        mock.fail_creates(true);
        let err = fleet.set_replica_count(&desired(4)).await.unwrap_err();
        match err {
            FleetError::ScaleAborted { report, .. } => {
                assert_eq!(report.observed, 2);
                assert_eq!(report.started, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // the replicas from before the failure are still running
        assert_eq!(fleet.replicas(&desired(2).identity).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scale_down_abort_keeps_partial_report() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        for _ in 0..5 {
            seed_replica(&mock, "resnet", "1");
        }
        let fleet = manager(&mock).await;

        mock.fail_stops(true);
        let err = fleet.set_replica_count(&desired(2)).await.unwrap_err();
        match err {
            FleetError::ScaleAborted { report, .. } => {
                assert_eq!(report.observed, 5);
                assert_eq!(report.desired, 2);
                assert_eq!(report.stopped, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // nothing was torn down before the failure surfaced
        assert_eq!(fleet.replicas(&desired(2).identity).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn start_container_requires_query_frontend() {
        let mock = Arc::new(MockRuntime::new());
        let fleet = manager(&mock).await;

        let err = fleet
            .start_container(&ModelIdentity::new("resnet", "1"), "doubles", "img")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NoQueryFrontend));
        assert_eq!(mock.counts().creates, 0);
    }

    #[tokio::test]
    async fn replica_environment_is_exactly_the_four_variables() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        let fleet = manager(&mock).await;

        fleet
            .start_container(&ModelIdentity::new("resnet", "1"), "doubles", "img")
            .await
            .unwrap();
        let specs = mock.created_specs();
        assert_eq!(specs.len(), 1);
        let env = &specs[0].env;
        assert_eq!(env.len(), 4);
        assert!(env.contains(&"CORRAL_MODEL_NAME=resnet".to_string()));
        assert!(env.contains(&"CORRAL_MODEL_VERSION=1".to_string()));
        assert!(env.contains(&"CORRAL_QUERY_FRONTEND=query-frontend".to_string()));
        assert!(env.contains(&"CORRAL_INPUT_TYPE=doubles".to_string()));

        // created containers carry both the system and the model labels
        let labels = &specs[0].labels;
        assert!(labels.contains_key(CONTAINER_LABEL));
        assert_eq!(labels.get(MODEL_CONTAINER_LABEL).unwrap(), "resnet_1");
        assert_eq!(labels.get("team").unwrap(), "ml");
    }

    #[tokio::test]
    async fn stop_models_only_touches_requested_versions() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        seed_replica(&mock, "foo", "v1");
        seed_replica(&mock, "foo", "v2");
        seed_replica(&mock, "bar", "v1");
        let fleet = manager(&mock).await;

        let request = HashMap::from([("foo".to_string(), vec!["v1".to_string()])]);
        let stopped = fleet.stop_models(&request).await.unwrap();
        assert_eq!(stopped, 1);
        assert!(fleet
            .replicas(&ModelIdentity::new("foo", "v1"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            fleet
                .replicas(&ModelIdentity::new("foo", "v2"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            fleet
                .replicas(&ModelIdentity::new("bar", "v1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn stop_models_fails_fast_on_malformed_label() {
        let mock = Arc::new(MockRuntime::new());
        mock.seed(
            "broken",
            &[(CONTAINER_LABEL, ""), (MODEL_CONTAINER_LABEL, "not-a-label")],
        );
        let fleet = manager(&mock).await;

        let request = HashMap::from([("foo".to_string(), vec!["v1".to_string()])]);
        let err = fleet.stop_models(&request).await.unwrap_err();
        assert!(matches!(err, FleetError::MalformedLabel(_)));
        assert_eq!(mock.counts().stops, 0);
    }

    #[tokio::test]
    async fn stop_all_includes_infrastructure() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        seed_replica(&mock, "foo", "v1");
        let fleet = manager(&mock).await;

        let stopped = fleet.stop_all().await.unwrap();
        assert_eq!(stopped, 2);
        assert!(mock.running().is_empty());
    }

    #[tokio::test]
    async fn stop_all_model_containers_leaves_infrastructure() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        seed_replica(&mock, "foo", "v1");
        seed_replica(&mock, "bar", "v1");
        let fleet = manager(&mock).await;

        let stopped = fleet.stop_all_model_containers().await.unwrap();
        assert_eq!(stopped, 2);
        assert_eq!(mock.running(), vec!["query-frontend".to_string()]);
    }
}
