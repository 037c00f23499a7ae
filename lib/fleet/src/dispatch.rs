// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The request dispatcher.
//!
//! A single sequential receive loop over one bus subscription. Each message
//! body is a batch of tagged payloads, processed one at a time in arrival
//! order; there is no worker pool, so reconciliations never race each other
//! within one process. Responses go out on one well-known subject.
//!
//! Unknown tags are logged and skipped with no response. A payload that does
//! not decode is logged and skipped too, and never terminates the loop.
//! Operation errors become the `error` field of a still-published response:
//! errors are data, not silence.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::admin::{AdminClient, AppSpec, Listing, ModelLink, ModelSpec};
use crate::error::FleetError;
use crate::fleet::{DesiredState, FleetManager, ScaleReport};
use crate::labels::ModelIdentity;
use crate::messages::{self, DeployModelResponse, Payload, TypeTag};

pub struct Dispatcher {
    fleet: Arc<FleetManager>,
    admin: AdminClient,
}

fn decode<T: DeserializeOwned>(payload: &Payload) -> Option<T> {
    match payload.decode() {
        Ok(request) => Some(request),
        Err(err) => {
            tracing::warn!(tag = %payload.tag, %err, "undecodable request payload, skipping");
            None
        }
    }
}

fn respond<T: Serialize>(tag: TypeTag, body: &T) -> Option<Payload> {
    match Payload::new(tag, body) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::error!(%tag, %err, "could not encode response payload");
            None
        }
    }
}

fn fill_scale(response: &mut DeployModelResponse, report: &ScaleReport) {
    response.desired = report.desired;
    response.observed = report.observed;
    response.started = report.started;
    response.stopped = report.stopped;
}

impl Dispatcher {
    pub fn new(fleet: Arc<FleetManager>, admin: AdminClient) -> Self {
        Self { fleet, admin }
    }

    /// Consume the subscription until cancelled, publishing every response
    /// on `response_subject`.
    pub async fn serve(
        &self,
        client: async_nats::Client,
        mut subscription: async_nats::Subscriber,
        response_subject: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("dispatcher shutting down");
                    break;
                }
                message = subscription.next() => {
                    let Some(message) = message else {
                        tracing::warn!("request subscription closed");
                        break;
                    };
                    self.handle_message(&client, &response_subject, &message.payload).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_message(
        &self,
        client: &async_nats::Client,
        response_subject: &str,
        body: &[u8],
    ) {
        let payloads: Vec<Payload> = match serde_json::from_slice(body) {
            Ok(payloads) => payloads,
            Err(err) => {
                tracing::warn!(%err, "undecodable message body, dropping message");
                return;
            }
        };
        for payload in &payloads {
            let Some(response) = self.dispatch(payload).await else {
                continue;
            };
            let batch = match serde_json::to_vec(&[&response]) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(tag = %response.tag, %err, "could not encode response batch");
                    continue;
                }
            };
            tracing::debug!(tag = %response.tag, subject = response_subject, "publishing response");
            if let Err(err) = client
                .publish(response_subject.to_string(), batch.into())
                .await
            {
                tracing::error!(%err, "could not publish response");
            }
        }
    }

    /// Route one payload to exactly one fleet or admin operation.
    ///
    /// `None` means no response: the tag was unknown or the body did not
    /// decode. Everything else, errors included, produces a response.
    pub async fn dispatch(&self, payload: &Payload) -> Option<Payload> {
        match payload.tag {
            messages::GET_REPLICAS_REQUEST => {
                let request: messages::GetReplicasRequest = decode(payload)?;
                let mut response = request.response();
                match self.fleet.containers_with_label(&request.label).await {
                    Ok(containers) => response.containers = containers,
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::GET_REPLICAS_RESPONSE, &response)
            }
            messages::DEPLOY_MODEL_REQUEST => {
                let request: messages::DeployModelRequest = decode(payload)?;
                let mut response = request.response();
                let desired = DesiredState {
                    identity: ModelIdentity::new(&request.name, &request.version),
                    input_type: request.input_type.clone(),
                    image: request.image.clone(),
                    replicas: request.replicas,
                };
                match self.fleet.set_replica_count(&desired).await {
                    Ok(report) => fill_scale(&mut response, &report),
                    Err(err) => {
                        if let FleetError::ScaleAborted { report, .. } = &err {
                            fill_scale(&mut response, report);
                        }
                        response.error = err.to_string();
                    }
                }
                respond(messages::DEPLOY_MODEL_RESPONSE, &response)
            }
            messages::STOP_MODELS_REQUEST => {
                let request: messages::StopModelsRequest = decode(payload)?;
                let mut response = request.response();
                match self.fleet.stop_models(&request.models).await {
                    Ok(stopped) => response.stopped = stopped as u32,
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::STOP_MODELS_RESPONSE, &response)
            }
            messages::CONTAINER_LOGS_REQUEST => {
                let request: messages::ContainerLogsRequest = decode(payload)?;
                let mut response = request.response();
                match self.fleet.container_logs(&request.container_id).await {
                    Ok(logs) => {
                        response.stdout = logs.stdout;
                        response.stderr = logs.stderr;
                    }
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::CONTAINER_LOGS_RESPONSE, &response)
            }
            messages::REGISTER_APPLICATION_REQUEST => {
                let request: messages::RegisterApplicationRequest = decode(payload)?;
                let mut response = request.response();
                let app = AppSpec {
                    name: request.name.clone(),
                    input_type: request.input_type.clone(),
                    default_output: request.default_output.clone(),
                    latency_slo_micros: request.latency_slo_micros,
                };
                if let Err(err) = self.admin.register_application(&app).await {
                    response.error = err.to_string();
                }
                respond(messages::REGISTER_APPLICATION_RESPONSE, &response)
            }
            messages::LINK_MODEL_TO_APP_REQUEST => {
                let request: messages::LinkModelToAppRequest = decode(payload)?;
                let mut response = request.response();
                let link = ModelLink {
                    app_name: request.app_name.clone(),
                    model_names: request.model_names.clone(),
                };
                if let Err(err) = self.admin.link_model_to_app(&link).await {
                    response.error = err.to_string();
                }
                respond(messages::LINK_MODEL_TO_APP_RESPONSE, &response)
            }
            messages::REGISTER_MODEL_REQUEST => {
                let request: messages::RegisterModelRequest = decode(payload)?;
                let mut response = request.response();
                let model = ModelSpec {
                    model_name: request.model_name.clone(),
                    model_version: request.model_version.clone(),
                    labels: request.labels.clone(),
                    input_type: request.input_type.clone(),
                    container_name: request.container_name.clone(),
                    batch_size: request.batch_size,
                    model_data_path: String::new(),
                };
                if let Err(err) = self.admin.register_model(&model).await {
                    response.error = err.to_string();
                }
                respond(messages::REGISTER_MODEL_RESPONSE, &response)
            }
            messages::LIST_MODELS_REQUEST => {
                let request: messages::ListModelsRequest = decode(payload)?;
                let mut response = request.response();
                match self.admin.list_models(request.verbose).await {
                    Ok(Listing::Names(names)) => response.model_names = names,
                    Ok(Listing::Detailed(infos)) => response.model_descriptions = infos,
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::LIST_MODELS_RESPONSE, &response)
            }
            messages::LIST_APPLICATIONS_REQUEST => {
                let request: messages::ListApplicationsRequest = decode(payload)?;
                let mut response = request.response();
                match self.admin.list_applications(request.verbose).await {
                    Ok(Listing::Names(names)) => response.application_names = names,
                    Ok(Listing::Detailed(infos)) => response.application_descriptions = infos,
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::LIST_APPLICATIONS_RESPONSE, &response)
            }
            messages::GET_APPLICATION_INFO_REQUEST => {
                let request: messages::GetApplicationInfoRequest = decode(payload)?;
                let mut response = request.response();
                match self.admin.get_application_info(&request.name).await {
                    Ok(info) => response.info = Some(info),
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::GET_APPLICATION_INFO_RESPONSE, &response)
            }
            messages::GET_MODEL_INFO_REQUEST => {
                let request: messages::GetModelInfoRequest = decode(payload)?;
                let mut response = request.response();
                match self
                    .admin
                    .get_model_info(&request.model_name, &request.model_version)
                    .await
                {
                    Ok(info) => response.info = Some(info),
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::GET_MODEL_INFO_RESPONSE, &response)
            }
            messages::GET_LINKED_MODELS_REQUEST => {
                let request: messages::GetLinkedModelsRequest = decode(payload)?;
                let mut response = request.response();
                match self.admin.get_linked_models(&request.app_name).await {
                    Ok(models) => response.models = models,
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::GET_LINKED_MODELS_RESPONSE, &response)
            }
            messages::SET_MODEL_VERSION_REQUEST => {
                let request: messages::SetModelVersionRequest = decode(payload)?;
                let mut response = request.response();
                if let Err(err) = self
                    .admin
                    .set_model_version(&request.model_name, &request.model_version)
                    .await
                {
                    response.error = err.to_string();
                }
                respond(messages::SET_MODEL_VERSION_RESPONSE, &response)
            }
            messages::INSPECT_INSTANCE_REQUEST => {
                let request: messages::InspectInstanceRequest = decode(payload)?;
                let mut response = request.response();
                match self.admin.inspect_instance().await {
                    Ok(metrics) => response.metrics = metrics,
                    Err(err) => response.error = err.to_string(),
                }
                respond(messages::INSPECT_INSTANCE_RESPONSE, &response)
            }
            unknown => {
                tracing::warn!(tag = %unknown, "unrecognized payload tag, skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::FleetConfig;
    use crate::labels::{CONTAINER_LABEL, MODEL_CONTAINER_LABEL, QUERY_FRONTEND_LABEL};
    use crate::runtime::ContainerRuntime;
    use crate::runtime::mock::MockRuntime;

    async fn dispatcher(mock: &Arc<MockRuntime>) -> Dispatcher {
        let config = FleetConfig::default();
        let fleet = FleetManager::connect(mock.clone() as Arc<dyn ContainerRuntime>, &config)
            .await
            .unwrap();
        Dispatcher::new(
            Arc::new(fleet),
            AdminClient::new(&config.admin_url, &config.query_url),
        )
    }

    fn seed_frontend(mock: &MockRuntime) {
        mock.seed(
            "query-frontend",
            &[(CONTAINER_LABEL, ""), (QUERY_FRONTEND_LABEL, "")],
        );
    }

    fn deploy_request(msg_id: u64, replicas: u32) -> Payload {
        Payload::new(
            messages::DEPLOY_MODEL_REQUEST,
            &messages::DeployModelRequest {
                msg_id,
                name: "resnet".into(),
                version: "1".into(),
                input_type: "doubles".into(),
                image: "corral/resnet:1".into(),
                replicas,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_tag_produces_no_response() {
        let mock = Arc::new(MockRuntime::new());
        let dispatcher = dispatcher(&mock).await;
        let payload = Payload {
            tag: TypeTag::from_octets(9, 9, 9, 9),
            body: serde_json::json!({}),
        };
        assert!(dispatcher.dispatch(&payload).await.is_none());
    }

    #[tokio::test]
    async fn undecodable_body_produces_no_response() {
        let mock = Arc::new(MockRuntime::new());
        let dispatcher = dispatcher(&mock).await;
        let payload = Payload {
            tag: messages::DEPLOY_MODEL_REQUEST,
            body: serde_json::json!({ "msg_id": "not a number" }),
        };
        assert!(dispatcher.dispatch(&payload).await.is_none());
    }

    #[tokio::test]
    async fn deploy_success_echoes_correlation_id_with_empty_error() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        let dispatcher = dispatcher(&mock).await;

        let reply = dispatcher.dispatch(&deploy_request(42, 2)).await.unwrap();
        assert_eq!(reply.tag, messages::DEPLOY_MODEL_RESPONSE);
        let response: DeployModelResponse = reply.decode().unwrap();
        assert_eq!(response.msg_id, 42);
        assert!(response.error.is_empty());
        assert_eq!(response.started, 2);
        assert_eq!(response.desired, 2);
    }

    #[tokio::test]
    async fn deploy_failure_publishes_error_with_zeroed_results() {
        // no query frontend seeded, so scaling aborts before any create
        let mock = Arc::new(MockRuntime::new());
        let dispatcher = dispatcher(&mock).await;

        let reply = dispatcher.dispatch(&deploy_request(7, 1)).await.unwrap();
        let response: DeployModelResponse = reply.decode().unwrap();
        assert_eq!(response.msg_id, 7);
        assert!(!response.error.is_empty());
        assert_eq!(response.started, 0);
        assert_eq!(response.stopped, 0);
        assert_eq!(mock.counts().creates, 0);
    }

    #[tokio::test]
    async fn get_replicas_returns_matching_containers() {
        let mock = Arc::new(MockRuntime::new());
        seed_frontend(&mock);
        mock.seed(
            "resnet_1-1234",
            &[(CONTAINER_LABEL, ""), (MODEL_CONTAINER_LABEL, "resnet_1")],
        );
        let dispatcher = dispatcher(&mock).await;

        let request = messages::GetReplicasRequest::new(format!(
            "{MODEL_CONTAINER_LABEL}=resnet_1"
        ));
        let msg_id = request.msg_id;
        let payload = Payload::new(messages::GET_REPLICAS_REQUEST, &request).unwrap();
        let reply = dispatcher.dispatch(&payload).await.unwrap();
        let response: messages::GetReplicasResponse = reply.decode().unwrap();
        assert_eq!(response.msg_id, msg_id);
        assert!(response.error.is_empty());
        assert_eq!(response.containers.len(), 1);
        assert_eq!(response.containers[0].hostname(), "resnet_1-1234");
    }

    #[tokio::test]
    async fn stop_models_reports_count() {
        let mock = Arc::new(MockRuntime::new());
        for (name, version) in [("foo", "v1"), ("foo", "v2"), ("bar", "v1")] {
            let identity = ModelIdentity::new(name, version);
            mock.seed(
                &format!("{}-0", identity.encode()),
                &[
                    (CONTAINER_LABEL, ""),
                    (MODEL_CONTAINER_LABEL, &identity.encode()),
                ],
            );
        }
        let dispatcher = dispatcher(&mock).await;

        let request = messages::StopModelsRequest {
            msg_id: 9,
            models: HashMap::from([("foo".to_string(), vec!["v1".to_string()])]),
        };
        let payload = Payload::new(messages::STOP_MODELS_REQUEST, &request).unwrap();
        let reply = dispatcher.dispatch(&payload).await.unwrap();
        let response: messages::StopModelsResponse = reply.decode().unwrap();
        assert_eq!(response.msg_id, 9);
        assert!(response.error.is_empty());
        assert_eq!(response.stopped, 1);
        assert_eq!(mock.counts().stops, 1);
    }

    #[tokio::test]
    async fn inspect_instance_passes_frontend_metrics_through() {
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(|| async {
                axum::Json(serde_json::json!({ "p99_latency_micros": 1250 }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mock = Arc::new(MockRuntime::new());
        let config = FleetConfig::default();
        let fleet = FleetManager::connect(mock as Arc<dyn ContainerRuntime>, &config)
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(fleet),
            AdminClient::new(&config.admin_url, &format!("http://{addr}")),
        );

        let request = messages::InspectInstanceRequest { msg_id: 5 };
        let payload = Payload::new(messages::INSPECT_INSTANCE_REQUEST, &request).unwrap();
        let reply = dispatcher.dispatch(&payload).await.unwrap();
        assert_eq!(reply.tag, messages::INSPECT_INSTANCE_RESPONSE);
        let response: messages::InspectInstanceResponse = reply.decode().unwrap();
        assert_eq!(response.msg_id, 5);
        assert!(response.error.is_empty());
        assert_eq!(response.metrics["p99_latency_micros"], 1250);
    }

    #[tokio::test]
    async fn container_logs_round_trip() {
        let mock = Arc::new(MockRuntime::new());
        let id = mock.seed("resnet_1-0", &[(CONTAINER_LABEL, "")]);
        let dispatcher = dispatcher(&mock).await;

        let request = messages::ContainerLogsRequest {
            msg_id: 11,
            container_id: id.clone(),
        };
        let payload = Payload::new(messages::CONTAINER_LOGS_REQUEST, &request).unwrap();
        let reply = dispatcher.dispatch(&payload).await.unwrap();
        let response: messages::ContainerLogsResponse = reply.decode().unwrap();
        assert!(response.error.is_empty());
        assert_eq!(response.stdout, format!("logs for {id}\n"));
    }
}
