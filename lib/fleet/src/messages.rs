// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bus payload contract.
//!
//! Each request/response pair is identified by a [`TypeTag`] from the dotted
//! numeric scheme `2.2.0.N` (requests even, responses odd). A bus message
//! body is a JSON array of [`Payload`] objects; each payload carries its tag
//! and an operation-specific body. Every request has a `msg_id` correlation
//! id which the response echoes back, alongside an `error` string that is
//! empty on success.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::admin::{ApplicationInfo, ModelInfo};
use crate::runtime::ContainerRecord;

/// Numeric payload type identifier, packed from four dotted octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(pub u32);

impl TypeTag {
    pub const fn from_octets(a: u8, b: u8, c: u8, d: u8) -> Self {
        TypeTag(u32::from_be_bytes([a, b, c, d]))
    }

    pub const fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FromStr for TypeTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let &[a, b, c, d] = parts.as_slice() else {
            anyhow::bail!("type tag '{s}' must have exactly four dotted parts");
        };
        let parse = |p: &str| {
            p.parse::<u8>()
                .map_err(|_| anyhow::anyhow!("type tag part '{p}' is not an octet"))
        };
        Ok(TypeTag::from_octets(
            parse(a)?,
            parse(b)?,
            parse(c)?,
            parse(d)?,
        ))
    }
}

pub const GET_REPLICAS_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 0);
pub const GET_REPLICAS_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 1);
pub const DEPLOY_MODEL_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 2);
pub const DEPLOY_MODEL_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 3);
pub const REGISTER_APPLICATION_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 4);
pub const REGISTER_APPLICATION_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 5);
pub const LINK_MODEL_TO_APP_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 6);
pub const LINK_MODEL_TO_APP_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 7);
pub const REGISTER_MODEL_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 10);
pub const REGISTER_MODEL_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 11);
pub const LIST_MODELS_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 12);
pub const LIST_MODELS_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 13);
pub const LIST_APPLICATIONS_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 14);
pub const LIST_APPLICATIONS_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 15);
pub const GET_APPLICATION_INFO_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 16);
pub const GET_APPLICATION_INFO_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 17);
pub const GET_MODEL_INFO_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 18);
pub const GET_MODEL_INFO_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 19);
pub const GET_LINKED_MODELS_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 20);
pub const GET_LINKED_MODELS_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 21);
pub const STOP_MODELS_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 22);
pub const STOP_MODELS_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 23);
pub const SET_MODEL_VERSION_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 24);
pub const SET_MODEL_VERSION_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 25);
pub const CONTAINER_LOGS_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 26);
pub const CONTAINER_LOGS_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 27);
pub const INSPECT_INSTANCE_REQUEST: TypeTag = TypeTag::from_octets(2, 2, 0, 28);
pub const INSPECT_INSTANCE_RESPONSE: TypeTag = TypeTag::from_octets(2, 2, 0, 29);

/// One tagged payload object inside a bus message batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub tag: TypeTag,
    pub body: serde_json::Value,
}

impl Payload {
    pub fn new<T: Serialize>(tag: TypeTag, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            tag,
            body: serde_json::to_value(body)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

fn new_msg_id() -> u64 {
    rand::random()
}

macro_rules! correlate {
    ($request:ident => $response:ident) => {
        impl $request {
            /// Response pre-populated with this request's correlation id,
            /// zero-valued results, and an empty error string.
            pub fn response(&self) -> $response {
                $response {
                    msg_id: self.msg_id,
                    ..Default::default()
                }
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReplicasRequest {
    pub msg_id: u64,
    /// Container label filter to search for, presence or `key=value` form.
    pub label: String,
}

impl GetReplicasRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            msg_id: new_msg_id(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetReplicasResponse {
    pub msg_id: u64,
    pub containers: Vec<ContainerRecord>,
    pub error: String,
}

correlate!(GetReplicasRequest => GetReplicasResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployModelRequest {
    pub msg_id: u64,
    pub name: String,
    pub version: String,
    pub input_type: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployModelResponse {
    pub msg_id: u64,
    pub desired: u32,
    pub observed: u32,
    pub started: u32,
    pub stopped: u32,
    pub error: String,
}

correlate!(DeployModelRequest => DeployModelResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterApplicationRequest {
    pub msg_id: u64,
    pub name: String,
    pub input_type: String,
    pub default_output: String,
    pub latency_slo_micros: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterApplicationResponse {
    pub msg_id: u64,
    pub error: String,
}

correlate!(RegisterApplicationRequest => RegisterApplicationResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkModelToAppRequest {
    pub msg_id: u64,
    pub app_name: String,
    pub model_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkModelToAppResponse {
    pub msg_id: u64,
    pub error: String,
}

correlate!(LinkModelToAppRequest => LinkModelToAppResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterModelRequest {
    pub msg_id: u64,
    pub model_name: String,
    pub model_version: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub input_type: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub batch_size: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterModelResponse {
    pub msg_id: u64,
    pub error: String,
}

correlate!(RegisterModelRequest => RegisterModelResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListModelsRequest {
    pub msg_id: u64,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub msg_id: u64,
    pub model_names: Vec<String>,
    pub model_descriptions: Vec<ModelInfo>,
    pub error: String,
}

correlate!(ListModelsRequest => ListModelsResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListApplicationsRequest {
    pub msg_id: u64,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListApplicationsResponse {
    pub msg_id: u64,
    pub application_names: Vec<String>,
    pub application_descriptions: Vec<ApplicationInfo>,
    pub error: String,
}

correlate!(ListApplicationsRequest => ListApplicationsResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetApplicationInfoRequest {
    pub msg_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetApplicationInfoResponse {
    pub msg_id: u64,
    pub info: Option<ApplicationInfo>,
    pub error: String,
}

correlate!(GetApplicationInfoRequest => GetApplicationInfoResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetModelInfoRequest {
    pub msg_id: u64,
    pub model_name: String,
    pub model_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetModelInfoResponse {
    pub msg_id: u64,
    pub info: Option<ModelInfo>,
    pub error: String,
}

correlate!(GetModelInfoRequest => GetModelInfoResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLinkedModelsRequest {
    pub msg_id: u64,
    pub app_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetLinkedModelsResponse {
    pub msg_id: u64,
    pub models: Vec<String>,
    pub error: String,
}

correlate!(GetLinkedModelsRequest => GetLinkedModelsResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopModelsRequest {
    pub msg_id: u64,
    /// Model name to the versions of it that should be torn down.
    pub models: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopModelsResponse {
    pub msg_id: u64,
    pub stopped: u32,
    pub error: String,
}

correlate!(StopModelsRequest => StopModelsResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetModelVersionRequest {
    pub msg_id: u64,
    pub model_name: String,
    pub model_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetModelVersionResponse {
    pub msg_id: u64,
    pub error: String,
}

correlate!(SetModelVersionRequest => SetModelVersionResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerLogsRequest {
    pub msg_id: u64,
    pub container_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerLogsResponse {
    pub msg_id: u64,
    pub stdout: String,
    pub stderr: String,
    pub error: String,
}

correlate!(ContainerLogsRequest => ContainerLogsResponse);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectInstanceRequest {
    pub msg_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectInstanceResponse {
    pub msg_id: u64,
    /// Metrics snapshot of the query frontend, passed through verbatim.
    pub metrics: serde_json::Value,
    pub error: String,
}

correlate!(InspectInstanceRequest => InspectInstanceResponse);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_dotted_form_round_trip() {
        assert_eq!(GET_REPLICAS_REQUEST.to_string(), "2.2.0.0");
        assert_eq!(
            "2.2.0.3".parse::<TypeTag>().unwrap(),
            DEPLOY_MODEL_RESPONSE
        );
        for tag in [DEPLOY_MODEL_REQUEST, CONTAINER_LOGS_RESPONSE] {
            assert_eq!(tag.to_string().parse::<TypeTag>().unwrap(), tag);
        }
    }

    #[test]
    fn tag_parse_rejects_bad_forms() {
        for s in ["2.2.0", "2.2.0.0.1", "2.2.0.999", "a.b.c.d", ""] {
            assert!(s.parse::<TypeTag>().is_err(), "{s:?} parsed");
        }
    }

    #[test]
    fn request_and_response_tags_pair_up() {
        // requests even, responses odd, one apart
        for (req, resp) in [
            (GET_REPLICAS_REQUEST, GET_REPLICAS_RESPONSE),
            (DEPLOY_MODEL_REQUEST, DEPLOY_MODEL_RESPONSE),
            (STOP_MODELS_REQUEST, STOP_MODELS_RESPONSE),
            (CONTAINER_LOGS_REQUEST, CONTAINER_LOGS_RESPONSE),
        ] {
            assert_eq!(req.octets()[3] % 2, 0);
            assert_eq!(resp.0, req.0 + 1);
        }
    }

    #[test]
    fn response_copies_correlation_id() {
        let request = GetReplicasRequest::new("io.corral.container");
        let response = request.response();
        assert_eq!(response.msg_id, request.msg_id);
        assert!(response.error.is_empty());
        assert!(response.containers.is_empty());
    }

    #[test]
    fn payload_round_trip() {
        let request = DeployModelRequest {
            msg_id: 7,
            name: "resnet".into(),
            version: "1".into(),
            input_type: "doubles".into(),
            image: "corral/resnet:1".into(),
            replicas: 3,
        };
        let payload = Payload::new(DEPLOY_MODEL_REQUEST, &request).unwrap();
        assert_eq!(payload.tag, DEPLOY_MODEL_REQUEST);
        let decoded: DeployModelRequest = payload.decode().unwrap();
        assert_eq!(decoded.msg_id, 7);
        assert_eq!(decoded.replicas, 3);
    }
}
