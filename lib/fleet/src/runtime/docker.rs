// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Docker Engine API client.
//!
//! Speaks the engine's versioned HTTP/JSON API over TCP. The daemon address
//! comes from configuration in `DOCKER_HOST` form (`tcp://host:port` or an
//! `http(s)://` URL).

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use super::{ContainerLogs, ContainerRecord, ContainerRuntime, ContainerSpec};

/// Engine API version all paths are pinned to.
const API_VERSION: &str = "v1.43";

pub struct DockerRuntime {
    http: reqwest::Client,
    base: String,
}

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: String,
}

impl DockerRuntime {
    /// Connect to the engine at `host` (`tcp://` or `http(s)://`).
    pub fn connect(host: &str) -> Result<Self> {
        let base = match host.split_once("://") {
            Some(("tcp", rest)) => format!("http://{rest}"),
            Some(("http" | "https", _)) => host.to_string(),
            _ => bail!("unsupported docker host '{host}', expected tcp:// or http(s)://"),
        };
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("could not build docker http client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base, API_VERSION, path)
    }

    /// Turn a non-2xx engine response into an error carrying the body text.
    async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        bail!("docker daemon returned {status}: {body}")
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self, label_filters: &[String]) -> Result<Vec<ContainerRecord>> {
        let filters = json!({ "label": label_filters }).to_string();
        tracing::trace!(%filters, "listing containers");
        let resp = self
            .http
            .get(self.url("/containers/json"))
            .query(&[("filters", filters.as_str())])
            .send()
            .await
            .context("container list request failed")?;
        Self::expect_success(resp)
            .await?
            .json::<Vec<ContainerRecord>>()
            .await
            .context("could not decode container list")
    }

    async fn create(&self, spec: ContainerSpec) -> Result<String> {
        let body = json!({
            "Image": spec.image,
            "Env": spec.env,
            "Labels": spec.labels,
            "Tty": spec.tty,
        });
        let resp = self
            .http
            .post(self.url("/containers/create"))
            .query(&[("name", spec.name.as_str())])
            .json(&body)
            .send()
            .await
            .context("container create request failed")?;
        let created: IdResponse = Self::expect_success(resp)
            .await?
            .json()
            .await
            .context("could not decode container create response")?;
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/start")))
            .send()
            .await
            .context("container start request failed")?;
        // 304 = already started
        if resp.status().as_u16() == 304 {
            return Ok(());
        }
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/stop")))
            .query(&[("t", grace.as_secs().to_string())])
            .send()
            .await
            .context("container stop request failed")?;
        // 304 = already stopped
        if resp.status().as_u16() == 304 {
            return Ok(());
        }
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<String> {
        let resp = self
            .http
            .get(self.url(&format!("/networks/{name}")))
            .send()
            .await
            .context("network inspect request failed")?;
        if resp.status().is_success() {
            let network: IdResponse = resp
                .json()
                .await
                .context("could not decode network inspect response")?;
            return Ok(network.id);
        }
        if resp.status().as_u16() != 404 {
            Self::expect_success(resp).await?;
            unreachable!("non-success status handled above");
        }
        let resp = self
            .http
            .post(self.url("/networks/create"))
            .json(&json!({ "Name": name }))
            .send()
            .await
            .context("network create request failed")?;
        let created: IdResponse = Self::expect_success(resp)
            .await?
            .json()
            .await
            .context("could not decode network create response")?;
        tracing::info!(network = name, id = %created.id, "created fleet network");
        Ok(created.id)
    }

    async fn connect_network(&self, network_id: &str, container_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/networks/{network_id}/connect")))
            .json(&json!({ "Container": container_id }))
            .send()
            .await
            .context("network connect request failed")?;
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<ContainerLogs> {
        let resp = self
            .http
            .get(self.url(&format!("/containers/{id}/logs")))
            .query(&[("stdout", "true"), ("stderr", "true")])
            .send()
            .await
            .context("container logs request failed")?;
        let raw = Self::expect_success(resp)
            .await?
            .bytes()
            .await
            .context("could not read container log stream")?;
        Ok(demultiplex(&raw))
    }
}

/// Split an engine log stream into stdout and stderr.
///
/// Without a TTY the engine frames output as an 8-byte header (stream byte,
/// three zero bytes, big-endian length) followed by the chunk. With a TTY
/// the stream is raw; if no frame parses, the whole payload is stdout.
fn demultiplex(raw: &Bytes) -> ContainerLogs {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = &raw[..];
    let mut framed = false;

    while buf.len() >= 8 && matches!(buf[0], 0..=2) && buf[1..4] == [0, 0, 0] {
        let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if buf.len() < 8 + len {
            break;
        }
        let chunk = &buf[8..8 + len];
        match buf[0] {
            2 => stderr.extend_from_slice(chunk),
            _ => stdout.extend_from_slice(chunk),
        }
        buf = &buf[8 + len..];
        framed = true;
    }

    if !framed {
        stdout = raw.to_vec();
    }

    ContainerLogs {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}
