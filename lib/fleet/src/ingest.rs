// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Model descriptor ingestion.
//!
//! One POST endpoint accepting a JSON model descriptor. The descriptor is
//! logged for the operator; 200 on success, 500 with the parse error when
//! the body does not decode.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Extra slack granted past the training window when deciding
/// predictability.
const TRAINING_RANGE_SLACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Resolution models are expected to predict at.
const EXPECTED_RESOLUTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub version: u64,
    pub predictive_range: TimeRange,
    #[serde(with = "resolution")]
    pub predictive_resolution: Duration,
    #[serde(default)]
    pub training_data: Option<TrainingData>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingData {
    pub streams: Vec<Uuid>,
    pub range: TimeRange,
}

/// Durations in descriptors are humantime strings ("1h", "30m").
mod resolution {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

impl Model {
    /// Whether this model can serve predictions over `range` at
    /// `resolution`. Without training data the answer is yes; with it, the
    /// requested range must fall inside the training window (plus a day of
    /// slack at the end) and the resolution must be the expected one.
    pub fn can_predict(&self, range: &TimeRange, resolution: Duration) -> bool {
        let Some(training) = &self.training_data else {
            return true;
        };
        if training.range.start > range.start
            || training.range.end
                + chrono::Duration::from_std(TRAINING_RANGE_SLACK).unwrap_or_default()
                < range.end
        {
            return false;
        }
        resolution == EXPECTED_RESOLUTION
    }
}

pub fn router() -> Router {
    Router::new().route("/api/model", post(new_model))
}

async fn new_model(body: Bytes) -> Response {
    match serde_json::from_slice::<Model>(&body) {
        Ok(model) => {
            tracing::info!(
                name = %model.name,
                version = model.version,
                resolution = %humantime::format_duration(model.predictive_resolution),
                "received model descriptor"
            );
            StatusCode::OK.into_response()
        }
        Err(err) => {
            tracing::warn!(%err, "undecodable model descriptor");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Serve the ingest endpoint until cancelled.
pub async fn serve(addr: String, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind ingest endpoint on {addr}"))?;
    tracing::info!(%addr, "ingest endpoint listening");
    axum::serve(listener, router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("ingest server failed")
}
