// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client for the admin service holding application and model metadata.
//!
//! The controller is only a client here: POST with a JSON body, 2xx with a
//! body means success, anything else is surfaced as [`FleetError::Admin`]
//! carrying the raw response text. Nothing is retried.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Marker the admin service expects in place of the retired data-path field.
const MODEL_DATA_PATH_DEPRECATED: &str = "DEPRECATED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    pub input_type: String,
    pub default_output: String,
    pub latency_slo_micros: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_name: String,
    pub model_version: String,
    pub labels: Vec<String>,
    pub input_type: String,
    pub container_name: String,
    pub batch_size: i32,
    pub model_data_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLink {
    pub app_name: String,
    pub model_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationInfo {
    pub name: String,
    pub input_type: String,
    pub default_output: String,
    pub latency_slo_micros: i64,
    pub linked_models: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub model_name: String,
    pub model_version: String,
    pub input_type: String,
    pub labels: Vec<String>,
    pub container_name: String,
    pub batch_size: i32,
}

/// Either the bare names or the verbose descriptions, depending on what the
/// caller asked for.
#[derive(Debug, Clone)]
pub enum Listing<T> {
    Names(Vec<String>),
    Detailed(Vec<T>),
}

#[derive(Debug, Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    admin_base: String,
    query_base: String,
}

impl AdminClient {
    pub fn new(admin_url: &str, query_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            admin_base: admin_url.trim_end_matches('/').to_string(),
            query_base: query_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, FleetError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let text = self.post_text(path, body).await?;
        serde_json::from_str(&text).map_err(|err| FleetError::Admin {
            path: path.to_string(),
            body: format!("undecodable response '{text}': {err}"),
        })
    }

    /// POST and return the raw body text of a 2xx response.
    async fn post_text<B: Serialize>(&self, path: &str, body: &B) -> Result<String, FleetError> {
        let url = format!("{}{}", self.admin_base, path);
        tracing::debug!(%url, "admin api request");
        let admin_err = |body: String| FleetError::Admin {
            path: path.to_string(),
            body,
        };
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| admin_err(err.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| admin_err(err.to_string()))?;
        if !status.is_success() {
            return Err(admin_err(format!("{status}: {text}")));
        }
        Ok(text)
    }

    pub async fn register_application(&self, app: &AppSpec) -> Result<(), FleetError> {
        self.post_text("/admin/add_app", app).await?;
        tracing::info!(app = %app.name, "application registered");
        Ok(())
    }

    pub async fn register_model(&self, model: &ModelSpec) -> Result<(), FleetError> {
        let mut model = model.clone();
        model.model_data_path = MODEL_DATA_PATH_DEPRECATED.to_string();
        self.post_text("/admin/add_model", &model).await?;
        tracing::info!(
            model = %model.model_name,
            version = %model.model_version,
            "model registered"
        );
        Ok(())
    }

    pub async fn link_model_to_app(&self, link: &ModelLink) -> Result<(), FleetError> {
        self.post_text("/admin/add_model_links", link).await?;
        tracing::info!(app = %link.app_name, models = ?link.model_names, "models linked");
        Ok(())
    }

    pub async fn get_linked_models(&self, app_name: &str) -> Result<Vec<String>, FleetError> {
        self.post_json(
            "/admin/get_linked_models",
            &serde_json::json!({ "app_name": app_name }),
        )
        .await
    }

    pub async fn list_models(&self, verbose: bool) -> Result<Listing<ModelInfo>, FleetError> {
        let body = serde_json::json!({ "verbose": verbose });
        if verbose {
            Ok(Listing::Detailed(
                self.post_json("/admin/get_all_models", &body).await?,
            ))
        } else {
            Ok(Listing::Names(
                self.post_json("/admin/get_all_models", &body).await?,
            ))
        }
    }

    pub async fn list_applications(
        &self,
        verbose: bool,
    ) -> Result<Listing<ApplicationInfo>, FleetError> {
        let body = serde_json::json!({ "verbose": verbose });
        if verbose {
            Ok(Listing::Detailed(
                self.post_json("/admin/get_all_applications", &body).await?,
            ))
        } else {
            Ok(Listing::Names(
                self.post_json("/admin/get_all_applications", &body).await?,
            ))
        }
    }

    pub async fn get_application_info(&self, name: &str) -> Result<ApplicationInfo, FleetError> {
        self.post_json("/admin/get_application", &serde_json::json!({ "name": name }))
            .await
    }

    pub async fn get_model_info(
        &self,
        model_name: &str,
        model_version: &str,
    ) -> Result<ModelInfo, FleetError> {
        self.post_json(
            "/admin/get_model",
            &serde_json::json!({
                "model_name": model_name,
                "model_version": model_version,
            }),
        )
        .await
    }

    pub async fn set_model_version(
        &self,
        model_name: &str,
        model_version: &str,
    ) -> Result<(), FleetError> {
        self.post_text(
            "/admin/set_model_version",
            &serde_json::json!({
                "model_name": model_name,
                "model_version": model_version,
            }),
        )
        .await?;
        tracing::info!(model = model_name, version = model_version, "active version set");
        Ok(())
    }

    /// Metrics snapshot from the query frontend.
    pub async fn inspect_instance(&self) -> Result<serde_json::Value, FleetError> {
        let path = "/metrics";
        let url = format!("{}{}", self.query_base, path);
        let admin_err = |body: String| FleetError::Admin {
            path: path.to_string(),
            body,
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| admin_err(err.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| admin_err(err.to_string()))?;
        if !status.is_success() {
            return Err(admin_err(format!("{status}: {text}")));
        }
        serde_json::from_str(&text)
            .map_err(|err| admin_err(format!("undecodable response '{text}': {err}")))
    }
}
