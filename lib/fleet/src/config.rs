// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Controller configuration.
//!
//! Loaded from, in increasing priority: built-in defaults, an optional TOML
//! file (`/etc/corral/fleet.toml`, or the path in `CORRAL_FLEET_CONFIG`),
//! and `CORRAL_FLEET_`-prefixed environment variables. Empty environment
//! variables are ignored.

use std::collections::HashMap;

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default graceful-stop deadline handed to the engine on every stop.
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Default lease TTL for the leadership guard.
const DEFAULT_LEADER_LEASE_SECS: u64 = 10;

#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug))]
pub struct FleetConfig {
    /// Container engine address, `tcp://host:port` or `http(s)://` form.
    /// Set with CORRAL_FLEET_DOCKER_HOST.
    #[validate(length(min = 1))]
    #[builder(default = "\"tcp://127.0.0.1:2375\".to_string()")]
    pub docker_host: String,

    /// Name of the shared network all fleet containers join so they can
    /// address each other by container name.
    #[validate(length(min = 1))]
    #[builder(default = "\"corral\".to_string()")]
    pub network: String,

    /// Labels applied to every container this controller creates, in
    /// addition to the fixed identity and role labels.
    #[builder(default)]
    pub default_labels: HashMap<String, String>,

    /// Seconds a container gets to exit on stop before the engine kills it.
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_STOP_TIMEOUT_SECS")]
    pub stop_timeout_secs: u64,

    /// Base URL of the admin service (application/model metadata).
    #[validate(url)]
    #[builder(default = "\"http://127.0.0.1:1338\".to_string()")]
    pub admin_url: String,

    /// Base URL of the query frontend (instance metrics passthrough).
    #[validate(url)]
    #[builder(default = "\"http://127.0.0.1:1337\".to_string()")]
    pub query_url: String,

    /// Message bus address.
    #[validate(length(min = 1))]
    #[builder(default = "\"nats://127.0.0.1:4222\".to_string()")]
    pub nats_url: String,

    /// Subject the dispatcher subscribes to for request batches.
    #[validate(length(min = 1))]
    #[builder(default = "\"corral.fleet.request\".to_string()")]
    pub request_subject: String,

    /// Subject every response is published on.
    #[validate(length(min = 1))]
    #[builder(default = "\"corral.fleet.response\".to_string()")]
    pub response_subject: String,

    /// Bind address of the model descriptor ingest endpoint.
    #[validate(length(min = 1))]
    #[builder(default = "\"127.0.0.1:5555\".to_string()")]
    pub ingest_addr: String,

    /// etcd endpoints for the leadership guard. Empty disables the guard,
    /// leaving the single-active-instance guarantee to the operator.
    #[builder(default)]
    pub etcd_endpoints: Vec<String>,

    /// Key the leadership guard claims.
    #[validate(length(min = 1))]
    #[builder(default = "\"v1/corral/leader\".to_string()")]
    pub leader_key: String,

    /// Lease TTL backing the leadership claim.
    #[validate(range(min = 2))]
    #[builder(default = "DEFAULT_LEADER_LEASE_SECS")]
    pub leader_lease_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        // all fields carry builder defaults, so the empty builder succeeds
        FleetConfigBuilder::default()
            .build_internal()
            .expect("default configuration is complete")
    }
}

impl FleetConfig {
    pub fn builder() -> FleetConfigBuilder {
        FleetConfigBuilder::default()
    }

    fn figment() -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(FleetConfig::default()))
            .merge(Toml::file("/etc/corral/fleet.toml"));
        if let Ok(path) = std::env::var("CORRAL_FLEET_CONFIG") {
            if !path.is_empty() {
                figment = figment.merge(Toml::file(path));
            }
        }
        figment.merge(Env::prefixed("CORRAL_FLEET_").filter_map(|k| {
            let full_key = format!("CORRAL_FLEET_{}", k.as_str());
            // filters out empty environment variables
            match std::env::var(&full_key) {
                Ok(v) if !v.is_empty() => Some(k.into()),
                _ => None,
            }
        }))
    }

    /// Load and validate the configuration from files and the environment.
    pub fn from_settings() -> Result<FleetConfig> {
        let config: FleetConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }
}

impl FleetConfigBuilder {
    /// Build and validate the configuration
    pub fn build(&self) -> Result<FleetConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// "1", "true", "on", "yes" (case insensitive) count as set.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

pub fn env_is_truthy(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| is_truthy(&v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FleetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stop_timeout_secs, DEFAULT_STOP_TIMEOUT_SECS);
        assert_eq!(config.network, "corral");
        assert!(config.etcd_endpoints.is_empty());
    }

    #[test]
    fn environment_overrides_defaults() {
        temp_env::with_vars(
            vec![
                ("CORRAL_FLEET_DOCKER_HOST", Some("tcp://10.0.0.5:2375")),
                ("CORRAL_FLEET_STOP_TIMEOUT_SECS", Some("5")),
                ("CORRAL_FLEET_NETWORK", Some("corral-staging")),
            ],
            || {
                let config = FleetConfig::from_settings().unwrap();
                assert_eq!(config.docker_host, "tcp://10.0.0.5:2375");
                assert_eq!(config.stop_timeout_secs, 5);
                assert_eq!(config.network, "corral-staging");
            },
        );
    }

    #[test]
    fn empty_environment_variables_are_ignored() {
        temp_env::with_vars(vec![("CORRAL_FLEET_NETWORK", Some(""))], || {
            let config = FleetConfig::from_settings().unwrap();
            assert_eq!(config.network, "corral");
        });
    }

    #[test]
    fn zero_stop_timeout_is_rejected() {
        temp_env::with_vars(
            vec![("CORRAL_FLEET_STOP_TIMEOUT_SECS", Some("0"))],
            || {
                assert!(FleetConfig::from_settings().is_err());
            },
        );
    }

    #[test]
    fn builder_validates() {
        let config = FleetConfig::builder()
            .network("corral-test".to_string())
            .build()
            .unwrap();
        assert_eq!(config.network, "corral-test");

        assert!(FleetConfig::builder()
            .admin_url("not a url".to_string())
            .build()
            .is_err());
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
        temp_env::with_vars(vec![("CORRAL_TEST_FLAG", Some("yes"))], || {
            assert!(env_is_truthy("CORRAL_TEST_FLAG"));
        });
        temp_env::with_vars(vec![("CORRAL_TEST_FLAG", None::<&str>)], || {
            assert!(!env_is_truthy("CORRAL_TEST_FLAG"));
        });
    }
}
