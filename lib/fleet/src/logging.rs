// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! Output is human-readable by default; set `CORRAL_LOG_JSONL=1` for JSONL.
//! Filters come from a default level plus a per-crate filter map, overridden
//! wholesale by the `CORRAL_LOG` environment variable (comma-separated
//! `target=level` directives). `CORRAL_LOG_NO_ANSI=1` disables colors.

use std::collections::HashMap;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::env_is_truthy;

const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            // quiet the chatty transports unless asked for
            log_filters: HashMap::from([
                ("h2".to_string(), "error".to_string()),
                ("hyper_util".to_string(), "error".to_string()),
                ("tower".to_string(), "error".to_string()),
                ("async_nats".to_string(), "error".to_string()),
                ("rustls".to_string(), "error".to_string()),
                ("axum".to_string(), "error".to_string()),
            ]),
        }
    }
}

impl LoggingConfig {
    fn directives(&self) -> String {
        let mut directives = vec![self.log_level.clone()];
        let mut filters: Vec<_> = self.log_filters.iter().collect();
        filters.sort();
        directives.extend(filters.into_iter().map(|(k, v)| format!("{k}={v}")));
        directives.join(",")
    }
}

fn build_filter() -> EnvFilter {
    let spec = std::env::var("CORRAL_LOG")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| LoggingConfig::default().directives());
    EnvFilter::try_new(&spec).unwrap_or_else(|err| {
        eprintln!("invalid CORRAL_LOG filter '{spec}': {err}");
        EnvFilter::new(DEFAULT_FILTER_LEVEL)
    })
}

/// Initialize the process-wide subscriber. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let filter = build_filter();
        let ansi = !env_is_truthy("CORRAL_LOG_NO_ANSI");
        if env_is_truthy("CORRAL_LOG_JSONL") {
            tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_ansi(ansi)
                .with_env_filter(filter)
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_include_level_and_filters() {
        let directives = LoggingConfig::default().directives();
        assert!(directives.starts_with("info"));
        assert!(directives.contains("async_nats=error"));
    }

    #[test]
    fn custom_filter_spec_wins() {
        temp_env::with_vars(vec![("CORRAL_LOG", Some("debug,h2=warn"))], || {
            // EnvFilter has no public accessor; building without panic is
            // the contract here.
            let _ = build_filter();
        });
    }
}
