// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Container labels and the model identity codec.
//!
//! Every container managed by the controller carries [`CONTAINER_LABEL`].
//! Infrastructure containers additionally carry a role label, and model
//! replicas carry [`MODEL_CONTAINER_LABEL`] whose value is the encoded
//! `(name, version)` pair. This module is the only place that versioned
//! identity is represented as text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Presence-only label marking a container as managed by this controller.
pub const CONTAINER_LABEL: &str = "io.corral.container";

/// Label carried by model replicas; its value is the encoded [`ModelIdentity`].
pub const MODEL_CONTAINER_LABEL: &str = "io.corral.model-container";

/// Presence-only role label of the singleton query frontend.
pub const QUERY_FRONTEND_LABEL: &str = "io.corral.query-frontend";

/// Presence-only role label of the management frontend.
pub const MGMT_FRONTEND_LABEL: &str = "io.corral.management-frontend";

/// Delimiter between name and version in the encoded label value.
///
/// Must not appear in either part; there is no escaping. The encoded value
/// doubles as the container name prefix, which restricts the character set.
const MODEL_LABEL_DELIMITER: char = '_';

/// The `(name, version)` pair identifying a deployable model.
///
/// Immutable once a container has been created under it; replacing a model
/// means stopping the old replicas and starting new ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name: String,
    pub version: String,
}

impl ModelIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Encode this identity as a label value: `name` + delimiter + `version`.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.name, MODEL_LABEL_DELIMITER, self.version
        )
    }

    /// Decode a label value back into an identity.
    ///
    /// Rejects anything that does not split into exactly two non-empty
    /// parts on the delimiter.
    pub fn decode(label: &str) -> Result<Self, FleetError> {
        let mut parts = label.split(MODEL_LABEL_DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(version), None) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(FleetError::MalformedLabel(label.to_string())),
        }
    }

    /// The `key=value` filter selecting this identity's replicas.
    pub fn replica_filter(&self) -> String {
        format!("{}={}", MODEL_CONTAINER_LABEL, self.encode())
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for (name, version) in [("resnet", "1"), ("hod", "v2.1"), ("a", "b")] {
            let identity = ModelIdentity::new(name, version);
            let decoded = ModelIdentity::decode(&identity.encode()).unwrap();
            assert_eq!(decoded, identity);
        }
    }

    #[test]
    fn decode_rejects_wrong_part_count() {
        for label in ["", "noversion", "a_b_c", "_v1", "model_", "_"] {
            let err = ModelIdentity::decode(label).unwrap_err();
            assert!(
                matches!(err, FleetError::MalformedLabel(_)),
                "label {label:?} produced {err:?}"
            );
        }
    }

    #[test]
    fn replica_filter_is_key_value() {
        let identity = ModelIdentity::new("resnet", "3");
        assert_eq!(
            identity.replica_filter(),
            format!("{MODEL_CONTAINER_LABEL}=resnet_3")
        );
    }
}
