// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Corral keeps a fleet of per-model inference containers consistent with a
//! desired replica count, discovers them by label, and exposes that control
//! surface over a message bus using typed request/response payloads.
//!
//! The [`fleet::FleetManager`] owns every mutation of the container fleet;
//! the [`dispatch::Dispatcher`] is its only caller over the bus, routing
//! tagged payloads to exactly one fleet or admin operation and publishing a
//! typed response for each.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod ingest;
pub mod labels;
pub mod leadership;
pub mod logging;
pub mod messages;
pub mod runtime;

pub use config::FleetConfig;
pub use error::FleetError;
pub use fleet::{DesiredState, FleetManager, ScaleReport};
pub use labels::ModelIdentity;
