// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for fleet operations.
//!
//! Runtime failures are wrapped with the operation and target identifier and
//! returned to the caller; nothing is retried here and nothing is fatal to
//! the process. The dispatcher turns these into the `error` field of the
//! response payload.

use thiserror::Error;

use crate::fleet::ScaleReport;

#[derive(Debug, Error)]
pub enum FleetError {
    /// A label that should carry an encoded model identity did not decode.
    /// Encountering one while walking the fleet is an invariant violation
    /// and fails the whole operation rather than being skipped.
    #[error("malformed model container label '{0}'")]
    MalformedLabel(String),

    /// No query frontend container is running, so a model replica has
    /// nothing to attach to.
    #[error("no query frontend to attach model container to")]
    NoQueryFrontend,

    /// A container runtime call failed. `op` names the primitive, `target`
    /// the container, network, or label it was applied to.
    #[error("{op} failed for {target}: {source}")]
    Runtime {
        op: &'static str,
        target: String,
        #[source]
        source: anyhow::Error,
    },

    /// The admin service answered with a non-success status (or was
    /// unreachable); `body` is the raw response text.
    #[error("admin api request to {path} failed: {body}")]
    Admin { path: String, body: String },

    /// Scaling stopped early. Progress made before the failure is kept
    /// (best effort, not atomic) and reported alongside the cause.
    #[error(
        "scaling {identity} aborted after {started} started / {stopped} stopped \
         (observed {observed}, desired {desired}): {source}",
        identity = .report.identity,
        started = .report.started,
        stopped = .report.stopped,
        observed = .report.observed,
        desired = .report.desired,
    )]
    ScaleAborted {
        report: ScaleReport,
        #[source]
        source: Box<FleetError>,
    },
}
