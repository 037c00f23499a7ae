// SPDX-FileCopyrightText: Copyright (c) 2025 Corral Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Single-instance guard.
//!
//! Reconciliation is not safe against a second controller instance driving
//! the same fleet: two instances can both observe the same replica count
//! and overshoot or undershoot the target. When etcd endpoints are
//! configured, this guard claims an exclusive key under a lease before the
//! serve loop starts and keeps the lease alive for the life of the process.
//! Without etcd the guarantee is the operator's responsibility.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};
use tokio_util::sync::CancellationToken;

/// Holds the leadership claim; dropping it stops the keep-alive, after
/// which the key expires with the lease.
pub struct LeaderGuard {
    key: String,
    cancel: CancellationToken,
}

impl LeaderGuard {
    /// Claim `key` exclusively, or fail if another instance holds it.
    pub async fn acquire(endpoints: &[String], key: &str, lease_ttl_secs: u64) -> Result<Self> {
        let mut client = Client::connect(endpoints, None)
            .await
            .context("could not connect to etcd")?;

        let lease = client
            .lease_grant(lease_ttl_secs as i64, None)
            .await
            .context("could not grant leadership lease")?;
        let lease_id = lease.id();

        let instance = format!("corral-{}", std::process::id());
        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                instance.as_str(),
                Some(PutOptions::new().with_lease(lease_id)),
            )]);
        let resp = client
            .txn(txn)
            .await
            .context("leadership transaction failed")?;
        if !resp.succeeded() {
            bail!("another controller instance already holds the fleet lock at '{key}'");
        }
        tracing::info!(key, instance = %instance, "acquired fleet leadership");

        let (mut keeper, mut responses) = client
            .lease_keep_alive(lease_id)
            .await
            .context("could not start lease keep-alive")?;
        let cancel = CancellationToken::new();
        let keepalive_cancel = cancel.clone();
        let interval = Duration::from_secs((lease_ttl_secs / 2).max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = keepalive_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = keeper.keep_alive().await {
                            tracing::warn!(%err, "leadership keep-alive failed; lease will expire");
                            break;
                        }
                        let _ = responses.message().await;
                    }
                }
            }
        });

        Ok(Self {
            key: key.to_string(),
            cancel,
        })
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::debug!(key = %self.key, "released fleet leadership keep-alive");
    }
}
