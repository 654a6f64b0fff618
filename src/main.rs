//! # Object Storage Integrator
//!
//! Brokers Azure object-storage connection data between a provider application
//! and any number of consumer applications over shared relation data bags.
//!
//! ## Overview
//!
//! The integrator connects the two halves of a storage integration:
//!
//! 1. **Provider side** - Publishes container, storage-account and connection
//!    parameters into the relation's application data bag
//! 2. **Secret indirection** - The storage key never crosses the wire in
//!    plaintext; a granted secret URI travels in its place
//! 3. **Requirer side** - Tracks published references, resolves them and
//!    assembles complete connection info for consumers
//! 4. **Key rotation** - Rotating the backing secret refreshes every consumer
//!    without rewriting any relation data
//!
//! ## Features
//!
//! - **Change-driven**: both sides react to data-bag diffs, so redelivered
//!   notifications are cheap no-ops
//! - **Leader-gated writes**: only the leader unit of an application writes
//!   shared relation data
//! - **Completeness gating**: consumers are only notified once all required
//!   connection fields are present
//! - **In-memory model**: a full two-sided test double for exercising the
//!   protocol without a live deployment
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for detailed usage instructions and examples.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use object_storage_integrator::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "object_storage_integrator=info".into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        built = env!("BUILD_DATETIME"),
        git = env!("BUILD_GIT_HASH"),
        "Starting Object Storage Integrator"
    );

    cli::run(Cli::parse()).await
}
