//! Seams between pipeline stages and the external services behind them.

use crate::log::Logger;
use crate::model::{AsTable, ValidationStatus};
use crate::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::BTreeSet;

/// Runs the external path-trace utility and returns its full textual report.
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn run(&self, target: &str) -> Result<String>;
}

/// Bulk address → AS/prefix lookup. Must return exactly one entry per address.
#[async_trait]
pub trait AsLookup: Send + Sync {
    async fn resolve(&self, addresses: &BTreeSet<String>, logger: &dyn Logger) -> Result<AsTable>;
}

/// Route origin validation for one (AS, prefix) pair.
#[async_trait]
pub trait RouteValidator: Send + Sync {
    async fn validate(&self, asn: u32, prefix: &IpNet, logger: &dyn Logger) -> Result<ValidationStatus>;
}
