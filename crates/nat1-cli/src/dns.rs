//! DNS publishing of the public mapping.
//!
//! Providers are looked up by name in a static registry and built from an
//! explicit [`DnsCredentials`] value.

use async_trait::async_trait;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

/// Provider account credentials
#[derive(Clone, Default)]
pub struct DnsCredentials {
    /// Account or key ID
    pub id: Option<String>,
    /// API token or secret
    pub token: Option<String>,
}

impl fmt::Debug for DnsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsCredentials")
            .field("id", &self.id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A and SRV records describing one public mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRecord {
    /// SRV prefix, e.g. `_minecraft._tcp.`
    pub srv_prefix: String,
    /// Record name inside the zone (may be empty)
    pub sub_domain: String,
    /// Zone
    pub domain: String,
    /// Public IP
    pub ip: Ipv4Addr,
    /// Public port
    pub port: u16,
}

impl MappingRecord {
    /// Fully qualified name of the A record
    #[must_use]
    pub fn a_name(&self) -> String {
        if self.sub_domain.is_empty() {
            self.domain.clone()
        } else {
            format!("{}.{}", self.sub_domain, self.domain)
        }
    }

    /// Fully qualified name of the SRV record
    #[must_use]
    pub fn srv_name(&self) -> String {
        format!("{}{}", self.srv_prefix, self.a_name())
    }
}

/// DNS provider
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Point the A record at `record.ip` and the SRV record at `record.port`
    async fn update_mapping(&self, record: &MappingRecord) -> anyhow::Result<()>;
}

/// Publishes nothing
#[derive(Debug, Default)]
pub struct NoDns;

#[async_trait]
impl DnsProvider for NoDns {
    fn name(&self) -> &'static str {
        "no_dns"
    }

    async fn update_mapping(&self, _record: &MappingRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs the records it would publish
#[derive(Debug, Default)]
pub struct LogDns;

#[async_trait]
impl DnsProvider for LogDns {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn update_mapping(&self, record: &MappingRecord) -> anyhow::Result<()> {
        info!(name = %record.a_name(), ip = %record.ip, "A record");
        info!(
            name = %record.srv_name(),
            target = %record.a_name(),
            port = record.port,
            "SRV record"
        );
        Ok(())
    }
}

type Constructor = fn(DnsCredentials) -> anyhow::Result<Box<dyn DnsProvider>>;

fn no_dns(_credentials: DnsCredentials) -> anyhow::Result<Box<dyn DnsProvider>> {
    Ok(Box::new(NoDns))
}

fn log_dns(_credentials: DnsCredentials) -> anyhow::Result<Box<dyn DnsProvider>> {
    Ok(Box::new(LogDns))
}

const PROVIDERS: &[(&str, Constructor)] = &[("no_dns", no_dns), ("log", log_dns)];

/// Names of all registered providers
pub fn provider_names() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|(name, _)| *name)
}

/// Build the provider registered as `name`
///
/// # Errors
///
/// Returns an error for an unknown name or if the provider rejects the
/// credentials.
pub fn create_provider(name: &str, credentials: DnsCredentials) -> anyhow::Result<Box<dyn DnsProvider>> {
    let Some((_, constructor)) = PROVIDERS.iter().find(|(registered, _)| *registered == name) else {
        anyhow::bail!("unsupported DNS provider: {name}");
    };
    constructor(credentials)
}

/// Publish `record`, retrying on failure
///
/// Returns whether an attempt succeeded.
pub async fn publish_with_retry(
    provider: &dyn DnsProvider,
    record: &MappingRecord,
    attempts: u32,
    delay: Duration,
) -> bool {
    for attempt in 1..=attempts {
        match provider.update_mapping(record).await {
            Ok(()) => return true,
            Err(e) => {
                error!(provider = provider.name(), attempt, "DNS update failed: {e:#}");
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }
    false
}
