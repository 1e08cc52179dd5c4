//! Map, publish, forward, repeat.

use crate::dns::{DnsProvider, MappingRecord, publish_with_retry};
use crate::liveness::{QUERY_TIMEOUT, tcp_query};
use crate::log_filter::RepeatFilter;
use nat1_forward::{ForwardError, TcpForwarder, UdpForwarder};
use nat1_stun::{MappingResolver, Transport};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Wait after a failed mapping lookup
const MAPPING_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Wait after a forward engine exits
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Wait between checks of an offline local service
const LOCAL_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Wait between checks of the mapped address
const MAPPED_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// DNS publish attempts per mapping
const DNS_ATTEMPTS: u32 = 3;

/// Wait between DNS publish attempts
const DNS_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Where the DNS records go; the address is filled in per mapping
#[derive(Debug, Clone)]
pub struct RecordTemplate {
    /// SRV prefix for the configured service
    pub srv_prefix: String,
    /// Record name inside the zone
    pub sub_domain: String,
    /// Zone
    pub domain: String,
}

impl RecordTemplate {
    fn record(&self, mapped: SocketAddrV4) -> MappingRecord {
        MappingRecord {
            srv_prefix: self.srv_prefix.clone(),
            sub_domain: self.sub_domain.clone(),
            domain: self.domain.clone(),
            ip: *mapped.ip(),
            port: mapped.port(),
        }
    }
}

/// Keeps a public mapping alive, published and forwarded
pub struct Supervisor {
    local: SocketAddrV4,
    resolver: MappingResolver,
    dns: Arc<dyn DnsProvider>,
    template: RecordTemplate,
}

impl Supervisor {
    /// Supervisor for `local`, mapped through `resolver`
    pub fn new(
        local: SocketAddrV4,
        resolver: MappingResolver,
        dns: Box<dyn DnsProvider>,
        template: RecordTemplate,
    ) -> Self {
        Self {
            local,
            resolver,
            dns: Arc::from(dns),
            template,
        }
    }

    /// Forward mode: run the engine for the resolver's transport towards
    /// `target`, restarting it whenever it exits
    pub async fn run_forward(&self, target: SocketAddrV4) {
        loop {
            let Some(mapped) = self.map().await else {
                sleep(MAPPING_RETRY_DELAY).await;
                continue;
            };
            self.publish(mapped);

            let result = match self.resolver.transport() {
                Transport::Tcp => match TcpForwarder::bind(self.local, target) {
                    Ok(forwarder) => forwarder.run(mapped).await,
                    Err(e) => Err(e),
                },
                Transport::Udp => match UdpForwarder::bind(self.local, target).await {
                    Ok(forwarder) => forwarder.run(mapped).await,
                    Err(e) => Err(e),
                },
            };
            report_engine_exit(result);
            sleep(RESTART_DELAY).await;
        }
    }

    /// Shared-port mode: the service listens on the local port itself
    ///
    /// Only the mapping is maintained. Liveness is checked on loopback for the
    /// local service and through the public mapping for reachability.
    pub async fn run_shared(&self) {
        let local_service = SocketAddrV4::new(Ipv4Addr::LOCALHOST, self.local.port());
        let mut local_filter = RepeatFilter::new(RepeatFilter::LOCAL_CHECKS);

        loop {
            let (online, message) = tcp_query(local_service, QUERY_TIMEOUT).await;
            if !online {
                if local_filter.allow(&message) {
                    warn!(local = %local_service, "local service offline: {message}");
                }
                sleep(LOCAL_CHECK_INTERVAL).await;
                continue;
            }
            if local_filter.allow(&message) {
                info!(local = %local_service, "local service online");
            }

            let Some(mapped) = self.map().await else {
                sleep(MAPPING_RETRY_DELAY).await;
                continue;
            };
            self.publish(mapped);
            self.watch_mapping(mapped).await;
        }
    }

    /// Poll `mapped` once per second until it stops answering
    async fn watch_mapping(&self, mapped: SocketAddrV4) {
        let mut filter = RepeatFilter::new(RepeatFilter::MAPPED_CHECKS);
        loop {
            let (online, message) = tcp_query(mapped, QUERY_TIMEOUT).await;
            if !online {
                warn!(%mapped, "mapped address offline: {message}, remapping");
                return;
            }
            if filter.allow(&message) {
                info!(%mapped, "mapped address online");
            }
            sleep(MAPPED_CHECK_INTERVAL).await;
        }
    }

    async fn map(&self) -> Option<SocketAddrV4> {
        match self.resolver.resolve(self.local).await {
            Ok(mapped) => Some(mapped),
            Err(e) => {
                error!(
                    local = %self.local,
                    server = self.resolver.server(),
                    kind = ?e.kind(),
                    "cannot resolve public mapping: {e}"
                );
                None
            }
        }
    }

    /// Publish in the background; forwarding never waits on DNS
    fn publish(&self, mapped: SocketAddrV4) {
        let provider = Arc::clone(&self.dns);
        let record = self.template.record(mapped);
        tokio::spawn(async move {
            if publish_with_retry(provider.as_ref(), &record, DNS_ATTEMPTS, DNS_RETRY_DELAY).await {
                info!(provider = provider.name(), name = %record.a_name(), %mapped, "DNS updated");
            } else {
                error!(provider = provider.name(), name = %record.a_name(), "DNS update gave up");
            }
        });
    }
}

fn report_engine_exit(result: Result<(), ForwardError>) {
    match result {
        Ok(()) => warn!("port forwarding stopped, restarting"),
        Err(e) if e.is_mapping_lost() => warn!("mapping lost, restarting: {e}"),
        Err(e) => warn!("port forwarding failed, restarting: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_template() {
        let template = RecordTemplate {
            srv_prefix: "_minecraft._tcp.".to_string(),
            sub_domain: "mc".to_string(),
            domain: "example.com".to_string(),
        };
        let record = template.record("203.0.113.7:41000".parse().unwrap());
        assert_eq!(record.ip, Ipv4Addr::new(203, 0, 113, 7));
        assert_eq!(record.port, 41000);
        assert_eq!(record.srv_name(), "_minecraft._tcp.mc.example.com");
    }
}
