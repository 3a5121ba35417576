use std::{net::IpAddr, time::Duration};

use async_trait::async_trait;
use log::{debug, info};
use trust_dns_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::rr::RecordType as DnsRecordType,
    TokioAsyncResolver,
};

use crate::change::RecordType;
use crate::convergence::Replica;
use crate::errors::ApiError;

const DNS_PORT: u16 = 53;
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Name resolution against the zone's authoritative servers.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Looks up the address of every replica host name.
    async fn resolve_replicas(&self, hosts: &[String]) -> Result<Vec<Replica>, ApiError>;

    /// Asks one replica directly; "no records" yields an empty answer.
    async fn query(
        &self,
        replica: &Replica,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<String>, ApiError>;
}

pub struct TrustDnsResolver {
    system: TokioAsyncResolver,
}

impl TrustDnsResolver {
    pub fn from_system_conf() -> Result<Self, ApiError> {
        match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(system) => Ok(Self { system }),
            Err(error) => Err(ApiError::fatal(format!(
                "failed to load system resolver configuration: {}",
                error
            ))),
        }
    }

    /// Resolver pinned to one server, with answer caching disabled.
    fn direct(addr: IpAddr) -> Result<TokioAsyncResolver, ApiError> {
        let name_servers = NameServerConfigGroup::from_ips_clear(&[addr], DNS_PORT, true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        opts.attempts = 1;
        opts.timeout = QUERY_TIMEOUT;

        TokioAsyncResolver::tokio(config, opts).map_err(|error| to_api_error(&error))
    }
}

#[async_trait]
impl NameResolver for TrustDnsResolver {
    async fn resolve_replicas(&self, hosts: &[String]) -> Result<Vec<Replica>, ApiError> {
        let mut replicas = Vec::with_capacity(hosts.len());
        for host in hosts {
            let lookup = self
                .system
                .lookup_ip(host.as_str())
                .await
                .map_err(|error| to_api_error(&error))?;
            let preferred = lookup
                .iter()
                .find(|addr| addr.is_ipv4())
                .or_else(|| lookup.iter().next());
            let addr = match preferred {
                Some(addr) => addr,
                None => {
                    return Err(ApiError::fatal(format!(
                        "no address for replica '{}'",
                        host
                    )))
                }
            };
            info!("replica '{}' resolved to {}", host, addr);
            replicas.push(Replica {
                host: host.clone(),
                addr,
            });
        }
        Ok(replicas)
    }

    async fn query(
        &self,
        replica: &Replica,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<String>, ApiError> {
        let resolver = Self::direct(replica.addr)?;
        let fqdn = fully_qualified(name);

        match resolver.lookup(fqdn.as_str(), dns_record_type(record_type)).await {
            Ok(lookup) => {
                let answers: Vec<String> = lookup.iter().map(|rdata| rdata.to_string()).collect();
                debug!("{} {} @{}: {:?}", fqdn, record_type, replica.host, answers);
                Ok(answers)
            }
            Err(error) => match error.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    debug!("{} {} @{}: no answer", fqdn, record_type, replica.host);
                    Ok(vec![])
                }
                _ => Err(to_api_error(&error)),
            },
        }
    }
}

fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        return name.to_string();
    }
    format!("{}.", name)
}

fn dns_record_type(record_type: RecordType) -> DnsRecordType {
    match record_type {
        RecordType::A => DnsRecordType::A,
        RecordType::Aaaa => DnsRecordType::AAAA,
        RecordType::Caa => DnsRecordType::CAA,
        RecordType::Cname => DnsRecordType::CNAME,
        RecordType::Mx => DnsRecordType::MX,
        RecordType::Ns => DnsRecordType::NS,
        RecordType::Ptr => DnsRecordType::PTR,
        // SPF data is served as TXT by most authoritative servers.
        RecordType::Spf => DnsRecordType::TXT,
        RecordType::Srv => DnsRecordType::SRV,
        RecordType::Txt => DnsRecordType::TXT,
    }
}

fn to_api_error(error: &ResolveError) -> ApiError {
    let is_retryable = matches!(
        error.kind(),
        ResolveErrorKind::Timeout | ResolveErrorKind::Io(_) | ResolveErrorKind::Proto(_)
    );
    ApiError {
        message: error.to_string(),
        is_retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::{dns_record_type, fully_qualified};
    use crate::change::RecordType;
    use trust_dns_resolver::proto::rr::RecordType as DnsRecordType;

    #[test]
    fn names_are_made_absolute() {
        assert_eq!("www.example.com.", fully_qualified("www.example.com"));
        assert_eq!("www.example.com.", fully_qualified("www.example.com."));
    }

    #[test]
    fn maps_record_types() {
        assert_eq!(DnsRecordType::A, dns_record_type(RecordType::A));
        assert_eq!(DnsRecordType::AAAA, dns_record_type(RecordType::Aaaa));
        assert_eq!(DnsRecordType::TXT, dns_record_type(RecordType::Spf));
    }
}
