//! Cluster member discovery via forward and reverse DNS.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::error::{BackupError, Result};
use crate::snapshots::SnapshotApi;

/// One member of the clustered service.
#[derive(Clone)]
pub struct Node {
    /// Short name: first dot-separated label of the node's hostname.
    pub name: String,
    /// Snapshot API handle for this node.
    pub api: Arc<dyn SnapshotApi>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").field("name", &self.name).finish()
    }
}

/// Forward and reverse DNS, abstracted so discovery is testable.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// All addresses `host` resolves to.
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// All hostnames `ip` reverse-resolves to.
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>>;
}

/// Resolver backed by the host's DNS configuration.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn from_system_conf() -> Result<Self> {
        let inner = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            BackupError::Resolve(format!("could not load system DNS configuration: {e}"))
        })?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| BackupError::Resolve(format!("could not resolve `{host}`: {e}")))?;

        Ok(lookup.iter().collect())
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>> {
        let lookup = self.inner.reverse_lookup(ip).await.map_err(|e| {
            BackupError::Resolve(format!("could not resolve hostname for {ip}: {e}"))
        })?;

        Ok(lookup.iter().map(|name| name.to_utf8()).collect())
    }
}

/// Resolve `service_name` into its member nodes.
///
/// Only IPv4 addresses qualify; others are skipped. `connect` builds the
/// snapshot API handle for one qualifying address. A handle-construction
/// failure, reverse-lookup failure, or empty reverse-lookup result aborts
/// the whole discovery; no partial node list is ever returned.
///
/// The node name is the first dot-separated label of the first hostname
/// containing `service_name`. When no hostname matches, the name is left
/// empty and a warning is logged; the upload key then has no node segment.
pub async fn discover_nodes<F>(
    resolver: &dyn Resolver,
    service_name: &str,
    connect: F,
) -> Result<Vec<Node>>
where
    F: Fn(Ipv4Addr) -> Result<Arc<dyn SnapshotApi>>,
{
    let ips = resolver.lookup_ips(service_name).await?;

    let mut nodes = Vec::with_capacity(ips.len());
    for ip in ips {
        let address = match ip {
            IpAddr::V4(address) => address,
            IpAddr::V6(_) => continue,
        };

        let api = connect(address)?;

        let hostnames = resolver.reverse_lookup(IpAddr::V4(address)).await?;
        if hostnames.is_empty() {
            return Err(BackupError::Discovery(format!(
                "got empty hostname for {address}"
            )));
        }

        let hostname = hostnames
            .iter()
            .find(|name| name.contains(service_name))
            .cloned()
            .unwrap_or_default();
        if hostname.is_empty() {
            warn!(
                address = %address,
                service = service_name,
                "no hostname matches the service name, node name left empty"
            );
        }

        let name = hostname.split('.').next().unwrap_or_default().to_string();
        debug!(address = %address, name = %name, "discovered node");
        nodes.push(Node { name, api });
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshots::{SnapshotDescription, SnapshotStream};
    use std::collections::HashMap;

    struct StubApi;

    #[async_trait]
    impl SnapshotApi for StubApi {
        async fn list_snapshots(&self, _collection: &str) -> Result<Vec<SnapshotDescription>> {
            Ok(Vec::new())
        }

        async fn create_snapshot(&self, collection: &str) -> Result<SnapshotDescription> {
            Ok(SnapshotDescription {
                name: format!("{collection}.snapshot"),
                size: None,
                creation_time: None,
            })
        }

        async fn delete_snapshot(&self, _collection: &str, _snapshot: &str) -> Result<()> {
            Ok(())
        }

        async fn download_snapshot(
            &self,
            _collection: &str,
            _snapshot: &str,
        ) -> Result<SnapshotStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    struct FakeResolver {
        ips: Result<Vec<IpAddr>>,
        names: HashMap<IpAddr, Result<Vec<String>>>,
    }

    impl FakeResolver {
        fn new(ips: Vec<IpAddr>) -> Self {
            Self {
                ips: Ok(ips),
                names: HashMap::new(),
            }
        }

        fn with_names(mut self, ip: IpAddr, names: Vec<&str>) -> Self {
            self.names
                .insert(ip, Ok(names.into_iter().map(String::from).collect()));
            self
        }
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn lookup_ips(&self, _host: &str) -> Result<Vec<IpAddr>> {
            match &self.ips {
                Ok(ips) => Ok(ips.clone()),
                Err(_) => Err(BackupError::Resolve("no such host".to_string())),
            }
        }

        async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>> {
            match self.names.get(&ip) {
                Some(Ok(names)) => Ok(names.clone()),
                Some(Err(_)) => Err(BackupError::Resolve("ptr lookup failed".to_string())),
                None => Ok(Vec::new()),
            }
        }
    }

    fn stub_connect(_address: Ipv4Addr) -> Result<Arc<dyn SnapshotApi>> {
        Ok(Arc::new(StubApi))
    }

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn resolves_short_names_and_skips_ipv6() {
        let resolver = FakeResolver::new(vec![v4("10.0.0.1"), "::1".parse().unwrap(), v4("10.0.0.2")])
            .with_names(
                v4("10.0.0.1"),
                vec!["search-0.vectors.svc.cluster.local.", "other.example.com."],
            )
            .with_names(
                v4("10.0.0.2"),
                vec!["ignored.example.com.", "search-1.vectors.svc.cluster.local."],
            );

        let nodes = discover_nodes(&resolver, "vectors", stub_connect)
            .await
            .unwrap();

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["search-0", "search-1"]);
    }

    #[tokio::test]
    async fn empty_reverse_lookup_fails_whole_discovery() {
        let resolver = FakeResolver::new(vec![v4("10.0.0.1"), v4("10.0.0.2")]).with_names(
            v4("10.0.0.1"),
            vec!["search-0.vectors.svc.cluster.local."],
        );
        // 10.0.0.2 reverse-resolves to nothing.

        let err = discover_nodes(&resolver, "vectors", stub_connect)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Discovery(_)));
        assert!(err.to_string().contains("10.0.0.2"));
    }

    #[tokio::test]
    async fn forward_resolution_failure_aborts() {
        let resolver = FakeResolver {
            ips: Err(BackupError::Resolve("nxdomain".to_string())),
            names: HashMap::new(),
        };

        let err = discover_nodes(&resolver, "vectors", stub_connect)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Resolve(_)));
    }

    #[tokio::test]
    async fn connect_failure_aborts() {
        let resolver = FakeResolver::new(vec![v4("10.0.0.1")])
            .with_names(v4("10.0.0.1"), vec!["search-0.vectors.svc.cluster.local."]);

        let err = discover_nodes(&resolver, "vectors", |address| {
            Err(BackupError::Config(format!("bad address {address}")))
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn unmatched_hostnames_leave_name_empty() {
        let resolver = FakeResolver::new(vec![v4("10.0.0.1")])
            .with_names(v4("10.0.0.1"), vec!["unrelated.example.com."]);

        let nodes = discover_nodes(&resolver, "vectors", stub_connect)
            .await
            .unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "");
    }
}
