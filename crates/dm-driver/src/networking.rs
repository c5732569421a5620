//! Public IP selection and the address the machine is reached on.

use std::net::{IpAddr, Ipv6Addr};

use ipnet::Ipv6Net;
use tracing::info;

use crate::driver::Driver;
use crate::error::{Error, Result, ResultExt};
use crate::types::{CreateServerPublicNet, PrimaryIp, Server};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Driver {
    pub(crate) async fn primary_ipv4(&mut self) -> Result<Option<PrimaryIp>> {
        self.primary_ip(Family::V4).await
    }

    pub(crate) async fn primary_ipv6(&mut self) -> Result<Option<PrimaryIp>> {
        self.primary_ip(Family::V6).await
    }

    async fn primary_ip(&mut self, family: Family) -> Result<Option<PrimaryIp>> {
        let (raw, cached) = match family {
            Family::V4 => (&self.config.primary_ipv4, &self.cache.primary_ipv4),
            Family::V6 => (&self.config.primary_ipv6, &self.cache.primary_ipv6),
        };
        if raw.is_empty() {
            return Ok(None);
        }
        if let Some(ip) = cached {
            return Ok(Some(ip.clone()));
        }

        let raw = raw.clone();
        let ip = self.resolve_primary_ip(&raw).await?;
        match family {
            Family::V4 => self.cache.primary_ipv4 = Some(ip.clone()),
            Family::V6 => self.cache.primary_ipv6 = Some(ip.clone()),
        }
        Ok(Some(ip))
    }

    /// Literal addresses are looked up by address, anything else by ID or
    /// name. The address family is not checked.
    async fn resolve_primary_ip(&mut self, raw: &str) -> Result<PrimaryIp> {
        let api = self.api();
        let found = if raw.parse::<IpAddr>().is_ok() {
            api.primary_ip_by_address(raw).await
        } else {
            api.primary_ip(raw).await
        };

        let ip = found
            .context("could not get primary IP")?
            .ok_or_else(|| Error::not_found("primary IP", raw))?;
        self.observe("primary ip", &ip);
        Ok(ip)
    }

    /// Public network settings for the create request; `None` keeps the
    /// provider defaults.
    pub(crate) async fn public_net(&mut self) -> Result<Option<CreateServerPublicNet>> {
        let ipv4 = self.primary_ipv4().await?;
        let ipv6 = self.primary_ipv6().await?;

        let cfg = &self.config;
        if !(cfg.disable_public_ipv4 || cfg.disable_public_ipv6 || ipv4.is_some() || ipv6.is_some()) {
            return Ok(None);
        }
        Ok(Some(CreateServerPublicNet {
            enable_ipv4: !cfg.disable_public_ipv4 || ipv4.is_some(),
            enable_ipv6: !cfg.disable_public_ipv6 || ipv6.is_some(),
            ipv4: ipv4.map(|ip| ip.id),
            ipv6: ipv6.map(|ip| ip.id),
        }))
    }

    /// Record the address the machine is reachable on.
    pub(crate) async fn configure_network_access(&mut self, created: &Server) -> Result<()> {
        let address = if self.config.use_private_network {
            self.wait_for_private_address(created.id).await?
        } else if self.config.disable_public_ipv4 {
            info!("using public IPv6 network");
            let network = created
                .public_net
                .ipv6
                .as_ref()
                .ok_or_else(|| Error::Network("server has no public IPv6 network".into()))?;
            let address = ipv6_host_address(&network.ip)?.to_string();
            info!(address = %address, "resolved IPv6 host address");
            address
        } else {
            info!("using public network");
            created
                .public_net
                .ipv4
                .as_ref()
                .map(|v4| v4.ip.clone())
                .ok_or_else(|| Error::Network("server has no public IPv4 address".into()))?
        };

        self.base.ip_address = address;
        Ok(())
    }

    async fn wait_for_private_address(&mut self, server_id: i64) -> Result<String> {
        let api = self.api();
        loop {
            info!(server_id, "waiting until private network is attached");
            let server = api
                .server(server_id)
                .await
                .context(format!("could not get newly created server [{server_id}]"))?
                .ok_or_else(|| Error::not_found("server", server_id))?;
            if let Some(net) = server.private_net.first() {
                return Ok(net.ip.clone());
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

/// A host address within an IPv6 network given in CIDR notation. A bare
/// prefix (no host bits set) gets its lowest bit set. A plain address is
/// used as-is.
pub fn ipv6_host_address(cidr: &str) -> Result<Ipv6Addr> {
    let net: Ipv6Net = match cidr.parse() {
        Ok(net) => net,
        Err(_) => {
            return cidr
                .parse()
                .map_err(|_| Error::Network(format!("invalid IPv6 network {cidr}")));
        }
    };

    if net.addr() == net.network() {
        return Ok(Ipv6Addr::from(u128::from(net.network()) | 1));
    }
    Ok(net.addr())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{FakeCloud, driver_with};

    #[test]
    fn bare_prefix_gets_lowest_host_bit() {
        assert_eq!(
            ipv6_host_address("2001:db8:1:2::/64").unwrap(),
            "2001:db8:1:2::1".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn explicit_host_is_kept() {
        assert_eq!(
            ipv6_host_address("2001:db8:1:2::42/64").unwrap(),
            "2001:db8:1:2::42".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn malformed_networks_are_rejected() {
        assert!(ipv6_host_address("not-an-ip/64").is_err());
        assert!(ipv6_host_address("2001:db8::/129").is_err());
    }

    #[test]
    fn plain_address_is_kept() {
        assert_eq!(
            ipv6_host_address("2001:db8::42").unwrap(),
            "2001:db8::42".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn wide_prefix_is_handled() {
        assert_eq!(
            ipv6_host_address("2001:db8::/32").unwrap(),
            "2001:db8::1".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[tokio::test]
    async fn primary_ip_literal_resolves_by_address() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let ip = cloud.add_primary_ip("front", "203.0.113.50");
        let mut d = driver_with(&cloud);
        d.config.primary_ipv4 = "203.0.113.50".into();

        assert_eq!(d.primary_ipv4().await.unwrap().unwrap().id, ip.id);
        assert_eq!(cloud.count("primary_ip_by_address"), 1);
        assert_eq!(cloud.count("primary_ip"), 0);
    }

    #[tokio::test]
    async fn primary_ip_name_resolves_by_name_without_family_check() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let ip = cloud.add_primary_ip("front-v6", "2001:db8::/64");
        let mut d = driver_with(&cloud);
        d.config.primary_ipv4 = "front-v6".into();

        assert_eq!(d.primary_ipv4().await.unwrap().unwrap().id, ip.id);
        assert_eq!(cloud.count("primary_ip"), 1);

        d.config.primary_ipv6 = "nope".into();
        assert_eq!(
            d.primary_ipv6().await.unwrap_err().to_string(),
            "primary IP not found: nope"
        );
    }

    #[tokio::test]
    async fn public_net_defaults_are_left_alone() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let mut d = driver_with(&cloud);
        assert!(d.public_net().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn public_net_with_disabled_ipv4_and_primary_ipv6() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let ip = cloud.add_primary_ip("v6", "2001:db8:5::/64");
        let mut d = driver_with(&cloud);
        d.config.disable_public_ipv4 = true;
        d.config.primary_ipv6 = "v6".into();

        let net = d.public_net().await.unwrap().unwrap();
        assert!(!net.enable_ipv4);
        assert!(net.enable_ipv6);
        assert_eq!(net.ipv4, None);
        assert_eq!(net.ipv6, Some(ip.id));
    }

    #[tokio::test]
    async fn address_selection_by_network_mode() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let server = cloud.server_template("m");

        let mut d = driver_with(&cloud);
        d.configure_network_access(&server).await.unwrap();
        assert_eq!(d.base.ip_address, "203.0.113.10");

        let mut d = driver_with(&cloud);
        d.config.disable_public_ipv4 = true;
        d.configure_network_access(&server).await.unwrap();
        assert_eq!(d.base.ip_address, "2001:db8:1:2::1");
    }

    #[tokio::test]
    async fn private_address_is_polled_until_attached() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let id = cloud.add_server_with_late_private_net("m", 2);
        let mut d = driver_with(&cloud);
        d.config.use_private_network = true;

        let server = cloud.server_template("m");
        let server = crate::types::Server { id, ..server };
        d.configure_network_access(&server).await.unwrap();
        assert_eq!(d.base.ip_address, "10.0.0.2");
        assert_eq!(cloud.count("server"), 3);
    }
}
