//! CIDR-based allow/block policy and trusted-proxy-aware client IP
//! resolution.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::errors::AppError;

pub struct IpPolicy {
    allowlist: Vec<IpNet>,
    blocklist: Vec<IpNet>,
    trusted_proxies: Vec<IpAddr>,
}

impl IpPolicy {
    pub fn new(
        allowlist: &[String],
        blocklist: &[String],
        trusted_proxies: Vec<IpAddr>,
    ) -> anyhow::Result<Self> {
        let parse_all = |entries: &[String]| -> anyhow::Result<Vec<IpNet>> {
            entries
                .iter()
                .map(|s| IpNet::from_str(s).map_err(|e| anyhow::anyhow!("invalid CIDR {s}: {e}")))
                .collect()
        };
        Ok(Self {
            allowlist: parse_all(allowlist)?,
            blocklist: parse_all(blocklist)?,
            trusted_proxies,
        })
    }

    /// Blocklist dominates allowlist: an address in both is denied. An empty
    /// allowlist means "allow everything not blocked".
    pub fn check(&self, addr: IpAddr) -> Result<(), AppError> {
        if self.blocklist.iter().any(|net| net.contains(&addr)) {
            return Err(AppError::Forbidden("client address is blocked".to_string()));
        }
        if !self.allowlist.is_empty() && !self.allowlist.iter().any(|net| net.contains(&addr)) {
            return Err(AppError::Forbidden(
                "client address is not allowlisted".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the real client address from a socket peer address plus an
    /// optional `X-Forwarded-For` header: walks the header's comma-separated
    /// list right-to-left from the peer, skipping entries that are trusted
    /// proxies, and returns the first (leftmost) one that isn't.
    pub fn resolve_client_ip(&self, peer: IpAddr, forwarded_for: Option<&str>) -> IpAddr {
        if !self.trusted_proxies.contains(&peer) {
            return peer;
        }
        let Some(header) = forwarded_for else {
            return peer;
        };

        let hops: Vec<IpAddr> = header
            .split(',')
            .filter_map(|s| s.trim().parse::<IpAddr>().ok())
            .collect();

        hops.into_iter()
            .find(|ip| !self.trusted_proxies.contains(ip))
            .unwrap_or(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_dominates_allowlist() {
        let policy = IpPolicy::new(
            &["10.0.0.0/8".to_string()],
            &["10.0.0.5/32".to_string()],
            vec![],
        )
        .unwrap();
        assert!(policy.check("10.0.0.5".parse().unwrap()).is_err());
        assert!(policy.check("10.0.0.6".parse().unwrap()).is_ok());
    }

    #[test]
    fn empty_allowlist_allows_everything_not_blocked() {
        let policy = IpPolicy::new(&[], &["192.168.1.1/32".to_string()], vec![]).unwrap();
        assert!(policy.check("203.0.113.9".parse().unwrap()).is_ok());
        assert!(policy.check("192.168.1.1".parse().unwrap()).is_err());
    }

    #[test]
    fn resolves_leftmost_untrusted_hop() {
        let policy = IpPolicy::new(&[], &[], vec!["10.0.0.1".parse().unwrap()]).unwrap();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let resolved = policy.resolve_client_ip(peer, Some("203.0.113.9, 10.0.0.1"));
        assert_eq!(resolved, "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ignores_forwarded_for_from_untrusted_peer() {
        let policy = IpPolicy::new(&[], &[], vec!["10.0.0.1".parse().unwrap()]).unwrap();
        let peer: IpAddr = "203.0.113.1".parse().unwrap();
        let resolved = policy.resolve_client_ip(peer, Some("198.51.100.1"));
        assert_eq!(resolved, peer);
    }
}
