use crate::error::{Error, Result};

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Address family of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(ip: &IpAddr) -> Family {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// The wildcard host of this family.
    pub fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// The loopback host of this family.
    pub fn loopback(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Family::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }
}

/// A resolved network endpoint.
///
/// Immutable and `Copy`. The family is implied by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    host: IpAddr,
    port: u16,
}

impl Address {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn family(&self) -> Family {
        Family::of(&self.host)
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Raw host bytes in network order: 4 for IPv4, 16 for IPv6.
    pub fn host_bytes(&self) -> Vec<u8> {
        match self.host {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The same host with another port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host,
            port,
        }
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.to_socket_addr()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_socket_addr().fmt(f)
    }
}

/// Resolves `host` to its candidate addresses, in resolver order.
///
/// Blocks the calling thread on the system resolver; call it before
/// entering latency-sensitive code.
pub fn resolve(host: &str, port: u16) -> Result<Vec<Address>> {
    let candidates: Vec<Address> = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::Resolve(format!("{host}: {err}")))?
        .map(Address::from)
        .collect();

    if candidates.is_empty() {
        return Err(Error::Resolve(format!("{host}: no addresses")));
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::{Address, Family, resolve};

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    #[test]
    fn address_carries_family_and_wire_bytes() {
        let addr = Address::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 25);

        assert_eq!(addr.family(), Family::V4);
        assert_eq!(addr.host_bytes(), vec![10, 0, 0, 7]);
        assert_eq!(addr.with_port(2525).port(), 2525);
        assert_eq!(
            SocketAddr::from(addr),
            "10.0.0.7:25".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn literal_hosts_resolve_without_lookup() {
        let candidates = resolve("127.0.0.1", 80).unwrap();

        assert_eq!(candidates, vec![Address::new(Family::V4.loopback(), 80)]);
    }
}
