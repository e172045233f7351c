//! Tunnel address allocation.
//!
//! Each configured CIDR becomes an [`AddressPool`] that hands out its usable
//! host addresses in ascending order, exactly once. The
//! [`AddressAllocator`] combines up to one IPv4 and one IPv6 pool and
//! reserves the first host of every pool for the server before any client
//! can ask for an address.
//!
//! # Usable hosts
//!
//! ```text
//! 10.13.13.0/24          -> 10.13.13.1 .. 10.13.13.254   (network, broadcast excluded)
//! 10.13.13.0/31          -> 10.13.13.0, 10.13.13.1        (point-to-point)
//! fc00:bfb7:3bdb:ae33::/64 -> ::1 .. ::ffff:ffff:ffff:ffff (subnet-router anycast excluded)
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use tracing::debug;

use crate::types::{AddressFamily, AssignedAddress};

/// Errors that can occur during address allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// No more usable host addresses in the pool.
    #[error("address pool {cidr} is exhausted")]
    PoolExhausted {
        /// The pool that ran out of addresses.
        cidr: IpNet,
    },
    /// The allocator was created without any pool.
    #[error("no address pools configured")]
    NoPools,
    /// More than one pool was configured for an address family.
    #[error("more than one {family} pool configured")]
    DuplicateFamily {
        /// The repeated family.
        family: AddressFamily,
    },
    /// Invalid CIDR configuration.
    #[error("invalid CIDR: {message}")]
    InvalidCidr {
        /// Description of the error.
        message: String,
    },
}

/// A CIDR block plus a cursor into its usable-host sequence.
///
/// The cursor only moves forward; an address is issued at most once.
#[derive(Debug, Clone)]
pub struct AddressPool {
    cidr: IpNet,
    /// Next address to issue, `None` once the cursor ran past `u128::MAX`.
    next: Option<u128>,
    /// Last usable address (inclusive).
    last: u128,
    issued: u128,
}

impl AddressPool {
    /// Creates a pool over the usable hosts of `cidr`.
    ///
    /// Host bits in `cidr` are ignored.
    #[must_use]
    pub fn new(cidr: IpNet) -> Self {
        let cidr = cidr.trunc();
        let (first, last) = usable_range(&cidr);
        Self {
            cidr,
            next: Some(first),
            last,
            issued: 0,
        }
    }

    /// The pool's network.
    #[must_use]
    pub const fn cidr(&self) -> IpNet {
        self.cidr
    }

    /// The pool's address family.
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.cidr.addr())
    }

    /// Prefix length clients put on their interface address.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.cidr.prefix_len()
    }

    /// Number of addresses issued so far.
    #[must_use]
    pub const fn issued(&self) -> u128 {
        self.issued
    }

    /// Number of addresses that can still be issued.
    #[must_use]
    pub fn remaining(&self) -> u128 {
        match self.next {
            Some(next) if next <= self.last => self.last - next + 1,
            _ => 0,
        }
    }

    /// Issues the next usable host address.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::PoolExhausted`] once every usable host has
    /// been issued. The pool never wraps around.
    pub fn reserve(&mut self) -> Result<IpAddr, AllocationError> {
        let value = self
            .next
            .filter(|next| *next <= self.last)
            .ok_or(AllocationError::PoolExhausted { cidr: self.cidr })?;

        self.next = value.checked_add(1);
        self.issued += 1;
        Ok(self.addr_from(value))
    }

    /// Issues the next address in both its tunnel and host forms.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::PoolExhausted`] when the pool is used up.
    pub fn reserve_assigned(&mut self) -> Result<AssignedAddress, AllocationError> {
        let addr = self.reserve()?;
        Ok(AssignedAddress {
            tunnel: with_prefix(addr, self.prefix_len())?,
            host: with_prefix(addr, self.family().host_prefix_len())?,
        })
    }

    fn addr_from(&self, value: u128) -> IpAddr {
        match self.cidr {
            IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
            IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
        }
    }
}

fn with_prefix(addr: IpAddr, prefix_len: u8) -> Result<IpNet, AllocationError> {
    IpNet::new(addr, prefix_len).map_err(|e| AllocationError::InvalidCidr {
        message: format!("{addr}/{prefix_len}: {e}"),
    })
}

/// First and last usable host of a network, as integers.
fn usable_range(cidr: &IpNet) -> (u128, u128) {
    match cidr {
        IpNet::V4(net) => {
            let network = u128::from(u32::from(net.network()));
            let broadcast = u128::from(u32::from(net.broadcast()));
            if net.prefix_len() >= 31 {
                (network, broadcast)
            } else {
                (network + 1, broadcast - 1)
            }
        }
        IpNet::V6(net) => {
            let network = u128::from(net.network());
            let last = u128::from(net.broadcast());
            if net.prefix_len() >= 127 {
                (network, last)
            } else {
                (network + 1, last)
            }
        }
    }
}

/// Allocator over one pool per configured address family.
///
/// The server's addresses are reserved when the allocator is created, so the
/// server always holds the first usable host of every pool.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    pools: Vec<AddressPool>,
    server: Vec<AssignedAddress>,
}

impl AddressAllocator {
    /// Creates an allocator and reserves the server's addresses.
    ///
    /// Pools are ordered IPv4 first, then IPv6.
    ///
    /// # Errors
    ///
    /// Returns an error if no pool is given, if two pools share a family, or
    /// if a pool has no usable host for the server.
    pub fn new(cidrs: impl IntoIterator<Item = IpNet>) -> Result<Self, AllocationError> {
        let mut pools: Vec<AddressPool> = cidrs.into_iter().map(AddressPool::new).collect();
        if pools.is_empty() {
            return Err(AllocationError::NoPools);
        }
        pools.sort_by_key(|pool| pool.family() == AddressFamily::V6);
        if let Some(pair) = pools.windows(2).find(|w| w[0].family() == w[1].family()) {
            return Err(AllocationError::DuplicateFamily {
                family: pair[0].family(),
            });
        }

        let server = pools
            .iter_mut()
            .map(AddressPool::reserve_assigned)
            .collect::<Result<Vec<_>, _>>()?;

        for address in &server {
            debug!(address = %address.tunnel, "reserved server address");
        }

        Ok(Self { pools, server })
    }

    /// Addresses reserved for the server, one per pool.
    #[must_use]
    pub fn server_addresses(&self) -> &[AssignedAddress] {
        &self.server
    }

    /// The pools, IPv4 first.
    #[must_use]
    pub fn pools(&self) -> &[AddressPool] {
        &self.pools
    }

    /// Number of clients that can still receive a full set of addresses.
    #[must_use]
    pub fn remaining_clients(&self) -> u128 {
        self.pools
            .iter()
            .map(AddressPool::remaining)
            .min()
            .unwrap_or(0)
    }

    /// Reserves the next client's addresses, one per pool.
    ///
    /// Either every pool issues an address or none does.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::PoolExhausted`] naming the first pool that
    /// has no address left.
    pub fn next_client(&mut self) -> Result<Vec<AssignedAddress>, AllocationError> {
        if let Some(pool) = self.pools.iter().find(|pool| pool.remaining() == 0) {
            return Err(AllocationError::PoolExhausted { cidr: pool.cidr() });
        }
        self.pools
            .iter_mut()
            .map(AddressPool::reserve_assigned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().expect("valid cidr")
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("valid ip")
    }

    // ==================== POOL TESTS ====================

    #[test]
    fn test_pool_issues_ascending_hosts() {
        let mut pool = AddressPool::new(net("10.13.13.0/24"));
        assert_eq!(pool.reserve(), Ok(ip("10.13.13.1")));
        assert_eq!(pool.reserve(), Ok(ip("10.13.13.2")));
        assert_eq!(pool.reserve(), Ok(ip("10.13.13.3")));
        assert_eq!(pool.issued(), 3);
        assert_eq!(pool.remaining(), 251);
    }

    #[test]
    fn test_pool_excludes_broadcast() {
        let mut pool = AddressPool::new(net("192.168.0.0/30"));
        assert_eq!(pool.reserve(), Ok(ip("192.168.0.1")));
        assert_eq!(pool.reserve(), Ok(ip("192.168.0.2")));
        assert_eq!(
            pool.reserve(),
            Err(AllocationError::PoolExhausted {
                cidr: net("192.168.0.0/30")
            })
        );
    }

    #[test]
    fn test_pool_exhaustion_is_sticky() {
        let mut pool = AddressPool::new(net("10.0.0.7/32"));
        assert_eq!(pool.reserve(), Ok(ip("10.0.0.7")));
        assert!(pool.reserve().is_err());
        assert!(pool.reserve().is_err());
        assert_eq!(pool.issued(), 1);
    }

    #[test]
    fn test_point_to_point_pool_uses_both_addresses() {
        let mut pool = AddressPool::new(net("10.0.0.0/31"));
        assert_eq!(pool.reserve(), Ok(ip("10.0.0.0")));
        assert_eq!(pool.reserve(), Ok(ip("10.0.0.1")));
        assert!(pool.reserve().is_err());
    }

    #[test]
    fn test_ipv6_pool_skips_subnet_router_anycast() {
        let mut pool = AddressPool::new(net("fc00::/64"));
        assert_eq!(pool.reserve(), Ok(ip("fc00::1")));
        assert_eq!(pool.reserve(), Ok(ip("fc00::2")));
    }

    #[test]
    fn test_ipv6_pool_includes_all_ones() {
        let mut pool = AddressPool::new(net("fc00::/126"));
        let issued: Vec<IpAddr> = std::iter::from_fn(|| pool.reserve().ok()).collect();
        assert_eq!(issued, vec![ip("fc00::1"), ip("fc00::2"), ip("fc00::3")]);
    }

    #[test]
    fn test_pool_truncates_host_bits() {
        let pool = AddressPool::new(net("10.13.13.77/24"));
        assert_eq!(pool.cidr(), net("10.13.13.0/24"));
    }

    #[test]
    fn test_reserve_assigned_pairs_tunnel_and_host() {
        let mut pool = AddressPool::new(net("fc00:bfb7:3bdb:ae33::/64"));
        let assigned = pool.reserve_assigned().expect("should allocate");
        assert_eq!(assigned.tunnel.to_string(), "fc00:bfb7:3bdb:ae33::1/64");
        assert_eq!(assigned.host.to_string(), "fc00:bfb7:3bdb:ae33::1/128");
        assert_eq!(assigned.family(), AddressFamily::V6);
    }

    // ==================== ALLOCATOR TESTS ====================

    #[test]
    fn test_allocator_requires_a_pool() {
        assert_eq!(
            AddressAllocator::new(Vec::new()).err(),
            Some(AllocationError::NoPools)
        );
    }

    #[test]
    fn test_allocator_rejects_two_pools_of_one_family() {
        let result = AddressAllocator::new([net("10.0.0.0/24"), net("10.1.0.0/24")]);
        assert_eq!(
            result.err(),
            Some(AllocationError::DuplicateFamily {
                family: AddressFamily::V4
            })
        );
    }

    #[test]
    fn test_server_gets_first_host_of_each_pool() {
        let allocator =
            AddressAllocator::new([net("fc00::/64"), net("10.13.13.0/24")]).expect("allocator");
        let server: Vec<String> = allocator
            .server_addresses()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(server, ["10.13.13.1/24", "fc00::1/64"]);
    }

    #[test]
    fn test_clients_follow_server_in_order() {
        let mut allocator = AddressAllocator::new([net("10.13.13.0/24")]).expect("allocator");
        let first = allocator.next_client().expect("client 0");
        let second = allocator.next_client().expect("client 1");
        assert_eq!(first[0].tunnel.to_string(), "10.13.13.2/24");
        assert_eq!(first[0].host.to_string(), "10.13.13.2/32");
        assert_eq!(second[0].tunnel.to_string(), "10.13.13.3/24");
        assert_eq!(second[0].host.to_string(), "10.13.13.3/32");
    }

    #[test]
    fn test_dual_stack_client_gets_one_address_per_family() {
        let mut allocator =
            AddressAllocator::new([net("10.13.13.0/24"), net("fc00::/64")]).expect("allocator");
        let client = allocator.next_client().expect("client");
        assert_eq!(client.len(), 2);
        assert_eq!(client[0].host.to_string(), "10.13.13.2/32");
        assert_eq!(client[1].host.to_string(), "fc00::2/128");
    }

    #[test]
    fn test_exhaustion_does_not_burn_other_pool() {
        let mut allocator =
            AddressAllocator::new([net("10.0.0.0/30"), net("fc00::/64")]).expect("allocator");
        allocator.next_client().expect("one client fits");
        assert_eq!(allocator.remaining_clients(), 0);

        let err = allocator.next_client().expect_err("pool exhausted");
        assert_eq!(
            err,
            AllocationError::PoolExhausted {
                cidr: net("10.0.0.0/30")
            }
        );
        assert_eq!(allocator.pools()[1].issued(), 2);
    }

    #[test]
    fn test_single_host_pool_leaves_nothing_for_clients() {
        let mut allocator = AddressAllocator::new([net("10.0.0.1/32")]).expect("allocator");
        assert!(matches!(
            allocator.next_client(),
            Err(AllocationError::PoolExhausted { .. })
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn nth_client_gets_nth_host_after_server(prefix in 24u8..=29, count in 1usize..6) {
                let cidr = net(&format!("10.13.0.0/{prefix}"));
                let mut allocator = AddressAllocator::new([cidr]).expect("allocator");
                prop_assert_eq!(allocator.server_addresses()[0].addr(), ip("10.13.0.1"));

                for n in 0..count {
                    let client = allocator.next_client().expect("room for client");
                    let expected = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 13, 0, 2)) + n as u32);
                    prop_assert_eq!(client[0].addr(), IpAddr::V4(expected));
                    prop_assert_eq!(client[0].tunnel.prefix_len(), prefix);
                    prop_assert_eq!(client[0].host.prefix_len(), 32);
                }
            }

            #[test]
            fn pool_never_repeats_and_stays_in_network(prefix in 26u8..=30) {
                let cidr = net(&format!("172.16.5.0/{prefix}"));
                let mut pool = AddressPool::new(cidr);
                let issued: Vec<IpAddr> = std::iter::from_fn(|| pool.reserve().ok()).collect();

                prop_assert_eq!(issued.len() as u128, (1u128 << (32 - prefix)) - 2);
                prop_assert!(issued.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(issued.iter().all(|addr| cidr.contains(addr)));
                prop_assert!(!issued.contains(&cidr.network()));
                prop_assert!(!issued.contains(&cidr.broadcast()));
            }
        }
    }
}
