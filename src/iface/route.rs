use heapless::Vec;

use crate::config::IFACE_MAX_ROUTE_COUNT;
use crate::wire::{Ipv4Address, Ipv4AddressExt, Ipv4Cidr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTableFull;

impl core::fmt::Display for RouteTableFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Route table full")
    }
}

impl core::error::Error for RouteTableFull {}

/// A prefix of addresses reachable from one of our local addresses.
///
/// The `source` address is what a connection to a destination inside `cidr` binds to
/// when its socket was bound to the wildcard address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub cidr: Ipv4Cidr,
    /// `None` for a directly attached network.
    pub via_router: Option<Ipv4Address>,
    pub source: Ipv4Address,
}

const IPV4_DEFAULT: Ipv4Cidr = Ipv4Cidr::new(Ipv4Address::new(0, 0, 0, 0), 0);

impl Route {
    /// Returns a route to the network `cidr` belongs to, leaving from the address in `cidr`.
    pub fn new_direct(cidr: Ipv4Cidr) -> Route {
        let network = Ipv4Cidr::new(
            Ipv4Address::from_bits(cidr.address().to_bits() & cidr.netmask().to_bits()),
            cidr.prefix_len(),
        );
        Route {
            cidr: network,
            via_router: None,
            source: cidr.address(),
        }
    }

    /// Returns a route to 0.0.0.0/0 via the `gateway`, leaving from `source`.
    pub fn new_ipv4_gateway(gateway: Ipv4Address, source: Ipv4Address) -> Route {
        Route {
            cidr: IPV4_DEFAULT,
            via_router: Some(gateway),
            source,
        }
    }
}

/// A routing table, as returned by the IP layer's route configuration query.
#[derive(Debug, Default, Clone)]
pub struct Routes {
    storage: Vec<Route, IFACE_MAX_ROUTE_COUNT>,
}

impl Routes {
    /// Creates a new empty routing table.
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
        }
    }

    /// Update the routes of this node.
    pub fn update<F: FnOnce(&mut Vec<Route, IFACE_MAX_ROUTE_COUNT>)>(&mut self, f: F) {
        f(&mut self.storage);
    }

    /// Add a route for a directly attached network (ie. "ip addr add `cidr`").
    pub fn add_direct(&mut self, cidr: Ipv4Cidr) -> Result<(), RouteTableFull> {
        self.storage
            .push(Route::new_direct(cidr))
            .map_err(|_| RouteTableFull)
    }

    /// Add a default ipv4 gateway (ie. "ip route add 0.0.0.0/0 via `gateway`").
    ///
    /// On success, returns the previous default route, if any.
    pub fn add_default_ipv4_route(
        &mut self,
        gateway: Ipv4Address,
        source: Ipv4Address,
    ) -> Result<Option<Route>, RouteTableFull> {
        let old = self.remove_default_ipv4_route();
        self.storage
            .push(Route::new_ipv4_gateway(gateway, source))
            .map_err(|_| RouteTableFull)?;
        Ok(old)
    }

    /// Remove the default ipv4 gateway
    ///
    /// On success, returns the previous default route, if any.
    pub fn remove_default_ipv4_route(&mut self) -> Option<Route> {
        if let Some((i, _)) = self
            .storage
            .iter()
            .enumerate()
            .find(|(_, r)| r.cidr == IPV4_DEFAULT)
        {
            Some(self.storage.remove(i))
        } else {
            None
        }
    }

    /// Find the most specific route towards `addr`.
    pub fn lookup(&self, addr: &Ipv4Address) -> Option<&Route> {
        if !addr.x_is_unicast() {
            return None;
        }

        self.storage
            .iter()
            .filter(|route| route.cidr.contains_addr(addr))
            // pick the most specific one (highest prefix_len)
            .max_by_key(|route| route.cidr.prefix_len())
    }

    /// Query whether `addr` is one of our own addresses.
    pub fn has_source(&self, addr: &Ipv4Address) -> bool {
        self.storage.iter().any(|route| route.source == *addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.storage.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn routes() -> Routes {
        let mut routes = Routes::new();
        routes
            .add_direct(Ipv4Cidr::new(Ipv4Address::new(10, 0, 0, 1), 24))
            .unwrap();
        routes
            .add_direct(Ipv4Cidr::new(Ipv4Address::new(192, 168, 7, 2), 16))
            .unwrap();
        routes
            .add_default_ipv4_route(Ipv4Address::new(10, 0, 0, 254), Ipv4Address::new(10, 0, 0, 1))
            .unwrap();
        routes
    }

    #[test]
    fn test_most_specific_route_wins() {
        let routes = routes();
        let route = routes.lookup(&Ipv4Address::new(10, 0, 0, 77)).unwrap();
        assert_eq!(route.source, Ipv4Address::new(10, 0, 0, 1));
        assert_eq!(route.via_router, None);

        let route = routes.lookup(&Ipv4Address::new(192, 168, 1, 1)).unwrap();
        assert_eq!(route.source, Ipv4Address::new(192, 168, 7, 2));

        let route = routes.lookup(&Ipv4Address::new(8, 8, 8, 8)).unwrap();
        assert_eq!(route.via_router, Some(Ipv4Address::new(10, 0, 0, 254)));
    }

    #[test]
    fn test_no_route_for_broadcast() {
        assert!(routes().lookup(&Ipv4Address::BROADCAST).is_none());
        assert!(Routes::new().lookup(&Ipv4Address::new(10, 0, 0, 2)).is_none());
    }

    #[test]
    fn test_has_source() {
        let routes = routes();
        assert!(routes.has_source(&Ipv4Address::new(192, 168, 7, 2)));
        assert!(!routes.has_source(&Ipv4Address::new(192, 168, 7, 3)));
    }

    #[test]
    fn test_default_route_replaced() {
        let mut routes = routes();
        let old = routes
            .add_default_ipv4_route(Ipv4Address::new(10, 0, 0, 253), Ipv4Address::new(10, 0, 0, 1))
            .unwrap();
        assert_eq!(old.map(|r| r.via_router), Some(Some(Ipv4Address::new(10, 0, 0, 254))));
        assert_eq!(routes.iter().count(), 3);
    }
}
