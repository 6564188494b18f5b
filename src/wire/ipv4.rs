use core::fmt;

use super::{Error, Result};

/// Length of an IPv4 header without options.
///
/// The engine clamps its MSS against `mtu - HEADER_LEN - TCP_HEADER_LEN`, so it never
/// accounts for IP options.
pub const HEADER_LEN: usize = 20;

/// Minimum MTU required of all links supporting IPv4. See [RFC 791 § 3.1].
///
/// [RFC 791 § 3.1]: https://tools.ietf.org/html/rfc791#section-3.1
pub const MIN_MTU: usize = 576;

/// Size of IPv4 adderess in octets.
pub const ADDR_SIZE: usize = 4;

pub use core::net::Ipv4Addr as Address;

pub(crate) trait AddressExt {
    /// Construct an IPv4 address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not four octets long.
    fn from_bytes(data: &[u8]) -> Self;

    /// Query whether the address is an unicast address.
    ///
    /// `x_` prefix is to avoid a collision with the still-unstable method in `core::ip`.
    fn x_is_unicast(&self) -> bool;
}

impl AddressExt for Address {
    fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; ADDR_SIZE];
        bytes.copy_from_slice(data);
        Address::from_bits(u32::from_be_bytes(bytes))
    }

    fn x_is_unicast(&self) -> bool {
        !(self.is_broadcast() || self.is_multicast() || self.is_unspecified())
    }
}

/// A specification of an IPv4 CIDR block, containing an address and a variable-length
/// subnet masking prefix length.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Cidr {
    address: Address,
    prefix_len: u8,
}

impl Cidr {
    /// Create an IPv4 CIDR block from the given address and prefix length.
    ///
    /// # Panics
    /// This function panics if the prefix length is larger than 32.
    pub const fn new(address: Address, prefix_len: u8) -> Cidr {
        assert!(prefix_len <= 32);
        Cidr {
            address,
            prefix_len,
        }
    }

    /// Create an IPv4 CIDR block from the given address and network mask.
    pub fn from_netmask(addr: Address, netmask: Address) -> Result<Cidr> {
        let netmask = netmask.to_bits();
        if netmask.leading_zeros() == 0 && netmask.trailing_zeros() == netmask.count_zeros() {
            Ok(Cidr {
                address: addr,
                prefix_len: netmask.count_ones() as u8,
            })
        } else {
            Err(Error::Malformed)
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn netmask(&self) -> Address {
        if self.prefix_len == 0 {
            return Address::new(0, 0, 0, 0);
        }

        let number = 0xffffffffu32 << (32 - self.prefix_len);
        Address::from_bits(number)
    }

    /// Query whether the subnetwork described by this IPv4 CIDR block contains
    /// the given address.
    pub fn contains_addr(&self, addr: &Address) -> bool {
        self.address.to_bits() & self.netmask().to_bits()
            == addr.to_bits() & self.netmask().to_bits()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cidr_from_netmask() {
        let cidr =
            Cidr::from_netmask(Address::new(10, 0, 1, 7), Address::new(255, 255, 255, 0)).unwrap();
        assert_eq!(cidr.prefix_len(), 24);
        assert!(cidr.contains_addr(&Address::new(10, 0, 1, 200)));
        assert!(!cidr.contains_addr(&Address::new(10, 0, 2, 1)));
        assert_eq!(
            Cidr::from_netmask(Address::new(10, 0, 1, 7), Address::new(255, 0, 255, 0)),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn test_default_route_contains_all() {
        let cidr = Cidr::new(Address::UNSPECIFIED, 0);
        assert!(cidr.contains_addr(&Address::new(192, 168, 7, 9)));
    }

    #[test]
    fn test_unicast() {
        assert!(Address::new(10, 0, 0, 1).x_is_unicast());
        assert!(!Address::BROADCAST.x_is_unicast());
        assert!(!Address::UNSPECIFIED.x_is_unicast());
        assert_eq!(Address::from_bytes(&[10, 0, 0, 1]), Address::new(10, 0, 0, 1));
    }
}
