/*! Network interface logic.

The `iface` module connects the protocol engine to the IP layer. It demultiplexes
inbound segments to connections and listeners, answers segments nobody owns with
a reset, drives the per-connection timers from the periodic tick, and owns the
connection, listener and port tables.
*/

mod interface;
mod route;

pub use self::interface::Interface;
pub(crate) use self::interface::InterfaceInner;
pub use self::route::{Route, RouteTableFull, Routes};

use crate::config::Config;
use crate::time::Instant;
use crate::wire::{Ipv4Address, TcpPacket, TcpRepr};

/// The services the engine consumes from the IP layer below it.
///
/// Every call is made with the interface lock held, so implementations must not call
/// back into the [`Interface`].
pub trait IpLayer: Send {
    /// Hand a complete TCP segment (header, options and payload, checksum filled in)
    /// to the network layer for transmission from `src` to `dst`.
    fn transmit(&mut self, src: Ipv4Address, dst: Ipv4Address, segment: &[u8]);

    /// Return the MTU of the link `src` is assigned to.
    fn mtu(&self, src: &Ipv4Address) -> usize;

    /// Return the route configuration.
    fn routes(&self) -> &Routes;

    /// Return the local address an outbound connection towards `dst` should use.
    fn source_address(&self, dst: &Ipv4Address) -> Option<Ipv4Address> {
        self.routes().lookup(dst).map(|route| route.source)
    }
}

/// Everything a connection may touch while it processes a segment or a timer.
pub(crate) struct Context<'a> {
    now: Instant,
    config: &'a Config,
    ip: &'a mut dyn IpLayer,
}

impl<'a> Context<'a> {
    pub(crate) fn new(now: Instant, config: &'a Config, ip: &'a mut dyn IpLayer) -> Context<'a> {
        Context { now, config, ip }
    }

    pub(crate) fn now(&self) -> Instant {
        self.now
    }

    pub(crate) fn config(&self) -> &Config {
        self.config
    }

    pub(crate) fn mtu(&self, src: &Ipv4Address) -> usize {
        self.ip.mtu(src)
    }

    /// Serialize `repr` with its checksum and pass it down.
    pub(crate) fn emit(&mut self, src: Ipv4Address, dst: Ipv4Address, repr: &TcpRepr) {
        let mut buffer = vec![0; repr.buffer_len()];
        repr.emit(&mut TcpPacket::new_unchecked(&mut buffer[..]), &src, &dst);
        net_trace!("{}:{}: send {}", dst, repr.dst_port, repr);
        self.ip.transmit(src, dst, &buffer);
    }
}
