// Heads up! Before working on this file you should read the parts
// of RFC 793 that discuss segment arrival in the CLOSED and LISTEN states.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use heapless::Deque;
use managed::ManagedMap;

use super::{Context, IpLayer};
use crate::config::{Config, MAX_BACKLOG};
use crate::socket::stream::Connection;
use crate::socket::tcp::{State, Tcb, Tuple};
use crate::socket::{Error, TcpSocket};
use crate::time::{Duration, Instant};
use crate::wire::{
    IpEndpoint, IpListenEndpoint, Ipv4Address, Ipv4AddressExt, TcpControl, TcpPacket, TcpRepr,
    TcpSeqNumber,
};

/// ISN increment per connection opened.
const ISN_STEP_CONNECTION: u32 = 64000;
/// ISN increment per tick.
const ISN_STEP_TICK: u32 = 250;

/// A listening socket and the connections it spawned that were not accepted yet.
#[derive(Debug)]
struct Listener {
    conn: Arc<Connection>,
    backlog: Deque<Arc<Connection>, MAX_BACKLOG>,
    max_backlog: usize,
}

impl Listener {
    /// Drop queued children that died before being accepted.
    fn prune(&mut self) {
        for _ in 0..self.backlog.len() {
            if let Some(child) = self.backlog.pop_front() {
                if child.lock().state() != State::Closed {
                    let _ = self.backlog.push_back(child);
                }
            }
        }
    }

    fn is_full(&self) -> bool {
        self.backlog.len() >= self.max_backlog
    }
}

/// A TCP endpoint attached to an IP layer.
///
/// The interface owns the connection table, the listener table and the port table,
/// demultiplexes inbound segments, and advances time. It is shared between the
/// network receive path, the periodic timer and every [`TcpSocket`] it created.
#[derive(Debug)]
pub struct Interface {
    inner: Mutex<InterfaceInner>,
}

/// The state behind the interface lock.
pub(crate) struct InterfaceInner {
    config: Config,
    ip: Box<dyn IpLayer>,
    now: Instant,
    isn: u32,
    next_port: u16,
    connections: ManagedMap<'static, Tuple, Arc<Connection>>,
    listeners: ManagedMap<'static, IpListenEndpoint, Listener>,
    bindings: ManagedMap<'static, IpListenEndpoint, ()>,
}

impl core::fmt::Debug for InterfaceInner {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("InterfaceInner")
            .field("config", &self.config)
            .field("now", &self.now)
            .field("connections", &self.connections.len())
            .field("listeners", &self.listeners.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl Interface {
    /// Create an interface on top of `ip`.
    pub fn new<L>(config: Config, ip: L) -> Arc<Interface>
    where
        L: IpLayer + 'static,
    {
        Arc::new(Interface {
            inner: Mutex::new(InterfaceInner {
                config,
                ip: Box::new(ip),
                now: Instant::ZERO,
                isn: 1,
                next_port: config.ephemeral_port_base,
                connections: ManagedMap::Owned(BTreeMap::new()),
                listeners: ManagedMap::Owned(BTreeMap::new()),
                bindings: ManagedMap::Owned(BTreeMap::new()),
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InterfaceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the initial sequence number generator state.
    pub fn set_isn_seed(&self, seed: u32) {
        self.lock().isn = seed;
    }

    /// Create an unbound, unconnected socket.
    pub fn socket(self: &Arc<Self>) -> TcpSocket {
        let config = self.lock().config;
        TcpSocket::new(self.clone(), Connection::new(Tcb::with_config(&config), None))
    }

    /// Return the configuration.
    pub fn config(&self) -> Config {
        self.lock().config
    }

    /// Return the current time.
    pub fn now(&self) -> Instant {
        self.lock().now
    }

    /// Return the number of entries in the connection table.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Process a TCP segment the IP layer received from `src` for `dst`.
    pub fn receive(&self, src: Ipv4Address, dst: Ipv4Address, segment: &[u8]) {
        self.lock().receive(src, dst, segment)
    }

    /// Advance time by one tick and run every connection's expired timers.
    pub fn tick(&self) {
        self.lock().tick()
    }

    /// Advance time by `duration`, one tick at a time.
    pub fn advance(&self, duration: Duration) {
        for _ in 0..duration.total_ticks() {
            self.tick()
        }
    }
}

impl InterfaceInner {
    pub(crate) fn context(&mut self) -> Context<'_> {
        Context::new(self.now, &self.config, &mut *self.ip)
    }

    fn next_isn(&mut self) -> TcpSeqNumber {
        let isn = TcpSeqNumber(self.isn as i32);
        self.isn = self.isn.wrapping_add(ISN_STEP_CONNECTION);
        isn
    }

    fn receive(&mut self, src: Ipv4Address, dst: Ipv4Address, segment: &[u8]) {
        let packet = match TcpPacket::new_checked(segment) {
            Ok(packet) => packet,
            Err(err) => {
                net_debug!("{}: dropping segment: {}", src, err);
                return;
            }
        };
        let repr = match TcpRepr::parse(&packet, &src, &dst) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("{}: dropping segment: {}", src, err);
                return;
            }
        };
        net_trace!("{}:{}: recv {}", src, repr.src_port, repr);

        let tuple = Tuple {
            local: IpEndpoint::new(dst, repr.dst_port),
            remote: IpEndpoint::new(src, repr.src_port),
        };

        if let Some(conn) = self.connections.get(&tuple).cloned() {
            let mut tcb = conn.lock();
            tcb.process(&mut self.context(), &repr);
            self.settle(&conn, &mut tcb);
            conn.notify(tcb);
            return;
        }

        match self.find_listener(&tuple.local) {
            Some(key) => self.process_listen(key, tuple, &repr),
            None => {
                net_debug!("{}: no connection", tuple);
                self.reply_rst(tuple, &repr);
            }
        }
    }

    fn find_listener(&self, local: &IpEndpoint) -> Option<IpListenEndpoint> {
        let exact = IpListenEndpoint {
            addr: Some(local.addr),
            port: local.port,
        };
        let wildcard = IpListenEndpoint {
            addr: None,
            port: local.port,
        };
        [exact, wildcard]
            .into_iter()
            .find(|key| self.listeners.get(key).is_some())
    }

    /// Handle a segment for a listening endpoint with no connection yet.
    fn process_listen(&mut self, key: IpListenEndpoint, tuple: Tuple, repr: &TcpRepr) {
        match (repr.control, repr.ack_number) {
            (TcpControl::Rst, _) => return,
            (_, Some(_)) => {
                net_debug!("{}: ACK on a listening socket", tuple);
                self.reply_rst(tuple, repr);
                return;
            }
            (TcpControl::Syn, None) => (),
            _ => return,
        }
        if !tuple.remote.addr.x_is_unicast() {
            net_debug!("{}: SYN from a non-unicast source dropped", tuple);
            return;
        }

        let parent = match self.listeners.get_mut(&key) {
            Some(listener) => {
                listener.prune();
                if listener.is_full() {
                    net_debug!("{}: backlog full, SYN dropped", tuple);
                    return;
                }
                listener.conn.clone()
            }
            None => return,
        };

        let child_tcb = parent.lock().spawn(&self.config);
        let child = Connection::new(child_tcb, Some(Arc::downgrade(&parent)));
        let isn = self.next_isn();
        {
            let mut tcb = child.lock();
            tcb.accept_syn(&mut self.context(), tuple, repr, isn);
        }

        if self.connections.insert(tuple, child.clone()).is_err() {
            net_debug!("{}: connection table full", tuple);
            return;
        }
        if let Some(listener) = self.listeners.get_mut(&key) {
            if listener.backlog.push_back(child).is_err() {
                net_debug!("{}: backlog overflow", tuple);
            }
        }
    }

    /// Answer a segment nobody owns. A RST is never answered.
    fn reply_rst(&mut self, tuple: Tuple, repr: &TcpRepr) {
        if repr.control == TcpControl::Rst {
            return;
        }
        let reply = Tcb::rst_reply(repr);
        self.context().emit(tuple.local.addr, tuple.remote.addr, &reply);
    }

    fn tick(&mut self) {
        self.now += Duration::from_ticks(1);
        self.isn = self.isn.wrapping_add(ISN_STEP_TICK);

        let conns: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|(_, conn)| conn.clone())
            .collect();
        for conn in conns {
            let mut tcb = conn.lock();
            if tcb.is_idle() {
                continue;
            }
            tcb.on_tick(&mut self.context());
            self.settle(&conn, &mut tcb);
            conn.notify(tcb);
        }
    }

    /// Drop a connection that reached CLOSED from the tables. A closed listener
    /// takes the children it did not hand out yet with it.
    pub(crate) fn settle(&mut self, conn: &Arc<Connection>, tcb: &mut Tcb) {
        if tcb.state() != State::Closed {
            return;
        }

        if let Some(tuple) = tcb.tuple() {
            if matches!(self.connections.get(&tuple), Some(entry) if Arc::ptr_eq(entry, conn)) {
                net_trace!("{}: connection released", tuple);
                self.connections.remove(&tuple);
            }
        }

        let endpoint = tcb.listen_endpoint();
        let is_listener = matches!(
            self.listeners.get(&endpoint),
            Some(listener) if Arc::ptr_eq(&listener.conn, conn)
        );
        if is_listener {
            if let Some(mut listener) = self.listeners.remove(&endpoint) {
                while let Some(child) = listener.backlog.pop_front() {
                    let mut child_tcb = child.lock();
                    child_tcb.abort(&mut self.context());
                    if let Some(tuple) = child_tcb.tuple() {
                        self.connections.remove(&tuple);
                    }
                }
            }
        }

        self.unbind(tcb);
    }

    /// Give up the port a closed block holds.
    pub(crate) fn unbind(&mut self, tcb: &mut Tcb) {
        let endpoint = tcb.listen_endpoint();
        if endpoint.port != 0 {
            net_trace!("{}: unbound", endpoint);
            self.bindings.remove(&endpoint);
            tcb.set_listen_endpoint(IpListenEndpoint::default());
        }
    }

    fn port_in_use(&self, port: u16) -> bool {
        self.bindings.iter().any(|(bound, _)| bound.port == port)
    }

    /// Pick the next free ephemeral port.
    fn ephemeral_port(&mut self) -> Result<u16, Error> {
        let base = self.config.ephemeral_port_base;
        for _ in base..=u16::MAX {
            let port = self.next_port;
            self.next_port = if port == u16::MAX { base } else { port + 1 };
            if !self.port_in_use(port) {
                return Ok(port);
            }
        }
        Err(Error::AddrInUse)
    }

    /// Bind `tcb` to `endpoint`, picking a port if it is 0.
    pub(crate) fn bind(
        &mut self,
        tcb: &mut Tcb,
        mut endpoint: IpListenEndpoint,
    ) -> Result<(), Error> {
        if tcb.state() != State::Closed || tcb.listen_endpoint().port != 0 {
            return Err(Error::InvalidArgument);
        }
        if let Some(addr) = endpoint.addr {
            if !self.ip.routes().has_source(&addr) {
                return Err(Error::AddrNotAvailable);
            }
        }
        if endpoint.port == 0 {
            endpoint.port = self.ephemeral_port()?;
        } else if self.bindings.iter().any(|(bound, _)| bound.overlaps(&endpoint)) {
            return Err(Error::AddrInUse);
        }

        if self.bindings.insert(endpoint, ()).is_err() {
            return Err(Error::AddrInUse);
        }
        net_trace!("{}: bound", endpoint);
        tcb.set_listen_endpoint(endpoint);
        Ok(())
    }

    /// Put a bound (or implicitly bound) block into LISTEN.
    pub(crate) fn listen(
        &mut self,
        conn: &Arc<Connection>,
        tcb: &mut Tcb,
        backlog: usize,
    ) -> Result<(), Error> {
        let max_backlog = match backlog {
            0 => self.config.max_backlog,
            n => n.min(MAX_BACKLOG),
        };

        if tcb.state() == State::Listen {
            if let Some(listener) = self.listeners.get_mut(&tcb.listen_endpoint()) {
                listener.max_backlog = max_backlog;
            }
            return Ok(());
        }
        if tcb.state() != State::Closed {
            return Err(Error::InvalidState);
        }
        if tcb.listen_endpoint().port == 0 {
            self.bind(tcb, IpListenEndpoint::default())?;
        }

        let endpoint = tcb.listen_endpoint();
        tcb.listen(endpoint)?;
        let listener = Listener {
            conn: conn.clone(),
            backlog: Deque::new(),
            max_backlog,
        };
        if self.listeners.insert(endpoint, listener).is_err() {
            return Err(Error::AddrInUse);
        }
        net_debug!("{}: listening, backlog {}", endpoint, max_backlog);
        Ok(())
    }

    /// Start an active open towards `remote`.
    pub(crate) fn connect(
        &mut self,
        conn: &Arc<Connection>,
        tcb: &mut Tcb,
        remote: IpEndpoint,
    ) -> Result<(), Error> {
        if remote.port == 0 || !remote.addr.x_is_unicast() {
            return Err(Error::InvalidArgument);
        }
        let bound = tcb.listen_endpoint();
        let local_addr = match bound.addr {
            Some(addr) => addr,
            None => self
                .ip
                .source_address(&remote.addr)
                .ok_or(Error::AddrNotAvailable)?,
        };
        if bound.port == 0 {
            self.bind(tcb, IpListenEndpoint::from(IpEndpoint::new(local_addr, 0)))?;
        }

        let tuple = Tuple {
            local: IpEndpoint::new(local_addr, tcb.listen_endpoint().port),
            remote,
        };
        if self.connections.get(&tuple).is_some() {
            return Err(Error::AddrInUse);
        }

        let isn = self.next_isn();
        tcb.connect(&mut self.context(), tuple.local, tuple.remote, isn)?;
        if self.connections.insert(tuple, conn.clone()).is_err() {
            tcb.abort(&mut self.context());
            return Err(Error::AddrNotAvailable);
        }
        Ok(())
    }

    /// Take the first established child off the accept queue of `listener`.
    pub(crate) fn accept(&mut self, tcb: &Tcb) -> Result<Arc<Connection>, Error> {
        if tcb.state() != State::Listen {
            return Err(Error::InvalidArgument);
        }
        let listener = self
            .listeners
            .get_mut(&tcb.listen_endpoint())
            .ok_or(Error::InvalidArgument)?;
        listener.prune();

        let mut accepted = None;
        for _ in 0..listener.backlog.len() {
            let Some(child) = listener.backlog.pop_front() else { break };
            if accepted.is_none() && child.lock().state() != State::SynReceived {
                accepted = Some(child);
            } else {
                let _ = listener.backlog.push_back(child);
            }
        }
        accepted.ok_or(Error::WouldBlock)
    }

    /// Return whether `accept` on this listener would not block.
    pub(crate) fn can_accept(&self, tcb: &Tcb) -> bool {
        match self.listeners.get(&tcb.listen_endpoint()) {
            Some(listener) => listener
                .backlog
                .iter()
                .any(|child| !matches!(child.lock().state(), State::SynReceived | State::Closed)),
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use super::*;
    use crate::iface::Routes;
    use crate::socket::{sockaddr_in, SocketOps};
    use crate::wire::Ipv4Cidr;

    const LOCAL_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
    const REMOTE_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
    const REMOTE_SEQ: TcpSeqNumber = TcpSeqNumber(-10001);

    const SYN: TcpRepr<'static> = TcpRepr {
        src_port: 49500,
        dst_port: 80,
        control: TcpControl::Syn,
        seq_number: REMOTE_SEQ,
        ack_number: None,
        window_len: 256,
        max_seg_size: None,
        payload: &[],
    };

    type Sent = Arc<Mutex<VecDeque<Vec<u8>>>>;

    struct TestIp {
        routes: Routes,
        sent: Sent,
    }

    impl IpLayer for TestIp {
        fn transmit(&mut self, _src: Ipv4Address, _dst: Ipv4Address, segment: &[u8]) {
            self.sent.lock().unwrap().push_back(segment.to_vec());
        }

        fn mtu(&self, _src: &Ipv4Address) -> usize {
            1500
        }

        fn routes(&self) -> &Routes {
            &self.routes
        }
    }

    fn interface() -> (Arc<Interface>, Sent) {
        let mut routes = Routes::new();
        routes.add_direct(Ipv4Cidr::new(LOCAL_IP, 24)).unwrap();
        let sent = Sent::default();
        let ip = TestIp {
            routes,
            sent: sent.clone(),
        };
        (Interface::new(Config::default(), ip), sent)
    }

    fn send_from(iface: &Interface, src: Ipv4Address, repr: &TcpRepr) {
        let mut buffer = vec![0; repr.buffer_len()];
        repr.emit(&mut TcpPacket::new_unchecked(&mut buffer[..]), &src, &LOCAL_IP);
        iface.receive(src, LOCAL_IP, &buffer);
    }

    fn send(iface: &Interface, repr: &TcpRepr) {
        send_from(iface, REMOTE_IP, repr)
    }

    fn recv<F>(sent: &Sent, f: F)
    where
        F: FnOnce(TcpRepr),
    {
        let buffer = sent.lock().unwrap().pop_front().expect("no segment was sent");
        let packet = TcpPacket::new_checked(&buffer[..]).unwrap();
        f(TcpRepr::parse(&packet, &LOCAL_IP, &REMOTE_IP).unwrap())
    }

    fn recv_nothing(sent: &Sent) {
        assert_eq!(sent.lock().unwrap().len(), 0, "unexpected segment");
    }

    fn listener(iface: &Arc<Interface>, backlog: usize) -> TcpSocket {
        let mut socket = iface.socket();
        socket.set_nonblocking(true);
        socket
            .bind(&sockaddr_in(IpEndpoint::new(LOCAL_IP, 80)))
            .unwrap();
        socket.listen(backlog).unwrap();
        socket
    }

    #[test]
    fn test_closed_port_replies_rst() {
        let (iface, sent) = interface();
        send(&iface, &SYN);
        recv(&sent, |repr| {
            assert_eq!(repr.control, TcpControl::Rst);
            assert_eq!(repr.seq_number, TcpSeqNumber(0));
            assert_eq!(repr.ack_number, Some(REMOTE_SEQ + 1));
            assert_eq!((repr.src_port, repr.dst_port), (80, 49500));
        });
        recv_nothing(&sent);
    }

    #[test]
    fn test_closed_port_ignores_rst() {
        let (iface, sent) = interface();
        send(
            &iface,
            &TcpRepr {
                control: TcpControl::Rst,
                ..SYN
            },
        );
        recv_nothing(&sent);
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let (iface, sent) = interface();
        let mut buffer = vec![0; SYN.buffer_len()];
        SYN.emit(&mut TcpPacket::new_unchecked(&mut buffer[..]), &REMOTE_IP, &LOCAL_IP);
        buffer[4] ^= 0xff;
        iface.receive(REMOTE_IP, LOCAL_IP, &buffer);
        recv_nothing(&sent);
    }

    #[test]
    fn test_listen_spawns_child() {
        let (iface, sent) = interface();
        iface.set_isn_seed(1000);
        let listener = listener(&iface, 4);

        send(&iface, &SYN);
        recv(&sent, |repr| {
            assert_eq!(repr.control, TcpControl::Syn);
            assert_eq!(repr.seq_number, TcpSeqNumber(1000));
            assert_eq!(repr.ack_number, Some(REMOTE_SEQ + 1));
            assert_eq!(repr.max_seg_size, Some(1460));
        });
        assert_eq!(iface.connection_count(), 1);
        // A half-open connection is not ready to be accepted.
        assert_eq!(listener.accept().err(), Some(Error::WouldBlock));

        send(
            &iface,
            &TcpRepr {
                control: TcpControl::None,
                seq_number: REMOTE_SEQ + 1,
                ack_number: Some(TcpSeqNumber(1001)),
                ..SYN
            },
        );
        recv_nothing(&sent);

        let child = listener.accept().unwrap();
        assert_eq!(child.state(), State::Established);
        assert_eq!(child.remote_endpoint(), Some(IpEndpoint::new(REMOTE_IP, 49500)));
        assert_eq!(child.local_endpoint(), Some(IpEndpoint::new(LOCAL_IP, 80)));
        // The socket handle and the connection table.
        assert_eq!(child.ref_count(), 2);
        assert_eq!(listener.accept().err(), Some(Error::WouldBlock));
    }

    #[test]
    fn test_listen_ack_replies_rst() {
        let (iface, sent) = interface();
        let _listener = listener(&iface, 4);
        send(
            &iface,
            &TcpRepr {
                control: TcpControl::None,
                seq_number: REMOTE_SEQ + 1,
                ack_number: Some(TcpSeqNumber(5000)),
                ..SYN
            },
        );
        recv(&sent, |repr| {
            assert_eq!(repr.control, TcpControl::Rst);
            assert_eq!(repr.seq_number, TcpSeqNumber(5000));
            assert_eq!(repr.ack_number, None);
        });
        assert_eq!(iface.connection_count(), 0);
    }

    #[test]
    fn test_listen_syn_from_broadcast_dropped() {
        let (iface, sent) = interface();
        let _listener = listener(&iface, 4);
        send_from(&iface, Ipv4Address::BROADCAST, &SYN);
        recv_nothing(&sent);
        assert_eq!(iface.connection_count(), 0);
    }

    #[test]
    fn test_listen_backlog_full() {
        let (iface, sent) = interface();
        let _listener = listener(&iface, 1);
        send(&iface, &SYN);
        recv(&sent, |repr| assert_eq!(repr.control, TcpControl::Syn));

        send(
            &iface,
            &TcpRepr {
                src_port: 49501,
                ..SYN
            },
        );
        recv_nothing(&sent);
        assert_eq!(iface.connection_count(), 1);
    }

    #[test]
    fn test_isn_advances() {
        let (iface, sent) = interface();
        iface.set_isn_seed(1000);
        let _listener = listener(&iface, 4);

        send(&iface, &SYN);
        recv(&sent, |repr| assert_eq!(repr.seq_number, TcpSeqNumber(1000)));
        iface.tick();
        send(
            &iface,
            &TcpRepr {
                src_port: 49501,
                ..SYN
            },
        );
        recv(&sent, |repr| {
            let expected = 1000 + ISN_STEP_CONNECTION + ISN_STEP_TICK;
            assert_eq!(repr.seq_number, TcpSeqNumber(expected as i32));
        });
    }

    #[test]
    fn test_listener_close_aborts_children() {
        let (iface, sent) = interface();
        let listener = listener(&iface, 4);
        send(&iface, &SYN);
        recv(&sent, |repr| assert_eq!(repr.control, TcpControl::Syn));

        listener.close().unwrap();
        recv(&sent, |repr| assert_eq!(repr.control, TcpControl::Rst));
        assert_eq!(iface.connection_count(), 0);

        // The port is free again.
        send(&iface, &SYN);
        recv(&sent, |repr| assert_eq!(repr.control, TcpControl::Rst));
    }

    #[test]
    fn test_time_passes() {
        let (iface, _sent) = interface();
        iface.advance(Duration::from_ticks(5));
        assert_eq!(iface.now(), Instant::from_ticks(5));
    }
}
