//! Connection-oriented sockets on top of the TCP engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use super::tcp::{RecvError, SendError, State, Tcb};
use super::{parse_sockaddr_in, Error, MsgFlags, Readiness, SocketOps};
use crate::iface::{Interface, InterfaceInner};
use crate::wire::{IpEndpoint, IpListenEndpoint, Ipv4Address};

/// A control block shared between the socket handle, the connection table and,
/// for a child of a listener, the accept queue.
#[derive(Debug)]
pub(crate) struct Connection {
    tcb: Mutex<Tcb<'static>>,
    /// Signalled whenever the control block changed in a way a waiter may care about.
    changed: Condvar,
    interrupted: AtomicBool,
    parent: Option<Weak<Connection>>,
}

impl Connection {
    pub(crate) fn new(tcb: Tcb<'static>, parent: Option<Weak<Connection>>) -> Arc<Connection> {
        Arc::new(Connection {
            tcb: Mutex::new(tcb),
            changed: Condvar::new(),
            interrupted: AtomicBool::new(false),
            parent,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Tcb<'static>> {
        self.tcb.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the control block and wake its waiters if it asked for it. The
    /// listener that spawned it is woken too, so that `accept` sees new children.
    pub(crate) fn notify(&self, mut tcb: MutexGuard<'_, Tcb<'static>>) {
        let wake = tcb.take_wake();
        drop(tcb);
        if !wake {
            return;
        }

        self.changed.notify_all();
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            let _guard = parent.lock();
            parent.changed.notify_all();
        }
    }
}

/// A TCP socket.
///
/// Every call locks the interface first and the control block second. A call that
/// cannot make progress releases the interface and sleeps on the control block
/// until the engine reports a change, unless the socket is non-blocking.
#[derive(Debug)]
pub struct TcpSocket {
    iface: Arc<Interface>,
    conn: Arc<Connection>,
    nonblocking: bool,
}

impl TcpSocket {
    pub(crate) fn new(iface: Arc<Interface>, conn: Arc<Connection>) -> TcpSocket {
        TcpSocket {
            iface,
            conn,
            nonblocking: false,
        }
    }

    /// Make calls fail with [`Error::WouldBlock`] instead of waiting.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Interrupt a call blocked on this socket, as a signal would. The call returns
    /// [`Error::Interrupted`]; buffered data stays where it is.
    pub fn interrupt(&self) {
        self.conn.interrupted.store(true, Ordering::Release);
        let _guard = self.conn.lock();
        self.conn.changed.notify_all();
    }

    /// Return the local endpoint. For a socket that is bound but not connected the
    /// address may be unspecified.
    pub fn local_endpoint(&self) -> Option<IpEndpoint> {
        let tcb = self.conn.lock();
        tcb.local_endpoint().or_else(|| {
            let bound = tcb.listen_endpoint();
            (bound.port != 0).then(|| {
                IpEndpoint::new(bound.addr.unwrap_or(Ipv4Address::UNSPECIFIED), bound.port)
            })
        })
    }

    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.conn.lock().remote_endpoint()
    }

    pub fn state(&self) -> State {
        self.conn.lock().state()
    }

    /// Return the number of owners of the control block: socket handles, the
    /// connection table and the accept queue.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.conn)
    }

    /// Enable or disable Nagle's algorithm.
    pub fn set_nagle_enabled(&self, enabled: bool) {
        self.conn.lock().set_nagle_enabled(enabled)
    }

    /// Return the pending asynchronous error, clearing it.
    pub fn take_error(&self) -> Option<Error> {
        self.conn.lock().take_error()
    }

    /// Run `f` until it stops returning [`Error::WouldBlock`], sleeping on the
    /// control block in between.
    fn block_on<T, F>(&self, flags: MsgFlags, mut f: F) -> Result<T, Error>
    where
        F: FnMut(&mut InterfaceInner, &mut Tcb<'static>) -> Result<T, Error>,
    {
        let nonblocking = self.nonblocking || flags.contains(MsgFlags::DONTWAIT);
        loop {
            let mut inner = self.iface.lock();
            let mut tcb = self.conn.lock();

            let result = f(&mut *inner, &mut *tcb);
            inner.settle(&self.conn, &mut tcb);
            if tcb.take_wake() {
                self.conn.changed.notify_all();
            }

            match result {
                Err(Error::WouldBlock) if !nonblocking => (),
                result => return result,
            }
            if self.conn.interrupted.swap(false, Ordering::AcqRel) {
                return Err(Error::Interrupted);
            }

            drop(inner);
            let tcb = self
                .conn
                .changed
                .wait(tcb)
                .unwrap_or_else(PoisonError::into_inner);
            drop(tcb);

            if self.conn.interrupted.swap(false, Ordering::AcqRel) {
                return Err(Error::Interrupted);
            }
        }
    }
}

impl SocketOps for TcpSocket {
    fn connect(&self, addr: &[u8]) -> Result<(), Error> {
        let remote = parse_sockaddr_in(addr)?;
        let mut started = false;

        self.block_on(MsgFlags::empty(), |inner, tcb| match tcb.state() {
            State::Closed if !started => {
                inner.connect(&self.conn, tcb, remote)?;
                started = true;
                Err(Error::WouldBlock)
            }
            State::Closed => Err(tcb.take_error().unwrap_or(Error::ConnectionRefused)),
            State::Listen => Err(Error::InvalidState),
            State::SynSent | State::SynReceived => {
                started = true;
                Err(Error::WouldBlock)
            }
            _ if started => Ok(()),
            _ => Err(Error::IsConnected),
        })
    }

    fn bind(&self, addr: &[u8]) -> Result<(), Error> {
        let endpoint = IpListenEndpoint::from(parse_sockaddr_in(addr)?);
        let mut inner = self.iface.lock();
        let mut tcb = self.conn.lock();
        inner.bind(&mut tcb, endpoint)
    }

    fn listen(&self, backlog: usize) -> Result<(), Error> {
        let mut inner = self.iface.lock();
        let mut tcb = self.conn.lock();
        inner.listen(&self.conn, &mut tcb, backlog)
    }

    fn accept(&self) -> Result<TcpSocket, Error> {
        let child = self.block_on(MsgFlags::empty(), |inner, tcb| inner.accept(tcb))?;
        net_debug!("accepted {:?}", child.lock().tuple());
        Ok(TcpSocket::new(self.iface.clone(), child))
    }

    fn send(&self, data: &[u8], flags: MsgFlags) -> Result<usize, Error> {
        let mut sent = 0;
        let result = self.block_on(flags, |inner, tcb| {
            if let Some(err) = tcb.take_error() {
                return Err(err);
            }
            match tcb.state() {
                State::SynSent | State::SynReceived => return Err(Error::WouldBlock),
                State::Closed | State::Listen if tcb.tuple().is_none() => {
                    return Err(Error::NotConnected);
                }
                _ => (),
            }

            match tcb.send_slice(&mut inner.context(), &data[sent..]) {
                Ok(size) => sent += size,
                Err(SendError::InvalidState) => return Err(Error::BrokenPipe),
            }
            if sent == data.len() {
                Ok(sent)
            } else {
                Err(Error::WouldBlock)
            }
        });

        match result {
            Err(Error::WouldBlock | Error::Interrupted) if sent > 0 => Ok(sent),
            result => result,
        }
    }

    fn recv(&self, data: &mut [u8], flags: MsgFlags) -> Result<usize, Error> {
        self.block_on(flags, |inner, tcb| {
            let result = if flags.contains(MsgFlags::PEEK) {
                tcb.peek_slice(data)
            } else {
                tcb.recv_slice(&mut inner.context(), data)
            };

            match result {
                Ok(0) if !data.is_empty() => match tcb.take_error() {
                    Some(err) => Err(err),
                    None if tcb.state() == State::Closed => Err(Error::NotConnected),
                    None => Err(Error::WouldBlock),
                },
                Ok(size) => Ok(size),
                Err(RecvError::Finished) => Ok(0),
                Err(RecvError::InvalidState) => {
                    Err(tcb.take_error().unwrap_or(Error::NotConnected))
                }
            }
        })
    }

    fn recv_from(&self, data: &mut [u8], flags: MsgFlags) -> Result<(usize, IpEndpoint), Error> {
        let size = self.recv(data, flags)?;
        let remote = self.remote_endpoint().ok_or(Error::NotConnected)?;
        Ok((size, remote))
    }

    fn close(&self) -> Result<(), Error> {
        let mut inner = self.iface.lock();
        let mut tcb = self.conn.lock();
        tcb.close(&mut inner.context());
        inner.settle(&self.conn, &mut tcb);
        self.conn.notify(tcb);
        Ok(())
    }

    fn select(&self, interest: Readiness) -> Readiness {
        let inner = self.iface.lock();
        let tcb = self.conn.lock();

        let mut ready = Readiness::empty();
        let readable = match tcb.state() {
            State::Listen => inner.can_accept(&tcb),
            _ => tcb.can_recv(),
        };
        if readable {
            ready |= Readiness::READ;
        }
        if tcb.state() != State::Listen && tcb.can_send() {
            ready |= Readiness::WRITE;
        }
        ready & interest
    }

    fn release(self) {
        drop(self)
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        let mut inner = self.iface.lock();
        let mut tcb = self.conn.lock();
        if tcb.state() == State::Closed {
            inner.unbind(&mut tcb);
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;
    use crate::config::Config;
    use crate::iface::{IpLayer, Routes};
    use crate::socket::sockaddr_in;
    use crate::time::Duration;
    use crate::wire::Ipv4Cidr;

    const CLIENT_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
    const SERVER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
    const SERVER_PORT: u16 = 80;

    type Wire = Arc<Mutex<VecDeque<(Ipv4Address, Ipv4Address, Vec<u8>)>>>;

    /// One end of a point-to-point link.
    struct Link {
        routes: Routes,
        wire: Wire,
    }

    impl IpLayer for Link {
        fn transmit(&mut self, src: Ipv4Address, dst: Ipv4Address, segment: &[u8]) {
            self.wire
                .lock()
                .unwrap()
                .push_back((src, dst, segment.to_vec()));
        }

        fn mtu(&self, _src: &Ipv4Address) -> usize {
            1500
        }

        fn routes(&self) -> &Routes {
            &self.routes
        }
    }

    /// Two interfaces on a shared wire.
    struct Net {
        client: Arc<Interface>,
        server: Arc<Interface>,
        wire: Wire,
    }

    impl Net {
        fn new() -> Net {
            let config = Config::default()
                .with_rto_init(Duration::from_ticks(10))
                .with_syn_rto_init(Duration::from_ticks(10))
                .with_msl(Duration::from_ticks(20));
            let wire = Wire::default();
            let link = |addr| {
                let mut routes = Routes::new();
                routes.add_direct(Ipv4Cidr::new(addr, 24)).unwrap();
                Link {
                    routes,
                    wire: wire.clone(),
                }
            };
            let client = Interface::new(config, link(CLIENT_IP));
            let server = Interface::new(config, link(SERVER_IP));
            server.set_isn_seed(0x8000_0000);
            Net {
                client,
                server,
                wire,
            }
        }

        /// Deliver segments until the wire is quiet.
        fn pump(&self) {
            loop {
                let next = self.wire.lock().unwrap().pop_front();
                let Some((src, dst, segment)) = next else {
                    return;
                };
                if dst == SERVER_IP {
                    self.server.receive(src, dst, &segment);
                } else if dst == CLIENT_IP {
                    self.client.receive(src, dst, &segment);
                }
            }
        }

        fn tick(&self, ticks: u32) {
            for _ in 0..ticks {
                self.client.tick();
                self.server.tick();
                self.pump();
            }
        }

        fn listen(&self, backlog: usize) -> TcpSocket {
            let mut socket = self.server.socket();
            socket.set_nonblocking(true);
            socket
                .bind(&sockaddr_in(IpEndpoint::new(SERVER_IP, SERVER_PORT)))
                .unwrap();
            socket.listen(backlog).unwrap();
            socket
        }

        fn connect(&self) -> TcpSocket {
            let mut socket = self.client.socket();
            socket.set_nonblocking(true);
            let addr = sockaddr_in(IpEndpoint::new(SERVER_IP, SERVER_PORT));
            assert_eq!(socket.connect(&addr), Err(Error::WouldBlock));
            socket
        }

        /// Return a connected client and the server's end of it.
        fn pair(&self, listener: &TcpSocket) -> (TcpSocket, TcpSocket) {
            let client = self.connect();
            self.pump();
            assert_eq!(client.state(), State::Established);
            let mut server = listener.accept().unwrap();
            server.set_nonblocking(true);
            (client, server)
        }
    }

    #[test]
    fn test_connect_accept() {
        let net = Net::new();
        let listener = net.listen(4);
        assert_eq!(listener.select(Readiness::READ), Readiness::empty());

        let client = net.connect();
        assert_eq!(client.state(), State::SynSent);
        net.pump();
        assert_eq!(client.state(), State::Established);
        assert_eq!(client.select(Readiness::WRITE), Readiness::WRITE);
        assert_eq!(listener.select(Readiness::READ), Readiness::READ);

        let server = listener.accept().unwrap();
        assert_eq!(server.state(), State::Established);
        assert_eq!(server.remote_endpoint(), client.local_endpoint());
        assert_eq!(client.remote_endpoint(), server.local_endpoint());
        let port = client.local_endpoint().unwrap().port;
        assert_eq!(port, Config::default().ephemeral_port_base);

        // A completed connection may not be connected again.
        let addr = sockaddr_in(IpEndpoint::new(SERVER_IP, SERVER_PORT));
        assert_eq!(client.connect(&addr), Err(Error::IsConnected));
    }

    #[test]
    fn test_send_recv() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, server) = net.pair(&listener);

        assert_eq!(client.send(b"hello", MsgFlags::empty()), Ok(5));
        net.pump();
        assert_eq!(server.select(Readiness::READ), Readiness::READ);

        let mut data = [0; 16];
        assert_eq!(server.recv(&mut data, MsgFlags::PEEK), Ok(5));
        let (size, remote) = server.recv_from(&mut data, MsgFlags::empty()).unwrap();
        assert_eq!(&data[..size], b"hello");
        assert_eq!(remote, client.local_endpoint().unwrap());
        assert_eq!(
            server.recv(&mut data, MsgFlags::empty()),
            Err(Error::WouldBlock)
        );

        assert_eq!(server.send(b"world", MsgFlags::empty()), Ok(5));
        net.pump();
        assert_eq!(client.recv(&mut data, MsgFlags::empty()), Ok(5));
        assert_eq!(&data[..5], b"world");
    }

    #[test]
    fn test_send_partial() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, _server) = net.pair(&listener);

        // The peer never acknowledges without a pump, so the transmit buffer fills.
        let capacity = Config::default().snd_buffer_size;
        let data = vec![0x55; capacity + 100];
        assert_eq!(client.send(&data, MsgFlags::empty()), Ok(capacity));
        assert_eq!(client.select(Readiness::WRITE), Readiness::empty());
        assert_eq!(
            client.send(&data[capacity..], MsgFlags::DONTWAIT),
            Err(Error::WouldBlock)
        );
    }

    #[test]
    fn test_graceful_close() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, server) = net.pair(&listener);

        client.close().unwrap();
        net.pump();
        assert_eq!(client.state(), State::FinWait2);
        assert_eq!(server.state(), State::CloseWait);
        assert_eq!(server.select(Readiness::READ), Readiness::READ);
        assert_eq!(server.recv(&mut [0; 4], MsgFlags::empty()), Ok(0));
        assert_eq!(
            client.send(b"late", MsgFlags::empty()),
            Err(Error::BrokenPipe)
        );

        server.close().unwrap();
        net.pump();
        assert_eq!(server.state(), State::Closed);
        assert_eq!(client.state(), State::TimeWait);
        assert_eq!(net.server.connection_count(), 0);
        assert_eq!(net.client.connection_count(), 1);

        net.tick(39);
        assert_eq!(client.state(), State::TimeWait);
        net.tick(1);
        assert_eq!(client.state(), State::Closed);
        assert_eq!(net.client.connection_count(), 0);
    }

    #[test]
    fn test_connection_refused() {
        let net = Net::new();
        let client = net.connect();
        net.pump();
        assert_eq!(client.state(), State::Closed);
        assert_eq!(client.take_error(), Some(Error::ConnectionRefused));
        assert_eq!(net.client.connection_count(), 0);
    }

    #[test]
    fn test_peer_reset() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, server) = net.pair(&listener);

        {
            let mut inner = net.server.lock();
            let mut tcb = server.conn.lock();
            tcb.abort(&mut inner.context());
            inner.settle(&server.conn, &mut tcb);
        }
        net.pump();
        assert_eq!(client.state(), State::Closed);
        assert_eq!(
            client.recv(&mut [0; 4], MsgFlags::empty()),
            Err(Error::ConnectionReset)
        );
        assert_eq!(
            client.recv(&mut [0; 4], MsgFlags::empty()),
            Err(Error::NotConnected)
        );
    }

    #[test]
    fn test_recv_buffered_data_before_error() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, server) = net.pair(&listener);

        server.send(b"bye", MsgFlags::empty()).unwrap();
        net.pump();
        {
            let mut inner = net.server.lock();
            let mut tcb = server.conn.lock();
            tcb.abort(&mut inner.context());
            inner.settle(&server.conn, &mut tcb);
        }
        net.pump();

        let mut data = [0; 8];
        assert_eq!(client.recv(&mut data, MsgFlags::empty()), Ok(3));
        assert_eq!(
            client.recv(&mut data, MsgFlags::empty()),
            Err(Error::ConnectionReset)
        );
    }

    #[test]
    fn test_bind_errors() {
        let net = Net::new();
        let _listener = net.listen(4);

        let socket = net.server.socket();
        let addr = sockaddr_in(IpEndpoint::new(SERVER_IP, SERVER_PORT));
        assert_eq!(socket.bind(&addr), Err(Error::AddrInUse));
        let wildcard = sockaddr_in(IpEndpoint::new(Ipv4Address::UNSPECIFIED, SERVER_PORT));
        assert_eq!(socket.bind(&wildcard), Err(Error::AddrInUse));
        let foreign = sockaddr_in(IpEndpoint::new(Ipv4Address::new(10, 0, 0, 9), 81));
        assert_eq!(socket.bind(&foreign), Err(Error::AddrNotAvailable));
        assert_eq!(socket.bind(&addr[..8]), Err(Error::InvalidArgument));

        let other = sockaddr_in(IpEndpoint::new(SERVER_IP, 81));
        assert_eq!(socket.bind(&other), Ok(()));
        assert_eq!(socket.bind(&other), Err(Error::InvalidArgument));
        assert_eq!(
            socket.local_endpoint(),
            Some(IpEndpoint::new(SERVER_IP, 81))
        );
    }

    #[test]
    fn test_ephemeral_ports() {
        let net = Net::new();
        let base = Config::default().ephemeral_port_base;
        let any = sockaddr_in(IpEndpoint::new(Ipv4Address::UNSPECIFIED, 0));

        let first = net.client.socket();
        first.bind(&any).unwrap();
        let second = net.client.socket();
        second.bind(&any).unwrap();
        assert_eq!(first.local_endpoint().map(|e| e.port), Some(base));
        assert_eq!(second.local_endpoint().map(|e| e.port), Some(base + 1));

        // Dropping a closed socket gives its port back.
        drop(first);
        let third = net.client.socket();
        third
            .bind(&sockaddr_in(IpEndpoint::new(Ipv4Address::UNSPECIFIED, base)))
            .unwrap();
    }

    #[test]
    fn test_not_connected() {
        let net = Net::new();
        let socket = net.client.socket();
        assert_eq!(
            socket.send(b"abc", MsgFlags::empty()),
            Err(Error::NotConnected)
        );
        assert_eq!(
            socket.recv(&mut [0; 4], MsgFlags::empty()),
            Err(Error::NotConnected)
        );
        assert_eq!(socket.connect(&[0; 4]), Err(Error::InvalidArgument));
        let broadcast = sockaddr_in(IpEndpoint::new(Ipv4Address::BROADCAST, 80));
        assert_eq!(socket.connect(&broadcast), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_backlog_retry() {
        let net = Net::new();
        let listener = net.listen(1);
        let first = net.connect();
        let second = net.connect();
        net.pump();
        assert_eq!(first.state(), State::Established);
        // The accept queue was full, the second SYN was dropped.
        assert_eq!(second.state(), State::SynSent);

        let _accepted = listener.accept().unwrap();
        net.tick(15);
        assert_eq!(second.state(), State::Established);
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn test_interrupt() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, _server) = net.pair(&listener);

        let mut client = client;
        client.set_nonblocking(false);
        // Signals arriving before the call interrupt it too.
        client.interrupt();
        assert_eq!(
            client.recv(&mut [0; 4], MsgFlags::empty()),
            Err(Error::Interrupted)
        );
    }

    #[test]
    fn test_release_keeps_connection() {
        let net = Net::new();
        let listener = net.listen(4);
        let (client, server) = net.pair(&listener);

        client.release();
        assert_eq!(net.client.connection_count(), 1);
        assert_eq!(server.send(b"abc", MsgFlags::empty()), Ok(3));
        net.pump();
    }

    #[test]
    fn test_blocking_echo() {
        struct StopOnDrop<'a>(&'a AtomicBool);

        impl Drop for StopOnDrop<'_> {
            fn drop(&mut self) {
                self.0.store(true, Ordering::Release);
            }
        }

        let net = Net::new();
        let mut listener = net.listen(4);
        listener.set_nonblocking(false);
        let stop = AtomicBool::new(false);

        thread::scope(|scope| {
            let _stop = StopOnDrop(&stop);
            scope.spawn(|| {
                while !stop.load(Ordering::Acquire) {
                    net.tick(1);
                    thread::sleep(std::time::Duration::from_millis(1));
                }
            });

            let server = scope.spawn(|| {
                let conn = listener.accept().unwrap();
                let mut data = [0; 64];
                let mut received = 0;
                loop {
                    match conn.recv(&mut data[received..], MsgFlags::empty()).unwrap() {
                        0 => break,
                        size => received += size,
                    }
                }
                assert_eq!(conn.send(&data[..received], MsgFlags::empty()), Ok(received));
                conn.close().unwrap();
            });

            let client = net.client.socket();
            let addr = sockaddr_in(IpEndpoint::new(SERVER_IP, SERVER_PORT));
            client.connect(&addr).unwrap();
            assert_eq!(client.send(b"ping pong", MsgFlags::empty()), Ok(9));
            client.close().unwrap();

            let mut data = [0; 64];
            let mut received = 0;
            loop {
                match client.recv(&mut data[received..], MsgFlags::empty()).unwrap() {
                    0 => break,
                    size => received += size,
                }
            }
            assert_eq!(&data[..received], b"ping pong");

            server.join().unwrap();
        });
    }
}
