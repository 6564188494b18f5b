// Heads up! Before working on this file you should read, at least, RFC 793 and
// the parts of RFC 1122 that discuss TCP, as well as RFC 5681 and RFC 6298 for
// congestion control and the retransmission timer.

use core::fmt::Display;
use core::{fmt, mem};

use crate::config::{Config, DEFAULT_MSS};
use crate::iface::Context;
use crate::socket::Error;
use crate::storage::RingBuffer;
use crate::time::Duration;
use crate::wire::{
    IpEndpoint, IpListenEndpoint, Ipv4AddressExt, TcpControl, TcpRepr, TcpSeqNumber,
    IPV4_HEADER_LEN, TCP_HEADER_LEN,
};

macro_rules! tcp_trace {
    ($($arg:tt)*) => (net_log!(trace, $($arg)*));
}

mod congestion;
pub mod fsm;
mod input;
mod output;
mod rtte;
mod timer;


use self::fsm::{Action, Event, Transition};
use self::rtte::RttEstimator;
use self::timer::Timers;

/// Error returned by [`Tcb::listen`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ListenError {
    InvalidState,
    Unaddressable,
}

impl Display for ListenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ListenError::InvalidState => write!(f, "invalid state"),
            ListenError::Unaddressable => write!(f, "unaddressable destination"),
        }
    }
}

impl core::error::Error for ListenError {}

/// Error returned by [`Tcb::connect`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectError {
    InvalidState,
    Unaddressable,
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConnectError::InvalidState => write!(f, "invalid state"),
            ConnectError::Unaddressable => write!(f, "unaddressable destination"),
        }
    }
}

impl core::error::Error for ConnectError {}

/// Error returned by [`Tcb::send_slice`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SendError {
    InvalidState,
}

impl Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SendError::InvalidState => write!(f, "invalid state"),
        }
    }
}

impl core::error::Error for SendError {}

/// Error returned by [`Tcb::recv_slice`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
    InvalidState,
    Finished,
}

impl Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RecvError::InvalidState => write!(f, "invalid state"),
            RecvError::Finished => write!(f, "operation finished"),
        }
    }
}

impl core::error::Error for RecvError {}

/// A TCP socket ring buffer.
pub type SocketBuffer<'a> = RingBuffer<'a, u8>;

/// The state of a TCP connection, according to [RFC 793].
///
/// [RFC 793]: https://tools.ietf.org/html/rfc793
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closing => write!(f, "CLOSING"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::TimeWait => write!(f, "TIME-WAIT"),
        }
    }
}

/// Congestion control algorithm used by a connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CongestionControl {
    /// Send as much as the peer's window allows.
    None,
    /// RFC 5681 slow start, congestion avoidance, fast retransmit and fast recovery.
    #[default]
    Reno,
}

/// The four values that identify a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple {
    pub local: IpEndpoint,
    pub remote: IpEndpoint,
}

impl Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// A Transmission Control Block.
///
/// The control block holds the state of one connection: its sequence space, its
/// buffers, its timers and its congestion state. It does no locking and keeps no
/// clock of its own; every operation that may transmit takes a [`Context`] that
/// carries the current tick and the IP layer.
///
/// Sequence space bookkeeping:
///
/// * the SYN occupies `isn`; it is acknowledged iff `snd_una != isn`,
/// * `tx_buffer` holds exactly the octets in `snd_una..snd_una + tx_buffer.len()`
///   once the SYN is acknowledged,
/// * in FIN-WAIT-1, CLOSING and LAST-ACK our FIN follows the last queued octet,
/// * `snd_una <= snd_nxt <= snd_max`, where `snd_max` may exceed `snd_nxt` by a
///   zero window probe or after a go-back-N rewind.
#[derive(Debug)]
pub struct Tcb<'a> {
    state: State,
    /// The endpoint this connection is bound to. A port of 0 means the connection
    /// owns no binding (a child of a listener).
    listen_endpoint: IpListenEndpoint,
    tuple: Option<Tuple>,
    /// We sent the first SYN, so a reset before ESTABLISHED is a refusal.
    active_open: bool,
    rx_buffer: SocketBuffer<'a>,
    tx_buffer: SocketBuffer<'a>,
    /// Staging for a segment whose octets wrap around the end of `tx_buffer`.
    tx_scratch: Vec<u8>,

    /// Initial send sequence number.
    isn: TcpSeqNumber,
    /// Oldest unacknowledged sequence number.
    snd_una: TcpSeqNumber,
    /// Next sequence number to send.
    snd_nxt: TcpSeqNumber,
    /// Highest sequence number sent so far.
    snd_max: TcpSeqNumber,
    /// The peer's advertised receive window.
    snd_wnd: usize,
    /// Segment sequence number used for the last window update.
    snd_wl1: TcpSeqNumber,
    /// Segment acknowledgment number used for the last window update.
    snd_wl2: TcpSeqNumber,
    /// Largest window the peer ever advertised.
    max_wnd: usize,

    /// Initial receive sequence number.
    irs: TcpSeqNumber,
    /// Next sequence number expected from the peer.
    rcv_nxt: TcpSeqNumber,
    /// The window we advertised last.
    rcv_adv: usize,
    /// The peer's FIN was accepted.
    fin_received: bool,

    /// Maximum segment size used for sending.
    smss: usize,
    /// Consecutive duplicate acknowledgements.
    dupacks: u8,
    rtte: RttEstimator,
    timers: Timers,
    controller: congestion::AnyController,
    nagle: bool,

    /// Error to report on the next user call.
    error: Option<Error>,
    /// Something a waiter may care about happened.
    wake: bool,
}

impl<'a> Tcb<'a> {
    /// Create a closed control block with the given buffers.
    ///
    /// # Panics
    /// Panics if either buffer is empty.
    pub fn new<T>(rx_buffer: T, tx_buffer: T, config: &Config) -> Tcb<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        let rx_buffer = rx_buffer.into();
        let tx_buffer = tx_buffer.into();
        assert!(
            rx_buffer.capacity() > 0 && tx_buffer.capacity() > 0,
            "socket buffers must not be empty"
        );
        let rcv_adv = rx_buffer.window();

        Tcb {
            state: State::Closed,
            listen_endpoint: IpListenEndpoint::default(),
            tuple: None,
            active_open: false,
            rx_buffer,
            tx_buffer,
            tx_scratch: Vec::new(),
            isn: TcpSeqNumber::default(),
            snd_una: TcpSeqNumber::default(),
            snd_nxt: TcpSeqNumber::default(),
            snd_max: TcpSeqNumber::default(),
            snd_wnd: 0,
            snd_wl1: TcpSeqNumber::default(),
            snd_wl2: TcpSeqNumber::default(),
            max_wnd: 0,
            irs: TcpSeqNumber::default(),
            rcv_nxt: TcpSeqNumber::default(),
            rcv_adv,
            fin_received: false,
            smss: DEFAULT_MSS,
            dupacks: 0,
            rtte: RttEstimator::new(config.rto_init, config.rto_min, config.rto_max),
            timers: Timers::default(),
            controller: congestion::AnyController::new(config.congestion, DEFAULT_MSS),
            nagle: config.nagle,
            error: None,
            wake: false,
        }
    }

    /// Create a closed control block with heap buffers sized by `config`.
    pub fn with_config(config: &Config) -> Tcb<'static> {
        Tcb::new(
            SocketBuffer::new(vec![0; config.rcv_buffer_size]),
            SocketBuffer::new(vec![0; config.snd_buffer_size]),
            config,
        )
    }

    /// Create the control block of a connection spawned by this listener.
    ///
    /// The child inherits the listener's options and starts out in LISTEN so that
    /// [`accept_syn`](#method.accept_syn) can move it to SYN-RECEIVED.
    pub(crate) fn spawn(&self, config: &Config) -> Tcb<'static> {
        let mut child = Tcb::with_config(config);
        child.nagle = self.nagle;
        child.controller = congestion::AnyController::new(self.congestion_control(), DEFAULT_MSS);
        child.state = State::Listen;
        child
    }

    /// Return the connection state, in terms of the TCP state machine.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Return the listen endpoint
    #[inline]
    pub fn listen_endpoint(&self) -> IpListenEndpoint {
        self.listen_endpoint
    }

    /// Record the endpoint this block was bound to.
    pub(crate) fn set_listen_endpoint(&mut self, endpoint: IpListenEndpoint) {
        self.listen_endpoint = endpoint
    }

    /// Return the local endpoint, or None if not connected.
    #[inline]
    pub fn local_endpoint(&self) -> Option<IpEndpoint> {
        Some(self.tuple?.local)
    }

    /// Return the remote endpoint, or None if not connected.
    #[inline]
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        Some(self.tuple?.remote)
    }

    #[inline]
    pub fn tuple(&self) -> Option<Tuple> {
        self.tuple
    }

    /// Return whether Nagle's Algorithm is enabled.
    pub fn nagle_enabled(&self) -> bool {
        self.nagle
    }

    /// Enable or disable Nagle's Algorithm.
    ///
    /// When enabled, at most one segment smaller than the MSS is in flight at a time.
    /// Disabling it is equivalent to the TCP_NODELAY option.
    pub fn set_nagle_enabled(&mut self, enabled: bool) {
        self.nagle = enabled
    }

    /// Return the current congestion control algorithm.
    pub fn congestion_control(&self) -> CongestionControl {
        self.controller.algorithm()
    }

    /// Replace the congestion control algorithm. The new controller starts from an
    /// initial window.
    pub fn set_congestion_control(&mut self, congestion_control: CongestionControl) {
        self.controller = congestion::AnyController::new(congestion_control, self.smss);
    }

    /// Return the maximum segment size used for sending.
    pub fn mss(&self) -> usize {
        self.smss
    }

    /// Return the current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rtte.retransmission_timeout()
    }

    /// Return the smoothed round-trip time, once a sample was taken.
    pub fn srtt(&self) -> Option<Duration> {
        self.rtte.srtt().map(Duration::from_ticks)
    }

    /// Return the congestion window in octets.
    pub fn congestion_window(&self) -> usize {
        self.controller.inner().window()
    }

    /// Return the slow start threshold in octets.
    pub fn ssthresh(&self) -> usize {
        self.controller.inner().ssthresh()
    }

    /// Return the number of retransmission timeouts since the last forward progress.
    pub fn retransmissions(&self) -> u8 {
        self.timers.retries()
    }

    /// Return the number of octets queued for transmission, sent or not.
    #[inline]
    pub fn send_queue(&self) -> usize {
        self.tx_buffer.len()
    }

    /// Return the number of octets waiting to be read.
    #[inline]
    pub fn recv_queue(&self) -> usize {
        self.rx_buffer.len()
    }

    /// Return the capacity of the transmit buffer.
    #[inline]
    pub fn send_capacity(&self) -> usize {
        self.tx_buffer.capacity()
    }

    /// Return the capacity of the receive buffer.
    #[inline]
    pub fn recv_capacity(&self) -> usize {
        self.rx_buffer.capacity()
    }

    /// Return whether the transmit half is open.
    #[inline]
    pub fn may_send(&self) -> bool {
        matches!(self.state, State::Established | State::CloseWait)
    }

    /// Return whether the receive half may still deliver data.
    ///
    /// This is true until the peer's FIN was received or the connection failed.
    #[inline]
    pub fn may_recv(&self) -> bool {
        match self.state {
            State::SynSent | State::SynReceived => true,
            State::Established | State::FinWait1 | State::FinWait2 => !self.fin_received,
            _ => false,
        }
    }

    /// Return whether a read would not block: data is queued, the peer finished
    /// sending or the connection is gone.
    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
            || self.fin_received
            || self.error.is_some()
            || self.state == State::Closed
    }

    /// Return whether a write would not block.
    pub fn can_send(&self) -> bool {
        (self.may_send() && !self.tx_buffer.is_full())
            || self.error.is_some()
            || !matches!(
                self.state,
                State::SynSent | State::SynReceived | State::Established | State::CloseWait
            )
    }

    /// Return whether the peer has sent its FIN.
    #[inline]
    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    /// Return the pending error without clearing it.
    #[inline]
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    /// Return and clear the pending error.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Return and clear the wake-up flag.
    pub(crate) fn take_wake(&mut self) -> bool {
        mem::take(&mut self.wake)
    }

    /// Return whether every timer is stopped.
    pub(crate) fn is_idle(&self) -> bool {
        self.timers.is_idle()
    }

    /// Start listening on the given endpoint.
    ///
    /// This function returns `Err(ListenError::InvalidState)` if the block was not
    /// closed, and `Err(ListenError::Unaddressable)` if the port was zero.
    pub fn listen<T>(&mut self, local_endpoint: T) -> Result<(), ListenError>
    where
        T: Into<IpListenEndpoint>,
    {
        let local_endpoint = local_endpoint.into();
        if local_endpoint.port == 0 {
            return Err(ListenError::Unaddressable);
        }
        let transition =
            fsm::transition(self.state, Event::PassiveOpen).ok_or(ListenError::InvalidState)?;

        self.listen_endpoint = local_endpoint;
        self.tuple = None;
        self.set_state(transition.next);
        Ok(())
    }

    /// Connect to a given endpoint, sending a SYN with sequence number `isn`.
    ///
    /// The local endpoint must be fully specified; the interface picks the source
    /// address and port before calling this.
    pub(crate) fn connect(
        &mut self,
        cx: &mut Context,
        local: IpEndpoint,
        remote: IpEndpoint,
        isn: TcpSeqNumber,
    ) -> Result<(), ConnectError> {
        if remote.port == 0 || !remote.addr.x_is_unicast() {
            return Err(ConnectError::Unaddressable);
        }
        if local.port == 0 || local.addr.is_unspecified() {
            return Err(ConnectError::Unaddressable);
        }
        let transition =
            fsm::transition(self.state, Event::ActiveOpen).ok_or(ConnectError::InvalidState)?;

        self.reset(cx.config());
        self.tuple = Some(Tuple { local, remote });
        self.active_open = true;
        self.isn = isn;
        self.snd_una = isn;
        self.snd_nxt = isn;
        self.snd_max = isn;
        self.snd_wl2 = isn;
        self.set_mss(DEFAULT_MSS.min(self.local_mss(cx)));

        self.apply(cx, transition);
        Ok(())
    }

    /// Take over a SYN that arrived at a listener. `self` must be a block created by
    /// [`spawn`](#method.spawn).
    pub(crate) fn accept_syn(
        &mut self,
        cx: &mut Context,
        tuple: Tuple,
        repr: &TcpRepr,
        isn: TcpSeqNumber,
    ) {
        let Some(transition) = fsm::transition(self.state, Event::RcvSyn) else {
            return;
        };

        self.tuple = Some(tuple);
        self.isn = isn;
        self.snd_una = isn;
        self.snd_nxt = isn;
        self.snd_max = isn;
        self.irs = repr.seq_number;
        self.rcv_nxt = repr.seq_number + 1;
        self.snd_wl1 = repr.seq_number;
        self.snd_wl2 = isn;
        self.snd_wnd = repr.window_len as usize;
        self.max_wnd = self.snd_wnd;
        self.negotiate_mss(cx, repr.max_seg_size);

        self.apply(cx, transition);
    }

    /// Close the transmit half of the connection.
    ///
    /// Queued data is still delivered; the FIN follows it. Closing a listener or a
    /// connection that is still in SYN-SENT releases it at once.
    pub fn close(&mut self, cx: &mut Context) {
        match fsm::transition(self.state, Event::Close) {
            Some(transition) => {
                self.apply(cx, transition);
                self.output(cx);
            }
            None => net_debug!("{}: close in {} ignored", self, self.state),
        }
    }

    /// Abort the connection. A synchronized connection sends a RST.
    pub fn abort(&mut self, cx: &mut Context) {
        if let Some(transition) = fsm::transition(self.state, Event::Abort) {
            self.apply(cx, transition);
        }
    }

    /// Enqueue a sequence of octets to be sent, and fill it from a slice.
    ///
    /// Returns the number of octets actually queued, which is limited by the free
    /// space in the transmit buffer.
    pub fn send_slice(&mut self, cx: &mut Context, data: &[u8]) -> Result<usize, SendError> {
        if !self.may_send() {
            return Err(SendError::InvalidState);
        }

        let size = self.tx_buffer.enqueue_slice(data);
        if size > 0 {
            tcp_trace!(
                "{}: tx buffer: enqueueing {} octets (now {})",
                self,
                size,
                self.tx_buffer.len()
            );
            self.output(cx);
        }
        Ok(size)
    }

    /// Dequeue a sequence of received octets, and fill a slice from it.
    ///
    /// Returns `Ok(0)` when nothing is queued yet, and `Err(RecvError::Finished)` once
    /// the peer's FIN was consumed.
    pub fn recv_slice(&mut self, cx: &mut Context, data: &mut [u8]) -> Result<usize, RecvError> {
        if self.rx_buffer.is_empty() {
            return if self.fin_received {
                Err(RecvError::Finished)
            } else if self.may_recv() {
                Ok(0)
            } else {
                Err(RecvError::InvalidState)
            };
        }

        let size = self.rx_buffer.dequeue_slice(data);
        tcp_trace!(
            "{}: rx buffer: dequeueing {} octets (now {})",
            self,
            size,
            self.rx_buffer.len()
        );

        // Reopening a closed window must be announced, the peer won't ask.
        if self.rcv_adv == 0 && self.rx_buffer.window() > 0 && self.is_synchronized() {
            net_debug!("{}: window update to {}", self, self.rx_buffer.window());
            self.send_ack(cx);
        }
        Ok(size)
    }

    /// Peek at a sequence of received octets without removing them.
    pub fn peek_slice(&mut self, data: &mut [u8]) -> Result<usize, RecvError> {
        if self.rx_buffer.is_empty() {
            return if self.fin_received {
                Err(RecvError::Finished)
            } else if self.may_recv() {
                Ok(0)
            } else {
                Err(RecvError::InvalidState)
            };
        }

        Ok(self.rx_buffer.read_allocated(0, data))
    }

    /// Build the reply to a segment that belongs to no connection.
    ///
    /// If the segment carried an ACK the reset borrows its number as sequence number,
    /// otherwise the reset acknowledges everything the segment occupied.
    pub(crate) fn rst_reply(repr: &TcpRepr) -> TcpRepr<'static> {
        let (seq_number, ack_number) = match repr.ack_number {
            Some(ack_number) => (ack_number, None),
            None => (
                TcpSeqNumber(0),
                Some(repr.seq_number + repr.segment_len()),
            ),
        };

        TcpRepr {
            src_port: repr.dst_port,
            dst_port: repr.src_port,
            control: TcpControl::Rst,
            seq_number,
            ack_number,
            window_len: 0,
            max_seg_size: None,
            payload: &[],
        }
    }

    fn reset(&mut self, config: &Config) {
        self.rx_buffer.clear();
        self.tx_buffer.clear();
        self.snd_wnd = 0;
        self.max_wnd = 0;
        self.rcv_adv = self.rx_buffer.window();
        self.fin_received = false;
        self.dupacks = 0;
        self.rtte = RttEstimator::new(config.rto_init, config.rto_min, config.rto_max);
        self.timers = Timers::default();
        self.error = None;
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            net_debug!("{}: state={}=>{}", self, self.state, state);
        }
        self.state = state;
    }

    /// Carry out a transition computed by the state machine.
    fn apply(&mut self, cx: &mut Context, transition: Transition) {
        self.set_state(transition.next);

        for action in transition.actions {
            match action {
                Action::SendSyn | Action::SendSynAck => self.send_syn(cx),
                Action::SendAck => self.send_ack(cx),
                Action::SendRst => self.send_rst(cx),
                Action::ArmRetransmit => {
                    let delay = if self.syn_acked() {
                        self.rtte.retransmission_timeout()
                    } else {
                        self.syn_rto(cx.config(), 0)
                    };
                    self.timers.ensure_retransmit(cx.now(), delay)
                }
                Action::CancelRetransmit => self.timers.cancel_retransmit(),
                Action::ArmTimeWait => {
                    let delay = cx.config().time_wait();
                    self.timers.set_for_time_wait(cx.now(), delay)
                }
                Action::CancelTimers => self.timers.cancel_all(),
                Action::Wake => self.wake = true,
                Action::SetError(error) => self.error = Some(error),
                Action::Release => self.tx_buffer.clear(),
            }
        }
    }

    /// Look up and apply the transition for `event`. Events with no meaning in the
    /// current state are ignored.
    fn dispatch(&mut self, cx: &mut Context, event: Event) {
        match fsm::transition(self.state, event) {
            Some(transition) => self.apply(cx, transition),
            None => net_debug!("{}: {:?} ignored in {}", self, event, self.state),
        }
    }

    /// Return whether the peer's SYN was received, so that `rcv_nxt` is valid.
    fn is_synchronized(&self) -> bool {
        !matches!(self.state, State::Closed | State::Listen | State::SynSent)
    }

    fn syn_acked(&self) -> bool {
        self.snd_una != self.isn
    }

    /// Return whether our FIN follows the queued data.
    fn fin_queued(&self) -> bool {
        matches!(self.state, State::FinWait1 | State::Closing | State::LastAck)
    }

    /// Return whether our FIN has been transmitted at least once.
    fn fin_sent(&self) -> bool {
        self.fin_queued() && self.snd_max - self.snd_una > self.tx_buffer.len()
    }

    /// Retransmission timeout of the handshake after `retries` timeouts.
    fn syn_rto(&self, config: &Config, retries: u8) -> Duration {
        let factor = 1u32.checked_shl(retries as u32).unwrap_or(u32::MAX);
        (config.syn_rto_init * factor).min(config.rto_max)
    }

    /// The largest segment the local link can carry.
    fn local_mss(&self, cx: &Context) -> usize {
        let mtu = match self.tuple {
            Some(tuple) => cx.mtu(&tuple.local.addr),
            None => DEFAULT_MSS + IPV4_HEADER_LEN + TCP_HEADER_LEN,
        };
        mtu.saturating_sub(IPV4_HEADER_LEN + TCP_HEADER_LEN).max(1)
    }

    /// Take the peer's MSS option into account. A peer that sent none is assumed to
    /// accept 536 octets.
    fn negotiate_mss(&mut self, cx: &Context, peer_mss: Option<u16>) {
        let peer_mss = peer_mss.map_or(DEFAULT_MSS, usize::from);
        let mss = peer_mss.min(self.local_mss(cx)).max(1);
        self.set_mss(mss);
    }

    fn set_mss(&mut self, mss: usize) {
        tcp_trace!("{}: mss={}", self, mss);
        self.smss = mss;
        self.controller.inner_mut().set_mss(mss);
    }

    /// The window to advertise, clamped to the header field.
    fn rcv_wnd(&self) -> u16 {
        u16::try_from(self.rx_buffer.window()).unwrap_or(u16::MAX)
    }
}

impl fmt::Display for Tcb<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.tuple {
            Some(tuple) => write!(f, "{}", tuple),
            None => write!(f, "{}", self.listen_endpoint),
        }
    }
}
