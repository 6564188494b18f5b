/*! Communication between endpoints.

The `socket` module holds the TCP engine proper and the handle the file-descriptor
layer talks to.

 * [tcp] contains the transmission control block: the state machine, the input and
   output engines, the timers and congestion control. It knows nothing about
   locking or waiting.
 * [stream] wraps a control block into a [`TcpSocket`], the connection-oriented
   socket with POSIX semantics: blocking calls, non-blocking mode, interruption and
   readiness queries. It implements [`SocketOps`], the operations vector of the
   socket layer.

Addresses cross the [`SocketOps`] boundary as `sockaddr_in` octets, exactly as the
system call layer receives them; see [`parse_sockaddr_in`].
*/

use core::fmt;

use bitflags::bitflags;
use byteorder::{ByteOrder, NativeEndian, NetworkEndian};

use crate::wire::{IpEndpoint, Ipv4Address, Ipv4AddressExt};

pub mod stream;
pub mod tcp;

pub use self::stream::TcpSocket;

/// Error returned by socket operations.
///
/// Protocol failures are recorded in the control block when they happen and
/// reported by the next call on the socket. Argument errors are returned at once.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The operation would block and the socket is non-blocking.
    WouldBlock,
    /// A blocking call was interrupted.
    Interrupted,
    /// The peer reset the connection.
    ConnectionReset,
    /// The peer refused the connection.
    ConnectionRefused,
    /// The peer stopped answering.
    TimedOut,
    NotConnected,
    IsConnected,
    /// The call is not valid in the current state.
    InvalidState,
    /// Malformed address or argument.
    InvalidArgument,
    AddrInUse,
    AddrNotAvailable,
    /// Writing to a connection whose transmit half is closed.
    BrokenPipe,
}

impl Error {
    /// Return the POSIX error number for this error.
    pub const fn errno(&self) -> i32 {
        match self {
            Error::WouldBlock => 11,
            Error::Interrupted => 4,
            Error::ConnectionReset => 104,
            Error::ConnectionRefused => 111,
            Error::TimedOut => 110,
            Error::NotConnected => 107,
            Error::IsConnected => 106,
            Error::InvalidState => 22,
            Error::InvalidArgument => 22,
            Error::AddrInUse => 98,
            Error::AddrNotAvailable => 99,
            Error::BrokenPipe => 32,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::WouldBlock => write!(f, "operation would block"),
            Error::Interrupted => write!(f, "interrupted"),
            Error::ConnectionReset => write!(f, "connection reset by peer"),
            Error::ConnectionRefused => write!(f, "connection refused"),
            Error::TimedOut => write!(f, "connection timed out"),
            Error::NotConnected => write!(f, "not connected"),
            Error::IsConnected => write!(f, "already connected"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::AddrInUse => write!(f, "address in use"),
            Error::AddrNotAvailable => write!(f, "address not available"),
            Error::BrokenPipe => write!(f, "broken pipe"),
        }
    }
}

impl core::error::Error for Error {}

impl From<tcp::ListenError> for Error {
    fn from(err: tcp::ListenError) -> Error {
        match err {
            tcp::ListenError::InvalidState => Error::InvalidState,
            tcp::ListenError::Unaddressable => Error::InvalidArgument,
        }
    }
}

impl From<tcp::ConnectError> for Error {
    fn from(err: tcp::ConnectError) -> Error {
        match err {
            tcp::ConnectError::InvalidState => Error::IsConnected,
            tcp::ConnectError::Unaddressable => Error::InvalidArgument,
        }
    }
}

impl From<tcp::SendError> for Error {
    fn from(err: tcp::SendError) -> Error {
        match err {
            tcp::SendError::InvalidState => Error::BrokenPipe,
        }
    }
}

impl From<tcp::RecvError> for Error {
    fn from(err: tcp::RecvError) -> Error {
        match err {
            tcp::RecvError::InvalidState => Error::NotConnected,
            // End of stream is reported as a zero-length read, never as an error.
            tcp::RecvError::Finished => Error::InvalidState,
        }
    }
}

bitflags! {
    /// Flags of `send` and `recv`.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct MsgFlags: u32 {
        /// Return data without removing it from the receive queue.
        const PEEK = 0x02;
        /// Fail with [`Error::WouldBlock`] instead of blocking.
        const DONTWAIT = 0x40;
    }
}

bitflags! {
    /// Readiness bits of `select`.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// The operations vector a connection-oriented socket offers to the
/// file-descriptor layer.
pub trait SocketOps {
    /// Open a connection to the `sockaddr_in` in `addr`.
    fn connect(&self, addr: &[u8]) -> Result<(), Error>;

    /// Bind to the `sockaddr_in` in `addr`. Port 0 picks an ephemeral port.
    fn bind(&self, addr: &[u8]) -> Result<(), Error>;

    /// Accept connections, queueing at most `backlog` of them.
    fn listen(&self, backlog: usize) -> Result<(), Error>;

    /// Take the oldest established connection off the accept queue.
    fn accept(&self) -> Result<Self, Error>
    where
        Self: Sized;

    fn send(&self, data: &[u8], flags: MsgFlags) -> Result<usize, Error>;

    /// Read into `data`. A return of 0 means the peer closed its half.
    fn recv(&self, data: &mut [u8], flags: MsgFlags) -> Result<usize, Error>;

    /// Like `recv`, also returning the peer address.
    fn recv_from(&self, data: &mut [u8], flags: MsgFlags) -> Result<(usize, IpEndpoint), Error>;

    /// Close the connection gracefully.
    fn close(&self) -> Result<(), Error>;

    /// Return which of the `interest` bits are ready now.
    fn select(&self, interest: Readiness) -> Readiness;

    /// Drop this reference without closing the connection.
    fn release(self)
    where
        Self: Sized;
}

/// `AF_INET`.
pub const AF_INET: u16 = 2;

/// Length of a `sockaddr_in`.
pub const SOCKADDR_IN_LEN: usize = 16;

/// Decode a `sockaddr_in`: the family in host order, then port and address in
/// network order, then padding.
pub fn parse_sockaddr_in(addr: &[u8]) -> Result<IpEndpoint, Error> {
    if addr.len() != SOCKADDR_IN_LEN {
        return Err(Error::InvalidArgument);
    }
    if NativeEndian::read_u16(&addr[0..2]) != AF_INET {
        return Err(Error::InvalidArgument);
    }
    let port = NetworkEndian::read_u16(&addr[2..4]);
    let addr = Ipv4Address::from_bytes(&addr[4..8]);
    Ok(IpEndpoint::new(addr, port))
}

/// Encode an endpoint as a `sockaddr_in`.
pub fn sockaddr_in(endpoint: IpEndpoint) -> [u8; SOCKADDR_IN_LEN] {
    let mut addr = [0; SOCKADDR_IN_LEN];
    NativeEndian::write_u16(&mut addr[0..2], AF_INET);
    NetworkEndian::write_u16(&mut addr[2..4], endpoint.port);
    addr[4..8].copy_from_slice(&endpoint.addr.octets());
    addr
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sockaddr_in() {
        let endpoint = IpEndpoint::new(Ipv4Address::new(10, 0, 0, 2), 8080);
        let addr = sockaddr_in(endpoint);
        assert_eq!(&addr[2..8], &[0x1f, 0x90, 10, 0, 0, 2]);
        assert_eq!(parse_sockaddr_in(&addr), Ok(endpoint));
    }

    #[test]
    fn test_sockaddr_in_bad_length() {
        let addr = sockaddr_in(IpEndpoint::new(Ipv4Address::new(10, 0, 0, 2), 80));
        assert_eq!(parse_sockaddr_in(&addr[..8]), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_sockaddr_in_bad_family() {
        let mut addr = sockaddr_in(IpEndpoint::new(Ipv4Address::new(10, 0, 0, 2), 80));
        NativeEndian::write_u16(&mut addr[0..2], 10);
        assert_eq!(parse_sockaddr_in(&addr), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_errno() {
        assert_eq!(Error::WouldBlock.errno(), 11);
        assert_eq!(Error::ConnectionRefused.errno(), 111);
        assert_eq!(Error::from(tcp::SendError::InvalidState), Error::BrokenPipe);
    }
}
