/*! Low-level packet access and construction.

The `wire` module deals with the segment *representation*. It provides two levels
of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens in the [TcpPacket]
   structure.
 * Second, it provides a compact, high-level representation of a segment that can
   be parsed from and emitted into a sequence of octets. This happens through
   [TcpRepr].

The `Packet` family of data structures guarantees that, if the `Packet::check_len()` method
returned `Ok(())`, then no accessor or setter method will panic; however, the guarantee
provided by `Packet::check_len()` may no longer hold after changing certain fields,
which are listed in the documentation for the specific packet.

When parsing untrusted input, it is *necessary* to use `Packet::new_checked()`;
so long as the buffer is not modified, no accessor will fail.
In the `Repr` family of data structures, the `Repr::parse()` method never panics
as long as `Packet::new_checked()` (or `Packet::check_len()`) has succeeded, and
the `Repr::emit()` method never panics as long as the underlying buffer is exactly
`Repr::buffer_len()` octets long.

# Examples

To emit a segment into an octet buffer, and then parse it back:

```rust
use ktcp::wire::*;

let src = Ipv4Address::new(10, 0, 0, 1);
let dst = Ipv4Address::new(10, 0, 0, 2);
let repr = TcpRepr {
    src_port: 49152,
    dst_port: 80,
    control: TcpControl::Syn,
    seq_number: TcpSeqNumber(1000),
    ack_number: None,
    window_len: 8192,
    max_seg_size: Some(1460),
    payload: &[],
};
let mut buffer = vec![0; repr.buffer_len()];
repr.emit(&mut TcpPacket::new_unchecked(&mut buffer), &src, &dst);

let packet = TcpPacket::new_checked(&buffer[..]).expect("truncated segment");
let parsed = TcpRepr::parse(&packet, &src, &dst).expect("malformed segment");
assert_eq!(repr, parsed);
```
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

pub(crate) mod ip;
pub(crate) mod ipv4;
mod tcp;

use core::fmt;

pub use self::ip::{
    Endpoint as IpEndpoint, ListenEndpoint as IpListenEndpoint, Protocol as IpProtocol,
};

pub use self::ipv4::{
    Address as Ipv4Address, Cidr as Ipv4Cidr, HEADER_LEN as IPV4_HEADER_LEN,
    MIN_MTU as IPV4_MIN_MTU,
};

pub(crate) use self::ipv4::AddressExt as Ipv4AddressExt;

pub use self::tcp::{
    Control as TcpControl, Flags as TcpFlags, Packet as TcpPacket, Repr as TcpRepr,
    SeqNumber as TcpSeqNumber, TcpOption, HEADER_LEN as TCP_HEADER_LEN,
};

/// Parsing a packet failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The buffer is shorter than the header, or than a length field claims.
    Truncated,
    /// The packet was recognized but contradicts itself, e.g. a SYN|FIN segment or
    /// an MSS option of the wrong length.
    Malformed,
    /// The checksum did not verify.
    WrongChecksum,
}

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated packet"),
            Error::Malformed => write!(f, "malformed packet"),
            Error::WrongChecksum => write!(f, "checksum error"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
