/*! The TCP protocol engine of a small POSIX-like kernel.

The crate implements the connection semantics of [RFC 793], the send and receive
heuristics of [RFC 1122] (Nagle, silly window avoidance, delayed ACK), the congestion
control of [RFC 5681] and the retransmission timer management of [RFC 6298] over
fixed-capacity ring buffers.

It is layered like this:

 * [wire] turns octets into segment representations and back, including the
   IP pseudo-header checksum.
 * [storage] holds the circular buffers a connection queues its data in.
 * [socket] contains the transmission control block with its input and output
   engines, and the handle the file-descriptor layer talks to.
 * [iface] connects everything to the IP layer: the connection table,
   inbound segment demultiplexing and the periodic tick.

The engine itself never spawns threads. Segments enter through
[`Interface::receive`](iface::Interface::receive), time advances through
[`Interface::tick`](iface::Interface::tick), and blocking socket calls park
on a per-connection condition variable.

[RFC 793]: https://tools.ietf.org/html/rfc793
[RFC 1122]: https://tools.ietf.org/html/rfc1122
[RFC 5681]: https://tools.ietf.org/html/rfc5681
[RFC 6298]: https://tools.ietf.org/html/rfc6298
*/

#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod config;
pub mod iface;
pub mod socket;
pub mod storage;
pub mod time;
pub mod wire;
