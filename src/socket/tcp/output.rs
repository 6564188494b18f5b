//! Segment generation: the send policy, retransmission and the timer handlers.

use super::fsm::Event;
use super::{State, Tcb};
use crate::iface::Context;
use crate::wire::{TcpControl, TcpRepr, TcpSeqNumber};

impl Tcb<'_> {
    /// Build a segment of this connection. Every segment after our SYN carries the
    /// acknowledgment of the peer's data and the current receive window.
    fn segment<'p>(
        &self,
        control: TcpControl,
        seq_number: TcpSeqNumber,
        payload: &'p [u8],
    ) -> TcpRepr<'p> {
        let (src_port, dst_port) = match self.tuple {
            Some(tuple) => (tuple.local.port, tuple.remote.port),
            None => (0, 0),
        };
        TcpRepr {
            src_port,
            dst_port,
            control,
            seq_number,
            ack_number: self.is_synchronized().then_some(self.rcv_nxt),
            window_len: self.rcv_wnd(),
            max_seg_size: None,
            payload,
        }
    }

    fn transmit(&mut self, cx: &mut Context, repr: &TcpRepr) {
        if self.emit(cx, repr) && repr.ack_number.is_some() {
            self.on_ack_sent(repr.window_len);
        }
    }

    /// Hand `repr` to the IP layer. Returns false if there is nobody to send to.
    fn emit(&self, cx: &mut Context, repr: &TcpRepr) -> bool {
        let Some(tuple) = self.tuple else {
            net_debug!("{}: no endpoint to send to", self);
            return false;
        };
        cx.emit(tuple.local.addr, tuple.remote.addr, repr);
        true
    }

    /// An acknowledgment advertising `window_len` went out.
    fn on_ack_sent(&mut self, window_len: u16) {
        self.rcv_adv = window_len as usize;
        self.timers.cancel_delayed_ack();
    }

    /// Make `len` queued octets starting `offset` past `snd_una` readable as one
    /// slice for `tx_payload`, and return its length. Only octets that wrap around the
    /// end of the ring are copied, into `tx_scratch`.
    fn gather_tx(&mut self, offset: usize, len: usize) -> (usize, bool) {
        let len = len.min(self.tx_buffer.len().saturating_sub(offset));
        if len == 0 || self.tx_buffer.get_allocated(offset, len).len() == len {
            return (len, false);
        }
        self.tx_scratch.resize(len, 0);
        let read = self.tx_buffer.read_allocated(offset, &mut self.tx_scratch[..len]);
        (read, true)
    }

    fn tx_payload(&self, offset: usize, (len, gathered): (usize, bool)) -> &[u8] {
        if len == 0 {
            &[]
        } else if gathered {
            &self.tx_scratch[..len]
        } else {
            self.tx_buffer.get_allocated(offset, len)
        }
    }

    /// Send our SYN, or SYN|ACK once the peer's SYN is known.
    pub(super) fn send_syn(&mut self, cx: &mut Context) {
        let mss = self.local_mss(cx);
        let mut repr = self.segment(TcpControl::Syn, self.isn, &[]);
        repr.max_seg_size = Some(u16::try_from(mss).unwrap_or(u16::MAX));
        self.transmit(cx, &repr);

        let syn_end = self.isn + 1;
        self.snd_nxt = self.snd_nxt.max(syn_end);
        self.snd_max = self.snd_max.max(syn_end);
        self.rtte.on_send(cx.now(), syn_end);
    }

    /// Send an empty acknowledgment right away.
    pub(super) fn send_ack(&mut self, cx: &mut Context) {
        if !self.is_synchronized() {
            return;
        }
        let repr = self.segment(TcpControl::None, self.snd_nxt, &[]);
        self.transmit(cx, &repr);
    }

    pub(super) fn send_rst(&mut self, cx: &mut Context) {
        let repr = self.segment(TcpControl::Rst, self.snd_nxt, &[]);
        self.transmit(cx, &repr);
    }

    /// Send `len` octets starting at `snd_nxt`, followed by our FIN if `fin` is set.
    fn send_data(&mut self, cx: &mut Context, len: usize, fin: bool) {
        let offset = self.snd_nxt - self.snd_una;
        let gathered = self.gather_tx(offset, len);
        let len = gathered.0;

        let control = if fin {
            TcpControl::Fin
        } else if len > 0 && offset + len == self.tx_buffer.len() {
            TcpControl::Psh
        } else {
            TcpControl::None
        };
        let repr = self.segment(control, self.snd_nxt, self.tx_payload(offset, gathered));
        let (segment_len, window_len) = (repr.segment_len(), repr.window_len);
        let acked = self.emit(cx, &repr) && repr.ack_number.is_some();
        if acked {
            self.on_ack_sent(window_len);
        }

        self.snd_nxt += segment_len;
        self.snd_max = self.snd_max.max(self.snd_nxt);
        self.rtte.on_send(cx.now(), self.snd_nxt);
        let rto = self.rtte.retransmission_timeout();
        self.timers.ensure_retransmit(cx.now(), rto);
    }

    /// Send as much queued data as the windows, Nagle and the silly window rules allow,
    /// and our FIN once everything before it went out.
    pub(crate) fn output(&mut self, cx: &mut Context) {
        if !matches!(
            self.state,
            State::Established
                | State::CloseWait
                | State::FinWait1
                | State::Closing
                | State::LastAck
        ) || !self.syn_acked()
        {
            return;
        }

        if self.snd_wnd > 0 && self.timers.is_persist() {
            tcp_trace!("{}: window open, persist timer stopped", self);
            self.timers.cancel_persist();
        }

        loop {
            let in_flight = self.snd_nxt - self.snd_una;
            let unsent = self.tx_buffer.len().saturating_sub(in_flight);
            let fin_unsent = self.fin_queued() && in_flight <= self.tx_buffer.len();

            if unsent == 0 {
                if fin_unsent {
                    self.send_data(cx, 0, true);
                }
                break;
            }

            let window = self.snd_wnd.min(self.controller.inner().window());
            let usable = window.saturating_sub(in_flight);

            let len = if unsent.min(usable) >= self.smss {
                self.smss
            } else if self.nagle && in_flight > 0 {
                tcp_trace!("{}: nagle: {} octets wait for an ACK", self, unsent);
                break;
            } else if unsent <= usable {
                unsent
            } else if usable > 0 && usable >= self.max_wnd / 2 {
                usable
            } else {
                tcp_trace!(
                    "{}: sws: {} octets wait, usable window {}",
                    self,
                    unsent,
                    usable
                );
                break;
            };
            self.send_data(cx, len, fin_unsent && len == unsent);
        }

        if self.snd_wnd == 0 && self.snd_nxt == self.snd_una && !self.tx_buffer.is_empty() {
            let rto = self.rtte.retransmission_timeout();
            self.timers.set_for_persist(cx.now(), rto);
        }
    }

    /// Resend the oldest unacknowledged segment without touching `snd_nxt`, and return
    /// the sequence number following it.
    pub(super) fn retransmit_oldest(&mut self, cx: &mut Context) -> TcpSeqNumber {
        if !self.syn_acked() {
            self.send_syn(cx);
            return self.isn + 1;
        }

        let len = self.smss.min(self.tx_buffer.len());
        let fin = self.fin_sent() && len == self.tx_buffer.len();
        let gathered = self.gather_tx(0, len);

        let control = if fin { TcpControl::Fin } else { TcpControl::None };
        let repr = self.segment(control, self.snd_una, self.tx_payload(0, gathered));
        let (segment_len, window_len) = (repr.segment_len(), repr.window_len);
        if self.emit(cx, &repr) && repr.ack_number.is_some() {
            self.on_ack_sent(window_len);
        }
        self.snd_una + segment_len
    }

    /// Run the timers that expired by `cx.now()`.
    pub(crate) fn on_tick(&mut self, cx: &mut Context) {
        let now = cx.now();

        if self.timers.should_close(now) {
            net_debug!("{}: TIME-WAIT over", self);
            self.dispatch(cx, Event::TimeWaitExpired);
            return;
        }
        if self.timers.should_retransmit(now) {
            self.on_retransmit_timeout(cx);
            if self.state == State::Closed {
                return;
            }
        }
        if self.timers.should_probe(now) {
            self.on_persist_timeout(cx);
        }
        if self.timers.should_ack(now) {
            tcp_trace!("{}: delayed ACK", self);
            self.send_ack(cx);
        }
    }

    fn on_retransmit_timeout(&mut self, cx: &mut Context) {
        let retries = self.timers.note_retry();
        if retries > cx.config().max_retries {
            net_debug!("{}: {} retransmissions, giving up", self, retries - 1);
            self.dispatch(cx, Event::Abort);
            return;
        }

        net_debug!(
            "{}: retransmission timeout #{} at {}",
            self,
            retries,
            self.snd_una
        );
        let flight_size = self.snd_max - self.snd_una;
        self.rtte.on_retransmit();
        self.controller.inner_mut().on_retransmit(flight_size);
        self.dupacks = 0;

        if !self.syn_acked() {
            self.send_syn(cx);
            let delay = self.syn_rto(cx.config(), retries);
            self.timers.set_for_retransmit(cx.now(), delay);
        } else {
            // Go back N: everything after the resent segment is sent again as the
            // window reopens.
            self.snd_nxt = self.retransmit_oldest(cx);
            let rto = self.rtte.retransmission_timeout();
            self.timers.set_for_retransmit(cx.now(), rto);
        }
    }

    fn on_persist_timeout(&mut self, cx: &mut Context) {
        if self.snd_wnd > 0 {
            self.timers.cancel_persist();
            self.output(cx);
            return;
        }

        let offset = self.snd_nxt - self.snd_una;
        let mut probe = [0u8; 1];
        if self.tx_buffer.read_allocated(offset, &mut probe) == 0 {
            self.timers.cancel_persist();
            return;
        }

        net_debug!("{}: zero window probe at {}", self, self.snd_nxt);
        let repr = self.segment(TcpControl::None, self.snd_nxt, &probe);
        self.transmit(cx, &repr);
        self.snd_max = self.snd_max.max(self.snd_nxt + 1);

        let max = cx.config().rto_max;
        self.timers.back_off_persist(cx.now(), max);
    }
}
