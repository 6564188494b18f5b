//! Segment arrival processing, after RFC 793 § 3.9 "SEGMENT ARRIVES".

use super::fsm::Event;
use super::{State, Tcb};
use crate::iface::Context;
use crate::socket::Error;
use crate::wire::{TcpControl, TcpRepr, TcpSeqNumber};

impl Tcb<'_> {
    /// Process a segment addressed to this connection.
    ///
    /// The interface has already verified the checksum and matched the four-tuple.
    /// Segments for LISTEN and CLOSED blocks are handled by the interface.
    pub(crate) fn process(&mut self, cx: &mut Context, repr: &TcpRepr) {
        tcp_trace!("{}: recv {}", self, repr);
        match self.state {
            State::Closed | State::Listen => {
                net_debug!("{}: segment in {} ignored", self, self.state);
            }
            State::SynSent => self.process_syn_sent(cx, repr),
            _ => {
                self.process_synchronized(cx, repr);
                self.output(cx);
            }
        }
    }

    fn process_syn_sent(&mut self, cx: &mut Context, repr: &TcpRepr) {
        let ack_ok = match repr.ack_number {
            Some(ack_number) if ack_number <= self.isn || ack_number > self.snd_max => {
                net_debug!(
                    "{}: unacceptable ACK ({} not in {}..={})",
                    self,
                    ack_number,
                    self.isn + 1,
                    self.snd_max
                );
                if repr.control != TcpControl::Rst {
                    self.reply_rst(cx, repr);
                }
                return;
            }
            Some(_) => true,
            None => false,
        };

        match repr.control {
            TcpControl::Rst => {
                if ack_ok {
                    self.dispatch(cx, Event::RcvRst);
                } else {
                    net_debug!("{}: RST without ACK ignored", self);
                }
            }
            TcpControl::Syn => {
                self.irs = repr.seq_number;
                self.rcv_nxt = repr.seq_number + 1;
                self.snd_wl1 = repr.seq_number;
                self.snd_wnd = repr.window_len as usize;
                self.max_wnd = self.snd_wnd;
                self.negotiate_mss(cx, repr.max_seg_size);

                match repr.ack_number {
                    Some(ack_number) if ack_ok => {
                        self.snd_una = ack_number;
                        self.snd_nxt = self.snd_nxt.max(ack_number);
                        self.snd_wl2 = ack_number;
                        self.rtte.on_ack(cx.now(), ack_number);
                        self.dispatch(cx, Event::RcvSynAck);
                        self.output(cx);
                    }
                    _ => {
                        net_debug!("{}: simultaneous open", self);
                        self.dispatch(cx, Event::RcvSyn);
                    }
                }
            }
            _ => net_debug!("{}: expected a SYN, segment dropped", self),
        }
    }

    fn process_synchronized(&mut self, cx: &mut Context, repr: &TcpRepr) {
        let seq_number = repr.seq_number;

        if repr.control == TcpControl::Rst {
            if seq_number == self.rcv_nxt {
                let refused = self.state == State::SynReceived && self.active_open;
                self.dispatch(cx, Event::RcvRst);
                if refused {
                    self.error = Some(Error::ConnectionRefused);
                }
            } else {
                net_debug!(
                    "{}: RST with seq {} ignored, expecting {}",
                    self,
                    seq_number,
                    self.rcv_nxt
                );
            }
            return;
        }

        if repr.control == TcpControl::Syn {
            if seq_number != self.irs {
                net_debug!("{}: SYN in window, resetting", self);
                self.dispatch(cx, Event::RcvSynInWindow);
                return;
            }
            // A SYN|ACK acknowledging our SYN completes a simultaneous open; any other
            // copy of the peer's SYN means it didn't see our answer.
            let acks_our_syn = self.state == State::SynReceived
                && matches!(repr.ack_number,
                    Some(ack_number) if ack_number > self.isn && ack_number <= self.snd_max);
            if !acks_our_syn {
                if self.state == State::SynReceived {
                    self.dispatch(cx, Event::RcvSyn);
                } else {
                    self.send_ack(cx);
                }
                return;
            }
        }

        let Some(ack_number) = repr.ack_number else {
            net_debug!("{}: segment without ACK dropped", self);
            return;
        };

        // Where the segment lies relative to the receive window.
        let seg_end = seq_number + repr.segment_len();
        let out_of_order = seq_number > self.rcv_nxt;
        let duplicate = !out_of_order && repr.segment_len() > 0 && seg_end <= self.rcv_nxt;

        if !self.process_ack(cx, repr, ack_number, out_of_order) {
            return;
        }
        if self.state == State::Closed {
            return;
        }

        if out_of_order {
            net_debug!(
                "{}: out of order segment at {}, expecting {}",
                self,
                seq_number,
                self.rcv_nxt
            );
            self.send_ack(cx);
            return;
        }

        if repr.segment_len() == 0 && seq_number < self.rcv_nxt {
            // A late ACK or window update; its acknowledgment was taken above.
            return;
        }

        if duplicate {
            if repr.control == TcpControl::Fin
                && self.fin_received
                && seg_end == self.rcv_nxt
            {
                net_debug!("{}: retransmitted FIN", self);
                self.dispatch(cx, Event::RcvFin);
            } else {
                net_debug!("{}: duplicate segment at {}", self, seq_number);
                self.send_ack(cx);
            }
            return;
        }

        self.process_data(cx, repr);
    }

    /// Process the acknowledgment field and the window. Returns false if the segment
    /// must be dropped.
    fn process_ack(
        &mut self,
        cx: &mut Context,
        repr: &TcpRepr,
        ack_number: TcpSeqNumber,
        out_of_order: bool,
    ) -> bool {
        if self.state == State::SynReceived {
            if ack_number <= self.snd_una || ack_number > self.snd_max {
                net_debug!("{}: unacceptable ACK {} in SYN-RECEIVED", self, ack_number);
                self.reply_rst(cx, repr);
                return false;
            }
            self.dispatch(cx, Event::RcvAckOfSyn);
        }

        if ack_number > self.snd_max {
            net_debug!(
                "{}: ACK of unsent data ({} > {})",
                self,
                ack_number,
                self.snd_max
            );
            self.send_ack(cx);
            return false;
        }

        if ack_number < self.snd_una {
            // An old acknowledgment carries no news, not even about the window.
            return true;
        }

        let window_len = repr.window_len as usize;
        let window_changed = window_len != self.snd_wnd;

        if ack_number > self.snd_una {
            self.process_new_ack(cx, ack_number);
            if self.state == State::Closed {
                return true;
            }
        } else if self.snd_nxt > self.snd_una
            && (repr.payload.is_empty() || out_of_order)
            && repr.control != TcpControl::Fin
            && !window_changed
            && window_len != 0
        {
            self.process_duplicate_ack(cx);
        }

        // RFC 793: update the window only from segments newer than the last update.
        if self.snd_wl1 < repr.seq_number
            || (self.snd_wl1 == repr.seq_number && self.snd_wl2 <= ack_number)
        {
            if window_changed {
                tcp_trace!("{}: send window {} => {}", self, self.snd_wnd, window_len);
            }
            self.snd_wnd = window_len;
            self.snd_wl1 = repr.seq_number;
            self.snd_wl2 = ack_number;
            self.max_wnd = self.max_wnd.max(window_len);

            if self.snd_wnd == 0 && self.snd_nxt > self.snd_una && !self.tx_buffer.is_empty() {
                // Stop retransmitting into a closed window and probe it instead.
                net_debug!(
                    "{}: zero window, {} octets pulled back",
                    self,
                    self.snd_nxt - self.snd_una
                );
                self.timers.cancel_retransmit();
                self.rtte.abort_sampling();
                self.snd_nxt = self.snd_una;
            }
        }
        true
    }

    fn process_new_ack(&mut self, cx: &mut Context, ack_number: TcpSeqNumber) {
        let mut acked = ack_number - self.snd_una;
        if !self.syn_acked() {
            acked -= 1;
        }
        let fin_acked = acked > self.tx_buffer.len();
        let data_acked = acked.min(self.tx_buffer.len());

        tcp_trace!(
            "{}: tx buffer: dequeueing {} octets (now {})",
            self,
            data_acked,
            self.tx_buffer.len() - data_acked
        );
        self.tx_buffer.dequeue_allocated(data_acked);
        self.snd_una = ack_number;
        self.snd_nxt = self.snd_nxt.max(ack_number);
        self.rtte.on_ack(cx.now(), ack_number);

        if self.dupacks >= 3 {
            self.controller.inner_mut().on_recovery_exit();
        } else {
            self.controller.inner_mut().on_ack(data_acked);
        }
        self.dupacks = 0;

        if self.snd_una == self.snd_max {
            self.timers.cancel_retransmit();
        } else {
            let rto = self.rtte.retransmission_timeout();
            self.timers.set_for_retransmit(cx.now(), rto);
            self.timers.reset_retries();
        }

        if data_acked > 0 {
            self.wake = true;
        }
        if fin_acked {
            self.dispatch(cx, Event::RcvAckOfFin);
        }
    }

    fn process_duplicate_ack(&mut self, cx: &mut Context) {
        self.dupacks = self.dupacks.saturating_add(1);
        let flight_size = self.snd_nxt - self.snd_una;
        net_debug!("{}: duplicate ACK #{} for {}", self, self.dupacks, self.snd_una);

        self.controller
            .inner_mut()
            .on_duplicate_ack(self.dupacks, flight_size);
        if self.dupacks == 3 {
            net_debug!("{}: fast retransmit from {}", self, self.snd_una);
            self.rtte.abort_sampling();
            self.retransmit_oldest(cx);
        }
    }

    /// Queue in-order payload and accept the FIN following it.
    fn process_data(&mut self, cx: &mut Context, repr: &TcpRepr) {
        // Drop whatever we already have. A SYN sits in front of the payload.
        let start = if repr.control == TcpControl::Syn {
            repr.seq_number + 1
        } else {
            repr.seq_number
        };
        let skip = if self.rcv_nxt > start {
            self.rcv_nxt - start
        } else {
            0
        };
        let payload = &repr.payload[skip.min(repr.payload.len())..];

        let accepted = if self.fin_received || payload.is_empty() {
            0
        } else {
            self.rx_buffer.enqueue_slice(payload)
        };
        if accepted > 0 {
            tcp_trace!(
                "{}: rx buffer: enqueueing {} octets (now {})",
                self,
                accepted,
                self.rx_buffer.len()
            );
            self.rcv_nxt += accepted;
            self.wake = true;
        }

        if accepted < payload.len() {
            // Beyond the window; the peer learns the window from the ACK.
            net_debug!(
                "{}: {} octets beyond the receive window dropped",
                self,
                payload.len() - accepted
            );
            self.send_ack(cx);
            return;
        }

        if repr.control == TcpControl::Fin {
            self.rcv_nxt += 1;
            self.fin_received = true;
            self.dispatch(cx, Event::RcvFin);
            return;
        }

        if accepted > 0 {
            if self.timers.is_delayed_ack() {
                // Every second full segment is acknowledged at once.
                self.send_ack(cx);
            } else {
                let delay = cx.config().delack;
                self.timers.set_for_delayed_ack(cx.now(), delay);
            }
        }
    }

    /// Answer an unacceptable segment with a reset built from its own numbers.
    fn reply_rst(&mut self, cx: &mut Context, repr: &TcpRepr) {
        let Some(tuple) = self.tuple else { return };
        let reply = Tcb::rst_reply(repr);
        cx.emit(tuple.local.addr, tuple.remote.addr, &reply);
    }
}
