//! The RFC 793 connection state machine, separated from segment I/O.
//!
//! [`transition`] maps a state and an event to the next state and the side effects
//! the control block has to carry out. It never looks at sequence numbers; the input
//! engine classifies a segment into an [`Event`] first.

use heapless::Vec;

use super::State;
use crate::socket::Error;

/// Something that happened to a connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Event {
    /// The user called `connect`.
    ActiveOpen,
    /// The user called `listen`.
    PassiveOpen,
    /// A SYN without an acceptable ACK arrived. In SYN-RECEIVED this is a
    /// retransmission of the SYN we already answered.
    RcvSyn,
    /// A SYN acknowledging our SYN arrived.
    RcvSynAck,
    /// An acceptable ACK covering our SYN arrived in SYN-RECEIVED.
    RcvAckOfSyn,
    /// An acceptable ACK covering our FIN arrived.
    RcvAckOfFin,
    /// The peer's FIN was accepted, or a retransmission of it arrived.
    RcvFin,
    /// An acceptable RST arrived.
    RcvRst,
    /// A SYN arrived on a synchronized connection.
    RcvSynInWindow,
    /// The user called `close`.
    Close,
    /// The retransmission limit was exceeded, or the user aborted.
    Abort,
    /// The 2×MSL quiet time is over.
    TimeWaitExpired,
}

/// A side effect requested by a [`Transition`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Action {
    SendSyn,
    SendSynAck,
    SendAck,
    SendRst,
    ArmRetransmit,
    CancelRetransmit,
    ArmTimeWait,
    /// Cancels all four timers. Listed before `ArmTimeWait` when both apply.
    CancelTimers,
    Wake,
    SetError(Error),
    Release,
}

/// Upper bound of actions a single transition carries.
pub const MAX_ACTIONS: usize = 6;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Transition {
    pub next: State,
    pub actions: Vec<Action, MAX_ACTIONS>,
}

impl Transition {
    fn new(next: State, actions: &[Action]) -> Transition {
        let mut list = Vec::new();
        for action in actions {
            // Every table entry below has at most MAX_ACTIONS actions.
            let _ = list.push(*action);
        }
        Transition {
            next,
            actions: list,
        }
    }

    pub fn has(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }
}

/// Look up the transition for `event` in `state`.
///
/// Returns `None` when the event is not meaningful in that state; the caller drops
/// the segment or rejects the call.
pub fn transition(state: State, event: Event) -> Option<Transition> {
    use self::Action::*;
    use self::Event::*;

    let reset = |error: Error| {
        Transition::new(
            State::Closed,
            &[SetError(error), CancelTimers, Wake, Release],
        )
    };

    let transition = match (state, event) {
        (State::Closed, ActiveOpen) => Transition::new(State::SynSent, &[SendSyn, ArmRetransmit]),
        (State::Closed, PassiveOpen) => Transition::new(State::Listen, &[]),
        (State::Closed, Close) => Transition::new(State::Closed, &[Release]),

        // A listener spawns a child per SYN; this is the child's first step.
        (State::Listen, RcvSyn) => {
            Transition::new(State::SynReceived, &[SendSynAck, ArmRetransmit])
        }
        (State::Listen, Close) | (State::Listen, Abort) => {
            Transition::new(State::Closed, &[Wake, Release])
        }

        (State::SynSent, RcvSynAck) => Transition::new(
            State::Established,
            &[CancelRetransmit, SendAck, Wake],
        ),
        // Simultaneous open.
        (State::SynSent, RcvSyn) => Transition::new(State::SynReceived, &[SendSynAck]),
        (State::SynSent, RcvRst) => reset(Error::ConnectionRefused),
        (State::SynSent, Close) => Transition::new(State::Closed, &[CancelTimers, Wake, Release]),
        (State::SynSent, Abort) => reset(Error::TimedOut),

        (State::SynReceived, RcvSyn) => Transition::new(State::SynReceived, &[SendSynAck]),
        (State::SynReceived, RcvAckOfSyn) => {
            Transition::new(State::Established, &[CancelRetransmit, Wake])
        }
        (State::SynReceived, RcvFin) => Transition::new(State::CloseWait, &[SendAck, Wake]),
        (State::SynReceived, Close) => Transition::new(State::FinWait1, &[]),

        (State::Established, RcvFin) => Transition::new(State::CloseWait, &[SendAck, Wake]),
        (State::Established, Close) => Transition::new(State::FinWait1, &[]),

        (State::FinWait1, RcvAckOfFin) => {
            Transition::new(State::FinWait2, &[CancelRetransmit, Wake])
        }
        // Simultaneous close.
        (State::FinWait1, RcvFin) => Transition::new(State::Closing, &[SendAck, Wake]),

        (State::FinWait2, RcvFin) => Transition::new(
            State::TimeWait,
            &[SendAck, CancelTimers, ArmTimeWait, Wake],
        ),

        (State::CloseWait, RcvFin) => Transition::new(State::CloseWait, &[SendAck]),
        (State::CloseWait, Close) => Transition::new(State::LastAck, &[]),

        (State::Closing, RcvFin) => Transition::new(State::Closing, &[SendAck]),
        (State::Closing, RcvAckOfFin) => {
            Transition::new(State::TimeWait, &[CancelTimers, ArmTimeWait, Wake])
        }

        (State::LastAck, RcvFin) => Transition::new(State::LastAck, &[SendAck]),
        (State::LastAck, RcvAckOfFin) => {
            Transition::new(State::Closed, &[CancelTimers, Wake, Release])
        }

        // A retransmitted FIN restarts the quiet time.
        (State::TimeWait, RcvFin) => {
            Transition::new(State::TimeWait, &[SendAck, CancelTimers, ArmTimeWait])
        }
        (State::TimeWait, TimeWaitExpired) | (State::TimeWait, RcvRst) => {
            Transition::new(State::Closed, &[CancelTimers, Wake, Release])
        }
        (State::TimeWait, Abort) => Transition::new(State::Closed, &[CancelTimers, Wake, Release]),

        (
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck,
            RcvRst,
        ) => reset(Error::ConnectionReset),

        (
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck,
            RcvSynInWindow,
        ) => Transition::new(
            State::Closed,
            &[SendRst, SetError(Error::ConnectionReset), CancelTimers, Wake, Release],
        ),

        (
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck,
            Abort,
        ) => Transition::new(
            State::Closed,
            &[SendRst, SetError(Error::TimedOut), CancelTimers, Wake, Release],
        ),

        _ => return None,
    };
    Some(transition)
}
