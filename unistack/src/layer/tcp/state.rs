//! The connection state machine of RFC 793, as an explicit transition table.
use core::fmt;

use super::Error;

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection, the terminal state.
    Closed,

    /// Waiting for a connection request.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Other side closed its connection.
    CloseWait,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Connection closed after other side closed its already.
    LastAck,

    /// Both sides recognized connection as closed.
    TimeWait,
}

/// The events that move a connection between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Active open by the application.
    Open,
    /// Passive open.
    Listen,
    /// A SYN without acknowledgement arrived.
    RecvSyn,
    /// A SYN acknowledging our own SYN arrived.
    RecvSynAck,
    /// Everything we sent, including our SYN or FIN, is acknowledged.
    Acked,
    /// The application closed its side.
    Close,
    /// The remote closed its side.
    RecvFin,
    /// Twice the maximum segment lifetime passed in `TIME-WAIT`.
    TimeWaitExpired,
    /// The remote reset the connection.
    Reset,
    /// Local teardown, by the application or after a fatal error.
    Abort,
}

impl State {
    /// The state reached through `event`.
    ///
    /// Events that have no meaning in the current state are an error, the state is unchanged.
    pub fn next(self, event: Event) -> Result<State, Error> {
        use self::State::*;
        let next = match (self, event) {
            (_, Event::Reset) | (_, Event::Abort) => Closed,
            (Closed, Event::Open) => SynSent,
            (Closed, Event::Listen) => Listen,
            (Listen, Event::RecvSyn) => SynReceived,
            (Listen, Event::Open) => SynSent,
            (Listen, Event::Close) => Closed,
            (SynSent, Event::RecvSynAck) => Established,
            (SynSent, Event::RecvSyn) => SynReceived,
            (SynSent, Event::Close) => Closed,
            (SynReceived, Event::Acked) => Established,
            (SynReceived, Event::Close) => FinWait1,
            (Established, Event::Close) => FinWait1,
            (Established, Event::RecvFin) => CloseWait,
            (FinWait1, Event::Acked) => FinWait2,
            (FinWait1, Event::RecvFin) => Closing,
            (FinWait2, Event::RecvFin) => TimeWait,
            (CloseWait, Event::Close) => LastAck,
            (Closing, Event::Acked) => TimeWait,
            (LastAck, Event::Acked) => Closed,
            (TimeWait, Event::TimeWaitExpired) => Closed,
            (from, event) => return Err(Error::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Whether both sequence spaces are synchronized.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Closed | State::Listen | State::SynSent => false,
            _ => true,
        }
    }

    /// Whether the application may still queue data.
    pub fn may_write(self) -> bool {
        match self {
            State::SynSent | State::SynReceived | State::Established | State::CloseWait => true,
            _ => false,
        }
    }

    /// Whether arriving segment text is delivered.
    pub fn may_receive(self) -> bool {
        match self {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN-SENT",
            State::SynReceived => "SYN-RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN-WAIT-1",
            State::FinWait2 => "FIN-WAIT-2",
            State::CloseWait => "CLOSE-WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST-ACK",
            State::TimeWait => "TIME-WAIT",
        };
        f.pad(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::State::*;

    fn walk(start: State, events: &[Event]) -> Result<State, Error> {
        events.iter().try_fold(start, |state, &event| state.next(event))
    }

    #[test]
    fn passive_open_and_close() {
        let path = [Event::Listen, Event::RecvSyn, Event::Acked, Event::RecvFin, Event::Close];
        assert_eq!(walk(Closed, &path[..3]), Ok(Established));
        assert_eq!(walk(Closed, &path[..4]), Ok(CloseWait));
        assert_eq!(walk(Closed, &path), Ok(LastAck));
        assert_eq!(LastAck.next(Event::Acked), Ok(Closed));
    }

    #[test]
    fn active_open_and_close() {
        let path = [Event::Open, Event::RecvSynAck, Event::Close, Event::Acked, Event::RecvFin];
        assert_eq!(walk(Closed, &path), Ok(TimeWait));
        assert_eq!(TimeWait.next(Event::TimeWaitExpired), Ok(Closed));
    }

    #[test]
    fn simultaneous() {
        assert_eq!(walk(Closed, &[Event::Open, Event::RecvSyn, Event::Acked]), Ok(Established));
        assert_eq!(walk(Established, &[Event::Close, Event::RecvFin, Event::Acked]), Ok(TimeWait));
    }

    #[test]
    fn reset_from_anywhere() {
        for &state in &[Listen, SynSent, SynReceived, Established, FinWait1, FinWait2,
                        CloseWait, Closing, LastAck, TimeWait] {
            assert_eq!(state.next(Event::Reset), Ok(Closed));
            assert_eq!(state.next(Event::Abort), Ok(Closed));
        }
    }

    #[test]
    fn invalid_transitions() {
        assert_eq!(Closed.next(Event::Close),
                   Err(Error::InvalidTransition { from: Closed, event: Event::Close }));
        assert_eq!(FinWait2.next(Event::Close),
                   Err(Error::InvalidTransition { from: FinWait2, event: Event::Close }));
        assert!(Established.next(Event::RecvSyn).is_err());
        assert!(Listen.next(Event::Acked).is_err());
        assert!(TimeWait.next(Event::RecvFin).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", SynReceived), "SYN-RECEIVED");
        assert_eq!(format!("{:<12}|", TimeWait), "TIME-WAIT   |");
    }
}
