//! A single TCP connection.
//!
//! Segment processing follows the event processing section of RFC 793 in order: sequence number
//! check, RST, SYN, ACK, segment text and finally FIN. Outgoing segments are queued on the
//! connection and collected by the engine.
use core::cell::RefCell;
use core::fmt;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::sync::Arc;

use crate::storage::{BufferStore, Layer, Packet, Status};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{ethernet, ipv4, tcp};
use crate::wire::{TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber};
use super::{Config, Error, Event, FourTuple, Rttm, State, Stats};
use super::read_buffer::ReadBuffer;
use super::write_queue::WriteQueue;

/// Room reserved in front of every segment for the lower layer headers.
pub(crate) const HEADROOM: usize = ethernet::HEADER_LEN + ipv4::HEADER_LEN;

/// The segment size assumed when the peer announces none (RFC 1122).
const DEFAULT_MSS: u16 = 536;

/// Timeout after a SYN timed out (RFC 6298, 5.7).
const SYN_RTO: Duration = Duration::from_secs(3);

/// Why the remote side went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disconnect {
    /// The remote closed its side, data may still be written.
    Closing,
    /// The connection attempt was answered with a reset.
    Refused,
    /// The remote reset an open connection.
    Reset,
}

type ConnectFn = Box<dyn FnMut(&mut Connection)>;
type ReadFn = Box<dyn FnMut(&mut Connection, &[u8])>;
type DisconnectFn = Box<dyn FnMut(&mut Connection, Disconnect)>;
type CloseFn = Box<dyn FnMut(&mut Connection)>;
type ErrorFn = Box<dyn FnMut(&mut Connection, Error)>;
type WriteFn = Box<dyn FnMut(&mut Connection, usize)>;
type RtxTimeoutFn = Box<dyn FnMut(&mut Connection, u32, Duration)>;

#[derive(Default)]
struct Callbacks {
    on_connect: Option<ConnectFn>,
    on_read: Option<ReadFn>,
    on_disconnect: Option<DisconnectFn>,
    on_close: Option<CloseFn>,
    on_error: Option<ErrorFn>,
    on_write: Option<WriteFn>,
    on_rtx_timeout: Option<RtxTimeoutFn>,
}

/// The state of a connection.
///
/// Includes current state machine state, the configuration that stays constant during a
/// connection, and the in- and out-buffers.
pub struct Connection {
    tuple: FourTuple,

    /// The current state of the state machine.
    current: State,

    /// The previous state of the state machine.
    ///
    /// Required to correctly handle a RST in `SYN-RECEIVED`. It tells *how* we ended up forming
    /// a half-open connection.
    previous: State,

    /// The sending state.
    ///
    /// In RFC793 this is referred to as `SND`.
    send: Send,

    /// The receiving state.
    ///
    /// In RFC793 this is referred to as `RCV`.
    recv: Receive,

    /// The flow control mechanism.
    flow_control: NewReno,

    /// The SMSS is the size of the largest segment that the sender can transmit.
    ///
    /// The minimum of what the peer announced in its MSS option, or 536 bytes without one, and
    /// what fits into our own buffers.
    smss: usize,

    rttm: Rttm,
    config: Config,
    writeq: WriteQueue,
    readq: ReadBuffer,
    outbound: VecDeque<Packet>,
    store: Arc<BufferStore>,

    rtx_timer: Expiration,
    /// Consecutive retransmission timeouts without progress.
    rtx_attempt: u32,
    /// Retransmissions of our SYN.
    syn_rtx: u32,

    dack_timer: Expiration,
    /// Segments received since our last acknowledgement.
    dack_segments: u32,
    ack_pending: bool,

    time_wait: Expiration,

    /// The application closed, a FIN follows the queued data.
    fin_queued: bool,
    fin_sent: bool,
    /// A one byte probe of a closed send window is outstanding.
    probing: bool,
    /// The SYN of the remote was received.
    recv_synced: bool,

    now: Instant,
    error: Option<Error>,
    /// Reset or refusal, reported from `finish` after removal.
    disconnect: Option<Disconnect>,
    stats: Rc<RefCell<Stats>>,
    callbacks: Callbacks,
}

#[derive(Clone, Copy, Debug)]
struct Send {
    /// The next not yet acknowledged sequence number.
    ///
    /// In RFC793 this is referred to as `SND.UNA`.
    unacked: TcpSeqNumber,

    /// The next sequence number to use for transmission.
    ///
    /// In RFC793 this is referred to as `SND.NXT`.
    next: TcpSeqNumber,

    /// The send window size indicated by the receiver.
    ///
    /// In RFC793 this is referred to as `SND.WND`.
    window: u16,

    /// Sequence and acknowledgement number of the segment last updating the window.
    ///
    /// `SND.WL1` and `SND.WL2`.
    wl1: TcpSeqNumber,
    wl2: TcpSeqNumber,

    /// The initial sequence number, `ISS`.
    initial_seq: TcpSeqNumber,
}

#[derive(Clone, Copy, Debug)]
struct Receive {
    /// The next expected sequence number, `RCV.NXT`.
    next: TcpSeqNumber,

    /// The initial receive sequence number, `IRS`.
    initial_seq: TcpSeqNumber,
}

/// Models TCP NewReno flow control and congestion avoidance.
#[derive(Clone, Copy, Debug)]
struct NewReno {
    /// Decider between slow-start and congestion.
    ///
    /// Set to MAX initially, then updated on occurance of congestion.
    ssthresh: usize,

    /// The window dictated by congestion.
    congestion_window: usize,

    /// Sender side end flag to fast recover.
    ///
    /// When in fast recover, declares the sent sequence number that must be acknowledged to end
    /// fast recover. Initially set to the initial sequence number (ISS).
    recover: TcpSeqNumber,

    dup_acks: u32,
    fast_recovery: bool,
}

impl Connection {
    fn new(
        tuple: FourTuple,
        iss: TcpSeqNumber,
        config: &Config,
        store: Arc<BufferStore>,
        stats: Rc<RefCell<Stats>>,
        now: Instant,
    ) -> Self {
        let mut connection = Connection {
            tuple,
            current: State::Closed,
            previous: State::Closed,
            send: Send {
                unacked: iss,
                next: iss,
                window: 0,
                wl1: TcpSeqNumber::default(),
                wl2: iss,
                initial_seq: iss,
            },
            recv: Receive {
                next: TcpSeqNumber::default(),
                initial_seq: TcpSeqNumber::default(),
            },
            flow_control: NewReno {
                ssthresh: usize::max_value(),
                congestion_window: 0,
                recover: iss,
                dup_acks: 0,
                fast_recovery: false,
            },
            smss: 0,
            rttm: Rttm::new(config.initial_rto, config.min_rto, config.max_rto),
            config: *config,
            writeq: WriteQueue::new(),
            readq: ReadBuffer::new(config.receive_buffer),
            outbound: VecDeque::new(),
            store,
            rtx_timer: Expiration::Never,
            rtx_attempt: 0,
            syn_rtx: 0,
            dack_timer: Expiration::Never,
            dack_segments: 0,
            ack_pending: false,
            time_wait: Expiration::Never,
            fin_queued: false,
            fin_sent: false,
            probing: false,
            recv_synced: false,
            now,
            error: None,
            disconnect: None,
            stats,
            callbacks: Callbacks::default(),
        };
        connection.set_smss(None);
        connection
    }

    /// Actively open a connection, sending a SYN.
    pub(crate) fn connect(
        tuple: FourTuple,
        iss: TcpSeqNumber,
        config: &Config,
        store: Arc<BufferStore>,
        stats: Rc<RefCell<Stats>>,
        now: Instant,
    ) -> Self {
        let mut connection = Connection::new(tuple, iss, config, store, stats, now);
        connection.transition(Event::Open);
        connection.send_syn();
        connection
    }

    /// Answer the SYN of a remote with a SYN-ACK, as a listener does.
    pub(crate) fn accept(
        tuple: FourTuple,
        iss: TcpSeqNumber,
        syn: &TcpRepr,
        config: &Config,
        store: Arc<BufferStore>,
        stats: Rc<RefCell<Stats>>,
        now: Instant,
    ) -> Self {
        let mut connection = Connection::new(tuple, iss, config, store, stats, now);
        connection.transition(Event::Listen);
        connection.transition(Event::RecvSyn);
        connection.receive_syn(syn);
        connection.send.window = syn.window_len;
        connection.send.wl1 = syn.seq_number;
        connection.send_syn();
        connection
    }

    pub fn state(&self) -> State {
        self.current
    }

    pub fn tuple(&self) -> FourTuple {
        self.tuple
    }

    /// The round trip estimator of the connection.
    pub fn rttm(&self) -> &Rttm {
        &self.rttm
    }

    /// The effective maximum segment size.
    pub fn smss(&self) -> usize {
        self.smss
    }

    pub fn congestion_window(&self) -> usize {
        self.flow_control.congestion_window
    }

    /// The slow start threshold, unbounded until the first loss.
    pub fn ssthresh(&self) -> usize {
        self.flow_control.ssthresh
    }

    /// Sequence space sent but not yet acknowledged.
    pub fn flight_size(&self) -> usize {
        self.send.next - self.send.unacked
    }

    /// Queued bytes not yet sent.
    pub fn unsent(&self) -> usize {
        self.writeq.unsent()
    }

    /// Received bytes waiting for `read`.
    pub fn readable(&self) -> usize {
        self.readq.ready()
    }

    /// The error that ended the connection, if any.
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    /// Called once when the connection reaches `ESTABLISHED`.
    pub fn on_connect(&mut self, callback: impl FnMut(&mut Connection) + 'static) {
        self.callbacks.on_connect = Some(Box::new(callback));
    }

    /// Called with data as it becomes available in order.
    ///
    /// Without a read callback data waits in the receive buffer, see `read`.
    pub fn on_read(&mut self, callback: impl FnMut(&mut Connection, &[u8]) + 'static) {
        self.callbacks.on_read = Some(Box::new(callback));
    }

    /// Called when the remote closes or resets.
    ///
    /// Without a handler a connection closes its own side when the remote closes.
    pub fn on_disconnect(&mut self, callback: impl FnMut(&mut Connection, Disconnect) + 'static) {
        self.callbacks.on_disconnect = Some(Box::new(callback));
    }

    /// Called after the connection was removed from the engine.
    pub fn on_close(&mut self, callback: impl FnMut(&mut Connection) + 'static) {
        self.callbacks.on_close = Some(Box::new(callback));
    }

    /// Called before `on_close` when the connection ended with an error.
    pub fn on_error(&mut self, callback: impl FnMut(&mut Connection, Error) + 'static) {
        self.callbacks.on_error = Some(Box::new(callback));
    }

    /// Called with the size of each write once it is completely acknowledged.
    pub fn on_write(&mut self, callback: impl FnMut(&mut Connection, usize) + 'static) {
        self.callbacks.on_write = Some(Box::new(callback));
    }

    /// Called with the attempt number and current timeout before each retransmission.
    pub fn on_rtx_timeout(&mut self, callback: impl FnMut(&mut Connection, u32, Duration) + 'static) {
        self.callbacks.on_rtx_timeout = Some(Box::new(callback));
    }

    pub(crate) fn set_connect_boxed(&mut self, callback: ConnectFn) {
        self.callbacks.on_connect = Some(callback);
    }

    /// Queue data for transmission.
    ///
    /// With `push` the last segment of the data carries the PSH flag.
    pub fn write(&mut self, data: &[u8], push: bool) -> Result<usize, Error> {
        match self.current {
            State::Closed | State::Listen => return Err(Error::NotConnected),
            state if !state.may_write() => return Err(Error::Closing),
            _ if self.fin_queued => return Err(Error::Closing),
            _ => (),
        }

        self.writeq.push(data.to_vec(), push);
        self.output();
        Ok(data.len())
    }

    /// Read received data into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let before = self.readq.window();
        let len = self.readq.read(buf);
        // Tell the remote about a window that opened from below one segment, or half the
        // buffer when that is smaller (RFC 1122, 4.2.3.3).
        let threshold = self.smss.min(self.config.receive_buffer / 2).max(1);
        if len > 0 && before < threshold && self.readq.window() >= threshold
            && self.current.is_synchronized()
        {
            self.ack_pending = true;
            self.output();
        }
        len
    }

    /// Close our side of the connection.
    ///
    /// Queued data is still sent, followed by a FIN. Before the handshake completed the FIN
    /// waits for `ESTABLISHED`.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.current == State::Closed {
            return Err(Error::NotConnected);
        }
        if self.current == State::SynReceived {
            if self.fin_queued {
                return Err(Error::Closing);
            }
            self.fin_queued = true;
            return Ok(());
        }

        let next = self.current.next(Event::Close)?;
        self.enter(next);
        if next != State::Closed {
            self.fin_queued = true;
            self.output();
        }
        Ok(())
    }

    /// Tear down the connection at once, resetting it for the remote.
    pub fn abort(&mut self) {
        if self.current == State::Closed {
            return;
        }
        self.outbound.clear();
        if self.current.is_synchronized() {
            self.send_reset(self.send.next);
        }
        self.transition(Event::Abort);
    }

    /// Process an incoming segment of this connection.
    pub(crate) fn segment_arrives(&mut self, repr: &TcpRepr, payload: &[u8], now: Instant) {
        self.now = now;
        net_trace!("tcp: {} recv {}", self, repr);
        match self.current {
            State::Closed | State::Listen => return,
            State::SynSent => self.syn_sent(repr, payload),
            _ => self.synchronized(repr, payload),
        }
        self.output();
    }

    /// Drive the timers.
    pub(crate) fn on_tick(&mut self, now: Instant) {
        self.now = now;
        if self.time_wait.is_expired(now) {
            self.time_wait = Expiration::Never;
            self.transition(Event::TimeWaitExpired);
            return;
        }
        if self.rtx_timer.is_expired(now) {
            self.rtx_timeout();
        }
        if self.dack_timer.is_expired(now) {
            self.dack_timer = Expiration::Never;
            self.ack_pending = true;
        }
        if self.current != State::Closed {
            self.output();
        }
    }

    /// The earliest pending timer.
    pub fn poll_at(&self) -> Expiration {
        self.rtx_timer.min(self.dack_timer).min(self.time_wait)
    }

    pub(crate) fn take_outbound(&mut self) -> Option<Packet> {
        self.outbound.pop_front()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.current == State::Closed
    }

    /// Fire the final callbacks, after removal from the engine.
    pub(crate) fn finish(&mut self) {
        if let Some(reason) = self.disconnect.take() {
            self.signal_disconnect(reason);
        }
        if let Some(error) = self.error {
            self.signal_error(error);
        }
        self.signal_close();
    }

    fn syn_sent(&mut self, repr: &TcpRepr, payload: &[u8]) {
        if let Some(ack) = repr.ack_number {
            if ack <= self.send.initial_seq || ack > self.send.next {
                net_debug!("tcp: {} unacceptable ack {} in SYN-SENT", self, ack);
                if !repr.flags.rst() {
                    self.send_reset(ack);
                }
                return;
            }
        }

        if repr.flags.rst() {
            if repr.ack_number.is_some() {
                net_debug!("tcp: {} refused", self);
                self.error = Some(Error::Refused);
                self.transition(Event::Reset);
                self.disconnect = Some(Disconnect::Refused);
            }
            return;
        }

        if !repr.flags.syn() {
            return;
        }

        self.receive_syn(repr);
        match repr.ack_number {
            Some(ack) => {
                self.send.unacked = ack;
                self.update_window(repr, ack);
                if self.rttm.covers(ack) {
                    self.rttm.stop(self.now, true);
                }
                self.established();
                if self.transition(Event::RecvSynAck) {
                    self.ack_pending = true;
                    self.signal_connect();
                    self.process_text(repr, payload);
                }
            },
            None => {
                // Simultaneous open.
                self.send.window = repr.window_len;
                self.send.wl1 = repr.seq_number;
                if self.transition(Event::RecvSyn) {
                    self.send_syn();
                }
            },
        }
    }

    fn synchronized(&mut self, repr: &TcpRepr, payload: &[u8]) {
        // The remote did not see our SYN-ACK and repeats its SYN.
        if self.current == State::SynReceived && repr.flags.syn() && !repr.flags.rst()
            && repr.seq_number == self.recv.initial_seq
        {
            self.rttm.discard();
            self.send_syn();
            return;
        }

        if !self.acceptable(repr) {
            net_trace!("tcp: {} unacceptable segment seq {}", self, repr.seq_number);
            self.stats.borrow_mut().dropped += 1;
            if !repr.flags.rst() {
                if self.current == State::TimeWait && repr.flags.fin() {
                    self.start_time_wait();
                }
                self.ack_now();
            }
            return;
        }

        if repr.flags.rst() {
            self.reset_arrives();
            return;
        }

        if repr.flags.syn() {
            net_debug!("tcp: {} SYN in window, resetting", self);
            self.send_reset(self.send.next);
            self.error = Some(Error::Reset);
            self.transition(Event::Reset);
            self.disconnect = Some(Disconnect::Reset);
            return;
        }

        let ack = match repr.ack_number {
            Some(ack) => ack,
            None => return,
        };

        let mut connected = false;
        if self.current == State::SynReceived {
            if self.send.unacked < ack && ack <= self.send.next {
                self.update_window(repr, ack);
                if !self.transition(Event::Acked) {
                    return;
                }
                self.established();
                connected = true;
            } else {
                self.send_reset(ack);
                return;
            }
        }

        if !self.handle_ack(repr, ack, payload.len()) {
            return;
        }

        // Only after the SYN is off the flight, so the callback may write at once.
        if connected {
            self.signal_connect();
            if self.current == State::Closed {
                return;
            }
            // A close while the handshake was pending.
            if self.fin_queued && self.current == State::Established {
                self.transition(Event::Close);
            }
        }

        let fin_acked = self.fin_sent && self.send.unacked == self.send.next;
        match self.current {
            State::FinWait1 if fin_acked => {
                self.transition(Event::Acked);
            },
            State::Closing if fin_acked => {
                if self.transition(Event::Acked) {
                    self.start_time_wait();
                }
                return;
            },
            State::LastAck if fin_acked => {
                self.transition(Event::Acked);
                return;
            },
            _ => (),
        }

        if self.process_text(repr, payload) && repr.flags.fin() {
            self.process_fin();
        }
    }

    /// The four acceptance tests of RFC 793, page 69.
    fn acceptable(&self, repr: &TcpRepr) -> bool {
        let seg_len = repr.sequence_len();
        let window = self.advertised_window();
        let seq = repr.seq_number;
        let nxt = self.recv.next;
        let in_window = |seq: TcpSeqNumber| nxt <= seq && seq < nxt + window;
        match (seg_len, window) {
            (0, 0) => seq == nxt,
            (0, _) => in_window(seq),
            (_, 0) => false,
            (_, _) => in_window(seq) || in_window(seq + (seg_len - 1)),
        }
    }

    fn reset_arrives(&mut self) {
        match self.current {
            State::SynReceived if self.previous == State::SynSent => {
                net_debug!("tcp: {} refused", self);
                self.error = Some(Error::Refused);
                self.transition(Event::Reset);
                self.disconnect = Some(Disconnect::Refused);
            },
            State::SynReceived | State::Closing | State::LastAck | State::TimeWait => {
                net_debug!("tcp: {} reset", self);
                self.transition(Event::Reset);
            },
            _ => {
                net_debug!("tcp: {} reset by remote", self);
                self.error = Some(Error::Reset);
                self.transition(Event::Reset);
                self.disconnect = Some(Disconnect::Reset);
            },
        }
    }

    /// Process the acknowledgement field. Returns whether to continue with the segment.
    fn handle_ack(&mut self, repr: &TcpRepr, ack: TcpSeqNumber, payload_len: usize) -> bool {
        if ack > self.send.next {
            net_trace!("tcp: {} ack {} of unsent data", self, ack);
            self.ack_now();
            return false;
        }

        if ack < self.send.unacked {
            return true;
        }

        let window_changed = repr.window_len != self.send.window;
        let was_probing = self.probing;
        if self.send.wl1 < repr.seq_number
            || (self.send.wl1 == repr.seq_number && self.send.wl2 <= ack)
        {
            self.update_window(repr, ack);
        }

        if ack == self.send.unacked {
            if self.probing {
                // The remote is alive and still has no room.
                self.rtx_attempt = 0;
                return true;
            }
            if was_probing {
                // The window opened but the probe byte was refused, send it again at once.
                self.rtx_attempt = 0;
                self.retransmit_una();
                self.restart_rtx();
                return true;
            }
            let duplicate = payload_len == 0
                && !repr.flags.syn()
                && !repr.flags.fin()
                && !window_changed
                && self.flight_size() > 0;
            if duplicate {
                self.duplicate_ack();
            }
            return true;
        }

        self.new_ack(ack);
        true
    }

    fn update_window(&mut self, repr: &TcpRepr, ack: TcpSeqNumber) {
        if repr.window_len > 0 {
            self.probing = false;
        }
        self.send.window = repr.window_len;
        self.send.wl1 = repr.seq_number;
        self.send.wl2 = ack;
    }

    fn new_ack(&mut self, ack: TcpSeqNumber) {
        if self.rttm.covers(ack) {
            self.rttm.stop(self.now, false);
        }

        let mut data = ack - self.send.unacked;
        if self.send.unacked == self.send.initial_seq {
            data -= 1;
        }
        if self.fin_sent && ack == self.send.next {
            data -= 1;
        }
        self.send.unacked = ack;
        self.writeq.acknowledge(data);
        self.rtx_attempt = 0;
        self.probing = false;

        let smss = self.smss;
        let flight = self.flight_size();
        let recovering = self.flow_control.fast_recovery;
        let reno = &mut self.flow_control;
        if recovering {
            if ack >= reno.recover {
                // Full acknowledgement ends recovery (RFC 6582, 3.2 step 3).
                reno.fast_recovery = false;
                reno.dup_acks = 0;
                reno.congestion_window = reno.ssthresh.min(flight.max(smss) + smss);
            } else {
                // Partial acknowledgement: deflate and repair the next hole.
                reno.congestion_window = reno.congestion_window.saturating_sub(data) + smss;
                self.retransmit_una();
            }
        } else {
            reno.dup_acks = 0;
            if reno.congestion_window < reno.ssthresh {
                reno.congestion_window += data.min(smss);
            } else {
                reno.congestion_window += (smss * smss / reno.congestion_window.max(1)).max(1);
            }
        }

        if self.send.unacked == self.send.next {
            self.rtx_timer = Expiration::Never;
        } else {
            self.restart_rtx();
        }

        while let Some(size) = self.writeq.pop_completed() {
            self.signal_write(size);
        }
    }

    fn duplicate_ack(&mut self) {
        let smss = self.smss;
        let flight = self.flight_size();
        let reno = &mut self.flow_control;
        reno.dup_acks += 1;

        if reno.fast_recovery {
            reno.congestion_window += smss;
            return;
        }

        if reno.dup_acks == 3 && self.send.unacked - 1 >= reno.recover {
            net_debug!("tcp: {} fast retransmit at {}", self.tuple, self.send.unacked);
            reno.ssthresh = (flight / 2).max(2 * smss);
            reno.recover = self.send.next;
            reno.congestion_window = reno.ssthresh + 3 * smss;
            reno.fast_recovery = true;
            self.retransmit_una();
            self.restart_rtx();
        }
    }

    /// Store segment text. Returns whether everything up to the end of the segment arrived.
    fn process_text(&mut self, repr: &TcpRepr, payload: &[u8]) -> bool {
        let start = if repr.flags.syn() { repr.seq_number + 1 } else { repr.seq_number };
        let offset = start.distance(self.recv.next);
        if payload.is_empty() {
            return offset == 0;
        }
        if !self.current.may_receive() {
            return false;
        }

        let (offset, text) = if offset < 0 {
            let skip = (-offset) as usize;
            (0, payload.get(skip..).unwrap_or(&[]))
        } else {
            (offset as usize, payload)
        };

        let had_holes = self.readq.has_holes();
        let contiguous = self.readq.insert(offset, text);
        self.recv.next += contiguous;
        self.stats.borrow_mut().bytes_rx += contiguous;

        let complete = offset + text.len() <= contiguous;
        if offset > 0 || had_holes || self.readq.has_holes() || contiguous == 0 {
            // Out of order, a filled gap or no room: acknowledge at once.
            self.ack_now();
        } else {
            self.dack_segments += 1;
            match self.config.delayed_ack {
                Some(delay) if self.dack_segments < 2 => {
                    if !self.dack_timer.is_armed() {
                        self.dack_timer = Expiration::When(self.now + delay);
                    }
                },
                _ => self.ack_pending = true,
            }
        }

        self.deliver();
        complete && !self.readq.has_holes()
    }

    fn process_fin(&mut self) {
        if self.current == State::Closed {
            return;
        }
        self.recv.next += 1;
        self.ack_now();
        match self.current {
            State::Established | State::FinWait1 => {
                self.transition(Event::RecvFin);
            },
            State::FinWait2 => {
                if self.transition(Event::RecvFin) {
                    self.start_time_wait();
                }
            },
            _ => return,
        }
        self.signal_disconnect(Disconnect::Closing);
    }

    fn deliver(&mut self) {
        if self.callbacks.on_read.is_none() || self.readq.is_empty() {
            return;
        }
        let data = self.readq.take(usize::max_value());
        self.signal_read(&data);
    }

    fn rtx_timeout(&mut self) {
        let syn_outstanding = self.send.unacked == self.send.initial_seq;
        let limit = if syn_outstanding {
            self.config.syn_retransmit_limit
        } else {
            self.config.retransmit_limit
        };

        if self.rtx_attempt >= limit {
            net_debug!("tcp: {} retransmission limit reached", self);
            self.fail(Error::TimedOut);
            return;
        }

        self.rtx_attempt += 1;
        let (attempt, rto) = (self.rtx_attempt, self.rttm.rto());
        self.signal_rtx_timeout(attempt, rto);
        if self.current == State::Closed {
            return;
        }

        if self.probing {
            // Persist timer: probe again, the window tells nothing about congestion.
            self.retransmit_una();
            self.rttm.back_off();
            self.restart_rtx();
            return;
        }

        let smss = self.smss;
        let flight = self.flight_size();
        let reno = &mut self.flow_control;
        if attempt == 1 {
            reno.ssthresh = (flight / 2).max(2 * smss);
        }
        reno.recover = self.send.next;
        reno.congestion_window = smss;
        reno.fast_recovery = false;
        reno.dup_acks = 0;

        self.retransmit_una();

        if syn_outstanding {
            self.syn_rtx += 1;
            if self.syn_rtx == 1 && self.rttm.rto() < SYN_RTO {
                self.rttm.set_rto(SYN_RTO);
            } else {
                self.rttm.back_off();
            }
        } else {
            self.rttm.back_off();
        }
        self.restart_rtx();
    }

    /// Send the oldest unacknowledged segment again.
    fn retransmit_una(&mut self) {
        if self.send.unacked == self.send.next {
            return;
        }
        self.rttm.discard();
        self.stats.borrow_mut().retransmissions += 1;

        if self.send.unacked == self.send.initial_seq {
            self.send_syn();
            return;
        }

        let seq = self.send.unacked;
        let len = self.writeq.una(self.smss).len();
        let mut flags = TcpFlags::default();
        if self.fin_sent && seq + len + 1 == self.send.next {
            flags.set_fin(true);
        }
        let repr = self.segment(flags, seq, len);
        net_debug!("tcp: {} retransmit seq {} len {}", self.tuple, seq, len);
        let packet = build_segment(&self.store, self.tuple, &repr, self.writeq.una(len));
        if let Some(packet) = packet {
            self.queue(packet, &repr);
        }
    }

    /// Send what the windows allow, then a FIN or a pending acknowledgement.
    fn output(&mut self) {
        let may_send = match self.current {
            State::Established | State::CloseWait | State::FinWait1 | State::LastAck => true,
            _ => false,
        };

        while may_send {
            let flight = self.flight_size();
            let window = usize::from(self.send.window).min(self.usable_congestion_window());
            let usable = window.saturating_sub(flight).min(self.smss);
            let mut len = self.writeq.nxt(usable).0.len();
            if len == 0 {
                // Probe a closed window with a single byte (RFC 1122, 4.2.2.17).
                let probe = self.send.window == 0 && flight == 0 && self.writeq.unsent() > 0;
                if !probe {
                    break;
                }
                len = 1;
            }
            if !self.send_data(len) {
                break;
            }
            if self.send.window == 0 {
                self.probing = true;
            }
        }

        let fin_state = self.current == State::FinWait1 || self.current == State::LastAck;
        if fin_state && self.fin_queued && !self.fin_sent && self.writeq.unsent() == 0 {
            self.send_fin();
        }

        if self.ack_pending && self.recv_synced && self.current != State::Closed {
            self.ack_now();
        }
    }

    fn usable_congestion_window(&self) -> usize {
        let reno = &self.flow_control;
        if self.config.limited_transmit && !reno.fast_recovery && reno.dup_acks < 3 {
            reno.congestion_window + reno.dup_acks as usize * self.smss
        } else {
            reno.congestion_window
        }
    }

    fn send_data(&mut self, len: usize) -> bool {
        let seq = self.send.next;
        let (chunk_len, push) = {
            let (chunk, push) = self.writeq.nxt(len);
            (chunk.len(), push)
        };
        let mut flags = TcpFlags::default();
        flags.set_psh(push);
        let repr = self.segment(flags, seq, chunk_len);
        let packet = match build_segment(&self.store, self.tuple, &repr, self.writeq.nxt(len).0) {
            Some(packet) => packet,
            None => return false,
        };

        self.writeq.advance(chunk_len);
        self.send.next += chunk_len;
        self.transmitted();
        self.queue(packet, &repr);
        true
    }

    fn send_fin(&mut self) {
        let mut flags = TcpFlags::default();
        flags.set_fin(true);
        let repr = self.segment(flags, self.send.next, 0);
        if let Some(packet) = build_segment(&self.store, self.tuple, &repr, &[]) {
            self.send.next += 1;
            self.fin_sent = true;
            self.transmitted();
            self.queue(packet, &repr);
        }
    }

    /// Send our SYN, with an acknowledgement once the remote SYN arrived.
    fn send_syn(&mut self) {
        let mut flags = TcpFlags::default();
        flags.set_syn(true);
        let mut repr = self.segment(flags, self.send.initial_seq, 0);
        repr.max_seg_size = Some(self.local_mss());
        if self.send.next == self.send.initial_seq {
            self.send.next += 1;
            self.transmitted();
        } else if !self.rtx_timer.is_armed() {
            self.restart_rtx();
        }
        if let Some(packet) = build_segment(&self.store, self.tuple, &repr, &[]) {
            self.queue(packet, &repr);
        }
    }

    /// Bookkeeping after new sequence space went out.
    fn transmitted(&mut self) {
        if !self.rttm.active() {
            self.rttm.start(self.now, self.send.next);
        }
        if !self.rtx_timer.is_armed() {
            self.restart_rtx();
        }
    }

    fn ack_now(&mut self) {
        let repr = self.segment(TcpFlags::default(), self.send.next, 0);
        if let Some(packet) = build_segment(&self.store, self.tuple, &repr, &[]) {
            self.queue(packet, &repr);
        }
    }

    fn send_reset(&mut self, seq: TcpSeqNumber) {
        let mut flags = TcpFlags::default();
        flags.set_rst(true);
        let repr = TcpRepr {
            ack_number: None,
            ..self.segment(flags, seq, 0)
        };
        if let Some(packet) = build_segment(&self.store, self.tuple, &repr, &[]) {
            self.stats.borrow_mut().resets_sent += 1;
            self.queue(packet, &repr);
        }
    }

    /// The header of a segment we send.
    fn segment(&self, flags: TcpFlags, seq: TcpSeqNumber, payload_len: usize) -> TcpRepr {
        TcpRepr {
            src_port: self.tuple.local_port,
            dst_port: self.tuple.remote_port,
            flags,
            seq_number: seq,
            ack_number: if self.recv_synced { Some(self.recv.next) } else { None },
            window_len: self.advertised_window() as u16,
            max_seg_size: None,
            payload_len: payload_len as u16,
        }
    }

    /// The receive window as it fits the header, without window scaling.
    fn advertised_window(&self) -> usize {
        self.readq.window().min(usize::from(u16::max_value()))
    }

    fn queue(&mut self, packet: Packet, repr: &TcpRepr) {
        if repr.ack_number.is_some() {
            self.ack_pending = false;
            self.dack_timer = Expiration::Never;
            self.dack_segments = 0;
        }
        {
            let mut stats = self.stats.borrow_mut();
            stats.segments_tx += 1;
            stats.bytes_tx += usize::from(repr.payload_len);
        }
        net_trace!("tcp: {} send {}", self.tuple, repr);
        self.outbound.push_back(packet);
    }

    fn receive_syn(&mut self, syn: &TcpRepr) {
        self.recv.initial_seq = syn.seq_number;
        self.recv.next = syn.seq_number + 1;
        self.recv_synced = true;
        self.set_smss(Some(syn.max_seg_size.unwrap_or(DEFAULT_MSS)));
    }

    /// Our SYN was acknowledged.
    fn established(&mut self) {
        self.rtx_timer = Expiration::Never;
        self.rtx_attempt = 0;
        if self.syn_rtx > 0 && self.rttm.rto() < SYN_RTO {
            self.rttm.set_rto(SYN_RTO);
        }
    }

    /// The MSS we announce, bounded by what fits into a pool buffer.
    fn local_mss(&self) -> u16 {
        let fits = self.store.buffer_size().saturating_sub(HEADROOM + tcp::HEADER_LEN + 4);
        usize::from(self.config.mss).min(fits) as u16
    }

    fn set_smss(&mut self, peer: Option<u16>) {
        let peer = peer.unwrap_or(DEFAULT_MSS);
        self.smss = usize::from(peer.min(self.local_mss())).max(1);
        self.flow_control.congestion_window =
            self.config.initial_window_segments as usize * self.smss;
    }

    fn restart_rtx(&mut self) {
        self.rtx_timer = Expiration::When(self.now + self.rttm.rto());
    }

    fn start_time_wait(&mut self) {
        self.rtx_timer = Expiration::Never;
        self.time_wait = Expiration::When(self.now + self.config.msl * 2);
    }

    /// Move the state machine. An illegal event aborts the connection.
    fn transition(&mut self, event: Event) -> bool {
        match self.current.next(event) {
            Ok(next) => {
                self.enter(next);
                true
            },
            Err(error) => {
                net_warn!("tcp: {} {}", self.tuple, error);
                self.fail(error);
                false
            },
        }
    }

    fn enter(&mut self, next: State) {
        net_debug!("tcp: {} {} -> {}", self.tuple, self.current, next);
        self.previous = self.current;
        self.current = next;
        if next == State::Closed {
            self.rtx_timer = Expiration::Never;
            self.dack_timer = Expiration::Never;
            self.time_wait = Expiration::Never;
            self.ack_pending = false;
            self.writeq.reset();
        }
    }

    /// Abort after a fatal error, reported through `on_error`.
    fn fail(&mut self, error: Error) {
        if self.current == State::Closed {
            return;
        }
        self.error = Some(error);
        if self.current.is_synchronized() {
            self.send_reset(self.send.next);
        }
        self.enter(State::Closed);
    }

    fn signal_connect(&mut self) {
        // Fires only once, the callback is not restored.
        if let Some(mut callback) = self.callbacks.on_connect.take() {
            callback(self);
        }
    }

    fn signal_read(&mut self, data: &[u8]) {
        if let Some(mut callback) = self.callbacks.on_read.take() {
            callback(self, data);
            self.callbacks.on_read.get_or_insert(callback);
        }
    }

    fn signal_disconnect(&mut self, reason: Disconnect) {
        match self.callbacks.on_disconnect.take() {
            Some(mut callback) => {
                callback(self, reason);
                self.callbacks.on_disconnect.get_or_insert(callback);
            },
            None if reason == Disconnect::Closing && self.current == State::CloseWait => {
                let _ = self.close();
            },
            None => (),
        }
    }

    fn signal_close(&mut self) {
        if let Some(mut callback) = self.callbacks.on_close.take() {
            callback(self);
        }
    }

    fn signal_error(&mut self, error: Error) {
        if let Some(mut callback) = self.callbacks.on_error.take() {
            callback(self, error);
        }
    }

    fn signal_write(&mut self, size: usize) {
        if let Some(mut callback) = self.callbacks.on_write.take() {
            callback(self, size);
            self.callbacks.on_write.get_or_insert(callback);
        }
    }

    fn signal_rtx_timeout(&mut self, attempt: u32, rto: Duration) {
        if let Some(mut callback) = self.callbacks.on_rtx_timeout.take() {
            callback(self, attempt, rto);
            self.callbacks.on_rtx_timeout.get_or_insert(callback);
        }
    }
}

/// Build an outgoing segment with room for the lower layers.
///
/// Returns `None` when the store is exhausted, the segment is then lost and recovered like any
/// other lost segment.
pub(crate) fn build_segment(
    store: &Arc<BufferStore>,
    tuple: FourTuple,
    repr: &TcpRepr,
    payload: &[u8],
) -> Option<Packet> {
    let packet = match Packet::with_headroom(store, HEADROOM) {
        Ok(packet) => packet,
        Err(error) => {
            net_debug!("tcp: no buffer for segment to {}: {}", tuple.remote, error);
            return None;
        },
    };

    let len = repr.header_len() + payload.len();
    if packet.tailroom() < len {
        net_warn!("tcp: segment of {} bytes exceeds the buffer", len);
        return None;
    }
    packet.set_size(len);
    {
        let mut data = packet.data_mut();
        let mut segment = TcpPacket::new_unchecked(&mut *data);
        repr.emit(&mut segment);
        segment.payload_mut_slice().copy_from_slice(payload);
        segment.fill_checksum(tuple.local, tuple.remote);
    }
    packet.mark(Layer::Transport);
    packet.set_status(Status::Downstream);
    Some(packet)
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.tuple, self.current)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tuple", &self.tuple)
            .field("state", &self.current)
            .field("send", &self.send)
            .field("recv", &self.recv)
            .field("flow_control", &self.flow_control)
            .field("rttm", &self.rttm)
            .finish()
    }
}
