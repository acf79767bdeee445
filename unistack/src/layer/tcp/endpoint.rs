use core::cell::RefCell;
use core::fmt;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::format;
use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::storage::{BufferStore, Packet};
use crate::time::{Expiration, Instant};
use crate::wire::{Checksum, Ipv4Address, Ipv4Repr, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber};
use super::{Config, Connection, Error, IsnGenerator, Listener};
use super::connection::build_segment;

/// First port handed out for active opens.
const EPHEMERAL_START: u16 = 1025;

/// The identifier of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    pub local: Ipv4Address,
    pub remote: Ipv4Address,
    pub local_port: u16,
    pub remote_port: u16,
}

/// Counters of a TCP engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub segments_rx: usize,
    pub segments_tx: usize,
    /// Payload bytes delivered in order.
    pub bytes_rx: usize,
    pub bytes_tx: usize,
    /// Segments discarded as malformed, unacceptable or unexpected.
    pub dropped: usize,
    /// Connections accepted by listeners.
    pub incoming_connections: usize,
    /// Connections opened by us.
    pub outgoing_connections: usize,
    /// SYNs that arrived at a listening port.
    pub connection_attempts: usize,
    pub retransmissions: usize,
    pub resets_sent: usize,
}

/// The TCP engine of one interface.
///
/// Owns the demux table, the single source of truth for which four tuples are in use.
pub struct Tcp {
    addr: Ipv4Address,
    config: Config,
    store: Arc<BufferStore>,
    isn: IsnGenerator,
    listeners: BTreeMap<u16, Listener>,
    connections: BTreeMap<FourTuple, Connection>,
    /// Segments not belonging to any connection, mostly resets, and the last words of removed
    /// connections.
    control: VecDeque<(Ipv4Address, Packet)>,
    next_ephemeral: u16,
    stats: Rc<RefCell<Stats>>,
    now: Instant,
}

impl Tcp {
    pub fn new(addr: Ipv4Address, config: Config, store: Arc<BufferStore>) -> Self {
        Tcp {
            addr,
            isn: IsnGenerator::from_config(config.isn_key),
            config,
            store,
            listeners: BTreeMap::new(),
            connections: BTreeMap::new(),
            control: VecDeque::new(),
            next_ephemeral: EPHEMERAL_START,
            stats: Rc::default(),
            now: Instant::default(),
        }
    }

    pub fn addr(&self) -> Ipv4Address {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        *self.stats.borrow()
    }

    /// Accept connections on `port`, calling `on_connect` for each established one.
    pub fn listen(&mut self, port: u16, on_connect: impl FnMut(&mut Connection) + 'static)
        -> Result<&mut Listener, Error>
    {
        if self.listeners.contains_key(&port) {
            return Err(Error::AddressInUse);
        }
        net_debug!("tcp: listening on {}", port);
        let listener = Listener::new(port, Rc::new(RefCell::new(on_connect)), self.config.syn_backlog);
        Ok(self.listeners.entry(port).or_insert(listener))
    }

    /// Reserve `port` for passive opens without a callback yet.
    pub fn bind(&mut self, port: u16) -> Result<&mut Listener, Error> {
        self.listen(port, |_: &mut Connection| ())
    }

    /// Stop listening on `port`, aborting its half-open connections.
    pub fn unbind(&mut self, port: u16) -> Result<(), Error> {
        let mut listener = self.listeners.remove(&port).ok_or(Error::NotConnected)?;
        for tuple in listener.take_syn_queue() {
            if let Some(connection) = self.connections.get_mut(&tuple) {
                connection.abort();
            }
        }
        self.reap();
        Ok(())
    }

    pub fn listener(&mut self, port: u16) -> Option<&mut Listener> {
        self.listeners.get_mut(&port)
    }

    /// Open a connection to a remote host.
    ///
    /// `on_connect` is called once the connection is established.
    pub fn connect(
        &mut self,
        remote: Ipv4Address,
        remote_port: u16,
        on_connect: impl FnMut(&mut Connection) + 'static,
    ) -> Result<FourTuple, Error> {
        let local_port = self.ephemeral_port()?;
        let tuple = FourTuple {
            local: self.addr,
            remote,
            local_port,
            remote_port,
        };
        let iss = self.isn.get_isn(tuple, self.now);
        let mut connection = Connection::connect(
            tuple, iss, &self.config, Arc::clone(&self.store), Rc::clone(&self.stats), self.now);
        connection.on_connect(on_connect);
        self.insert(tuple, connection);
        self.stats.borrow_mut().outgoing_connections += 1;
        Ok(tuple)
    }

    pub fn get(&self, tuple: &FourTuple) -> Option<&Connection> {
        self.connections.get(tuple)
    }

    /// Access a connection, to write to it or register callbacks.
    pub fn get_mut(&mut self, tuple: &FourTuple) -> Option<&mut Connection> {
        self.connections.get_mut(tuple)
    }

    pub fn close(&mut self, tuple: &FourTuple) -> Result<(), Error> {
        let result = self.connections.get_mut(tuple).ok_or(Error::NotConnected)?.close();
        self.reap();
        result
    }

    pub fn abort(&mut self, tuple: &FourTuple) -> Result<(), Error> {
        self.connections.get_mut(tuple).ok_or(Error::NotConnected)?.abort();
        self.reap();
        Ok(())
    }

    pub fn connections(&self) -> impl Iterator<Item=&Connection> + '_ {
        self.connections.values()
    }

    /// Process a segment delivered by the IP layer.
    ///
    /// The layer of the packet begins at the TCP header.
    pub fn input(&mut self, packet: &Packet, ip: &Ipv4Repr, now: Instant) {
        self.now = now;
        let data = packet.data();
        let segment = match TcpPacket::new_checked(&*data) {
            Ok(segment) => segment,
            Err(error) => return self.drop_segment(error),
        };
        let checksum = Checksum::Manual { src_addr: ip.src_addr, dst_addr: ip.dst_addr };
        let repr = match TcpRepr::parse(&segment, checksum) {
            Ok(repr) => repr,
            Err(error) => return self.drop_segment(error),
        };
        self.stats.borrow_mut().segments_rx += 1;

        let tuple = FourTuple {
            local: ip.dst_addr,
            remote: ip.src_addr,
            local_port: repr.dst_port,
            remote_port: repr.src_port,
        };
        let payload = segment.payload_slice();

        if let Some(connection) = self.connections.get_mut(&tuple) {
            connection.segment_arrives(&repr, payload, now);
            if connection.state() != super::State::SynReceived {
                if let Some(listener) = self.listeners.get_mut(&tuple.local_port) {
                    listener.dequeue(&tuple);
                }
            }
        } else if self.listeners.contains_key(&tuple.local_port) {
            self.syn_arrives(tuple, &repr);
        } else {
            net_trace!("tcp: no connection for {}", tuple);
            self.stats.borrow_mut().dropped += 1;
            self.reset(tuple, &repr);
        }

        self.reap();
    }

    /// Drive the timers of all connections.
    pub fn on_tick(&mut self, now: Instant) {
        self.now = now;
        for connection in self.connections.values_mut() {
            connection.on_tick(now);
        }
        self.reap();
    }

    /// The earliest instant at which a timer of any connection fires.
    pub fn poll_at(&self) -> Expiration {
        self.connections.values()
            .map(Connection::poll_at)
            .min()
            .unwrap_or(Expiration::Never)
    }

    /// The next segment to send, with the address of its destination.
    pub fn dequeue(&mut self) -> Option<(Ipv4Address, Packet)> {
        if let Some(next) = self.control.pop_front() {
            return Some(next);
        }
        self.connections.values_mut()
            .find_map(|connection| {
                let remote = connection.tuple().remote;
                connection.take_outbound().map(|packet| (remote, packet))
            })
    }

    /// A SYN for a listening port.
    fn syn_arrives(&mut self, tuple: FourTuple, repr: &TcpRepr) {
        if repr.flags.rst() {
            return;
        }
        if repr.ack_number.is_some() {
            self.reset(tuple, repr);
            return;
        }
        if !repr.flags.syn() {
            self.stats.borrow_mut().dropped += 1;
            return;
        }

        self.stats.borrow_mut().connection_attempts += 1;
        let listener = match self.listeners.get_mut(&tuple.local_port) {
            Some(listener) => listener,
            None => return,
        };
        if !listener.accepts(tuple.remote, tuple.remote_port) {
            net_debug!("tcp: {} refused by filter", tuple);
            self.stats.borrow_mut().dropped += 1;
            return;
        }

        if let Some(evicted) = listener.enqueue(tuple) {
            net_debug!("tcp: backlog of {} full, dropping {}", tuple.local_port, evicted);
            if let Some(connection) = self.connections.get_mut(&evicted) {
                connection.abort();
            }
        }

        let on_connect = listener.connect_callback();
        let iss = self.isn.get_isn(tuple, self.now);
        let mut connection = Connection::accept(
            tuple, iss, repr, &self.config, Arc::clone(&self.store), Rc::clone(&self.stats),
            self.now);
        connection.set_connect_boxed(on_connect);
        self.insert(tuple, connection);
        self.stats.borrow_mut().incoming_connections += 1;
    }

    fn insert(&mut self, tuple: FourTuple, connection: Connection) {
        net_debug!("tcp: new connection {}", connection);
        let previous = self.connections.insert(tuple, connection);
        assert!(previous.is_none(), "Duplicate four tuple {} in demux table", tuple);
    }

    /// Answer a segment that has no connection (RFC 793, page 65).
    fn reset(&mut self, tuple: FourTuple, repr: &TcpRepr) {
        if repr.flags.rst() || !self.config.reset_unknown {
            return;
        }

        let mut flags = TcpFlags::default();
        flags.set_rst(true);
        let (seq_number, ack_number) = match repr.ack_number {
            Some(ack) => (ack, None),
            None => (TcpSeqNumber(0), Some(repr.seq_number + repr.sequence_len())),
        };
        let reply = TcpRepr {
            src_port: repr.dst_port,
            dst_port: repr.src_port,
            flags,
            seq_number,
            ack_number,
            window_len: 0,
            max_seg_size: None,
            payload_len: 0,
        };
        if let Some(packet) = build_segment(&self.store, tuple, &reply, &[]) {
            let mut stats = self.stats.borrow_mut();
            stats.resets_sent += 1;
            stats.segments_tx += 1;
            self.control.push_back((tuple.remote, packet));
        }
    }

    fn drop_segment(&self, error: crate::wire::Error) {
        net_trace!("tcp: dropping segment: {}", error);
        self.stats.borrow_mut().dropped += 1;
    }

    fn ephemeral_port(&mut self) -> Result<u16, Error> {
        for _ in EPHEMERAL_START..=u16::max_value() {
            let port = self.next_ephemeral;
            self.next_ephemeral = port.checked_add(1).unwrap_or(EPHEMERAL_START);
            let in_use = self.listeners.contains_key(&port)
                || self.connections.keys().any(|tuple| tuple.local_port == port);
            if !in_use {
                return Ok(port);
            }
        }
        Err(Error::Exhausted)
    }

    /// Remove closed connections, then fire their close callbacks.
    fn reap(&mut self) {
        let closed: Vec<FourTuple> = self.connections.iter()
            .filter(|(_, connection)| connection.is_closed())
            .map(|(tuple, _)| *tuple)
            .collect();

        for tuple in closed {
            let mut connection = match self.connections.remove(&tuple) {
                Some(connection) => connection,
                None => continue,
            };
            if let Some(listener) = self.listeners.get_mut(&tuple.local_port) {
                listener.dequeue(&tuple);
            }
            while let Some(packet) = connection.take_outbound() {
                self.control.push_back((tuple.remote, packet));
            }
            net_debug!("tcp: removed {}", tuple);
            connection.finish();
        }
    }
}

impl fmt::Display for FourTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} {}:{}", self.local, self.local_port, self.remote, self.remote_port)
    }
}

impl fmt::Display for Tcp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "LISTENERS")?;
        writeln!(f, "{:<8}{}", "Port", "Half-open")?;
        for (port, listener) in self.listeners.iter() {
            writeln!(f, "{:<8}{}", port, listener.syn_queue_len())?;
        }
        writeln!(f)?;
        writeln!(f, "CONNECTIONS")?;
        writeln!(f, "{:<24}{:<24}{}", "Local", "Remote", "State")?;
        for (tuple, connection) in self.connections.iter() {
            let local = format!("{}:{}", tuple.local, tuple.local_port);
            let remote = format!("{}:{}", tuple.remote, tuple.remote_port);
            writeln!(f, "{:<24}{:<24}{}", local, remote, connection.state())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Tcp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tcp")
            .field("addr", &self.addr)
            .field("connections", &self.connections.len())
            .field("listeners", &self.listeners.len())
            .field("stats", &*self.stats.borrow())
            .finish()
    }
}
