use crate::time::Duration;

/// Tunables of a TCP engine, shared by all of its connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The largest segment payload we are willing to receive, announced in the MSS option.
    pub mss: u16,

    /// Bytes of receive buffer per connection. Also bounds the advertised window.
    pub receive_buffer: usize,

    /// The initial congestion window, in segments.
    pub initial_window_segments: u32,

    /// Retransmissions of a data segment before the connection is aborted.
    pub retransmit_limit: u32,

    /// Retransmissions of a SYN before the connection attempt fails.
    pub syn_retransmit_limit: u32,

    pub min_rto: Duration,
    pub max_rto: Duration,
    pub initial_rto: Duration,

    /// Maximum segment lifetime. `TIME-WAIT` lasts twice as long.
    pub msl: Duration,

    /// Delay of acknowledgements for in-order data, `None` acknowledges every segment at once.
    pub delayed_ack: Option<Duration>,

    /// Half-open connections a listener may hold.
    pub syn_backlog: usize,

    /// Answer segments for unknown connections with a reset.
    pub reset_unknown: bool,

    /// Send new data on the first two duplicate acknowledgements (RFC 3042).
    pub limited_transmit: bool,

    /// Secret key of the initial sequence number generator.
    ///
    /// Without a key one is derived from the standard library's random hasher state, or with
    /// `no_std` a fixed key is used.
    pub isn_key: Option<[u8; 16]>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mss: 1460,
            receive_buffer: 64 * 1024,
            initial_window_segments: 3,
            retransmit_limit: 15,
            syn_retransmit_limit: 5,
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            initial_rto: Duration::from_secs(1),
            msl: Duration::from_secs(30),
            delayed_ack: Some(Duration::from_millis(40)),
            syn_backlog: 64,
            reset_unknown: true,
            limited_transmit: true,
            isn_key: None,
        }
    }
}
