//! Round trip time measurement and the retransmission timeout of RFC 6298.
use crate::time::{Duration, Instant};
use crate::wire::TcpSeqNumber;

/// Clock granularity, the smallest variance margin added to the smoothed round trip time.
pub const CLOCK_G: Duration = Duration::from_millis(1);

/// Weight of the variance margin.
const K: u32 = 4;

/// Estimator of the round trip time, with at most one running measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rttm {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    /// Start and acknowledging sequence number of the running measurement.
    measuring: Option<(Instant, TcpSeqNumber)>,
}

impl Rttm {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Rttm {
            srtt: None,
            rttvar: Duration::from_millis(0),
            rto: initial_rto,
            min_rto,
            max_rto,
            measuring: None,
        }
    }

    /// The current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn active(&self) -> bool {
        self.measuring.is_some()
    }

    /// Time a segment whose acknowledgement will be `ack`.
    ///
    /// Ignored while another measurement is running.
    pub fn start(&mut self, now: Instant, ack: TcpSeqNumber) {
        if self.measuring.is_none() {
            self.measuring = Some((now, ack));
        }
    }

    /// Check whether `ack` completes the running measurement.
    pub fn covers(&self, ack: TcpSeqNumber) -> bool {
        match self.measuring {
            Some((_, expected)) => ack >= expected,
            None => false,
        }
    }

    /// Complete the running measurement and update the estimate.
    ///
    /// The first sample of a connection sets the estimate directly, later ones are smoothed into
    /// it. An estimator that never took a sample always treats it as the first.
    pub fn stop(&mut self, now: Instant, first: bool) {
        let started = match self.measuring.take() {
            Some((started, _)) => started,
            None => return,
        };
        let sample = now.saturating_duration_since(started);
        self.sample(sample, first || self.srtt.is_none());
    }

    /// Forget the running measurement, its segment was retransmitted (Karn's algorithm).
    pub fn discard(&mut self) {
        self.measuring = None;
    }

    /// Double the timeout after a retransmission timeout.
    pub fn back_off(&mut self) {
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    /// Override the timeout, as for a timed out SYN.
    pub fn set_rto(&mut self, rto: Duration) {
        self.rto = rto;
    }

    fn sample(&mut self, r: Duration, first: bool) {
        match self.srtt {
            Some(srtt) if !first => {
                // RTTVAR <- 3/4 * RTTVAR + 1/4 * |SRTT - R'|
                let delta = if srtt > r { srtt - r } else { r - srtt };
                self.rttvar = self.rttvar * 3 / 4 + delta / 4;
                // SRTT <- 7/8 * SRTT + 1/8 * R'
                self.srtt = Some(srtt * 7 / 8 + r / 8);
            },
            _ => {
                self.srtt = Some(r);
                self.rttvar = r / 2;
            },
        }

        let srtt = self.srtt.unwrap_or(r);
        let rto = srtt + CLOCK_G.max(self.rttvar * K);
        self.rto = rto.max(self.min_rto).min(self.max_rto);
        net_trace!("tcp: rtt sample {:?}, srtt {:?} rttvar {:?} rto {:?}",
            r, srtt, self.rttvar, self.rto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn at(millis: i64) -> Instant {
        Instant::from_millis(millis)
    }

    fn rttm() -> Rttm {
        Rttm::new(ms(1000), ms(10), ms(60_000))
    }

    #[test]
    fn first_then_smoothed() {
        let mut rttm = rttm();
        rttm.start(at(0), TcpSeqNumber(100));
        assert!(rttm.covers(TcpSeqNumber(100)));
        rttm.stop(at(100), true);
        assert_eq!(rttm.srtt(), Some(ms(100)));
        assert_eq!(rttm.rttvar(), ms(50));
        assert_eq!(rttm.rto(), ms(300));

        rttm.start(at(1000), TcpSeqNumber(200));
        assert!(!rttm.covers(TcpSeqNumber(150)));
        rttm.stop(at(1200), false);
        let srtt = rttm.srtt().unwrap();
        assert!(srtt > ms(100) && srtt < ms(200));
        assert_eq!(srtt, Duration::from_micros(112_500));
        assert_eq!(rttm.rttvar(), Duration::from_micros(62_500));
        assert_eq!(rttm.rto(), Duration::from_micros(362_500));
    }

    #[test]
    fn first_flag_without_history() {
        let mut rttm = rttm();
        rttm.start(at(0), TcpSeqNumber(1));
        rttm.stop(at(40), false);
        assert_eq!(rttm.srtt(), Some(ms(40)));
    }

    #[test]
    fn single_measurement() {
        let mut rttm = rttm();
        rttm.start(at(0), TcpSeqNumber(10));
        rttm.start(at(50), TcpSeqNumber(20));
        rttm.stop(at(80), true);
        assert_eq!(rttm.srtt(), Some(ms(80)));
        assert!(!rttm.active());
    }

    #[test]
    fn karn_discard() {
        let mut rttm = rttm();
        rttm.start(at(0), TcpSeqNumber(10));
        rttm.discard();
        rttm.stop(at(5000), true);
        assert_eq!(rttm.srtt(), None);
        assert_eq!(rttm.rto(), ms(1000));
    }

    #[test]
    fn bounds_and_backoff() {
        let mut rttm = Rttm::new(ms(1000), ms(1000), ms(3000));
        rttm.start(at(0), TcpSeqNumber(1));
        rttm.stop(at(2), true);
        assert_eq!(rttm.rto(), ms(1000));
        rttm.back_off();
        assert_eq!(rttm.rto(), ms(2000));
        rttm.back_off();
        assert_eq!(rttm.rto(), ms(3000));
        rttm.set_rto(ms(500));
        assert_eq!(rttm.rto(), ms(500));
    }
}
