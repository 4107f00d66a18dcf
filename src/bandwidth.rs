use std::fmt;

/// Downlink bandwidth estimate in bits per second. `-1` means no estimate yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct BandwidthEstimate(i64);

impl BandwidthEstimate {
    pub const UNKNOWN: Self = Self(-1);

    pub const fn bps(bps: i64) -> Self {
        Self(bps)
    }

    pub const fn kbps(kbps: i64) -> Self {
        Self(kbps.saturating_mul(1_000))
    }

    pub const fn mbps(mbps: i64) -> Self {
        Self(mbps.saturating_mul(1_000_000))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN.0
    }
}

impl Default for BandwidthEstimate {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl From<i64> for BandwidthEstimate {
    fn from(bps: i64) -> Self {
        Self(bps)
    }
}

impl fmt::Display for BandwidthEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return f.write_str("unknown");
        }
        if self.0 >= 1_000_000 {
            write!(f, "{:.2}mbps", self.0 as f64 / 1_000_000.0)
        } else if self.0 >= 1_000 {
            write!(f, "{:.1}kbps", self.0 as f64 / 1_000.0)
        } else {
            write!(f, "{}bps", self.0)
        }
    }
}

/// Asymmetric hysteresis on bandwidth estimates.
///
/// Any increase is acted upon, otherwise a target bitrate sitting just above the
/// last estimate would never be reached while probing. Decreases are only acted
/// upon when they reach `threshold` (a fraction of the previous estimate),
/// which limits resolution changes caused by noisy estimates.
#[derive(Clone, Copy, Debug)]
pub struct BandwidthChangeGate {
    threshold: f64,
}

impl Default for BandwidthChangeGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl BandwidthChangeGate {
    pub const DEFAULT_THRESHOLD: f64 = 0.15;

    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn should_react(&self, previous: BandwidthEstimate, current: BandwidthEstimate) -> bool {
        if previous.is_unknown() || current.is_unknown() {
            return true;
        }

        if current > previous {
            return true;
        }
        if current == previous {
            return false;
        }

        let decrease = previous.as_i64().abs_diff(current.as_i64());
        decrease as f64 >= previous.as_i64() as f64 * self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_always_reacts() {
        let gate = BandwidthChangeGate::default();
        assert!(gate.should_react(BandwidthEstimate::UNKNOWN, BandwidthEstimate::kbps(500)));
        assert!(gate.should_react(BandwidthEstimate::kbps(500), BandwidthEstimate::UNKNOWN));
        assert!(gate.should_react(BandwidthEstimate::UNKNOWN, BandwidthEstimate::UNKNOWN));
    }

    #[test]
    fn any_increase_reacts() {
        let gate = BandwidthChangeGate::default();
        let previous = BandwidthEstimate::bps(1_000_000);
        assert!(gate.should_react(previous, BandwidthEstimate::bps(1_000_001)));
        assert!(gate.should_react(previous, BandwidthEstimate::mbps(3)));
    }

    #[test]
    fn small_decrease_is_suppressed() {
        let gate = BandwidthChangeGate::default();
        let previous = BandwidthEstimate::bps(1_000_000);
        assert!(!gate.should_react(previous, previous));
        assert!(!gate.should_react(previous, BandwidthEstimate::bps(900_001)));
        assert!(!gate.should_react(previous, BandwidthEstimate::bps(850_001)));
    }

    #[test]
    fn large_decrease_reacts() {
        let gate = BandwidthChangeGate::default();
        let previous = BandwidthEstimate::bps(1_000_000);
        assert!(gate.should_react(previous, BandwidthEstimate::bps(850_000)));
        assert!(gate.should_react(previous, BandwidthEstimate::bps(100_000)));
        assert!(gate.should_react(previous, BandwidthEstimate::bps(0)));
    }

    #[test]
    fn custom_threshold() {
        let gate = BandwidthChangeGate::new(0.5);
        let previous = BandwidthEstimate::kbps(1000);
        assert!(!gate.should_react(previous, BandwidthEstimate::kbps(600)));
        assert!(gate.should_react(previous, BandwidthEstimate::kbps(400)));
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let gate = BandwidthChangeGate::default();
        assert!(gate.should_react(BandwidthEstimate::bps(i64::MAX), BandwidthEstimate::bps(-2)));
        assert!(gate.should_react(BandwidthEstimate::mbps(1), BandwidthEstimate::bps(i64::MIN)));
        assert!(gate.should_react(BandwidthEstimate::bps(i64::MIN), BandwidthEstimate::bps(i64::MAX)));
        assert!(!gate.should_react(BandwidthEstimate::bps(i64::MAX), BandwidthEstimate::bps(i64::MAX)));
        assert!(!gate.should_react(
            BandwidthEstimate::bps(i64::MAX),
            BandwidthEstimate::bps(i64::MAX - 1)
        ));
        assert_eq!(BandwidthEstimate::mbps(i64::MAX).as_i64(), i64::MAX);
    }

    #[test]
    fn display() {
        assert_eq!(BandwidthEstimate::UNKNOWN.to_string(), "unknown");
        assert_eq!(BandwidthEstimate::kbps(150).to_string(), "150.0kbps");
        assert_eq!(BandwidthEstimate::mbps(2).to_string(), "2.00mbps");
        assert_eq!(BandwidthEstimate::bps(10).to_string(), "10bps");
    }
}
