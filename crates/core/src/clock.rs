use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest value that still uses the fixed four byte encoding.
const FIXED_WIDTH_MAX: u64 = 0x7FFF_FFFF;

/// A per-store logical clock. Every locally originated transaction bumps it
/// once; remote transactions raise it through [`LogicalClock::observe`].
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalClock {
    value: u64,
}

impl LogicalClock {
    pub fn new(value: u64) -> Self {
        Self { value }
    }

    /// Build a clock from an untrusted numeric input. Negative, fractional and
    /// non-finite numbers all clamp to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
            return Self::new(0);
        }
        if value >= u64::MAX as f64 {
            return Self::new(u64::MAX);
        }
        Self::new(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn increment(&mut self) {
        self.value = self.value.saturating_add(1);
    }

    /// Raise this clock to at least `other`. Never lowers it.
    pub fn observe(&mut self, other: &LogicalClock) {
        if other.value > self.value {
            self.value = other.value;
        }
    }

    /// Shortest big-endian encoding of the value. Zero encodes as a single
    /// zero byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let v = self.value;
        if v <= 0xFF {
            vec![v as u8]
        } else if v <= 0xFFFF {
            vec![(v >> 8) as u8, v as u8]
        } else if v <= 0xFF_FFFF {
            vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
        } else if v <= FIXED_WIDTH_MAX {
            vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
        } else {
            let mut rest = v;
            let mut bytes = Vec::with_capacity(8);
            while rest > 0 {
                bytes.push((rest % 256) as u8);
                rest /= 256;
            }
            bytes.reverse();
            bytes
        }
    }

    /// Decode a big-endian byte string. Never fails: the empty string is zero
    /// and anything wider than 64 bits saturates.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes {
            [] => Self::new(0),
            [a] => Self::new(*a as u64),
            [a, b] => Self::new((*a as u64) << 8 | *b as u64),
            [a, b, c] => Self::new((*a as u64) << 16 | (*b as u64) << 8 | *c as u64),
            _ => Self::from_bytes_general(bytes),
        }
    }

    fn from_bytes_general(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let significant = &bytes[start..];
        if significant.len() > 8 {
            tracing::warn!(
                len = significant.len(),
                "clock bytes exceed 64 bits, saturating"
            );
            return Self::new(u64::MAX);
        }
        let value = significant
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
        Self::new(value)
    }
}

impl fmt::Debug for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalClock({})", self.value)
    }
}

impl fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<u64> for LogicalClock {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl Serialize for LogicalClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.value)
    }
}

struct ClockVisitor;

impl Visitor<'_> for ClockVisitor {
    type Value = LogicalClock;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative clock value")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<LogicalClock, E> {
        Ok(LogicalClock::new(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<LogicalClock, E> {
        Ok(LogicalClock::new(v.max(0) as u64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<LogicalClock, E> {
        Ok(LogicalClock::from_f64(v))
    }
}

impl<'de> Deserialize<'de> for LogicalClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ClockVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encoding_widths() {
        assert_eq!(LogicalClock::new(0).to_bytes(), vec![0]);
        assert_eq!(LogicalClock::new(0xFF).to_bytes(), vec![0xFF]);
        assert_eq!(LogicalClock::new(0x100).to_bytes(), vec![0x01, 0x00]);
        assert_eq!(LogicalClock::new(0xFFFF).to_bytes(), vec![0xFF, 0xFF]);
        assert_eq!(LogicalClock::new(0x1_0000).to_bytes(), vec![0x01, 0x00, 0x00]);
        assert_eq!(
            LogicalClock::new(0x7FFF_FFFF).to_bytes(),
            vec![0x7F, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            LogicalClock::new(0x8000_0000).to_bytes(),
            vec![0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            LogicalClock::new(1 << 40).to_bytes(),
            vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(LogicalClock::new(u64::MAX).to_bytes(), vec![0xFF; 8]);
    }

    #[test]
    fn empty_bytes_decode_to_zero() {
        assert_eq!(LogicalClock::from_bytes(&[]).value(), 0);
    }

    #[test]
    fn leading_zeros_are_ignored() {
        assert_eq!(LogicalClock::from_bytes(&[0, 0, 0, 0, 0, 1]).value(), 1);
        assert_eq!(LogicalClock::from_bytes(&[0, 0, 1, 0]).value(), 256);
    }

    #[test]
    fn oversized_input_saturates() {
        let bytes = [1u8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(LogicalClock::from_bytes(&bytes).value(), u64::MAX);
    }

    #[test]
    fn increment_is_monotonic() {
        let mut clock = LogicalClock::new(7);
        for _ in 0..25 {
            clock.increment();
        }
        assert_eq!(clock.value(), 32);
    }

    #[test]
    fn observe_never_lowers() {
        let mut clock = LogicalClock::new(10);
        clock.observe(&LogicalClock::new(3));
        assert_eq!(clock.value(), 10);
        clock.observe(&LogicalClock::new(42));
        assert_eq!(clock.value(), 42);
    }

    #[test]
    fn untrusted_numbers_clamp_to_zero() {
        assert_eq!(LogicalClock::from_f64(-5.0).value(), 0);
        assert_eq!(LogicalClock::from_f64(2.5).value(), 0);
        assert_eq!(LogicalClock::from_f64(f64::NAN).value(), 0);
        assert_eq!(LogicalClock::from_f64(f64::INFINITY).value(), 0);
        assert_eq!(LogicalClock::from_f64(12.0).value(), 12);
    }

    #[test]
    fn json_deserialization_clamps() {
        let clock: LogicalClock = serde_json::from_str("-3").unwrap();
        assert_eq!(clock.value(), 0);
        let clock: LogicalClock = serde_json::from_str("1.5").unwrap();
        assert_eq!(clock.value(), 0);
        let clock: LogicalClock = serde_json::from_str("99").unwrap();
        assert_eq!(clock.value(), 99);
        assert_eq!(serde_json::to_string(&clock).unwrap(), "99");
    }

    proptest! {
        #[test]
        fn bytes_roundtrip_up_to_2_40(v in 0u64..=(1u64 << 40)) {
            let clock = LogicalClock::new(v);
            prop_assert_eq!(LogicalClock::from_bytes(&clock.to_bytes()).value(), v);
        }

        #[test]
        fn bytes_roundtrip_full_range(v in any::<u64>()) {
            let clock = LogicalClock::new(v);
            prop_assert_eq!(LogicalClock::from_bytes(&clock.to_bytes()), clock);
        }

        #[test]
        fn increment_adds_n(start in 0u64..1_000_000, n in 0usize..500) {
            let mut clock = LogicalClock::new(start);
            for _ in 0..n {
                clock.increment();
            }
            prop_assert_eq!(clock.value(), start + n as u64);
        }
    }
}
