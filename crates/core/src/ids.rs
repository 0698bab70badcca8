use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clock::LogicalClock;
use crate::error::CoreError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| CoreError::InvalidId(format!("{}: {e}", stringify!($name))))
            }
        }
    };
}

uuid_id!(PatchId);
uuid_id!(MessageId);

/// Identity of one collaborating datastore, handed out by the relay.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(u32);

impl StoreId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique, totally ordered id of a single edit: the store's clock
/// value at the time of the edit, tie-broken by the store id.
///
/// The byte form is `[n] ++ clock bytes (n of them) ++ store id (4 bytes BE)`.
/// Because the clock encoding is minimal, comparing byte forms
/// lexicographically gives the same order as comparing the ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EditId {
    version: u64,
    store: StoreId,
}

impl EditId {
    pub fn new(version: u64, store: StoreId) -> Self {
        Self { version, store }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let clock = LogicalClock::new(self.version).to_bytes();
        let mut buf = Vec::with_capacity(1 + clock.len() + 4);
        buf.push(clock.len() as u8);
        buf.extend_from_slice(&clock);
        buf.extend_from_slice(&self.store.0.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let (&len, rest) = bytes
            .split_first()
            .ok_or_else(|| CoreError::InvalidId("empty edit id".into()))?;
        let len = len as usize;
        if len == 0 || len > 8 || rest.len() != len + 4 {
            return Err(CoreError::InvalidId(format!(
                "edit id of {} bytes with clock length {len}",
                bytes.len()
            )));
        }
        let clock = &rest[..len];
        if len > 1 && clock[0] == 0 {
            return Err(CoreError::InvalidId(format!(
                "edit id clock {} is not minimally encoded",
                hex::encode(clock)
            )));
        }
        let version = LogicalClock::from_bytes(clock).value();
        let store: [u8; 4] = rest[len..]
            .try_into()
            .map_err(|_| CoreError::InvalidId("invalid store id length".into()))?;
        Ok(Self {
            version,
            store: StoreId(u32::from_be_bytes(store)),
        })
    }
}

impl fmt::Debug for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EditId({}@{})", self.version, self.store.0)
    }
}

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl FromStr for EditId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidId(format!("{s:?}: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for EditId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EditId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Exclusive upper bound of a segment digit.
const DIGIT_LIMIT: u64 = 1 << 32;

/// Largest gap left after a freshly allocated digit, so that runs of appends
/// stay shallow.
const DIGIT_STEP: u64 = 1 << 16;

/// One level of a [`PositionId`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Segment {
    pub digit: u32,
    pub edit: EditId,
}

/// Dense-ordered id of a list element. A new id can always be allocated
/// strictly between any two existing ones.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionId(Vec<Segment>);

impl PositionId {
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Allocate an id strictly between `lower` and `upper` (either may be
    /// open). Requires `lower < upper`.
    pub fn between(lower: Option<&PositionId>, upper: Option<&PositionId>, edit: EditId) -> Self {
        let lower = lower.map_or(&[][..], |p| p.segments());
        let mut bounded = upper.is_some();
        let upper = upper.map_or(&[][..], |p| p.segments());

        let mut segments = Vec::new();
        let mut depth = 0;
        loop {
            let lo_seg = lower.get(depth);
            let hi_seg = if bounded { upper.get(depth) } else { None };
            let lo = lo_seg.map_or(0, |s| s.digit as u64);
            let hi = hi_seg.map_or(DIGIT_LIMIT, |s| s.digit as u64);

            if hi > lo + 1 {
                let digit = lo + ((hi - lo) / 2).min(DIGIT_STEP);
                segments.push(Segment {
                    digit: digit as u32,
                    edit,
                });
                return Self(segments);
            }

            // No room at this depth: follow the lower bound (or the upper one
            // when both sit at digit zero) and descend.
            let seg = match (lo_seg, hi_seg) {
                (Some(seg), _) => *seg,
                (None, Some(seg)) if seg.digit as u64 == lo => *seg,
                _ => Segment {
                    digit: lo as u32,
                    edit,
                },
            };
            if hi_seg != Some(&seg) {
                bounded = false;
            }
            segments.push(seg);
            depth += 1;
        }
    }
}

impl fmt::Debug for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionId(")?;
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}:{:?}", seg.digit, seg.edit)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{:x}-{}", seg.digit, seg.edit)?;
        }
        Ok(())
    }
}

impl FromStr for PositionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for part in s.split('.') {
            let (digit, edit) = part
                .split_once('-')
                .ok_or_else(|| CoreError::InvalidId(format!("position segment {part:?}")))?;
            let digit = u32::from_str_radix(digit, 16)
                .map_err(|e| CoreError::InvalidId(format!("position digit {digit:?}: {e}")))?;
            segments.push(Segment {
                digit,
                edit: edit.parse()?,
            });
        }
        match segments.last() {
            Some(last) if last.digit != 0 => Ok(Self(segments)),
            _ => Err(CoreError::InvalidId(format!("position {s:?} ends in digit zero"))),
        }
    }
}

impl Serialize for PositionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PositionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn edit(version: u64, store: u32) -> EditId {
        EditId::new(version, StoreId::new(store))
    }

    #[test]
    fn edit_id_ordering_matches_bytes() {
        let pairs = vec![
            (edit(0, 0), edit(0, 1)),
            (edit(0, 9), edit(1, 0)),
            (edit(255, 3), edit(256, 0)),
            (edit(0xFFFF, 7), edit(0x1_0000, 1)),
            (edit(0x7FFF_FFFF, 2), edit(0x8000_0000, 1)),
            (edit(1 << 40, 0), edit(u64::MAX, 0)),
        ];
        for (a, b) in &pairs {
            assert!(a < b, "expected {a:?} < {b:?}");
            assert_eq!(a.to_bytes().cmp(&b.to_bytes()), a.cmp(b));
        }
    }

    #[test]
    fn edit_id_string_roundtrip() {
        let id = edit(300, 7);
        let s = id.to_string();
        assert_eq!(s, "02012c00000007");
        assert_eq!(s.parse::<EditId>().unwrap(), id);
    }

    #[test]
    fn malformed_edit_ids_are_rejected() {
        assert!("".parse::<EditId>().is_err());
        assert!("zz".parse::<EditId>().is_err());
        assert!("0201".parse::<EditId>().is_err());
        assert!(EditId::from_bytes(&[0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn padded_clock_bytes_are_rejected() {
        // Version 5 padded to two clock bytes.
        assert!("02000500000001".parse::<EditId>().is_err());
        assert!(EditId::from_bytes(&[3, 0, 1, 2, 0, 0, 0, 1]).is_err());

        let zero = edit(0, 1);
        assert_eq!(zero.to_string(), "010000000001");
        assert_eq!(EditId::from_bytes(&zero.to_bytes()).unwrap(), zero);
        for version in [5, 255, 256, 0x7FFF_FFFF, 0x8000_0000, u64::MAX] {
            let id = edit(version, 9);
            assert_eq!(id.to_string().parse::<EditId>().unwrap(), id);
        }
    }

    #[test]
    fn between_open_bounds() {
        let id = PositionId::between(None, None, edit(1, 1));
        assert_eq!(id.segments().len(), 1);
        assert!(id.segments()[0].digit > 0);
    }

    #[test]
    fn between_adjacent_digits_descends() {
        let a = PositionId(vec![Segment { digit: 5, edit: edit(1, 1) }]);
        let b = PositionId(vec![Segment { digit: 6, edit: edit(1, 1) }]);
        let mid = PositionId::between(Some(&a), Some(&b), edit(2, 2));
        assert!(a < mid && mid < b, "{a:?} < {mid:?} < {b:?}");
        assert_eq!(mid.segments().len(), 2);
    }

    #[test]
    fn between_concurrent_siblings() {
        // Two stores allocated the same digit at the same spot.
        let a = PositionId(vec![Segment { digit: 5, edit: edit(3, 1) }]);
        let b = PositionId(vec![Segment { digit: 5, edit: edit(3, 2) }]);
        let mid = PositionId::between(Some(&a), Some(&b), edit(4, 1));
        assert!(a < mid && mid < b);
    }

    #[test]
    fn between_before_first_digit_one() {
        let first = PositionId(vec![Segment { digit: 1, edit: edit(1, 1) }]);
        let before = PositionId::between(None, Some(&first), edit(2, 1));
        assert!(before < first);
        assert_ne!(before.segments().last().unwrap().digit, 0);
    }

    #[test]
    fn position_string_roundtrip() {
        let a = PositionId(vec![Segment { digit: 5, edit: edit(1, 1) }]);
        let b = PositionId(vec![Segment { digit: 6, edit: edit(1, 1) }]);
        let mid = PositionId::between(Some(&a), Some(&b), edit(2, 2));
        let parsed: PositionId = mid.to_string().parse().unwrap();
        assert_eq!(parsed, mid);
        let json = serde_json::to_string(&mid).unwrap();
        assert_eq!(serde_json::from_str::<PositionId>(&json).unwrap(), mid);
    }

    proptest! {
        #[test]
        fn random_inserts_stay_sorted(slots in proptest::collection::vec(any::<prop::sample::Index>(), 1..200)) {
            let mut ids: Vec<PositionId> = Vec::new();
            for (n, slot) in slots.iter().enumerate() {
                let at = slot.index(ids.len() + 1);
                let lower = if at == 0 { None } else { ids.get(at - 1) };
                let upper = ids.get(at);
                let id = PositionId::between(lower, upper, edit(n as u64, (n % 3) as u32));
                if let Some(lower) = lower {
                    prop_assert!(lower < &id);
                }
                if let Some(upper) = upper {
                    prop_assert!(&id < upper);
                }
                prop_assert_ne!(id.segments().last().map(|s| s.digit), Some(0));
                ids.insert(at, id);
            }
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
