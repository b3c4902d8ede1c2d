//! Identity newtypes for chips, cores, epochs and hardware streams.
//!
//! [`StreamId`] names a stream on silicon (not a logical stream of the plan).
//! It has two serialized forms: the designator string used as a key in the
//! compiled plan (`chip_0__y_1__x_1__stream_id_8`) and the [`PlanKey`] tuple
//! `(chip, x, y, stream, phase)` used to index the plan's per-phase entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Chip (device) identity within the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChipId(pub u32);

/// Logical epoch a core is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpochId(pub u32);

/// A core location on one chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreCoord {
    pub x: u32,
    pub y: u32,
}

impl CoreCoord {
    pub fn new(x: u32, y: u32) -> Self {
        CoreCoord { x, y }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}

/// Plan lookup key: `(chip, x, y, stream, phase)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey {
    pub chip: u32,
    pub x: u32,
    pub y: u32,
    pub stream: u32,
    pub phase: u32,
}

/// A hardware stream: chip + core coordinate + stream index.
///
/// Equality and hashing are structural over all three fields, so the same
/// coordinate and index on two different chips are two different streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId {
    pub chip: ChipId,
    pub core: CoreCoord,
    pub stream: u32,
}

impl StreamId {
    pub fn new(chip: ChipId, core: CoreCoord, stream: u32) -> Self {
        StreamId { chip, core, stream }
    }

    /// Builds the id from a plan key. The phase is dropped.
    pub fn from_plan_key(key: &PlanKey) -> Self {
        StreamId::new(ChipId(key.chip), CoreCoord::new(key.x, key.y), key.stream)
    }

    /// Parses `chip_<id>__y_<y>__x_<x>__stream_id_<n>`.
    pub fn from_designator(designator: &str) -> Result<Self, CoreError> {
        let malformed = |reason: &str| CoreError::MalformedDesignator {
            designator: designator.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = designator.split("__").collect();
        let [chip, y, x, stream] = parts.as_slice() else {
            return Err(malformed("expected four '__'-separated fields"));
        };

        let field = |part: &str, prefix: &str| -> Result<u32, CoreError> {
            let digits = part
                .strip_prefix(prefix)
                .ok_or_else(|| malformed(&format!("field '{part}' does not start with '{prefix}'")))?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed(&format!("field '{part}' is not a decimal number")));
            }
            digits
                .parse::<u32>()
                .map_err(|e| malformed(&format!("field '{part}': {e}")))
        };

        Ok(StreamId::new(
            ChipId(field(chip, "chip_")?),
            CoreCoord::new(field(x, "x_")?, field(y, "y_")?),
            field(stream, "stream_id_")?,
        ))
    }

    /// The designator string, the inverse of [`StreamId::from_designator`].
    pub fn designator(&self) -> String {
        format!(
            "chip_{}__y_{}__x_{}__stream_id_{}",
            self.chip.0, self.core.y, self.core.x, self.stream
        )
    }

    /// The plan lookup key of this stream at an explicit phase.
    pub fn plan_key(&self, phase: u32) -> PlanKey {
        PlanKey {
            chip: self.chip.0,
            x: self.core.x,
            y: self.core.y,
            stream: self.stream,
            phase,
        }
    }

    /// Another stream index on the same core.
    pub fn sibling(&self, stream: u32) -> Self {
        StreamId::new(self.chip, self.core, stream)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.designator())
    }
}

impl FromStr for StreamId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::from_designator(s)
    }
}

impl TryFrom<String> for StreamId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StreamId::from_designator(&value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.designator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn stream(chip: u32, x: u32, y: u32, index: u32) -> StreamId {
        StreamId::new(ChipId(chip), CoreCoord::new(x, y), index)
    }

    #[test]
    fn designator_orders_y_before_x() {
        assert_eq!(stream(0, 1, 7, 8).designator(), "chip_0__y_7__x_1__stream_id_8");
    }

    #[test]
    fn parses_designator() {
        let id = StreamId::from_designator("chip_3__y_11__x_2__stream_id_24").unwrap();
        assert_eq!(id, stream(3, 2, 11, 24));
    }

    #[test]
    fn rejects_malformed_designators() {
        for bad in [
            "",
            "chip_0__y_1__x_1",
            "chip_0__y_1__x_1__stream_id_8__extra",
            "chip_0__x_1__y_1__stream_id_8",
            "chip_a__y_1__x_1__stream_id_8",
            "chip_0__y_1__x_1__stream_8",
            "chip_0__y___x_1__stream_id_8",
            "chip_-1__y_1__x_1__stream_id_8",
        ] {
            let err = StreamId::from_designator(bad).unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedDesignator { .. }),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn plan_key_roundtrip() {
        let id = stream(1, 4, 5, 9);
        let key = id.plan_key(3);
        assert_eq!((key.chip, key.x, key.y, key.stream, key.phase), (1, 4, 5, 9, 3));
        assert_eq!(StreamId::from_plan_key(&key), id);
    }

    #[test]
    fn chips_distinguish_streams() {
        let a = stream(0, 1, 1, 8);
        let b = stream(1, 1, 1, 8);
        assert_ne!(a, b);
        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serde_uses_designator() {
        let id = stream(0, 18, 18, 4);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"chip_0__y_18__x_18__stream_id_4\"");
        let back: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<StreamId>("\"not_a_stream\"").is_err());
    }

    proptest! {
        #[test]
        fn designator_roundtrip(chip in 0u32..64, x in 0u32..64, y in 0u32..64, index in 0u32..64) {
            let s = format!("chip_{chip}__y_{y}__x_{x}__stream_id_{index}");
            let id = StreamId::from_designator(&s).unwrap();
            prop_assert_eq!(id.designator(), s);
        }
    }
}
