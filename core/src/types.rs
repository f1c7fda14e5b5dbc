use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// One worker's share of a linear domain: indices
/// `start, start + step, ..., start + (count - 1) * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: u64,
    pub step:  u64,
    pub count: u64,
}

impl Chunk {
    /// The whole domain `[0, total)` as a single chunk.
    pub fn whole(total: u64) -> Self {
        Self { start: 0, step: 1, count: total }
    }

    /// Last index covered, if any.
    pub fn last(&self) -> Option<u64> {
        match self.count {
            0 => None,
            n => (n - 1).checked_mul(self.step)?.checked_add(self.start),
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = u64> {
        let Chunk { start, step, count } = *self;
        (0..count).map(move |k| start + k * step)
    }

    /// Narrow the chunk to a storage-native index type.
    ///
    /// Start, step, count and the last covered index must all fit in `I`.
    pub fn narrow<I>(&self) -> Result<(I, I, I), ChunkError>
    where
        I: TryFrom<u64>,
    {
        let overflow = |value: u64| ChunkError::Overflow {
            value,
            target: std::any::type_name::<I>(),
        };
        let narrow_one = |value: u64| I::try_from(value).map_err(|_| overflow(value));
        if self.count > 0 {
            // the last index itself may not exist in u64
            let last = self.last().ok_or_else(|| overflow(u64::MAX))?;
            narrow_one(last)?;
        }
        Ok((narrow_one(self.start)?, narrow_one(self.step)?, narrow_one(self.count)?))
    }
}

/// How a domain is split between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Step 1; every worker gets one contiguous range.
    #[default]
    Contiguous,
    /// Step = number of workers; worker `i` gets `i, i + W, i + 2W, ...`.
    Interleaved,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Contiguous => f.write_str("contiguous"),
            Partition::Interleaved => f.write_str("interleaved"),
        }
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contiguous" => Ok(Partition::Contiguous),
            "interleaved" | "strided" => Ok(Partition::Interleaved),
            other => Err(format!("unknown partition policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk index {value} does not fit into {target}")]
    Overflow { value: u64, target: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_checks_every_bound() {
        let fits = Chunk { start: 10, step: 100, count: 3 };
        assert_eq!(fits.narrow::<u8>(), Ok((10u8, 100, 3)));

        // start, step and count fit; only the last index (310) does not
        let chunk = Chunk { start: 10, step: 100, count: 4 };
        assert_eq!(chunk.narrow::<u8>(), Err(ChunkError::Overflow { value: 310, target: "u8" }));
        assert_eq!(chunk.narrow::<u16>(), Ok((10u16, 100, 4)));

        let start = Chunk { start: 300, step: 1, count: 0 };
        assert_eq!(start.narrow::<u8>(), Err(ChunkError::Overflow { value: 300, target: "u8" }));

        let huge = Chunk { start: u64::from(u32::MAX) + 1, step: 1, count: 1 };
        assert!(huge.narrow::<u32>().is_err());
        assert!(huge.narrow::<u64>().is_ok());

        let wraps = Chunk { start: 1, step: u64::MAX, count: 2 };
        assert!(wraps.narrow::<u64>().is_err());
    }

    #[test]
    fn empty_chunk_narrows() {
        let chunk = Chunk { start: 0, step: 1, count: 0 };
        assert_eq!(chunk.narrow::<u8>(), Ok((0, 1, 0)));
        assert_eq!(chunk.indices().count(), 0);
    }

    #[test]
    fn partition_parses() {
        assert_eq!("Interleaved".parse::<Partition>(), Ok(Partition::Interleaved));
        assert_eq!("contiguous".parse::<Partition>(), Ok(Partition::Contiguous));
        assert!("diagonal".parse::<Partition>().is_err());
    }
}
