//! Key-space planning: splits the addressable identifier range into
//! contiguous windows that can be walked independently.

use serde::{Deserialize, Serialize};

use crate::contract::{ValidationError, MAX_PARTITIONS};

pub const MIN_KEY: i64 = 0;
pub const MAX_KEY: i64 = i64::MAX;

/// Inclusive `[start, end]` range of every valid identifier in a collection.
///
/// Deserialization goes through [`KeySpace::new`], so an inverted range is
/// rejected wherever it comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "KeySpaceBounds")]
pub struct KeySpace {
    start: i64,
    end: i64,
}

#[derive(Deserialize)]
struct KeySpaceBounds {
    start: i64,
    end: i64,
}

impl TryFrom<KeySpaceBounds> for KeySpace {
    type Error = ValidationError;

    fn try_from(bounds: KeySpaceBounds) -> Result<Self, Self::Error> {
        Self::new(bounds.start, bounds.end)
    }
}

impl KeySpace {
    pub fn new(start: i64, end: i64) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::new(format!(
                "key space start {start} is greater than end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// `[0, 2^63 - 1]`, the range the account service hands out keys from.
    pub fn full() -> Self {
        Self {
            start: MIN_KEY,
            end: MAX_KEY,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn key_count(&self) -> u128 {
        (i128::from(self.end) - i128::from(self.start) + 1) as u128
    }

    pub fn contains(&self, key: i64) -> bool {
        (self.start..=self.end).contains(&key)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::full()
    }
}

/// One window of the key space, owned by a single walker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Partition {
    pub partition_id: usize,
    pub start: i64,
    pub end: i64,
}

impl Partition {
    pub fn contains(&self, key: i64) -> bool {
        (self.start..=self.end).contains(&key)
    }

    pub fn key_count(&self) -> u128 {
        (i128::from(self.end) - i128::from(self.start) + 1) as u128
    }
}

/// Splits `key_space` into `partitions` ordered, contiguous windows.
///
/// Every window but the last holds `key_count / partitions` keys; the last one
/// absorbs the remainder. A request for more windows than there are keys is
/// clamped so that no window is empty. At most `MAX_PARTITIONS` windows are
/// planned, since each one gets its own worker thread.
pub fn compute_partition_plan(
    key_space: &KeySpace,
    partitions: usize,
) -> Result<Vec<Partition>, ValidationError> {
    if partitions == 0 {
        return Err(ValidationError::new(
            "partitions must be a positive integer",
        ));
    }

    if partitions > MAX_PARTITIONS {
        return Err(ValidationError::new(format!(
            "partitions exceeds MAX_PARTITIONS={MAX_PARTITIONS}"
        )));
    }

    let key_count = key_space.key_count();
    let partition_count = (partitions as u128).min(key_count) as usize;
    let size = (key_count / partition_count as u128) as i128;
    let base = i128::from(key_space.start());

    let mut plan = Vec::with_capacity(partition_count);
    for partition_id in 0..partition_count {
        let start = base + partition_id as i128 * size;
        let end = if partition_id + 1 == partition_count {
            i128::from(key_space.end())
        } else {
            start + size - 1
        };
        plan.push(Partition {
            partition_id,
            start: start as i64,
            end: end as i64,
        });
    }

    validate_partitions(key_space, &plan)?;
    Ok(plan)
}

fn validate_partitions(key_space: &KeySpace, plan: &[Partition]) -> Result<(), ValidationError> {
    let (Some(first), Some(last)) = (plan.first(), plan.last()) else {
        return Err(ValidationError::new("No partitions to scan"));
    };

    if first.start != key_space.start() || last.end != key_space.end() {
        return Err(ValidationError::new(
            "Partition boundaries do not cover the full key space",
        ));
    }

    if plan.iter().any(|partition| partition.start > partition.end) {
        return Err(ValidationError::new("Partition start is greater than its end"));
    }

    for window in plan.windows(2) {
        if i128::from(window[0].end) + 1 != i128::from(window[1].start) {
            return Err(ValidationError::new(
                "Partition boundaries overlap or leave gaps",
            ));
        }
    }

    Ok(())
}
