//! Buckets and input-space partitioning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Range of input covered by one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BucketRange {
    /// Half-open numeric range `[from, to)`; `to = None` is the open bucket
    Numeric { from: u64, to: Option<u64> },
    /// Explicit list of values (e.g. subject ids)
    Enumerated { values: Vec<String> },
}

impl BucketRange {
    /// The single open bucket used when the input size is unknown
    pub fn open() -> Self {
        Self::Numeric { from: 0, to: None }
    }

    /// Bucket completion is driven by an end-of-stream signal
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Numeric { to: None, .. })
    }

    pub fn contains(&self, n: u64) -> bool {
        match self {
            Self::Numeric { from, to } => n >= *from && to.map_or(true, |to| n < to),
            Self::Enumerated { .. } => false,
        }
    }

    /// Number of items, when known
    pub fn len(&self) -> Option<u64> {
        match self {
            Self::Numeric { from, to } => to.map(|to| to.saturating_sub(*from)),
            Self::Enumerated { values } => Some(values.len() as u64),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Lifecycle of a bucket: `ready -> delegated -> complete`
///
/// A delegated bucket may fall back to `ready` (worker crash, lease expiry);
/// a complete bucket never changes again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketState {
    #[default]
    Ready,
    Delegated,
    Complete,
}

/// A claimable partition of an iterative activity's input space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// 1-based position in the bucket list
    pub sequential_number: u32,
    pub range: BucketRange,
    #[serde(default)]
    pub state: BucketState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times the bucket was handed to a worker
    #[serde(default)]
    pub attempts: u32,
}

impl Bucket {
    pub fn new(sequential_number: u32, range: BucketRange) -> Self {
        Self {
            sequential_number,
            range,
            state: BucketState::Ready,
            worker_id: None,
            delegated_at: None,
            completed_at: None,
            attempts: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == BucketState::Complete
    }

    pub(crate) fn release(&mut self) {
        self.state = BucketState::Ready;
        self.worker_id = None;
        self.delegated_at = None;
    }
}

/// Total input of an iterative activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSpace {
    /// Half-open numeric range `[from, to_exclusive)`
    Numeric { from: u64, to_exclusive: u64 },
    Enumerated { values: Vec<String> },
    /// Size unknown up front (change streams)
    Unbounded,
}

impl InputSpace {
    /// Inclusive numeric range `from..=to`
    pub fn inclusive(from: u64, to: u64) -> Self {
        if to < from {
            return Self::Numeric {
                from,
                to_exclusive: from,
            };
        }
        Self::Numeric {
            from,
            to_exclusive: to.saturating_add(1),
        }
    }
}

/// How to cut an input space into buckets
///
/// Without a size the whole space is one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketingSpecification {
    /// Items per numeric bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_size: Option<u64>,

    /// Values per enumerated bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_per_bucket: Option<usize>,
}

impl BucketingSpecification {
    pub fn single() -> Self {
        Self::default()
    }

    pub fn numeric(bucket_size: u64) -> Self {
        Self {
            bucket_size: Some(bucket_size.max(1)),
            values_per_bucket: None,
        }
    }

    pub fn enumerated(values_per_bucket: usize) -> Self {
        Self {
            bucket_size: None,
            values_per_bucket: Some(values_per_bucket.max(1)),
        }
    }

    /// Ordered ranges covering `space` without gaps or overlaps
    pub fn partition(&self, space: &InputSpace) -> Vec<BucketRange> {
        match space {
            InputSpace::Unbounded => vec![BucketRange::open()],
            InputSpace::Numeric { from, to_exclusive } => {
                if from >= to_exclusive {
                    return Vec::new();
                }
                let size = self.bucket_size.unwrap_or(u64::MAX).max(1);
                let mut ranges = Vec::new();
                let mut start = *from;
                while start < *to_exclusive {
                    let end = start.saturating_add(size).min(*to_exclusive);
                    ranges.push(BucketRange::Numeric {
                        from: start,
                        to: Some(end),
                    });
                    start = end;
                }
                ranges
            }
            InputSpace::Enumerated { values } => {
                if values.is_empty() {
                    return Vec::new();
                }
                let size = self.values_per_bucket.unwrap_or(values.len()).max(1);
                values
                    .chunks(size)
                    .map(|chunk| BucketRange::Enumerated {
                        values: chunk.to_vec(),
                    })
                    .collect()
            }
        }
    }

    /// Fresh bucket list for `space`, numbered from 1
    pub fn buckets_for(&self, space: &InputSpace) -> Vec<Bucket> {
        self.partition(space)
            .into_iter()
            .enumerate()
            .map(|(i, range)| Bucket::new(i as u32 + 1, range))
            .collect()
    }
}

/// Check that `ranges` partition `space` exactly, in order
pub fn validate_partition(space: &InputSpace, ranges: &[BucketRange]) -> Result<(), String> {
    match space {
        InputSpace::Unbounded => match ranges {
            [range] if range.is_open() => Ok(()),
            _ => Err("unbounded space must be a single open bucket".to_string()),
        },
        InputSpace::Numeric { from, to_exclusive } => {
            let mut expected_start = *from;
            for range in ranges {
                match range {
                    BucketRange::Numeric { from, to: Some(to) } => {
                        if *from != expected_start {
                            return Err(format!(
                                "gap or overlap at {}: bucket starts at {}",
                                expected_start, from
                            ));
                        }
                        if to <= from {
                            return Err(format!("empty bucket [{}, {})", from, to));
                        }
                        expected_start = *to;
                    }
                    other => return Err(format!("unexpected range {:?}", other)),
                }
            }
            let end = if from >= to_exclusive { *from } else { *to_exclusive };
            if expected_start != end {
                return Err(format!(
                    "buckets end at {} but the space ends at {}",
                    expected_start, end
                ));
            }
            Ok(())
        }
        InputSpace::Enumerated { values } => {
            let mut covered = Vec::with_capacity(values.len());
            for range in ranges {
                match range {
                    BucketRange::Enumerated { values } if !values.is_empty() => {
                        covered.extend(values.iter().cloned())
                    }
                    other => return Err(format!("unexpected range {:?}", other)),
                }
            }
            if &covered != values {
                return Err("enumerated buckets do not cover the values in order".to_string());
            }
            Ok(())
        }
    }
}
