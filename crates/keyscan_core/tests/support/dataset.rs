use std::collections::BTreeMap;
use std::ops::{Bound, RangeInclusive};
use std::sync::Mutex;

use keyscan_core::backoff::{BackoffPolicy, RecordingSleeper};
use keyscan_core::cancel::CancellationToken;
use keyscan_core::fetcher::RetryContext;
use keyscan_core::progress::NoopReporter;
use keyscan_core::walker::{WindowOutput, WindowWalker};
use keyscan_core::{
    FetchError, Page, PageFetcher, PageRequest, Partition, Record, ScanError, ScanFilter,
};

/// Bounds of one request as the fake service saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenRequest {
    pub start_key: i64,
    pub start_inclusive: bool,
    pub end_key: i64,
    pub end_inclusive: bool,
    pub count: u32,
}

/// In-memory stand-in for the paginated scan endpoint.
///
/// Requests whose start key falls into a failing range are answered with the
/// configured error instead of data.
#[derive(Default)]
pub struct DatasetFetcher {
    records: BTreeMap<i64, Record>,
    failures: Vec<(RangeInclusive<i64>, FetchError)>,
    requests: Mutex<Vec<SeenRequest>>,
}

impl DatasetFetcher {
    pub fn with_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let records = keys
            .into_iter()
            .map(|key| (key, Record::new(key).with_property("name", format!("record-{key}"))))
            .collect();
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        Self {
            records: records.into_iter().map(|record| (record.key, record)).collect(),
            ..Self::default()
        }
    }

    pub fn failing_in(mut self, range: RangeInclusive<i64>, error: FetchError) -> Self {
        self.failures.push((range, error));
        self
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().expect("poisoned mutex").clone()
    }

    /// Requests issued for the window ending at `end_key`.
    pub fn requests_for(&self, partition: &Partition) -> Vec<SeenRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.end_key == partition.end)
            .collect()
    }

    pub fn keys(&self) -> Vec<i64> {
        self.records.keys().copied().collect()
    }
}

impl PageFetcher for DatasetFetcher {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FetchError> {
        self.requests.lock().expect("poisoned mutex").push(SeenRequest {
            start_key: request.start_key,
            start_inclusive: request.start_inclusive,
            end_key: request.end_key,
            end_inclusive: request.end_inclusive,
            count: request.count,
        });

        if let Some((_, error)) = self
            .failures
            .iter()
            .find(|(range, _)| range.contains(&request.start_key))
        {
            return Err(error.clone());
        }

        if request.start_key > request.end_key {
            return Ok(Page::default());
        }
        let lower = if request.start_inclusive {
            Bound::Included(request.start_key)
        } else {
            Bound::Excluded(request.start_key)
        };
        let upper = if request.end_inclusive {
            Bound::Included(request.end_key)
        } else {
            Bound::Excluded(request.end_key)
        };
        if matches!((lower, upper), (Bound::Excluded(a), Bound::Excluded(b)) if a == b) {
            return Ok(Page::default());
        }

        Ok(Page::new(
            self.records
                .range((lower, upper))
                .take(request.count as usize)
                .map(|(_, record)| record.clone())
                .collect(),
        ))
    }
}

/// Walks one window with the default backoff policy and a non-blocking sleeper.
pub fn walk_window(
    fetcher: &dyn PageFetcher,
    partition: Partition,
    page_size: u32,
) -> (Result<WindowOutput, ScanError>, Vec<std::time::Duration>) {
    let filter = ScanFilter::role("ROLE_EXT_ADMIN");
    let policy = BackoffPolicy::default();
    let sleeper = RecordingSleeper::new();
    let cancellation = CancellationToken::new();
    let ctx = RetryContext {
        policy: &policy,
        sleeper: &sleeper,
        cancellation: &cancellation,
        reporter: &NoopReporter,
        partition_id: partition.partition_id,
    };
    let result = WindowWalker::new(partition, &filter, page_size, ctx).walk(fetcher);
    (result, sleeper.delays())
}

pub fn window(start: i64, end: i64) -> Partition {
    Partition {
        partition_id: 0,
        start,
        end,
    }
}

/// Deterministic, irregularly spaced keys in `[0, span)`.
pub fn scattered_keys(count: u64, span: i64) -> Vec<i64> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut keys: Vec<i64> = (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % span as u64) as i64
        })
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}
