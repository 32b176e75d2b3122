//! The "fetch one page" seam and the retry loop that guards it.

use std::sync::Arc;

use crate::backoff::{time_jitter, BackoffPolicy, Sleeper};
use crate::cancel::CancellationToken;
use crate::contract::ScanFilter;
use crate::error::{FetchError, ScanError};
use crate::keyspace::Partition;
use crate::progress::{ProgressReporter, ScanEvent};
use crate::record::{Cursor, Page};

/// Bounds and filter for one page request. The upper bound is always the
/// window end, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub filter: &'a ScanFilter,
    pub start_key: i64,
    pub start_inclusive: bool,
    pub end_key: i64,
    pub end_inclusive: bool,
    pub count: u32,
}

impl<'a> PageRequest<'a> {
    pub fn for_window(
        filter: &'a ScanFilter,
        partition: &Partition,
        cursor: Cursor,
        count: u32,
    ) -> Self {
        Self {
            filter,
            start_key: cursor.key,
            start_inclusive: cursor.inclusive,
            end_key: partition.end,
            end_inclusive: true,
            count,
        }
    }
}

/// Performs one bounded request against a paginated endpoint.
///
/// Implementations return either a complete page or an error; they never
/// retry on their own.
pub trait PageFetcher: Send + Sync {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FetchError>;
}

impl<T: PageFetcher + ?Sized> PageFetcher for Arc<T> {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FetchError> {
        (**self).fetch_page(request)
    }
}

impl<T: PageFetcher + ?Sized> PageFetcher for &T {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FetchError> {
        (**self).fetch_page(request)
    }
}

/// Collaborators a walker needs to retry a fetch.
#[derive(Clone, Copy)]
pub struct RetryContext<'a> {
    pub policy: &'a BackoffPolicy,
    pub sleeper: &'a dyn Sleeper,
    pub cancellation: &'a CancellationToken,
    pub reporter: &'a dyn ProgressReporter,
    pub partition_id: usize,
}

/// Issues `request` until it succeeds, fails with a non-retryable error, or
/// runs out of retries. Every retry re-sends the identical request.
pub fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    request: &PageRequest<'_>,
    ctx: &RetryContext<'_>,
) -> Result<Page, ScanError> {
    let mut retry = ctx.policy.start();
    loop {
        if ctx.cancellation.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let error = match fetcher.fetch_page(request) {
            Ok(page) => return Ok(page),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(ScanError::Client(error));
        }

        retry.record_failure();
        if !retry.should_retry() {
            return Err(ScanError::RetriesExhausted {
                attempts: retry.attempt_count(),
                max_retries: retry.max_retries(),
                last_error: error,
            });
        }

        let delay = retry.next_delay(time_jitter());
        log::warn!(
            "Error scanning page, try={}, partition={}, startKey={}: {}",
            retry.attempt_count(),
            ctx.partition_id,
            request.start_key,
            error
        );
        ctx.reporter.on_event(&ScanEvent::RetryScheduled {
            partition_id: ctx.partition_id,
            attempt: retry.attempt_count(),
            start_key: request.start_key,
            delay,
            error: error.to_string(),
        });

        if !ctx.sleeper.sleep(delay, ctx.cancellation) {
            return Err(ScanError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::backoff::RecordingSleeper;
    use crate::progress::{CollectingReporter, NoopReporter};
    use crate::record::Record;

    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<Page, FetchError>>>,
        calls: Mutex<Vec<(i64, bool)>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<Page, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(i64, bool)> {
            self.calls.lock().expect("poisoned mutex").clone()
        }
    }

    impl PageFetcher for ScriptedFetcher {
        fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FetchError> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push((request.start_key, request.start_inclusive));
            self.responses
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    fn window() -> Partition {
        Partition {
            partition_id: 4,
            start: 100,
            end: 199,
        }
    }

    #[test]
    fn request_for_window_uses_cursor_and_inclusive_window_end() {
        let filter = ScanFilter::role("ROLE_EXT_ADMIN");
        let request = PageRequest::for_window(&filter, &window(), Cursor::after(150), 25);

        assert_eq!(request.start_key, 150);
        assert!(!request.start_inclusive);
        assert_eq!(request.end_key, 199);
        assert!(request.end_inclusive);
        assert_eq!(request.count, 25);
    }

    #[test]
    fn transient_errors_are_retried_with_identical_request() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::from_status(503, "busy")),
            Err(FetchError::Transport("connection reset".to_string())),
            Ok(Page::new(vec![Record::new(100)])),
        ]);
        let filter = ScanFilter::role("ROLE_EXT_ADMIN");
        let policy = BackoffPolicy::default();
        let sleeper = RecordingSleeper::new();
        let cancellation = CancellationToken::new();
        let reporter = CollectingReporter::new();
        let ctx = RetryContext {
            policy: &policy,
            sleeper: &sleeper,
            cancellation: &cancellation,
            reporter: &reporter,
            partition_id: 4,
        };
        let request = PageRequest::for_window(&filter, &window(), Cursor::start_of(&window()), 10);

        let page = fetch_with_retry(&fetcher, &request, &ctx).expect("fetch should succeed");

        assert_eq!(page.len(), 1);
        assert_eq!(fetcher.calls(), vec![(100, true); 3]);
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 2);
        assert!(delays[0].as_millis() >= 90 && delays[0].as_millis() <= 110);
        assert!(delays[1].as_millis() >= 180 && delays[1].as_millis() <= 220);
        let retries = reporter
            .events()
            .into_iter()
            .filter(|event| event.name() == "retry_scheduled")
            .count();
        assert_eq!(retries, 2);
    }

    #[test]
    fn client_error_fails_after_one_attempt() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::from_status(403, "forbidden"))]);
        let filter = ScanFilter::role("ROLE_EXT_ADMIN");
        let policy = BackoffPolicy::default();
        let sleeper = RecordingSleeper::new();
        let cancellation = CancellationToken::new();
        let ctx = RetryContext {
            policy: &policy,
            sleeper: &sleeper,
            cancellation: &cancellation,
            reporter: &NoopReporter,
            partition_id: 0,
        };
        let request = PageRequest::for_window(&filter, &window(), Cursor::start_of(&window()), 10);

        let error = fetch_with_retry(&fetcher, &request, &ctx).expect_err("fetch should fail");

        assert!(matches!(
            error,
            ScanError::Client(FetchError::Client { status: 403, .. })
        ));
        assert_eq!(fetcher.calls().len(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_fetching() {
        let fetcher = ScriptedFetcher::new(Vec::new());
        let filter = ScanFilter::role("ROLE_EXT_ADMIN");
        let policy = BackoffPolicy::default();
        let sleeper = RecordingSleeper::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let ctx = RetryContext {
            policy: &policy,
            sleeper: &sleeper,
            cancellation: &cancellation,
            reporter: &NoopReporter,
            partition_id: 0,
        };
        let request = PageRequest::for_window(&filter, &window(), Cursor::start_of(&window()), 10);

        let error = fetch_with_retry(&fetcher, &request, &ctx).expect_err("fetch should stop");

        assert!(error.is_cancelled());
        assert!(fetcher.calls().is_empty());
    }
}
