use crate::contract::ScanFilter;
use crate::error::ScanError;
use crate::fetcher::{fetch_with_retry, PageFetcher, PageRequest, RetryContext};
use crate::keyspace::Partition;
use crate::progress::ScanEvent;
use crate::record::{Cursor, Page, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    Idle,
    Fetching,
    Advancing,
    Exhausted,
    Failed,
}

impl WalkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WalkerState::Exhausted | WalkerState::Failed)
    }
}

/// Records of one window in fetch order.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutput {
    pub partition: Partition,
    pub records: Vec<Record>,
    pub pages: usize,
}

/// Walks a single partition to exhaustion with a moving cursor.
pub struct WindowWalker<'a> {
    partition: Partition,
    filter: &'a ScanFilter,
    page_size: u32,
    ctx: RetryContext<'a>,
    state: WalkerState,
    cursor: Cursor,
}

impl<'a> WindowWalker<'a> {
    pub fn new(
        partition: Partition,
        filter: &'a ScanFilter,
        page_size: u32,
        ctx: RetryContext<'a>,
    ) -> Self {
        Self {
            partition,
            filter,
            page_size,
            ctx,
            state: WalkerState::Idle,
            cursor: Cursor::start_of(&partition),
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Drives the walker to a terminal state.
    ///
    /// A page shorter than `page_size` ends the walk, as does a full page
    /// whose last key is the window end. The walker stays in `Failed` when an
    /// error is returned. Walking again restarts from the window start.
    pub fn walk(&mut self, fetcher: &dyn PageFetcher) -> Result<WindowOutput, ScanError> {
        self.cursor = Cursor::start_of(&self.partition);
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            self.state = WalkerState::Fetching;
            let request =
                PageRequest::for_window(self.filter, &self.partition, self.cursor, self.page_size);

            let page = match fetch_with_retry(fetcher, &request, &self.ctx) {
                Ok(page) => page,
                Err(error) => return Err(self.fail(error)),
            };
            pages += 1;

            if let Err(reason) = check_page(&self.partition, self.cursor, &page) {
                return Err(self.fail(ScanError::InvalidPage {
                    partition_id: self.partition.partition_id,
                    reason,
                }));
            }

            let short = page.is_short(self.page_size);
            let last_key = page.last_key();
            let page_records = page.len();
            records.extend(page.into_records());

            self.ctx.reporter.on_event(&ScanEvent::PageFetched {
                partition_id: self.partition.partition_id,
                page_records,
                partition_records: records.len(),
            });

            match last_key {
                Some(key) if !short && key < self.partition.end => {
                    self.cursor = Cursor::after(key);
                    self.state = WalkerState::Advancing;
                }
                _ => {
                    self.state = WalkerState::Exhausted;
                    return Ok(WindowOutput {
                        partition: self.partition,
                        records,
                        pages,
                    });
                }
            }
        }
    }

    fn fail(&mut self, error: ScanError) -> ScanError {
        self.state = WalkerState::Failed;
        error
    }
}

/// Every key must sit inside the window, past the cursor, and strictly
/// increase; otherwise the leapfrog rule could loop or duplicate records.
fn check_page(partition: &Partition, cursor: Cursor, page: &Page) -> Result<(), String> {
    let mut previous: Option<i64> = None;
    for record in page.records() {
        if !cursor.admits(record.key) || record.key > partition.end {
            return Err(format!(
                "key {} is outside the requested range [{}{}, {}]",
                record.key,
                if cursor.inclusive { "" } else { ">" },
                cursor.key,
                partition.end
            ));
        }
        if previous.is_some_and(|prev| record.key <= prev) {
            return Err(format!("key {} is not in ascending order", record.key));
        }
        previous = Some(record.key);
    }
    Ok(())
}
