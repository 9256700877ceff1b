// src/retrieval.rs
//
// Paged retrieval against the row store, feeding the pure engine in
// overtime.rs. Pages are fetched sequentially until the store returns a
// short page (the cursor is exhausted) or the row cap is hit. Every fetch
// sequence runs under an epoch drawn from `begin()`; a newer epoch makes
// older in-flight sequences stop before their next page request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::overtime::{dedupe_rows, EmployeeContext};
use crate::rowstore::{OvertimeEventRow, OvertimeFilter, RowSource, RowStoreError};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Row store request failed")]
    Store(#[from] RowStoreError),

    #[error("Fetch superseded by a newer request")]
    Superseded,
}

pub struct OvertimeQueryService {
    source: Arc<dyn RowSource>,
    page_size: u32,
    max_rows: usize,
    epoch: AtomicU64,
}

impl OvertimeQueryService {
    pub fn new(source: Arc<dyn RowSource>, page_size: u32, max_rows: usize) -> Self {
        Self {
            source,
            page_size,
            max_rows,
            epoch: AtomicU64::new(0),
        }
    }

    /// Opens a new fetch epoch. Any sequence still running under an older
    /// epoch stops with `FetchError::Superseded` before its next page.
    pub fn begin(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_current(&self, epoch: u64) -> Result<(), FetchError> {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            Err(FetchError::Superseded)
        }
    }

    /// Fetches every overtime row matching the filter, page by page, and
    /// returns the deduplicated set. The store's cursor contract is one
    /// exhaustive sequence per query, so deduplication here is an invariant
    /// check: removing anything means the store broke its contract, which
    /// is logged but not fatal.
    pub async fn fetch_overtime_rows(
        &self,
        filter: &OvertimeFilter,
        epoch: u64,
    ) -> Result<Vec<OvertimeEventRow>, FetchError> {
        let mut all_rows: Vec<OvertimeEventRow> = Vec::new();
        let mut offset: u32 = 0;

        loop {
            self.check_current(epoch)?;
            let page = self.source.overtime_page(filter, self.page_size, offset).await?;
            let fetched = page.len();
            debug!(
                "Fetched {} overtime rows at offset {} ({} to {})",
                fetched, offset, filter.from, filter.to
            );
            all_rows.extend(page);

            if fetched < self.page_size as usize {
                break; // short page: the cursor is exhausted
            }
            if all_rows.len() >= self.max_rows {
                warn!(
                    "Row cap of {} reached fetching {} to {}; result is truncated",
                    self.max_rows, filter.from, filter.to
                );
                all_rows.truncate(self.max_rows);
                break;
            }
            offset += self.page_size;
        }

        let before = all_rows.len();
        let rows = dedupe_rows(all_rows);
        let removed = before - rows.len();
        if removed > 0 {
            warn!(
                "Removed {} duplicate overtime rows ({} remain); the store cursor returned repeated records",
                removed,
                rows.len()
            );
        }
        info!(
            "Fetched {} overtime rows for {} to {}",
            rows.len(),
            filter.from,
            filter.to
        );
        Ok(rows)
    }

    /// Fetches the full employee directory into a registration-keyed map.
    /// Later pages win on a repeated registration.
    pub async fn fetch_employee_directory(
        &self,
        epoch: u64,
    ) -> Result<HashMap<String, EmployeeContext>, FetchError> {
        let mut directory: HashMap<String, EmployeeContext> = HashMap::new();
        let mut offset: u32 = 0;

        loop {
            self.check_current(epoch)?;
            let page = self.source.employee_page(self.page_size, offset).await?;
            let fetched = page.len();
            debug!("Fetched {} employee rows at offset {}", fetched, offset);
            for row in &page {
                directory.insert(row.registration.clone(), EmployeeContext::from(row));
            }

            if fetched < self.page_size as usize {
                break;
            }
            offset += self.page_size;
        }

        info!("Fetched employee directory with {} entries", directory.len());
        Ok(directory)
    }
}
