//! Pagination driver: walks discovery pages, emitting detail tasks.
//!
//! A state machine over `AtPage(n)`, `Exhausted` and `BudgetReached`.
//! Moves to the next page only when the current page yielded at least one
//! listing link and a next-page affordance; never revisits a page already
//! seen in this run, so server anomalies cannot produce infinite loops.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::extract::search::parse_search_page;
use crate::models::{CrawlTask, SkippedPage};

use super::fetcher::Fetcher;

/// Driver position in the pagination walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    AtPage(u32),
    /// No further listing links or next-page affordance. Terminal.
    Exhausted,
    /// The record budget was met. Terminal.
    BudgetReached,
}

/// What one start URL's walk produced.
#[derive(Debug)]
pub struct DriveSummary {
    pub state: PageState,
    /// Discovery pages fetched during this walk.
    pub pages_fetched: usize,
    /// Discovery pages that failed to fetch, for the skip channel.
    pub skips: Vec<SkippedPage>,
}

/// Walks search-result pages and converts listing links into detail tasks.
///
/// Budget accounting lives here: the driver emits at most `budget` detail
/// tasks across all start URLs it is run over.
pub struct PaginationDriver {
    fetcher: Arc<Fetcher>,
    budget: usize,
    emitted: usize,
    /// Resolved discovery-page URLs already visited this run.
    visited_pages: HashSet<String>,
    /// Detail URLs already emitted, so overlapping pages enqueue once.
    seen_details: HashSet<String>,
}

impl PaginationDriver {
    pub fn new(fetcher: Arc<Fetcher>, budget: usize) -> Self {
        Self {
            fetcher,
            budget,
            emitted: 0,
            visited_pages: HashSet::new(),
            seen_details: HashSet::new(),
        }
    }

    /// Detail tasks emitted so far, across walks.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn budget_reached(&self) -> bool {
        self.emitted >= self.budget
    }

    /// Emit one detail task unless the budget is met or the URL was
    /// already emitted. Returns false once the budget is reached.
    pub fn emit_detail(
        &mut self,
        url: &str,
        page: u32,
        emit: &mut impl FnMut(CrawlTask),
    ) -> bool {
        if self.budget_reached() {
            return false;
        }
        if self.seen_details.insert(url.to_string()) {
            emit(CrawlTask::detail(url, page));
            self.emitted += 1;
        }
        true
    }

    /// Walk discovery pages starting at `start_url`, feeding detail tasks
    /// to `emit`. Only a pool-wide proxy outage is propagated as an error;
    /// per-page fetch failures end the walk and are reported as skips.
    pub async fn run(
        &mut self,
        start_url: &str,
        emit: &mut impl FnMut(CrawlTask),
    ) -> Result<DriveSummary, ScrapeError> {
        let mut summary = DriveSummary {
            state: PageState::AtPage(1),
            pages_fetched: 0,
            skips: Vec::new(),
        };

        let mut page_number: u32 = 1;
        let mut next = Some(start_url.to_string());

        while let Some(page_url) = next.take() {
            if self.budget_reached() {
                summary.state = PageState::BudgetReached;
                break;
            }
            if !self.visited_pages.insert(page_url.clone()) {
                warn!(url = %page_url, "discovery page already visited, stopping walk");
                summary.state = PageState::Exhausted;
                break;
            }

            summary.state = PageState::AtPage(page_number);
            let task = CrawlTask::discovery(page_url.clone(), page_number);
            let fetched = match self.fetcher.fetch(&task).await {
                Ok(fetched) => fetched,
                Err(fatal @ ScrapeError::PoolExhausted { .. }) => return Err(fatal),
                Err(err) => {
                    summary.skips.push(SkippedPage {
                        url: page_url.clone(),
                        reason: err.skip_reason(),
                    });
                    summary.state = PageState::Exhausted;
                    break;
                }
            };
            summary.pages_fetched += 1;

            let parsed = parse_search_page(&fetched.body, &page_url);
            debug!(
                page = page_number,
                listings = parsed.listing_urls.len(),
                has_next = parsed.next_url.is_some(),
                "discovery page parsed"
            );

            for detail_url in &parsed.listing_urls {
                if !self.emit_detail(detail_url, page_number, emit) {
                    summary.state = PageState::BudgetReached;
                    break;
                }
            }
            if summary.state == PageState::BudgetReached {
                break;
            }

            match parsed.next_url {
                Some(next_url) if !parsed.listing_urls.is_empty() => {
                    page_number += 1;
                    next = Some(next_url);
                }
                _ => {
                    summary.state = PageState::Exhausted;
                }
            }
        }

        info!(
            start_url,
            pages = summary.pages_fetched,
            emitted = self.emitted,
            state = ?summary.state,
            "pagination walk finished"
        );
        Ok(summary)
    }
}
