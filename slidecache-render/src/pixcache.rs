//! Page pixmap cache with bounded memory and adaptive lookahead.
//!
//! The cache keeps PNG encoded pages for a window of pages around the
//! current one. Pages are rendered by background workers; every completed
//! render and every request triggers a scheduling pass, which first shrinks
//! the cache to its budget and then hands the next pages to idle workers.
//!
//! All state is owned by one coordinating thread. Workers never touch the
//! map: they send results back over a channel, drained by
//! [`PixCache::process_results`] or [`PixCache::wait_for_result`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use slidecache_core::{
    CacheBudget, CacheSettings, Error, PageIndex, PagePart, RenderImage, Renderer, SizeF,
    MAX_RESOLUTION_DEVIATION,
};
use tracing::{debug, error, instrument, warn};

use crate::encoded::EncodedPage;
use crate::worker::{self, JobOrigin, RenderJob, RenderOutcome, Rendered, Worker};

/// Returned by the budget check when the cache may grow without bound.
const UNBOUNDED: i64 = i64::MAX >> 1;

/// Pages ahead of the current page are weighted this many times more than
/// pages behind it when growing or shrinking the cached window.
const AHEAD_BIAS: i64 = 3;

#[derive(Debug, Clone)]
pub enum CacheEvent {
    PageReady { page: PageIndex, image: RenderImage },
}

/// Boundaries of the simply connected block of cached pages around the
/// current page. Both ends point at the next candidates for rendering.
/// `first > second` marks an invalid region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub first: i64,
    pub second: i64,
}

impl Region {
    pub const INVALID: Region = Region {
        first: i64::MAX,
        second: -1,
    };

    pub fn point(page: PageIndex) -> Self {
        Self {
            first: page as i64,
            second: page as i64,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.first <= self.second
    }

    pub fn contains(&self, page: PageIndex) -> bool {
        let page = page as i64;
        self.first <= page && page <= self.second
    }
}

enum Slot {
    /// Dispatched to a worker, no data yet.
    Reserved { resolution: f64, deliver: bool },
    Ready(EncodedPage),
}

#[derive(Debug, Clone, Copy)]
struct PageRequest {
    page: PageIndex,
    resolution: f64,
    cache_page: bool,
}

pub struct PixCache {
    renderer: Arc<dyn Renderer>,
    part: PagePart,
    cache: BTreeMap<PageIndex, Slot>,
    priority: VecDeque<PageIndex>,
    requests: VecDeque<PageRequest>,
    region: Region,
    frame: Option<SizeF>,
    budget: CacheBudget,
    used_memory: u64,
    current_page: PageIndex,
    workers: Vec<Worker>,
    results: Receiver<RenderOutcome>,
    events: Mutex<Vec<CacheEvent>>,
}

fn same_resolution(a: f64, b: f64) -> bool {
    (a - b).abs() < MAX_RESOLUTION_DEVIATION
}

fn render_failure(job: &RenderJob, err: &anyhow::Error) -> Error {
    Error::RenderFailure {
        page: job.page,
        resolution: job.resolution,
        reason: format!("{err:#}"),
    }
}

impl PixCache {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        part: PagePart,
        settings: &CacheSettings,
    ) -> Result<Self, Error> {
        let (results_tx, results) = flume::unbounded();
        let workers = (0..settings.render_threads)
            .map(|id| Worker::spawn(id, Arc::clone(&renderer), results_tx.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            renderer,
            part,
            cache: BTreeMap::new(),
            priority: VecDeque::new(),
            requests: VecDeque::new(),
            region: Region::INVALID,
            frame: None,
            budget: settings.budget(),
            used_memory: 0,
            current_page: 0,
            workers,
            results,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn take_events(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn page_part(&self) -> PagePart {
        self.part
    }

    pub fn current_page(&self) -> PageIndex {
        self.current_page
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn budget(&self) -> CacheBudget {
        self.budget
    }

    /// Total size of all cached pages in bytes.
    pub fn used_memory(&self) -> u64 {
        self.used_memory
    }

    /// Pages with data in the cache, ascending.
    pub fn cached_pages(&self) -> Vec<PageIndex> {
        self.cache
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(page, _)| *page)
            .collect()
    }

    pub fn contains(&self, page: PageIndex) -> bool {
        matches!(self.cache.get(&page), Some(Slot::Ready(_)))
    }

    pub fn is_reserved(&self, page: PageIndex) -> bool {
        matches!(self.cache.get(&page), Some(Slot::Reserved { .. }))
    }

    /// True if no worker is rendering.
    pub fn is_idle(&self) -> bool {
        self.workers.iter().all(|worker| !worker.is_busy())
    }

    /// Resolution in pixels per point at which `page` fits the frame.
    pub fn resolution(&self, page: PageIndex) -> Option<f64> {
        let frame = self.frame.filter(|frame| !frame.is_empty())?;
        let mut size = self.renderer.page_size(page).filter(|size| !size.is_empty())?;
        if self.part.is_half() {
            size.width /= 2.0;
        }
        if size.width * frame.height > size.height * frame.width {
            Some(frame.width / size.width)
        } else {
            Some(frame.height / size.height)
        }
    }

    /// Removes all cached pages. Reservations stay, their results are
    /// discarded on arrival if they no longer fit.
    pub fn clear(&mut self) {
        self.cache.retain(|_, slot| matches!(slot, Slot::Reserved { .. }));
        self.used_memory = 0;
        self.region = Region::point(self.current_page);
    }

    pub fn set_max_memory(&mut self, max_memory: i64) {
        self.budget.max_bytes = u64::try_from(max_memory).ok();
        self.start_rendering();
    }

    pub fn set_max_slides(&mut self, max_slides: i32) {
        self.budget.max_slots = usize::try_from(max_slides).ok();
        self.start_rendering();
    }

    pub fn update_frame(&mut self, size: SizeF) {
        if self.frame != Some(size) {
            debug!(previous = ?self.frame, ?size, "update frame");
            self.frame = Some(size);
            self.clear();
        }
    }

    /// Returns the image of `page`, rendering it in the calling thread if it
    /// is not cached. The result is stored in the cache.
    #[instrument(skip(self))]
    pub fn pixmap(&mut self, page: PageIndex, resolution: Option<f64>) -> Option<RenderImage> {
        let resolution = resolution
            .filter(|resolution| *resolution > 0.0)
            .or_else(|| self.resolution(page))?;
        if let Some(image) = self.cached_image(page, resolution) {
            return Some(image);
        }
        if !self.check_page(page) {
            return None;
        }
        debug!(page, "rendering in calling thread");
        let job = RenderJob {
            page,
            resolution,
            part: self.part,
            origin: JobOrigin::Request { cache_page: true },
        };
        match worker::render(self.renderer.as_ref(), &job) {
            Ok(Rendered { image, encoded }) => {
                self.insert(encoded);
                Some(image)
            }
            Err(err) => {
                let failure = render_failure(&job, &err);
                error!(%failure, "dropping render");
                None
            }
        }
    }

    /// Requests `page` at `resolution`. The image is delivered as
    /// [`CacheEvent::PageReady`], immediately if it is cached.
    #[instrument(skip(self))]
    pub fn request_page(&mut self, page: PageIndex, resolution: f64, cache_page: bool) {
        if let Some(image) = self.cached_image(page, resolution) {
            self.emit(CacheEvent::PageReady { page, image });
            return;
        }
        if !self.check_page(page) {
            return;
        }
        if let Some(Slot::Reserved {
            resolution: reserved,
            deliver,
        }) = self.cache.get_mut(&page)
        {
            if same_resolution(*reserved, resolution) {
                *deliver = true;
                return;
            }
        }
        if self.workers.is_empty() {
            if let Some(image) = self.render_now(page, resolution, cache_page) {
                self.emit(CacheEvent::PageReady { page, image });
            }
            return;
        }
        self.requests.push_back(PageRequest {
            page,
            resolution,
            cache_page,
        });
        self.start_rendering();
    }

    /// Asks for `page` to be rendered ahead of the lookahead heuristic.
    pub fn request_render_page(&mut self, page: PageIndex) {
        if !self.check_page(page) {
            return;
        }
        if !self.priority.contains(&page) && !self.cache.contains_key(&page) {
            self.priority.push_back(page);
        }
        self.start_rendering();
    }

    /// Updates the current page and the region of cached pages around it.
    pub fn page_number_changed(&mut self, page: PageIndex) {
        if !self.check_page(page) {
            return;
        }
        self.current_page = page;

        if !self.cache.contains_key(&page) {
            self.priority.retain(|queued| *queued != page);
            self.priority.push_front(page);
            self.region = Region::point(page);
            self.start_rendering();
            return;
        }

        if !self.region.contains(page) {
            self.region.first = page as i64 - 1;
            self.region.second = page as i64 + 1;
        }
        while self.region.first >= 0 && self.cache.contains_key(&(self.region.first as usize)) {
            self.region.first -= 1;
        }
        while self.region.second >= 0 && self.cache.contains_key(&(self.region.second as usize)) {
            self.region.second += 1;
        }

        self.start_rendering();
    }

    /// Scheduling pass: enforce the budget, then keep idle workers busy.
    pub fn start_rendering(&mut self) {
        self.dispatch_requests();

        let mut allowed = self.limit_cache_size();
        // Without a frame there is no resolution to prefetch at. Queued
        // pages wait for the next pass.
        if allowed <= 0 || self.frame.map_or(true, |frame| frame.is_empty()) {
            return;
        }
        for index in 0..self.workers.len() {
            if allowed <= 0 {
                break;
            }
            if self.workers[index].is_busy() {
                continue;
            }
            let Some(page) = self.render_next() else {
                return;
            };
            let Some(resolution) = self.resolution(page) else {
                warn!(page, "page has no size, skipping");
                continue;
            };
            let job = RenderJob {
                page,
                resolution,
                part: self.part,
                origin: JobOrigin::Prefetch,
            };
            if !self.workers[index].dispatch(job) {
                self.priority.push_front(page);
                continue;
            }
            self.cache.insert(
                page,
                Slot::Reserved {
                    resolution,
                    deliver: false,
                },
            );
            allowed -= 1;
        }
    }

    /// Ingests all finished renders without blocking. Returns the number of
    /// results processed.
    pub fn process_results(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(outcome) = self.results.try_recv() {
            self.receive_data(outcome);
            processed += 1;
        }
        processed
    }

    /// Blocks until one render finishes or `timeout` elapses.
    pub fn wait_for_result(&mut self, timeout: Duration) -> bool {
        if self.is_idle() {
            return false;
        }
        match self.results.recv_timeout(timeout) {
            Ok(outcome) => {
                self.receive_data(outcome);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("all render workers have exited");
                false
            }
        }
    }

    fn receive_data(&mut self, outcome: RenderOutcome) {
        if let Some(worker) = self.workers.get_mut(outcome.worker) {
            worker.set_idle();
        }
        let RenderOutcome { job, result, .. } = outcome;
        let deliver = self.take_reservation(job.page, job.resolution);
        match result {
            // The reservation is gone, so the next request retries.
            Err(err) => {
                let failure = render_failure(&job, &err);
                error!(%failure, "dropping render");
            }
            Ok(rendered) => self.ingest(job, rendered, deliver),
        }
        self.start_rendering();
    }

    fn ingest(&mut self, job: RenderJob, rendered: Rendered, deliver: bool) {
        let (store, deliver) = match job.origin {
            JobOrigin::Prefetch => (true, deliver),
            JobOrigin::Request { cache_page } => (cache_page, true),
        };
        let Rendered { image, encoded } = rendered;
        if deliver {
            self.emit(CacheEvent::PageReady {
                page: job.page,
                image,
            });
        }
        if !store {
            return;
        }
        if job.origin == JobOrigin::Prefetch {
            let expected = self.resolution(job.page);
            if !expected.is_some_and(|expected| encoded.matches_resolution(expected)) {
                let stale = Error::StaleResult {
                    page: job.page,
                    resolution: job.resolution,
                    expected: expected.unwrap_or(-1.0),
                };
                debug!(%stale, "discarding render result");
                return;
            }
        }
        self.insert(encoded);
    }

    /// Removes the reservation held by a job for `page` at `resolution`.
    /// Returns whether the display layer is waiting for that page.
    fn take_reservation(&mut self, page: PageIndex, resolution: f64) -> bool {
        match self.cache.get(&page) {
            Some(Slot::Reserved {
                resolution: reserved,
                deliver,
            }) if same_resolution(*reserved, resolution) => {
                let deliver = *deliver;
                self.cache.remove(&page);
                deliver
            }
            _ => false,
        }
    }

    fn dispatch_requests(&mut self) {
        while !self.requests.is_empty() {
            let Some(index) = self.workers.iter().position(|worker| !worker.is_busy()) else {
                return;
            };
            let Some(request) = self.requests.pop_front() else {
                return;
            };
            let PageRequest {
                page,
                resolution,
                cache_page,
            } = request;
            if let Some(image) = self.cached_image(page, resolution) {
                self.emit(CacheEvent::PageReady { page, image });
                continue;
            }
            match self.cache.get_mut(&page) {
                Some(Slot::Reserved {
                    resolution: reserved,
                    deliver,
                }) if same_resolution(*reserved, resolution) => {
                    *deliver = true;
                    continue;
                }
                _ => {}
            }
            let job = RenderJob {
                page,
                resolution,
                part: self.part,
                origin: JobOrigin::Request { cache_page },
            };
            if !self.workers[index].dispatch(job) {
                self.requests.push_front(request);
                return;
            }
            // Uncached requests reserve too, so prefetching skips the page
            // while it is in flight. The slot is dropped when the result
            // arrives.
            if !self.cache.contains_key(&page) {
                self.cache.insert(
                    page,
                    Slot::Reserved {
                        resolution,
                        deliver: false,
                    },
                );
            }
        }
    }

    /// Chooses the page to render next: queued pages first, then the page
    /// adjacent to the region that keeps the window biased ahead.
    fn render_next(&mut self) -> Option<PageIndex> {
        while let Some(page) = self.priority.pop_front() {
            if !self.cache.contains_key(&page) {
                return Some(page);
            }
        }

        let page = self.current_page as i64;
        let page_count = self.renderer.page_count() as i64;
        if !self.region.is_valid() {
            self.region = Region::point(self.current_page);
        }

        loop {
            let Region { first, second } = self.region;
            let ahead_heavy = second + AHEAD_BIAS * first > (AHEAD_BIAS + 1) * page;
            if first >= 0 && (ahead_heavy || second >= page_count) {
                self.region.first -= 1;
                if !self.cache.contains_key(&(first as usize)) {
                    return Some(first as usize);
                }
            } else {
                if second >= page_count || second < 0 {
                    return None;
                }
                self.region.second += 1;
                if !self.cache.contains_key(&(second as usize)) {
                    return Some(second as usize);
                }
            }
        }
    }

    /// Evicts pages until the budget leaves room for another round of
    /// renders. Returns the number of pages that may still be added.
    fn limit_cache_size(&mut self) -> i64 {
        if self.budget.is_unlimited() {
            return if self.cache.len() >= self.renderer.page_count() {
                0
            } else {
                UNBOUNDED
            };
        }
        if self.budget.is_zero() {
            self.clear();
            return 0;
        }
        if !self.region.is_valid() {
            self.region = Region::point(self.current_page);
        }

        let threads = self.workers.len() as i64;
        let mut allowed = self.allowed_slots();
        // A slot limit is exact, a memory limit only an estimate.
        if allowed >= threads || (allowed > 0 && self.budget.max_bytes.is_none()) {
            return allowed;
        }
        if self.ready_count() == 0 {
            return allowed.max(0);
        }

        debug!(
            used_memory = self.used_memory,
            allowed,
            cached = self.cache.len(),
            "shrinking cache"
        );

        let page = self.current_page as i64;
        let Some((mut first, mut last)) = self.key_range() else {
            return allowed;
        };
        loop {
            if self.cache.len() < 2 || self.is_settled(first, last) {
                return 0;
            }

            let current = self.current_page;
            let evictable =
                |(key, slot): &(&PageIndex, &Slot)| **key != current && matches!(slot, Slot::Ready(_));
            let victim = if last + AHEAD_BIAS * first > (AHEAD_BIAS + 1) * page {
                self.cache.iter().rev().find(evictable).map(|(key, _)| *key)
            } else {
                self.cache.iter().find(evictable).map(|(key, _)| *key)
            };
            let Some(victim) = victim else {
                break;
            };
            if let Some(Slot::Ready(entry)) = self.cache.remove(&victim) {
                self.used_memory = self.used_memory.saturating_sub(entry.size());
                debug!(page = victim, used_memory = self.used_memory, "evicted page");
            }

            let Some(range) = self.key_range() else {
                break;
            };
            (first, last) = range;
            allowed = self.allowed_slots();
            if allowed >= threads || self.ready_count() == 0 {
                break;
            }
        }

        if first > self.region.first + 1 {
            self.region.first = first - 1;
        }
        if last + 1 < self.region.second {
            self.region.second = last + 1;
        }
        allowed
    }

    /// Estimated number of pages that fit into the remaining budget. Pages
    /// being rendered count against the slot limit but not against memory.
    fn allowed_slots(&self) -> i64 {
        let mut allowed = UNBOUNDED;
        if let Some(max_bytes) = self.budget.max_bytes {
            let max_bytes = i64::try_from(max_bytes).unwrap_or(UNBOUNDED);
            let used = i64::try_from(self.used_memory).unwrap_or(UNBOUNDED);
            let ready = self.ready_count() as i64;
            allowed = if used > 0 && ready > 0 {
                let estimate = (max_bytes - used).saturating_mul(ready) / used;
                if used > max_bytes {
                    estimate.min(-1)
                } else {
                    estimate
                }
            } else {
                self.workers.len() as i64
            };
        }
        if let Some(max_slots) = self.budget.max_slots {
            allowed = allowed.min(max_slots as i64 - self.cache.len() as i64);
        }
        allowed
    }

    /// The cached pages form one block containing the current page, fit the
    /// budget, and lie mostly ahead of the current page.
    fn is_settled(&self, first: i64, last: i64) -> bool {
        let page = self.current_page as i64;
        let len = self.cache.len();
        let at_end = last + 1 >= self.renderer.page_count() as i64;
        self.budget.max_slots.map_or(true, |max| len <= max)
            && self.budget.max_bytes.map_or(true, |max| self.used_memory <= max)
            && first <= page
            && (last > page || at_end)
            && last - first + 1 == len as i64
            && (2 * last + AHEAD_BIAS * first > (AHEAD_BIAS + 2) * page || at_end)
    }

    fn key_range(&self) -> Option<(i64, i64)> {
        let first = *self.cache.keys().next()?;
        let last = *self.cache.keys().next_back()?;
        Some((first as i64, last as i64))
    }

    fn ready_count(&self) -> usize {
        self.cache
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    fn cached_image(&self, page: PageIndex, resolution: f64) -> Option<RenderImage> {
        let Some(Slot::Ready(entry)) = self.cache.get(&page) else {
            return None;
        };
        if !entry.matches_resolution(resolution) {
            return None;
        }
        match entry.decode() {
            Ok(image) => Some(image),
            Err(err) => {
                warn!(page, error = %err, "cached page is unreadable");
                None
            }
        }
    }

    fn render_now(
        &mut self,
        page: PageIndex,
        resolution: f64,
        cache_page: bool,
    ) -> Option<RenderImage> {
        let job = RenderJob {
            page,
            resolution,
            part: self.part,
            origin: JobOrigin::Request { cache_page },
        };
        match worker::render(self.renderer.as_ref(), &job) {
            Ok(Rendered { image, encoded }) => {
                if cache_page {
                    self.insert(encoded);
                }
                Some(image)
            }
            Err(err) => {
                let failure = render_failure(&job, &err);
                error!(%failure, "dropping render");
                None
            }
        }
    }

    fn insert(&mut self, entry: EncodedPage) {
        let page = entry.page();
        let size = entry.size();
        if let Some(Slot::Ready(previous)) = self.cache.insert(page, Slot::Ready(entry)) {
            self.used_memory = self.used_memory.saturating_sub(previous.size());
        }
        self.used_memory += size;
        debug!(page, used_memory = self.used_memory, "stored page");
    }

    fn check_page(&self, page: PageIndex) -> bool {
        let page_count = self.renderer.page_count();
        if page >= page_count {
            let err = Error::InvalidPageIndex { page, page_count };
            debug!(%err, "ignoring request");
            return false;
        }
        true
    }

    fn emit(&self, event: CacheEvent) {
        self.events.lock().push(event);
    }
}
