//! Continuous-scroll pager.
//!
//! Lays out every page of a document as one vertical strip, keeps bitmaps
//! resident only for pages in view plus one on either side, and keeps the
//! topmost visible page stationary while page sizes change underneath it.

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{clamp_zoom, PagerConfig, MAX_MAX_WIDTH, MAX_PAGE_SPACING, MIN_MAX_WIDTH};
use crate::layout::{Anchor, Band, Layout};
use crate::page::{FitPolicy, Page, PageRef, ScaleContext, Size};
use crate::requests::RequestTracker;
use crate::source::PageSource;
use crate::worker::{DecodeJob, ImagePipeline, ResizeJob, WorkerReply};

/// Longest single wait inside [`Pager::wait_idle`].
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerEvent {
    ImagesLoaded { count: usize },
    CurrentPageChanged(usize),
    AddBookmarkRequested(usize),
}

pub struct Pager<P: ImagePipeline> {
    config: PagerConfig,
    pipeline: P,
    source: Option<Arc<dyn PageSource>>,
    pages: Vec<Page>,
    layout: Layout,
    requests: RequestTracker,
    viewport: Size,
    scroll: f64,
    anchor: Option<Anchor>,
    current_page: Option<usize>,
    /// Bumped on every reset so replies for an earlier document are dropped.
    generation: u64,
    events_tx: Sender<PagerEvent>,
    events_rx: Receiver<PagerEvent>,
}

impl<P: ImagePipeline> Pager<P> {
    pub fn new(config: PagerConfig, pipeline: P, viewport: Size) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config: config.validated(),
            pipeline,
            source: None,
            pages: Vec::new(),
            layout: Layout::default(),
            requests: RequestTracker::new(),
            viewport,
            scroll: 0.0,
            anchor: None,
            current_page: None,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn events(&self) -> Receiver<PagerEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }

    pub fn current_page(&self) -> Option<usize> {
        self.current_page
    }

    /// Indices of pages holding a bitmap.
    pub fn resident_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|page| page.is_loaded())
            .map(Page::index)
            .collect()
    }

    /// Indices of pages intersecting the viewport.
    pub fn visible_pages(&self) -> Vec<usize> {
        let band = self.band();
        (0..self.pages.len())
            .filter(|&i| self.layout.in_view(i, band))
            .collect()
    }

    pub fn pending_requests(&self) -> Vec<usize> {
        self.requests.indices()
    }

    /// No decode in flight and no resident page waiting on a resize.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty() && !self.pages.iter().any(Page::has_pending_resize)
    }

    /// Lists the pages of `source` and loads them. Returns the page count.
    pub fn open(&mut self, source: Arc<dyn PageSource>, start_page: usize) -> Result<usize> {
        let pages = source.ordered_pages()?;
        let count = pages.len();
        self.load_document(source, pages, start_page);
        Ok(count)
    }

    pub fn load_document(
        &mut self,
        source: Arc<dyn PageSource>,
        pages: Vec<PageRef>,
        start_page: usize,
    ) {
        self.reset();
        self.pages = pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| Page::new(index, page))
            .collect();
        self.source = Some(source);
        info!(
            "loaded document with {} pages (generation {})",
            self.pages.len(),
            self.generation
        );
        self.layout_pass();
        if start_page > 0 && start_page < self.pages.len() {
            self.scroll = self.layout.start(start_page).unwrap_or(0) as f64;
            self.clamp_scroll();
        }
        self.emit(PagerEvent::ImagesLoaded {
            count: self.pages.len(),
        });
        self.visibility_pass();
    }

    /// Drops every page and outstanding request. Replies still in flight for
    /// the previous document are discarded when they arrive.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pages.clear();
        self.layout = Layout::default();
        self.requests.clear();
        self.anchor = None;
        self.current_page = None;
        self.source = None;
        self.scroll = 0.0;
        debug!("pager reset (generation {})", self.generation);
    }

    pub fn go_to_page(&mut self, index: usize) {
        let Some(start) = self.layout.start(index) else {
            return;
        };
        self.scroll = start as f64;
        self.clamp_scroll();
        self.visibility_pass();
    }

    pub fn scroll_to(&mut self, offset: f64) {
        self.scroll = offset;
        self.clamp_scroll();
        self.visibility_pass();
    }

    pub fn scroll_by(&mut self, delta: f64) {
        self.scroll_to(self.scroll + delta);
    }

    /// Re-evaluates visibility without changing anything else.
    pub fn update_visibility(&mut self) {
        self.visibility_pass();
    }

    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        let viewport = Size::new(width, height);
        if viewport == self.viewport {
            return;
        }
        self.viewport = viewport;
        self.relayout();
    }

    pub fn set_zoom(&mut self, factor: f64) {
        self.config.zoom = clamp_zoom(factor);
        self.relayout();
    }

    pub fn set_fit_policy(&mut self, fit_width: bool, fit_height: bool, upscale: bool) {
        self.config.set_fit_policy(FitPolicy {
            fit_width,
            fit_height,
            upscale,
        });
        self.relayout();
    }

    pub fn set_page_spacing(&mut self, px: u32) {
        self.config.page_spacing = px.min(MAX_PAGE_SPACING);
        self.relayout();
    }

    pub fn set_max_width(&mut self, px: u32) {
        self.config.max_width = px.clamp(MIN_MAX_WIDTH, MAX_MAX_WIDTH);
        self.relayout();
    }

    pub fn toggle_page_zoom(&mut self, index: usize) {
        let step = self.config.page_zoom_step;
        if let Some(page) = self.pages.get_mut(index) {
            page.toggle_zoom(step);
            self.relayout();
        }
    }

    pub fn set_page_zoom(&mut self, index: usize, factor: f64) {
        if let Some(page) = self.pages.get_mut(index) {
            page.set_zoom_factor(clamp_zoom(factor));
            self.relayout();
        }
    }

    pub fn request_bookmark(&mut self) {
        if let Some(index) = self.current_page {
            self.emit(PagerEvent::AddBookmarkRequested(index));
        }
    }

    /// Applies every reply the pipeline has ready without blocking, then
    /// expires timed-out requests. Returns the number of replies handled.
    pub fn process_replies(&mut self) -> usize {
        let mut handled = 0;
        while let Some(reply) = self.pipeline.try_recv() {
            self.handle_reply(reply);
            handled += 1;
        }
        self.expire_requests();
        handled
    }

    /// Pumps replies until the pager is idle or `timeout` passes. Meant for
    /// headless drivers; an interactive front end calls
    /// [`Pager::process_replies`] from its own loop instead.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_replies();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Some(reply) = self.pipeline.recv_timeout((deadline - now).min(IDLE_POLL)) {
                self.handle_reply(reply);
            }
        }
    }

    pub fn handle_reply(&mut self, reply: WorkerReply) {
        let index = reply.index();
        if reply.generation() != self.generation || index >= self.pages.len() {
            debug!("discarding stale reply for page {index}");
            return;
        }
        match reply {
            WorkerReply::ImageReady { result, .. } => {
                if !self.requests.del_request(index) {
                    debug!("page {index} left the window before its image arrived");
                    return;
                }
                match result {
                    Ok(image) => {
                        debug!("page {index} decoded");
                        self.pages[index].install_decoded(image);
                    }
                    Err(err) => {
                        warn!("page {index} could not be loaded: {err}");
                        self.pages[index].mark_failed();
                    }
                }
                self.relayout();
            }
            WorkerReply::ImageResized { target, result, .. } => match result {
                Ok(image) => {
                    if !self.pages[index].install_resized(image, target) {
                        debug!("dropping superseded {target} resize of page {index}");
                    }
                }
                Err(err) => {
                    warn!("page {index} could not be resized: {err}");
                    self.pages[index].resize_failed(target);
                }
            },
        }
    }

    fn emit(&self, event: PagerEvent) {
        let _ = self.events_tx.send(event);
    }

    fn band(&self) -> Band {
        Band::new(self.scroll, self.viewport.height)
    }

    fn clamp_scroll(&mut self) {
        let max = self.layout.max_scroll(self.viewport.height);
        self.scroll = if self.scroll.is_finite() {
            self.scroll.clamp(0.0, max)
        } else {
            0.0
        };
    }

    fn scale_context(&self) -> ScaleContext {
        ScaleContext {
            view: self.viewport,
            max_width: self.config.max_width,
            fit: self.config.fit_policy(),
            zoom: self.config.zoom,
        }
    }

    fn relayout(&mut self) {
        self.layout_pass();
        self.visibility_pass();
    }

    /// Recomputes every page's scaled size and position, asks the worker for
    /// resizes where a resident bitmap no longer matches, and moves the
    /// scroll offset so the anchor page stays put.
    fn layout_pass(&mut self) {
        let ctx = self.scale_context();
        let (mut sum_w, mut sum_h, mut known) = (0u64, 0u64, 0u64);
        for page in &mut self.pages {
            if let Some(size) = page.compute_scaled_size(&ctx) {
                sum_w += size.width as u64;
                sum_h += size.height as u64;
                known += 1;
            }
        }
        let placeholder = if known > 0 {
            Size::new((sum_w / known) as u32, (sum_h / known) as u32)
        } else {
            ctx.default_placeholder()
        };
        for page in self
            .pages
            .iter_mut()
            .filter(|page| page.intrinsic_size().is_none())
        {
            page.set_placeholder(placeholder);
        }

        let previous = std::mem::take(&mut self.layout);
        self.layout = Layout::build(
            self.pages.iter().map(Page::scaled_size),
            self.viewport.width,
            self.config.page_spacing,
        );
        self.dispatch_resizes();

        let moved = previous.starts() != self.layout.starts()
            || previous.ends() != self.layout.ends();
        if moved {
            if let Some(offset) = self.anchor.and_then(|a| self.layout.offset_for(a)) {
                self.scroll = offset;
            }
        }
        self.clamp_scroll();
    }

    fn dispatch_resizes(&mut self) {
        for index in 0..self.pages.len() {
            let Some((image, target)) = self.pages[index].take_resize_target() else {
                continue;
            };
            let job = ResizeJob {
                generation: self.generation,
                index,
                image,
                target,
            };
            if let Err(err) = self.pipeline.resize(job) {
                warn!("could not request resize of page {index}: {err}");
                self.pages[index].resize_failed(target);
            }
        }
    }

    /// Requests bitmaps for pages in view and the page just below them,
    /// frees bitmaps more than one page away from the view, and records the
    /// new anchor.
    fn visibility_pass(&mut self) {
        let band = self.band();
        for index in 0..self.pages.len() {
            if self.layout.in_view(index, band) {
                if self.pages[index].is_unloaded() {
                    self.add_request(index);
                }
                continue;
            }
            let prev_in_view = index > 0 && self.layout.in_view(index - 1, band);
            let next_in_view = self.layout.in_view(index + 1, band);
            if self.pages[index].is_loaded() {
                if !(prev_in_view || next_in_view) {
                    self.pages[index].free();
                    self.del_request(index);
                    debug!("freed page {index}");
                }
            } else if self.pages[index].is_unloaded() {
                if prev_in_view {
                    self.add_request(index);
                } else {
                    self.del_request(index);
                }
            }
        }
        let anchor = self.layout.anchor_for(band);
        self.anchor = anchor;
        let current = anchor.map(|a| a.index);
        if current != self.current_page {
            self.current_page = current;
            if let Some(index) = current {
                self.emit(PagerEvent::CurrentPageChanged(index));
            }
        }
    }

    fn add_request(&mut self, index: usize) {
        if !self.requests.add_request(index) {
            return;
        }
        let job = match (&self.source, self.pages.get(index)) {
            (Some(source), Some(page)) => DecodeJob {
                generation: self.generation,
                index,
                page: page.source_ref().clone(),
                source: Arc::clone(source),
            },
            _ => {
                self.requests.del_request(index);
                return;
            }
        };
        debug!("requesting page {index}");
        if let Err(err) = self.pipeline.decode(job) {
            warn!("could not request page {index}: {err}");
            self.requests.del_request(index);
        }
    }

    fn del_request(&mut self, index: usize) {
        if self.requests.del_request(index) {
            debug!("cancelled request for page {index}");
        }
    }

    fn expire_requests(&mut self) {
        let Some(timeout) = self.config.request_timeout() else {
            return;
        };
        let expired = self.requests.expire(timeout);
        if !expired.is_empty() {
            debug!("requests timed out for pages {expired:?}");
            self.visibility_pass();
        }
    }
}
