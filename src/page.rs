use image::{DynamicImage, GenericImageView};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Opaque handle a [`crate::source::PageSource`] resolves to raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageRef {
    File(PathBuf),
    Entry(String),
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRef::File(path) => write!(f, "{}", path.display()),
            PageRef::Entry(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Multiplies both axes by `ratio`, rounding to whole pixels and never
    /// collapsing an axis to zero.
    pub fn scale(&self, ratio: f64) -> Self {
        let axis = |v: u32| ((v as f64) * ratio).round().max(1.0) as u32;
        Self {
            width: axis(self.width),
            height: axis(self.height),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPolicy {
    pub fit_width: bool,
    pub fit_height: bool,
    pub upscale: bool,
}

impl Default for FitPolicy {
    fn default() -> Self {
        Self {
            fit_width: true,
            fit_height: false,
            upscale: false,
        }
    }
}

/// View-wide inputs to the per-page scaling computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleContext {
    pub view: Size,
    pub max_width: u32,
    pub fit: FitPolicy,
    pub zoom: f64,
}

impl ScaleContext {
    pub fn effective_width(&self) -> u32 {
        self.view.width.min(self.max_width)
    }

    /// Size used for undecoded pages before any page of the document has a
    /// known size.
    pub fn default_placeholder(&self) -> Size {
        Size::new(self.effective_width().max(1), self.view.height.max(1))
    }
}

/// Computes the displayed size of an image and the source-to-display ratio.
///
/// The more restrictive of the enabled fit axes wins; the result is never
/// enlarged past the source resolution unless `upscale` is set. Zoom is
/// applied last so the returned ratio already includes it.
pub fn scale_to_fit(intrinsic: Size, ctx: &ScaleContext, page_zoom: f64) -> (Size, f64) {
    if intrinsic.is_empty() {
        return (Size::default(), 1.0);
    }
    let fit = ctx.fit;
    let mut ratio = if !fit.fit_width && !fit.fit_height {
        1.0
    } else {
        let h_ratio = if fit.fit_height {
            ctx.view.height as f64 / intrinsic.height as f64
        } else {
            f64::INFINITY
        };
        let w_ratio = if fit.fit_width {
            ctx.effective_width() as f64 / intrinsic.width as f64
        } else {
            f64::INFINITY
        };
        h_ratio.min(w_ratio)
    };
    if ratio > 1.0 && !fit.upscale {
        ratio = 1.0;
    }
    let ratio = ratio * ctx.zoom * page_zoom;
    (intrinsic.scale(ratio), ratio)
}

/// A resident bitmap: the decoded source plus its copy at the current
/// display size, once the worker has produced one.
#[derive(Debug, Clone)]
pub struct Bitmap {
    source: Arc<DynamicImage>,
    display: Option<Arc<DynamicImage>>,
    pending_resize: Option<Size>,
    /// Last target the worker could not produce. Not requested again.
    failed_resize: Option<Size>,
}

impl Bitmap {
    fn new(source: DynamicImage) -> Self {
        Self {
            source: Arc::new(source),
            display: None,
            pending_resize: None,
            failed_resize: None,
        }
    }

    pub fn source(&self) -> &Arc<DynamicImage> {
        &self.source
    }

    pub fn display(&self) -> Option<&Arc<DynamicImage>> {
        self.display.as_ref()
    }

    pub fn pending_resize(&self) -> Option<Size> {
        self.pending_resize
    }

    pub fn failed_resize(&self) -> Option<Size> {
        self.failed_resize
    }
}

#[derive(Debug, Clone, Default)]
pub enum PageImage {
    #[default]
    Unloaded,
    Loaded(Bitmap),
    /// Decoding failed; the page keeps placeholder sizing and is not
    /// requested again for this document.
    Failed,
}

#[derive(Debug)]
pub struct Page {
    index: usize,
    source_ref: PageRef,
    intrinsic: Option<Size>,
    scaled: Size,
    ratio: f64,
    image: PageImage,
    zoom_toggled: bool,
    zoom_factor: f64,
}

impl Page {
    pub fn new(index: usize, source_ref: PageRef) -> Self {
        Self {
            index,
            source_ref,
            intrinsic: None,
            scaled: Size::default(),
            ratio: 1.0,
            image: PageImage::Unloaded,
            zoom_toggled: false,
            zoom_factor: 1.0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source_ref(&self) -> &PageRef {
        &self.source_ref
    }

    pub fn intrinsic_size(&self) -> Option<Size> {
        self.intrinsic
    }

    pub fn scaled_size(&self) -> Size {
        self.scaled
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn image(&self) -> &PageImage {
        &self.image
    }

    pub fn bitmap(&self) -> Option<&Bitmap> {
        match &self.image {
            PageImage::Loaded(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.image, PageImage::Loaded(_))
    }

    pub fn is_unloaded(&self) -> bool {
        matches!(self.image, PageImage::Unloaded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.image, PageImage::Failed)
    }

    pub fn zoom_toggled(&self) -> bool {
        self.zoom_toggled
    }

    pub fn zoom_factor(&self) -> f64 {
        self.zoom_factor
    }

    pub fn toggle_zoom(&mut self, step: f64) {
        self.zoom_toggled = !self.zoom_toggled;
        self.zoom_factor = if self.zoom_toggled { step } else { 1.0 };
    }

    pub fn set_zoom_factor(&mut self, factor: f64) {
        self.zoom_factor = factor;
        self.zoom_toggled = factor != 1.0;
    }

    /// Recomputes the scaled size from the intrinsic size. Returns `None`
    /// and leaves the page untouched when the intrinsic size is unknown.
    pub fn compute_scaled_size(&mut self, ctx: &ScaleContext) -> Option<Size> {
        let intrinsic = self.intrinsic?;
        let (scaled, ratio) = scale_to_fit(intrinsic, ctx, self.zoom_factor);
        self.scaled = scaled;
        self.ratio = ratio;
        Some(scaled)
    }

    /// Sizes a page whose intrinsic size is not known yet. The page's own
    /// zoom still applies so a toggle shows before the first decode.
    pub fn set_placeholder(&mut self, size: Size) {
        debug_assert!(self.intrinsic.is_none());
        self.scaled = size.scale(self.zoom_factor);
        self.ratio = self.zoom_factor;
    }

    /// Installs a freshly decoded image. The first decode fixes the
    /// intrinsic size for the lifetime of the page.
    pub fn install_decoded(&mut self, image: DynamicImage) {
        if self.intrinsic.is_none() {
            self.intrinsic = Some(Size::of(&image));
        }
        self.image = PageImage::Loaded(Bitmap::new(image));
    }

    pub fn mark_failed(&mut self) {
        self.image = PageImage::Failed;
    }

    /// Drops the resident bitmap. Returns whether there was one.
    pub fn free(&mut self) -> bool {
        if self.is_loaded() {
            self.image = PageImage::Unloaded;
            true
        } else {
            false
        }
    }

    /// Decides whether the resident bitmap needs a resize to match the
    /// current scaled size. A source that already has the right size is
    /// displayed directly; otherwise the target is marked pending and the
    /// source handed back for the worker.
    pub fn take_resize_target(&mut self) -> Option<(Arc<DynamicImage>, Size)> {
        let target = self.scaled;
        let PageImage::Loaded(bitmap) = &mut self.image else {
            return None;
        };
        if bitmap.display.as_ref().map(|d| Size::of(d)) == Some(target) {
            bitmap.pending_resize = None;
            return None;
        }
        if Size::of(&bitmap.source) == target {
            bitmap.display = Some(Arc::clone(&bitmap.source));
            bitmap.pending_resize = None;
            return None;
        }
        if bitmap.pending_resize == Some(target) || bitmap.failed_resize == Some(target) {
            return None;
        }
        bitmap.pending_resize = Some(target);
        Some((Arc::clone(&bitmap.source), target))
    }

    /// Accepts a resized image if it still matches the current scaled size.
    pub fn install_resized(&mut self, image: DynamicImage, target: Size) -> bool {
        let scaled = self.scaled;
        let PageImage::Loaded(bitmap) = &mut self.image else {
            return false;
        };
        if target != scaled || Size::of(&image) != target {
            return false;
        }
        bitmap.display = Some(Arc::new(image));
        bitmap.pending_resize = None;
        bitmap.failed_resize = None;
        true
    }

    /// A failed resize keeps whatever display bitmap is already there and
    /// is not dispatched again while the scaled size stays at `target`.
    pub fn resize_failed(&mut self, target: Size) {
        if let PageImage::Loaded(bitmap) = &mut self.image {
            if bitmap.pending_resize == Some(target) {
                bitmap.pending_resize = None;
            }
            bitmap.failed_resize = Some(target);
        }
    }

    pub fn has_pending_resize(&self) -> bool {
        self.bitmap()
            .map_or(false, |bitmap| bitmap.pending_resize.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(view: Size, fit: FitPolicy) -> ScaleContext {
        ScaleContext {
            view,
            max_width: 1200,
            fit,
            zoom: 1.0,
        }
    }

    #[test]
    fn fit_width_scales_wide_images_down_to_effective_width() {
        let c = ctx(Size::new(1000, 800), FitPolicy::default());
        let (scaled, ratio) = scale_to_fit(Size::new(1500, 2000), &c, 1.0);
        assert_eq!(scaled.width, 1000);
        assert_eq!(scaled.height, 1333);
        assert!((ratio - 1000.0 / 1500.0).abs() < 1e-9);
    }

    #[test]
    fn fit_width_never_upscales_narrow_images() {
        let c = ctx(Size::new(1600, 800), FitPolicy::default());
        let (scaled, ratio) = scale_to_fit(Size::new(600, 900), &c, 1.0);
        assert_eq!(scaled, Size::new(600, 900));
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn max_width_caps_the_view_width() {
        let c = ctx(Size::new(2000, 800), FitPolicy::default());
        let (scaled, _) = scale_to_fit(Size::new(2400, 3000), &c, 1.0);
        assert_eq!(scaled, Size::new(1200, 1500));
    }

    #[test]
    fn upscale_allows_enlarging() {
        let fit = FitPolicy {
            upscale: true,
            ..FitPolicy::default()
        };
        let c = ctx(Size::new(1000, 800), fit);
        let (scaled, ratio) = scale_to_fit(Size::new(500, 700), &c, 1.0);
        assert_eq!(scaled, Size::new(1000, 1400));
        assert_eq!(ratio, 2.0);
    }

    #[test]
    fn more_restrictive_axis_wins_when_both_fit() {
        let fit = FitPolicy {
            fit_width: true,
            fit_height: true,
            upscale: false,
        };
        let c = ctx(Size::new(1000, 700), fit);
        let (scaled, _) = scale_to_fit(Size::new(1000, 1400), &c, 1.0);
        assert_eq!(scaled, Size::new(500, 700));
    }

    #[test]
    fn no_fit_keeps_source_resolution() {
        let fit = FitPolicy {
            fit_width: false,
            fit_height: false,
            upscale: true,
        };
        let c = ctx(Size::new(300, 300), fit);
        let (scaled, ratio) = scale_to_fit(Size::new(1000, 1400), &c, 1.0);
        assert_eq!(scaled, Size::new(1000, 1400));
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn zoom_multiplies_into_the_ratio() {
        let mut c = ctx(Size::new(1000, 800), FitPolicy::default());
        c.zoom = 1.5;
        let (scaled, ratio) = scale_to_fit(Size::new(2000, 1000), &c, 2.0);
        assert_eq!(scaled, Size::new(3000, 1500));
        assert!((ratio - 1.5).abs() < 1e-9);
    }

    #[test]
    fn intrinsic_size_is_fixed_by_first_decode() {
        let mut page = Page::new(0, PageRef::Entry("a.png".into()));
        page.install_decoded(DynamicImage::new_luma8(10, 20));
        page.free();
        page.install_decoded(DynamicImage::new_luma8(30, 40));
        assert_eq!(page.intrinsic_size(), Some(Size::new(10, 20)));
    }

    #[test]
    fn resize_target_is_requested_once_and_accepted_when_current() {
        let c = ctx(Size::new(50, 800), FitPolicy::default());
        let mut page = Page::new(0, PageRef::Entry("a.png".into()));
        page.install_decoded(DynamicImage::new_luma8(100, 200));
        page.compute_scaled_size(&c);
        let (_, target) = page.take_resize_target().expect("resize needed");
        assert_eq!(target, Size::new(50, 100));
        assert!(page.take_resize_target().is_none());
        assert!(!page.install_resized(DynamicImage::new_luma8(60, 120), Size::new(60, 120)));
        assert!(page.install_resized(DynamicImage::new_luma8(50, 100), target));
        assert!(!page.has_pending_resize());
        assert!(page.take_resize_target().is_none());
    }

    #[test]
    fn failed_resize_target_is_not_requested_again() {
        let mut page = Page::new(0, PageRef::Entry("a.png".into()));
        page.install_decoded(DynamicImage::new_luma8(100, 200));
        page.compute_scaled_size(&ctx(Size::new(50, 800), FitPolicy::default()));
        let (_, target) = page.take_resize_target().expect("resize needed");
        page.resize_failed(target);
        assert!(!page.has_pending_resize());
        assert_eq!(page.bitmap().and_then(Bitmap::failed_resize), Some(target));
        assert!(page.take_resize_target().is_none());

        page.compute_scaled_size(&ctx(Size::new(40, 800), FitPolicy::default()));
        let (_, next) = page.take_resize_target().expect("new target");
        assert_eq!(next, Size::new(40, 80));
    }

    #[test]
    fn placeholder_carries_the_page_zoom() {
        let mut page = Page::new(0, PageRef::Entry("a.png".into()));
        page.toggle_zoom(1.5);
        page.set_placeholder(Size::new(1200, 800));
        assert_eq!(page.scaled_size(), Size::new(1800, 1200));
        assert_eq!(page.ratio(), 1.5);
    }

    #[test]
    fn source_of_the_right_size_is_displayed_without_resize() {
        let c = ctx(Size::new(500, 800), FitPolicy::default());
        let mut page = Page::new(0, PageRef::Entry("a.png".into()));
        page.install_decoded(DynamicImage::new_luma8(100, 200));
        page.compute_scaled_size(&c);
        assert!(page.take_resize_target().is_none());
        let display = page.bitmap().and_then(|b| b.display()).map(|d| Size::of(d));
        assert_eq!(display, Some(Size::new(100, 200)));
    }
}
