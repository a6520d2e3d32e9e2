use crate::page::Size;

/// Vertical slice of the scroll extent currently shown by the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub top: f64,
    pub bottom: f64,
}

impl Band {
    pub fn new(top: f64, height: u32) -> Self {
        Self {
            top,
            bottom: top + height as f64,
        }
    }

    /// Strict overlap: a page that only touches the band edge is not in view.
    pub fn intersects(&self, top: u64, bottom: u64) -> bool {
        (bottom as f64).min(self.bottom) > (top as f64).max(self.top)
    }
}

/// Topmost visible page and the fraction of it scrolled past. When the
/// band top sits in the spacing above the page, `fraction` is 0 and `gap`
/// holds the distance from the band top down to the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub index: usize,
    pub fraction: f64,
    pub gap: f64,
}

/// Position of every page in the virtual scroll extent.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    start: Vec<u64>,
    end: Vec<u64>,
    x: Vec<i64>,
    extent_width: u32,
    extent_height: u64,
}

impl Layout {
    /// Single top-to-bottom sweep. Each page is centred horizontally in
    /// `view_width` and separated from the next by `spacing`.
    pub fn build<I>(sizes: I, view_width: u32, spacing: u32) -> Self
    where
        I: IntoIterator<Item = Size>,
    {
        let sizes = sizes.into_iter();
        let (lower, _) = sizes.size_hint();
        let mut layout = Self {
            start: Vec::with_capacity(lower),
            end: Vec::with_capacity(lower),
            x: Vec::with_capacity(lower),
            extent_width: view_width,
            extent_height: 0,
        };
        let mut y = 0u64;
        for size in sizes {
            let bottom = y + size.height as u64;
            layout.start.push(y);
            layout.end.push(bottom);
            layout
                .x
                .push((view_width as i64 - size.width as i64) / 2);
            layout.extent_width = layout.extent_width.max(size.width);
            layout.extent_height = bottom;
            y = bottom + spacing as u64;
        }
        layout
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    pub fn starts(&self) -> &[u64] {
        &self.start
    }

    pub fn ends(&self) -> &[u64] {
        &self.end
    }

    pub fn start(&self, index: usize) -> Option<u64> {
        self.start.get(index).copied()
    }

    pub fn end(&self, index: usize) -> Option<u64> {
        self.end.get(index).copied()
    }

    pub fn x(&self, index: usize) -> Option<i64> {
        self.x.get(index).copied()
    }

    pub fn height(&self, index: usize) -> Option<u64> {
        Some(self.end(index)? - self.start(index)?)
    }

    pub fn extent_width(&self) -> u32 {
        self.extent_width
    }

    pub fn extent_height(&self) -> u64 {
        self.extent_height
    }

    pub fn max_scroll(&self, viewport_height: u32) -> f64 {
        self.extent_height.saturating_sub(viewport_height as u64) as f64
    }

    pub fn in_view(&self, index: usize, band: Band) -> bool {
        match (self.start(index), self.end(index)) {
            (Some(top), Some(bottom)) => band.intersects(top, bottom),
            _ => false,
        }
    }

    /// First page in view and how far the band top has moved into it.
    pub fn anchor_for(&self, band: Band) -> Option<Anchor> {
        let index = (0..self.len()).find(|&i| self.in_view(i, band))?;
        let top = self.start(index)? as f64;
        Some(Anchor {
            index,
            fraction: self.fraction_at(index, band.top),
            gap: (top - band.top).max(0.0),
        })
    }

    pub fn fraction_at(&self, index: usize, offset: f64) -> f64 {
        let (Some(top), Some(height)) = (self.start(index), self.height(index)) else {
            return 0.0;
        };
        if height == 0 {
            return 0.0;
        }
        ((offset - top as f64) / height as f64).clamp(0.0, 1.0)
    }

    /// Absolute offset that puts `anchor` back where it was.
    pub fn offset_for(&self, anchor: Anchor) -> Option<f64> {
        let top = self.start(anchor.index)? as f64;
        let height = self.height(anchor.index)? as f64;
        Some(top + anchor.fraction * height - anchor.gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_pages() -> Layout {
        Layout::build(vec![Size::new(1000, 1400); 5], 1200, 20)
    }

    #[test]
    fn starts_follow_heights_and_spacing() {
        let layout = five_pages();
        assert_eq!(layout.starts(), &[0, 1420, 2840, 4260, 5680]);
        for i in 0..layout.len() {
            assert_eq!(layout.height(i), Some(1400));
        }
        assert_eq!(layout.extent_height(), 7080);
        assert_eq!(layout.x(0), Some(100));
    }

    #[test]
    fn touching_the_band_edge_is_not_in_view() {
        let layout = five_pages();
        let band = Band::new(1400.0, 20);
        assert!(!layout.in_view(0, band));
        assert!(!layout.in_view(1, band));
        assert!(layout.in_view(1, Band::new(1401.0, 20)));
    }

    #[test]
    fn anchor_reports_fraction_scrolled_past() {
        let layout = five_pages();
        let anchor = layout.anchor_for(Band::new(1450.0, 800)).expect("anchor");
        assert_eq!(anchor.index, 1);
        assert!((anchor.fraction - 30.0 / 1400.0).abs() < 1e-9);
        assert_eq!(layout.offset_for(anchor), Some(1450.0));
    }

    #[test]
    fn anchor_in_the_spacing_keeps_its_distance() {
        let layout = five_pages();
        let anchor = layout.anchor_for(Band::new(1410.0, 800)).expect("anchor");
        assert_eq!(anchor.index, 1);
        assert_eq!(anchor.fraction, 0.0);
        assert_eq!(anchor.gap, 10.0);

        let taller = Layout::build(
            [Size::new(1000, 1500), Size::new(1000, 1400), Size::new(1000, 1400)],
            1200,
            20,
        );
        assert_eq!(taller.offset_for(anchor), Some(1510.0));
    }

    #[test]
    fn wide_pages_widen_the_extent() {
        let layout = Layout::build([Size::new(400, 10), Size::new(900, 10)], 500, 0);
        assert_eq!(layout.extent_width(), 900);
        assert_eq!(layout.x(1), Some(-200));
        assert_eq!(layout.max_scroll(30), 0.0);
    }
}
