use serde::Serialize;
use std::iter::Peekable;
use tracing::{debug, warn};

use super::font::TextMetrics;
use super::sink::{ContentSink, RenderMode};
use crate::error::{OverlayError, Result};
use crate::hocr::{BoxRecord, Rect};

pub const NOMINAL_FONT_SIZE: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayConfig {
    /// Size the reference width is measured at before scaling to the box.
    pub nominal_font_size: f32,
    /// How far a scale factor may drift from 1.0 before it is reported.
    pub scale_tolerance: f32,
    /// Stroke every box outline in addition to the invisible text.
    pub draw_boxes: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            nominal_font_size: NOMINAL_FONT_SIZE,
            scale_tolerance: 0.01,
            draw_boxes: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Ratio of image pixels to hOCR page units, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageScale {
    pub width: f32,
    pub height: f32,
}

impl PageScale {
    pub const IDENTITY: PageScale = PageScale {
        width: 1.0,
        height: 1.0,
    };

    pub fn between(page_index: usize, page_rect: Rect, image: ImageSize) -> Result<Self> {
        if page_rect.is_empty() {
            return Err(OverlayError::DegenerateGeometry {
                page: page_index,
                rect: page_rect,
            });
        }
        Ok(Self {
            width: image.width as f32 / page_rect.width() as f32,
            height: image.height as f32 / page_rect.height() as f32,
        })
    }

    pub fn is_identity_within(&self, tolerance: f32) -> bool {
        (self.width - 1.0).abs() <= tolerance && (self.height - 1.0).abs() <= tolerance
    }
}

/// Where and how large one box's invisible text is drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPlacement {
    pub text: String,
    pub font_size: f32,
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
    pub baseline: f32,
}

/// Outcome of overlaying one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageOverlay {
    pub page_index: usize,
    pub scale: Option<PageScale>,
    /// The scale drifted from 1.0 by more than the configured tolerance.
    pub scale_mismatch: bool,
    pub placed: usize,
    pub skipped: usize,
}

pub struct OverlayPlacer<'m, M: TextMetrics + ?Sized> {
    config: OverlayConfig,
    metrics: &'m M,
}

impl<'m, M: TextMetrics + ?Sized> OverlayPlacer<'m, M> {
    pub fn new(config: OverlayConfig, metrics: &'m M) -> Self {
        Self { config, metrics }
    }

    /// Fits one box. `None` when the box has no area or its text no width.
    pub fn place(&self, record: &BoxRecord, scale: PageScale) -> Option<TextPlacement> {
        if record.box_rect().is_empty() {
            return None;
        }
        let bottom = record.bottom_left();
        let llx = bottom.llx as f32 * scale.width;
        let lly = bottom.lly as f32 * scale.height;
        let urx = bottom.urx as f32 * scale.width;
        let ury = bottom.ury as f32 * scale.height;
        let width = urx - llx;
        let height = ury - lly;
        if width <= 0.0 || height <= 0.0 {
            return None;
        }

        let nominal = self.config.nominal_font_size;
        let text = record.text();
        let reference = self.metrics.text_width(text, nominal);
        if !(reference.is_finite() && reference > 0.0) {
            return None;
        }
        let font_size = nominal * width / reference;
        let ascent = self.metrics.ascent(text, font_size);
        let descent = self.metrics.descent(text, font_size);
        let baseline = lly + (height - (ascent + descent)) / 2.0;

        Some(TextPlacement {
            text: text.to_string(),
            font_size,
            llx,
            lly,
            urx,
            ury,
            baseline,
        })
    }

    /// Overlays the records of `page_index` onto `sink`.
    ///
    /// Consumes records while they belong to the page and stops, without
    /// consuming, at the first one that does not. The scale is fixed by the
    /// page's first record. Nothing reaches the sink unless the whole page
    /// succeeds; on a page-scoped error the page's remaining records are
    /// discarded so the stream is positioned at the next page.
    pub fn place_page<I, S>(
        &self,
        page_index: usize,
        image: ImageSize,
        records: &mut Peekable<I>,
        sink: &mut S,
    ) -> Result<PageOverlay>
    where
        I: Iterator<Item = Result<BoxRecord>>,
        S: ContentSink + ?Sized,
    {
        let mut scale = None;
        let mut scale_mismatch = false;
        let mut placements = Vec::new();
        let mut skipped = 0usize;

        loop {
            let take = match records.peek() {
                None => false,
                Some(Ok(record)) => record.page_index() == page_index,
                Some(Err(err)) => err.page().is_none_or(|page| page == page_index),
            };
            if !take {
                break;
            }
            let record = match records.next() {
                Some(Ok(record)) => record,
                Some(Err(err)) => return Err(err),
                None => break,
            };

            let page_scale = match scale {
                Some(page_scale) => page_scale,
                None => {
                    let page_scale = PageScale::between(page_index, record.page_rect(), image)
                        .inspect_err(|_| discard_page(records, page_index))?;
                    scale_mismatch = !page_scale.is_identity_within(self.config.scale_tolerance);
                    if scale_mismatch {
                        warn!(
                            "overlay: page {} image is {}x{} px but hOCR page is {}x{}; scaling by {:.3}x{:.3}",
                            page_index,
                            image.width,
                            image.height,
                            record.page_width(),
                            record.page_height(),
                            page_scale.width,
                            page_scale.height
                        );
                    }
                    scale = Some(page_scale);
                    page_scale
                }
            };

            match self.place(&record, page_scale) {
                Some(placement) => placements.push(placement),
                None => {
                    debug!(
                        "overlay: page {} skipped box {} ({:?})",
                        page_index,
                        record.box_rect(),
                        record.text()
                    );
                    skipped += 1;
                }
            }
        }

        for placement in &placements {
            emit(sink, placement, self.config.draw_boxes);
        }
        debug!(
            "overlay: page {} placed {} text run(s), skipped {}",
            page_index,
            placements.len(),
            skipped
        );

        Ok(PageOverlay {
            page_index,
            scale,
            scale_mismatch,
            placed: placements.len(),
            skipped,
        })
    }
}

/// Drops records and page-scoped errors that belong to pages before
/// `page_index`, e.g. leftovers of a page whose image was missing.
pub fn skip_to_page<I>(records: &mut Peekable<I>, page_index: usize) -> usize
where
    I: Iterator<Item = Result<BoxRecord>>,
{
    let mut dropped = 0;
    while records
        .next_if(|item| match item {
            Ok(record) => record.page_index() < page_index,
            Err(err) => err.page().is_some_and(|page| page < page_index),
        })
        .is_some()
    {
        dropped += 1;
    }
    dropped
}

fn discard_page<I>(records: &mut Peekable<I>, page_index: usize)
where
    I: Iterator<Item = Result<BoxRecord>>,
{
    while records
        .next_if(|item| match item {
            Ok(record) => record.page_index() == page_index,
            Err(err) => err.page() == Some(page_index),
        })
        .is_some()
    {}
}

fn emit<S: ContentSink + ?Sized>(sink: &mut S, placement: &TextPlacement, draw_boxes: bool) {
    if draw_boxes {
        sink.stroke_rect(placement.llx, placement.lly, placement.urx, placement.ury);
    }
    sink.set_font(placement.font_size);
    sink.begin_text();
    sink.set_render_mode(RenderMode::Invisible);
    sink.move_text(placement.llx, placement.baseline);
    sink.show_text(&placement.text);
    sink.end_text();
}
