use anyhow::{anyhow, Context, Result};
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocument,
    PdfLayerReference, Point, Pt, Rgb, TextRenderingMode,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::OverlayError;
use crate::hocr::BoxRecord;
use crate::overlay::{
    ContentSink, FontMetrics, HelveticaMetrics, ImageSize, OverlayConfig, OverlayPlacer,
    PageOverlay, RenderMode, TextMetrics, skip_to_page,
};

/// Font used for the invisible text layer.
pub enum OverlayFont {
    /// PDF builtin Helvetica, measured with [`HelveticaMetrics`].
    Builtin,
    /// A TrueType/OpenType face, embedded in the output.
    External(FontMetrics),
}

impl OverlayFont {
    pub fn metrics(&self) -> &dyn TextMetrics {
        match self {
            OverlayFont::Builtin => &HelveticaMetrics,
            OverlayFont::External(metrics) => metrics,
        }
    }
}

pub struct PdfOptions {
    pub title: String,
    /// Caps the page width; the page keeps the aspect ratio of the
    /// largest image size.
    pub max_pixels: Option<u32>,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page_index: usize,
    pub image: PathBuf,
    pub overlay: Option<PageOverlay>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    pub pages: Vec<PageReport>,
    /// Box records left over for hOCR pages that had no image.
    pub unmatched_records: usize,
}

impl ConversionReport {
    pub fn text_runs(&self) -> usize {
        self.pages
            .iter()
            .filter_map(|page| page.overlay.as_ref())
            .map(|overlay| overlay.placed)
            .sum()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|page| page.error.is_some()).count()
    }
}

/// Pixel size of an image, read from its header.
pub fn image_dimensions(path: &Path) -> Result<ImageSize> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("failed to read image size: {}", path.display()))?;
    Ok(ImageSize::new(width, height))
}

/// Size shared by every output page, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// The largest image width and height, shrunk proportionally when the
    /// width reaches `max_pixels`.
    pub fn for_images(sizes: &[ImageSize], max_pixels: Option<u32>) -> Self {
        let width = sizes.iter().map(|size| size.width).max().unwrap_or(0) as f32;
        let height = sizes.iter().map(|size| size.height).max().unwrap_or(0) as f32;
        match max_pixels {
            Some(limit) if limit > 0 && width >= limit as f32 => Self {
                width: limit as f32,
                height: height * limit as f32 / width,
            },
            _ => Self { width, height },
        }
    }

    /// Scales `image` to fit the page, keeping its aspect ratio, with its
    /// top-left corner on the page's top-left corner.
    pub fn fit(&self, image: ImageSize) -> ImageFit {
        let scale = (self.width / image.width as f32).min(self.height / image.height as f32);
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        ImageFit {
            scale,
            offset_x: 0.0,
            offset_y: self.height - image.height as f32 * scale,
        }
    }

    fn mm(&self) -> (Mm, Mm) {
        (Mm::from(Pt(self.width)), Mm::from(Pt(self.height)))
    }
}

/// Maps image pixels (bottom-left origin) to page points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageFit {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ImageFit {
    fn x(&self, value: f32) -> Mm {
        Mm::from(Pt(self.offset_x + value * self.scale))
    }

    fn y(&self, value: f32) -> Mm {
        Mm::from(Pt(self.offset_y + value * self.scale))
    }
}

/// Builds a PDF with one page per image and an invisible text layer from
/// `records` on each page. Image `i` is paired with hOCR page `i`.
///
/// Page-scoped overlay failures are logged and leave the page image-only;
/// a source read failure aborts the conversion.
pub fn build_searchable_pdf<I>(
    images: &[PathBuf],
    records: I,
    options: &PdfOptions,
    font: &OverlayFont,
) -> Result<(Vec<u8>, ConversionReport)>
where
    I: Iterator<Item = crate::error::Result<BoxRecord>>,
{
    if images.is_empty() {
        return Err(anyhow!("no images to convert"));
    }
    let sizes = images
        .iter()
        .map(|path| image_dimensions(path))
        .collect::<Result<Vec<_>>>()?;
    let page_size = PageSize::for_images(&sizes, options.max_pixels);
    info!(
        "pdf: {} page(s) of {}x{} pt",
        sizes.len(),
        page_size.width,
        page_size.height
    );

    let (first_w, first_h) = page_size.mm();
    let (doc, first_page, first_layer) =
        PdfDocument::new(options.title.as_str(), first_w, first_h, "Layer 1");
    let font_ref = match font {
        OverlayFont::Builtin => doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|err| anyhow!("failed to add builtin font: {}", err))?,
        OverlayFont::External(metrics) => doc
            .add_external_font(metrics.data())
            .map_err(|err| anyhow!("failed to embed overlay font: {}", err))?,
    };

    let placer = OverlayPlacer::new(options.overlay, font.metrics());
    let mut records = records.peekable();
    let mut report = ConversionReport::default();

    for (index, (path, size)) in images.iter().zip(sizes.iter().copied()).enumerate() {
        let (page, layer) = if index == 0 {
            (first_page, first_layer)
        } else {
            let (width, height) = page_size.mm();
            doc.add_page(width, height, format!("Layer {}", index + 1))
        };
        let layer = doc.get_page(page).get_layer(layer);
        let fit = page_size.fit(size);
        add_page_image(&layer, path, fit)?;

        let dropped = skip_to_page(&mut records, index);
        if dropped > 0 {
            warn!("pdf: dropped {} stale record(s) before page {}", dropped, index);
        }

        let mut sink = PdfLayerSink::new(layer, font_ref.clone(), fit);
        let outcome = placer.place_page(index, size, &mut records, &mut sink);
        let page_report = match outcome {
            Ok(overlay) => PageReport {
                page_index: index,
                image: path.clone(),
                overlay: Some(overlay),
                error: None,
            },
            Err(err) if err.is_page_scoped() => {
                warn!("pdf: page {} has no text layer: {}", index, err);
                PageReport {
                    page_index: index,
                    image: path.clone(),
                    overlay: None,
                    error: Some(err.to_string()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        report.pages.push(page_report);
    }

    for item in records {
        match item {
            Ok(_) => report.unmatched_records += 1,
            Err(err @ OverlayError::SourceRead { .. }) => return Err(err.into()),
            Err(_) => {}
        }
    }
    if report.unmatched_records > 0 {
        warn!(
            "pdf: {} box record(s) belong to hOCR pages without an image",
            report.unmatched_records
        );
    }

    let mut buffer = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut buffer);
        doc.save(&mut writer).with_context(|| "failed to write pdf")?;
    }
    Ok((buffer, report))
}

fn add_page_image(layer: &PdfLayerReference, path: &Path, fit: ImageFit) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("failed to read image: {}", path.display()))?;
    let image = printpdf::image_crate::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode image: {}", path.display()))?;
    let pdf_image = Image::from_dynamic_image(&image);
    // At 72 dpi one image pixel is one point.
    let transform = ImageTransform {
        translate_x: Some(fit.x(0.0)),
        translate_y: Some(fit.y(0.0)),
        rotate: None,
        scale_x: Some(fit.scale),
        scale_y: Some(fit.scale),
        dpi: Some(72.0),
    };
    pdf_image.add_to_layer(layer.clone(), transform);
    Ok(())
}

/// [`ContentSink`] writing into a `printpdf` layer.
///
/// Incoming coordinates are image pixels; `fit` maps them onto the page.
pub struct PdfLayerSink {
    layer: PdfLayerReference,
    font: IndirectFontRef,
    fit: ImageFit,
}

impl PdfLayerSink {
    pub fn new(layer: PdfLayerReference, font: IndirectFontRef, fit: ImageFit) -> Self {
        Self { layer, font, fit }
    }

    fn point(&self, x: f32, y: f32) -> (Point, bool) {
        (Point::new(self.fit.x(x), self.fit.y(y)), false)
    }
}

impl ContentSink for PdfLayerSink {
    fn stroke_rect(&mut self, llx: f32, lly: f32, urx: f32, ury: f32) {
        self.layer
            .set_outline_color(Color::Rgb(Rgb::new(0.85, 0.1, 0.1, None)));
        self.layer.set_outline_thickness(0.5);
        let line = Line {
            points: vec![
                self.point(llx, lly),
                self.point(urx, lly),
                self.point(urx, ury),
                self.point(llx, ury),
            ],
            is_closed: true,
        };
        self.layer.add_line(line);
    }

    fn set_font(&mut self, size: f32) {
        self.layer.set_font(&self.font, size * self.fit.scale);
    }

    fn begin_text(&mut self) {
        self.layer.begin_text_section();
    }

    fn set_render_mode(&mut self, mode: RenderMode) {
        let mode = match mode {
            RenderMode::Invisible => TextRenderingMode::Invisible,
        };
        self.layer.set_text_rendering_mode(mode);
    }

    fn move_text(&mut self, x: f32, y: f32) {
        self.layer.set_text_cursor(self.fit.x(x), self.fit.y(y));
    }

    fn show_text(&mut self, text: &str) {
        self.layer.write_text(text, &self.font);
    }

    fn end_text(&mut self) {
        self.layer.end_text_section();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hocr::{BoxReader, ReaderConfig};
    use tempfile::tempdir;

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([250, 250, 250]))
            .save(path)
            .expect("write png");
    }

    fn options() -> PdfOptions {
        PdfOptions {
            title: "test".to_string(),
            max_pixels: None,
            overlay: OverlayConfig::default(),
        }
    }

    #[test]
    fn page_size_is_largest_image_capped_at_max_pixels() {
        let sizes = [ImageSize::new(1200, 1600), ImageSize::new(4000, 3000)];
        let uncapped = PageSize {
            width: 4000.0,
            height: 3000.0,
        };
        assert_eq!(PageSize::for_images(&sizes, None), uncapped);
        assert_eq!(PageSize::for_images(&sizes, Some(5000)), uncapped);
        assert_eq!(
            PageSize::for_images(&sizes, Some(2000)),
            PageSize {
                width: 2000.0,
                height: 1500.0,
            }
        );
    }

    #[test]
    fn images_fit_inside_the_page_from_the_top() {
        let page = PageSize {
            width: 2000.0,
            height: 1500.0,
        };
        let wide = page.fit(ImageSize::new(4000, 3000));
        assert_eq!((wide.scale, wide.offset_x, wide.offset_y), (0.5, 0.0, 0.0));
        let tall = page.fit(ImageSize::new(1200, 1600));
        assert_eq!((tall.scale, tall.offset_y), (0.9375, 0.0));
        let small = page.fit(ImageSize::new(1000, 500));
        assert_eq!((small.scale, small.offset_y), (2.0, 500.0));
        assert_eq!(page.fit(ImageSize::new(0, 0)).scale, 1.0);
    }

    #[test]
    fn reads_image_dimensions() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("page.png");
        write_png(&path, 40, 30);
        assert_eq!(image_dimensions(&path).expect("size"), ImageSize::new(40, 30));
    }

    #[test]
    fn builds_pdf_with_text_layer() {
        let dir = tempdir().expect("tempdir");
        let image = dir.path().join("page.png");
        write_png(&image, 200, 100);
        let markup = r#"<div class="ocr_page" title="bbox 0 0 200 100">
  <span class="ocrx_word" title="bbox 10 10 90 40">Hello</span>
  <span class="ocrx_word" title="bbox 5 5 5 5"></span>
</div>"#;
        let reader = BoxReader::from_markup(markup, ReaderConfig::default());

        let (pdf, report) =
            build_searchable_pdf(&[image], reader, &options(), &OverlayFont::Builtin)
                .expect("pdf");
        assert!(pdf.starts_with(b"%PDF"));
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.text_runs(), 1);
        assert_eq!(report.pages[0].overlay.as_ref().map(|o| o.skipped), Some(1));
        assert_eq!(report.failed_pages(), 0);
    }

    #[test]
    fn malformed_page_keeps_image_and_continues() {
        let dir = tempdir().expect("tempdir");
        let first = dir.path().join("p1.png");
        let second = dir.path().join("p2.png");
        write_png(&first, 100, 100);
        write_png(&second, 100, 100);
        let markup = r#"
<div class="ocr_page" title="image p1.png">
  <span class="ocrx_word" title="bbox 10 10 90 40">lost</span>
</div>
<div class="ocr_page" title="bbox 0 0 100 100">
  <span class="ocrx_word" title="bbox 10 10 90 40">kept</span>
</div>"#;
        let reader = BoxReader::from_markup(markup, ReaderConfig::default());

        let (_, report) =
            build_searchable_pdf(&[first, second], reader, &options(), &OverlayFont::Builtin)
                .expect("pdf");
        assert_eq!(report.failed_pages(), 1);
        assert!(report.pages[0].error.is_some());
        assert_eq!(report.pages[1].overlay.as_ref().map(|o| o.placed), Some(1));
    }

    #[test]
    fn extra_hocr_pages_are_counted() {
        let dir = tempdir().expect("tempdir");
        let image = dir.path().join("p1.png");
        write_png(&image, 100, 100);
        let markup = r#"
<div class="ocr_page" title="bbox 0 0 100 100">
  <span class="ocrx_word" title="bbox 10 10 90 40">one</span>
</div>
<div class="ocr_page" title="bbox 0 0 100 100">
  <span class="ocrx_word" title="bbox 10 10 40 40">two</span>
  <span class="ocrx_word" title="bbox 50 10 90 40">three</span>
</div>"#;
        let reader = BoxReader::from_markup(markup, ReaderConfig::default());
        let (_, report) = build_searchable_pdf(&[image], reader, &options(), &OverlayFont::Builtin)
            .expect("pdf");
        assert_eq!(report.unmatched_records, 2);
    }

    #[test]
    fn unreadable_hocr_aborts_conversion() {
        let dir = tempdir().expect("tempdir");
        let image = dir.path().join("p1.png");
        write_png(&image, 100, 100);
        let reader = BoxReader::open(dir.path().join("missing.hocr"), ReaderConfig::default());
        let err = build_searchable_pdf(&[image], reader, &options(), &OverlayFont::Builtin)
            .err()
            .expect("error");
        assert!(err.to_string().contains("failed to read hOCR source"));
    }

    #[test]
    fn rejects_empty_image_list() {
        let reader = BoxReader::from_markup("", ReaderConfig::default());
        assert!(build_searchable_pdf(&[], reader, &options(), &OverlayFont::Builtin).is_err());
    }
}
