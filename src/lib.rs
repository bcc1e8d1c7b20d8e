use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub mod error;
pub mod hocr;
pub mod logging;
pub mod overlay;
pub mod pdf;
pub mod settings;

pub use error::OverlayError;
pub use hocr::{BoxReader, BoxRecord, Granularity, HocrSource, PdfRect, ReaderConfig, Rect};
pub use overlay::{ContentSink, OverlayConfig, OverlayPlacer, TextMetrics};
pub use pdf::{ConversionReport, OverlayFont, PdfOptions, build_searchable_pdf};

const FALLBACK_FONT_FAMILIES: &[&str] = &["DejaVu Sans", "Liberation Sans", "Arial", "sans-serif"];

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub hocr: PathBuf,
    pub images: Vec<PathBuf>,
    pub output: PathBuf,
    pub granularity: Option<Granularity>,
    pub max_pixels: Option<u32>,
    pub font_path: Option<PathBuf>,
    pub draw_boxes: bool,
    pub dump_boxes: bool,
    pub settings_path: Option<String>,
}

pub fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(granularity) = config.granularity {
        settings.granularity = granularity;
    }
    if let Some(max_pixels) = config.max_pixels.filter(|value| *value > 0) {
        settings.max_pixels = Some(max_pixels);
    }
    if config.draw_boxes {
        settings.draw_boxes = true;
    }

    let reader = BoxReader::open(&config.hocr, settings.reader_config());
    if config.dump_boxes {
        return dump_boxes(reader);
    }

    if config.images.is_empty() {
        return Err(anyhow!("at least one page image is required"));
    }
    let font_path = config
        .font_path
        .clone()
        .or_else(|| settings.font_path.as_ref().map(PathBuf::from));
    let font = select_font(font_path.as_deref(), settings.font_family.as_deref())?;

    let options = PdfOptions {
        title: settings.title.clone(),
        max_pixels: settings.max_pixels,
        overlay: settings.overlay_config(),
    };
    let (bytes, report) = build_searchable_pdf(&config.images, reader, &options, &font)?;
    fs::write(&config.output, bytes)
        .with_context(|| format!("failed to write output: {}", config.output.display()))?;

    Ok(format_summary(&config.output, &report))
}

/// Picks the embedded text-layer font: a configured file or family, else
/// the first fallback family installed on the system. Builtin Helvetica is
/// the last resort when nothing is configured and nothing resolves.
fn select_font(font_path: Option<&Path>, font_family: Option<&str>) -> Result<OverlayFont> {
    let configured = font_path.is_some() || font_family.is_some();
    match overlay::resolve_overlay_font(font_path, font_family, FALLBACK_FONT_FAMILIES) {
        Ok(resolved) => {
            debug!("overlay: using font family {}", resolved.family);
            Ok(OverlayFont::External(resolved.metrics))
        }
        Err(err) if !configured => {
            warn!(
                "overlay: {}; using builtin Helvetica, characters outside WinAnsi are dropped",
                err
            );
            Ok(OverlayFont::Builtin)
        }
        Err(err) => Err(err.context("failed to resolve overlay font")),
    }
}

#[derive(Serialize)]
struct BoxLine<'a> {
    page: usize,
    granularity: Granularity,
    text: &'a str,
    bbox: Rect,
    pdf: PdfRect,
}

/// Renders each box record as one JSON line.
///
/// Page-scoped errors are logged and skipped; a source read failure is
/// returned.
pub fn dump_boxes<I>(records: I) -> Result<String>
where
    I: Iterator<Item = error::Result<BoxRecord>>,
{
    let mut lines = Vec::new();
    for item in records {
        let record = match item {
            Ok(record) => record,
            Err(err) if err.is_page_scoped() => {
                warn!("hocr: {}", err);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let line = BoxLine {
            page: record.page_index(),
            granularity: record.granularity(),
            text: record.text(),
            bbox: record.box_rect(),
            pdf: record.bottom_left(),
        };
        lines.push(serde_json::to_string(&line).with_context(|| "failed to encode box record")?);
    }
    Ok(lines.join("\n"))
}

fn format_summary(output: &Path, report: &ConversionReport) -> String {
    let mut summary = format!(
        "{}: {} page(s), {} text run(s)",
        output.display(),
        report.pages.len(),
        report.text_runs()
    );
    let failed = report.failed_pages();
    if failed > 0 {
        summary.push_str(&format!(", {} page(s) without text layer", failed));
    }
    if report.unmatched_records > 0 {
        summary.push_str(&format!(
            ", {} box(es) without a page image",
            report.unmatched_records
        ));
    }
    summary
}
