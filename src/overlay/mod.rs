mod font;
mod placer;
mod sink;

pub use font::{
    FontMetrics, HelveticaMetrics, ResolvedOverlayFont, TextMetrics, load_font_metrics,
    resolve_overlay_font,
};
pub use placer::{
    ImageSize, NOMINAL_FONT_SIZE, OverlayConfig, OverlayPlacer, PageOverlay, PageScale,
    TextPlacement, skip_to_page,
};
pub use sink::{ContentSink, DrawOp, RecordingSink, RenderMode};
