use serde::Serialize;

/// Text rendering modes the overlay uses (PDF `Tr` operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderMode {
    Invisible,
}

/// Content-stream primitives the overlay draws with.
///
/// Coordinates are in the page image's pixel space with a bottom-left
/// origin; the implementation maps them onto its own page units.
pub trait ContentSink {
    fn stroke_rect(&mut self, llx: f32, lly: f32, urx: f32, ury: f32);
    fn set_font(&mut self, size: f32);
    fn begin_text(&mut self);
    fn set_render_mode(&mut self, mode: RenderMode);
    fn move_text(&mut self, x: f32, y: f32);
    fn show_text(&mut self, text: &str);
    fn end_text(&mut self);
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    StrokeRect { llx: f32, lly: f32, urx: f32, ury: f32 },
    SetFont { size: f32 },
    BeginText,
    SetRenderMode { mode: RenderMode },
    MoveText { x: f32, y: f32 },
    ShowText { text: String },
    EndText,
}

/// Sink that keeps every call, for dry runs and inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    ops: Vec<DrawOp>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Number of text runs shown.
    pub fn text_runs(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DrawOp::ShowText { .. }))
            .count()
    }
}

impl ContentSink for RecordingSink {
    fn stroke_rect(&mut self, llx: f32, lly: f32, urx: f32, ury: f32) {
        self.ops.push(DrawOp::StrokeRect { llx, lly, urx, ury });
    }

    fn set_font(&mut self, size: f32) {
        self.ops.push(DrawOp::SetFont { size });
    }

    fn begin_text(&mut self) {
        self.ops.push(DrawOp::BeginText);
    }

    fn set_render_mode(&mut self, mode: RenderMode) {
        self.ops.push(DrawOp::SetRenderMode { mode });
    }

    fn move_text(&mut self, x: f32, y: f32) {
        self.ops.push(DrawOp::MoveText { x, y });
    }

    fn show_text(&mut self, text: &str) {
        self.ops.push(DrawOp::ShowText {
            text: text.to_string(),
        });
    }

    fn end_text(&mut self) {
        self.ops.push(DrawOp::EndText);
    }
}
