use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Integer rectangle `(x1, y1, x2, y2)` with a top-left origin, as written in hOCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Rectangle with a bottom-left origin, the convention of PDF page space.
///
/// Values are signed: a box that pokes out of its page maps below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PdfRect {
    pub llx: i64,
    pub lly: i64,
    pub urx: i64,
    pub ury: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Word,
    Line,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "word" | "words" => Ok(Granularity::Word),
            "line" | "lines" => Ok(Granularity::Line),
            other => Err(format!("unknown granularity: {} (expected word or line)", other)),
        }
    }
}

/// One recognised word or line, normalised against its page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxRecord {
    page_index: usize,
    page_rect: Rect,
    text: String,
    box_rect: Rect,
    granularity: Granularity,
}

impl BoxRecord {
    pub fn new(
        page_index: usize,
        page_rect: Rect,
        text: impl Into<String>,
        box_rect: Rect,
        granularity: Granularity,
    ) -> Self {
        Self {
            page_index,
            page_rect,
            text: text.into(),
            box_rect,
            granularity,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Zero-based page ordinal.
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_rect(&self) -> Rect {
        self.page_rect
    }

    /// Box rectangle, top-left origin.
    pub fn box_rect(&self) -> Rect {
        self.box_rect
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn page_width(&self) -> u32 {
        self.page_rect.width()
    }

    pub fn page_height(&self) -> u32 {
        self.page_rect.height()
    }

    /// The box rectangle flipped into bottom-left origin page space:
    /// `(x1, H - y2, x2, H - y1)` where `H` is the page height.
    pub fn bottom_left(&self) -> PdfRect {
        let page_height = i64::from(self.page_height());
        let Rect { x1, y1, x2, y2 } = self.box_rect;
        PdfRect {
            llx: i64::from(x1),
            lly: page_height - i64::from(y2),
            urx: i64::from(x2),
            ury: page_height - i64::from(y1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(page: Rect, bbox: Rect) -> BoxRecord {
        BoxRecord::new(0, page, "word", bbox, Granularity::Word)
    }

    #[test]
    fn bottom_left_flips_y_axis() {
        let rec = record(Rect::new(0, 0, 1000, 1500), Rect::new(100, 100, 300, 130));
        assert_eq!(
            rec.bottom_left(),
            PdfRect {
                llx: 100,
                lly: 1370,
                urx: 300,
                ury: 1400
            }
        );
    }

    #[test]
    fn bottom_left_inverts_back_to_top_left() {
        let (w, h) = (640u32, 480u32);
        let page = Rect::new(0, 0, w, h);
        for (a, b, c, d) in [(0, 0, 0, 0), (0, 0, w, h), (10, 20, 30, 40), (639, 1, 640, 479)] {
            let bbox = Rect::new(a, b, c, d);
            let flipped = record(page, bbox).bottom_left();
            let back = Rect::new(
                flipped.llx as u32,
                (i64::from(h) - flipped.ury) as u32,
                flipped.urx as u32,
                (i64::from(h) - flipped.lly) as u32,
            );
            assert_eq!(back, bbox);
        }
    }

    #[test]
    fn bottom_left_is_stable_across_calls() {
        let rec = record(Rect::new(0, 0, 200, 100), Rect::new(5, 10, 50, 20));
        assert_eq!(rec.bottom_left(), rec.bottom_left());
        assert_eq!(rec.box_rect(), Rect::new(5, 10, 50, 20));
    }

    #[test]
    fn page_height_accounts_for_offset_origin() {
        let rec = record(Rect::new(0, 100, 200, 400), Rect::new(0, 150, 10, 160));
        assert_eq!(rec.page_height(), 300);
        assert_eq!(rec.bottom_left().lly, 140);
    }

    #[test]
    fn zero_area_rect_is_empty() {
        assert!(Rect::new(5, 5, 5, 5).is_empty());
        assert!(Rect::new(5, 5, 9, 5).is_empty());
        assert!(!Rect::new(5, 5, 9, 6).is_empty());
    }

    #[test]
    fn granularity_parses_from_cli_values() {
        assert_eq!("LINE".parse::<Granularity>(), Ok(Granularity::Line));
        assert_eq!("words".parse::<Granularity>(), Ok(Granularity::Word));
        assert!("glyph".parse::<Granularity>().is_err());
    }
}
