use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

/// Text measurement needed to fit a string into a box.
///
/// All values are in the same unit as `font_size`. `descent` is signed and
/// negative below the baseline.
pub trait TextMetrics {
    fn text_width(&self, text: &str, font_size: f32) -> f32;
    fn ascent(&self, text: &str, font_size: f32) -> f32;
    fn descent(&self, text: &str, font_size: f32) -> f32;
}

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, self.face_index).ok()
    }

    fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em.max(1) as f32
    }

    /// Highest and lowest glyph extents of `text`, in font units.
    /// Starts from zero, so the result always brackets the baseline.
    fn vertical_extent(&self, text: &str) -> (i16, i16) {
        let Some(face) = self.face() else {
            return (0, 0);
        };
        let mut top = 0i16;
        let mut bottom = 0i16;
        for ch in text.chars() {
            let Some(bbox) = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_bounding_box(glyph))
            else {
                continue;
            };
            top = top.max(bbox.y_max);
            bottom = bottom.min(bbox.y_min);
        }
        (top, bottom)
    }
}

impl TextMetrics for FontMetrics {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let Some(face) = self.face() else {
            return HelveticaMetrics.text_width(text, font_size);
        };
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            if ch == ' ' {
                advance = advance.saturating_add(self.space_advance as u32);
                continue;
            }
            if let Some(glyph) = face.glyph_index(ch) {
                let glyph_advance = face.glyph_hor_advance(glyph).unwrap_or(self.space_advance);
                advance = advance.saturating_add(glyph_advance as u32);
            } else {
                advance = advance.saturating_add(self.space_advance as u32);
            }
        }
        advance as f32 * self.scale(font_size)
    }

    fn ascent(&self, text: &str, font_size: f32) -> f32 {
        self.vertical_extent(text).0 as f32 * self.scale(font_size)
    }

    fn descent(&self, text: &str, font_size: f32) -> f32 {
        self.vertical_extent(text).1 as f32 * self.scale(font_size)
    }
}

/// Metrics for the builtin Helvetica face, the last resort when no system
/// font resolves.
///
/// Widths come from the Helvetica AFM, ascent and descent are its
/// ascender/descender (718 / -207 per 1000 units). Characters outside
/// printable ASCII are measured at the average advance; the builtin font
/// cannot show most of them anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelveticaMetrics;

const HELVETICA_ASCENT: f32 = 0.718;
const HELVETICA_DESCENT: f32 = -0.207;
const HELVETICA_DEFAULT_WIDTH: u32 = 556;

// Advances for U+0020..=U+007E, in 1/1000 em.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    278, 278, 584, 584, 584, 556, 1015,
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    278, 278, 278, 469, 556, 333,
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833,
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500,
    334, 260, 334, 584,
];

fn helvetica_advance(ch: char) -> u32 {
    match ch {
        ' '..='~' => HELVETICA_WIDTHS[ch as usize - 0x20] as u32,
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

impl TextMetrics for HelveticaMetrics {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let units: u32 = text
            .chars()
            .filter(|ch| *ch != '\n')
            .map(helvetica_advance)
            .sum();
        units as f32 * font_size / 1000.0
    }

    fn ascent(&self, text: &str, font_size: f32) -> f32 {
        if text.trim().is_empty() {
            0.0
        } else {
            HELVETICA_ASCENT * font_size
        }
    }

    fn descent(&self, text: &str, font_size: f32) -> f32 {
        if text.trim().is_empty() {
            0.0
        } else {
            HELVETICA_DESCENT * font_size
        }
    }
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(&data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

pub struct ResolvedOverlayFont {
    pub metrics: FontMetrics,
    pub family: String,
}

/// Finds the font for the text layer: an explicit file wins, then a named
/// family from the system font database, then the first fallback family
/// that resolves.
pub fn resolve_overlay_font(
    font_path: Option<&Path>,
    font_family: Option<&str>,
    fallback: &[&str],
) -> Result<ResolvedOverlayFont> {
    if let Some(path) = font_path {
        let metrics = load_font_metrics(path)?;
        let family = metrics
            .family()
            .map(|name| name.to_string())
            .or_else(|| font_family.map(|name| name.to_string()))
            .unwrap_or_else(|| "sans-serif".to_string());
        return Ok(ResolvedOverlayFont { metrics, family });
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(family) = font_family {
        return load_font_metrics_from_family(&db, family);
    }

    for candidate in fallback {
        if let Ok(resolved) = load_font_metrics_from_family(&db, candidate) {
            return Ok(resolved);
        }
    }

    Err(anyhow!("no fallback fonts found"))
}

pub(crate) fn load_font_metrics_from_data(
    data: &[u8],
    preferred_family: Option<&str>,
) -> Result<FontMetrics> {
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        if let Ok(face) = Face::parse(data, index) {
            let family = extract_family_name(&face);
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            let metrics = FontMetrics {
                data: Arc::new(data.to_vec()),
                units_per_em,
                space_advance,
                family: family.clone(),
                face_index: index,
            };
            if let (Some(preferred), Some(found)) = (preferred_family, &family) {
                if found.eq_ignore_ascii_case(preferred) {
                    return Ok(metrics);
                }
            }
            if fallback.is_none() {
                fallback = Some(metrics);
            }
        }
    }
    if preferred_family.is_some() {
        return Err(anyhow!("font family not found in font file"));
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

fn load_font_metrics_from_family(
    db: &fontdb::Database,
    family: &str,
) -> Result<ResolvedOverlayFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else if family.eq_ignore_ascii_case("serif") {
        vec![fontdb::Family::Serif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    // Generic families resolve to a concrete name, so match on the face found.
    let face_family = db
        .face(id)
        .and_then(|info| info.families.first().map(|(name, _)| name.clone()));
    let preferred = face_family.as_deref().unwrap_or(family);
    let metrics = load_font_metrics_from_data(&data, Some(preferred))
        .or_else(|_| load_font_metrics_from_data(&data, None))?;
    let resolved_family = metrics
        .family()
        .map(|name| name.to_string())
        .unwrap_or_else(|| family.to_string());
    Ok(ResolvedOverlayFont {
        metrics,
        family: resolved_family,
    })
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_widths_follow_the_afm() {
        let metrics = HelveticaMetrics;
        assert!((metrics.text_width("illimitable", 1000.0) - 4111.0).abs() < 1e-3);
        assert!((metrics.text_width("WWW", 1000.0) - 2832.0).abs() < 1e-3);
        assert!((metrics.text_width("a b", 10.0) - 13.9).abs() < 1e-4);
        let at_16 = metrics.text_width("Hello", 16.0);
        let at_32 = metrics.text_width("Hello", 32.0);
        assert!((at_32 - at_16 * 2.0).abs() < 1e-4);
    }

    #[test]
    fn helvetica_vertical_metrics_bracket_the_baseline() {
        let metrics = HelveticaMetrics;
        assert!(metrics.ascent("Ag", 10.0) > 0.0);
        assert!(metrics.descent("Ag", 10.0) < 0.0);
        assert_eq!(metrics.ascent("  ", 10.0), 0.0);
        assert_eq!(metrics.descent("", 10.0), 0.0);
    }

    #[test]
    fn empty_text_has_no_width() {
        assert_eq!(HelveticaMetrics.text_width("", 16.0), 0.0);
    }

    #[test]
    fn unresolvable_fallback_families_are_an_error() {
        let err = resolve_overlay_font(None, None, &["no-such-family-7f3a", "also-missing-91c2"])
            .err()
            .expect("error");
        assert_eq!(err.to_string(), "no fallback fonts found");
    }

    #[test]
    fn garbage_font_data_is_rejected() {
        assert!(load_font_metrics_from_data(b"not a font", None).is_err());
    }

    #[test]
    fn missing_font_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.ttf");
        let err = load_font_metrics(&path).err().expect("error");
        assert!(err.to_string().contains("missing.ttf"));
    }
}
