use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::hocr::{Granularity, ReaderConfig};
use crate::overlay::{NOMINAL_FONT_SIZE, OverlayConfig};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
pub const DEFAULT_MAX_PIXELS: u32 = 3000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub granularity: Granularity,
    pub nominal_font_size: f32,
    pub scale_tolerance: f32,
    pub draw_boxes: bool,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub max_pixels: Option<u32>,
    pub title: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            granularity: Granularity::Word,
            nominal_font_size: NOMINAL_FONT_SIZE,
            scale_tolerance: 0.01,
            draw_boxes: false,
            font_path: None,
            font_family: None,
            max_pixels: Some(DEFAULT_MAX_PIXELS),
            title: "hocr-overlay".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    reader: Option<ReaderSettings>,
    overlay: Option<OverlaySettings>,
    pdf: Option<PdfSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ReaderSettings {
    granularity: Option<Granularity>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySettings {
    nominal_font_size: Option<f32>,
    scale_tolerance: Option<f32>,
    draw_boxes: Option<bool>,
    font_path: Option<String>,
    font_family: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PdfSettings {
    max_pixels: Option<u32>,
    title: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_settings_from(&ordered_paths)
}

/// Merges the existing files among `paths`, in order, over the defaults.
pub fn load_settings_from(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }
    Ok(settings)
}

impl Settings {
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            granularity: self.granularity,
        }
    }

    pub fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig {
            nominal_font_size: self.nominal_font_size,
            scale_tolerance: self.scale_tolerance,
            draw_boxes: self.draw_boxes,
        }
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(reader) = incoming.reader {
            if let Some(granularity) = reader.granularity {
                self.granularity = granularity;
            }
        }
        if let Some(overlay) = incoming.overlay {
            if let Some(size) = overlay.nominal_font_size {
                if size > 0.0 {
                    self.nominal_font_size = size;
                }
            }
            if let Some(tolerance) = overlay.scale_tolerance {
                if tolerance >= 0.0 {
                    self.scale_tolerance = tolerance;
                }
            }
            if let Some(draw_boxes) = overlay.draw_boxes {
                self.draw_boxes = draw_boxes;
            }
            if let Some(path) = overlay.font_path {
                if !path.trim().is_empty() {
                    self.font_path = Some(path);
                }
            }
            if let Some(family) = overlay.font_family {
                if !family.trim().is_empty() {
                    self.font_family = Some(family);
                }
            }
        }
        if let Some(pdf) = incoming.pdf {
            if let Some(max_pixels) = pdf.max_pixels {
                if max_pixels > 0 {
                    self.max_pixels = Some(max_pixels);
                }
            }
            if let Some(title) = pdf.title {
                if !title.trim().is_empty() {
                    self.title = title;
                }
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".hocr-overlay"))
        }
    })
}
