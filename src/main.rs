use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use hocr_overlay::Granularity;

#[derive(Parser, Debug)]
#[command(
    name = "hocr-overlay",
    version,
    about = "Overlay hOCR text as an invisible layer on scanned page images"
)]
struct Cli {
    /// hOCR file produced by the OCR engine
    #[arg(long = "hocr")]
    hocr: PathBuf,

    /// Page images, in the order of the hOCR pages
    #[arg(required_unless_present = "dump_boxes")]
    images: Vec<PathBuf>,

    /// Output PDF
    #[arg(short = 'o', long = "output", default_value = "out.pdf")]
    output: PathBuf,

    /// Box granularity: word or line (default from settings [reader])
    #[arg(short = 'g', long = "granularity")]
    granularity: Option<Granularity>,

    /// Maximum page width in pixels; wider pages are scaled down
    #[arg(short = 'p', long = "max-pixels")]
    max_pixels: Option<u32>,

    /// TrueType/OpenType font for the text layer
    #[arg(long = "font")]
    font: Option<PathBuf>,

    /// Stroke each box on the page (debug aid)
    #[arg(long = "draw-boxes")]
    draw_boxes: bool,

    /// Print box records as JSON lines and exit
    #[arg(long = "dump-boxes")]
    dump_boxes: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    hocr_overlay::logging::init(cli.verbose)?;

    let output = hocr_overlay::run(hocr_overlay::Config {
        hocr: cli.hocr,
        images: cli.images,
        output: cli.output,
        granularity: cli.granularity,
        max_pixels: cli.max_pixels,
        font_path: cli.font,
        draw_boxes: cli.draw_boxes,
        dump_boxes: cli.dump_boxes,
        settings_path: cli.read_settings,
    })?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
