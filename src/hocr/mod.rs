mod model;
mod reader;
mod title;

pub use model::{BoxRecord, Granularity, PdfRect, Rect};
pub use reader::{BoxReader, HocrSource, ReaderConfig};
pub use title::{parse_title, title_bbox};
