use kuchiki::traits::*;
use kuchiki::{ElementData, NodeDataRef, NodeRef};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::path::PathBuf;
use tracing::debug;

use super::model::{BoxRecord, Granularity, Rect};
use super::title::title_bbox;
use crate::error::{OverlayError, Result};

const PAGE_CLASS: &str = "ocr_page";

/// Where the hOCR markup comes from.
#[derive(Debug, Clone)]
pub enum HocrSource {
    File(PathBuf),
    Markup(String),
}

impl HocrSource {
    fn name(&self) -> String {
        match self {
            HocrSource::File(path) => path.display().to_string(),
            HocrSource::Markup(_) => "<inline markup>".to_string(),
        }
    }

    fn load(&self) -> Result<String> {
        match self {
            HocrSource::Markup(markup) => Ok(markup.clone()),
            HocrSource::File(path) => {
                let bytes = std::fs::read(path).map_err(|err| self.read_error(err.to_string()))?;
                String::from_utf8(bytes)
                    .map_err(|_| self.read_error("document is not valid UTF-8".to_string()))
            }
        }
    }

    fn read_error(&self, reason: String) -> OverlayError {
        OverlayError::SourceRead {
            source_name: self.name(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderConfig {
    pub granularity: Granularity,
}

/// hOCR element classes that carry boxes.
///
/// Word output exists under two classes (`ocr_word` from older engines,
/// `ocrx_word` from Tesseract); both are read in word mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoxSource {
    Line,
    Word,
    EngineWord,
}

impl BoxSource {
    fn for_granularity(granularity: Granularity) -> &'static [BoxSource] {
        match granularity {
            Granularity::Line => &[BoxSource::Line],
            Granularity::Word => &[BoxSource::Word, BoxSource::EngineWord],
        }
    }

    fn class_name(self) -> &'static str {
        match self {
            BoxSource::Line => "ocr_line",
            BoxSource::Word => "ocr_word",
            BoxSource::EngineWord => "ocrx_word",
        }
    }
}

struct PendingBox {
    source: BoxSource,
    element: NodeDataRef<ElementData>,
}

struct PageCursor {
    index: usize,
    rect: Rect,
    boxes: VecDeque<PendingBox>,
}

/// Single-pass reader over the boxes of an hOCR document.
///
/// Yields one [`BoxRecord`] per word or line, pages in document order. The
/// document is parsed on the first pull, not at construction, so load
/// failures show up as the first item. To read again, build a new reader.
///
/// A `SourceRead` error ends the sequence. A `MalformedAnnotation` error
/// ends the current page only: its remaining boxes are dropped and the next
/// pull moves on to the following page.
pub struct BoxReader {
    source: HocrSource,
    config: ReaderConfig,
    // Parsed tree, held while page handles point into it.
    _document: Option<NodeRef>,
    pages: Option<Vec<NodeDataRef<ElementData>>>,
    next_page: usize,
    current: Option<PageCursor>,
    finished: bool,
}

impl BoxReader {
    pub fn new(source: HocrSource, config: ReaderConfig) -> Self {
        Self {
            source,
            config,
            _document: None,
            pages: None,
            next_page: 0,
            current: None,
            finished: false,
        }
    }

    pub fn open(path: impl Into<PathBuf>, config: ReaderConfig) -> Self {
        Self::new(HocrSource::File(path.into()), config)
    }

    pub fn from_markup(markup: impl Into<String>, config: ReaderConfig) -> Self {
        Self::new(HocrSource::Markup(markup.into()), config)
    }

    fn load_document(&self) -> Result<(NodeRef, Vec<NodeDataRef<ElementData>>)> {
        let markup = self.source.load()?;
        let document = kuchiki::parse_html().one(markup);
        let pages = elements_with_class(&document, PAGE_CLASS).collect::<Vec<_>>();
        debug!("hocr: {} page(s) in {}", pages.len(), self.source.name());
        Ok((document, pages))
    }

    /// Moves to the next page. `None` once every page has been visited.
    fn open_next_page(&mut self) -> Option<Result<()>> {
        let pages = self.pages.as_ref()?;
        let index = self.next_page;
        let page = pages.get(index)?;
        self.next_page += 1;

        let rect = match title_bbox(&title_of(page)) {
            Ok(rect) => rect,
            Err(reason) => {
                return Some(Err(OverlayError::MalformedAnnotation {
                    page: index,
                    element: describe(page, PAGE_CLASS),
                    reason,
                }));
            }
        };

        let mut boxes = VecDeque::new();
        for source in BoxSource::for_granularity(self.config.granularity) {
            boxes.extend(
                elements_with_class(page.as_node(), source.class_name())
                    .map(|element| PendingBox {
                        source: *source,
                        element,
                    }),
            );
        }
        debug!("hocr: page {} bbox {} with {} box(es)", index, rect, boxes.len());
        self.current = Some(PageCursor { index, rect, boxes });
        Some(Ok(()))
    }

    fn build_record(&self, page: usize, page_rect: Rect, pending: PendingBox) -> Result<BoxRecord> {
        let class = pending.source.class_name();
        let box_rect = title_bbox(&title_of(&pending.element)).map_err(|reason| {
            OverlayError::MalformedAnnotation {
                page,
                element: describe(&pending.element, class),
                reason,
            }
        })?;
        let text = normalize_text(&pending.element.as_node().text_contents());
        Ok(BoxRecord::new(
            page,
            page_rect,
            text,
            box_rect,
            self.config.granularity,
        ))
    }
}

impl Iterator for BoxReader {
    type Item = Result<BoxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.pages.is_none() {
            match self.load_document() {
                Ok((document, pages)) => {
                    self._document = Some(document);
                    self.pages = Some(pages);
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }

        loop {
            if let Some(cursor) = self.current.as_mut() {
                if let Some(pending) = cursor.boxes.pop_front() {
                    let (page, rect) = (cursor.index, cursor.rect);
                    let record = self.build_record(page, rect, pending);
                    if record.is_err() {
                        self.current = None;
                    }
                    return Some(record);
                }
            }

            self.current = None;
            match self.open_next_page() {
                Some(Ok(())) => continue,
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    self.finished = true;
                    self.pages = None;
                    self._document = None;
                    return None;
                }
            }
        }
    }
}

impl FusedIterator for BoxReader {}

fn elements_with_class<'a>(
    node: &NodeRef,
    class: &'a str,
) -> impl Iterator<Item = NodeDataRef<ElementData>> + 'a {
    node.descendants()
        .elements()
        .filter(move |element| has_class(element, class))
}

fn has_class(element: &NodeDataRef<ElementData>, class: &str) -> bool {
    element
        .attributes
        .borrow()
        .get("class")
        .map(|value| value.split_whitespace().any(|name| name == class))
        .unwrap_or(false)
}

fn title_of(element: &NodeDataRef<ElementData>) -> String {
    element
        .attributes
        .borrow()
        .get("title")
        .unwrap_or_default()
        .to_string()
}

fn describe(element: &NodeDataRef<ElementData>, class: &str) -> String {
    match element.attributes.borrow().get("id") {
        Some(id) => format!("{} '{}'", class, id),
        None => class.to_string(),
    }
}

fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn word_config() -> ReaderConfig {
        ReaderConfig::default()
    }

    fn line_config() -> ReaderConfig {
        ReaderConfig {
            granularity: Granularity::Line,
        }
    }

    const MIXED_PAGE: &str = r#"<html><body>
<div class="ocr_page" id="page_1" title="image scan.png; bbox 0 0 1000 1500; ppageno 0">
  <span class="ocr_line" id="line_1_1" title="bbox 100 100 900 130">
    <span class="ocrx_word" id="word_1_1" title="bbox 100 100 300 130; x_wconf 96">Hello</span>
    <span class="ocr_word" id="word_1_2" title="bbox 320 100 500 130">brave</span>
    <span class="ocr_word" id="word_1_3" title="bbox 520 100 900 130">new world</span>
  </span>
</div>
</body></html>"#;

    fn collect(reader: BoxReader) -> Vec<BoxRecord> {
        reader
            .map(|item| item.expect("box record"))
            .collect::<Vec<_>>()
    }

    #[test]
    fn word_mode_reads_both_word_classes() {
        let records = collect(BoxReader::from_markup(MIXED_PAGE, word_config()));
        assert_eq!(records.len(), 3);
        let texts = records.iter().map(BoxRecord::text).collect::<Vec<_>>();
        // ocr_word matches come first, then ocrx_word matches.
        assert_eq!(texts, vec!["brave", "new world", "Hello"]);
        assert!(records.iter().all(|rec| rec.granularity() == Granularity::Word));
        assert!(
            records
                .iter()
                .all(|rec| rec.page_rect() == Rect::new(0, 0, 1000, 1500))
        );
    }

    #[test]
    fn line_mode_reads_lines_only() {
        let records = collect(BoxReader::from_markup(MIXED_PAGE, line_config()));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].box_rect(), Rect::new(100, 100, 900, 130));
        assert_eq!(records[0].text(), "Hello brave new world");
        assert_eq!(records[0].granularity(), Granularity::Line);
    }

    #[test]
    fn pages_are_read_in_order_and_empty_pages_are_skipped() {
        let markup = r#"
<div class="ocr_page" title="bbox 0 0 100 100">
  <span class="ocrx_word" title="bbox 1 1 10 10">a</span>
  <span class="ocrx_word" title="bbox 11 1 20 10">b</span>
</div>
<div class="ocr_page" title="bbox 0 0 100 100"></div>
<div class="ocr_page" title="bbox 0 0 200 300">
  <span class="ocrx_word" title="bbox 1 1 10 10">c</span>
</div>"#;
        let records = collect(BoxReader::from_markup(markup, word_config()));
        let pages = records.iter().map(BoxRecord::page_index).collect::<Vec<_>>();
        assert_eq!(pages, vec![0, 0, 2]);
        assert_eq!(records[2].page_rect(), Rect::new(0, 0, 200, 300));
    }

    #[test]
    fn malformed_box_ends_only_its_page() {
        let markup = r#"
<div class="ocr_page" title="bbox 0 0 100 100">
  <span class="ocrx_word" title="bbox 1 1 10 10">ok</span>
  <span class="ocrx_word" id="w2" title="x_wconf 80">broken</span>
  <span class="ocrx_word" title="bbox 30 1 40 10">dropped</span>
</div>
<div class="ocr_page" title="bbox 0 0 100 100">
  <span class="ocrx_word" title="bbox 1 1 10 10">next</span>
</div>"#;
        let mut reader = BoxReader::from_markup(markup, word_config());
        assert_eq!(reader.next().unwrap().unwrap().text(), "ok");
        match reader.next() {
            Some(Err(OverlayError::MalformedAnnotation { page, element, .. })) => {
                assert_eq!(page, 0);
                assert_eq!(element, "ocrx_word 'w2'");
            }
            other => panic!("expected malformed annotation, got {:?}", other),
        }
        let next = reader.next().unwrap().unwrap();
        assert_eq!((next.page_index(), next.text()), (1, "next"));
        assert!(reader.next().is_none());
    }

    #[test]
    fn malformed_page_bbox_is_reported() {
        let markup = r#"<div class="ocr_page" title="image x.png">
  <span class="ocrx_word" title="bbox 1 1 10 10">lost</span>
</div>"#;
        let mut reader = BoxReader::from_markup(markup, word_config());
        assert!(matches!(
            reader.next(),
            Some(Err(OverlayError::MalformedAnnotation { page: 0, .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn missing_file_fails_on_first_pull_and_fuses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reader = BoxReader::open(dir.path().join("absent.hocr"), word_config());
        assert!(matches!(
            reader.next(),
            Some(Err(OverlayError::SourceRead { .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn non_utf8_file_is_a_source_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("latin1.hocr");
        std::fs::write(&path, [0x3c, 0x70, 0xff, 0xfe, 0x3e]).expect("write");
        let mut reader = BoxReader::open(&path, word_config());
        assert!(matches!(
            reader.next(),
            Some(Err(OverlayError::SourceRead { .. }))
        ));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(MIXED_PAGE.as_bytes()).expect("write");
        let records = collect(BoxReader::open(file.path(), line_config()));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn text_is_whitespace_normalized() {
        let markup = "<div class='ocr_page' title='bbox 0 0 50 50'>\
            <span class='ocr_line' title='bbox 0 0 40 10'>\n  two \n\t words </span></div>";
        let records = collect(BoxReader::from_markup(markup, line_config()));
        assert_eq!(records[0].text(), "two words");
    }
}
