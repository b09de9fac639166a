//! Deterministic stand-ins for every external system plus a PDF builder.
#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use table_rerender::error::{ClassifyError, SynthesisError, ToolError};
use table_rerender::pipeline::ocr::TextExtractor;
use table_rerender::pipeline::rasterize::Rasterizer;
use table_rerender::pipeline::renderer::PageRenderer;
use table_rerender::{Adapters, ClassificationResult, TableAnalyzer};

// ── PDFs ─────────────────────────────────────────────────────────────────────

/// One page drawing `(label)`, with its own font and media box.
fn add_page(doc: &mut Document, pages_id: lopdf::ObjectId, label: &str) -> lopdf::ObjectId {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let body = format!("BT /F1 18 Tf 72 720 Td ({label}) Tj ET");
    let content_id = doc.add_object(Stream::new(dictionary! {}, body.into_bytes()));
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "Contents" => content_id,
    })
}

/// Build a PDF whose pages draw the given labels, in order.
pub fn write_pdf(path: &Path, labels: &[String]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = labels
        .iter()
        .map(|l| Object::Reference(add_page(&mut doc, pages_id, l)))
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => labels.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// `n`-page source document; page `i` draws `Page i`.
pub fn sample_pdf(dir: &Path, n: usize) -> PathBuf {
    let path = dir.join("source.pdf");
    let labels: Vec<String> = (1..=n).map(|i| format!("Page {i}")).collect();
    write_pdf(&path, &labels);
    path
}

/// The `(…)` label drawn by each page of `path`, in page order.
pub fn page_labels(path: &Path) -> Vec<String> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let content = doc.get_page_content(*id).unwrap();
            let text = String::from_utf8_lossy(&content).into_owned();
            let start = text.find('(').unwrap();
            let end = text.rfind(')').unwrap();
            text[start + 1..end].to_string()
        })
        .collect()
}

/// Raw decoded content stream of each page of `path`.
pub fn page_contents(path: &Path) -> Vec<Vec<u8>> {
    let doc = Document::load(path).unwrap();
    doc.get_pages()
        .values()
        .map(|id| doc.get_page_content(*id).unwrap())
        .collect()
}

/// Page number from artifact names like `page_12.png` or `page_12_full.html`.
pub fn page_of(path: &Path) -> usize {
    let name = path.file_name().unwrap().to_string_lossy();
    name.trim_start_matches("page_")
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap()
        .parse()
        .unwrap()
}

// ── Rasterizer ───────────────────────────────────────────────────────────────

/// Writes a small white PNG and tracks how many calls overlap.
#[derive(Default)]
pub struct FakeRasterizer {
    pub delay: Duration,
    pub panic_on: Option<usize>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeRasterizer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn panicking_on(page: usize) -> Self {
        Self {
            panic_on: Some(page),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        page_pdf: &Path,
        out_dir: &Path,
        stem: &str,
        _dpi: u32,
    ) -> Result<PathBuf, ToolError> {
        assert!(page_pdf.exists(), "split page missing: {}", page_pdf.display());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let out = out_dir.join(format!("{stem}.png"));
        if Some(page_of(&out)) == self.panic_on {
            panic!("rasteriser crashed on {stem}");
        }
        RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))
            .save(&out)
            .map_err(|e| ToolError::Backend(e.to_string()))?;
        Ok(out)
    }
}

// ── Text extractor ───────────────────────────────────────────────────────────

/// `table on page N` for table pages, `prose on page N` otherwise, nothing
/// for blank pages.
#[derive(Default)]
pub struct FakeExtractor {
    pub table_pages: HashSet<usize>,
    pub blank_pages: HashSet<usize>,
}

impl FakeExtractor {
    pub fn tables(pages: &[usize]) -> Self {
        Self {
            table_pages: pages.iter().copied().collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, image: &Path) -> Result<String, ToolError> {
        let page = page_of(image);
        Ok(if self.blank_pages.contains(&page) {
            String::new()
        } else if self.table_pages.contains(&page) {
            format!("TABLE on page {page}\nItem | Qty\nA | 1")
        } else {
            format!("prose on page {page}")
        })
    }
}

// ── Analyzer ─────────────────────────────────────────────────────────────────

/// Detects a table whenever the text says `TABLE`; records every call.
#[derive(Default)]
pub struct FakeAnalyzer {
    pub classified: Mutex<Vec<String>>,
    pub synthesized: AtomicUsize,
}

#[async_trait]
impl TableAnalyzer for FakeAnalyzer {
    async fn classify(&self, page_text: &str) -> Result<ClassificationResult, ClassifyError> {
        self.classified.lock().unwrap().push(page_text.to_string());
        let table = page_text.contains("TABLE");
        Ok(ClassificationResult {
            table_detected: table,
            confidence_score: if table { 0.95 } else { 0.05 },
        })
    }

    async fn synthesize(
        &self,
        image: &Path,
        _ocr_text: &str,
    ) -> Result<Option<String>, SynthesisError> {
        self.synthesized.fetch_add(1, Ordering::SeqCst);
        let page = page_of(image);
        Ok(Some(format!(
            "<html><body><table><tr><td>Rebuilt {page}</td></tr></table></body></html>"
        )))
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Writes a one-page PDF drawing `Rebuilt N`, or fails for chosen pages.
#[derive(Default)]
pub struct FakeRenderer {
    pub fail_pages: HashSet<usize>,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, markup: &Path, output: &Path) -> Result<(), ToolError> {
        let page = page_of(markup);
        if self.fail_pages.contains(&page) {
            return Err(ToolError::Failed {
                tool: "wkhtmltopdf".into(),
                status: "exit status: 1".into(),
                stderr: "Exit with code 1 due to network error: ContentNotFoundError".into(),
            });
        }
        assert!(markup.exists());
        write_pdf(output, &[format!("Rebuilt {page}")]);
        Ok(())
    }
}

pub struct Fakes {
    pub rasterizer: Arc<FakeRasterizer>,
    pub extractor: Arc<FakeExtractor>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub renderer: Arc<FakeRenderer>,
}

impl Fakes {
    pub fn new(extractor: FakeExtractor) -> Self {
        Self {
            rasterizer: Arc::new(FakeRasterizer::default()),
            extractor: Arc::new(extractor),
            analyzer: Arc::new(FakeAnalyzer::default()),
            renderer: Arc::new(FakeRenderer::default()),
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            rasterizer: self.rasterizer.clone(),
            extractor: self.extractor.clone(),
            analyzer: self.analyzer.clone(),
            renderer: self.renderer.clone(),
        }
    }
}
