//! Source document loading and single-page extraction with `lopdf`.
//!
//! A page is extracted by copying the page dictionary and the objects it
//! reaches into a fresh document with a one-page tree and a new catalog.
//! Inheritable page attributes are copied onto the page first, because the
//! `Pages` nodes that carried them are not copied.

use crate::error::{PipelineError, SplitError};
use crate::output::DocumentInfo;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// The parsed input document. Immutable for the whole run.
#[derive(Debug)]
pub struct SourceDocument {
    path: PathBuf,
    doc: Document,
    page_count: usize,
}

impl SourceDocument {
    /// Parse `path`. Blocking; call from `spawn_blocking`.
    ///
    /// A document with zero pages is rejected with
    /// [`PipelineError::EmptyDocument`].
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let doc = Document::load(path).map_err(|e| PipelineError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{e}"),
        })?;
        if doc.is_encrypted() {
            return Err(PipelineError::CorruptPdf {
                path: path.to_path_buf(),
                detail: "document is encrypted".into(),
            });
        }
        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(PipelineError::EmptyDocument {
                path: path.to_path_buf(),
            });
        }
        info!("PDF loaded: {} pages", page_count);
        Ok(Self {
            path: path.to_path_buf(),
            doc,
            page_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PDF header version, e.g. `1.5`.
    pub fn version(&self) -> &str {
        &self.doc.version
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Document-level metadata from the trailer's `Info` dictionary.
    pub fn info(&self) -> DocumentInfo {
        let file_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let info = info_dictionary(&self.doc);
        let get = |key: &[u8]| info.and_then(|d| dictionary_string(d, key));
        DocumentInfo {
            path: self.path.clone(),
            page_count: self.page_count,
            pdf_version: self.doc.version.to_string(),
            file_size,
            title: get(b"Title"),
            author: get(b"Author"),
            subject: get(b"Subject"),
            creator: get(b"Creator"),
            producer: get(b"Producer"),
        }
    }

    /// Build a standalone document holding only page `index` (0-based).
    pub fn extract_page(&self, index: usize) -> Result<Document, SplitError> {
        extract_single_page(&self.doc, index)
    }

    /// Write page `index` (0-based) as a single-page PDF to `out`.
    pub fn split_page(&self, index: usize, out: &Path) -> Result<(), SplitError> {
        let mut page_doc = self.extract_page(index)?;
        save_document(&mut page_doc, out).map_err(|detail| SplitError::Write {
            path: out.to_path_buf(),
            detail,
        })?;
        debug!(page = index + 1, path = %out.display(), "split page written");
        Ok(())
    }
}

/// Single-page copy of `doc` keeping only page `index` (0-based).
///
/// Only the objects reachable from that page are copied, so the cost scales
/// with the page rather than the whole document.
pub fn extract_single_page(doc: &Document, index: usize) -> Result<Document, SplitError> {
    let pages = doc.get_pages();
    let page_count = pages.len();
    let page_id = *pages
        .get(&((index + 1) as u32))
        .ok_or(SplitError::IndexOutOfRange { index, page_count })?;

    let mut page = doc
        .get_dictionary(page_id)
        .map_err(|e| SplitError::Structure(format!("{e}")))?
        .clone();
    for key in INHERITABLE {
        if !page.has(key) {
            if let Some(value) = inherited_attribute(doc, page_id, key) {
                page.set(key.to_vec(), value);
            }
        }
    }
    page.remove(b"Parent");

    let mut out = Document::with_version(doc.version.clone());
    let mut pending = Vec::new();
    collect_dictionary(&page, &mut pending);
    while let Some(id) = pending.pop() {
        if id == page_id || out.objects.contains_key(&id) {
            continue;
        }
        let Ok(object) = doc.get_object(id) else {
            continue;
        };
        // Other pages (link targets, annotation owners) stay behind.
        if is_page(object) {
            continue;
        }
        collect_references(object, &mut pending);
        out.objects.insert(id, object.clone());
    }
    out.max_id = out
        .objects
        .keys()
        .map(|(n, _)| *n)
        .chain([page_id.0, doc.max_id])
        .max()
        .unwrap_or(0);

    let pages_id = out.new_object_id();
    page.set("Parent", Object::Reference(pages_id));
    out.objects.insert(page_id, Object::Dictionary(page));
    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);
    Ok(out)
}

/// Push every reference held by `object` onto `pending`, skipping `Parent`
/// links so the walk never climbs back into the page tree.
fn collect_references(object: &Object, pending: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => pending.push(*id),
        Object::Array(items) => items.iter().for_each(|o| collect_references(o, pending)),
        Object::Dictionary(dict) => collect_dictionary(dict, pending),
        Object::Stream(stream) => collect_dictionary(&stream.dict, pending),
        _ => {}
    }
}

fn collect_dictionary(dict: &Dictionary, pending: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            collect_references(value, pending);
        }
    }
}

fn is_page(object: &Object) -> bool {
    object
        .as_dict()
        .and_then(|d| d.get(b"Type"))
        .and_then(Object::as_name)
        .is_ok_and(|name| name == b"Page")
}

/// Walk the `Parent` chain from `page_id` looking for `key`.
fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = page_id;
    // Bounded to guard against a cyclic Parent chain.
    for _ in 0..64 {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

/// Serialise `doc` to `path` through a buffered writer.
pub(crate) fn save_document(doc: &mut Document, path: &Path) -> Result<(), String> {
    let file = File::create(path).map_err(|e| format!("{e}"))?;
    let mut writer = BufWriter::new(file);
    doc.save_to(&mut writer).map_err(|e| format!("{e}"))?;
    writer.flush().map_err(|e| format!("{e}"))?;
    Ok(())
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn dictionary_string(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => {
            let s = decode_pdf_string(bytes);
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// UTF-16BE with BOM, else UTF-8, else Latin-1.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8(bytes.to_vec()).unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::{page_marker, sample_document, write_sample_pdf};

    #[test]
    fn load_counts_pages_and_reads_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_pdf(dir.path(), "src.pdf", 3);
        let src = SourceDocument::load(&path).unwrap();
        assert_eq!(src.page_count(), 3);
        let info = src.info();
        assert_eq!(info.page_count, 3);
        assert_eq!(info.title.as_deref(), Some("Sample 3"));
        assert!(info.file_size > 0);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"%PDF-1.4\nthis is not a pdf body").unwrap();
        let err = SourceDocument::load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptPdf { .. }), "got: {err}");
    }

    #[test]
    fn extracted_page_keeps_content_and_inherited_attributes() {
        let doc = sample_document(4);
        let single = extract_single_page(&doc, 2).unwrap();
        let pages = single.get_pages();
        assert_eq!(pages.len(), 1);

        let page_id = pages[&1];
        assert_eq!(page_marker(&single, page_id), "Page 3");

        let page = single.get_dictionary(page_id).unwrap();
        assert!(page.has(b"MediaBox"), "MediaBox should be copied from the tree");
        assert!(page.has(b"Resources"));
    }

    #[test]
    fn extract_copies_only_the_page_closure() {
        let doc = sample_document(5);
        let single = extract_single_page(&doc, 0).unwrap();
        // Page, its content, shared resources, font, new tree and catalog.
        assert_eq!(single.objects.len(), 6, "{:?}", single.objects.keys());
        assert!(single.trailer.get(b"Info").is_err());
        // The source is untouched.
        assert_eq!(doc.get_pages().len(), 5);
    }

    #[test]
    fn link_to_another_page_does_not_pull_it_in() {
        let mut doc = sample_document(3);
        let pages = doc.get_pages();
        let (first, second) = (pages[&1], pages[&2]);
        let link = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
            "Dest" => vec![Object::Reference(second), "Fit".into()],
        });
        doc.get_dictionary_mut(first)
            .unwrap()
            .set("Annots", vec![Object::Reference(link)]);

        let single = extract_single_page(&doc, 0).unwrap();
        assert!(single.objects.contains_key(&link));
        assert!(!single.objects.contains_key(&second));
        assert_eq!(single.get_pages().len(), 1);
        assert_eq!(page_marker(&single, single.get_pages()[&1]), "Page 1");
    }

    #[test]
    fn index_out_of_range() {
        let doc = sample_document(2);
        let err = extract_single_page(&doc, 2).unwrap_err();
        assert!(
            matches!(err, SplitError::IndexOutOfRange { index: 2, page_count: 2 }),
            "got: {err}"
        );
    }

    #[test]
    fn split_page_writes_a_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_pdf(dir.path(), "src.pdf", 2);
        let src = SourceDocument::load(&path).unwrap();
        let out = dir.path().join("page_2.pdf");
        src.split_page(1, &out).unwrap();

        let reloaded = Document::load(&out).unwrap();
        let pages = reloaded.get_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(page_marker(&reloaded, pages[&1]), "Page 2");
    }

    #[test]
    fn split_into_missing_dir_is_write_error() {
        let doc = sample_document(1);
        let src = SourceDocument {
            path: PathBuf::from("mem.pdf"),
            doc,
            page_count: 1,
        };
        let err = src
            .split_page(0, Path::new("/nonexistent-dir/for/sure/page_1.pdf"))
            .unwrap_err();
        assert!(matches!(err, SplitError::Write { .. }), "got: {err}");
    }

    #[test]
    fn decodes_utf16_info_strings() {
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(decode_pdf_string(&bytes), "Hi");
        assert_eq!(decode_pdf_string(b"plain"), "plain");
    }
}
