//! Final assembly: one page per slot, regenerated where possible.
//!
//! For page `n` the merger prefers `markup/page_{n}_converted.pdf` and
//! falls back to page `n` of the source. Every piece is first reduced to a
//! standalone single-page document with [`extract_single_page`], then the
//! pieces are renumbered into one object space and hung under a fresh page
//! tree. Blocking; the orchestrator calls it from `spawn_blocking`.

use crate::error::PipelineError;
use crate::output::{MergeIssue, MergeIssueKind, MergeReport};
use crate::pipeline::split::{extract_single_page, SourceDocument};
use crate::pipeline::workarea::WorkArea;
use lopdf::{dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Merge `total` pages into `output`.
///
/// Returns a report with `output == None` when no page could be appended;
/// nothing is written in that case.
pub fn merge_pages(
    source_path: &Path,
    work: &WorkArea,
    total: usize,
    output: &Path,
) -> Result<MergeReport, PipelineError> {
    let source = match SourceDocument::load(source_path) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "source could not be re-loaded for merge");
            None
        }
    };

    let mut report = MergeReport::default();
    let mut pieces = Vec::with_capacity(total);

    for page in 1..=total {
        let markup = work.markup_path(page);
        let rendered = work.rendered_path(page);

        let fallback_reason = match load_rendered(&rendered) {
            Ok(Some(doc)) => {
                debug!(page, "using regenerated page");
                report.regenerated_pages.push(page);
                pieces.push(doc);
                continue;
            }
            Ok(None) if markup.exists() => {
                Some("markup was generated but no rendered page exists".to_string())
            }
            Ok(None) => None,
            Err(detail) => Some(detail),
        };

        let original = match &source {
            Some(src) => src.extract_page(page - 1).map_err(|e| e.to_string()),
            None => Err("source document unavailable".to_string()),
        };
        match original {
            Ok(doc) => {
                report.original_pages.push(page);
                pieces.push(doc);
                if let Some(detail) = fallback_reason {
                    warn!(page, %detail, "regenerated page unusable, using original");
                    report.issues.push(MergeIssue {
                        page,
                        kind: MergeIssueKind::FellBackToOriginal,
                        detail,
                    });
                }
            }
            Err(detail) => {
                warn!(page, %detail, "original page unavailable, skipping");
                report.issues.push(MergeIssue {
                    page,
                    kind: MergeIssueKind::Skipped,
                    detail,
                });
            }
        }
    }

    if pieces.is_empty() {
        warn!(total, "no pages could be merged, no output written");
        return Ok(report);
    }

    let version = source
        .as_ref()
        .map(|s| s.version().to_string())
        .unwrap_or_else(|| "1.5".to_string());
    let mut merged = assemble(pieces, &version)
        .map_err(|e| PipelineError::Internal(format!("merge failed: {e}")))?;
    write_atomically(&mut merged, output)?;

    info!(
        output = %output.display(),
        pages = report.appended(),
        regenerated = report.regenerated_pages.len(),
        issues = report.issues.len(),
        "merged document written"
    );
    report.output = Some(output.to_path_buf());
    Ok(report)
}

/// `Ok(None)` when there is no rendered file; `Err` when one exists but is
/// unusable.
fn load_rendered(path: &Path) -> Result<Option<Document>, String> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(None),
    };
    if meta.len() == 0 {
        return Err("rendered page is empty".to_string());
    }
    let doc = Document::load(path).map_err(|e| format!("rendered page unreadable: {e}"))?;
    if doc.get_pages().is_empty() {
        return Err("rendered page has no pages".to_string());
    }
    extract_single_page(&doc, 0)
        .map(Some)
        .map_err(|e| format!("rendered page unusable: {e}"))
}

/// Join single-page documents, in order, under one page tree.
fn assemble(pieces: Vec<Document>, version: &str) -> Result<Document, String> {
    let mut merged = Document::with_version(version);
    let mut next_id = 1;
    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(pieces.len());
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut piece in pieces {
        piece.renumber_objects_with(next_id);
        next_id = piece.max_id + 1;

        let root_id = piece
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| e.to_string())?;
        let tree_id = piece
            .get_dictionary(root_id)
            .and_then(|c| c.get(b"Pages"))
            .and_then(Object::as_reference)
            .map_err(|e| e.to_string())?;
        let page_id = *piece
            .get_pages()
            .values()
            .next()
            .ok_or_else(|| "piece has no page".to_string())?;

        page_ids.push(page_id);
        objects.extend(
            piece
                .objects
                .into_iter()
                .filter(|(id, _)| *id != root_id && *id != tree_id),
        );
    }

    merged.objects = objects;
    merged.max_id = next_id;
    let pages_id = merged.new_object_id();

    for id in &page_ids {
        if let Ok(page) = merged.get_object_mut(*id).and_then(Object::as_dict_mut) {
            page.set("Parent", Object::Reference(pages_id));
        }
    }

    let kids: Vec<Object> = page_ids.iter().copied().map(Object::Reference).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    merged.prune_objects();
    merged.renumber_objects();
    Ok(merged)
}

/// Write to a temp file beside `output`, then rename over it.
fn write_atomically(doc: &mut Document, output: &Path) -> Result<(), PipelineError> {
    let write_err = |source: std::io::Error| PipelineError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let tmp = tempfile::Builder::new()
        .prefix(".table-rerender-")
        .suffix(".pdf.tmp")
        .tempfile_in(&dir)
        .map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        doc.save_to(&mut writer)
            .map_err(|e| write_err(std::io::Error::other(e.to_string())))?;
        writer.flush().map_err(write_err)?;
    }
    tmp.persist(output).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::{page_marker, sample_document, write_sample_pdf};

    fn markers(path: &Path) -> Vec<String> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .values()
            .map(|id| page_marker(&doc, *id))
            .collect()
    }

    /// A one-page document whose page reads `Page {label}`.
    fn write_replacement(path: &Path, label: &str) {
        let mut doc = sample_document(1);
        let page_id = *doc.get_pages().get(&1).unwrap();
        doc.change_page_content(page_id, format!("BT /F1 24 Tf 72 720 Td (Page {label}) Tj ET").into_bytes())
            .unwrap();
        doc.save(path).unwrap();
    }

    #[test]
    fn untouched_pages_keep_order_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_sample_pdf(dir.path(), "in.pdf", 4);
        let work = WorkArea::create(Some(dir.path()), false).unwrap();
        let out = dir.path().join("out.pdf");

        let report = merge_pages(&src, &work, 4, &out).unwrap();
        assert_eq!(report.output.as_deref(), Some(out.as_path()));
        assert_eq!(report.original_pages, vec![1, 2, 3, 4]);
        assert!(!report.is_degraded());
        assert_eq!(markers(&out), ["Page 1", "Page 2", "Page 3", "Page 4"]);
    }

    #[test]
    fn regenerated_page_replaces_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_sample_pdf(dir.path(), "in.pdf", 3);
        let work = WorkArea::create(Some(dir.path()), false).unwrap();
        std::fs::write(work.markup_path(2), "<html/>").unwrap();
        write_replacement(&work.rendered_path(2), "two-rebuilt");
        let out = dir.path().join("out.pdf");

        let report = merge_pages(&src, &work, 3, &out).unwrap();
        assert_eq!(report.regenerated_pages, vec![2]);
        assert_eq!(markers(&out), ["Page 1", "Page two-rebuilt", "Page 3"]);
    }

    #[test]
    fn unusable_render_falls_back_and_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_sample_pdf(dir.path(), "in.pdf", 3);
        let work = WorkArea::create(Some(dir.path()), false).unwrap();
        std::fs::write(work.markup_path(1), "<html/>").unwrap();
        std::fs::write(work.rendered_path(1), b"not a pdf").unwrap();
        std::fs::write(work.markup_path(3), "<html/>").unwrap();
        let out = dir.path().join("out.pdf");

        let report = merge_pages(&src, &work, 3, &out).unwrap();
        assert_eq!(report.appended(), 3);
        assert_eq!(report.issues.len(), 2);
        assert!(report
            .issues
            .iter()
            .all(|i| i.kind == MergeIssueKind::FellBackToOriginal));
        assert!(report.first_issue().unwrap().starts_with("Page 1 merge issue:"));
        assert_eq!(markers(&out), ["Page 1", "Page 2", "Page 3"]);
    }

    #[test]
    fn unreadable_source_without_renders_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("gone.pdf");
        let work = WorkArea::create(Some(dir.path()), false).unwrap();
        let out = dir.path().join("out.pdf");

        let report = merge_pages(&src, &work, 2, &out).unwrap();
        assert!(report.output.is_none());
        assert_eq!(report.appended(), 0);
        assert!(report
            .issues
            .iter()
            .all(|i| i.kind == MergeIssueKind::Skipped));
        assert!(!out.exists());
    }

    #[test]
    fn output_replaced_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_sample_pdf(dir.path(), "in.pdf", 2);
        let work = WorkArea::create(Some(dir.path()), false).unwrap();
        let out = dir.path().join("nested").join("out.pdf");
        std::fs::create_dir_all(out.parent().unwrap()).unwrap();
        std::fs::write(&out, b"stale").unwrap();

        merge_pages(&src, &work, 2, &out).unwrap();
        assert_eq!(markers(&out).len(), 2);
        let leftovers: Vec<_> = std::fs::read_dir(out.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
