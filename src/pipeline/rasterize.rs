//! Page rasterisation: single-page PDF → PNG image.
//!
//! The default backend shells out to poppler's `pdftoppm`. Depending on the
//! poppler version and page count, `pdftoppm` appends a sequence suffix to
//! the requested name (`page_3-1.png`, `page_3-01.png`), so the produced
//! file is located with [`resolve_raster_output`] and then moved to the
//! canonical `<stem>.png`.
//!
//! With the `pdfium` feature, [`PdfiumRasterizer`] renders in-process
//! instead; the pdfium calls run in `spawn_blocking`.

use crate::error::ToolError;
use crate::pipeline::command::run_tool;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns a single-page PDF into a raster image file.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Rasterise the first page of `page_pdf` at `dpi` into
    /// `out_dir/<stem>.png` and return the image path.
    async fn rasterize(
        &self,
        page_pdf: &Path,
        out_dir: &Path,
        stem: &str,
        dpi: u32,
    ) -> Result<PathBuf, ToolError>;
}

/// `pdftoppm`-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    program: PathBuf,
    timeout_secs: u64,
}

impl PopplerRasterizer {
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    async fn rasterize(
        &self,
        page_pdf: &Path,
        out_dir: &Path,
        stem: &str,
        dpi: u32,
    ) -> Result<PathBuf, ToolError> {
        let args: Vec<OsString> = vec![
            "-png".into(),
            "-r".into(),
            dpi.to_string().into(),
            "-f".into(),
            "1".into(),
            "-l".into(),
            "1".into(),
            page_pdf.into(),
            out_dir.join(stem).into(),
        ];
        run_tool(&self.program, args, self.timeout_secs).await?;

        let found = resolve_raster_output(out_dir, stem, "png")?;
        let canonical = out_dir.join(format!("{stem}.png"));
        if found != canonical {
            debug!(from = %found.display(), to = %canonical.display(), "normalising raster name");
            tokio::fs::rename(&found, &canonical)
                .await
                .map_err(|source| ToolError::Io {
                    path: found.clone(),
                    source,
                })?;
        }
        Ok(canonical)
    }
}

/// Locate the image a rasteriser produced for `stem` in `dir`.
///
/// 1. `<stem>.<ext>` if it exists.
/// 2. Otherwise the lexicographically first file named `<stem>` + suffix +
///    `.<ext>`, where the suffix is non-empty and does not start with a
///    digit. This keeps `page_1` from matching `page_10-1.png`.
/// 3. Otherwise [`ToolError::NotFound`].
pub fn resolve_raster_output(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf, ToolError> {
    let exact = dir.join(format!("{stem}.{ext}"));
    if exact.is_file() {
        return Ok(exact);
    }

    let dot_ext = format!(".{ext}");
    let entries = std::fs::read_dir(dir).map_err(|source| ToolError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| {
            name.strip_prefix(stem)
                .and_then(|rest| rest.strip_suffix(dot_ext.as_str()))
                .and_then(|suffix| suffix.chars().next())
                .map(|c| !c.is_ascii_digit())
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .map(|name| dir.join(name))
        .ok_or(ToolError::NotFound { expected: exact })
}

/// In-process pdfium rasteriser.
///
/// The library is bound from `PDFIUM_LIB_PATH` when set, otherwise from the
/// system library path.
#[cfg(feature = "pdfium")]
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

#[cfg(feature = "pdfium")]
impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    /// Library path from `PDFIUM_LIB_PATH`, if set.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from))
    }
}

#[cfg(feature = "pdfium")]
#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        page_pdf: &Path,
        out_dir: &Path,
        stem: &str,
        dpi: u32,
    ) -> Result<PathBuf, ToolError> {
        let library = self.library_path.clone();
        let input = page_pdf.to_path_buf();
        let output = out_dir.join(format!("{stem}.png"));

        tokio::task::spawn_blocking(move || {
            render_first_page_blocking(library.as_deref(), &input, &output, dpi)?;
            Ok(output)
        })
        .await
        .map_err(|e| ToolError::Backend(format!("pdfium task panicked: {e}")))?
    }
}

#[cfg(feature = "pdfium")]
fn render_first_page_blocking(
    library: Option<&Path>,
    input: &Path,
    output: &Path,
    dpi: u32,
) -> Result<(), ToolError> {
    use pdfium_render::prelude::*;

    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ToolError::Backend(format!("failed to bind pdfium: {e:?}")))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_file(input, None)
        .map_err(|e| ToolError::Backend(format!("{e:?}")))?;
    let page = document
        .pages()
        .get(0)
        .map_err(|e| ToolError::Backend(format!("{e:?}")))?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| ToolError::Backend(format!("{e:?}")))?;

    bitmap
        .as_image()
        .save_with_format(output, image::ImageFormat::Png)
        .map_err(|e| ToolError::Backend(format!("PNG write failed: {e}")))?;
    debug!(path = %output.display(), "pdfium rendered page");
    Ok(())
}
