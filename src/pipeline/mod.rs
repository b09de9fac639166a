//! Pipeline stages for table re-rendering.
//!
//! Each submodule implements exactly one step, and every external system
//! (rasteriser, OCR engine, generative model, markup renderer) sits behind a
//! trait so it can be swapped or faked in tests.
//!
//! ## Data Flow (per page)
//!
//! ```text
//! split ──▶ rasterize ──▶ ocr ──▶ classify ──▶ synthesize ──▶ renderer
//! (lopdf)   (pdftoppm)  (tesseract) (model)     (model)     (wkhtmltopdf)
//!                                      │
//!                                      └─ no table: page passes through
//! ```
//!
//! [`task`] runs the steps above for one page; [`merge`] assembles the
//! final document once every task has finished.

pub mod classify;
pub(crate) mod command;
pub mod encode;
pub mod input;
pub mod llm;
pub mod merge;
pub mod ocr;
pub mod postprocess;
pub mod rasterize;
pub mod renderer;
pub mod split;
pub mod synthesize;
pub mod task;
pub mod workarea;
