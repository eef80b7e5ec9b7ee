//! Pipeline stages between the analysis result and the enriched document.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; [`crate::parser::DocumentParser`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ (analysis) ──▶ normalize ──▶ crop ──▶ encode ──▶ vision
//! (path/URL)               (sections)   (pdfium)  (base64)   (figure sections)
//! ```
//!
//! 1. [`input`]     load document bytes from a path or URL, checking `%PDF`
//! 2. [`normalize`] raw layout result to ordered sections, page info and figures
//! 3. [`geometry`]  polygon → bounding box → pixel rectangle
//! 4. [`rasterize`] page rendering behind a trait; pdfium is blocking and not
//!    async-safe, so callers use `spawn_blocking`
//! 5. [`crop`]      figure regions to PNG files in a per-document scratch dir
//! 6. [`encode`]    re-encode and base64-wrap images for the vision request
//! 7. [`vision`]    per-image vision requests with retry, then figure sections

pub mod crop;
pub mod encode;
pub mod geometry;
pub mod input;
pub mod normalize;
pub mod rasterize;
pub mod vision;
