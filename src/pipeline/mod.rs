//! Pipeline stages for document normalization and classification.
//!
//! Each submodule implements one transformation step and can be tested on
//! its own; [`crate::process::Pipeline`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ orient ──▶ normalize ──▶ classify ──▶ assemble
//! (bytes)   (bitmaps)   (0/90/    (crop, warp,   (doc type,   (page PDF,
//!                        180/270)  contrast)      holder)      remote path)
//! ```
//!
//! 1. [`input`]     : read a path, byte buffer or URL and settle the content kind
//! 2. [`extract`]   : decode an image (EXIF-corrected) or rasterise every PDF
//!    page; runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`orient`]    : pick the rotation that makes the page upright from text
//!    detections
//! 4. [`normalize`] : crop to the sheet outline or the text cluster when the
//!    region passes the coverage band
//! 5. [`classify`]  : ask the model for document type and holder name
//! 6. [`assemble`]  : wrap the final bitmap in a one-page PDF and derive its
//!    archive path
//!
//! [`encode`] holds the JPEG helpers shared by `classify` and `assemble`.

pub mod assemble;
pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod orient;
