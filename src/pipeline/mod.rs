//! Pipeline stages of the editorial analysis.
//!
//! Each submodule implements one step and knows nothing about sessions;
//! [`crate::manager`] sequences them and owns the state machine.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render(72 DPI) ──▶ classify ──┬──▶ extract(300 DPI) ──▶ summarize
//!                                          │          ▲
//!                                          └─ fallback┘ (manual page list)
//! ```
//!
//! 1. [`input`]     : read a local path or download a URL into PDF bytes
//! 2. [`render`]    : the rasterizer contract and its pdfium implementation
//! 3. [`encode`]    : PNG + base64 for the multimodal request body
//! 4. [`inference`] : the inference contract, bounded concurrency and retry
//! 5. [`parse`]     : detection JSON and Markdown brief parsing
//! 6. [`classify`]  : low-resolution scan for editorial headings
//! 7. [`fallback`]  : validation of user-supplied page lists
//! 8. [`extract`]   : full-resolution rendering of the chosen pages
//! 9. [`summarize`] : one brief request per page

pub mod classify;
pub mod encode;
pub mod extract;
pub mod fallback;
pub mod inference;
pub mod input;
pub mod parse;
pub mod render;
pub mod summarize;
