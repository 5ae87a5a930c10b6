//! Per-file stages of a batch conversion.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ (executor) ──▶ single ──▶ tools / ocr
//! (tasks)                     (route)    (external CLIs)
//! ```
//!
//! 1. [`discover`]: walk the input and build one task per convertible file
//! 2. [`single`]:   pick the route for one task and run it to an outcome
//! 3. [`ocr`]:      OCR and text extraction for scanned PDFs
//! 4. [`tools`]:    locating and invoking the external converters

pub mod discover;
pub mod ocr;
pub mod single;
pub mod tools;
