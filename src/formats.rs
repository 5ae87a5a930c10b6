//! Format registry: input extensions, output format names, and the mapping
//! between a canonical format id and the extension written to disk.
//!
//! A format id (`"markdown"`, `"latex"`, `"plain"`) is what the external
//! converter understands; the extension (`.md`, `.tex`, `.txt`) is what lands
//! on disk. The two differ often enough that the mapping is an explicit
//! table, with `.<id>` as the fallback for everything not listed.

use crate::output::FormatListing;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

/// Input extensions (lowercase, without the dot) the batch picks up when no
/// explicit filter is given.
pub const INPUT_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "odt", "html", "htm", "md", "markdown", "tex", "latex", "rst", "epub", "rtf",
    "txt", "org", "mediawiki", "textile", "asciidoc", "adoc",
];

/// Output format names advertised by [`formats`].
///
/// Names outside this list are still accepted: the external converter may
/// support them even if they are not advertised here.
pub const OUTPUT_FORMATS: &[&str] = &[
    "odt", "docx", "html", "markdown", "md", "latex", "tex", "pdf", "epub", "rst", "asciidoc",
    "rtf", "txt", "org", "mediawiki",
];

/// Format id of the rich intermediate document produced from PDFs.
pub const INTERMEDIATE_FORMAT: &str = "docx";

static EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("markdown", ".md"),
        ("md", ".md"),
        ("gfm", ".md"),
        ("latex", ".tex"),
        ("tex", ".tex"),
        ("plain", ".txt"),
        ("txt", ".txt"),
        ("html5", ".html"),
        ("asciidoc", ".adoc"),
    ])
});

/// Lowercase a format name and rewrite the short aliases to their canonical id.
///
/// Unrecognised names pass through unchanged (lowercased).
pub fn canonicalize(name: &str) -> String {
    let lower = name.trim().trim_start_matches('.').to_ascii_lowercase();
    match lower.as_str() {
        "md" => "markdown".to_string(),
        "txt" => "plain".to_string(),
        "tex" => "latex".to_string(),
        _ => lower,
    }
}

/// File extension (with leading dot) used on disk for a format id.
pub fn extension_for(format_id: &str) -> String {
    let id = format_id.to_ascii_lowercase();
    EXTENSIONS
        .get(id.as_str())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!(".{id}"))
}

/// Whether `extension` (with or without the dot, any case) is a recognised
/// input format.
pub fn is_supported_input(extension: &str) -> bool {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    INPUT_EXTENSIONS.contains(&ext.as_str())
}

/// Lowercase extension of `path` without the dot, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Whether `path` is a PDF, judged by extension.
pub fn is_pdf(path: &Path) -> bool {
    extension_of(path).as_deref() == Some("pdf")
}

/// List supported input and output formats.
pub fn formats() -> FormatListing {
    let mut input_formats: Vec<String> = INPUT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    input_formats.sort();
    FormatListing {
        input_formats,
        output_formats: OUTPUT_FORMATS.iter().map(|f| f.to_string()).collect(),
        note: "PDF input is converted to an intermediate docx with pdf2docx, then with pandoc. \
               All other conversions use pandoc directly."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_rewrites_aliases() {
        assert_eq!(canonicalize("md"), "markdown");
        assert_eq!(canonicalize("TXT"), "plain");
        assert_eq!(canonicalize("tex"), "latex");
        assert_eq!(canonicalize(".md"), "markdown");
    }

    #[test]
    fn canonicalize_passes_unknown_through() {
        assert_eq!(canonicalize("ODT"), "odt");
        assert_eq!(canonicalize("docbook5"), "docbook5");
    }

    #[test]
    fn extension_table_and_fallback() {
        assert_eq!(extension_for("markdown"), ".md");
        assert_eq!(extension_for("latex"), ".tex");
        assert_eq!(extension_for("plain"), ".txt");
        assert_eq!(extension_for("html5"), ".html");
        assert_eq!(extension_for("asciidoc"), ".adoc");
        assert_eq!(extension_for("odt"), ".odt");
        assert_eq!(extension_for("html"), ".html");
    }

    #[test]
    fn supported_inputs() {
        assert!(is_supported_input("pdf"));
        assert!(is_supported_input(".PDF"));
        assert!(is_supported_input("adoc"));
        assert!(is_supported_input("htm"));
        assert!(!is_supported_input("unknown"));
        assert!(!is_supported_input(""));
    }

    #[test]
    fn pdf_detection_is_case_insensitive() {
        assert!(is_pdf(Path::new("/a/Report.PDF")));
        assert!(!is_pdf(Path::new("/a/report.docx")));
        assert!(!is_pdf(Path::new("/a/pdf")));
    }

    #[test]
    fn formats_listing_is_sorted() {
        let listing = formats();
        let mut sorted = listing.input_formats.clone();
        sorted.sort();
        assert_eq!(listing.input_formats, sorted);
        assert!(listing.output_formats.contains(&"odt".to_string()));
    }
}
