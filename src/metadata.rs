//! Bibliographic metadata and reference extraction via a GROBID service.
//!
//! The PDF is posted to one of three service operations and the TEI markup
//! that comes back is parsed into plain structs:
//!
//! | Mode         | Operation                      | Populates               |
//! |--------------|--------------------------------|-------------------------|
//! | `Header`     | `/api/processHeaderDocument`   | `metadata`              |
//! | `References` | `/api/processReferences`       | `references`            |
//! | `FullText`   | `/api/processFulltextDocument` | `metadata`, `references`|
//!
//! The endpoint comes from [`MetadataRequest::endpoint`], else the
//! `GROBID_URL` environment variable, else `http://localhost:8070`.
//!
//! [`extract_metadata`] always returns a [`MetadataResponse`]. On failure it
//! carries `success: false` and an error message, and nothing else.

use crate::error::DocBatchError;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Used when neither the request nor the environment names an endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8070";

/// Environment variable overriding the service endpoint.
pub const ENDPOINT_ENV: &str = "GROBID_URL";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

// ── Request / response types ─────────────────────────────────────────────

/// Which part of the document to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Title, authors, abstract, keywords, date, DOI. (default)
    #[default]
    Header,
    /// The bibliography only.
    References,
    /// Header and bibliography from a full-document pass.
    FullText,
}

impl ExtractionMode {
    fn operation(&self) -> &'static str {
        match self {
            ExtractionMode::Header => "processHeaderDocument",
            ExtractionMode::References => "processReferences",
            ExtractionMode::FullText => "processFulltextDocument",
        }
    }

    fn wants_header(&self) -> bool {
        matches!(self, ExtractionMode::Header | ExtractionMode::FullText)
    }

    fn wants_references(&self) -> bool {
        matches!(self, ExtractionMode::References | ExtractionMode::FullText)
    }
}

impl FromStr for ExtractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(ExtractionMode::Header),
            "references" | "refs" => Ok(ExtractionMode::References),
            "fulltext" | "full-text" | "full" => Ok(ExtractionMode::FullText),
            other => Err(format!(
                "unknown extraction mode '{other}' (expected header, references or fulltext)"
            )),
        }
    }
}

/// Options for one extraction call.
#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub mode: ExtractionMode,
    /// Let the service enrich the header against external bibliographic
    /// databases. Default: true.
    pub consolidate_header: bool,
    /// Same, for each reference. Default: false.
    pub consolidate_citations: bool,
    /// Ask the service to add `xml:id`s to the TEI. Default: false.
    pub generate_ids: bool,
    /// Ask the service to split paragraphs into sentences. Default: false.
    pub segment_sentences: bool,
    /// Service base URL. If None, `GROBID_URL` or [`DEFAULT_ENDPOINT`].
    pub endpoint: Option<String>,
    /// HTTP timeout. Default: 120 s.
    pub timeout_secs: u64,
}

impl Default for MetadataRequest {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            consolidate_header: true,
            consolidate_citations: false,
            generate_ids: false,
            segment_sentences: false,
            endpoint: None,
            timeout_secs: 120,
        }
    }
}

impl MetadataRequest {
    /// Base URL actually used, without a trailing slash.
    pub fn resolved_endpoint(&self) -> String {
        let raw = self
            .endpoint
            .clone()
            .or_else(|| std::env::var(ENDPOINT_ENV).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        raw.trim().trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub affiliation: Option<String>,
    pub email: Option<String>,
}

/// Header metadata of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub authors: Vec<Author>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    pub date: Option<String>,
    pub doi: Option<String>,
}

/// One bibliography entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
}

/// Result of [`extract_metadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub success: bool,
    /// Present for header and full-text extraction.
    pub metadata: Option<DocumentMetadata>,
    /// Present for reference and full-text extraction.
    pub references: Option<Vec<Reference>>,
    pub error: Option<String>,
}

impl MetadataResponse {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            metadata: None,
            references: None,
            error: Some(message),
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Extract metadata and/or references from a PDF.
pub async fn extract_metadata(path: impl AsRef<Path>, request: &MetadataRequest) -> MetadataResponse {
    let path = path.as_ref();
    let endpoint = request.resolved_endpoint();
    info!(
        "Extracting {:?} from {} via {}",
        request.mode,
        path.display(),
        endpoint
    );

    match fetch_tei(path, request, &endpoint).await.and_then(|xml| {
        let root = parse_tei(&xml)?;
        Ok((
            request.mode.wants_header().then(|| parse_header(&root)),
            request.mode.wants_references().then(|| parse_references(&root)),
        ))
    }) {
        Ok((metadata, references)) => MetadataResponse {
            success: true,
            metadata,
            references,
            error: None,
        },
        Err(e) => {
            warn!("Metadata extraction failed for {}: {}", path.display(), e);
            MetadataResponse::failure(e.to_string())
        }
    }
}

/// Whether the service answers its liveness probe.
pub async fn service_alive(endpoint: &str) -> bool {
    let url = format!("{}/api/isalive", endpoint.trim_end_matches('/'));
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    matches!(client.get(&url).send().await, Ok(r) if r.status().is_success())
}

async fn fetch_tei(
    path: &Path,
    request: &MetadataRequest,
    endpoint: &str,
) -> Result<String, DocBatchError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DocBatchError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            DocBatchError::InvalidInput {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    let unreachable = |reason: String| DocBatchError::ServiceUnreachable {
        endpoint: endpoint.to_string(),
        reason,
    };

    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/pdf")
        .map_err(|e| DocBatchError::Internal(e.to_string()))?;
    let flag = |on: bool| if on { "1" } else { "0" };
    let form = reqwest::multipart::Form::new()
        .part("input", part)
        .text("consolidateHeader", flag(request.consolidate_header))
        .text("consolidateCitations", flag(request.consolidate_citations))
        .text("generateIDs", flag(request.generate_ids))
        .text("segmentSentences", flag(request.segment_sentences));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(request.timeout_secs))
        .build()
        .map_err(|e| unreachable(e.to_string()))?;

    let url = format!("{}/api/{}", endpoint, request.mode.operation());
    debug!("POST {}", url);
    let response = client
        .post(&url)
        .header(reqwest::header::ACCEPT, "application/xml")
        .multipart(form)
        .send()
        .await
        .map_err(|e| unreachable(e.to_string()))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(DocBatchError::ServiceError {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| unreachable(e.to_string()))
}

// ── TEI tree ─────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

/// Minimal element tree; namespaces are dropped, local names kept.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let attrs = e
            .attributes()
            .flatten()
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
                let value = a
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_default();
                (key, value)
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned(),
            attrs,
            children: Vec::new(),
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Direct children named `name`.
    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    /// First descendant named `name`, depth first.
    fn find(&self, name: &str) -> Option<&Element> {
        self.find_where(name, |_| true)
    }

    fn find_where(&self, name: &str, pred: impl Fn(&Element) -> bool + Copy) -> Option<&Element> {
        for child in self.elements() {
            if child.name == name && pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_where(name, pred) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants named `name`, document order.
    fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.name == name {
                out.push(child);
            }
            child.find_all(name, out);
        }
    }

    /// Concatenated text of the subtree, whitespace collapsed.
    fn text(&self) -> String {
        let mut raw = String::new();
        self.collect_text(&mut raw);
        normalize(&raw)
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => {
                    out.push_str(t);
                    out.push(' ');
                }
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    fn non_empty_text(&self) -> Option<String> {
        Some(self.text()).filter(|t| !t.is_empty())
    }
}

fn normalize(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

fn parse_tei(xml: &str) -> Result<Element, DocBatchError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack = vec![Element {
        name: "#document".into(),
        ..Element::default()
    }];

    loop {
        let node = match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(Element::from_start(&e));
                continue;
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    continue;
                }
                match stack.pop() {
                    Some(done) => Node::Element(done),
                    None => continue,
                }
            }
            Ok(Event::Empty(e)) => Node::Element(Element::from_start(&e)),
            Ok(Event::Text(t)) => Node::Text(
                t.unescape()
                    .map_err(|e| DocBatchError::MetadataParse(e.to_string()))?
                    .into_owned(),
            ),
            Ok(Event::CData(t)) => Node::Text(String::from_utf8_lossy(&t.into_inner()).into_owned()),
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => {
                return Err(DocBatchError::MetadataParse(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        };
        if let Some(parent) = stack.last_mut() {
            parent.children.push(node);
        }
    }

    while stack.len() > 1 {
        if let Some(open) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(Node::Element(open));
            }
        }
    }
    let root = stack
        .pop()
        .ok_or_else(|| DocBatchError::MetadataParse("empty document".into()))?;
    if root.find("TEI").is_none() {
        return Err(DocBatchError::MetadataParse("response is not a TEI document".into()));
    }
    Ok(root)
}

// ── TEI → structs ────────────────────────────────────────────────────────

fn parse_header(root: &Element) -> DocumentMetadata {
    let Some(header) = root.find("teiHeader") else {
        return DocumentMetadata::default();
    };

    let title = header
        .find("titleStmt")
        .and_then(|t| t.find("title"))
        .and_then(Element::non_empty_text);

    let authors = header
        .find("sourceDesc")
        .map(|src| {
            let mut found = Vec::new();
            src.find_all("author", &mut found);
            found.into_iter().filter_map(parse_author).collect()
        })
        .unwrap_or_default();

    let abstract_text = header.find("abstract").and_then(Element::non_empty_text);

    let keywords = header
        .find("keywords")
        .map(|kw| {
            let terms: Vec<String> = kw.children_named("term").filter_map(Element::non_empty_text).collect();
            if terms.is_empty() {
                kw.text()
                    .split([',', ';'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            } else {
                terms
            }
        })
        .unwrap_or_default();

    let date = header
        .find("publicationStmt")
        .and_then(|p| p.find("date"))
        .or_else(|| header.find_where("date", |d| d.attr("type") == Some("published")))
        .and_then(date_value);

    DocumentMetadata {
        title,
        authors,
        abstract_text,
        keywords,
        date,
        doi: doi_of(header),
    }
}

fn parse_author(author: &Element) -> Option<Author> {
    let name = person_name(author.find("persName")?)?;
    let email = author.find("email").and_then(Element::non_empty_text);
    let affiliation = author.find("affiliation").and_then(|aff| {
        let orgs: Vec<String> = aff.children_named("orgName").filter_map(Element::non_empty_text).collect();
        if orgs.is_empty() {
            aff.non_empty_text()
        } else {
            Some(orgs.join(", "))
        }
    });
    Some(Author {
        name,
        affiliation,
        email,
    })
}

fn person_name(pers: &Element) -> Option<String> {
    let parts: Vec<String> = pers
        .elements()
        .filter(|e| e.name == "forename" || e.name == "surname")
        .filter_map(Element::non_empty_text)
        .collect();
    if parts.is_empty() {
        pers.non_empty_text()
    } else {
        Some(parts.join(" "))
    }
}

fn parse_references(root: &Element) -> Vec<Reference> {
    let Some(list) = root.find("listBibl") else {
        return Vec::new();
    };
    list.children_named("biblStruct").map(parse_reference).collect()
}

fn parse_reference(bibl: &Element) -> Reference {
    let analytic = bibl.find("analytic");
    let monogr = bibl.find("monogr");

    let title = analytic
        .and_then(|a| a.find("title"))
        .or_else(|| monogr.and_then(|m| m.find_where("title", |t| t.attr("level") != Some("j"))))
        .and_then(Element::non_empty_text);

    let authors = [analytic, monogr]
        .into_iter()
        .flatten()
        .map(|part| {
            part.children_named("author")
                .filter_map(|a| a.find("persName").and_then(person_name))
                .collect::<Vec<_>>()
        })
        .find(|names| !names.is_empty())
        .unwrap_or_default();

    let journal = monogr
        .and_then(|m| m.find_where("title", |t| t.attr("level") == Some("j")))
        .and_then(Element::non_empty_text);

    let scope = |unit: &str| {
        monogr
            .and_then(|m| m.find_where("biblScope", |b| b.attr("unit") == Some(unit)))
    };
    let volume = scope("volume").and_then(Element::non_empty_text);
    let issue = scope("issue").and_then(Element::non_empty_text);
    let pages = scope("page").and_then(|p| match (p.attr("from"), p.attr("to")) {
        (Some(from), Some(to)) => Some(format!("{from}-{to}")),
        (Some(from), None) => Some(from.to_string()),
        _ => p.non_empty_text(),
    });

    let year = monogr
        .and_then(|m| m.find("date"))
        .and_then(date_value)
        .map(|d| d.chars().take(4).collect());

    Reference {
        title,
        authors,
        year,
        journal,
        volume,
        issue,
        pages,
        doi: doi_of(bibl),
    }
}

fn date_value(date: &Element) -> Option<String> {
    date.attr("when")
        .map(str::to_string)
        .filter(|w| !w.is_empty())
        .or_else(|| date.non_empty_text())
}

fn doi_of(el: &Element) -> Option<String> {
    el.find_where("idno", |i| {
        i.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("doi"))
    })
    .and_then(Element::non_empty_text)
}
