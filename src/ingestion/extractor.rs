//! Boilerplate-stripping content extraction for documentation pages.

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::types::{ExtractedDocument, Heading, RagError};

/// Selectors removed outright before any text is collected.
const DENY_SELECTORS: &[&str] = &[
    "script",
    "style",
    "nav",
    "header",
    "footer",
    "aside",
    r#"[class*="nav"]"#,
    r#"[class*="sidebar"]"#,
    r#"[class*="menu"]"#,
    r#"[class*="footer"]"#,
    r#"[class*="cookie"]"#,
    r#"[class*="advertisement"]"#,
    r#"[class*="promo"]"#,
    r#"[class*="pagination"]"#,
    r#"[class*="table-of-contents"]"#,
    r#"[data-testid*="nav"]"#,
    r#"[data-testid*="sidebar"]"#,
];

/// Candidate main-content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    r#"[class*="docItem"]"#,
    r#"[class*="doc-content"]"#,
    r#"[class*="main-content"]"#,
    r#"[role="main"]"#,
    "article",
];

/// Block-level elements whose text forms the extracted paragraphs.
const BLOCK_SELECTOR: &str = "p, li, h1, h2, h3, h4, h5, h6, pre, blockquote, td";

const HEADING_SELECTOR: &str = "h1, h2, h3, h4, h5, h6";

/// Class/id substrings that mark an element as navigation even when it
/// survived the deny list.
const NAVIGATION_MARKERS: &[&str] = &[
    "nav",
    "menu",
    "sidebar",
    "breadcrumb",
    "toc",
    "pagination",
    "pager",
];

/// Extracts clean text, title, and heading structure from raw HTML.
///
/// Parsing never fails: pages that yield no main content produce an
/// [`ExtractedDocument`] with empty text, which downstream stages treat as
/// "fetched, nothing to index" rather than an error.
pub struct ContentExtractor {
    deny: Vec<Selector>,
    content: Vec<Selector>,
    blocks: Selector,
    headings: Selector,
    blank_runs: Regex,
    whitespace: Regex,
}

impl ContentExtractor {
    pub fn new() -> Result<Self, RagError> {
        Ok(Self {
            deny: parse_selectors(DENY_SELECTORS)?,
            content: parse_selectors(CONTENT_SELECTORS)?,
            blocks: parse_selector(BLOCK_SELECTOR)?,
            headings: parse_selector(HEADING_SELECTOR)?,
            blank_runs: Regex::new(r"\n{3,}")
                .map_err(|err| RagError::InvalidDocument(err.to_string()))?,
            whitespace: Regex::new(r"\s+")
                .map_err(|err| RagError::InvalidDocument(err.to_string()))?,
        })
    }

    /// Extract document text and structure from one fetched page.
    pub fn extract(&self, raw_html: &str, url: &Url) -> ExtractedDocument {
        let mut document = Html::parse_document(raw_html);

        // Headings and title come from the unpruned tree so a heading inside
        // a container the deny list later removes is still observed.
        let title = self.extract_title(&document);
        let headings = self.extract_headings(&document);

        self.prune_boilerplate(&mut document);
        let text = self.collect_text(&document);

        let word_count = text.split_whitespace().count();
        let metadata = serde_json::json!({
            "word_count": word_count,
            "headings_count": headings.len(),
        });

        tracing::debug!(
            url = %url,
            words = word_count,
            headings = headings.len(),
            "extracted page content"
        );

        ExtractedDocument {
            url: url.clone(),
            title,
            text,
            headings,
            metadata,
        }
    }

    fn extract_title(&self, document: &Html) -> String {
        if let Ok(selector) = Selector::parse("title") {
            if let Some(element) = document.select(&selector).next() {
                let text = element_text(&element, &self.whitespace);
                if !text.is_empty() {
                    return text;
                }
            }
        }
        // Title falls back to the first heading.
        document
            .select(&self.headings)
            .next()
            .map(|element| element_text(&element, &self.whitespace))
            .unwrap_or_default()
    }

    fn extract_headings(&self, document: &Html) -> Vec<Heading> {
        document
            .select(&self.headings)
            .enumerate()
            .filter_map(|(position, element)| {
                let text = element_text(&element, &self.whitespace);
                if text.is_empty() {
                    return None;
                }
                let level = element
                    .value()
                    .name()
                    .strip_prefix('h')
                    .and_then(|digit| digit.parse::<u8>().ok())?;
                Some(Heading {
                    level,
                    text,
                    position,
                })
            })
            .collect()
    }

    fn prune_boilerplate(&self, document: &mut Html) {
        let mut doomed = Vec::new();
        for selector in &self.deny {
            for element in document.select(selector) {
                doomed.push(element.id());
            }
        }
        for id in doomed {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    fn collect_text(&self, document: &Html) -> String {
        let root = self.find_main_content(document);

        let matched: Vec<ElementRef<'_>> = match &root {
            Some(main) => main.select(&self.blocks).collect(),
            None => document
                .root_element()
                .select(&self.blocks)
                .collect(),
        };
        let matched_ids: HashSet<_> = matched.iter().map(|element| element.id()).collect();

        let mut paragraphs = Vec::new();
        for element in &matched {
            // Keep only the outermost match so nested blocks (a <p> inside a
            // <li>) do not duplicate their text.
            let nested = element
                .ancestors()
                .any(|ancestor| matched_ids.contains(&ancestor.id()));
            if nested || self.is_navigation(element) {
                continue;
            }
            let text = element_text(element, &self.whitespace);
            if !text.is_empty() {
                paragraphs.push(text);
            }
        }

        if paragraphs.is_empty() {
            // Pages without block markup still get whatever text the main
            // container holds.
            let fallback = match &root {
                Some(main) => main.text().collect::<Vec<_>>().join(" "),
                None => document.root_element().text().collect::<Vec<_>>().join(" "),
            };
            let collapsed = self.whitespace.replace_all(fallback.trim(), " ");
            return collapsed.trim().to_string();
        }

        let joined = paragraphs.join("\n\n");
        self.blank_runs.replace_all(&joined, "\n\n").trim().to_string()
    }

    fn find_main_content<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        for selector in &self.content {
            if let Some(element) = document.select(selector).next() {
                return Some(element);
            }
        }
        if let Ok(body) = Selector::parse("body") {
            return document.select(&body).next();
        }
        None
    }

    fn is_navigation(&self, element: &ElementRef<'_>) -> bool {
        let value = element.value();
        let classes = value.attr("class").unwrap_or_default().to_ascii_lowercase();
        let id = value.attr("id").unwrap_or_default().to_ascii_lowercase();
        NAVIGATION_MARKERS
            .iter()
            .any(|marker| classes.contains(marker) || id.contains(marker))
    }
}

fn parse_selector(raw: &str) -> Result<Selector, RagError> {
    Selector::parse(raw).map_err(|err| RagError::InvalidDocument(err.to_string()))
}

fn parse_selectors(raw: &[&str]) -> Result<Vec<Selector>, RagError> {
    raw.iter().map(|one| parse_selector(one)).collect()
}

fn element_text(element: &ElementRef<'_>, whitespace: &Regex) -> String {
    let raw = element.text().collect::<Vec<_>>().join(" ");
    whitespace.replace_all(raw.trim(), " ").trim().to_string()
}
