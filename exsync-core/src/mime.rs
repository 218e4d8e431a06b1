//! Extension based MIME type lookup for uploaded documents.

use std::collections::BTreeMap;
use std::path::Path;

pub const FALLBACK_MIME: &str = "application/octet-stream";

const BUILTIN: &[(&str, &str)] = &[
    ("xml", "application/xml"),
    ("xql", "application/xquery"),
    ("xq", "application/xquery"),
    ("xqm", "application/xquery"),
    ("xquery", "application/xquery"),
    ("xsl", "application/xslt+xml"),
    ("xslt", "application/xslt+xml"),
    ("xconf", "application/xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

#[derive(Debug, Clone)]
pub struct MimeResolver {
    table: BTreeMap<String, String>,
}

impl Default for MimeResolver {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl MimeResolver {
    /// Built-in table with `overrides` layered on top. Keys are matched case-insensitively.
    pub fn new(overrides: &BTreeMap<String, String>) -> Self {
        let mut table: BTreeMap<String, String> = BUILTIN
            .iter()
            .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
            .collect();
        for (ext, mime) in overrides {
            table.insert(ext.trim_start_matches('.').to_ascii_lowercase(), mime.clone());
        }
        Self { table }
    }

    pub fn resolve(&self, path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.table.get(&e.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_else(|| FALLBACK_MIME.to_string())
    }
}
