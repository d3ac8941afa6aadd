//! Source map generation
//!
//! Line-granular source maps: every emitted line that came from a module
//! maps back to the corresponding line of that module's original source.
//! Mappings use the standard base64-VLQ encoding; sourcesContent is
//! embedded so consumers need no filesystem access.

use serde_json::json;

const BASE64_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Accumulates line mappings while a chunk renders.
#[derive(Debug, Default)]
pub struct SourcemapBuilder {
    sources: Vec<String>,
    sources_content: Vec<String>,
    /// Per output line: (source index, source line), or None for runtime
    /// scaffolding lines.
    lines: Vec<Option<(usize, usize)>>,
}

impl SourcemapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module's original source, returning its source index.
    pub fn add_source(&mut self, name: &str, content: &str) -> usize {
        self.sources.push(name.to_string());
        self.sources_content.push(content.to_string());
        self.sources.len() - 1
    }

    /// Record that the next output line maps to `source_line` of `source`.
    pub fn push_mapped_line(&mut self, source: usize, source_line: usize) {
        self.lines.push(Some((source, source_line)));
    }

    /// Record an output line with no source counterpart.
    pub fn push_scaffold_line(&mut self) {
        self.lines.push(None);
    }

    /// Render the source map JSON for `file`.
    pub fn render(&self, file: &str) -> String {
        let map = json!({
            "version": 3,
            "file": file,
            "sources": self.sources,
            "sourcesContent": self.sources_content,
            "names": [],
            "mappings": self.encode_mappings(),
        });
        map.to_string()
    }

    fn encode_mappings(&self) -> String {
        let mut prev_source = 0i64;
        let mut prev_line = 0i64;
        let mut segments = Vec::with_capacity(self.lines.len());

        for line in &self.lines {
            match line {
                Some((source, source_line)) => {
                    let mut segment = String::new();
                    segment.push_str(&encode_vlq(0));
                    segment.push_str(&encode_vlq(*source as i64 - prev_source));
                    segment.push_str(&encode_vlq(*source_line as i64 - prev_line));
                    segment.push_str(&encode_vlq(0));
                    prev_source = *source as i64;
                    prev_line = *source_line as i64;
                    segments.push(segment);
                }
                None => segments.push(String::new()),
            }
        }

        segments.join(";")
    }
}

/// Encode one signed value as base64 VLQ.
fn encode_vlq(value: i64) -> String {
    let mut vlq: u64 = if value < 0 {
        (((-value) as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };

    let mut out = String::new();
    loop {
        let mut digit = (vlq & 0x1f) as usize;
        vlq >>= 5;
        if vlq != 0 {
            digit |= 0x20;
        }
        out.push(BASE64_CHARS[digit] as char);
        if vlq == 0 {
            break;
        }
    }
    out
}
