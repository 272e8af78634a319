//! Frontmatter codec.
//!
//! A note may start with a YAML block delimited by `---` lines. Parsing never
//! fails: when the block is not valid YAML the codec falls back, in order, to
//! replacing template placeholders (`<% %>`, `{{ }}`, `{% %}`) with an inert
//! string, then to recovering `key: value` entries one at a time. Whatever
//! cannot be recovered is dropped and reported at the configured severity.

use std::sync::OnceLock;

use notescribe_core::{defaults, Error, FrontmatterErrorLevel, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::{debug, error, info, trace, warn};

/// How the metadata block was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// No frontmatter block present.
    Absent,
    /// Block parsed as-is.
    Direct,
    /// Parsed after replacing template placeholders.
    Sanitized,
    /// Recovered entry by entry; some entries may be missing.
    LineByLine,
}

impl ParseStrategy {
    /// Whether rewriting the block could lose information the user wrote.
    pub fn is_lossy(&self) -> bool {
        matches!(self, ParseStrategy::Sanitized | ParseStrategy::LineByLine)
    }
}

/// A parsed note.
#[derive(Debug, Clone, PartialEq)]
pub struct Frontmatter {
    pub metadata: Mapping,
    pub body: String,
    pub strategy: ParseStrategy,
    /// Comment lines to emit at the top of the block on rewrite.
    pub comments: Vec<String>,
    /// Problems found while parsing, already logged.
    pub issues: Vec<String>,
}

impl Frontmatter {
    /// Serialize back to note text, keeping comment lines.
    pub fn to_text(&self) -> Result<String> {
        serialize_with_comments(&self.metadata, &self.body, &self.comments)
    }
}

/// Raw split of a note into header and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    /// Text between the delimiters, without the delimiter lines.
    pub header: Option<&'a str>,
    /// Everything up to and including the closing delimiter line.
    pub head: &'a str,
    pub body: &'a str,
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == "---"
}

/// Split note text at the frontmatter delimiters without parsing YAML.
///
/// A block without a closing delimiter is not frontmatter.
pub fn split(text: &str) -> Split<'_> {
    let no_header = Split {
        header: None,
        head: "",
        body: text,
    };

    let first_end = match text.find('\n') {
        Some(i) => i,
        None => return no_header,
    };
    if !is_delimiter(&text[..first_end]) {
        return no_header;
    }

    let header_start = first_end + 1;
    let mut pos = header_start;
    while pos <= text.len() {
        let line_end = text[pos..].find('\n').map(|i| pos + i);
        let line = &text[pos..line_end.unwrap_or(text.len())];
        if is_delimiter(line) {
            let header_end = if pos > header_start { pos - 1 } else { pos };
            let body_start = line_end.map(|i| i + 1).unwrap_or(text.len());
            return Split {
                header: Some(text[header_start..header_end].trim_end_matches('\r')),
                head: &text[..body_start],
                body: &text[body_start..],
            };
        }
        match line_end {
            Some(i) => pos = i + 1,
            None => break,
        }
    }
    no_header
}

/// Parse note text, logging problems at warning level.
///
/// Returns the metadata mapping and the body. Never fails.
pub fn parse(text: &str) -> (Mapping, String) {
    let fm = parse_document(text, FrontmatterErrorLevel::Warning);
    (fm.metadata, fm.body)
}

/// Parse note text with full detail, logging problems at `level`.
pub fn parse_document(text: &str, level: FrontmatterErrorLevel) -> Frontmatter {
    let parts = split(text);
    let header = match parts.header {
        Some(header) => header.replace("\r\n", "\n"),
        None => {
            return Frontmatter {
                metadata: Mapping::new(),
                body: text.to_string(),
                strategy: ParseStrategy::Absent,
                comments: Vec::new(),
                issues: Vec::new(),
            }
        }
    };

    let mut comments = leading_comments(&header);
    let mut issues = Vec::new();

    let (metadata, strategy) = match parse_mapping(&header) {
        Ok(mapping) => (mapping, ParseStrategy::Direct),
        Err(direct_err) => {
            issues.push(format!("invalid YAML: {}", direct_err));
            match parse_mapping(&sanitize_templates(&header)) {
                Ok(mapping) => (mapping, ParseStrategy::Sanitized),
                Err(_) => (
                    parse_line_by_line(&header, level, &mut issues),
                    ParseStrategy::LineByLine,
                ),
            }
        }
    };

    if strategy.is_lossy() {
        report(
            level,
            &format!(
                "Frontmatter recovered with {:?} strategy: {}",
                strategy,
                issues.join("; ")
            ),
        );
        comments = header.lines().map(|l| format!("# {}", l)).collect();
        comments.insert(0, "# notescribe: original frontmatter preserved below".to_string());
    }

    Frontmatter {
        metadata,
        body: parts.body.to_string(),
        strategy,
        comments,
        issues,
    }
}

/// Serialize metadata and body into note text.
///
/// `parse(serialize(m, b)) == (m, b)` for every mapping this crate produces.
pub fn serialize(metadata: &Mapping, body: &str) -> Result<String> {
    serialize_with_comments(metadata, body, &[])
}

fn serialize_with_comments(metadata: &Mapping, body: &str, comments: &[String]) -> Result<String> {
    if metadata.is_empty() && comments.is_empty() {
        let first_line = body.split('\n').next().unwrap_or("");
        if is_delimiter(first_line) && body.contains('\n') {
            return Ok(format!("---\n---\n{}", body));
        }
        return Ok(body.to_string());
    }

    let yaml = if metadata.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(metadata)?
    };

    // A block that would not read back cleanly is never written.
    parse_mapping(&yaml)
        .map_err(|e| Error::Frontmatter(format!("serialized frontmatter is invalid: {}", e)))?;

    let mut out = String::from("---\n");
    for comment in comments {
        out.push_str(comment);
        out.push('\n');
    }
    out.push_str(&yaml);
    out.push_str("---\n");
    out.push_str(body);
    Ok(out)
}

fn parse_mapping(yaml: &str) -> std::result::Result<Mapping, String> {
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(other) => Err(format!("frontmatter is not a mapping: {:?}", other)),
        Err(e) => Err(e.to_string()),
    }
}

fn leading_comments(header: &str) -> Vec<String> {
    header
        .lines()
        .take_while(|l| l.trim_start().starts_with('#'))
        .map(|l| l.to_string())
        .collect()
}

fn template_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"<%.*?%>").expect("templater pattern is valid"),
            Regex::new(r"\{\{.*?\}\}").expect("mustache pattern is valid"),
            Regex::new(r"\{%.*?%\}").expect("jinja pattern is valid"),
        ]
    })
}

fn has_template(text: &str) -> bool {
    template_patterns().iter().any(|re| re.is_match(text))
}

/// Replace template syntax with a quoted placeholder.
pub fn sanitize_templates(yaml: &str) -> String {
    let replacement = format!("\"{}\"", defaults::TEMPLATE_PLACEHOLDER);
    template_patterns()
        .iter()
        .fold(yaml.to_string(), |acc, re| {
            re.replace_all(&acc, replacement.as_str()).into_owned()
        })
}

/// Recover top-level entries one at a time.
///
/// Each top-level key line plus its indented continuation lines is parsed as
/// its own YAML document. Entries that fail are dropped, except values that
/// contain template syntax, which are kept verbatim as strings.
fn parse_line_by_line(
    header: &str,
    level: FrontmatterErrorLevel,
    issues: &mut Vec<String>,
) -> Mapping {
    let mut entries: Vec<Vec<&str>> = Vec::new();
    for line in header.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let continuation = line.starts_with(' ') || line.starts_with('\t') || trimmed.starts_with("- ");
        match entries.last_mut() {
            Some(entry) if continuation => entry.push(line),
            _ if continuation => {
                skip_line(level, issues, line, "continuation without a key");
            }
            _ => entries.push(vec![line]),
        }
    }

    let mut mapping = Mapping::new();
    for entry in entries {
        let text = entry.join("\n");
        match parse_mapping(&text) {
            Ok(parsed) => {
                trace!(entry = %text, "Recovered frontmatter entry");
                mapping.extend(parsed);
            }
            Err(e) => match template_entry(entry[0]) {
                Some((key, value)) => {
                    mapping.insert(Value::String(key), Value::String(value));
                }
                None => skip_line(level, issues, entry[0], &e),
            },
        }
    }
    mapping
}

fn template_entry(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || !has_template(value) {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn skip_line(level: FrontmatterErrorLevel, issues: &mut Vec<String>, line: &str, reason: &str) {
    let message = format!("skipped frontmatter line '{}': {}", line.trim(), reason);
    report(level, &message);
    issues.push(message);
}

/// Log a frontmatter diagnostic at the configured level.
pub fn report(level: FrontmatterErrorLevel, message: &str) {
    match level {
        FrontmatterErrorLevel::Debug => debug!(component = "frontmatter", "{}", message),
        FrontmatterErrorLevel::Info => info!(component = "frontmatter", "{}", message),
        FrontmatterErrorLevel::Warning => warn!(component = "frontmatter", "{}", message),
        FrontmatterErrorLevel::Error | FrontmatterErrorLevel::Critical => {
            error!(component = "frontmatter", "{}", message)
        }
        FrontmatterErrorLevel::Silent => {}
    }
}
