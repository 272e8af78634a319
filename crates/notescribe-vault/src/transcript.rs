//! Transcript blocks in note bodies.
//!
//! A transcript is written as a quote block directly below the line that
//! embeds the attachment:
//!
//! ```text
//! ![[rec.m4a]]
//!
//! > **Transcript:**
//! > first line
//! > second line
//! ```
//!
//! Inserting again replaces the existing block, so repeated runs do not
//! stack transcripts. When the embed cannot be found the block is appended
//! under a `## Transcript for <file>` heading instead.

use regex::Regex;

const MARKER: &str = "> **Transcript:**";

/// Render the quote block (no trailing newline).
pub fn render_block(text: &str) -> String {
    let mut block = String::from(MARKER);
    for line in text.trim().lines() {
        block.push('\n');
        if line.trim().is_empty() {
            block.push('>');
        } else {
            block.push_str("> ");
            block.push_str(line.trim_end());
        }
    }
    block
}

/// Insert or replace the transcript for `reference` in `body`.
///
/// `reference` is the embed target as written; `filename` is its bare file
/// name and is tried as well.
pub fn insert_transcript(body: &str, reference: &str, filename: &str, text: &str) -> String {
    let block = render_block(text);
    match find_embed_line_end(body, reference, filename) {
        Some(line_end) => place_after(body, line_end, &block),
        None => {
            let heading = format!("## Transcript for {}", filename);
            match body.find(&heading) {
                Some(start) => place_after(body, start + heading.len(), &block),
                None => {
                    let mut out = body.trim_end_matches('\n').to_string();
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(&heading);
                    out.push_str("\n\n");
                    out.push_str(&block);
                    out.push('\n');
                    out
                }
            }
        }
    }
}

/// Put `block` after position `at`, replacing a transcript block that
/// already follows it.
fn place_after(body: &str, at: usize, block: &str) -> String {
    let after = &body[at..];
    let gap = after.len() - after.trim_start_matches(['\n', '\r']).len();
    let rest = if after[gap..].starts_with(MARKER) {
        let quoted = &after[gap..];
        let mut consumed = 0;
        for line in quoted.split_inclusive('\n') {
            if !line.starts_with('>') {
                break;
            }
            consumed += line.len();
        }
        // Keep the newline that ended the block so the tail layout is unchanged.
        let mut end = gap + consumed;
        if after[..end].ends_with('\n') {
            end -= 1;
            if after[..end].ends_with('\r') {
                end -= 1;
            }
        }
        &after[end..]
    } else {
        after
    };

    let mut out = String::with_capacity(body.len() + block.len() + 4);
    out.push_str(&body[..at]);
    out.push_str("\n\n");
    out.push_str(block);
    if rest.trim().is_empty() {
        out.push('\n');
    } else if rest.starts_with("\n\n") || rest.starts_with("\r\n\r\n") {
        out.push_str(rest);
    } else if rest.starts_with('\n') || rest.starts_with("\r\n") {
        out.push('\n');
        out.push_str(rest);
    } else {
        out.push_str("\n\n");
        out.push_str(rest);
    }
    out
}

/// Byte offset of the end of the line holding the first embed of the file.
fn find_embed_line_end(body: &str, reference: &str, filename: &str) -> Option<usize> {
    let mut targets = vec![regex::escape(reference)];
    if filename != reference {
        targets.push(regex::escape(filename));
    }
    let target = targets.join("|");
    let patterns = [
        format!(r"!\[\[(?:{})(?:[|#][^\]]*)?\]\]", target),
        format!(r"!\[[^\]]*\]\(\s*<?(?:{})>?(?:\s+[^)]*)?\)", target),
        format!(r#"(?is)<audio\b[^>]*\bsrc\s*=\s*["'](?:{})["'][^>]*>(?:.*?</audio>)?"#, target),
    ];

    let embed_end = patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .filter_map(|re| re.find(body))
        .min_by_key(|m| m.start())
        .map(|m| m.end())?;

    Some(
        body[embed_end..]
            .find('\n')
            .map(|i| {
                let end = embed_end + i;
                if body[..end].ends_with('\r') {
                    end - 1
                } else {
                    end
                }
            })
            .unwrap_or(body.len()),
    )
}
