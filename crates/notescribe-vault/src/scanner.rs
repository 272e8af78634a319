//! Vault traversal and attachment discovery.
//!
//! [`VaultScanner::scan`] walks the vault lazily and yields one [`NoteScan`]
//! per Markdown note that survives the exclusion rules. Calling it again
//! starts a fresh walk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notescribe_core::{defaults, Error, ResolvedAttachment, Result};
use regex::Regex;
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::context::VaultContext;
use crate::frontmatter;
use crate::resolver::PathResolver;

/// One note and the attachments it embeds.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteScan {
    /// Absolute note path.
    pub path: PathBuf,
    /// Vault-relative path with `/` separators.
    pub relative: String,
    /// Embed targets in body order, deduplicated.
    pub references: Vec<String>,
    /// References that resolved to an existing file.
    pub attachments: Vec<ResolvedAttachment>,
    /// References that did not resolve.
    pub missing: Vec<String>,
}

impl NoteScan {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

pub struct VaultScanner {
    ctx: Arc<VaultContext>,
    resolver: PathResolver,
    embed_patterns: Vec<Regex>,
}

impl VaultScanner {
    pub fn new(ctx: Arc<VaultContext>) -> Result<Self> {
        let extensions = ctx
            .extensions()
            .iter()
            .map(|e| regex::escape(e))
            .collect::<Vec<_>>()
            .join("|");
        let patterns = [
            // ![[file.ext]], ![[file.ext|alias]], ![[file.ext#t=10]]
            format!(r"(?i)!\[\[([^\]|#]+?\.(?:{}))(?:[|#][^\]]*)?\]\]", extensions),
            // ![alt](file.ext), ![alt](<file with spaces.ext>)
            format!(
                r#"(?i)!\[[^\]]*\]\(\s*<?([^)<>]+?\.(?:{}))>?(?:\s+"[^"]*")?\s*\)"#,
                extensions
            ),
            // <audio src="file.ext">, <source src="file.ext">
            format!(
                r#"(?i)<(?:audio|source)\b[^>]*?\bsrc\s*=\s*["']([^"']+?\.(?:{}))["']"#,
                extensions
            ),
        ];
        let embed_patterns = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("embed pattern: {}", e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            resolver: PathResolver::new(Arc::clone(&ctx)),
            ctx,
            embed_patterns,
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Lazily yield every note that passes the exclusion rules.
    pub fn notes(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(self.ctx.root())
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.prune_dir(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable vault entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_markdown(entry.path()))
            .filter(move |entry| !self.is_excluded(self.ctx.relative(entry.path())))
            .map(DirEntry::into_path)
    }

    /// Lazily scan every note. A note that cannot be read yields an error
    /// item; the walk continues.
    pub fn scan(&self) -> impl Iterator<Item = Result<NoteScan>> + '_ {
        self.notes().map(move |path| self.scan_note(&path))
    }

    /// Read one note and resolve its attachments.
    pub fn scan_note(&self, path: &Path) -> Result<NoteScan> {
        let text = std::fs::read_to_string(path)?;
        let body = frontmatter::split(&text).body;
        let references = self.extract_references(body);

        let mut attachments = Vec::new();
        let mut missing = Vec::new();
        // Records are keyed by bare filename, so the first file of a name wins.
        let mut seen_files: HashMap<String, PathBuf> = HashMap::new();
        for reference in &references {
            match self.resolver.resolve(path, reference) {
                Some(resolved) => match seen_files.get(&resolved.filename) {
                    None => {
                        seen_files.insert(resolved.filename.clone(), resolved.path.clone());
                        attachments.push(resolved);
                    }
                    Some(kept) if *kept != resolved.path => {
                        warn!(
                            note = %self.ctx.display_path(path),
                            attachment = %resolved.filename,
                            kept = %self.ctx.display_path(kept),
                            skipped = %self.ctx.display_path(&resolved.path),
                            "Attachment filename collides with an earlier embed; skipping"
                        );
                    }
                    Some(_) => {}
                },
                None => {
                    warn!(
                        note = %self.ctx.display_path(path),
                        attachment = %reference,
                        "Attachment not found"
                    );
                    missing.push(reference.clone());
                }
            }
        }

        trace!(
            note = %self.ctx.display_path(path),
            references = references.len(),
            resolved = attachments.len(),
            "Scanned note"
        );

        Ok(NoteScan {
            path: path.to_path_buf(),
            relative: self.ctx.display_path(path),
            references,
            attachments,
            missing,
        })
    }

    /// Embed targets in order of appearance, without duplicates.
    pub fn extract_references(&self, body: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = self
            .embed_patterns
            .iter()
            .flat_map(|re| {
                re.captures_iter(body).filter_map(|caps| {
                    let m = caps.get(1)?;
                    Some((m.start(), m.as_str().trim().to_string()))
                })
            })
            .collect();
        found.sort_by_key(|(pos, _)| *pos);

        let mut seen = HashSet::new();
        found
            .into_iter()
            .filter(|(_, r)| seen.insert(r.clone()))
            .map(|(_, r)| r)
            .collect()
    }

    /// Exclusion check for a vault-relative note path.
    ///
    /// Notes under any directory named `templates` (any case, any depth) are
    /// always excluded. Configured patterns are matched against the whole
    /// path, every ancestor path, and every ancestor directory name.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some((_, dirs)) = components.split_last() else {
            return false;
        };

        if dirs
            .iter()
            .any(|d| d.eq_ignore_ascii_case(defaults::TEMPLATES_DIR))
        {
            return true;
        }

        let full = components.join("/");
        let ancestors = (1..=dirs.len()).map(|n| dirs[..n].join("/"));
        let candidates: Vec<String> = std::iter::once(full)
            .chain(ancestors)
            .chain(dirs.iter().cloned())
            .collect();

        self.ctx.exclude_patterns().iter().any(|pattern| {
            candidates.iter().any(|candidate| pattern.matches(candidate))
        })
    }

    /// Skip whole directories that can only hold excluded notes.
    fn prune_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let relative = self.ctx.relative(entry.path());
        // A directory is pruned when a note directly inside it would be excluded.
        self.is_excluded(&relative.join("_.md"))
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}
