//! Attachment path resolution.
//!
//! A reference such as `rec.m4a` or `audio/rec.m4a` is looked up in a fixed
//! order, nearest to the note first:
//!
//! 1. the note's own directory
//! 2. the vault root
//! 3. the configured attachment folder (from `.obsidian/app.json`)
//! 4. the conventional folders (`Attachments`, `attachments`, `Files`,
//!    `files`, `assets`, `media`)
//! 5. a case-insensitive search of the whole vault
//!
//! Resolution only checks existence and extension. It never reads content
//! and never fails: an unresolvable reference yields `None`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notescribe_core::{defaults, ResolvedAttachment};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::context::{normalize, AttachmentFolder, VaultContext};

#[derive(Debug, Clone)]
pub struct PathResolver {
    ctx: Arc<VaultContext>,
}

impl PathResolver {
    pub fn new(ctx: Arc<VaultContext>) -> Self {
        Self { ctx }
    }

    /// Locate the file behind `reference` as seen from `note`.
    pub fn resolve(&self, note: &Path, reference: &str) -> Option<ResolvedAttachment> {
        let variants = reference_variants(reference);
        let filename = variants
            .iter()
            .rev()
            .find_map(|v| Path::new(v).file_name())
            .map(|n| n.to_string_lossy().into_owned())?;

        for candidate in self.candidates(note, &variants) {
            trace!(candidate = %candidate.display(), "Checking attachment candidate");
            if self.is_acceptable(&candidate) {
                debug!(
                    reference,
                    path = %candidate.display(),
                    "Resolved attachment"
                );
                return Some(ResolvedAttachment {
                    reference: reference.to_string(),
                    filename,
                    path: candidate,
                });
            }
        }

        let found = self.search_vault(&filename)?;
        debug!(
            reference,
            path = %found.display(),
            "Resolved attachment by vault-wide search"
        );
        Some(ResolvedAttachment {
            reference: reference.to_string(),
            filename,
            path: found,
        })
    }

    /// Ordered candidate paths for steps 1-4.
    pub fn candidates(&self, note: &Path, variants: &[String]) -> Vec<PathBuf> {
        let root = self.ctx.root();
        let note_dir = note.parent().unwrap_or(root);

        let mut bases: Vec<PathBuf> = vec![note_dir.to_path_buf(), root.to_path_buf()];
        match self.ctx.attachment_folder() {
            Some(AttachmentFolder::Vault(folder)) => bases.push(root.join(folder)),
            Some(AttachmentFolder::NoteRelative(folder)) => bases.push(note_dir.join(folder)),
            None => {}
        }
        bases.extend(
            defaults::CONVENTIONAL_ATTACHMENT_DIRS
                .iter()
                .map(|dir| root.join(dir)),
        );

        let mut out: Vec<PathBuf> = Vec::new();
        for base in &bases {
            for variant in variants {
                let candidate = normalize(&base.join(variant));
                if !out.contains(&candidate) {
                    out.push(candidate);
                }
            }
        }
        out
    }

    fn is_acceptable(&self, candidate: &Path) -> bool {
        candidate.starts_with(normalize(self.ctx.root()))
            && self.ctx.accepts_extension(candidate)
            && candidate.is_file()
    }

    /// Last resort: walk the vault for a file with the same name, ignoring case.
    fn search_vault(&self, filename: &str) -> Option<PathBuf> {
        if !self.ctx.accepts_extension(Path::new(filename)) {
            return None;
        }
        debug!(filename, "Falling back to vault-wide attachment search");
        let wanted = filename.to_lowercase();
        WalkDir::new(self.ctx.root())
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| entry.file_name().to_string_lossy().to_lowercase() == wanted)
            .map(|entry| entry.into_path())
    }
}

/// The reference as written plus its percent-decoded form when different.
fn reference_variants(reference: &str) -> Vec<String> {
    let trimmed = reference.trim();
    let mut variants = vec![trimmed.to_string()];
    if let Ok(decoded) = urlencoding::decode(trimmed) {
        if decoded != trimmed {
            variants.push(decoded.into_owned());
        }
    }
    variants
}
