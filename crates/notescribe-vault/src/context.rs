//! Immutable vault description shared by every component.

use std::path::{Component, Path, PathBuf};

use notescribe_core::{defaults, Config, Error, FrontmatterErrorLevel, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Where the host application stores new attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentFolder {
    /// Folder relative to the vault root.
    Vault(PathBuf),
    /// Folder relative to each note's own directory (`./` prefix).
    NoteRelative(PathBuf),
}

/// Subset of `.obsidian/app.json` that affects attachment placement.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    attachment_folder_path: Option<String>,
    new_file_location: Option<String>,
    new_file_folder_path: Option<String>,
}

/// Vault root plus the settings every component needs.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it.
#[derive(Debug, Clone)]
pub struct VaultContext {
    root: PathBuf,
    attachment_folder: Option<AttachmentFolder>,
    extensions: Vec<String>,
    exclude_patterns: Vec<glob::Pattern>,
    namespace: String,
    frontmatter_error_level: FrontmatterErrorLevel,
}

impl VaultContext {
    /// Context with default extensions and exclusions.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let config = Config {
            vault_path: root.into(),
            ..Config::default()
        };
        Self::from_config(&config)
    }

    /// The root is canonicalized so resolver candidates built from it are
    /// absolute regardless of the working directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.vault_path.is_dir() {
            return Err(Error::Config(format!(
                "vault path is not a directory: {}",
                config.vault_path.display()
            )));
        }
        let root = std::fs::canonicalize(&config.vault_path).map_err(|e| {
            Error::Config(format!(
                "cannot resolve vault path {}: {}",
                config.vault_path.display(),
                e
            ))
        })?;

        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| Error::Config(format!("invalid exclude pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let extensions = config
            .attachment_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let attachment_folder = read_attachment_folder(&root);
        debug!(
            vault = %root.display(),
            ?attachment_folder,
            "Vault context initialised"
        );

        Ok(Self {
            root,
            attachment_folder,
            extensions,
            exclude_patterns,
            namespace: config.namespace.clone(),
            frontmatter_error_level: config.frontmatter_error_level,
        })
    }

    pub fn with_attachment_folder(mut self, folder: Option<AttachmentFolder>) -> Self {
        self.attachment_folder = folder;
        self
    }

    pub fn with_frontmatter_error_level(mut self, level: FrontmatterErrorLevel) -> Self {
        self.frontmatter_error_level = level;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn attachment_folder(&self) -> Option<&AttachmentFolder> {
        self.attachment_folder.as_ref()
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn exclude_patterns(&self) -> &[glob::Pattern] {
        &self.exclude_patterns
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn frontmatter_error_level(&self) -> FrontmatterErrorLevel {
        self.frontmatter_error_level
    }

    /// Whether `path` has one of the accepted attachment extensions.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Path relative to the vault root, or the path itself when outside it.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Vault-relative path with `/` separators, for logs and summaries.
    pub fn display_path(&self, path: &Path) -> String {
        self.relative(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a vault-relative note path supplied by a user.
    pub fn note_path(&self, relative: &Path) -> Result<PathBuf> {
        let joined = normalize(&self.root.join(relative));
        if !joined.starts_with(normalize(&self.root)) {
            return Err(Error::InvalidInput(format!(
                "note path escapes the vault: {}",
                relative.display()
            )));
        }
        if !joined.is_file() {
            return Err(Error::NotFound(relative.display().to_string()));
        }
        Ok(joined)
    }
}

/// Lexically remove `.` and `..` components. Leading `..` of a relative
/// path have nothing to cancel and are kept.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn read_attachment_folder(root: &Path) -> Option<AttachmentFolder> {
    let path = root
        .join(defaults::OBSIDIAN_DIR)
        .join(defaults::OBSIDIAN_APP_CONFIG);
    let content = std::fs::read_to_string(&path).ok()?;
    let settings: AppSettings = match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable app settings");
            return None;
        }
    };
    attachment_folder_from(&settings)
}

fn attachment_folder_from(settings: &AppSettings) -> Option<AttachmentFolder> {
    let raw = match settings.attachment_folder_path.as_deref() {
        Some(path) => path,
        None if settings.new_file_location.as_deref() == Some("folder") => {
            settings.new_file_folder_path.as_deref()?
        }
        None => return None,
    };

    if raw == "./" || raw == "." {
        // Same folder as the note: already the first resolver candidate.
        return None;
    }
    if let Some(rest) = raw.strip_prefix("./") {
        return Some(AttachmentFolder::NoteRelative(PathBuf::from(rest)));
    }
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(AttachmentFolder::Vault(PathBuf::from(trimmed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(json: &str) -> AppSettings {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_attachment_folder_vault_relative() {
        let folder = attachment_folder_from(&settings(r#"{"attachmentFolderPath":"Audio"}"#));
        assert_eq!(folder, Some(AttachmentFolder::Vault(PathBuf::from("Audio"))));
    }

    #[test]
    fn test_attachment_folder_note_relative() {
        let folder =
            attachment_folder_from(&settings(r#"{"attachmentFolderPath":"./assets"}"#));
        assert_eq!(
            folder,
            Some(AttachmentFolder::NoteRelative(PathBuf::from("assets")))
        );
        assert_eq!(
            attachment_folder_from(&settings(r#"{"attachmentFolderPath":"./"}"#)),
            None
        );
        assert_eq!(
            attachment_folder_from(&settings(r#"{"attachmentFolderPath":"/"}"#)),
            None
        );
    }

    #[test]
    fn test_attachment_folder_legacy_keys() {
        let folder = attachment_folder_from(&settings(
            r#"{"newFileLocation":"folder","newFileFolderPath":"Inbox"}"#,
        ));
        assert_eq!(folder, Some(AttachmentFolder::Vault(PathBuf::from("Inbox"))));
        assert_eq!(
            attachment_folder_from(&settings(r#"{"newFileLocation":"root"}"#)),
            None
        );
    }

    #[test]
    fn test_context_reads_app_json() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        std::fs::write(
            dir.path().join(".obsidian/app.json"),
            r#"{"attachmentFolderPath":"Recordings"}"#,
        )
        .unwrap();

        let ctx = VaultContext::new(dir.path()).unwrap();
        assert_eq!(
            ctx.attachment_folder(),
            Some(&AttachmentFolder::Vault(PathBuf::from("Recordings")))
        );
        assert!(ctx.accepts_extension(Path::new("a/b/REC.M4A")));
        assert!(!ctx.accepts_extension(Path::new("notes.md")));
    }

    #[test]
    fn test_context_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(VaultContext::new(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_note_path_rejects_escape() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "x").unwrap();
        let ctx = VaultContext::new(dir.path()).unwrap();
        assert!(ctx.note_path(Path::new("a.md")).is_ok());
        assert!(matches!(
            ctx.note_path(Path::new("../outside.md")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ctx.note_path(Path::new("missing.md")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/v/notes/../audio/./a.m4a")),
            PathBuf::from("/v/audio/a.m4a")
        );
        assert_eq!(normalize(Path::new("/../a.m4a")), PathBuf::from("/a.m4a"));
    }

    #[test]
    fn test_normalize_keeps_leading_parent_dirs() {
        assert_eq!(
            normalize(Path::new("../../vault/daily/../rec.m4a")),
            PathBuf::from("../../vault/rec.m4a")
        );
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let dir = TempDir::new().unwrap();
        let cwd = std::env::current_dir().unwrap();
        let depth = cwd.components().count() - 1;
        let relative =
            PathBuf::from("../".repeat(depth)).join(dir.path().strip_prefix("/").unwrap());
        let ctx = VaultContext::new(relative).unwrap();
        assert!(ctx.root().is_absolute());
        assert_eq!(ctx.root(), std::fs::canonicalize(dir.path()).unwrap());
    }
}
