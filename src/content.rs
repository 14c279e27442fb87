//! Inline-or-file resolution for startup scripts, extra keys and user-data.
//!
//! Each of these can be given as literal text or as a path to read. The two
//! forms are mutually exclusive; file content is returned unmodified.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::ssh::expand_tilde;

/// Kind of content being resolved, used in error messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentKind {
    /// Script run by the provider on first boot.
    StartupScript,
    /// Additional public key installed by the provider.
    ExtraSshKey,
    /// Cloud-init style user-data.
    UserData,
}

impl ContentKind {
    const fn label(self) -> &'static str {
        match self {
            Self::StartupScript => "startup script",
            Self::ExtraSshKey => "extra SSH key",
            Self::UserData => "user-data",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised while resolving content sources.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContentError {
    /// Raised when both inline and file sources are provided.
    #[error("{kind} cannot be provided both inline and via file")]
    BothProvided {
        /// Content being resolved.
        kind: ContentKind,
    },
    /// Raised when a file path is empty or only whitespace.
    #[error("{kind} file path must not be empty")]
    FilePathEmpty {
        /// Content being resolved.
        kind: ContentKind,
    },
    /// Raised when reading the file fails.
    #[error("failed to read {kind} file `{path}`: {message}")]
    FileRead {
        /// Content being resolved.
        kind: ContentKind,
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Resolves content from either an inline value or a file path.
///
/// Blank inline text counts as absent. A file that turns out blank also
/// resolves to `None`.
///
/// # Errors
///
/// Returns [`ContentError`] when both sources are set, the path is blank, or
/// the file cannot be read.
pub fn resolve_content(
    kind: ContentKind,
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, ContentError> {
    if inline.is_some() && file.is_some() {
        return Err(ContentError::BothProvided { kind });
    }

    if let Some(text) = inline {
        return Ok(non_blank(text));
    }

    let Some(path) = file else {
        return Ok(None);
    };
    if path.trim().is_empty() {
        return Err(ContentError::FilePathEmpty { kind });
    }

    let expanded = expand_tilde(path);
    let content = read_utf8_file(Utf8Path::new(&expanded)).map_err(|message| {
        ContentError::FileRead {
            kind,
            path: expanded.clone(),
            message,
        }
    })?;
    Ok(non_blank(&content))
}

fn non_blank(text: &str) -> Option<String> {
    (!text.trim().is_empty()).then(|| text.to_owned())
}

/// Reads a UTF-8 file through an ambient directory handle on its parent.
pub(crate) fn read_utf8_file(path: &Utf8Path) -> Result<String, String> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
