//! Resource names: `projects/{project}/databases/{database}/documents/{path}`.

use super::value::DecodeError;
use std::fmt;
use std::str::FromStr;

/// The database id used when none is configured.
pub const DEFAULT_DATABASE: &str = "(default)";

// projects/{p}/databases/{d}/documents/{at least one segment}
const MIN_SEGMENTS: usize = 7;

/// A fully qualified reference to a Firestore document.
///
/// The resource name is derived from the components on every read, so a
/// reference is always internally consistent. Every constructor validates
/// the name, so any `Reference` survives a round trip through
/// [`Reference::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    project_id: String,
    database_id: String,
    document_path: String,
}

impl Reference {
    /// Builds a reference from its components. Leading and trailing slashes
    /// of `document_path` are ignored; an empty path or empty segment fails.
    pub fn new(
        project_id: &str,
        database_id: &str,
        document_path: &str,
    ) -> Result<Self, DecodeError> {
        Self::parse(&format!(
            "{}{}",
            documents_root(project_id, database_id),
            document_path.trim_matches('/')
        ))
    }

    /// Parses a full resource name such as
    /// `projects/p1/databases/(default)/documents/users/ada`.
    pub fn parse(name: &str) -> Result<Self, DecodeError> {
        let invalid = |reason: String| DecodeError::InvalidReference {
            path: name.to_string(),
            reason,
        };

        let segments: Vec<&str> = name.split('/').collect();
        if segments.len() < MIN_SEGMENTS {
            return Err(invalid(format!(
                "expected at least {} path segments, found {}",
                MIN_SEGMENTS,
                segments.len()
            )));
        }

        for (index, keyword) in [(0, "projects"), (2, "databases"), (4, "documents")] {
            if segments[index] != keyword {
                return Err(invalid(format!(
                    "segment {} must be `{}`, found `{}`",
                    index, keyword, segments[index]
                )));
            }
        }

        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("path contains an empty segment".to_string()));
        }

        Ok(Self {
            project_id: segments[1].to_string(),
            database_id: segments[3].to_string(),
            document_path: segments[5..].join("/"),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// The path below `documents/`, e.g. `users/ada`.
    pub fn document_path(&self) -> &str {
        &self.document_path
    }

    /// The last segment of the document path.
    pub fn id(&self) -> &str {
        last_segment(&self.document_path)
    }

    /// The full resource name.
    pub fn name(&self) -> String {
        format!(
            "{}{}",
            documents_root(&self.project_id, &self.database_id),
            self.document_path
        )
    }

    /// Returns a copy pointing at another document of the same database.
    pub fn with_document_path(&self, document_path: &str) -> Result<Self, DecodeError> {
        Self::new(&self.project_id, &self.database_id, document_path)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Reference {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

/// `projects/{project}/databases/{database}/documents/`
pub(crate) fn documents_root(project_id: &str, database_id: &str) -> String {
    format!("projects/{}/databases/{}/documents/", project_id, database_id)
}

/// Strips the documents root from `path` if it is already there, so that a
/// document name returned by the API can be passed back in unchanged.
pub(crate) fn relative_path<'p>(path: &'p str, root: &str) -> &'p str {
    let path = path.trim_start_matches('/');
    if let Some(rest) = path.strip_prefix(root.trim_end_matches('/')) {
        if rest.is_empty() || rest.starts_with('/') {
            return rest.trim_start_matches('/');
        }
    }
    path
}

pub(crate) fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
