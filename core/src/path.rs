//! Resource name and field path parsing (spec §3 ResourceName, §4.1).

use std::fmt;

use thiserror::Error;

const MAX_SEGMENT_BYTES: usize = 1500;
const MAX_DEPTH: usize = 100;
const FORBIDDEN_CHARS: &[char] = &['/', '[', ']', '*', '`'];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    EmptyPath,
    #[error("path does not match projects/{{p}}/databases/{{d}}/documents/... shape")]
    BadFormat,
    #[error("segment {index} ({segment:?}) is invalid: {reason}")]
    BadSegment {
        index: usize,
        segment: String,
        reason: &'static str,
    },
    #[error("path depth exceeds the maximum of {max}")]
    TooDeep { max: usize },
}

/// The decomposition of a canonical `projects/{P}/databases/{D}/documents/...` resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub tenant: String,
    pub project: String,
    pub database: String,
    pub segments: Vec<String>,
    pub is_document: bool,
}

impl PathInfo {
    pub fn full_path(&self) -> String {
        Path::join_resource(&self.project, &self.database, &self.segments)
    }
}

impl fmt::Display for PathInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

fn validate_segment(index: usize, segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::BadSegment {
            index,
            segment: segment.to_string(),
            reason: "segment is empty",
        });
    }
    if segment.len() > MAX_SEGMENT_BYTES {
        return Err(PathError::BadSegment {
            index,
            segment: segment.to_string(),
            reason: "segment exceeds 1500 bytes",
        });
    }
    if segment.starts_with("__") {
        return Err(PathError::BadSegment {
            index,
            segment: segment.to_string(),
            reason: "segment must not start with __",
        });
    }
    if segment.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return Err(PathError::BadSegment {
            index,
            segment: segment.to_string(),
            reason: "segment contains a forbidden character",
        });
    }
    Ok(())
}

/// Stateless path parsing and manipulation, grouped as a namespace (spec §4.1 operations).
pub struct Path;

impl Path {
    /// Parses a canonical resource name into its components. Total: never panics.
    pub fn parse(s: &str) -> Result<PathInfo, PathError> {
        if s.is_empty() {
            return Err(PathError::EmptyPath);
        }
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() < 5 || parts[0] != "projects" || parts[2] != "databases" || parts[4] != "documents" {
            return Err(PathError::BadFormat);
        }
        let project = parts[1];
        let database = parts[3];
        validate_segment(0, project).map_err(|_| PathError::BadFormat)?;
        validate_segment(0, database).map_err(|_| PathError::BadFormat)?;

        let doc_segments: Vec<&str> = parts[5..].to_vec();
        let segments: Vec<&str> = if doc_segments.len() == 1 && doc_segments[0].is_empty() {
            Vec::new()
        } else {
            doc_segments
        };

        if segments.len() > MAX_DEPTH {
            return Err(PathError::TooDeep { max: MAX_DEPTH });
        }
        for (i, seg) in segments.iter().enumerate() {
            validate_segment(i, seg)?;
        }

        let is_document = !segments.is_empty() && segments.len() % 2 == 0;

        Ok(PathInfo {
            tenant: project.to_string(),
            project: project.to_string(),
            database: database.to_string(),
            segments: segments.into_iter().map(str::to_string).collect(),
            is_document,
        })
    }

    pub fn is_document(info: &PathInfo) -> bool {
        info.is_document
    }

    pub fn is_collection(info: &PathInfo) -> bool {
        !info.segments.is_empty() && !info.is_document
    }

    /// Returns the parent path. Documents' parent is their collection; a
    /// collection's parent is its containing document. The root collection's
    /// parent is an error (nothing to climb to).
    pub fn parent_of(info: &PathInfo) -> Result<PathInfo, PathError> {
        if info.segments.is_empty() {
            return Err(PathError::BadFormat);
        }
        let mut segments = info.segments.clone();
        segments.pop();
        Ok(PathInfo {
            tenant: info.tenant.clone(),
            project: info.project.clone(),
            database: info.database.clone(),
            is_document: !segments.is_empty() && segments.len() % 2 == 0,
            segments,
        })
    }

    pub fn join(project: &str, database: &str, segments: &[&str]) -> Result<PathInfo, PathError> {
        let s = Self::join_resource(project, database, segments);
        Self::parse(&s)
    }

    fn join_resource(project: &str, database: &str, segments: &[impl AsRef<str>]) -> String {
        let tail = segments.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join("/");
        format!("projects/{}/databases/{}/documents/{}", project, database, tail)
    }
}

/// Validates and splits a dot-separated field path (spec §3 Query FieldPath).
pub fn parse_field_path(s: &str) -> Result<Vec<String>, PathError> {
    if s.is_empty() {
        return Err(PathError::EmptyPath);
    }
    if s.starts_with('.') || s.ends_with('.') || s.contains("..") {
        return Err(PathError::BadFormat);
    }
    let segments: Vec<&str> = s.split('.').collect();
    if segments.len() > MAX_DEPTH {
        return Err(PathError::TooDeep { max: MAX_DEPTH });
    }
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            return Err(PathError::BadSegment {
                index: i,
                segment: (*seg).to_string(),
                reason: "segment is empty",
            });
        }
    }
    Ok(segments.into_iter().map(str::to_string).collect())
}
