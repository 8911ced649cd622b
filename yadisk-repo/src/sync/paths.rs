use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("entry name is empty")]
    Empty,
    #[error("path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Name used for a repository bound to the Disk root.
pub const ROOT_DISPLAY_NAME: &str = "disk";

/// Splits a logical path like `Projects//notes/` into its non-empty
/// segments. `.` and `..` are refused rather than interpreted.
pub fn logical_segments(path: &str) -> Result<Vec<&str>, PathError> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment {
            "." | ".." => Err(PathError::UnsupportedComponent(segment.to_string())),
            other => Ok(other),
        })
        .collect()
}

/// Canonical `/a/b` form of a logical path, as stored in the marker.
pub fn normalize_logical(path: &str) -> Result<String, PathError> {
    Ok(format!("/{}", logical_segments(path)?.join("/")))
}

pub fn display_name(path: &str) -> Result<String, PathError> {
    Ok(logical_segments(path)?
        .last()
        .map(|segment| segment.to_string())
        .unwrap_or_else(|| ROOT_DISPLAY_NAME.to_string()))
}

/// Appends one entry name to a remote folder path (`disk:/` or `disk:/a`).
pub fn join_remote(parent: &str, name: &str) -> Result<String, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(PathError::UnsupportedComponent(name.to_string()));
    }
    if parent.ends_with('/') {
        Ok(format!("{parent}{name}"))
    } else {
        Ok(format!("{parent}/{name}"))
    }
}
