#[cfg(test)]
mod tests;

use std::path::{Component, Path, PathBuf};

/// Tag used when a path does not reveal its department
pub const UNKNOWN_DEPARTMENT: &str = "Unknown";

/// Folder name that marks the document corpus root in a path
pub const DEFAULT_ANCHOR: &str = "data";

/// Derives a department label from where a file is stored.
///
/// The department is the folder directly below the corpus root. The root is
/// either recognised by its folder name anywhere in the path, or given as an
/// explicit directory that paths are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartmentTagger {
    /// First path segment literally equal to this name marks the root
    Anchor(String),
    /// Paths are stripped of this prefix; the next segment is the department
    Root(PathBuf),
}

impl Default for DepartmentTagger {
    #[inline]
    fn default() -> Self {
        Self::Anchor(DEFAULT_ANCHOR.to_string())
    }
}

impl DepartmentTagger {
    #[inline]
    pub fn for_root<P: AsRef<Path>>(root: P) -> Self {
        Self::Root(root.as_ref().to_path_buf())
    }

    /// Capitalized department name for `path`, or [`UNKNOWN_DEPARTMENT`]
    #[inline]
    pub fn tag<P: AsRef<Path>>(&self, path: P) -> String {
        let path = path.as_ref();
        let segment = match self {
            Self::Anchor(anchor) => segment_after_anchor(path, anchor),
            Self::Root(root) => path
                .strip_prefix(root)
                .ok()
                .and_then(|relative| normal_segments(relative).next()),
        };

        segment.map_or_else(|| UNKNOWN_DEPARTMENT.to_string(), |s| capitalize(&s))
    }
}

/// Department of `path` using the default `data` anchor
#[inline]
pub fn department_from_path<P: AsRef<Path>>(path: P) -> String {
    DepartmentTagger::default().tag(path)
}

/// Uppercase the first character and lowercase the rest
#[inline]
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
    })
}

fn segment_after_anchor(path: &Path, anchor: &str) -> Option<String> {
    let mut segments = normal_segments(path);
    segments.by_ref().find(|segment| segment == anchor)?;
    segments.next()
}

fn normal_segments(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    })
}
