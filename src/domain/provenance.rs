//! Call-site capture for tree mutations.
//!
//! Builder methods are `#[track_caller]`, so `Location::caller()` inside them reports the
//! operator's source line rather than the builder's.

use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};

/// Where a node or capability came from: `file:line` for builder calls, the resolved path for
/// an imported fragment root, `path:line` for entries inside a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Provenance(String);

impl Provenance {
    /// Capture the call site of the nearest non-`#[track_caller]` frame.
    #[track_caller]
    pub fn capture() -> Self {
        Self::from_location(Location::caller())
    }

    pub fn from_location(location: &Location<'_>) -> Self {
        Self(format!(
            "{}:{}",
            normalize_separators(location.file()),
            location.line()
        ))
    }

    pub fn from_path(path: &Path) -> Self {
        Self(normalize_separators(&path.display().to_string()))
    }

    pub fn at_line(path: &Path, line: usize) -> Self {
        Self(format!(
            "{}:{}",
            normalize_separators(&path.display().to_string()),
            line
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Provenance {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Directory of the source file behind `location`, anchored at `source_root` when the
/// compiler recorded a relative path.
pub fn caller_dir(location: &Location<'_>, source_root: &Path) -> PathBuf {
    let file = Path::new(location.file());
    let file = if file.is_absolute() {
        file.to_path_buf()
    } else {
        source_root.join(file)
    };
    file.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| source_root.to_path_buf())
}

// Keeps provenance strings stable across platforms.
fn normalize_separators(s: &str) -> String {
    s.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn captured_by_helper() -> Provenance {
        Provenance::capture()
    }

    #[test]
    fn given_track_caller_helper_when_capturing_then_reports_outer_line() {
        let expected_line = line!() + 1;
        let provenance = captured_by_helper();

        assert_eq!(
            provenance.as_str(),
            format!("{}:{}", file!().replace('\\', "/"), expected_line)
        );
    }

    #[test]
    fn given_relative_caller_file_when_resolving_dir_then_joins_source_root() {
        let location = Location::caller();
        let dir = caller_dir(location, Path::new("/work/project"));

        assert!(dir.starts_with("/work/project"));
        assert!(dir.ends_with("domain"));
    }

    #[test]
    fn given_path_and_line_when_formatting_then_uses_colon_separator() {
        let provenance = Provenance::at_line(Path::new("/tmp/rules/origin.json"), 7);
        assert_eq!(provenance.to_string(), "/tmp/rules/origin.json:7");
    }
}
