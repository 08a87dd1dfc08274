use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::CoreError;

/// A bundled library unit, importable by its file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdlibUnit {
    pub name: String,
    pub path: PathBuf,
    pub text: String,
}

pub fn default_stdlib_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../stdlib")
}

/// Load every `.kite` file under `root`, sorted by unit name. The first
/// file wins when two share a stem.
pub fn load_stdlib(root: impl AsRef<Path>) -> Result<Vec<StdlibUnit>, CoreError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(CoreError::MissingStdlib(root.to_path_buf()));
    }
    let mut units: Vec<StdlibUnit> = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() || !path.extension().is_some_and(|ext| ext == "kite") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if units.iter().any(|unit| unit.name == name) {
            continue;
        }
        let text = fs::read_to_string(path)?;
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        units.push(StdlibUnit {
            name: name.to_string(),
            path: relative,
            text,
        });
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(root = %root.display(), units = units.len(), "loaded stdlib");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_units_from_default_root() {
        let units = load_stdlib(default_stdlib_root()).expect("stdlib should load");
        assert!(units.iter().any(|unit| unit.name == "math"));
    }

    #[test]
    fn names_units_by_file_stem() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("nested")).expect("mkdir");
        fs::write(dir.path().join("nested/text.kite"), "function f() { }").expect("write");
        fs::write(dir.path().join("alpha.kite"), "").expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let units = load_stdlib(dir.path()).expect("load");
        let names: Vec<_> = units.iter().map(|unit| unit.name.as_str()).collect();
        assert_eq!(names, ["alpha", "text"]);
        assert_eq!(units[1].path, PathBuf::from("nested/text.kite"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let err = load_stdlib(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CoreError::MissingStdlib(_)));
    }
}
