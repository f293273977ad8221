use glob::Pattern;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions the default decoder can read.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp",
];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("No such file or directory: {0}")]
    NotFound(String),
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand `inputs` into an ordered, de-duplicated list of image paths.
///
/// Each input is a directory (walked recursively, filtered by extension),
/// an existing file (taken as-is), or a glob pattern; a pattern matching
/// nothing only logs a warning. Paths matching any of `excludes` are
/// dropped. Results keep input order and are sorted within a single input.
pub fn discover(inputs: &[String], excludes: &[String]) -> Result<Vec<String>, DiscoveryError> {
    let excludes = excludes
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|source| DiscoveryError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut discovered = Vec::new();

    for input in inputs {
        let mut found = expand(input)?;
        found.sort();

        for path in found {
            if excludes.iter().any(|pattern| pattern.matches_path(&path)) {
                log::debug!("Excluded {}", path.display());
                continue;
            }
            let path = path.to_string_lossy().to_string();
            if seen.insert(path.clone()) {
                discovered.push(path);
            }
        }
    }

    log::info!("Discovered {} image(s) from {} input(s)", discovered.len(), inputs.len());
    Ok(discovered)
}

fn expand(input: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    let path = Path::new(input);

    if path.is_dir() {
        return Ok(WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|p| p.is_file() && is_supported_image(p))
            .collect());
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if !is_glob(input) {
        return Err(DiscoveryError::NotFound(input.to_string()));
    }

    let matches = glob::glob(input).map_err(|source| DiscoveryError::Pattern {
        pattern: input.to_string(),
        source,
    })?;

    let found: Vec<PathBuf> = matches
        .filter_map(Result::ok)
        .filter(|p| p.is_file() && is_supported_image(p))
        .collect();

    if found.is_empty() {
        log::warn!("Pattern {} matched no images", input);
    }
    Ok(found)
}

fn is_glob(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"x").unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_supported_extensions_are_case_insensitive() {
        assert!(is_supported_image(Path::new("a/b/photo.JPG")));
        assert!(is_supported_image(Path::new("scan.tiff")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("no_extension")));
    }

    #[test]
    fn test_directory_walk_is_recursive_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let b = touch(temp_dir.path(), "b.png");
        let a = touch(temp_dir.path(), "a.jpg");
        let nested = touch(temp_dir.path(), "sub/c.webp");
        touch(temp_dir.path(), "readme.txt");

        let root = temp_dir.path().to_string_lossy().to_string();
        let found = discover(&[root], &[]).unwrap();

        assert_eq!(found, vec![a, b, nested]);
    }

    #[test]
    fn test_explicit_files_keep_input_order_and_dedupe() {
        let temp_dir = TempDir::new().unwrap();
        let z = touch(temp_dir.path(), "z.png");
        let a = touch(temp_dir.path(), "a.png");

        let found = discover(&[z.clone(), a.clone(), z.clone()], &[]).unwrap();
        assert_eq!(found, vec![z, a]);
    }

    #[test]
    fn test_glob_patterns_and_excludes() {
        let temp_dir = TempDir::new().unwrap();
        let keep = touch(temp_dir.path(), "keep_1.png");
        touch(temp_dir.path(), "skip_1.png");
        touch(temp_dir.path(), "other.jpg");

        let pattern = temp_dir.path().join("*.png").to_string_lossy().to_string();
        let found = discover(&[pattern], &["*/skip_*".to_string()]).unwrap();

        assert_eq!(found, vec![keep]);
    }

    #[test]
    fn test_bad_patterns_and_missing_inputs_error() {
        assert!(matches!(
            discover(&[], &["[".to_string()]),
            Err(DiscoveryError::Pattern { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.png").to_string_lossy().to_string();
        assert!(matches!(
            discover(&[missing], &[]),
            Err(DiscoveryError::NotFound(_))
        ));
    }

    #[test]
    fn test_glob_without_matches_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let kept = touch(temp_dir.path(), "a.png");
        let stale = temp_dir.path().join("gone/*.jpg").to_string_lossy().to_string();
        let pattern = temp_dir.path().join("*.gif").to_string_lossy().to_string();

        assert!(discover(&[pattern], &[]).unwrap().is_empty());
        assert_eq!(discover(&[stale, kept.clone()], &[]).unwrap(), vec![kept]);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_string_lossy().to_string();
        assert!(discover(&[root], &[]).unwrap().is_empty());
    }
}
