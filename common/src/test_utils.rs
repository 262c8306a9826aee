use std::path::PathBuf;
use std::sync::OnceLock;

const TEST_OUTPUT_DIR: &str = "test_output";

/// Workspace root: the parent of this crate's manifest directory.
fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    match manifest_dir.parent() {
        Some(parent) => parent.to_path_buf(),
        None => manifest_dir,
    }
}

/// Directory that tests write FITS files and other artifacts to.
pub fn test_output_dir() -> PathBuf {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = workspace_root().join(TEST_OUTPUT_DIR);
        std::fs::create_dir_all(&dir).expect("Failed to create test_output directory");
        dir
    })
    .clone()
}

/// Path of a test artifact. Names should be unique per test, tests run in parallel.
pub fn test_output_path(name: &str) -> PathBuf {
    test_output_dir().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_is_inside_workspace() {
        let path = test_output_path("probe.fits");
        assert!(path.starts_with(workspace_root()));
        assert!(path.parent().is_some_and(|dir| dir.is_dir()));
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("probe.fits"));
    }
}
