use std::path::Path;

/// `true` if `path` exists and is a regular file.
pub fn is_file_present(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_file_present() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("unbound.pid");
        assert!(!is_file_present(&file));
        assert!(!is_file_present(dir.path()));

        std::fs::write(&file, "42\n").unwrap();
        assert!(is_file_present(&file));
    }
}
