use std::path::{Path, PathBuf};

/// Per-user data root: `~/.local/share/ralph` (platform equivalent).
pub fn store_root() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("ralph")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".ralph")
    } else {
        PathBuf::from(".ralph-store")
    }
}

/// Default projects directory when the config does not set one.
pub fn default_projects_dir() -> PathBuf {
    store_root().join("projects")
}

/// Database file for a run-set: `{projects_dir}/ralph.db`.
pub fn db_path(projects_dir: &Path) -> PathBuf {
    projects_dir.join("ralph.db")
}

/// Create the projects directory if needed and return the database path.
pub fn ensure_db_path(projects_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(projects_dir)?;
    Ok(db_path(projects_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_root_is_not_empty() {
        assert!(!store_root().as_os_str().is_empty());
    }

    #[test]
    fn db_path_under_projects_dir() {
        let p = db_path(Path::new("/tmp/projects"));
        assert_eq!(p, PathBuf::from("/tmp/projects/ralph.db"));
    }

    #[test]
    fn ensure_db_path_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = tmp.path().join("nested").join("projects");
        let db = ensure_db_path(&projects).unwrap();
        assert!(projects.is_dir());
        assert!(db.ends_with("ralph.db"));
    }
}
