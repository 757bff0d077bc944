use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{CalibError, Result};

pub const EXECUTABLE_PREFIX: &str = "test_";

/// A teleop program offered in the selection menu.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executable {
    pub name: String,
    pub path: PathBuf,
}

/// Regular files in `dir` named `test_*` with an execute bit, sorted by name.
pub fn find_executables(dir: &Path) -> Result<Vec<Executable>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(EXECUTABLE_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
            found.push(Executable {
                name,
                path: entry.path(),
            });
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));

    if found.is_empty() {
        return Err(CalibError::NoExecutables(dir.to_path_buf()));
    }
    log::debug!("[discovery] {} candidate(s) in {}", found.len(), dir.display());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str, mode: u32) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_only_executable_test_files_sorted() {
        let dir = std::env::temp_dir().join(format!("discovery_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("test_subdir")).unwrap();

        touch(&dir, "test_teleop_b", 0o755);
        touch(&dir, "test_teleop_a", 0o700);
        touch(&dir, "test_notes.txt", 0o644);
        touch(&dir, "teleop_main", 0o755);

        let found = find_executables(&dir).unwrap();
        let names: Vec<&str> = found.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["test_teleop_a", "test_teleop_b"]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_empty_dir_reports_no_executables() {
        let dir = std::env::temp_dir().join(format!("discovery_empty_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        assert!(matches!(find_executables(&dir), Err(CalibError::NoExecutables(_))));
        let _ = fs::remove_dir_all(dir);
    }
}
