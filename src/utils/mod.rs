use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// `Ok(false)` only when the path is missing; any other metadata failure is an error.
pub async fn path_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    tokio::fs::metadata(path.as_ref())
        .await
        .map(|_| true)
        .or_else(|e| {
            if e.kind() == ErrorKind::NotFound {
                Ok(false)
            } else {
                Err(e)
            }
        })
}

/// Regular files directly under `dir` matching `pattern`, sorted by file name.
pub async fn glob_files(dir: &Path, pattern: &str) -> io::Result<Vec<PathBuf>> {
    if !tokio::fs::metadata(dir).await?.is_dir() {
        return Err(io::Error::new(
            ErrorKind::Other,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let candidates = {
        let glob = wax::Glob::new(pattern)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;

        let mut candidates = vec![];
        for item in glob.walk(dir) {
            let item = match item {
                Err(_) => continue,
                Ok(item) => item,
            };

            let candidate = item.to_candidate_path();
            let path = PathBuf::from(candidate.as_ref());
            candidates.push(dir.join(path));
        }
        candidates
    };

    let mut files = vec![];
    for path in candidates {
        if tokio::fs::metadata(&path).await?.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_paths_do_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(path_exists(dir.path()).await.unwrap());
        assert!(!path_exists(dir.path().join("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn glob_matches_top_level_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["02-tc.diff", "01-hwaccel.diff", "notes.txt"] {
            tokio::fs::write(dir.path().join(name), "").await.unwrap();
        }
        tokio::fs::create_dir_all(dir.path().join("nested")).await.unwrap();
        tokio::fs::write(dir.path().join("nested/03-deep.diff"), "").await.unwrap();
        tokio::fs::create_dir(dir.path().join("04-dir.diff")).await.unwrap();

        let found = glob_files(dir.path(), "*.diff").await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["01-hwaccel.diff", "02-tc.diff"]);
    }

    #[tokio::test]
    async fn glob_on_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = glob_files(&dir.path().join("nope"), "*.diff").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
