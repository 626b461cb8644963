//! Static resource files: the symbolizer, suppression lists and the symbolize proxy.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::{ReproError, ReproResult};

pub const SYMBOLIZER_FILE: &str = "llvm-symbolizer";
pub const SYMBOLIZE_PROXY_FILE: &str = "asan_symbolize_proxy.py";
pub const SUPPRESSIONS_DIR: &str = "suppressions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    root: PathBuf,
    symbolizer: PathBuf,
}

impl Resources {
    /// Requires the symbolizer to exist; packaging sometimes drops the executable bit, so it is
    /// restored here.
    pub fn locate(root: &Path) -> ReproResult<Self> {
        let symbolizer = root.join(SYMBOLIZER_FILE);
        if !symbolizer.is_file() {
            return Err(ReproError::MissingResource(symbolizer));
        }
        ensure_mode(&symbolizer, 0o755)?;
        Ok(Self {
            root: root.to_path_buf(),
            symbolizer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn symbolizer(&self) -> &Path {
        &self.symbolizer
    }

    /// `suppressions/<family>_suppressions.txt` for a variable like `UBSAN_OPTIONS`.
    pub fn suppressions_for(&self, variable: &str) -> ReproResult<PathBuf> {
        let family = variable
            .split('_')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReproError::Config(format!("cannot derive a sanitizer family from {variable:?}")))?
            .to_ascii_lowercase();
        let path = self
            .root
            .join(SUPPRESSIONS_DIR)
            .join(format!("{family}_suppressions.txt"));
        if !path.is_file() {
            return Err(ReproError::MissingResource(path));
        }
        Ok(path)
    }

    pub fn symbolize_proxy(&self) -> ReproResult<PathBuf> {
        let path = self.root.join(SYMBOLIZE_PROXY_FILE);
        if !path.is_file() {
            return Err(ReproError::MissingResource(path));
        }
        ensure_mode(&path, 0o755)?;
        Ok(path)
    }
}

fn ensure_mode(path: &Path, mode: u32) -> ReproResult<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.mode() & 0o777 != mode {
        perms.set_mode(mode);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource_dir() -> PathBuf {
        let root = std::env::temp_dir().join(format!("crashrepro-res-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join(SUPPRESSIONS_DIR)).unwrap();
        root
    }

    #[test]
    fn missing_symbolizer_is_reported() {
        let root = resource_dir();
        let err = Resources::locate(&root).unwrap_err();
        assert!(matches!(err, ReproError::MissingResource(p) if p.ends_with(SYMBOLIZER_FILE)));
        assert!(ReproError::MissingResource(PathBuf::new()).is_installation_error());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn restores_symbolizer_mode_and_finds_suppressions() {
        let root = resource_dir();
        let sym = root.join(SYMBOLIZER_FILE);
        std::fs::write(&sym, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&sym, std::fs::Permissions::from_mode(0o600)).unwrap();
        std::fs::write(root.join(SUPPRESSIONS_DIR).join("lsan_suppressions.txt"), "").unwrap();

        let res = Resources::locate(&root).unwrap();
        assert_eq!(std::fs::metadata(&sym).unwrap().permissions().mode() & 0o777, 0o755);
        assert_eq!(
            res.suppressions_for("LSAN_OPTIONS").unwrap(),
            root.join("suppressions/lsan_suppressions.txt")
        );
        assert!(matches!(res.suppressions_for("UBSAN_OPTIONS"), Err(ReproError::MissingResource(_))));
        let _ = std::fs::remove_dir_all(&root);
    }
}
