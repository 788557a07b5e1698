use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Where source text comes from. The preprocessor only ever sees files
/// through this seam.
pub trait SourceLoader {
    /// Resolve a path to the identity used for include-cycle detection.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;
    fn load(&self, path: &Path) -> Result<String>;
}

/// Reads from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        std::fs::canonicalize(path).with_context(|| format!("resolving {}", path.display()))
    }

    fn load(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

/// In-memory file set keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    pub files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), text.into());
    }
}

/// Lexical normalization: drops `.` and folds `..` into its parent.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl SourceLoader for MemoryLoader {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        let p = normalize(path);
        if !self.files.contains_key(&p) {
            bail!("no such file: {}", path.display());
        }
        Ok(p)
    }

    fn load(&self, path: &Path) -> Result<String> {
        match self.files.get(&normalize(path)) {
            Some(text) => Ok(text.clone()),
            None => bail!("no such file: {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_normalizes() {
        let l = MemoryLoader::new().with("lib/defs.asm", "nop");
        assert_eq!(
            l.canonicalize(Path::new("src/../lib/./defs.asm")).unwrap(),
            PathBuf::from("lib/defs.asm")
        );
        assert_eq!(l.load(Path::new("./lib/defs.asm")).unwrap(), "nop");
        assert!(l.load(Path::new("missing.asm")).is_err());
    }

    #[test]
    fn fs_loader_reads_temp_file() {
        let dir = std::env::temp_dir().join(format!("sis16-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.asm");
        std::fs::write(&path, ".text\nnop\n").unwrap();

        let l = FsLoader;
        let canon = l.canonicalize(&path).unwrap();
        assert_eq!(l.load(&canon).unwrap(), ".text\nnop\n");
        assert!(l.canonicalize(&dir.join("missing.asm")).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
