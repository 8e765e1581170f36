use std::path::{Path, PathBuf};

pub const MEMORY_DIR_RELATIVE: &str = ".opencode/memory";
pub const BEADS_DIR_RELATIVE: &str = ".beads";
pub const MEMORY_DB_FILE: &str = "memory.db";
pub const BEADS_DB_FILE: &str = "beads.db";

/// Where the memory store and the external task store live. Always passed in
/// explicitly; nothing in the library looks at the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub memory_dir: PathBuf,
    pub beads_dir: PathBuf,
}

impl MemoryConfig {
    pub fn new(memory_dir: impl Into<PathBuf>, beads_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            beads_dir: beads_dir.into(),
        }
    }

    pub fn for_project(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            memory_dir: root.join(MEMORY_DIR_RELATIVE),
            beads_dir: root.join(BEADS_DIR_RELATIVE),
        }
    }

    pub fn with_memory_dir(mut self, memory_dir: impl Into<PathBuf>) -> Self {
        self.memory_dir = memory_dir.into();
        self
    }

    pub fn with_beads_dir(mut self, beads_dir: impl Into<PathBuf>) -> Self {
        self.beads_dir = beads_dir.into();
        self
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.memory_dir.join(MEMORY_DB_FILE)
    }

    pub fn beads_db_path(&self) -> PathBuf {
        self.beads_dir.join(BEADS_DB_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_layout_derives_both_store_paths() {
        let config = MemoryConfig::for_project("/work/repo");
        assert_eq!(
            config.memory_db_path(),
            PathBuf::from("/work/repo/.opencode/memory/memory.db")
        );
        assert_eq!(
            config.beads_db_path(),
            PathBuf::from("/work/repo/.beads/beads.db")
        );
    }

    #[test]
    fn overrides_replace_only_their_directory() {
        let config = MemoryConfig::for_project("/work/repo").with_beads_dir("/shared/beads");
        assert_eq!(config.memory_dir, PathBuf::from("/work/repo/.opencode/memory"));
        assert_eq!(config.beads_db_path(), PathBuf::from("/shared/beads/beads.db"));
    }
}
