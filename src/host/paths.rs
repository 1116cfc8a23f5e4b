use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolves absolute host paths under a root directory.
///
/// Production runs use `/`; tests point the root at a temporary directory so
/// every file-based stage can be exercised without touching the real host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    root: PathBuf,
}

impl HostPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a host path such as `/etc/fstab` to its location under the root.
    pub fn resolve(&self, host_path: impl AsRef<Path>) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in host_path.as_ref().components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    if resolved != self.root {
                        resolved.pop();
                    }
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        resolved
    }

    /// Map a resolved path back to the host path it stands for.
    pub fn host_path(&self, resolved: &Path) -> PathBuf {
        match resolved.strip_prefix(&self.root) {
            Ok(rel) => Path::new("/").join(rel),
            Err(_) => resolved.to_path_buf(),
        }
    }

    /// Entries of a host directory, sorted. A missing directory yields nothing.
    pub fn list_dir(&self, host_dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
        let dir = self.resolve(host_dir);
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut entries = read
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    /// Home directories: `/root` plus every directory under `/home`.
    pub fn home_dirs(&self) -> Vec<PathBuf> {
        let mut homes = Vec::new();
        let root_home = self.resolve("/root");
        if root_home.is_dir() {
            homes.push(root_home);
        }
        match self.list_dir("/home") {
            Ok(entries) => homes.extend(entries.into_iter().filter(|p| p.is_dir())),
            Err(e) => tracing::warn!("Failed to list /home: {}", e),
        }
        homes
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::new("/")
    }
}
