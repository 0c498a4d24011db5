//! Filesystem seam.
//!
//! Everything the deployer reads or writes locally (config, import maps,
//! the toolchain executable) goes through [`FileSystem`], so tests can swap
//! in an in-memory or read-only store.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `data` to `path`, creating or truncating it with permission `mode`.
    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        (**self).write(path, data, mode)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        (**self).create_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        (**self).read_dir(path)
    }
}

/// The host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl FileSystem for OsFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let mut file = options.open(path)?;
        file.write_all(data)?;

        // OpenOptions::mode only applies on creation; fix up existing files.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[derive(Debug, Clone)]
enum MemNode {
    Dir,
    File { data: Vec<u8>, mode: u32 },
}

/// In-memory filesystem. Writing a file implicitly creates its parents.
#[derive(Debug, Default)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<PathBuf, MemNode>>,
}

impl MemFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permission bits of a file, if it exists.
    pub fn mode(&self, path: &Path) -> Option<u32> {
        match self.nodes().get(path) {
            Some(MemNode::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MemNode>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_parents(nodes: &mut BTreeMap<PathBuf, MemNode>, path: &Path) -> io::Result<()> {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(MemNode::File { .. }) => {
                    return Err(io::Error::other(format!("not a directory: {}", ancestor.display())))
                }
                Some(MemNode::Dir) => {}
                None => {
                    nodes.insert(ancestor.to_path_buf(), MemNode::Dir);
                }
            }
        }
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn exists(&self, path: &Path) -> bool {
        self.nodes().contains_key(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.nodes().get(path) {
            Some(MemNode::File { data, .. }) => Ok(data.clone()),
            Some(MemNode::Dir) => Err(io::Error::other(format!("is a directory: {}", path.display()))),
            None => Err(not_found(path)),
        }
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let mut nodes = self.nodes();
        if let Some(MemNode::Dir) = nodes.get(path) {
            return Err(io::Error::other(format!("is a directory: {}", path.display())));
        }
        Self::insert_parents(&mut nodes, path)?;
        nodes.insert(
            path.to_path_buf(),
            MemNode::File {
                data: data.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes();
        Self::insert_parents(&mut nodes, path)?;
        match nodes.get(path) {
            Some(MemNode::File { .. }) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("file exists: {}", path.display()),
            )),
            Some(MemNode::Dir) => Ok(()),
            None => {
                nodes.insert(path.to_path_buf(), MemNode::Dir);
                Ok(())
            }
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let nodes = self.nodes();
        match nodes.get(path) {
            Some(MemNode::Dir) => {}
            Some(MemNode::File { .. }) => {
                return Err(io::Error::other(format!("not a directory: {}", path.display())))
            }
            None => return Err(not_found(path)),
        }

        Ok(nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .filter_map(|(p, node)| {
                let name = p.file_name()?.to_string_lossy().to_string();
                Some(DirEntry {
                    name,
                    is_dir: matches!(node, MemNode::Dir),
                })
            })
            .collect())
    }
}

/// Wraps another filesystem and rejects every write.
#[derive(Debug)]
pub struct ReadOnlyFs<F> {
    inner: F,
}

impl<F: FileSystem> ReadOnlyFs<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: FileSystem> FileSystem for ReadOnlyFs<F> {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn write(&self, _path: &Path, _data: &[u8], _mode: u32) -> io::Result<()> {
        Err(read_only())
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Err(read_only())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.inner.read_dir(path)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {}", path.display()),
    )
}

fn read_only() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted")
}
