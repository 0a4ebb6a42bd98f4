//! Staging filesystem held in memory.
//!
//! [`MemFs`] copies a directory of configuration files into memory so the
//! patch phases can rewrite them freely. Nothing touches the real disk until
//! [`MemFs::materialize`] is called, which consumes the filesystem: the
//! tree is either written out to a target directory or streamed as a
//! preview.
//!
//! Every node carries its own `RwLock`, so readers never observe a torn
//! write and writers to the same node are serialized.

pub mod errors;

pub use errors::VfsError;

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

/// File extension of recognized configuration files.
pub const CONFIG_EXTENSION: &str = ".tf";

/// Whether `name` looks like a configuration file.
pub fn is_config_file(name: &str) -> bool {
    name.ends_with(CONFIG_EXTENSION) && !name.starts_with('.')
}

/// Default inclusion predicate: directories and configuration files, no
/// hidden entries.
pub fn config_filter(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    if entry.file_type().is_dir() {
        return true;
    }
    is_config_file(&name)
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding normal component.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Metadata snapshot of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub permissions: fs::Permissions,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

impl FileInfo {
    fn from_metadata(name: String, metadata: &fs::Metadata) -> Self {
        Self {
            name,
            size: metadata.len(),
            permissions: metadata.permissions(),
            modified: metadata.modified().ok(),
            is_dir: metadata.is_dir(),
        }
    }
}

/// Directory listing entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    info: FileInfo,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_dir(&self) -> bool {
        self.info.is_dir
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }
}

/// Read handle over a point-in-time copy of a file's content.
///
/// Later writes to the same path are not visible through an open handle.
#[derive(Debug)]
pub struct FileHandle {
    info: FileInfo,
    cursor: Cursor<Vec<u8>>,
}

impl FileHandle {
    pub fn info(&self) -> &FileInfo {
        &self.info
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

/// Where [`MemFs::materialize`] sends the tree.
pub enum Materialize<'a> {
    /// Mirror the tree into this directory.
    Dir(&'a Path),
    /// Stream each file as a path header followed by its body.
    Preview(&'a mut dyn Write),
}

#[derive(Debug, Clone)]
enum Node {
    Dir(Arc<DirNode>),
    File(Arc<FileNode>),
}

impl Node {
    fn info(&self) -> FileInfo {
        match self {
            Node::Dir(dir) => dir.info.clone(),
            Node::File(file) => read_lock(&file.state).info.clone(),
        }
    }

    fn name(&self) -> String {
        match self {
            Node::Dir(dir) => dir.info.name.clone(),
            Node::File(file) => read_lock(&file.state).info.name.clone(),
        }
    }
}

#[derive(Debug)]
struct DirNode {
    info: FileInfo,
    children: RwLock<Vec<Node>>,
}

impl DirNode {
    fn child(&self, name: &str) -> Option<Node> {
        read_lock(&self.children)
            .iter()
            .find(|child| child.name() == name)
            .cloned()
    }

    fn children(&self) -> Vec<Node> {
        read_lock(&self.children).clone()
    }
}

#[derive(Debug)]
struct FileNode {
    state: RwLock<FileState>,
    original_hash: u64,
}

#[derive(Debug)]
struct FileState {
    info: FileInfo,
    content: Vec<u8>,
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory mirror of a configuration directory.
#[derive(Debug)]
pub struct MemFs {
    base: PathBuf,
    root: Arc<DirNode>,
}

impl MemFs {
    /// Load `path` using [`config_filter`].
    pub fn new(path: impl AsRef<Path>) -> Result<Self, VfsError> {
        Self::with_filter(path, config_filter)
    }

    /// Load `path`, keeping only entries accepted by `filter`.
    ///
    /// A rejected directory is skipped with everything below it.
    pub fn with_filter<P>(path: impl AsRef<Path>, mut filter: P) -> Result<Self, VfsError>
    where
        P: FnMut(&walkdir::DirEntry) -> bool,
    {
        let base = clean_path(path.as_ref());
        let metadata = fs::metadata(&base).map_err(|e| VfsError::io(&base, e))?;
        if !metadata.is_dir() {
            return Err(VfsError::RootNotDir(base));
        }

        let root_name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.display().to_string());
        let memfs = MemFs {
            root: Arc::new(DirNode {
                info: FileInfo::from_metadata(root_name, &metadata),
                children: RwLock::new(Vec::new()),
            }),
            base,
        };

        let walker = WalkDir::new(&memfs.base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| filter(entry));

        for entry in walker {
            let entry = entry.map_err(|source| VfsError::Walk {
                path: memfs.base.clone(),
                source,
            })?;
            let metadata = entry.metadata().map_err(|source| VfsError::Walk {
                path: entry.path().to_path_buf(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();

            let node = if entry.file_type().is_dir() {
                Node::Dir(Arc::new(DirNode {
                    info: FileInfo::from_metadata(name, &metadata),
                    children: RwLock::new(Vec::new()),
                }))
            } else {
                let content = fs::read(entry.path()).map_err(|e| VfsError::io(entry.path(), e))?;
                let mut info = FileInfo::from_metadata(name, &metadata);
                info.size = content.len() as u64;
                Node::File(Arc::new(FileNode {
                    original_hash: xxh3_64(&content),
                    state: RwLock::new(FileState { info, content }),
                }))
            };
            memfs.add_entry(entry.path(), node)?;
        }

        tracing::debug!(base = %memfs.base.display(), "loaded in-memory filesystem");
        Ok(memfs)
    }

    /// The (cleaned) directory this filesystem mirrors.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn read_dir(&self, path: impl AsRef<Path>) -> Result<Vec<DirEntry>, VfsError> {
        let path = path.as_ref();
        match self.lookup(path)? {
            Node::Dir(dir) => {
                let mut entries: Vec<DirEntry> = dir
                    .children()
                    .iter()
                    .map(|child| DirEntry { info: child.info() })
                    .collect();
                entries.sort_by(|a, b| a.info.name.cmp(&b.info.name));
                Ok(entries)
            }
            Node::File(_) => Err(VfsError::NotADirectory(path.to_path_buf())),
        }
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, VfsError> {
        let file = self.file_node(path.as_ref())?;
        let content = read_lock(&file.state).content.clone();
        Ok(content)
    }

    pub fn stat(&self, path: impl AsRef<Path>) -> Result<FileInfo, VfsError> {
        Ok(self.lookup(path.as_ref())?.info())
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<FileHandle, VfsError> {
        let file = self.file_node(path.as_ref())?;
        let state = read_lock(&file.state);
        Ok(FileHandle {
            info: state.info.clone(),
            cursor: Cursor::new(state.content.clone()),
        })
    }

    /// Replace the content of an existing file.
    ///
    /// There is no implicit creation: writing to a path that was not loaded
    /// fails with [`VfsError::NotFound`].
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Result<(), VfsError> {
        let file = self.file_node(path.as_ref())?;
        let data = data.into();
        let mut state = write_lock(&file.state);
        state.info.size = data.len() as u64;
        state.content = data;
        Ok(())
    }

    /// Every file path in the tree, in directory walk order.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        self.walk(&mut |rel, node| {
            if let Node::File(_) = node {
                files.push(self.base.join(rel));
            }
            Ok(())
        })
        .ok();
        files
    }

    /// Files whose content differs from what was loaded.
    pub fn changed_files(&self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        self.walk(&mut |rel, node| {
            if let Node::File(file) = node {
                if xxh3_64(&read_lock(&file.state).content) != file.original_hash {
                    changed.push(self.base.join(rel));
                }
            }
            Ok(())
        })
        .ok();
        changed
    }

    /// Flush the staged tree. This consumes the filesystem, so no write can
    /// follow materialization.
    pub fn materialize(self, target: Materialize<'_>) -> Result<(), VfsError> {
        match target {
            Materialize::Dir(dir) => self.write_tree(dir),
            Materialize::Preview(out) => self.preview(out),
        }
    }

    fn write_tree(&self, target: &Path) -> Result<(), VfsError> {
        fs::create_dir_all(target).map_err(|e| VfsError::io(target, e))?;

        // Directory modes are applied last so a read-only directory does not
        // block writing its children.
        let mut dir_modes = Vec::new();
        self.walk(&mut |rel, node| {
            let dest = target.join(rel);
            match node {
                Node::Dir(dir) => {
                    fs::create_dir_all(&dest).map_err(|e| VfsError::io(&dest, e))?;
                    dir_modes.push((dest, dir.info.permissions.clone()));
                }
                Node::File(file) => {
                    let state = read_lock(&file.state);
                    atomic_write(&dest, &state.content)?;
                    fs::set_permissions(&dest, state.info.permissions.clone())
                        .map_err(|e| VfsError::io(&dest, e))?;
                    let unchanged = xxh3_64(&state.content) == file.original_hash;
                    if let (true, Some(modified)) = (unchanged, state.info.modified) {
                        filetime::set_file_mtime(&dest, filetime::FileTime::from_system_time(modified))
                            .map_err(|e| VfsError::io(&dest, e))?;
                    }
                    tracing::debug!(path = %dest.display(), unchanged, "wrote file");
                }
            }
            Ok(())
        })?;

        for (dir, permissions) in dir_modes.into_iter().rev() {
            fs::set_permissions(&dir, permissions).map_err(|e| VfsError::io(&dir, e))?;
        }
        Ok(())
    }

    fn preview(&self, out: &mut dyn Write) -> Result<(), VfsError> {
        let sink = PathBuf::from("<preview>");
        self.walk(&mut |rel, node| {
            if let Node::File(file) = node {
                let state = read_lock(&file.state);
                let path = self.base.join(rel);
                let mut emit = || -> io::Result<()> {
                    writeln!(out, "=== {} ===", path.display())?;
                    out.write_all(&state.content)?;
                    if !state.content.is_empty() && !state.content.ends_with(b"\n") {
                        writeln!(out)?;
                    }
                    writeln!(out)
                };
                emit().map_err(|e| VfsError::io(&sink, e))?;
            }
            Ok(())
        })?;
        out.flush().map_err(|e| VfsError::io(&sink, e))
    }

    /// Depth-first pre-order walk; `f` receives the path relative to the base.
    fn walk(&self, f: &mut dyn FnMut(&Path, &Node) -> Result<(), VfsError>) -> Result<(), VfsError> {
        fn visit(
            dir: &DirNode,
            rel: &Path,
            f: &mut dyn FnMut(&Path, &Node) -> Result<(), VfsError>,
        ) -> Result<(), VfsError> {
            for child in dir.children() {
                let child_rel = rel.join(child.name());
                f(&child_rel, &child)?;
                if let Node::Dir(sub) = &child {
                    visit(sub, &child_rel, f)?;
                }
            }
            Ok(())
        }
        visit(&self.root, Path::new(""), f)
    }

    fn relative(&self, path: &Path) -> Result<PathBuf, VfsError> {
        let cleaned = clean_path(path);
        let rel = if self.base == Path::new(".") {
            if cleaned == Path::new(".") {
                Some(PathBuf::new())
            } else if cleaned.is_absolute() || cleaned.starts_with("..") {
                None
            } else {
                Some(cleaned.clone())
            }
        } else {
            cleaned.strip_prefix(&self.base).ok().map(Path::to_path_buf)
        };
        rel.ok_or_else(|| VfsError::OutsideRoot {
            path: cleaned,
            base: self.base.clone(),
        })
    }

    fn lookup(&self, path: &Path) -> Result<Node, VfsError> {
        let rel = self.relative(path)?;
        let mut walked = self.base.clone();
        let mut node = Node::Dir(Arc::clone(&self.root));
        for segment in rel.iter() {
            let dir = match &node {
                Node::Dir(dir) => Arc::clone(dir),
                Node::File(_) => return Err(VfsError::NotADirectory(walked)),
            };
            walked.push(segment);
            node = dir
                .child(&segment.to_string_lossy())
                .ok_or_else(|| VfsError::NotFound(walked.clone()))?;
        }
        Ok(node)
    }

    fn file_node(&self, path: &Path) -> Result<Arc<FileNode>, VfsError> {
        match self.lookup(path)? {
            Node::File(file) => Ok(file),
            Node::Dir(_) => Err(VfsError::NotAFile(path.to_path_buf())),
        }
    }

    /// Attach `node` under its parent directory, which must already exist.
    fn add_entry(&self, path: &Path, node: Node) -> Result<(), VfsError> {
        let parent = path.parent().unwrap_or(&self.base);
        match self.lookup(parent)? {
            Node::Dir(dir) => {
                write_lock(&dir.children).push(node);
                Ok(())
            }
            Node::File(_) => Err(VfsError::NotADirectory(parent.to_path_buf())),
        }
    }
}

/// Atomic file write: tempfile + fsync + rename.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), VfsError> {
    let parent = path.parent().ok_or_else(|| {
        VfsError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"),
        )
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| VfsError::io(path, e))?;
    temp.write_all(content).map_err(|e| VfsError::io(path, e))?;
    temp.as_file().sync_all().map_err(|e| VfsError::io(path, e))?;
    temp.persist(path).map_err(|e| VfsError::io(path, e.error))?;
    Ok(())
}
