//! Hierarchical file system over the sector disk.
//!
//! `FsCore` holds what every layer shares: the synchronous disk, the
//! directory lock manager and the free-map lock. `FileSystem` is the
//! facade: create/open/remove/change-directory against paths resolved from
//! the calling thread's working directory.
//!
//! Directory traversal is hand-over-hand: walking down, the child's lock
//! is acquired before the parent's is released, and a mutating operation
//! takes the leaf's parent with the write lock. The tree has no back
//! edges and locks are only taken downward, so the walk cannot deadlock.

pub mod bitmap;
pub mod dir_lock;
pub mod directory;
pub mod file_header;
pub mod open_file;
pub mod path;
pub mod registry;
pub mod rwlock;
pub mod synch_disk;

use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, info};
use oxidos_layout::{FREE_MAP_FILE_SIZE, FREE_MAP_SECTOR, NUM_SECTORS, ROOT_DIR_SECTOR};
use oxidos_machine::Disk;

use crate::error::FsError;
use crate::threads::sync::Lock;
use crate::threads::ThreadKernel;

use bitmap::Bitmap;
use dir_lock::{DirGuard, DirLockManager, DirLockMode};
use directory::Directory;
use file_header::FileHeader;
use open_file::OpenFile;
use path::FilePath;
use registry::OpenFileRegistry;

/// State shared by directories, open files and the facade.
pub struct FsCore {
    pub(crate) disk: synch_disk::SynchDisk,
    pub(crate) dir_locks: DirLockManager,
    free_map_lock: Lock,
}

impl FsCore {
    // ------------------------------------------------------------------
    // Free-sector map
    // ------------------------------------------------------------------

    /// Take the free-map lock and load the map from its on-disk file.
    pub fn acquire_free_map(self: &Arc<Self>) -> Result<Bitmap, FsError> {
        self.free_map_lock.acquire();
        match self.fetch_free_map() {
            Ok(map) => Ok(map),
            Err(e) => {
                self.free_map_lock.release();
                Err(e)
            }
        }
    }

    /// Flush the map back to disk and release the lock.
    pub fn release_free_map(self: &Arc<Self>, map: &Bitmap) -> Result<(), FsError> {
        let result = self.flush_free_map(map);
        self.free_map_lock.release();
        result
    }

    /// Run `f` with exclusive access to the free map. The map is flushed
    /// only if `f` succeeds; a failed operation's partial changes are
    /// discarded rather than written back.
    pub(crate) fn with_free_map<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut Bitmap) -> Result<R, FsError>,
    ) -> Result<R, FsError> {
        let mut map = self.acquire_free_map()?;
        match f(&mut map) {
            Ok(r) => {
                self.release_free_map(&map)?;
                Ok(r)
            }
            Err(e) => {
                self.free_map_lock.release();
                Err(e)
            }
        }
    }

    fn fetch_free_map(self: &Arc<Self>) -> Result<Bitmap, FsError> {
        let mut file = OpenFile::raw(self, FREE_MAP_SECTOR)?;
        let mut bytes = vec![0u8; FREE_MAP_FILE_SIZE];
        file.read_at(&mut bytes, 0)?;
        let mut map = Bitmap::new(NUM_SECTORS);
        map.update_from_bytes(&bytes);
        Ok(map)
    }

    fn flush_free_map(self: &Arc<Self>, map: &Bitmap) -> Result<(), FsError> {
        let mut file = OpenFile::raw(self, FREE_MAP_SECTOR)?;
        file.write_at(&map.to_bytes(), 0)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Walk to the parent directory of `path`'s leaf, hand over hand from
    /// the root. The final acquisition (the parent of the leaf) uses
    /// `leaf_mode`; every intermediate level is read-locked. Returns the
    /// loaded parent, its guard, and the leaf name.
    fn walk_to_parent<'a>(
        self: &'a Arc<Self>,
        path: &FilePath,
        leaf_mode: DirLockMode,
    ) -> Result<(Directory, DirGuard<'a>, String), FsError> {
        debug_assert!(!path.is_empty());
        let mut rest = path.clone();

        let mode = if rest.is_bottom_level() {
            leaf_mode
        } else {
            DirLockMode::Read
        };
        let mut guard = DirGuard::acquire(&self.dir_locks, ROOT_DIR_SECTOR, mode);
        let mut dir = Directory::fetch(self, ROOT_DIR_SECTOR)?;

        while !rest.is_bottom_level() {
            let comp = rest.split_bottom_level().expect("path is not empty");
            let entry = dir.find(&comp).cloned().ok_or(FsError::NotFound)?;
            if !entry.is_dir {
                return Err(FsError::NotADirectory);
            }
            let child_mode = if rest.is_bottom_level() {
                leaf_mode
            } else {
                DirLockMode::Read
            };
            let child = DirGuard::acquire(&self.dir_locks, entry.sector, child_mode);
            // assignment drops the parent's guard after the child's lock
            // is already held
            guard = child;
            dir = Directory::fetch(self, entry.sector)?;
        }

        let leaf = rest.split_bottom_level().expect("bottom level");
        Ok((dir, guard, leaf))
    }

    /// Resolve a path to its header sector and kind. Locks are released
    /// before returning.
    pub(crate) fn resolve(self: &Arc<Self>, path: &FilePath) -> Result<(u32, bool), FsError> {
        if path.is_empty() {
            return Ok((ROOT_DIR_SECTOR, true));
        }
        let (dir, guard, leaf) = self.walk_to_parent(path, DirLockMode::Read)?;
        let found = dir
            .find(&leaf)
            .map(|e| (e.sector, e.is_dir))
            .ok_or(FsError::NotFound);
        drop(guard);
        found
    }

    /// Walk into the directory named by `path`, returning it loaded with
    /// its own read lock held.
    pub(crate) fn walk_into<'a>(
        self: &'a Arc<Self>,
        path: &FilePath,
    ) -> Result<(Directory, DirGuard<'a>), FsError> {
        if path.is_empty() {
            let guard = DirGuard::acquire(&self.dir_locks, ROOT_DIR_SECTOR, DirLockMode::Read);
            let dir = Directory::fetch(self, ROOT_DIR_SECTOR)?;
            return Ok((dir, guard));
        }
        let (parent, parent_guard, leaf) = self.walk_to_parent(path, DirLockMode::Read)?;
        let entry = parent.find(&leaf).cloned().ok_or(FsError::NotFound)?;
        if !entry.is_dir {
            return Err(FsError::NotADirectory);
        }
        let child_guard = DirGuard::acquire(&self.dir_locks, entry.sector, DirLockMode::Read);
        drop(parent_guard);
        let child = Directory::fetch(self, entry.sector)?;
        Ok((child, child_guard))
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Remove a file's header sector, data sectors and directory entry.
    /// Called directly for closed files, and through the registry's
    /// capability at the last close of a file pending removal.
    pub(crate) fn delete_from_disk(self: &Arc<Self>, path: &FilePath) -> Result<(), FsError> {
        if path.is_empty() {
            return Err(FsError::Root);
        }
        let (mut dir, guard, leaf) = self.walk_to_parent(path, DirLockMode::Write)?;
        let entry = dir.find(&leaf).cloned().ok_or(FsError::NotFound)?;
        let header = FileHeader::fetch_from(&self.disk, entry.sector)?;
        self.with_free_map(|map| {
            header.deallocate(map);
            map.clear(entry.sector);
            Ok(())
        })?;
        dir.remove(&leaf)?;
        dir.write_back(self)?;
        drop(guard);
        debug!("deleted '{}' from disk", path);
        Ok(())
    }

    /// Remove an empty directory.
    fn remove_directory(self: &Arc<Self>, path: &FilePath) -> Result<(), FsError> {
        if path.is_empty() {
            return Err(FsError::Root);
        }
        let (mut dir, guard, leaf) = self.walk_to_parent(path, DirLockMode::Write)?;
        let entry = dir.find(&leaf).cloned().ok_or(FsError::NotFound)?;
        if !entry.is_dir {
            return Err(FsError::NotADirectory);
        }
        // Peek into the target under its own read lock; the parent's
        // write lock keeps new entries from appearing afterwards.
        let empty = {
            let child_guard = DirGuard::acquire(&self.dir_locks, entry.sector, DirLockMode::Read);
            let child = Directory::fetch(self, entry.sector)?;
            drop(child_guard);
            child.is_empty()
        };
        if !empty {
            return Err(FsError::NotEmpty);
        }
        let header = FileHeader::fetch_from(&self.disk, entry.sector)?;
        self.with_free_map(|map| {
            header.deallocate(map);
            map.clear(entry.sector);
            Ok(())
        })?;
        dir.remove(&leaf)?;
        dir.write_back(self)?;
        drop(guard);
        Ok(())
    }
}

/// The file-system facade.
pub struct FileSystem {
    core: Arc<FsCore>,
    registry: Arc<OpenFileRegistry>,
    tk: Arc<ThreadKernel>,
}

impl FileSystem {
    /// Mount the file system on `disk`. With `format`, lay down an empty
    /// file system first: free-map header at its fixed sector, root
    /// directory at its own, both bodies flushed before first use.
    pub fn new(tk: Arc<ThreadKernel>, disk: Arc<Disk>, format: bool) -> Result<Arc<Self>, FsError> {
        let core = Arc::new(FsCore {
            disk: synch_disk::SynchDisk::new(&tk, disk),
            dir_locks: DirLockManager::new(&tk),
            free_map_lock: Lock::new(&tk, "free map"),
        });

        if format {
            Self::format(&core)?;
        } else {
            let header = FileHeader::fetch_from(&core.disk, FREE_MAP_SECTOR)?;
            if header.num_sectors() == 0 {
                return Err(FsError::Unformatted);
            }
            info!("mounted file system: {} sectors", NUM_SECTORS);
        }

        let reclaim_core = core.clone();
        let registry = Arc::new(OpenFileRegistry::new(
            &tk,
            Box::new(move |name| reclaim_core.delete_from_disk(&FilePath::parse(name))),
        ));
        Ok(Arc::new(Self { core, registry, tk }))
    }

    fn format(core: &Arc<FsCore>) -> Result<(), FsError> {
        info!("formatting the file system");
        let mut map = Bitmap::new(NUM_SECTORS);
        map.mark(FREE_MAP_SECTOR);
        map.mark(ROOT_DIR_SECTOR);

        let mut map_header = FileHeader::new();
        map_header.allocate(&mut map, &core.disk, FREE_MAP_FILE_SIZE as u32)?;
        let mut dir_header = FileHeader::new();
        dir_header.allocate(&mut map, &core.disk, 4)?;

        // Headers must reach the disk before the files can be opened.
        map_header.write_back(&core.disk, FREE_MAP_SECTOR)?;
        dir_header.write_back(&core.disk, ROOT_DIR_SECTOR)?;

        let mut map_file = OpenFile::raw(core, FREE_MAP_SECTOR)?;
        map_file.write_at(&map.to_bytes(), 0)?;
        Directory::empty(ROOT_DIR_SECTOR).write_back(core)?;
        Ok(())
    }

    pub fn core(&self) -> &Arc<FsCore> {
        &self.core
    }

    /// The caller's working directory merged with `path`.
    fn full_path(&self, path: &str) -> FilePath {
        self.tk.current_path().merged(path)
    }

    /// Create a file of `size` bytes, or a directory. Fails on duplicate
    /// names, a missing or non-directory parent, or disk exhaustion.
    pub fn create(&self, path: &str, size: u32, is_dir: bool) -> Result<(), FsError> {
        let full = self.full_path(path);
        if full.is_empty() {
            return Err(FsError::Root);
        }
        debug!("create '{}' size {} dir {}", full, size, is_dir);

        let (mut dir, guard, leaf) = self.core.walk_to_parent(&full, DirLockMode::Write)?;
        Directory::validate_name(&leaf)?;
        if dir.find(&leaf).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let initial = if is_dir { 4 } else { size };
        let mut header = FileHeader::new();
        let sector = {
            let disk = &self.core.disk;
            let header = &mut header;
            self.core.with_free_map(|map| {
                let sector = map.find().ok_or(FsError::DiskFull)?;
                header.allocate(map, disk, initial)?;
                Ok(sector)
            })?
        };
        header.write_back(&self.core.disk, sector)?;

        if is_dir {
            // The new directory's on-disk image is initialized under its
            // own write lock before the parent publishes it.
            let child_guard = DirGuard::acquire(&self.core.dir_locks, sector, DirLockMode::Write);
            Directory::empty(sector).write_back(&self.core)?;
            drop(child_guard);
        }

        dir.add(&leaf, sector, is_dir)?;
        dir.write_back(&self.core)?;
        drop(guard);
        Ok(())
    }

    /// Open a file for reading and writing. All handles on the same name
    /// share one reader/writer lock through the open-file registry.
    pub fn open(self: &Arc<Self>, path: &str) -> Result<OpenFile, FsError> {
        let full = self.full_path(path);
        if full.is_empty() {
            return Err(FsError::IsADirectory);
        }
        let (sector, is_dir) = self.core.resolve(&full)?;
        if is_dir {
            return Err(FsError::IsADirectory);
        }
        let name = full.to_string();
        let rw = self
            .registry
            .add_open_file(&name)
            .ok_or(FsError::PendingRemoval)?;
        debug!("open '{}' at sector {}", name, sector);
        OpenFile::registered(&self.core, sector, rw, self.registry.clone(), name)
    }

    /// Remove a file or an empty directory. Removing an open file defers
    /// the on-disk delete to the last close; new opens fail immediately.
    pub fn remove(&self, path: &str) -> Result<(), FsError> {
        let full = self.full_path(path);
        if full.is_empty() {
            return Err(FsError::Root);
        }
        let (_sector, is_dir) = self.core.resolve(&full)?;
        debug!("remove '{}' (dir: {})", full, is_dir);
        if is_dir {
            self.core.remove_directory(&full)
        } else {
            let core = self.core.clone();
            let target = full.clone();
            self.registry
                .remove_or_defer(&full.to_string(), move || core.delete_from_disk(&target))
        }
    }

    /// Install a new working directory for the calling thread.
    pub fn change_directory(&self, path: &str) -> Result<(), FsError> {
        let full = self.full_path(path);
        let (_sector, is_dir) = self.core.resolve(&full)?;
        if !is_dir {
            return Err(FsError::NotADirectory);
        }
        // No suspension point between the resolution above and the
        // installation below, so the directory cannot be reclaimed in
        // between.
        self.tk.set_current_path(full);
        Ok(())
    }

    /// Names in the directory at `path`.
    pub fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        let full = self.full_path(path);
        let (dir, guard) = self.core.walk_into(&full)?;
        let names = dir.names();
        drop(guard);
        Ok(names)
    }

    pub fn free_sectors(&self) -> Result<usize, FsError> {
        self.core.with_free_map(|map| Ok(map.count_clear()))
    }

    /// Debug dump: free-sector count and the whole tree.
    pub fn print(&self) -> Result<String, FsError> {
        let mut out = String::new();
        let free = self.free_sectors()?;
        let _ = writeln!(out, "free sectors: {free}/{NUM_SECTORS}");
        self.print_dir(&FilePath::root(), &mut out)?;
        Ok(out)
    }

    fn print_dir(&self, path: &FilePath, out: &mut String) -> Result<(), FsError> {
        let entries = {
            let (dir, guard) = self.core.walk_into(path)?;
            let entries = dir.entries().to_vec();
            drop(guard);
            entries
        };
        for entry in entries {
            let child = path.merged(&entry.name);
            let kind = if entry.is_dir { "/" } else { "" };
            let _ = writeln!(out, "{}{}  [sector {}]", child, kind, entry.sector);
            if entry.is_dir {
                self.print_dir(&child, out)?;
            }
        }
        Ok(())
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.registry.is_open(&self.full_path(path).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (Arc<ThreadKernel>, Arc<FileSystem>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tk = ThreadKernel::new();
        let disk = Arc::new(
            Disk::open(
                &dir.path().join("DISK"),
                oxidos_layout::SECTOR_SIZE,
                NUM_SECTORS,
            )
            .unwrap(),
        );
        let fs = FileSystem::new(tk.clone(), disk, true).unwrap();
        (tk, fs, dir)
    }

    #[test]
    fn root_cannot_be_created_or_removed() {
        let (_tk, fs, _dir) = setup();
        assert!(matches!(fs.create("/", 0, false), Err(FsError::Root)));
        assert!(matches!(fs.create("", 0, false), Err(FsError::Root)));
        assert!(matches!(fs.remove("/"), Err(FsError::Root)));
        assert!(matches!(fs.remove(""), Err(FsError::Root)));
        assert!(fs.change_directory("/").is_ok());
        assert!(fs.change_directory("").is_ok());
    }

    #[test]
    fn create_find_remove_laws() {
        let (_tk, fs, _dir) = setup();
        fs.create("/f", 0, false).unwrap();
        assert!(matches!(
            fs.create("/f", 0, false),
            Err(FsError::AlreadyExists)
        ));
        let (sector, is_dir) = fs.core.resolve(&FilePath::parse("/f")).unwrap();
        assert!(!is_dir);
        assert!(sector >= 2);

        fs.remove("/f").unwrap();
        assert!(matches!(
            fs.core.resolve(&FilePath::parse("/f")),
            Err(FsError::NotFound)
        ));
        // the name can be reused now
        fs.create("/f", 0, false).unwrap();
    }

    #[test]
    fn create_under_missing_parent_fails_cleanly() {
        let (_tk, fs, _dir) = setup();
        let free_before = fs.free_sectors().unwrap();
        assert!(matches!(
            fs.create("/no/such/file", 0, false),
            Err(FsError::NotFound)
        ));
        assert_eq!(fs.free_sectors().unwrap(), free_before);
    }

    #[test]
    fn nested_creation_and_file_as_parent() {
        let (_tk, fs, _dir) = setup();
        fs.create("/a", 0, true).unwrap();
        fs.create("/a/b", 0, false).unwrap();
        assert!(matches!(
            fs.create("/a/b/x", 0, true),
            Err(FsError::NotADirectory)
        ));
        assert_eq!(fs.list("/a").unwrap(), ["b"]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_tk, fs, _dir) = setup();
        fs.create("/data", 0, false).unwrap();
        let mut f = fs.open("/data").unwrap();
        let payload = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(f.write(payload).unwrap(), payload.len());

        f.seek(0);
        let mut back = vec![0u8; payload.len()];
        assert_eq!(f.read(&mut back).unwrap(), payload.len());
        assert_eq!(&back, payload);

        // reading past the end is a short count
        let mut more = [0u8; 16];
        assert_eq!(f.read(&mut more).unwrap(), 0);
    }

    #[test]
    fn positioned_io_crosses_sector_boundaries() {
        let (_tk, fs, _dir) = setup();
        fs.create("/big", 0, false).unwrap();
        let mut f = fs.open("/big").unwrap();

        let pattern: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        f.write_at(&pattern, 0).unwrap();

        let mut mid = vec![0u8; 300];
        assert_eq!(f.read_at(&mut mid, 100).unwrap(), 300);
        assert_eq!(&mid[..], &pattern[100..400]);

        // overwrite a window spanning two sectors
        f.write_at(&[0xEE; 40], 120).unwrap();
        let mut window = [0u8; 40];
        f.read_at(&mut window, 120).unwrap();
        assert_eq!(window, [0xEE; 40]);
    }

    #[test]
    fn growth_extends_length_and_zero_fills() {
        let (_tk, fs, _dir) = setup();
        fs.create("/grow", 10, false).unwrap();
        let mut f = fs.open("/grow").unwrap();
        assert_eq!(f.length().unwrap(), 10);

        f.write_at(b"end", 500).unwrap();
        assert_eq!(f.length().unwrap(), 503);

        let mut gap = [0xFFu8; 8];
        f.read_at(&mut gap, 300).unwrap();
        assert_eq!(gap, [0u8; 8]);
    }

    #[test]
    fn remove_frees_every_sector() {
        let (_tk, fs, _dir) = setup();
        let free_before = fs.free_sectors().unwrap();
        fs.create("/tmp1", 1000, false).unwrap();
        assert!(fs.free_sectors().unwrap() < free_before);
        fs.remove("/tmp1").unwrap();
        assert_eq!(fs.free_sectors().unwrap(), free_before);
    }

    #[test]
    fn deferred_removal_life_cycle() {
        let (_tk, fs, _dir) = setup();
        let free_before = fs.free_sectors().unwrap();
        fs.create("/victim", 0, false).unwrap();

        let mut h1 = fs.open("/victim").unwrap();
        h1.write(b"still readable").unwrap();

        // removing an open file succeeds but defers the delete
        fs.remove("/victim").unwrap();
        assert!(matches!(fs.open("/victim"), Err(FsError::PendingRemoval)));

        // the existing handle keeps working
        let mut back = [0u8; 14];
        h1.seek(0);
        assert_eq!(h1.read(&mut back).unwrap(), 14);
        assert_eq!(&back, b"still readable");

        // last close performs the on-disk delete
        drop(h1);
        assert!(matches!(fs.open("/victim"), Err(FsError::NotFound)));
        assert_eq!(fs.free_sectors().unwrap(), free_before);
    }

    #[test]
    fn directory_removal_requires_empty() {
        let (_tk, fs, _dir) = setup();
        fs.create("/d", 0, true).unwrap();
        fs.create("/d/f", 0, false).unwrap();
        assert!(matches!(fs.remove("/d"), Err(FsError::NotEmpty)));
        fs.remove("/d/f").unwrap();
        fs.remove("/d").unwrap();
        assert!(matches!(
            fs.core.resolve(&FilePath::parse("/d")),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn change_directory_resolves_relative_paths() {
        let (_tk, fs, _dir) = setup();
        fs.create("/home", 0, true).unwrap();
        fs.create("/home/user", 0, true).unwrap();
        fs.change_directory("/home/user").unwrap();

        fs.create("notes", 0, false).unwrap();
        assert_eq!(fs.list("/home/user").unwrap(), ["notes"]);

        fs.change_directory("..").unwrap();
        assert_eq!(fs.list(".").unwrap(), ["user"]);

        assert!(matches!(
            fs.change_directory("/home/user/notes"),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(
            fs.change_directory("/nowhere"),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn shared_handles_see_each_others_writes() {
        let (_tk, fs, _dir) = setup();
        fs.create("/shared", 0, false).unwrap();
        let mut w = fs.open("/shared").unwrap();
        let mut r = fs.open("/shared").unwrap();

        w.write(b"hello from w").unwrap();
        let mut buf = [0u8; 12];
        assert_eq!(r.read(&mut buf).unwrap(), 12);
        assert_eq!(&buf, b"hello from w");
    }

    #[test]
    fn mount_rejects_blank_disks() {
        let dir = tempfile::tempdir().unwrap();
        let tk = ThreadKernel::new();
        let disk = Arc::new(
            Disk::open(
                &dir.path().join("BLANK"),
                oxidos_layout::SECTOR_SIZE,
                NUM_SECTORS,
            )
            .unwrap(),
        );
        assert!(matches!(
            FileSystem::new(tk, disk, false),
            Err(FsError::Unformatted)
        ));
    }

    #[test]
    fn contents_survive_remount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DISK");
        {
            let tk = ThreadKernel::new();
            let disk = Arc::new(
                Disk::open(&path, oxidos_layout::SECTOR_SIZE, NUM_SECTORS).unwrap(),
            );
            let fs = FileSystem::new(tk, disk, true).unwrap();
            fs.create("/persist", 0, false).unwrap();
            fs.open("/persist").unwrap().write(b"saved").unwrap();
        }
        {
            let tk = ThreadKernel::new();
            let disk = Arc::new(
                Disk::open(&path, oxidos_layout::SECTOR_SIZE, NUM_SECTORS).unwrap(),
            );
            let fs = FileSystem::new(tk, disk, false).unwrap();
            let mut f = fs.open("/persist").unwrap();
            let mut buf = [0u8; 5];
            assert_eq!(f.read(&mut buf).unwrap(), 5);
            assert_eq!(&buf, b"saved");
        }
    }
}
