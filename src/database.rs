use crate::access::BPlusTree;
use crate::config::Config;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{IndexRootsPage, Page, CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID};
use crate::storage::DiskManager;
use anyhow::{bail, Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One database file: disk manager, buffer pool, the reserved pages and the
/// indexes recorded in the index roots page.
pub struct Database {
    path: PathBuf,
    buffer_pool: BufferPoolManager,
}

impl Database {
    /// Create a new database at the specified path
    pub fn create(path: &Path, config: &Config) -> Result<Self> {
        if path.exists() {
            bail!("Database file already exists at {:?}", path);
        }

        let disk = DiskManager::create(path)?;
        let buffer_pool = Self::buffer_pool_over(disk, config)?;

        for reserved in [CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID] {
            if !buffer_pool.is_page_free(reserved)? {
                bail!("Reserved page {} already allocated in fresh file {:?}", reserved, path);
            }
            let (page_id, mut guard) = buffer_pool.new_page()?;
            if page_id != reserved {
                bail!("Expected reserved page {}, allocator returned {}", reserved, page_id);
            }
            if page_id == INDEX_ROOTS_PAGE_ID {
                guard.copy_from_slice(IndexRootsPage::default().data());
            }
        }
        buffer_pool.flush_all()?;

        info!("Created database {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            buffer_pool,
        })
    }

    /// Open an existing database
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        if !path.exists() {
            bail!("Database file does not exist at {:?}", path);
        }

        let disk = DiskManager::open(path)?;
        let buffer_pool = Self::buffer_pool_over(disk, config)?;
        for reserved in [CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID] {
            if buffer_pool.is_page_free(reserved)? {
                bail!("Database {:?} is missing reserved page {}", path, reserved);
            }
        }

        info!("Opened database {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            buffer_pool,
        })
    }

    fn buffer_pool_over(disk: DiskManager, config: &Config) -> Result<BufferPoolManager> {
        if config.pool_size < 2 {
            bail!("Buffer pool needs at least 2 frames, got {}", config.pool_size);
        }
        let replacer = config.replacer.build(config.pool_size);
        Ok(BufferPoolManager::new(disk, replacer, config.pool_size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    fn index_roots(&self) -> Result<IndexRootsPage> {
        let guard = self.buffer_pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        Ok(IndexRootsPage::from_data(*guard))
    }

    /// Register an empty index.
    pub fn create_index(&self, index_id: u32, key_size: usize) -> Result<BPlusTree> {
        {
            let mut guard = self.buffer_pool.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
            let mut roots = IndexRootsPage::from_data(*guard);
            if roots.contains(index_id) {
                bail!("Index {} already exists", index_id);
            }
            if !roots.insert(index_id, None) {
                bail!("Index roots page is full");
            }
            guard.copy_from_slice(roots.data());
        }
        info!("Created index {} ({}-byte keys)", index_id, key_size);
        BPlusTree::new(index_id, self.buffer_pool.clone(), key_size)
    }

    pub fn open_index(&self, index_id: u32, key_size: usize) -> Result<BPlusTree> {
        if !self.index_roots()?.contains(index_id) {
            bail!("Index {} does not exist", index_id);
        }
        BPlusTree::new(index_id, self.buffer_pool.clone(), key_size)
            .with_context(|| format!("Failed to open index {}", index_id))
    }

    /// Destroy an index and free its pages. Returns `false` if it did not exist.
    pub fn drop_index(&self, index_id: u32, key_size: usize) -> Result<bool> {
        if !self.index_roots()?.contains(index_id) {
            return Ok(false);
        }
        let mut tree = self.open_index(index_id, key_size)?;
        tree.destroy()?;
        info!("Dropped index {}", index_id);
        Ok(true)
    }

    pub fn list_indexes(&self) -> Result<Vec<u32>> {
        Ok(self.index_roots()?.index_ids())
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        Ok(self.buffer_pool.flush_all()?)
    }

    /// Flush every page and persist the allocator state.
    pub fn close(&self) -> Result<()> {
        self.buffer_pool.close()?;
        info!("Closed database {:?}", self.path);
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.buffer_pool.close() {
            warn!("Failed to close database {:?}: {}", self.path, e);
        }
    }
}

/// Named databases open in this process.
pub struct DatabaseRegistry {
    config: Config,
    databases: DashMap<String, Arc<Database>>,
}

impl DatabaseRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            databases: DashMap::new(),
        }
    }

    pub fn create(&self, name: &str, path: &Path) -> Result<Arc<Database>> {
        match self.databases.entry(name.to_string()) {
            Entry::Occupied(_) => bail!("Database '{}' is already open", name),
            Entry::Vacant(slot) => {
                let db = Arc::new(Database::create(path, &self.config)?);
                slot.insert(db.clone());
                Ok(db)
            }
        }
    }

    /// Open a database, or return it if it is already open under `name`.
    pub fn open(&self, name: &str, path: &Path) -> Result<Arc<Database>> {
        match self.databases.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let db = entry.get().clone();
                if db.path() != path {
                    bail!("Database '{}' is open at {:?}", name, db.path());
                }
                Ok(db)
            }
            Entry::Vacant(slot) => {
                let db = Arc::new(Database::open(path, &self.config)?);
                slot.insert(db.clone());
                Ok(db)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.databases.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Close and forget `name`. Returns `false` if it was not open.
    pub fn close(&self, name: &str) -> Result<bool> {
        match self.databases.remove(name) {
            Some((_, db)) => {
                db.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn close_all(&self) -> Result<()> {
        for name in self.names() {
            self.close(&name)?;
        }
        Ok(())
    }
}
