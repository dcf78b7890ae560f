pub mod iterator;
pub mod key;

use self::iterator::IndexIterator;
use self::key::{bytewise, KeyComparator};
use crate::access::RowId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_page::{
    node_capacity, set_parent_in_place, BTreeNodePage, MIN_NODE_CAPACITY,
};
use crate::storage::page::{
    BTreeInternalPage, BTreeLeafPage, IndexRootsPage, NodeKind, Page, PageId, INDEX_ROOTS_PAGE_ID,
};
use crate::storage::StorageError;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use std::io::Write;

/// Widest key for which a node still reaches `MIN_NODE_CAPACITY`.
pub const MAX_KEY_SIZE: usize =
    (crate::storage::PAGE_SIZE - 28) / (MIN_NODE_CAPACITY + 1) - RowId::SIZE;

/// Owned copy of a node image.
enum Node {
    Leaf(BTreeLeafPage),
    Internal(BTreeInternalPage),
}

impl Node {
    fn header(&self) -> &dyn BTreeNodePage {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(internal) => internal,
        }
    }
}

fn load_node(buffer_pool: &BufferPoolManager, page_id: PageId) -> Result<Node> {
    let data = *buffer_pool.fetch_page(page_id)?;
    match NodeKind::of(&data) {
        Some(NodeKind::Leaf) => Ok(Node::Leaf(BTreeLeafPage::from_data(data))),
        Some(NodeKind::Internal) => Ok(Node::Internal(BTreeInternalPage::from_data(data))),
        None => Err(StorageError::Corrupted {
            page_id,
            reason: "not a B+Tree node".to_string(),
        }
        .into()),
    }
}

fn load_leaf(buffer_pool: &BufferPoolManager, page_id: PageId) -> Result<BTreeLeafPage> {
    match load_node(buffer_pool, page_id)? {
        Node::Leaf(leaf) => Ok(leaf),
        Node::Internal(_) => bail!("Page {} is an internal node, expected a leaf", page_id),
    }
}

/// Unique-key B+Tree over fixed-width keys, persisted through the buffer pool.
///
/// Nodes are copied out of their frame, modified, and written back; no page
/// guard is held across a nested page access. Every root change is mirrored
/// into the index roots page in the same call.
pub struct BPlusTree {
    index_id: u32,
    buffer_pool: BufferPoolManager,
    root_page_id: Option<PageId>,
    key_size: usize,
    max_size: usize,
    comparator: KeyComparator,
}

impl BPlusTree {
    /// Open the tree registered under `index_id`, or an empty one if the index
    /// has no root yet.
    pub fn new(index_id: u32, buffer_pool: BufferPoolManager, key_size: usize) -> Result<Self> {
        let max_size = node_capacity(key_size);
        Self::with_max_size(index_id, buffer_pool, key_size, max_size)
    }

    /// Like `new` but with a smaller node capacity. An existing tree keeps the
    /// capacity recorded in its root.
    pub fn with_max_size(
        index_id: u32,
        buffer_pool: BufferPoolManager,
        key_size: usize,
        max_size: usize,
    ) -> Result<Self> {
        if key_size == 0 || key_size > MAX_KEY_SIZE {
            bail!("Key size {} out of range 1..={}", key_size, MAX_KEY_SIZE);
        }
        let capacity = node_capacity(key_size);
        if max_size < MIN_NODE_CAPACITY || max_size > capacity {
            bail!(
                "Node capacity {} out of range {}..={} for {}-byte keys",
                max_size,
                MIN_NODE_CAPACITY,
                capacity,
                key_size
            );
        }

        let root_page_id = {
            let guard = buffer_pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
            IndexRootsPage::from_data(*guard).root_id(index_id)
        };

        let mut max_size = max_size;
        if let Some(root) = root_page_id {
            let node = load_node(&buffer_pool, root)
                .with_context(|| format!("Failed to load root of index {}", index_id))?;
            let header = node.header();
            if header.key_size() != key_size {
                bail!(
                    "Index {} stores {}-byte keys, opened with {}",
                    index_id,
                    header.key_size(),
                    key_size
                );
            }
            max_size = header.max_size();
            if max_size < MIN_NODE_CAPACITY || max_size > capacity {
                bail!(
                    "Root {} of index {} records node capacity {}",
                    root,
                    index_id,
                    max_size
                );
            }
        }

        Ok(Self {
            index_id,
            buffer_pool,
            root_page_id,
            key_size,
            max_size,
            comparator: bytewise,
        })
    }

    pub fn with_comparator(mut self, comparator: KeyComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn index_id(&self) -> u32 {
        self.index_id
    }

    pub fn root_page_id(&self) -> Option<PageId> {
        self.root_page_id
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.is_none()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            bail!(
                "Key is {} bytes, index {} expects {}",
                key.len(),
                self.index_id,
                self.key_size
            );
        }
        Ok(())
    }

    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        self.check_key(key)?;
        let Some(root) = self.root_page_id else {
            return Ok(None);
        };
        let leaf = self.find_leaf(root, Some(key))?;
        Ok(leaf.lookup(key, self.comparator))
    }

    /// Insert a unique key. Returns `false` if the key is already present.
    pub fn insert(&mut self, key: &[u8], value: RowId) -> Result<bool> {
        self.check_key(key)?;
        let Some(root) = self.root_page_id else {
            self.start_new_tree(key, value)?;
            return Ok(true);
        };

        let mut leaf = self.find_leaf(root, Some(key))?;
        if leaf.lookup(key, self.comparator).is_some() {
            return Ok(false);
        }

        if leaf.insert(key, value, self.comparator) < leaf.max_size() {
            self.write_node(&leaf)?;
            return Ok(true);
        }

        let sibling_id = self.allocate_node_page()?;
        let mut sibling = BTreeLeafPage::new(
            sibling_id,
            leaf.parent_page_id(),
            self.key_size,
            leaf.max_size(),
        );
        leaf.move_half_to(&mut sibling);
        sibling.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(Some(sibling_id));
        debug!(
            "Split leaf {} into {} ({} + {} entries)",
            leaf.page_id(),
            sibling_id,
            leaf.size(),
            sibling.size()
        );

        let separator = sibling.key_at(0).to_vec();
        self.write_node(&leaf)?;
        self.write_node(&sibling)?;
        self.insert_into_parent(leaf.page_id(), leaf.parent_page_id(), &separator, sibling_id)?;
        Ok(true)
    }

    fn start_new_tree(&mut self, key: &[u8], value: RowId) -> Result<()> {
        let root_id = self.allocate_node_page()?;
        let mut root = BTreeLeafPage::new(root_id, None, self.key_size, self.max_size);
        root.insert(key, value, self.comparator);
        self.write_node(&root)?;
        self.set_root(Some(root_id))
    }

    /// Hook `new_id` into the parent of `old_id` with `key` as its separator,
    /// splitting ancestors as needed.
    fn insert_into_parent(
        &mut self,
        old_id: PageId,
        parent_id: Option<PageId>,
        key: &[u8],
        new_id: PageId,
    ) -> Result<()> {
        let Some(parent_id) = parent_id else {
            let root_id = self.allocate_node_page()?;
            let mut root = BTreeInternalPage::new(root_id, None, self.key_size, self.max_size);
            root.populate_new_root(old_id, key, new_id);
            self.write_node(&root)?;
            self.set_parent(old_id, Some(root_id))?;
            self.set_parent(new_id, Some(root_id))?;
            return self.set_root(Some(root_id));
        };

        let mut parent = self.fetch_internal(parent_id)?;
        if parent.insert_node_after(old_id, key, new_id) < parent.max_size() {
            return self.write_node(&parent);
        }

        let sibling_id = self.allocate_node_page()?;
        let mut sibling = BTreeInternalPage::new(
            sibling_id,
            parent.parent_page_id(),
            self.key_size,
            parent.max_size(),
        );
        let adopted = parent.move_half_to(&mut sibling);
        debug!(
            "Split internal {} into {} ({} + {} children)",
            parent_id,
            sibling_id,
            parent.size(),
            sibling.size()
        );

        let separator = sibling.key_at(0).to_vec();
        self.write_node(&parent)?;
        self.write_node(&sibling)?;
        for child in adopted {
            self.set_parent(child, Some(sibling_id))?;
        }
        self.insert_into_parent(parent_id, parent.parent_page_id(), &separator, sibling_id)
    }

    /// Delete `key`. Returns `false` if it was not present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let Some(root) = self.root_page_id else {
            return Ok(false);
        };

        let mut leaf = self.find_leaf(root, Some(key))?;
        let before = leaf.size();
        if leaf.remove_and_delete_record(key, self.comparator) == before {
            return Ok(false);
        }
        self.write_node(&leaf)?;
        self.coalesce_or_redistribute(leaf.page_id())?;
        Ok(true)
    }

    /// Restore the occupancy bound of `page_id` after a removal, borrowing
    /// from or merging with a sibling and recursing into the parent.
    fn coalesce_or_redistribute(&mut self, page_id: PageId) -> Result<()> {
        let node = self.fetch_node(page_id)?;
        let (size, min_size, max_size) = {
            let header = node.header();
            (header.size(), header.min_size(), header.max_size())
        };
        let Some(parent_id) = node.header().parent_page_id() else {
            return self.adjust_root(node);
        };
        if size >= min_size {
            return Ok(());
        }

        let mut parent = self.fetch_internal(parent_id)?;
        let index = parent
            .value_index(page_id)
            .ok_or_else(|| anyhow!("Page {} missing from its parent {}", page_id, parent_id))?;
        let sibling_index = if index == 0 { 1 } else { index - 1 };
        // Parent slot of the right-hand page of the pair
        let right_index = index.max(sibling_index);
        let sibling_id = parent.value_at(sibling_index);

        match node {
            Node::Leaf(mut leaf) => {
                let mut sibling = self.fetch_leaf(sibling_id)?;
                if size + sibling.size() >= max_size {
                    if index == 0 {
                        sibling.move_first_to_end_of(&mut leaf);
                        parent.set_key_at(1, sibling.key_at(0));
                    } else {
                        sibling.move_last_to_front_of(&mut leaf);
                        parent.set_key_at(index, leaf.key_at(0));
                    }
                    debug!("Redistributed leaf {} with {}", page_id, sibling_id);
                    self.write_node(&leaf)?;
                    self.write_node(&sibling)?;
                    return self.write_node(&parent);
                }

                let (mut left, mut right) = if index == 0 {
                    (leaf, sibling)
                } else {
                    (sibling, leaf)
                };
                right.move_all_to(&mut left);
                left.set_next_page_id(right.next_page_id());
                parent.remove(right_index);
                debug!("Merged leaf {} into {}", right.page_id(), left.page_id());

                self.write_node(&left)?;
                self.write_node(&parent)?;
                self.delete_node_page(right.page_id())?;
            }
            Node::Internal(mut internal) => {
                let mut sibling = self.fetch_internal(sibling_id)?;
                if size + sibling.size() >= max_size {
                    let moved = if index == 0 {
                        let middle = parent.key_at(1).to_vec();
                        let moved = sibling.move_first_to_end_of(&mut internal, &middle);
                        parent.set_key_at(1, sibling.key_at(0));
                        moved
                    } else {
                        let middle = parent.key_at(index).to_vec();
                        let moved = sibling.move_last_to_front_of(&mut internal, &middle);
                        parent.set_key_at(index, internal.key_at(0));
                        moved
                    };
                    debug!("Redistributed internal {} with {}", page_id, sibling_id);
                    self.write_node(&internal)?;
                    self.write_node(&sibling)?;
                    self.write_node(&parent)?;
                    return self.set_parent(moved, Some(page_id));
                }

                let (mut left, mut right) = if index == 0 {
                    (internal, sibling)
                } else {
                    (sibling, internal)
                };
                let middle = parent.key_at(right_index).to_vec();
                let adopted = right.move_all_to(&mut left, &middle);
                parent.remove(right_index);
                debug!("Merged internal {} into {}", right.page_id(), left.page_id());

                self.write_node(&left)?;
                self.write_node(&parent)?;
                for child in adopted {
                    self.set_parent(child, Some(left.page_id()))?;
                }
                self.delete_node_page(right.page_id())?;
            }
        }

        self.coalesce_or_redistribute(parent_id)
    }

    /// Collapse the root: an empty leaf empties the tree, a single-child
    /// internal node hands the root over to that child.
    fn adjust_root(&mut self, root: Node) -> Result<()> {
        match root {
            Node::Leaf(leaf) if leaf.size() == 0 => {
                self.set_root(None)?;
                self.delete_node_page(leaf.page_id())
            }
            Node::Internal(mut internal) if internal.size() == 1 => {
                let child = internal.remove_and_return_only_child();
                self.set_parent(child, None)?;
                self.set_root(Some(child))?;
                self.delete_node_page(internal.page_id())
            }
            _ => Ok(()),
        }
    }

    /// Cursor at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        let Some(root) = self.root_page_id else {
            return Ok(self.end());
        };
        let leaf = self.find_leaf(root, None)?;
        IndexIterator::new(self.buffer_pool.clone(), leaf, 0)
    }

    /// Cursor at the first key not less than `key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator> {
        self.check_key(key)?;
        let Some(root) = self.root_page_id else {
            return Ok(self.end());
        };
        let leaf = self.find_leaf(root, Some(key))?;
        let index = leaf.key_index(key, self.comparator);
        IndexIterator::new(self.buffer_pool.clone(), leaf, index)
    }

    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(self.buffer_pool.clone())
    }

    /// Delete every node and the index's registry record.
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(root) = self.root_page_id.take() {
            self.destroy_subtree(root)?;
        }

        let mut guard = self.buffer_pool.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::from_data(*guard);
        if roots.delete(self.index_id) {
            guard.copy_from_slice(roots.data());
        }
        debug!("Destroyed index {}", self.index_id);
        Ok(())
    }

    fn destroy_subtree(&self, page_id: PageId) -> Result<()> {
        if let Node::Internal(internal) = self.fetch_node(page_id)? {
            for child in internal.children() {
                self.destroy_subtree(child)?;
            }
        }
        self.delete_node_page(page_id)
    }

    /// Descend to the leaf that may hold `key`, or the leftmost leaf.
    fn find_leaf(&self, root: PageId, key: Option<&[u8]>) -> Result<BTreeLeafPage> {
        let mut page_id = root;
        loop {
            match self.fetch_node(page_id)? {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(internal) => {
                    page_id = match key {
                        Some(key) => internal.lookup(key, self.comparator),
                        None => internal.value_at(0),
                    };
                }
            }
        }
    }

    fn fetch_node(&self, page_id: PageId) -> Result<Node> {
        load_node(&self.buffer_pool, page_id)
    }

    fn fetch_leaf(&self, page_id: PageId) -> Result<BTreeLeafPage> {
        load_leaf(&self.buffer_pool, page_id)
    }

    fn fetch_internal(&self, page_id: PageId) -> Result<BTreeInternalPage> {
        match self.fetch_node(page_id)? {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => bail!("Page {} is a leaf, expected an internal node", page_id),
        }
    }

    fn write_node<P: Page>(&self, page: &P) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page.page_id())?;
        guard.copy_from_slice(page.data());
        Ok(())
    }

    fn set_parent(&self, child: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(child)?;
        set_parent_in_place(&mut guard[..], parent);
        Ok(())
    }

    fn allocate_node_page(&self) -> Result<PageId> {
        let (page_id, _guard) = self.buffer_pool.new_page()?;
        Ok(page_id)
    }

    fn delete_node_page(&self, page_id: PageId) -> Result<()> {
        if !self.buffer_pool.delete_page(page_id)? {
            warn!("Node page {} still pinned, not deleted", page_id);
        }
        Ok(())
    }

    fn set_root(&mut self, root: Option<PageId>) -> Result<()> {
        debug!(
            "Index {} root {:?} -> {:?}",
            self.index_id, self.root_page_id, root
        );
        self.root_page_id = root;

        let mut guard = self.buffer_pool.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::from_data(*guard);
        if !roots.upsert(self.index_id, root) {
            bail!("Index roots page is full, cannot record index {}", self.index_id);
        }
        guard.copy_from_slice(roots.data());
        Ok(())
    }

    pub fn stats(&self) -> Result<BTreeStatistics> {
        let mut stats = BTreeStatistics {
            root_page_id: self.root_page_id,
            key_size: self.key_size,
            max_size: self.max_size,
            ..Default::default()
        };
        if let Some(root) = self.root_page_id {
            self.collect_stats(root, 1, &mut stats)?;
        }
        Ok(stats)
    }

    fn collect_stats(&self, page_id: PageId, depth: u32, stats: &mut BTreeStatistics) -> Result<()> {
        stats.height = stats.height.max(depth);
        match self.fetch_node(page_id)? {
            Node::Leaf(leaf) => {
                stats.leaf_pages += 1;
                stats.entries += leaf.size();
            }
            Node::Internal(internal) => {
                stats.internal_pages += 1;
                for child in internal.children() {
                    self.collect_stats(child, depth + 1, stats)?;
                }
            }
        }
        Ok(())
    }

    /// Walk the whole tree and check its structural invariants: node headers,
    /// parent links, occupancy, key order and bounds, uniform leaf depth and
    /// the leaf sibling chain.
    pub fn validate(&self) -> Result<()> {
        let Some(root) = self.root_page_id else {
            return Ok(());
        };
        let mut walk = ValidationWalk::default();
        self.validate_node(root, None, None, None, 1, &mut walk)?;

        for pair in walk.leaves.windows(2) {
            if pair[0].1 != Some(pair[1].0) {
                bail!(
                    "Leaf {} links to {:?}, expected {}",
                    pair[0].0,
                    pair[0].1,
                    pair[1].0
                );
            }
        }
        if let Some(&(last, next)) = walk.leaves.last() {
            if next.is_some() {
                bail!("Rightmost leaf {} links to {:?}", last, next);
            }
        }
        Ok(())
    }

    fn validate_node(
        &self,
        page_id: PageId,
        parent: Option<PageId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: u32,
        walk: &mut ValidationWalk,
    ) -> Result<()> {
        let node = self.fetch_node(page_id)?;
        let header = node.header();
        if header.page_id() != page_id {
            bail!("Page {} records id {}", page_id, header.page_id());
        }
        if header.parent_page_id() != parent {
            bail!(
                "Page {} has parent {:?}, expected {:?}",
                page_id,
                header.parent_page_id(),
                parent
            );
        }
        if header.key_size() != self.key_size {
            bail!("Page {} has key size {}", page_id, header.key_size());
        }

        let size = header.size();
        let min = match (&node, parent) {
            (Node::Leaf(_), None) => 1,
            (Node::Internal(_), None) => 2,
            (_, Some(_)) => header.min_size(),
        };
        if size < min || size >= header.max_size() {
            bail!(
                "Page {} holds {} entries, allowed {}..{}",
                page_id,
                size,
                min,
                header.max_size()
            );
        }

        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |l| (self.comparator)(l, key).is_le())
                && upper.map_or(true, |u| (self.comparator)(key, u).is_lt())
        };

        match &node {
            Node::Leaf(leaf) => {
                for i in 0..size {
                    let key = leaf.key_at(i);
                    if !in_bounds(key) {
                        bail!("Leaf {} key {} escapes its parent's range", page_id, i);
                    }
                    if i > 0 && !(self.comparator)(leaf.key_at(i - 1), key).is_lt() {
                        bail!("Leaf {} keys out of order at {}", page_id, i);
                    }
                }
                match walk.leaf_depth {
                    Some(d) if d != depth => {
                        bail!("Leaf {} at depth {}, others at {}", page_id, depth, d)
                    }
                    _ => walk.leaf_depth = Some(depth),
                }
                walk.leaves.push((page_id, leaf.next_page_id()));
            }
            Node::Internal(internal) => {
                for i in 1..size {
                    let key = internal.key_at(i);
                    if !in_bounds(key) {
                        bail!("Internal {} separator {} escapes its range", page_id, i);
                    }
                    if i > 1 && !(self.comparator)(internal.key_at(i - 1), key).is_lt() {
                        bail!("Internal {} separators out of order at {}", page_id, i);
                    }
                }
                for i in 0..size {
                    let child_lower = if i == 0 { lower } else { Some(internal.key_at(i)) };
                    let child_upper = if i + 1 < size {
                        Some(internal.key_at(i + 1))
                    } else {
                        upper
                    };
                    self.validate_node(
                        internal.value_at(i),
                        Some(page_id),
                        child_lower,
                        child_upper,
                        depth + 1,
                        walk,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Dump the tree in Graphviz dot format. `fmt_key` renders one key.
    pub fn to_graph<W: Write>(&self, out: &mut W, fmt_key: fn(&[u8]) -> String) -> Result<()> {
        writeln!(out, "digraph G {{")?;
        if let Some(root) = self.root_page_id {
            self.node_to_graph(root, out, fmt_key)?;
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    fn node_to_graph<W: Write>(&self, page_id: PageId, out: &mut W, fmt_key: fn(&[u8]) -> String) -> Result<()> {
        const TABLE: &str =
            "label=<<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\" CELLPADDING=\"4\">";
        let node = self.fetch_node(page_id)?;
        let header = node.header();
        let size = header.size();
        let parent = header.parent_page_id();
        let (name, color) = match node {
            Node::Leaf(_) => (format!("LEAF_{}", page_id), "green"),
            Node::Internal(_) => (format!("INT_{}", page_id), "pink"),
        };

        writeln!(out, "{}[shape=plain color={} {}", name, color, TABLE)?;
        writeln!(
            out,
            "<TR><TD COLSPAN=\"{}\">P={},Parent={}</TD></TR>",
            size,
            page_id,
            parent.map_or("-".to_string(), |p| p.to_string())
        )?;
        writeln!(
            out,
            "<TR><TD COLSPAN=\"{}\">max_size={},min_size={},size={}</TD></TR>",
            size,
            header.max_size(),
            header.min_size(),
            size
        )?;
        write!(out, "<TR>")?;
        match &node {
            Node::Leaf(leaf) => {
                for i in 0..size {
                    writeln!(out, "<TD>{}</TD>", fmt_key(leaf.key_at(i)))?;
                }
            }
            Node::Internal(internal) => {
                for i in 0..size {
                    let label = if i == 0 { " ".to_string() } else { fmt_key(internal.key_at(i)) };
                    writeln!(out, "<TD PORT=\"p{}\">{}</TD>", internal.value_at(i), label)?;
                }
            }
        }
        writeln!(out, "</TR></TABLE>>];")?;

        if let Some(parent) = parent {
            writeln!(out, "INT_{}:p{} -> {};", parent, page_id, name)?;
        }

        match node {
            Node::Leaf(leaf) => {
                if let Some(next) = leaf.next_page_id() {
                    writeln!(out, "{} -> LEAF_{};", name, next)?;
                    writeln!(out, "{{rank=same {} LEAF_{}}};", name, next)?;
                }
            }
            Node::Internal(internal) => {
                for child in internal.children() {
                    self.node_to_graph(child, out, fmt_key)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ValidationWalk {
    leaf_depth: Option<u32>,
    /// (leaf, its next link) in key order
    leaves: Vec<(PageId, Option<PageId>)>,
}

/// Shape of a tree, gathered by a full walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BTreeStatistics {
    pub height: u32,
    pub root_page_id: Option<PageId>,
    pub internal_pages: usize,
    pub leaf_pages: usize,
    pub entries: usize,
    pub key_size: usize,
    pub max_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::DiskManager;
    use key::IndexKey;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::{tempdir, TempDir};

    /// Pool over a fresh file with the two reserved pages in place.
    fn create_test_buffer_pool(pool_size: usize) -> Result<(TempDir, BufferPoolManager)> {
        let dir = tempdir()?;
        let disk = DiskManager::create(&dir.path().join("test.db"))?;
        let pool = BufferPoolManager::new(disk, Box::new(LruReplacer::new(pool_size)), pool_size);
        let (catalog, _) = pool.new_page()?;
        let (roots, _) = pool.new_page()?;
        assert_eq!((catalog, roots), (PageId(0), INDEX_ROOTS_PAGE_ID));
        Ok((dir, pool))
    }

    fn rid(k: i64) -> RowId {
        RowId::new(PageId(k as u32), k as u32)
    }

    fn registry_root(pool: &BufferPoolManager, index_id: u32) -> Result<Option<Option<PageId>>> {
        let guard = pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        Ok(IndexRootsPage::from_data(*guard).get(index_id))
    }

    fn scan_keys(tree: &BPlusTree) -> Result<Vec<i64>> {
        tree.begin()?
            .map(|entry| entry.map(|(key, _)| IndexKey::to_i64(&key)))
            .collect()
    }

    #[test]
    fn test_empty_tree() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::new(1, pool, 8)?;

        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&IndexKey::from_i64(1))?, None);
        assert!(!tree.remove(&IndexKey::from_i64(1))?);
        assert!(tree.begin()? == tree.end());
        assert_eq!(tree.stats()?.height, 0);
        tree.validate()?;
        Ok(())
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::new(1, pool.clone(), 8)?;

        for k in [5, 1, 9, 3, 7] {
            assert!(tree.insert(&IndexKey::from_i64(k), rid(k))?);
        }
        assert!(!tree.insert(&IndexKey::from_i64(3), rid(99))?);

        for k in [1, 3, 5, 7, 9] {
            assert_eq!(tree.get_value(&IndexKey::from_i64(k))?, Some(rid(k)));
        }
        assert_eq!(tree.get_value(&IndexKey::from_i64(4))?, None);
        assert_eq!(scan_keys(&tree)?, vec![1, 3, 5, 7, 9]);
        assert_eq!(registry_root(&pool, 1)?, Some(tree.root_page_id()));
        assert!(pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_key_width_is_checked() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::new(1, pool, 8)?;
        assert!(tree.insert(&[1, 2, 3], rid(1)).is_err());
        assert!(tree.get_value(&[0; 9]).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_capacity_rejected() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        assert!(BPlusTree::with_max_size(1, pool.clone(), 8, 1).is_err());
        assert!(BPlusTree::with_max_size(1, pool.clone(), 8, 2).is_err());
        assert!(BPlusTree::with_max_size(1, pool.clone(), 8, 3).is_err());
        assert!(BPlusTree::with_max_size(1, pool.clone(), 8, MIN_NODE_CAPACITY).is_ok());
        assert!(BPlusTree::with_max_size(1, pool.clone(), 8, 1000).is_err());
        assert!(BPlusTree::new(1, pool, MAX_KEY_SIZE + 1).is_err());
        Ok(())
    }

    #[test]
    fn test_splits_build_expected_shape() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool.clone(), 8, 5)?;

        for k in 1..=11 {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }
        tree.validate()?;

        let stats = tree.stats()?;
        assert_eq!(stats.height, 2);
        assert_eq!(stats.leaf_pages, 4);
        assert_eq!(stats.internal_pages, 1);
        assert_eq!(stats.entries, 11);

        let root = tree.root_page_id().ok_or_else(|| anyhow!("empty tree"))?;
        let Node::Internal(root_node) = load_node(&pool, root)? else {
            bail!("root is not internal");
        };
        let separators: Vec<i64> = (1..root_node.size())
            .map(|i| IndexKey::to_i64(root_node.key_at(i)))
            .collect();
        assert_eq!(separators, vec![4, 7, 10]);
        assert_eq!(registry_root(&pool, 1)?, Some(Some(root)));
        Ok(())
    }

    #[test]
    fn test_remove_redistributes_and_merges() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool.clone(), 8, 5)?;
        for k in 1..=11 {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }

        // Leaves [1,2,3] [4,5,6] [7,8,9] [10,11]
        assert!(tree.remove(&IndexKey::from_i64(11))?);
        tree.validate()?;
        assert_eq!(tree.stats()?.leaf_pages, 3);

        assert!(tree.remove(&IndexKey::from_i64(1))?);
        assert!(tree.remove(&IndexKey::from_i64(2))?);
        tree.validate()?;
        assert!(!tree.remove(&IndexKey::from_i64(2))?);

        // Leaves [3,4,5,6] [7,8,9,10]
        assert_eq!(scan_keys(&tree)?, vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(tree.stats()?.leaf_pages, 2);

        // Right leaf underflows and borrows 6 from its left sibling
        for k in [9, 8, 7] {
            assert!(tree.remove(&IndexKey::from_i64(k))?);
        }
        tree.validate()?;
        assert_eq!(tree.stats()?.leaf_pages, 2);
        assert_eq!(scan_keys(&tree)?, vec![3, 4, 5, 6, 10]);
        assert_eq!(tree.get_value(&IndexKey::from_i64(6))?, Some(rid(6)));
        assert!(pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_remove_everything_empties_tree() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool.clone(), 8, 4)?;

        for k in 0..50 {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }
        let old_root = tree.root_page_id().ok_or_else(|| anyhow!("empty tree"))?;
        for k in 0..50 {
            assert!(tree.remove(&IndexKey::from_i64(k))?);
            tree.validate()?;
        }

        assert!(tree.is_empty());
        assert_eq!(registry_root(&pool, 1)?, Some(None));
        assert!(pool.is_page_free(old_root)?);
        assert!(tree.begin()?.is_end());
        Ok(())
    }

    #[test]
    fn test_random_workload_keeps_invariants() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(8)?;
        let mut tree = BPlusTree::with_max_size(7, pool.clone(), 8, 6)?;
        let mut rng = StdRng::seed_from_u64(42);

        let mut keys: Vec<i64> = (0..400).collect();
        keys.shuffle(&mut rng);
        for &k in &keys {
            assert!(tree.insert(&IndexKey::from_i64(k), rid(k))?);
        }
        tree.validate()?;

        keys.shuffle(&mut rng);
        let (removed, kept) = keys.split_at(250);
        for (n, &k) in removed.iter().enumerate() {
            assert!(tree.remove(&IndexKey::from_i64(k))?);
            if n % 25 == 0 {
                tree.validate()?;
            }
        }
        tree.validate()?;

        for &k in removed {
            assert_eq!(tree.get_value(&IndexKey::from_i64(k))?, None);
        }
        for &k in kept {
            assert_eq!(tree.get_value(&IndexKey::from_i64(k))?, Some(rid(k)));
        }
        let mut expected = kept.to_vec();
        expected.sort();
        assert_eq!(scan_keys(&tree)?, expected);
        assert!(pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_smallest_capacity_workload() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(8)?;
        let mut tree = BPlusTree::with_max_size(1, pool.clone(), 8, MIN_NODE_CAPACITY)?;
        let mut rng = StdRng::seed_from_u64(3);

        let mut keys: Vec<i64> = (0..300).collect();
        keys.shuffle(&mut rng);
        for &k in &keys {
            assert!(tree.insert(&IndexKey::from_i64(k), rid(k))?);
        }
        tree.validate()?;
        // Every node holds at least two entries
        assert!(tree.stats()?.height <= 9);

        keys.shuffle(&mut rng);
        let mut remaining: Vec<i64> = keys.clone();
        remaining.sort();
        for (n, &k) in keys.iter().enumerate() {
            assert!(tree.remove(&IndexKey::from_i64(k))?, "remove #{} key {}", n, k);
            remaining.retain(|&r| r != k);
            if n % 10 == 0 {
                tree.validate()?;
                assert_eq!(scan_keys(&tree)?, remaining);
            }
        }
        assert!(tree.is_empty());
        assert_eq!(registry_root(&pool, 1)?, Some(None));
        assert!(pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_widest_keys_use_default_capacity() -> Result<()> {
        let wide_key = |k: i64| {
            let mut key = vec![0u8; MAX_KEY_SIZE];
            key[..8].copy_from_slice(&IndexKey::from_i64(k));
            key
        };

        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::new(1, pool.clone(), MAX_KEY_SIZE)?;
        assert_eq!(tree.max_size(), MIN_NODE_CAPACITY);

        let mut rng = StdRng::seed_from_u64(11);
        let mut keys: Vec<i64> = (0..200).collect();
        keys.shuffle(&mut rng);
        for &k in &keys {
            assert!(tree.insert(&wide_key(k), rid(k))?);
        }
        tree.validate()?;
        let stats = tree.stats()?;
        assert_eq!(stats.entries, 200);
        assert!(stats.height <= 8, "height {}", stats.height);
        assert_eq!(scan_keys(&tree)?, (0..200).collect::<Vec<_>>());

        keys.shuffle(&mut rng);
        for &k in &keys[..150] {
            assert!(tree.remove(&wide_key(k))?);
        }
        tree.validate()?;
        for &k in &keys[150..] {
            assert_eq!(tree.get_value(&wide_key(k))?, Some(rid(k)));
        }
        assert_eq!(tree.stats()?.entries, 50);
        Ok(())
    }

    #[test]
    fn test_begin_at() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool, 8, 4)?;
        for k in (0..40).step_by(2) {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }

        let from = |k: i64| -> Result<Vec<i64>> {
            tree.begin_at(&IndexKey::from_i64(k))?
                .take(3)
                .map(|entry| entry.map(|(key, _)| IndexKey::to_i64(&key)))
                .collect()
        };
        assert_eq!(from(10)?, vec![10, 12, 14]);
        assert_eq!(from(11)?, vec![12, 14, 16]);
        assert_eq!(from(-5)?, vec![0, 2, 4]);
        assert_eq!(from(37)?, vec![38]);
        assert!(tree.begin_at(&IndexKey::from_i64(39))?.is_end());
        Ok(())
    }

    #[test]
    fn test_reopen_from_registry() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        {
            let mut tree = BPlusTree::with_max_size(3, pool.clone(), 8, 5)?;
            for k in 0..30 {
                tree.insert(&IndexKey::from_i64(k), rid(k))?;
            }
        }

        let tree = BPlusTree::new(3, pool, 8)?;
        assert_eq!(tree.max_size(), 5);
        assert_eq!(tree.get_value(&IndexKey::from_i64(17))?, Some(rid(17)));
        assert_eq!(tree.stats()?.entries, 30);
        Ok(())
    }

    #[test]
    fn test_destroy_releases_pages() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool.clone(), 8, 4)?;
        for k in 0..30 {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }
        let root = tree.root_page_id().ok_or_else(|| anyhow!("empty tree"))?;
        let first_leaf = tree.begin()?.page_id().ok_or_else(|| anyhow!("no leaf"))?;

        tree.destroy()?;
        assert!(tree.is_empty());
        assert_eq!(registry_root(&pool, 1)?, None);
        assert!(pool.is_page_free(root)?);
        assert!(pool.is_page_free(first_leaf)?);
        assert!(!pool.is_page_free(INDEX_ROOTS_PAGE_ID)?);
        Ok(())
    }

    #[test]
    fn test_to_graph() -> Result<()> {
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool, 8, 4)?;
        for k in 0..6 {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }

        let mut out = Vec::new();
        tree.to_graph(&mut out, |k| IndexKey::to_i64(k).to_string())?;
        let dot = String::from_utf8(out)?;
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("INT_"));
        assert!(dot.contains("LEAF_"));
        assert!(dot.trim_end().ends_with('}'));
        Ok(())
    }

    #[test]
    fn test_custom_comparator() -> Result<()> {
        fn descending(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
            b.cmp(a)
        }
        let (_dir, pool) = create_test_buffer_pool(16)?;
        let mut tree = BPlusTree::with_max_size(1, pool, 8, 4)?.with_comparator(descending);
        for k in 0..10 {
            tree.insert(&IndexKey::from_i64(k), rid(k))?;
        }
        tree.validate()?;
        assert_eq!(scan_keys(&tree)?, (0..10).rev().collect::<Vec<_>>());
        Ok(())
    }
}
