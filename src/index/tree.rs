use std::{
    io::Read,
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

use log::debug;

use crate::{
    catalog::ColumnType,
    error::{DbError, DbResult},
    index::{
        node::{NodeHandle, NODE_HDR_SIZE, RID_SIZE},
        Iid, KeySchema, INDEX_FILE_HDR_PAGE, INIT_NUM_PAGES, INIT_ROOT_PAGE, LEAF_HEADER_PAGE,
    },
    io::{Decodeable, Encodeable, SmallWriter},
    record::Rid,
    storage::{BufferPool, DiskManager, FileId, PageId, NO_PAGE, PAGE_SIZE},
    utils::HandyRwLock,
};

/// Mutable part of the index file header.
#[derive(Debug, Clone)]
pub struct TreeHdr {
    pub root_page: u32,
    pub first_leaf: u32,
    pub last_leaf: u32,
    pub num_pages: u32,
}

/// Full on-disk header: tree pointers plus the immutable key schema.
struct IndexFileHdr {
    tree: TreeHdr,
    key_len: u32,
    max_keys_per_node: u32,
    col_types: Vec<ColumnType>,
    col_lens: Vec<u32>,
}

impl Encodeable for IndexFileHdr {
    fn encode(&self) -> Vec<u8> {
        let mut writer = SmallWriter::new();
        writer.write(&self.tree.root_page);
        writer.write(&self.tree.first_leaf);
        writer.write(&self.tree.last_leaf);
        writer.write(&self.tree.num_pages);
        writer.write(&self.key_len);
        writer.write(&self.max_keys_per_node);
        writer.write(&(self.col_types.len() as u32));
        for (t, len) in self.col_types.iter().zip(&self.col_lens) {
            writer.write(&t.to_u8());
            writer.write(len);
        }
        writer.to_bytes()
    }
}

impl Decodeable for IndexFileHdr {
    fn decode<R: Read>(reader: &mut R) -> DbResult<Self> {
        let tree = TreeHdr {
            root_page: u32::decode(reader)?,
            first_leaf: u32::decode(reader)?,
            last_leaf: u32::decode(reader)?,
            num_pages: u32::decode(reader)?,
        };
        let key_len = u32::decode(reader)?;
        let max_keys_per_node = u32::decode(reader)?;
        let num_cols = u32::decode(reader)?;
        let mut col_types = Vec::with_capacity(num_cols as usize);
        let mut col_lens = Vec::with_capacity(num_cols as usize);
        for _ in 0..num_cols {
            col_types.push(ColumnType::from_u8(u8::decode(reader)?)?);
            col_lens.push(u32::decode(reader)?);
        }
        Ok(Self {
            tree,
            key_len,
            max_keys_per_node,
            col_types,
            col_lens,
        })
    }
}

/// A leaf-linked B+ tree over composite fixed-length keys, one file per
/// index. Structural modifications are serialized by a single root latch;
/// point reads traverse without it.
pub struct IndexHandle {
    fd: FileId,
    name: String,
    disk: Arc<DiskManager>,
    buffer_pool: Arc<BufferPool>,
    schema: Arc<KeySchema>,
    hdr: RwLock<TreeHdr>,
    root_latch: Mutex<()>,
}

impl IndexHandle {
    /// Create a fresh index file: header page, the leaf-chain sentinel, and
    /// an empty root leaf.
    pub fn create<P: AsRef<Path>>(
        disk: Arc<DiskManager>,
        buffer_pool: Arc<BufferPool>,
        path: P,
        name: &str,
        col_types: Vec<ColumnType>,
        col_lens: Vec<usize>,
        max_keys_per_node: Option<usize>,
    ) -> DbResult<Self> {
        let key_len: usize = col_lens.iter().sum();
        // Node arrays hold max_keys + 1 entries: one slot of slack for the
        // overflow between an insert and the split it triggers.
        let max_keys =
            max_keys_per_node.unwrap_or((PAGE_SIZE - NODE_HDR_SIZE) / (key_len + RID_SIZE) - 1);
        assert!(max_keys >= 3, "max_keys_per_node too small: {}", max_keys);
        assert!(NODE_HDR_SIZE + (max_keys + 1) * (key_len + RID_SIZE) <= PAGE_SIZE);

        let fd = disk.open_file(path)?;
        let schema = Arc::new(KeySchema {
            col_types,
            col_lens,
            key_len,
            max_keys_per_node: max_keys,
        });

        let handle = Self {
            fd,
            name: name.to_string(),
            disk,
            buffer_pool,
            schema,
            hdr: RwLock::new(TreeHdr {
                root_page: INIT_ROOT_PAGE,
                first_leaf: INIT_ROOT_PAGE,
                last_leaf: INIT_ROOT_PAGE,
                num_pages: INIT_NUM_PAGES,
            }),
            root_latch: Mutex::new(()),
        };

        let sentinel = handle.materialize_node(LEAF_HEADER_PAGE)?;
        sentinel.init(true, NO_PAGE, NO_PAGE, INIT_ROOT_PAGE);

        let root = handle.materialize_node(INIT_ROOT_PAGE)?;
        root.init(true, NO_PAGE, LEAF_HEADER_PAGE, LEAF_HEADER_PAGE);

        handle.flush_hdr()?;
        Ok(handle)
    }

    pub fn open<P: AsRef<Path>>(
        disk: Arc<DiskManager>,
        buffer_pool: Arc<BufferPool>,
        path: P,
        name: &str,
    ) -> DbResult<Self> {
        let fd = disk.open_file(path)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, INDEX_FILE_HDR_PAGE, &mut buf)?;
        let file_hdr = crate::io::decode_from_bytes::<IndexFileHdr>(&buf)?;

        let schema = Arc::new(KeySchema {
            col_types: file_hdr.col_types.clone(),
            col_lens: file_hdr.col_lens.iter().map(|l| *l as usize).collect(),
            key_len: file_hdr.key_len as usize,
            max_keys_per_node: file_hdr.max_keys_per_node as usize,
        });

        Ok(Self {
            fd,
            name: name.to_string(),
            disk,
            buffer_pool,
            schema,
            hdr: RwLock::new(file_hdr.tree),
            root_latch: Mutex::new(()),
        })
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    fn flush_hdr(&self) -> DbResult<()> {
        let file_hdr = IndexFileHdr {
            tree: self.hdr.rl().clone(),
            key_len: self.schema.key_len as u32,
            max_keys_per_node: self.schema.max_keys_per_node as u32,
            col_types: self.schema.col_types.clone(),
            col_lens: self.schema.col_lens.iter().map(|l| *l as u32).collect(),
        };
        let mut writer = SmallWriter::new();
        writer.write(&file_hdr);
        self.disk.write_page(
            self.fd,
            INDEX_FILE_HDR_PAGE,
            &writer.to_padded_bytes(PAGE_SIZE),
        )
    }

    fn fetch_node(&self, page_no: u32) -> DbResult<NodeHandle> {
        let pod = self.buffer_pool.fetch_page(PageId::new(self.fd, page_no))?;
        Ok(NodeHandle::new(page_no, pod, self.schema.clone()))
    }

    fn materialize_node(&self, page_no: u32) -> DbResult<NodeHandle> {
        let pod = self.buffer_pool.new_page(PageId::new(self.fd, page_no))?;
        Ok(NodeHandle::new(page_no, pod, self.schema.clone()))
    }

    fn create_node(&self) -> DbResult<NodeHandle> {
        let mut hdr = self.hdr.wl();
        let page_no = hdr.num_pages;
        hdr.num_pages += 1;
        drop(hdr);
        self.materialize_node(page_no)
    }

    /// Walk from the root to the leaf covering `key` (or the leftmost leaf
    /// when `find_first`). `None` when the tree is empty.
    fn find_leaf_page(&self, key: &[u8], find_first: bool) -> DbResult<Option<NodeHandle>> {
        let root_page = self.hdr.rl().root_page;
        if root_page == NO_PAGE {
            return Ok(None);
        }

        let mut node = self.fetch_node(root_page)?;
        while !node.is_leaf() {
            let child_no = if find_first {
                node.child_at(0)
            } else {
                node.internal_lookup(key)
            };
            node = self.fetch_node(child_no)?;
        }
        Ok(Some(node))
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> DbResult<Option<Rid>> {
        match self.find_leaf_page(key, false)? {
            None => Ok(None),
            Some(leaf) => Ok(leaf.leaf_lookup(key)),
        }
    }

    /// Insert `(key, rid)`, splitting up the tree as needed. A duplicate
    /// key is silently ignored. Returns the leaf page the key lives on.
    pub fn insert_entry(&self, key: &[u8], rid: Rid) -> DbResult<u32> {
        let _guard = self.root_latch.lock().unwrap();

        if self.hdr.rl().root_page == NO_PAGE {
            // The tree was emptied by deletes; grow a fresh root leaf.
            let root = self.create_node()?;
            root.init(true, NO_PAGE, LEAF_HEADER_PAGE, LEAF_HEADER_PAGE);
            let mut hdr = self.hdr.wl();
            hdr.root_page = root.page_no;
            hdr.first_leaf = root.page_no;
            hdr.last_leaf = root.page_no;
        }

        let leaf = self
            .find_leaf_page(key, false)?
            .ok_or_else(|| DbError::Internal("empty tree after root init".to_string()))?;
        let leaf_page_no = leaf.page_no;

        let new_size = leaf.insert(key, rid);
        if new_size >= self.schema.max_keys_per_node {
            let new_leaf = self.split(&leaf)?;
            let split_key = new_leaf.key_at(0);
            self.insert_into_parent(&leaf, &split_key, &new_leaf)?;
        }
        self.maintain_parent(&leaf)?;

        Ok(leaf_page_no)
    }

    /// Split `node`, moving the right half into a fresh right sibling.
    fn split(&self, node: &NodeHandle) -> DbResult<NodeHandle> {
        let new_node = self.create_node()?;
        new_node.init(node.is_leaf(), node.parent(), NO_PAGE, NO_PAGE);

        let total = node.size();
        let move_count = total / 2;
        let start = total - move_count;

        let keys = node.keys_between(start, total);
        let rids = node.rids_between(start, total);
        new_node.insert_pairs(0, &keys, &rids, move_count);
        node.set_size(start);

        debug!(
            "split node {} -> {} ({} | {})",
            node.page_no,
            new_node.page_no,
            start,
            move_count
        );

        if node.is_leaf() {
            new_node.set_prev_leaf(node.page_no);
            new_node.set_next_leaf(node.next_leaf());
            node.set_next_leaf(new_node.page_no);

            let next = new_node.next_leaf();
            if next != NO_PAGE && next != LEAF_HEADER_PAGE {
                self.fetch_node(next)?.set_prev_leaf(new_node.page_no);
            }

            let mut hdr = self.hdr.wl();
            if hdr.last_leaf == node.page_no {
                hdr.last_leaf = new_node.page_no;
            }
        } else {
            for i in 0..new_node.size() {
                self.maintain_child(&new_node, i)?;
            }
        }

        Ok(new_node)
    }

    /// After a split, push the right sibling's first key into the parent,
    /// recursing when the parent overflows in turn. Splitting the root
    /// grows a new root above the pair.
    fn insert_into_parent(
        &self,
        old_node: &NodeHandle,
        key: &[u8],
        new_node: &NodeHandle,
    ) -> DbResult<()> {
        if old_node.is_root() {
            let new_root = self.create_node()?;
            new_root.init(false, NO_PAGE, NO_PAGE, NO_PAGE);
            new_root.insert_pair(0, &old_node.key_at(0), Rid::new(old_node.page_no, 0));
            new_root.insert_pair(1, key, Rid::new(new_node.page_no, 0));

            old_node.set_parent(new_root.page_no);
            new_node.set_parent(new_root.page_no);

            self.hdr.wl().root_page = new_root.page_no;
            debug!("new root {}", new_root.page_no);
            return Ok(());
        }

        let parent = self.fetch_node(old_node.parent())?;
        let index = parent
            .find_child(old_node.page_no)
            .ok_or_else(|| DbError::Internal("child not found in parent".to_string()))?;
        parent.insert_pair(index + 1, key, Rid::new(new_node.page_no, 0));
        new_node.set_parent(parent.page_no);

        if parent.size() >= self.schema.max_keys_per_node {
            let new_parent = self.split(&parent)?;
            let push_up_key = new_parent.key_at(0);
            self.insert_into_parent(&parent, &push_up_key, &new_parent)?;
        } else {
            self.maintain_parent(&parent)?;
        }
        Ok(())
    }

    /// Delete the entry for `key`. Underflowing non-root leaves are
    /// redistributed or coalesced. Returns whether anything was removed.
    pub fn delete_entry(&self, key: &[u8]) -> DbResult<bool> {
        let _guard = self.root_latch.lock().unwrap();

        let leaf = match self.find_leaf_page(key, false)? {
            None => return Ok(false),
            Some(leaf) => leaf,
        };

        let old_size = leaf.size();
        let new_size = leaf.remove(key);
        let removed = new_size < old_size;
        if !removed {
            return Ok(false);
        }

        if leaf.is_root() {
            self.adjust_root(&leaf)?;
        } else if new_size < self.schema.min_keys_per_node() {
            self.coalesce_or_redistribute(leaf)?;
        } else {
            self.maintain_parent(&leaf)?;
        }
        Ok(true)
    }

    /// Fix an underflowing node: borrow one entry from a sibling when the
    /// two together overfill a node, merge them otherwise. Prefers the left
    /// sibling.
    fn coalesce_or_redistribute(&self, node: NodeHandle) -> DbResult<()> {
        if node.is_root() {
            self.adjust_root(&node)?;
            return Ok(());
        }

        let parent = self.fetch_node(node.parent())?;
        let index = parent
            .find_child(node.page_no)
            .ok_or_else(|| DbError::Internal("child not found in parent".to_string()))?;
        let neighbor_index = if index == 0 { 1 } else { index - 1 };
        let neighbor = self.fetch_node(parent.child_at(neighbor_index))?;
        let neighbor_is_left = neighbor_index < index;

        if neighbor.size() + node.size() <= self.schema.max_keys_per_node {
            let (left, right) = if neighbor_is_left {
                (neighbor, node)
            } else {
                (node, neighbor)
            };
            self.coalesce(&left, &right, &parent)?;

            if parent.is_root() {
                self.adjust_root(&parent)?;
            } else if parent.size() < self.schema.min_keys_per_node() {
                self.coalesce_or_redistribute(parent)?;
            } else {
                self.maintain_parent(&parent)?;
            }
        } else {
            self.redistribute(&neighbor, &node, &parent, index)?;
            // Both participants may have a new first key; walk their
            // ancestor chains.
            self.maintain_parent(&node)?;
            self.maintain_parent(&neighbor)?;
        }
        Ok(())
    }

    /// Merge `right` into `left` and drop the parent's separator for it.
    fn coalesce(&self, left: &NodeHandle, right: &NodeHandle, parent: &NodeHandle) -> DbResult<()> {
        let left_size = left.size();
        let right_size = right.size();
        let keys = right.keys_between(0, right_size);
        let rids = right.rids_between(0, right_size);
        left.insert_pairs(left_size, &keys, &rids, right_size);

        debug!("coalesce node {} into {}", right.page_no, left.page_no);

        if left.is_leaf() {
            left.set_next_leaf(right.next_leaf());
            let next = right.next_leaf();
            if next != NO_PAGE && next != LEAF_HEADER_PAGE {
                self.fetch_node(next)?.set_prev_leaf(left.page_no);
            }

            let mut hdr = self.hdr.wl();
            if hdr.last_leaf == right.page_no {
                hdr.last_leaf = left.page_no;
            }
            if hdr.first_leaf == right.page_no {
                hdr.first_leaf = left.page_no;
            }
        } else {
            for i in left_size..left.size() {
                self.maintain_child(left, i)?;
            }
        }

        let parent_index = parent
            .find_child(right.page_no)
            .ok_or_else(|| DbError::Internal("child not found in parent".to_string()))?;
        parent.erase_pair(parent_index);

        self.maintain_parent(left)?;

        // The dropped page is leaked from the file's point of view; index
        // files do not keep a page freelist.
        Ok(())
    }

    /// Move one entry from `neighbor` into `node` and refresh the parent's
    /// separator.
    fn redistribute(
        &self,
        neighbor: &NodeHandle,
        node: &NodeHandle,
        parent: &NodeHandle,
        index: usize,
    ) -> DbResult<()> {
        if index > 0 {
            // neighbor(left) node(right): move the neighbor's last pair to
            // the node's head.
            let move_idx = neighbor.size() - 1;
            let key = neighbor.key_at(move_idx);
            let rid = neighbor.rid_at(move_idx);
            node.insert_pairs(0, &key, &[rid], 1);
            neighbor.erase_pair(move_idx);

            parent.set_key(index, &node.key_at(0));
            if !node.is_leaf() {
                self.maintain_child(node, 0)?;
            }
        } else {
            // node(left) neighbor(right): move the neighbor's first pair to
            // the node's tail.
            let key = neighbor.key_at(0);
            let rid = neighbor.rid_at(0);
            node.insert_pairs(node.size(), &key, &[rid], 1);
            neighbor.erase_pair(0);

            parent.set_key(index + 1, &neighbor.key_at(0));
            if !node.is_leaf() {
                self.maintain_child(node, node.size() - 1)?;
            }
        }
        Ok(())
    }

    /// Shrink the root: a single-child internal root promotes its child; an
    /// empty leaf root empties the whole tree.
    fn adjust_root(&self, old_root: &NodeHandle) -> DbResult<bool> {
        if !old_root.is_leaf() && old_root.size() == 1 {
            let child_page = old_root.child_at(0);
            self.fetch_node(child_page)?.set_parent(NO_PAGE);
            self.hdr.wl().root_page = child_page;
            debug!("root shrunk to {}", child_page);
            return Ok(true);
        }

        if old_root.is_leaf() && old_root.size() == 0 {
            let mut hdr = self.hdr.wl();
            hdr.root_page = NO_PAGE;
            hdr.first_leaf = NO_PAGE;
            hdr.last_leaf = NO_PAGE;
            debug!("tree is now empty");
            return Ok(true);
        }

        Ok(false)
    }

    /// Walk the ancestors of `node`, rewriting any separator that no longer
    /// equals the first key of its subtree.
    fn maintain_parent(&self, node: &NodeHandle) -> DbResult<()> {
        let mut curr_page = node.page_no;
        let mut curr_parent = node.parent();
        let mut curr_first_key = match node.size() {
            0 => return Ok(()),
            _ => node.key_at(0),
        };

        while curr_parent != NO_PAGE {
            let parent = self.fetch_node(curr_parent)?;
            let rank = parent
                .find_child(curr_page)
                .ok_or_else(|| DbError::Internal("child not found in parent".to_string()))?;
            if parent.key_at(rank) == curr_first_key {
                break;
            }
            parent.set_key(rank, &curr_first_key);

            curr_page = parent.page_no;
            curr_parent = parent.parent();
            curr_first_key = parent.key_at(0);
        }
        Ok(())
    }

    /// Point the parent pointer of `node`'s `child_idx`-th child back at
    /// `node`.
    fn maintain_child(&self, node: &NodeHandle, child_idx: usize) -> DbResult<()> {
        if node.is_leaf() {
            return Ok(());
        }
        let child_page = node.child_at(child_idx);
        self.fetch_node(child_page)?.set_parent(node.page_no);
        Ok(())
    }

    /// Resolve an iterator position to the heap rid it points at.
    pub fn get_rid(&self, iid: Iid) -> DbResult<Rid> {
        let node = self.fetch_node(iid.page_no)?;
        if iid.slot_no >= node.size() {
            return Err(DbError::IndexEntryNotFound);
        }
        Ok(node.rid_at(iid.slot_no))
    }

    /// First position whose key is `>= key`, advancing into the next leaf
    /// when the slot runs off the end.
    pub fn lower_bound(&self, key: &[u8]) -> DbResult<Iid> {
        self.bound(key, false)
    }

    /// First position whose key is `> key`.
    pub fn upper_bound(&self, key: &[u8]) -> DbResult<Iid> {
        self.bound(key, true)
    }

    fn bound(&self, key: &[u8], upper: bool) -> DbResult<Iid> {
        let leaf = match self.find_leaf_page(key, false)? {
            None => return Ok(Iid::NONE),
            Some(leaf) => leaf,
        };

        let mut page_no = leaf.page_no;
        let mut slot_no = if upper {
            leaf.upper_bound(key)
        } else {
            leaf.lower_bound(key)
        };

        if slot_no == leaf.size() {
            let next = leaf.next_leaf();
            if next != NO_PAGE && next != LEAF_HEADER_PAGE {
                page_no = next;
                slot_no = 0;
            }
        }
        Ok(Iid::new(page_no, slot_no))
    }

    /// Position of the first entry in index order.
    pub fn leaf_begin(&self) -> DbResult<Iid> {
        let first_leaf = self.hdr.rl().first_leaf;
        if first_leaf == NO_PAGE {
            return Ok(Iid::NONE);
        }
        Ok(Iid::new(first_leaf, 0))
    }

    /// Position one past the last entry in index order.
    pub fn leaf_end(&self) -> DbResult<Iid> {
        let last_leaf = self.hdr.rl().last_leaf;
        if last_leaf == NO_PAGE {
            return Ok(Iid::NONE);
        }
        let node = self.fetch_node(last_leaf)?;
        Ok(Iid::new(last_leaf, node.size()))
    }

    pub(crate) fn next_position(&self, iid: Iid, end: Iid) -> DbResult<Iid> {
        let node = self.fetch_node(iid.page_no)?;
        let mut next = Iid::new(iid.page_no, iid.slot_no + 1);
        if next.slot_no >= node.size() && next.page_no != end.page_no {
            let next_leaf = node.next_leaf();
            if next_leaf != NO_PAGE && next_leaf != LEAF_HEADER_PAGE {
                next = Iid::new(next_leaf, 0);
            } else {
                next = end;
            }
        }
        Ok(next)
    }

    /// Walk the whole tree asserting the structural invariants. Panics on
    /// violation; meant for tests.
    pub fn check_integrity(&self) -> DbResult<()> {
        let hdr = self.hdr.rl().clone();
        if hdr.root_page == NO_PAGE {
            assert_eq!(hdr.first_leaf, NO_PAGE);
            assert_eq!(hdr.last_leaf, NO_PAGE);
            return Ok(());
        }

        let root = self.fetch_node(hdr.root_page)?;
        assert!(root.is_root());
        self.check_subtree(&root, None, None, true)?;

        // leaf chain: doubly linked, strictly increasing keys overall
        let mut page_no = hdr.first_leaf;
        let mut prev_page = LEAF_HEADER_PAGE;
        let mut prev_key: Option<Vec<u8>> = None;
        let mut last_seen = hdr.first_leaf;
        while page_no != NO_PAGE && page_no != LEAF_HEADER_PAGE {
            let leaf = self.fetch_node(page_no)?;
            assert!(leaf.is_leaf());
            assert_eq!(leaf.prev_leaf(), prev_page, "broken prev link");
            for i in 0..leaf.size() {
                let key = leaf.key_at(i);
                if let Some(prev) = &prev_key {
                    assert!(
                        self.schema.compare(prev, &key) == std::cmp::Ordering::Less,
                        "leaf keys not strictly increasing"
                    );
                }
                prev_key = Some(key);
            }
            last_seen = page_no;
            prev_page = page_no;
            page_no = leaf.next_leaf();
        }
        assert_eq!(last_seen, hdr.last_leaf, "last_leaf mismatch");
        Ok(())
    }

    fn check_subtree(
        &self,
        node: &NodeHandle,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
    ) -> DbResult<()> {
        let size = node.size();
        if !is_root {
            assert!(
                size >= self.schema.min_keys_per_node(),
                "node {} underflow: {}",
                node.page_no,
                size
            );
        }
        // A coalesce may fill a node to exactly max_keys; anything beyond
        // would mean a missed split.
        assert!(size <= self.schema.max_keys_per_node);

        for i in 0..size {
            let key = node.key_at(i);
            if i > 0 {
                assert!(
                    self.schema.compare(&node.key_at(i - 1), &key) == std::cmp::Ordering::Less
                );
            }
            if let Some(lower) = lower {
                assert!(self.schema.compare(lower, &key) != std::cmp::Ordering::Greater);
            }
            if let Some(upper) = upper {
                assert!(self.schema.compare(&key, upper) == std::cmp::Ordering::Less);
            }
        }

        if !node.is_leaf() {
            for i in 0..size {
                let child = self.fetch_node(node.child_at(i))?;
                assert_eq!(child.parent(), node.page_no, "broken parent pointer");
                let separator = node.key_at(i);
                assert_eq!(
                    child.key_at(0),
                    separator,
                    "separator is not the subtree minimum"
                );
                let child_upper = if i + 1 < size {
                    Some(node.key_at(i + 1))
                } else {
                    None
                };
                self.check_subtree(
                    &child,
                    Some(separator.as_slice()),
                    child_upper.as_deref().or(upper),
                    false,
                )?;
            }
        }
        Ok(())
    }
}
