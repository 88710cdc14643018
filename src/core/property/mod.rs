//! Property table: the directory tree of a compound file
//!
//! Properties live in an arena indexed by [`PropertyId`]. Each container keeps
//! its children as an ordered list; the on-disk left/right/child links are
//! only read when loading and regenerated when serializing.

pub mod record;

pub use record::{
    compare_names, Property, PropertyId, PropertyKind, MAX_NAME_LEN, NO_INDEX, PROPERTY_SIZE,
    ROOT_NAME,
};

use crate::allocator::{BlockRead, ChainLoopDetector, MainStore, END_OF_CHAIN};
use crate::error::{CfbError, Result};
use crate::header::BlockSize;
use tracing::{debug, warn};

/// Arena slot of the root entry
pub const ROOT_ID: PropertyId = 0;

#[derive(Debug, Clone)]
pub struct PropertyTable {
    properties: Vec<Option<Property>>,

    /// First main block of the property table stream
    start_block: u32,
}

impl PropertyTable {
    /// Table holding only the root entry
    pub fn new(start_block: u32) -> Self {
        PropertyTable {
            properties: vec![Some(Property::root())],
            start_block,
        }
    }

    /// Read the property stream and rebuild the tree
    ///
    /// The stream's blocks are claimed in the caller's shared detector.
    pub fn load(
        main: &MainStore,
        start_block: u32,
        detector: &mut ChainLoopDetector,
    ) -> Result<Self> {
        let block_size = main.block_size_kind();
        let mut records = Vec::new();

        let mut current = start_block;
        while current != END_OF_CHAIN {
            detector.claim(current)?;
            let bytes = main.read_block(current)?;
            for chunk in bytes.chunks_exact(PROPERTY_SIZE) {
                let index = records.len() as u32;
                records.push(Property::from_bytes(chunk, index, block_size)?);
            }
            current = main.successor(current)?;
        }

        let mut table = PropertyTable {
            properties: records,
            start_block,
        };
        table.populate()?;

        debug!("Loaded property table with {} entries", table.len());
        Ok(table)
    }

    /// Turn the persisted sibling trees into ordered child lists
    fn populate(&mut self) -> Result<()> {
        match self.properties.first() {
            Some(Some(root)) if root.kind == PropertyKind::Root => {}
            _ => {
                return Err(CfbError::CorruptProperty {
                    index: 0,
                    reason: "first record is not a root entry".to_string(),
                })
            }
        }

        let count = self.properties.len();
        let mut visited = vec![false; count];
        visited[ROOT_ID] = true;

        let root_child = self.properties[ROOT_ID].as_ref().map_or(NO_INDEX, |p| p.child);
        let mut stack: Vec<(PropertyId, u32)> = vec![(ROOT_ID, root_child)];

        while let Some((parent, index)) = stack.pop() {
            if index == NO_INDEX {
                continue;
            }

            let id = index as usize;
            if id >= count {
                return Err(CfbError::CorruptProperty {
                    index,
                    reason: format!("link points past the last of {} records", count),
                });
            }
            if visited[id] {
                return Err(CfbError::CorruptProperty {
                    index,
                    reason: "record is linked more than once".to_string(),
                });
            }
            visited[id] = true;

            let (left, right, child, kind) = match &self.properties[id] {
                Some(p) => (p.left, p.right, p.child, p.kind),
                None => {
                    warn!("Property {} is linked but empty or unsupported", id);
                    continue;
                }
            };

            if kind == PropertyKind::Root {
                return Err(CfbError::CorruptProperty {
                    index,
                    reason: "root entry linked as a child".to_string(),
                });
            }

            stack.push((parent, left));
            stack.push((parent, right));
            if kind.is_container() {
                stack.push((id, child));
            }

            self.attach(parent, id).map_err(|_| CfbError::CorruptProperty {
                index,
                reason: "duplicate name among siblings".to_string(),
            })?;
        }

        for (id, slot) in self.properties.iter_mut().enumerate() {
            if !visited[id] && slot.is_some() {
                warn!("Dropping unreachable property {}", id);
                *slot = None;
            }
        }

        Ok(())
    }

    /// Insert `id` into `parent`'s ordered child list
    fn attach(&mut self, parent: PropertyId, id: PropertyId) -> Result<()> {
        let name = self.property(id)?.name.clone();
        let position = match self.search_children(parent, &name)? {
            Ok(_) => return Err(CfbError::DuplicateName(name)),
            Err(position) => position,
        };

        self.property_mut(parent)?.children.insert(position, id);
        self.property_mut(id)?.parent = Some(parent);
        Ok(())
    }

    fn detach(&mut self, id: PropertyId) -> Result<()> {
        if let Some(parent) = self.property(id)?.parent {
            self.property_mut(parent)?.children.retain(|&c| c != id);
        }
        self.property_mut(id)?.parent = None;
        Ok(())
    }

    fn search_children(
        &self,
        parent: PropertyId,
        name: &str,
    ) -> Result<std::result::Result<usize, usize>> {
        let children = &self.property(parent)?.children;
        Ok(children.binary_search_by(|&c| match &self.properties[c] {
            Some(p) => compare_names(&p.name, name),
            None => std::cmp::Ordering::Less,
        }))
    }

    pub fn root(&self) -> PropertyId {
        ROOT_ID
    }

    pub fn get(&self, id: PropertyId) -> Option<&Property> {
        self.properties.get(id).and_then(|p| p.as_ref())
    }

    pub fn property(&self, id: PropertyId) -> Result<&Property> {
        self.get(id).ok_or_else(|| CfbError::NotFound(format!("property #{}", id)))
    }

    pub fn property_mut(&mut self, id: PropertyId) -> Result<&mut Property> {
        self.properties
            .get_mut(id)
            .and_then(|p| p.as_mut())
            .ok_or_else(|| CfbError::NotFound(format!("property #{}", id)))
    }

    /// Ordered children of a container
    pub fn children(&self, id: PropertyId) -> Result<&[PropertyId]> {
        Ok(&self.property(id)?.children)
    }

    /// Child of `parent` whose name matches exactly
    pub fn find_child(&self, parent: PropertyId, name: &str) -> Result<Option<PropertyId>> {
        Ok(self
            .search_children(parent, name)?
            .ok()
            .map(|pos| self.properties[parent].as_ref().map_or(0, |p| p.children[pos])))
    }

    /// Add a new entry under `parent`
    pub fn insert_child(&mut self, parent: PropertyId, property: Property) -> Result<PropertyId> {
        let parent_prop = self.property(parent)?;
        if !parent_prop.is_container() {
            return Err(CfbError::NotADirectory(parent_prop.name.clone()));
        }
        if self.find_child(parent, &property.name)?.is_some() {
            return Err(CfbError::DuplicateName(property.name));
        }

        let id = match self.properties.iter().position(|p| p.is_none()) {
            Some(free) => {
                self.properties[free] = Some(property);
                free
            }
            None => {
                self.properties.push(Some(property));
                self.properties.len() - 1
            }
        };

        self.attach(parent, id)?;
        Ok(id)
    }

    /// Remove an entry (and, for containers, nothing else: callers empty them first)
    pub fn remove(&mut self, id: PropertyId) -> Result<Property> {
        if id == ROOT_ID {
            return Err(CfbError::InvalidName(ROOT_NAME.to_string()));
        }
        self.detach(id)?;
        self.properties[id]
            .take()
            .ok_or_else(|| CfbError::NotFound(format!("property #{}", id)))
    }

    /// Rename an entry, keeping its parent's children ordered
    ///
    /// Returns `false` when a sibling already uses `new_name`.
    pub fn rename(&mut self, id: PropertyId, new_name: &str) -> Result<bool> {
        let parent = match self.property(id)?.parent {
            Some(parent) => parent,
            None => {
                self.property_mut(id)?.name = new_name.to_string();
                return Ok(true);
            }
        };

        if let Some(existing) = self.find_child(parent, new_name)? {
            return Ok(existing == id);
        }

        self.detach(id)?;
        self.property_mut(id)?.name = new_name.to_string();
        self.attach(parent, id)?;
        Ok(true)
    }

    /// Live properties
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &Property)> {
        self.properties
            .iter()
            .enumerate()
            .filter_map(|(id, p)| p.as_ref().map(|p| (id, p)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_block(&self) -> u32 {
        self.start_block
    }

    pub fn set_start_block(&mut self, start_block: u32) {
        self.start_block = start_block;
    }

    /// Entries in serialization order (pre-order from the root)
    fn preorder(&self) -> Vec<PropertyId> {
        let mut order = Vec::new();
        let mut stack = vec![ROOT_ID];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(p) = self.get(id) {
                stack.extend(p.children.iter().rev().copied());
            }
        }
        order
    }

    /// Serialize every live entry, padded to whole blocks
    ///
    /// Indices are compacted; each container's children are written as a
    /// sibling tree whose middle child hangs off the container, with the
    /// earlier children down its left links and the later ones down its
    /// right links.
    pub fn serialize(&self, block_size: BlockSize) -> Vec<u8> {
        let order = self.preorder();

        let mut index_of = vec![NO_INDEX; self.properties.len()];
        for (position, &id) in order.iter().enumerate() {
            index_of[id] = position as u32;
        }

        let mut left = vec![NO_INDEX; self.properties.len()];
        let mut right = vec![NO_INDEX; self.properties.len()];
        let mut child = vec![NO_INDEX; self.properties.len()];

        for &id in &order {
            let children = match self.get(id) {
                Some(p) if !p.children.is_empty() => &p.children,
                _ => continue,
            };

            let mid = children.len() / 2;
            child[id] = index_of[children[mid]];
            for j in 1..=mid {
                left[children[j]] = index_of[children[j - 1]];
            }
            for j in mid..children.len() - 1 {
                right[children[j]] = index_of[children[j + 1]];
            }
        }

        let per_block = block_size.bytes() / PROPERTY_SIZE;
        let slots = order.len().div_ceil(per_block) * per_block;
        let mut bytes = Vec::with_capacity(slots * PROPERTY_SIZE);

        for &id in &order {
            if let Some(p) = self.get(id) {
                bytes.extend_from_slice(&p.to_bytes(block_size, left[id], right[id], child[id]));
            }
        }
        for _ in order.len()..slots {
            bytes.extend_from_slice(&Property::empty_record());
        }

        bytes
    }
}
