//! Directory and document views over the property tree

use crate::document::{DocumentReader, DocumentWriter};
use crate::error::{CfbError, Result};
use crate::filesystem::{Filesystem, DOCUMENT_FILL};
use crate::property::{Property, PropertyId, PropertyKind, ROOT_ID};
use crate::validation::EntryName;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Owned snapshot of an entry's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub kind: PropertyKind,

    /// Content length (0 for storages)
    pub size: u64,

    pub clsid: [u8; 16],
    pub state_bits: u32,

    /// Creation time as Unix epoch seconds
    pub created: Option<i64>,

    /// Modification time as Unix epoch seconds
    pub modified: Option<i64>,

    /// Number of children (0 for documents)
    pub child_count: usize,
}

impl EntryInfo {
    pub(crate) fn from_property(prop: &Property) -> Self {
        EntryInfo {
            name: prop.name.clone(),
            kind: prop.kind,
            size: if prop.is_document() { prop.size } else { 0 },
            clsid: prop.clsid,
            state_bits: prop.state_bits,
            created: prop.created_at().map(|t| t.timestamp()),
            modified: prop.modified_at().map(|t| t.timestamp()),
            child_count: prop.children.len(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind != PropertyKind::Document
    }

    pub fn is_document(&self) -> bool {
        self.kind == PropertyKind::Document
    }
}

/// A storage in the tree
pub struct Directory<'fs> {
    fs: &'fs mut Filesystem,
    id: PropertyId,
}

impl<'fs> Directory<'fs> {
    pub(crate) fn new(fs: &'fs mut Filesystem, id: PropertyId) -> Self {
        Directory { fs, id }
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    fn property(&self) -> Result<&Property> {
        self.fs.properties().property(self.id)
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.property()?.name.clone())
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    pub fn entry_count(&self) -> Result<usize> {
        Ok(self.property()?.children.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entry_count()? == 0)
    }

    pub fn has_entry(&self, name: &str) -> Result<bool> {
        Ok(self.fs.properties().find_child(self.id, name)?.is_some())
    }

    /// Child names in sibling order
    pub fn entry_names(&self) -> Result<Vec<String>> {
        let table = self.fs.properties();
        table
            .children(self.id)?
            .iter()
            .map(|&c| Ok(table.property(c)?.name.clone()))
            .collect()
    }

    /// Child metadata in sibling order
    pub fn entries(&self) -> Result<Vec<EntryInfo>> {
        let table = self.fs.properties();
        table
            .children(self.id)?
            .iter()
            .map(|&c| Ok(EntryInfo::from_property(table.property(c)?)))
            .collect()
    }

    pub fn entry(&self, name: &str) -> Result<EntryInfo> {
        let id = self.child_id(name)?;
        Ok(EntryInfo::from_property(self.fs.properties().property(id)?))
    }

    fn child_id(&self, name: &str) -> Result<PropertyId> {
        self.fs
            .properties()
            .find_child(self.id, name)?
            .ok_or_else(|| CfbError::NotFound(name.to_string()))
    }

    pub fn storage_clsid(&self) -> Result<[u8; 16]> {
        Ok(self.property()?.clsid)
    }

    pub fn set_storage_clsid(&mut self, clsid: [u8; 16]) -> Result<()> {
        self.fs.properties_mut().property_mut(self.id)?.clsid = clsid;
        Ok(())
    }

    fn insert(&mut self, name: &str, kind: PropertyKind) -> Result<PropertyId> {
        let name = EntryName::new(name)?;
        let id = self
            .fs
            .properties_mut()
            .insert_child(self.id, Property::new(name.into_string(), kind))?;
        Ok(id)
    }

    /// Drop a document whose creation failed, along with any blocks it got
    fn discard(&mut self, id: PropertyId) {
        if let Err(e) = self.fs.free_document(id) {
            warn!("Could not release blocks of a failed document: {}", e);
        }
        if let Err(e) = self.fs.properties_mut().remove(id) {
            warn!("Could not remove a failed document: {}", e);
        }
    }

    /// New document holding `data`
    ///
    /// On failure no entry named `name` is left behind.
    pub fn create_document(&mut self, name: &str, data: &[u8]) -> Result<Document<'_>> {
        let id = self.insert(name, PropertyKind::Document)?;
        if let Err(e) = self.fs.store_document(id, data) {
            self.discard(id);
            return Err(e);
        }
        debug!("Created document '{}' ({} bytes)", name, data.len());
        Ok(Document::new(self.fs, id))
    }

    /// New document of exactly `size` bytes, produced by `fill`
    ///
    /// `fill` gets a writer limited to `size`; anything it leaves unwritten is
    /// padded with 0xFF. If `fill` fails, the document is not created.
    pub fn create_document_sized<F>(
        &mut self,
        name: &str,
        size: u64,
        fill: F,
    ) -> Result<Document<'_>>
    where
        F: FnOnce(&mut DocumentWriter<'_>) -> Result<()>,
    {
        let id = self.insert(name, PropertyKind::Document)?;
        let outcome = {
            let mut writer = DocumentWriter::new(self.fs, id, Some(size));
            match fill(&mut writer).and_then(|()| writer.write_filler(size, DOCUMENT_FILL)) {
                Ok(()) => writer.close(),
                Err(e) => {
                    writer.abandon();
                    Err(e)
                }
            }
        };
        if let Err(e) = outcome {
            self.discard(id);
            return Err(e);
        }
        debug!("Created document '{}' ({} bytes, deferred)", name, size);
        Ok(Document::new(self.fs, id))
    }

    /// Replace an existing document's contents or create it
    pub fn create_or_update_document(
        &mut self,
        name: &str,
        data: &[u8],
    ) -> Result<Document<'_>> {
        match self.fs.properties().find_child(self.id, name)? {
            Some(id) => {
                self.fs.store_document(id, data)?;
                debug!("Updated document '{}' ({} bytes)", name, data.len());
                Ok(Document::new(self.fs, id))
            }
            None => self.create_document(name, data),
        }
    }

    pub fn create_directory(&mut self, name: &str) -> Result<Directory<'_>> {
        let id = self.insert(name, PropertyKind::Directory)?;
        debug!("Created directory '{}'", name);
        Ok(Directory::new(self.fs, id))
    }

    /// Child storage by name
    pub fn directory(&mut self, name: &str) -> Result<Directory<'_>> {
        let id = self.child_id(name)?;
        if !self.fs.properties().property(id)?.is_container() {
            return Err(CfbError::NotADirectory(name.to_string()));
        }
        Ok(Directory::new(self.fs, id))
    }

    /// Consume this view, moving into a child storage
    pub fn into_directory(self, name: &str) -> Result<Directory<'fs>> {
        let id = self.child_id(name)?;
        if !self.fs.properties().property(id)?.is_container() {
            return Err(CfbError::NotADirectory(name.to_string()));
        }
        Ok(Directory::new(self.fs, id))
    }

    /// Child document by name
    pub fn document(&mut self, name: &str) -> Result<Document<'_>> {
        let id = self.child_id(name)?;
        if !self.fs.properties().property(id)?.is_document() {
            return Err(CfbError::NotADocument(name.to_string()));
        }
        Ok(Document::new(self.fs, id))
    }

    pub fn open_document(&self, name: &str) -> Result<DocumentReader<'_>> {
        let id = self.child_id(name)?;
        DocumentReader::open(&*self.fs, id)
    }

    /// Rename a child; `false` if `old` is missing or `new` is taken
    pub fn rename(&mut self, old: &str, new: &str) -> Result<bool> {
        let new = EntryName::new(new)?;
        let id = match self.fs.properties().find_child(self.id, old)? {
            Some(id) => id,
            None => return Ok(false),
        };

        let renamed = self.fs.properties_mut().rename(id, new.as_str())?;
        if renamed {
            debug!("Renamed '{}' to '{}'", old, new);
        }
        Ok(renamed)
    }

    /// Delete a child; `false` for a storage that still has entries
    ///
    /// A deleted document's blocks go back to its store.
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        let id = self.child_id(name)?;
        delete_entry(self.fs, id)
    }
}

fn delete_entry(fs: &mut Filesystem, id: PropertyId) -> Result<bool> {
    let prop = fs.properties().property(id)?;
    if prop.is_container() && !prop.children.is_empty() {
        return Ok(false);
    }

    if prop.is_document() {
        fs.free_document(id)?;
    }
    let removed = fs.properties_mut().remove(id)?;
    debug!("Deleted '{}'", removed.name);
    Ok(true)
}

/// A document in the tree
pub struct Document<'fs> {
    fs: &'fs mut Filesystem,
    id: PropertyId,
}

impl<'fs> Document<'fs> {
    pub(crate) fn new(fs: &'fs mut Filesystem, id: PropertyId) -> Self {
        Document { fs, id }
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.fs.properties().property(self.id)?.name.clone())
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.fs.properties().property(self.id)?.size)
    }

    pub fn info(&self) -> Result<EntryInfo> {
        Ok(EntryInfo::from_property(
            self.fs.properties().property(self.id)?,
        ))
    }

    pub fn reader(&self) -> Result<DocumentReader<'_>> {
        DocumentReader::open(&*self.fs, self.id)
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.reader()?.read_to_vec()
    }

    /// Replace the contents
    pub fn replace(&mut self, data: &[u8]) -> Result<()> {
        self.fs.store_document(self.id, data)
    }

    /// Writer that replaces the contents when closed
    pub fn writer(&mut self, limit: Option<u64>) -> Result<DocumentWriter<'_>> {
        Ok(DocumentWriter::new(self.fs, self.id, limit))
    }

    pub fn into_writer(self, limit: Option<u64>) -> Result<DocumentWriter<'fs>> {
        Ok(DocumentWriter::new(self.fs, self.id, limit))
    }

    /// Rename in place; `false` if a sibling already uses `new`
    pub fn rename(&mut self, new: &str) -> Result<bool> {
        let new = EntryName::new(new)?;
        self.fs.properties_mut().rename(self.id, new.as_str())
    }

    pub fn delete(self) -> Result<()> {
        delete_entry(self.fs, self.id).map(|_| ())
    }
}
