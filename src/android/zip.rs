use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Component, Path};

use log::debug;
use zip::read::ZipArchive;

use crate::android::error::ArchiveError;

/// Access to the named entries of a package archive.
///
/// `Ok(None)` means the entry does not exist; `Err` means the archive itself could not be read.
pub trait EntrySource {
    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError>;
}

impl EntrySource for BTreeMap<String, Vec<u8>> {
    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        Ok(self.get(name).cloned())
    }
}

/// A single file entry of an [`ApkFile`].
#[derive(Clone, Debug)]
pub struct ApkEntry {
    pub data: Vec<u8>,
}

/// An APK (ZIP) file loaded into memory.
///
/// Entries are keyed by their normalized `/`-separated path. Directory records and entries
/// whose path escapes the archive root are dropped.
pub struct ApkFile {
    entries: BTreeMap<String, ApkEntry>,
}

impl ApkFile {
    /// Load an APK from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::from_reader(File::open(path.as_ref())?)
    }

    /// Load an APK already held in memory.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self, ArchiveError> {
        Self::from_reader(Cursor::new(bytes.as_ref()))
    }

    fn from_reader<R: Read + Seek>(reader: R) -> Result<Self, ArchiveError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut entries = BTreeMap::new();
        for idx in 0..archive.len() {
            let mut entry = archive.by_index(idx)?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry.enclosed_name().and_then(entry_name) else {
                debug!("skipping archive entry with unsafe path '{}'", entry.name());
                continue;
            };
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            entries.insert(name, ApkEntry { data });
        }
        Ok(ApkFile { entries })
    }

    /// Iterate over entry names.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Borrow an entry by name (e.g., `AndroidManifest.xml`).
    pub fn entry(&self, name: &str) -> Option<&ApkEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EntrySource for ApkFile {
    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        Ok(self.entry(name).map(|entry| entry.data.clone()))
    }
}

fn entry_name(path: &Path) -> Option<String> {
    let mut components = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => components.push(part.to_string_lossy().replace('\\', "/")),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => return None,
        }
    }
    if components.is_empty() {
        None
    } else {
        Some(components.join("/"))
    }
}
