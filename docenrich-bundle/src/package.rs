//! Bundle packing, unpacking, and content hashing.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::manifest::BundleManifest;
use crate::BundleError;

pub const MANIFEST_ENTRY: &str = "manifest.toml";

/// A single file entry inside a bundle.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// An opened bundle with parsed manifest.
pub struct Bundle {
    pub manifest: BundleManifest,
    /// Every file entry in archive order, the manifest included.
    entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Opens and parses a bundle from a reader.
    pub fn open<R: Read + Seek>(reader: R) -> Result<Self, BundleError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut manifest_bytes = None;
        let mut entries = Vec::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;

            if name == MANIFEST_ENTRY {
                manifest_bytes = Some(data.clone());
            }
            entries.push(BundleEntry { name, data });
        }

        let manifest_bytes =
            manifest_bytes.ok_or_else(|| BundleError::MissingEntry(MANIFEST_ENTRY.into()))?;
        let manifest: BundleManifest = toml::from_str(
            std::str::from_utf8(&manifest_bytes)
                .map_err(|e| BundleError::ManifestInvalid(e.to_string()))?,
        )?;
        manifest.validate()?;

        Ok(Self { manifest, entries })
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// The engine resource specifier named by the manifest.
    pub fn descriptor(&self) -> Option<&[u8]> {
        self.entry(&self.manifest.descriptor)
    }

    /// Computes a deterministic SHA-256 content hash over all entries.
    /// Entries are sorted by name to ensure determinism.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        for entry in sorted {
            hasher.update(entry.name.as_bytes());
            hasher.update((entry.data.len() as u64).to_le_bytes());
            hasher.update(&entry.data);
        }

        hex::encode(hasher.finalize())
    }
}

/// Fluent builder for creating bundles.
pub struct BundleBuilder {
    manifest: BundleManifest,
    files: BTreeMap<String, Vec<u8>>,
}

impl BundleBuilder {
    pub fn new(manifest: BundleManifest) -> Self {
        Self {
            manifest,
            files: BTreeMap::new(),
        }
    }

    /// Stores the engine resource specifier at the manifest's descriptor path.
    pub fn descriptor(self, data: Vec<u8>) -> Self {
        let path = self.manifest.descriptor.clone();
        self.file(&path, data)
    }

    pub fn file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), data);
        self
    }

    /// Builds the zip archive and returns the raw bytes.
    pub fn build(self) -> Result<Vec<u8>, BundleError> {
        self.manifest.validate()?;
        let buf = std::io::Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(buf);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let manifest_toml = toml::to_string_pretty(&self.manifest)?;
        zip.start_file(MANIFEST_ENTRY, options)?;
        zip.write_all(manifest_toml.as_bytes())?;

        for (name, data) in &self.files {
            if name == MANIFEST_ENTRY {
                continue;
            }
            zip.start_file(name.as_str(), options)?;
            zip.write_all(data)?;
        }

        let finished = zip.finish()?;
        Ok(finished.into_inner())
    }
}
