use std::collections::HashMap;

use bootres_importer::catalog::{
    FileKind, ImageDescription, ImageDescriptionSet, ImageFile, ImageKey,
};
use bytes::Bytes;
use sha2::{Digest, Sha256};

pub const FIXTURE_BASE_URL: &str = "http://images.test/catalog.json";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// An image description set plus the content of each file.
#[derive(Debug, Clone, Default)]
pub struct CatalogFixture {
    images: ImageDescriptionSet,
    blobs: HashMap<String, Bytes>,
}

impl CatalogFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `ubuntu/amd64/generic/<release>/stable` image with the given files.
    pub fn ubuntu(self, release: &str, files: &[(FileKind, &[u8])]) -> Self {
        self.image(
            ImageKey::new("ubuntu", "amd64", "generic", release, "stable"),
            files,
        )
    }

    pub fn image(mut self, key: ImageKey, files: &[(FileKind, &[u8])]) -> Self {
        let files = files
            .iter()
            .map(|(kind, data)| {
                let digest = sha256_hex(data);
                self.blobs
                    .insert(digest.clone(), Bytes::copy_from_slice(data));
                ImageFile {
                    kind: *kind,
                    path: format!("{}/{}", key.relative_dir().display(), kind),
                    sha256: digest,
                    size: data.len() as u64,
                }
            })
            .collect();
        self.images
            .insert(key, ImageDescription::new(FIXTURE_BASE_URL, files));
        self
    }

    pub fn images(&self) -> ImageDescriptionSet {
        self.images.clone()
    }

    pub fn blobs(&self) -> HashMap<String, Bytes> {
        self.blobs.clone()
    }
}
