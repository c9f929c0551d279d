//! Metadata oracle seam
//!
//! The oracle turns a gallery identifier into a title and an ordered list of
//! page URLs. Site-specific scraping lives outside this crate; callers plug in
//! their resolver by implementing [`MetadataOracle`].

use crate::error::OracleError;
use crate::types::GalleryId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Resolved gallery metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GalleryMetadata {
    /// Gallery title (used for the directory name)
    pub title: String,
    /// Canonical gallery URL, if the site has one
    pub source_url: Option<String>,
    /// Page image URLs in page order
    pub page_urls: Vec<String>,
}

/// Read-only resolver from gallery identifier to metadata
#[async_trait]
pub trait MetadataOracle: Send + Sync {
    /// Resolve a gallery
    ///
    /// Returns [`OracleError::NotFound`] when the gallery does not exist and
    /// [`OracleError::SiteError`] when the site could not be queried.
    async fn resolve(&self, gallery_id: &GalleryId) -> Result<GalleryMetadata, OracleError>;

    /// Name of this oracle for logging
    fn name(&self) -> &'static str;
}

/// Oracle backed by a fixed table of pre-resolved galleries
///
/// Useful when metadata was fetched ahead of time (for example by a separate
/// scraping step) and only the download pipeline needs to run.
#[derive(Debug, Default)]
pub struct StaticOracle {
    galleries: Mutex<HashMap<GalleryId, GalleryMetadata>>,
}

impl StaticOracle {
    /// Create an empty oracle
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a gallery
    pub fn insert(&self, gallery_id: impl Into<GalleryId>, metadata: GalleryMetadata) {
        if let Ok(mut galleries) = self.galleries.lock() {
            galleries.insert(gallery_id.into(), metadata);
        }
    }
}

#[async_trait]
impl MetadataOracle for StaticOracle {
    async fn resolve(&self, gallery_id: &GalleryId) -> Result<GalleryMetadata, OracleError> {
        let galleries = self
            .galleries
            .lock()
            .map_err(|_| OracleError::SiteError("oracle table poisoned".to_string()))?;
        galleries
            .get(gallery_id)
            .cloned()
            .ok_or_else(|| OracleError::NotFound(gallery_id.to_string()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
