//! Artifact acquisition: byte sources, load progress, and cancellation.
//!
//! A model is assembled from three artifacts: the topology JSON, the binary
//! weights blob, and the weights metadata JSON. Each is read through a
//! [`DataSource`], which reports fractional progress and honors cooperative
//! cancellation between chunks.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::errors::DataLoadError;

const CHUNK_SIZE: usize = 64 * 1024;

/// The three artifacts a model is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Topology,
    Weights,
    Metadata,
}

impl ArtifactKind {
    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::Topology => "topology",
            ArtifactKind::Weights => "weights",
            ArtifactKind::Metadata => "metadata",
        }
    }
}

/// Cooperative cancellation flag shared between the caller and a load in
/// progress. Cancelling is sticky; a cancelled load fails with
/// [`DataLoadError::Cancelled`] at the next chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-artifact load fractions in `[0, 1]`, readable from other threads
/// while a load runs. Fractions are stored as f32 bit patterns.
#[derive(Debug, Default)]
pub struct LoadProgress {
    topology: AtomicU32,
    weights: AtomicU32,
    metadata: AtomicU32,
}

impl LoadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, kind: ArtifactKind, fraction: f32) {
        let bits = fraction.clamp(0.0, 1.0).to_bits();
        match kind {
            ArtifactKind::Topology => self.topology.store(bits, Ordering::Relaxed),
            ArtifactKind::Weights => self.weights.store(bits, Ordering::Relaxed),
            ArtifactKind::Metadata => self.metadata.store(bits, Ordering::Relaxed),
        }
    }

    pub fn fraction(&self, kind: ArtifactKind) -> f32 {
        let bits = match kind {
            ArtifactKind::Topology => self.topology.load(Ordering::Relaxed),
            ArtifactKind::Weights => self.weights.load(Ordering::Relaxed),
            ArtifactKind::Metadata => self.metadata.load(Ordering::Relaxed),
        };
        f32::from_bits(bits)
    }

    /// Mean of the three artifact fractions.
    pub fn overall(&self) -> f32 {
        (self.fraction(ArtifactKind::Topology)
            + self.fraction(ArtifactKind::Weights)
            + self.fraction(ArtifactKind::Metadata))
            / 3.0
    }
}

/// A readable artifact. Implementations push progress fractions through the
/// callback and check the token between chunks.
pub trait DataSource: Send {
    fn read_all(
        &mut self,
        progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, DataLoadError>;
}

/// An in-memory artifact, served in a single chunk.
pub struct BytesSource {
    bytes: Vec<u8>,
}

impl BytesSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl DataSource for BytesSource {
    fn read_all(
        &mut self,
        progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, DataLoadError> {
        if cancel.is_cancelled() {
            return Err(DataLoadError::Cancelled);
        }
        progress(1.0);
        Ok(std::mem::take(&mut self.bytes))
    }
}

/// A file-backed artifact, read in 64 KiB chunks with fractional progress.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, error: std::io::Error) -> DataLoadError {
        DataLoadError::Io {
            artifact: self.path.display().to_string(),
            message: error.to_string(),
        }
    }
}

impl DataSource for FileSource {
    fn read_all(
        &mut self,
        progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, DataLoadError> {
        let mut file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let total = file.metadata().map_err(|e| self.io_error(e))?.len() as usize;

        let mut bytes = Vec::with_capacity(total);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(DataLoadError::Cancelled);
            }
            let read = file.read(&mut chunk).map_err(|e| self.io_error(e))?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
            if total > 0 {
                progress(bytes.len() as f32 / total as f32);
            }
        }
        progress(1.0);
        Ok(bytes)
    }
}

/// The artifact trio a model loads from.
pub struct ModelArtifacts {
    pub topology: Box<dyn DataSource>,
    pub weights: Box<dyn DataSource>,
    pub metadata: Box<dyn DataSource>,
}

impl ModelArtifacts {
    pub fn from_bytes(topology: Vec<u8>, weights: Vec<u8>, metadata: Vec<u8>) -> Self {
        Self {
            topology: Box::new(BytesSource::new(topology)),
            weights: Box::new(BytesSource::new(weights)),
            metadata: Box::new(BytesSource::new(metadata)),
        }
    }

    pub fn from_files(
        topology: impl AsRef<Path>,
        weights: impl AsRef<Path>,
        metadata: impl AsRef<Path>,
    ) -> Self {
        Self {
            topology: Box::new(FileSource::new(topology.as_ref())),
            weights: Box::new(FileSource::new(weights.as_ref())),
            metadata: Box::new(FileSource::new(metadata.as_ref())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_source_reports_completion() {
        let mut source = BytesSource::new(vec![1, 2, 3]);
        let mut last = 0.0;
        let bytes = source
            .read_all(&mut |f| last = f, &CancelToken::new())
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_cancelled_token_stops_read() {
        let token = CancelToken::new();
        token.cancel();
        let mut source = BytesSource::new(vec![1, 2, 3]);
        assert!(matches!(
            source.read_all(&mut |_| {}, &token),
            Err(DataLoadError::Cancelled)
        ));
    }

    #[test]
    fn test_progress_overall_averages_artifacts() {
        let progress = LoadProgress::new();
        progress.set(ArtifactKind::Topology, 1.0);
        progress.set(ArtifactKind::Weights, 0.5);
        assert_eq!(progress.fraction(ArtifactKind::Topology), 1.0);
        assert!((progress.overall() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_progress_clamps_out_of_range() {
        let progress = LoadProgress::new();
        progress.set(ArtifactKind::Metadata, 1.5);
        assert_eq!(progress.fraction(ArtifactKind::Metadata), 1.0);
    }

    #[test]
    fn test_file_source_missing_file() {
        let mut source = FileSource::new("/nonexistent/model.json");
        assert!(matches!(
            source.read_all(&mut |_| {}, &CancelToken::new()),
            Err(DataLoadError::Io { .. })
        ));
    }
}
