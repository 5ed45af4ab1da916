//! World-side seams of the pipeline.
//!
//! The pipeline never talks to a game engine directly. It only sees:
//! - [`ChunkView`]: read access to one loaded chunk
//! - [`BlockCatalog`]: texture and tint metadata per block-type id
//! - [`ChunkSource`]: which chunks exist and how to load them

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub mod builder;
pub mod key;
pub mod synthetic;

pub use key::{ChunkKey, KeyParseError};

/// Horizontal size of a chunk in blocks (both X and Z).
pub const CHUNK_WIDTH: usize = 32;
/// Vertical size of a chunk in blocks.
pub const CHUNK_HEIGHT: usize = 320;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ChunkAccessError {
    #[error("block ({x}, {y}, {z}) is outside the chunk")]
    OutOfBounds { x: usize, y: usize, z: usize },
    #[error("chunk data unavailable: {0}")]
    Unavailable(String),
}

/// Read-only capability over a loaded chunk. Coordinates are chunk-local.
pub trait ChunkView: Send + Sync {
    fn height(&self, x: usize, z: usize) -> Result<i16, ChunkAccessError>;
    fn tint(&self, x: usize, z: usize) -> Result<i32, ChunkAccessError>;
    fn block(&self, x: usize, y: usize, z: usize) -> Result<i32, ChunkAccessError>;

    /// Whether the chunk carries environment/biome sub-data.
    fn has_environment(&self) -> bool {
        false
    }
}

/// Texture paths for the six faces of one texture variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceTextures {
    pub up: String,
    pub down: String,
    pub north: String,
    pub south: String,
    pub east: String,
    pub west: String,
}

impl FaceTextures {
    pub fn uniform(path: &str) -> Self {
        Self {
            up: path.to_string(),
            down: path.to_string(),
            north: path.to_string(),
            south: path.to_string(),
            east: path.to_string(),
            west: path.to_string(),
        }
    }
}

/// Per-face biome tint values of a block type. Zero means "not tinted".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiomeTint {
    pub up: i32,
    pub down: i32,
    pub north: i32,
    pub south: i32,
    pub east: i32,
    pub west: i32,
}

impl BiomeTint {
    pub fn any(&self) -> bool {
        [self.up, self.down, self.north, self.south, self.east, self.west]
            .iter()
            .any(|&v| v != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockType {
    pub name: String,
    /// Texture variants, most common first. May be empty.
    pub textures: Vec<FaceTextures>,
    pub biome_tint: BiomeTint,
}

/// Lookup of block-type metadata by numeric id.
pub trait BlockCatalog: Send + Sync {
    /// `Ok(None)` when the id is not a known block type.
    fn block_type(&self, id: i32) -> Result<Option<BlockType>>;
}

pub type BoxedChunk = Box<dyn ChunkView>;

/// Pending result of loading one chunk; `None` means the chunk could not be loaded.
pub type ChunkFetch = Pin<Box<dyn Future<Output = Result<Option<BoxedChunk>>> + Send>>;

#[async_trait]
pub trait ChunkSource: Send + Sync {
    fn world_id(&self) -> &str;

    /// Every chunk coordinate the world knows about. An error means the
    /// source is not ready yet; callers may retry.
    async fn list_known_chunks(&self) -> Result<BTreeSet<ChunkKey>>;

    /// Chunks currently resident in memory, used when the full listing is
    /// unavailable.
    async fn loaded_chunks(&self) -> Result<BTreeSet<ChunkKey>> {
        Ok(BTreeSet::new())
    }

    async fn fetch_chunk(&self, key: ChunkKey) -> Result<Option<BoxedChunk>>;
}
