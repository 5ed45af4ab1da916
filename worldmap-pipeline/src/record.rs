//! Chunk records: the JSON payload sent for every chunk, and the builder that
//! samples a [`ChunkView`] into one.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use thiserror::Error;
use worldmap_world::{
    BlockCatalog, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkAccessError, ChunkKey, ChunkView,
};

/// Placeholder used on every face of block types that have no textures.
pub const UNKNOWN_TEXTURE: &str = "BlockTextures/Unknown.png";

/// Blocks are sampled up to this many cells above the column height.
pub const SURFACE_MARGIN: i32 = 10;

pub type HeightMap = [[i16; CHUNK_WIDTH]; CHUNK_WIDTH];
pub type TintMap = [[i32; CHUNK_WIDTH]; CHUNK_WIDTH];

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read chunk ({key})")]
    Access {
        key: ChunkKey,
        #[source]
        source: ChunkAccessError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureInfo {
    pub up: String,
    pub down: String,
    pub north: String,
    pub south: String,
    pub east: String,
    pub west: String,
    pub should_tint: bool,
}

impl TextureInfo {
    pub fn unknown() -> Self {
        Self {
            up: UNKNOWN_TEXTURE.to_string(),
            down: UNKNOWN_TEXTURE.to_string(),
            north: UNKNOWN_TEXTURE.to_string(),
            south: UNKNOWN_TEXTURE.to_string(),
            east: UNKNOWN_TEXTURE.to_string(),
            west: UNKNOWN_TEXTURE.to_string(),
            should_tint: false,
        }
    }
}

/// Dense 32x320x32 block ids. Serializes as nested arrays indexed `[x][y][z]`.
#[derive(Clone, PartialEq, Eq)]
pub struct BlockGrid {
    cells: Vec<i32>,
}

impl BlockGrid {
    pub fn new() -> Self {
        Self {
            cells: vec![0; CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_WIDTH],
        }
    }

    #[inline]
    fn index(x: usize, y: usize, z: usize) -> usize {
        (x * CHUNK_HEIGHT + y) * CHUNK_WIDTH + z
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> i32 {
        self.cells[Self::index(x, y, z)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, id: i32) {
        self.cells[Self::index(x, y, z)] = id;
    }

    /// Z-row at `(x, y)`.
    fn row(&self, x: usize, y: usize) -> &[i32] {
        let start = Self::index(x, y, 0);
        &self.cells[start..start + CHUNK_WIDTH]
    }
}

impl Default for BlockGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = self.cells.iter().filter(|&&id| id != 0).count();
        write!(f, "BlockGrid({} non-zero of {})", filled, self.cells.len())
    }
}

impl Serialize for BlockGrid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Slice<'a> {
            grid: &'a BlockGrid,
            x: usize,
        }

        impl Serialize for Slice<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut seq = serializer.serialize_seq(Some(CHUNK_HEIGHT))?;
                for y in 0..CHUNK_HEIGHT {
                    seq.serialize_element(self.grid.row(self.x, y))?;
                }
                seq.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(CHUNK_WIDTH))?;
        for x in 0..CHUNK_WIDTH {
            seq.serialize_element(&Slice { grid: self, x })?;
        }
        seq.end()
    }
}

/// Everything sent to the ingestion API for one chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub world_id: String,
    pub chunk_x: i32,
    pub chunk_z: i32,
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,
    pub blocks: BlockGrid,
    pub height_map: HeightMap,
    pub tint_map: TintMap,
    pub block_textures: BTreeMap<i32, TextureInfo>,
    pub has_environment_data: bool,
}

impl ChunkRecord {
    /// Zeroed record, used when extraction fails.
    pub fn minimal(world_id: &str, key: ChunkKey) -> Self {
        Self {
            world_id: world_id.to_string(),
            chunk_x: key.x,
            chunk_z: key.z,
            timestamp_millis: now_millis(),
            blocks: BlockGrid::new(),
            height_map: [[0; CHUNK_WIDTH]; CHUNK_WIDTH],
            tint_map: [[0; CHUNK_WIDTH]; CHUNK_WIDTH],
            block_textures: BTreeMap::new(),
            has_environment_data: false,
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.chunk_x, self.chunk_z)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Exclusive upper Y bound sampled for a column of the given height.
pub fn sample_limit(height: i16) -> usize {
    (height as i32 + SURFACE_MARGIN).clamp(0, CHUNK_HEIGHT as i32) as usize
}

#[derive(Clone)]
pub struct RecordBuilder {
    catalog: Arc<dyn BlockCatalog>,
}

impl RecordBuilder {
    pub fn new(catalog: Arc<dyn BlockCatalog>) -> Self {
        Self { catalog }
    }

    pub fn build(
        &self,
        view: &dyn ChunkView,
        world_id: &str,
        key: ChunkKey,
    ) -> Result<ChunkRecord, ExtractionError> {
        let access = |source: ChunkAccessError| ExtractionError::Access { key, source };

        let mut record = ChunkRecord::minimal(world_id, key);
        // Ids the catalog could not describe; looked up once per chunk
        let mut unresolved = HashSet::new();

        for x in 0..CHUNK_WIDTH {
            for z in 0..CHUNK_WIDTH {
                let height = view.height(x, z).map_err(access)?;
                record.height_map[x][z] = height;
                record.tint_map[x][z] = view.tint(x, z).map_err(access)?;

                for y in 0..sample_limit(height) {
                    let id = view.block(x, y, z).map_err(access)?;
                    record.blocks.set(x, y, z, id);

                    if record.block_textures.contains_key(&id) || unresolved.contains(&id) {
                        continue;
                    }
                    match self.texture_for(id) {
                        Some(info) => {
                            record.block_textures.insert(id, info);
                        }
                        None => {
                            unresolved.insert(id);
                        }
                    }
                }
            }
        }

        record.has_environment_data = view.has_environment();
        Ok(record)
    }

    fn texture_for(&self, id: i32) -> Option<TextureInfo> {
        let block = match self.catalog.block_type(id) {
            Ok(Some(block)) => block,
            Ok(None) => return None,
            Err(e) => {
                log::debug!("Error extracting texture for block ID {}: {:#}", id, e);
                return None;
            }
        };

        // First variant is the common case
        let Some(faces) = block.textures.first() else {
            return Some(TextureInfo::unknown());
        };

        Some(TextureInfo {
            up: faces.up.clone(),
            down: faces.down.clone(),
            north: faces.north.clone(),
            south: faces.south.clone(),
            east: faces.east.clone(),
            west: faces.west.clone(),
            should_tint: block.biome_tint.any(),
        })
    }
}
