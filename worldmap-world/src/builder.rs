use std::collections::HashMap;

use crate::{CHUNK_HEIGHT, CHUNK_WIDTH, ChunkAccessError, ChunkView};

pub const AIR: i32 = 0;

/// Assembles an in-memory chunk block by block.
#[derive(Default)]
pub struct ColumnBuilder {
    // Individual blocks win over layers.
    custom_blocks: HashMap<(u8, u16, u8), i32>,
    full_layers: HashMap<u16, i32>,
    tints: HashMap<(u8, u8), i32>,
    default_tint: i32,
    environment: bool,
}

impl ColumnBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single block at chunk-local coordinates (x, z: 0..32, y: 0..320).
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, id: i32) {
        if x < CHUNK_WIDTH && y < CHUNK_HEIGHT && z < CHUNK_WIDTH {
            self.custom_blocks.insert((x as u8, y as u16, z as u8), id);
        }
    }

    /// Fill `from..to` of one column.
    pub fn fill_column(&mut self, x: usize, z: usize, from: usize, to: usize, id: i32) {
        for y in from..to.min(CHUNK_HEIGHT) {
            self.set_block(x, y, z, id);
        }
    }

    /// Fill an entire Y-layer with a block.
    pub fn fill_layer(&mut self, y: usize, id: i32) {
        if y >= CHUNK_HEIGHT {
            return;
        }
        self.full_layers.insert(y as u16, id);
        // Individual blocks at this Y are overwritten by the layer
        self.custom_blocks.retain(|(_, by, _), _| *by as usize != y);
    }

    pub fn set_tint(&mut self, x: usize, z: usize, tint: i32) {
        if x < CHUNK_WIDTH && z < CHUNK_WIDTH {
            self.tints.insert((x as u8, z as u8), tint);
        }
    }

    pub fn default_tint(&mut self, tint: i32) {
        self.default_tint = tint;
    }

    pub fn with_environment(&mut self, present: bool) {
        self.environment = present;
    }

    pub fn build(self) -> GeneratedChunk {
        let mut blocks = vec![AIR; CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_WIDTH];

        for (&y, &id) in &self.full_layers {
            for x in 0..CHUNK_WIDTH {
                for z in 0..CHUNK_WIDTH {
                    blocks[GeneratedChunk::index(x, y as usize, z)] = id;
                }
            }
        }
        for (&(x, y, z), &id) in &self.custom_blocks {
            blocks[GeneratedChunk::index(x as usize, y as usize, z as usize)] = id;
        }

        let mut heights = [[0i16; CHUNK_WIDTH]; CHUNK_WIDTH];
        let mut tints = [[self.default_tint; CHUNK_WIDTH]; CHUNK_WIDTH];
        for x in 0..CHUNK_WIDTH {
            for z in 0..CHUNK_WIDTH {
                // Height is the Y of the topmost non-air block
                heights[x][z] = (0..CHUNK_HEIGHT)
                    .rev()
                    .find(|&y| blocks[GeneratedChunk::index(x, y, z)] != AIR)
                    .unwrap_or(0) as i16;
                if let Some(&tint) = self.tints.get(&(x as u8, z as u8)) {
                    tints[x][z] = tint;
                }
            }
        }

        GeneratedChunk {
            blocks,
            heights,
            tints,
            environment: self.environment,
        }
    }
}

/// A fully materialised chunk, laid out x-major then y then z.
pub struct GeneratedChunk {
    blocks: Vec<i32>,
    heights: [[i16; CHUNK_WIDTH]; CHUNK_WIDTH],
    tints: [[i32; CHUNK_WIDTH]; CHUNK_WIDTH],
    environment: bool,
}

impl GeneratedChunk {
    #[inline]
    fn index(x: usize, y: usize, z: usize) -> usize {
        (x * CHUNK_HEIGHT + y) * CHUNK_WIDTH + z
    }

    fn check_column(x: usize, z: usize) -> Result<(), ChunkAccessError> {
        if x < CHUNK_WIDTH && z < CHUNK_WIDTH {
            Ok(())
        } else {
            Err(ChunkAccessError::OutOfBounds { x, y: 0, z })
        }
    }
}

impl ChunkView for GeneratedChunk {
    fn height(&self, x: usize, z: usize) -> Result<i16, ChunkAccessError> {
        Self::check_column(x, z)?;
        Ok(self.heights[x][z])
    }

    fn tint(&self, x: usize, z: usize) -> Result<i32, ChunkAccessError> {
        Self::check_column(x, z)?;
        Ok(self.tints[x][z])
    }

    fn block(&self, x: usize, y: usize, z: usize) -> Result<i32, ChunkAccessError> {
        if x >= CHUNK_WIDTH || y >= CHUNK_HEIGHT || z >= CHUNK_WIDTH {
            return Err(ChunkAccessError::OutOfBounds { x, y, z });
        }
        Ok(self.blocks[Self::index(x, y, z)])
    }

    fn has_environment(&self) -> bool {
        self.environment
    }
}
