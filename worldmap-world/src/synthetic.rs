//! A generated stand-in world, so the pipeline can run without a game engine.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::builder::{AIR, ColumnBuilder, GeneratedChunk};
use crate::{
    BiomeTint, BlockCatalog, BlockType, BoxedChunk, CHUNK_WIDTH, ChunkKey, ChunkSource,
    FaceTextures,
};

pub const BEDROCK: i32 = 1;
pub const STONE: i32 = 2;
pub const DIRT: i32 = 3;
pub const GRASS: i32 = 4;
pub const SAND: i32 = 5;

const FLAT_SURFACE: usize = 64;
const SEA_LEVEL: usize = 62;
const GRASS_TINT: i32 = 0x91BD59;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terrain {
    Flat,
    Hills { seed: u64 },
}

/// Square world of `(2 * radius + 1)^2` chunks centred on the origin.
pub struct SyntheticWorld {
    world_id: String,
    terrain: Terrain,
    radius: i32,
}

impl SyntheticWorld {
    pub fn new(world_id: impl Into<String>, terrain: Terrain, radius: i32) -> Self {
        Self {
            world_id: world_id.into(),
            terrain,
            radius: radius.max(0),
        }
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        key.x.abs() <= self.radius && key.z.abs() <= self.radius
    }

    fn surface_at(&self, world_x: i64, world_z: i64) -> usize {
        match self.terrain {
            Terrain::Flat => FLAT_SURFACE,
            Terrain::Hills { seed } => {
                let phase = (seed % 1000) as f64 / 100.0;
                let wave = 8.0 * ((world_x as f64 / 24.0) + phase).sin()
                    + 6.0 * ((world_z as f64 / 31.0) - phase).cos();
                (FLAT_SURFACE as f64 + wave).round() as usize
            }
        }
    }

    pub fn generate(&self, key: ChunkKey) -> GeneratedChunk {
        let mut builder = ColumnBuilder::new();
        builder.default_tint(GRASS_TINT);
        builder.with_environment(true);
        builder.fill_layer(0, BEDROCK);

        for x in 0..CHUNK_WIDTH {
            for z in 0..CHUNK_WIDTH {
                let world_x = key.x as i64 * CHUNK_WIDTH as i64 + x as i64;
                let world_z = key.z as i64 * CHUNK_WIDTH as i64 + z as i64;
                let surface = self.surface_at(world_x, world_z);

                builder.fill_column(x, z, 1, surface - 3, STONE);
                if surface < SEA_LEVEL {
                    builder.fill_column(x, z, surface - 3, surface + 1, SAND);
                } else {
                    builder.fill_column(x, z, surface - 3, surface, DIRT);
                    builder.set_block(x, surface, z, GRASS);
                }
            }
        }

        builder.build()
    }
}

#[async_trait]
impl ChunkSource for SyntheticWorld {
    fn world_id(&self) -> &str {
        &self.world_id
    }

    async fn list_known_chunks(&self) -> Result<BTreeSet<ChunkKey>> {
        let r = self.radius;
        Ok((-r..=r)
            .flat_map(|x| (-r..=r).map(move |z| ChunkKey::new(x, z)))
            .collect())
    }

    async fn fetch_chunk(&self, key: ChunkKey) -> Result<Option<BoxedChunk>> {
        if !self.contains(key) {
            log::debug!("Chunk ({}) is outside {}", key, self.world_id);
            return Ok(None);
        }
        Ok(Some(Box::new(self.generate(key))))
    }
}

impl BlockCatalog for SyntheticWorld {
    fn block_type(&self, id: i32) -> Result<Option<BlockType>> {
        let solid = |name: &str, texture: &str| BlockType {
            name: name.to_string(),
            textures: vec![FaceTextures::uniform(texture)],
            biome_tint: BiomeTint::default(),
        };

        let block = match id {
            AIR => BlockType {
                name: "Empty".to_string(),
                textures: Vec::new(),
                biome_tint: BiomeTint::default(),
            },
            BEDROCK => solid("Rock_Bedrock", "BlockTextures/Rock_Bedrock.png"),
            STONE => solid("Rock_Stone", "BlockTextures/Rock_Stone.png"),
            DIRT => solid("Soil_Dirt", "BlockTextures/Soil_Dirt.png"),
            SAND => solid("Soil_Sand", "BlockTextures/Soil_Sand.png"),
            GRASS => BlockType {
                name: "Soil_Grass".to_string(),
                textures: vec![FaceTextures {
                    up: "BlockTextures/Soil_Grass_Top.png".to_string(),
                    down: "BlockTextures/Soil_Dirt.png".to_string(),
                    north: "BlockTextures/Soil_Grass_Side.png".to_string(),
                    south: "BlockTextures/Soil_Grass_Side.png".to_string(),
                    east: "BlockTextures/Soil_Grass_Side.png".to_string(),
                    west: "BlockTextures/Soil_Grass_Side.png".to_string(),
                }],
                biome_tint: BiomeTint { up: 1, ..Default::default() },
            },
            _ => return Ok(None),
        };
        Ok(Some(block))
    }
}
