//! Stand-ins for the world, catalog and network used across the test modules.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::time::Instant;
use worldmap_world::{
    BiomeTint, BlockCatalog, BlockType, BoxedChunk, CHUNK_WIDTH, ChunkAccessError, ChunkKey,
    ChunkSource, ChunkView, FaceTextures,
};

use crate::delivery::{Transport, TransportError};

type BlockFn = Box<dyn Fn(usize, usize, usize) -> i32 + Send + Sync>;
type ColumnFn<T> = Box<dyn Fn(usize, usize) -> T + Send + Sync>;

pub struct StubView {
    block: BlockFn,
    height: ColumnFn<i16>,
    tint: ColumnFn<i32>,
    environment: bool,
    fail_at: Option<(usize, usize)>,
    panics: bool,
    // Highest sampled y + 1, per column
    sampled: Mutex<Vec<usize>>,
}

impl StubView {
    pub fn new(block: impl Fn(usize, usize, usize) -> i32 + Send + Sync + 'static) -> Self {
        Self {
            block: Box::new(block),
            height: Box::new(|_, _| 0),
            tint: Box::new(|_, _| 0),
            environment: false,
            fail_at: None,
            panics: false,
            sampled: Mutex::new(vec![0; CHUNK_WIDTH * CHUNK_WIDTH]),
        }
    }

    pub fn with_height(mut self, height: impl Fn(usize, usize) -> i16 + Send + Sync + 'static) -> Self {
        self.height = Box::new(height);
        self
    }

    pub fn with_tint(mut self, tint: impl Fn(usize, usize) -> i32 + Send + Sync + 'static) -> Self {
        self.tint = Box::new(tint);
        self
    }

    pub fn with_environment(mut self, present: bool) -> Self {
        self.environment = present;
        self
    }

    pub fn failing_at(mut self, x: usize, z: usize) -> Self {
        self.fail_at = Some((x, z));
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn max_sampled(&self, x: usize, z: usize) -> usize {
        self.sampled.lock().unwrap()[x * CHUNK_WIDTH + z]
    }
}

impl ChunkView for StubView {
    fn height(&self, x: usize, z: usize) -> Result<i16, ChunkAccessError> {
        if self.fail_at == Some((x, z)) {
            return Err(ChunkAccessError::Unavailable("column not loaded".to_string()));
        }
        Ok((self.height)(x, z))
    }

    fn tint(&self, x: usize, z: usize) -> Result<i32, ChunkAccessError> {
        Ok((self.tint)(x, z))
    }

    fn block(&self, x: usize, y: usize, z: usize) -> Result<i32, ChunkAccessError> {
        if self.panics {
            panic!("block storage exploded");
        }
        let mut sampled = self.sampled.lock().unwrap();
        let column = &mut sampled[x * CHUNK_WIDTH + z];
        *column = (*column).max(y + 1);
        Ok((self.block)(x, y, z))
    }

    fn has_environment(&self) -> bool {
        self.environment
    }
}

#[derive(Default)]
pub struct StubCatalog {
    lookups: AtomicUsize,
}

impl StubCatalog {
    pub const TEXTURELESS: i32 = 90;
    pub const TINTED: i32 = 91;
    pub const MISSING: i32 = 92;
    pub const BROKEN: i32 = 93;

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl BlockCatalog for StubCatalog {
    fn block_type(&self, id: i32) -> Result<Option<BlockType>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let block = match id {
            Self::MISSING => return Ok(None),
            Self::BROKEN => return Err(anyhow!("asset map unavailable")),
            Self::TEXTURELESS => BlockType {
                name: "Textureless".to_string(),
                textures: Vec::new(),
                biome_tint: BiomeTint::default(),
            },
            Self::TINTED => BlockType {
                name: "Tinted".to_string(),
                textures: vec![FaceTextures::uniform("BlockTextures/Tinted.png")],
                biome_tint: BiomeTint { north: 0x22, ..Default::default() },
            },
            _ => BlockType {
                name: format!("Block_{id}"),
                textures: vec![FaceTextures::uniform(&format!("BlockTextures/Block_{id}.png"))],
                biome_tint: BiomeTint::default(),
            },
        };
        Ok(Some(block))
    }
}

type Responder = Box<dyn Fn(usize) -> Result<u16, TransportError> + Send + Sync>;

/// Scripted transport. The responder receives the 0-based call number.
pub struct MockTransport {
    respond: Responder,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    pub fn responding(respond: impl Fn(usize) -> Result<u16, TransportError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
        }
    }

    pub fn status(code: u16) -> Self {
        Self::responding(move |_| Ok(code))
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn sent_keys(&self) -> Vec<ChunkKey> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .map(|body| {
                let value: serde_json::Value = serde_json::from_slice(body).unwrap();
                ChunkKey::new(
                    value["chunkX"].as_i64().unwrap() as i32,
                    value["chunkZ"].as_i64().unwrap() as i32,
                )
            })
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(&self, body: &[u8]) -> Result<u16, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.bodies.lock().unwrap().push(body.to_vec());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.respond)(call)
    }
}

/// Chunk source over a fixed key set; every chunk is flat stone at height 0.
pub struct StubSource {
    keys: BTreeSet<ChunkKey>,
    missing: HashSet<ChunkKey>,
    broken: HashSet<ChunkKey>,
    loaded: BTreeSet<ChunkKey>,
    not_ready: AtomicUsize,
    list_calls: AtomicUsize,
}

impl StubSource {
    pub fn new(keys: impl IntoIterator<Item = ChunkKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            missing: HashSet::new(),
            broken: HashSet::new(),
            loaded: BTreeSet::new(),
            not_ready: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Listed but never loadable.
    pub fn with_missing(mut self, key: ChunkKey) -> Self {
        self.keys.insert(key);
        self.missing.insert(key);
        self
    }

    /// Listed but loading fails.
    pub fn with_broken(mut self, key: ChunkKey) -> Self {
        self.keys.insert(key);
        self.broken.insert(key);
        self
    }

    /// Resident chunks; fetchable even when the listing never answers.
    pub fn with_loaded(mut self, keys: impl IntoIterator<Item = ChunkKey>) -> Self {
        self.loaded = keys.into_iter().collect();
        self
    }

    /// Fail this many listing attempts before answering.
    pub fn not_ready_for(self, attempts: usize) -> Self {
        self.not_ready.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkSource for StubSource {
    fn world_id(&self) -> &str {
        "test-world"
    }

    async fn list_known_chunks(&self) -> Result<BTreeSet<ChunkKey>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.not_ready.load(Ordering::SeqCst);
        if pending > 0 {
            self.not_ready.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("chunk loader not initialised"));
        }
        Ok(self.keys.clone())
    }

    async fn loaded_chunks(&self) -> Result<BTreeSet<ChunkKey>> {
        Ok(self.loaded.clone())
    }

    async fn fetch_chunk(&self, key: ChunkKey) -> Result<Option<BoxedChunk>> {
        if self.broken.contains(&key) {
            return Err(anyhow!("region file unreadable"));
        }
        if self.missing.contains(&key) || !(self.keys.contains(&key) || self.loaded.contains(&key)) {
            return Ok(None);
        }
        Ok(Some(Box::new(StubView::new(|_, _, _| 2))))
    }
}
