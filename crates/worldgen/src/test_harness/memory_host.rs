//! In-memory [`VoxelHost`] for tests and benchmarks.
//!
//! Terrain comes from a height function (flat by default) and every write
//! lands in a sparse override map, so a test can count and inspect exactly
//! what the engine changed.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};

use bevy::math::IVec3;

use crate::config::{WORLD_MAX_Y, WORLD_MIN_Y};
use crate::geometry::ChunkPos;
use crate::host::{BiomeClass, Block, ChunkTickets, HostError, Participant, TicketToken, VoxelHost};

type HeightFn = Box<dyn Fn(i32, i32) -> i32 + Send + Sync>;
type BiomeFn = Box<dyn Fn(i32, i32) -> BiomeClass + Send + Sync>;

pub struct MemoryVoxelHost {
    seed: u64,
    terrain: HeightFn,
    biome: BiomeFn,
    water_level: Option<i32>,
    overrides: HashMap<IVec3, Block>,
    column_top: HashMap<(i32, i32), i32>,
    /// When false only requested chunks count as loaded.
    all_loaded: bool,
    loaded: HashSet<ChunkPos>,
    /// Chunks that never load, whatever is requested.
    blocked: HashSet<ChunkPos>,
    tickets: HashMap<ChunkPos, BTreeSet<u64>>,
    participants: Vec<Participant>,
    /// Number of successful `set_block` calls.
    pub writes: u64,
    /// Number of `request_chunk` calls.
    pub chunk_requests: u64,
}

impl Default for MemoryVoxelHost {
    fn default() -> Self {
        Self::flat(64)
    }
}

impl MemoryVoxelHost {
    /// Grass at `height` over three dirt layers over stone.
    pub fn flat(height: i32) -> Self {
        Self {
            seed: 42,
            terrain: Box::new(move |_, _| height),
            biome: Box::new(|_, _| BiomeClass::Plains),
            water_level: None,
            overrides: HashMap::new(),
            column_top: HashMap::new(),
            all_loaded: true,
            loaded: HashSet::new(),
            blocked: HashSet::new(),
            tickets: HashMap::new(),
            participants: Vec::new(),
            writes: 0,
            chunk_requests: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_terrain(mut self, f: impl Fn(i32, i32) -> i32 + Send + Sync + 'static) -> Self {
        self.terrain = Box::new(f);
        self
    }

    pub fn with_biome(
        mut self,
        f: impl Fn(i32, i32) -> BiomeClass + Send + Sync + 'static,
    ) -> Self {
        self.biome = Box::new(f);
        self
    }

    /// Columns whose ground is below `level` are flooded up to it.
    pub fn with_water_level(mut self, level: i32) -> Self {
        self.water_level = Some(level);
        self
    }

    pub fn with_participant(mut self, id: u64, position: IVec3) -> Self {
        self.participants.push(Participant { id, position });
        self
    }

    /// Only chunks that were requested are loaded.
    pub fn load_on_request(mut self) -> Self {
        self.all_loaded = false;
        self
    }

    pub fn set_participants(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    /// Make a chunk absent until [`Self::unblock_chunk`].
    pub fn block_chunk(&mut self, chunk: ChunkPos) {
        self.blocked.insert(chunk);
    }

    pub fn unblock_chunk(&mut self, chunk: ChunkPos) {
        self.blocked.remove(&chunk);
    }

    /// Surface of the generated terrain, ignoring overrides.
    pub fn ground_height(&self, x: i32, z: i32) -> i32 {
        (self.terrain)(x, z)
    }

    fn generated(&self, pos: IVec3) -> Block {
        let h = self.ground_height(pos.x, pos.z);
        if pos.y > h {
            return match self.water_level {
                Some(level) if pos.y <= level => Block::Water,
                _ => Block::Air,
            };
        }
        if pos.y == h {
            Block::Grass
        } else if pos.y >= h - 3 {
            Block::Dirt
        } else {
            Block::Stone
        }
    }

    /// Block at `pos` without residency checks.
    pub fn peek(&self, pos: IVec3) -> Block {
        self.overrides
            .get(&pos)
            .copied()
            .unwrap_or_else(|| self.generated(pos))
    }

    /// Write without residency checks or counting. For test setup.
    pub fn put(&mut self, pos: IVec3, block: Block) {
        self.overrides.insert(pos, block);
        let top = self.column_top.entry((pos.x, pos.z)).or_insert(pos.y);
        *top = (*top).max(pos.y);
    }

    /// Fill an inclusive box. For test setup.
    pub fn fill(&mut self, min: IVec3, max: IVec3, block: Block) {
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    self.put(IVec3::new(x, y, z), block);
                }
            }
        }
    }

    /// A log trunk with a leaf cap on the surface at (x, z).
    pub fn plant_tree(&mut self, x: i32, z: i32, trunk: i32) {
        let base = self.ground_height(x, z) + 1;
        for y in base..base + trunk {
            self.put(IVec3::new(x, y, z), Block::Log);
        }
        let top = base + trunk;
        self.fill(
            IVec3::new(x - 1, top, z - 1),
            IVec3::new(x + 1, top + 1, z + 1),
            Block::Leaves,
        );
    }

    /// Cells the engine (or setup) changed.
    pub fn overrides(&self) -> &HashMap<IVec3, Block> {
        &self.overrides
    }

    pub fn tickets_on(&self, chunk: ChunkPos) -> usize {
        self.tickets.get(&chunk).map_or(0, BTreeSet::len)
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.values().map(BTreeSet::len).sum()
    }

    /// Topmost non-air, non-foliage Y without residency checks.
    pub fn peek_surface(&self, x: i32, z: i32) -> i32 {
        let ground = self.ground_height(x, z).max(self.water_level.unwrap_or(WORLD_MIN_Y));
        let start = self
            .column_top
            .get(&(x, z))
            .map_or(ground, |&t| t.max(ground))
            .min(WORLD_MAX_Y);
        (WORLD_MIN_Y..=start)
            .rev()
            .find(|&y| {
                let b = self.peek(IVec3::new(x, y, z));
                !b.is_air() && !b.is_foliage()
            })
            .unwrap_or(WORLD_MIN_Y)
    }

    fn check(&self, pos: IVec3) -> Result<(), HostError> {
        if pos.y < WORLD_MIN_Y || pos.y > WORLD_MAX_Y {
            return Err(HostError::OutOfWorld(pos));
        }
        let chunk = ChunkPos::of_block(pos);
        if !self.is_chunk_loaded(chunk) {
            return Err(HostError::ChunkNotLoaded(chunk));
        }
        Ok(())
    }
}

impl ChunkTickets for MemoryVoxelHost {
    fn acquire(&mut self, x: i32, z: i32, token: TicketToken) {
        self.tickets
            .entry(ChunkPos::new(x, z))
            .or_default()
            .insert(token.0);
    }

    fn release(&mut self, x: i32, z: i32, token: TicketToken) {
        let chunk = ChunkPos::new(x, z);
        if let Some(set) = self.tickets.get_mut(&chunk) {
            set.remove(&token.0);
            if set.is_empty() {
                self.tickets.remove(&chunk);
            }
        }
    }
}

impl VoxelHost for MemoryVoxelHost {
    fn block(&self, pos: IVec3) -> Result<Block, HostError> {
        self.check(pos)?;
        Ok(self.peek(pos))
    }

    fn set_block(&mut self, pos: IVec3, block: Block) -> Result<(), HostError> {
        self.check(pos)?;
        self.put(pos, block);
        self.writes += 1;
        Ok(())
    }

    fn surface_height(&self, x: i32, z: i32) -> Result<i32, HostError> {
        let chunk = ChunkPos::containing(x, z);
        if !self.is_chunk_loaded(chunk) {
            return Err(HostError::ChunkNotLoaded(chunk));
        }
        Ok(self.peek_surface(x, z))
    }

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool {
        !self.blocked.contains(&chunk) && (self.all_loaded || self.loaded.contains(&chunk))
    }

    fn request_chunk(&mut self, chunk: ChunkPos) {
        self.chunk_requests += 1;
        self.loaded.insert(chunk);
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    fn biome_class(&self, x: i32, z: i32) -> BiomeClass {
        (self.biome)(x, z)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
