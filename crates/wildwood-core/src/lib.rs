//! World simulation core for the wildwood survival sandbox.
//!
//! Owns deterministic chunk generation, the entity lifecycle and its staged
//! per-tick update pipeline, the animal flee state machine, and chunk
//! streaming around the player. Rendering, input, inventory, and save/load
//! live outside this crate and talk to it through [`World`]'s public
//! surface and the [`WorldHooks`] seam.

use noise::{NoiseFn, Perlin};
use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

pub use wildwood_index::{ChunkCoord, ChunkGridIndex, IndexError};

new_key_type! {
    /// Stable handle for entities backed by a generational slot map.
    pub struct EntityId;
}

/// Convenience alias for associating side data with entities.
pub type EntityMap<T> = SecondaryMap<EntityId, T>;

// Spatial-hash primes folding chunk coordinates into a layout seed.
const CHUNK_HASH_PRIME_X: i64 = 73_856_093;
const CHUNK_HASH_PRIME_Z: i64 = 19_349_663;
// Odd 64-bit stride separating per-slot seeds within one chunk.
const SLOT_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

const TREE_SLOT_BASE: u64 = 0;
const ROCK_SLOT_BASE: u64 = 128;
const ANIMAL_COUNT_SLOT: u64 = 255;
const ANIMAL_SLOT_BASE: u64 = 256;

const IDLE_TIMER_WRAP: f32 = 1_000.0;
const GAUGE_FULL: f32 = 100.0;

/// Monotonic simulation tick counter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// World-space position or direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    #[must_use]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit-length copy, or `None` for zero and non-finite vectors.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if !len.is_finite() || len <= f32::EPSILON {
            return None;
        }
        Some(Self::new(self.x / len, self.y / len, self.z / len))
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance ignoring elevation.
    #[must_use]
    pub fn planar_distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// Closed discriminant for entity variants.
///
/// Behavior dispatch switches on this directly; there is no per-variant
/// type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Tree { maturity: TreeMaturity },
    Rock,
    Animal { species: Species },
    ItemPickup { item: ItemKind, quantity: u32 },
    /// Player-built placement registered by the building collaborator.
    Structure,
}

impl EntityKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tree { .. } => "tree",
            Self::Rock => "rock",
            Self::Animal { .. } => "animal",
            Self::ItemPickup { .. } => "item_pickup",
            Self::Structure => "structure",
        }
    }
}

/// Growth stage assigned to generated trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeMaturity {
    Seedling,
    Young,
    Mature,
    Old,
    Ancient,
}

impl TreeMaturity {
    /// Buckets one uniform draw against the cumulative stage weights
    /// (15% / 20% / 35% / 20% / 10%).
    #[must_use]
    pub fn from_draw(draw: f32) -> Self {
        if draw < 0.15 {
            Self::Seedling
        } else if draw < 0.35 {
            Self::Young
        } else if draw < 0.70 {
            Self::Mature
        } else if draw < 0.90 {
            Self::Old
        } else {
            Self::Ancient
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Seedling => "seedling",
            Self::Young => "young",
            Self::Mature => "mature",
            Self::Old => "old",
            Self::Ancient => "ancient",
        }
    }

    /// Visual scale band for the stage; generation draws inside it.
    #[must_use]
    pub const fn scale_range(self) -> (f32, f32) {
        match self {
            Self::Seedling => (0.25, 0.45),
            Self::Young => (0.55, 0.8),
            Self::Mature => (0.9, 1.2),
            Self::Old => (1.25, 1.55),
            Self::Ancient => (1.6, 2.1),
        }
    }

    #[must_use]
    pub const fn max_health(self) -> f32 {
        match self {
            Self::Seedling => 15.0,
            Self::Young => 30.0,
            Self::Mature => 60.0,
            Self::Old => 85.0,
            Self::Ancient => 120.0,
        }
    }

    /// Wood dropped when the tree is felled.
    #[must_use]
    pub const fn wood_yield(self) -> u32 {
        match self {
            Self::Seedling => 1,
            Self::Young => 2,
            Self::Mature => 4,
            Self::Old => 6,
            Self::Ancient => 9,
        }
    }

    /// Felling drop table for the stage.
    #[must_use]
    pub fn harvest_loot(self) -> Vec<LootEntry> {
        vec![LootEntry::new("wood", self.wood_yield(), 1.0)]
    }
}

/// Animal species shipped with the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Rabbit,
    Deer,
    Boar,
}

impl Species {
    pub const ALL: [Species; 3] = [Species::Rabbit, Species::Deer, Species::Boar];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rabbit => "rabbit",
            Self::Deer => "deer",
            Self::Boar => "boar",
        }
    }

    /// Buckets one uniform draw against the cumulative spawn weights
    /// (45% rabbit / 35% deer / 20% boar).
    #[must_use]
    pub fn from_draw(draw: f32) -> Self {
        if draw < 0.45 {
            Self::Rabbit
        } else if draw < 0.80 {
            Self::Deer
        } else {
            Self::Boar
        }
    }

    /// Baseline stat block and drop table for the species.
    #[must_use]
    pub fn descriptor(self) -> SpeciesDescriptor {
        match self {
            Self::Rabbit => SpeciesDescriptor {
                species: self,
                max_health: 10.0,
                flee_distance: 6.0,
                safe_distance: 15.0,
                flee_speed: 5.0,
                half_extents: Vec3::new(0.25, 0.3, 0.25),
                loot: vec![
                    LootEntry::new("raw_meat", 1, 0.6),
                    LootEntry::new("hide", 1, 0.3),
                ],
            },
            Self::Deer => SpeciesDescriptor {
                species: self,
                max_health: 30.0,
                flee_distance: 10.0,
                safe_distance: 20.0,
                flee_speed: 6.5,
                half_extents: Vec3::new(0.6, 0.9, 0.6),
                loot: vec![
                    LootEntry::new("raw_meat", 2, 0.9),
                    LootEntry::new("hide", 1, 0.6),
                    LootEntry::new("bone", 1, 0.4),
                ],
            },
            Self::Boar => SpeciesDescriptor {
                species: self,
                max_health: 45.0,
                flee_distance: 5.0,
                safe_distance: 12.0,
                flee_speed: 4.5,
                half_extents: Vec3::new(0.55, 0.6, 0.55),
                loot: vec![
                    LootEntry::new("raw_meat", 2, 1.0),
                    LootEntry::new("hide", 1, 0.5),
                    LootEntry::new("bone", 1, 0.35),
                ],
            },
        }
    }
}

/// Stat block parameterizing the shared animal behavior.
///
/// One animal implementation serves every species; the descriptor carries
/// the per-species variation (stats and drop table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDescriptor {
    pub species: Species,
    pub max_health: f32,
    /// Player distance below which the animal starts fleeing.
    pub flee_distance: f32,
    /// Player distance above which a fleeing animal calms down. Must
    /// strictly exceed `flee_distance` or the state machine oscillates at
    /// the boundary.
    pub safe_distance: f32,
    /// Flee movement speed in world units per second.
    pub flee_speed: f32,
    pub half_extents: Vec3,
    pub loot: Vec<LootEntry>,
}

impl SpeciesDescriptor {
    /// Rejects stat blocks that cannot behave sanely at runtime, in
    /// particular flee/safe thresholds without hysteresis.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !self.max_health.is_finite() || self.max_health <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "species max_health must be positive",
            ));
        }
        if !self.flee_distance.is_finite() || self.flee_distance <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "species flee_distance must be positive",
            ));
        }
        if !self.safe_distance.is_finite() || self.safe_distance <= self.flee_distance {
            return Err(WorldError::InvalidConfig(
                "species safe_distance must exceed flee_distance",
            ));
        }
        if !self.flee_speed.is_finite() || self.flee_speed <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "species flee_speed must be positive",
            ));
        }
        for entry in &self.loot {
            entry.validate()?;
        }
        Ok(())
    }
}

/// Closed catalog of item types a pickup can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Wood,
    Stone,
    Flint,
    RawMeat,
    Hide,
    Bone,
    Berries,
}

impl ItemKind {
    pub const ALL: [ItemKind; 7] = [
        ItemKind::Wood,
        ItemKind::Stone,
        ItemKind::Flint,
        ItemKind::RawMeat,
        ItemKind::Hide,
        ItemKind::Bone,
        ItemKind::Berries,
    ];

    /// Stable catalog name used by data-driven loot tables.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Wood => "wood",
            Self::Stone => "stone",
            Self::Flint => "flint",
            Self::RawMeat => "raw_meat",
            Self::Hide => "hide",
            Self::Bone => "bone",
            Self::Berries => "berries",
        }
    }

    /// Catalog lookup; loot tables may reference names the build does not
    /// know, in which case this returns `None` and the entry is skipped.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|item| item.name() == name)
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Wood => "Wood",
            Self::Stone => "Stone",
            Self::Flint => "Flint",
            Self::RawMeat => "Raw Meat",
            Self::Hide => "Hide",
            Self::Bone => "Bone",
            Self::Berries => "Berries",
        }
    }

    #[must_use]
    pub const fn max_stack(self) -> u32 {
        match self {
            Self::Wood | Self::Stone => 100,
            Self::Flint | Self::Bone => 50,
            Self::RawMeat | Self::Berries => 20,
            Self::Hide => 40,
        }
    }
}

/// One independently-rolled drop table row.
///
/// The item is referenced by catalog name rather than by [`ItemKind`] so
/// tables loaded from data can carry names this build does not recognize;
/// those entries are logged and skipped at roll time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootEntry {
    pub item: String,
    pub quantity: u32,
    pub chance: f32,
}

impl LootEntry {
    #[must_use]
    pub fn new(item: impl Into<String>, quantity: u32, chance: f32) -> Self {
        Self {
            item: item.into(),
            quantity,
            chance,
        }
    }

    fn validate(&self) -> Result<(), WorldError> {
        if self.quantity == 0 {
            return Err(WorldError::InvalidConfig("loot quantity must be at least 1"));
        }
        if !self.chance.is_finite() || !(0.0..=1.0).contains(&self.chance) {
            return Err(WorldError::InvalidConfig(
                "loot chance must lie within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Errors surfaced by world construction and entity registration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorldError {
    #[error("invalid world configuration: {0}")]
    InvalidConfig(&'static str),
    /// Registering an entity at a NaN or infinite position would corrupt
    /// the spatial buckets, so it fails fast instead.
    #[error("entity position is not finite: ({x}, {y}, {z})")]
    NonFinitePosition { x: f32, y: f32, z: f32 },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Tunable parameters for the world simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Seed for deterministic world layout: terrain shape and chunk
    /// content derive from this and nothing else.
    pub world_seed: u64,
    /// Seed for the runtime RNG covering cosmetic, non-persisted draws
    /// (loot rolls, pickup scatter). `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Side length of a square chunk in world units.
    pub chunk_size: f32,
    /// Resident radius around the player, in chunks. Eviction uses one
    /// extra chunk of hysteresis.
    pub view_distance: i32,
    /// Radius around the world origin kept clear of generated spawns.
    pub spawn_safety_radius: f32,
    /// Candidate tree slots per chunk.
    pub tree_slots: u32,
    /// Candidate rock slots per chunk.
    pub rock_slots: u32,
    pub min_animals_per_chunk: u32,
    pub max_animals_per_chunk: u32,
    /// Maximum movement advanced between terrain-height samples.
    pub move_sub_step: f32,
    /// Planar scatter distance bounds for dropped pickups.
    pub pickup_offset_min: f32,
    pub pickup_offset_max: f32,
    pub hunger_drain_per_sec: f32,
    pub thirst_drain_per_sec: f32,
    /// Health lost per second per fully depleted survival gauge.
    pub starvation_damage_per_sec: f32,
    pub player_max_health: f32,
    /// Number of tick summaries retained in the in-memory history ring.
    pub history_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_seed: 1337,
            rng_seed: None,
            chunk_size: 16.0,
            view_distance: 2,
            spawn_safety_radius: 10.0,
            tree_slots: 20,
            rock_slots: 12,
            min_animals_per_chunk: 2,
            max_animals_per_chunk: 5,
            move_sub_step: 0.5,
            pickup_offset_min: 0.3,
            pickup_offset_max: 0.9,
            hunger_drain_per_sec: 0.25,
            thirst_drain_per_sec: 0.4,
            starvation_damage_per_sec: 1.5,
            player_max_health: 100.0,
            history_capacity: 256,
        }
    }
}

impl WorldConfig {
    /// Validates the configuration, reporting the first violation.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !self.chunk_size.is_finite() || self.chunk_size <= 0.0 {
            return Err(WorldError::InvalidConfig("chunk_size must be positive"));
        }
        if self.view_distance < 1 {
            return Err(WorldError::InvalidConfig("view_distance must be at least 1"));
        }
        if !self.spawn_safety_radius.is_finite() || self.spawn_safety_radius < 0.0 {
            return Err(WorldError::InvalidConfig(
                "spawn_safety_radius must be non-negative",
            ));
        }
        // Slot seed ranges are spaced by the per-kind bases; counts past
        // them would alias another kind's seed stream.
        if self.tree_slots > 128 {
            return Err(WorldError::InvalidConfig("tree_slots must be at most 128"));
        }
        if self.rock_slots > 126 {
            return Err(WorldError::InvalidConfig("rock_slots must be at most 126"));
        }
        if self.max_animals_per_chunk < self.min_animals_per_chunk {
            return Err(WorldError::InvalidConfig(
                "max_animals_per_chunk must be at least min_animals_per_chunk",
            ));
        }
        if !self.move_sub_step.is_finite() || self.move_sub_step <= 0.0 {
            return Err(WorldError::InvalidConfig("move_sub_step must be positive"));
        }
        if !self.pickup_offset_min.is_finite() || self.pickup_offset_min < 0.0 {
            return Err(WorldError::InvalidConfig(
                "pickup_offset_min must be non-negative",
            ));
        }
        if !self.pickup_offset_max.is_finite() || self.pickup_offset_max < self.pickup_offset_min {
            return Err(WorldError::InvalidConfig(
                "pickup_offset_max must be at least pickup_offset_min",
            ));
        }
        if !self.hunger_drain_per_sec.is_finite() || self.hunger_drain_per_sec < 0.0 {
            return Err(WorldError::InvalidConfig(
                "hunger_drain_per_sec must be non-negative",
            ));
        }
        if !self.thirst_drain_per_sec.is_finite() || self.thirst_drain_per_sec < 0.0 {
            return Err(WorldError::InvalidConfig(
                "thirst_drain_per_sec must be non-negative",
            ));
        }
        if !self.starvation_damage_per_sec.is_finite() || self.starvation_damage_per_sec < 0.0 {
            return Err(WorldError::InvalidConfig(
                "starvation_damage_per_sec must be non-negative",
            ));
        }
        if !self.player_max_health.is_finite() || self.player_max_health <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "player_max_health must be positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be at least 1",
            ));
        }
        Ok(())
    }

    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Player survival gauges, drained by the tick pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerVitals {
    pub health: f32,
    pub hunger: f32,
    pub thirst: f32,
}

impl PlayerVitals {
    #[must_use]
    pub const fn full(max_health: f32) -> Self {
        Self {
            health: max_health,
            hunger: GAUGE_FULL,
            thirst: GAUGE_FULL,
        }
    }

    /// True once any gauge has bottomed out and health is draining.
    #[must_use]
    pub fn is_deprived(&self) -> bool {
        self.hunger <= 0.0 || self.thirst <= 0.0
    }
}

/// Pure terrain height field.
///
/// Every consumer samples through the same formula: height depends only on
/// the planar position and the world seed, never on which chunks happen to
/// be resident. Chunk generation, animal foot placement, and the player
/// collision collaborator all read this one function.
#[derive(Debug, Clone)]
pub struct TerrainSampler {
    rolling: Perlin,
    hills: Perlin,
    detail: Perlin,
}

impl TerrainSampler {
    #[must_use]
    pub fn new(world_seed: u64) -> Self {
        let folded = (world_seed ^ (world_seed >> 32)) as u32;
        Self {
            rolling: Perlin::new(folded.wrapping_add(11)),
            hills: Perlin::new(folded.wrapping_add(23)),
            detail: Perlin::new(folded.wrapping_add(47)),
        }
    }

    /// Terrain surface height at a planar world position.
    #[must_use]
    pub fn height(&self, x: f32, z: f32) -> f32 {
        let xf = f64::from(x);
        let zf = f64::from(z);
        let rolling = self.rolling.get([xf * 0.003, zf * 0.003]) * 12.0;
        let hills = self.hills.get([xf * 0.02, zf * 0.02]) * 3.5;
        let detail = self.detail.get([xf * 0.09, zf * 0.09]) * 0.6;
        (rolling + hills + detail) as f32
    }
}

/// Deterministic layout seed for a chunk: spatial-hash fold of the
/// coordinates mixed with the world seed.
///
/// Recomputed on every generation call and never stored, so regeneration
/// after streaming or reload cannot drift from the first visit.
#[must_use]
pub fn chunk_seed(coord: ChunkCoord, world_seed: u64) -> u64 {
    let hash = i64::from(coord.x).wrapping_mul(CHUNK_HASH_PRIME_X)
        ^ i64::from(coord.z).wrapping_mul(CHUNK_HASH_PRIME_Z);
    (hash as u64) ^ world_seed
}

fn slot_rng(seed: u64, slot: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed.wrapping_add(slot.wrapping_mul(SLOT_SEED_STRIDE)))
}

fn inside_spawn_safety(x: f32, z: f32, radius: f32) -> bool {
    x.hypot(z) < radius
}

/// Variant produced by one generator spawn slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpawnKind {
    Tree { maturity: TreeMaturity },
    Rock,
    Animal { species: Species },
}

/// One placement emitted by the chunk generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub kind: SpawnKind,
    pub position: Vec3,
    pub scale: f32,
    pub yaw: f32,
}

/// Coarse elevation bounds for a chunk, sampled on a fixed grid. Mesh
/// construction belongs to the renderer; these bounds serve culling and
/// placement checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainPatch {
    pub min_height: f32,
    pub max_height: f32,
}

/// Deterministically generated content of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkContent {
    pub coord: ChunkCoord,
    pub terrain: TerrainPatch,
    pub spawns: Vec<SpawnSpec>,
}

/// Generates the full content of one chunk.
///
/// Pure in (coordinate, config, terrain): the same inputs always yield
/// bit-identical output. Every candidate slot draws from its own seeded
/// PRNG derived from the chunk seed plus a slot stride, so neighboring
/// chunks and neighboring slots stay statistically independent and no
/// mutable state crosses chunk boundaries. Slots landing inside the
/// origin spawn-safety radius are discarded, not relocated, which keeps
/// the player start area clear at the cost of slightly sparser content
/// nearby.
#[must_use]
pub fn generate_chunk(
    coord: ChunkCoord,
    config: &WorldConfig,
    terrain: &TerrainSampler,
) -> ChunkContent {
    let seed = chunk_seed(coord, config.world_seed);
    let origin_x = coord.x as f32 * config.chunk_size;
    let origin_z = coord.z as f32 * config.chunk_size;
    let capacity = config.tree_slots + config.rock_slots + config.max_animals_per_chunk;
    let mut spawns = Vec::with_capacity(capacity as usize);

    for slot in 0..u64::from(config.tree_slots) {
        let mut rng = slot_rng(seed, TREE_SLOT_BASE + slot);
        let x = origin_x + rng.random_range(0.0..config.chunk_size);
        let z = origin_z + rng.random_range(0.0..config.chunk_size);
        if inside_spawn_safety(x, z, config.spawn_safety_radius) {
            continue;
        }
        let maturity = TreeMaturity::from_draw(rng.random());
        let (scale_lo, scale_hi) = maturity.scale_range();
        spawns.push(SpawnSpec {
            kind: SpawnKind::Tree { maturity },
            position: Vec3::new(x, terrain.height(x, z), z),
            scale: rng.random_range(scale_lo..scale_hi),
            yaw: rng.random_range(0.0..std::f32::consts::TAU),
        });
    }

    for slot in 0..u64::from(config.rock_slots) {
        let mut rng = slot_rng(seed, ROCK_SLOT_BASE + slot);
        let x = origin_x + rng.random_range(0.0..config.chunk_size);
        let z = origin_z + rng.random_range(0.0..config.chunk_size);
        if inside_spawn_safety(x, z, config.spawn_safety_radius) {
            continue;
        }
        spawns.push(SpawnSpec {
            kind: SpawnKind::Rock,
            position: Vec3::new(x, terrain.height(x, z), z),
            scale: rng.random_range(0.6..1.4),
            yaw: rng.random_range(0.0..std::f32::consts::TAU),
        });
    }

    let animal_count = {
        let mut rng = slot_rng(seed, ANIMAL_COUNT_SLOT);
        u64::from(rng.random_range(config.min_animals_per_chunk..=config.max_animals_per_chunk))
    };
    for slot in 0..animal_count {
        let mut rng = slot_rng(seed, ANIMAL_SLOT_BASE + slot);
        let x = origin_x + rng.random_range(0.0..config.chunk_size);
        let z = origin_z + rng.random_range(0.0..config.chunk_size);
        if inside_spawn_safety(x, z, config.spawn_safety_radius) {
            continue;
        }
        spawns.push(SpawnSpec {
            kind: SpawnKind::Animal {
                species: Species::from_draw(rng.random()),
            },
            position: Vec3::new(x, terrain.height(x, z), z),
            scale: rng.random_range(0.9..1.1),
            yaw: rng.random_range(0.0..std::f32::consts::TAU),
        });
    }

    ChunkContent {
        coord,
        terrain: sample_terrain_patch(coord, config.chunk_size, terrain),
        spawns,
    }
}

fn sample_terrain_patch(
    coord: ChunkCoord,
    chunk_size: f32,
    terrain: &TerrainSampler,
) -> TerrainPatch {
    const GRID: u32 = 5;
    let origin_x = coord.x as f32 * chunk_size;
    let origin_z = coord.z as f32 * chunk_size;
    let step = chunk_size / (GRID - 1) as f32;
    let mut min_height = f32::INFINITY;
    let mut max_height = f32::NEG_INFINITY;
    for iz in 0..GRID {
        for ix in 0..GRID {
            let height = terrain.height(origin_x + ix as f32 * step, origin_z + iz as f32 * step);
            min_height = min_height.min(height);
            max_height = max_height.max(height);
        }
    }
    TerrainPatch {
        min_height,
        max_height,
    }
}

/// Scalar record describing an entity at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub kind: EntityKind,
    pub position: Vec3,
    pub scale: f32,
    pub yaw: f32,
    pub max_health: f32,
    pub interactable: bool,
    /// World-space half extents of the interaction AABB, already scaled.
    pub half_extents: Vec3,
}

impl EntityData {
    #[must_use]
    pub fn tree(position: Vec3, maturity: TreeMaturity, scale: f32, yaw: f32) -> Self {
        Self {
            kind: EntityKind::Tree { maturity },
            position,
            scale,
            yaw,
            max_health: maturity.max_health(),
            interactable: true,
            half_extents: Vec3::new(0.4 * scale, 2.2 * scale, 0.4 * scale),
        }
    }

    #[must_use]
    pub fn rock(position: Vec3, scale: f32, yaw: f32) -> Self {
        Self {
            kind: EntityKind::Rock,
            position,
            scale,
            yaw,
            max_health: 50.0,
            interactable: true,
            half_extents: Vec3::new(0.7 * scale, 0.5 * scale, 0.7 * scale),
        }
    }

    /// Animals are hunted through the damage entry point rather than the
    /// interaction prompt, so they are not flagged interactable.
    #[must_use]
    pub fn animal(position: Vec3, descriptor: &SpeciesDescriptor, scale: f32, yaw: f32) -> Self {
        Self {
            kind: EntityKind::Animal {
                species: descriptor.species,
            },
            position,
            scale,
            yaw,
            max_health: descriptor.max_health,
            interactable: false,
            half_extents: Vec3::new(
                descriptor.half_extents.x * scale,
                descriptor.half_extents.y * scale,
                descriptor.half_extents.z * scale,
            ),
        }
    }

    #[must_use]
    pub fn pickup(position: Vec3, item: ItemKind, quantity: u32) -> Self {
        Self {
            kind: EntityKind::ItemPickup { item, quantity },
            position,
            scale: 1.0,
            yaw: 0.0,
            max_health: 1.0,
            interactable: true,
            half_extents: Vec3::new(0.2, 0.2, 0.2),
        }
    }

    #[must_use]
    pub fn structure(position: Vec3, half_extents: Vec3) -> Self {
        Self {
            kind: EntityKind::Structure,
            position,
            scale: 1.0,
            yaw: 0.0,
            max_health: 200.0,
            interactable: true,
            half_extents,
        }
    }

    #[must_use]
    pub fn from_spawn(spawn: &SpawnSpec) -> Self {
        match spawn.kind {
            SpawnKind::Tree { maturity } => {
                Self::tree(spawn.position, maturity, spawn.scale, spawn.yaw)
            }
            SpawnKind::Rock => Self::rock(spawn.position, spawn.scale, spawn.yaw),
            SpawnKind::Animal { species } => {
                Self::animal(spawn.position, &species.descriptor(), spawn.scale, spawn.yaw)
            }
        }
    }
}

/// Point-in-time copy of one entity's public state.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    pub scale: f32,
    pub yaw: f32,
    pub health: f32,
    pub max_health: f32,
    pub interactable: bool,
    pub dead: bool,
    /// Cached spatial bucket, kept in sync by the tick pipeline.
    pub chunk: ChunkCoord,
    pub half_extents: Vec3,
}

/// Column-oriented storage for the hot entity fields.
#[derive(Debug, Clone, Default)]
pub struct EntityColumns {
    kinds: Vec<EntityKind>,
    positions: Vec<Vec3>,
    scales: Vec<f32>,
    yaws: Vec<f32>,
    healths: Vec<f32>,
    max_healths: Vec<f32>,
    interactables: Vec<bool>,
    dead: Vec<bool>,
    chunks: Vec<ChunkCoord>,
    half_extents: Vec<Vec3>,
}

impl EntityColumns {
    fn push(&mut self, data: &EntityData, chunk: ChunkCoord) {
        self.kinds.push(data.kind);
        self.positions.push(data.position);
        self.scales.push(data.scale);
        self.yaws.push(data.yaw);
        self.healths.push(data.max_health);
        self.max_healths.push(data.max_health);
        self.interactables.push(data.interactable);
        self.dead.push(false);
        self.chunks.push(chunk);
        self.half_extents.push(data.half_extents);
    }

    fn swap_remove(&mut self, row: usize) {
        self.kinds.swap_remove(row);
        self.positions.swap_remove(row);
        self.scales.swap_remove(row);
        self.yaws.swap_remove(row);
        self.healths.swap_remove(row);
        self.max_healths.swap_remove(row);
        self.interactables.swap_remove(row);
        self.dead.swap_remove(row);
        self.chunks.swap_remove(row);
        self.half_extents.swap_remove(row);
    }

    #[must_use]
    pub fn kinds(&self) -> &[EntityKind] {
        &self.kinds
    }

    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    #[must_use]
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    #[must_use]
    pub fn yaws(&self) -> &[f32] {
        &self.yaws
    }

    #[must_use]
    pub fn healths(&self) -> &[f32] {
        &self.healths
    }

    #[must_use]
    pub fn max_healths(&self) -> &[f32] {
        &self.max_healths
    }

    #[must_use]
    pub fn interactables(&self) -> &[bool] {
        &self.interactables
    }

    #[must_use]
    pub fn dead(&self) -> &[bool] {
        &self.dead
    }

    #[must_use]
    pub fn chunks(&self) -> &[ChunkCoord] {
        &self.chunks
    }

    #[must_use]
    pub fn half_extents(&self) -> &[Vec3] {
        &self.half_extents
    }
}

/// Dense arena of live entities.
///
/// Slot map handles stay stable while the column storage swap-removes on
/// deletion; the row that moved gets its handle re-pointed.
#[derive(Debug, Clone, Default)]
pub struct EntityArena {
    slots: SlotMap<EntityId, usize>,
    handles: Vec<EntityId>,
    columns: EntityColumns,
}

impl EntityArena {
    fn insert(&mut self, data: &EntityData, chunk: ChunkCoord) -> EntityId {
        let row = self.handles.len();
        let id = self.slots.insert(row);
        self.handles.push(id);
        self.columns.push(data, chunk);
        id
    }

    fn remove(&mut self, id: EntityId) -> bool {
        let Some(row) = self.slots.remove(id) else {
            return false;
        };
        self.handles.swap_remove(row);
        self.columns.swap_remove(row);
        if row < self.handles.len() {
            let moved = self.handles[row];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = row;
            }
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(id)
    }

    #[must_use]
    pub fn row_of(&self, id: EntityId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Live handles in stable enumeration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.handles.iter().copied()
    }

    #[must_use]
    pub fn columns(&self) -> &EntityColumns {
        &self.columns
    }

    #[must_use]
    pub fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        let row = self.row_of(id)?;
        let columns = &self.columns;
        Some(EntitySnapshot {
            id,
            kind: columns.kinds[row],
            position: columns.positions[row],
            scale: columns.scales[row],
            yaw: columns.yaws[row],
            health: columns.healths[row],
            max_health: columns.max_healths[row],
            interactable: columns.interactables[row],
            dead: columns.dead[row],
            chunk: columns.chunks[row],
            half_extents: columns.half_extents[row],
        })
    }
}

/// Behavioral state of the flee state machine. `dead` is an orthogonal
/// flag owned by the lifecycle pipeline, not a state here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BehaviorState {
    #[default]
    Idle,
    Fleeing,
}

/// Mutable per-animal state riding in a secondary map beside the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalRuntime {
    pub descriptor: SpeciesDescriptor,
    pub state: BehaviorState,
    /// Planar unit flee direction; meaningful while fleeing.
    pub flee_dir: (f32, f32),
    /// Accumulates while idle and wraps. Reserved for wander behavior,
    /// externally inert today.
    pub idle_timer: f32,
}

impl AnimalRuntime {
    #[must_use]
    pub fn new(descriptor: SpeciesDescriptor) -> Self {
        Self {
            descriptor,
            state: BehaviorState::Idle,
            flee_dir: (0.0, 0.0),
            idle_timer: 0.0,
        }
    }
}

struct BehaviorOutcome {
    id: EntityId,
    state: BehaviorState,
    flee_dir: (f32, f32),
    idle_timer: f32,
    position: Vec3,
}

/// One tick of the flee state machine for a single animal.
///
/// Pure: reads snapshot inputs and returns the new state without touching
/// shared storage, which lets the behavior stage fan out over animals.
/// Proximity uses planar distance; elevation follows the terrain field.
fn run_flee_machine(
    id: EntityId,
    position: Vec3,
    runtime: &AnimalRuntime,
    player: Vec3,
    terrain: &TerrainSampler,
    sub_step: f32,
    dt: f32,
) -> BehaviorOutcome {
    let stats = &runtime.descriptor;
    let dx = position.x - player.x;
    let dz = position.z - player.z;
    let dist = (dx * dx + dz * dz).sqrt();

    let mut out = BehaviorOutcome {
        id,
        state: runtime.state,
        flee_dir: runtime.flee_dir,
        idle_timer: runtime.idle_timer,
        position,
    };

    match runtime.state {
        BehaviorState::Idle => {
            if dist < stats.flee_distance {
                out.state = BehaviorState::Fleeing;
                out.flee_dir = flee_direction(dx, dz, dist);
                out.position = advance_with_terrain(
                    position,
                    out.flee_dir,
                    stats.flee_speed * dt,
                    sub_step,
                    terrain,
                );
            } else {
                out.idle_timer = (runtime.idle_timer + dt) % IDLE_TIMER_WRAP;
            }
        }
        BehaviorState::Fleeing => {
            if dist > stats.safe_distance {
                out.state = BehaviorState::Idle;
                out.idle_timer = 0.0;
            } else {
                // The player may be moving, so the away vector is
                // re-derived every tick rather than cached at entry.
                out.flee_dir = flee_direction(dx, dz, dist);
                out.position = advance_with_terrain(
                    position,
                    out.flee_dir,
                    stats.flee_speed * dt,
                    sub_step,
                    terrain,
                );
            }
        }
    }
    out
}

fn flee_direction(dx: f32, dz: f32, dist: f32) -> (f32, f32) {
    if dist > f32::EPSILON {
        (dx / dist, dz / dist)
    } else {
        // Coincident with the player; any away direction serves.
        (1.0, 0.0)
    }
}

/// Advances planar movement in bounded sub-steps, resampling terrain
/// height at each one so foot placement tracks slopes instead of cutting
/// through them on a long single step.
fn advance_with_terrain(
    mut position: Vec3,
    dir: (f32, f32),
    total: f32,
    sub_step: f32,
    terrain: &TerrainSampler,
) -> Vec3 {
    if !total.is_finite() || total <= 0.0 {
        return position;
    }
    let mut remaining = total;
    while remaining > 0.0 {
        let step = remaining.min(sub_step);
        position.x += dir.0 * step;
        position.z += dir.1 * step;
        position.y = terrain.height(position.x, position.z);
        remaining -= step;
    }
    position
}

/// Interaction pick ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Need not be unit length; the raycast normalizes.
    pub direction: Vec3,
}

impl Ray {
    #[must_use]
    pub const fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }
}

/// Nearest interactable hit returned by the pick raycast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub id: EntityId,
    pub distance: f32,
}

/// Slab test against an axis-aligned box. Returns the entry distance,
/// zero when the origin starts inside the box.
fn ray_aabb_entry(origin: Vec3, dir: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let origin_axes = [origin.x, origin.y, origin.z];
    let dir_axes = [dir.x, dir.y, dir.z];
    let min_axes = [min.x, min.y, min.z];
    let max_axes = [max.x, max.y, max.z];

    let mut t_near = 0.0_f32;
    let mut t_far = f32::INFINITY;
    for axis in 0..3 {
        let o = origin_axes[axis];
        let d = dir_axes[axis];
        if d.abs() < f32::EPSILON {
            if o < min_axes[axis] || o > max_axes[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let mut t_enter = (min_axes[axis] - o) * inv;
        let mut t_exit = (max_axes[axis] - o) * inv;
        if t_enter > t_exit {
            std::mem::swap(&mut t_enter, &mut t_exit);
        }
        t_near = t_near.max(t_enter);
        t_far = t_far.min(t_exit);
        if t_near > t_far {
            return None;
        }
    }
    Some(t_near)
}

/// Collaborator seam for renderer attach/detach and chunk lifecycle
/// notifications. Default methods are no-ops so implementations override
/// only what they consume.
#[allow(unused_variables)]
pub trait WorldHooks: Send {
    /// Fired exactly once when an entity is registered.
    fn entity_attached(&mut self, id: EntityId, entity: &EntitySnapshot) {}
    /// Fired exactly once when an entity is removed; renderer resources
    /// for it should be released here.
    fn entity_removed(&mut self, id: EntityId, kind: EntityKind) {}
    fn chunk_loaded(&mut self, coord: ChunkCoord, spawned: usize) {}
    /// The chunk's generated content is gone. `entity_removed` has
    /// already fired for each of its spawns.
    fn chunk_unloaded(&mut self, coord: ChunkCoord) {}
    fn tick_committed(&mut self, summary: &TickSummary) {}
}

/// Hook sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHooks;

impl WorldHooks for NullHooks {}

/// Aggregate counters emitted after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub entity_count: usize,
    pub animal_count: usize,
    pub fleeing: usize,
    pub spawned: usize,
    pub despawned: usize,
    pub resident_chunks: usize,
    pub player_chunk: ChunkCoord,
    pub vitals: PlayerVitals,
}

/// Deltas reported to the caller from one [`World::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEvents {
    pub tick: Tick,
    pub spawned: usize,
    pub despawned: usize,
    /// Pickups dropped by deaths processed this tick; included in
    /// `spawned`.
    pub pickups_dropped: usize,
}

/// Bookkeeping for one resident chunk.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub terrain: TerrainPatch,
    /// Entities this chunk spawned or adopted; deregistered on eviction.
    pub spawned: Vec<EntityId>,
}

struct PendingSpawn {
    data: EntityData,
    runtime: Option<AnimalRuntime>,
}

/// Simulation world: entity arena, animal runtimes, spatial index, chunk
/// residency, and the player context driving all of it.
///
/// Construction validates the configuration and every shipped species
/// descriptor, then streams the initial resident set around the origin.
pub struct World {
    config: WorldConfig,
    tick: Tick,
    /// Cosmetic RNG stream (loot rolls, pickup scatter). Layout draws use
    /// per-slot seeded generators instead and never touch this one.
    rng: SmallRng,
    terrain: TerrainSampler,
    arena: EntityArena,
    animals: EntityMap<AnimalRuntime>,
    index: ChunkGridIndex<EntityId>,
    chunks: HashMap<ChunkCoord, ChunkRecord>,
    player_position: Vec3,
    player_chunk: ChunkCoord,
    vitals: PlayerVitals,
    pending_deaths: Vec<EntityId>,
    pending_spawns: Vec<PendingSpawn>,
    hooks: Box<dyn WorldHooks>,
    history: VecDeque<TickSummary>,
}

impl World {
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        Self::with_hooks(config, Box::new(NullHooks))
    }

    pub fn with_hooks(
        config: WorldConfig,
        hooks: Box<dyn WorldHooks>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        for species in Species::ALL {
            species.descriptor().validate()?;
        }
        let rng = config.seeded_rng();
        let terrain = TerrainSampler::new(config.world_seed);
        let index = ChunkGridIndex::new(config.chunk_size)?;
        let player_position = Vec3::new(0.0, terrain.height(0.0, 0.0), 0.0);
        let player_chunk = ChunkCoord::from_world(0.0, 0.0, config.chunk_size);
        let mut world = Self {
            tick: Tick::zero(),
            rng,
            terrain,
            arena: EntityArena::default(),
            animals: EntityMap::default(),
            index,
            chunks: HashMap::new(),
            player_position,
            player_chunk,
            vitals: PlayerVitals::full(config.player_max_health),
            pending_deaths: Vec::new(),
            pending_spawns: Vec::new(),
            hooks,
            history: VecDeque::with_capacity(config.history_capacity),
            config,
        };
        world.refresh_resident_set();
        Ok(world)
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// Stages run in a fixed order: animal behavior, spatial rebucketing,
    /// death cleanup with loot rolls, queued spawn commits, player vitals,
    /// telemetry. Deaths reported between ticks are therefore resolved at
    /// the start-of-tick state, and loot pickups are live by the time the
    /// tick commits.
    pub fn step(&mut self, dt: f32) -> TickEvents {
        // A non-finite dt would poison every position it touches.
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.tick = self.tick.next();

        self.stage_behavior(dt);
        self.stage_rebucket();
        let (despawned, pickups_dropped) = self.stage_death_cleanup();
        let spawned = self.stage_spawn_commit();
        self.stage_vitals(dt);
        self.stage_telemetry(spawned, despawned);

        TickEvents {
            tick: self.tick,
            spawned,
            despawned,
            pickups_dropped,
        }
    }

    /// Runs the flee machine for every live animal.
    ///
    /// Outcomes are computed in parallel against an immutable view of the
    /// start-of-tick state, then applied serially in handle order so the
    /// result is independent of worker scheduling.
    fn stage_behavior(&mut self, dt: f32) {
        let handles: Vec<EntityId> = self.arena.iter_handles().collect();
        let player = self.player_position;
        let sub_step = self.config.move_sub_step;
        let outcomes: Vec<BehaviorOutcome> = {
            let arena = &self.arena;
            let animals = &self.animals;
            let terrain = &self.terrain;
            handles
                .par_iter()
                .filter_map(|&id| {
                    let runtime = animals.get(id)?;
                    let row = arena.row_of(id)?;
                    if arena.columns().dead()[row] {
                        return None;
                    }
                    Some(run_flee_machine(
                        id,
                        arena.columns().positions()[row],
                        runtime,
                        player,
                        terrain,
                        sub_step,
                        dt,
                    ))
                })
                .collect()
        };
        for outcome in outcomes {
            if let Some(runtime) = self.animals.get_mut(outcome.id) {
                runtime.state = outcome.state;
                runtime.flee_dir = outcome.flee_dir;
                runtime.idle_timer = outcome.idle_timer;
            }
            if let Some(row) = self.arena.row_of(outcome.id) {
                self.arena.columns.positions[row] = outcome.position;
            }
        }
    }

    /// Recomputes every entity's spatial bucket from its current position.
    ///
    /// Unconditional on purpose: there is no moved-this-tick flag to
    /// forget, so the index cannot drift from the arena. An entity whose
    /// position has gone non-finite keeps its last good bucket and is
    /// reported.
    fn stage_rebucket(&mut self) {
        let handles: Vec<EntityId> = self.arena.iter_handles().collect();
        for id in handles {
            let Some(row) = self.arena.row_of(id) else {
                continue;
            };
            let position = self.arena.columns.positions[row];
            let current = self.arena.columns.chunks[row];
            match self.index.resolve(position.x, position.z) {
                Ok(next) => {
                    if next != current && self.index.relocate(id, current, next) {
                        self.arena.columns.chunks[row] = next;
                    }
                }
                Err(err) => {
                    warn!(entity = ?id, error = %err, "entity position left finite space; bucket frozen");
                }
            }
        }
    }

    /// Resolves queued deaths: rolls loot, then removes the corpse.
    ///
    /// Duplicate reports of the same death collapse to one resolution.
    /// Returns `(despawned, pickups queued)`.
    fn stage_death_cleanup(&mut self) -> (usize, usize) {
        if self.pending_deaths.is_empty() {
            return (0, 0);
        }
        let mut seen = HashSet::new();
        let deaths: Vec<EntityId> = self
            .pending_deaths
            .drain(..)
            .filter(|id| seen.insert(*id))
            .collect();
        let mut despawned = 0usize;
        let mut pickups = 0usize;
        for id in deaths {
            let Some(snapshot) = self.arena.snapshot(id) else {
                continue;
            };
            pickups += self.queue_loot_drops(&snapshot);
            if self.remove_entity(id) {
                despawned += 1;
            }
        }
        (despawned, pickups)
    }

    /// Rolls the drop table of a dying entity and queues pickup spawns
    /// scattered around the corpse.
    ///
    /// Uses the cosmetic RNG stream: rewards stay independent of the world
    /// layout and of each other across runs.
    fn queue_loot_drops(&mut self, snapshot: &EntitySnapshot) -> usize {
        let table = match snapshot.kind {
            // The runtime record is still alive here; its descriptor may
            // carry a custom table that overrides the species default.
            EntityKind::Animal { species } => self.animals.get(snapshot.id).map_or_else(
                || species.descriptor().loot,
                |runtime| runtime.descriptor.loot.clone(),
            ),
            EntityKind::Tree { maturity } => maturity.harvest_loot(),
            EntityKind::Rock => vec![
                LootEntry::new("stone", 2, 1.0),
                LootEntry::new("flint", 1, 0.3),
            ],
            EntityKind::ItemPickup { .. } | EntityKind::Structure => Vec::new(),
        };
        let mut dropped = 0usize;
        for entry in &table {
            if self.rng.random::<f32>() >= entry.chance {
                continue;
            }
            let Some(item) = ItemKind::from_name(&entry.item) else {
                warn!(item = %entry.item, "unknown loot item; entry skipped");
                continue;
            };
            let angle = self.rng.random_range(0.0..std::f32::consts::TAU);
            let radius = self
                .rng
                .random_range(self.config.pickup_offset_min..=self.config.pickup_offset_max);
            let x = snapshot.position.x + angle.cos() * radius;
            let z = snapshot.position.z + angle.sin() * radius;
            // The scatter ignores whatever geometry occupies the spot, so
            // a drop can land inside a trunk or boulder. Unresolved.
            let position = Vec3::new(x, self.terrain.height(x, z), z);
            self.pending_spawns.push(PendingSpawn {
                data: EntityData::pickup(position, item, entry.quantity),
                runtime: None,
            });
            dropped += 1;
        }
        dropped
    }

    fn stage_spawn_commit(&mut self) -> usize {
        if self.pending_spawns.is_empty() {
            return 0;
        }
        let pending: Vec<PendingSpawn> = self.pending_spawns.drain(..).collect();
        let mut spawned = 0usize;
        for spawn in pending {
            match self.insert_entity(spawn.data, spawn.runtime) {
                Ok(id) => {
                    self.adopt_into_resident_chunk(id);
                    spawned += 1;
                }
                Err(err) => {
                    warn!(error = %err, "dropping queued spawn");
                }
            }
        }
        spawned
    }

    fn stage_vitals(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.vitals.hunger =
            (self.vitals.hunger - self.config.hunger_drain_per_sec * dt).max(0.0);
        self.vitals.thirst =
            (self.vitals.thirst - self.config.thirst_drain_per_sec * dt).max(0.0);
        let depleted =
            usize::from(self.vitals.hunger <= 0.0) + usize::from(self.vitals.thirst <= 0.0);
        if depleted > 0 {
            let damage = self.config.starvation_damage_per_sec * depleted as f32 * dt;
            self.vitals.health = (self.vitals.health - damage).max(0.0);
        }
    }

    fn stage_telemetry(&mut self, spawned: usize, despawned: usize) {
        let fleeing = self
            .animals
            .values()
            .filter(|runtime| runtime.state == BehaviorState::Fleeing)
            .count();
        let summary = TickSummary {
            tick: self.tick,
            entity_count: self.arena.len(),
            animal_count: self.animals.len(),
            fleeing,
            spawned,
            despawned,
            resident_chunks: self.chunks.len(),
            player_chunk: self.player_chunk,
            vitals: self.vitals,
        };
        self.hooks.tick_committed(&summary);
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Registers an externally built entity.
    ///
    /// Rejects non-finite coordinates instead of letting one NaN rot the
    /// spatial buckets. Entities placed in a resident chunk are adopted by
    /// it and will be deregistered with it; entities placed outside the
    /// resident set stay world-owned.
    pub fn add_entity(&mut self, data: EntityData) -> Result<EntityId, WorldError> {
        let id = self.insert_entity(data, None)?;
        self.adopt_into_resident_chunk(id);
        Ok(id)
    }

    /// Spawns an animal with an explicit stat block, validating it first.
    pub fn add_animal(
        &mut self,
        position: Vec3,
        descriptor: SpeciesDescriptor,
    ) -> Result<EntityId, WorldError> {
        descriptor.validate()?;
        let data = EntityData::animal(position, &descriptor, 1.0, 0.0);
        let id = self.insert_entity(data, Some(AnimalRuntime::new(descriptor)))?;
        self.adopt_into_resident_chunk(id);
        Ok(id)
    }

    fn insert_entity(
        &mut self,
        data: EntityData,
        runtime: Option<AnimalRuntime>,
    ) -> Result<EntityId, WorldError> {
        let position = data.position;
        if !position.is_finite() {
            return Err(WorldError::NonFinitePosition {
                x: position.x,
                y: position.y,
                z: position.z,
            });
        }
        let chunk = self.index.resolve(position.x, position.z)?;
        let id = self.arena.insert(&data, chunk);
        self.index.insert(id, position.x, position.z)?;
        if let EntityKind::Animal { species } = data.kind {
            let runtime = runtime.unwrap_or_else(|| AnimalRuntime::new(species.descriptor()));
            self.animals.insert(id, runtime);
        }
        if let Some(snapshot) = self.arena.snapshot(id) {
            self.hooks.entity_attached(id, &snapshot);
        }
        Ok(id)
    }

    fn adopt_into_resident_chunk(&mut self, id: EntityId) {
        let Some(row) = self.arena.row_of(id) else {
            return;
        };
        let coord = self.arena.columns.chunks[row];
        if let Some(record) = self.chunks.get_mut(&coord) {
            record.spawned.push(id);
        }
    }

    /// Removes an entity and detaches its collaborators.
    ///
    /// Idempotent: a second call with the same handle is a no-op returning
    /// `false`, so chunk eviction and death cleanup can both try.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        let Some(row) = self.arena.row_of(id) else {
            return false;
        };
        let kind = self.arena.columns.kinds[row];
        let chunk = self.arena.columns.chunks[row];
        self.index.remove(id, chunk);
        self.arena.remove(id);
        self.animals.remove(id);
        self.hooks.entity_removed(id, kind);
        true
    }

    /// Applies damage, queueing the death for the next cleanup stage once
    /// health reaches zero. Unknown handles and repeat hits on a corpse
    /// are ignored.
    pub fn apply_damage(&mut self, id: EntityId, amount: f32) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        let Some(row) = self.arena.row_of(id) else {
            return;
        };
        if self.arena.columns.dead[row] {
            return;
        }
        let health = (self.arena.columns.healths[row] - amount).max(0.0);
        self.arena.columns.healths[row] = health;
        if health <= 0.0 {
            self.arena.columns.dead[row] = true;
            self.pending_deaths.push(id);
            debug!(entity = ?id, kind = self.arena.columns.kinds[row].label(), "entity died");
        }
    }

    /// Moves the player context, streaming chunks when the player crosses
    /// a chunk boundary. Elevation follows the terrain field.
    pub fn update_player_position(&mut self, x: f32, z: f32) -> Result<(), WorldError> {
        let chunk = self.index.resolve(x, z)?;
        self.player_position = Vec3::new(x, self.terrain.height(x, z), z);
        if chunk != self.player_chunk {
            self.player_chunk = chunk;
            self.refresh_resident_set();
        }
        Ok(())
    }

    /// Loads every chunk within `view_distance` of the player chunk and
    /// evicts residents farther than `view_distance + 1`. The extra ring
    /// of hysteresis keeps boundary strafing from thrashing load/unload
    /// pairs.
    fn refresh_resident_set(&mut self) {
        let view = self.config.view_distance;
        for coord in self.player_chunk.chunks_in_radius(view) {
            if !self.chunks.contains_key(&coord) {
                self.load_chunk(coord);
            }
        }
        let mut stale: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .filter(|coord| coord.chebyshev(self.player_chunk) > view + 1)
            .copied()
            .collect();
        // Map iteration order is arbitrary; evicting in sorted order keeps
        // the handle stream identical across same-seed runs.
        stale.sort_unstable();
        for coord in stale {
            self.unload_chunk(coord);
        }
    }

    fn load_chunk(&mut self, coord: ChunkCoord) {
        let content = generate_chunk(coord, &self.config, &self.terrain);
        let mut spawned = Vec::with_capacity(content.spawns.len());
        for spawn in &content.spawns {
            match self.insert_entity(EntityData::from_spawn(spawn), None) {
                Ok(id) => spawned.push(id),
                Err(err) => warn!(chunk = %coord, error = %err, "skipping generated spawn"),
            }
        }
        debug!(chunk = %coord, spawns = spawned.len(), "chunk resident");
        self.hooks.chunk_loaded(coord, spawned.len());
        self.chunks.insert(
            coord,
            ChunkRecord {
                terrain: content.terrain,
                spawned,
            },
        );
    }

    fn unload_chunk(&mut self, coord: ChunkCoord) {
        let Some(record) = self.chunks.remove(&coord) else {
            return;
        };
        for id in record.spawned {
            // Already-removed entities (deaths, picked-up drops) no-op.
            self.remove_entity(id);
        }
        debug!(chunk = %coord, "chunk evicted");
        self.hooks.chunk_unloaded(coord);
    }

    /// Live entities within `radius` of a world position.
    pub fn entities_in_radius(
        &self,
        center: Vec3,
        radius: f32,
    ) -> Result<Vec<EntitySnapshot>, WorldError> {
        self.collect_in_radius(center, radius, false)
    }

    /// Live interactable entities within `radius` of a world position.
    pub fn interactables_in_radius(
        &self,
        center: Vec3,
        radius: f32,
    ) -> Result<Vec<EntitySnapshot>, WorldError> {
        self.collect_in_radius(center, radius, true)
    }

    fn collect_in_radius(
        &self,
        center: Vec3,
        radius: f32,
        interactable_only: bool,
    ) -> Result<Vec<EntitySnapshot>, WorldError> {
        let origin = self.index.resolve(center.x, center.z)?;
        let chunk_radius = self.index.chunk_radius_for(radius);
        let mut hits = Vec::new();
        self.index.visit_range(origin, chunk_radius, &mut |id| {
            let Some(row) = self.arena.row_of(id) else {
                return;
            };
            let columns = self.arena.columns();
            if columns.dead()[row] {
                return;
            }
            if interactable_only && !columns.interactables()[row] {
                return;
            }
            if columns.positions()[row].distance(center) <= radius {
                if let Some(snapshot) = self.arena.snapshot(id) {
                    hits.push(snapshot);
                }
            }
        });
        Ok(hits)
    }

    /// Casts the pick ray against interactable bounding boxes and returns
    /// the nearest hit within `max_distance`.
    ///
    /// Boxes sit on the entity's ground anchor and extend twice the half
    /// extent upward. The scan walks handles in enumeration order keeping
    /// only strictly nearer hits, so exact distance ties resolve to the
    /// earliest-registered entity. A degenerate ray direction yields no
    /// hit.
    #[must_use]
    pub fn raycast_interactable(&self, ray: Ray, max_distance: f32) -> Option<RaycastHit> {
        let direction = ray.direction.normalized()?;
        if !max_distance.is_finite() || max_distance <= 0.0 {
            return None;
        }
        let columns = self.arena.columns();
        let mut best: Option<RaycastHit> = None;
        for (row, id) in self.arena.iter_handles().enumerate() {
            if columns.dead()[row] || !columns.interactables()[row] {
                continue;
            }
            let position = columns.positions()[row];
            let he = columns.half_extents()[row];
            let min = Vec3::new(position.x - he.x, position.y, position.z - he.z);
            let max = Vec3::new(position.x + he.x, position.y + 2.0 * he.y, position.z + he.z);
            let Some(distance) = ray_aabb_entry(ray.origin, direction, min, max) else {
                continue;
            };
            if distance > max_distance {
                continue;
            }
            let nearer = match best {
                Some(hit) => OrderedFloat(distance) < OrderedFloat(hit.distance),
                None => true,
            };
            if nearer {
                best = Some(RaycastHit { id, distance });
            }
        }
        best
    }

    /// Refills the hunger gauge, clamped to the gauge cap.
    pub fn consume_food(&mut self, amount: f32) {
        if amount.is_finite() && amount > 0.0 {
            self.vitals.hunger = (self.vitals.hunger + amount).min(GAUGE_FULL);
        }
    }

    /// Refills the thirst gauge, clamped to the gauge cap.
    pub fn consume_water(&mut self, amount: f32) {
        if amount.is_finite() && amount > 0.0 {
            self.vitals.thirst = (self.vitals.thirst + amount).min(GAUGE_FULL);
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.arena.snapshot(id)
    }

    /// Snapshots of every live entity in enumeration order.
    #[must_use]
    pub fn all_entities(&self) -> Vec<EntitySnapshot> {
        self.arena
            .iter_handles()
            .filter_map(|id| self.arena.snapshot(id))
            .collect()
    }

    #[must_use]
    pub fn animal_state(&self, id: EntityId) -> Option<BehaviorState> {
        self.animals.get(id).map(|runtime| runtime.state)
    }

    #[must_use]
    pub fn animal_runtime(&self, id: EntityId) -> Option<&AnimalRuntime> {
        self.animals.get(id)
    }

    /// Entity handles bucketed under a chunk coordinate.
    #[must_use]
    pub fn entities_in_chunk(&self, coord: ChunkCoord) -> &[EntityId] {
        self.index.bucket(coord)
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<TickSummary> {
        &self.history
    }

    #[must_use]
    pub fn chunk_record(&self, coord: ChunkCoord) -> Option<&ChunkRecord> {
        self.chunks.get(&coord)
    }

    #[must_use]
    pub fn is_chunk_resident(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    /// Resident chunk coordinates in sorted order.
    #[must_use]
    pub fn resident_chunks(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.chunks.keys().copied().collect();
        coords.sort_unstable();
        coords
    }

    #[must_use]
    pub fn player_position(&self) -> Vec3 {
        self.player_position
    }

    #[must_use]
    pub fn player_chunk(&self) -> ChunkCoord {
        self.player_chunk
    }

    #[must_use]
    pub fn vitals(&self) -> PlayerVitals {
        self.vitals
    }

    #[must_use]
    pub fn terrain_height(&self, x: f32, z: f32) -> f32 {
        self.terrain.height(x, z)
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("entities", &self.arena.len())
            .field("animals", &self.animals.len())
            .field("resident_chunks", &self.chunks.len())
            .field("player_chunk", &self.player_chunk)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> WorldConfig {
        WorldConfig {
            rng_seed: Some(7),
            tree_slots: 0,
            rock_slots: 0,
            min_animals_per_chunk: 0,
            max_animals_per_chunk: 0,
            ..WorldConfig::default()
        }
    }

    fn quiet_world() -> World {
        World::new(quiet_config()).expect("world")
    }

    fn rabbit_at(world: &mut World, x: f32, z: f32) -> EntityId {
        world
            .add_animal(Vec3::new(x, 0.0, z), Species::Rabbit.descriptor())
            .expect("rabbit")
    }

    #[test]
    fn config_validation_reports_first_violation() {
        let config = WorldConfig {
            chunk_size: 0.0,
            ..WorldConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(WorldError::InvalidConfig("chunk_size must be positive"))
        );

        let config = WorldConfig {
            min_animals_per_chunk: 6,
            max_animals_per_chunk: 2,
            ..WorldConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WorldError::InvalidConfig(_))
        ));
        assert!(WorldConfig::default().validate().is_ok());
    }

    #[test]
    fn descriptor_requires_hysteresis_gap() {
        let descriptor = SpeciesDescriptor {
            safe_distance: 5.0,
            flee_distance: 6.0,
            ..Species::Rabbit.descriptor()
        };
        assert_eq!(
            descriptor.validate(),
            Err(WorldError::InvalidConfig(
                "species safe_distance must exceed flee_distance"
            ))
        );

        let mut world = quiet_world();
        assert!(world.add_animal(Vec3::ZERO, descriptor).is_err());
        for species in Species::ALL {
            assert!(species.descriptor().validate().is_ok());
        }
    }

    #[test]
    fn maturity_draw_buckets_follow_cumulative_weights() {
        assert_eq!(TreeMaturity::from_draw(0.0), TreeMaturity::Seedling);
        assert_eq!(TreeMaturity::from_draw(0.149), TreeMaturity::Seedling);
        assert_eq!(TreeMaturity::from_draw(0.15), TreeMaturity::Young);
        assert_eq!(TreeMaturity::from_draw(0.349), TreeMaturity::Young);
        assert_eq!(TreeMaturity::from_draw(0.35), TreeMaturity::Mature);
        assert_eq!(TreeMaturity::from_draw(0.699), TreeMaturity::Mature);
        assert_eq!(TreeMaturity::from_draw(0.70), TreeMaturity::Old);
        assert_eq!(TreeMaturity::from_draw(0.899), TreeMaturity::Old);
        assert_eq!(TreeMaturity::from_draw(0.90), TreeMaturity::Ancient);
        assert_eq!(TreeMaturity::from_draw(0.999), TreeMaturity::Ancient);
    }

    #[test]
    fn item_catalog_round_trips_names() {
        for item in ItemKind::ALL {
            assert_eq!(ItemKind::from_name(item.name()), Some(item));
        }
        assert_eq!(ItemKind::from_name("ambrosia"), None);
    }

    #[test]
    fn chunk_seed_mixes_coordinates_and_world_seed() {
        let origin = ChunkCoord::new(0, 0);
        assert_eq!(chunk_seed(origin, 7), 7);
        assert_ne!(chunk_seed(ChunkCoord::new(1, 0), 7), chunk_seed(origin, 7));
        assert_ne!(
            chunk_seed(ChunkCoord::new(1, 0), 7),
            chunk_seed(ChunkCoord::new(0, 1), 7)
        );
        assert_ne!(
            chunk_seed(ChunkCoord::new(3, -2), 7),
            chunk_seed(ChunkCoord::new(3, -2), 8)
        );
    }

    #[test]
    fn generation_is_deterministic_per_coordinate() {
        let config = WorldConfig::default();
        let terrain = TerrainSampler::new(config.world_seed);
        let coord = ChunkCoord::new(4, -9);
        let first = generate_chunk(coord, &config, &terrain);
        let second = generate_chunk(coord, &config, &terrain);
        assert_eq!(first, second);
        assert_ne!(first, generate_chunk(ChunkCoord::new(-9, 4), &config, &terrain));
    }

    #[test]
    fn far_chunks_fill_every_slot() {
        let config = WorldConfig::default();
        let terrain = TerrainSampler::new(config.world_seed);
        let content = generate_chunk(ChunkCoord::new(40, 40), &config, &terrain);

        let mut trees = 0u32;
        let mut rocks = 0u32;
        let mut animals = 0u32;
        for spawn in &content.spawns {
            match spawn.kind {
                SpawnKind::Tree { .. } => trees += 1,
                SpawnKind::Rock => rocks += 1,
                SpawnKind::Animal { .. } => animals += 1,
            }
            assert_eq!(
                spawn.position.y,
                terrain.height(spawn.position.x, spawn.position.z)
            );
        }
        assert_eq!(trees, config.tree_slots);
        assert_eq!(rocks, config.rock_slots);
        assert!(animals >= config.min_animals_per_chunk);
        assert!(animals <= config.max_animals_per_chunk);
    }

    #[test]
    fn origin_chunk_discards_spawns_inside_safety_radius() {
        let config = WorldConfig::default();
        let terrain = TerrainSampler::new(config.world_seed);
        for coord in ChunkCoord::new(0, 0).chunks_in_radius(1) {
            let content = generate_chunk(coord, &config, &terrain);
            for spawn in &content.spawns {
                assert!(
                    spawn.position.x.hypot(spawn.position.z) >= config.spawn_safety_radius,
                    "spawn at ({}, {}) breaches the safety radius",
                    spawn.position.x,
                    spawn.position.z
                );
            }
        }
    }

    #[test]
    fn quiet_world_streams_empty_chunks() {
        let world = quiet_world();
        let side = (2 * world.config().view_distance + 1) as usize;
        assert_eq!(world.resident_chunks().len(), side * side);
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.player_chunk(), ChunkCoord::new(0, 0));
    }

    #[test]
    fn add_entity_rejects_non_finite_positions() {
        let mut world = quiet_world();
        let err = world
            .add_entity(EntityData::rock(Vec3::new(f32::NAN, 0.0, 1.0), 1.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, WorldError::NonFinitePosition { .. }));
        assert!(
            world
                .add_entity(EntityData::rock(
                    Vec3::new(1.0, f32::INFINITY, 1.0),
                    1.0,
                    0.0
                ))
                .is_err()
        );
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn remove_entity_is_idempotent() {
        let mut world = quiet_world();
        let id = world
            .add_entity(EntityData::rock(Vec3::new(3.0, 0.0, 3.0), 1.0, 0.0))
            .expect("rock");
        assert_eq!(world.entity_count(), 1);
        assert!(world.remove_entity(id));
        assert!(!world.remove_entity(id));
        assert_eq!(world.entity_count(), 0);
        assert!(world.entity(id).is_none());
    }

    #[test]
    fn arena_repoints_moved_handle_after_removal() {
        let mut world = quiet_world();
        let first = world
            .add_entity(EntityData::rock(Vec3::new(1.0, 0.0, 1.0), 1.0, 0.0))
            .expect("first");
        let second = world
            .add_entity(EntityData::rock(Vec3::new(2.0, 0.0, 2.0), 1.0, 0.0))
            .expect("second");
        let third = world
            .add_entity(EntityData::rock(Vec3::new(3.0, 0.0, 3.0), 1.0, 0.0))
            .expect("third");

        assert!(world.remove_entity(first));
        let second_pos = world.entity(second).expect("second lives").position;
        let third_pos = world.entity(third).expect("third lives").position;
        assert_eq!(second_pos, Vec3::new(2.0, 0.0, 2.0));
        assert_eq!(third_pos, Vec3::new(3.0, 0.0, 3.0));
    }

    #[test]
    fn animal_flees_when_player_closes_in() {
        let mut world = quiet_world();
        let rabbit = rabbit_at(&mut world, 100.0, 100.0);
        world.update_player_position(100.0, 104.0).expect("move");

        world.step(0.1);
        assert_eq!(world.animal_state(rabbit), Some(BehaviorState::Fleeing));

        let pos = world.entity(rabbit).expect("rabbit").position;
        let player = world.player_position();
        let expected = 4.0 + 5.0 * 0.1;
        assert!((pos.planar_distance(player) - expected).abs() < 1e-3);
        // Flee direction points straight away from the player.
        assert!(pos.z < 100.0);
        assert!((pos.x - 100.0).abs() < 1e-3);
    }

    #[test]
    fn animal_calms_down_beyond_safe_distance() {
        let mut world = quiet_world();
        let rabbit = rabbit_at(&mut world, 100.0, 100.0);
        world.update_player_position(100.0, 104.0).expect("move");
        world.step(0.1);
        assert_eq!(world.animal_state(rabbit), Some(BehaviorState::Fleeing));

        world.update_player_position(100.0, 200.0).expect("move");
        world.step(0.1);
        assert_eq!(world.animal_state(rabbit), Some(BehaviorState::Idle));
    }

    #[test]
    fn boundary_distance_does_not_oscillate() {
        let mut world = quiet_world();
        let rabbit = rabbit_at(&mut world, 100.0, 100.0);
        // Exactly at the flee threshold for a rabbit.
        world.update_player_position(100.0, 106.0).expect("move");

        let mut transitions = 0;
        let mut last = world.animal_state(rabbit).expect("state");
        for _ in 0..10 {
            world.step(0.1);
            let state = world.animal_state(rabbit).expect("state");
            if state != last {
                transitions += 1;
                last = state;
            }
        }
        assert!(transitions <= 1, "state flapped {transitions} times");
    }

    #[test]
    fn idle_timer_accumulates_and_wraps() {
        let mut world = quiet_world();
        let rabbit = rabbit_at(&mut world, 100.0, 100.0);
        world.step(600.0);
        let timer = world.animal_runtime(rabbit).expect("runtime").idle_timer;
        assert!((timer - 600.0).abs() < 1e-3);

        world.step(600.0);
        let timer = world.animal_runtime(rabbit).expect("runtime").idle_timer;
        assert!((timer - 200.0).abs() < 1e-3);
    }

    #[test]
    fn death_drops_guaranteed_loot_once() {
        let mut world = quiet_world();
        let descriptor = SpeciesDescriptor {
            loot: vec![LootEntry::new("raw_meat", 1, 1.0)],
            ..Species::Rabbit.descriptor()
        };
        let rabbit = world
            .add_animal(Vec3::new(40.0, 0.0, 40.0), descriptor)
            .expect("rabbit");

        world.apply_damage(rabbit, 999.0);
        let events = world.step(0.1);
        assert_eq!(events.despawned, 1);
        assert_eq!(events.pickups_dropped, 1);
        assert!(world.entity(rabbit).is_none());

        let pickups: Vec<EntitySnapshot> = world
            .all_entities()
            .into_iter()
            .filter(|entity| matches!(entity.kind, EntityKind::ItemPickup { .. }))
            .collect();
        assert_eq!(pickups.len(), 1);
        let pickup = &pickups[0];
        assert_eq!(
            pickup.kind,
            EntityKind::ItemPickup {
                item: ItemKind::RawMeat,
                quantity: 1
            }
        );
        let scatter = pickup.position.planar_distance(Vec3::new(40.0, 0.0, 40.0));
        let config = world.config();
        assert!(scatter >= config.pickup_offset_min - 1e-3);
        assert!(scatter <= config.pickup_offset_max + 1e-3);
    }

    #[test]
    fn unknown_loot_names_are_skipped() {
        let mut world = quiet_world();
        let descriptor = SpeciesDescriptor {
            loot: vec![
                LootEntry::new("ambrosia", 3, 1.0),
                LootEntry::new("hide", 1, 1.0),
            ],
            ..Species::Rabbit.descriptor()
        };
        let rabbit = world
            .add_animal(Vec3::new(40.0, 0.0, 40.0), descriptor)
            .expect("rabbit");

        world.apply_damage(rabbit, 999.0);
        let events = world.step(0.1);
        assert_eq!(events.despawned, 1);
        assert_eq!(events.pickups_dropped, 1);
        let pickups = world
            .all_entities()
            .into_iter()
            .filter(|entity| matches!(entity.kind, EntityKind::ItemPickup { .. }))
            .count();
        assert_eq!(pickups, 1);
    }

    #[test]
    fn duplicate_death_reports_resolve_once() {
        let mut world = quiet_world();
        let rabbit = rabbit_at(&mut world, 40.0, 40.0);

        world.apply_damage(rabbit, 999.0);
        // A second hit on the corpse must not queue another death.
        world.apply_damage(rabbit, 999.0);
        assert_eq!(world.pending_deaths.len(), 1);

        // Even a duplicated queue entry resolves to a single removal.
        world.pending_deaths.push(rabbit);
        let (despawned, _) = world.stage_death_cleanup();
        assert_eq!(despawned, 1);
        assert!(world.entity(rabbit).is_none());

        let (despawned, _) = world.stage_death_cleanup();
        assert_eq!(despawned, 0);
    }

    #[test]
    fn dead_entities_vanish_from_queries_before_cleanup() {
        let mut world = quiet_world();
        let rabbit = rabbit_at(&mut world, 40.0, 40.0);
        let center = Vec3::new(40.0, 0.0, 40.0);
        assert_eq!(world.entities_in_radius(center, 5.0).expect("query").len(), 1);

        world.apply_damage(rabbit, 999.0);
        assert!(world.entities_in_radius(center, 5.0).expect("query").is_empty());
    }

    #[test]
    fn queries_reject_non_finite_centers() {
        let world = quiet_world();
        assert!(
            world
                .entities_in_radius(Vec3::new(f32::NAN, 0.0, 0.0), 5.0)
                .is_err()
        );
    }

    #[test]
    fn radius_query_separates_interactables() {
        let mut world = quiet_world();
        world
            .add_entity(EntityData::rock(Vec3::new(40.0, 0.0, 40.0), 1.0, 0.0))
            .expect("rock");
        rabbit_at(&mut world, 41.0, 40.0);

        let center = Vec3::new(40.0, 0.0, 40.0);
        assert_eq!(world.entities_in_radius(center, 5.0).expect("query").len(), 2);
        let interactables = world.interactables_in_radius(center, 5.0).expect("query");
        assert_eq!(interactables.len(), 1);
        assert_eq!(interactables[0].kind, EntityKind::Rock);
    }

    #[test]
    fn raycast_picks_nearest_and_breaks_ties_by_registration() {
        let mut world = quiet_world();
        let half = Vec3::new(0.5, 1.0, 0.5);
        let near = world
            .add_entity(EntityData::structure(Vec3::new(0.0, 0.0, 3.0), half))
            .expect("near");
        let far_first = world
            .add_entity(EntityData::structure(Vec3::new(0.0, 0.0, 5.0), half))
            .expect("far first");
        let _far_second = world
            .add_entity(EntityData::structure(Vec3::new(0.0, 0.0, 5.0), half))
            .expect("far second");
        rabbit_at(&mut world, 0.0, 1.5);

        let ray = Ray::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = world.raycast_interactable(ray, 50.0).expect("hit");
        assert_eq!(hit.id, near);
        assert!((hit.distance - 2.5).abs() < 1e-3);

        assert!(world.raycast_interactable(ray, 2.0).is_none());
        assert!(
            world
                .raycast_interactable(Ray::new(Vec3::ZERO, Vec3::ZERO), 50.0)
                .is_none()
        );

        world.remove_entity(near);
        let hit = world.raycast_interactable(ray, 50.0).expect("hit");
        assert_eq!(hit.id, far_first, "tie must keep the first registered box");
    }

    #[test]
    fn streaming_keeps_hysteresis_ring_resident() {
        let mut world = quiet_world();
        let chunk = world.config().chunk_size;
        assert_eq!(world.resident_chunks().len(), 25);

        // One chunk east: a new column loads, nothing falls outside the
        // eviction ring.
        world.update_player_position(chunk * 1.5, 0.0).expect("move");
        assert_eq!(world.player_chunk(), ChunkCoord::new(1, 0));
        assert_eq!(world.resident_chunks().len(), 30);
        assert!(world.is_chunk_resident(ChunkCoord::new(-2, 0)));

        // Stepping back does not evict the extra column either.
        world.update_player_position(0.0, 0.0).expect("move");
        assert_eq!(world.resident_chunks().len(), 30);
        assert!(world.is_chunk_resident(ChunkCoord::new(3, 0)));

        // A long teleport leaves only the fresh neighborhood.
        world.update_player_position(chunk * 10.5, 0.0).expect("move");
        assert_eq!(world.player_chunk(), ChunkCoord::new(10, 0));
        let residents = world.resident_chunks();
        assert_eq!(residents.len(), 25);
        for coord in residents {
            assert!(coord.chebyshev(ChunkCoord::new(10, 0)) <= world.config().view_distance + 1);
        }
    }

    #[test]
    fn eviction_deregisters_chunk_spawns() {
        let mut world = World::new(WorldConfig {
            rng_seed: Some(7),
            ..WorldConfig::default()
        })
        .expect("world");
        assert!(world.entity_count() > 0);

        let record = world
            .chunk_record(ChunkCoord::new(2, 2))
            .expect("resident record");
        let spawned = record.spawned.clone();
        assert!(!spawned.is_empty());

        world.update_player_position(1000.0, 1000.0).expect("move");
        assert!(!world.is_chunk_resident(ChunkCoord::new(2, 2)));
        for id in spawned {
            assert!(world.entity(id).is_none());
        }
        for entity in world.all_entities() {
            assert!(
                entity.chunk.chebyshev(world.player_chunk())
                    <= world.config().view_distance + 1
            );
        }
    }

    #[test]
    fn index_stays_consistent_over_many_ticks() {
        let mut world = World::new(WorldConfig {
            rng_seed: Some(11),
            ..WorldConfig::default()
        })
        .expect("world");

        for step in 0..30 {
            let along = step as f32 * 2.0;
            world.update_player_position(along, along * 0.5).expect("move");
            world.step(0.1);

            for entity in world.all_entities() {
                let expected = ChunkCoord::from_world(
                    entity.position.x,
                    entity.position.z,
                    world.config().chunk_size,
                );
                assert_eq!(entity.chunk, expected);
                assert!(world.entities_in_chunk(expected).contains(&entity.id));
            }
        }
    }

    #[test]
    fn vitals_drain_and_starvation_bites() {
        let mut world = quiet_world();
        world.step(10.0);
        let vitals = world.vitals();
        assert!((vitals.hunger - 97.5).abs() < 1e-3);
        assert!((vitals.thirst - 96.0).abs() < 1e-3);
        assert!((vitals.health - 100.0).abs() < 1e-3);
        assert!(!vitals.is_deprived());

        world.step(500.0);
        let vitals = world.vitals();
        assert!(vitals.is_deprived());
        assert_eq!(vitals.hunger, 0.0);
        assert_eq!(vitals.thirst, 0.0);
        assert!(vitals.health < 100.0);

        world.consume_food(50.0);
        world.consume_water(50.0);
        assert!(!world.vitals().is_deprived());
    }

    #[test]
    fn history_ring_is_bounded() {
        let mut world = World::new(WorldConfig {
            history_capacity: 4,
            ..quiet_config()
        })
        .expect("world");
        for _ in 0..10 {
            world.step(0.1);
        }
        assert_eq!(world.history().len(), 4);
        assert_eq!(world.history().front().expect("front").tick, Tick(7));
        assert_eq!(world.history().back().expect("back").tick, Tick(10));
    }

    #[test]
    fn telemetry_counts_fleeing_animals() {
        let mut world = quiet_world();
        rabbit_at(&mut world, 100.0, 100.0);
        rabbit_at(&mut world, 100.0, 101.0);
        rabbit_at(&mut world, 400.0, 400.0);
        world.update_player_position(100.0, 103.0).expect("move");

        world.step(0.1);
        let summary = world.history().back().expect("summary");
        assert_eq!(summary.animal_count, 3);
        assert_eq!(summary.fleeing, 2);
        assert_eq!(summary.entity_count, 3);
    }

    #[test]
    fn same_seeds_reproduce_identical_runs() {
        let config = WorldConfig {
            rng_seed: Some(99),
            ..WorldConfig::default()
        };
        let mut first = World::new(config.clone()).expect("first");
        let mut second = World::new(config).expect("second");

        for step in 0..20 {
            let along = step as f32 * 3.0;
            first.update_player_position(along, -along).expect("move");
            second.update_player_position(along, -along).expect("move");
            first.step(0.1);
            second.step(0.1);
        }

        assert_eq!(first.all_entities(), second.all_entities());
        assert_eq!(first.history(), second.history());
        assert_eq!(first.resident_chunks(), second.resident_chunks());
    }
}
