//! Headless soak runner for the wildwood world simulation.
//!
//! Drives a scripted player walk through a seeded world, optionally
//! hunting and gathering along the way, and reports streaming and
//! survival telemetry. Useful for profiling chunk churn and for checking
//! behavior changes without a renderer attached.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ordered_float::OrderedFloat;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};
use wildwood_core::{ChunkCoord, EntityKind, ItemKind, World, WorldConfig, WorldHooks};

/// Reach of a swing or a pickup grab, in world units.
const REACH: f32 = 2.5;
const SWING_DAMAGE: f32 = 12.0;

#[derive(Parser, Debug)]
#[command(
    name = "wildwood",
    version,
    about = "Headless soak runner for the wildwood world simulation"
)]
struct Cli {
    /// Optional JSON file holding a full world configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// World layout seed; overrides the config file.
    #[arg(long)]
    seed: Option<u64>,

    /// Seed for cosmetic rolls (loot, scatter); omitted means entropy.
    #[arg(long)]
    rng_seed: Option<u64>,

    /// Resident chunk radius around the player; overrides the config file.
    #[arg(long)]
    view_distance: Option<i32>,

    /// Number of simulation ticks to run.
    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// Fixed timestep in seconds.
    #[arg(long, default_value_t = 0.1)]
    dt: f32,

    /// Scripted walk pattern driving chunk streaming.
    #[arg(long, value_enum, default_value_t = Walk::Orbit)]
    walk: Walk,

    /// Walk speed in world units per second.
    #[arg(long, default_value_t = 4.0)]
    walk_speed: f32,

    /// Swing at whatever is in reach and gather the drops.
    #[arg(long)]
    hunt: bool,

    /// Emit a progress line every this many ticks.
    #[arg(long, default_value_t = 100)]
    report_interval: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Walk {
    /// Stand still at the origin.
    Hold,
    /// March east forever.
    March,
    /// Circle the origin at a fixed radius.
    Orbit,
    /// Walk out along the x axis and back, repeatedly.
    Patrol,
}

impl Walk {
    fn position(self, elapsed: f32, speed: f32) -> (f32, f32) {
        match self {
            Self::Hold => (0.0, 0.0),
            Self::March => (elapsed * speed, 0.0),
            Self::Orbit => {
                let radius = 40.0;
                let angle = elapsed * speed / radius;
                (angle.cos() * radius, angle.sin() * radius)
            }
            Self::Patrol => {
                let span = 96.0;
                let along = (elapsed * speed) % (2.0 * span);
                if along < span {
                    (along, 0.0)
                } else {
                    (2.0 * span - along, 0.0)
                }
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    info!(
        world_seed = config.world_seed,
        view_distance = config.view_distance,
        ticks = cli.ticks,
        walk = ?cli.walk,
        hunt = cli.hunt,
        "starting soak run",
    );

    let mut world = World::with_hooks(config, Box::new(StreamLog))?;
    let mut inventory = Inventory::default();
    let mut elapsed = 0.0_f32;

    for _ in 0..cli.ticks {
        elapsed += cli.dt;
        let (x, z) = cli.walk.position(elapsed, cli.walk_speed);
        world.update_player_position(x, z)?;
        if cli.hunt {
            swing_at_nearest(&mut world);
            gather_drops(&mut world, &mut inventory);
        }
        let events = world.step(cli.dt);
        if cli.report_interval > 0 && events.tick.0 % cli.report_interval == 0 {
            report_progress(&world);
        }
    }

    report_run(&world, &inventory);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn build_config(cli: &Cli) -> Result<WorldConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("config file {} is not valid JSON", path.display()))?
        }
        None => WorldConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.world_seed = seed;
    }
    if cli.rng_seed.is_some() {
        config.rng_seed = cli.rng_seed;
    }
    if let Some(view) = cli.view_distance {
        config.view_distance = view;
    }
    Ok(config)
}

/// Swings at the closest damageable entity within reach.
fn swing_at_nearest(world: &mut World) {
    let player = world.player_position();
    let Ok(nearby) = world.entities_in_radius(player, REACH) else {
        return;
    };
    let target = nearby
        .into_iter()
        .filter(|entity| {
            matches!(
                entity.kind,
                EntityKind::Animal { .. } | EntityKind::Tree { .. } | EntityKind::Rock
            )
        })
        .min_by_key(|entity| OrderedFloat(entity.position.planar_distance(player)));
    if let Some(target) = target {
        debug!(kind = target.kind.label(), "swing");
        world.apply_damage(target.id, SWING_DAMAGE);
    }
}

/// Grabs item pickups within reach into the inventory.
fn gather_drops(world: &mut World, inventory: &mut Inventory) {
    let player = world.player_position();
    let Ok(drops) = world.interactables_in_radius(player, REACH) else {
        return;
    };
    for drop in drops {
        if let EntityKind::ItemPickup { item, quantity } = drop.kind {
            if world.remove_entity(drop.id) {
                inventory.add(item, quantity);
                debug!(item = item.display_name(), quantity, "picked up");
            }
        }
    }
}

fn report_progress(world: &World) {
    if let Some(summary) = world.history().back() {
        info!(
            tick = summary.tick.0,
            entities = summary.entity_count,
            animals = summary.animal_count,
            fleeing = summary.fleeing,
            chunks = summary.resident_chunks,
            player_chunk = %summary.player_chunk,
            health = summary.vitals.health,
            "progress",
        );
    }
}

fn report_run(world: &World, inventory: &Inventory) {
    let vitals = world.vitals();
    info!(
        tick = world.tick().0,
        entities = world.entity_count(),
        chunks = world.resident_chunks().len(),
        health = vitals.health,
        hunger = vitals.hunger,
        thirst = vitals.thirst,
        "run complete",
    );
    for item in ItemKind::ALL {
        if let Some(count) = inventory.count(item) {
            info!(
                item = item.display_name(),
                count,
                stacks = count.div_ceil(item.max_stack()),
                "gathered",
            );
        }
    }
}

/// Tally of gathered items, keyed by catalog entry.
#[derive(Debug, Default)]
struct Inventory {
    counts: HashMap<ItemKind, u32>,
}

impl Inventory {
    fn add(&mut self, item: ItemKind, quantity: u32) {
        *self.counts.entry(item).or_default() += quantity;
    }

    fn count(&self, item: ItemKind) -> Option<u32> {
        self.counts.get(&item).copied()
    }
}

/// Hook sink narrating chunk streaming at debug level.
struct StreamLog;

impl WorldHooks for StreamLog {
    fn chunk_loaded(&mut self, coord: ChunkCoord, spawned: usize) {
        debug!(chunk = %coord, spawned, "chunk loaded");
    }

    fn chunk_unloaded(&mut self, coord: ChunkCoord) {
        debug!(chunk = %coord, "chunk unloaded");
    }
}
