use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use tracing_subscriber::EnvFilter;

use phasetrack_common::{
    ActorId, BlockPos, BlockState, ChangeFlag, Entity, EntityKind, ItemDrop, ItemStack,
};
use phasetrack_kernel::{Mutation, ReactionRule, World, splitmix64};
use phasetrack_tools::{TrackerInspector, WorldInspector};
use phasetrack_tracker::{
    CauseStack, CommandSource, Event, Host, ListenerBus, PhaseKind, PhaseTracker, ResyncQueue,
    Source, TrackerConfig,
};

const STONE: BlockState = BlockState(1);
const TORCH: BlockState = BlockState(50);

#[derive(Parser)]
#[command(name = "phasetrack-cli", about = "Drive the phase tracker against a reference world")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Tracker configuration (YAML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective tracker configuration
    Info,
    /// Run a deterministic mixed workload through the tracker
    Simulate {
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "10")]
        ticks: u64,
        /// RNG seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Write the world's event log to this file as JSON
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Place one self-propagating block and watch the replay depth limit
    Cascade {
        /// Override the configured maximum processing depth
        #[arg(short, long)]
        depth: Option<usize>,
    },
    /// Nest a non-reentrant phase inside itself
    Runaway {
        /// How many times to enter the phase
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

struct Session {
    world: World,
    bus: ListenerBus,
    causes: CauseStack,
    tracker: PhaseTracker,
}

impl Session {
    fn new(world: World, config: TrackerConfig) -> Self {
        Self {
            world,
            bus: ListenerBus::new(),
            causes: CauseStack::new(),
            tracker: PhaseTracker::new(config),
        }
    }

    fn run<R>(&mut self, f: impl FnOnce(&mut PhaseTracker, &mut Host<'_>) -> R) -> R {
        let mut host = Host::new(&mut self.world, &mut self.bus, &mut self.causes);
        f(&mut self.tracker, &mut host)
    }

    fn report(&self) {
        println!("{}", WorldInspector::summary(&self.world));
        println!("{}", TrackerInspector::summary(&self.tracker));
        println!("{}", TrackerInspector::tally(self.bus.history()));
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TrackerConfig> {
    match path {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading tracker config from {}", path.display())),
        None => Ok(TrackerConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Info => {
            println!("phasetrack-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("tools: {}", phasetrack_tools::crate_info());
            let names: Vec<&str> = PhaseKind::ALL.iter().map(|k| k.name()).collect();
            println!("phases: {}", names.join(", "));
            print!("{}", config.to_yaml()?);
        }
        Commands::Simulate { ticks, seed, events } => {
            simulate(config, ticks, seed, events.as_deref())?
        }
        Commands::Cascade { depth } => cascade(config, depth)?,
        Commands::Runaway { count } => runaway(config, count),
    }

    Ok(())
}

/// Deterministic position picker over a small area.
fn pick(rng: &mut u64) -> BlockPos {
    *rng = splitmix64(*rng);
    let z = *rng;
    BlockPos::new((z % 8) as i32, 0, ((z >> 8) % 8) as i32)
}

fn simulate(
    config: TrackerConfig,
    ticks: u64,
    seed: u64,
    events: Option<&Path>,
) -> anyhow::Result<()> {
    println!("Simulate: seed={seed}, ticks={ticks}");

    let mut world = World::with_seed(seed);
    world.add_rule(ReactionRule::fragile(TORCH, "torch"));
    let mut session = Session::new(world, config);
    let mut batches = 0u64;
    session.bus.listen("cancel-every-third-batch", move |event| {
        if matches!(event, Event::ChangeBlock(_)) {
            batches += 1;
            if batches % 3 == 0 {
                event.cancel();
            }
        }
        Ok(())
    });

    let player = ActorId::new();
    let queue = ResyncQueue::unbounded();
    let mut rng = seed;

    for tick in 0..ticks {
        let build = pick(&mut rng);
        let dig = pick(&mut rng);

        session.run(|tracker, host| -> anyhow::Result<()> {
            let ctx = tracker
                .create_context(PhaseKind::Command)
                .source(Source::Command(CommandSource::new("build", Some(player))));
            tracker.scope(host, ctx, |tracker, host| {
                tracker.set_block(host, build, STONE, ChangeFlag::ALL)?;
                tracker.set_block(host, build.up(), TORCH, ChangeFlag::ALL)?;
                Ok::<_, anyhow::Error>(())
            })?;

            let ctx = tracker
                .create_context(PhaseKind::Interaction)
                .source(Source::Actor(player))
                .used_item(ItemStack::new("pickaxe", 1));
            tracker.scope(host, ctx, |tracker, host| {
                tracker.set_block(host, dig, BlockState::AIR, ChangeFlag::ALL)?;
                tracker.capture_block_drop(
                    host,
                    dig,
                    ItemDrop::new(ItemStack::new("cobblestone", 1), dig.center()),
                )?;
                Ok::<_, anyhow::Error>(())
            })?;

            let sheep = Entity::new("sheep", EntityKind::Living { ageable: true }, Vec3::ZERO);
            let ctx = tracker
                .create_context(PhaseKind::EntityTick)
                .source(Source::Entity(sheep));
            tracker.scope(host, ctx, |tracker, host| {
                let orb = Entity::new("xp_orb", EntityKind::ExperienceOrb { value: 1 }, Vec3::ZERO);
                tracker.spawn_entity(host, orb)?;
                if tick % 3 == 0 {
                    let lamb = Entity::new("sheep", EntityKind::Living { ageable: true }, Vec3::ZERO);
                    tracker.spawn_entity(host, lamb)?;
                }
                Ok::<_, anyhow::Error>(())
            })?;
            Ok(())
        })?;

        // Off-thread work arrives between ticks and is replayed on this one.
        let handle = queue.handle();
        std::thread::spawn(move || {
            handle.command(
                CommandSource::new("async-mark", None),
                vec![Mutation::set_block(BlockPos::new(tick as i32, 5, 0), STONE)],
            );
        })
        .join()
        .map_err(|_| anyhow::anyhow!("resync worker panicked"))?;
        let drained = session.run(|tracker, host| queue.drain(tracker, host))?;
        tracing::debug!(tick, commands = drained.commands, "resynced");

        session.world.step();
    }

    session.report();
    println!("hash={:#x}", session.world.state_hash());

    if let Some(path) = events {
        let file = File::create(path)
            .with_context(|| format!("creating event log {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), session.world.events())?;
        println!("wrote {} world events to {}", session.world.events().len(), path.display());
    }
    Ok(())
}

fn cascade(mut config: TrackerConfig, depth: Option<usize>) -> anyhow::Result<()> {
    if let Some(depth) = depth {
        config.max_block_processing_depth = depth;
    }
    let config = config.sanitized();
    println!("Cascade: max depth={}", config.max_block_processing_depth);

    let mut world = World::new().with_height(0, 4096);
    world.add_rule(ReactionRule::grow_up(STONE));
    let mut session = Session::new(world, config);

    session.run(|tracker, host| {
        let ctx = tracker.create_context(PhaseKind::GenericPacket);
        tracker.scope(host, ctx, |tracker, host| {
            tracker.set_block(host, BlockPos::new(0, 0, 0), STONE, ChangeFlag::ALL)
        })
    })?;

    session.report();
    Ok(())
}

fn runaway(config: TrackerConfig, count: usize) {
    println!("Runaway: entering the command phase {count} times");
    let mut session = Session::new(World::new(), config);
    session.run(|tracker, host| {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let ctx = tracker
                .create_context(PhaseKind::Command)
                .source(Source::Command(CommandSource::new(format!("nested-{i}"), None)));
            handles.push(tracker.push(host, ctx));
        }
        while let Some(handle) = handles.pop() {
            tracker.pop(host, handle);
        }
    });
    session.report();
}
