//! `tern`: ring builder and dispersion audit CLI.
//!
//! # Usage
//!
//! ```text
//! tern ring object.builder create 10 3 1             # part power, replicas, min part hours
//! tern ring object.builder add r1z1-10.0.0.1:6200/sdb 100
//! tern ring object.builder search --zone 1
//! tern ring object.builder set_weight --ip 10.0.0.1 50
//! tern ring object.builder rebalance
//! tern ring object.builder write_ring object.ring
//! tern -c tern.toml dispersion report
//! tern dispersion names --ring object --policy 1 --limit 10
//! ```

mod config;
mod descriptor;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tern_dispersion::{
    CONTAINER_PREFIX, ClusterContext, NameGenerator, ReportBuilder, RingDirectory, StaticPolicies,
    format_duration, object_container,
};
use tern_meta::MetaStore;
use tern_placement::{DeviceFilter, DeviceUpdate, RingBuilder};
use tern_types::{DeviceId, RingType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "tern", version, about = "Partition ring builder and dispersion audit")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and inspect a ring builder file.
    Ring {
        /// Path to the builder file.
        builder: PathBuf,

        #[command(subcommand)]
        action: RingCommand,
    },

    /// Dispersion audit.
    Dispersion {
        #[command(subcommand)]
        action: DispersionCommand,
    },
}

#[derive(Subcommand)]
enum RingCommand {
    /// Create a new, empty builder file.
    Create {
        part_power: u8,
        replicas: f64,
        min_part_hours: u32,
    },

    /// Add a device: `[r<region>]z<zone>-<ip>:<port>[R<ip>:<port>]/<device>[_<meta>]`.
    Add { descriptor: String, weight: f64 },

    /// List devices matching the filter (all devices without one).
    Search {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Change address or identity fields of matching devices.
    #[command(name = "set_info")]
    SetInfo {
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        change: ChangeArgs,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Set the weight of matching devices.
    #[command(name = "set_weight")]
    SetWeight {
        #[command(flatten)]
        filter: FilterArgs,
        /// New weight.
        #[arg(value_name = "WEIGHT")]
        new_weight: f64,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Schedule matching devices for removal on the next rebalance.
    Remove {
        #[command(flatten)]
        filter: FilterArgs,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Reassign partitions and save the builder.
    Rebalance,

    /// Write the ring artifact consumed by routing code.
    #[command(name = "write_ring")]
    WriteRing { ring: PathBuf },

    /// Load the builder and print its summary and devices.
    Load,

    /// Print the builder summary and its devices.
    Info,

    /// Set the overload factor (0.1 = 10%).
    #[command(name = "set_overload")]
    SetOverload { overload: f64 },

    /// Set the per-partition move cooldown.
    #[command(name = "set_min_part_hours")]
    SetMinPartHours { hours: u32 },

    /// Clear every partition's move cooldown.
    #[command(name = "pretend_min_part_hours_passed")]
    PretendMinPartHoursPassed,
}

#[derive(Args, Default)]
struct FilterArgs {
    #[arg(long)]
    region: Option<u32>,
    #[arg(long)]
    zone: Option<u32>,
    #[arg(long)]
    ip: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    replication_ip: Option<String>,
    #[arg(long)]
    replication_port: Option<u16>,
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    weight: Option<f64>,
    #[arg(long)]
    meta: Option<String>,
}

impl From<FilterArgs> for DeviceFilter {
    fn from(args: FilterArgs) -> Self {
        DeviceFilter {
            region: args.region,
            zone: args.zone,
            ip: args.ip,
            port: args.port,
            replication_ip: args.replication_ip,
            replication_port: args.replication_port,
            device: args.device,
            weight: args.weight,
            meta: args.meta,
        }
    }
}

#[derive(Args, Default)]
struct ChangeArgs {
    #[arg(long)]
    change_ip: Option<String>,
    #[arg(long)]
    change_port: Option<u16>,
    #[arg(long)]
    change_replication_ip: Option<String>,
    #[arg(long)]
    change_replication_port: Option<u16>,
    #[arg(long)]
    change_device: Option<String>,
    #[arg(long)]
    change_meta: Option<String>,
}

impl From<ChangeArgs> for DeviceUpdate {
    fn from(args: ChangeArgs) -> Self {
        DeviceUpdate {
            ip: args.change_ip,
            port: args.change_port,
            replication_ip: args.change_replication_ip,
            replication_port: args.change_replication_port,
            device: args.change_device,
            meta: args.change_meta,
        }
    }
}

#[derive(Subcommand)]
enum DispersionCommand {
    /// Build the dispersion report; exits non-zero if it did not pass.
    Report,

    /// Stream one dispersion name per partition of a ring.
    Names {
        /// Which ring to generate names for.
        #[arg(long, value_enum)]
        ring: RingArg,
        /// Storage policy (object ring only).
        #[arg(long, default_value = "0")]
        policy: u32,
        /// Stop after this many names.
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RingArg {
    Container,
    Object,
}

impl From<RingArg> for RingType {
    fn from(arg: RingArg) -> Self {
        match arg {
            RingArg::Container => RingType::Container,
            RingArg::Object => RingType::Object,
        }
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Ring { builder, action } => cmd_ring(&builder, action),
        Commands::Dispersion { action } => match action {
            DispersionCommand::Report => cmd_report(&config).await,
            DispersionCommand::Names {
                ring,
                policy,
                limit,
            } => cmd_names(&config, ring.into(), policy, limit).await,
        },
    }
}

fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// -----------------------------------------------------------------------
// tern ring
// -----------------------------------------------------------------------

fn cmd_ring(path: &Path, action: RingCommand) -> Result<()> {
    let mut builder = match action {
        RingCommand::Create {
            part_power,
            replicas,
            min_part_hours,
        } => {
            RingBuilder::create(path, part_power, replicas, min_part_hours)
                .with_context(|| format!("failed to create {}", path.display()))?;
            println!("Created {}", path.display());
            return Ok(());
        }
        _ => RingBuilder::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
    };

    match action {
        RingCommand::Create { .. } => {}
        RingCommand::Add { descriptor, weight } => {
            let new = descriptor::parse_device(&descriptor, weight)?;
            let name = new.device.clone();
            let id = builder.add_device(new)?;
            save(&builder, path)?;
            println!("Device {name} with {weight:.2} weight added with id {id}");
        }
        RingCommand::Search { filter } => {
            let filter = DeviceFilter::from(filter);
            let devs = builder.search(&filter);
            if devs.is_empty() {
                println!("No matching devices found.");
            } else {
                print!("{}", output::device_table(devs));
            }
        }
        RingCommand::SetInfo {
            filter,
            change,
            yes,
        } => {
            let update = DeviceUpdate::from(change);
            if update.is_empty() {
                bail!("set_info needs at least one --change-* flag");
            }
            let Some(ids) = select_devices(&builder, filter)? else {
                return Ok(());
            };
            let question = format!(
                "Are you sure you want to update the info for these {} devices (y/n)? ",
                ids.len()
            );
            if !yes && !output::confirm(&question)? {
                println!("No devices updated.");
                return Ok(());
            }
            builder.set_info(&ids, &update)?;
            save(&builder, path)?;
            println!("Devices updated successfully.");
        }
        RingCommand::SetWeight {
            filter,
            new_weight,
            yes,
        } => {
            let Some(ids) = select_devices(&builder, filter)? else {
                return Ok(());
            };
            let question = format!(
                "Are you sure you want to update the weight to {new_weight:.2} for these {} devices (y/n)? ",
                ids.len()
            );
            if !yes && !output::confirm(&question)? {
                println!("No devices updated.");
                return Ok(());
            }
            builder.set_weight(&ids, new_weight)?;
            save(&builder, path)?;
            println!("Weight updated successfully.");
        }
        RingCommand::Remove { filter, yes } => {
            let Some(ids) = select_devices(&builder, filter)? else {
                return Ok(());
            };
            let question = format!(
                "Are you sure you want to remove these {} devices (y/n)? ",
                ids.len()
            );
            if !yes && !output::confirm(&question)? {
                println!("No devices removed.");
                return Ok(());
            }
            builder.remove_devices(&ids)?;
            save(&builder, path)?;
            println!("Devices removed successfully.");
        }
        RingCommand::Rebalance => {
            let summary = builder.rebalance()?;
            save(&builder, path)?;
            println!(
                "Reassigned {} partition replicas. Balance is now {:.2}.",
                summary.moved, summary.balance
            );
            if !summary.removed.is_empty() {
                let removed: Vec<String> = summary.removed.iter().map(ToString::to_string).collect();
                println!("Removed devices: {}", removed.join(", "));
            }
        }
        RingCommand::WriteRing { ring } => {
            builder
                .write_ring(&ring)
                .with_context(|| format!("failed to write {}", ring.display()))?;
            println!("Wrote {}", ring.display());
        }
        RingCommand::Load | RingCommand::Info => print!("{}", builder_text(&builder, path)),
        RingCommand::SetOverload { overload } => {
            builder.set_overload(overload)?;
            save(&builder, path)?;
            println!(
                "The overload factor is now {:0.2}% ({overload:.6})",
                overload * 100.0
            );
        }
        RingCommand::SetMinPartHours { hours } => {
            builder.set_min_part_hours(hours);
            save(&builder, path)?;
            println!("The minimum number of hours before a partition can be reassigned is now {hours}");
        }
        RingCommand::PretendMinPartHoursPassed => {
            builder.pretend_min_part_hours_passed();
            save(&builder, path)?;
            println!("Every partition may now be reassigned.");
        }
    }
    Ok(())
}

/// Search with a mandatory filter and print what matched. `None` when
/// nothing matched.
fn select_devices(builder: &RingBuilder, filter: FilterArgs) -> Result<Option<Vec<DeviceId>>> {
    let filter = DeviceFilter::from(filter);
    if filter.is_empty() {
        bail!("at least one filter flag is required");
    }
    let devs = builder.search(&filter);
    if devs.is_empty() {
        println!("No matching devices found.");
        return Ok(None);
    }
    println!("Search matched the following devices:");
    let ids = devs.iter().map(|d| d.id).collect();
    print!("{}", output::device_table(devs));
    Ok(Some(ids))
}

fn save(builder: &RingBuilder, path: &Path) -> Result<()> {
    builder
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))
}

/// Summary followed by the table of devices not yet removed.
fn builder_text(builder: &RingBuilder, path: &Path) -> String {
    let live = builder.devices().iter().flatten().filter(|d| !d.deleted);
    info_text(builder, path) + &output::device_table(live)
}

fn info_text(builder: &RingBuilder, path: &Path) -> String {
    let info = builder.info();
    format!(
        "{}, build version {}\n\
         {} partitions, {:.6} replicas, {} regions, {} zones, {} devices, {:.2} balance\n\
         The minimum number of hours before a partition can be reassigned is {} ({} remaining)\n\
         The overload factor is {:0.2}% ({:.6})\n",
        path.display(),
        info.version,
        info.partitions,
        info.replicas,
        info.regions,
        info.zones,
        info.devices,
        info.balance,
        info.min_part_hours,
        format_duration(info.min_part_seconds_left as i64),
        info.overload * 100.0,
        info.overload,
    )
}

// -----------------------------------------------------------------------
// tern dispersion
// -----------------------------------------------------------------------

fn cluster_context(config: &CliConfig) -> Result<ClusterContext> {
    let rings = RingDirectory::new(&config.rings.dir, config.path_hasher());
    let store = MetaStore::open(&config.meta.path)
        .with_context(|| format!("failed to open {}", config.meta.path.display()))?;
    Ok(ClusterContext {
        rings: Arc::new(rings),
        queue: Arc::new(store),
        policies: Arc::new(StaticPolicies::new(config.policy_list())),
    })
}

async fn cmd_report(config: &CliConfig) -> Result<()> {
    let ctx = cluster_context(config)?;
    let report = tokio::task::spawn_blocking(move || ReportBuilder::new(ctx).build())
        .await
        .context("report task failed")?;
    print!("{}", report.render(Utc::now()));
    if !report.passed() {
        bail!("dispersion report did not pass");
    }
    Ok(())
}

async fn cmd_names(
    config: &CliConfig,
    ring_type: RingType,
    policy: u32,
    limit: Option<u64>,
) -> Result<()> {
    let rings = RingDirectory::new(&config.rings.dir, config.path_hasher());
    let ring = rings.load(ring_type, policy)?;
    let generator = config
        .dispersion
        .workers
        .map_or_else(NameGenerator::new, NameGenerator::with_workers);
    let (container, prefix) = match ring_type {
        RingType::Container => (String::new(), CONTAINER_PREFIX),
        RingType::Object => (object_container(policy), ""),
    };
    info!(%ring_type, policy, workers = generator.workers(), "generating dispersion names");

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || generator.generate(&container, prefix, &ring, tx, &cancel))
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed: u64 = 0;
    loop {
        if limit.is_some_and(|l| printed >= l) {
            cancel.cancel();
            break;
        }
        tokio::select! {
            name = rx.recv() => match name {
                Some(name) => {
                    println!("{name}");
                    printed += 1;
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                debug!("interrupted");
                cancel.cancel();
                break;
            }
        }
    }
    drop(rx);

    let sent = worker.await.context("name generator failed")?;
    debug!(sent, printed, "name generation stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tern_placement::Ring;

    use super::*;

    fn run(path: &Path, args: &[&str]) -> Result<()> {
        let mut argv = vec!["tern", "ring", path.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        match cli.command {
            Commands::Ring { builder, action } => cmd_ring(&builder, action),
            Commands::Dispersion { .. } => unreachable!(),
        }
    }

    #[test]
    fn test_parse_ring_commands() {
        let cli = Cli::try_parse_from([
            "tern", "ring", "obj.builder", "set_info", "--zone", "2", "--change-ip", "10.9.9.9",
            "-y",
        ])
        .unwrap();
        let Commands::Ring { builder, action } = cli.command else {
            panic!("expected ring command");
        };
        assert_eq!(builder, PathBuf::from("obj.builder"));
        let RingCommand::SetInfo { filter, change, yes } = action else {
            panic!("expected set_info");
        };
        assert_eq!(filter.zone, Some(2));
        assert_eq!(change.change_ip.as_deref(), Some("10.9.9.9"));
        assert!(yes);

        let cli =
            Cli::try_parse_from(["tern", "ring", "b", "set_weight", "--weight", "1", "3.5"]).unwrap();
        let Commands::Ring {
            action: RingCommand::SetWeight {
                filter, new_weight, ..
            },
            ..
        } = cli.command
        else {
            panic!("expected set_weight");
        };
        assert_eq!(filter.weight, Some(1.0));
        assert_eq!(new_weight, 3.5);
    }

    #[test]
    fn test_parse_dispersion_commands() {
        let cli = Cli::try_parse_from([
            "tern", "-c", "t.toml", "dispersion", "names", "--ring", "object", "--policy", "2",
            "--limit", "5",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
        let Commands::Dispersion {
            action: DispersionCommand::Names {
                ring,
                policy,
                limit,
            },
        } = cli.command
        else {
            panic!("expected dispersion names");
        };
        assert_eq!(RingType::from(ring), RingType::Object);
        assert_eq!(policy, 2);
        assert_eq!(limit, Some(5));

        assert!(Cli::try_parse_from(["tern", "dispersion", "names", "--ring", "account"]).is_err());
        assert!(Cli::try_parse_from(["tern", "dispersion", "report"]).is_ok());
    }

    #[test]
    fn test_ring_lifecycle_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let builder = dir.path().join("object.builder");
        let ring = dir.path().join("object.ring");

        run(&builder, &["create", "6", "2", "1"]).unwrap();
        assert!(run(&builder, &["create", "6", "2", "1"]).is_err());
        for zone in 1..=3 {
            let desc = format!("r1z{zone}-10.0.0.{zone}:6200/sdb_zone{zone}");
            run(&builder, &["add", &desc, "100"]).unwrap();
        }
        assert!(run(&builder, &["add", "not-a-device", "100"]).is_err());

        run(&builder, &["rebalance"]).unwrap();
        run(&builder, &["write_ring", ring.to_str().unwrap()]).unwrap();
        run(&builder, &["info"]).unwrap();
        run(&builder, &["load"]).unwrap();

        let loaded = Ring::load(&ring).unwrap();
        assert_eq!(loaded.part_power(), 6);

        run(&builder, &["set_weight", "--zone", "3", "50", "-y"]).unwrap();
        run(&builder, &["set_info", "--meta", "zone1", "--change-port", "6300", "-y"]).unwrap();
        run(&builder, &["remove", "--ip", "10.0.0.2", "-y"]).unwrap();
        run(&builder, &["set_overload", "0.1"]).unwrap();
        run(&builder, &["set_min_part_hours", "0"]).unwrap();
        run(&builder, &["pretend_min_part_hours_passed"]).unwrap();

        let state = RingBuilder::load(&builder).unwrap();
        assert_eq!(state.device(DeviceId::from(2)).unwrap().weight, 50.0);
        assert_eq!(state.device(DeviceId::from(0)).unwrap().port, 6300);
        assert!(state.device(DeviceId::from(1)).unwrap().deleted);
        assert_eq!(state.overload(), 0.1);
        assert_eq!(state.min_part_hours(), 0);
    }

    #[test]
    fn test_info_lists_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.builder");
        run(&path, &["create", "4", "1", "0"]).unwrap();
        run(&path, &["add", "r1z1-10.0.0.1:6200/sdb", "1"]).unwrap();
        run(&path, &["add", "r1z2-10.0.0.2:6200/sdc", "1"]).unwrap();
        run(&path, &["remove", "--ip", "10.0.0.2", "-y"]).unwrap();
        run(&path, &["info"]).unwrap();

        let builder = RingBuilder::load(&path).unwrap();
        let text = builder_text(&builder, &path);
        assert!(text.starts_with(&format!("{}, build version", path.display())));
        assert!(text.contains("The overload factor is 0.00%"));
        assert!(text.contains("\nID "));
        assert!(text.contains("10.0.0.1"));
        assert!(!text.contains("10.0.0.2"));
    }

    #[test]
    fn test_mutations_require_a_filter() {
        let dir = tempfile::tempdir().unwrap();
        let builder = dir.path().join("b.builder");
        run(&builder, &["create", "4", "1", "0"]).unwrap();
        run(&builder, &["add", "z1-10.0.0.1:6200/sdb", "1"]).unwrap();

        assert!(run(&builder, &["remove", "-y"]).is_err());
        assert!(run(&builder, &["set_info", "--zone", "1", "-y"]).is_err());
        // No match is not an error.
        run(&builder, &["set_weight", "--zone", "9", "2", "-y"]).unwrap();
        run(&builder, &["search"]).unwrap();
    }

    #[tokio::test]
    async fn test_names_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let rings = dir.path().join("rings");
        std::fs::create_dir_all(&rings).unwrap();
        let builder_path = dir.path().join("container.builder");
        run(&builder_path, &["create", "4", "1", "0"]).unwrap();
        run(&builder_path, &["add", "z1-10.0.0.1:6200/sdb", "1"]).unwrap();
        run(&builder_path, &["rebalance"]).unwrap();
        run(
            &builder_path,
            &["write_ring", rings.join("container.ring").to_str().unwrap()],
        )
        .unwrap();

        let mut config = CliConfig::default();
        config.rings.dir = rings;
        config.dispersion.workers = Some(2);
        cmd_names(&config, RingType::Container, 0, Some(3)).await.unwrap();
        cmd_names(&config, RingType::Container, 0, None).await.unwrap();
        assert!(cmd_names(&config, RingType::Object, 0, None).await.is_err());
    }
}
