//! Volume Export Operator
//!
//! Thin admin binary over the driver layer: wires a driver, an executor and
//! a registry together and runs one volume lifecycle operation per
//! invocation. Slot-allocating flows span processes only when the drivers
//! are pointed at a durable registry; this binary runs standalone with the
//! in-memory one, which is enough for setup checks, volume management, path
//! resolution and discovery against stored provider locations.

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_export_operator::{
    DriverConfig, DriverFactory, Error, Executor, ExecutorConfig, MemoryRegistry, Result, Volume,
    VolumeDriver,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Export Operator - block-storage export driver harness
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Volume driver to use (aoe, iscsi, rbd, sheepdog)
    #[arg(long, env = "VOLUME_DRIVER", default_value = "iscsi")]
    driver: String,

    /// Name for the VG that contains exported volumes
    #[arg(long, env = "VOLUME_GROUP", default_value = "export-volumes")]
    volume_group: String,

    /// Number of times to attempt flakey shell commands
    #[arg(long, env = "NUM_SHELL_TRIES", default_value = "3")]
    num_shell_tries: u32,

    /// Network device to export AoE volumes on
    #[arg(long, env = "AOE_ETH_DEV", default_value = "eth0")]
    aoe_eth_dev: String,

    /// Number of vblade shelves per host
    #[arg(long, env = "NUM_SHELVES", default_value = "100")]
    num_shelves: u32,

    /// Number of vblade blades per shelf
    #[arg(long, env = "BLADES_PER_SHELF", default_value = "16")]
    blades_per_shelf: u32,

    /// Number of iscsi target ids per host
    #[arg(long, env = "ISCSI_NUM_TARGETS", default_value = "100")]
    iscsi_num_targets: u32,

    /// Prefix for iscsi target names
    #[arg(
        long,
        env = "ISCSI_TARGET_PREFIX",
        default_value = "iqn.2010-10.org.openstack:"
    )]
    iscsi_target_prefix: String,

    /// Discover volumes on portals that start with this prefix
    #[arg(long, env = "ISCSI_IP_PREFIX", default_value = "")]
    iscsi_ip_prefix: String,

    /// The rbd pool in which volumes are stored
    #[arg(long, env = "RBD_POOL", default_value = "rbd")]
    rbd_pool: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct VolumeArgs {
    /// Unique volume identifier
    #[arg(long)]
    id: String,

    /// Symbolic volume name
    #[arg(long)]
    name: String,

    /// Size in whole gigabytes; zero maps to a fixed minimum
    #[arg(long, default_value = "0")]
    size_gb: u64,

    /// Host the volume is exported from
    #[arg(long)]
    host: String,

    /// Stored provider location, if any
    #[arg(long)]
    provider_location: Option<String>,

    /// Stored provider auth triple, if any
    #[arg(long)]
    provider_auth: Option<String>,
}

impl VolumeArgs {
    fn into_volume(self) -> Volume {
        let mut volume = Volume::new(self.id, self.name, self.size_gb, self.host);
        volume.provider_location = self.provider_location;
        volume.provider_auth = self.provider_auth;
        volume
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the driver's prerequisites are met
    CheckSetup,
    /// Create backing storage for a volume
    Create(VolumeArgs),
    /// Create a volume, export it, and print the updated record
    Export(VolumeArgs),
    /// Recreate an export after a restart
    EnsureExport(VolumeArgs),
    /// Discover an exported volume and print its device path
    Discover(VolumeArgs),
    /// Undo a discovery on this host
    Undiscover(VolumeArgs),
    /// Tear down an export
    RemoveExport(VolumeArgs),
    /// Delete a volume's backing storage
    Delete(VolumeArgs),
    /// Verify an export against live protocol state
    Verify {
        /// Volume identifier to verify
        #[arg(long)]
        volume_id: String,
    },
    /// Print the local device path convention for a volume
    LocalPath(VolumeArgs),
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    info!("Starting volume export operator");
    info!("  Version: {}", volume_export_operator::VERSION);
    info!("  Driver: {}", cli.driver);

    let config = DriverConfig {
        lvm: volume_export_operator::LvmConfig {
            volume_group: cli.volume_group.clone(),
        },
        aoe: volume_export_operator::AoeConfig {
            eth_dev: cli.aoe_eth_dev.clone(),
            num_shelves: cli.num_shelves,
            blades_per_shelf: cli.blades_per_shelf,
            ..Default::default()
        },
        iscsi: volume_export_operator::IscsiConfig {
            num_targets: cli.iscsi_num_targets,
            target_prefix: cli.iscsi_target_prefix.clone(),
            ip_prefix: cli.iscsi_ip_prefix.clone(),
        },
        rbd: volume_export_operator::RbdConfig {
            pool: cli.rbd_pool.clone(),
        },
    };

    let executor = Executor::system(ExecutorConfig {
        max_tries: cli.num_shell_tries,
    });
    let registry = MemoryRegistry::new();
    let driver = DriverFactory::create(&cli.driver, config, executor, registry)?;

    match cli.command {
        Command::CheckSetup => {
            driver.check_for_setup_error().await?;
            println!("{} driver prerequisites are met", driver.protocol());
        }
        Command::Create(args) => {
            let volume = args.into_volume();
            driver.create_volume(&volume).await?;
            println!("created {}", volume.id);
        }
        Command::Export(args) => {
            let mut volume = args.into_volume();
            driver.create_volume(&volume).await?;
            driver.create_export(&mut volume).await?;
            print_record(&volume)?;
        }
        Command::EnsureExport(args) => {
            let volume = args.into_volume();
            driver.ensure_export(&volume).await?;
            println!("ensured export for {}", volume.id);
        }
        Command::Discover(args) => {
            let mut volume = args.into_volume();
            let device = driver.discover_volume(&mut volume).await?;
            println!("{device}");
            print_record(&volume)?;
        }
        Command::Undiscover(args) => {
            let volume = args.into_volume();
            driver.undiscover_volume(&volume).await?;
            println!("undiscovered {}", volume.id);
        }
        Command::RemoveExport(args) => {
            let volume = args.into_volume();
            driver.remove_export(&volume).await?;
            println!("removed export for {}", volume.id);
        }
        Command::Delete(args) => {
            let volume = args.into_volume();
            driver.delete_volume(&volume).await?;
            println!("deleted {}", volume.id);
        }
        Command::Verify { volume_id } => {
            driver.check_for_export(&volume_id).await?;
            println!("export for {volume_id} is active");
        }
        Command::LocalPath(args) => {
            let volume = args.into_volume();
            println!("{}", driver.local_path(&volume));
        }
    }

    Ok(())
}

fn print_record(volume: &Volume) -> Result<()> {
    let rendered = serde_json::to_string_pretty(volume)
        .map_err(|err| Error::Configuration(format!("cannot render volume record: {err}")))?;
    println!("{rendered}");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
