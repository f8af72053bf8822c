use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use qvm::cli::{Cli, Command, VmAction, VmArgs};
use qvm::config::{self, SystemConfig};
use qvm::error::QvmError;
use qvm::logging::LaunchLog;
use qvm::paths;
use qvm::process::HostLauncher;
use qvm::vm::{CreateOptions, StartOptions, VmManager};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let terminal_filter = if cli.verbose {
        EnvFilter::new("qvm=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qvm=warn"))
    };
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer stays silent until a launching command attaches a file.
    let launch_log = LaunchLog::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(launch_log.clone())
        .with_filter(EnvFilter::new("qvm=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let sys_config = config::load_config(cli.config.as_deref())?;
    match &sys_config.config_path {
        Some(path) => tracing::debug!(path = %path.display(), "loaded config"),
        None => tracing::debug!("no config file, using defaults"),
    }

    match cli.command {
        Command::Vm(args) => run_vm(&sys_config, &launch_log, args).await?,
    }

    Ok(())
}

async fn run_vm(sys: &SystemConfig, launch_log: &LaunchLog, args: VmArgs) -> Result<(), QvmError> {
    let launcher = HostLauncher;
    let vm = VmManager::new(sys, &launcher);

    if args.action.launches() {
        let log_path = paths::log_file(&sys.layout);
        if let Err(e) = launch_log.attach(&log_path) {
            tracing::warn!(path = %log_path.display(), error = %e, "could not open log file");
        }
    }

    let machine = sys.machine();
    let vnc_display = args.vnc_display.unwrap_or(machine.vnc_display);
    let bridge = args.bridge.unwrap_or_else(|| machine.bridge.clone());
    let name = || args.name.as_deref().ok_or(QvmError::MissingName);

    let outcome = match args.action {
        VmAction::List => {
            let discovery = vm.list().await?;
            for stale in &discovery.pruned {
                eprintln!("Error interacting with VM: {}", stale.reason);
            }
            for handle in &discovery.running {
                println!("{handle}");
            }
            return Ok(());
        }
        VmAction::Create => {
            let name = name()?;
            let iso = args.iso.ok_or(QvmError::MissingIso)?;
            let opts = CreateOptions {
                iso,
                size: args.size,
                vnc_display,
                bridge,
                force: args.force,
            };
            vm.create(name, &opts).await?
        }
        VmAction::Start => {
            vm.start(name()?, &StartOptions {
                vnc_display,
                bridge,
            })
            .await?
        }
        VmAction::State => vm.state(name()?).await?,
        VmAction::Stop => vm.stop(name()?).await?,
        VmAction::Cont => vm.cont(name()?).await?,
        VmAction::Powerdown => vm.powerdown(name()?).await?,
    };

    println!("{outcome}");
    Ok(())
}
