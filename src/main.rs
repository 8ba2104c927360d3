//! LED Exposure CLI
//!
//! Runs the frame producer, reports stream health, and drives the
//! exposure controller against the live stream or a simulated scene.

use clap::{Parser, Subcommand};
use led_exposure::{
    analysis::{ChannelSelector, ExposureTargets},
    config::FileConfig,
    control::{
        Actuator, ControllerStatus, ExposureController, SimulatedPanel, SimulatedScene,
        TimerScheduler,
    },
    metrics::{MetricsRegistry, MetricsSnapshot},
    stream::{build_command, FrameSource, FrameStreamSupervisor, StreamHealth, SupportedFlags},
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "led-exposure", version, about = "Closed-loop LED exposure control")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ControlArgs {
    /// Actuator channel to regulate
    #[arg(long, default_value = "weiß")]
    channel: String,

    /// Histogram channel: gray, r, g or b
    #[arg(long, default_value = "gray")]
    selector: ChannelSelector,

    /// Initial step in percentage points
    #[arg(long, default_value_t = 20.0)]
    step: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Print the producer command line
    Command,
    /// Run the stream and log health until Ctrl-C
    Stream {
        /// Seconds between reports
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Run the controller against the live stream
    Auto(ControlArgs),
    /// Run the controller against a simulated scene
    Simulate {
        #[command(flatten)]
        control: ControlArgs,

        /// Channel percent at which the scene is exposed on target
        #[arg(long, default_value_t = 50.0)]
        reference: f64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };

    info!("LED Exposure v{}", led_exposure::VERSION);

    let result = match cli.command {
        Command::Command => {
            print_command(&config);
            Ok(())
        }
        Command::Stream { interval } => run_stream(&config, Duration::from_secs(interval.max(1))),
        Command::Auto(args) => run_auto(&config, &args),
        Command::Simulate { control, reference } => run_simulate(&config, &control, reference),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn print_command(config: &FileConfig) {
    let supported = SupportedFlags::query(&config.stream.program, Duration::from_secs(2));
    println!("{}", build_command(&config.stream, &supported).join(" "));
}

/// Installs a Ctrl-C handler and returns the flag it clears.
fn shutdown_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
    running
}

fn run_stream(config: &FileConfig, interval: Duration) -> CliResult {
    let supervisor = FrameStreamSupervisor::new(config.stream.clone())?;
    supervisor.start()?;
    info!("Producer: {}", supervisor.effective_command().join(" "));

    let metrics = Metrics::start(config.metrics.port)?;
    let running = shutdown_flag();

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        let health = supervisor.health_snapshot();
        metrics.publish(&health, None);

        match supervisor.latest_frame() {
            Some(frame) => {
                let fractions = config.targets.measure(&frame, ChannelSelector::Luma);
                info!(
                    frames = health.frames_decoded,
                    dropped = health.frames_dropped,
                    alive = health.process_alive,
                    low = fractions.low_fraction,
                    high = fractions.high_fraction,
                    "Stream health"
                );
            }
            None => {
                warn!(
                    alive = health.process_alive,
                    exit_code = ?health.last_exit_code,
                    "No frame yet"
                );
                for line in supervisor.last_diagnostics(5).lines() {
                    warn!("  {}", line);
                }
            }
        }
    }

    supervisor.stop();
    info!("Done");
    Ok(())
}

fn run_auto(config: &FileConfig, args: &ControlArgs) -> CliResult {
    let supervisor = Arc::new(FrameStreamSupervisor::new(config.stream.clone())?);
    supervisor.start()?;
    info!("Producer: {}", supervisor.effective_command().join(" "));

    let panel = Arc::new(SimulatedPanel::new());
    let outcome = run_controller(config, args, supervisor.clone(), panel, || {
        Some(supervisor.health_snapshot())
    });
    supervisor.stop();
    outcome
}

fn run_simulate(config: &FileConfig, args: &ControlArgs, reference: f64) -> CliResult {
    let panel = Arc::new(SimulatedPanel::new());
    let scene = SimulatedScene::new(panel.clone(), args.channel.clone()).with_reference(reference);
    let scene = Arc::new(scene);
    run_controller(config, args, scene, panel, || None)
}

/// Runs one controller pass until it leaves `Running` or Ctrl-C.
fn run_controller(
    config: &FileConfig,
    args: &ControlArgs,
    source: Arc<dyn FrameSource>,
    panel: Arc<SimulatedPanel>,
    health: impl Fn() -> Option<StreamHealth>,
) -> CliResult {
    let scheduler = Arc::new(TimerScheduler::new()?);
    let controller =
        ExposureController::new(config.controller.clone(), source, panel.clone(), scheduler)?;

    let metrics = Metrics::start(config.metrics.port)?;
    let last_status: Arc<Mutex<Option<ControllerStatus>>> = Arc::new(Mutex::new(None));
    {
        let last_status = Arc::clone(&last_status);
        controller.on_update(move |status| {
            info!(
                channel = %status.channel,
                selector = %status.channel_selector,
                low = status.low_fraction,
                high = status.high_fraction,
                direction = status.direction.signum(),
                step = status.step_size,
                value = ?status.applied_value,
                cycle = status.cycle,
                "Tick"
            );
            *last_status.lock() = Some(status.clone());
        });
    }

    let targets: ExposureTargets = config.targets;
    controller.start(&args.channel, args.selector, targets, args.step)?;

    let running = shutdown_flag();
    while running.load(Ordering::SeqCst) && controller.is_running() {
        std::thread::sleep(Duration::from_millis(200));
        let health = health().unwrap_or_default();
        metrics.publish(&health, last_status.lock().as_ref());
    }

    let phase = controller.phase();
    controller.stop();
    info!(
        phase = ?phase,
        value = ?panel.get_channel(&args.channel).ok(),
        "Controller finished"
    );
    Ok(())
}

/// Prometheus registry, kept in-process.
#[cfg(not(feature = "metrics"))]
struct Metrics {
    registry: MetricsRegistry,
}

#[cfg(not(feature = "metrics"))]
impl Metrics {
    fn start(_port: u16) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            registry: MetricsRegistry::new()?,
        })
    }

    fn publish(&self, health: &StreamHealth, status: Option<&ControllerStatus>) {
        self.registry
            .update(&MetricsSnapshot::from_components(health, status));
    }
}

/// Prometheus registry served over HTTP unless the port is 0.
#[cfg(feature = "metrics")]
enum Metrics {
    Local(MetricsRegistry),
    Served(Arc<led_exposure::metrics::MetricsState>),
}

#[cfg(feature = "metrics")]
impl Metrics {
    fn start(port: u16) -> Result<Self, Box<dyn std::error::Error>> {
        use led_exposure::metrics::{MetricsServer, MetricsServerConfig};

        if port == 0 {
            return Ok(Self::Local(MetricsRegistry::new()?));
        }

        let config = MetricsServerConfig::with_port(port);
        let server = MetricsServer::new(config, MetricsRegistry::new()?);
        let state = server.state();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("metrics-server".into())
            .spawn(move || {
                if let Err(e) = runtime.block_on(server.run()) {
                    warn!("Metrics server stopped: {}", e);
                }
            })?;

        Ok(Self::Served(state))
    }

    fn publish(&self, health: &StreamHealth, status: Option<&ControllerStatus>) {
        let snapshot = MetricsSnapshot::from_components(health, status);
        match self {
            Self::Local(registry) => registry.update(&snapshot),
            Self::Served(state) => state.update(health.clone(), &snapshot),
        }
    }
}
