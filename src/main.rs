use boothcounter::config::AppConfig;
use boothcounter::counters::{CounterStore, PRINTED, REMAINING_DUPLICATES, TAKEN};
use boothcounter::{PrinterStatus, SynchronizedCounters};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Interval of the host's idle poll, the tick that drives paper-out detection.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Stand-in for the photobooth printer driver, toggled from stdin.
#[derive(Debug)]
struct SimulatedPrinter {
    installed: bool,
    ready: bool,
}

impl PrinterStatus for SimulatedPrinter {
    fn is_installed(&self) -> bool {
        self.installed
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::locate(std::env::args_os().nth(1).map(PathBuf::from));
    let config = AppConfig::load(&config_path)?;

    let store = CounterStore::open(&config.counters.file, config.counters.schema())
        .map_err(|e| eyre!("Failed to open counters: {}", e))?;
    let counters = SynchronizedCounters::start(&config.mqtt, store).await;
    info!(
        "Counters ready (publishing {})",
        if counters.can_publish() { "enabled" } else { "disabled" }
    );

    let mut printer = SimulatedPrinter {
        installed: true,
        ready: true,
    };
    run_host(&counters, &mut printer).await;

    counters.on_shutdown().await;
    info!("Bye");
    Ok(())
}

/// Minimal photobooth loop: stdin commands plus a periodic poll tick.
async fn run_host(counters: &SynchronizedCounters, printer: &mut SimulatedPrinter) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = tokio::time::interval(POLL_INTERVAL);

    println!("commands: photo | print | paper-out | paper-in | wait | reset | show | quit");
    counters.on_enter_waiting();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => counters.on_poll_tick(&*printer).await,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };

                match line.trim() {
                    "photo" => {
                        if let Err(e) = counters.increment(TAKEN) {
                            warn!("{}", e);
                        }
                        counters.on_photo_pipeline_exit().await;
                    }
                    "print" => {
                        if let Err(e) = counters.increment(PRINTED) {
                            warn!("{}", e);
                        }
                        if let Ok(left) = counters.get(REMAINING_DUPLICATES) {
                            if let Err(e) =
                                counters.set(REMAINING_DUPLICATES, left.saturating_sub(1))
                            {
                                warn!("{}", e);
                            }
                        }
                        counters.on_print_pipeline_exit(&*printer).await;
                    }
                    "paper-out" => printer.ready = false,
                    "paper-in" => printer.ready = true,
                    "wait" => counters.on_enter_waiting(),
                    "reset" => counters.reset().await,
                    "show" => println!("{:?} {:?}", counters.values(), counters.connection_state()),
                    "quit" => break,
                    "" => {}
                    other => println!("unknown command '{}'", other),
                }
            }
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
