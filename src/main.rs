use clap::{ArgGroup, Parser};
use snapctx::host::{self, Outcome};
use snapctx::options::{parse_address, parse_size, Mode, Options};
use snapctx::region::Layout;
use snapctx::tasks::{CounterSpec, Task};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

// Global start time for dmesg-style logging
static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "snapctx")]
#[command(about = "checkpoint and restore a running task through a fixed-address region")]
#[command(group(ArgGroup::new("mode").required(true).args(["count", "restore", "interactive"])))]
struct Args {
    /// Checkpoint when the counter reaches this value
    #[arg(value_name = "COUNT", requires = "file", value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,

    /// Snapshot file to write
    #[arg(value_name = "FILE", requires = "count")]
    file: Option<PathBuf>,

    /// Restore from a snapshot file
    #[arg(short, long, value_name = "FILE")]
    restore: Option<PathBuf>,

    /// Start an interactive guest session that saves to FILE
    #[arg(short, long, value_name = "FILE")]
    interactive: Option<PathBuf>,

    /// Fixed address of the state region
    #[arg(long, value_name = "ADDR", value_parser = parse_address, default_value = "0x40000000")]
    base: usize,

    /// Size of the task stack
    #[arg(long, value_name = "BYTES", value_parser = parse_size, default_value = "256K")]
    stack_size: usize,

    /// Size of the heap arena
    #[arg(long, value_name = "BYTES", value_parser = parse_size, default_value = "8M")]
    heap_size: usize,

    /// Delay between counter steps
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Stop counting and exit once the counter reaches N
    #[arg(long, value_name = "N")]
    until: Option<u64>,

    /// Keep counting after the checkpoint instead of exiting
    #[arg(long)]
    keep_running: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_options(self) -> snapctx::Result<Options> {
        let layout = Layout::new(self.base, self.stack_size, self.heap_size)?;

        let mode = match (self.restore, self.interactive, self.count, self.file) {
            (Some(snapshot), _, _, _) => Mode::Restore { snapshot },
            (_, Some(snapshot), _, _) => Mode::Fresh {
                task: Task::Scratchpad,
                snapshot,
            },
            (_, _, Some(target), Some(snapshot)) => Mode::Fresh {
                task: Task::Counter(CounterSpec {
                    target,
                    until: self.until,
                    interval: Duration::from_millis(self.interval_ms),
                    keep_running: self.keep_running,
                }),
                snapshot,
            },
            // the "mode" group and the count/file requirements rule this out
            _ => unreachable!("clap accepted arguments without a mode"),
        };

        Ok(Options { layout, mode })
    }
}

fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    START_TIME.get_or_init(Instant::now);

    // Initialize logging with dmesg-style timestamps
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format(|buf, record| {
            use std::io::Write;

            let elapsed = START_TIME.get_or_init(Instant::now).elapsed();
            let secs = elapsed.as_secs();
            let micros = elapsed.subsec_micros();

            // Format like dmesg: [  123.456789] LEVEL message
            writeln!(
                buf,
                "[{:5}.{:06}] {} {}",
                secs,
                micros,
                record.level(),
                record.args()
            )
        })
        .init();

    let options = args.into_options()?;

    host::pin_address_space()?;

    match &options.mode {
        Mode::Fresh { task, snapshot } => {
            log::info!("Starting {:?}, snapshot file {}", task, snapshot.display())
        }
        Mode::Restore { snapshot } => log::info!("Restoring from {}", snapshot.display()),
    }

    match host::drive(&options)? {
        Outcome::SavedAndExited => log::debug!("Snapshot written, exiting"),
        Outcome::Finished => log::debug!("Task finished"),
    }

    Ok(())
}
