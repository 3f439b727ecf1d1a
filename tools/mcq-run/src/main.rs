use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mcq::DeviceConfig;
use mcq_run::{logger, run, Workload};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a synthetic workload on the simulated command processor")]
struct Opts {
    /// Device description (JSON). Built-in defaults when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 64)]
    jobs: usize,

    #[arg(long, default_value_t = 2)]
    sessions: usize,

    /// Submit every K-th job of a session at high priority.
    #[arg(long, value_name = "K")]
    high_every: Option<usize>,

    /// Hang core C on its first buffer to exercise recovery.
    #[arg(long, value_name = "C")]
    stall_core: Option<u8>,

    /// Buffers each session keeps in flight.
    #[arg(long, default_value_t = 4)]
    window: usize,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Opts {
    fn workload(&self) -> Workload {
        Workload {
            jobs: self.jobs,
            sessions: self.sessions,
            high_every: self.high_every,
            stall_core: self.stall_core,
            window: self.window,
        }
    }

    fn device_config(&self) -> Result<DeviceConfig> {
        let Some(path) = &self.config else {
            return Ok(DeviceConfig::default());
        };
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    logger::init(opts.verbose);

    let config = opts.device_config()?;
    info!(
        "{}: {} cores, {} slots",
        config.name,
        config.cores.len(),
        config.slots
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("installing Ctrl-C handler")?;
    }

    let report = run(config, &opts.workload(), &stop)?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
