//! `convolver`: command-line interface for the convolver overlay.
//!
//! ```text
//! USAGE:
//!   convolver setup                          Reset and program the adapter
//!   convolver convolve <image> [--side N]    Run one image through the network
//!   convolver convolve --zeros N [--timed]   Run an all-zero N×N image
//!   convolver dump [--registers]             Decoded or raw adapter registers
//!   convolver status                         Control and status words
//!   convolver geometry <n>                   Layer sizes for an n×n input
//!   convolver config                         Print the resolved configuration
//! ```
//!
//! Every command accepts `--config <file>` (falls back to `CONVOLVER_CONFIG`)
//! and `--simulate` to run against the in-memory overlay instead of
//! `/dev/mem`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convolver_driver::{Image, Session, SessionConfig, SimulatedAccelerator};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convolver", about = "Convolver overlay host CLI", version)]
struct Cli {
    /// Session configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the simulated overlay instead of the hardware.
    #[arg(long, global = true)]
    simulate: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Reset the adapter and program slots, length mode and kernel.
    Setup,
    /// Convolve one image and print the output map.
    Convolve {
        /// Raw 8-bit or binary PGM image.
        #[arg(required_unless_present = "zeros")]
        image: Option<PathBuf>,
        /// Side length of a raw image (inferred from the file size if omitted).
        #[arg(long)]
        side: Option<usize>,
        /// Use an all-zero image of this side length.
        #[arg(long, conflicts_with = "image")]
        zeros: Option<usize>,
        /// Time execute-to-drain and append it to the timing log.
        #[arg(long)]
        timed: bool,
        /// Write hex/binary output dumps into this directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print adapter registers.
    Dump {
        /// Raw word dump instead of the decoded snapshot.
        #[arg(long)]
        registers: bool,
    },
    /// Print decoded control and status words.
    Status,
    /// Print the layer sizes for an n×n input (no hardware access).
    Geometry {
        /// Input side length.
        n: usize,
    },
    /// Print the resolved configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::resolve(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Cmd::Setup => cmd_setup(config, cli.simulate)?,
        Cmd::Convolve {
            image,
            side,
            zeros,
            timed,
            output_dir,
        } => {
            let image = match (image, zeros) {
                (_, Some(n)) => Image::zeros(n)?,
                (Some(path), None) => load_image(&path, side)?,
                (None, None) => anyhow::bail!("no image given"),
            };
            cmd_convolve(config, cli.simulate, &image, timed, output_dir)?;
        }
        Cmd::Dump { registers } => cmd_dump(config, cli.simulate, registers)?,
        Cmd::Status => cmd_status(config, cli.simulate)?,
        Cmd::Geometry { n } => cmd_geometry(&config, n),
        Cmd::Config => print!("{}", config.to_toml_string()?),
    }

    Ok(())
}

fn load_image(path: &Path, side: Option<usize>) -> Result<Image> {
    Image::load(path, side).with_context(|| format!("reading {}", path.display()))
}

fn open_session(config: SessionConfig, simulate: bool) -> Result<Session> {
    if simulate {
        let sim = SimulatedAccelerator::new(config.network());
        return Ok(Session::simulated(&sim, config));
    }
    Session::open(config).context("opening overlay (try --simulate without hardware)")
}

fn cmd_setup(config: SessionConfig, simulate: bool) -> Result<()> {
    let mut session = open_session(config, simulate)?;
    session.setup()?;
    println!("Session {}", session.state());
    println!();
    println!("{}", session.debug_snapshot());
    Ok(())
}

fn cmd_convolve(
    mut config: SessionConfig,
    simulate: bool,
    image: &Image,
    timed: bool,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    if output_dir.is_some() {
        config.diagnostics.output_dir = output_dir;
    }
    let timing_log = config.diagnostics.timing_log.clone();

    let mut session = open_session(config, simulate)?;
    session.setup()?;

    let out = if timed {
        session.convolve_timed(image)?
    } else {
        session.convolve(image)?
    };

    println!(
        "Input {}x{} → output {}x{}",
        image.width(),
        image.height(),
        out.dim,
        out.dim
    );
    if let Some(elapsed) = out.elapsed {
        println!(
            "Elapsed: {:.6} s (appended to {})",
            elapsed.as_secs_f64(),
            timing_log.display()
        );
    }
    for (i, value) in out.output_scalars.iter().enumerate() {
        println!("oscalar{i} = {value}");
    }
    println!();
    for row in out.rows() {
        let line: Vec<String> = row.iter().map(|w| format!("{w:08x}")).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}

fn cmd_dump(config: SessionConfig, simulate: bool, raw: bool) -> Result<()> {
    let session = open_session(config, simulate)?;
    if raw {
        for value in session.dump_registers() {
            println!("{value}");
        }
    } else {
        println!("{}", session.debug_snapshot());
    }
    Ok(())
}

fn cmd_status(config: SessionConfig, simulate: bool) -> Result<()> {
    let session = open_session(config, simulate)?;
    let regs = session.registers();
    let control = regs.control();
    let status = regs.status();

    println!("CTRL   = {:#010x}", regs.read_control());
    println!("  reset:            {}", control.reset);
    println!("  interrupt enable: {}", control.global_interrupt_enable);
    println!("STATUS = {:#010x}", regs.read_status());
    println!("  start: {}", status.start);
    println!("  done:  {}", status.done);
    println!("  idle:  {}", status.idle);
    println!("  ready: {}", status.ready);
    if status.is_fault() {
        println!("  unknown bits: {:#010x}", status.unknown_bits);
    }
    Ok(())
}

fn cmd_geometry(config: &SessionConfig, n: usize) {
    let net = config.network();
    println!(
        "Stages: {}  padding: {}  kernel: {}  pool: {}",
        net.stages, net.padding, net.kernel, net.pool
    );
    println!();
    for (layer, size) in net.layer_sizes(n).iter().enumerate() {
        println!("  layer {layer}: {size}x{size}");
    }
    match net.output_dim(n) {
        Some(dim) => println!("Output: {dim}x{dim} ({} words)", dim * dim),
        None => println!("Output: none ({n}x{n} is too small for this network)"),
    }
}
