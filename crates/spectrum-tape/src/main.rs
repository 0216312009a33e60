//! tape-tool - inspect, edit and play ZX Spectrum tapes from the command line
//!
//! # Commands
//!
//! - `tape-tool list game.tzx` - One line per block
//! - `tape-tool rename game.tap 1 LOADER` - Rename a header block
//! - `tape-tool move game.tap 1 4 5` - Move blocks 4 and 5 before block 1
//! - `tape-tool remove game.tap 3` - Remove block 3
//! - `tape-tool play game.tzx` - Play the tape headless and report timing
//!
//! Block numbers are 1-based, as in the listing. Set `RUST_LOG=debug` to
//! trace block transitions during `play`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use spectrum_tape::{RenameOutcome, TapeConfig, TapeDeck};
use tracing_subscriber::EnvFilter;

/// Inspect, edit and play ZX Spectrum TAP/TZX tapes
#[derive(Parser)]
#[command(name = "tape-tool")]
#[command(version)]
struct Cli {
    /// Tape deck configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the blocks on a tape
    List {
        tape: PathBuf,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rename a header block
    Rename {
        tape: PathBuf,
        block: usize,
        name: String,
    },

    /// Move blocks so they sit before another block
    Move {
        tape: PathBuf,
        /// Destination; one past the last block moves to the end
        before: usize,
        #[arg(required = true)]
        blocks: Vec<usize>,
    },

    /// Remove blocks
    Remove {
        tape: PathBuf,
        #[arg(required = true)]
        blocks: Vec<usize>,
    },

    /// Play the whole tape without a machine attached
    Play {
        tape: PathBuf,
        /// Give up after this much tape time
        #[arg(long, default_value_t = 3600)]
        max_seconds: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TapeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TapeConfig::default(),
    };
    let mut deck = TapeDeck::new(config);

    match cli.command {
        Commands::List { tape, json } => list(&mut deck, &tape, json),
        Commands::Rename { tape, block, name } => {
            insert(&mut deck, &tape)?;
            match deck.rename(ordinal(block)?, &name)? {
                RenameOutcome::Renamed => println!("Renamed block {block}"),
                RenameOutcome::Truncated => println!("Renamed block {block} (name truncated)"),
            }
            Ok(())
        }
        Commands::Move {
            tape,
            before,
            blocks,
        } => {
            insert(&mut deck, &tape)?;
            for block in blocks {
                deck.toggle_select(ordinal(block)?)?;
            }
            deck.move_selected(ordinal(before)?)?;
            Ok(())
        }
        Commands::Remove { tape, blocks } => {
            insert(&mut deck, &tape)?;
            for block in blocks {
                deck.toggle_select(ordinal(block)?)?;
            }
            let removed = deck.remove_selected()?;
            println!("Removed {removed} blocks");
            Ok(())
        }
        Commands::Play { tape, max_seconds } => play(&mut deck, &tape, max_seconds),
    }
}

fn insert(deck: &mut TapeDeck, tape: &Path) -> Result<()> {
    deck.insert(tape)
        .with_context(|| format!("failed to insert {}", tape.display()))
}

/// Convert a 1-based block number.
fn ordinal(block: usize) -> Result<usize> {
    match block.checked_sub(1) {
        Some(ordinal) => Ok(ordinal),
        None => bail!("block numbers start at 1"),
    }
}

fn list(deck: &mut TapeDeck, tape: &Path, json: bool) -> Result<()> {
    insert(deck, tape)?;
    let listing = deck.listing()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for summary in &listing {
            println!("{summary}");
        }
    }
    Ok(())
}

fn play(deck: &mut TapeDeck, tape: &Path, max_seconds: u64) -> Result<()> {
    insert(deck, tape)?;
    let count = deck.block_count()?;
    let clock = u64::from(deck.config().clock_hz());
    let limit = max_seconds.saturating_mul(clock);
    let mut ticks = vec![0u64; count];
    let mut total = 0u64;
    let mut stops = 0usize;

    deck.play()?;
    loop {
        if !deck.is_playing() {
            // Finished, or stopped on the last block and rewound.
            if deck.is_finished() || deck.current_block() == 0 {
                break;
            }
            // Stop-the-tape block: press play again.
            stops += 1;
            deck.play()?;
        }
        let block = deck.current_block();
        let played = deck.advance(deck.ticks_until_edge())?;
        if let Some(slot) = ticks.get_mut(block) {
            *slot += played;
        }
        total += played;
        if total > limit {
            bail!("tape still playing after {max_seconds} s (block {})", block + 1);
        }
    }

    for (summary, ticks) in deck.listing()?.iter().zip(&ticks) {
        println!("{:<48} {ticks:>12}", summary.to_string());
    }
    println!(
        "Total {total} T-states ({:.1} s), {stops} stops",
        total as f64 / clock as f64
    );
    Ok(())
}
