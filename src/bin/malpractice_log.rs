//! malpractice_log - inspect and review recorded malpractice events.
//!
//! Events are printed as JSON lines on stdout. Verification is the reviewer's
//! decision; the monitor itself always records events unverified.

use anyhow::Result;
use clap::{Parser, Subcommand};

use exam_invigilator::{EventFilter, MalpracticeStore, SqliteMalpracticeStore};

#[derive(Parser, Debug)]
#[command(
    name = "malpractice_log",
    about = "List and review recorded malpractice events"
)]
struct Args {
    /// Path to the malpractice SQLite DB
    #[arg(long, env = "INVIGILATOR_DB_PATH", default_value = "invigilator.db")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a lecture hall so events can reference it
    AddHall {
        #[arg(long)]
        name: String,
        #[arg(long)]
        building: String,
    },
    /// Print events as JSON lines, oldest first
    List {
        #[arg(long, conflicts_with = "verified")]
        unverified: bool,
        #[arg(long)]
        verified: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Mark an event as reviewed and confirmed
    Verify { id: i64 },
    /// Clear the verified flag of an event
    Unverify { id: i64 },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut store = SqliteMalpracticeStore::open(&args.db)?;

    match args.command {
        Command::AddHall { name, building } => {
            let id = store.add_lecture_hall(&name, &building)?;
            println!("{}", id);
        }
        Command::List {
            unverified,
            verified,
            limit,
        } => {
            let filter = EventFilter {
                verified: match (verified, unverified) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                limit,
            };
            for event in store.list_events(&filter)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Command::Verify { id } => {
            store.set_verified(id, true)?;
            log::info!("event {} verified", id);
        }
        Command::Unverify { id } => {
            store.set_verified(id, false)?;
            log::info!("event {} marked unverified", id);
        }
    }
    Ok(())
}
