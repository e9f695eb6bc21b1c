use std::io::{stdin, stdout, BufReader, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use human_panic::setup_panic;
use log::info;

use kvdb_cli::session::Session;
use kvdb_cli::trace;

#[derive(Debug, Parser)]
#[command(version, author, about = "A command-line front end over the kvdb control plane")]
struct Args {
    /// Directory for the daily-rolling log file.
    #[clap(short = 'd', long = "log-dir", default_value = "./.kvdb-cli")]
    log_dir: String,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Run a single command instead of starting an interactive session.
    #[clap(long)]
    query: Option<String>,
}

fn main() -> Result<()> {
    setup_panic!();

    let args = Args::parse();
    let _guards = trace::init_logging(&args.log_dir, &args.log_level)?;
    info!("kvdb-cli starting with args: {:?}", &args);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("received Ctrl+C, exiting");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut session = Session::new()?;

    match args.query {
        Some(query) => {
            session.handle_reader(std::io::Cursor::new(query), stdout())?;
        }
        None if stdin().is_terminal() => {
            println!("kvdb-cli: type 'help' for commands, 'quit' to exit.");
            session.handle_reader(BufReader::new(stdin()), stdout())?;
        }
        None => {
            session.handle_reader(BufReader::new(stdin()), stdout())?;
        }
    }

    Ok(())
}
