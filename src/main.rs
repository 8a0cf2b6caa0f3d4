use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use ticketdb::domain::Dispatcher;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ticketdb_data"));
    log::info!("opening ticket database at {data_dir:?}");

    let mut dispatcher = Dispatcher::open(&data_dir);
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let (response, keep_going) = dispatcher.dispatch(&line);
        if !response.is_empty() {
            writeln!(out, "{response}")?;
        }
        if !keep_going {
            break;
        }
    }

    Ok(())
}
