//! folio-admin — operator commands against a folio data directory.
//!
//! Opens the store described by `FOLIO_*` environment variables, runs one
//! command and exits. Run it while the service is stopped, or against a
//! copy: RocksDB allows a single writer process.

mod args;

use std::process;

use chrono::Utc;
use folio_store::{FolioConfig, KvStore, Namespace, RankMode, Store};
use log::info;

use args::Command;

fn run(command: Command, config: &FolioConfig) -> folio_store::Result<()> {
    let store = Store::open(config)?;
    info!("Opened store at {}", store.kv().path().display());

    match command {
        Command::Stats { lang } => {
            let today = Utc::now().date_naive();
            println!("locale           {lang}");
            println!("users            {}", store.kv().count(&Namespace::users(&lang))?);
            println!("articles         {}", store.kv().count(&Namespace::feed(&lang))?);
            println!("visitors today   {}", store.daily_visitors(&lang, today)?);
            println!("visitors 7 days  {}", store.weekly_visitors(&lang, today)?);
        }
        Command::Repair { lang } => {
            let report = store.repair_relations(&lang)?;
            println!(
                "follows:   {} forward removed, {} forward restored",
                report.follows.forward_removed, report.follows.forward_restored
            );
            println!(
                "favorites: {} forward removed, {} forward restored",
                report.favorites.forward_removed, report.favorites.forward_restored
            );
        }
        Command::Top { lang, count } => {
            let count = count.unwrap_or(config.limits.page_size);
            for article in store.top(&lang, count, RankMode::Top)?.articles {
                println!(
                    "{:>8}  +{:<4} -{:<4} {:<16} {}",
                    article.id, article.plus, article.minus, article.author, article.title
                );
            }
        }
    }
    store.flush()
}

fn main() {
    env_logger::init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let command = match args::parse(&argv) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {e}\n\n{}", args::USAGE);
            process::exit(2);
        }
    };

    let config = FolioConfig::from_env();
    if let Err(e) = run(command, &config) {
        if let Some(detail) = e.detail() {
            log::error!("{detail}");
        }
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
