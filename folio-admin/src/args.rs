//! Command-line argument parsing.

/// Operator commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Record counts and visitor numbers of one locale
    Stats { lang: String },
    /// Reconcile one-sided follow and favorite entries
    Repair { lang: String },
    /// Print the current top list
    Top { lang: String, count: Option<usize> },
}

pub const USAGE: &str = "\
Usage: folio-admin <command> <lang> [args]

Commands:
  stats <lang>        record counts and visitors
  repair <lang>       reconcile relation indexes
  top <lang> [n]      print the n best recent articles

Environment:
  FOLIO_DATA_DIR, FOLIO_PAGE_SIZE, FOLIO_SYNC_WRITES, FOLIO_VIEW_FLUSH_SECS, RUST_LOG";

/// Parse `args` (without the program name).
pub fn parse(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Err("missing command".into());
    };
    let lang = args
        .get(1)
        .cloned()
        .ok_or_else(|| format!("{command} requires a locale"))?;

    match command.as_str() {
        "stats" => Ok(Command::Stats { lang }),
        "repair" => Ok(Command::Repair { lang }),
        "top" => {
            let count = match args.get(2) {
                Some(n) => Some(n.parse().map_err(|_| format!("invalid count '{n}'"))?),
                None => None,
            };
            Ok(Command::Top { lang, count })
        }
        other => Err(format!("unknown command '{other}'")),
    }
}
