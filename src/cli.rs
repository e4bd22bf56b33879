//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Parser)]
#[command(name = "sqlhub", version, about = "Store, version, fork and browse SQLite databases")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, global = true, env = "SQLHUB_CONFIG")]
    pub config: Option<PathBuf>,
    /// Act as this user. Reads without it are anonymous.
    #[arg(short = 'u', long = "as", global = true, env = "SQLHUB_USER")]
    pub viewer: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a database file as the next version.
    Upload {
        file: PathBuf,
        /// Defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        public: bool,
        #[arg(long, default_value = "")]
        description: String,
        /// Markdown file with the full description.
        #[arg(long)]
        readme: Option<PathBuf>,
    },
    /// Fork someone else's database into your own account.
    Fork {
        database: DatabaseRef,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Show one page of a table.
    Table(TableArgs),
    /// List the tables of a database version.
    Tables {
        database: DatabaseRef,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Write a database version to a file.
    Download {
        database: DatabaseRef,
        #[arg(long)]
        version: Option<u32>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Change a database's settings. Options left out keep their value.
    Settings(SettingsArgs),
    /// Star a database, or remove your star.
    Star { database: DatabaseRef },
    /// List every version of a database.
    Versions { database: DatabaseRef },
    /// List the forks of a database.
    Forks { database: DatabaseRef },
    /// List stored objects of an owner that no version refers to.
    Orphans {
        /// Defaults to the current user.
        owner: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct TableArgs {
    pub database: DatabaseRef,
    /// Defaults to the database's default table.
    pub table: Option<String>,
    #[arg(long)]
    pub version: Option<u32>,
    #[arg(long, default_value = "")]
    pub sort: String,
    /// ASC or DESC.
    #[arg(long, default_value = "")]
    pub direction: String,
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
    #[arg(long)]
    pub rows: Option<u32>,
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    pub database: DatabaseRef,
    #[arg(long, conflicts_with = "private")]
    pub public: bool,
    #[arg(long)]
    pub private: bool,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub readme: Option<PathBuf>,
    /// Empty clears the default table.
    #[arg(long)]
    pub default_table: Option<String>,
    #[arg(long)]
    pub rename: Option<String>,
}
impl SettingsArgs {
    /// The requested visibility, if either flag was given.
    pub fn visibility(&self) -> Option<bool> {
        match (self.public, self.private) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRef {
    pub owner: String,
    pub name: String,
}
impl FromStr for DatabaseRef {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(format!("expected OWNER/NAME, got {s:?}")),
        }
    }
}
impl Display for DatabaseRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case("alice/sales.db", "alice", "sales.db")]
    #[case("bob/My Data.sqlite", "bob", "My Data.sqlite")]
    fn test_database_ref(#[case] input: &str, #[case] owner: &str, #[case] name: &str) {
        let parsed: DatabaseRef = input.parse().unwrap();
        assert_eq!((parsed.owner.as_str(), parsed.name.as_str()), (owner, name));
        assert_eq!(parsed.to_string(), input);
    }

    #[rstest]
    #[case("sales.db")]
    #[case("/sales.db")]
    #[case("alice/")]
    #[case("alice/reports/q3.db")]
    fn test_database_ref_invalid(#[case] input: &str) {
        assert!(input.parse::<DatabaseRef>().is_err());
    }

    #[test]
    fn test_parse_table_command() {
        let cli = Cli::try_parse_from([
            "sqlhub", "--as", "bob", "table", "alice/sales.db", "orders", "--sort", "id", "--direction", "desc",
            "--rows", "50",
        ])
        .unwrap();
        assert_eq!(cli.viewer.as_deref(), Some("bob"));
        let Command::Table(args) = cli.command else {
            panic!("expected table command");
        };
        assert_eq!(args.table.as_deref(), Some("orders"));
        assert_eq!(args.rows, Some(50));
        assert_eq!(args.offset, 0);
    }

    #[test]
    fn test_public_and_private_conflict() {
        let result = Cli::try_parse_from(["sqlhub", "settings", "alice/sales.db", "--public", "--private"]);
        assert!(result.is_err());
        let cli = Cli::try_parse_from(["sqlhub", "settings", "alice/sales.db", "--private"]).unwrap();
        let Command::Settings(args) = cli.command else {
            panic!("expected settings command");
        };
        assert_eq!(args.visibility(), Some(false));
    }
}
