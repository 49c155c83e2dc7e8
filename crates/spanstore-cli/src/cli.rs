use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use spanstore_types::TypeHash;

#[derive(Parser)]
#[command(
    name = "spanstore",
    about = "Inspect and maintain spanstore object store files",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store file to operate on
    #[arg(short, long, global = true, default_value = "map.store")]
    pub store: PathBuf,

    /// Store configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Summarize records, types and space usage
    Info(InfoArgs),
    /// List record ids
    Ids(IdsArgs),
    /// Print a record's payload
    Get(GetArgs),
    /// Store a UTF-8 value and commit
    Put(PutArgs),
    /// Delete a record and commit
    Delete(DeleteArgs),
    /// Show which record owns a byte offset
    Locate(LocateArgs),
    /// Find raw byte patterns and their owning records
    Search(SearchArgs),
    /// Commit, defragment and shrink the store
    Pack(PackArgs),
    /// Re-read the committed state and check it
    Verify(VerifyArgs),
}

/// Selects a record type by name or by raw hash.
#[derive(Args, Debug, Default)]
pub struct TypeSelector {
    /// Fully-qualified type name, hashed with CRC-32
    #[arg(long = "type", value_name = "NAME", conflicts_with = "type_hash")]
    pub type_name: Option<String>,
    /// Raw type hash, 8 hex digits
    #[arg(long, value_name = "HEX")]
    pub type_hash: Option<String>,
}

impl TypeSelector {
    pub fn resolve(&self) -> anyhow::Result<Option<TypeHash>> {
        match (&self.type_name, &self.type_hash) {
            (Some(name), _) => Ok(Some(TypeHash::of(name))),
            (None, Some(hex)) => Ok(Some(TypeHash::from_hex(hex)?)),
            (None, None) => Ok(None),
        }
    }

    pub fn require(&self) -> anyhow::Result<TypeHash> {
        self.resolve()?
            .ok_or_else(|| anyhow::anyhow!("one of --type or --type-hash is required"))
    }
}

#[derive(Args)]
pub struct InfoArgs {}

#[derive(Args)]
pub struct IdsArgs {
    #[command(flatten)]
    pub kind: TypeSelector,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: u64,
    #[command(flatten)]
    pub kind: TypeSelector,
    /// Print the payload as hex instead of text
    #[arg(long)]
    pub hex: bool,
}

#[derive(Args)]
pub struct PutArgs {
    pub id: u64,
    pub value: String,
    #[command(flatten)]
    pub kind: TypeSelector,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: u64,
}

#[derive(Args)]
pub struct LocateArgs {
    pub offset: u64,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Text to look for
    #[arg(required_unless_present = "hex", conflicts_with = "hex")]
    pub text: Option<String>,
    /// Byte pattern as hex
    #[arg(long, value_name = "HEX")]
    pub hex: Option<String>,
}

impl SearchArgs {
    pub fn pattern(&self) -> anyhow::Result<Vec<u8>> {
        match (&self.text, &self.hex) {
            (Some(text), _) => Ok(text.as_bytes().to_vec()),
            (None, Some(hex)) => Ok(hex::decode(hex)?),
            (None, None) => anyhow::bail!("nothing to search for"),
        }
    }
}

#[derive(Args)]
pub struct PackArgs {}

#[derive(Args)]
pub struct VerifyArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info_defaults() {
        let cli = Cli::try_parse_from(["spanstore", "info"]).unwrap();
        assert!(matches!(cli.command, Command::Info(_)));
        assert_eq!(cli.store, PathBuf::from("map.store"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_store_path() {
        let cli = Cli::try_parse_from(["spanstore", "-s", "/tmp/x.store", "verify"]).unwrap();
        assert_eq!(cli.store, PathBuf::from("/tmp/x.store"));
        assert!(matches!(cli.command, Command::Verify(_)));
    }

    #[test]
    fn parse_get_with_type_name() {
        let cli = Cli::try_parse_from(["spanstore", "get", "7", "--type", "mudmap.Room"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.id, 7);
            assert_eq!(args.kind.require().unwrap(), TypeHash::of("mudmap.Room"));
            assert!(!args.hex);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ids_with_type_hash() {
        let cli = Cli::try_parse_from(["spanstore", "ids", "--type-hash", "0000002a"]).unwrap();
        if let Command::Ids(args) = cli.command {
            assert_eq!(args.kind.resolve().unwrap(), Some(TypeHash::from_raw(42)));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn ids_without_type_lists_everything() {
        let cli = Cli::try_parse_from(["spanstore", "ids"]).unwrap();
        if let Command::Ids(args) = cli.command {
            assert_eq!(args.kind.resolve().unwrap(), None);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn type_name_and_hash_conflict() {
        let res = Cli::try_parse_from([
            "spanstore", "get", "1", "--type", "a", "--type-hash", "00000001",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn get_without_type_fails_to_resolve() {
        let cli = Cli::try_parse_from(["spanstore", "get", "1"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert!(args.kind.require().is_err());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from(["spanstore", "put", "3", "hello", "--type", "note"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.id, 3);
            assert_eq!(args.value, "hello");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_search_text_and_hex() {
        let cli = Cli::try_parse_from(["spanstore", "search", "cellar"]).unwrap();
        if let Command::Search(args) = cli.command {
            assert_eq!(args.pattern().unwrap(), b"cellar");
        } else { panic!("wrong command"); }

        let cli = Cli::try_parse_from(["spanstore", "search", "--hex", "00ff"]).unwrap();
        if let Command::Search(args) = cli.command {
            assert_eq!(args.pattern().unwrap(), vec![0x00, 0xff]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn search_needs_a_pattern() {
        assert!(Cli::try_parse_from(["spanstore", "search"]).is_err());
    }

    #[test]
    fn parse_verbose_and_config() {
        let cli = Cli::try_parse_from(["spanstore", "--verbose", "--config", "s.toml", "pack"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("s.toml")));
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["spanstore", "--format", "json", "info"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
