use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bastion",
    about = "Bastion integrity core: signed ledger, ingestion gate, incident correlation",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the ledger signing key, or show the existing one
    Keygen(KeygenArgs),
    /// Run a JSON-lines event file through the gate and correlation
    Ingest(IngestArgs),
    /// Verify a ledger offline against a directory of public keys
    Verify(VerifyArgs),
    /// Summarize incidents recorded in the ledger
    Incidents(IncidentsArgs),
    /// Scan admitted events for chain breaks and sequence gaps
    Scan(ScanArgs),
    /// Export the ledger trail of an artifact and record the access
    Export(ExportArgs),
    /// Show the access history of an artifact
    Custody(CustodyArgs),
}

#[derive(Args)]
pub struct KeygenArgs {
    /// Key directory (defaults to BASTION_KEY_DIR)
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct IngestArgs {
    /// File with one event envelope per line
    pub input: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Ledger file (defaults to BASTION_LEDGER_PATH)
    #[arg(long)]
    pub ledger: Option<PathBuf>,
    /// Directory of `*.pub` keys (defaults to BASTION_KEY_DIR)
    #[arg(long)]
    pub keys: Option<PathBuf>,
}

#[derive(Args)]
pub struct IncidentsArgs {
    /// Only show incidents at or above this stage
    #[arg(long)]
    pub min_stage: Option<String>,
}

#[derive(Args)]
pub struct ScanArgs {
    /// Component instance to scan; all instances when omitted
    pub instance: Option<String>,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Artifact id (ledger subject id)
    pub artifact: String,
    /// Who is exporting
    #[arg(long = "by")]
    pub accessed_by: String,
}

#[derive(Args)]
pub struct CustodyArgs {
    pub artifact: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keygen() {
        let cli = Cli::try_parse_from(["bastion", "keygen", "--key-dir", "/tmp/keys"]).unwrap();
        if let Command::Keygen(args) = cli.command {
            assert_eq!(args.key_dir, Some(PathBuf::from("/tmp/keys")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_ingest() {
        let cli = Cli::try_parse_from(["bastion", "ingest", "events.jsonl"]).unwrap();
        if let Command::Ingest(args) = cli.command {
            assert_eq!(args.input, PathBuf::from("events.jsonl"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn ingest_requires_input() {
        assert!(Cli::try_parse_from(["bastion", "ingest"]).is_err());
    }

    #[test]
    fn parse_verify_json() {
        let cli = Cli::try_parse_from(["bastion", "--format", "json", "verify", "--keys", "k"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        if let Command::Verify(args) = cli.command {
            assert_eq!(args.keys, Some(PathBuf::from("k")));
            assert_eq!(args.ledger, None);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_export() {
        let cli = Cli::try_parse_from(["bastion", "export", "inc-1", "--by", "analyst"]).unwrap();
        if let Command::Export(args) = cli.command {
            assert_eq!(args.artifact, "inc-1");
            assert_eq!(args.accessed_by, "analyst");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn export_requires_accessor() {
        assert!(Cli::try_parse_from(["bastion", "export", "inc-1"]).is_err());
    }

    #[test]
    fn parse_scan_all() {
        let cli = Cli::try_parse_from(["bastion", "scan"]).unwrap();
        assert!(matches!(cli.command, Command::Scan(ScanArgs { instance: None })));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["bastion", "-v", "incidents"]).unwrap();
        assert!(cli.verbose);
    }
}
