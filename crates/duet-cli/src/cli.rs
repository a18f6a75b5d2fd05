use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "duet", version, about = "Inspect and exercise a duet chat deployment")]
pub struct Cli {
    /// Server root; overrides DUET_BASE_URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Print the hex room key derived for a room id.
    Key { room_id: String },

    /// Seal text for a room as it would go on the wire.
    Encrypt { room_id: String, text: String },

    /// Open a sealed `{"cipher","iv"}` payload.
    Decrypt { room_id: String, payload: String },

    /// Show how a local file would be sent.
    Inspect {
        path: PathBuf,
        #[arg(long)]
        mime: Option<String>,
    },

    /// Upload a file to the server's upload endpoint. Ctrl-C cancels.
    Upload {
        path: PathBuf,
        /// Message id sent along with the file; a fresh one by default.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        mime: Option<String>,
    },

    /// Download an attachment, resuming a previous partial download.
    Download { url: String, destination: PathBuf },

    /// Check once whether the server is reachable.
    Probe,

    /// List rooms stored in the local database.
    Rooms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_with_options() {
        let cli = Cli::try_parse_from(["duet", "--base-url", "http://h:1", "upload", "a.png", "--id", "m1"]).unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("http://h:1"));
        match cli.cmd {
            Cmd::Upload { path, id, mime } => {
                assert_eq!(path, PathBuf::from("a.png"));
                assert_eq!(id.as_deref(), Some("m1"));
                assert!(mime.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn decrypt_needs_payload() {
        assert!(Cli::try_parse_from(["duet", "decrypt", "room-1"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
