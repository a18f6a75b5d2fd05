//! # duet
//!
//! Command-line companion of the duet client. Derives room keys, seals and
//! opens message text, classifies files, runs single uploads and downloads
//! against a server, and reads the local database.

mod cli;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duet_client::{ClientConfig, ProgressAccumulator};
use duet_media::extract_audio_metadata;
use duet_net::{
    CancelToken, DownloadRequest, FileTransfer, HttpTransfer, ProgressFn, TransferError, UploadRequest,
};
use duet_shared::attachment::classify_path;
use duet_shared::constants::UPLOAD_FIELD_NAME;
use duet_shared::crypto::{derive_room_key, open_text, seal_text};
use duet_shared::format::{format_duration, format_size};
use duet_shared::{AttachmentKind, MessageId, RoomId};
use duet_store::Database;

use crate::cli::{Cli, Cmd};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,duet=info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }

    match args.cmd {
        Cmd::Key { room_id } => {
            let key = derive_room_key(&RoomId::new(room_id), &config.kdf_params())?;
            println!("{}", key.to_hex());
        }
        Cmd::Encrypt { room_id, text } => {
            let key = derive_room_key(&RoomId::new(room_id), &config.kdf_params())?;
            println!("{}", seal_text(&text, &key)?);
        }
        Cmd::Decrypt { room_id, payload } => {
            let key = derive_room_key(&RoomId::new(room_id), &config.kdf_params())?;
            println!("{}", open_text(&payload, &key).context("payload does not open with this room key")?);
        }
        Cmd::Inspect { path, mime } => inspect(&path, mime.as_deref()).await?,
        Cmd::Upload { path, id, mime } => upload(&config, &path, id, mime).await?,
        Cmd::Download { url, destination } => download(&config, url, &destination).await?,
        Cmd::Probe => {
            let state = duet_net::connectivity::check(&reqwest::Client::new(), &config.base_url, config.probe_timeout).await;
            println!("{}: {state:?}", config.base_url);
            if !state.is_online() {
                std::process::exit(1);
            }
        }
        Cmd::Rooms => {
            let db = Database::new()?;
            if let Some(path) = db.path() {
                info!(path = %path.display(), "store opened");
            }
            for room in db.list_rooms()? {
                println!(
                    "{}  {} / {}  {} messages  {}",
                    room.id,
                    room.users[0].name,
                    room.users[1].name,
                    room.message_count,
                    room.last_preview.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

async fn inspect(path: &Path, mime: Option<&str>) -> anyhow::Result<()> {
    let bytes = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?
        .len();
    let kind = classify_path(path, mime);
    println!("kind: {}", kind.label());
    println!("event: {}", kind.send_event());
    println!("size: {}", format_size(bytes));

    if kind == AttachmentKind::Audio {
        match extract_audio_metadata(path).await {
            Ok(meta) => {
                println!("title: {}", meta.title.as_deref().unwrap_or("-"));
                println!("artist: {}", meta.artist.as_deref().unwrap_or("-"));
                if let Some(secs) = meta.duration_secs() {
                    println!("duration: {}", format_duration(secs));
                }
                println!("artwork: {}", if meta.artwork.is_some() { "yes" } else { "no" });
            }
            Err(e) => println!("metadata: unavailable ({e})"),
        }
    }
    Ok(())
}

async fn upload(config: &ClientConfig, path: &Path, id: Option<String>, mime: Option<String>) -> anyhow::Result<()> {
    let id = id.map(|s| MessageId::from(s.as_str())).unwrap_or_else(MessageId::generate);
    let request = UploadRequest {
        url: config.upload_url(),
        source: path.to_path_buf(),
        field_name: UPLOAD_FIELD_NAME.to_string(),
        mime_type: mime,
        parameters: vec![("id".to_string(), id.to_string())],
    };

    let cancel = cancel_on_ctrl_c();
    let progress = log_progress(config, &id);
    info!(msg_id = %id, url = %request.url, "uploading {}", path.display());

    match HttpTransfer::new()?.upload(request, cancel, progress).await {
        Ok(ack) if ack.is_ok() => {
            println!("{id}");
            Ok(())
        }
        Ok(ack) => bail!("server rejected upload: {} {}", ack.status, ack.body.trim()),
        Err(TransferError::Cancelled) => bail!("upload cancelled"),
        Err(e) => Err(e.into()),
    }
}

async fn download(config: &ClientConfig, url: String, destination: &Path) -> anyhow::Result<()> {
    let id = MessageId::generate();
    let request = DownloadRequest {
        url,
        destination: destination.to_path_buf(),
    };

    let cancel = cancel_on_ctrl_c();
    let progress = log_progress(config, &id);

    match HttpTransfer::new()?.download(request, cancel, progress).await? {
        Some(done) => {
            println!(
                "{} ({}, {})",
                done.path.display(),
                format_size(done.bytes),
                done.content_type.as_deref().unwrap_or("unknown type")
            );
            Ok(())
        }
        None => bail!("download stopped; run again to resume"),
    }
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancelling");
            token.cancel();
        }
    });
    cancel
}

fn log_progress(config: &ClientConfig, id: &MessageId) -> ProgressFn {
    let acc = Mutex::new(ProgressAccumulator::new(id.clone(), None, config.progress_interval));
    Arc::new(move |progress| {
        let entry = acc.lock().ok().and_then(|mut a| a.record(progress, Instant::now()));
        if let Some(entry) = entry {
            info!(
                transferred = entry.transferred.as_deref().unwrap_or("0"),
                size = %entry.size,
                "progress"
            );
        }
    })
}
