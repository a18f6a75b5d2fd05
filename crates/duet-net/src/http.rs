//! HTTP backend for [`FileTransfer`].
//!
//! Uploads are `multipart/form-data` POSTs streamed from disk. Downloads
//! stream into `<destination>.part` and resume from its length with a
//! `Range` request, so a cancelled download picks up where it stopped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::TransferError;
use crate::transfer::{
    CancelToken, DownloadRequest, Downloaded, FileTransfer, ProgressFn, TransferProgress, UploadAck, UploadRequest,
};

#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self, TransferError> {
        let client = Client::builder().connect_timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl FileTransfer for HttpTransfer {
    async fn download(
        &self,
        request: DownloadRequest,
        cancel: CancelToken,
        progress: ProgressFn,
    ) -> Result<Option<Downloaded>, TransferError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let staging = part_path(&request.destination);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let resume_from = match tokio::fs::metadata(&staging).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut req = self.client.get(&request.url);
        if resume_from > 0 {
            req = req.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = tokio::select! {
            res = req.send() => res?,
            _ = cancel.cancelled() => return Ok(None),
        };

        let status = response.status();
        let offset = match status {
            StatusCode::PARTIAL_CONTENT => resume_from,
            s if s.is_success() => 0,
            StatusCode::RANGE_NOT_SATISFIABLE if resume_from > 0 => {
                // Staged file already holds everything the server has.
                tokio::fs::rename(&staging, &request.destination).await?;
                return Ok(Some(Downloaded {
                    path: request.destination,
                    content_type: None,
                    bytes: resume_from,
                }));
            }
            s => return Err(TransferError::Status(s.as_u16())),
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let total = response.content_length().map(|len| len + offset).unwrap_or(0);

        debug!(url = %request.url, offset, total, "download started");

        let mut file = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(&staging).await?
        } else {
            tokio::fs::File::create(&staging).await?
        };

        let mut written = offset;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    info!(url = %request.url, written, "download paused");
                    return Ok(None);
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(TransferProgress {
                transferred: written,
                total,
            });
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&staging, &request.destination).await?;

        info!(path = %request.destination.display(), bytes = written, "download finished");
        Ok(Some(Downloaded {
            path: request.destination,
            content_type,
            bytes: written,
        }))
    }

    async fn upload(
        &self,
        request: UploadRequest,
        cancel: CancelToken,
        progress: ProgressFn,
    ) -> Result<UploadAck, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let file = tokio::fs::File::open(&request.source).await?;
        let total = file.metadata().await?.len();
        let file_name = request
            .source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let mut sent = 0u64;
        let body = ReaderStream::new(file).inspect_ok(move |chunk: &Bytes| {
            sent += chunk.len() as u64;
            progress(TransferProgress { transferred: sent, total });
        });

        let mut part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total).file_name(file_name);
        if let Some(mime) = request.mime_type.as_deref() {
            part = part.mime_str(mime)?;
        }

        let mut form = Form::new().part(request.field_name.clone(), part);
        for (key, value) in &request.parameters {
            form = form.text(key.clone(), value.clone());
        }

        debug!(url = %request.url, bytes = total, "upload started");

        let send = async {
            let response = self.client.post(&request.url).multipart(form).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, TransferError>(UploadAck { status, body })
        };

        let ack = tokio::select! {
            ack = send => ack?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };

        info!(url = %request.url, status = ack.status, ok = ack.is_ok(), "upload finished");
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    /// One-shot HTTP server. `respond` gets the raw request and returns the
    /// raw response.
    async fn serve_once(respond: impl Fn(&[u8]) -> Vec<u8> + Send + 'static, until: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.ends_with(until) {
                    break;
                }
            }
            let response = respond(&buf);
            sock.write_all(&response).await.unwrap();
            sock.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    fn noop_progress() -> ProgressFn {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn download_writes_destination_and_reports_progress() {
        let body = b"0123456789".to_vec();
        let url = serve_once(
            move |_| {
                let mut resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .into_bytes();
                resp.extend_from_slice(&body);
                resp
            },
            b"\r\n\r\n",
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("photo.jpeg");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p| sink.lock().unwrap().push(p));

        let result = HttpTransfer::new()
            .unwrap()
            .download(
                DownloadRequest {
                    url: format!("{url}/uploads/photo.jpeg"),
                    destination: dest.clone(),
                },
                CancelToken::new(),
                progress,
            )
            .await
            .unwrap()
            .expect("finished");

        assert_eq!(result.path, dest);
        assert_eq!(result.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        assert!(!part_path(&dest).exists());
        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last, TransferProgress { transferred: 10, total: 10 });
    }

    #[tokio::test]
    async fn download_resumes_from_partial_file() {
        let url = serve_once(
            |req| {
                let text = String::from_utf8_lossy(req).to_lowercase();
                assert!(text.contains("range: bytes=4-"), "missing range header: {text}");
                b"HTTP/1.1 206 Partial Content\r\nContent-Length: 6\r\nConnection: close\r\n\r\n456789".to_vec()
            },
            b"\r\n\r\n",
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        std::fs::write(part_path(&dest), b"0123").unwrap();

        let result = HttpTransfer::new()
            .unwrap()
            .download(
                DownloadRequest {
                    url: format!("{url}/clip.mp4"),
                    destination: dest.clone(),
                },
                CancelToken::new(),
                noop_progress(),
            )
            .await
            .unwrap()
            .expect("finished");

        assert_eq!(result.bytes, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn cancelled_download_has_no_result() {
        let token = CancelToken::new();
        token.cancel();
        let dir = tempfile::tempdir().unwrap();

        let result = HttpTransfer::new()
            .unwrap()
            .download(
                DownloadRequest {
                    url: "http://127.0.0.1:9/never".into(),
                    destination: dir.path().join("x"),
                },
                token,
                noop_progress(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn download_error_status() {
        let url = serve_once(
            |_| b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
            b"\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();

        let err = HttpTransfer::new()
            .unwrap()
            .download(
                DownloadRequest {
                    url: format!("{url}/missing"),
                    destination: dir.path().join("missing"),
                },
                CancelToken::new(),
                noop_progress(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Status(404)));
    }

    #[tokio::test]
    async fn upload_sends_multipart_with_id() {
        let captured = Arc::new(Mutex::new(String::new()));
        let sink = captured.clone();
        let url = serve_once(
            move |req| {
                *sink.lock().unwrap() = String::from_utf8_lossy(req).into_owned();
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_vec()
            },
            b"--\r\n",
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.pdf");
        std::fs::write(&source, b"%PDF-1.4 tiny").unwrap();

        let ack = HttpTransfer::new()
            .unwrap()
            .upload(
                UploadRequest {
                    url: format!("{url}/upload"),
                    source,
                    field_name: "file".into(),
                    mime_type: Some("application/pdf".into()),
                    parameters: vec![("id".into(), "msg-1".into())],
                },
                CancelToken::new(),
                noop_progress(),
            )
            .await
            .unwrap();

        assert!(ack.is_ok());
        let request = captured.lock().unwrap().clone();
        assert!(request.starts_with("POST /upload"));
        assert!(request.contains("name=\"file\"; filename=\"report.pdf\""));
        assert!(request.contains("name=\"id\""));
        assert!(request.contains("msg-1"));
    }

    #[tokio::test]
    async fn cancelled_upload_errors() {
        let token = CancelToken::new();
        token.cancel();
        let err = HttpTransfer::new()
            .unwrap()
            .upload(
                UploadRequest {
                    url: "http://127.0.0.1:9/upload".into(),
                    source: PathBuf::from("/nonexistent"),
                    field_name: "file".into(),
                    mime_type: None,
                    parameters: Vec::new(),
                },
                token,
                noop_progress(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }
}
