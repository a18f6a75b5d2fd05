//! Periodic server reachability probe.
//!
//! Independent from the messaging channel: a plain GET of the server root
//! on a fixed interval, published on a `watch` channel so any number of
//! views can show the current state.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineReason {
    /// No network route at all (connect failure).
    Offline,
    TimedOut,
    /// Request reached the server but it answered with a non-200 status.
    UnexpectedStatus(u16),
    Unreachable(String),
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("You are offline"),
            Self::TimedOut => f.write_str("Request timed out"),
            Self::UnexpectedStatus(code) => write!(f, "Server can't be reached (status {code})"),
            Self::Unreachable(e) => write!(f, "Connection error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    /// No probe has completed yet.
    Connecting,
    Online,
    Offline(OfflineReason),
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Run one probe against `url`.
pub async fn check(client: &Client, url: &str, timeout: Duration) -> Connectivity {
    match client.get(url).timeout(timeout).send().await {
        Ok(resp) if resp.status().as_u16() == 200 => Connectivity::Online,
        Ok(resp) => Connectivity::Offline(OfflineReason::UnexpectedStatus(resp.status().as_u16())),
        Err(e) if e.is_timeout() => Connectivity::Offline(OfflineReason::TimedOut),
        Err(e) if e.is_connect() => Connectivity::Offline(OfflineReason::Offline),
        Err(e) => Connectivity::Offline(OfflineReason::Unreachable(e.to_string())),
    }
}

/// Probe `base_url` every `interval`, starting immediately. The task stops
/// once every receiver is dropped.
pub fn spawn_probe(
    client: Client,
    base_url: String,
    interval: Duration,
    timeout: Duration,
) -> (watch::Receiver<Connectivity>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(Connectivity::Connecting);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tx.closed() => break,
            }

            let state = check(&client, &base_url, timeout).await;
            match &state {
                Connectivity::Offline(reason) => warn!(url = %base_url, %reason, "server unreachable"),
                _ => debug!(url = %base_url, "server reachable"),
            }

            tx.send_if_modified(|current| {
                if *current != state {
                    *current = state;
                    true
                } else {
                    false
                }
            });
        }

        debug!(url = %base_url, "connectivity probe stopped");
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn server(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let resp = format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn check_online_and_bad_status() {
        let client = Client::new();
        let ok = server("HTTP/1.1 200 OK").await;
        assert_eq!(check(&client, &ok, Duration::from_secs(2)).await, Connectivity::Online);

        let bad = server("HTTP/1.1 503 Service Unavailable").await;
        assert_eq!(
            check(&client, &bad, Duration::from_secs(2)).await,
            Connectivity::Offline(OfflineReason::UnexpectedStatus(503))
        );
    }

    #[tokio::test]
    async fn check_refused_connection_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let state = check(&Client::new(), &format!("http://{addr}/"), Duration::from_secs(2)).await;
        assert!(matches!(state, Connectivity::Offline(_)));
    }

    #[tokio::test]
    async fn probe_publishes_and_stops_with_receivers() {
        let url = server("HTTP/1.1 200 OK").await;
        let (mut rx, handle) = spawn_probe(Client::new(), url, Duration::from_millis(50), Duration::from_secs(2));

        assert_eq!(*rx.borrow(), Connectivity::Connecting);
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(Connectivity::is_online))
            .await
            .expect("probe should report online")
            .unwrap();

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("probe should stop")
            .unwrap();
    }
}
