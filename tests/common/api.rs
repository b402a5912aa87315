//! Local stand-in for the structured search service.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl ApiReply {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn error(status: u16) -> Self {
        Self {
            status,
            body: r#"{"error":{"message":"quota"}}"#.to_string(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub path: String,
    /// Request line and headers, lowercased
    pub head: String,
    pub body: serde_json::Value,
}

type Responder = dyn Fn(&str, &serde_json::Value) -> ApiReply + Send + Sync;

pub struct FakeApi {
    pub base_url: String,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl FakeApi {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &serde_json::Value) -> ApiReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let respond = respond.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, respond.as_ref(), &recorded).await;
                });
            }
        });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }
}

async fn serve(mut stream: TcpStream, respond: &Responder, recorded: &Mutex<Vec<ApiRequest>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let (head_end, content_length) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            break (pos + 4, len);
        }
    };

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let path = String::from_utf8_lossy(&buf[..head_end])
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    let end = buf.len().min(head_end + content_length);
    let body: serde_json::Value = serde_json::from_slice(&buf[head_end..end]).unwrap_or_default();

    let reply = respond(&path, &body);
    recorded.lock().push(ApiRequest { path, head, body });
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let response = format!(
        "HTTP/1.1 {} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        reply.status,
        reply.body.len(),
        reply.body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
