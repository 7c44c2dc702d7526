#![allow(dead_code)]

//! A scripted Zabbix trapper.
//!
//! Each connection reads one sender frame, records the decoded JSON request
//! and answers according to the configured [`Reply`].

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"response":"success"}` with the given info line.
    Success(String),
    /// `{"response":"failed"}` with the given info line.
    Failed(String),
    /// Raw bytes instead of a frame.
    Garbage(Vec<u8>),
    /// Accept the frame and never answer.
    Silent,
}

impl Reply {
    pub fn processed(processed: u64, failed: u64) -> Self {
        Self::Success(format!(
            "processed: {processed}; failed: {failed}; total: {}; seconds spent: 0.000042",
            processed + failed
        ))
    }
}

struct State {
    reply: Mutex<Reply>,
    requests: Mutex<Vec<Value>>,
}

pub struct MockTrapper {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl MockTrapper {
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            reply: Mutex::new(reply),
            requests: Mutex::new(Vec::new()),
        });

        let handle = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                }
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.state.reply.lock().unwrap() = reply;
    }

    /// Every decoded `sender data` request, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockTrapper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = b"ZBXD\x01".to_vec();
    frame.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

async fn handle_connection(mut stream: TcpStream, state: Arc<State>) {
    let mut header = [0u8; 13];
    if stream.read_exact(&mut header).await.is_err() {
        return;
    }
    let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;

    let mut payload = vec![0; len];
    if stream.read_exact(&mut payload).await.is_err() {
        return;
    }
    if let Ok(request) = serde_json::from_slice(&payload) {
        state.requests.lock().unwrap().push(request);
    }

    let reply = state.reply.lock().unwrap().clone();
    let bytes = match reply {
        Reply::Success(info) => {
            frame(serde_json::json!({ "response": "success", "info": info }).to_string().as_bytes())
        }
        Reply::Failed(info) => {
            frame(serde_json::json!({ "response": "failed", "info": info }).to_string().as_bytes())
        }
        Reply::Garbage(bytes) => bytes,
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return;
        }
    };

    let _ = stream.write_all(&bytes).await;
    let _ = stream.shutdown().await;
}
