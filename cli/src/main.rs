use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use frames::{CipherMode, FrameCodec, KeyMaterial};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("tcp error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket error: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("frame codec: {0}")]
    Codec(#[from] frames::CodecError),
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("connection closed before reply")]
    Closed,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "sentinel-cli", about = "Sentinel relay ingest and dashboard CLI")]
struct Cli {
    #[arg(long, env = "SENTINEL_BASE_URL", default_value = "http://127.0.0.1:9091")]
    base_url: String,

    #[arg(long, env = "SECRET_KEY", default_value = "sentinelvpn-dev-key", hide_env_values = true)]
    secret_key: String,

    #[arg(long, env = "SECRET_IV", default_value = "sentinelvpn-dev-iv", hide_env_values = true)]
    secret_iv: String,

    #[arg(long, env = "CIPHER_MODE", default_value = "cbc-static")]
    cipher_mode: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check `/healthz`.
    Ping,
    /// Print `/status`.
    Status,
    /// Send encrypted frames to the TCP ingest port and print each reply.
    Send(SendArgs),
    /// Stream dashboard events from `/ws`, one JSON object per line.
    Tail(TailArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long, env = "SENTINEL_TCP_ADDR", default_value = "127.0.0.1:9000")]
    addr: String,

    #[arg(long = "message", short, help = "Message to send; repeatable. Reads stdin lines when absent")]
    messages: Vec<String>,

    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct TailArgs {
    #[arg(long, help = "WebSocket URL; defaults to <base-url>/ws")]
    url: Option<String>,

    #[arg(long, help = "Stop after this many events")]
    count: Option<usize>,

    #[arg(long = "type", help = "Only print events of this type; repeatable")]
    types: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Status => run_status(&cli.base_url).await,
        Command::Send(ref args) => {
            let codec = build_codec(&cli)?;
            run_send(&codec, args).await
        }
        Command::Tail(ref args) => run_tail(&cli.base_url, args).await,
    }
}

fn build_codec(cli: &Cli) -> Result<FrameCodec, CliError> {
    let mode: CipherMode = cli.cipher_mode.parse()?;
    let keys = KeyMaterial::derive(&cli.secret_key, &cli.secret_iv);
    Ok(FrameCodec::from_mode(mode, &keys))
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(CliError::Status(response.status().as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_status(base_url: &str) -> Result<(), CliError> {
    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(CliError::Status(response.status().as_u16()));
    }
    let json: Value = response.json().await?;
    print_json(&json)
}

async fn run_send(codec: &FrameCodec, args: &SendArgs) -> Result<(), CliError> {
    let stream = TcpStream::connect(&args.addr).await?;
    let (rd, mut wr) = stream.into_split();
    let mut replies = BufReader::new(rd).lines();
    let timeout = Duration::from_secs(args.timeout_secs);

    let messages = if args.messages.is_empty() {
        read_stdin_lines().await?
    } else {
        args.messages.clone()
    };

    for message in messages {
        wr.write_all(&codec.encode_frame(message.as_bytes())?).await?;
        let line = tokio::time::timeout(timeout, replies.next_line())
            .await
            .map_err(|_| CliError::Timeout)??
            .ok_or(CliError::Closed)?;
        let plaintext = codec.decode_frame(line.as_bytes())?;
        print_reply(&String::from_utf8_lossy(&plaintext))?;
    }
    wr.shutdown().await?;
    Ok(())
}

async fn read_stdin_lines() -> Result<Vec<String>, CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

async fn run_tail(base_url: &str, args: &TailArgs) -> Result<(), CliError> {
    let url = match &args.url {
        Some(url) => url.clone(),
        None => ws_url(base_url)?,
    };
    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| CliError::WsConnect(Box::new(e)))?;

    let mut printed = 0usize;
    while let Some(msg) = ws.next().await {
        let text = match msg.map_err(|e| CliError::Ws(Box::new(e)))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let event: Value = serde_json::from_str(text.as_str())?;
        if !wants(&args.types, &event) {
            continue;
        }
        println!("{}", serde_json::to_string(&event)?);
        printed += 1;
        if args.count.is_some_and(|limit| printed >= limit) {
            break;
        }
    }
    Ok(())
}

/// `http(s)://host[:port][/...]` to `ws(s)://host[:port]/ws`.
fn ws_url(base_url: &str) -> Result<String, CliError> {
    let trimmed = base_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws"))
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws"))
    } else {
        Err(CliError::InvalidBaseUrl(base_url.to_owned()))
    }
}

fn wants(types: &[String], event: &Value) -> bool {
    types.is_empty() || event["type"].as_str().is_some_and(|t| types.iter().any(|want| want == t))
}

/// Acks are JSON; fetch-mode replies are arbitrary text.
fn print_reply(reply: &str) -> Result<(), CliError> {
    match serde_json::from_str::<Value>(reply) {
        Ok(json) => print_json(&json),
        Err(_) => {
            println!("{reply}");
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
