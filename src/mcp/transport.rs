//! MCP Transport Layer
//!
//! This module defines the transport abstraction for communicating with MCP
//! servers. The shipped transport is stdio: the server runs as a child
//! process and each JSON-RPC message occupies one line of its stdin/stdout.
//!
//! # Architecture
//!
//! The transport layer is responsible only for sending and receiving framed
//! messages. Protocol concerns (JSON-RPC shapes) are handled in the protocol
//! layer; request/response matching and timeouts live in the session layer.
//!
//! A session is single-owner: one client owns one transport to one server
//! process, and the session layer serializes calls over it so responses
//! cannot be misattributed.

use crate::mcp::protocol::{McpRequest, McpResponse};
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Transport trait for MCP communication
///
/// All transports must implement this trait, enabling the session to work
/// with different transport mechanisms (a spawned process, an in-memory pipe
/// in tests).
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Send a request to the MCP server
    async fn send(&mut self, request: &McpRequest) -> Result<()>;

    /// Receive the next response from the MCP server
    async fn recv(&mut self) -> Result<McpResponse>;

    /// Check if the transport is still connected
    fn is_connected(&self) -> bool;
}

/// stdio transport for local MCP servers
///
/// Spawns the server as a child process and exchanges newline-delimited
/// JSON-RPC messages over its stdin/stdout. Server stderr is inherited so
/// its logs stay visible.
///
/// # Example
///
/// ```ignore
/// let transport = StdioTransport::spawn("gridops", &["serve".to_string()]).await?;
/// transport.send(&request).await?;
/// let response = transport.recv().await?;
/// ```
pub struct StdioTransport {
    /// Child process handle
    child: Option<Child>,

    /// stdin handle for sending requests
    stdin: ChildStdin,

    /// stdout handle for receiving responses
    stdout: BufReader<ChildStdout>,

    /// Server command line (for diagnostics)
    command: String,

    /// Whether the transport is still connected
    connected: bool,

    /// Reusable buffer for reading lines
    line_buffer: String,
}

impl StdioTransport {
    /// Spawn an MCP server process and connect a stdio transport to it
    ///
    /// # Arguments
    ///
    /// * `command` - The command to spawn (e.g. "python", "gridops")
    /// * `args` - Arguments to pass to the command
    pub async fn spawn(command: &str, args: &[String]) -> Result<Self> {
        tracing::info!("Spawning MCP server: {}", command);
        tracing::debug!("Server arguments: {:?}", args);

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to spawn MCP server process")?;

        let stdin = child.stdin.take().context("Failed to get child stdin")?;
        let stdout = child.stdout.take().context("Failed to get child stdout")?;

        Ok(Self {
            child: Some(child),
            stdin,
            stdout: BufReader::new(stdout),
            command: format!("{} {}", command, args.join(" ")),
            connected: true,
            line_buffer: String::with_capacity(4096),
        })
    }

    /// Get the server command string (for diagnostics)
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Kill the MCP server process and wait for it to exit
    pub async fn kill(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            tracing::info!("Killing MCP server: {}", self.command);
            child
                .kill()
                .await
                .context("Failed to kill MCP server process")?;
            self.connected = false;
        }
        Ok(())
    }

    /// Wait for the MCP server process to exit naturally
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        if let Some(mut child) = self.child.take() {
            let status = child
                .wait()
                .await
                .context("Failed to wait for MCP server process")?;
            self.connected = false;
            Ok(status.code())
        } else {
            Ok(None)
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Cannot await in Drop; just initiate the kill
        if let Some(mut child) = self.child.take() {
            tracing::debug!("Dropping StdioTransport, killing MCP server");
            let _ = child.start_kill();
        }
    }
}

impl Transport for StdioTransport {
    /// Serialize the request and write it as a single line to server stdin
    async fn send(&mut self, request: &McpRequest) -> Result<()> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        let json =
            serde_json::to_string(request).context("Failed to serialize MCP request to JSON")?;

        tracing::debug!("Sending to MCP server: {}", json);

        self.stdin
            .write_all(json.as_bytes())
            .await
            .context("Failed to write to MCP server stdin")?;
        self.stdin
            .write_all(b"\n")
            .await
            .context("Failed to write newline to MCP server stdin")?;
        self.stdin
            .flush()
            .await
            .context("Failed to flush MCP server stdin")?;

        Ok(())
    }

    /// Read a single line from server stdout and deserialize it
    async fn recv(&mut self) -> Result<McpResponse> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        self.line_buffer.clear();

        let bytes_read = self
            .stdout
            .read_line(&mut self.line_buffer)
            .await
            .context("Failed to read from MCP server stdout")?;

        if bytes_read == 0 {
            self.connected = false;
            return Err(anyhow::anyhow!("MCP server closed connection (EOF)"));
        }

        tracing::debug!("Received from MCP server: {}", self.line_buffer.trim());

        let response: McpResponse = serde_json::from_str(&self.line_buffer).with_context(|| {
            format!(
                "Failed to deserialize MCP response from JSON: {}",
                self.line_buffer
            )
        })?;

        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.connected && self.child.is_some()
    }
}
