use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::ProtocolError;
use crate::resource::Resource;

/// Maximum message size (10MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Read buffer size for the streaming decoder
const READ_CHUNK_SIZE: usize = 8 * 1024;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Command kind sent by a client. Unrecognized strings decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    Apply,
    #[default]
    Unknown,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for CommandKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "apply" => Self::Apply,
            _ => Self::Unknown,
        }
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response kind sent by the daemon. Unrecognized strings decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseKind {
    Success,
    Error,
    #[default]
    Unknown,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for ResponseKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl From<ResponseKind> for String {
    fn from(kind: ResponseKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request sent from CLI to daemon
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type", default)]
    pub kind: CommandKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Build an apply command carrying `resource` as its payload
    pub fn apply(resource: &Resource) -> Result<Self> {
        Ok(Self {
            kind: CommandKind::Apply,
            parameters: HashMap::new(),
            data: Some(resource.to_value()?),
        })
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Response sent from daemon to CLI
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type", default)]
    pub kind: ResponseKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    /// Create a success response with a message
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Success,
            message: msg.into(),
            data: None,
        }
    }

    /// Create an error response
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            message: msg.into(),
            data: None,
        }
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Unknown,
            message: msg.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }
}

/// A command whose payload has been checked against its schema.
///
/// Handlers only ever see a `Request`; malformed payloads are turned into an
/// error response by the server before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Apply {
        resource: Resource,
        parameters: HashMap<String, String>,
    },
    Unknown {
        parameters: HashMap<String, String>,
    },
}

impl Request {
    /// Variant name for logs
    pub fn variant_name(&self) -> &'static str {
        match self {
            Request::Apply { .. } => "Apply",
            Request::Unknown { .. } => "Unknown",
        }
    }
}

impl TryFrom<Command> for Request {
    type Error = ProtocolError;

    fn try_from(command: Command) -> Result<Self> {
        match command.kind {
            CommandKind::Apply => {
                let data = match command.data {
                    Some(serde_json::Value::Null) | None => {
                        return Err(ProtocolError::MissingPayload { command: "apply" });
                    }
                    Some(data) => data,
                };
                Ok(Request::Apply {
                    resource: Resource::from_value(data)?,
                    parameters: command.parameters,
                })
            }
            CommandKind::Unknown => Ok(Request::Unknown {
                parameters: command.parameters,
            }),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Encode a message as a single JSON document followed by a newline
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg).map_err(ProtocolError::Encode)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            max: MAX_MESSAGE_SIZE,
        });
    }
    bytes.push(b'\n');
    Ok(bytes)
}

/// Try to decode one complete JSON document from the front of `buf`.
///
/// Returns `Ok(None)` while the document is still structurally incomplete.
pub fn decode_message<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<T>> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<T>();
    match stream.next() {
        None => Ok(None),
        Some(Ok(msg)) => Ok(Some(msg)),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(ProtocolError::Decode(e)),
    }
}

/// Write one message to the stream and flush it.
pub async fn write_message<T, W>(writer: &mut W, msg: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one message from the stream.
///
/// There is no length prefix: the message ends as soon as the JSON value is
/// structurally complete, so the peer may keep its write half open. The
/// buffer is only parsed once [`FrameScanner`] sees a possible end of the
/// value, so large messages are decoded once rather than after every read.
pub async fn read_message<T, R>(reader: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut scanner = FrameScanner::default();

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if !scanner.started {
                return Err(ProtocolError::UnexpectedEof);
            }
            return decode_message(&buf)?.ok_or(ProtocolError::Truncated {
                received: buf.len(),
            });
        }

        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                max: MAX_MESSAGE_SIZE,
            });
        }

        if scanner.feed(&chunk[..n])
            && let Some(msg) = decode_message(&buf)?
        {
            return Ok(msg);
        }
    }
}

/// Incremental scan of JSON structure across reads.
///
/// Tracks nesting depth and string state only; it never validates. `feed`
/// reports when a top-level value may have ended, and the real decoder
/// decides.
#[derive(Debug, Default)]
struct FrameScanner {
    started: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Top-level value is a bare number or literal
    scalar: bool,
}

impl FrameScanner {
    fn feed(&mut self, bytes: &[u8]) -> bool {
        let mut boundary = false;

        for &b in bytes {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    boundary |= self.depth == 0;
                }
                continue;
            }

            if self.scalar {
                if !(b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'-')) {
                    boundary = true;
                }
                continue;
            }

            match b {
                b' ' | b'\t' | b'\n' | b'\r' => {}
                b'"' => {
                    self.started = true;
                    self.in_string = true;
                }
                b'{' | b'[' => {
                    self.started = true;
                    self.depth += 1;
                }
                b'}' | b']' => {
                    self.started = true;
                    // A stray closer at depth 0 is left for the decoder to reject
                    self.depth = self.depth.saturating_sub(1);
                    boundary |= self.depth == 0;
                }
                _ if self.depth == 0 && !self.started => {
                    self.started = true;
                    self.scalar = true;
                }
                _ => self.started = true,
            }
        }

        boundary
    }
}
