use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

use super::transport::Transport;
use crate::error::QvmError;

/// Outbound command frame.
#[derive(Debug, Serialize)]
struct Request<'a> {
    execute: &'a str,
    arguments: &'a Map<String, Value>,
}

/// One line received from the server, classified.
#[derive(Debug, PartialEq)]
enum Reply {
    Event(Value),
    Return(Value),
    Error(Value),
}

impl Reply {
    fn parse(line: &str) -> Result<Self, QvmError> {
        let value: Value = serde_json::from_str(line).map_err(|e| QvmError::QmpDecode {
            message: format!("{e} in {line:?}"),
        })?;
        let Value::Object(mut obj) = value else {
            return Err(QvmError::QmpDecode {
                message: format!("expected a JSON object, got {line:?}"),
            });
        };
        if obj.contains_key("event") {
            return Ok(Reply::Event(Value::Object(obj)));
        }
        if let Some(err) = obj.remove("error") {
            return Ok(Reply::Error(err));
        }
        match obj.remove("return") {
            Some(ret) => Ok(Reply::Return(ret)),
            None => Err(QvmError::QmpDecode {
                message: format!("reply has neither 'return' nor 'error': {line:?}"),
            }),
        }
    }
}

/// A QMP session with capabilities already negotiated.
///
/// Only one command may be outstanding at a time; `send_command` borrows the
/// session mutably so callers are serialized.
pub struct QmpSession<S = UnixStream> {
    transport: Transport<S>,
}

impl QmpSession<UnixStream> {
    /// Connect to a VM's control socket and perform the handshake.
    pub async fn connect(path: &Path) -> Result<Self, QvmError> {
        let transport = Transport::connect(path).await?;
        Self::handshake(transport).await
    }
}

impl<S> QmpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over an already-open stream.
    pub async fn over(stream: S) -> Result<Self, QvmError> {
        Self::handshake(Transport::new(stream)).await
    }

    async fn handshake(mut transport: Transport<S>) -> Result<Self, QvmError> {
        // Greeting is read and discarded unvalidated.
        let greeting = transport.read_line().await?;
        tracing::trace!(greeting = ?greeting, "QMP greeting");

        let mut session = Self { transport };
        match session.send_command("qmp_capabilities", &Map::new()).await {
            Ok(_) => {}
            Err(QvmError::QmpCommand { payload, .. }) => {
                return Err(QvmError::QmpHandshake { payload });
            }
            Err(e) => return Err(e),
        }
        tracing::debug!("QMP capabilities negotiated");
        Ok(session)
    }

    /// Send a command and return its `return` payload.
    ///
    /// Event notifications arriving before the reply are skipped.
    pub async fn send_command(
        &mut self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, QvmError> {
        let frame = serde_json::to_string(&Request {
            execute: name,
            arguments,
        })
        .map_err(|e| QvmError::QmpDecode {
            message: format!("could not encode command '{name}': {e}"),
        })?;
        tracing::debug!(command = name, "QMP request");
        self.transport.write_line(&frame).await?;

        loop {
            let Some(line) = self.transport.read_line().await? else {
                return Err(QvmError::QmpDecode {
                    message: format!("connection closed before reply to '{name}'"),
                });
            };
            match Reply::parse(&line)? {
                Reply::Event(event) => {
                    tracing::debug!(command = name, event = %event, "skipping QMP event");
                }
                Reply::Return(value) => return Ok(value),
                Reply::Error(payload) => {
                    return Err(QvmError::QmpCommand {
                        command: name.to_string(),
                        payload,
                    });
                }
            }
        }
    }

    /// Send a command that takes no arguments.
    pub async fn execute(&mut self, name: &str) -> Result<Value, QvmError> {
        self.send_command(name, &Map::new()).await
    }

    /// Current run state as reported by `query-status` (e.g. `"running"`, `"paused"`).
    pub async fn query_status(&mut self) -> Result<String, QvmError> {
        let ret = self.execute("query-status").await?;
        ret.get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| QvmError::QmpDecode {
                message: format!("query-status reply has no status string: {ret}"),
            })
    }
}
