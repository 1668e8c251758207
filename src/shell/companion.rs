use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::UnixStream,
};

use super::{CommandOutput, PrivilegedShell};
use crate::error::ControlError;

pub const DEFAULT_SOCKET_PATH: &str = "/dev/socket/blocker";

/// Upper bound for one frame in either direction
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct CommandRequest {
    command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stdin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct CommandResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    exit_code: i32,
    /// Set when the companion refuses to serve this client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Client of a privileged companion daemon listening on a Unix domain socket
///
/// One connection per command. Each direction carries a single frame: a big-endian
/// `u32` length followed by that many bytes of JSON.
pub struct CompanionShell {
    socket_path: PathBuf,
    timeout: Duration,
}

impl CompanionShell {
    pub fn new<P: AsRef<Path>>(socket_path: P, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    async fn exchange(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandResponse, ControlError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| self.connect_error(source))?;

        let request = serde_json::to_vec(&CommandRequest {
            command: command.to_string(),
            stdin: stdin.map(str::to_string),
        })
        .map_err(|source| ControlError::BackendUnavailable {
            reason: format!("failed to encode request: {source}"),
        })?;
        write_frame(&mut stream, &request)
            .await
            .map_err(transport_error)?;

        let response = read_frame(&mut stream).await.map_err(transport_error)?;
        serde_json::from_slice(&response).map_err(|source| ControlError::BackendUnavailable {
            reason: format!("malformed response from companion: {source}"),
        })
    }

    fn connect_error(&self, source: io::Error) -> ControlError {
        match source.kind() {
            io::ErrorKind::PermissionDenied => ControlError::PermissionDenied {
                reason: format!("cannot connect to {}: {source}", self.socket_path.display()),
            },
            _ => ControlError::BackendUnavailable {
                reason: format!(
                    "companion not reachable at {}: {source}",
                    self.socket_path.display()
                ),
            },
        }
    }
}

impl CompanionShell {
    async fn run(&self, command: &str, stdin: Option<&str>) -> Result<CommandOutput, ControlError> {
        log::debug!("companion: {command}");

        let response = tokio::time::timeout(self.timeout, self.exchange(command, stdin))
            .await
            .map_err(|_| ControlError::BackendUnavailable {
                reason: format!("companion did not answer within {:?}", self.timeout),
            })??;

        if let Some(reason) = response.error {
            return Err(ControlError::PermissionDenied { reason });
        }

        Ok(CommandOutput {
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.exit_code,
        })
    }
}

#[async_trait]
impl PrivilegedShell for CompanionShell {
    async fn run_command(&self, command: &str) -> Result<CommandOutput, ControlError> {
        self.run(command, None).await
    }

    async fn run_command_with_input(
        &self,
        command: &str,
        input: &str,
    ) -> Result<CommandOutput, ControlError> {
        self.run(command, Some(input)).await
    }
}

fn transport_error(source: io::Error) -> ControlError {
    ControlError::BackendUnavailable {
        reason: format!("companion transport error: {source}"),
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes (max: {MAX_FRAME_SIZE})", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max: {MAX_FRAME_SIZE})"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Serve exactly one request with the given handler
    fn serve_once<F>(listener: UnixListener, handler: F) -> tokio::task::JoinHandle<CommandRequest>
    where
        F: FnOnce(&str) -> Vec<u8> + Send + 'static,
    {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut stream).await.unwrap();
            let request: CommandRequest = serde_json::from_slice(&request).unwrap();
            let response = handler(&request.command);
            write_frame(&mut stream, &response).await.unwrap();
            request
        })
    }

    #[tokio::test]
    async fn forwards_command_and_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("companion.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve_once(listener, |_| {
            serde_json::to_vec(&CommandResponse {
                stdout: "0\n".to_string(),
                exit_code: 0,
                ..Default::default()
            })
            .unwrap()
        });

        let shell = CompanionShell::new(&socket, Duration::from_secs(5));
        let output = shell.run_command("id -u").await.unwrap();

        assert_eq!(output.stdout, "0\n");
        assert!(output.success());
        let request = server.await.unwrap();
        assert_eq!(request.command, "id -u");
        assert_eq!(request.stdin, None);
    }

    #[tokio::test]
    async fn input_travels_in_the_request_frame() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("companion.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve_once(listener, |_| br#"{"exit_code":0}"#.to_vec());

        let shell = CompanionShell::new(&socket, Duration::from_secs(5));
        let input = "<rules>\n".repeat(20_000);
        shell
            .run_command_with_input("cat > /data/system/ifw/a.xml.tmp", &input)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert_eq!(request.stdin.as_deref(), Some(input.as_str()));
    }

    #[tokio::test]
    async fn refusal_maps_to_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("companion.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let _server = serve_once(listener, |_| {
            br#"{"error":"client not authorized"}"#.to_vec()
        });

        let shell = CompanionShell::new(&socket, Duration::from_secs(5));
        let err = shell.run_command("id -u").await.unwrap_err();
        assert_eq!(
            err,
            ControlError::PermissionDenied {
                reason: "client not authorized".to_string()
            }
        );
    }

    #[tokio::test]
    async fn garbage_response_is_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("companion.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let _server = serve_once(listener, |_| b"not json".to_vec());

        let shell = CompanionShell::new(&socket, Duration::from_secs(5));
        let err = shell.run_command("id -u").await.unwrap_err();
        assert!(matches!(err, ControlError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_socket_is_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let shell = CompanionShell::new(dir.path().join("absent.sock"), Duration::from_secs(1));
        let err = shell.run_command("id -u").await.unwrap_err();
        assert!(matches!(err, ControlError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            server.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        });
        let err = read_frame(&mut client).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
