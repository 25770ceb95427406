//! Client for connecting to the control socket

use std::{path::Path, sync::Arc, time::Duration};

use tokio::{net::UnixStream, sync::Mutex};
use tracing::{debug, trace, warn};

use crate::{
    CampaignCommand, ControlError, Request, RequestCommand, Response, ResponseData,
    ResponsePayload, Result, SystemCommand,
    protocol::{MAX_RESPONSE_SIZE, PROTOCOL_VERSION, read_frame, write_frame},
};

/// Client for communicating with the simplemerge control server
pub struct ControlClient {
    socket_path: String,
    timeout: Duration,
    /// Optional persistent connection for watch mode to avoid reconnection overhead
    persistent_connection: Option<Arc<Mutex<Option<UnixStream>>>>,
}

impl ControlClient {
    /// Create a new control client with the given socket path
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
            persistent_connection: None,
        }
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep one connection open across requests (used by `--watch`)
    ///
    /// The connection is re-established once if it is lost.
    #[must_use]
    pub fn with_persistent_connection(mut self) -> Self {
        self.persistent_connection = Some(Arc::new(Mutex::new(None)));
        self
    }

    async fn connect(&self) -> Result<UnixStream> {
        debug!("Connecting to control socket: {}", self.socket_path);
        let stream = UnixStream::connect(&self.socket_path).await?;
        Ok(stream)
    }

    /// Send a request and receive a response
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Connection fails
    /// - Protocol error occurs
    /// - Request times out
    /// - Server returns an error
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.send_request_internal(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn send_request_internal(&self, request: Request) -> Result<Response> {
        if let Some(persistent) = &self.persistent_connection {
            self.send_request_persistent(request, persistent).await
        } else {
            let mut stream = self.connect().await?;
            Self::send_and_receive(&mut stream, &request).await
        }
    }

    async fn send_request_persistent(
        &self,
        request: Request,
        persistent: &Arc<Mutex<Option<UnixStream>>>,
    ) -> Result<Response> {
        let mut guard = persistent.lock().await;

        let result = if let Some(stream) = guard.as_mut() {
            Self::send_and_receive(stream, &request).await
        } else {
            let mut stream = self.connect().await?;
            let result = Self::send_and_receive(&mut stream, &request).await;
            if result.is_ok() {
                *guard = Some(stream);
            }
            result
        };

        match result {
            // A server-side error is a valid reply; the connection is fine
            Err(ControlError::ServerError(_)) | Ok(_) => result,
            Err(_) => {
                warn!(
                    "Persistent connection failed, reconnecting to {}",
                    self.socket_path
                );
                *guard = None;

                let mut stream = self.connect().await?;
                let result = Self::send_and_receive(&mut stream, &request).await;
                if result.is_ok() {
                    *guard = Some(stream);
                }
                result
            }
        }
    }

    async fn send_and_receive(stream: &mut UnixStream, request: &Request) -> Result<Response> {
        trace!("Sending request: {request:?}");
        write_frame(stream, request).await?;

        let response: Response = read_frame(stream, MAX_RESPONSE_SIZE).await?;

        if !response.is_version_compatible() {
            return Err(ControlError::IncompatibleVersion {
                peer: response.version,
                ours: PROTOCOL_VERSION,
            });
        }

        if let ResponsePayload::Error(ref err) = response.payload {
            return Err(ControlError::ServerError(err.clone()));
        }

        Ok(response)
    }

    /// Send `command` and return its data payload, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server reports an error
    pub async fn command(&self, command: RequestCommand) -> Result<Option<ResponseData>> {
        let response = self.send_request(Request::new(command)).await?;
        Ok(match response.payload {
            ResponsePayload::Data(data) => Some(*data),
            ResponsePayload::Ok | ResponsePayload::Error(_) => None,
        })
    }

    /// Check the server is alive
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached
    pub async fn ping(&self) -> Result<()> {
        self.command(RequestCommand::System(SystemCommand::Ping))
            .await
            .map(|_| ())
    }

    /// Ask the running campaign to stop
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached or has no run
    pub async fn stop(&self) -> Result<String> {
        match self
            .command(RequestCommand::Campaign(CampaignCommand::Stop))
            .await?
        {
            Some(ResponseData::Message(message)) => Ok(message),
            _ => Ok("Stop requested".to_string()),
        }
    }

    /// Check if the control socket exists
    ///
    /// # Errors
    ///
    /// Returns an error if the socket doesn't exist
    pub fn check_socket_exists(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);
        if !path.exists() {
            return Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path
            )));
        }
        Ok(())
    }
}
