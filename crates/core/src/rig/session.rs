use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    protocol::{
        AuthenticationData, AuthenticationOutcome, PluginInfo, RigMessage, RigRequest, RigResponse,
        TokenGranted,
    },
    Transport,
};
use crate::{LipSyncError, Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
}

/// A session shared between tasks. The mutex is the single-writer guard:
/// whoever holds it is the only one talking to the controller.
pub type SharedRig<T> = Arc<tokio::sync::Mutex<RigSession<T>>>;

/// Connection and authentication state for one controller.
///
/// Created once, authenticated once and reused for every clip. The
/// authentication token only lives in memory.
#[derive(Debug)]
pub struct RigSession<T> {
    transport: T,
    plugin: PluginInfo,
    connection: ConnectionState,
    auth: AuthState,
    token: Option<String>,
    reconnects: u64,
}

impl<T: Transport> RigSession<T> {
    pub fn new(transport: T, plugin: PluginInfo) -> Self {
        Self {
            transport,
            plugin,
            connection: ConnectionState::Disconnected,
            auth: AuthState::Unauthenticated,
            token: None,
            reconnects: 0,
        }
    }

    /// Wraps the session for sharing between tasks.
    pub fn shared(self) -> SharedRig<T> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Whether a transport connection is currently believed to be open.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Authentication is lost whenever the connection is.
    pub fn auth_state(&self) -> AuthState {
        self.auth
    }

    /// Number of recovery cycles that re-established the connection.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Borrow of the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens the transport. Does not authenticate.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport
            .open()
            .await
            .map_err(|e| LipSyncError::Connection(e.to_string()))?;
        self.connection = ConnectionState::Connected;
        tracing::info!(plugin = %self.plugin.plugin_name, "connected to controller");
        Ok(())
    }

    /// Authenticates the plugin unless already authenticated. A token is
    /// requested from the controller the first time; later calls reuse it.
    pub async fn authenticate(&mut self) -> Result<()> {
        if self.auth == AuthState::Authenticated {
            return Ok(());
        }

        let token = match self.token.clone() {
            Some(token) => token,
            None => {
                let token = self.request_token().await?;
                self.token = Some(token.clone());
                token
            }
        };

        let message = RigMessage::AuthenticationRequest(AuthenticationData {
            plugin_name: self.plugin.plugin_name.clone(),
            plugin_developer: self.plugin.plugin_developer.clone(),
            authentication_token: token,
        });
        let outcome: AuthenticationOutcome = match self.call(&message).await {
            Ok(response) => response.data()?,
            Err(err @ LipSyncError::Api { .. }) => {
                self.token = None;
                return Err(rejected_as_auth(err));
            }
            Err(err) => return Err(err),
        };

        if !outcome.authenticated {
            // The controller revoked it; ask for a new one next time.
            self.token = None;
            return Err(LipSyncError::Auth(outcome.reason));
        }

        self.auth = AuthState::Authenticated;
        tracing::info!("authenticated with controller");
        Ok(())
    }

    /// Sends `message`, surviving one closed connection.
    ///
    /// If the transport reports the connection closed, the session runs a
    /// single recovery cycle (close, reconnect, re-authenticate if needed)
    /// and retries once. Any other failure, or a second failure, is
    /// returned as is.
    pub async fn send_resilient(&mut self, message: RigMessage) -> Result<RigResponse> {
        if self.connection == ConnectionState::Disconnected {
            self.reestablish().await?;
        }

        let response = match self.transmit(&message).await {
            Err(TransportError::Closed) => {
                tracing::warn!(request = message.name(), "controller connection closed, reconnecting");
                self.recover().await?;
                self.transmit(&message).await?
            }
            other => other?,
        };

        response.expect(message.expected_response())
    }

    async fn request_token(&mut self) -> Result<String> {
        let message = RigMessage::AuthenticationTokenRequest(self.plugin.clone());
        let granted: TokenGranted = self
            .call(&message)
            .await
            .map_err(rejected_as_auth)?
            .data()?;
        Ok(granted.authentication_token)
    }

    /// One request, no recovery.
    async fn call(&mut self, message: &RigMessage) -> Result<RigResponse> {
        self.transmit(message)
            .await?
            .expect(message.expected_response())
    }

    async fn transmit(&mut self, message: &RigMessage) -> std::result::Result<RigResponse, TransportError> {
        if self.connection == ConnectionState::Disconnected {
            return Err(TransportError::Closed);
        }

        let request = RigRequest::new(message.clone());
        let result = self.transport.request(&request).await;
        if let Err(TransportError::Closed) = result {
            self.mark_disconnected();
        }
        result
    }

    async fn recover(&mut self) -> Result<()> {
        self.reestablish().await?;
        self.reconnects += 1;
        Ok(())
    }

    async fn reestablish(&mut self) -> Result<()> {
        self.transport.close().await;
        self.mark_disconnected();
        self.connect().await?;
        if self.auth != AuthState::Authenticated {
            self.authenticate().await?;
        }
        Ok(())
    }

    /// Authentication is tied to the connection on the controller side.
    fn mark_disconnected(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.auth = AuthState::Unauthenticated;
    }
}

fn rejected_as_auth(err: LipSyncError) -> LipSyncError {
    match err {
        LipSyncError::Api { code, message } => LipSyncError::Auth(format!("{message} (error {code})")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{
        mock::MockTransport,
        protocol::{InjectMode, InjectParameterData, ParameterValue},
    };

    fn plugin() -> PluginInfo {
        PluginInfo {
            plugin_name: "lipsync".into(),
            plugin_developer: "tests".into(),
        }
    }

    fn inject(value: f32) -> RigMessage {
        RigMessage::InjectParameterDataRequest(InjectParameterData {
            face_found: false,
            mode: InjectMode::Set,
            parameter_values: vec![ParameterValue {
                id: "LipLevel".into(),
                value,
                weight: 1.0,
            }],
        })
    }

    async fn ready_session(transport: MockTransport) -> RigSession<MockTransport> {
        let mut session = RigSession::new(transport, plugin());
        session.connect().await.unwrap();
        session.authenticate().await.unwrap();
        session
    }

    #[tokio::test]
    async fn starts_disconnected_and_unauthenticated() {
        let (transport, _) = MockTransport::new();
        let session = RigSession::new(transport, plugin());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn authenticates_once_with_a_fresh_token() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;
        session.authenticate().await.unwrap();

        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert_eq!(handle.token_requests(), 1);
        assert_eq!(handle.auth_requests(), 1);
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_connection_error() {
        let (transport, handle) = MockTransport::new();
        handle.fail_next_open(TransportError::Other("refused".into()));
        let mut session = RigSession::new(transport, plugin());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, LipSyncError::Connection(_)));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn rejected_authentication_is_an_auth_error() {
        let (transport, handle) = MockTransport::new();
        handle.reject_auth();
        let mut session = RigSession::new(transport, plugin());
        session.connect().await.unwrap();

        let err = session.authenticate().await.unwrap_err();
        assert!(matches!(err, LipSyncError::Auth(_)));
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn denied_token_is_an_auth_error() {
        let (transport, handle) = MockTransport::new();
        handle.deny_token();
        let mut session = RigSession::new(transport, plugin());
        session.connect().await.unwrap();

        let err = session.authenticate().await.unwrap_err();
        assert!(matches!(err, LipSyncError::Auth(_)));
    }

    #[tokio::test]
    async fn api_rejected_token_is_discarded() {
        let (transport, handle) = MockTransport::new();
        let mut session = RigSession::new(transport, plugin());
        session.connect().await.unwrap();
        handle.fail_auth_with_api_error(true);

        let err = session.authenticate().await.unwrap_err();
        assert!(matches!(err, LipSyncError::Auth(_)));
        assert_eq!(handle.token_requests(), 1);

        handle.fail_auth_with_api_error(false);
        session.authenticate().await.unwrap();
        assert_eq!(handle.token_requests(), 2);
        assert_eq!(session.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn healthy_send_needs_no_recovery() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;

        session.send_resilient(inject(0.4)).await.unwrap();
        assert_eq!(session.reconnects(), 0);
        assert_eq!(handle.opens(), 1);
        assert_eq!(handle.injected_values(), vec![0.4]);
    }

    #[tokio::test]
    async fn one_closed_connection_is_recovered_once() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;
        handle.script([Some(TransportError::Closed)]);

        session.send_resilient(inject(0.7)).await.unwrap();

        assert_eq!(session.reconnects(), 1);
        assert_eq!(handle.opens(), 2);
        assert_eq!(handle.closes(), 1);
        // Re-authenticated with the cached token, no second token prompt.
        assert_eq!(handle.auth_requests(), 2);
        assert_eq!(handle.token_requests(), 1);
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert_eq!(handle.injected_values(), vec![0.7]);
    }

    #[tokio::test]
    async fn second_closed_connection_is_not_retried() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;
        handle.script([Some(TransportError::Closed), Some(TransportError::Closed)]);

        let err = session.send_resilient(inject(0.7)).await.unwrap_err();

        assert!(matches!(err, LipSyncError::Transport(TransportError::Closed)));
        assert_eq!(session.reconnects(), 1);
        assert_eq!(handle.opens(), 2);
        assert_eq!(handle.inject_attempts(), 2);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn other_transport_errors_propagate_without_recovery() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;
        handle.script([Some(TransportError::Other("malformed frame".into()))]);

        let err = session.send_resilient(inject(0.1)).await.unwrap_err();

        assert!(matches!(err, LipSyncError::Transport(TransportError::Other(_))));
        assert_eq!(session.reconnects(), 0);
        assert_eq!(handle.opens(), 1);
        assert_eq!(handle.inject_attempts(), 1);
        assert_eq!(session.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn failed_reconnect_propagates_connection_error() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;
        handle.script([Some(TransportError::Closed)]);
        handle.fail_next_open(TransportError::Other("refused".into()));

        let err = session.send_resilient(inject(0.2)).await.unwrap_err();
        assert!(matches!(err, LipSyncError::Connection(_)));
        assert_eq!(handle.inject_attempts(), 1);
    }

    #[tokio::test]
    async fn disconnected_session_reconnects_before_sending() {
        let (transport, handle) = MockTransport::new();
        let mut session = ready_session(transport).await;
        handle.script([Some(TransportError::Closed), Some(TransportError::Closed)]);
        session.send_resilient(inject(0.1)).await.unwrap_err();

        session.send_resilient(inject(0.3)).await.unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(handle.injected_values(), vec![0.3]);
    }
}
