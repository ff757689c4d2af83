//! Scripted in-memory [`Transport`] for tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::json;

use super::{
    protocol::{RigMessage, RigRequest, RigResponse},
    Transport,
};
use crate::TransportError;

#[derive(Debug, Default)]
struct State {
    opens: usize,
    closes: usize,
    token_requests: usize,
    auth_requests: usize,
    creations: usize,
    inject_attempts: usize,
    injected: Vec<f32>,
    /// Consumed by every non-authentication request; `None` answers normally.
    script: VecDeque<Option<TransportError>>,
    open_failures: VecDeque<TransportError>,
    reject_auth: bool,
    auth_api_error: bool,
    deny_token: bool,
}

#[derive(Debug)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<State>>,
}

/// Test-side view of a [`MockTransport`] that was moved into a session.
#[derive(Debug, Clone)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(State::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Option<TransportError>>) {
        self.state().script.extend(outcomes);
    }

    pub(crate) fn fail_next_open(&self, err: TransportError) {
        self.state().open_failures.push_back(err);
    }

    pub(crate) fn reject_auth(&self) {
        self.state().reject_auth = true;
    }

    /// Answer authentication with an `APIError` instead of a response.
    pub(crate) fn fail_auth_with_api_error(&self, enabled: bool) {
        self.state().auth_api_error = enabled;
    }

    pub(crate) fn deny_token(&self) {
        self.state().deny_token = true;
    }

    pub(crate) fn opens(&self) -> usize {
        self.state().opens
    }

    pub(crate) fn closes(&self) -> usize {
        self.state().closes
    }

    pub(crate) fn token_requests(&self) -> usize {
        self.state().token_requests
    }

    pub(crate) fn auth_requests(&self) -> usize {
        self.state().auth_requests
    }

    pub(crate) fn creations(&self) -> usize {
        self.state().creations
    }

    pub(crate) fn inject_attempts(&self) -> usize {
        self.state().inject_attempts
    }

    /// Values of every injection the controller accepted, in arrival order.
    pub(crate) fn injected_values(&self) -> Vec<f32> {
        self.state().injected.clone()
    }
}

fn response(message_type: &str, data: serde_json::Value) -> RigResponse {
    RigResponse {
        request_id: String::new(),
        message_type: message_type.to_string(),
        data,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.opens += 1;
        match state.open_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn request(&mut self, request: &RigRequest) -> Result<RigResponse, TransportError> {
        let mut state = self.state();
        match &request.message {
            RigMessage::AuthenticationTokenRequest(_) => {
                state.token_requests += 1;
                if state.deny_token {
                    return Ok(response(
                        "APIError",
                        json!({ "errorID": 50, "message": "user denied plugin access" }),
                    ));
                }
                Ok(response(
                    "AuthenticationTokenResponse",
                    json!({ "authenticationToken": "secret-token" }),
                ))
            }
            RigMessage::AuthenticationRequest(_) => {
                state.auth_requests += 1;
                if state.auth_api_error {
                    return Ok(response(
                        "APIError",
                        json!({ "errorID": 8, "message": "token invalid" }),
                    ));
                }
                let accepted = !state.reject_auth;
                Ok(response(
                    "AuthenticationResponse",
                    json!({ "authenticated": accepted, "reason": "scripted" }),
                ))
            }
            RigMessage::ParameterCreationRequest(creation) => {
                if let Some(Some(err)) = state.script.pop_front() {
                    return Err(err);
                }
                state.creations += 1;
                Ok(response(
                    "ParameterCreationResponse",
                    json!({ "parameterName": creation.parameter_name }),
                ))
            }
            RigMessage::InjectParameterDataRequest(data) => {
                state.inject_attempts += 1;
                if let Some(Some(err)) = state.script.pop_front() {
                    return Err(err);
                }
                state
                    .injected
                    .extend(data.parameter_values.iter().map(|value| value.value));
                Ok(response("InjectParameterDataResponse", json!({})))
            }
        }
    }

    async fn close(&mut self) {
        self.state().closes += 1;
    }
}
