//! Message schema of the VTube Studio public API.
//!
//! Every request is wrapped in the same envelope; the payload is tagged by
//! `messageType` and carried in `data`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{LipSyncError, Result};

pub const API_NAME: &str = "VTubeStudioPublicAPI";
pub const API_VERSION: &str = "1.0";

const API_ERROR: &str = "APIError";

/// Outgoing request envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigRequest {
    pub api_name: &'static str,
    pub api_version: &'static str,
    #[serde(rename = "requestID")]
    pub request_id: String,
    #[serde(flatten)]
    pub message: RigMessage,
}

impl RigRequest {
    pub fn new(message: RigMessage) -> Self {
        Self {
            api_name: API_NAME,
            api_version: API_VERSION,
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            message,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The requests this crate issues to the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "messageType", content = "data")]
pub enum RigMessage {
    AuthenticationTokenRequest(PluginInfo),
    AuthenticationRequest(AuthenticationData),
    ParameterCreationRequest(ParameterCreation),
    InjectParameterDataRequest(InjectParameterData),
}

impl RigMessage {
    /// `messageType` the controller answers a successful request with.
    pub fn expected_response(&self) -> &'static str {
        match self {
            Self::AuthenticationTokenRequest(_) => "AuthenticationTokenResponse",
            Self::AuthenticationRequest(_) => "AuthenticationResponse",
            Self::ParameterCreationRequest(_) => "ParameterCreationResponse",
            Self::InjectParameterDataRequest(_) => "InjectParameterDataResponse",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationTokenRequest(_) => "AuthenticationTokenRequest",
            Self::AuthenticationRequest(_) => "AuthenticationRequest",
            Self::ParameterCreationRequest(_) => "ParameterCreationRequest",
            Self::InjectParameterDataRequest(_) => "InjectParameterDataRequest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub plugin_name: String,
    pub plugin_developer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationData {
    pub plugin_name: String,
    pub plugin_developer: String,
    pub authentication_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterCreation {
    pub parameter_name: String,
    pub explanation: String,
    pub min: f32,
    pub max: f32,
    pub default_value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectMode {
    Set,
    Add,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectParameterData {
    pub face_found: bool,
    pub mode: InjectMode,
    pub parameter_values: Vec<ParameterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterValue {
    pub id: String,
    pub value: f32,
    pub weight: f32,
}

/// Incoming response envelope. The payload stays untyped until the caller
/// asks for a concrete shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RigResponse {
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RigResponse {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_error(&self) -> bool {
        self.message_type == API_ERROR
    }

    /// Turns `APIError` responses and unexpected message types into errors.
    pub fn expect(self, message_type: &str) -> Result<Self> {
        if self.is_error() {
            let error: ApiErrorData = serde_json::from_value(self.data).unwrap_or_default();
            return Err(LipSyncError::Api {
                code: error.error_id,
                message: error.message,
            });
        }
        if self.message_type != message_type {
            return Err(LipSyncError::Protocol(format!(
                "expected {message_type}, got {}",
                self.message_type
            )));
        }
        Ok(self)
    }

    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorData {
    #[serde(rename = "errorID", default)]
    error_id: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGranted {
    pub authentication_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOutcome {
    pub authenticated: bool,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inject_request_uses_controller_field_names() {
        let request = RigRequest::new(RigMessage::InjectParameterDataRequest(InjectParameterData {
            face_found: false,
            mode: InjectMode::Set,
            parameter_values: vec![ParameterValue {
                id: "LipLevel".into(),
                value: 0.5,
                weight: 1.0,
            }],
        }));

        let value: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["apiName"], "VTubeStudioPublicAPI");
        assert_eq!(value["apiVersion"], "1.0");
        assert_eq!(value["requestID"].as_str().unwrap().len(), 32);
        assert_eq!(value["messageType"], "InjectParameterDataRequest");
        assert_eq!(
            value["data"],
            json!({
                "faceFound": false,
                "mode": "set",
                "parameterValues": [{ "id": "LipLevel", "value": 0.5, "weight": 1.0 }]
            })
        );
    }

    #[test]
    fn parameter_creation_payload() {
        let request = RigRequest::new(RigMessage::ParameterCreationRequest(ParameterCreation {
            parameter_name: "LipLevel".into(),
            explanation: "mouth".into(),
            min: 0.0,
            max: 1.0,
            default_value: 0.0,
        }));
        let value: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["data"]["parameterName"], "LipLevel");
        assert_eq!(value["data"]["defaultValue"], 0.0);
    }

    #[test]
    fn api_errors_become_typed_errors() {
        let response = RigResponse::from_json(
            r#"{"apiName":"VTubeStudioPublicAPI","requestID":"a","messageType":"APIError",
                "data":{"errorID":8,"message":"token invalid"}}"#,
        )
        .unwrap();

        match response.expect("AuthenticationResponse") {
            Err(LipSyncError::Api { code, message }) => {
                assert_eq!(code, 8);
                assert_eq!(message, "token invalid");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_response_is_a_protocol_error() {
        let response = RigResponse::from_json(r#"{"messageType":"StatisticsResponse","data":{}}"#).unwrap();
        assert!(matches!(
            response.expect("AuthenticationResponse"),
            Err(LipSyncError::Protocol(_))
        ));
    }

    #[test]
    fn reads_typed_payloads() {
        let response = RigResponse::from_json(
            r#"{"messageType":"AuthenticationResponse","data":{"authenticated":true,"reason":"ok"}}"#,
        )
        .unwrap()
        .expect("AuthenticationResponse")
        .unwrap();
        let outcome: AuthenticationOutcome = response.data().unwrap();
        assert!(outcome.authenticated);
    }
}
