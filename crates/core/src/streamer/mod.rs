//! Routes envelope frames to the controller as parameter injections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    rig::{
        protocol::{InjectParameterData, ParameterCreation},
        InjectMode, ParameterValue, RigMessage, RigSession, Transport,
    },
    Frame, Result,
};

/// Custom controller parameter the envelope is written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub id: String,
    pub min: f32,
    pub max: f32,
    pub default_value: f32,
    pub explanation: String,
}

impl Default for ParameterDefinition {
    fn default() -> Self {
        Self {
            id: "LipLevel".to_string(),
            min: 0.0,
            max: 1.0,
            default_value: 0.0,
            explanation: "Mouth openness driven by speech loudness".to_string(),
        }
    }
}

impl ParameterDefinition {
    fn creation(&self) -> RigMessage {
        RigMessage::ParameterCreationRequest(ParameterCreation {
            parameter_name: self.id.clone(),
            explanation: self.explanation.clone(),
            min: self.min,
            max: self.max,
            default_value: self.default_value,
        })
    }
}

/// A single parameter update built from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRequest {
    pub id: String,
    pub value: f32,
    pub weight: f32,
    pub face_found: bool,
    pub mode: InjectMode,
}

impl ParameterRequest {
    pub fn into_message(self) -> RigMessage {
        RigMessage::InjectParameterDataRequest(InjectParameterData {
            face_found: self.face_found,
            mode: self.mode,
            parameter_values: vec![ParameterValue {
                id: self.id,
                value: self.value,
                weight: self.weight,
            }],
        })
    }
}

/// Outcome of a fully streamed clip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReport {
    pub frames_sent: usize,
}

/// Sends one parameter update per frame, paced by a fixed delay.
#[derive(Debug, Clone)]
pub struct ParameterStreamer {
    parameter_id: String,
    weight: f32,
    pacing: Duration,
    face_found: bool,
}

impl ParameterStreamer {
    /// Streams `parameter_id` at full weight, pausing `pacing` after each frame.
    pub fn new(parameter_id: impl Into<String>, pacing: Duration) -> Self {
        Self {
            parameter_id: parameter_id.into(),
            weight: 1.0,
            pacing,
            face_found: false,
        }
    }

    /// Blend weight sent with every value.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn parameter_id(&self) -> &str {
        &self.parameter_id
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    pub fn request_for(&self, frame: &Frame) -> ParameterRequest {
        ParameterRequest {
            id: self.parameter_id.clone(),
            value: frame.value,
            weight: self.weight,
            face_found: self.face_found,
            mode: InjectMode::Set,
        }
    }

    /// Defines the custom parameter on the controller. Re-creating an
    /// existing parameter with the same definition is accepted.
    pub async fn register<T: Transport>(
        session: &mut RigSession<T>,
        definition: &ParameterDefinition,
    ) -> Result<()> {
        session.send_resilient(definition.creation()).await?;
        tracing::info!(parameter = %definition.id, "registered custom parameter");
        Ok(())
    }

    /// Streams every frame in order. The first failed send ends the clip.
    pub async fn stream<T, I>(&self, session: &mut RigSession<T>, frames: I) -> Result<StreamReport>
    where
        T: Transport,
        I: IntoIterator<Item = Frame>,
    {
        let mut report = StreamReport::default();

        for frame in frames {
            let request = self.request_for(&frame);
            if let Err(err) = session.send_resilient(request.into_message()).await {
                tracing::warn!(
                    frame = frame.index,
                    sent = report.frames_sent,
                    error = %err,
                    "parameter streaming halted"
                );
                return Err(err);
            }
            report.frames_sent += 1;
            tokio::time::sleep(self.pacing).await;
        }

        tracing::debug!(frames = report.frames_sent, "parameter streaming finished");
        Ok(report)
    }
}
