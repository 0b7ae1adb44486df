//! Contains the data models for API requests and responses.

use crate::rail::{BurstCommand, JogCommand};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JogDirection {
    #[serde(alias = "+")]
    Positive,
    #[serde(alias = "-")]
    Negative,
}

/// Represents a request to jog the rail by a number of microsteps.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub direction: JogDirection,
    pub steps: i64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub acceleration: Option<f64>,
}

impl MoveRequest {
    /// `steps` is a magnitude; the sign comes from `direction`.
    pub fn into_command(self) -> Result<JogCommand, String> {
        if self.steps < 0 {
            return Err(format!("steps must not be negative (got {})", self.steps));
        }
        let delta = match self.direction {
            JogDirection::Positive => self.steps,
            JogDirection::Negative => -self.steps,
        };
        Ok(JogCommand { delta, speed_hz: self.speed, acceleration: self.acceleration })
    }
}

/// Represents a request to start a focus-bracketing burst.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstRequest {
    pub start_pos: i64,
    pub end_pos: i64,
    #[serde(alias = "numImages")]
    pub image_count: usize,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub acceleration: Option<f64>,
}

impl From<BurstRequest> for BurstCommand {
    fn from(request: BurstRequest) -> Self {
        BurstCommand {
            start: request.start_pos,
            end: request.end_pos,
            image_count: request.image_count,
            speed_hz: request.speed,
            acceleration: request.acceleration,
        }
    }
}
