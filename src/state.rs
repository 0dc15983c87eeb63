use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::Parameters;

pub const DEFAULT_UI_WIDTH: u32 = 400;
pub const DEFAULT_UI_HEIGHT: u32 = 300;

/// Flat key/value document the host stores with the project.
///
/// Every parameter sits at the top level next to the editor size. Missing keys take their
/// default and unknown keys are ignored, so documents written by older or newer builds load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TapState {
    #[serde(flatten)]
    pub parameters: Parameters,
    pub ui_width: u32,
    pub ui_height: u32,
}

impl Default for TapState {
    fn default() -> Self {
        Self {
            parameters: Parameters::default(),
            ui_width: DEFAULT_UI_WIDTH,
            ui_height: DEFAULT_UI_HEIGHT,
        }
    }
}

impl TapState {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses a stored document. Out-of-range values are clamped the same way host
    /// automation is.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut state: TapState = serde_json::from_slice(bytes)?;
        state.parameters = state.parameters.sanitized();
        Ok(state)
    }
}
