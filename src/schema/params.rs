//! Encoding parameters for SPLV streams.

use serde::{Deserialize, Serialize};

fn default_gop_size() -> u32 {
    30
}

fn default_max_brick_group_size() -> u32 {
    512
}

fn default_motion_vectors() -> bool {
    true
}

/// Parameters controlling how an encoder structures its output.
///
/// They are stored in the file header, so a decoder always sees the values
/// the stream was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParams {
    /// Keyframe interval. Frame `i` is a keyframe iff `i % gop_size == 0`.
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,
    /// Maximum number of brick records compressed together as one job.
    #[serde(default = "default_max_brick_group_size")]
    pub max_brick_group_size: u32,
    /// Search for displaced bricks in the previous frame before diffing.
    #[serde(default = "default_motion_vectors")]
    pub motion_vectors: bool,
}

impl Default for EncodingParams {
    fn default() -> Self {
        Self {
            gop_size: default_gop_size(),
            max_brick_group_size: default_max_brick_group_size(),
            motion_vectors: default_motion_vectors(),
        }
    }
}

impl EncodingParams {
    /// Parse parameters from a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ParamsError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Validate parameters.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.gop_size == 0 {
            return Err(ParamsError::InvalidGopSize);
        }
        if self.max_brick_group_size == 0 {
            return Err(ParamsError::InvalidBrickGroupSize);
        }
        Ok(())
    }

    /// Whether frame `idx` is encoded as a keyframe under these parameters.
    pub fn is_keyframe(&self, idx: u64) -> bool {
        idx % self.gop_size as u64 == 0
    }
}

/// Parameter validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("GOP size must be at least 1")]
    InvalidGopSize,
    #[error("Max brick group size must be at least 1")]
    InvalidBrickGroupSize,
    #[error("Malformed parameters document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        let params = EncodingParams::default();
        assert!(params.validate().is_ok());
        assert!(params.is_keyframe(0));
        assert!(params.is_keyframe(30));
        assert!(!params.is_keyframe(31));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let params = EncodingParams {
            gop_size: 0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParamsError::InvalidGopSize)));

        let params = EncodingParams {
            max_brick_group_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParamsError::InvalidBrickGroupSize)
        ));
    }

    #[test]
    fn test_json_defaults() {
        let params = EncodingParams::from_json_str(r#"{ "gop_size": 10 }"#).unwrap();
        assert_eq!(params.gop_size, 10);
        assert_eq!(params.max_brick_group_size, 512);
        assert!(params.motion_vectors);
    }

    #[test]
    fn test_json_rejects_invalid() {
        assert!(matches!(
            EncodingParams::from_json_str(r#"{ "gop_size": 0 }"#),
            Err(ParamsError::InvalidGopSize)
        ));
        assert!(matches!(
            EncodingParams::from_json_str("not json"),
            Err(ParamsError::Parse(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let params = EncodingParams {
            gop_size: 12,
            max_brick_group_size: 64,
            motion_vectors: false,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(EncodingParams::from_json_str(&json).unwrap(), params);
    }
}
