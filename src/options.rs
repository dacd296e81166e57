use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{error::Result, postings::IndexFeatures};

/// Largest position a writer accepts unless configured otherwise.
pub const DEFAULT_MAX_POSITION: u32 = i32::MAX as u32 - 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PostingsOption {
    #[serde(default = "PostingsOption::default_max_position")]
    #[validate(range(min = 1, max = 2147483647))]
    pub max_position: u32,
    #[serde(default = "PostingsOption::default_payload_buffer_capacity")]
    #[validate(range(min = 1, max = 1048576))]
    pub payload_buffer_capacity: usize,
    #[serde(default = "PostingsOption::default_features")]
    pub features: FeaturesOption,
}

impl PostingsOption {
    fn default_features() -> FeaturesOption {
        FeaturesOption::default()
    }

    fn default_max_position() -> u32 {
        DEFAULT_MAX_POSITION
    }

    fn default_payload_buffer_capacity() -> usize {
        128
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(s: &str) -> Result<Self> {
        let option: Self = toml::from_str(s)?;
        option.validate()?;
        option.index_features()?;
        Ok(option)
    }

    pub fn index_features(&self) -> Result<IndexFeatures> {
        self.features.to_index_features().validate()
    }
}

impl Default for PostingsOption {
    fn default() -> Self {
        Self {
            max_position: Self::default_max_position(),
            payload_buffer_capacity: Self::default_payload_buffer_capacity(),
            features: Self::default_features(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturesOption {
    #[serde(default = "FeaturesOption::default_true")]
    pub freqs: bool,
    #[serde(default = "FeaturesOption::default_true")]
    pub positions: bool,
    #[serde(default)]
    pub payloads: bool,
    #[serde(default)]
    pub offsets: bool,
}

impl FeaturesOption {
    fn default_true() -> bool {
        true
    }

    fn to_index_features(self) -> IndexFeatures {
        let mut features = IndexFeatures::empty();
        features.set(IndexFeatures::FREQS, self.freqs);
        features.set(IndexFeatures::POSITIONS, self.positions);
        features.set(IndexFeatures::PAYLOADS, self.payloads);
        features.set(IndexFeatures::OFFSETS, self.offsets);
        features
    }
}

impl Default for FeaturesOption {
    fn default() -> Self {
        Self {
            freqs: true,
            positions: true,
            payloads: false,
            offsets: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    #[test]
    fn test_defaults() {
        let option = PostingsOption::from_toml("").unwrap();
        assert_eq!(option, PostingsOption::default());
        assert_eq!(option.max_position, i32::MAX as u32 - 128);
        assert_eq!(
            option.index_features().unwrap(),
            IndexFeatures::FREQS | IndexFeatures::POSITIONS
        );
    }

    #[test]
    fn test_parse() {
        let option = PostingsOption::from_toml(
            r#"
            max_position = 1000
            payload_buffer_capacity = 4096

            [features]
            payloads = true
            offsets = true
            "#,
        )
        .unwrap();
        assert_eq!(option.max_position, 1000);
        assert_eq!(option.payload_buffer_capacity, 4096);
        assert_eq!(option.index_features().unwrap(), IndexFeatures::all());
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            PostingsOption::from_toml("payload_buffer_capacity = 0"),
            Err(CodecError::InvalidOption(_))
        ));
        assert!(matches!(
            PostingsOption::from_toml("max_position = 0"),
            Err(CodecError::InvalidOption(_))
        ));
        assert!(matches!(
            PostingsOption::from_toml("unknown = 1"),
            Err(CodecError::Toml(_))
        ));
        assert!(matches!(
            PostingsOption::from_toml("[features]\npositions = false\noffsets = true"),
            Err(CodecError::InvalidFeatures(_))
        ));
    }

    #[test]
    fn test_round_trip_toml() {
        let option = PostingsOption {
            max_position: 77,
            ..Default::default()
        };
        let s = toml::to_string(&option).unwrap();
        assert_eq!(PostingsOption::from_toml(&s).unwrap(), option);
    }
}
