//! Retention rule of a protection policy schedule.
//!
//! A schedule retains recovery points either by count ([`LinearRetention`])
//! or by a rolling calendar window ([`AutoRollupRetention`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::enums::SnapshotIntervalType;
use crate::types::envelope::{decode_payload, encode_payload, Discriminator, EnvelopeError, OneOf};

/// Discriminator of [`ScheduleRetention::Linear`].
pub const LINEAR_RETENTION_TYPE: &str = "datapolicies.v4.config.LinearRetention";

/// Discriminator of [`ScheduleRetention::AutoRollup`].
pub const AUTO_ROLLUP_RETENTION_TYPE: &str = "datapolicies.v4.config.AutoRollupRetention";

/// Keep the most recent N recovery points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearRetention {
    /// Count kept on the local cluster.
    pub local: u32,
    /// Count kept on the remote cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<u32>,
}

/// One calendar window of an auto-rollup rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRollupRetentionDetails {
    /// Window unit.
    pub snapshot_interval_type: SnapshotIntervalType,
    /// Number of units.
    pub frequency: u32,
}

/// Keep recovery points for a rolling calendar window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRollupRetention {
    /// Window on the local cluster.
    pub local: AutoRollupRetentionDetails,
    /// Window on the remote cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<AutoRollupRetentionDetails>,
}

/// Retention rule, either count-based or window-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRetention {
    /// Count-based.
    Linear(LinearRetention),
    /// Window-based.
    AutoRollup(AutoRollupRetention),
}

impl OneOf for ScheduleRetention {
    const UNION: &'static str = "ScheduleRetention";

    fn discriminator(&self) -> Discriminator {
        match self {
            Self::Linear(_) => Discriminator::from(LINEAR_RETENTION_TYPE),
            Self::AutoRollup(_) => Discriminator::from(AUTO_ROLLUP_RETENTION_TYPE),
        }
    }

    fn decode_variant(
        discriminator: &Discriminator,
        payload: Value,
    ) -> Result<Self, EnvelopeError> {
        let Discriminator::Name(name) = discriminator else {
            return Err(Self::unknown(discriminator));
        };
        match name.as_str() {
            LINEAR_RETENTION_TYPE => {
                decode_payload(Self::UNION, discriminator, payload).map(Self::Linear)
            },
            AUTO_ROLLUP_RETENTION_TYPE => {
                decode_payload(Self::UNION, discriminator, payload).map(Self::AutoRollup)
            },
            _ => Err(Self::unknown(discriminator)),
        }
    }

    fn encode_payload(&self) -> Result<Value, EnvelopeError> {
        match self {
            Self::Linear(rule) => encode_payload(Self::UNION, rule),
            Self::AutoRollup(rule) => encode_payload(Self::UNION, rule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::envelope::PolymorphicValue;
    use serde_json::json;

    #[test]
    fn auto_rollup_decodes_interval_codes() {
        let envelope: PolymorphicValue = serde_json::from_value(json!({
            "$objectType": AUTO_ROLLUP_RETENTION_TYPE,
            "$value": {
                "local": { "snapshotIntervalType": 3, "frequency": 7 }
            }
        }))
        .unwrap();

        let rule: ScheduleRetention = envelope.decode().unwrap();
        let ScheduleRetention::AutoRollup(rule) = rule else {
            panic!("expected auto-rollup retention");
        };
        assert_eq!(rule.local.snapshot_interval_type, SnapshotIntervalType::Daily);
        assert_eq!(rule.local.frequency, 7);
        assert!(rule.remote.is_none());
    }

    #[test]
    fn linear_payload_with_wrong_shape_is_rejected() {
        let envelope = PolymorphicValue::new(LINEAR_RETENTION_TYPE, json!({ "local": "three" }));
        assert!(matches!(
            envelope.decode::<ScheduleRetention>(),
            Err(EnvelopeError::Payload { union: "ScheduleRetention", .. })
        ));
    }
}
