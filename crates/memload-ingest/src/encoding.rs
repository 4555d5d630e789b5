//! Binary value encoding
//!
//! Values are protobuf `UserApps` messages:
//!
//! ```text
//! message UserApps {
//!     optional double lat  = 1;
//!     optional double lon  = 2;
//!     repeated int64  apps = 3 [packed = true];
//! }
//! ```
//!
//! Consumers outside this crate read these bytes back, so field numbers and
//! types must not change. An absent coordinate is not written at all.

use prost::Message;

use crate::record::{self, InstallRecord};

/// Stored value for one device
#[derive(Clone, PartialEq, Message)]
pub struct UserApps {
    #[prost(double, optional, tag = "1")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub lon: Option<f64>,
    #[prost(int64, repeated, packed = "true", tag = "3")]
    pub apps: Vec<i64>,
}

impl From<&InstallRecord> for UserApps {
    fn from(record: &InstallRecord) -> Self {
        Self {
            lat: record.latitude,
            lon: record.longitude,
            apps: record.apps.clone(),
        }
    }
}

/// Encode a record into its backend value
pub fn encode(record: &InstallRecord) -> Vec<u8> {
    UserApps::from(record).encode_to_vec()
}

/// Decode a backend value
pub fn decode(bytes: &[u8]) -> Result<UserApps, prost::DecodeError> {
    UserApps::decode(bytes)
}

const SELF_CHECK_SAMPLE: &str = "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n\
                                 gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424";

/// Encode the built-in sample lines and check they decode back unchanged
///
/// Returns the number of sample records checked.
pub fn self_check() -> anyhow::Result<usize> {
    let mut checked = 0;

    for line in SELF_CHECK_SAMPLE.lines() {
        let parsed = record::parse(line)?;
        let expected = UserApps::from(&parsed.record);
        let packed = encode(&parsed.record);
        let unpacked = decode(&packed)?;

        if unpacked != expected {
            anyhow::bail!(
                "Round trip mismatch for {}: {:?} != {:?}",
                parsed.record.key(),
                unpacked,
                expected
            );
        }
        checked += 1;
    }

    Ok(checked)
}
