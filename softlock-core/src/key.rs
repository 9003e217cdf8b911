//! Cache keys for soft-locked entries.
//!
//! A `CacheKey` names one cached row: the tenant that owns it, the cache
//! region (one region per cached entity type) and the row identifier. Keys
//! cannot be constructed without a tenant, so two tenants never share a slot.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator byte between tenant_id and the rest of the key.
const SEPARATOR: u8 = 0xFF;

/// Length of an encoded key.
pub const ENCODED_KEY_LEN: usize = 35;

/// Identifier of a cache region (typically one per cached entity type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u16);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Key of a single cached entity.
///
/// # Binary Format
///
/// The key encodes to a fixed 35-byte array:
/// - Bytes 0-15: tenant_id (UUID as bytes)
/// - Byte 16: separator (0xFF)
/// - Bytes 17-18: region (big-endian u16)
/// - Bytes 19-34: entity_id (UUID as bytes)
///
/// Keys sort by tenant first, then region, which keeps a tenant's entries
/// contiguous in byte-ordered stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    tenant_id: Uuid,
    region: RegionId,
    entity_id: Uuid,
}

impl CacheKey {
    pub fn new(tenant_id: Uuid, region: RegionId, entity_id: Uuid) -> Self {
        Self {
            tenant_id,
            region,
            entity_id,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    /// Encode this key for byte-keyed stores.
    pub fn encode(&self) -> [u8; ENCODED_KEY_LEN] {
        let mut bytes = [0u8; ENCODED_KEY_LEN];
        bytes[0..16].copy_from_slice(self.tenant_id.as_bytes());
        bytes[16] = SEPARATOR;
        bytes[17..19].copy_from_slice(&self.region.0.to_be_bytes());
        bytes[19..35].copy_from_slice(self.entity_id.as_bytes());
        bytes
    }

    /// Decode a key from bytes. Returns `None` on a length or separator mismatch.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ENCODED_KEY_LEN || bytes[16] != SEPARATOR {
            return None;
        }
        let tenant_id = Uuid::from_slice(&bytes[0..16]).ok()?;
        let region = RegionId(u16::from_be_bytes([bytes[17], bytes[18]]));
        let entity_id = Uuid::from_slice(&bytes[19..35]).ok()?;
        Some(Self::new(tenant_id, region, entity_id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.region, self.entity_id)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn uuid_strategy() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Distinct keys never share an encoding.
        #[test]
        fn prop_encoding_is_injective(
            tenant1 in uuid_strategy(),
            tenant2 in uuid_strategy(),
            region1 in any::<u16>(),
            region2 in any::<u16>(),
            id1 in uuid_strategy(),
            id2 in uuid_strategy(),
        ) {
            let key1 = CacheKey::new(tenant1, RegionId(region1), id1);
            let key2 = CacheKey::new(tenant2, RegionId(region2), id2);

            if key1 == key2 {
                prop_assert_eq!(key1.encode(), key2.encode());
            } else {
                prop_assert_ne!(key1.encode(), key2.encode());
            }
        }

        #[test]
        fn prop_decode_inverts_encode(
            tenant_id in uuid_strategy(),
            region in any::<u16>(),
            entity_id in uuid_strategy(),
        ) {
            let key = CacheKey::new(tenant_id, RegionId(region), entity_id);
            prop_assert_eq!(CacheKey::decode(&key.encode()), Some(key));
        }
    }
}
