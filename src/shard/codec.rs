//! Binary wire format for shard descriptors.
//!
//! A frame is the 4-byte magic followed by the `postcard` encoding of a
//! tagged envelope. Each envelope variant is one registered format
//! version; new versions are appended as new variants so old frames keep
//! decoding.

use super::descriptor::ShardDescriptor;
use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

pub const WIRE_MAGIC: [u8; 4] = *b"GESD";

#[derive(Serialize)]
enum EnvelopeRef<'a> {
    V1(&'a ShardDescriptor),
}

#[derive(Deserialize)]
enum Envelope {
    V1(ShardDescriptor),
}

/// Encode a descriptor. Deterministic: equal descriptors give equal bytes.
pub fn encode(shard: &ShardDescriptor) -> Result<Vec<u8>> {
    let mut out = WIRE_MAGIC.to_vec();
    let body = postcard::to_allocvec(&EnvelopeRef::V1(shard)).map_err(|source| {
        EngineError::ShardEncode {
            repository: shard.repo_path.clone(),
            source,
        }
    })?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a descriptor produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<ShardDescriptor> {
    let body = bytes
        .strip_prefix(&WIRE_MAGIC[..])
        .ok_or_else(|| EngineError::ShardDecode {
            reason: "missing shard magic".into(),
        })?;
    let (envelope, rest) =
        postcard::take_from_bytes::<Envelope>(body).map_err(|e| EngineError::ShardDecode {
            reason: e.to_string(),
        })?;
    if !rest.is_empty() {
        return Err(EngineError::ShardDecode {
            reason: format!("{} trailing bytes", rest.len()),
        });
    }
    match envelope {
        Envelope::V1(shard) => Ok(shard),
    }
}
