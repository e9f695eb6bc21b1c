//! Configuration structs (ambient stack): creation-time and runtime
//! parameters for the database and for individual KVSes, plus the
//! transaction and maintenance knobs. Grounded on the host project's
//! `serde`-derived config structs, generalized to the control plane's
//! wider parameter set.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::compress::{Codec, CompressionParams};
use crate::throttle::ThrottleParams;

/// Parameters fixed at `kvdb_create` time; immutable for the life of the
/// database (changing them requires dropping and recreating the database).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvdbCparams {
    /// On-media page/block size in bytes; forwarded to the tree backend.
    pub media_block_size: u32,
}

impl Default for KvdbCparams {
    fn default() -> Self {
        KvdbCparams { media_block_size: 4096 }
    }
}

/// Parameters that may be supplied fresh on every `kvdb_open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvdbRparams {
    pub throttle: ThrottleRparams,
    /// Maximum number of cursors (of either kind) live at once.
    pub cursor_max: usize,
    /// Read-only open: rejects all mutating operations up front.
    pub read_only: bool,
}

impl Default for KvdbRparams {
    fn default() -> Self {
        KvdbRparams {
            throttle: ThrottleRparams::default(),
            cursor_max: 1024,
            read_only: false,
        }
    }
}

/// The subset of [`ThrottleParams`] that is `serde`-friendly (durations
/// need explicit millisecond fields) and user-facing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleRparams {
    pub burst_bytes: u64,
    pub rate_bytes_per_sec: u64,
    pub manual: bool,
    pub update_interval_ms: u64,
}

impl Default for ThrottleRparams {
    fn default() -> Self {
        ThrottleRparams {
            burst_bytes: 32 * 1024 * 1024,
            rate_bytes_per_sec: 64 * 1024 * 1024,
            manual: false,
            update_interval_ms: 10,
        }
    }
}

impl From<ThrottleRparams> for ThrottleParams {
    fn from(p: ThrottleRparams) -> Self {
        ThrottleParams {
            burst_bytes: p.burst_bytes,
            rate_bytes_per_sec: p.rate_bytes_per_sec,
            manual: p.manual,
            update_interval: Duration::from_millis(p.update_interval_ms),
        }
    }
}

/// Parameters fixed at `kvs_create` time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvsCparams {
    /// Key prefix length used for prefix-delete and prefix-probe bucketing;
    /// 0 means "no prefix structure" (ordinary flat keyspace).
    pub pfx_len: u8,
}

impl Default for KvsCparams {
    fn default() -> Self {
        KvsCparams { pfx_len: 0 }
    }
}

/// Parameters supplied fresh on every `kvs_open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvsRparams {
    pub codec: CodecParam,
    /// Values smaller than this are never compressed.
    pub vcompmin: usize,
}

impl Default for KvsRparams {
    fn default() -> Self {
        KvsRparams { codec: CodecParam::Identity, vcompmin: 0 }
    }
}

impl KvsRparams {
    pub fn compression(&self) -> CompressionParams {
        CompressionParams {
            codec: self.codec.into(),
            vcompmin: self.vcompmin,
        }
    }
}

/// `serde`-friendly mirror of [`Codec`] (kept separate so the compression
/// module doesn't need to derive `serde` itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecParam {
    Identity,
    Lz4Like,
}

impl From<CodecParam> for Codec {
    fn from(c: CodecParam) -> Self {
        match c {
            CodecParam::Identity => Codec::Identity,
            CodecParam::Lz4Like => Codec::Lz4Like,
        }
    }
}

/// Per-operation flags for [`crate::kvs::Kvs::put`]/[`crate::kvs::Kvs::get`],
/// mirroring the host project's request-flag bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(u32);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Bypasses the write throttle entirely.
    pub const PRIORITY: OpFlags = OpFlags(1 << 0);
    /// Forces compression regardless of the KVS's `vcompmin` threshold.
    pub const VALUE_COMPRESSION_ON: OpFlags = OpFlags(1 << 1);
    /// Stores the value raw regardless of the KVS's configured codec.
    pub const VALUE_COMPRESSION_OFF: OpFlags = OpFlags(1 << 2);

    pub fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpFlags {
    type Output = OpFlags;
    fn bitor(self, rhs: OpFlags) -> OpFlags {
        OpFlags(self.0 | rhs.0)
    }
}

/// Longest a KVS name may be; a name of exactly this length is already too
/// long (the backend reserves the last byte for a NUL terminator).
pub const KVS_NAME_LEN_MAX: usize = 32;

/// KVS name grammar: ASCII letters, digits, `_` and `-`, 1 to 31 bytes.
pub fn validate_kvs_name(name: &str) -> crate::error::CResult<()> {
    if name.is_empty() || name.len() >= KVS_NAME_LEN_MAX {
        return Err(crate::error::Error::invalid_input(format!(
            "kvs name must be 1..{KVS_NAME_LEN_MAX} bytes, got {}",
            name.len()
        )));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(crate::error::Error::invalid_input(format!(
            "kvs name {name:?} contains characters outside [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_accepts_ordinary_names() {
        assert!(validate_kvs_name("orders").is_ok());
        assert!(validate_kvs_name("orders-v2_beta").is_ok());
    }

    #[test]
    fn name_validation_rejects_empty_and_oversize() {
        assert!(validate_kvs_name("").is_err());
        assert!(validate_kvs_name(&"a".repeat(31)).is_ok());
        assert!(validate_kvs_name(&"a".repeat(32)).is_err());
        assert!(validate_kvs_name(&"a".repeat(33)).is_err());
    }

    #[test]
    fn name_validation_rejects_bad_characters() {
        assert!(validate_kvs_name("orders/v2").is_err());
        assert!(validate_kvs_name("orders v2").is_err());
    }

    #[test]
    fn op_flags_combine_and_test_membership() {
        let flags = OpFlags::PRIORITY | OpFlags::VALUE_COMPRESSION_OFF;
        assert!(flags.contains(OpFlags::PRIORITY));
        assert!(flags.contains(OpFlags::VALUE_COMPRESSION_OFF));
        assert!(!flags.contains(OpFlags::VALUE_COMPRESSION_ON));
        assert!(!OpFlags::NONE.contains(OpFlags::PRIORITY));
    }
}
