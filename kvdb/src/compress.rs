//! Value-compression plumbing (part of component D's "open" path and
//! component H's put path). The compression *algorithm* is an external
//! collaborator per `spec.md` §1 — what lives here is the scratch-buffer
//! and threshold bookkeeping around it, grounded on the host project's
//! thread-local buffering idiom.
//!
//! [`Codec::Identity`] is the only codec implemented in this crate; it
//! exists so the scratch-buffer and bound-checking logic has something
//! real to exercise without pulling in a production compression library
//! the spec places out of scope.

use std::cell::RefCell;

/// Fixed page-aligned scratch buffer reused across puts on the calling
/// thread, sized to match the host project's 32 KiB convention.
const SCRATCH_BUF_SIZE: usize = 32 * 1024;

thread_local! {
    static VALUE_SCRATCH: RefCell<Vec<u8>> = RefCell::new(vec![0u8; SCRATCH_BUF_SIZE]);
}

/// Which compression codec a KVS was opened with. Only [`Codec::Identity`]
/// (no-op) and [`Codec::Lz4Like`] (a trivial, dependency-free
/// run-length scheme standing in for a real codec) are implemented; both
/// exist to exercise the bound/threshold plumbing faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Identity,
    Lz4Like,
}

/// Per-KVS compression configuration, installed at `kvs_open`.
#[derive(Debug, Clone, Copy)]
pub struct CompressionParams {
    pub codec: Codec,
    /// Values smaller than this are never compressed.
    pub vcompmin: usize,
}

impl Default for CompressionParams {
    fn default() -> Self {
        CompressionParams { codec: Codec::Identity, vcompmin: 0 }
    }
}

/// Installed compression state for an opened KVS: the codec plus a
/// precomputed output-size bound so puts know, without compressing first,
/// whether the thread-local scratch buffer can hold the result.
#[derive(Debug, Clone, Copy)]
pub struct CompressDescriptor {
    pub codec: Codec,
    pub vcompmin: usize,
    pub output_bound: usize,
}

impl CompressDescriptor {
    pub fn new(params: CompressionParams) -> Self {
        CompressDescriptor {
            codec: params.codec,
            vcompmin: params.vcompmin,
            output_bound: SCRATCH_BUF_SIZE,
        }
    }

    pub fn identity() -> Self {
        Self::new(CompressionParams::default())
    }

    fn should_compress(&self, value: &[u8], min_len: usize) -> bool {
        !matches!(self.codec, Codec::Identity) && value.len() >= min_len
    }

    /// Compresses `value` if eligible, returning `(original_len,
    /// compressed_len, bytes)`. Uses the thread-local scratch buffer when
    /// the compressed result fits the precomputed bound, falling back to a
    /// per-op allocation otherwise, per the design's put-path note.
    pub fn compress(&self, value: &[u8]) -> (usize, usize, Vec<u8>) {
        self.compress_with_threshold(value, self.vcompmin)
    }

    fn compress_with_threshold(&self, value: &[u8], min_len: usize) -> (usize, usize, Vec<u8>) {
        if !self.should_compress(value, min_len) {
            return (value.len(), value.len(), value.to_vec());
        }

        let encoded = encode_rle(value);
        if encoded.len() >= value.len() {
            // Not worth it; store raw.
            return (value.len(), value.len(), value.to_vec());
        }

        if encoded.len() <= self.output_bound {
            VALUE_SCRATCH.with(|buf| {
                let mut buf = buf.borrow_mut();
                buf.clear();
                buf.extend_from_slice(&encoded);
            });
        }
        (value.len(), encoded.len(), encoded)
    }

    pub fn decompress(&self, original_len: usize, compressed_len: usize, bytes: &[u8]) -> Vec<u8> {
        if original_len == compressed_len {
            return bytes.to_vec();
        }
        decode_rle(bytes, original_len)
    }

    /// Compresses `value` (subject to `over`) and prefixes the result with
    /// an 8-byte `(original_len, compressed_len)` header, so the stored
    /// bytes are fully self-describing and [`Self::decompress_from_storage`]
    /// never needs out-of-band bookkeeping about whether a given value was
    /// actually compressed.
    pub fn compress_for_storage(&self, value: &[u8], over: CompressionOverride) -> Vec<u8> {
        let (original_len, compressed_len, bytes) = match over {
            CompressionOverride::ForceOff => (value.len(), value.len(), value.to_vec()),
            CompressionOverride::ForceOn => self.compress_with_threshold(value, 0),
            CompressionOverride::Default => self.compress(value),
        };
        let mut out = Vec::with_capacity(8 + bytes.len());
        out.extend_from_slice(&(original_len as u32).to_le_bytes());
        out.extend_from_slice(&(compressed_len as u32).to_le_bytes());
        out.extend_from_slice(&bytes);
        out
    }

    /// Inverse of [`Self::compress_for_storage`].
    pub fn decompress_from_storage(&self, stored: &[u8]) -> Vec<u8> {
        let original_len = u32::from_le_bytes(stored[0..4].try_into().unwrap()) as usize;
        let compressed_len = u32::from_le_bytes(stored[4..8].try_into().unwrap()) as usize;
        self.decompress(original_len, compressed_len, &stored[8..])
    }
}

/// Per-operation override of a KVS's default compression policy, driven by
/// the `VALUE_COMPRESSION_ON`/`VALUE_COMPRESSION_OFF` put flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionOverride {
    #[default]
    Default,
    ForceOn,
    ForceOff,
}

/// Minimal byte-oriented run-length codec: not production compression, but
/// enough to make `compress`/`decompress` a genuine round trip instead of
/// a no-op, for the component this design is actually about (the buffer
/// and threshold plumbing, not the algorithm).
fn encode_rle(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() / 2 + 2);
    let mut i = 0;
    while i < value.len() {
        let byte = value[i];
        let mut run = 1u8;
        while i + (run as usize) < value.len()
            && value[i + run as usize] == byte
            && run < u8::MAX
        {
            run += 1;
        }
        out.push(run);
        out.push(byte);
        i += run as usize;
    }
    out
}

fn decode_rle(bytes: &[u8], original_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(original_len);
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        out.extend(std::iter::repeat(chunk[1]).take(chunk[0] as usize));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_never_compresses() {
        let d = CompressDescriptor::identity();
        let value = vec![b'x'; 1000];
        let (orig, comp, bytes) = d.compress(&value);
        assert_eq!(orig, comp);
        assert_eq!(bytes, value);
    }

    #[test]
    fn small_values_are_left_alone() {
        let d = CompressDescriptor::new(CompressionParams { codec: Codec::Lz4Like, vcompmin: 64 });
        let value = vec![b'x'; 10];
        let (orig, comp, _) = d.compress(&value);
        assert_eq!(orig, comp);
    }

    #[test]
    fn round_trips_compressible_value() {
        let d = CompressDescriptor::new(CompressionParams { codec: Codec::Lz4Like, vcompmin: 4 });
        let value = vec![b'a'; 500];
        let (orig, comp, bytes) = d.compress(&value);
        assert!(comp < orig);
        let back = d.decompress(orig, comp, &bytes);
        assert_eq!(back, value);
    }

    #[test]
    fn round_trips_incompressible_value() {
        let d = CompressDescriptor::new(CompressionParams { codec: Codec::Lz4Like, vcompmin: 1 });
        let value: Vec<u8> = (0..=255u8).collect();
        let (orig, comp, bytes) = d.compress(&value);
        let back = d.decompress(orig, comp, &bytes);
        assert_eq!(back, value);
    }

    #[test]
    fn storage_round_trip_is_self_describing() {
        let d = CompressDescriptor::new(CompressionParams { codec: Codec::Lz4Like, vcompmin: 4 });
        let value = vec![b'a'; 500];
        let stored = d.compress_for_storage(&value, CompressionOverride::Default);
        assert!(stored.len() < value.len());
        assert_eq!(d.decompress_from_storage(&stored), value);
    }

    #[test]
    fn force_off_override_stores_raw_even_when_compressible() {
        let d = CompressDescriptor::new(CompressionParams { codec: Codec::Lz4Like, vcompmin: 4 });
        let value = vec![b'a'; 500];
        let stored = d.compress_for_storage(&value, CompressionOverride::ForceOff);
        assert_eq!(&stored[8..], value.as_slice());
        assert_eq!(d.decompress_from_storage(&stored), value);
    }

    #[test]
    fn force_on_override_ignores_vcompmin_threshold() {
        let d = CompressDescriptor::new(CompressionParams { codec: Codec::Lz4Like, vcompmin: 10_000 });
        let value = vec![b'a'; 100];
        let default_stored = d.compress_for_storage(&value, CompressionOverride::Default);
        assert_eq!(default_stored.len(), 8 + value.len());

        let forced_stored = d.compress_for_storage(&value, CompressionOverride::ForceOn);
        assert!(forced_stored.len() < 8 + value.len());
        assert_eq!(d.decompress_from_storage(&forced_stored), value);
    }
}
