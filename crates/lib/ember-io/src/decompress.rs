use bytes::Bytes;

/// Decodes one compressed asset block into its raw bytes.
///
/// Decoding runs on job-system workers, so implementations must be callable
/// from many threads at once.
pub trait BlockCodec: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn decode(&self, compressed: &[u8], decompressed_size: usize) -> anyhow::Result<Bytes>;
}

/// Identity codec for assets stored uncompressed.
pub struct RawBlockCodec;

impl BlockCodec for RawBlockCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode(&self, compressed: &[u8], decompressed_size: usize) -> anyhow::Result<Bytes> {
        anyhow::ensure!(
            compressed.len() == decompressed_size,
            "raw block size mismatch: {} != {}",
            compressed.len(),
            decompressed_size
        );

        Ok(Bytes::copy_from_slice(compressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codec_passes_through() {
        let codec = RawBlockCodec;

        let decoded = codec.decode(b"block data", 10).unwrap();
        assert_eq!(&decoded[..], b"block data");

        assert!(codec.decode(b"short", 10).is_err());
    }
}
