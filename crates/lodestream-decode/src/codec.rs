use std::io::{Read, Write};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::DecodeResult;

/// Inflate a zlib-compressed blob as shipped by the asset service.
pub fn decompress_blob(compressed: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(compressed.len() * 4);
    ZlibDecoder::new(compressed).read_to_end(&mut out)?;
    Ok(out)
}

/// Deflate raw bytes. Test fixtures and the on-disk cache use this to build
/// blobs in the same format the service ships.
pub fn compress_blob(raw: &[u8]) -> DecodeResult<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(raw)?;
    Ok(enc.finish()?)
}
