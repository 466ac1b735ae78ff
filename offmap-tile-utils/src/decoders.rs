use std::io::{Read as _, Write as _};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;

use crate::Encoding;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Unable to decompress {0:?} tile data: {1}")]
    Io(Encoding, #[source] std::io::Error),
}

/// Decompress the tile data according to the given encoding.
/// Uncompressed and internally compressed data is returned as is.
pub fn decode(data: &[u8], encoding: Encoding) -> Result<Vec<u8>, DecodeError> {
    let res = match encoding {
        Encoding::Uncompressed | Encoding::Internal => return Ok(data.to_vec()),
        Encoding::Gzip => decode_gzip(data),
        Encoding::Zlib => decode_zlib(data),
        Encoding::Brotli => decode_brotli(data),
        Encoding::Zstd => decode_zstd(data),
    };
    res.map_err(|e| DecodeError::Io(encoding, e))
}

pub fn decode_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn decode_zlib(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn decode_brotli(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn decode_zstd(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    zstd::decode_all(data)
}

pub fn encode_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
