// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

/// Streaming decompressor that maintains state across chunks.
pub enum StreamingDecoder {
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Deflate(flate2::write::ZlibDecoder<Vec<u8>>),
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
    Identity,
}

impl StreamingDecoder {
    pub fn new(encoding: &str) -> io::Result<Self> {
        match encoding {
            "gzip" => Ok(Self::Gzip(flate2::write::GzDecoder::new(Vec::new()))),
            "deflate" => Ok(Self::Deflate(flate2::write::ZlibDecoder::new(Vec::new()))),
            "zstd" => Ok(Self::Zstd(zstd::stream::write::Decoder::new(Vec::new())?)),
            "br" => Ok(Self::Brotli(Box::new(brotli::DecompressorWriter::new(
                Vec::new(),
                8_096,
            )))),
            "" | "identity" => Ok(Self::Identity),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported encoding: {}", encoding),
            )),
        }
    }

    /// Decompress a chunk of data, returning the decompressed output.
    pub fn decompress_chunk(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(input.to_vec()),
            Self::Gzip(decoder) => {
                decoder.write_all(input)?;
                decoder.flush()?;
                Ok(std::mem::take(decoder.get_mut()))
            },
            Self::Deflate(decoder) => {
                decoder.write_all(input)?;
                decoder.flush()?;
                Ok(std::mem::take(decoder.get_mut()))
            },
            Self::Zstd(decoder) => {
                decoder.write_all(input)?;
                decoder.flush()?;
                Ok(std::mem::take(decoder.get_mut()))
            },
            Self::Brotli(decoder) => {
                decoder.write_all(input)?;
                decoder.flush()?;
                Ok(std::mem::take(decoder.get_mut()))
            },
        }
    }

    /// Finish decompression and return any remaining data.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Gzip(decoder) => decoder.finish(),
            Self::Deflate(decoder) => decoder.finish(),
            Self::Zstd(decoder) => Ok(decoder.into_inner()),
            Self::Brotli(decoder) => decoder
                .into_inner()
                .map_err(|_| io::Error::other("brotli stream was truncated")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn gzip_round_trip_across_chunk_boundaries() {
        let payload = b"hello hello hello hello hello";
        let mut encoder =
            flate2::read::GzEncoder::new(&payload[..], flate2::Compression::default());
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).unwrap();

        let mut decoder = StreamingDecoder::new("gzip").unwrap();
        let mut output = Vec::new();
        for chunk in compressed.chunks(3) {
            output.extend(decoder.decompress_chunk(chunk).unwrap());
        }
        output.extend(decoder.finish().unwrap());
        assert_eq!(output, payload);
    }

    #[test]
    fn identity_passes_through() {
        let mut decoder = StreamingDecoder::new("").unwrap();
        assert_eq!(decoder.decompress_chunk(b"abc").unwrap(), b"abc");
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(StreamingDecoder::new("lzma").is_err());
    }
}
