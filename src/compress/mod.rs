//! Content-encoding support: streaming compressors and the batch helper
//! used to materialize cache artifacts.

use std::{
    io::{self, Read, Write},
    path::Path,
};

use axum::http::{HeaderMap, HeaderValue, header};
use flate2::{
    Compression,
    write::{DeflateEncoder, GzEncoder},
};

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 11;
const BROTLI_LG_WINDOW: u32 = 22;

/// A streaming compressor over a byte sink.
///
/// `finish` flushes the trailing framing bytes; gzip, brotli and deflate
/// streams are truncated without it.
pub trait EncodedWriter: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// One supported content encoding. `Identity` is the pass-through and is
/// always available as the negotiation fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Brotli,
    Deflate,
}

impl Encoding {
    /// Protocol token used in `Accept-Encoding` and `Content-Encoding`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Brotli => "br",
            Self::Deflate => "deflate",
        }
    }

    /// Extension appended to cache keys for this encoding's artifacts.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Identity => "",
            Self::Gzip => ".gz",
            Self::Brotli => ".br",
            Self::Deflate => ".deflate",
        }
    }

    /// Cache key for the artifact of `path` under this encoding. The
    /// identity encoding appends nothing, so the raw path keys itself.
    pub fn cache_key(self, path: &Path) -> String {
        format!("{}{}", path.display(), self.extension())
    }

    /// Wrap `sink` with a fresh streaming compressor.
    pub fn wrap<'a, W: Write + 'a>(self, sink: W) -> Box<dyn EncodedWriter + 'a> {
        match self {
            Self::Identity => Box::new(PlainWriter(sink)),
            Self::Gzip => Box::new(GzEncoder::new(sink, Compression::default())),
            Self::Deflate => Box::new(DeflateEncoder::new(sink, Compression::default())),
            Self::Brotli => Box::new(brotli::CompressorWriter::new(
                sink,
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_LG_WINDOW,
            )),
        }
    }

    /// Set `Content-Encoding` for this encoding; identity sets nothing.
    pub fn apply_content_encoding(self, headers: &mut HeaderMap) {
        if let Self::Identity = self {
            return;
        }
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(self.name()));
    }
}

/// Drive a fresh compressor over `reader` and return the complete encoded
/// stream, trailer included.
pub fn compress_all<R: Read>(encoding: Encoding, mut reader: R) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer = encoding.wrap(&mut buffer);
    io::copy(&mut reader, &mut writer)?;
    writer.finish()?;
    Ok(buffer)
}

struct PlainWriter<W: Write>(W);

impl<W: Write> Write for PlainWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> EncodedWriter for PlainWriter<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> EncodedWriter for GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        GzEncoder::finish(*self).map(|_| ())
    }
}

impl<W: Write> EncodedWriter for DeflateEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        DeflateEncoder::finish(*self).map(|_| ())
    }
}

impl<W: Write> EncodedWriter for brotli::CompressorWriter<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        // The trailing frame is emitted when the writer drops.
        self.flush()?;
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::{DeflateDecoder, GzDecoder};

    use super::*;

    fn sample_blobs() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"hello world".to_vec(),
            b"<html><head></head><body><h1>Hello World!</h1></body></html>".to_vec(),
            vec![0xa5; 64 * 1024],
        ]
    }

    #[test]
    fn identity_is_a_pass_through() {
        for blob in sample_blobs() {
            let out = compress_all(Encoding::Identity, blob.as_slice()).expect("compress");
            assert_eq!(out, blob);
        }
    }

    #[test]
    fn gzip_round_trips() {
        for blob in sample_blobs() {
            let out = compress_all(Encoding::Gzip, blob.as_slice()).expect("compress");
            let mut decoded = Vec::new();
            GzDecoder::new(out.as_slice())
                .read_to_end(&mut decoded)
                .expect("decode");
            assert_eq!(decoded, blob);
        }
    }

    #[test]
    fn deflate_round_trips() {
        for blob in sample_blobs() {
            let out = compress_all(Encoding::Deflate, blob.as_slice()).expect("compress");
            let mut decoded = Vec::new();
            DeflateDecoder::new(out.as_slice())
                .read_to_end(&mut decoded)
                .expect("decode");
            assert_eq!(decoded, blob);
        }
    }

    #[test]
    fn brotli_round_trips() {
        for blob in sample_blobs() {
            let out = compress_all(Encoding::Brotli, blob.as_slice()).expect("compress");
            let mut decoded = Vec::new();
            brotli::Decompressor::new(out.as_slice(), BROTLI_BUFFER_SIZE)
                .read_to_end(&mut decoded)
                .expect("decode");
            assert_eq!(decoded, blob);
        }
    }

    #[test]
    fn cache_keys_append_the_extension() {
        let path = Path::new("/srv/app/index.html");
        assert_eq!(Encoding::Identity.cache_key(path), "/srv/app/index.html");
        assert_eq!(Encoding::Gzip.cache_key(path), "/srv/app/index.html.gz");
        assert_eq!(Encoding::Brotli.cache_key(path), "/srv/app/index.html.br");
        assert_eq!(
            Encoding::Deflate.cache_key(path),
            "/srv/app/index.html.deflate"
        );
    }

    #[test]
    fn content_encoding_header_skips_identity() {
        let mut headers = HeaderMap::new();
        Encoding::Identity.apply_content_encoding(&mut headers);
        assert!(headers.get(header::CONTENT_ENCODING).is_none());

        Encoding::Brotli.apply_content_encoding(&mut headers);
        assert_eq!(
            headers.get(header::CONTENT_ENCODING).map(|v| v.as_bytes()),
            Some(b"br".as_slice())
        );
    }
}
