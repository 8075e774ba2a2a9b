//! # Content Hasher
//!
//! Deterministic, whitespace- and comment-insensitive digest of a benchmark.
//!
//! For CNF-like formats the byte stream is normalized to the sequence of
//! literal tokens separated by single spaces, with a trailing clause
//! terminator forced if the file omits it. The normalized stream is MD5
//! hashed and rendered as 32 lowercase hex characters.
//!
//! Files are decompressed transparently based on their suffix
//! (`.gz`, `.bz2`, `.xz`, `.lzma`).

use crate::types::{GbdError, Result};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// Open `path` for reading, decompressing by suffix.
pub fn open_benchmark(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)
        .map_err(|e| GbdError::Io(format!("Unable to open '{}': {e}", path.display())))?;
    let name = path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".gz") {
        Box::new(flate2::read::MultiGzDecoder::new(BufReader::new(file)))
    } else if name.ends_with(".bz2") {
        Box::new(bzip2::read::MultiBzDecoder::new(BufReader::new(file)))
    } else if name.ends_with(".xz") || name.ends_with(".lzma") {
        let stream = xz2::stream::Stream::new_auto_decoder(u64::MAX, 0)
            .map_err(|e| GbdError::Io(format!("Unable to decode '{}': {e}", path.display())))?;
        Box::new(xz2::read::XzDecoder::new_stream(BufReader::new(file), stream))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

// =============================================================================
// CNF NORMALIZATION
// =============================================================================

/// Streaming normalizer of a DIMACS token stream.
#[derive(Debug, Clone)]
pub struct CnfNormalizer {
    space: bool,
    skip: bool,
    start: bool,
    cldelim: bool,
}

impl Default for CnfNormalizer {
    fn default() -> Self {
        Self {
            space: false,
            skip: false,
            start: true,
            cldelim: true,
        }
    }
}

impl CnfNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `input`, appending emitted bytes to `out`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if !self.skip && (byte.is_ascii_digit() || byte == b'-') {
                self.cldelim = byte == b'0' && (self.space || self.start);
                self.start = false;
                if self.space {
                    self.space = false;
                    out.push(b' ');
                }
                out.push(byte);
            } else if byte <= b' ' {
                self.space = !self.start;
                self.skip = self.skip && byte != b'\n' && byte != b'\r';
            } else {
                self.skip = true;
            }
        }
    }

    /// Emit the forced trailing clause terminator, if needed.
    pub fn finish(self, out: &mut Vec<u8>) {
        if !self.cldelim {
            out.extend_from_slice(b" 0");
        }
    }
}

fn digest_hex(hasher: Md5) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Normalized CNF hash of everything readable from `reader`.
pub fn cnf_hash(mut reader: impl Read) -> Result<String> {
    let mut hasher = Md5::new();
    let mut normalizer = CnfNormalizer::new();
    let mut buf = vec![0u8; READ_BUFFER];
    let mut out = Vec::with_capacity(READ_BUFFER);
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        normalizer.feed(&buf[..n], &mut out);
        hasher.update(&out);
        out.clear();
    }
    normalizer.finish(&mut out);
    hasher.update(&out);
    Ok(digest_hex(hasher))
}

/// Normalized CNF hash of an in-memory formula.
#[must_use]
pub fn cnf_hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    let mut normalizer = CnfNormalizer::new();
    let mut out = Vec::with_capacity(bytes.len());
    normalizer.feed(bytes, &mut out);
    normalizer.finish(&mut out);
    hasher.update(&out);
    digest_hex(hasher)
}

/// Normalized CNF hash of the file at `path`.
pub fn identify_cnf(path: &Path) -> Result<String> {
    cnf_hash(open_benchmark(path)?)
}

// =============================================================================
// TOKEN HASH (graph and pseudo-Boolean formats)
// =============================================================================

/// Hash of the whitespace-separated tokens of all non-comment lines.
///
/// Lines whose first non-blank byte is `comment` are ignored. Tokens are
/// joined by single spaces and lines by a newline.
pub fn token_hash(reader: impl Read, comment: u8) -> Result<String> {
    use std::io::BufRead;

    let mut hasher = Md5::new();
    let mut first = true;
    for line in BufReader::new(reader).split(b'\n') {
        let line = line?;
        let mut tokens = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|t| !t.is_empty())
            .peekable();
        match tokens.peek() {
            None => continue,
            Some(t) if t.first() == Some(&comment) => continue,
            Some(_) => {}
        }
        if !first {
            hasher.update(b"\n");
        }
        first = false;
        for (i, token) in tokens.enumerate() {
            if i > 0 {
                hasher.update(b" ");
            }
            hasher.update(token);
        }
    }
    Ok(digest_hex(hasher))
}

/// Token hash of the file at `path`.
pub fn identify_tokens(path: &Path, comment: u8) -> Result<String> {
    token_hash(open_benchmark(path)?, comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn normalized(input: &[u8]) -> String {
        let mut out = Vec::new();
        let mut n = CnfNormalizer::new();
        n.feed(input, &mut out);
        n.finish(&mut out);
        String::from_utf8(out).expect("ascii")
    }

    #[test]
    fn normalizes_whitespace_and_comments() {
        let input = b"c comment\np cnf 3 2\n  1   -2 0\n\n2 3 0\n";
        assert_eq!(normalized(input), "1 -2 0 2 3 0");
    }

    #[test]
    fn forces_trailing_terminator() {
        assert_eq!(normalized(b"1 -2 0\n2 3"), "1 -2 0 2 3 0");
        assert_eq!(normalized(b"1 10"), "1 10 0");
    }

    #[test]
    fn empty_formula_is_stable() {
        assert_eq!(normalized(b""), "");
        assert_eq!(normalized(b"c only a comment\n"), "");
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let h = cnf_hash_bytes(b"1 2 0\n");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h, cnf_hash_bytes(b"p cnf 2 1\n1 2"));
    }

    #[test]
    fn literal_order_matters() {
        assert_ne!(cnf_hash_bytes(b"1 2 0\n"), cnf_hash_bytes(b"2 1 0\n"));
        assert_ne!(
            cnf_hash_bytes(b"1 0\n2 0\n"),
            cnf_hash_bytes(b"2 0\n1 0\n")
        );
    }

    #[test]
    fn streaming_matches_in_memory() {
        let input = b"c x\np cnf 2 2\n1 -2 0\r\n-1 2 0\r\n";
        let streamed = cnf_hash(&input[..]).expect("hash");
        assert_eq!(streamed, cnf_hash_bytes(input));
    }

    #[test]
    fn compressed_files_hash_like_plain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("f.cnf");
        let gz = dir.path().join("f.cnf.gz");
        let xz = dir.path().join("f.cnf.xz");
        let bz = dir.path().join("f.cnf.bz2");
        let content = b"p cnf 3 2\n1 2 0\n-3 0\n";
        std::fs::write(&plain, content).expect("write");

        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(content).expect("gz");
        std::fs::write(&gz, enc.finish().expect("gz finish")).expect("write gz");

        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(content).expect("xz");
        std::fs::write(&xz, enc.finish().expect("xz finish")).expect("write xz");

        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(content).expect("bz2");
        std::fs::write(&bz, enc.finish().expect("bz2 finish")).expect("write bz2");

        let expected = identify_cnf(&plain).expect("plain");
        assert_eq!(identify_cnf(&gz).expect("gz"), expected);
        assert_eq!(identify_cnf(&xz).expect("xz"), expected);
        assert_eq!(identify_cnf(&bz).expect("bz2"), expected);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = identify_cnf(Path::new("/nonexistent/x.cnf")).expect_err("missing");
        assert_eq!(err.kind(), "IoError");
    }

    #[test]
    fn token_hash_skips_comment_lines() {
        let a = token_hash(&b"c graph\np edge 3 2\ne 1 2\ne 2 3\n"[..], b'c').expect("a");
        let b = token_hash(&b"p   edge 3 2\n\ne 1  2\nc mid\ne 2 3"[..], b'c').expect("b");
        assert_eq!(a, b);
        let c = token_hash(&b"p edge 3 2\ne 2 3\ne 1 2\n"[..], b'c').expect("c");
        assert_ne!(a, c);
    }
}
