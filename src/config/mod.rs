//! Configuration layer: the command-line surface and the settings derived
//! from it.


use std::{collections::HashSet, fmt, path::PathBuf, str::FromStr};

use clap::{ArgAction, Args, Parser};
use thiserror::Error;

use crate::{compress::Encoding, util::bytes::ByteSize};

const DEFAULT_CSP_POLICY: &str =
    "default-src 'self'; style-src 'self' 'nonce-CSP_NONCE'; script-src 'self' 'nonce-CSP_NONCE'";

/// Command-line arguments for the Angolo binary.
#[derive(Debug, Parser)]
#[command(
    name = "angolo",
    version,
    about = "HTTP server for pre-built single-page-application trees"
)]
pub struct Config {
    /// Address to listen on.
    #[arg(short = 'a', long, default_value = "0.0.0.0", value_name = "ADDRESS")]
    pub address: String,

    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 80, value_name = "PORT")]
    pub port: u16,

    /// Increase log verbosity; repeat for more detail.
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub compression: CompressionConfig,

    #[command(flatten)]
    pub cache: CacheControlConfig,

    #[command(flatten)]
    pub server_cache: ServerCacheConfig,

    #[command(flatten)]
    pub csp: CspConfig,

    /// Directory to serve.
    #[arg(value_name = "directory", default_value = ".")]
    pub directory: PathBuf,
}

#[derive(Debug, Args, Default)]
pub struct CompressionConfig {
    /// Disable gzip compression.
    #[arg(long = "compression.no-gzip")]
    pub no_gzip: bool,

    /// Disable deflate compression.
    #[arg(long = "compression.no-deflate")]
    pub no_deflate: bool,

    /// Disable brotli compression.
    #[arg(long = "compression.no-brotli")]
    pub no_brotli: bool,

    /// Extensions of files eligible for compression.
    #[arg(
        long = "compression.eligible",
        value_name = "EXT",
        default_values = ["txt", "js", "js.map", "html", "webmanifest", "svg", "ttf", "otf", "xml"]
    )]
    pub eligible: Vec<String>,

    /// File size threshold to enable compression.
    #[arg(long = "compression.threshold", default_value = "1k", value_name = "SIZE")]
    pub threshold: ByteSize,
}

#[derive(Debug, Args, Default)]
pub struct CacheControlConfig {
    /// Cache-Control max-age on unversioned files.
    #[arg(long = "cache.max-age", default_value = "0s", value_name = "DURATION")]
    pub max_age: MaxAge,
}

#[derive(Debug, Args, Default)]
pub struct ServerCacheConfig {
    /// Keep cacheable root files in the LRU tier instead of holding them
    /// in memory permanently.
    #[arg(long = "server-cache.root-files-in-lru")]
    pub root_files_in_lru: bool,

    /// Ceiling of the in-memory cache in bytes.
    #[arg(
        short = 'm',
        long = "server-cache.max-size",
        default_value = "50M",
        value_name = "SIZE"
    )]
    pub max_size: ByteSize,
}

#[derive(Debug, Args, Default)]
pub struct CspConfig {
    /// Disable CSP nonce generation.
    #[arg(long = "csp.nonce-disable")]
    pub nonce_disable: bool,

    /// Targets rendered with a per-request CSP nonce.
    #[arg(long = "csp.nonced", value_name = "TARGET", default_values = ["/index.html"])]
    pub nonced: Vec<String>,

    /// Content-Security-Policy to use; CSP_NONCE is substituted per request.
    #[arg(long = "csp.policy", default_value = DEFAULT_CSP_POLICY, value_name = "POLICY")]
    pub policy: String,
}

impl Config {
    /// Enabled encodings in server preference order: brotli, gzip, deflate.
    pub fn enabled_encodings(&self) -> Vec<Encoding> {
        let mut encodings = Vec::with_capacity(3);
        if !self.compression.no_brotli {
            encodings.push(Encoding::Brotli);
        }
        if !self.compression.no_gzip {
            encodings.push(Encoding::Gzip);
        }
        if !self.compression.no_deflate {
            encodings.push(Encoding::Deflate);
        }
        encodings
    }

    /// Compression-eligible extensions, normalized with a leading dot.
    pub fn eligible_extensions(&self) -> HashSet<String> {
        self.compression
            .eligible
            .iter()
            .map(|extension| format!(".{}", extension.trim_start_matches('.')))
            .collect()
    }
}

/// A max-age duration of the form `<decimal><s|m|h|d>`; bare digits are
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaxAge(i64);

impl MaxAge {
    pub fn as_secs(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid duration `{0}`")]
pub struct ParseMaxAgeError(String);

impl FromStr for MaxAge {
    type Err = ParseMaxAgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (digits, unit) = match trimmed.find(|c: char| !c.is_ascii_digit()) {
            Some(at) => trimmed.split_at(at),
            None => (trimmed, ""),
        };
        let number: i64 = digits
            .parse()
            .map_err(|_| ParseMaxAgeError(value.to_string()))?;
        let factor = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => return Err(ParseMaxAgeError(value.to_string())),
        };
        Ok(Self(number * factor))
    }
}

impl fmt::Display for MaxAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
