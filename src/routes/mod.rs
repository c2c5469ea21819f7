//! Request handlers for the asset tree.
//!
//! Two kinds of route exist: [`StaticRoute`] serves a file through the
//! artifact cache, compressing on first demand; [`NoncedRoute`] re-renders
//! a designated HTML document on every request with a fresh CSP nonce
//! bound into both the body and the `Content-Security-Policy` header.

pub mod build;

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::PathBuf,
    sync::Arc,
};

use axum::{
    http::{
        HeaderValue, StatusCode,
        header::{ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_SECURITY_POLICY},
        request::Parts,
    },
    response::Response,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use rand::{RngCore, rngs::OsRng};
use tera::Tera;
use time::OffsetDateTime;
use tracing::{error, warn};

use crate::{
    cache::ByteCache,
    compress::{Encoding, compress_all},
    infra::http::content::{plain_error, serve_bytes},
};

/// All routes discovered under the served directory, keyed by target path.
pub type RouteMap = HashMap<String, Arc<Route>>;

const NONCE_BYTES: usize = 32;

/// Static attributes of a route, rendered in the pre-warm table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteFlags(u8);

impl RouteFlags {
    pub const NONE: Self = Self(0);
    pub const COMPRESSIBLE: Self = Self(1);
    pub const IMMUTABLE: Self = Self(1 << 1);
    pub const NONCED: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RouteFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for RouteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::with_capacity(3);
        if self.contains(Self::COMPRESSIBLE) {
            names.push("COMPRESSIBLE");
        }
        if self.contains(Self::IMMUTABLE) {
            names.push("IMMUTABLE");
        }
        if self.contains(Self::NONCED) {
            names.push("NONCED");
        }
        write!(f, "{}", names.join(", "))
    }
}

/// A request handler bound to one target path.
pub enum Route {
    Static(StaticRoute),
    Nonced(NoncedRoute),
}

impl Route {
    pub fn serve(&self, head: &Parts) -> Response {
        match self {
            Self::Static(route) => route.serve(head),
            Self::Nonced(route) => route.serve(head),
        }
    }

    /// Materialize the route's bodies into its cache; returns the bytes
    /// now held for it.
    pub fn pre_cache(&self) -> i64 {
        match self {
            Self::Static(route) => route.pre_cache(),
            Self::Nonced(_) => 0,
        }
    }

    pub fn flags(&self) -> RouteFlags {
        match self {
            Self::Static(route) => route.flags(),
            Self::Nonced(route) => route.flags(),
        }
    }
}

/// Select the response encoding from the route's permitted list and the
/// request's `Accept-Encoding` header.
///
/// `*` picks the first permitted encoding; otherwise the permitted list is
/// scanned in declared order for a protocol name appearing in the header.
/// Quality values are not parsed. Identity is the fallback.
fn negotiate(encodings: &[Encoding], head: &Parts) -> Encoding {
    let accept = head
        .headers
        .get(ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !encodings.is_empty() && accept.contains('*') {
        return encodings[0];
    }

    encodings
        .iter()
        .copied()
        .find(|encoding| accept.contains(encoding.name()))
        .unwrap_or(Encoding::Identity)
}

/// A file served byte-for-byte through the artifact cache.
pub struct StaticRoute {
    content_type: String,
    encodings: Vec<Encoding>,
    filepath: PathBuf,
    modtime: OffsetDateTime,
    cache: Arc<ByteCache>,
    cache_control: String,
}

impl StaticRoute {
    fn serve(&self, head: &Parts) -> Response {
        let encoding = negotiate(&self.encodings, head);
        let data = match self.materialize(encoding) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    target: "angolo::routes",
                    filepath = %self.filepath.display(),
                    compression = encoding.extension(),
                    error = %err,
                    "could not read route"
                );
                return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "read error\n");
            }
        };

        let mut response = serve_bytes(head, &self.content_type, self.modtime, shared_bytes(&data));
        let headers = response.headers_mut();
        if !self.cache_control.is_empty()
            && let Ok(value) = HeaderValue::from_str(&self.cache_control)
        {
            headers.insert(CACHE_CONTROL, value);
        }
        encoding.apply_content_encoding(headers);
        response
    }

    /// Warm every permitted encoding plus identity. Failures are left for
    /// the serve path to surface; pre-caching is best-effort.
    fn pre_cache(&self) -> i64 {
        let mut total = 0;
        for encoding in self.encodings.iter().copied().chain([Encoding::Identity]) {
            if let Ok(data) = self.materialize(encoding) {
                total += data.capacity() as i64;
            }
        }
        total
    }

    fn materialize(&self, encoding: Encoding) -> io::Result<Arc<Vec<u8>>> {
        self.cache.get(&encoding.cache_key(&self.filepath), || {
            let file = fs::File::open(&self.filepath)?;
            compress_all(encoding, file)
        })
    }

    fn flags(&self) -> RouteFlags {
        let mut flags = RouteFlags::NONE;
        if !self.encodings.is_empty() {
            flags = flags | RouteFlags::COMPRESSIBLE;
        }
        if self.cache_control.contains("immutable") {
            flags = flags | RouteFlags::IMMUTABLE;
        }
        flags
    }
}

/// An HTML document re-rendered per request with a fresh CSP nonce.
///
/// Holds no cache: every response is unique.
pub struct NoncedRoute {
    name: String,
    content_type: String,
    encodings: Vec<Encoding>,
    /// Parsed `content` and `csp` templates sharing the `nonce` variable.
    templates: Tera,
}

impl NoncedRoute {
    fn serve(&self, head: &Parts) -> Response {
        let nonce = match generate_nonce() {
            Ok(nonce) => nonce,
            Err(err) => {
                warn!(
                    target: "angolo::routes",
                    route = %self.name,
                    error = %err,
                    "could not generate nonce"
                );
                return internal_error();
            }
        };

        let encoding = negotiate(&self.encodings, head);
        let mut context = tera::Context::new();
        context.insert("nonce", &nonce);

        let mut body = Vec::new();
        let mut writer = encoding.wrap(&mut body);
        if let Err(err) = self.templates.render_to("content", &context, &mut *writer) {
            warn!(
                target: "angolo::routes",
                route = %self.name,
                error = %err,
                "could not execute response template"
            );
            return internal_error();
        }
        if let Err(err) = writer.finish() {
            error!(
                target: "angolo::routes",
                route = %self.name,
                error = %err,
                "could not compress response"
            );
            return internal_error();
        }

        let csp = match self.templates.render("csp", &context) {
            Ok(csp) => csp,
            Err(err) => {
                warn!(
                    target: "angolo::routes",
                    route = %self.name,
                    error = %err,
                    "could not execute CSP template"
                );
                return internal_error();
            }
        };

        let mut response = serve_bytes(
            head,
            &self.content_type,
            OffsetDateTime::now_utc(),
            Bytes::from(body),
        );
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        encoding.apply_content_encoding(headers);
        if let Ok(value) = HeaderValue::from_str(&csp) {
            headers.insert(CONTENT_SECURITY_POLICY, value);
        }
        response
    }

    fn flags(&self) -> RouteFlags {
        let base = if self.encodings.is_empty() {
            RouteFlags::NONE
        } else {
            RouteFlags::COMPRESSIBLE
        };
        base | RouteFlags::NONCED
    }
}

fn internal_error() -> Response {
    plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error\n")
}

/// 32 random bytes, base64-url encoded without padding.
fn generate_nonce() -> Result<String, rand::Error> {
    let mut raw = [0u8; NONCE_BYTES];
    OsRng.try_fill_bytes(&mut raw)?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

struct SharedBuffer(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Hand a cached buffer to the response body without copying it.
fn shared_bytes(data: &Arc<Vec<u8>>) -> Bytes {
    Bytes::from_owner(SharedBuffer(data.clone()))
}
