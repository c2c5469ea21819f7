//! Startup route construction: walk the asset directory, classify every
//! regular file, and attach it to the right cache tier.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use once_cell::sync::Lazy;
use regex::Regex;
use tera::Tera;
use thiserror::Error;
use time::OffsetDateTime;
use walkdir::{DirEntry, WalkDir};

use super::{NoncedRoute, Route, RouteMap, StaticRoute};
use crate::{cache::ByteCache, compress::Encoding, config::Config};

/// Marker attribute the Angular build leaves in documents that expect a
/// runtime CSP nonce.
const NONCE_MARKER: &str = "ng_csp_nonced";

static NONCE_MARKER_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"ng_csp_nonced(="[^"]*")?"#).expect("nonce marker pattern"));

static VERSION_STAMP_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A([0-9a-fA-F]+|v[0-9]+)\z").expect("version stamp pattern"));

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to walk asset directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to read `{}`: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse template for `{}`: {source}", path.display())]
    Template { path: PathBuf, source: tera::Error },
    #[error("invalid CSP policy template: {0}")]
    Policy(#[source] tera::Error),
    /// Sentinel: the candidate file carries no nonce marker. Callers fall
    /// through to a static route; this never escapes the builder.
    #[error("route is not nonceable")]
    NonNonceable,
}

/// Walk the served directory and build the full route map.
pub fn build_routes(config: &Config) -> Result<RouteMap, BuildError> {
    // Cache keys embed each file's path; walking a canonical root keeps
    // them absolute and independent of the working directory.
    let root = fs::canonicalize(&config.directory).map_err(|source| BuildError::Read {
        path: config.directory.clone(),
        source,
    })?;

    let sized = Arc::new(ByteCache::new(config.server_cache.max_size.0));
    let permanent = if config.server_cache.root_files_in_lru {
        sized.clone()
    } else {
        Arc::new(ByteCache::new(-1))
    };

    let builder = RouteBuilder {
        root,
        csp_enabled: !config.csp.nonce_disable,
        nonced_targets: config.csp.nonced.clone(),
        csp_policy: config.csp.policy.replace("CSP_NONCE", "{{ nonce }}"),
        enabled_encodings: config.enabled_encodings(),
        eligible_extensions: config.eligible_extensions(),
        threshold: config.compression.threshold.0,
        max_age_secs: config.cache.max_age.as_secs(),
        permanent,
        sized,
    };
    builder.build()
}

struct RouteBuilder {
    root: PathBuf,
    csp_enabled: bool,
    nonced_targets: Vec<String>,
    /// Policy with `CSP_NONCE` already replaced by the template variable.
    csp_policy: String,
    enabled_encodings: Vec<Encoding>,
    eligible_extensions: HashSet<String>,
    threshold: i64,
    max_age_secs: i64,
    permanent: Arc<ByteCache>,
    sized: Arc<ByteCache>,
}

impl RouteBuilder {
    fn build(&self) -> Result<RouteMap, BuildError> {
        let mut routes = RouteMap::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let (target, route) = self.build_route(&entry)?;
            routes.insert(target, Arc::new(route));
        }
        Ok(routes)
    }

    fn build_route(&self, entry: &DirEntry) -> Result<(String, Route), BuildError> {
        let path = entry.path();
        let target = self.target_for(path);

        if self.csp_enabled && self.nonced_targets.contains(&target) {
            match self.build_nonced(path) {
                Ok(route) => return Ok((target, route)),
                Err(BuildError::NonNonceable) => {}
                Err(err) => return Err(err),
            }
        }

        let route = self.build_static(entry)?;
        Ok((target, route))
    }

    fn build_nonced(&self, path: &Path) -> Result<Route, BuildError> {
        let content = fs::read_to_string(path).map_err(|source| BuildError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if !content.contains(NONCE_MARKER) {
            return Err(BuildError::NonNonceable);
        }

        // The Angular runtime reads this exact attribute at bootstrap.
        let rewritten = NONCE_MARKER_RX.replace_all(&content, r#"ngCspNonce="{{ nonce }}""#);

        let mut templates = Tera::default();
        templates
            .add_raw_template("csp", &self.csp_policy)
            .map_err(BuildError::Policy)?;
        templates
            .add_raw_template("content", &rewritten)
            .map_err(|source| BuildError::Template {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Route::Nonced(NoncedRoute {
            name: file_name(path),
            content_type: content_type_for(path),
            encodings: self.enabled_encodings.clone(),
            templates,
        }))
    }

    fn build_static(&self, entry: &DirEntry) -> Result<Route, BuildError> {
        let path = entry.path();
        let metadata = entry.metadata()?;
        let modtime = metadata
            .modified()
            .map(OffsetDateTime::from)
            .map_err(|source| BuildError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Route::Static(StaticRoute {
            content_type: content_type_for(path),
            encodings: self.permitted_encodings(path, metadata.len()),
            filepath: path.to_path_buf(),
            modtime,
            cache: self.cache_for(path),
            cache_control: self.cache_control_for(path),
        }))
    }

    /// Target path for a file: `/`-separated relative path under the root.
    fn target_for(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let mut target = String::new();
        for component in rel.components() {
            target.push('/');
            target.push_str(&component.as_os_str().to_string_lossy());
        }
        target
    }

    /// Root files go to the permanent tier, nested assets to the sized one.
    fn cache_for(&self, path: &Path) -> Arc<ByteCache> {
        if path.parent() == Some(self.root.as_path()) {
            self.permanent.clone()
        } else {
            self.sized.clone()
        }
    }

    fn cache_control_for(&self, path: &Path) -> String {
        if is_versioned(path) {
            return "max-age=31536000; immutable".to_string();
        }
        if self.max_age_secs <= 0 {
            return "no-cache".to_string();
        }
        format!("max-age={}; must-revalidate", self.max_age_secs)
    }

    fn permitted_encodings(&self, path: &Path, size: u64) -> Vec<Encoding> {
        let Some(extension) = effective_extension(path) else {
            return Vec::new();
        };
        if self.eligible_extensions.contains(&extension) && size as i64 >= self.threshold {
            self.enabled_encodings.clone()
        } else {
            Vec::new()
        }
    }
}

/// Extension used for compression eligibility. `.map` only counts when the
/// file is a JavaScript source map, matched as the compound `.js.map`.
fn effective_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let extension = format!(".{}", path.extension()?.to_string_lossy());
    if extension == ".map" && name.ends_with(".js.map") {
        return Some(".js.map".to_string());
    }
    Some(extension)
}

/// Whether the penultimate extension is a content hash or a `vN` stamp,
/// e.g. `main.d9c155841b368d1f.js` or `bundle.v3.js`.
fn is_versioned(path: &Path) -> bool {
    let Some(stem) = path.file_stem() else {
        return false;
    };
    let Some(stamp) = Path::new(stem).extension() else {
        return false;
    };
    VERSION_STAMP_RX.is_match(&stamp.to_string_lossy())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// MIME type from the extension registry; text types are served as UTF-8.
fn content_type_for(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT && mime.get_param(mime_guess::mime::CHARSET).is_none()
    {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_filenames_are_detected() {
        assert!(is_versioned(Path::new("main.d9c155841b368d1f.js")));
        assert!(is_versioned(Path::new("app.v12.js")));
        assert!(is_versioned(Path::new("styles.ef46db3751d8e999.css")));

        assert!(!is_versioned(Path::new("main.js")));
        assert!(!is_versioned(Path::new("styles.css")));
        assert!(!is_versioned(Path::new("favicon.ico")));
        assert!(!is_versioned(Path::new("index.html")));
        assert!(!is_versioned(Path::new("app.vendor.js")));
    }

    #[test]
    fn map_files_only_qualify_as_js_maps() {
        assert_eq!(
            effective_extension(Path::new("main.js.map")).as_deref(),
            Some(".js.map")
        );
        assert_eq!(
            effective_extension(Path::new("styles.css.map")).as_deref(),
            Some(".map")
        );
        assert_eq!(
            effective_extension(Path::new("main.js")).as_deref(),
            Some(".js")
        );
        assert_eq!(effective_extension(Path::new("LICENSE")), None);
    }

    #[test]
    fn html_is_served_as_utf8() {
        assert_eq!(
            content_type_for(Path::new("index.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type_for(Path::new("assets/random.svg")), "image/svg+xml");
    }
}
