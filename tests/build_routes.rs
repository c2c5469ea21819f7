//! End-to-end route classification over an on-disk application tree.

use std::{collections::HashMap, fs, path::Path};

use angolo::{
    config::Config,
    routes::{RouteFlags, build::build_routes},
};
use clap::Parser;
use tempfile::TempDir;

/// A plausible production build: hashed bundles, an unhashed entry
/// document, a favicon, and one nested asset. Compressible files are
/// padded past the 512-byte test threshold.
fn write_application(root: &Path, nonced_index: bool) {
    let filler = "<!-- padding -->".repeat(64);
    let index_body = if nonced_index {
        format!(
            "<!doctype html>\n<html>\n<head><title>app</title></head>\n<body>\n  \
             <app-root ng_csp_nonced></app-root>\n{filler}</body>\n</html>\n"
        )
    } else {
        format!(
            "<!doctype html>\n<html>\n<head><title>app</title></head>\n<body>\n  \
             <app-root></app-root>\n{filler}</body>\n</html>\n"
        )
    };

    fs::write(root.join("index.html"), index_body).expect("index.html");
    fs::write(root.join("favicon.ico"), vec![0u8; 1024]).expect("favicon.ico");
    fs::write(
        root.join("3rdpartylicenses.txt"),
        "MIT\n".repeat(256),
    )
    .expect("licenses");
    for bundle in [
        "main.d9c155841b368d1f.js",
        "polyfills.3f5925aa1897dcef.js",
        "runtime.5ba494be3870c376.js",
    ] {
        fs::write(root.join(bundle), "console.log(1);\n".repeat(64)).expect(bundle);
    }
    fs::write(
        root.join("styles.ef46db3751d8e999.css"),
        "body{margin:0}\n".repeat(64),
    )
    .expect("styles");
    fs::create_dir(root.join("assets")).expect("assets dir");
    fs::write(
        root.join("assets/random.svg"),
        format!("<svg xmlns=\"http://www.w3.org/2000/svg\">{filler}</svg>"),
    )
    .expect("svg");
}

fn expected_flags(nonced_index: bool) -> HashMap<&'static str, RouteFlags> {
    let index = if nonced_index {
        RouteFlags::COMPRESSIBLE | RouteFlags::NONCED
    } else {
        RouteFlags::COMPRESSIBLE
    };
    HashMap::from([
        ("/index.html", index),
        ("/3rdpartylicenses.txt", RouteFlags::COMPRESSIBLE),
        (
            "/main.d9c155841b368d1f.js",
            RouteFlags::COMPRESSIBLE | RouteFlags::IMMUTABLE,
        ),
        (
            "/polyfills.3f5925aa1897dcef.js",
            RouteFlags::COMPRESSIBLE | RouteFlags::IMMUTABLE,
        ),
        (
            "/runtime.5ba494be3870c376.js",
            RouteFlags::COMPRESSIBLE | RouteFlags::IMMUTABLE,
        ),
        ("/favicon.ico", RouteFlags::NONE),
        ("/assets/random.svg", RouteFlags::COMPRESSIBLE),
        ("/styles.ef46db3751d8e999.css", RouteFlags::IMMUTABLE),
    ])
}

fn build(dir: &TempDir, extra: &[&str]) -> angolo::routes::RouteMap {
    let root = dir.path().to_str().expect("utf-8 tempdir");
    let mut args = vec!["angolo", root, "--compression.threshold", "512"];
    args.extend_from_slice(extra);
    let config = Config::try_parse_from(args).expect("arguments should parse");
    build_routes(&config).expect("routes should build")
}

fn check_flags(routes: &angolo::routes::RouteMap, expected: HashMap<&'static str, RouteFlags>) {
    for (target, flags) in &expected {
        let route = routes
            .get(*target)
            .unwrap_or_else(|| panic!("missing route `{target}`"));
        assert_eq!(route.flags(), *flags, "flags for `{target}`");
    }
    for target in routes.keys() {
        assert!(
            expected.contains_key(target.as_str()),
            "unexpected route `{target}`"
        );
    }
}

#[test]
fn default_application_classification() {
    let dir = TempDir::new().expect("tempdir");
    write_application(dir.path(), false);

    let routes = build(&dir, &[]);
    check_flags(&routes, expected_flags(false));
}

#[test]
fn nonced_application_classification() {
    let dir = TempDir::new().expect("tempdir");
    write_application(dir.path(), true);

    let routes = build(&dir, &[]);
    check_flags(&routes, expected_flags(true));
}

#[test]
fn nonce_disable_falls_back_to_static() {
    let dir = TempDir::new().expect("tempdir");
    write_application(dir.path(), true);

    let routes = build(&dir, &["--csp.nonce-disable"]);
    let index = routes.get("/index.html").expect("index route");
    assert_eq!(index.flags(), RouteFlags::COMPRESSIBLE);
}

#[test]
fn disabled_encodings_drop_compressibility() {
    let dir = TempDir::new().expect("tempdir");
    write_application(dir.path(), false);

    let routes = build(
        &dir,
        &[
            "--compression.no-gzip",
            "--compression.no-deflate",
            "--compression.no-brotli",
        ],
    );
    let index = routes.get("/index.html").expect("index route");
    assert_eq!(index.flags(), RouteFlags::NONE);
}

#[test]
fn threshold_excludes_small_files() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("tiny.txt"), "hi").expect("tiny.txt");

    let routes = build(&dir, &[]);
    let tiny = routes.get("/tiny.txt").expect("tiny route");
    assert_eq!(tiny.flags(), RouteFlags::NONE);
}
