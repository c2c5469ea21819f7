//! Startup pre-warming: fan out over every route, materialize its cache
//! artifacts, and report progress on stdout.
//!
//! On a terminal each route line is rewritten in place as its worker
//! finishes; otherwise the table is printed once up front and only the
//! summary follows.

use std::{
    io::{IsTerminal, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{routes::RouteMap, util::bytes::ByteSize};

struct Entry {
    target: String,
    flags: String,
}

struct Table {
    entries: Vec<Entry>,
    target_width: usize,
    flag_width: usize,
}

fn build_table(routes: &RouteMap) -> Table {
    let mut entries: Vec<Entry> = routes
        .iter()
        .map(|(target, route)| Entry {
            target: target.clone(),
            flags: route.flags().to_string(),
        })
        .collect();
    entries.sort_by(|a, b| a.target.cmp(&b.target));

    let target_width = entries.iter().map(|e| e.target.len()).max().unwrap_or(0);
    let flag_width = entries.iter().map(|e| e.flags.len()).max().unwrap_or(0);
    Table {
        entries,
        target_width,
        flag_width,
    }
}

/// Pre-cache every route concurrently and print the progress table plus a
/// summary line. Runs alongside the listener; it is a latency optimization,
/// not a startup barrier.
pub async fn print_routes(routes: Arc<RouteMap>) {
    let interactive = std::io::stdout().is_terminal();
    if interactive {
        debug!(target: "angolo::warmup", "using a TTY");
    } else {
        debug!(target: "angolo::warmup", "not using a TTY");
    }

    let table = build_table(&routes);
    let total = table.entries.len();
    {
        let mut out = std::io::stdout().lock();
        for entry in &table.entries {
            if interactive {
                let _ = writeln!(
                    out,
                    "{:<tw$} {:<fw$} ....",
                    entry.target,
                    entry.flags,
                    tw = table.target_width,
                    fw = table.flag_width,
                );
            } else {
                let _ = writeln!(out, "{:<tw$} {}", entry.target, entry.flags, tw = table.target_width);
            }
        }
        let _ = out.flush();
    }

    let start = Instant::now();
    let cached_bytes = Arc::new(AtomicI64::new(0));
    let rewriter = Arc::new(Mutex::new(()));

    let mut workers = Vec::with_capacity(total);
    for (index, entry) in table.entries.into_iter().enumerate() {
        let Some(route) = routes.get(&entry.target).cloned() else {
            continue;
        };
        let cached_bytes = cached_bytes.clone();
        let rewriter = rewriter.clone();
        let (target_width, flag_width) = (table.target_width, table.flag_width);

        workers.push(tokio::spawn(async move {
            let size = tokio::task::spawn_blocking(move || route.pre_cache())
                .await
                .unwrap_or(0);
            cached_bytes.fetch_add(size, Ordering::Relaxed);

            if !interactive {
                return;
            }
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            let line = format!(
                "{:<tw$} {:<fw$} {:>8}B cached in {:>5.2} ms",
                entry.target,
                entry.flags,
                ByteSize(size).to_string(),
                elapsed_ms,
                tw = target_width,
                fw = flag_width,
            );
            let guard = rewriter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rewrite_line(index, total, &line);
            drop(guard);
        }));
    }

    for worker in workers {
        let _ = worker.await;
    }

    let elapsed = Duration::from_millis(start.elapsed().as_millis() as u64);
    println!(
        "Pre-Cached {}B in {:?}",
        ByteSize(cached_bytes.load(Ordering::Relaxed)),
        elapsed
    );
}

/// Move up to the route's line, clear and rewrite it, and return the
/// cursor to the bottom of the table.
fn rewrite_line(index: usize, total: usize, line: &str) {
    let up = total - index;
    let down = total - index - 1;
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\x1b[{up}A\x1b[2K{line}\n");
    if down > 0 {
        let _ = write!(out, "\x1b[{down}B");
    }
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[tokio::test]
    async fn empty_route_map_reports_zero() {
        // Smoke test: no routes means no workers and no panic.
        let routes = Arc::new(HashMap::new());
        print_routes(routes).await;
    }
}
