//! Byte-slice responder: conditional GET on modification time, trivial
//! single-range support, and the plain-text error shape shared by every
//! failure path.

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{
            ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED, RANGE,
            X_CONTENT_TYPE_OPTIONS,
        },
        request::Parts,
    },
    response::Response,
};
use bytes::Bytes;
use time::{
    OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};

static IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

pub fn format_http_date(instant: OffsetDateTime) -> Option<String> {
    instant.to_offset(UtcOffset::UTC).format(&IMF_FIXDATE).ok()
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value, &IMF_FIXDATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Serve `data` as the response body: `Last-Modified`, `Accept-Ranges`,
/// `304` on a satisfied `If-Modified-Since`, `206`/`416` for a single
/// byte range, `200` with the whole slice otherwise.
pub fn serve_bytes(
    head: &Parts,
    content_type: &str,
    modtime: OffsetDateTime,
    data: Bytes,
) -> Response {
    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(date) = format_http_date(modtime)
        && let Ok(value) = HeaderValue::from_str(&date)
    {
        headers.insert(LAST_MODIFIED, value);
    }

    if not_modified(&head.headers, modtime) {
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        return response;
    }

    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }

    let total = data.len();
    match requested_range(&head.headers, total) {
        RangeOutcome::Full => {
            *response.body_mut() = Body::from(data);
        }
        RangeOutcome::Partial { start, end } => {
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
            *response.body_mut() = Body::from(data.slice(start..=end));
        }
        RangeOutcome::Unsatisfiable => {
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
        }
    }

    response
}

/// Plain-text error body with sniffing disabled.
pub fn plain_error(status: StatusCode, message: &'static str) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}

fn not_modified(headers: &HeaderMap, modtime: OffsetDateTime) -> bool {
    let Some(since) = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
    else {
        return false;
    };
    // Second granularity: Last-Modified cannot carry sub-second precision.
    modtime.unix_timestamp() <= since.unix_timestamp()
}

enum RangeOutcome {
    Full,
    Partial { start: usize, end: usize },
    Unsatisfiable,
}

/// Decode a single `bytes=` range. Malformed or multi-part ranges fall
/// back to the full body; a syntactically valid range beyond the end is
/// unsatisfiable.
fn requested_range(headers: &HeaderMap, len: usize) -> RangeOutcome {
    let Some(raw) = headers.get(RANGE).and_then(|value| value.to_str().ok()) else {
        return RangeOutcome::Full;
    };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((start_raw, end_raw)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };

    if start_raw.is_empty() {
        // Suffix form: the last N bytes.
        let Ok(count) = end_raw.parse::<usize>() else {
            return RangeOutcome::Full;
        };
        if count == 0 || len == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: len.saturating_sub(count),
            end: len - 1,
        };
    }

    let Ok(start) = start_raw.parse::<usize>() else {
        return RangeOutcome::Full;
    };
    if start >= len {
        return RangeOutcome::Unsatisfiable;
    }

    if end_raw.is_empty() {
        return RangeOutcome::Partial {
            start,
            end: len - 1,
        };
    }

    let Ok(end) = end_raw.parse::<usize>() else {
        return RangeOutcome::Full;
    };
    if end < start {
        return RangeOutcome::Full;
    }
    RangeOutcome::Partial {
        start,
        end: end.min(len - 1),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use time::macros::datetime;

    use super::*;

    fn head(builder: axum::http::request::Builder) -> Parts {
        builder
            .body(())
            .expect("request should build")
            .into_parts()
            .0
    }

    #[test]
    fn http_date_round_trips() {
        let instant = datetime!(2023-04-01 00:00:00 UTC);
        let formatted = format_http_date(instant).expect("format");
        assert_eq!(formatted, "Sat, 01 Apr 2023 00:00:00 GMT");
        assert_eq!(parse_http_date(&formatted), Some(instant));
    }

    #[test]
    fn serves_the_full_body_with_metadata() {
        let parts = head(Request::get("/file.txt"));
        let response = serve_bytes(
            &parts,
            "text/plain; charset=utf-8",
            datetime!(2023-04-01 00:00:00 UTC),
            Bytes::from_static(b"hello"),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(ACCEPT_RANGES).map(|v| v.as_bytes()),
            Some(b"bytes".as_slice())
        );
        assert_eq!(
            response.headers().get(LAST_MODIFIED).map(|v| v.as_bytes()),
            Some(b"Sat, 01 Apr 2023 00:00:00 GMT".as_slice())
        );
    }

    #[test]
    fn answers_if_modified_since_with_304() {
        let parts = head(
            Request::get("/file.txt").header("If-Modified-Since", "Sat, 01 Apr 2023 00:00:00 GMT"),
        );
        let response = serve_bytes(
            &parts,
            "text/plain; charset=utf-8",
            datetime!(2023-04-01 00:00:00 UTC),
            Bytes::from_static(b"hello"),
        );
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn newer_files_bypass_the_conditional() {
        let parts = head(
            Request::get("/file.txt").header("If-Modified-Since", "Sat, 01 Apr 2023 00:00:00 GMT"),
        );
        let response = serve_bytes(
            &parts,
            "text/plain; charset=utf-8",
            datetime!(2024-01-01 12:00:00 UTC),
            Bytes::from_static(b"hello"),
        );
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn slices_a_single_range() {
        let parts = head(Request::get("/file.txt").header("Range", "bytes=1-3"));
        let response = serve_bytes(
            &parts,
            "text/plain; charset=utf-8",
            datetime!(2023-04-01 00:00:00 UTC),
            Bytes::from_static(b"hello"),
        );
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(CONTENT_RANGE).map(|v| v.as_bytes()),
            Some(b"bytes 1-3/5".as_slice())
        );
    }

    #[test]
    fn rejects_ranges_past_the_end() {
        let parts = head(Request::get("/file.txt").header("Range", "bytes=9-12"));
        let response = serve_bytes(
            &parts,
            "text/plain; charset=utf-8",
            datetime!(2023-04-01 00:00:00 UTC),
            Bytes::from_static(b"hello"),
        );
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(CONTENT_RANGE).map(|v| v.as_bytes()),
            Some(b"bytes */5".as_slice())
        );
    }

    #[test]
    fn ignores_malformed_and_multi_part_ranges() {
        for value in ["bytes=a-b", "bytes=1-3,5-7", "lines=1-2"] {
            let parts = head(Request::get("/file.txt").header("Range", value));
            let response = serve_bytes(
                &parts,
                "text/plain; charset=utf-8",
                datetime!(2023-04-01 00:00:00 UTC),
                Bytes::from_static(b"hello"),
            );
            assert_eq!(response.status(), StatusCode::OK, "range `{value}`");
        }
    }
}
