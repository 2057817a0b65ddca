//! Response head parsing: status lines, Content-Range, validators.

use crate::source::ResponseHead;

/// `HTTP/1.1 206 Partial Content` → 206. Also handles `HTTP/2 200`.
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    let mut parts = rest.split_whitespace();
    let _version = parts.next()?;
    parts.next()?.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentRange {
    /// `bytes start-end/total` (total may be `*`).
    Bytes {
        start: u64,
        end: u64,
        total: Option<u64>,
    },
    /// `bytes */total`, sent with 416.
    Unsatisfied { total: u64 },
}

pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let total = total.trim();
    if range.trim() == "*" {
        return Some(ContentRange::Unsatisfied {
            total: total.parse().ok()?,
        });
    }
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = if total == "*" {
        None
    } else {
        Some(total.parse().ok()?)
    };
    Some(ContentRange::Bytes { start, end, total })
}

pub(crate) fn content_length(head: &ResponseHead) -> Option<u64> {
    head.header("content-length")?.trim().parse().ok()
}

/// Validator to replay in `If-Range`: ETag verbatim, else Last-Modified.
pub(crate) fn resume_token(head: &ResponseHead) -> Option<String> {
    head.header("etag")
        .or_else(|| head.header("last-modified"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines() {
        assert_eq!(parse_status_line("HTTP/1.1 206 Partial Content"), Some(206));
        assert_eq!(parse_status_line("HTTP/2 200"), Some(200));
        assert_eq!(parse_status_line("Content-Type: text/html"), None);
    }

    #[test]
    fn content_ranges() {
        assert_eq!(
            parse_content_range("bytes 100-199/200"),
            Some(ContentRange::Bytes {
                start: 100,
                end: 199,
                total: Some(200)
            })
        );
        assert_eq!(
            parse_content_range("bytes 0-9/*"),
            Some(ContentRange::Bytes {
                start: 0,
                end: 9,
                total: None
            })
        );
        assert_eq!(
            parse_content_range("bytes */4096"),
            Some(ContentRange::Unsatisfied { total: 4096 })
        );
        assert_eq!(parse_content_range("bytes 9-1/10"), None);
        assert_eq!(parse_content_range("items 0-1/2"), None);
    }

    #[test]
    fn etag_preferred_over_last_modified() {
        let mut head = ResponseHead {
            status: 200,
            headers: vec![
                ("Last-Modified".into(), "Wed, 21 Oct 2015 07:28:00 GMT".into()),
                ("ETag".into(), "\"v1\"".into()),
                ("Content-Length".into(), "42".into()),
            ],
        };
        assert_eq!(resume_token(&head).as_deref(), Some("\"v1\""));
        assert_eq!(content_length(&head), Some(42));
        head.headers.retain(|(k, _)| k != "ETag");
        assert_eq!(
            resume_token(&head).as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }
}
