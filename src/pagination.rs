//! Pagination metadata: `X-Total-Count` and RFC 5988 `Link` headers.
//!
//! ```text
//! Link: </user?page=1&per_page=20>; rel="self",
//!       </user?page=2&per_page=20>; rel="next",
//!       </user?page=2&per_page=20>; rel="last"
//! ```

use crate::transport::HttpResponse;
use crate::types::{PAGE, PER_PAGE};

pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";
pub const LINK_HEADER: &str = "Link";

/// A page addressed by number and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub page: usize,
    pub per_page: usize,
}

/// Page links found in a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    pub first: Option<PageRef>,
    pub current: Option<PageRef>,
    pub next: Option<PageRef>,
    pub prev: Option<PageRef>,
    pub last: Option<PageRef>,
}

impl PageLinks {
    /// Parse every `Link` header of a response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let mut links = PageLinks::default();
        for header in response.header_all(LINK_HEADER) {
            for (target, rel) in parse_link_header(header) {
                let Some(page) = page_ref(&target) else {
                    continue;
                };
                for rel in rel.split_whitespace() {
                    match rel {
                        "first" => links.first = Some(page),
                        "self" => links.current = Some(page),
                        "next" => links.next = Some(page),
                        "prev" | "previous" => links.prev = Some(page),
                        "last" => links.last = Some(page),
                        _ => {}
                    }
                }
            }
        }
        links
    }

    /// Whether the current page is the last one. No `last` link means it is.
    pub fn is_last(&self) -> bool {
        match (self.current, self.last) {
            (_, None) => true,
            (Some(current), Some(last)) => current.page >= last.page,
            (None, Some(_)) => self.next.is_none(),
        }
    }
}

/// Total item count advertised by a response.
pub fn total_count(response: &HttpResponse) -> Option<usize> {
    response
        .header(TOTAL_COUNT_HEADER)
        .and_then(|v| v.trim().parse().ok())
}

/// Split a `Link` header value into `(target, rel)` pairs.
///
/// Entries without a `rel` parameter are skipped.
pub fn parse_link_header(value: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut rest = value;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let target = rest[open + 1..open + close].trim().to_string();
        rest = &rest[open + close + 1..];

        // Parameters run until the next entry, minus the `,` separating it.
        let params_end = rest.find('<').unwrap_or(rest.len());
        let params = rest[..params_end].trim_end().trim_end_matches(',');
        let rel = params.split(';').find_map(|param| {
            let (name, value) = param.split_once('=')?;
            if name.trim().eq_ignore_ascii_case("rel") {
                Some(value.trim().trim_matches('"').to_string())
            } else {
                None
            }
        });
        if let Some(rel) = rel {
            entries.push((target, rel));
        }
        rest = &rest[params_end..];
    }
    entries
}

/// Read `page` and `per_page` from a link target.
///
/// Targets are usually relative (`/user?page=2`), so they are parsed against
/// a placeholder base.
pub fn page_ref(target: &str) -> Option<PageRef> {
    let base = url::Url::parse("http://localhost/").ok()?;
    let url = base.join(target).ok()?;
    let mut page = None;
    let mut per_page = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            PAGE => page = value.parse().ok(),
            PER_PAGE => per_page = value.parse().ok(),
            _ => {}
        }
    }
    Some(PageRef {
        page: page?,
        per_page: per_page?,
    })
}
