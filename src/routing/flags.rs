//! Flag utilities shared by route registration and lookup.
//!
//! A flag is a lowercase token describing one request dimension: the HTTP
//! method, the scheme, a content kind (`json`, `upload`, `mmr`), the
//! authorization state (`logged` / `unlogged`) or an application marker.
//! Routes declare the flags they require; requests carry the flags derived
//! from their headers.
//!
//! # Design Decisions
//! - Pure functions only; no state lives here
//! - `normalize` returns a new flag list plus the priority adjustment instead
//!   of mutating the caller's list in place
//! - `compare` is tri-state so the registry can remember that a request was
//!   turned away for its authorization state, not for its method

pub const GET: &str = "get";
pub const POST: &str = "post";
pub const PUT: &str = "put";
pub const DELETE: &str = "delete";
pub const UPLOAD: &str = "upload";
pub const JSON: &str = "json";
pub const RAW: &str = "raw";
pub const MIXED: &str = "mmr";
pub const PROXY: &str = "proxy";
pub const XSS: &str = "xss";
pub const XHR: &str = "xhr";
pub const ANY_XHR: &str = "+xhr";
pub const SSE: &str = "sse";
pub const DEBUG: &str = "debug";
pub const REFERER: &str = "referer";
pub const LOGGED: &str = "logged";
pub const UNLOGGED: &str = "unlogged";

const METHODS: [&str; 5] = [GET, POST, PUT, DELETE, UPLOAD];

/// Result of normalizing a route's declared flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Lowercased, de-duplicated flags including implied ones.
    pub flags: Vec<String>,
    /// Priority adjustment contributed by the flags.
    pub priority_delta: i32,
    /// The route consumes a request body.
    pub body_required: bool,
    /// The route asks for referer checking.
    pub check_referer: bool,
    /// The route is restricted to `logged` or `unlogged` requests.
    pub membership: bool,
}

impl Normalized {
    pub fn has(&self, flag: &str) -> bool {
        contains(&self.flags, flag)
    }
}

/// Outcome of comparing request flags against a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMatch {
    /// The request is in the wrong authorization state.
    Forbidden,
    /// A method or content flag is missing.
    NoMatch,
    Match,
}

pub fn contains<S: AsRef<str>>(flags: &[S], flag: &str) -> bool {
    flags.iter().any(|f| f.as_ref() == flag)
}

fn is_membership(flag: &str) -> bool {
    flag == LOGGED || flag == UNLOGGED
}

/// Normalize route flags and compute their priority contribution.
///
/// Every declared flag is worth two points. Implied flags are worth one
/// point each, except the fallback `get`, which adds nothing.
pub fn normalize<S: AsRef<str>>(declared: &[S]) -> Normalized {
    let mut flags: Vec<String> = Vec::with_capacity(declared.len() + 2);
    for flag in declared {
        let flag = flag.as_ref().trim().to_lowercase();
        if !flag.is_empty() && !contains(&flags, &flag) {
            flags.push(flag);
        }
    }

    let mut priority_delta = flags.len() as i32 * 2;

    if contains(&flags, PROXY) && !contains(&flags, JSON) {
        flags.push(JSON.to_string());
        priority_delta += 1;
    }

    if (contains(&flags, JSON) || contains(&flags, RAW))
        && !contains(&flags, POST)
        && !contains(&flags, PUT)
    {
        flags.push(POST.to_string());
        priority_delta += 1;
    }

    if contains(&flags, MIXED)
        && !contains(&flags, POST)
        && !contains(&flags, PUT)
        && !contains(&flags, UPLOAD)
    {
        flags.push(UPLOAD.to_string());
        priority_delta += 1;
    }

    if !METHODS.iter().any(|m| contains(&flags, m)) {
        flags.push(GET.to_string());
    }

    let body_required = [POST, PUT, UPLOAD, MIXED, JSON]
        .iter()
        .any(|f| contains(&flags, f));
    let check_referer = contains(&flags, REFERER);
    let membership = flags.iter().any(|f| is_membership(f));

    Normalized {
        flags,
        priority_delta,
        body_required,
        check_referer,
        membership,
    }
}

/// Compare request flags against the flags a route requires.
///
/// `raw` is a route-side content marker and is never looked for on the
/// request. Missing method or content flags win over a missing
/// authorization state, so a wrong method never reports `Forbidden`.
pub fn compare<R, Q>(request: &[R], route: &[Q], relax_membership: bool) -> FlagMatch
where
    R: AsRef<str>,
    Q: AsRef<str>,
{
    let mut forbidden = false;
    let mut allows_xss = false;

    for flag in route {
        let flag = flag.as_ref();
        match flag {
            RAW => continue,
            XSS => {
                allows_xss = true;
                continue;
            }
            _ => {}
        }

        if is_membership(flag) {
            if !relax_membership && !contains(request, flag) {
                forbidden = true;
            }
            continue;
        }

        if !contains(request, flag) {
            return FlagMatch::NoMatch;
        }
    }

    if !allows_xss && contains(request, XSS) {
        return FlagMatch::NoMatch;
    }

    if forbidden {
        FlagMatch::Forbidden
    } else {
        FlagMatch::Match
    }
}

/// Request characteristics that feed flag derivation.
#[derive(Debug, Clone, Default)]
pub struct RequestTraits<'a> {
    pub method: &'a str,
    pub scheme: &'a str,
    pub content_type: &'a str,
    pub proxy: bool,
    pub accept: &'a str,
    pub debug: bool,
    pub prefix: Option<&'a str>,
    pub xhr: bool,
    pub xss: bool,
    pub referer: bool,
}

/// Body encoding implied by a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// urlencoded, JSON or raw text, collected into one buffer.
    Buffered,
    /// `multipart/form-data`.
    Multipart,
    /// `multipart/x-mixed-replace` and friends.
    Mixed,
}

/// Classify a content type the way flag derivation does.
pub fn encoding(content_type: &str) -> Encoding {
    if content_type.contains("multipart/form-data") {
        Encoding::Multipart
    } else if content_type.contains("mixed") {
        Encoding::Mixed
    } else {
        Encoding::Buffered
    }
}

/// Derive the flag list for an incoming request.
///
/// Order is stable: method, scheme, content kind, markers, `+xhr`, then the
/// optional `xhr`, `xss` and `referer` flags.
pub fn derive(traits: &RequestTraits<'_>) -> Vec<String> {
    let mut flags = vec![traits.method.to_lowercase(), traits.scheme.to_string()];

    let encoding = encoding(traits.content_type);
    if encoding != Encoding::Multipart && traits.content_type.contains("application/json") {
        flags.push(JSON.to_string());
    }
    if encoding == Encoding::Mixed {
        flags.push(MIXED.to_string());
    }
    if encoding != Encoding::Buffered {
        flags.push(UPLOAD.to_string());
    }

    if traits.proxy {
        flags.push(PROXY.to_string());
    }
    if traits.accept == "text/event-stream" {
        flags.push(SSE.to_string());
    }
    if traits.debug {
        flags.push(DEBUG.to_string());
    }
    if let Some(prefix) = traits.prefix.filter(|p| !p.is_empty()) {
        flags.push(format!("#{}", prefix));
    }

    flags.push(ANY_XHR.to_string());

    if traits.xhr {
        flags.push(XHR.to_string());
    }
    if traits.xss {
        flags.push(XSS.to_string());
    }
    if traits.referer {
        flags.push(REFERER.to_string());
    }

    flags
}
