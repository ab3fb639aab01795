//! Wire codec for the client protocol.
//!
//! Requests arrive as an HTTP-shaped start line, a header block and an
//! optional body. Bodies are flat JSON-ish objects, and fields are pulled out
//! of them with [`extract_field`], a deliberately lenient scanner that never
//! validates the document as a whole. A missing key, a truncated value or an
//! unbalanced bracket all come back as an empty string, so callers treat `""`
//! as "absent".

/// Path prefix of a command poll request.
pub const COMMAND_POLL_PREFIX: &str = "/cmd?steamID=";

/// Display name used when an event carries no `playerName`.
pub const DEFAULT_PLAYER_NAME: &str = "Ghost";

/// Steam ID used when an event carries no `steamID`.
pub const DEFAULT_STEAM_ID: &str = "Unknown";

// ============================================================================
// Request framing
// ============================================================================

/// The parsed start line of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
}

impl RequestLine {
    /// Parse `<METHOD> <PATH> ...`. A missing path defaults to `/`.
    pub fn parse(line: &str) -> Self {
        let mut parts = line.trim_end_matches(['\r', '\n']).split(' ');
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts
            .next()
            .filter(|p| !p.is_empty())
            .unwrap_or("/")
            .to_string();
        Self { method, path }
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    /// The decoded steam ID if this is a command poll (`/cmd?steamID=<id>`
    /// on any method other than POST).
    pub fn command_poll_target(&self) -> Option<String> {
        if self.is_post() {
            return None;
        }
        self.path
            .strip_prefix(COMMAND_POLL_PREFIX)
            .map(percent_decode)
    }
}

/// Value of a `Content-Length` header line, matched case-insensitively.
/// Returns `None` for any other header or an unparsable length.
pub fn parse_content_length(header: &str) -> Option<usize> {
    const NAME: &str = "content-length:";
    let prefix = header.get(..NAME.len())?;
    if !prefix.eq_ignore_ascii_case(NAME) {
        return None;
    }
    header[NAME.len()..].trim().parse().ok()
}

/// Decode a form-urlencoded value: `+` becomes a space and `%XX` a byte.
/// Malformed escapes are kept verbatim.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ============================================================================
// Field extraction
// ============================================================================

/// Pull the value of `key` out of a flat JSON-ish object.
///
/// The value is classified by its first non-whitespace byte after the colon:
/// - `"`: a string, scanned to the next unescaped quote and unescaped
/// - `[` or `{`: returned verbatim, bracket-balanced; brackets inside quoted
///   strings do not count toward depth
/// - anything else: a bare number made of digits, signs and `.`
pub fn extract_field(json: &str, key: &str) -> String {
    let needle = format!("\"{key}\"");
    let Some(key_at) = json.find(&needle) else {
        return String::new();
    };
    let Some(colon) = json[key_at..].find(':').map(|c| key_at + c) else {
        return String::new();
    };

    let bytes = json.as_bytes();
    let mut start = colon + 1;
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    if start >= bytes.len() {
        return String::new();
    }

    match bytes[start] {
        b'"' => scan_string(json, start).unwrap_or_default(),
        open @ (b'[' | b'{') => {
            let close = if open == b'[' { b']' } else { b'}' };
            scan_balanced(bytes, start, open, close)
                .map(|end| json[start..end].to_string())
                .unwrap_or_default()
        }
        _ => {
            let end = bytes[start..]
                .iter()
                .position(|b| !matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.'))
                .map_or(bytes.len(), |n| start + n);
            json[start..end].to_string()
        }
    }
}

/// Scan a quoted string starting at the opening quote. `None` if the
/// closing quote never arrives.
fn scan_string(json: &str, open: usize) -> Option<String> {
    let bytes = json.as_bytes();
    let mut escaped = false;
    for (offset, &b) in bytes[open + 1..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => return Some(unescape(&json[open + 1..open + 1 + offset])),
            _ => {}
        }
    }
    None
}

/// Index one past the bracket that closes the one at `open_at`.
fn scan_balanced(bytes: &[u8], open_at: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 1usize;
    let mut i = open_at + 1;
    while i < bytes.len() {
        match bytes[i] {
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Resolve JSON string escapes. Unknown escapes keep the escaped character.
fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => out.push(decoded),
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ============================================================================
// Events
// ============================================================================

/// The `event` discriminator of a client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Axis,
    Input,
    Pos,
    Ack,
    Objects,
    Pause,
    Disconnect,
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "axis" => Self::Axis,
            "input" => Self::Input,
            "pos" => Self::Pos,
            "ack" => Self::Ack,
            "objects" => Self::Objects,
            "pause" => Self::Pause,
            "disconnect" => Self::Disconnect,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One flat event object received from a client.
#[derive(Debug, Clone)]
pub struct ClientEvent {
    pub kind: EventKind,
    pub player_name: String,
    pub steam_id: String,
    body: String,
}

impl ClientEvent {
    /// Parse an event body. Absent `playerName` / `steamID` fall back to
    /// [`DEFAULT_PLAYER_NAME`] / [`DEFAULT_STEAM_ID`].
    pub fn parse(body: impl Into<String>) -> Self {
        let body = body.into();
        let kind = EventKind::parse(&extract_field(&body, "event"));
        let player_name = non_empty_or(extract_field(&body, "playerName"), DEFAULT_PLAYER_NAME);
        let steam_id = non_empty_or(extract_field(&body, "steamID"), DEFAULT_STEAM_ID);
        Self {
            kind,
            player_name,
            steam_id,
            body,
        }
    }

    /// An event-specific field; empty when absent.
    pub fn field(&self, key: &str) -> String {
        extract_field(&self.body, key)
    }

    /// A numeric field, `None` when absent or unparsable.
    pub fn number(&self, key: &str) -> Option<f64> {
        parse_number(&self.field(key))
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Parse a finite decimal number.
pub fn parse_number(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
