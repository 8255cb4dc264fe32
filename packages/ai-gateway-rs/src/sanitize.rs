use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::GatewayConfig;
use crate::types::Diagnostic;

const CRITICAL_PROTOCOLS: [&str; 3] = ["javascript:", "vbscript:", "data:"];
const BLOCKED_TAGS: [&str; 5] = ["script", "style", "iframe", "object", "embed"];

/// Converts markdown payloads to HTML. Hosts plug in their own renderer.
pub trait MarkdownBridge: Send + Sync {
    /// `None` when the markdown could not be converted.
    fn to_html(&self, markdown: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SanitizedHtml {
    pub html: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Limit violations; any entry rejects the payload.
    pub errors: Vec<Diagnostic>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum UrlSafety {
    Safe,
    Unsafe,
    Critical,
}

struct AttributeMatch {
    raw_name: String,
    name: String,
    value: String,
}

struct TagState {
    depth: usize,
    max_depth: usize,
    max_attrs: usize,
}

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(/?)([a-zA-Z][\w:-]*)(\s+(?:[^"'>]+|"[^"]*"|'[^']*')*)?>"#).expect("invalid tag regex")
});

static ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_][\w:.-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("invalid attr regex")
});

static SCRIPT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*script\b").expect("invalid script regex"));

static BLOCKED_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    BLOCKED_TAGS
        .iter()
        .map(|tag| {
            let pattern = format!(r"(?is)<\s*{tag}\b[^>]*>.*?<\s*/\s*{tag}\s*>");
            (*tag, Regex::new(&pattern).expect("invalid blocked tag regex"))
        })
        .collect()
});

fn normalize_url(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|ch| !ch.is_control() && !ch.is_whitespace())
        .collect()
}

fn classify_url(url: &str, allowed_protocols: &[String]) -> UrlSafety {
    let normalized = normalize_url(url);
    if CRITICAL_PROTOCOLS.iter().any(|proto| normalized.starts_with(proto)) {
        return UrlSafety::Critical;
    }
    if allowed_protocols.iter().any(|proto| normalized.starts_with(proto.as_str())) {
        return UrlSafety::Safe;
    }
    if normalized.starts_with('/') || normalized.starts_with('#') || !normalized.contains(':') {
        return UrlSafety::Safe;
    }
    UrlSafety::Unsafe
}

fn url_candidates<'a>(name: &str, value: &'a str) -> Vec<&'a str> {
    if name != "srcset" {
        return vec![value];
    }
    value
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
        .collect()
}

fn is_url_attribute(name: &str) -> bool {
    matches!(name, "href" | "src" | "srcset" | "poster" | "xlink:href" | "action" | "formaction")
}

fn is_allowed_tag(tag: &str) -> bool {
    matches!(
        tag,
        "span"
            | "b"
            | "strong"
            | "i"
            | "em"
            | "u"
            | "s"
            | "del"
            | "code"
            | "a"
            | "p"
            | "blockquote"
            | "ul"
            | "ol"
            | "li"
            | "pre"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "br"
            | "table"
            | "thead"
            | "tbody"
            | "tr"
            | "th"
            | "td"
    )
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "br" | "hr" | "img" | "input" | "col" | "source" | "area" | "base" | "link" | "meta"
    )
}

fn is_allowed_attribute(tag: &str, name: &str) -> bool {
    match tag {
        "a" => matches!(name, "href" | "title" | "rel"),
        "td" | "th" => matches!(name, "colspan" | "rowspan"),
        _ => false,
    }
}

/// Attributes of one tag plus any text between them that is not an attribute.
struct ParsedAttributes {
    items: Vec<AttributeMatch>,
    stray: Vec<String>,
}

fn collect_attributes(attrs: &str) -> ParsedAttributes {
    let mut parsed = ParsedAttributes {
        items: Vec::new(),
        stray: Vec::new(),
    };
    let mut last_index = 0;
    for caps in ATTR_REGEX.captures_iter(attrs) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_stray(&attrs[last_index..whole.start()], &mut parsed.stray);
        last_index = whole.end();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |value| value.as_str());
        parsed.items.push(AttributeMatch {
            raw_name: name.as_str().to_string(),
            name: name.as_str().to_lowercase(),
            value: value.to_string(),
        });
    }
    push_stray(&attrs[last_index..], &mut parsed.stray);
    parsed
}

fn push_stray(gap: &str, stray: &mut Vec<String>) {
    let text = gap.trim();
    if !text.is_empty() && text != "/" {
        stray.push(text.to_string());
    }
}

fn escape_attribute(value: &str) -> String {
    value.replace('"', "&quot;")
}

/// First known-malicious pattern in `payload`: a script element or a URL
/// attribute with an executable protocol.
pub fn detect_malicious(payload: &str) -> Option<String> {
    if SCRIPT_REGEX.is_match(payload) {
        return Some("script element in payload".to_string());
    }
    for captures in TAG_REGEX.captures_iter(payload) {
        let Some(attrs) = captures.get(3) else {
            continue;
        };
        for attr in collect_attributes(attrs.as_str()).items {
            if !is_url_attribute(&attr.name) {
                continue;
            }
            for url in url_candidates(&attr.name, &attr.value) {
                if classify_url(url, &[]) == UrlSafety::Critical {
                    return Some(format!("critical URL in {}: {url}", attr.name));
                }
            }
        }
    }
    None
}

fn strip_blocked_elements(html: &str, diagnostics: &mut Vec<Diagnostic>) -> String {
    let mut result = html.to_string();
    for (tag, regex) in BLOCKED_REGEXES.iter() {
        let count = regex.find_iter(&result).count();
        if count == 0 {
            continue;
        }
        for _ in 0..count {
            diagnostics.push(Diagnostic::warning("removed_tag", format!("Removed blocked tag: <{tag}>")));
        }
        result = regex.replace_all(&result, "").into_owned();
    }
    result
}

fn sanitize_attribute(
    tag: &str,
    item: &AttributeMatch,
    allowed_protocols: &[String],
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<String> {
    if item.name.starts_with("on") {
        diagnostics.push(Diagnostic::warning(
            "removed_attr",
            format!("Removed event handler attribute: {}", item.name),
        ));
        return None;
    }
    if is_url_attribute(&item.name) {
        let unsafe_url = url_candidates(&item.name, &item.value)
            .into_iter()
            .any(|url| classify_url(url, allowed_protocols) != UrlSafety::Safe);
        if unsafe_url {
            diagnostics.push(Diagnostic::warning(
                "sanitized_url",
                format!("Sanitized unsafe URL in {}", item.name),
            ));
            return None;
        }
    }
    if !is_allowed_attribute(tag, &item.name) {
        diagnostics.push(Diagnostic::warning(
            "removed_attr",
            format!("Removed non-whitelisted attribute: {}", item.name),
        ));
        return None;
    }
    Some(format!("{}=\"{}\"", item.raw_name, escape_attribute(&item.value)))
}

fn sanitize_tag(
    closing: bool,
    tag_name: &str,
    attrs: &str,
    allowed_protocols: &[String],
    state: &mut TagState,
    sanitized: &mut SanitizedHtml,
) -> String {
    let tag = tag_name.to_lowercase();
    let self_closing = attrs.trim().ends_with('/');
    let void = is_void_tag(&tag);

    if closing {
        if !void {
            state.depth = state.depth.saturating_sub(1);
        }
        return if is_allowed_tag(&tag) {
            format!("</{tag}>")
        } else {
            String::new()
        };
    }

    if !self_closing && !void {
        state.depth += 1;
        if state.depth > state.max_depth {
            sanitized.errors.push(Diagnostic::new(
                "limit_exceeded",
                format!("Nesting depth exceeded: {} > {}", state.depth, state.max_depth),
            ));
        }
    }

    let parsed = collect_attributes(attrs);
    if parsed.items.len() > state.max_attrs {
        sanitized.errors.push(Diagnostic::new(
            "limit_exceeded",
            format!(
                "Attribute count exceeded for <{tag}>: {} > {}",
                parsed.items.len(),
                state.max_attrs
            ),
        ));
    }

    if !is_allowed_tag(&tag) {
        sanitized.diagnostics.push(Diagnostic::warning(
            "removed_tag",
            format!("Removed non-whitelisted tag: <{tag}>"),
        ));
        return String::new();
    }

    for text in &parsed.stray {
        sanitized.diagnostics.push(Diagnostic::warning(
            "removed_attr",
            format!("Removed unparsable attribute text: {text}"),
        ));
    }
    let kept: Vec<String> = parsed
        .items
        .iter()
        .take(state.max_attrs)
        .filter_map(|item| sanitize_attribute(&tag, item, allowed_protocols, &mut sanitized.diagnostics))
        .collect();
    if kept.is_empty() {
        format!("<{tag}>")
    } else {
        format!("<{tag} {}>", kept.join(" "))
    }
}

/// Strip disallowed tags and attributes. Every removal is recorded.
pub fn sanitize_html(html: &str, config: &GatewayConfig) -> SanitizedHtml {
    let mut sanitized = SanitizedHtml::default();
    let allowed_protocols = config.allowed_url_protocols();
    let stripped = strip_blocked_elements(html, &mut sanitized.diagnostics);
    let mut state = TagState {
        depth: 0,
        max_depth: config.max_nesting_depth(),
        max_attrs: config.max_attribute_count(),
    };

    let mut output = String::with_capacity(stripped.len());
    let mut last_index = 0;
    for captures in TAG_REGEX.captures_iter(&stripped) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        output.push_str(&stripped[last_index..whole.start()]);
        let closing = captures.get(1).is_some_and(|value| value.as_str() == "/");
        let tag_name = captures.get(2).map_or("", |value| value.as_str());
        let attrs = captures.get(3).map_or("", |value| value.as_str());
        let tag = sanitize_tag(closing, tag_name, attrs, &allowed_protocols, &mut state, &mut sanitized);
        output.push_str(&tag);
        last_index = whole.end();
    }
    output.push_str(&stripped[last_index..]);

    sanitized.html = output;
    sanitized
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Plain text becomes one paragraph per blank-line separated chunk.
pub fn text_to_html(text: &str) -> String {
    let normalized = ai_context_hash_rs::normalize_line_feeds(text);
    normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| format!("<p>{}</p>", escape_html(chunk)))
        .collect()
}
