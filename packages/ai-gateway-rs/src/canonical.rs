use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::GatewayConfig;
use crate::types::Diagnostic;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonMark {
    Bold,
    Italic,
    Underline,
    Strike,
    Code,
    Link,
}

impl CanonMark {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonMark::Bold => "bold",
            CanonMark::Italic => "italic",
            CanonMark::Underline => "underline",
            CanonMark::Strike => "strike",
            CanonMark::Code => "code",
            CanonMark::Link => "link",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "b" | "strong" => Some(CanonMark::Bold),
            "i" | "em" => Some(CanonMark::Italic),
            "u" => Some(CanonMark::Underline),
            "s" | "del" | "strike" => Some(CanonMark::Strike),
            "code" => Some(CanonMark::Code),
            "a" => Some(CanonMark::Link),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonText {
    pub text: String,
    /// Sorted in declaration order of `CanonMark`.
    pub marks: Vec<CanonMark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonNode {
    Block(CanonBlock),
    Text(CanonText),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<CanonNode>,
}

impl CanonBlock {
    /// Concatenated text of the block and its descendants.
    pub fn plain_text(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            match child {
                CanonNode::Text(leaf) => text.push_str(&leaf.text),
                CanonNode::Block(block) => text.push_str(&block.plain_text()),
            }
        }
        text
    }
}

/// Canonical form of a sanitized payload: top-level blocks in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonFragment {
    pub blocks: Vec<CanonBlock>,
    pub diagnostics: Vec<Diagnostic>,
    /// Block types outside the allowed set, whether kept or dropped.
    pub unknown_block_types: BTreeSet<String>,
}

#[derive(Clone, Debug)]
enum InputNode {
    Text(String),
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<InputNode>,
    },
}

static PARSE_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(/?)([\w-]+)([^>]*)>"#).expect("invalid parse tag regex"));

static PARSE_ATTR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([\w-]+)\s*=\s*["']([^"']*)["']"#).expect("invalid parse attr regex"));

fn parse_attrs(attrs: &str) -> BTreeMap<String, String> {
    PARSE_ATTR_REGEX
        .captures_iter(attrs)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase();
            let value = caps.get(2)?.as_str();
            Some((name, decode_entities(value)))
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn is_void(tag: &str) -> bool {
    matches!(tag, "br" | "hr" | "img" | "input" | "meta" | "link")
}

struct OpenElement {
    tag: String,
    attrs: BTreeMap<String, String>,
    children: Vec<InputNode>,
}

impl OpenElement {
    fn new(tag: String, attrs: BTreeMap<String, String>) -> Self {
        Self {
            tag,
            attrs,
            children: Vec::new(),
        }
    }

    fn close(self) -> InputNode {
        InputNode::Element {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        }
    }
}

fn push_child(stack: &mut [OpenElement], node: InputNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

/// Lenient parse: unmatched closers are ignored and unclosed elements are
/// closed at the end.
fn parse_html(html: &str) -> Vec<InputNode> {
    let mut stack = vec![OpenElement::new(String::new(), BTreeMap::new())];
    let mut last_index = 0;

    for captures in PARSE_TAG_REGEX.captures_iter(html) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let text = &html[last_index..whole.start()];
        if !text.is_empty() {
            push_child(&mut stack, InputNode::Text(decode_entities(text)));
        }
        last_index = whole.end();

        let closing = captures.get(1).is_some_and(|value| value.as_str() == "/");
        let tag = captures.get(2).map_or(String::new(), |value| value.as_str().to_lowercase());
        let attrs = captures.get(3).map_or("", |value| value.as_str());

        if closing {
            let Some(position) = stack.iter().rposition(|open| open.tag == tag) else {
                continue;
            };
            if position == 0 {
                continue;
            }
            while stack.len() > position {
                if let Some(open) = stack.pop() {
                    push_child(&mut stack, open.close());
                }
            }
        } else if is_void(&tag) || attrs.trim_end().ends_with('/') {
            let node = if tag == "br" {
                InputNode::Text("\n".to_string())
            } else {
                OpenElement::new(tag, parse_attrs(attrs)).close()
            };
            push_child(&mut stack, node);
        } else {
            stack.push(OpenElement::new(tag, parse_attrs(attrs)));
        }
    }

    let tail = &html[last_index..];
    if !tail.is_empty() {
        push_child(&mut stack, InputNode::Text(decode_entities(tail)));
    }
    while stack.len() > 1 {
        if let Some(open) = stack.pop() {
            push_child(&mut stack, open.close());
        }
    }
    stack.pop().map(|root| root.children).unwrap_or_default()
}

fn block_type_for(tag: &str) -> Option<&'static str> {
    match tag {
        "p" | "div" => Some("paragraph"),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some("heading"),
        "ul" | "ol" => Some("list"),
        "li" => Some("list_item"),
        "table" => Some("table"),
        "thead" | "tbody" => Some("table_section"),
        "tr" => Some("table_row"),
        "td" | "th" => Some("table_cell"),
        "blockquote" => Some("quote"),
        "pre" => Some("code_block"),
        _ => None,
    }
}

fn heading_level(tag: &str) -> Option<&str> {
    tag.strip_prefix('h').filter(|level| matches!(*level, "1" | "2" | "3" | "4" | "5" | "6"))
}

fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in ai_context_hash_rs::normalize_line_feeds(text).chars() {
        if ch == ' ' || ch == '\t' {
            if !in_space {
                result.push(' ');
            }
            in_space = true;
        } else {
            in_space = false;
            result.push(ch);
        }
    }
    result
}

#[derive(Clone)]
struct Segment {
    text: String,
    marks: BTreeSet<CanonMark>,
    href: Option<String>,
}

struct Canonicalizer<'a> {
    config: &'a GatewayConfig,
    next_id: usize,
    fragment: CanonFragment,
}

impl<'a> Canonicalizer<'a> {
    fn next_id(&mut self) -> String {
        let id = format!("r/{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn diag(&mut self, kind: &str, detail: String) {
        self.fragment.diagnostics.push(Diagnostic::new(kind, detail));
    }

    /// Groups runs of inline nodes into anonymous paragraphs between blocks.
    fn blocks_of(&mut self, nodes: &[InputNode], path: &str) -> Vec<CanonBlock> {
        let mut blocks = Vec::new();
        let mut inline: Vec<&InputNode> = Vec::new();

        for (index, node) in nodes.iter().enumerate() {
            let child_path = format!("{path}/{index}");
            match node {
                InputNode::Element { tag, .. } if block_type_for(tag).is_some() => {
                    if let Some(block) = self.anonymous_paragraph(&inline, &child_path) {
                        blocks.push(block);
                    }
                    inline.clear();
                    if let Some(block) = self.block(node, &child_path) {
                        blocks.push(block);
                    }
                }
                _ => inline.push(node),
            }
        }
        if let Some(block) = self.anonymous_paragraph(&inline, path) {
            blocks.push(block);
        }
        blocks
    }

    fn anonymous_paragraph(&mut self, inline: &[&InputNode], path: &str) -> Option<CanonBlock> {
        let children = self.inline_children(inline, path);
        if children.is_empty() {
            return None;
        }
        Some(CanonBlock {
            id: self.next_id(),
            block_type: "paragraph".to_string(),
            attrs: BTreeMap::new(),
            children,
        })
    }

    fn block(&mut self, node: &InputNode, path: &str) -> Option<CanonBlock> {
        let InputNode::Element { tag, attrs, children } = node else {
            return None;
        };
        let block_type = block_type_for(tag)?;
        if !self.config.allows_block_type(block_type) {
            self.fragment.unknown_block_types.insert(block_type.to_string());
            self.diag("unknown_block", format!("{block_type} at {path}"));
            if !self.config.reject_unknown_structure() {
                return None;
            }
        }
        let id = self.next_id();

        let mut canon_attrs = BTreeMap::new();
        if let Some(level) = heading_level(tag) {
            canon_attrs.insert("level".to_string(), level.to_string());
        }
        if tag == "ol" {
            canon_attrs.insert("ordered".to_string(), "true".to_string());
        }
        for key in ["colspan", "rowspan"] {
            if let Some(value) = attrs.get(key) {
                canon_attrs.insert(key.to_string(), value.clone());
            }
        }

        let has_block_children = children
            .iter()
            .any(|child| matches!(child, InputNode::Element { tag, .. } if block_type_for(tag).is_some()));
        let canon_children = if has_block_children {
            self.blocks_of(children, path)
                .into_iter()
                .map(CanonNode::Block)
                .collect()
        } else {
            let inline: Vec<&InputNode> = children.iter().collect();
            self.inline_children(&inline, path)
        };

        if canon_children.is_empty() {
            self.diag("dropped_empty_node", path.to_string());
            return None;
        }
        Some(CanonBlock {
            id,
            block_type: block_type.to_string(),
            attrs: canon_attrs,
            children: canon_children,
        })
    }

    fn inline_children(&mut self, inline: &[&InputNode], path: &str) -> Vec<CanonNode> {
        let mut segments = Vec::new();
        for (index, node) in inline.iter().enumerate() {
            let child_path = format!("{path}/inline/{index}");
            self.collect_segments(node, &child_path, &BTreeSet::new(), None, &mut segments);
        }
        merge_segments(segments)
    }

    fn collect_segments(
        &mut self,
        node: &InputNode,
        path: &str,
        marks: &BTreeSet<CanonMark>,
        href: Option<&str>,
        segments: &mut Vec<Segment>,
    ) {
        match node {
            InputNode::Text(text) => {
                let normalized = normalize_whitespace(text);
                if normalized.trim().is_empty() {
                    return;
                }
                segments.push(Segment {
                    text: normalized,
                    marks: marks.clone(),
                    href: href.map(str::to_string),
                });
            }
            InputNode::Element { tag, attrs, children } => {
                let mut marks = marks.clone();
                let mut href = href.map(str::to_string);
                match CanonMark::from_tag(tag) {
                    Some(mark) if self.config.allows_mark(mark.as_str()) => {
                        if mark == CanonMark::Link {
                            match attrs.get("href").map(|value| value.trim()) {
                                Some(value) if !value.is_empty() => {
                                    href = Some(value.to_string());
                                    marks.insert(mark);
                                }
                                _ => self.diag("dropped_invalid_href", path.to_string()),
                            }
                        } else {
                            marks.insert(mark);
                        }
                    }
                    Some(mark) => self.diag("removed_mark", format!("{} at {path}", mark.as_str())),
                    None if tag != "span" => self.diag("unknown_mark", format!("{tag} at {path}")),
                    None => {}
                }
                for (index, child) in children.iter().enumerate() {
                    let child_path = format!("{path}/{index}");
                    self.collect_segments(child, &child_path, &marks, href.as_deref(), segments);
                }
            }
        }
    }
}

fn merge_segments(segments: Vec<Segment>) -> Vec<CanonNode> {
    let mut merged: Vec<Segment> = Vec::new();
    for segment in segments {
        match merged.last_mut() {
            Some(last) if last.marks == segment.marks && last.href == segment.href => {
                last.text.push_str(&segment.text);
            }
            _ => merged.push(segment),
        }
    }
    merged
        .into_iter()
        .map(|segment| {
            CanonNode::Text(CanonText {
                text: segment.text,
                marks: segment.marks.into_iter().collect(),
                href: segment.href,
            })
        })
        .collect()
}

/// Canonical tree of sanitized HTML. Disallowed block types are recorded in
/// `unknown_block_types`; the caller decides whether that rejects.
pub fn canonicalize_html(html: &str, config: &GatewayConfig) -> CanonFragment {
    let nodes = parse_html(html);
    let mut canonicalizer = Canonicalizer {
        config,
        next_id: 0,
        fragment: CanonFragment::default(),
    };
    let blocks = canonicalizer.blocks_of(&nodes, "r");
    let mut fragment = canonicalizer.fragment;
    fragment.blocks = blocks;
    fragment
}
