//! Pure mapping from typed blocks and properties to Notion's JSON.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::parser::{Block, BulletItem, TextSpan};

/// Notion rejects text objects longer than this.
pub const MAX_TEXT_CHARS: usize = 2000;

/// Typed value of one database property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    Number(f64),
    Url(String),
    Checkbox(bool),
    ExternalFile { name: String, url: String },
}

/// Property name to value, in a stable order.
pub type Properties = BTreeMap<String, PropertyValue>;

pub fn property(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Title(text) => json!({ "title": plain_rich_text(text) }),
        PropertyValue::RichText(text) => json!({ "rich_text": plain_rich_text(text) }),
        PropertyValue::Number(n) => json!({ "number": n }),
        PropertyValue::Url(url) => json!({ "url": url }),
        PropertyValue::Checkbox(checked) => json!({ "checkbox": checked }),
        PropertyValue::ExternalFile { name, url } => json!({
            "files": [{ "type": "external", "name": name, "external": { "url": url } }]
        }),
    }
}

pub fn properties(props: &Properties) -> Value {
    Value::Object(
        props
            .iter()
            .map(|(name, value)| (name.clone(), property(value)))
            .collect(),
    )
}

fn text_item(content: &str, bold: bool) -> Value {
    let mut item = json!({ "type": "text", "text": { "content": content } });
    if bold {
        item["annotations"] = json!({ "bold": true });
    }
    item
}

/// Split on char boundaries into pieces of at most [`MAX_TEXT_CHARS`] chars.
fn chunks(content: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let cut = rest
            .char_indices()
            .nth(MAX_TEXT_CHARS)
            .map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

pub fn rich_text(spans: &[TextSpan]) -> Vec<Value> {
    spans
        .iter()
        .flat_map(|span| {
            chunks(&span.content)
                .into_iter()
                .map(move |piece| text_item(piece, span.bold))
        })
        .collect()
}

/// Unstyled text; an empty string still yields one empty text item.
pub fn plain_rich_text(text: &str) -> Vec<Value> {
    if text.is_empty() {
        return vec![text_item("", false)];
    }
    chunks(text)
        .into_iter()
        .map(|piece| text_item(piece, false))
        .collect()
}

fn typed_block(kind: &str, body: Value) -> Value {
    json!({ "object": "block", "type": kind, kind: body })
}

fn bullet(item: &BulletItem) -> Value {
    let mut body = json!({ "rich_text": rich_text(&item.spans) });
    if !item.children.is_empty() {
        body["children"] = Value::Array(item.children.iter().map(bullet).collect());
    }
    typed_block("bulleted_list_item", body)
}

pub fn block(block: &Block) -> Value {
    match block {
        Block::Heading { level, spans } => {
            let kind = format!("heading_{}", (*level).clamp(1, 3));
            typed_block(&kind, json!({ "rich_text": rich_text(spans) }))
        }
        Block::Paragraph(spans) => typed_block("paragraph", json!({ "rich_text": rich_text(spans) })),
        Block::BulletListItem(item) => bullet(item),
        Block::NumberedListItem(spans) => {
            typed_block("numbered_list_item", json!({ "rich_text": rich_text(spans) }))
        }
        Block::Divider => typed_block("divider", json!({})),
        Block::CodeBlock(text) => typed_block(
            "code",
            json!({ "rich_text": plain_rich_text(text), "language": "plain text" }),
        ),
    }
}

pub fn blocks(blocks: &[Block]) -> Vec<Value> {
    blocks.iter().map(block).collect()
}
