//! Finding the generated image in an image-model reply.
//!
//! Upstream providers disagree on where the image goes, so extraction is an
//! ordered list of strategies tried until one produces a URL.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub type ImageStrategy = fn(&Value) -> Option<String>;

/// Tried in order; the first URL found wins.
pub const STRATEGIES: &[(&str, ImageStrategy)] = &[
    ("images_field", from_images_field),
    ("content_parts", from_content_parts),
    ("text_scan", from_text_scan),
];

pub fn extract_image_url(message: &Value) -> Option<String> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let url = strategy(message)?;
        tracing::debug!(strategy = *name, "image url extracted");
        Some(url)
    })
}

fn non_empty(url: Option<&str>) -> Option<String> {
    url.map(str::trim).filter(|u| !u.is_empty()).map(str::to_string)
}

fn url_of(entry: &Value) -> Option<String> {
    non_empty(entry.as_str())
        .or_else(|| non_empty(entry["image_url"]["url"].as_str()))
        .or_else(|| non_empty(entry["image_url"].as_str()))
        .or_else(|| non_empty(entry["url"].as_str()))
}

/// `message.images[]` as returned by OpenRouter image models.
pub fn from_images_field(message: &Value) -> Option<String> {
    message.get("images")?.as_array()?.iter().find_map(url_of)
}

/// Image parts inside an array-valued `message.content`.
pub fn from_content_parts(message: &Value) -> Option<String> {
    message
        .get("content")?
        .as_array()?
        .iter()
        .filter(|part| {
            matches!(
                part["type"].as_str(),
                Some("image_url") | Some("output_image") | Some("image")
            )
        })
        .find_map(url_of)
}

fn data_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/]+=*").expect("valid data url regex")
    })
}

fn http_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s"'<>()\[\]]+?\.(?:png|jpe?g|gif|webp)(?:\?[^\s"'<>()\[\]]*)?"#)
            .expect("valid image url regex")
    })
}

/// Last resort: a data URL, then an http(s) image URL, anywhere in the text.
pub fn from_text_scan(message: &Value) -> Option<String> {
    let text = match message {
        Value::String(text) => text.clone(),
        _ => match &message["content"] {
            Value::String(text) => text.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return None,
        },
    };

    data_url_regex()
        .find(&text)
        .or_else(|| http_image_regex().find(&text))
        .map(|m| m.as_str().to_string())
}
