//! Text templates for post bodies, bios and replies
//!
//! Templates use `{{key}}` placeholders. Values are HTML-escaped on the
//! way in, so templates can be trusted HTML while values cannot.

use std::collections::HashMap;

use crate::error::AppError;

pub const TOOT_NEW_POST: &str = "toot_new_post.html";
pub const ACCT_BIO: &str = "acct_bio.html";
pub const REPLY_NEW_FEED: &str = "reply_new_feed.html";
pub const REPLY_ALREADY_FOLLOWED: &str = "reply_already_followed.html";
pub const REPLY_NATIVE: &str = "reply_native.html";
pub const REPLY_BANNED: &str = "reply_banned.html";
pub const REPLY_FAILED: &str = "reply_failed.html";
pub const REPLY_NO_LINK: &str = "reply_no_link.html";

pub trait Texts: Send + Sync {
    /// Fill template `name` with `values`
    ///
    /// # Errors
    /// Unknown template names are an internal error.
    fn render(&self, name: &str, values: &[(&str, &str)]) -> Result<String, AppError>;
}

/// Templates compiled into the binary
pub struct BuiltinTexts {
    templates: HashMap<&'static str, &'static str>,
}

impl Default for BuiltinTexts {
    fn default() -> Self {
        let templates = HashMap::from([
            (
                TOOT_NEW_POST,
                r#"<p>{{title}}<br><a href="{{url}}">{{prettyUrl}}</a></p><p>{{description}}</p>"#,
            ),
            (
                ACCT_BIO,
                "<p>{{description}}</p><p>This account repeats the posts of a feed. Nobody reads replies here.</p>",
            ),
            (
                REPLY_NEW_FEED,
                r#"<p>{{moniker}} Squawk! I am now repeating that feed as <a href="{{accountUrl}}">@{{account}}</a>. Follow it to get its posts.</p>"#,
            ),
            (
                REPLY_ALREADY_FOLLOWED,
                r#"<p>{{moniker}} That feed is already here as <a href="{{accountUrl}}">@{{account}}</a>.</p>"#,
            ),
            (
                REPLY_NATIVE,
                "<p>{{moniker}} That site already speaks ActivityPub. Follow it directly!</p>",
            ),
            (
                REPLY_BANNED,
                "<p>{{moniker}} Sorry, I do not repeat feeds from that site.</p>",
            ),
            (
                REPLY_FAILED,
                "<p>{{moniker}} I could not find a feed there. Try the address of the feed itself.</p>",
            ),
            (
                REPLY_NO_LINK,
                "<p>{{moniker}} Send me a link to a blog or a feed and I will make it followable.</p>",
            ),
        ]);
        Self { templates }
    }
}

impl Texts for BuiltinTexts {
    fn render(&self, name: &str, values: &[(&str, &str)]) -> Result<String, AppError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Unknown template: {name}")))?;
        Ok(fill(template, values))
    }
}

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let key = after[..end].trim();
        if let Some((_, value)) = values.iter().find(|(k, _)| *k == key) {
            out.push_str(&html_escape::encode_double_quoted_attribute(value));
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
