//! WebFinger documents for local accounts

use serde::{Deserialize, Serialize};

use super::ids::IdBuilder;
use crate::error::AppError;

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Generate the WebFinger response for a local handle
pub fn generate_webfinger_response(ids: &IdBuilder, handle: &str) -> WebFingerResponse {
    let profile = ids.user_profile(handle);
    let actor_url = ids.user_url(handle);

    WebFingerResponse {
        subject: format!("acct:{}@{}", handle, ids.host()),
        aliases: vec![profile.clone(), actor_url.clone()],
        links: vec![
            WebFingerLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(profile),
            },
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some("application/activity+json".to_string()),
                href: Some(actor_url),
            },
        ],
    }
}

/// Split `acct:user@host` (the `acct:` prefix and a leading `@` are
/// optional) into a lowercase user and host
///
/// # Errors
/// `Validation` if the resource is not an account address
pub fn parse_acct_resource(resource: &str) -> Result<(String, String), AppError> {
    let acct = resource.strip_prefix("acct:").unwrap_or(resource);
    let acct = acct.strip_prefix('@').unwrap_or(acct);

    let Some((user, host)) = acct.split_once('@') else {
        return Err(AppError::Validation("Invalid acct format".to_string()));
    };
    if user.is_empty() || host.is_empty() || host.contains('@') {
        return Err(AppError::Validation("Invalid acct format".to_string()));
    }

    Ok((user.to_lowercase(), host.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_points_at_actor() {
        let ids = IdBuilder::new("https://parrot.example");
        let response = generate_webfinger_response(&ids, "blog.example");

        assert_eq!(response.subject, "acct:blog.example@parrot.example");
        let self_link = response.links.iter().find(|l| l.rel == "self").unwrap();
        assert_eq!(
            self_link.href.as_deref(),
            Some("https://parrot.example/u/blog.example")
        );
        assert_eq!(
            self_link.link_type.as_deref(),
            Some("application/activity+json")
        );
    }

    #[test]
    fn test_parse_acct_resource() {
        assert_eq!(
            parse_acct_resource("acct:Birb@Parrot.Example").unwrap(),
            ("birb".to_string(), "parrot.example".to_string())
        );
        assert_eq!(
            parse_acct_resource("@birb@parrot.example").unwrap(),
            ("birb".to_string(), "parrot.example".to_string())
        );
        assert!(parse_acct_resource("acct:birb").is_err());
        assert!(parse_acct_resource("acct:@parrot.example").is_err());
        assert!(parse_acct_resource("acct:a@b@c").is_err());
    }
}
