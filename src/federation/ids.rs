//! URL scheme for everything this instance publishes
//!
//! All actor, collection, status and activity URLs are minted here so the
//! layout stays in one place.

/// ActivityStreams public collection
pub const ACTIVITY_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

pub const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";

const MAX_HANDLE_LEN: usize = 64;

/// Builds absolute URLs below the public base URL
#[derive(Debug, Clone)]
pub struct IdBuilder {
    base_url: String,
    host: String,
}

impl IdBuilder {
    /// # Arguments
    /// * `base_url` - e.g. "https://parrot.example.com"
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let host = url::Url::parse(&base_url)
            .ok()
            .and_then(|u| {
                u.host_str().map(|h| match u.port() {
                    Some(port) => format!("{h}:{port}"),
                    None => h.to_string(),
                })
            })
            .unwrap_or_default();
        Self { base_url, host }
    }

    /// Host part used in `acct:` URIs
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn activity_url(&self, id: u64) -> String {
        format!("{}/activity/{}", self.base_url, id)
    }

    pub fn shared_inbox(&self) -> String {
        format!("{}/inbox", self.base_url)
    }

    /// Human-facing profile page
    pub fn user_profile(&self, handle: &str) -> String {
        format!("{}/web/feeds/{}", self.base_url, handle)
    }

    pub fn user_url(&self, handle: &str) -> String {
        format!("{}/u/{}", self.base_url, handle)
    }

    pub fn user_key_id(&self, handle: &str) -> String {
        format!("{}#main-key", self.user_url(handle))
    }

    pub fn user_inbox(&self, handle: &str) -> String {
        format!("{}/inbox", self.user_url(handle))
    }

    pub fn user_outbox(&self, handle: &str) -> String {
        format!("{}/outbox", self.user_url(handle))
    }

    pub fn user_followers(&self, handle: &str) -> String {
        format!("{}/followers", self.user_url(handle))
    }

    pub fn user_following(&self, handle: &str) -> String {
        format!("{}/following", self.user_url(handle))
    }

    pub fn user_status(&self, handle: &str, id: u64) -> String {
        format!("{}/status/{}", self.user_url(handle), id)
    }

    pub fn user_status_activity(&self, handle: &str, id: u64) -> String {
        format!("{}/activity", self.user_status(handle, id))
    }

    /// Recover the handle from one of our own actor URLs
    pub fn handle_from_user_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}/u/", self.base_url);
        let rest = url.strip_prefix(&prefix)?;
        let handle = rest.split(['/', '#', '?']).next()?;
        if is_valid_handle(handle) {
            Some(handle.to_string())
        } else {
            None
        }
    }
}

/// Derive a handle from a site URL: host plus path, lowercased, without a
/// leading `www.`, with every run of other characters collapsed to a dot.
///
/// `https://www.Example.com/blog/` becomes `example.com.blog`.
pub fn derive_handle(site_url: &str) -> Option<String> {
    let parsed = url::Url::parse(site_url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let raw = format!("{}{}", host, parsed.path()).to_ascii_lowercase();

    let mut handle = String::with_capacity(raw.len());
    let mut pending_dot = false;
    for c in raw.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dot && !handle.is_empty() {
                handle.push('.');
            }
            pending_dot = false;
            handle.push(c);
        } else {
            pending_dot = true;
        }
    }

    if is_valid_handle(&handle) {
        Some(handle)
    } else {
        None
    }
}

/// 1-64 chars of `[a-z0-9._-]`, starting and ending alphanumeric
pub fn is_valid_handle(handle: &str) -> bool {
    let bytes = handle.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_HANDLE_LEN {
        return false;
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| alnum(b) || b == b'.' || b == b'_' || b == b'-')
}
