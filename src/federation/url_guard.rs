//! Outbound destination checks
//!
//! Every URL we fetch on behalf of someone else (actor documents named in
//! signatures, feed links from mentions) goes through here first so remote
//! users cannot point us at loopback or internal services.

use std::net::IpAddr;

use crate::error::AppError;

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_disallowed_ip(IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host
        .trim_end_matches('.')
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Federation(format!("Failed to resolve host {}: {}", host, e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::Federation(format!("No DNS records for host {}", host)));
    }

    Ok(())
}

/// Parse and vet a URL before any network access
///
/// Drops the fragment, rejects non-HTTP(S) URLs and, unless
/// `allow_private` is set, obvious local/private hosts.
pub fn parse_outbound_url(url: &str, allow_private: bool) -> Result<url::Url, AppError> {
    let mut parsed =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", url, e)))?;
    parsed.set_fragment(None);

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation(format!("Missing host in URL {}", url)))?;

    if !allow_private && is_disallowed_host(host) {
        return Err(AppError::Forbidden);
    }

    Ok(parsed)
}

/// `parse_outbound_url` plus a DNS check of where the host really points
///
/// # Errors
/// - `Validation` for unusable URLs
/// - `Forbidden` for local/private destinations
/// - `Federation` if the host does not resolve
pub async fn check_outbound_url(url: &str, allow_private: bool) -> Result<url::Url, AppError> {
    let parsed = parse_outbound_url(url, allow_private)?;

    if !allow_private {
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::Validation(format!("Missing host in URL {}", url)))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| AppError::Validation(format!("Missing port in URL {}", url)))?;
        // Hosts that look public may still resolve internally
        validate_resolved_host_ips(host, port).await?;
    }

    Ok(parsed)
}

/// Redirect policy that refuses hops to hosts `parse_outbound_url` rejects
///
/// Only literal hosts are checked here; the policy runs synchronously.
pub fn redirect_policy(allow_private: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= 10 {
            attempt.error("too many redirects")
        } else if parse_outbound_url(attempt.url().as_str(), allow_private).is_err() {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}
