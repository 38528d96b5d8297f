//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Outbound requests sign `(request-target) host date digest` with
//! rsa-sha256. Verification reports failures as plain problem strings;
//! deciding what a problem means is up to the caller.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AppError;

/// Problem reported when the signature does not match the key
pub const SIGNATURE_MISMATCH: &str = "Signature verification failed";

/// Allowed distance between the Date header and our clock
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 300;

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value
    pub digest: String,
    /// Host header value the signature covers
    pub host: String,
}

/// Sign an outbound POST
///
/// # Arguments
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PKCS#8 PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
/// * `now` - Time written to the Date header
///
/// # Errors
/// Fails on an unparseable URL or private key; both are local faults.
pub fn sign_request(
    url: &str,
    body: &[u8],
    private_key_pem: &str,
    key_id: &str,
    now: DateTime<Utc>,
) -> Result<SignatureHeaders, AppError> {
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(AppError::Validation("Missing host in URL".to_string())),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    let date = format_http_date(now);
    let digest = generate_digest(body);

    let signing_string = [
        format!("(request-target): post {}", path_and_query),
        format!("host: {}", host),
        format!("date: {}", date),
        format!("digest: {}", digest),
    ]
    .join("\n");

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid private key: {}", e)))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date digest\",signature=\"{}\"",
        key_id, signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
        host,
    })
}

/// RFC 7231 date, as used in the Date header
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Verify an inbound request signature
///
/// # Arguments
/// * `method` - HTTP method
/// * `path_and_query` - Request target as received
/// * `headers` - All request headers
/// * `body` - Request body (digest must be signed and match)
/// * `public_key_pem` - Signer's RSA public key
/// * `now` - Reference time for the Date check
///
/// # Errors
/// Returns a description of the first problem found.
pub fn verify_signature(
    method: &str,
    path_and_query: &str,
    headers: &http::HeaderMap,
    body: &[u8],
    public_key_pem: &str,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let signature_header = header_value(headers, "signature")?;
    let parsed = parse_signature_header(signature_header)?;

    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        ));
    }

    for required in ["(request-target)", "host", "date", "digest"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(format!("Signed headers must include: {}", required));
        }
    }

    let date = DateTime::parse_from_rfc2822(header_value(headers, "date")?)
        .map_err(|_| "Invalid Date format".to_string())?;
    if (now.timestamp() - date.timestamp()).abs() > MAX_CLOCK_SKEW_SECONDS {
        return Err("Date header too old or in future".to_string());
    }

    let expected_digest = generate_digest(body);
    let received_digest = header_value(headers, "digest")?;
    if !bool::from(expected_digest.as_bytes().ct_eq(received_digest.as_bytes())) {
        return Err("Digest mismatch".to_string());
    }

    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path_and_query),
            name => header_value(headers, name)?.to_string(),
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }
    let signing_string = signing_parts.join("\n");

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| "Invalid signature encoding".to_string())?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| format!("Invalid public key: {}", e))?;
    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| format!("Invalid signature format: {}", e))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| SIGNATURE_MISMATCH.to_string())
}

fn header_value<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, String> {
    headers
        .get(name)
        .ok_or_else(|| format!("Missing {} header", name))?
        .to_str()
        .map_err(|_| format!("Invalid {} header", name))
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, String> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');

            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or("Missing keyId")?,
        // Absent algorithm means hs2019 per the draft
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature.ok_or("Missing signature")?,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn key_pair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        (
            private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            public_key.to_public_key_pem(LineEnding::LF).unwrap(),
        )
    }

    fn signed_headers(signed: &SignatureHeaders) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(&signed.host).unwrap());
        headers.insert("date", HeaderValue::from_str(&signed.date).unwrap());
        headers.insert("digest", HeaderValue::from_str(&signed.digest).unwrap());
        headers.insert("signature", HeaderValue::from_str(&signed.signature).unwrap());
        headers
    }

    #[test]
    fn test_generate_digest() {
        let digest = generate_digest(b"hello world");
        assert_eq!(
            digest,
            "SHA-256=uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek="
        );
    }

    #[test]
    fn test_parse_signature_header() {
        let header = r#"keyId="https://example.com/users/test#main-key",algorithm="rsa-sha256",headers="(request-target) host date digest",signature="abc123""#;
        let parsed = parse_signature_header(header).unwrap();

        assert_eq!(parsed.key_id, "https://example.com/users/test#main-key");
        assert_eq!(parsed.algorithm, "rsa-sha256");
        assert_eq!(
            parsed.headers,
            vec!["(request-target)", "host", "date", "digest"]
        );
        assert_eq!(parsed.signature, "abc123");
    }

    #[test]
    fn test_parse_signature_header_requires_key_id() {
        assert!(parse_signature_header(r#"signature="abc""#).is_err());
    }

    #[test]
    fn test_sign_then_verify() {
        let (private_pem, public_pem) = key_pair();
        let now = Utc::now();
        let body = br#"{"type":"Follow"}"#;

        let signed = sign_request(
            "https://parrot.example:8443/u/blog/inbox",
            body,
            &private_pem,
            "https://remote.example/users/alice#main-key",
            now,
        )
        .unwrap();
        assert_eq!(signed.host, "parrot.example:8443");

        let headers = signed_headers(&signed);
        assert!(
            verify_signature("POST", "/u/blog/inbox", &headers, body, &public_pem, now).is_ok()
        );
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let (private_pem, public_pem) = key_pair();
        let now = Utc::now();
        let signed = sign_request(
            "https://parrot.example/inbox",
            b"original",
            &private_pem,
            "https://remote.example/users/alice#main-key",
            now,
        )
        .unwrap();

        let problem = verify_signature(
            "POST",
            "/inbox",
            &signed_headers(&signed),
            b"tampered",
            &public_pem,
            now,
        )
        .unwrap_err();
        assert_eq!(problem, "Digest mismatch");
    }

    #[test]
    fn test_verify_rejects_clock_skew() {
        let (private_pem, public_pem) = key_pair();
        let signed_at = Utc::now();
        let signed = sign_request(
            "https://parrot.example/inbox",
            b"{}",
            &private_pem,
            "https://remote.example/users/alice#main-key",
            signed_at,
        )
        .unwrap();

        let later = signed_at + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECONDS + 5);
        let problem = verify_signature(
            "POST",
            "/inbox",
            &signed_headers(&signed),
            b"{}",
            &public_pem,
            later,
        )
        .unwrap_err();
        assert!(problem.contains("too old"));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let (private_pem, _) = key_pair();
        let (_, other_public_pem) = key_pair();
        let now = Utc::now();
        let signed = sign_request(
            "https://parrot.example/inbox",
            b"{}",
            &private_pem,
            "https://remote.example/users/alice#main-key",
            now,
        )
        .unwrap();

        let problem = verify_signature(
            "POST",
            "/inbox",
            &signed_headers(&signed),
            b"{}",
            &other_public_pem,
            now,
        )
        .unwrap_err();
        assert_eq!(problem, "Signature verification failed");
    }

    #[test]
    fn test_verify_requires_signed_digest() {
        let (private_pem, public_pem) = key_pair();
        let now = Utc::now();
        let signed = sign_request(
            "https://parrot.example/inbox",
            b"{}",
            &private_pem,
            "https://remote.example/users/alice#main-key",
            now,
        )
        .unwrap();

        let mut headers = signed_headers(&signed);
        let without_digest = signed
            .signature
            .replace("(request-target) host date digest", "(request-target) host date");
        headers.insert("signature", HeaderValue::from_str(&without_digest).unwrap());

        let problem =
            verify_signature("POST", "/inbox", &headers, b"{}", &public_pem, now).unwrap_err();
        assert!(problem.contains("digest"));
    }
}
