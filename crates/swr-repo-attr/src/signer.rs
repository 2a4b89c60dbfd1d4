//! APIG `SDK-HMAC-SHA256` request signing
//!
//! The signature covers a canonical form of the request: method, encoded
//! path, sorted query, the signed headers and a digest of the body.

use std::collections::BTreeMap;
use std::fmt;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Result, SwrError};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";

/// Header carrying the signing time
pub const HEADER_DATE: &str = "X-Sdk-Date";

/// `X-Sdk-Date` layout, always UTC
pub const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Everything about a request that goes into its signature
#[derive(Debug, Clone, Default)]
pub struct SignableRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Lowercased names, trimmed values
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl SignableRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.trim().to_string());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn query_string(&self) -> String {
        canonical_query(&self.query)
    }
}

/// Percent-encode every path segment, keeping the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_uri(path: &str) -> String {
    let mut uri = encode_path(path);
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    pairs.sort();
    pairs.join("&")
}

fn signed_headers(headers: &BTreeMap<String, String>) -> String {
    headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
}

pub fn canonical_request(request: &SignableRequest) -> String {
    let headers: String = request
        .headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri(&request.path),
        canonical_query(&request.query),
        headers,
        signed_headers(&request.headers),
        hex::encode(Sha256::digest(&request.body))
    )
}

pub fn string_to_sign(canonical_request: &str, sdk_date: &str) -> String {
    format!(
        "{}\n{}\n{}",
        ALGORITHM,
        sdk_date,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

/// Access/secret key pair
#[derive(Clone)]
pub struct Signer {
    ak: String,
    sk: String,
}

impl Signer {
    pub fn new(ak: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            ak: ak.into(),
            sk: sk.into(),
        }
    }

    pub fn signature(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.sk.as_bytes())
            .map_err(|e| SwrError::Signing(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// `Authorization` header value. `request` must already carry the
    /// `x-sdk-date` header with `sdk_date`.
    pub fn authorization(&self, request: &SignableRequest, sdk_date: &str) -> Result<String> {
        let canonical = canonical_request(request);
        let signature = self.signature(&string_to_sign(&canonical, sdk_date))?;
        Ok(format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.ak,
            signed_headers(&request.headers),
            signature
        ))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("ak", &self.ak)
            .field("sk", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATE: &str = "20250101T000000Z";

    fn list_request() -> SignableRequest {
        SignableRequest::new("get", "/v2/manage/repos")
            .query("filter", "namespace::team|limit::5")
            .header("Content-Type", "application/json")
            .header("Host", "swr-api.cn-north-4.myhuaweicloud.com")
            .header(HEADER_DATE, DATE)
    }

    #[test]
    fn test_canonical_request_layout() {
        let canonical = canonical_request(&list_request());
        assert_eq!(
            canonical,
            "GET\n\
             /v2/manage/repos/\n\
             filter=namespace%3A%3Ateam%7Climit%3A%3A5\n\
             content-type:application/json\n\
             host:swr-api.cn-north-4.myhuaweicloud.com\n\
             x-sdk-date:20250101T000000Z\n\
             \n\
             content-type;host;x-sdk-date\n\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_string_to_sign() {
        let canonical = canonical_request(&list_request());
        assert_eq!(
            string_to_sign(&canonical, DATE),
            "SDK-HMAC-SHA256\n20250101T000000Z\ne3527f9a7a9c0549da301fec75edebc4f2704d1da8c327f7443ddff664bc335a"
        );
    }

    #[test]
    fn test_authorization_known_answer() {
        let auth = Signer::new("AK", "SK").authorization(&list_request(), DATE).unwrap();
        assert_eq!(
            auth,
            "SDK-HMAC-SHA256 Access=AK, SignedHeaders=content-type;host;x-sdk-date, \
             Signature=a1156cc5d653ddc0f7389252188c99e6517788660cf4f0d7a43d9cff1ae19688"
        );
    }

    #[test]
    fn test_patch_with_body_and_project() {
        let request = SignableRequest::new("PATCH", "/v2/manage/namespaces/team/repos/base$cuda")
            .header("content-type", "application/json")
            .header("host", "127.0.0.1:8080")
            .header("x-sdk-date", DATE)
            .header("X-Project-Id", "p1")
            .body(br#"{"is_public":true}"#.to_vec());

        let canonical = canonical_request(&request);
        assert!(canonical.starts_with("PATCH\n/v2/manage/namespaces/team/repos/base%24cuda/\n\n"));
        assert!(canonical.contains("\ncontent-type;host;x-project-id;x-sdk-date\n"));

        let auth = Signer::new("AK", "secret").authorization(&request, DATE).unwrap();
        assert!(auth.ends_with("Signature=4c866c14a616e1b8be36d3f5a689d4937545ab446f240a59132b273b34f0d4ee"));
    }

    #[test]
    fn test_query_sorted_and_encoded() {
        let request = SignableRequest::new("GET", "/")
            .query("b", "2 3")
            .query("a", "x/y");
        assert_eq!(request.query_string(), "a=x%2Fy&b=2%203");
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let request = list_request();
        let a = Signer::new("AK", "one").authorization(&request, DATE).unwrap();
        let b = Signer::new("AK", "two").authorization(&request, DATE).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, Signer::new("AK", "one").authorization(&request, DATE).unwrap());
    }

    #[test]
    fn test_empty_secret_still_signs() {
        let signature = Signer::new("AK", "").signature("payload").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", Signer::new("AK", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
