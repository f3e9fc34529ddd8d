//! Request signing
//!
//! Implements the HMAC-SHA1 header authentication scheme understood by
//! S3-compatible stores:
//!
//! ```text
//! StringToSign  = METHOD \n Content-MD5 \n Content-Type \n Date \n /bucket/key
//! Authorization = "AWS " AccessKeyId ":" Base64(HMAC-SHA1(SecretKey, StringToSign))
//! ```

use super::credentials::Credentials;
use super::url::encode_key;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Fields that enter the signature of one request
#[derive(Debug, Clone, Copy)]
pub struct StringToSign<'a> {
    pub method: &'a str,
    /// Base64 MD5 of the body, empty for requests without one
    pub content_md5: &'a str,
    pub content_type: &'a str,
    /// Value of the `Date` header
    pub date: &'a str,
    pub bucket: &'a str,
    pub object_key: &'a str,
}

impl StringToSign<'_> {
    /// Canonical form fed into the HMAC
    pub fn canonical(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n/{}/{}",
            self.method,
            self.content_md5,
            self.content_type,
            self.date,
            self.bucket,
            encode_key(self.object_key)
        )
    }
}

/// Compute the `Authorization` header value for a request.
pub fn sign(credentials: &Credentials, request: &StringToSign<'_>) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha1::new_from_slice(credentials.secret_access_key().as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(request.canonical().as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    format!("AWS {}:{}", credentials.access_key_id(), signature)
}

/// Base64-encoded MD5 digest, the value of a `Content-MD5` header
pub fn content_md5(data: &[u8]) -> String {
    BASE64.encode(Md5::digest(data))
}

/// RFC 1123 timestamp for the `Date` header
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
