//! Shared-access-signature generation for blob URLs.
//!
//! Two credentials sign the same descriptor: an account key (service SAS) or
//! a user-delegation key obtained from the backend (user-delegation SAS).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use unistore_common::{Error, Result};

use super::client::UserDelegationKey;

/// Service version signed into every SAS.
pub const SAS_VERSION: &str = "2022-11-02";

/// Decoded storage account key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccountKey {
    key: Vec<u8>,
}

impl AccountKey {
    pub fn from_bytes(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// Decode the base64 form found in connection strings.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid account key: {}", e)))?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Base64 HMAC-SHA256 of `message`.
    pub fn sign(&self, message: &str) -> Result<String> {
        hmac_sha256_base64(&self.key, message)
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey([REDACTED])")
    }
}

pub fn hmac_sha256_base64(key: &[u8], message: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| Error::InvalidInput(format!("Invalid signing key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Timestamp format used in SAS fields.
pub fn sas_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// What a blob SAS grants.
#[derive(Debug, Clone)]
pub struct BlobSasRequest<'a> {
    pub account: &'a str,
    pub container: &'a str,
    /// Blob name inside the container, not URL-encoded.
    pub blob: &'a str,
    pub permissions: &'a str,
    pub start: Option<DateTime<Utc>>,
    pub expiry: DateTime<Utc>,
    /// Response `Content-Type` override.
    pub content_type: Option<&'a str>,
}

/// Key material a SAS is signed with.
#[derive(Debug, Clone, Copy)]
pub enum SasCredential<'a> {
    SharedKey(&'a AccountKey),
    UserDelegation(&'a UserDelegationKey),
}

impl BlobSasRequest<'_> {
    fn canonical_resource(&self) -> String {
        format!("/blob/{}/{}/{}", self.account, self.container, self.blob)
    }

    /// The exact string the signature covers.
    pub fn string_to_sign(&self, credential: SasCredential<'_>) -> String {
        let start = self.start.map(sas_time).unwrap_or_default();
        let expiry = sas_time(self.expiry);
        let content_type = self.content_type.unwrap_or_default();

        let mut fields: Vec<String> = vec![
            self.permissions.to_string(),
            start,
            expiry,
            self.canonical_resource(),
        ];

        match credential {
            SasCredential::SharedKey(_) => {
                // signed identifier
                fields.push(String::new());
            }
            SasCredential::UserDelegation(key) => {
                fields.extend([
                    key.signed_oid.clone(),
                    key.signed_tid.clone(),
                    sas_time(key.signed_start),
                    sas_time(key.signed_expiry),
                    key.signed_service.clone(),
                    key.signed_version.clone(),
                    // authorized oid, unauthorized oid, correlation id
                    String::new(),
                    String::new(),
                    String::new(),
                ]);
            }
        }

        fields.extend([
            // ip, protocol
            String::new(),
            String::new(),
            SAS_VERSION.to_string(),
            "b".to_string(),
            // snapshot time, encryption scope
            String::new(),
            String::new(),
            // cache-control, disposition, encoding, language
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            content_type.to_string(),
        ]);

        fields.join("\n")
    }

    /// Append SAS query parameters for this request to `url`.
    pub fn sign_url(&self, mut url: Url, credential: SasCredential<'_>) -> Result<Url> {
        let signature = match credential {
            SasCredential::SharedKey(key) => key.sign(&self.string_to_sign(credential))?,
            SasCredential::UserDelegation(key) => {
                let secret = STANDARD.decode(&key.value).map_err(|e| {
                    Error::Authentication(format!("Invalid user delegation key: {}", e))
                })?;
                hmac_sha256_base64(&secret, &self.string_to_sign(credential))?
            }
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sv", SAS_VERSION);
            if let Some(start) = self.start {
                query.append_pair("st", &sas_time(start));
            }
            query.append_pair("se", &sas_time(self.expiry));
            query.append_pair("sr", "b");
            query.append_pair("sp", self.permissions);
            if let SasCredential::UserDelegation(key) = credential {
                query.append_pair("skoid", &key.signed_oid);
                query.append_pair("sktid", &key.signed_tid);
                query.append_pair("skt", &sas_time(key.signed_start));
                query.append_pair("ske", &sas_time(key.signed_expiry));
                query.append_pair("sks", &key.signed_service);
                query.append_pair("skv", &key.signed_version);
            }
            if let Some(content_type) = self.content_type {
                query.append_pair("rsct", content_type);
            }
            query.append_pair("sig", &signature);
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn request(expiry: DateTime<Utc>) -> BlobSasRequest<'static> {
        BlobSasRequest {
            account: "acct",
            container: "docs",
            blob: "reports/q1.pdf",
            permissions: "r",
            start: None,
            expiry,
            content_type: Some("application/pdf"),
        }
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let signature = hmac_sha256_base64(b"Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(signature, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn test_shared_key_string_to_sign_layout() {
        let expiry = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let key = AccountKey::from_bytes(b"secret".to_vec());
        let text = request(expiry).string_to_sign(SasCredential::SharedKey(&key));
        let lines: Vec<&str> = text.split('\n').collect();

        assert_eq!(lines.len(), 16);
        assert_eq!(lines[0], "r");
        assert_eq!(lines[2], "2030-01-02T03:04:05Z");
        assert_eq!(lines[3], "/blob/acct/docs/reports/q1.pdf");
        assert_eq!(lines[7], SAS_VERSION);
        assert_eq!(lines[8], "b");
        assert_eq!(lines[15], "application/pdf");
    }

    #[test]
    fn test_shared_key_url_parameters() {
        let expiry = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let key = AccountKey::from_bytes(b"secret".to_vec());
        let base = Url::parse("https://acct.blob.core.windows.net/docs/reports/q1.pdf").unwrap();

        let url = request(expiry)
            .sign_url(base, SasCredential::SharedKey(&key))
            .unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["sv"], SAS_VERSION);
        assert_eq!(params["sr"], "b");
        assert_eq!(params["sp"], "r");
        assert_eq!(params["se"], "2030-01-02T03:04:05Z");
        assert_eq!(params["rsct"], "application/pdf");
        let expected = key
            .sign(&request(expiry).string_to_sign(SasCredential::SharedKey(&key)))
            .unwrap();
        assert_eq!(params["sig"], expected);
        assert!(!params.contains_key("skoid"));
    }

    #[test]
    fn test_user_delegation_url_parameters() {
        let expiry = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let key = UserDelegationKey {
            signed_oid: "oid".to_string(),
            signed_tid: "tid".to_string(),
            signed_start: expiry - chrono::Duration::days(1),
            signed_expiry: expiry,
            signed_service: "b".to_string(),
            signed_version: SAS_VERSION.to_string(),
            value: STANDARD.encode(b"delegated"),
        };
        let base = Url::parse("https://acct.blob.core.windows.net/docs/reports/q1.pdf").unwrap();

        let url = request(expiry)
            .sign_url(base, SasCredential::UserDelegation(&key))
            .unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["skoid"], "oid");
        assert_eq!(params["sktid"], "tid");
        assert_eq!(params["ske"], "2030-01-02T03:04:05Z");
        assert!(params.contains_key("sig"));

        let text = request(expiry).string_to_sign(SasCredential::UserDelegation(&key));
        assert_eq!(text.split('\n').count(), 24);
    }

    #[test]
    fn test_invalid_account_key() {
        assert!(AccountKey::from_base64("not base64!").is_err());
        let key = AccountKey::from_base64(&STANDARD.encode(b"abc")).unwrap();
        assert_eq!(key.as_bytes(), b"abc");
        assert_eq!(format!("{:?}", key), "AccountKey([REDACTED])");
    }
}
