//! Certificate request signing
//!
//! An APIC app authenticates each request with cookies carrying an RSA
//! signature over `method + path + body`, made with the app's private key.

use base64::{engine::general_purpose::STANDARD, Engine};
use portgroup_common::{Error, Result};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::path::Path;
use tracing::debug;

pub const CERT_ALGORITHM: &str = "v1.0";
pub const CERT_FINGERPRINT: &str = "fingerprint";

pub struct CertSigner {
    key: SigningKey<Sha256>,
    cert_dn: String,
}

impl std::fmt::Debug for CertSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertSigner")
            .field("cert_dn", &self.cert_dn)
            .finish_non_exhaustive()
    }
}

impl CertSigner {
    /// Parse a PKCS#8 or PKCS#1 PEM private key for `cert_user`.
    pub fn from_pem(pem: &str, cert_user: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::Crypto(format!("Invalid RSA private key: {e}")))?;

        Ok(Self {
            key: SigningKey::<Sha256>::new(key),
            cert_dn: cert_dn(cert_user),
        })
    }

    pub fn load(path: &Path, cert_user: &str) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::Crypto(format!("Cannot read private key {}: {}", path.display(), e))
        })?;
        let signer = Self::from_pem(&pem, cert_user)?;
        debug!(key = %path.display(), dn = %signer.cert_dn, "Loaded app signing key");
        Ok(signer)
    }

    pub fn cert_dn(&self) -> &str {
        &self.cert_dn
    }

    /// Base64 signature of one request
    pub fn sign(&self, method: &str, path: &str, body: &str) -> String {
        let payload = format!("{method}{path}{body}");
        let signature = self.key.sign(payload.as_bytes());
        STANDARD.encode(signature.to_bytes())
    }

    /// `Cookie` header value authenticating one request
    pub fn cookie(&self, method: &str, path: &str, body: &str) -> String {
        format!(
            "APIC-Request-Signature={}; APIC-Certificate-Algorithm={}; APIC-Certificate-Fingerprint={}; APIC-Certificate-DN={}",
            self.sign(method, path, body),
            CERT_ALGORITHM,
            CERT_FINGERPRINT,
            self.cert_dn
        )
    }
}

/// DN of the app user's certificate
pub fn cert_dn(cert_user: &str) -> String {
    format!("uni/userext/appuser-{cert_user}/usercert-{cert_user}")
}

#[cfg(test)]
pub(crate) mod testing {
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::RsaPrivateKey;

    pub fn generate_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    pub fn pkcs8_pem(key: &RsaPrivateKey) -> String {
        key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{generate_key, pkcs8_pem};
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    #[test]
    fn test_signature_verifies_over_method_path_body() {
        let key = generate_key();
        let signer = CertSigner::from_pem(&pkcs8_pem(&key), "Cisco_App").unwrap();

        let encoded = signer.sign("GET", "/api/class/fvTenant.json", "");
        let raw = STANDARD.decode(encoded).unwrap();
        let signature = Signature::try_from(raw.as_slice()).unwrap();

        let verifier = VerifyingKey::<Sha256>::new(key.to_public_key());
        assert!(verifier
            .verify(b"GET/api/class/fvTenant.json", &signature)
            .is_ok());
        assert!(verifier
            .verify(b"POST/api/class/fvTenant.json", &signature)
            .is_err());
    }

    #[test]
    fn test_pkcs1_pem_accepted() {
        let key = generate_key();
        let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        assert!(CertSigner::from_pem(&pem, "Cisco_App").is_ok());
    }

    #[test]
    fn test_cookie_layout() {
        let signer = CertSigner::from_pem(&pkcs8_pem(&generate_key()), "Cisco_App").unwrap();
        let cookie = signer.cookie("GET", "/api/class/fvTenant.json", "");

        assert!(cookie.starts_with("APIC-Request-Signature="));
        assert!(cookie.contains("; APIC-Certificate-Algorithm=v1.0"));
        assert!(cookie.contains("; APIC-Certificate-Fingerprint=fingerprint"));
        assert!(cookie.ends_with("; APIC-Certificate-DN=uni/userext/appuser-Cisco_App/usercert-Cisco_App"));
    }

    #[test]
    fn test_bad_key_is_crypto_error() {
        let err = CertSigner::from_pem("not a key", "Cisco_App").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));

        let err = CertSigner::load(Path::new("/nonexistent/plugin.key"), "Cisco_App").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }
}
