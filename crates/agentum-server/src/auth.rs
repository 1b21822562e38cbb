use crate::error::{ApiError, ApiResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SECRET_FILE: &str = "auth_secret";
const SECRET_BYTES: usize = 32;
const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Issues and validates HS256 bearer tokens.
///
/// The signing secret lives in `<config_dir>/auth_secret` and is generated
/// (256-bit random, hex, mode 0600) on first run. No refresh flow, no
/// revocation list.
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl AuthService {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::hours(TOKEN_TTL_HOURS),
        }
    }

    pub fn load_or_generate(config_dir: &Path) -> std::io::Result<Self> {
        let path = config_dir.join(SECRET_FILE);
        let secret = if path.exists() {
            let hex_str = std::fs::read_to_string(&path)?;
            hex::decode(hex_str.trim()).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Corrupt auth secret at {}: {}", path.display(), e),
                )
            })?
        } else {
            std::fs::create_dir_all(config_dir)?;
            let mut secret = vec![0u8; SECRET_BYTES];
            rand::Rng::fill(&mut rand::thread_rng(), secret.as_mut_slice());
            write_restricted(&path, &hex::encode(&secret))?;
            tracing::info!(path = %path.display(), "Generated new auth secret");
            secret
        };
        Ok(Self::new(&secret))
    }

    /// Issue an access token; returns the token and its expiry instant.
    pub fn issue(&self, user_id: &str) -> ApiResult<(String, i64)> {
        let now = Utc::now();
        let exp = (now + self.ttl).timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp,
            token_type: "access".to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("Token signing failed: {}", e)))?;
        Ok((token, exp))
    }

    /// Validate a token and return the subject user id.
    pub fn verify(&self, token: &str) -> ApiResult<String> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| ApiError::Auth(format!("Invalid token: {}", e)))?;
        if data.claims.token_type != "access" {
            return Err(ApiError::Auth("Wrong token type".to_string()));
        }
        Ok(data.claims.sub)
    }
}

#[cfg(unix)]
fn write_restricted(path: &Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content.as_bytes())
}

#[cfg(not(unix))]
fn write_restricted(path: &Path, content: &str) -> std::io::Result<()> {
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_round_trip() {
        let auth = AuthService::new(b"test-secret-test-secret-test-sec");
        let (token, exp) = auth.issue("user-1").unwrap();
        assert!(exp > Utc::now().timestamp());

        let subject = auth.verify(&token).unwrap();
        assert_eq!(subject, "user-1");
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let auth = AuthService::new(b"test-secret-test-secret-test-sec");
        assert!(auth.verify("not-a-token").is_err());
        assert!(auth.verify("").is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let issuer = AuthService::new(b"secret-a-secret-a-secret-a-secre");
        let verifier = AuthService::new(b"secret-b-secret-b-secret-b-secre");
        let (token, _) = issuer.issue("user-1").unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_expired() {
        let mut auth = AuthService::new(b"test-secret-test-secret-test-sec");
        auth.ttl = Duration::seconds(-120);
        let (token, _) = auth.issue("user-1").unwrap();
        let err = auth.verify(&token).unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let first = AuthService::load_or_generate(tmp.path()).unwrap();
        let (token, _) = first.issue("user-1").unwrap();

        // Second load reads the same secret, so the token still verifies
        let second = AuthService::load_or_generate(tmp.path()).unwrap();
        assert_eq!(second.verify(&token).unwrap(), "user-1");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(tmp.path().join("auth_secret"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
