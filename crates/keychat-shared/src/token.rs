use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A persona's shareable identity card, as rendered into a QR code or pasted
/// between users to start pairing without the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityToken {
    pub first_name: String,
    pub last_name: String,
    /// Confirmed identity URI of the persona.
    pub id: String,
}

impl IdentityToken {
    pub fn new(first_name: &str, last_name: &str, id: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            id: id.to_string(),
        }
    }

    /// Encode the token as a base64url string (copiable code).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64_url_encode(&json))
    }

    /// Parse either the raw JSON form (QR payload) or the base64url code.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let input = input.trim();
        let token: Self = if input.starts_with('{') {
            serde_json::from_str(input)?
        } else {
            serde_json::from_slice(&base64_url_decode(input)?)?
        };

        if token.id.trim().is_empty() {
            return Err(ProtocolError::MissingField("id"));
        }
        Ok(token)
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, ProtocolError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    Ok(URL_SAFE_NO_PAD.decode(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_code_roundtrip() {
        let token = IdentityToken::new("Bob", "Builder", "B-uri");
        let code = token.encode().unwrap();
        assert_eq!(IdentityToken::parse(&code).unwrap(), token);
    }

    #[test]
    fn test_token_accepts_qr_json() {
        let token =
            IdentityToken::parse(r#" {"firstName":"Bob","lastName":"Builder","id":"B-uri"} "#)
                .unwrap();
        assert_eq!(token.id, "B-uri");
        assert_eq!(token.first_name, "Bob");
    }

    #[test]
    fn test_token_without_id_rejected() {
        assert!(IdentityToken::parse(r#"{"firstName":"Bob","lastName":"B","id":" "}"#).is_err());
        assert!(IdentityToken::parse("%%%").is_err());
    }
}
