//! Trusted-directory client used to discover pairing candidates.
//!
//! An identity URI has the form `{encr_txid}:{encr_vout};{sign_txid}:{sign_vout}`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use keychat_shared::constants::{DIRECTORY_OK, DIRECTORY_PROFILE_EXISTS};

use crate::error::DirectoryError;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Every identity URI published under the configured domain.
    async fn candidate_uris(&self) -> Result<Vec<String>, DirectoryError>;

    /// Publish one of our identity URIs.
    async fn upload_uri(&self, uri: &str) -> Result<(), DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct UriListResponse {
    response_code: String,
    #[serde(default)]
    results: Vec<UriEntry>,
}

#[derive(Debug, Deserialize)]
struct UriEntry {
    encr_txid: String,
    encr_vout: u32,
    sign_txid: String,
    sign_vout: u32,
}

impl UriEntry {
    fn to_uri(&self) -> String {
        format!(
            "{}:{};{}:{}",
            self.encr_txid, self.encr_vout, self.sign_txid, self.sign_vout
        )
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    response_code: String,
}

/// The four path segments of an identity URI.
fn split_uri(uri: &str) -> Result<(&str, u32, &str, u32), DirectoryError> {
    let invalid = || DirectoryError::InvalidUri(uri.to_string());
    let (encr, sign) = uri.split_once(';').ok_or_else(invalid)?;
    let (encr_txid, encr_vout) = encr.split_once(':').ok_or_else(invalid)?;
    let (sign_txid, sign_vout) = sign.split_once(':').ok_or_else(invalid)?;
    if encr_txid.is_empty() || sign_txid.is_empty() {
        return Err(invalid());
    }
    let encr_vout = encr_vout.parse().map_err(|_| invalid())?;
    let sign_vout = sign_vout.parse().map_err(|_| invalid())?;
    Ok((encr_txid, encr_vout, sign_txid, sign_vout))
}

pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
    domain: String,
}

impl HttpDirectory {
    pub fn new(host: &str, port: u16, domain: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}/adsimulator/"),
            domain: domain.to_string(),
        }
    }

    fn list_url(&self) -> String {
        format!("{}getalluri/{}", self.base_url, self.domain)
    }

    fn upload_url(&self, uri: &str) -> Result<String, DirectoryError> {
        let (encr_txid, encr_vout, sign_txid, sign_vout) = split_uri(uri)?;
        Ok(format!(
            "{}uploaduri/{}/{}/{}/{}/{}",
            self.base_url, self.domain, encr_txid, encr_vout, sign_txid, sign_vout
        ))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn candidate_uris(&self) -> Result<Vec<String>, DirectoryError> {
        let url = self.list_url();
        debug!(url = %url, "Looking up directory identities");

        let response: UriListResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.response_code != DIRECTORY_OK {
            warn!(domain = %self.domain, code = %response.response_code, "Directory lookup failed");
            return Err(DirectoryError::Rejected(response.response_code));
        }

        let uris: Vec<String> = response.results.iter().map(UriEntry::to_uri).collect();
        debug!(count = uris.len(), "Directory returned identities");
        Ok(uris)
    }

    async fn upload_uri(&self, uri: &str) -> Result<(), DirectoryError> {
        let url = self.upload_url(uri)?;
        debug!(url = %url, "Uploading identity to directory");

        let response: UploadResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.response_code.as_str() {
            DIRECTORY_OK => {
                info!(uri = %uri, "Identity uploaded to directory");
                Ok(())
            }
            DIRECTORY_PROFILE_EXISTS => {
                debug!(uri = %uri, "Identity already in directory");
                Ok(())
            }
            other => Err(DirectoryError::Rejected(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_maps_to_uris() {
        let body = r#"{"response_code":"OK","results":[
            {"encr_txid":"aa","encr_vout":0,"sign_txid":"bb","sign_vout":1}
        ]}"#;
        let response: UriListResponse = serde_json::from_str(body).unwrap();
        let uris: Vec<String> = response.results.iter().map(UriEntry::to_uri).collect();
        assert_eq!(uris, vec!["aa:0;bb:1"]);
    }

    #[test]
    fn test_upload_url() {
        let directory = HttpDirectory::new("dir.local", 8080, "chat");
        assert_eq!(
            directory.list_url(),
            "http://dir.local:8080/adsimulator/getalluri/chat"
        );
        assert_eq!(
            directory.upload_url("aa:0;bb:1").unwrap(),
            "http://dir.local:8080/adsimulator/uploaduri/chat/aa/0/bb/1"
        );
    }

    #[test]
    fn test_malformed_uri_is_rejected() {
        for uri in ["", "aa:0", "aa:x;bb:1", ":0;bb:1", "aa;bb"] {
            assert!(
                matches!(split_uri(uri), Err(DirectoryError::InvalidUri(_))),
                "{uri} should be rejected"
            );
        }
    }
}
