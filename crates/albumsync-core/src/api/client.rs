//! API client for communicating with the album backend.
//!
//! This module provides the `ApiClient` struct for reading challenge lists
//! and submitting multipart media uploads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiError, ChallengeSource, MediaUploader, UploadRequest};
use crate::models::{AlbumIdentity, Challenge, Credential};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upload timeout in seconds. Videos may be up to 50 MB.
const UPLOAD_TIMEOUT_SECS: u64 = 300;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the album backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credential: Option<Credential>,
}

impl ApiClient {
    /// Create a new API client for the given backend origin
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: None,
        })
    }

    /// Create a new ApiClient with the given credential, sharing the connection pool.
    pub fn with_credential(&self, credential: Option<Credential>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            credential,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("Bad base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest(format!("Base URL cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Read endpoint for an album: `GET /challenges?albumId=` for members,
    /// `GET /challenges/public/{token}` for share links.
    fn challenges_request(&self, album: &AlbumIdentity) -> Result<(Url, Vec<(&'static str, String)>), ApiError> {
        match album {
            AlbumIdentity::Authenticated(album_id) => Ok((
                self.endpoint(&["challenges"])?,
                vec![("albumId", album_id.clone())],
            )),
            AlbumIdentity::PublicToken(token) => {
                Ok((self.endpoint(&["challenges", "public", token])?, Vec::new()))
            }
        }
    }

    fn credential_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let invalid = |_: header::InvalidHeaderValue| ApiError::InvalidRequest("Credential contains invalid header characters".to_string());
        match self.credential {
            Some(Credential::Bearer(ref token)) => {
                headers.insert(
                    header::AUTHORIZATION,
                    header::HeaderValue::from_str(&format!("Bearer {}", token)).map_err(invalid)?,
                );
            }
            Some(Credential::Cookie(ref cookie)) => {
                headers.insert(header::COOKIE, header::HeaderValue::from_str(cookie).map_err(invalid)?);
            }
            None => debug!("No credential available for authenticated request"),
        }
        Ok(headers)
    }

    /// Text fields of the upload form, in submission order.
    fn upload_fields(request: &UploadRequest) -> Vec<(&'static str, String)> {
        vec![
            ("albumId", request.album.upload_album_field().to_string()),
            ("userId", request.user_id.clone()),
            ("challengeTitle", request.challenge_title.clone()),
            ("uploaderUsername", request.uploader_username.clone()),
        ]
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&'static str, String)],
        credentialed: bool,
    ) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self.client.get(url.clone()).query(query);
            if credentialed {
                request = request.headers(self.credential_headers()?);
            }
            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text)
                        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl ChallengeSource for ApiClient {
    async fn fetch_challenges(&self, album: &AlbumIdentity) -> Result<Vec<Challenge>, ApiError> {
        let (url, query) = self.challenges_request(album)?;
        let challenges: Vec<Challenge> = self.get(url, &query, album.is_authenticated()).await?;
        debug!(album = %album, count = challenges.len(), "Fetched challenges");
        Ok(challenges)
    }
}

#[async_trait]
impl MediaUploader for ApiClient {
    async fn upload_media(&self, request: UploadRequest) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "album-media", "upload-media"])?;

        let bytes = request.file.read_bytes().await?;
        let part = Part::bytes(bytes)
            .file_name(request.file.file_name.clone())
            .mime_str(&request.file.media_type)?;
        let mut form = Form::new().part("mediaFile", part);
        for (name, value) in Self::upload_fields(&request) {
            form = form.text(name, value);
        }

        let mut builder = self
            .client
            .post(url)
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .multipart(form);
        if let Some(token) = request.album.share_token() {
            builder = builder.query(&[("token", token)]);
        }
        if request.album.is_authenticated() {
            builder = builder.headers(self.credential_headers()?);
        }

        let response = builder.send().await?;
        Self::check_response(response).await?;
        debug!(
            album = %request.album,
            size_bytes = request.file.size_bytes,
            "Media uploaded"
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::serve;
    use crate::media::MediaFile;

    fn client() -> ApiClient {
        ApiClient::new("https://api.example.test/").expect("client")
    }

    #[test]
    fn test_authenticated_read_endpoint() {
        let album = AlbumIdentity::Authenticated("a1".to_string());
        let (url, query) = client().challenges_request(&album).expect("request");

        assert_eq!(url.as_str(), "https://api.example.test/challenges");
        assert_eq!(query, vec![("albumId", "a1".to_string())]);
    }

    #[test]
    fn test_public_read_endpoint_escapes_token() {
        let album = AlbumIdentity::PublicToken("ab/c d".to_string());
        let (url, query) = client().challenges_request(&album).expect("request");

        assert_eq!(url.as_str(), "https://api.example.test/challenges/public/ab%2Fc%20d");
        assert!(query.is_empty());
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let api = ApiClient::new("http://localhost:5000/backend").expect("client");
        let url = api.endpoint(&["api", "album-media", "upload-media"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:5000/backend/api/album-media/upload-media");
    }

    #[test]
    fn test_upload_fields_public_guest() {
        let request = UploadRequest {
            album: AlbumIdentity::PublicToken("tok".to_string()),
            user_id: "guest".to_string(),
            challenge_title: "Best sunset".to_string(),
            uploader_username: "Alex".to_string(),
            file: MediaFile::from_bytes("a.jpg", "image/jpeg", vec![1, 2, 3]),
        };

        assert_eq!(
            ApiClient::upload_fields(&request),
            vec![
                ("albumId", "public".to_string()),
                ("userId", "guest".to_string()),
                ("challengeTitle", "Best sunset".to_string()),
                ("uploaderUsername", "Alex".to_string()),
            ]
        );
    }

    #[test]
    fn test_credential_headers() {
        let api = client().with_credential(Some(Credential::Bearer("jwt".to_string())));
        let headers = api.credential_headers().expect("headers");
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer jwt");

        let api = client().with_credential(Some(Credential::Cookie("sid=1".to_string())));
        let headers = api.credential_headers().expect("headers");
        assert_eq!(headers.get(header::COOKIE).unwrap(), "sid=1");

        assert!(client().credential_headers().expect("headers").is_empty());
    }

    #[test]
    fn test_bad_credential_is_invalid_request() {
        let api = client().with_credential(Some(Credential::Bearer("bad\ntoken".to_string())));
        assert!(matches!(api.credential_headers(), Err(ApiError::InvalidRequest(_))));
    }

    fn upload_request(album: AlbumIdentity) -> UploadRequest {
        UploadRequest {
            album,
            user_id: "guest".to_string(),
            challenge_title: "Best sunset".to_string(),
            uploader_username: "Alex".to_string(),
            file: MediaFile::from_bytes("sunset.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF]),
        }
    }

    #[tokio::test]
    async fn test_public_fetch_sends_no_credential() {
        let (base, mut requests) = serve(vec![(200, r#"[{"_id":"c1","title":"Best sunset"}]"#)]).await;
        let api = ApiClient::new(base)
            .expect("client")
            .with_credential(Some(Credential::Bearer("jwt".to_string())));

        let challenges = api
            .fetch_challenges(&AlbumIdentity::PublicToken("tok123".to_string()))
            .await
            .expect("fetch");

        assert_eq!(challenges, vec![Challenge::new("c1", "Best sunset")]);
        let request = requests.recv().await.expect("request");
        assert_eq!(request.request_line(), "GET /challenges/public/tok123 HTTP/1.1");
        assert_eq!(request.header("authorization"), None);
    }

    #[tokio::test]
    async fn test_authenticated_fetch_sends_bearer() {
        let (base, mut requests) = serve(vec![(200, "[]")]).await;
        let api = ApiClient::new(base)
            .expect("client")
            .with_credential(Some(Credential::Bearer("jwt".to_string())));

        let challenges = api
            .fetch_challenges(&AlbumIdentity::Authenticated("a1".to_string()))
            .await
            .expect("fetch");

        assert!(challenges.is_empty());
        let request = requests.recv().await.expect("request");
        assert_eq!(request.request_line(), "GET /challenges?albumId=a1 HTTP/1.1");
        assert_eq!(request.header("authorization"), Some("Bearer jwt"));
    }

    #[tokio::test]
    async fn test_rate_limited_fetch_retries() {
        let (base, mut requests) = serve(vec![(429, ""), (200, "[]")]).await;
        let api = ApiClient::new(base).expect("client");

        let challenges = api
            .fetch_challenges(&AlbumIdentity::PublicToken("tok123".to_string()))
            .await
            .expect("fetch after retry");

        assert!(challenges.is_empty());
        assert!(requests.recv().await.is_some());
        assert!(requests.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_server_error_status_is_mapped() {
        let (base, _requests) = serve(vec![(500, "boom")]).await;
        let api = ApiClient::new(base).expect("client");

        let err = api
            .fetch_challenges(&AlbumIdentity::PublicToken("tok123".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServerError(body) if body == "boom"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let (base, _requests) = serve(vec![(200, r#"{"not":"a list"}"#)]).await;
        let api = ApiClient::new(base).expect("client");

        let err = api
            .fetch_challenges(&AlbumIdentity::PublicToken("tok123".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_public_upload_multipart() {
        let (base, mut requests) = serve(vec![(200, "{}")]).await;
        let api = ApiClient::new(base)
            .expect("client")
            .with_credential(Some(Credential::Bearer("jwt".to_string())));

        api.upload_media(upload_request(AlbumIdentity::PublicToken("tok123".to_string())))
            .await
            .expect("upload");

        let request = requests.recv().await.expect("request");
        assert!(request
            .request_line()
            .starts_with("POST /api/album-media/upload-media?token=tok123 "));
        assert!(request
            .header("content-type")
            .is_some_and(|v| v.starts_with("multipart/form-data")));
        assert_eq!(request.header("authorization"), None);

        let body = request.body_text();
        assert!(body.contains(r#"name="mediaFile"; filename="sunset.jpg""#));
        assert!(body.to_lowercase().contains("content-type: image/jpeg"));
        assert!(body.contains("name=\"albumId\"\r\n\r\npublic\r\n"));
        assert!(body.contains("name=\"userId\"\r\n\r\nguest\r\n"));
        assert!(body.contains("name=\"challengeTitle\"\r\n\r\nBest sunset\r\n"));
        assert!(body.contains("name=\"uploaderUsername\"\r\n\r\nAlex\r\n"));
    }

    #[tokio::test]
    async fn test_authenticated_upload_sends_cookie() {
        let (base, mut requests) = serve(vec![(200, "{}")]).await;
        let api = ApiClient::new(base)
            .expect("client")
            .with_credential(Some(Credential::Cookie("sid=1".to_string())));

        api.upload_media(upload_request(AlbumIdentity::Authenticated("a1".to_string())))
            .await
            .expect("upload");

        let request = requests.recv().await.expect("request");
        assert_eq!(request.request_line(), "POST /api/album-media/upload-media HTTP/1.1");
        assert_eq!(request.header("cookie"), Some("sid=1"));
        assert!(request.body_text().contains("name=\"albumId\"\r\n\r\na1\r\n"));
    }

    #[tokio::test]
    async fn test_rejected_upload_maps_status() {
        let (base, _requests) = serve(vec![(403, "not a member")]).await;
        let api = ApiClient::new(base).expect("client");

        let err = api
            .upload_media(upload_request(AlbumIdentity::Authenticated("a1".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AccessDenied(body) if body == "not a member"));
    }
}
