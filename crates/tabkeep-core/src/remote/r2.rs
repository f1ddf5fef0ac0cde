//! Cloudflare R2 (S3-compatible) remote store for the sync file.

use std::env;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;
use tokio_util::sync::CancellationToken;

use super::{cancellable, RemoteFileId, RemoteStore};
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const ENV_ACCOUNT_ID: &str = "TABKEEP_R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "TABKEEP_R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "TABKEEP_R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "TABKEEP_R2_SECRET_ACCESS_KEY";
const ENV_ENDPOINT: &str = "TABKEEP_R2_ENDPOINT";
const ENV_PREFIX: &str = "TABKEEP_R2_PREFIX";

/// Cloudflare R2 configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
    /// Endpoint override for other S3-compatible services.
    pub endpoint: Option<String>,
    /// Key prefix the sync file is stored under.
    pub prefix: Option<String>,
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("https://{}.r2.cloudflarestorage.com", self.account_id)
        })
    }

    /// Object key for a file name, under the configured prefix.
    #[must_use]
    pub fn object_key(&self, name: &str) -> String {
        let name = name.trim().trim_matches('/');
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }
}

/// `RemoteStore` backed by one R2 bucket. File ids are object keys.
#[derive(Clone, Debug)]
pub struct R2RemoteStore {
    config: R2Config,
    client: Client,
}

impl R2RemoteStore {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    /// Build a store from environment variables, if any are set.
    pub fn from_env() -> Result<Option<Self>> {
        Ok(R2Config::from_env()?.map(Self::new))
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }

    async fn head(&self, key: &str) -> Result<Option<RemoteFileId>> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(Some(RemoteFileId::new(key))),
            Err(error) if is_not_found(&error) => Ok(None),
            Err(error) => Err(classify_error("head_object", &self.config.bucket, key, &error)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) if is_not_found(&error) => return Ok(None),
            Err(error) => {
                return Err(classify_error("get_object", &self.config.bucket, key, &error));
            }
        };

        let payload = response.body.collect().await.map_err(|error| {
            Error::Transient(format!(
                "R2 get_object_body failed for {}/{key}: {error}",
                self.config.bucket
            ))
        })?;

        Ok(Some(payload.into_bytes().to_vec()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<RemoteFileId> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| classify_error("put_object", &self.config.bucket, key, &error))?;

        Ok(RemoteFileId::new(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| classify_error("delete_object", &self.config.bucket, key, &error))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for R2RemoteStore {
    async fn find(&self, name: &str, token: &CancellationToken) -> Result<Option<RemoteFileId>> {
        let key = self.config.object_key(name);
        cancellable(token, self.head(&key)).await
    }

    async fn download(
        &self,
        id: &RemoteFileId,
        token: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        cancellable(token, self.get(id.as_str())).await
    }

    async fn upload(
        &self,
        id: Option<&RemoteFileId>,
        name: &str,
        bytes: Vec<u8>,
        token: &CancellationToken,
    ) -> Result<RemoteFileId> {
        let key = id.map_or_else(|| self.config.object_key(name), |id| id.as_str().to_string());
        cancellable(token, self.put(&key, bytes)).await
    }

    async fn delete(&self, id: &RemoteFileId, token: &CancellationToken) -> Result<()> {
        cancellable(token, self.remove(id.as_str())).await
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let account_id = lookup(ENV_ACCOUNT_ID).map(|value| value.trim().to_string());
    let bucket = lookup(ENV_BUCKET).map(|value| value.trim().to_string());
    let access_key_id = lookup(ENV_ACCESS_KEY_ID).map(|value| value.trim().to_string());
    let secret_access_key = lookup(ENV_SECRET_ACCESS_KEY).map(|value| value.trim().to_string());
    let endpoint = normalize_text_option(lookup(ENV_ENDPOINT));
    let prefix = normalize_text_option(lookup(ENV_PREFIX))
        .map(|value| value.trim_matches('/').to_string())
        .filter(|value| !value.is_empty());

    let any_present = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some()
        || endpoint.is_some();

    if !any_present {
        return Ok(None);
    }

    let mut missing = Vec::new();
    let account_id = require(account_id, ENV_ACCOUNT_ID, &mut missing);
    let bucket = require(bucket, ENV_BUCKET, &mut missing);
    let access_key_id = require(access_key_id, ENV_ACCESS_KEY_ID, &mut missing);
    let secret_access_key = require(secret_access_key, ENV_SECRET_ACCESS_KEY, &mut missing);

    let (Some(account_id), Some(bucket), Some(access_key_id), Some(secret_access_key)) =
        (account_id, bucket, access_key_id, secret_access_key)
    else {
        return Err(Error::InvalidInput(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    };

    if let Some(endpoint) = &endpoint {
        if !is_http_url(endpoint) {
            return Err(Error::InvalidInput(format!(
                "{ENV_ENDPOINT} must start with http:// or https://"
            )));
        }
    }

    Ok(Some(R2Config {
        account_id,
        bucket,
        access_key_id,
        secret_access_key,
        endpoint: endpoint.map(|value| value.trim_end_matches('/').to_string()),
        prefix,
    }))
}

fn require(
    value: Option<String>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    let value = value.filter(|value| !value.is_empty());
    if value.is_none() {
        missing.push(name);
    }
    value
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "tabkeep-core-r2-remote",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn response_status<E>(error: &SdkError<E, HttpResponse>) -> Option<u16> {
    error
        .raw_response()
        .map(|response| response.status().as_u16())
}

fn is_not_found<E>(error: &SdkError<E, HttpResponse>) -> bool {
    response_status(error) == Some(404)
}

/// Map an SDK failure onto the sync error taxonomy by HTTP status.
fn classify_error<E>(
    operation: &str,
    bucket: &str,
    key: &str,
    error: &SdkError<E, HttpResponse>,
) -> Error
where
    E: std::error::Error + 'static,
{
    let message = format!(
        "R2 {operation} failed for {bucket}/{key}: {}",
        DisplayErrorContext(error)
    );
    classify_status(response_status(error), message)
}

fn classify_status(status: Option<u16>, message: String) -> Error {
    match status {
        Some(401 | 403) => Error::Auth(message),
        Some(404) => Error::NotFound(message),
        Some(412) => Error::DataChanged(message),
        _ => Error::Transient(message),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::{Collection, SyncSnapshot};

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<Option<R2Config>> {
        parse_config(|key| map.get(key).map(|value| (*value).to_string()))
    }

    fn complete_map() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (ENV_ACCOUNT_ID, "account-1"),
            (ENV_BUCKET, "bucket-a"),
            (ENV_ACCESS_KEY_ID, "AKID123"),
            (ENV_SECRET_ACCESS_KEY, "SECRET123"),
        ])
    }

    #[test]
    fn parse_config_none_returns_none() {
        let map = HashMap::new();
        assert!(parse_from_map(&map).unwrap().is_none());
    }

    #[test]
    fn parse_config_requires_all_required_values() {
        let mut map = HashMap::new();
        map.insert(ENV_ACCOUNT_ID, "account");
        map.insert(ENV_BUCKET, "bucket");

        let err = parse_from_map(&map).unwrap_err();
        match err {
            Error::InvalidInput(message) => {
                assert!(message.contains(ENV_ACCESS_KEY_ID));
                assert!(message.contains(ENV_SECRET_ACCESS_KEY));
                assert!(!message.contains(ENV_BUCKET));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_config_defaults_to_account_endpoint() {
        let config = parse_from_map(&complete_map()).unwrap().unwrap();
        assert_eq!(
            config.endpoint_url(),
            "https://account-1.r2.cloudflarestorage.com"
        );
        assert_eq!(config.object_key("tabkeep-sync.json"), "tabkeep-sync.json");
    }

    #[test]
    fn parse_config_accepts_endpoint_and_prefix() {
        let mut map = complete_map();
        map.insert(ENV_ENDPOINT, "http://localhost:9000/");
        map.insert(ENV_PREFIX, "/profiles/work/");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(config.endpoint_url(), "http://localhost:9000");
        assert_eq!(
            config.object_key("tabkeep-sync.json"),
            "profiles/work/tabkeep-sync.json"
        );
    }

    #[test]
    fn parse_config_rejects_invalid_endpoint() {
        let mut map = complete_map();
        map.insert(ENV_ENDPOINT, "localhost:9000");

        let err = parse_from_map(&map).unwrap_err();
        match err {
            Error::InvalidInput(message) => assert!(message.contains(ENV_ENDPOINT)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn classify_status_maps_http_codes() {
        let msg = || "boom".to_string();
        assert!(matches!(classify_status(Some(401), msg()), Error::Auth(_)));
        assert!(matches!(classify_status(Some(403), msg()), Error::Auth(_)));
        assert!(matches!(
            classify_status(Some(412), msg()),
            Error::DataChanged(_)
        ));
        assert!(matches!(
            classify_status(Some(503), msg()),
            Error::Transient(_)
        ));
        assert!(matches!(classify_status(None, msg()), Error::Transient(_)));
    }

    #[test]
    #[ignore = "Requires local R2 env vars in process environment or .env"]
    fn from_env_loads_real_r2_config() {
        let _ = dotenvy::dotenv();

        let config = R2Config::from_env()
            .expect("R2 env parsing should not error")
            .expect("R2 config should be present");

        assert!(!config.account_id.trim().is_empty());
        assert!(!config.bucket.trim().is_empty());
        assert!(is_http_url(&config.endpoint_url()));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "Requires local R2 env vars plus network access"]
    async fn r2_sync_file_roundtrip() {
        let _ = dotenvy::dotenv();

        let store = R2RemoteStore::from_env()
            .expect("R2 env parsing should not error")
            .expect("R2 config should be present");
        let token = CancellationToken::new();
        let name = format!("tabkeep-it-{}.json", uuid::Uuid::now_v7());

        assert_eq!(store.find(&name, &token).await.unwrap(), None);

        let snapshot = SyncSnapshot::new(vec![Collection::new("Integration")], Vec::new());
        let id = store
            .upload(None, &name, snapshot.to_json().unwrap(), &token)
            .await
            .unwrap_or_else(|error| panic!("R2 upload failed: {error}"));
        assert_eq!(store.find(&name, &token).await.unwrap(), Some(id.clone()));

        let bytes = store.download(&id, &token).await.unwrap().unwrap();
        assert_eq!(SyncSnapshot::from_json(&bytes).unwrap(), snapshot);

        store.delete(&id, &token).await.unwrap();
        assert_eq!(store.download(&id, &token).await.unwrap(), None);
    }
}
