//! Cloud Firestore module.
//!
//! This module provides a typed client for the Firestore v1 REST API:
//! reading, listing, creating, updating and deleting documents.
//!
//! It mirrors the Firebase Admin Node.js SDK's structure using `CollectionReference` and `DocumentReference`,
//! and also exposes the same operations as flat methods on [`FirebaseFirestore`].
//!
//! # Typed documents
//!
//! Document fields are converted through [`convert::FirestoreRecord`]. Integers travel as
//! decimal strings, timestamps as RFC3339, and `Option::None` as an explicit `nullValue`.
//!
//! # Authentication
//!
//! Every request carries a bearer token from the [`token::TokenManager`]. A `401` response
//! triggers exactly one forced token refresh and retry before [`FirestoreError::TokenExpired`]
//! is returned.

pub mod convert;
pub mod models;
pub mod reference;
pub mod resource;
pub mod token;
pub mod value;


use self::convert::FirestoreRecord;
use self::models::{Document, DocumentPage};
use self::reference::{CollectionReference, DocumentReference};
use self::resource::{documents_root, relative_path};
use self::token::TokenManager;
use self::value::DecodeError;
use crate::core::config::FirestoreConfig;
use crate::core::parse_error_body;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// The request could not be sent or the response could not be read.
    #[error("Network error: {0}")]
    Network(#[from] reqwest_middleware::Error),
    /// Non-success status whose body is not a Firestore error.
    #[error("Invalid response: HTTP {0}")]
    InvalidResponse(StatusCode),
    /// Errors returned by the Firestore API.
    #[error("API error: {status} ({code}): {message}")]
    Response {
        code: u16,
        message: String,
        status: String,
    },
    /// The API rejected the access token even after a refresh.
    #[error("Access token expired")]
    TokenExpired,
    /// The service account key could not be used or the token exchange failed.
    #[error("Signing error: {0}")]
    Signing(String),
    /// A response body did not match the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),
    /// Wrapper for `serde_json::Error` raised while building a request.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for FirestoreError {
    fn from(e: reqwest::Error) -> Self {
        FirestoreError::Network(reqwest_middleware::Error::Reqwest(e))
    }
}

impl From<DecodeError> for FirestoreError {
    fn from(e: DecodeError) -> Self {
        FirestoreError::Parse(e.to_string())
    }
}

impl FirestoreError {
    fn from_error_body(status: StatusCode, body: &str) -> Self {
        match parse_error_body(body) {
            Some(response) => FirestoreError::Response {
                code: response.error.code,
                message: response.error.message,
                status: response.error.status,
            },
            None => FirestoreError::InvalidResponse(status),
        }
    }

    /// `true` when the document (or its parent) does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            FirestoreError::Response { code, status, .. } => *code == 404 || status == "NOT_FOUND",
            FirestoreError::InvalidResponse(status) => *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }

    /// `true` for failures that may succeed when the same call is repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            FirestoreError::Network(_) => true,
            FirestoreError::Response { code, status, .. } => {
                matches!(*code, 429 | 503 | 504)
                    || matches!(status.as_str(), "UNAVAILABLE" | "RESOURCE_EXHAUSTED" | "ABORTED")
            }
            FirestoreError::InvalidResponse(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Client for interacting with Cloud Firestore.
///
/// Cloning is cheap; clones share the HTTP client and the token cache.
#[derive(Clone)]
pub struct FirebaseFirestore {
    client: ClientWithMiddleware,
    config: Arc<FirestoreConfig>,
    tokens: Arc<TokenManager>,
    documents_root: String,
}

impl FirebaseFirestore {
    /// Creates a new `FirebaseFirestore` instance with a default HTTP client.
    pub fn new(config: FirestoreConfig) -> Self {
        Self::with_client(config, ClientBuilder::new(Client::new()).build())
    }

    /// Creates a new `FirebaseFirestore` instance on top of an existing client.
    ///
    /// Middleware on `client` (retries, tracing, ...) applies to both the token
    /// exchange and document calls.
    pub fn with_client(config: FirestoreConfig, client: ClientWithMiddleware) -> Self {
        let tokens = Arc::new(TokenManager::new(client.clone(), &config));
        let documents_root = documents_root(&config.project_id, &config.database_id);

        Self {
            client,
            config: Arc::new(config),
            tokens,
            documents_root,
        }
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Returns the current access token. Useful for diagnostics.
    pub async fn access_token(&self) -> Result<String, FirestoreError> {
        self.tokens.token().await
    }

    /// Drops the cached access token; the next request exchanges a new one.
    pub async fn invalidate_token(&self) {
        self.tokens.invalidate().await;
    }

    /// Gets a `CollectionReference` instance that refers to the collection at the specified path.
    ///
    /// # Arguments
    ///
    /// * `collection_path` - The slash-separated path to the collection (e.g., "users" or "users/ada/posts").
    pub fn collection(&self, collection_path: &str) -> CollectionReference<'_> {
        CollectionReference {
            firestore: self,
            path: self.normalize(collection_path),
        }
    }

    /// Gets a `DocumentReference` instance that refers to the document at the specified path.
    ///
    /// # Arguments
    ///
    /// * `document_path` - The slash-separated path to the document (e.g., "users/user1"),
    ///   or its full resource name.
    pub fn doc(&self, document_path: &str) -> DocumentReference<'_> {
        DocumentReference {
            firestore: self,
            path: self.normalize(document_path),
        }
    }

    /// Reads a single document.
    pub async fn get_document<T: FirestoreRecord>(
        &self,
        document_path: &str,
    ) -> Result<Document<T>, FirestoreError> {
        self.doc(document_path).get().await
    }

    /// Lists a collection, starting at `page_token` if given.
    pub async fn list_documents<T: FirestoreRecord>(
        &self,
        collection_path: &str,
        page_token: Option<&str>,
    ) -> Result<DocumentPage<T>, FirestoreError> {
        self.collection(collection_path)
            .list_documents(page_token)
            .await
    }

    /// Lists at most `page_size` documents of a collection.
    pub async fn list_documents_paginated<T: FirestoreRecord>(
        &self,
        collection_path: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<DocumentPage<T>, FirestoreError> {
        self.collection(collection_path)
            .list_documents_paginated(page_size, page_token)
            .await
    }

    /// Creates a document in a collection. Without `document_id` the server assigns one.
    pub async fn create_document<T: FirestoreRecord>(
        &self,
        collection_path: &str,
        document_id: Option<&str>,
        record: &T,
    ) -> Result<Document<T>, FirestoreError> {
        self.collection(collection_path)
            .create(document_id, record)
            .await
    }

    /// Writes `record` to a document. See [`DocumentReference::update`].
    pub async fn update_document<T: FirestoreRecord>(
        &self,
        document_path: &str,
        record: &T,
        update_mask: Option<&[&str]>,
    ) -> Result<Document<T>, FirestoreError> {
        self.doc(document_path).update(record, update_mask).await
    }

    pub async fn delete_document(&self, document_path: &str) -> Result<(), FirestoreError> {
        self.doc(document_path).delete().await
    }

    /// Sends an authenticated request to the documents API and decodes the response.
    ///
    /// `path` is relative to `projects/{project}/databases/{database}/documents/`;
    /// a path that already starts with that root is used as is. `headers` are
    /// applied over the default `Content-Type` and `Authorization` headers.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        headers: HeaderMap,
    ) -> Result<T, FirestoreError> {
        let url = self.resource_url(path, query)?;
        let body = body.map(serde_json::to_vec).transpose()?;

        let mut token = self.tokens.token().await?;
        let mut retried = false;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .headers(request_headers(&token, &headers)?)
                .timeout(self.config.timeout);

            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if retried {
                    return Err(FirestoreError::TokenExpired);
                }
                warn!(%method, path = url.path(), "Access token rejected, refreshing");
                token = self.tokens.force_refresh(&token).await?;
                retried = true;
                continue;
            }

            let text = response.text().await?;

            if !status.is_success() {
                debug!(%method, path = url.path(), status = status.as_u16(), "Firestore request failed");
                return Err(FirestoreError::from_error_body(status, &text));
            }

            return decode_body(&text);
        }
    }

    fn normalize(&self, path: &str) -> String {
        relative_path(path, &self.documents_root)
            .trim_end_matches('/')
            .to_string()
    }

    fn resource_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, FirestoreError> {
        let mut url = Url::parse(&self.config.api_root)?;

        // Segments are percent-encoded one by one, so `?`, `#` and `%` in a
        // document id stay part of the id.
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(
                self.documents_root
                    .split('/')
                    .chain(relative_path(path, &self.documents_root).split('/'))
                    .filter(|segment| !segment.is_empty()),
            );

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(url)
    }
}

fn request_headers(token: &str, extra: &HeaderMap) -> Result<HeaderMap, FirestoreError> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| FirestoreError::Signing("access token is not a valid header value".into()))?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::AUTHORIZATION, bearer);

    // Caller headers replace defaults of the same name.
    for name in extra.keys() {
        headers.remove(name);
    }
    for (name, value) in extra {
        headers.append(name.clone(), value.clone());
    }

    Ok(headers)
}

fn decode_body<T: DeserializeOwned>(text: &str) -> Result<T, FirestoreError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| FirestoreError::Parse(e.to_string()))
}
