use super::convert::FirestoreRecord;
use super::models::{Document, DocumentPage, ListDocumentsResponse, RawDocument};
use super::resource::{last_segment, Reference};
use super::value::DecodeError;
use super::{FirebaseFirestore, FirestoreError};
use futures::stream::{self, Stream, TryStreamExt};
use http::{HeaderMap, Method};
use serde::de::IgnoredAny;
use serde_json::json;

fn document_body<T: FirestoreRecord>(record: &T) -> serde_json::Value {
    json!({ "fields": record.to_fields().to_json() })
}

/// A handle to a single document. Creating one performs no I/O.
#[derive(Clone)]
pub struct DocumentReference<'a> {
    pub(crate) firestore: &'a FirebaseFirestore,
    pub(crate) path: String,
}

impl<'a> DocumentReference<'a> {
    /// Path relative to the database's documents root, e.g. `users/ada`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        last_segment(&self.path)
    }

    /// The value to store in a field that points at this document.
    pub fn reference(&self) -> Result<Reference, DecodeError> {
        let config = self.firestore.config();
        Reference::new(&config.project_id, &config.database_id, &self.path)
    }

    /// Gets a sub-collection of this document.
    pub fn collection(&self, collection_id: &str) -> CollectionReference<'a> {
        CollectionReference {
            firestore: self.firestore,
            path: format!("{}/{}", self.path, collection_id.trim_matches('/')),
        }
    }

    pub async fn get<T: FirestoreRecord>(&self) -> Result<Document<T>, FirestoreError> {
        self.get_masked(&[]).await
    }

    /// Reads only the listed field paths (`mask.fieldPaths`).
    pub async fn get_masked<T: FirestoreRecord>(
        &self,
        field_paths: &[&str],
    ) -> Result<Document<T>, FirestoreError> {
        let query: Vec<(&str, &str)> = field_paths
            .iter()
            .map(|field| ("mask.fieldPaths", *field))
            .collect();

        let raw: RawDocument = self
            .firestore
            .send(Method::GET, &self.path, &query, None, HeaderMap::new())
            .await?;
        Ok(raw.decode()?)
    }

    /// Writes `record` to the document, creating it if it does not exist.
    ///
    /// Without a mask the whole document is replaced. With a mask only the
    /// listed field paths are written; a listed field that `record` does not
    /// contain is deleted from the document.
    pub async fn update<T: FirestoreRecord>(
        &self,
        record: &T,
        update_mask: Option<&[&str]>,
    ) -> Result<Document<T>, FirestoreError> {
        let query: Vec<(&str, &str)> = update_mask
            .unwrap_or_default()
            .iter()
            .map(|field| ("updateMask.fieldPaths", *field))
            .collect();

        let body = document_body(record);
        let raw: RawDocument = self
            .firestore
            .send(Method::PATCH, &self.path, &query, Some(&body), HeaderMap::new())
            .await?;
        Ok(raw.decode()?)
    }

    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let _: IgnoredAny = self
            .firestore
            .send(Method::DELETE, &self.path, &[], None, HeaderMap::new())
            .await?;
        Ok(())
    }
}

/// A handle to a collection. Creating one performs no I/O.
#[derive(Clone)]
pub struct CollectionReference<'a> {
    pub(crate) firestore: &'a FirebaseFirestore,
    pub(crate) path: String,
}

impl<'a> CollectionReference<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        last_segment(&self.path)
    }

    pub fn doc(&self, document_id: &str) -> DocumentReference<'a> {
        DocumentReference {
            firestore: self.firestore,
            path: format!("{}/{}", self.path, document_id.trim_matches('/')),
        }
    }

    /// Adds a document with a server-assigned id.
    pub async fn add<T: FirestoreRecord>(&self, record: &T) -> Result<Document<T>, FirestoreError> {
        self.create(None, record).await
    }

    /// Creates a document, failing with `ALREADY_EXISTS` if `document_id` is taken.
    pub async fn create<T: FirestoreRecord>(
        &self,
        document_id: Option<&str>,
        record: &T,
    ) -> Result<Document<T>, FirestoreError> {
        let query: Vec<(&str, &str)> = document_id
            .map(|id| ("documentId", id))
            .into_iter()
            .collect();

        let body = document_body(record);
        let raw: RawDocument = self
            .firestore
            .send(Method::POST, &self.path, &query, Some(&body), HeaderMap::new())
            .await?;
        Ok(raw.decode()?)
    }

    /// Lists documents using the server's default page size.
    pub async fn list_documents<T: FirestoreRecord>(
        &self,
        page_token: Option<&str>,
    ) -> Result<DocumentPage<T>, FirestoreError> {
        self.list(None, page_token).await
    }

    pub async fn list_documents_paginated<T: FirestoreRecord>(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<DocumentPage<T>, FirestoreError> {
        self.list(Some(page_size), page_token).await
    }

    /// Streams every document of the collection, fetching `page_size` documents per request.
    pub fn stream_documents<T: FirestoreRecord + 'a>(
        &self,
        page_size: u32,
    ) -> impl Stream<Item = Result<Document<T>, FirestoreError>> + 'a {
        let collection = self.clone();

        // State is the token of the next page to fetch; `None` once the last page was read.
        stream::try_unfold(Some(None::<String>), move |state| {
            let collection = collection.clone();
            async move {
                let Some(page_token) = state else {
                    return Ok::<_, FirestoreError>(None);
                };

                let page = collection
                    .list_documents_paginated::<T>(page_size, page_token.as_deref())
                    .await?;
                let next = page.next_page_token.map(Some);
                let documents = stream::iter(page.documents.into_iter().map(Ok::<_, FirestoreError>));

                Ok(Some((documents, next)))
            }
        })
        .try_flatten()
    }

    async fn list<T: FirestoreRecord>(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<DocumentPage<T>, FirestoreError> {
        let page_size = page_size.map(|size| size.to_string());

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(size) = &page_size {
            query.push(("pageSize", size.as_str()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let list: ListDocumentsResponse = self
            .firestore
            .send(Method::GET, &self.path, &query, None, HeaderMap::new())
            .await?;
        Ok(list.decode()?)
    }
}
