use super::convert::{Fields, FirestoreRecord};
use super::resource::{last_segment, Reference};
use super::value::{DecodeError, Value};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

/// A document read from or written to Firestore.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<T = Fields> {
    /// Full resource name, e.g. `projects/p/databases/(default)/documents/users/abc`.
    pub name: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    /// `None` when the document has no fields.
    pub fields: Option<T>,
}

impl<T> Document<T> {
    /// The document id, i.e. the last segment of [`Document::name`].
    pub fn id(&self) -> &str {
        last_segment(&self.name)
    }

    pub fn reference(&self) -> Result<Reference, DecodeError> {
        Reference::parse(&self.name)
    }
}

/// One page of a collection listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage<T = Fields> {
    pub documents: Vec<Document<T>>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawDocument {
    pub name: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub fields: Option<BTreeMap<String, Value>>,
}

impl RawDocument {
    pub(crate) fn decode<T: FirestoreRecord>(self) -> Result<Document<T>, DecodeError> {
        let fields = self
            .fields
            .map(|fields| T::from_fields(&Fields::from(fields)))
            .transpose()?;
        Ok(Document {
            name: self.name,
            create_time: self.create_time,
            update_time: self.update_time,
            fields,
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<RawDocument>,
    pub next_page_token: Option<String>,
}

impl ListDocumentsResponse {
    pub(crate) fn decode<T: FirestoreRecord>(self) -> Result<DocumentPage<T>, DecodeError> {
        let documents = self
            .documents
            .into_iter()
            .map(RawDocument::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DocumentPage {
            documents,
            next_page_token: self.next_page_token.filter(|token| !token.is_empty()),
        })
    }
}
