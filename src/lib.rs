//! Typed Cloud Firestore REST client.
//!
//! ```rust,no_run
//! # use firestore_rest::{FirebaseFirestore, FirestoreConfig, Fields, Document};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FirestoreConfig::from_service_account_file("service-account.json").await?;
//! let firestore = FirebaseFirestore::new(config);
//!
//! let created = firestore
//!     .create_document("users", None, &Fields::new().with("name", "Ada"))
//!     .await?;
//! let read: Document = firestore.get_document(&created.name).await?;
//! assert_eq!(read.id(), created.id());
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod firestore;

pub use crate::core::config::{ConfigError, FirestoreConfig};
pub use crate::firestore::convert::{Blob, Fields, FirestoreRecord, FromValue, ToValue};
pub use crate::firestore::models::{Document, DocumentPage};
pub use crate::firestore::resource::Reference;
pub use crate::firestore::value::{DecodeError, GeoPoint, Value};
pub use crate::firestore::{FirebaseFirestore, FirestoreError};
