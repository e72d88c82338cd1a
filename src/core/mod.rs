pub mod config;

use serde::Deserialize;

/// Error body returned by Google APIs: `{"error": {"code", "message", "status"}}`.
#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: String,
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        format!("{} (code: {})", self.error.message, self.error.code)
    }
}

/// Parses an error body, returning `None` when it is not in the standard shape.
pub fn parse_error_body(body: &str) -> Option<FirebaseErrorResponse> {
    serde_json::from_str(body).ok()
}
