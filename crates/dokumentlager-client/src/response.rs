//! Response wrapper shared by all operations

use std::collections::HashMap;

/// A parsed result together with the HTTP status and headers that carried it
#[derive(Clone, Debug)]
pub struct DocumentResponse<T> {
    pub result: T,
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
}

impl<T> DocumentResponse<T> {
    pub fn new(result: T, status: u16, headers: HashMap<String, String>) -> Self {
        Self {
            result,
            status,
            headers,
        }
    }

    /// Look up a header, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Replace the result, keeping status and headers
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DocumentResponse<U> {
        DocumentResponse {
            result: f(self.result),
            status: self.status,
            headers: self.headers,
        }
    }

    pub fn into_result(self) -> T {
        self.result
    }
}
