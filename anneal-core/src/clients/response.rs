//! Status mapping shared by the HTTP clients.

use reqwest::{Response, StatusCode};

use crate::error::{Error, Result};

/// Pass a successful response through, otherwise map its status to an error.
///
/// Throttling and server errors are transient (`ProviderUnavailable`); any
/// other client error is a rejection of the request itself.
pub async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(Error::ProviderUnavailable(format!("{}: {}", status, body))),
        s if s.is_client_error() => Err(Error::OperationRejected(format!("{}: {}", status, body))),
        _ => Err(Error::ProviderUnavailable(format!("{}: {}", status, body))),
    }
}
