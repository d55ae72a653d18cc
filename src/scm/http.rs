//! HTTP plumbing shared by the SCM adapters.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::scm::error::ScmError;

/// HTTP request timeout for SCM API calls.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds an HTTP client with the standard request timeout.
pub(crate) fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Treats blank credentials as absent.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses the configured API base URL.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url.trim_end_matches('/'))
        .map_err(|e| ScmError::Configuration(format!("invalid SCM URL '{base_url}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ScmError::Configuration(format!("invalid SCM URL '{base_url}'")).into());
    }
    Ok(url)
}

/// Appends path segments (each percent-encoded, so `/` inside a segment
/// survives) and query pairs to the base URL.
pub(crate) fn endpoint(base: &Url, segments: &[&str], query: &[(&str, &str)]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    url
}

/// Checks an HTTP response for error status and maps it onto [`ScmError`].
///
/// `what` names the entity being fetched for not-found messages.
pub(crate) async fn check_error_response(
    backend: &'static str,
    what: &str,
    response: Response,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ScmError::Authentication {
            backend,
            status: status.as_u16(),
        }
        .into()),
        StatusCode::NOT_FOUND => Err(ScmError::NotFound(what.to_string()).into()),
        _ => {
            let error_text = response.text().await.unwrap_or_else(|e| {
                tracing::debug!("Failed to read error response body: {e}");
                String::new()
            });
            Err(ScmError::ApiRequestFailed(format!("HTTP {status}: {error_text}")).into())
        }
    }
}

/// Sends a request and returns the checked response.
pub(crate) async fn send(
    backend: &'static str,
    what: &str,
    request: RequestBuilder,
) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ScmError::NetworkError(e.to_string()))?;
    check_error_response(backend, what, response).await
}

/// Sends a request and decodes the JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    backend: &'static str,
    what: &str,
    request: RequestBuilder,
) -> Result<T> {
    let response = send(backend, what, request).await?;
    decode_json(response).await
}

/// Decodes a JSON body, mapping failures onto [`ScmError::InvalidResponseFormat`].
pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    Ok(response
        .json::<T>()
        .await
        .map_err(|e| ScmError::InvalidResponseFormat(e.to_string()))?)
}

/// One page of a paginated listing.
pub(crate) struct Page<T> {
    /// Items on this page, in backend order.
    pub items: Vec<T>,
    /// Cursor for the next page, `None` on the last page.
    pub next: Option<u64>,
}

/// Turns a page fetcher into a lazy stream of items.
///
/// Pages are requested only as the consumer pulls items, and every call
/// starts again from `first`.
pub(crate) fn paginate<'a, T, F, Fut>(first: u64, fetch: F) -> BoxStream<'a, Result<T>>
where
    T: Send + 'a,
    F: FnMut(u64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>>> + Send + 'a,
{
    stream::try_unfold((Some(first), fetch), |(cursor, mut fetch)| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, anyhow::Error>(None);
        };
        let page = fetch(cursor).await?;
        let items = stream::iter(page.items.into_iter().map(Ok::<T, anyhow::Error>));
        Ok::<_, anyhow::Error>(Some((items, (page.next, fetch))))
    })
    .try_flatten()
    .boxed()
}

/// Embeds credentials into the user-info component of a clone URL.
///
/// Both parts are percent-encoded so reserved characters in tokens or
/// passwords cannot change how the URL parses.
pub(crate) fn authenticated_url(clone_url: &str, username: &str, secret: &str) -> Result<String> {
    let parsed = Url::parse(clone_url)
        .map_err(|e| ScmError::InvalidResponseFormat(format!("invalid clone URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ScmError::InvalidResponseFormat("clone URL has no host".to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    Ok(format!(
        "{}://{}:{}@{}{}",
        parsed.scheme(),
        encode_userinfo(username),
        encode_userinfo(secret),
        authority,
        parsed.path()
    ))
}

/// Percent-encodes everything except unreserved characters.
fn encode_userinfo(value: &str) -> String {
    // byte_serialize writes spaces as '+', and a literal '+' as %2B
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
