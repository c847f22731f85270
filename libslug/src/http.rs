use futures::stream::TryStreamExt;
use http::HeaderMap;
use reqwest::{IntoUrl, Response, StatusCode};
use std::io;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::runtime::Runtime;
use tokio_util::io::StreamReader;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a GET request and returns the response once its headers have been received.
///
/// Responses with a status outside of the 2xx range are errors. No read timeout is applied and
/// failed requests are not retried, so a slow download is only bounded by the caller.
#[bon::builder]
pub async fn get<U>(
    #[builder(start_fn)] //
    url: U,
    headers: Option<HeaderMap>,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)] //
    connect_timeout: Duration,
) -> Result<Response, HttpError>
where
    U: IntoUrl + std::fmt::Display + Clone,
{
    let client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| HttpError::Request(url.to_string(), e))?;

    let mut request_builder = client.get(url.clone());

    if let Some(headers) = headers {
        request_builder = request_builder.headers(headers);
    }

    log::debug!("GET {url}");

    let response = request_builder
        .send()
        .await
        .map_err(|e| HttpError::Request(url.to_string(), e))?;

    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(HttpError::UnexpectedStatus {
            url: url.to_string(),
            status,
        })
    }
}

/// Extend the [`bon::builder`] for [`get`]
impl<U, State> GetBuilder<U, State>
where
    U: IntoUrl + std::fmt::Display + Clone,
    State: get_builder::State,
{
    pub fn call_sync(self) -> Result<Response, HttpError>
    where
        State: get_builder::IsComplete,
    {
        ASYNC_RUNTIME.block_on(async { self.call().await })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Request to `{0}` failed\nError: {1}")]
    Request(String, #[source] reqwest::Error),
    #[error("Request to `{url}` returned unexpected status {status}")]
    UnexpectedStatus { url: String, status: StatusCode },
}

/// Turns the body of a response into a reader that yields the bytes as they arrive.
pub fn body_reader(response: Response) -> impl AsyncRead + Send + Unpin + 'static {
    StreamReader::new(Box::pin(
        response.bytes_stream().map_err(io::Error::other),
    ))
}

pub(crate) static ASYNC_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("Should be able to construct the Async Runtime")
});
