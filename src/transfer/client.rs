//! HTTP client for one remote target.
//!
//! # Sessions
//!
//! Every [`TransferClient::execute`] runs in a fresh session: a new connection
//! pool and an empty cookie jar. When the target has credentials, the session
//! logs in through the form-login entry point before the real request, the way
//! an interactive user would.
//!
//! # Redirects
//!
//! Redirects are followed here rather than by the HTTP stack so that the method
//! and body are preserved on every hop (file bodies are reopened per attempt).
//! At most [`MAX_REDIRECTS`] hops are followed.
//!
//! # Abort
//!
//! Every exchange races a [`CancellationToken`]. Cancelling drops the in-flight
//! request, which closes the connection, and the call fails with
//! [`TransferError::Aborted`] rather than a connectivity error.

use std::path::PathBuf;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Method, Url};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::endpoints;
use super::error::{Result, TransferError};
use crate::types::FailedExchange;

/// Maximum number of redirect hops followed for one request.
pub const MAX_REDIRECTS: usize = 10;

/// Content type of configuration payloads.
pub const JSON: &str = "application/json";

/// Content type of build archives.
pub const TAR: &str = "application/x-tar";

const FORM: &str = "application/x-www-form-urlencoded";

/// Characters left unescaped in form values.
const FORM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'*');

/// Login name and password for form login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings of a remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Base URL, always ending with `/`.
    pub url: Url,
    pub credentials: Option<Credentials>,
}

impl RemoteEndpoint {
    pub fn requires_authentication(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Bytes {
        content_type: &'static str,
        data: Vec<u8>,
    },
    /// A file streamed from disk.
    File {
        content_type: &'static str,
        path: PathBuf,
    },
}

impl RequestBody {
    pub fn json(data: Vec<u8>) -> Self {
        RequestBody::Bytes {
            content_type: JSON,
            data,
        }
    }

    pub fn archive(path: impl Into<PathBuf>) -> Self {
        RequestBody::File {
            content_type: TAR,
            path: path.into(),
        }
    }

    fn form(fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(k, FORM_VALUE),
                    utf8_percent_encode(v, FORM_VALUE)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        RequestBody::Bytes {
            content_type: FORM,
            data: encoded.into_bytes(),
        }
    }
}

/// One logical request, replayed unchanged across redirects.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
    pub headers: Vec<(&'static str, String)>,
}

impl TransferRequest {
    pub fn get(url: Url) -> Self {
        TransferRequest {
            method: Method::GET,
            url,
            body: RequestBody::Empty,
            headers: Vec::new(),
        }
    }

    pub fn post(url: Url, body: RequestBody) -> Self {
        TransferRequest {
            method: Method::POST,
            url,
            body,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub method: String,
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    async fn read(method: &Method, response: reqwest::Response) -> Result<Self> {
        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransferError::Connectivity {
                url: url.to_string(),
                source: e,
            })?
            .to_vec();

        Ok(RemoteResponse {
            method: method.to_string(),
            url,
            status,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status < 300
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Captures this response for diagnostics.
    pub fn into_exchange(self) -> FailedExchange {
        FailedExchange::new(
            self.method,
            self.url.to_string(),
            self.status,
            self.headers,
            &self.body,
        )
    }
}

/// HTTP client bound to one remote target.
#[derive(Debug, Clone)]
pub struct TransferClient {
    endpoint: RemoteEndpoint,
    timeout: Duration,
}

impl TransferClient {
    pub fn new(endpoint: RemoteEndpoint, timeout: Duration) -> Self {
        TransferClient { endpoint, timeout }
    }

    pub fn base(&self) -> &Url {
        &self.endpoint.url
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    /// Executes a request and requires a success status.
    ///
    /// Any final status of 300 or above fails with
    /// [`TransferError::ServerStatus`] carrying the response.
    pub async fn execute(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<RemoteResponse> {
        require_success(self.send(request, cancel).await?)
    }

    /// Executes a request and returns the final response whatever its status.
    pub async fn probe(&self, url: Url, cancel: &CancellationToken) -> Result<RemoteResponse> {
        self.send(TransferRequest::get(url), cancel).await
    }

    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<RemoteResponse> {
        if cancel.is_cancelled() {
            return Err(TransferError::Aborted);
        }

        let work = async {
            let session = self.session()?;
            if let Some(credentials) = &self.endpoint.credentials {
                self.login(&session, credentials).await?;
            }
            self.follow_redirects(&session, &request).await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Aborted),
            result = work => result,
        }
    }

    /// Creates a session with an empty cookie jar.
    fn session(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| TransferError::Connectivity {
                url: self.endpoint.url.to_string(),
                source: e,
            })
    }

    async fn login(&self, session: &reqwest::Client, credentials: &Credentials) -> Result<()> {
        debug!(login = %credentials.login, "Logging in to remote");

        let entry = TransferRequest::get(endpoints::login_entry(&self.endpoint.url)?);
        require_success(self.follow_redirects(session, &entry).await?)?;

        let check = TransferRequest::post(
            endpoints::security_check(&self.endpoint.url)?,
            RequestBody::form(&[
                ("j_username", credentials.login.as_str()),
                ("j_password", credentials.password.as_str()),
                ("action", "login"),
            ]),
        );
        require_success(self.follow_redirects(session, &check).await?)?;
        Ok(())
    }

    /// Sends `request`, re-targeting it on every redirect.
    async fn follow_redirects(
        &self,
        session: &reqwest::Client,
        request: &TransferRequest,
    ) -> Result<RemoteResponse> {
        let mut url = request.url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = self.send_once(session, request, &url).await?;

            if response.status().is_redirection()
                && let Some(location) = response.headers().get(LOCATION)
            {
                let location = location
                    .to_str()
                    .map_err(|e| TransferError::invalid_url(url.as_str(), e))?;
                let next = url
                    .join(location)
                    .map_err(|e| TransferError::invalid_url(location, e))?;
                debug!(from = %url, to = %next, status = response.status().as_u16(), "Following redirect");
                url = next;
                continue;
            }

            return RemoteResponse::read(&request.method, response).await;
        }

        Err(TransferError::TooManyRedirects {
            url: request.url.to_string(),
        })
    }

    async fn send_once(
        &self,
        session: &reqwest::Client,
        request: &TransferRequest,
        url: &Url,
    ) -> Result<reqwest::Response> {
        let mut builder = session.request(request.method.clone(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        builder = match &request.body {
            RequestBody::Empty if request.method == Method::GET => builder.timeout(self.timeout),
            RequestBody::Empty => builder.timeout(self.timeout).body(Vec::new()),
            RequestBody::Bytes { content_type, data } => builder
                .timeout(self.timeout)
                .header(CONTENT_TYPE, *content_type)
                .body(data.clone()),
            RequestBody::File { content_type, path } => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| TransferError::Body {
                        path: path.clone(),
                        source: e,
                    })?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| TransferError::Body {
                        path: path.clone(),
                        source: e,
                    })?
                    .len();
                builder
                    .header(CONTENT_TYPE, *content_type)
                    .header(CONTENT_LENGTH, len)
                    .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
        };

        builder
            .send()
            .await
            .map_err(|e| TransferError::Connectivity {
                url: url.to_string(),
                source: e,
            })
    }
}

fn require_success(response: RemoteResponse) -> Result<RemoteResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(TransferError::ServerStatus(Box::new(response.into_exchange())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockRemote;

    fn client(remote: &MockRemote) -> TransferClient {
        TransferClient::new(remote.endpoint(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn execute_returns_success_response() {
        let remote = MockRemote::start().await;
        let client = client(&remote);

        let response = client
            .execute(
                TransferRequest::get(remote.url().clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn failure_status_carries_exchange() {
        let remote = MockRemote::start().await;
        remote.fail_next("POST", "/createItem", 500, 1);
        let client = client(&remote);

        let url = endpoints::create_item(remote.url(), &"app".into()).unwrap();
        let err = client
            .execute(
                TransferRequest::post(url, RequestBody::json(b"{}".to_vec())),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let exchange = err.exchange().unwrap();
        assert_eq!(exchange.status, 500);
        assert_eq!(exchange.method, "POST");
        assert!(exchange.url.contains("createItem?name=app"));
        assert_eq!(exchange.body, "scripted failure");
    }

    #[tokio::test]
    async fn redirect_preserves_method_and_body() {
        let remote = MockRemote::start().await;
        remote.add_project("app");
        remote.redirect("/moved/config", "/job/app/config-accept");
        let client = client(&remote);

        let url = remote.url().join("moved/config").unwrap();
        client
            .execute(
                TransferRequest::post(url, RequestBody::json(br#"{"kind":"plain"}"#.to_vec())),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let requests = remote.requests();
        let last = requests.last().unwrap();
        assert_eq!(last.method, "POST");
        assert_eq!(last.path, "/job/app/config-accept");
        assert_eq!(last.body, br#"{"kind":"plain"}"#);
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let remote = MockRemote::start().await;
        remote.redirect("/a", "/b");
        remote.redirect("/b", "/a");
        let client = client(&remote);

        let err = client
            .execute(
                TransferRequest::get(remote.url().join("a").unwrap()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::TooManyRedirects { .. }));
        assert_eq!(remote.requests().len(), MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn login_precedes_request_when_credentials_set() {
        let remote = MockRemote::start().await;
        remote.require_login("deploy", "s3cret&x");
        let mut endpoint = remote.endpoint();
        endpoint.credentials = Some(Credentials {
            login: "deploy".into(),
            password: "s3cret&x".into(),
        });
        let client = TransferClient::new(endpoint, Duration::from_secs(5));

        client
            .execute(
                TransferRequest::get(remote.url().clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let paths: Vec<_> = remote.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths[0], "/loginEntry");
        assert_eq!(paths[1], "/j_security_check");
        assert_eq!(paths.last().unwrap(), "/");
    }

    #[tokio::test]
    async fn missing_login_is_rejected() {
        let remote = MockRemote::start().await;
        remote.require_login("deploy", "secret");
        let client = client(&remote);

        let err = client
            .execute(
                TransferRequest::get(remote.url().clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exchange().unwrap().status, 403);
    }

    #[tokio::test]
    async fn probe_returns_failure_statuses() {
        let remote = MockRemote::start().await;
        let client = client(&remote);

        let url = endpoints::project(remote.url(), &"missing".into()).unwrap();
        let response = client.probe(url, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn cancelled_request_is_aborted() {
        let remote = MockRemote::start().await;
        let client = client(&remote);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .execute(TransferRequest::get(remote.url().clone()), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn connection_refused_is_connectivity() {
        let endpoint = RemoteEndpoint {
            url: Url::parse("http://127.0.0.1:1/").unwrap(),
            credentials: None,
        };
        let client = TransferClient::new(endpoint, Duration::from_secs(2));

        let err = client
            .execute(
                TransferRequest::get(client.base().clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Connectivity { .. }));
    }

    #[test]
    fn form_body_is_urlencoded() {
        let body = RequestBody::form(&[("j_password", "a b&c=d"), ("action", "login")]);
        match body {
            RequestBody::Bytes { content_type, data } => {
                assert_eq!(content_type, FORM);
                assert_eq!(
                    String::from_utf8(data).unwrap(),
                    "j_password=a%20b%26c%3Dd&action=login"
                );
            }
            other => panic!("unexpected body {other:?}"),
        }
    }
}
