//! Mock snapshot HTTP server
//!
//! Speaks the snapshot protocol: HEAD on the well-known endpoints answers
//! with a redirect whose Location names the archive, and GET serves the
//! archive body, optionally honoring Range requests with 206 responses.

use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub struct MockSnapshotServer {
    pub server: MockServer,
}

/// Serves a byte payload, slicing it per the Range header when range support
/// is enabled and rejecting ranged requests when it is not.
pub struct BodyResponder {
    data: Vec<u8>,
    support_range: bool,
    delay: Option<Duration>,
}

impl BodyResponder {
    pub fn new(data: Vec<u8>, support_range: bool) -> Self {
        Self {
            data,
            support_range,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn apply_delay(&self, template: ResponseTemplate) -> ResponseTemplate {
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

impl Respond for BodyResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        match range {
            Some((start, end)) if self.support_range => {
                let end = end.min(self.data.len() as u64 - 1);
                let slice = self.data[start as usize..=end as usize].to_vec();
                self.apply_delay(
                    ResponseTemplate::new(206)
                        .insert_header(
                            "Content-Range",
                            format!("bytes {}-{}/{}", start, end, self.data.len()).as_str(),
                        )
                        .set_body_bytes(slice),
                )
            }
            Some(_) => ResponseTemplate::new(416),
            None => self.apply_delay(ResponseTemplate::new(200).set_body_bytes(self.data.clone())),
        }
    }
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl MockSnapshotServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// The host:port address the mock listens on, as gossip would report it.
    pub fn address(&self) -> String {
        self.server.address().to_string()
    }

    /// HEAD on `endpoint` redirects to `location` (the filename carrier).
    pub async fn mock_head_redirect(&self, endpoint: &str, location: &str) {
        Mock::given(method("HEAD"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", location))
            .mount(&self.server)
            .await;
    }

    /// HEAD on `endpoint` answers with a bare status code.
    pub async fn mock_head_status(&self, endpoint: &str, status: u16) {
        Mock::given(method("HEAD"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve `data` at `/filename`: HEAD advertises the size (and Range
    /// support when enabled), GET returns the body.
    pub async fn mock_archive(&self, filename: &str, data: Vec<u8>, support_range: bool) {
        self.mock_archive_with_delay(filename, data, support_range, None)
            .await;
    }

    /// Same as `mock_archive`, with an artificial delay before the GET body
    /// is sent, useful for speed-gate and timeout scenarios.
    pub async fn mock_archive_with_delay(
        &self,
        filename: &str,
        data: Vec<u8>,
        support_range: bool,
        delay: Option<Duration>,
    ) {
        let archive_path = format!("/{}", filename);

        let mut head = ResponseTemplate::new(200)
            .insert_header("Content-Length", data.len().to_string().as_str());
        if support_range {
            head = head.insert_header("Accept-Ranges", "bytes");
        }
        Mock::given(method("HEAD"))
            .and(path(archive_path.clone()))
            .respond_with(head)
            .mount(&self.server)
            .await;

        let mut responder = BodyResponder::new(data, support_range);
        if let Some(delay) = delay {
            responder = responder.with_delay(delay);
        }
        Mock::given(method("GET"))
            .and(path(archive_path))
            .respond_with(responder)
            .mount(&self.server)
            .await;
    }

    /// Full protocol for one snapshot of the given kind: redirect plus body.
    pub async fn serve_snapshot(&self, endpoint: &str, filename: &str, data: Vec<u8>) {
        self.mock_head_redirect(endpoint, &format!("/{}", filename))
            .await;
        self.mock_archive(filename, data, true).await;
    }
}
