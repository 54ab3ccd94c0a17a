use crate::datetime::{Epoch, parse_http_date};
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// One response as the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: Vec<u8>,
    /// Capture instant, taken from the response `Date` header.
    pub stamp: Epoch,
}

impl FetchedPage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Raw GET access to the portal. Implementations do not retry.
pub trait Transport: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchedPage>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            wait: Duration::from_secs(10),
        }
    }
}

/// Runs `attempt` up to `policy.max_tries` times, sleeping `policy.wait`
/// between tries. A try fails when it errors or when `accept` rejects the
/// page.
pub async fn fetch_with_retry<F, Fut>(
    target: &str,
    policy: &RetryPolicy,
    accept: impl Fn(&FetchedPage) -> bool,
    mut attempt: F,
) -> Result<FetchedPage>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<FetchedPage>>,
{
    let tries = policy.max_tries.max(1);
    let mut last_error = String::new();

    for try_no in 1..=tries {
        match attempt().await {
            Ok(page) if accept(&page) => return Ok(page),
            Ok(page) => last_error = format!("rejected response, status {}", page.status),
            Err(err) => last_error = err.to_string(),
        }
        tracing::debug!(target, try_no, tries, error = %last_error, "fetch try failed");
        if try_no < tries {
            tokio::time::sleep(policy.wait).await;
        }
    }

    Err(Error::Fetch {
        target: target.to_string(),
        tries,
        last_error,
    })
}

/// URL builder for the open meetings portal.
#[derive(Debug, Clone)]
pub struct Portal {
    base_url: String,
}

impl Portal {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn meeting_url(&self, id: i64) -> String {
        format!(
            "{}/OpenMeetingsPublic/ViewMeetingDetailByID?MeetingID={id}",
            self.base_url
        )
    }

    pub fn dashboard_url(&self, id: i64) -> String {
        format!(
            "{}/OpenMeetingsPublic/OpenMeetingDashboard?subtopmenuId=201&EntityID={id}",
            self.base_url
        )
    }

    pub fn directory_url(&self, id: i64) -> String {
        format!(
            "{}/OpenMeetingsPublic/GovDirectory?subtopmenuID=202&EntityID={id}",
            self.base_url
        )
    }

    pub fn members_url(&self, id: i64) -> String {
        format!(
            "{}/OpenMeetingsPublic/BoardMembers?subtopmenuID=203&EntityID={id}",
            self.base_url
        )
    }

    pub fn document_url(&self, path: &str) -> String {
        let endpoint = format!("{}/Common/DownloadMeetingFiles", self.base_url);
        match reqwest::Url::parse_with_params(&endpoint, &[("FilePath", path)]) {
            Ok(url) => url.into(),
            Err(_) => format!("{endpoint}?FilePath={path}"),
        }
    }
}

/// The three sub-pages that together describe one body.
#[derive(Debug, Clone)]
pub struct BodyPages {
    pub dashboard: FetchedPage,
    pub directory: FetchedPage,
    pub members: FetchedPage,
}

pub struct Fetcher<T> {
    transport: T,
    portal: Portal,
    policy: RetryPolicy,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, portal: Portal, policy: RetryPolicy) -> Self {
        Self {
            transport,
            portal,
            policy,
        }
    }

    pub fn portal(&self) -> &Portal {
        &self.portal
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        fetch_with_retry(url, &self.policy, FetchedPage::is_success, || {
            self.transport.get(url)
        })
        .await
    }

    pub async fn fetch_meeting(&self, id: i64) -> Result<FetchedPage> {
        self.fetch_page(&self.portal.meeting_url(id)).await
    }

    /// Each sub-page retries on its own; any one failing fails the body.
    pub async fn fetch_body(&self, id: i64) -> Result<BodyPages> {
        let dashboard_url = self.portal.dashboard_url(id);
        let directory_url = self.portal.directory_url(id);
        let members_url = self.portal.members_url(id);
        let (dashboard, directory, members) = tokio::try_join!(
            self.fetch_page(&dashboard_url),
            self.fetch_page(&directory_url),
            self.fetch_page(&members_url),
        )?;
        Ok(BodyPages {
            dashboard,
            directory,
            members,
        })
    }

    pub async fn fetch_document(&self, path: &str) -> Result<FetchedPage> {
        self.fetch_page(&self.portal.document_url(path)).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("omp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<FetchedPage> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let stamp = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let body = response.bytes().await?.to_vec();
        Ok(FetchedPage {
            status,
            body,
            stamp,
        })
    }
}
