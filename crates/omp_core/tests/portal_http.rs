use mockito::{Matcher, Server};
use omp_core::error::{Error, ErrorKind};
use omp_core::extract::{TextExtractor, TikaExtractor};
use omp_core::fetch::{Fetcher, HttpTransport, Portal, RetryPolicy, Transport};
use omp_core::progress::NullProgress;
use omp_core::schema::{DocumentRecord, MeetingRecord, SnippetRecord};
use omp_core::{DocumentStore, IngestOptions, Pipeline, ResourceType};
use std::sync::Arc;
use std::time::Duration;

const MEETING: &str = include_str!("fixtures/meeting_1009540.html");
const DASHBOARD: &str = include_str!("fixtures/body_dashboard.html");
const DIRECTORY: &str = include_str!("fixtures/body_directory.html");
const MEMBERS: &str = include_str!("fixtures/body_members.html");

const TIKA_HTML: &str = "<html><body><p>Call to order</p>\n<p>  Approval of\n minutes </p><p> </p></body></html>";

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).unwrap()
}

fn no_wait(max_tries: u32) -> RetryPolicy {
    RetryPolicy {
        max_tries,
        wait: Duration::ZERO,
    }
}

#[tokio::test]
async fn capture_stamp_comes_from_date_header() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/OpenMeetingsPublic/ViewMeetingDetailByID")
        .match_query(Matcher::UrlEncoded("MeetingID".into(), "1009540".into()))
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_header("date", "Wed, 02 Jun 2021 13:02:00 GMT")
        .with_body(MEETING)
        .create_async()
        .await;

    let portal = Portal::new(&server.url());
    let page = transport().get(&portal.meeting_url(1009540)).await.unwrap();

    mock.assert_async().await;
    assert!(page.is_success());
    assert_eq!(page.stamp, 1_622_638_920);
    assert!(page.text().contains("Providence Board of Licenses"));
}

#[tokio::test]
async fn server_errors_exhaust_the_retry_budget() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/OpenMeetingsPublic/OpenMeetingDashboard")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let fetcher = Fetcher::new(transport(), Portal::new(&server.url()), no_wait(2));
    let err = fetcher
        .fetch_page(&fetcher.portal().dashboard_url(4749))
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), ErrorKind::TransientFetch);
    assert!(matches!(err, Error::Fetch { tries: 2, .. }));
}

#[tokio::test]
async fn tika_receives_pdf_and_answers_html() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", "/tika")
        .match_header("content-type", "application/pdf")
        .match_header("accept", "text/html")
        .match_body("%PDF-1.4 test")
        .with_status(200)
        .with_body(TIKA_HTML)
        .create_async()
        .await;

    let tika = TikaExtractor::new(&format!("{}/tika", server.url()), Duration::from_secs(5)).unwrap();
    let text = tika.extract_text(b"%PDF-1.4 test".to_vec()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(
        omp_core::extract::split_snippets(&text),
        vec!["Call to order", "Approval of minutes"]
    );
}

#[tokio::test]
async fn tika_failure_is_an_extraction_error() {
    let mut server = Server::new_async().await;
    server
        .mock("PUT", "/tika")
        .with_status(500)
        .create_async()
        .await;

    let tika = TikaExtractor::new(&format!("{}/tika", server.url()), Duration::from_secs(5)).unwrap();
    let err = tika.extract_text(b"%PDF".to_vec()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extraction);
}

#[tokio::test]
async fn meeting_ingest_over_http_stores_documents_and_snippets() {
    let mut server = Server::new_async().await;
    let mut body_mocks = Vec::new();
    for (path, page) in [
        ("/OpenMeetingsPublic/OpenMeetingDashboard", DASHBOARD),
        ("/OpenMeetingsPublic/GovDirectory", DIRECTORY),
        ("/OpenMeetingsPublic/BoardMembers", MEMBERS),
    ] {
        let mock = server
            .mock("GET", path)
            .match_query(Matcher::UrlEncoded("EntityID".into(), "4749".into()))
            .with_status(200)
            .with_body(page)
            .create_async()
            .await;
        body_mocks.push(mock);
    }
    server
        .mock("GET", "/OpenMeetingsPublic/ViewMeetingDetailByID")
        .match_query(Matcher::UrlEncoded("MeetingID".into(), "1009540".into()))
        .with_status(200)
        .with_body(MEETING)
        .create_async()
        .await;
    let downloads = server
        .mock("GET", "/Common/DownloadMeetingFiles")
        .match_query(Matcher::Regex("FilePath=%2FNotices%2F4749%2F2021%2F39700[78]\\.pdf".into()))
        .with_status(200)
        .with_body("%PDF-1.4")
        .expect(2)
        .create_async()
        .await;
    server
        .mock("PUT", "/tika")
        .with_status(200)
        .with_body(TIKA_HTML)
        .expect(2)
        .create_async()
        .await;

    let fetcher = Fetcher::new(transport(), Portal::new(&server.url()), no_wait(1));
    let tika = TikaExtractor::new(&format!("{}/tika", server.url()), Duration::from_secs(5)).unwrap();
    let pipeline = Arc::new(Pipeline::new(
        DocumentStore::open_in_memory().unwrap(),
        fetcher,
        Some(tika),
    ));
    let options = IngestOptions {
        workers: 2,
        ..IngestOptions::default()
    };

    let bodies = pipeline
        .ingest(ResourceType::Body, 4749..4750, &options, &mut NullProgress)
        .await
        .unwrap();
    assert_eq!(bodies.counts.stored, 1);
    for mock in &body_mocks {
        mock.assert_async().await;
    }

    let meetings = pipeline
        .ingest(ResourceType::Meeting, 1009540..1009541, &options, &mut NullProgress)
        .await
        .unwrap();
    assert_eq!(meetings.counts.stored, 1, "{:?}", meetings.results);
    downloads.assert_async().await;

    let store = pipeline.store();
    let meeting: MeetingRecord = store
        .find_record(ResourceType::Meeting, 1009540)
        .unwrap()
        .unwrap();
    assert_eq!(meeting.body, 4749);
    assert_eq!(meeting.agendas.len(), 2);
    assert!(meeting.minutes.is_empty());

    let agenda: DocumentRecord = store
        .find_record(ResourceType::Document, meeting.agendas[0])
        .unwrap()
        .unwrap();
    assert_eq!(agenda.snippets.len(), 2);
    let first: SnippetRecord = store
        .find_record(ResourceType::Snippet, agenda.snippets[0])
        .unwrap()
        .unwrap();
    assert_eq!(first.text, "Call to order");
    assert_eq!(store.count(ResourceType::Snippet).unwrap(), 4);

    pipeline.shutdown().unwrap();
}
