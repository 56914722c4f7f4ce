//! Fetch-and-reconcile cycles against a mocked API and the in-memory store

mod common;

use common::{api_config, day, init_test_tracing, PagedReport};
use perfsync_ingest::fetcher::{FetchSettings, Fetcher, HttpReportSource, ReportDimensions};
use perfsync_ingest::pipeline::SyncPipeline;
use perfsync_ingest::reconcile::Reconciler;
use perfsync_ingest::store::{MemoryStore, RetryPolicy, StoreError, StoreGateway};
use perfsync_ingest::SyncError;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

async fn mock_api(report: PagedReport) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/report"))
        .respond_with(report)
        .mount(&server)
        .await;
    server
}

fn pipeline(server: &MockServer, settings: FetchSettings) -> SyncPipeline<HttpReportSource, MemoryStore> {
    let fetcher = Fetcher::new(HttpReportSource::new(&api_config(server)).unwrap(), settings);
    let gateway = StoreGateway::new(MemoryStore::new(), RetryPolicy::new(3, Duration::from_millis(10), 2.0));
    SyncPipeline::new(fetcher, Reconciler::new(gateway))
}

#[tokio::test]
async fn test_sync_inserts_then_resync_modifies() {
    init_test_tracing();
    let server = mock_api(PagedReport::new(2500).staggered(Duration::from_millis(5))).await;
    let pipeline = pipeline(&server, FetchSettings::default());

    let first = pipeline.sync(ReportDimensions::CampaignSubId, day(15)).await.unwrap();
    let second = pipeline.sync(ReportDimensions::CampaignSubId, day(15)).await.unwrap();

    assert_eq!(first.fetched, 2500);
    assert_eq!(first.inserted(), 2500);
    assert_eq!(second.inserted(), 0);
    assert_eq!(second.modified(), 2500);
    assert_eq!(pipeline.reconciler().gateway().store().len(), 2500);
}

#[tokio::test]
async fn test_sync_summary_reports_lost_pages() {
    let server = mock_api(PagedReport::new(2500).failing_at(2000)).await;
    let pipeline = pipeline(&server, FetchSettings::default());

    let summary = pipeline.sync(ReportDimensions::Zone, day(15)).await.unwrap();

    assert_eq!(summary.fetched, 2000);
    assert_eq!(summary.fetch.failed_offsets, vec![2000]);
    assert_eq!(summary.fetch.missing_records(), 500);
    assert!(summary.failed_keys().is_empty());
}

#[tokio::test]
async fn test_sync_fails_when_store_fails_fatally() {
    let server = mock_api(PagedReport::new(20)).await;
    let pipeline = pipeline(&server, FetchSettings::default());
    pipeline
        .reconciler()
        .gateway()
        .store()
        .fail_next([StoreError::backend("E11000 duplicate key error")]);

    let err = pipeline.sync(ReportDimensions::Isp, day(15)).await.unwrap_err();

    assert!(matches!(err, SyncError::Store(_)));
}

#[tokio::test]
async fn test_backfill_runs_every_pass_in_order() {
    let server = mock_api(PagedReport::new(30)).await;
    let settings = FetchSettings {
        page_size: 10,
        batch_width: 2,
    };
    let pipeline = pipeline(&server, settings).with_backfill_concurrency(3);
    let reports = [ReportDimensions::Zone, ReportDimensions::Isp];
    let dates = [day(2), day(1)];

    let passes = pipeline.backfill(&reports, &dates).await;

    let order: Vec<_> = passes.iter().map(|p| (p.date, p.dimensions)).collect();
    assert_eq!(
        order,
        vec![
            (day(1), ReportDimensions::Isp),
            (day(1), ReportDimensions::Zone),
            (day(2), ReportDimensions::Isp),
            (day(2), ReportDimensions::Zone),
        ]
    );
    for pass in &passes {
        let summary = pass.result.as_ref().unwrap();
        assert_eq!(summary.fetched, 30);
        assert_eq!(summary.inserted(), 30);
    }
    assert_eq!(pipeline.reconciler().gateway().store().len(), 120);
}

#[tokio::test]
async fn test_backfill_continues_past_a_failed_pass() {
    let server = mock_api(PagedReport::new(15)).await;
    let pipeline = pipeline(&server, FetchSettings::default()).with_backfill_concurrency(2);
    pipeline
        .reconciler()
        .gateway()
        .store()
        .fail_next([StoreError::backend("document failed validation")]);

    let passes = pipeline
        .backfill(&[ReportDimensions::Country], &[day(1), day(2), day(3)])
        .await;

    assert_eq!(passes.len(), 3);
    assert_eq!(passes.iter().filter(|p| p.result.is_err()).count(), 1);
    assert_eq!(pipeline.reconciler().gateway().store().len(), 30);
}
