//! End-to-end retrieval tests against mocked source backends.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::json;
use tokio::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use filinglens_core::config::RetrievalConfig;
use filinglens_core::fetch::{
    AnnouncementFetcher, FilingFetcher, RetrievalQuery, SourceFetcher, TranscriptFetcher,
};
use filinglens_core::RateLimiter;

fn test_config(server: &MockServer) -> RetrievalConfig {
    let mut config = RetrievalConfig::default();
    config.filings_base_url = server.uri();
    config.announcements_base_url = server.uri();
    config.transcripts_base_url = server.uri();
    config.fetch_retries = 1;
    config.retry_delay_ms = 0;
    config.page_size = 2;
    config
}

fn limiter() -> Arc<RateLimiter> {
    // Wide open so tests never sleep.
    Arc::new(RateLimiter::new(10_000, Duration::from_secs(1)))
}

/// A date comfortably inside a 3-year lookback window.
fn recent_date() -> chrono::NaiveDate {
    Utc::now().date_naive()
}

/// A date comfortably outside a 3-year lookback window.
fn stale_date() -> chrono::NaiveDate {
    let today = Utc::now().date_naive();
    chrono::NaiveDate::from_ymd_opt(today.year() - 6, 6, 15).unwrap()
}

mod filings {
    use super::*;

    fn ticker_map() -> serde_json::Value {
        json!({
            "0": {"cik_str": 320193, "ticker": "ACME", "title": "Acme Corp"}
        })
    }

    #[tokio::test]
    async fn lists_selected_forms_and_stops_before_old_batches() {
        let server = MockServer::start().await;
        let recent = recent_date().format("%Y-%m-%d").to_string();
        let stale = stale_date().format("%Y-%m-%d").to_string();

        Mock::given(method("GET"))
            .and(path("/files/company_tickers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_map()))
            .mount(&server)
            .await;

        // The recent block already reaches past the cutoff, so the
        // historical batch must never be requested.
        Mock::given(method("GET"))
            .and(path("/submissions/CIK0000320193.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "filings": {
                    "recent": {
                        "form": ["10-K", "4", "10-Q"],
                        "accessionNumber": ["0001-23-000001", "0001-23-000002", "0001-23-000003"],
                        "filingDate": [recent, recent, stale],
                        "primaryDocument": ["annual.htm", "insider.htm", "quarter.htm"],
                    },
                    "files": [{"name": "CIK0000320193-submissions-001.json"}],
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/submissions/CIK0000320193-submissions-001.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = FilingFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("acme", 3)).await.unwrap();

        // Form "4" is not selected; the stale 10-Q predates the cutoff.
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type, "10-K");
        assert_eq!(
            docs[0].url,
            format!(
                "{}/Archives/edgar/data/320193/000123000001/annual.htm",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn walks_historical_batches_until_cutoff() {
        let server = MockServer::start().await;
        let recent = recent_date().format("%Y-%m-%d").to_string();
        let stale = stale_date().format("%Y-%m-%d").to_string();

        Mock::given(method("GET"))
            .and(path("/files/company_tickers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_map()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/submissions/CIK0000320193.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "filings": {
                    "recent": {
                        "form": ["10-K"],
                        "accessionNumber": ["0001-26-000001"],
                        "filingDate": [recent],
                        "primaryDocument": ["annual.htm"],
                    },
                    "files": [
                        {"name": "batch-1.json"},
                        {"name": "batch-2.json"},
                    ],
                }
            })))
            .mount(&server)
            .await;

        // First batch reaches past the cutoff, so the second must not
        // be fetched.
        Mock::given(method("GET"))
            .and(path("/submissions/batch-1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "form": ["10-Q"],
                "accessionNumber": ["0001-20-000001"],
                "filingDate": [stale],
                "primaryDocument": ["old.htm"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/submissions/batch-2.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = FilingFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("ACME", 3)).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type, "10-K");
    }

    #[tokio::test]
    async fn unknown_ticker_yields_empty_list() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files/company_tickers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ticker_map()))
            .mount(&server)
            .await;

        let fetcher = FilingFetcher::new(&test_config(&server), limiter());
        let docs = fetcher
            .list(&RetrievalQuery::new("NOSUCH", 3))
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn download_extracts_markup() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/Archives/edgar/data/1/doc.htm"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>Net revenue grew 12%.</p></body></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = FilingFetcher::new(&test_config(&server), limiter());
        let doc = filinglens_core::Document::new(
            filinglens_core::SourceKind::Filing,
            "10-K",
            recent_date(),
            format!("{}/Archives/edgar/data/1/doc.htm", server.uri()),
            "10-K",
        );

        let content = fetcher.download(&doc).await.unwrap();
        assert!(content.contains("Net revenue grew 12%."));
    }
}

mod announcements {
    use super::*;

    fn row(title: &str, link: &str, date: chrono::NaiveDate) -> serde_json::Value {
        // The listing feed stamps rows with a time of day.
        let stamp = date.and_hms_opt(17, 30, 0).unwrap();
        json!({
            "TITLE": title,
            "FILE_LINK": link,
            "DATE_TIME": stamp.format("%d/%m/%Y %H:%M").to_string(),
        })
    }

    #[tokio::test]
    async fn pages_until_cutoff_and_keeps_result_announcements() {
        let server = MockServer::start().await;
        let recent = recent_date();
        let stale = stale_date();

        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .and(query_param("rowRange", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 6,
                "result": [
                    row("2025 Final Results Announcement", "/listedco/final.pdf", recent),
                    row("Change of registered office", "/listedco/office.pdf", recent),
                ],
            })))
            .mount(&server)
            .await;

        // Second page's oldest row predates the cutoff: paging stops.
        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .and(query_param("rowRange", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 6,
                "result": [
                    row("Interim Results", "/listedco/interim.pdf", recent),
                    row("2019 Final Results", "/listedco/ancient.pdf", stale),
                ],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .and(query_param("rowRange", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 6, "result": []})))
            .expect(0)
            .mount(&server)
            .await;

        let mut query = RetrievalQuery::new("700", 3);
        query.sources.announcements = true;

        let fetcher = AnnouncementFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&query).await.unwrap();

        // Non-result headlines and stale rows are dropped.
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"2025 Final Results Announcement"));
        assert!(titles.contains(&"Interim Results"));
        assert_eq!(docs[0].doc_type, "Final Results");
        assert!(docs.iter().all(|d| d.url.starts_with(&server.uri())));
    }

    #[tokio::test]
    async fn malformed_rows_do_not_stop_pagination() {
        let server = MockServer::start().await;
        let recent = recent_date();

        // A full first page with one unusable row: the raw row count
        // still advances the offset, so the next page is requested.
        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .and(query_param("rowRange", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 4,
                "result": [
                    row("2025 Final Results Announcement", "/listedco/final.pdf", recent),
                    {"TITLE": "Interim Results", "FILE_LINK": "/listedco/bad.pdf", "DATE_TIME": "not a date"},
                ],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .and(query_param("rowRange", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 4,
                "result": [
                    row("Quarterly Results", "/listedco/q.pdf", recent),
                    row("Notice of board meeting", "/listedco/board.pdf", recent),
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = AnnouncementFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("700", 3)).await.unwrap();

        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"2025 Final Results Announcement"));
        assert!(titles.contains(&"Quarterly Results"));
    }

    #[tokio::test]
    async fn duplicate_rows_collapse_to_one_document() {
        let server = MockServer::start().await;
        let recent = recent_date();

        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 2,
                "result": [
                    row("Interim Results", "/listedco/interim.pdf", recent),
                    row("Interim Results", "/listedco/interim.pdf", recent),
                ],
            })))
            .mount(&server)
            .await;

        let fetcher = AnnouncementFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("700", 3)).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn other_forms_flag_admits_plain_announcements() {
        let server = MockServer::start().await;
        let recent = recent_date();

        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "result": [row("Change of registered office", "/x.pdf", recent)],
            })))
            .mount(&server)
            .await;

        let mut query = RetrievalQuery::new("700", 3);
        query.include_other_forms = true;

        let fetcher = AnnouncementFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&query).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type, "Announcement");
    }

    #[tokio::test]
    async fn handles_double_encoded_result_payload() {
        let server = MockServer::start().await;
        let recent = recent_date();

        let rows = json!([row("Quarterly Results", "/q.pdf", recent)]);
        Mock::given(method("GET"))
            .and(path("/search/titleSearchServlet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "result": rows.to_string(),
            })))
            .mount(&server)
            .await;

        let fetcher = AnnouncementFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("700", 3)).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type, "Quarterly Results");
    }
}

mod transcripts {
    use super::*;

    fn quarter_page(date: chrono::NaiveDate, content: &str) -> String {
        format!(
            r#"<html><body><textarea id="AIInsightsContent">{}</textarea></body></html>"#,
            json!({"date": date.format("%Y-%m-%d").to_string(), "content": content}),
        )
    }

    #[tokio::test]
    async fn lists_quarters_with_content_attached() {
        let server = MockServer::start().await;
        let recent = recent_date();
        let stale = stale_date();

        let index = format!(
            r#"<html><body>
                <a href="/company/ACME/transcripts/{y1}/2/">Q2</a>
                <a href="/company/ACME/transcripts/{y0}/4/">old</a>
                <a href="/company/ACME/about/">not a quarter</a>
            </body></html>"#,
            y1 = recent.year(),
            y0 = stale.year(),
        );

        Mock::given(method("GET"))
            .and(path("/company/ACME/transcripts/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/company/ACME/transcripts/{}/2/", recent.year())))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(quarter_page(recent, "Operator: Good morning.")),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/company/ACME/transcripts/{}/4/", stale.year())))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(quarter_page(stale, "Old call.")),
            )
            .mount(&server)
            .await;

        let fetcher = TranscriptFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("acme", 3)).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].title,
            format!("ACME FY{} Q2 earnings call", recent.year())
        );
        assert_eq!(docs[0].content.as_deref(), Some("Operator: Good morning."));

        // Content was attached at listing time; download serves it back
        // without another request.
        let content = fetcher.download(&docs[0]).await.unwrap();
        assert_eq!(content, "Operator: Good morning.");
    }

    #[tokio::test]
    async fn quarter_without_payload_is_skipped() {
        let server = MockServer::start().await;
        let recent = recent_date();

        let index = format!(
            r#"<a href="/company/ACME/transcripts/{y}/1/">Q1</a>"#,
            y = recent.year(),
        );
        Mock::given(method("GET"))
            .and(path("/company/ACME/transcripts/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/company/ACME/transcripts/{}/1/", recent.year())))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no payload</html>"))
            .mount(&server)
            .await;

        let fetcher = TranscriptFetcher::new(&test_config(&server), limiter());
        let docs = fetcher.list(&RetrievalQuery::new("ACME", 3)).await.unwrap();
        assert!(docs.is_empty());
    }
}
