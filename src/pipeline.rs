use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{info, warn};

use crate::fetch::MarketsClient;
use crate::model::CoinRow;
use crate::transform::{project, retain_tradable, stamp, DEFAULT_MIN_VOLUME};

pub const DEFAULT_PAGES: u32 = 8;
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Fetches listing pages concurrently and turns them into one cleaned batch.
pub struct MarketPipeline {
    client: MarketsClient,
    min_volume: f64,
}

impl MarketPipeline {
    pub fn new(client: MarketsClient) -> Self {
        Self {
            client,
            min_volume: DEFAULT_MIN_VOLUME,
        }
    }

    pub fn with_min_volume(mut self, min_volume: f64) -> Self {
        self.min_volume = min_volume;
        self
    }

    /// Requests pages `1..=total_pages` with at most `max_concurrency` in
    /// flight and returns the filtered, stamped batch.
    ///
    /// Pages complete in any order and failed pages contribute nothing. An
    /// empty batch means there is nothing to write.
    pub async fn run(&self, total_pages: u32, max_concurrency: usize) -> Vec<CoinRow> {
        let pages: Vec<Vec<Value>> = stream::iter(1..=total_pages)
            .map(|page| self.client.fetch_page(page))
            .buffer_unordered(max_concurrency.max(1))
            .collect()
            .await;

        let raw: Vec<Value> = pages.into_iter().flatten().collect();
        if raw.is_empty() {
            warn!("No assets returned from {} page(s)", total_pages);
            return Vec::new();
        }

        let captured_at = Utc::now();
        let kept = retain_tradable(project(&raw), self.min_volume);
        let batch = stamp(kept, captured_at);

        info!(
            "Collected {} raw assets from {} page(s), {} usable after filtering",
            raw.len(),
            total_pages,
            batch.len()
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ClientConfig;
    use crate::retry::RetryPolicy;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    fn pipeline_for(server: &ServerGuard) -> MarketPipeline {
        pipeline_at(format!("{}/coins/markets", server.url()))
    }

    fn pipeline_at(api_url: String) -> MarketPipeline {
        let config = ClientConfig {
            api_url,
            api_key: Some("test-key".into()),
            timeout: Duration::from_secs(5),
            pool_size: 2,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                ..RetryPolicy::default()
            },
        };
        MarketPipeline::new(MarketsClient::new(config).unwrap())
    }

    fn page_matcher(page: u32) -> Matcher {
        Matcher::UrlEncoded("page".into(), page.to_string())
    }

    fn assets(ids: &[(&str, Option<u64>, f64)]) -> String {
        let items: Vec<Value> = ids
            .iter()
            .map(|(id, rank, volume)| {
                json!({
                    "id": id,
                    "symbol": id,
                    "name": id,
                    "current_price": 10.0,
                    "market_cap": 1e9,
                    "total_volume": volume,
                    "market_cap_rank": rank,
                    "image": "ignored",
                })
            })
            .collect();
        Value::Array(items).to_string()
    }

    struct SlowListing {
        url: String,
        served: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    /// Holds every request for `hold` before answering `[]`, recording the
    /// most requests it ever had open at once.
    async fn slow_listing(hold: Duration) -> SlowListing {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/coins/markets", listener.local_addr().unwrap());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let served = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (counters_in, counters_served, counters_peak) =
            (in_flight.clone(), served.clone(), peak.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let (in_flight, served, peak) =
                    (counters_in.clone(), counters_served.clone(), counters_peak.clone());
                tokio::spawn(async move {
                    let mut head: Vec<u8> = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let open = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(open, Ordering::SeqCst);
                    tokio::time::sleep(hold).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    served.fetch_add(1, Ordering::SeqCst);

                    let response = "HTTP/1.1 200 OK\r\n\
                                    Content-Type: application/json\r\n\
                                    Content-Length: 2\r\n\
                                    Connection: close\r\n\r\n[]";
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        SlowListing { url, served, peak }
    }

    #[tokio::test]
    async fn test_requests_in_flight_never_exceed_concurrency() {
        let listing = slow_listing(Duration::from_millis(100)).await;

        let batch = pipeline_at(listing.url.clone()).run(8, 3).await;

        assert!(batch.is_empty());
        assert_eq!(listing.served.load(Ordering::SeqCst), 8);
        let peak = listing.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{} requests were in flight at once", peak);
        assert!(peak >= 2, "pages were fetched one at a time");
    }

    #[tokio::test]
    async fn test_single_worker_fetches_pages_one_at_a_time() {
        let listing = slow_listing(Duration::from_millis(20)).await;

        pipeline_at(listing.url.clone()).run(4, 1).await;

        assert_eq!(listing.served.load(Ordering::SeqCst), 4);
        assert_eq!(listing.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_page_contributes_nothing() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/coins/markets")
            .match_query(page_matcher(1))
            .with_status(200)
            .with_body(assets(&[("a", Some(1), 1e6), ("b", Some(2), 1e6)]))
            .create_async()
            .await;
        let broken = server
            .mock("GET", "/coins/markets")
            .match_query(page_matcher(2))
            .with_status(500)
            .expect(5)
            .create_async()
            .await;
        server
            .mock("GET", "/coins/markets")
            .match_query(page_matcher(3))
            .with_status(200)
            .with_body(assets(&[("c", Some(3), 1e6)]))
            .create_async()
            .await;

        let batch = pipeline_for(&server).run(3, 2).await;

        let ids: HashSet<_> = batch.iter().map(|r| r.id.clone().unwrap()).collect();
        let expected = ["a", "b", "c"].map(String::from);
        assert_eq!(ids, HashSet::from(expected));
        broken.assert_async().await;
    }

    #[tokio::test]
    async fn test_all_pages_failing_yields_empty_batch() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/coins/markets")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let batch = pipeline_for(&server).run(4, 2).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_zero_pages_makes_no_requests() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/coins/markets")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        assert!(pipeline_for(&server).run(0, 5).await.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rows_filtered_and_stamped() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/coins/markets")
            .match_query(page_matcher(1))
            .with_status(200)
            .with_body(assets(&[
                ("keep", Some(1), 1e6),
                ("unranked", None, 1e6),
                ("thin", Some(2), 50_000.0),
                ("edge", Some(3), 50_001.0),
            ]))
            .create_async()
            .await;

        let before = Utc::now();
        let batch = pipeline_for(&server).run(1, 0).await;
        let after = Utc::now();

        let ids: Vec<_> = batch.iter().map(|r| r.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["keep", "edge"]);
        assert!(batch.iter().all(|r| r.captured_at >= before && r.captured_at <= after));
    }

    #[tokio::test]
    async fn test_custom_volume_threshold() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/coins/markets")
            .match_query(page_matcher(1))
            .with_status(200)
            .with_body(assets(&[("a", Some(1), 900.0), ("b", Some(2), 1100.0)]))
            .create_async()
            .await;

        let batch = pipeline_for(&server).with_min_volume(1000.0).run(1, 1).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id.as_deref(), Some("b"));
    }
}
