use std::sync::Arc;

use fastindex::fetch::FetchRequest;
use fastindex::planner::{self, QueryPlan};
use fastindex::{
    DocumentIndexer, FetchedPage, IndexOutcome, MemoryStore, NormalizationConfig, Normalizer,
    RankingAggregator,
};
use reqwest::header::HeaderMap;
use url::Url;

fn page(title: Option<&str>, description: Option<&str>, body: &str) -> String {
    let title = title.map(|t| format!("<title>{t}</title>")).unwrap_or_default();
    let description = description
        .map(|d| format!(r#"<meta name="description" content="{d}">"#))
        .unwrap_or_default();
    format!(
        "<!doctype html><html lang=\"en\"><head>{title}{description}</head>\
         <body><main><p>{body}</p></main></body></html>"
    )
}

async fn index(indexer: &DocumentIndexer, url: &str, html: String) {
    let request = FetchRequest::new(Url::parse(url).unwrap());
    let fetched = FetchedPage::new(request.url.clone(), 0, 200, HeaderMap::new(), html.into_bytes());
    let outcome = indexer.index_response(&request, &fetched).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Indexed(_)), "{url}: {outcome:?}");
}

async fn corpus() -> (Arc<MemoryStore>, RankingAggregator) {
    let store = Arc::new(MemoryStore::new());
    let indexer = DocumentIndexer::new(Normalizer::new(NormalizationConfig::default()), store.clone());
    index(
        &indexer,
        "https://example.com/carbonara",
        page(
            Some("Pasta carbonara"),
            Some("A classic pasta dish from Rome"),
            "Cook the pasta in salted water and keep some of the cooking water aside.",
        ),
    )
    .await;
    index(
        &indexer,
        "https://example.com/pesto",
        page(
            Some("Pesto alla genovese"),
            None,
            "Pound basil, garlic and pine nuts, then stir the pesto into warm pasta.",
        ),
    )
    .await;
    index(
        &indexer,
        "https://example.com/untitled",
        page(None, None, "Leftover pasta keeps for two days in a closed box in the fridge."),
    )
    .await;
    index(
        &indexer,
        "https://other.test/noodles",
        page(
            Some("Pasta and noodles"),
            Some("Comparing wheat and rice noodles"),
            "Most pasta is made from durum wheat while many noodles use rice flour.",
        ),
    )
    .await;
    index(
        &indexer,
        "https://bread.test/",
        page(
            Some("Sourdough"),
            Some("Slow bread"),
            "A starter, flour, water and salt are all a good loaf of bread needs.",
        ),
    )
    .await;
    let ranking = RankingAggregator::new(store.clone(), "en", 1000);
    (store, ranking)
}

#[tokio::test]
async fn site_scoped_text_returns_every_matching_page_by_score() {
    let (_, ranking) = corpus().await;
    let plan = planner::plan("site:example.com pasta");
    assert_eq!(
        plan,
        QueryPlan::DomainAndExpression {
            domain: "example.com".into(),
            expression: "pasta".into(),
        }
    );

    let page = ranking.execute(&plan, 0, 10).await.unwrap();
    assert_eq!(page.total, 3);
    let urls: Vec<&str> = page.results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
        urls,
        [
            "https://example.com/carbonara",
            "https://example.com/pesto",
            "https://example.com/untitled",
        ]
    );
    assert!(page.results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    // No title: the domain stands in.
    assert_eq!(page.results[2].title, "example.com");
    assert!(page.results.iter().all(|r| !r.description.is_empty()));
    assert!(page.results[0].description.contains("<em>pasta</em>"));
}

#[tokio::test]
async fn corpus_wide_text_keeps_one_page_per_domain() {
    let (_, ranking) = corpus().await;
    let plan = planner::plan("pasta");
    let page = ranking.execute(&plan, 0, 10).await.unwrap();
    assert_eq!(page.total, 2);
    let urls: Vec<&str> = page.results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, ["https://example.com/carbonara", "https://other.test/noodles"]);
}

#[tokio::test]
async fn pagination_is_consistent_with_the_full_page() {
    let (_, ranking) = corpus().await;
    for raw in ["pasta", "site:example.com pasta"] {
        let plan = planner::plan(raw);
        let full = ranking.execute(&plan, 0, 10).await.unwrap();
        let mut stitched = Vec::new();
        for offset in 0..full.results.len() {
            let single = ranking.execute(&plan, offset, 1).await.unwrap();
            assert_eq!(single.total, full.total, "{raw}");
            stitched.extend(single.results);
        }
        assert_eq!(stitched, full.results, "{raw}");
        let past_end = ranking.execute(&plan, 50, 10).await.unwrap();
        assert!(past_end.results.is_empty());
        assert_eq!(past_end.total, full.total);
    }
}

#[tokio::test]
async fn domain_only_and_empty_queries() {
    let (_, ranking) = corpus().await;
    let page = ranking.execute(&planner::plan("site:bread.test"), 0, 10).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.results[0].title, "Sourdough");

    let empty = ranking.execute(&planner::plan("   "), 0, 10).await.unwrap();
    assert_eq!(empty.total, 0);
    assert!(empty.results.is_empty());
}

#[tokio::test]
async fn indexed_pages_land_in_their_language_collection() {
    let (store, _) = corpus().await;
    assert_eq!(store.collection_names(), ["web-en"]);
    let docs = store.documents("web-en");
    assert_eq!(docs.len(), 5);
    let carbonara = docs.iter().find(|d| d.url.ends_with("/carbonara")).unwrap();
    assert_eq!(carbonara.weight, 3);
    let untitled = docs.iter().find(|d| d.url.ends_with("/untitled")).unwrap();
    assert_eq!(untitled.weight, 0);
}
