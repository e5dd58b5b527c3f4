//! Elasticsearch request bodies for each [`BackendQuery`] shape.

use super::{BackendQuery, SearchRequest};
use crate::language;
use serde_json::{json, Value};

/// Constant added to cosine similarity so combined scores stay positive.
pub const SIMILARITY_BIAS: f64 = 1.0;

const TEXT_FIELDS: [&str; 3] = ["title^3", "description^2", "body"];

/// Renders the full `_search` body for a request.
pub fn render(request: &SearchRequest) -> Value {
    match &request.query {
        BackendQuery::DomainExpression { domain, expression } => {
            let mut body = json!({
                "query": weighted(json!({
                    "bool": {
                        "filter": [{ "term": { "domain": domain } }],
                        "must": [text_match(expression)],
                    }
                })),
                "highlight": highlight(),
            });
            paginate(&mut body, request);
            body
        }
        BackendQuery::Domain { domain } => {
            let mut body = json!({ "query": { "term": { "domain": domain } } });
            paginate(&mut body, request);
            body
        }
        BackendQuery::PerDomainTop {
            expression,
            buckets,
        } => per_domain(weighted(text_match(expression)), *buckets),
        BackendQuery::Similarity {
            expression,
            field,
            vector,
            buckets,
        } => per_domain(similarity(expression, field, vector), *buckets),
        BackendQuery::TitleTerms { expression } => {
            let mut body = json!({
                "query": {
                    "simple_query_string": {
                        "query": expression,
                        "fields": ["title"],
                        "default_operator": "and",
                    }
                }
            });
            paginate(&mut body, request);
            body
        }
    }
}

/// Body listing documents that lack a value for `field`.
pub fn missing_field(field: &str, limit: usize) -> Value {
    json!({
        "size": limit,
        "query": { "bool": { "must_not": { "exists": { "field": field } } } },
        "_source": source_filter(),
    })
}

/// Index settings and mappings for a per-language document collection.
pub fn document_collection(language_code: &str, vector_dims: &[(&str, usize)]) -> Value {
    let analyzer = language::analyzer(language_code).unwrap_or("standard");
    let mut properties = json!({
        "url": { "type": "keyword" },
        "domain": { "type": "keyword" },
        "title": { "type": "text", "analyzer": analyzer },
        "description": { "type": "text", "analyzer": analyzer },
        "body": { "type": "text", "analyzer": analyzer },
        "weight": { "type": "long" },
        "thumbnail": { "type": "keyword", "index": false },
    });
    for (field, dims) in vector_dims {
        properties[*field] = json!({ "type": "dense_vector", "dims": dims });
    }
    json!({
        "settings": { "number_of_shards": 1, "number_of_replicas": 0 },
        "mappings": { "properties": properties },
    })
}

/// Index settings and mappings for the domain registry.
pub fn domain_collection() -> Value {
    json!({
        "settings": { "number_of_shards": 1, "number_of_replicas": 0 },
        "mappings": {
            "properties": {
                "homepage": { "type": "keyword" },
                "domain": { "type": "keyword" },
                "email": { "type": "keyword" },
                "last_crawl": { "type": "date" },
            }
        },
    })
}

fn text_match(expression: &str) -> Value {
    json!({ "multi_match": { "query": expression, "fields": TEXT_FIELDS } })
}

// Adds log10(2 + weight) to relevance; weights bottom out at -1 so the
// contribution is never negative.
fn weighted(query: Value) -> Value {
    json!({
        "function_score": {
            "query": query,
            "field_value_factor": { "field": "weight", "modifier": "log2p", "missing": 0 },
            "boost_mode": "sum",
        }
    })
}

fn similarity(expression: &str, field: &str, vector: &[f32]) -> Value {
    json!({
        "script_score": {
            "query": {
                "bool": {
                    "filter": [{ "exists": { "field": field } }],
                    "must": [{
                        "multi_match": {
                            "query": expression,
                            "type": "best_fields",
                            "fields": ["title"],
                        }
                    }],
                }
            },
            "script": {
                "source": format!("cosineSimilarity(params.query_vector, '{field}') + {SIMILARITY_BIAS:.1}"),
                "params": { "query_vector": vector },
            },
        }
    })
}

fn per_domain(query: Value, buckets: usize) -> Value {
    json!({
        "size": 0,
        "query": query,
        "aggs": {
            "per_domain": {
                "terms": { "field": "domain", "size": buckets.max(1) },
                "aggs": {
                    "top_results": {
                        "top_hits": {
                            "size": 1,
                            "_source": source_filter(),
                            "highlight": highlight(),
                        }
                    }
                },
            }
        },
    })
}

fn highlight() -> Value {
    json!({ "fields": { "description": {}, "body": {} } })
}

fn source_filter() -> Value {
    json!({ "excludes": ["*_vector"] })
}

fn paginate(body: &mut Value, request: &SearchRequest) {
    body["from"] = json!(request.from);
    body["size"] = json!(request.size);
    body["_source"] = source_filter();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: BackendQuery) -> SearchRequest {
        SearchRequest {
            collection: "web-*".into(),
            query,
            from: 20,
            size: 10,
        }
    }

    #[test]
    fn domain_expression_filters_and_paginates() {
        let body = render(&request(BackendQuery::DomainExpression {
            domain: "example.com".into(),
            expression: "pasta".into(),
        }));
        let inner = &body["query"]["function_score"]["query"]["bool"];
        assert_eq!(inner["filter"][0]["term"]["domain"], "example.com");
        assert_eq!(inner["must"][0]["multi_match"]["query"], "pasta");
        assert_eq!(body["from"], 20);
        assert_eq!(body["size"], 10);
        assert!(body["highlight"]["fields"]["description"].is_object());
    }

    #[test]
    fn per_domain_keeps_one_hit_per_bucket() {
        let body = render(&request(BackendQuery::PerDomainTop {
            expression: "pasta".into(),
            buckets: 500,
        }));
        assert_eq!(body["size"], 0);
        assert!(body.get("from").is_none());
        let terms = &body["aggs"]["per_domain"];
        assert_eq!(terms["terms"]["field"], "domain");
        assert_eq!(terms["terms"]["size"], 500);
        assert_eq!(terms["aggs"]["top_results"]["top_hits"]["size"], 1);
    }

    #[test]
    fn similarity_script_offsets_cosine() {
        let body = render(&request(BackendQuery::Similarity {
            expression: "pasta".into(),
            field: "bert_vector".into(),
            vector: vec![0.5, 0.5],
            buckets: 10,
        }));
        let script = &body["query"]["script_score"]["script"];
        assert_eq!(
            script["source"],
            "cosineSimilarity(params.query_vector, 'bert_vector') + 1.0"
        );
        assert_eq!(script["params"]["query_vector"], json!([0.5, 0.5]));
    }

    #[test]
    fn document_mapping_uses_language_analyzer() {
        let body = document_collection("fr", &[("bert_vector", 768)]);
        let props = &body["mappings"]["properties"];
        assert_eq!(props["title"]["analyzer"], "french");
        assert_eq!(props["bert_vector"]["dims"], 768);
    }
}
