//! Wire-level tests for the Qdrant REST client against a mock server, using
//! the deterministic mock embedder so no model service is needed.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use recollect::{Conversation, Distance, QdrantIndex, SimpleEmbedder, VectorIndex};

fn conversation() -> Conversation {
    Conversation {
        chat_id: 859761464,
        conversation_id: 1700000000,
        start_timestamp: 1700000000,
        end_timestamp: 1700000100,
        texts: "ann: hello\nbob: hi".to_string(),
    }
}

fn index(base_url: String) -> QdrantIndex {
    QdrantIndex::new(
        base_url,
        "conversation".to_string(),
        Distance::Cosine,
        Arc::new(SimpleEmbedder::new_mock()),
    )
}

#[tokio::test]
async fn test_ensure_collection_creates_when_missing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collections/conversation"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/collections/conversation"))
        .and(body_partial_json(json!({
            "vectors": {"size": 768, "distance": "Cosine"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
        .expect(1)
        .mount(&server)
        .await;

    index(server.uri()).ensure_collection().await.unwrap();
}

#[tokio::test]
async fn test_ensure_collection_is_a_noop_when_present() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collections/conversation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    index(server.uri()).ensure_collection().await.unwrap();
}

#[tokio::test]
async fn test_upsert_sends_deterministic_point_ids() {
    let server = MockServer::start().await;
    let conversation = conversation();
    let point_id = conversation.point_id().to_string();

    Mock::given(method("PUT"))
        .and(path("/collections/conversation/points"))
        .and(query_param("wait", "true"))
        .and(body_partial_json(json!({
            "points": [{
                "id": point_id,
                "payload": {
                    "chat_id": 859761464,
                    "conversation_id": 1700000000,
                    "start_timestamp": 1700000000,
                    "end_timestamp": 1700000100,
                    "texts": "ann: hello\nbob: hi",
                }
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    index(server.uri()).upsert(&[conversation]).await.unwrap();
}

#[tokio::test]
async fn test_upsert_surfaces_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/collections/conversation/points"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;

    let err = index(server.uri())
        .upsert(&[conversation()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_similarity_search_parses_hits() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/conversation/points/search"))
        .and(body_partial_json(json!({"limit": 2, "with_payload": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {
                    "id": "11111111-1111-1111-1111-111111111111",
                    "score": 0.91,
                    "payload": {"texts": "ann: hello", "chat_id": 1}
                },
                {
                    "id": "22222222-2222-2222-2222-222222222222",
                    "score": 0.42,
                    "payload": {"texts": "bob: bye", "chat_id": 2}
                }
            ],
            "status": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let hits = index(server.uri())
        .similarity_search("greeting", 2)
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].texts, "ann: hello");
    assert!((hits[0].score - 0.91).abs() < 1e-6);
    assert_eq!(hits[1].payload["chat_id"], 2);
}
