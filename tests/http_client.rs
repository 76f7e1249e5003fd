use std::time::Duration;

use httpmock::MockServer;
use pictura::application::pagination::ListingQuery;
use pictura::application::repos::{ImagesRepo, RepoError};
use pictura::config::ApiSettings;
use pictura::domain::Orientation;
use pictura::infra::http::HttpImagesRepo;
use pictura_api_types::UpdateImageRequest;
use serde_json::json;
use url::Url;

fn repo(server: &MockServer) -> HttpImagesRepo {
    HttpImagesRepo::new(&ApiSettings {
        base_url: Url::parse(&server.base_url()).expect("mock server url"),
        timeout: Duration::from_secs(5),
    })
    .expect("client builds")
}

#[tokio::test]
async fn list_sends_filters_as_query_pairs() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/api/images")
            .query_param("page", "2")
            .query_param("limit", "10")
            .query_param("tag", "cat")
            .query_param("orientation", "portrait");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"images":[{"id":"a","orientation":"portrait","tags":["cat"]}],"page":2,"total":11,"totalPages":2}"#);
    });

    let query = ListingQuery::new(2, 10, Some("cat".into()), Some(Orientation::Portrait))
        .expect("valid query");
    let page = repo(&server).list_images(&query).await.expect("page");
    mock.assert();
    assert_eq!(page.total, 11);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.images[0].id, "a");
}

#[tokio::test]
async fn detail_404_is_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/images/missing");
        then.status(404).body("no such image");
    });

    let err = repo(&server)
        .get_image("missing")
        .await
        .expect_err("not found");
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn detail_success_false_is_a_rejection() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/images/x");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":false,"message":"Image expired"}"#);
    });

    let err = repo(&server).get_image("x").await.expect_err("rejected");
    assert!(matches!(err, RepoError::Rejected { ref message } if message == "Image expired"));
}

#[tokio::test]
async fn update_puts_camel_case_body() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("PUT")
            .path("/api/images/a")
            .json_body(json!({ "tags": ["z"], "expiryMinutes": 30 }));
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":true,"image":{"id":"a","orientation":"square","tags":["z"]}}"#);
    });

    let request = UpdateImageRequest {
        tags: Some(vec!["z".into()]),
        expiry_minutes: Some(30),
    };
    let record = repo(&server)
        .update_image("a", &request)
        .await
        .expect("updated");
    mock.assert();
    assert_eq!(record.tags, vec!["z".to_string()]);
}

#[tokio::test]
async fn update_without_image_is_rejected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("PUT").path("/api/images/a");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":false}"#);
    });

    let request = UpdateImageRequest {
        tags: Some(Vec::new()),
        expiry_minutes: None,
    };
    let err = repo(&server)
        .update_image("a", &request)
        .await
        .expect_err("rejected");
    assert_eq!(err.to_string(), "Failed to update image");
}

#[tokio::test]
async fn delete_rejection_carries_server_message() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("DELETE").path("/api/images/a");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":false,"message":"Image is locked"}"#);
    });
    server.mock(|when, then| {
        when.method("DELETE").path("/api/images/b");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":false}"#);
    });

    let repo = repo(&server);
    let err = repo.delete_image("a").await.expect_err("rejected");
    assert_eq!(err.to_string(), "Image is locked");
    let err = repo.delete_image("b").await.expect_err("rejected");
    assert_eq!(err.to_string(), "Failed to delete image");
}

#[tokio::test]
async fn delete_server_error_keeps_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("DELETE").path("/api/images/a");
        then.status(503).body("maintenance");
    });

    let err = repo(&server).delete_image("a").await.expect_err("failed");
    assert!(matches!(
        err,
        RepoError::Status { status: 503, ref body } if body == "maintenance"
    ));
}

#[tokio::test]
async fn tags_are_listed() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/tags");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":true,"tags":["cat","dog"]}"#);
    });

    let tags = repo(&server).list_tags().await.expect("tags");
    assert_eq!(tags, vec!["cat".to_string(), "dog".to_string()]);
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/tags");
        then.status(200).body("<html>");
    });

    let err = repo(&server).list_tags().await.expect_err("decode");
    assert!(matches!(err, RepoError::Decode(_)));
}
