//! E2E tests for ActivityPub documents
//!
//! Actor profiles and the outbox/followers/following collections.

mod common;

use common::schema_validator::assert_conforms;
use common::{FakeRemote, TestServer, rss};
use serde_json::Value;

async fn get_json(server: &TestServer, path: &str) -> Value {
    let response = server
        .client
        .get(&server.url(path))
        .header("Accept", "application/activity+json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200, "GET {path}");
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/activity+json")
    );
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_operator_actor_document() {
    let server = TestServer::new().await;

    let actor = get_json(&server, "/u/birb").await;
    assert_conforms(&actor, "actor");

    let actor_url = server.actor_url("birb");
    assert_eq!(actor["id"], actor_url);
    assert_eq!(actor["type"], "Service");
    assert_eq!(actor["preferredUsername"], "birb");
    assert_eq!(actor["name"], "Parrot");
    assert_eq!(actor["inbox"], format!("{actor_url}/inbox"));
    assert_eq!(actor["endpoints"]["sharedInbox"], "http://localhost/inbox");
    assert_eq!(actor["publicKey"]["id"], format!("{actor_url}#main-key"));
    assert_eq!(actor["manuallyApprovesFollowers"], false);
}

#[tokio::test]
async fn test_unknown_actor_is_404() {
    let server = TestServer::new().await;

    for path in [
        "/u/nobody",
        "/u/nobody/outbox",
        "/u/nobody/followers",
        "/u/nobody/following",
    ] {
        let response = server.client.get(&server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 404, "GET {path}");
    }
}

#[tokio::test]
async fn test_empty_collections() {
    let server = TestServer::new().await;

    let followers = get_json(&server, "/u/birb/followers").await;
    assert_conforms(&followers, "ordered_collection");
    assert_eq!(followers["totalItems"], 0);

    let following = get_json(&server, "/u/birb/following").await;
    assert_conforms(&following, "ordered_collection");
    assert_eq!(following["id"], format!("{}/following", server.actor_url("birb")));

    let outbox = get_json(&server, "/u/birb/outbox").await;
    assert_conforms(&outbox, "ordered_collection");
    assert_eq!(outbox["totalItems"], 0);
    assert_eq!(
        outbox["first"],
        format!("{}/outbox?page=true", server.actor_url("birb"))
    );
}

#[tokio::test]
async fn test_feed_account_documents() {
    let server = TestServer::new().await;
    let remote = FakeRemote::start().await;
    let blog = format!("{}/site/blog", remote.base);
    let feed_url = remote.serve(
        "blog/feed.xml",
        "application/rss+xml",
        &rss(
            &blog,
            "Test Blog",
            &[
                ("one", "Mon, 01 Jan 2024 10:00:00 GMT"),
                ("two", "Tue, 02 Jan 2024 10:00:00 GMT"),
            ],
        ),
    );

    let response = server.add_feed(&feed_url).await;
    assert_eq!(response.status(), 200);
    let added: Value = response.json().await.unwrap();
    let handle = added["handle"].as_str().unwrap().to_string();
    assert_eq!(handle, "127.0.0.1.site.blog");

    let actor = get_json(&server, &format!("/u/{handle}")).await;
    assert_conforms(&actor, "actor");
    assert_eq!(actor["name"], "Test Blog 🦜");
    assert_eq!(actor["attachment"][0]["name"], "Website");

    let outbox = get_json(&server, &format!("/u/{handle}/outbox")).await;
    assert_eq!(outbox["totalItems"], 2);

    let page = get_json(&server, &format!("/u/{handle}/outbox?page=true")).await;
    assert_conforms(&page, "outbox_page");
    let items = page["orderedItems"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(
        items[0]["object"]["content"]
            .as_str()
            .unwrap()
            .contains("Post two")
    );
    assert_eq!(
        items[0]["object"]["to"][0],
        "https://www.w3.org/ns/activitystreams#Public"
    );
}
