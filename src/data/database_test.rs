//! Database tests

use super::*;
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn new_account(handle: &str, feed_url: &str, next_check_due: chrono::DateTime<Utc>) -> NewAccount {
    NewAccount {
        handle: handle.to_string(),
        user_url: format!("https://parrot.example/u/{handle}"),
        display_name: handle.to_string(),
        summary: String::new(),
        profile_image_url: String::new(),
        site_url: "https://blog.example".to_string(),
        feed_url: feed_url.to_string(),
        feed_last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        next_check_due,
        public_key_pem: "public".to_string(),
    }
}

fn follower(url: &str, shared_inbox: &str) -> Follower {
    Follower {
        user_url: url.to_string(),
        handle: "reader".to_string(),
        host: "remote.example".to_string(),
        user_inbox: format!("{url}/inbox"),
        shared_inbox: shared_inbox.to_string(),
        follow_activity_id: format!("{url}#follow"),
        approve_status: ApproveStatus::Pending,
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
}

#[tokio::test]
async fn test_add_account_if_not_exist_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;
    let account = new_account("blog.example", "https://blog.example/feed", Utc::now());

    assert!(db.add_account_if_not_exist(&account, "private").await.unwrap());
    assert!(!db.add_account_if_not_exist(&account, "other").await.unwrap());

    assert!(db.does_account_exist("blog.example").await.unwrap());
    assert!(!db.does_account_exist("missing").await.unwrap());

    // The first key pair wins
    let key = db.get_private_key("blog.example").await.unwrap();
    assert_eq!(key.as_deref(), Some("private"));

    let stored = db.get_account("blog.example").await.unwrap().unwrap();
    assert_eq!(stored.feed_url, "https://blog.example/feed");
    assert_eq!(
        db.get_feed_last_updated(&stored.id).await.unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_feed_post_dedup_per_account() {
    let (db, _temp_dir) = create_test_db().await;
    db.add_account_if_not_exist(&new_account("a", "https://a/feed", Utc::now()), "k")
        .await
        .unwrap();
    db.add_account_if_not_exist(&new_account("b", "https://b/feed", Utc::now()), "k")
        .await
        .unwrap();
    let a = db.get_account("a").await.unwrap().unwrap();
    let b = db.get_account("b").await.unwrap().unwrap();

    let post = FeedPost {
        post_hash: 42,
        post_time: Utc::now(),
        link: "https://a/1".to_string(),
        title: "One".to_string(),
        description: String::new(),
    };

    assert!(db.add_feed_post_if_new(&a.id, &post).await.unwrap());
    assert!(!db.add_feed_post_if_new(&a.id, &post).await.unwrap());
    // Same hash on another account is a separate record
    assert!(db.add_feed_post_if_new(&b.id, &post).await.unwrap());

    assert_eq!(db.get_post_count("a").await.unwrap(), 1);
    assert_eq!(db.get_post_count("b").await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_account_to_check_claims_most_overdue() {
    let (db, _temp_dir) = create_test_db().await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    db.add_account_if_not_exist(
        &new_account("late", "https://late/feed", now - Duration::hours(5)),
        "k",
    )
    .await
    .unwrap();
    db.add_account_if_not_exist(
        &new_account("later", "https://later/feed", now - Duration::hours(1)),
        "k",
    )
    .await
    .unwrap();
    db.add_account_if_not_exist(
        &new_account("future", "https://future/feed", now + Duration::hours(1)),
        "k",
    )
    .await
    .unwrap();
    // Operator account has no feed and is never scheduled
    db.add_account_if_not_exist(&new_account("operator", "", now - Duration::days(9)), "k")
        .await
        .unwrap();

    let (account, due) = db.get_account_to_check(now).await.unwrap();
    assert_eq!(account.unwrap().handle, "late");
    assert_eq!(due, 2);

    // The claim removes "late" from the due set
    let (account, due) = db.get_account_to_check(now).await.unwrap();
    assert_eq!(account.unwrap().handle, "later");
    assert_eq!(due, 1);

    let (account, due) = db.get_account_to_check(now).await.unwrap();
    assert!(account.is_none());
    assert_eq!(due, 0);
}

#[tokio::test]
async fn test_update_account_feed_times() {
    let (db, _temp_dir) = create_test_db().await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    db.add_account_if_not_exist(&new_account("feed", "https://f/feed", now), "k")
        .await
        .unwrap();
    let account = db.get_account("feed").await.unwrap().unwrap();

    let watermark = now - Duration::hours(2);
    let next = now + Duration::hours(3);
    db.update_account_feed_times(&account.id, watermark, next)
        .await
        .unwrap();

    let stored = db.get_account("feed").await.unwrap().unwrap();
    assert_eq!(stored.feed_last_updated, watermark);
    assert_eq!(stored.next_check_due, next);

    // A racing writer with an older watermark cannot move it back
    let later = next + Duration::hours(1);
    db.update_account_feed_times(&account.id, watermark - Duration::days(30), later)
        .await
        .unwrap();
    let stored = db.get_account("feed").await.unwrap().unwrap();
    assert_eq!(stored.feed_last_updated, watermark);
    assert_eq!(stored.next_check_due, later);
    assert_eq!(db.get_feed_last_updated(&account.id).await.unwrap(), watermark);

    let missing = db.update_account_feed_times("nope", watermark, next).await;
    assert!(matches!(missing, Err(crate::error::AppError::NotFound)));
}

#[tokio::test]
async fn test_get_next_id_is_strictly_increasing() {
    let (db, _temp_dir) = create_test_db().await;

    let first = db.get_next_id().await.unwrap();
    let second = db.get_next_id().await.unwrap();
    let third = db.get_next_id().await.unwrap();

    assert!(first < second && second < third);
}

#[tokio::test]
async fn test_follower_lifecycle() {
    let (db, _temp_dir) = create_test_db().await;
    db.add_account_if_not_exist(&new_account("feed", "https://f/feed", Utc::now()), "k")
        .await
        .unwrap();

    let alice = follower("https://remote.example/users/alice", "https://remote.example/inbox");
    let bob = follower("https://remote.example/users/bob", "https://remote.example/inbox");
    db.add_follower("feed", &alice).await.unwrap();
    db.add_follower("feed", &bob).await.unwrap();

    assert_eq!(db.get_followers("feed").await.unwrap().len(), 2);
    assert_eq!(db.get_approved_follower_count("feed").await.unwrap(), 0);

    db.set_follower_approve_status("feed", &alice.user_url, ApproveStatus::Approved)
        .await
        .unwrap();
    assert_eq!(db.get_approved_follower_count("feed").await.unwrap(), 1);

    // A repeated Follow refreshes the row but keeps the approval
    db.add_follower("feed", &alice).await.unwrap();
    let followers = db.get_followers("feed").await.unwrap();
    let stored = followers.iter().find(|f| f.user_url == alice.user_url).unwrap();
    assert_eq!(stored.approve_status, ApproveStatus::Approved);

    assert!(db.remove_follower("feed", &alice.user_url).await.unwrap());
    assert!(!db.remove_follower("feed", &alice.user_url).await.unwrap());
    assert_eq!(db.get_followers("feed").await.unwrap().len(), 1);

    let missing = db
        .set_follower_approve_status("feed", "https://nobody", ApproveStatus::Approved)
        .await;
    assert!(matches!(missing, Err(crate::error::AppError::NotFound)));
}

#[tokio::test]
async fn test_add_follower_to_unknown_account_fails() {
    let (db, _temp_dir) = create_test_db().await;
    let result = db
        .add_follower("ghost", &follower("https://r/u/a", "https://r/inbox"))
        .await;
    assert!(matches!(result, Err(crate::error::AppError::NotFound)));
}

#[tokio::test]
async fn test_toots_and_mentions() {
    let (db, _temp_dir) = create_test_db().await;
    db.add_account_if_not_exist(&new_account("feed", "https://f/feed", Utc::now()), "k")
        .await
        .unwrap();
    let account = db.get_account("feed").await.unwrap().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    for i in 0..3 {
        db.add_toot(
            &account.id,
            &Toot {
                post_hash: i,
                tooted_at: start + Duration::minutes(i),
                status_id: format!("https://parrot.example/u/feed/status/{i}"),
                content: format!("<p>{i}</p>"),
            },
        )
        .await
        .unwrap();
    }

    assert_eq!(db.get_toot_count("feed").await.unwrap(), 3);
    let recent = db.get_recent_toots("feed", 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].post_hash, 2);

    let mention = Mention {
        note_id: "https://remote.example/notes/1".to_string(),
        actor_url: "https://remote.example/users/alice".to_string(),
        content: "<p>hi</p>".to_string(),
        received_at: Utc::now(),
    };
    assert!(db.record_mention("feed", &mention).await.unwrap());
    assert!(!db.record_mention("feed", &mention).await.unwrap());
    assert_eq!(db.get_mention_count("feed").await.unwrap(), 1);
}
