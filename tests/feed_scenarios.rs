mod common;

use std::time::Duration;

use serde_json::json;

use common::{Harness, assert_feed_invariants, eventually, record, user};
use smalltalk::error::AppError;
use smalltalk::models::post::{PostDraft, PostId, PostStatus};
use smalltalk::repositories::document_store::DocumentStore;
use smalltalk::services::coordinator::{MSG_CREATE_FAILED, MSG_CREATED, MSG_DELETE_FAILED};
use smalltalk::services::merger::MSG_LOAD_FAILED;
use smalltalk::services::notifier::NoticeLevel;
use smalltalk::store::{Page, Pagination};

fn hello_world() -> PostDraft {
    PostDraft {
        title: "Hello World".into(),
        description: "First post from the new client".into(),
        image_url: "https://i.ibb.co/xyz/hello.png".into(),
    }
}

#[tokio::test]
async fn twelve_posts_paginate_five_per_page() {
    let h = Harness::seeded(12, "alice").await;
    let posts = h.posts();
    assert_feed_invariants(&posts);

    let first = Page::of(&posts, Pagination::new(5, 1).unwrap());
    let ids: Vec<&str> = first.items.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p12", "p11", "p10", "p9", "p8"]);
    assert_eq!(first.pages_count, 3);
    assert!(first.has_next && !first.has_previous);

    let last = Page::of(&posts, Pagination::new(5, 3).unwrap());
    let ids: Vec<&str> = last.items.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p2", "p1"]);
    assert!(!last.has_next);

    // Same page twice over an unchanged feed gives the same slice.
    assert_eq!(Page::of(&posts, Pagination::new(5, 2).unwrap()), Page::of(&h.posts(), Pagination::new(5, 2).unwrap()));
}

#[tokio::test]
async fn failed_delete_restores_the_feed() {
    let h = Harness::seeded(5, "alice").await;
    let before = h.posts();
    h.docs.fail_remove(true);

    let err = h
        .coordinator
        .delete(&PostId::from("p3"), &user("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StoreWrite(_)));
    assert_eq!(h.posts(), before);

    let notices = h.notifier.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, MSG_DELETE_FAILED);
}

#[tokio::test]
async fn delete_is_visible_before_the_store_answers() {
    let h = Harness::seeded(5, "alice").await;
    h.docs.hold_writes();

    let alice = user("alice");
    let pending = h
        .coordinator
        .stage_delete(&PostId::from("p3"), &alice)
        .unwrap()
        .expect("saved post needs a remote delete");
    assert!(!h.ids().contains(&"p3".to_string()));

    let coordinator = h.coordinator.clone();
    let commit = tokio::spawn(async move { coordinator.commit_delete(pending, &alice).await });

    // A snapshot taken before the remote delete still lists p3.
    h.merger.refresh().await.unwrap();
    assert!(!h.ids().contains(&"p3".to_string()));

    h.docs.release(1);
    commit.await.unwrap().unwrap();
    h.merger.refresh().await.unwrap();
    assert_eq!(h.ids(), vec!["p5", "p4", "p2", "p1"]);
}

#[tokio::test]
async fn failed_delete_after_other_changes_only_puts_the_post_back() {
    let h = Harness::seeded(5, "alice").await;
    h.docs.fail_remove(true);
    let alice = user("alice");

    let pending = h
        .coordinator
        .stage_delete(&PostId::from("p3"), &alice)
        .unwrap()
        .unwrap();
    h.docs.inner.set("posts/p6", record("post 6", "bob", 6_000), None).await.unwrap();
    h.merger.refresh().await.unwrap();

    assert!(h.coordinator.commit_delete(pending, &alice).await.is_err());
    assert_eq!(h.ids(), vec!["p6", "p5", "p4", "p3", "p2", "p1"]);
    assert_feed_invariants(&h.posts());
}

#[tokio::test]
async fn only_the_author_may_delete() {
    let h = Harness::seeded(3, "alice").await;
    let err = h
        .coordinator
        .delete(&PostId::from("p1"), &user("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert_eq!(h.posts().len(), 3);
}

#[tokio::test]
async fn pending_post_is_confirmed_without_duplicates() {
    let h = Harness::seeded(3, "alice").await;
    let feed = h.merger.mount().await.unwrap();
    h.docs.hold_writes();

    let alice = user("alice");
    let pending = h.coordinator.stage_create(hello_world(), &alice).unwrap();
    let head = h.posts()[0].clone();
    assert_eq!(head.id, pending.id);
    assert_eq!(head.status, PostStatus::Pending);
    assert!(head.id.is_temporary());

    let coordinator = h.coordinator.clone();
    let staged = pending.clone();
    let commit = tokio::spawn(async move { coordinator.commit_create(&staged, &alice).await });
    h.docs.release(1);
    let real = commit.await.unwrap().unwrap();

    let store = h.store.clone();
    let settled = eventually(|| {
        let s = store.lock();
        let done = s.len() == 4 && s.posts()[0].id == real && s.posts()[0].status == PostStatus::Confirmed;
        done
    })
    .await;
    assert!(settled, "feed never settled: {:?}", h.ids());

    let hello: Vec<_> = h.posts().into_iter().filter(|p| p.title == "Hello World").collect();
    assert_eq!(hello.len(), 1);
    assert_feed_invariants(&h.posts());
    assert_eq!(h.notifier.drain()[0].message, MSG_CREATED);
    feed.unsubscribe();
}

#[tokio::test]
async fn snapshot_before_push_ack_does_not_duplicate() {
    let h = Harness::seeded(2, "alice").await;
    let alice = user("alice");
    let pending = h.coordinator.stage_create(hello_world(), &alice).unwrap();

    // The store already delivered the new post under its real id.
    let stored = serde_json::to_value(pending.to_record()).unwrap();
    let snapshot = json!({
        "p1": record("post 1", "alice", 1_000),
        "p2": record("post 2", "alice", 2_000),
        "-Nreal": stored,
    });
    h.merger.apply_snapshot(Some(snapshot));
    assert_eq!(h.ids(), vec!["-Nreal", "p2", "p1"]);

    let mut confirmed = pending.clone();
    confirmed.id = PostId::from("-Nreal");
    confirmed.status = PostStatus::Confirmed;
    assert!(!h.store.lock().confirm(&pending.id, confirmed));
    assert_eq!(h.posts().len(), 3);
}

#[tokio::test]
async fn failed_create_can_be_retried_or_discarded() {
    let h = Harness::seeded(2, "alice").await;
    let alice = user("alice");
    h.docs.fail_push(true);

    let err = h.coordinator.create(hello_world(), &alice).await.unwrap_err();
    assert!(matches!(err, AppError::StoreWrite(_)));
    let failed = h.posts()[0].clone();
    assert_eq!(failed.status, PostStatus::Failed);
    assert!(h.notifier.drain().iter().any(|n| n.message == MSG_CREATE_FAILED));

    // Snapshots keep the failed post around.
    h.merger.refresh().await.unwrap();
    assert_eq!(h.posts()[0].id, failed.id);

    h.docs.fail_push(false);
    let real = h.coordinator.retry(&failed.id, &alice).await.unwrap();
    assert_eq!(h.posts()[0].id, real);
    assert_eq!(h.posts()[0].status, PostStatus::Confirmed);
    assert_eq!(h.posts().len(), 3);

    h.docs.fail_push(true);
    let other = PostDraft {
        title: "Second try".into(),
        ..hello_world()
    };
    assert!(h.coordinator.create(other, &alice).await.is_err());
    let failed = h.posts()[0].id.clone();
    h.coordinator.discard(&failed).unwrap();
    assert_eq!(h.posts().len(), 3);
    assert!(h.coordinator.discard(&real).is_err());
}

#[tokio::test]
async fn invalid_drafts_never_reach_the_store() {
    let h = Harness::seeded(1, "alice").await;
    let draft = PostDraft {
        title: "Hey".into(),
        description: "short".into(),
        image_url: "not a url".into(),
    };
    let err = h.coordinator.create(draft, &user("alice")).await.unwrap_err();
    match err {
        AppError::Validation(errs) => {
            assert!(errs.has("title") && errs.has("description") && errs.has("image_url"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.posts().len(), 1);
    assert!(h.notifier.drain().is_empty());
}

#[tokio::test]
async fn update_is_written_and_comes_back_through_the_feed() {
    let h = Harness::seeded(3, "alice").await;
    let alice = user("alice");
    let draft = PostDraft {
        title: "Edited title".into(),
        description: "Edited description text".into(),
        image_url: "https://i.ibb.co/new/pic.png".into(),
    };
    h.coordinator
        .update(&PostId::from("p2"), draft.clone(), &alice)
        .await
        .unwrap();
    // Not applied locally until the store sends it back.
    assert_eq!(h.store.lock().get(&PostId::from("p2")).unwrap().title, "post 2");

    h.merger.refresh().await.unwrap();
    let p2 = h.store.lock().get(&PostId::from("p2")).cloned().unwrap();
    assert_eq!(p2.title, "Edited title");
    assert!(p2.updated_at.is_some());
    assert_eq!(p2.created_at, 2_000);

    let err = h
        .coordinator
        .update(&PostId::from("p2"), draft, &user("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn unmounting_stops_snapshot_delivery() {
    let h = Harness::seeded(1, "alice").await;
    let feed = h.merger.mount().await.unwrap();
    assert!(feed.is_active());
    feed.unsubscribe();

    h.docs.inner.set("posts/p2", record("post 2", "alice", 2_000), None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.ids(), vec!["p1"]);
}

#[tokio::test]
async fn delete_of_twelve_shows_eleven_then_restores_all_on_failure() {
    let h = Harness::seeded(12, "alice").await;
    let before = h.ids();
    h.docs.fail_remove(true);
    let alice = user("alice");

    let pending = h
        .coordinator
        .stage_delete(&PostId::from("p3"), &alice)
        .unwrap()
        .unwrap();
    assert_eq!(h.posts().len(), 11);
    assert!(!h.ids().contains(&"p3".to_string()));

    let err = h.coordinator.commit_delete(pending, &alice).await.unwrap_err();
    assert!(matches!(err, AppError::StoreWrite(_)));
    assert_eq!(h.ids(), before);
    assert_eq!(h.ids().iter().position(|id| id == "p3"), Some(9));
}

#[tokio::test]
async fn post_still_being_saved_cannot_be_deleted() {
    let h = Harness::seeded(2, "alice").await;
    h.docs.hold_writes();
    let alice = user("alice");

    let pending = h.coordinator.stage_create(hello_world(), &alice).unwrap();
    let err = h.coordinator.delete(&pending.id, &alice).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(matches!(h.coordinator.discard(&pending.id), Err(AppError::Conflict(_))));
    assert_eq!(h.posts()[0].id, pending.id);

    // One permit for the push, one for the delete that follows.
    h.docs.release(2);
    let real = h.coordinator.commit_create(&pending, &alice).await.unwrap();
    h.coordinator.delete(&real, &alice).await.unwrap();

    h.merger.refresh().await.unwrap();
    assert_eq!(h.ids(), vec!["p2", "p1"]);
}

#[tokio::test]
async fn interleaved_mutations_keep_the_feed_ordered_and_unique() {
    let h = Harness::seeded(4, "alice").await;
    let alice = user("alice");
    let check = |h: &Harness| assert_feed_invariants(&h.posts());

    let a = h.coordinator.stage_create(hello_world(), &alice).unwrap();
    check(&h);
    let second = PostDraft {
        title: "Second post".into(),
        ..hello_world()
    };
    let b = h.coordinator.stage_create(second, &alice).unwrap();
    check(&h);
    let delete_p2 = h
        .coordinator
        .stage_delete(&PostId::from("p2"), &alice)
        .unwrap()
        .unwrap();
    check(&h);

    // Snapshot already carries `a` under its real id and still lists p2.
    let mut snapshot = h.docs.inner.get("posts", None).await.unwrap().unwrap();
    snapshot["-Na"] = serde_json::to_value(a.to_record()).unwrap();
    h.merger.apply_snapshot(Some(snapshot.clone()));
    check(&h);
    let ids = h.ids();
    assert!(ids.contains(&"-Na".to_string()));
    assert!(!ids.contains(&a.id.to_string()));
    assert!(ids.contains(&b.id.to_string()));
    assert!(!ids.contains(&"p2".to_string()));

    // Late ack for `a`.
    let mut confirmed_a = a.clone();
    confirmed_a.id = PostId::from("-Na");
    confirmed_a.status = PostStatus::Confirmed;
    assert!(!h.store.lock().confirm(&a.id, confirmed_a));
    check(&h);

    // `b` acknowledged before any snapshot shows it.
    let mut confirmed_b = b.clone();
    confirmed_b.id = PostId::from("-Nb");
    confirmed_b.status = PostStatus::Confirmed;
    assert!(h.store.lock().confirm(&b.id, confirmed_b));
    check(&h);

    h.coordinator.commit_delete(delete_p2, &alice).await.unwrap();
    check(&h);

    snapshot["-Nb"] = serde_json::to_value(b.to_record()).unwrap();
    snapshot.as_object_mut().unwrap().remove("p2");
    h.merger.apply_snapshot(Some(snapshot));
    check(&h);
    assert_eq!(h.ids().len(), 5);
    assert!(h.posts().iter().all(|p| p.status == PostStatus::Confirmed));
}

#[tokio::test]
async fn lost_stream_is_reported_and_followed_again() {
    let h = Harness::new();
    h.docs.break_streams(1);
    let merger = h.merger.clone().with_reconnect_delay(Duration::from_millis(10));
    let feed = merger.mount().await.unwrap();
    // The first attempt to come back fails too.
    h.docs.refuse_subscribes(1);

    let notifier = h.notifier.clone();
    let reported = eventually(|| notifier.pending().iter().any(|n| n.message == MSG_LOAD_FAILED)).await;
    assert!(reported);

    h.docs.inner.set("posts/p1", record("post 1", "alice", 1_000), None).await.unwrap();
    let store = h.store.clone();
    let delivered = eventually(|| store.lock().contains(&PostId::from("p1"))).await;
    assert!(delivered, "feed never saw the write: {:?}", h.ids());
    assert!(feed.is_active());
    feed.unsubscribe();
}
