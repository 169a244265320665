use chrono::{Duration as ChronoDuration, Utc};
use common::{Language, Submission, SubmissionStatus, TestCase};
use redis::AsyncCommands;
use worker::store::{
    Challenge, ChallengeStore, LeaderboardEvent, LeaderboardHook, RedisChallengeStore,
    RedisLeaderboard, RedisSubmissionStore, SubmissionStore,
};

use crate::support::containers::redis_namespace;

fn submission(id: &str) -> Submission {
    Submission::new(id, "u1", "c1", "k1", Language::Python, "print(1)")
}

#[tokio::test]
async fn update_then_find_by_id_returns_latest_record() {
    let (con, ns) = redis_namespace().await;
    let store = RedisSubmissionStore::new(con, ns);

    assert!(store.find_by_id("s1").await.unwrap().is_none());

    let mut record = submission("s1");
    store.update(&record).await.unwrap();
    record.reset(SubmissionStatus::Running);
    store.update(&record).await.unwrap();

    let found = store.find_by_id("s1").await.unwrap().unwrap();
    assert_eq!(found.status, SubmissionStatus::Running);
    assert_eq!(found.code, "print(1)");
}

#[tokio::test]
async fn find_stale_follows_status_changes() {
    let (con, ns) = redis_namespace().await;
    let store = RedisSubmissionStore::new(con, ns);

    let mut record = submission("s1");
    record.updated_at = Utc::now() - ChronoDuration::minutes(10);
    store.update(&record).await.unwrap();
    let cutoff = Utc::now() - ChronoDuration::minutes(5);

    let queued = store.find_stale(record.status, cutoff).await.unwrap();
    assert_eq!(queued.len(), 1);

    record.status = SubmissionStatus::Running;
    store.update(&record).await.unwrap();

    let queued = store.find_stale(SubmissionStatus::Queued, cutoff).await.unwrap();
    assert!(queued.is_empty());
    let running = store.find_stale(SubmissionStatus::Running, cutoff).await.unwrap();
    assert_eq!(running[0].id, "s1");
}

#[tokio::test]
async fn find_stale_excludes_recent_and_boundary_records() {
    let (con, ns) = redis_namespace().await;
    let store = RedisSubmissionStore::new(con, ns);
    let cutoff = Utc::now() - ChronoDuration::minutes(5);

    let mut old = submission("old");
    old.updated_at = cutoff - ChronoDuration::seconds(1);
    let mut boundary = submission("boundary");
    boundary.updated_at = cutoff;
    let fresh = submission("fresh");
    for record in [&old, &boundary, &fresh] {
        store.update(record).await.unwrap();
    }

    let stale = store.find_stale(old.status, cutoff).await.unwrap();
    let ids: Vec<_> = stale.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["old"]);
}

#[tokio::test]
async fn challenge_store_reads_course_service_records() {
    let (mut con, ns) = redis_namespace().await;
    let challenge = Challenge {
        id: "c1".into(),
        course_id: "k1".into(),
        time_limit_ms: 2000,
        memory_limit_mb: 128,
        test_cases: vec![TestCase {
            id: "t1".into(),
            input: "1".into(),
            expected_output: "1".into(),
            is_hidden: true,
            order: 0,
        }],
    };
    let raw = serde_json::to_string(&challenge).unwrap();
    let _: () = con.set(format!("{ns}:challenge:c1"), raw).await.unwrap();

    let store = RedisChallengeStore::new(con, ns);
    assert_eq!(store.find_by_id("c1").await.unwrap(), Some(challenge));
    assert!(store.find_by_id("c2").await.unwrap().is_none());
}

#[tokio::test]
async fn leaderboard_requests_are_appended_in_order() {
    let (mut con, ns) = redis_namespace().await;
    let hook = RedisLeaderboard::new(con.clone(), &ns);

    hook.update_for_challenge("c1").await.unwrap();
    hook.update_for_course("k1").await.unwrap();

    let raws: Vec<String> = con
        .lrange(format!("{ns}:leaderboard:events"), 0, -1)
        .await
        .unwrap();
    let events: Vec<LeaderboardEvent> = raws
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect();
    assert_eq!(
        events,
        vec![
            LeaderboardEvent::Challenge("c1".into()),
            LeaderboardEvent::Course("k1".into()),
        ]
    );
}
