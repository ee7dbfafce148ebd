use chrono::Utc;

use outboxd::schema::outbox::NewOutboxEvent;
use outboxd::store::{ClaimedBatch, OutboxStore, PgOutboxStore, WriteTx};

// Runs only when DATABASE_URL points at a scratch Postgres; everything else
// is covered against the in-memory store.
async fn connect() -> Option<PgOutboxStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    };

    let store = PgOutboxStore::connect(&url)
        .await
        .expect("failed to connect to test database");
    store.migrate().await.expect("failed to run migrations");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS outbox_test_users (id bigserial PRIMARY KEY, email text NOT NULL)",
    )
    .execute(store.pool())
    .await
    .expect("failed to create business table");
    sqlx::query("TRUNCATE event_outbox, outbox_test_users RESTART IDENTITY")
        .execute(store.pool())
        .await
        .expect("failed to reset tables");

    Some(store)
}

#[tokio::test]
async fn outbox_flow_on_postgres() {
    let Some(store) = connect().await else {
        return;
    };

    // business write and outbox append share one transaction: rollback
    // discards both
    let mut tx = store.begin().await.unwrap();
    sqlx::query("INSERT INTO outbox_test_users (email) VALUES ($1)")
        .bind("kim@example.com")
        .execute(tx.executor())
        .await
        .unwrap();
    tx.append(NewOutboxEvent::new(
        "user_created",
        "Test",
        serde_json::json!({"email": "kim@example.com"}),
    ))
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_test_users")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(users, 0);
    assert_eq!(store.pending_count().await.unwrap(), 0);

    // commit makes both visible atomically
    let mut tx = store.begin().await.unwrap();
    sqlx::query("INSERT INTO outbox_test_users (email) VALUES ($1)")
        .bind("kim@example.com")
        .execute(tx.executor())
        .await
        .unwrap();
    let mut ids = vec![
        tx.append(NewOutboxEvent::new(
            "user_created",
            "Test",
            serde_json::json!({"email": "kim@example.com"}),
        ))
        .await
        .unwrap(),
    ];
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    for n in 0..4 {
        ids.push(
            tx.append(NewOutboxEvent::new(
                "user_updated",
                "Test",
                serde_json::json!({ "n": n }),
            ))
            .await
            .unwrap(),
        );
    }
    tx.commit().await.unwrap();

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(store.pending_count().await.unwrap(), 5);

    // concurrent claims: the second sees only rows the first has not locked
    let first = store.claim_pending(2).await.unwrap();
    let second = store.claim_pending(10).await.unwrap();

    let first_ids: Vec<i64> = first.records().iter().map(|r| r.id).collect();
    let second_ids: Vec<i64> = second.records().iter().map(|r| r.id).collect();
    assert_eq!(first_ids.as_slice(), &ids[..2]);
    assert_eq!(second_ids.as_slice(), &ids[2..]);

    // rolled-back claim returns to pending, committed claim is marked
    second.rollback().await.unwrap();
    first.commit_processed(Utc::now()).await.unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 3);

    let marked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_outbox WHERE processed = true AND processed_at IS NOT NULL",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(marked, 2);

    // the remainder is claimable again and drains to zero
    let rest = store.claim_pending(10).await.unwrap();
    assert_eq!(rest.records().len(), 3);
    rest.commit_processed(Utc::now()).await.unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 0);
}
