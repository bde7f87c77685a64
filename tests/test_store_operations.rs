use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cnpjdb::{Context, Error, Store, StoreOptions, Transport};
use serde_json::{json, Value};
use tokio_postgres::NoTls;

const DATABASE_URL_VAR: &str = "CNPJDB_TEST_DATABASE_URL";

static SCHEMAS: AtomicUsize = AtomicUsize::new(0);

// Common test setup; None when no database is configured
async fn setup_test_store(transport: Transport) -> Option<(String, Store)> {
    let uri = match std::env::var(DATABASE_URL_VAR) {
        Ok(uri) => uri,
        Err(_) => {
            eprintln!("{} not set, skipping", DATABASE_URL_VAR);
            return None;
        }
    };
    let schema = format!(
        "cnpjdb_test_{}_{}",
        std::process::id(),
        SCHEMAS.fetch_add(1, Ordering::SeqCst)
    );
    let mut options = StoreOptions::new(uri, schema.clone());
    options.set_max_connections(2).unwrap();
    options.set_transport(transport);
    let store = options.open().await.unwrap();
    store.create_schema(&Context::background()).await.unwrap();
    Some((schema, store))
}

// Run SQL outside of the store, on a connection of its own
async fn admin_execute(sql: &str) {
    let uri = std::env::var(DATABASE_URL_VAR).unwrap();
    let (client, connection) = tokio_postgres::connect(&uri, NoTls).await.unwrap();
    let guard = tokio::spawn(async move {
        let _ = connection.await;
    });
    client.batch_execute(sql).await.unwrap();
    guard.abort();
}

async fn teardown(schema: &str, store: Store) {
    store.drop_schema(&Context::background()).await.unwrap();
    store.close();
    admin_execute(&format!("DROP SCHEMA {} CASCADE", schema)).await;
}

async fn company(store: &Store, id: &str) -> Value {
    let raw = store.get_company(&Context::background(), id).await.unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_load_then_get_round_trip() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    let payload = r#"{"a": 1, "qsa": [], "razao_social": "ACME, \"LTDA\""}"#;
    store
        .load_batch(&ctx, &[("12345678000190", payload)])
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    let got = store.get_company(&ctx, "12345678000190").await.unwrap();
    assert_eq!(got, payload);

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_get_returns_payload_as_loaded() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    let unordered = r#"{"b":2,"a":1}"#;
    let spaced = r#"{ "z" : [1,2],  "y":null }"#;
    store
        .load_batch(&ctx, &[("12345678000190", unordered), ("12345678000271", spaced)])
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    assert_eq!(store.get_company(&ctx, "12345678000190").await.unwrap(), unordered);
    assert_eq!(store.get_company(&ctx, "12345678000271").await.unwrap(), spaced);

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_get_errors() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    let err = store.get_company(&ctx, "12345678000190").await.unwrap_err();
    assert!(err.is_not_found(), "{}", err);

    let err = store.get_company(&ctx, "abc").await.unwrap_err();
    assert!(err.is_invalid_input(), "{}", err);

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_build_index_dedups_and_is_idempotent() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    store
        .load_batch(
            &ctx,
            &[
                ("12345678000190", r#"{"v": 1}"#),
                ("12345678000271", r#"{"v": 2}"#),
            ],
        )
        .await
        .unwrap();
    store
        .load_batch(&ctx, &[("12345678000190", r#"{"v": 3}"#)])
        .await
        .unwrap();

    let err = store.get_company(&ctx, "12345678000190").await.unwrap_err();
    assert!(matches!(err, Error::DuplicateRows { rows: 2, .. }), "{}", err);

    store.build_index(&ctx).await.unwrap();
    assert_eq!(company(&store, "12345678000190").await, json!({"v": 3}));
    assert_eq!(company(&store, "12345678000271").await, json!({"v": 2}));

    store.build_index(&ctx).await.unwrap();
    assert_eq!(company(&store, "12345678000190").await, json!({"v": 3}));
    assert_eq!(company(&store, "12345678000271").await, json!({"v": 2}));

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_merge_json_covers_the_whole_base() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    store
        .load_batch(
            &ctx,
            &[
                ("12345678000190", r#"{"a":1,"b":2}"#),
                ("12345678000271", r#"{"a":9}"#),
                ("12345679000100", r#"{"a":5}"#),
            ],
        )
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    store
        .merge_json(&ctx, &[("12345678", r#"{"b":3,"c":4}"#)])
        .await
        .unwrap();

    assert_eq!(
        company(&store, "12345678000190").await,
        json!({"a": 1, "b": 3, "c": 4})
    );
    assert_eq!(
        company(&store, "12345678000271").await,
        json!({"a": 9, "b": 3, "c": 4})
    );
    assert_eq!(company(&store, "12345679000100").await, json!({"a": 5}));

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_merge_json_pipelines_many_bases() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    let rows: Vec<(String, String)> = (1..=50)
        .map(|n| (format!("{:08}000100", n), format!(r#"{{"n":{}}}"#, n)))
        .collect();
    store.load_batch(&ctx, &rows).await.unwrap();
    store.build_index(&ctx).await.unwrap();

    let updates: Vec<(String, String)> = (1..=50)
        .map(|n| (format!("{:08}", n), format!(r#"{{"double":{}}}"#, n * 2)))
        .collect();
    store.merge_json(&ctx, &updates).await.unwrap();

    for n in [1, 25, 50] {
        assert_eq!(
            company(&store, &format!("{:08}000100", n)).await,
            json!({"n": n, "double": n * 2})
        );
    }

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_append_partners_does_not_dedup() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    store
        .load_batch(
            &ctx,
            &[
                ("12345678000190", r#"{"qsa":["X"]}"#),
                ("33000167000101", r#"{"a":1}"#),
            ],
        )
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    store
        .append_partners(&ctx, &[("12345678", r#"["Y"]"#)])
        .await
        .unwrap();
    assert_eq!(
        company(&store, "12345678000190").await,
        json!({"qsa": ["X", "Y"]})
    );

    store
        .append_partners(&ctx, &[("12345678", r#"["X"]"#), ("33000167", r#"["Z"]"#)])
        .await
        .unwrap();
    assert_eq!(
        company(&store, "12345678000190").await,
        json!({"qsa": ["X", "Y", "X"]})
    );
    assert_eq!(
        company(&store, "33000167000101").await,
        json!({"a": 1, "qsa": ["Z"]})
    );

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_append_partners_replaces_non_array_partners() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    store
        .load_batch(
            &ctx,
            &[
                ("12345678000190", r#"{"qsa":null}"#),
                ("33000167000101", r#"{"qsa":"X"}"#),
            ],
        )
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    store
        .append_partners(&ctx, &[("12345678", r#"["Y"]"#), ("33000167", r#"["Z"]"#)])
        .await
        .unwrap();
    assert_eq!(company(&store, "12345678000190").await, json!({"qsa": ["Y"]}));
    assert_eq!(company(&store, "33000167000101").await, json!({"qsa": ["Z"]}));

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_failed_statement_waits_for_whole_batch() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    let rows: Vec<(String, String)> = (1..=6)
        .map(|n| (format!("{:08}000100", n), format!(r#"{{"n":{}}}"#, n)))
        .collect();
    store.load_batch(&ctx, &rows).await.unwrap();
    store.build_index(&ctx).await.unwrap();

    // Base 1 rejects the update, bases 2 to 6 take 0.3s each
    admin_execute(&format!(
        "ALTER TABLE {schema}.cnpj ADD CONSTRAINT no_bad CHECK (NOT (json::jsonb ? 'bad'));
         CREATE FUNCTION {schema}.slow_update() RETURNS trigger LANGUAGE plpgsql AS $$
         BEGIN
             IF NEW.id >= 2000000 THEN PERFORM pg_sleep(0.3); END IF;
             RETURN NEW;
         END $$;
         CREATE TRIGGER slow_update BEFORE UPDATE ON {schema}.cnpj
         FOR EACH ROW EXECUTE FUNCTION {schema}.slow_update();",
        schema = schema
    ))
    .await;

    let mut updates = vec![("00000001".to_string(), r#"{"bad":1}"#.to_string())];
    updates.extend((2..=6).map(|n| (format!("{:08}", n), r#"{"c":1}"#.to_string())));

    let started = Instant::now();
    let err = store.merge_json(&ctx, &updates).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(1200));
    assert!(matches!(err, Error::Storage { .. }), "{}", err);
    assert!(err.to_string().contains("check constraint"), "{}", err);

    assert_eq!(company(&store, "00000001000100").await, json!({"n": 1}));
    for n in 2..=6 {
        assert_eq!(
            company(&store, &format!("{:08}000100", n)).await,
            json!({"n": n, "c": 1})
        );
    }

    let atomic = [
        ("00000002", r#"{"d":1}"#),
        ("00000001", r#"{"bad":1}"#),
        ("00000003", r#"{"d":1}"#),
    ];
    let err = store.merge_json_atomic(&ctx, &atomic).await.unwrap_err();
    assert!(err.to_string().contains("check constraint"), "{}", err);
    assert_eq!(company(&store, "00000002000100").await, json!({"n": 2, "c": 1}));
    assert_eq!(company(&store, "00000003000100").await, json!({"n": 3, "c": 1}));

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_invalid_batch_sends_nothing() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    store
        .load_batch(&ctx, &[("12345678000190", r#"{"a":1}"#)])
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    let err = store
        .merge_json(&ctx, &[("12345678", r#"{"a":2}"#), ("abc", r#"{"a":3}"#)])
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());
    assert_eq!(company(&store, "12345678000190").await, json!({"a": 1}));

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_atomic_variants() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    store
        .load_batch(&ctx, &[("12345678000190", r#"{"a":1,"qsa":[]}"#)])
        .await
        .unwrap();
    store.build_index(&ctx).await.unwrap();

    store
        .merge_json_atomic(&ctx, &[("12345678", r#"{"b":2}"#)])
        .await
        .unwrap();
    store
        .append_partners_atomic(&ctx, &[("12345678", r#"["P1","P2"]"#)])
        .await
        .unwrap();
    assert_eq!(
        company(&store, "12345678000190").await,
        json!({"a": 1, "b": 2, "qsa": ["P1", "P2"]})
    );

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_metadata() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();

    assert!(store.get_meta(&ctx, "updated-at").await.unwrap_err().is_not_found());

    store.set_meta(&ctx, "updated-at", "2024-01-01").await.unwrap();
    assert_eq!(store.get_meta(&ctx, "updated-at").await.unwrap(), "2024-01-01");

    store.set_meta(&ctx, "updated-at", "2024-02-01").await.unwrap();
    assert_eq!(store.get_meta(&ctx, "updated-at").await.unwrap(), "2024-02-01");

    let long = "k".repeat(17);
    let err = store.set_meta(&ctx, &long, "v").await.unwrap_err();
    assert!(err.is_invalid_input());
    assert!(store.get_meta(&ctx, &long).await.unwrap_err().is_not_found());

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_unreachable_transport_loads_nothing() {
    let transport = Transport::Psql {
        program: PathBuf::from("/nonexistent/bin/psql"),
    };
    let Some((schema, store)) = setup_test_store(transport).await else {
        return;
    };
    let ctx = Context::background();

    assert!(matches!(
        store.check_transport(&ctx).await,
        Err(Error::BulkLoad { .. })
    ));
    let err = store
        .load_batch(&ctx, &[("12345678000190", r#"{"a":1}"#)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BulkLoad { .. }), "{}", err);

    store.build_index(&ctx).await.unwrap();
    let err = store.get_company(&ctx, "12345678000190").await.unwrap_err();
    assert!(err.is_not_found());

    teardown(&schema, store).await;
}

#[tokio::test]
async fn test_cancelled_context() {
    let Some((schema, store)) = setup_test_store(Transport::CopyIn).await else {
        return;
    };
    let ctx = Context::background();
    ctx.cancel();

    let err = store
        .merge_json(&ctx, &[("12345678", r#"{"a":1}"#)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    let err = store.get_company(&ctx, "12345678000190").await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let empty: [(&str, &str); 0] = [];
    let err = store.merge_json(&ctx, &empty).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{}", err);
    let err = store.append_partners(&ctx, &empty).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{}", err);
    let err = store.merge_json_atomic(&ctx, &empty).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{}", err);
    let err = store.load_batch(&ctx, &empty).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{}", err);

    let expired = Context::with_timeout(Duration::ZERO);
    let err = store.append_partners_atomic(&expired, &empty).await.unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded), "{}", err);

    teardown(&schema, store).await;
}
