//! `MemoryStore` behaviour shared by every store backend.

use std::sync::Arc;

use wxoa_rs::{Account, AccountStore, CallbackIp, CallbackIpStore, MemoryStore, StoreError};

fn account(app_id: &str) -> Account {
    let mut a = Account::new("demo", app_id, "SECRET-值");
    a.token = Some("cbtoken".into());
    a.encoding_aes_key = Some("k".repeat(43));
    a.valid = true;
    a
}

#[tokio::test]
async fn account_round_trip() {
    let store = MemoryStore::new();
    let original = account("wxROUNDTRIP").with_cached_token("T", 1_700_000_000);
    store.save_account(&original).await.unwrap();

    let loaded = store.find_account("wxROUNDTRIP").await.unwrap().unwrap();
    assert_eq!(loaded.app_id, "wxROUNDTRIP");
    assert_eq!(loaded.app_secret, "SECRET-值");
    assert_eq!(loaded, original);
    assert!(store.find_account("wxMISSING").await.unwrap().is_none());
}

#[tokio::test]
async fn save_is_upsert_by_app_id() {
    let store = MemoryStore::new();
    store.save_account(&account("wx1")).await.unwrap();
    let updated = account("wx1").with_cached_token("T2", 42);
    store.save_account(&updated).await.unwrap();

    let loaded = store.find_account("wx1").await.unwrap().unwrap();
    assert_eq!(loaded.access_token(), Some("T2"));
}

#[tokio::test]
async fn invalid_account_is_rejected() {
    let store = MemoryStore::new();
    let err = store
        .save_account(&Account::new("", "wx1", "s"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[tokio::test]
async fn callback_ip_requires_existing_account() {
    let store = MemoryStore::new();
    let entry = CallbackIp::new("wxNOPE", "1.2.3.4", None).unwrap();
    assert!(matches!(
        store.add_callback_ip(&entry).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn callback_ip_is_unique_per_account() {
    let store = MemoryStore::new();
    store.save_account(&account("wx1")).await.unwrap();
    store.save_account(&account("wx2")).await.unwrap();

    let entry = CallbackIp::new("wx1", "1.2.3.4", Some("office".into())).unwrap();
    store.add_callback_ip(&entry).await.unwrap();
    assert!(matches!(
        store.add_callback_ip(&entry).await,
        Err(StoreError::Duplicate(_))
    ));

    // same ip under another account is fine
    let other = CallbackIp::new("wx2", "1.2.3.4", None).unwrap();
    store.add_callback_ip(&other).await.unwrap();

    assert_eq!(store.callback_ips("wx1").await.unwrap(), vec![entry]);
}

#[tokio::test]
async fn removing_account_cascades_to_callback_ips() {
    let store = MemoryStore::new();
    store.save_account(&account("wx1")).await.unwrap();
    store
        .add_callback_ip(&CallbackIp::new("wx1", "1.2.3.4", None).unwrap())
        .await
        .unwrap();

    store.remove_account("wx1").await.unwrap();
    assert!(store.find_account("wx1").await.unwrap().is_none());
    assert!(store.callback_ips("wx1").await.unwrap().is_empty());
    assert!(matches!(
        store.remove_account("wx1").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn remove_single_callback_ip() {
    let store = MemoryStore::new();
    store.save_account(&account("wx1")).await.unwrap();
    store
        .add_callback_ip(&CallbackIp::new("wx1", "1.2.3.4", None).unwrap())
        .await
        .unwrap();
    store
        .add_callback_ip(&CallbackIp::new("wx1", "5.6.7.8", None).unwrap())
        .await
        .unwrap();

    store.remove_callback_ip("wx1", "1.2.3.4").await.unwrap();
    let left: Vec<String> = store
        .callback_ips("wx1")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.ip)
        .collect();
    assert_eq!(left, vec!["5.6.7.8"]);
    assert!(matches!(
        store.remove_callback_ip("wx1", "1.2.3.4").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_insert_and_remove_leave_no_orphans() {
    for round in 0..50 {
        let store = Arc::new(MemoryStore::new());
        store.save_account(&account("wx1")).await.unwrap();

        let adders: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let entry = CallbackIp::new("wx1", format!("10.0.0.{i}"), None).unwrap();
                    // NotFound is fine once the account is gone
                    let _ = store.add_callback_ip(&entry).await;
                })
            })
            .collect();
        let remover = {
            let store = store.clone();
            tokio::spawn(async move { store.remove_account("wx1").await.unwrap() })
        };

        for adder in adders {
            adder.await.unwrap();
        }
        remover.await.unwrap();

        assert!(store.find_account("wx1").await.unwrap().is_none());
        assert!(
            store.callback_ips("wx1").await.unwrap().is_empty(),
            "orphaned callback ips in round {round}"
        );
    }
}
