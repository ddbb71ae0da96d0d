// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use laser_geometry_core::persistence::{self, PersistenceStore};
use laser_geometry_core::registers::{map::holding, Bank, RegisterStore};

/// A register written before the poll loop starts, and one written after,
/// both survive a restart-sized round trip: write -> poll -> new store ->
/// restore.
#[tokio::test]
async fn poll_loop_persists_changes_and_restore_rebuilds_store() {
    let persistence = Arc::new(PersistenceStore::open_in_memory().unwrap());
    let store = Arc::new(RegisterStore::new());
    store.set_f32(Bank::Holding, holding::REF_WALL, 12.5);

    let running = Arc::new(AtomicBool::new(true));
    let poll_handle = {
        let persistence = persistence.clone();
        let store = store.clone();
        let running = running.clone();
        tokio::spawn(async move { persistence::run(persistence, store, running).await })
    };

    // Give the poll loop a chance to observe the initial value, then mutate
    // the store and let it observe the change too.
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.set_f32(Bank::Holding, holding::REF_BOTTOM, 7.0);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    running.store(false, Ordering::SeqCst);
    poll_handle.await.unwrap();

    let fresh_store = RegisterStore::new();
    persistence::restore(&persistence, &fresh_store).unwrap();

    assert_eq!(fresh_store.get_f32(Bank::Holding, holding::REF_WALL), 12.5);
    assert_eq!(fresh_store.get_f32(Bank::Holding, holding::REF_BOTTOM), 7.0);
}
