//! Tests for M3: Concurrent Sessions
//! Covers TC-3.1, TC-3.2, TC-3.3
//!
//! Run individual tests with:
//! cargo test tc_3_1 -- --nocapture
//! cargo test m3_concurrency -- --nocapture

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use tessera::{
    Catalog, ColumnId, KeyRange, MemoryStore, RowKey, TableMetadata, TransactionManager,
    TxnConfig, TxnResult,
};

const TABLE: &str = "COUNTERS";

fn setup() -> Arc<TransactionManager> {
    let catalog = Arc::new(Catalog::new());
    catalog.create_table(TABLE, TableMetadata::mutable());
    Arc::new(TransactionManager::new(
        Arc::new(MemoryStore::new()),
        catalog,
        TxnConfig::default().lock_stripes(16),
    ))
}

fn decode(bytes: Option<Vec<u8>>) -> i64 {
    bytes
        .map(|b| i64::from_be_bytes(b.try_into().unwrap()))
        .unwrap_or(0)
}

fn encode(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn value() -> ColumnId {
    ColumnId::parse("c.value")
}

/// Read-modify-write `delta` into `row`, retrying on conflict.
/// Returns the number of conflicts seen.
fn add_with_retry(mgr: &TransactionManager, row: &RowKey, delta: i64) -> usize {
    let mut conflicts = 0;
    loop {
        let attempt: TxnResult<()> = (|| {
            let mut txn = mgr.begin();
            let current = decode(mgr.get(&txn, TABLE, row, &value())?);
            mgr.upsert(&mut txn, TABLE, row.clone(), value(), encode(current + delta))?;
            mgr.commit(&mut txn)
        })();
        match attempt {
            Ok(()) => return conflicts,
            Err(err) if err.is_retryable() => conflicts += 1,
            Err(err) => panic!("unexpected error: {}", err),
        }
    }
}

mod tc_3_1_lost_updates {
    use super::*;

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let mgr = setup();
        let row = RowKey::from("hits");
        let threads = 8;
        let per_thread = 200;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let row = row.clone();
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| add_with_retry(&mgr, &row, 1))
                        .sum::<usize>()
                })
            })
            .collect();

        let conflicts: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let txn = mgr.begin();
        let total = decode(mgr.get(&txn, TABLE, &row, &value()).unwrap());
        println!("[TC-3.1] total={} conflicts retried={}", total, conflicts);

        assert_eq!(total, (threads * per_thread) as i64);
        drop(txn);
        assert_eq!(mgr.active_count(), 0);
    }
}

mod tc_3_2_snapshot_consistency {
    use super::*;

    const ACCOUNTS: u32 = 6;
    const OPENING: i64 = 1_000;

    fn account(i: u32) -> RowKey {
        RowKey::from(format!("acct/{}", i))
    }

    /// Move `amount` between two accounts in one transaction
    fn transfer(mgr: &TransactionManager, from: u32, to: u32, amount: i64) -> TxnResult<()> {
        let mut txn = mgr.begin();
        let a = decode(mgr.get(&txn, TABLE, &account(from), &value())?);
        let b = decode(mgr.get(&txn, TABLE, &account(to), &value())?);
        mgr.upsert(&mut txn, TABLE, account(from), value(), encode(a - amount))?;
        mgr.upsert(&mut txn, TABLE, account(to), value(), encode(b + amount))?;
        mgr.commit(&mut txn)
    }

    fn balance_sum(mgr: &TransactionManager) -> i64 {
        let txn = mgr.begin();
        mgr.query(&txn, TABLE, &KeyRange::prefix(b"acct/"))
            .unwrap()
            .iter()
            .map(|row| decode(row.get(&value()).map(|v| v.to_vec())))
            .sum()
    }

    #[test]
    fn test_readers_never_see_partial_transfers() {
        let mgr = setup();
        mgr.autocommit(|m, t| {
            for i in 0..ACCOUNTS {
                m.upsert(t, TABLE, account(i), value(), encode(OPENING))?;
            }
            Ok(())
        })
        .unwrap();
        let expected = OPENING * ACCOUNTS as i64;

        let writers: Vec<_> = (0..4u64)
            .map(|seed| {
                let mgr = Arc::clone(&mgr);
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut committed = 0;
                    for _ in 0..300 {
                        let from = rng.gen_range(0..ACCOUNTS);
                        let to = (from + rng.gen_range(1..ACCOUNTS)) % ACCOUNTS;
                        let amount = rng.gen_range(1..50);
                        match transfer(&mgr, from, to, amount) {
                            Ok(()) => committed += 1,
                            Err(err) => assert!(err.is_conflict(), "unexpected: {}", err),
                        }
                    }
                    committed
                })
            })
            .collect();

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                thread::spawn(move || {
                    for _ in 0..300 {
                        assert_eq!(balance_sum(&mgr), expected);
                    }
                })
            })
            .collect();

        let committed: usize = writers.into_iter().map(|h| h.join().unwrap()).sum();
        for r in readers {
            r.join().unwrap();
        }

        assert!(committed > 0);
        assert_eq!(balance_sum(&mgr), expected);
        println!("[TC-3.2] {} transfers committed, sum held at {}", committed, expected);
    }
}

mod tc_3_3_vacuum_under_load {
    use super::*;

    #[test]
    fn test_vacuum_concurrent_with_writers() {
        let mgr = setup();
        let rows: Vec<RowKey> = (0..4).map(|i| RowKey::from(format!("k{}", i))).collect();

        let writers: Vec<_> = rows
            .iter()
            .cloned()
            .map(|row| {
                let mgr = Arc::clone(&mgr);
                thread::spawn(move || {
                    for _ in 0..100 {
                        add_with_retry(&mgr, &row, 1);
                    }
                })
            })
            .collect();

        let vacuum = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || (0..50).map(|_| mgr.vacuum().unwrap()).sum::<usize>())
        };

        for w in writers {
            w.join().unwrap();
        }
        let pruned = vacuum.join().unwrap() + mgr.vacuum().unwrap();

        let txn = mgr.begin();
        for row in &rows {
            assert_eq!(decode(mgr.get(&txn, TABLE, row, &value()).unwrap()), 100);
        }
        println!("[TC-3.3] pruned {} versions while writers ran", pruned);
        assert!(pruned > 0);
    }
}
