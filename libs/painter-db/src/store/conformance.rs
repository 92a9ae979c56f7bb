//! Behaviour every `LedgerStore` must share. Run against the reference store
//! always, and against PostgreSQL when `TEST_DATABASE_URL` is set.

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::LedgerError;
use crate::models::{
    Account, Admission, Artifact, CodeKind, CodeStatus, GenerationStatus, NewAccount, NewCode,
    NewGeneration, Role,
};
use crate::store::LedgerStore;

type Store = Arc<dyn LedgerStore>;

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Names unique across runs, so a shared test database can be reused.
fn unique(prefix: &str) -> String {
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}{:X}{:X}", prefix, stamp, n).to_uppercase()
}

async fn account(store: &Store, balance: i32) -> Account {
    let created = store
        .create_account(
            NewAccount {
                username: unique("user"),
                password_hash: "x".to_string(),
                role: Role::User,
            },
            Admission::Seed,
            Utc::now(),
        )
        .await
        .unwrap();
    if balance > 0 {
        store.adjust_balance(created.id, balance, Utc::now()).await.unwrap();
    }
    store.fetch_account(created.id).await.unwrap()
}

fn new_code(ident: &str, kind: CodeKind, value: Option<i32>) -> NewCode {
    NewCode {
        code: ident.to_string(),
        kind,
        value,
        expires_at: None,
        created_by: None,
    }
}

async fn code(store: &Store, kind: CodeKind, value: Option<i32>, expires_in: Option<Duration>) -> String {
    let ident = unique("C");
    store
        .insert_code(NewCode {
            expires_at: expires_in.map(|d| Utc::now() + d),
            ..new_code(&ident, kind, value)
        })
        .await
        .unwrap()
        .expect("fresh identifier");
    ident
}

fn generation() -> NewGeneration {
    NewGeneration {
        prompt: "a lighthouse at dusk".to_string(),
        model: "dall-e-3".to_string(),
        size: "1024x1024".to_string(),
    }
}

pub async fn run_all(store: Store) {
    redeem_credits_code_once(store.clone()).await;
    expired_code_is_rejected(store.clone()).await;
    invite_code_cannot_be_redeemed_for_credit(store.clone()).await;
    concurrent_mark_used_has_one_winner(store.clone()).await;
    concurrent_redeem_credits_once(store.clone()).await;
    generation_requires_credit(store.clone()).await;
    failed_generation_is_refunded_once(store.clone()).await;
    concurrent_generations_never_overdraw(store.clone()).await;
    invite_admission_consumes_invite(store.clone()).await;
    balance_adjustment_cannot_go_negative(store.clone()).await;
    balance_never_exceeds_integer_range(store.clone()).await;
    stale_generations_are_listed(store.clone()).await;
    duplicate_identifier_is_reported(store.clone()).await;
    batch_insert_is_all_or_nothing(store.clone()).await;
    codes_filter_by_creator(store.clone()).await;
    stats_count_new_activity(store).await;
}

async fn redeem_credits_code_once(store: Store) {
    let acc = account(&store, 10).await;
    let ident = code(&store, CodeKind::Redemption, Some(50), None).await;

    let redemption = store.redeem(&ident, acc.id, Utc::now()).await.unwrap();
    assert_eq!(redemption.points_added, 50);
    assert_eq!(redemption.balance, 60);
    assert_eq!(redemption.code.status, CodeStatus::Used);
    assert_eq!(redemption.code.used_by, Some(acc.id));

    let looked_up = store.lookup_code(&ident, Utc::now()).await.unwrap();
    assert_eq!(looked_up.status, CodeStatus::Used);

    let again = store.redeem(&ident, acc.id, Utc::now()).await;
    assert!(matches!(again, Err(LedgerError::CodeAlreadyUsed)));
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 60);

    let history = store.credit_history(acc.id, 10).await.unwrap();
    assert_eq!(history[0].delta, 50);
    assert_eq!(history[0].balance_after, 60);
    assert_eq!(history[0].code_id, Some(redemption.code.id));
}

async fn expired_code_is_rejected(store: Store) {
    let acc = account(&store, 0).await;
    let ident = code(&store, CodeKind::Redemption, Some(5), Some(Duration::seconds(-5))).await;

    let looked_up = store.lookup_code(&ident, Utc::now()).await.unwrap();
    assert_eq!(looked_up.status, CodeStatus::Expired);

    let res = store.redeem(&ident, acc.id, Utc::now()).await;
    assert!(matches!(res, Err(LedgerError::CodeExpired)));
    let res = store.mark_used(&ident, acc.id, Utc::now()).await;
    assert!(matches!(res, Err(LedgerError::CodeExpired)));
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 0);

    // Expiry is judged at use time, not at creation.
    let later = code(&store, CodeKind::Redemption, Some(5), Some(Duration::hours(1))).await;
    let res = store
        .redeem(&later, acc.id, Utc::now() + Duration::hours(2))
        .await;
    assert!(matches!(res, Err(LedgerError::CodeExpired)));
}

async fn invite_code_cannot_be_redeemed_for_credit(store: Store) {
    let acc = account(&store, 0).await;
    let ident = code(&store, CodeKind::Invite, None, None).await;
    let res = store.redeem(&ident, acc.id, Utc::now()).await;
    assert!(matches!(res, Err(LedgerError::CodeNotFound)));
    assert_eq!(
        store.lookup_code(&ident, Utc::now()).await.unwrap().status,
        CodeStatus::Unused
    );

    let missing = store.redeem("NOPE-NOT-A-CODE", acc.id, Utc::now()).await;
    assert!(matches!(missing, Err(LedgerError::CodeNotFound)));
    let no_account = store.redeem(&ident, i64::MAX, Utc::now()).await;
    assert!(matches!(no_account, Err(LedgerError::AccountNotFound)));
}

async fn concurrent_mark_used_has_one_winner(store: Store) {
    let acc = account(&store, 0).await;
    let ident = code(&store, CodeKind::Invite, None, None).await;
    let account_id = acc.id;

    let attempts = (0..16).map(|_| {
        let store = store.clone();
        let ident = ident.clone();
        tokio::spawn(async move { store.mark_used(&ident, account_id, Utc::now()).await })
    });
    let results = futures::future::join_all(attempts).await;

    let mut won = 0;
    for res in results {
        match res.unwrap() {
            Ok(c) => {
                won += 1;
                assert_eq!(c.used_by, Some(acc.id));
            }
            Err(LedgerError::CodeAlreadyUsed) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1);
}

async fn concurrent_redeem_credits_once(store: Store) {
    let acc = account(&store, 0).await;
    let ident = code(&store, CodeKind::Redemption, Some(25), None).await;
    let account_id = acc.id;

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        let ident = ident.clone();
        tokio::spawn(async move { store.redeem(&ident, account_id, Utc::now()).await })
    });
    let won = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(won, 1);
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 25);
}

async fn generation_requires_credit(store: Store) {
    let acc = account(&store, 0).await;
    let res = store.begin_generation(acc.id, generation(), Utc::now()).await;
    assert!(matches!(
        res,
        Err(LedgerError::InsufficientCredit { balance: 0, required: 1 })
    ));
    let (records, total) = store.generation_history(acc.id, 0, 10).await.unwrap();
    assert!(records.is_empty());
    assert_eq!(total, 0);
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 0);
}

async fn failed_generation_is_refunded_once(store: Store) {
    let acc = account(&store, 1).await;

    let pending = store
        .begin_generation(acc.id, generation(), Utc::now())
        .await
        .unwrap();
    assert_eq!(pending.status, GenerationStatus::Pending);
    assert_eq!(pending.credit_delta, -1);
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 0);

    let failed = store
        .fail_generation(pending.id, "provider returned 500", Utc::now())
        .await
        .unwrap();
    assert_eq!(failed.status, GenerationStatus::Failed);
    assert_eq!(failed.credit_delta, 0);
    assert_eq!(failed.error_message.as_deref(), Some("provider returned 500"));
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 1);

    let deltas: Vec<i32> = store
        .generation_entries(pending.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.delta)
        .collect();
    assert_eq!(deltas, vec![-1, 1]);

    let twice = store.fail_generation(pending.id, "again", Utc::now()).await;
    assert!(matches!(twice, Err(LedgerError::GenerationFinalized(_))));
    let late = store
        .complete_generation(pending.id, Artifact::default(), Utc::now())
        .await;
    assert!(matches!(late, Err(LedgerError::GenerationFinalized(_))));
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 1);

    // A success keeps the debit.
    let ok = store
        .begin_generation(acc.id, generation(), Utc::now())
        .await
        .unwrap();
    let done = store
        .complete_generation(
            ok.id,
            Artifact {
                image_url: Some("https://img.example/1.png".to_string()),
                image_b64: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(done.status, GenerationStatus::Succeeded);
    assert!(done.completed_at.is_some());
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 0);
}

async fn concurrent_generations_never_overdraw(store: Store) {
    let acc = account(&store, 3).await;
    let account_id = acc.id;

    let attempts = (0..10).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .begin_generation(account_id, generation(), Utc::now())
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let admitted = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(LedgerError::InsufficientCredit { .. }))))
        .count();
    assert_eq!(admitted, 3);
    assert_eq!(refused, 7);
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 0);
}

async fn invite_admission_consumes_invite(store: Store) {
    let ident = code(&store, CodeKind::Invite, None, None).await;
    let first = store
        .create_account(
            NewAccount {
                username: unique("invited"),
                password_hash: "x".to_string(),
                role: Role::User,
            },
            Admission::Invite(ident.to_lowercase()),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(first.invite_code.as_deref(), Some(ident.as_str()));

    let invite = store.lookup_code(&ident, Utc::now()).await.unwrap();
    assert_eq!(invite.status, CodeStatus::Used);
    assert_eq!(invite.used_by, Some(first.id));

    let second_name = unique("invited");
    let second = store
        .create_account(
            NewAccount {
                username: second_name.clone(),
                password_hash: "x".to_string(),
                role: Role::User,
            },
            Admission::Invite(ident.clone()),
            Utc::now(),
        )
        .await;
    assert!(matches!(second, Err(LedgerError::CodeAlreadyUsed)));
    assert!(
        store
            .fetch_account_by_username(&second_name)
            .await
            .unwrap()
            .is_none()
    );

    let credit = code(&store, CodeKind::Redemption, Some(3), None).await;
    let wrong_kind = store
        .create_account(
            NewAccount {
                username: unique("invited"),
                password_hash: "x".to_string(),
                role: Role::User,
            },
            Admission::Invite(credit),
            Utc::now(),
        )
        .await;
    assert!(matches!(wrong_kind, Err(LedgerError::CodeNotFound)));

    let taken = store
        .create_account(
            NewAccount {
                username: first.username.clone(),
                password_hash: "x".to_string(),
                role: Role::User,
            },
            Admission::Seed,
            Utc::now(),
        )
        .await;
    assert!(matches!(taken, Err(LedgerError::UsernameTaken)));
}

async fn balance_adjustment_cannot_go_negative(store: Store) {
    let acc = account(&store, 2).await;
    let res = store.adjust_balance(acc.id, -3, Utc::now()).await;
    assert!(matches!(
        res,
        Err(LedgerError::InsufficientCredit { balance: 2, required: 3 })
    ));
    let at = Utc::now() - Duration::minutes(5);
    let entry = store.adjust_balance(acc.id, -2, at).await.unwrap();
    assert_eq!(entry.balance_after, 0);
    assert_eq!(entry.created_at.timestamp(), at.timestamp());
    let missing = store.adjust_balance(i64::MAX, 1, Utc::now()).await;
    assert!(matches!(missing, Err(LedgerError::AccountNotFound)));
}

async fn balance_never_exceeds_integer_range(store: Store) {
    let acc = account(&store, 10).await;
    let res = store.adjust_balance(acc.id, i32::MAX, Utc::now()).await;
    assert!(matches!(res, Err(LedgerError::InvalidRequest(_))), "{:?}", res);
    let res = store.adjust_balance(acc.id, i32::MIN, Utc::now()).await;
    assert!(matches!(res, Err(LedgerError::InsufficientCredit { balance: 10, .. })), "{:?}", res);

    let ident = code(&store, CodeKind::Redemption, Some(i32::MAX), None).await;
    let res = store.redeem(&ident, acc.id, Utc::now()).await;
    assert!(matches!(res, Err(LedgerError::InvalidRequest(_))), "{:?}", res);

    // The refused redemption leaves both sides untouched.
    assert_eq!(store.fetch_account(acc.id).await.unwrap().credit_balance, 10);
    let untouched = store.lookup_code(&ident, Utc::now()).await.unwrap();
    assert_eq!(untouched.status, CodeStatus::Unused);
    assert_eq!(untouched.used_by, None);
    assert_eq!(store.credit_history(acc.id, 10).await.unwrap().len(), 1);
}

async fn stale_generations_are_listed(store: Store) {
    let acc = account(&store, 2).await;
    let old = store
        .begin_generation(acc.id, generation(), Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    let fresh = store
        .begin_generation(acc.id, generation(), Utc::now())
        .await
        .unwrap();

    let stale = store
        .stale_generations(Utc::now() - Duration::minutes(10))
        .await
        .unwrap();
    assert!(stale.iter().any(|g| g.id == old.id));
    assert!(!stale.iter().any(|g| g.id == fresh.id));

    let (page, total) = store.generation_history(acc.id, 0, 1).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 1);
}

async fn duplicate_identifier_is_reported(store: Store) {
    let ident = code(&store, CodeKind::Invite, None, None).await;
    let dup = store
        .insert_code(NewCode {
            code: ident,
            kind: CodeKind::Invite,
            value: None,
            expires_at: None,
            created_by: None,
        })
        .await
        .unwrap();
    assert!(dup.is_none());

    let listed = store.list_codes(Some(CodeKind::Invite), None, Utc::now()).await.unwrap();
    assert!(listed.iter().all(|c| c.kind == CodeKind::Invite));
}

async fn batch_insert_is_all_or_nothing(store: Store) {
    let existing = code(&store, CodeKind::Invite, None, None).await;
    let fresh = unique("B");
    let res = store
        .insert_codes(vec![
            new_code(&fresh, CodeKind::Redemption, Some(100)),
            new_code(&existing, CodeKind::Invite, None),
        ])
        .await;
    assert!(matches!(&res, Err(LedgerError::CodeTaken(taken)) if *taken == existing), "{:?}", res);
    assert!(matches!(
        store.lookup_code(&fresh, Utc::now()).await,
        Err(LedgerError::CodeNotFound)
    ));

    let repeated = unique("B");
    let res = store
        .insert_codes(vec![
            new_code(&repeated, CodeKind::Invite, None),
            new_code(&repeated.to_lowercase(), CodeKind::Invite, None),
        ])
        .await;
    assert!(matches!(res, Err(LedgerError::CodeTaken(_))), "{:?}", res);
    assert!(store.lookup_code(&repeated, Utc::now()).await.is_err());

    let (a, b) = (unique("B"), unique("B"));
    let inserted = store
        .insert_codes(vec![
            new_code(&a, CodeKind::Invite, None),
            new_code(&b, CodeKind::Redemption, Some(5)),
        ])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 2);
    assert_eq!(inserted[0].code, a);
    assert_eq!(inserted[1].value, Some(5));
    assert_eq!(store.lookup_code(&b, Utc::now()).await.unwrap().status, CodeStatus::Unused);
}

async fn codes_filter_by_creator(store: Store) {
    let owner = account(&store, 0).await;
    let other = account(&store, 0).await;
    for creator in [owner.id, other.id] {
        store
            .insert_code(NewCode {
                created_by: Some(creator),
                ..new_code(&unique("O"), CodeKind::Invite, None)
            })
            .await
            .unwrap()
            .expect("fresh identifier");
    }

    let mine = store
        .list_codes(Some(CodeKind::Invite), Some(owner.id), Utc::now())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].created_by, Some(owner.id));
}

async fn stats_count_new_activity(store: Store) {
    let before = store.ledger_stats(Utc::now()).await.unwrap();
    let acc = account(&store, 5).await;
    store.begin_generation(acc.id, generation(), Utc::now()).await.unwrap();
    let after = store.ledger_stats(Utc::now()).await.unwrap();

    assert_eq!(after.total_accounts, before.total_accounts + 1);
    assert_eq!(after.total_generations, before.total_generations + 1);
    assert_eq!(after.generations_today, before.generations_today + 1);
    assert_eq!(after.active_accounts_7d, before.active_accounts_7d + 1);
    assert_eq!(after.credit_in_circulation, before.credit_in_circulation + 4);
}
