use std::sync::atomic::Ordering;

use super::*;
use crate::backend::AuthEventKind;
use crate::profile::{Landing, ProfileStatus, Role};
use crate::state::test_helpers::{MockAuth, MockAuthFactory, MockStore, profile_for, session_for};
use crate::backend::AuthFactory;

const WAIT: Duration = Duration::from_secs(2);

async fn wait_until(ctx: &SessionContext, pred: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
    let mut rx = ctx.watch();
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("snapshot did not settle in time")
        .expect("context sender dropped")
        .clone()
}

async fn settled(ctx: &SessionContext) -> SessionSnapshot {
    wait_until(ctx, |s| !s.loading).await
}

fn user(email: &str) -> AuthUser {
    AuthUser { id: uuid::Uuid::new_v4(), email: Some(email.into()) }
}

/// Factory with one account plus a context built on a fresh client from it.
fn fixture(email: &str, role: Option<Role>) -> (Arc<MockAuthFactory>, Arc<MockStore>, Arc<SessionContext>) {
    let auth = Arc::new(MockAuthFactory::new());
    let store = Arc::new(MockStore::new());
    let account = auth.add_account(email, "secret123");
    if let Some(role) = role {
        store.seed(profile_for(&account, "Mia", role));
    }
    let ctx = SessionContext::start(auth.new_client(), store.clone());
    (auth, store, ctx)
}

// =============================================================================
// initialize
// =============================================================================

#[tokio::test]
async fn start_is_loading_then_settles_without_session() {
    let auth = Arc::new(MockAuth::standalone());
    let ctx = SessionContext::start(auth, Arc::new(MockStore::new()));
    let snapshot = settled(&ctx).await;
    assert!(snapshot.user.is_none());
    assert!(snapshot.profile.is_none());
    assert!(snapshot.error.is_none());
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Login);
}

#[tokio::test]
async fn start_resolves_existing_session() {
    let u = user("admin@example.com");
    let store = Arc::new(MockStore::new());
    store.seed(profile_for(&u, "Ada", Role::Admin));
    let ctx = SessionContext::start(Arc::new(MockAuth::with_session(u.clone())), store);

    let snapshot = wait_until(&ctx, |s| s.profile.is_some()).await;
    assert_eq!(snapshot.user.as_ref().map(|x| x.id), Some(u.id));
    assert!(!snapshot.loading);
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Admin);
}

// =============================================================================
// sign_in
// =============================================================================

#[tokio::test]
async fn admin_sign_in_lands_on_admin_view() {
    let (_auth, _store, ctx) = fixture("ada@example.com", Some(Role::Admin));
    settled(&ctx).await;
    let snapshot = ctx.sign_in("ada@example.com", "secret123", WAIT).await.unwrap();
    assert!(snapshot.error.is_none());
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Admin);
    assert_eq!(Landing::Admin.path(), Some("/admin"));
}

#[tokio::test]
async fn member_sign_in_lands_on_member_view() {
    let (_auth, _store, ctx) = fixture("mia@example.com", Some(Role::Member));
    settled(&ctx).await;
    let snapshot = ctx.sign_in("mia@example.com", "secret123", WAIT).await.unwrap();
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Member);
    assert_eq!(snapshot.profile.unwrap().name, "Mia");
}

#[tokio::test]
async fn wrong_password_is_rejected_and_stops_loading() {
    let (_auth, _store, ctx) = fixture("mia@example.com", Some(Role::Member));
    settled(&ctx).await;
    let err = ctx.sign_in("mia@example.com", "nope", WAIT).await.unwrap_err();
    match err {
        ContextError::Backend(e) => assert!(e.is_invalid_credentials()),
        other => panic!("unexpected error: {other:?}"),
    }
    let snapshot = ctx.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.user.is_none());
}

#[tokio::test]
async fn deleted_profile_forces_sign_out_with_message() {
    let auth = Arc::new(MockAuthFactory::new());
    let store = Arc::new(MockStore::new());
    let account = auth.add_account("gone@example.com", "secret123");
    let mut profile = profile_for(&account, "Gone", Role::Member);
    profile.status = ProfileStatus::Deleted;
    store.seed(profile);
    let ctx = SessionContext::start(auth.new_client(), store);
    settled(&ctx).await;

    let snapshot = ctx.sign_in("gone@example.com", "secret123", WAIT).await.unwrap();
    assert_eq!(snapshot.error.as_deref(), Some(DELETED_ACCOUNT_MESSAGE));
    assert!(snapshot.profile.is_none());
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Login);

    // The forced sign-out's notification clears the user but keeps the message.
    let after = wait_until(&ctx, |s| s.user.is_none()).await;
    assert_eq!(after.error.as_deref(), Some(DELETED_ACCOUNT_MESSAGE));
    assert!(after.profile.is_none());
    assert!(auth.client(0).sign_out_calls.load(Ordering::SeqCst) >= 1);
    assert!(auth.client(0).current().is_none());
}

#[tokio::test]
async fn deleted_profile_sign_out_survives_immediate_shutdown() {
    let auth = Arc::new(MockAuthFactory::new());
    *auth.sign_out_delay.lock().unwrap() = Some(Duration::from_millis(30));
    let store = Arc::new(MockStore::new());
    let account = auth.add_account("gone@example.com", "secret123");
    let mut profile = profile_for(&account, "Gone", Role::Member);
    profile.status = ProfileStatus::Deleted;
    store.seed(profile);
    let ctx = SessionContext::start(auth.new_client(), store);
    settled(&ctx).await;

    let snapshot = ctx.sign_in("gone@example.com", "secret123", WAIT).await.unwrap();
    assert_eq!(snapshot.error.as_deref(), Some(DELETED_ACCOUNT_MESSAGE));
    ctx.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(auth.client(0).sign_out_completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_profile_is_pending_without_error() {
    let (_auth, store, ctx) = fixture("new@example.com", None);
    settled(&ctx).await;
    let snapshot = ctx.sign_in("new@example.com", "secret123", WAIT).await.unwrap();
    assert!(snapshot.user.is_some());
    assert!(snapshot.profile.is_none());
    assert!(snapshot.error.is_none());
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Pending);

    // A later change notification picks up the row once it exists.
    let u = snapshot.user.unwrap();
    store.seed(profile_for(&u, "New", Role::Member));
    let auth = ctx.auth().clone();
    auth.update_password("secret456").await.unwrap();
    let resolved = wait_until(&ctx, |s| s.profile.is_some()).await;
    assert_eq!(Landing::from_snapshot(&resolved), Landing::Member);
}

#[tokio::test]
async fn lookup_failure_sets_error_and_clears_profile() {
    let (auth, store, ctx) = fixture("mia@example.com", Some(Role::Member));
    settled(&ctx).await;
    *store.fail_lookup.lock().unwrap() = Some("connection refused".into());

    let snapshot = ctx.sign_in("mia@example.com", "secret123", WAIT).await.unwrap();
    assert_eq!(snapshot.error.as_deref(), Some("Failed to load user profile: connection refused"));
    assert!(snapshot.profile.is_none());
    // A generic failure does not sign the user out.
    assert_eq!(auth.client(0).sign_out_calls.load(Ordering::SeqCst), 0);
    assert!(ctx.snapshot().user.is_some());
}

#[tokio::test]
async fn sign_in_after_shutdown_is_closed() {
    let (_auth, _store, ctx) = fixture("mia@example.com", Some(Role::Member));
    ctx.shutdown();
    let err = ctx.sign_in("mia@example.com", "secret123", WAIT).await.unwrap_err();
    assert!(matches!(err, ContextError::Closed));
}

// =============================================================================
// refresh_profile
// =============================================================================

#[tokio::test]
async fn refresh_profile_picks_up_role_change() {
    let (_auth, store, ctx) = fixture("mia@example.com", Some(Role::Member));
    settled(&ctx).await;
    let snapshot = ctx.sign_in("mia@example.com", "secret123", WAIT).await.unwrap();
    let row = snapshot.profile.unwrap();

    store.profiles.lock().unwrap().iter_mut().for_each(|p| {
        if p.id == row.id {
            p.role = Role::Admin;
        }
    });
    ctx.refresh_profile().await.unwrap();
    let snapshot = ctx.snapshot();
    assert_eq!(Landing::from_snapshot(&snapshot), Landing::Admin);
}

#[tokio::test]
async fn refresh_profile_without_session_is_no_session() {
    let ctx = SessionContext::start(Arc::new(MockAuth::standalone()), Arc::new(MockStore::new()));
    let err = ctx.refresh_profile().await.unwrap_err();
    assert!(matches!(err, BackendError::NoSession));
}

// =============================================================================
// sign_out
// =============================================================================

#[tokio::test]
async fn sign_out_clears_all_state() {
    let (_auth, _store, ctx) = fixture("mia@example.com", Some(Role::Member));
    settled(&ctx).await;
    ctx.sign_in("mia@example.com", "secret123", WAIT).await.unwrap();

    ctx.sign_out().await.unwrap();
    let snapshot = ctx.snapshot();
    assert_eq!(snapshot, SessionSnapshot::default());
    assert!(ctx.auth().get_session().await.unwrap().is_none());
    assert!(matches!(ctx.bearer().await, Err(BackendError::NoSession)));
}

#[tokio::test]
async fn sign_out_clears_locally_even_when_remote_fails() {
    let u = user("mia@example.com");
    let store = Arc::new(MockStore::new());
    store.seed(profile_for(&u, "Mia", Role::Member));
    let auth = Arc::new(MockAuth::with_session(u));
    auth.fail_sign_out.store(true, Ordering::SeqCst);
    let ctx = SessionContext::start(auth, store);
    wait_until(&ctx, |s| s.profile.is_some()).await;

    let err = ctx.sign_out().await.unwrap_err();
    assert!(matches!(err, BackendError::Request(_)));
    let snapshot = ctx.snapshot();
    assert!(snapshot.user.is_none());
    assert!(snapshot.profile.is_none());
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn sign_out_clears_previous_error() {
    let (_auth, store, ctx) = fixture("mia@example.com", Some(Role::Member));
    settled(&ctx).await;
    *store.fail_lookup.lock().unwrap() = Some("boom".into());
    let snapshot = ctx.sign_in("mia@example.com", "secret123", WAIT).await.unwrap();
    assert!(snapshot.error.is_some());

    ctx.sign_out().await.unwrap();
    assert!(ctx.snapshot().error.is_none());
}

// =============================================================================
// teardown
// =============================================================================

#[tokio::test]
async fn nothing_is_published_after_shutdown() {
    let u = user("mia@example.com");
    let store = Arc::new(MockStore::new());
    store.seed(profile_for(&u, "Mia", Role::Member));
    let auth = Arc::new(MockAuth::with_session(u.clone()));
    let ctx = SessionContext::start(auth.clone(), store);
    wait_until(&ctx, |s| s.profile.is_some()).await;

    let mut rx = ctx.watch();
    rx.borrow_and_update();
    ctx.shutdown();
    assert!(!ctx.is_mounted());

    auth.emit(AuthEventKind::SignedOut, None);
    auth.emit(AuthEventKind::SignedIn, Some(session_for(u)));
    let _ = ctx.refresh_profile().await;
    let _ = ctx.sign_out().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!rx.has_changed().unwrap());
    assert!(ctx.snapshot().profile.is_some());
}

#[tokio::test]
async fn shutdown_discards_a_lookup_still_in_flight() {
    let u = user("mia@example.com");
    let store = Arc::new(MockStore::new());
    store.seed(profile_for(&u, "Mia", Role::Member));
    let ctx = SessionContext::start(Arc::new(MockAuth::with_session(u.clone())), store.clone());
    wait_until(&ctx, |s| s.profile.is_some()).await;

    store.profiles.lock().unwrap().iter_mut().for_each(|p| p.role = Role::Admin);
    store.delay_lookup(u.id, Duration::from_millis(100));
    let mut rx = ctx.watch();
    rx.borrow_and_update();

    let pending = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.refresh_profile().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.shutdown();
    pending.await.unwrap().unwrap();

    assert!(!rx.has_changed().unwrap());
    assert_eq!(ctx.snapshot().profile.unwrap().role, Role::Member);
}

#[tokio::test]
async fn newer_user_wins_over_slower_lookup() {
    let ann = user("ann@example.com");
    let bob = user("bob@example.com");
    let store = Arc::new(MockStore::new());
    store.seed(profile_for(&ann, "Ann", Role::Member));
    store.seed(profile_for(&bob, "Bob", Role::Admin));
    let auth = Arc::new(MockAuth::with_session(ann.clone()));
    let ctx = SessionContext::start(auth.clone(), store.clone());
    wait_until(&ctx, |s| s.profile.is_some()).await;

    // Ann's re-resolution is still running when Bob signs in.
    store.delay_lookup(ann.id, Duration::from_millis(100));
    let pending = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.refresh_profile().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let bob_session = session_for(bob.clone());
    auth.set_current(Some(bob_session.clone()));
    auth.emit(AuthEventKind::SignedIn, Some(bob_session));

    wait_until(&ctx, |s| s.profile.as_ref().is_some_and(|p| p.uid == bob.id)).await;
    pending.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = ctx.snapshot();
    assert_eq!(snapshot.user.map(|x| x.id), Some(bob.id));
    assert_eq!(snapshot.profile.map(|p| p.uid), Some(bob.id));
    assert_eq!(Landing::from_snapshot(&ctx.snapshot()), Landing::Admin);
}

// =============================================================================
// token refresh
// =============================================================================

#[test]
fn refresh_delay_leaves_a_margin_before_expiry() {
    assert_eq!(refresh_delay_for(10_000, 6_000), Duration::from_secs(3_940));
}

#[test]
fn refresh_delay_is_zero_once_inside_the_margin() {
    assert_eq!(refresh_delay_for(10_000, 9_990), Duration::ZERO);
    assert_eq!(refresh_delay_for(10_000, 20_000), Duration::ZERO);
}

#[tokio::test]
async fn expiring_session_is_refreshed_by_the_listener() {
    let u = user("mia@example.com");
    let store = Arc::new(MockStore::new());
    store.seed(profile_for(&u, "Mia", Role::Member));
    let auth = Arc::new(MockAuth::standalone());
    let mut session = session_for(u);
    session.expires_at = now_secs() + 30;
    auth.set_current(Some(session));
    let ctx = SessionContext::start(auth.clone(), store);

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let current = auth.current().unwrap();
        if current.access_token.ends_with("-r") {
            assert!(current.expires_at > now_secs() + REFRESH_MARGIN_SECS);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "session was never refreshed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snapshot = wait_until(&ctx, |s| s.profile.is_some()).await;
    assert!(snapshot.error.is_none());
}
