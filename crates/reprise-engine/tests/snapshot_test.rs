mod common;

use common::MockPage;
use proptest::prelude::*;
use reprise_engine::error::EngineError;
use reprise_engine::protocol::{BrowserState, Cookie, StorageMap};
use reprise_engine::snapshot::{PREFERENCES_STUB, SnapshotStore, diff};
use tempfile::TempDir;

fn store(dir: &TempDir) -> SnapshotStore {
    SnapshotStore::new(dir.path().join("sessions"), dir.path().join("profiles"))
}

fn logged_in_page() -> MockPage {
    let page = MockPage::new();
    {
        let mut state = page.state.lock();
        state.url = "https://example.com/home".into();
        state.title = "Home".into();
        state.cookies.push(Cookie::new("sid", "example.com", "abc"));
        state.cookies.push(Cookie::new("pref", ".example.com", "dark"));
        state.local_storage.insert("token".into(), "t-1".into());
        state.session_storage.insert("tab".into(), "2".into());
    }
    page
}

#[tokio::test]
async fn test_capture_save_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let mut page = logged_in_page();

    let state = store.capture(&mut page, "s1").await;
    assert!(!state.is_degraded());
    assert_eq!(state.cookies.len(), 2);
    assert_eq!(state.local_storage.get("token").map(String::as_str), Some("t-1"));
    assert_eq!(state.page_title, "Home");

    let path = store.save(&state, "s1").await.unwrap();
    assert_eq!(path, store.state_path("s1"));
    let loaded = store.load(&path).await.unwrap();
    assert_eq!(loaded, state);
    assert!(diff(&state, &loaded).is_empty());
}

#[tokio::test]
async fn test_apply_restores_onto_fresh_page() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let mut source = logged_in_page();
    let state = store.capture(&mut source, "s2").await;

    let mut fresh = MockPage::new();
    store.apply(&mut fresh, &state).await.unwrap();

    let restored = store.capture(&mut fresh, "s2").await;
    let delta = diff(&state, &restored);
    assert!(delta.cookies.is_empty());
    assert!(delta.local_storage.is_empty());
    assert!(delta.session_storage.is_empty());
    assert!(!delta.url_changed);
}

#[tokio::test]
async fn test_apply_storage_without_url_is_invalid() {
    let dir = TempDir::new().unwrap();
    let mut state = BrowserState::empty("s3");
    state.local_storage.insert("k".into(), "v".into());

    let err = store(&dir)
        .apply(&mut MockPage::new(), &state)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn test_load_missing_state_is_persistence_failure() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let err = store.load(&store.state_path("absent")).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { .. }));
}

#[tokio::test]
async fn test_profile_bundle() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let state = store.capture(&mut logged_in_page(), "s4").await;

    let bundle = store.build_profile_bundle(&state, "work").await.unwrap();
    assert_eq!(bundle, dir.path().join("profiles").join("work"));
    assert!(bundle.join("state.json").exists());
    assert!(bundle.join("cookies.json").exists());

    let prefs: serde_json::Value =
        serde_json::from_slice(&std::fs::read(bundle.join(PREFERENCES_STUB)).unwrap()).unwrap();
    assert_eq!(prefs["profile"]["name"], "work");
    assert_eq!(prefs["reprise"]["start_url"], "https://example.com/home");

    let cookies: Vec<Cookie> =
        serde_json::from_slice(&std::fs::read(bundle.join("cookies.json")).unwrap()).unwrap();
    assert_eq!(cookies, state.cookies);
    assert_eq!(store.load_profile_bundle(&bundle).await.unwrap(), state);

    for bad in ["", "..", "a/b"] {
        assert!(store.build_profile_bundle(&state, bad).await.is_err());
    }
}

#[test]
fn test_diff_reports_modified_cookie() {
    let mut a = BrowserState::empty("a");
    a.cookies.push(Cookie::new("a", "x", "1"));
    let mut b = a.clone();
    b.cookies[0].value = "2".into();

    let delta = diff(&a, &b);
    assert_eq!(delta.cookies.modified, vec![Cookie::new("a", "x", "").key()]);
    assert!(delta.cookies.added.is_empty());
    assert!(delta.cookies.removed.is_empty());
}

fn storage() -> impl Strategy<Value = StorageMap> {
    prop::collection::btree_map("[a-d]{1,2}", "[0-9]{0,2}", 0..6)
}

fn cookie_attrs() -> impl Strategy<Value = (Option<f64>, bool, bool, Option<String>)> {
    (
        // Whole seconds, as browsers report them.
        prop::option::of((0u32..2_000_000_000).prop_map(f64::from)),
        any::<bool>(),
        any::<bool>(),
        prop::option::of(prop_oneof![
            Just("Strict".to_string()),
            Just("Lax".to_string()),
            Just("None".to_string()),
        ]),
    )
}

fn cookies() -> impl Strategy<Value = Vec<Cookie>> {
    prop::collection::btree_map(
        ("[a-c]", "[xy]\\.com"),
        ("[0-9]", "/[a-z]{0,3}", cookie_attrs()),
        0..6,
    )
    .prop_map(|jar| {
        jar.into_iter()
            .map(|((name, domain), (value, path, (expires, http_only, secure, same_site)))| {
                let mut cookie = Cookie::new(name, domain, value);
                cookie.path = path;
                cookie.expires = expires;
                cookie.http_only = http_only;
                cookie.secure = secure;
                cookie.same_site = same_site;
                cookie
            })
            .collect()
    })
}

fn state() -> impl Strategy<Value = BrowserState> {
    (cookies(), storage(), storage(), "https://[ab]\\.com/").prop_map(
        |(cookies, local, session, url)| {
            let mut state = BrowserState::empty("p");
            state.cookies = cookies;
            state.local_storage = local;
            state.session_storage = session;
            state.page_url = url;
            state
        },
    )
}

proptest! {
    #[test]
    fn prop_diff_is_antisymmetric(a in state(), b in state()) {
        let ab = diff(&a, &b);
        let ba = diff(&b, &a);
        prop_assert_eq!(&ab.cookies.added, &ba.cookies.removed);
        prop_assert_eq!(&ab.cookies.modified, &ba.cookies.modified);
        prop_assert_eq!(&ab.local_storage.added, &ba.local_storage.removed);
        prop_assert_eq!(&ab.session_storage.removed, &ba.session_storage.added);
        prop_assert_eq!(ab.url_changed, ba.url_changed);
    }

    #[test]
    fn prop_state_survives_save_and_load(a in state()) {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let back = runtime.block_on(async {
            let path = store.save(&a, "p").await.unwrap();
            store.load(&path).await.unwrap()
        });
        prop_assert!(diff(&a, &back).is_empty());
        prop_assert_eq!(back, a);
    }
}
