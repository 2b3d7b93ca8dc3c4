use super::*;

fn populated() -> Store {
    let store = Store::new();
    store.set("/app/database/host", "db1");
    store.set("/app/database/port", "5432");
    store.set("/app/name", "web");
    store.set("/app/upstreams/one", "10.0.0.1");
    store.set("/app/upstreams/two", "10.0.0.2");
    store
}

#[test]
fn set_then_get_returns_value() {
    let store = Store::new();
    store.set("/k", "v");

    assert_eq!(store.get("/k"), Some("v".to_string()));
    assert!(store.exists("/k"));
    assert_eq!(store.get("/missing"), None);
    assert!(!store.exists("/missing"));
}

#[test]
fn keys_are_normalized_to_absolute_paths() {
    let store = Store::new();
    store.set("a/b", "1");
    store.set("//c//d/", "2");

    assert_eq!(store.get("/a/b"), Some("1".to_string()));
    assert_eq!(store.get("/c/d"), Some("2".to_string()));
    assert_eq!(Store::normalize(""), "/");
    assert_eq!(Store::normalize("/x/"), "/x");
}

#[test]
fn get_all_kvs_is_ordered_by_key() {
    let store = Store::new();
    store.set("/b", "2");
    store.set("/a", "1");
    store.set("/c", "3");

    let keys: Vec<_> = store.get_all_kvs().into_iter().map(|kv| kv.key).collect();
    assert_eq!(keys, vec!["/a", "/b", "/c"]);
}

#[test]
fn purge_removes_everything() {
    let store = populated();
    assert!(!store.is_empty());

    store.purge();

    assert!(store.is_empty());
    assert_eq!(store.len(), 0);
}

#[test]
fn get_all_glob_does_not_cross_separators() {
    let store = populated();

    let matched = store.get_all("/app/database/*").unwrap();
    let keys: Vec<_> = matched.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["/app/database/host", "/app/database/port"]);

    // a single star must not descend into subdirectories
    let matched = store.get_all("/app/*").unwrap();
    let keys: Vec<_> = matched.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["/app/name"]);
}

#[test]
fn get_all_rejects_invalid_pattern() {
    let store = populated();
    assert!(store.get_all("/app/[").is_err());
}

#[test]
fn list_returns_immediate_children() {
    let store = populated();

    assert_eq!(store.list("/app"), vec!["database", "name", "upstreams"]);
    assert_eq!(store.list("/app/database"), vec!["host", "port"]);
    assert_eq!(store.list("/"), vec!["app"]);
    assert!(store.list("/nope").is_empty());
}

#[test]
fn list_includes_exact_key_basename() {
    let store = Store::new();
    store.set("/svc/endpoint", "x");

    assert_eq!(store.list("/svc/endpoint"), vec!["endpoint"]);
}

#[test]
fn list_dir_only_returns_directories() {
    let store = populated();

    assert_eq!(store.list_dir("/app"), vec!["database", "upstreams"]);
    assert!(store.list_dir("/app/database").is_empty());
}

#[test]
fn get_kv_returns_pair_with_normalized_key() {
    let store = populated();

    let kv = store.get_kv("app/name").unwrap();
    assert_eq!(kv.key, "/app/name");
    assert_eq!(kv.value, "web");
    assert!(store.get_kv("/absent").is_none());
}

#[test]
fn clones_share_the_same_map() {
    let store = Store::new();
    let clone = store.clone();

    clone.set("/shared", "yes");

    assert_eq!(store.get("/shared"), Some("yes".to_string()));
}
