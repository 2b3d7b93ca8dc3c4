//! Store-backed template functions.
//!
//! Every function closes over a clone of the merged store, so a template
//! observes one consistent store instance for the duration of a render.
//! Formatting concerns are covered by minijinja's builtin filters.

use minijinja::Environment;
use minijinja::Error as TemplateError;
use minijinja::ErrorKind;
use minijinja::Value;

use crate::Store;

fn missing_key(key: &str) -> TemplateError {
    TemplateError::new(ErrorKind::InvalidOperation, format!("key does not exist: {key}"))
}

fn bad_pattern(
    pattern: &str,
    err: glob::PatternError,
) -> TemplateError {
    TemplateError::new(
        ErrorKind::InvalidOperation,
        format!("invalid pattern {pattern}: {err}"),
    )
}

/// Builds a render environment exposing the store lookups:
/// `exists`, `get`, `gets`, `getv`, `getvs`, `ls`, `lsdir`.
pub(crate) fn template_env(store: &Store) -> Environment<'static> {
    let mut env = Environment::new();

    let s = store.clone();
    env.add_function("exists", move |key: String| s.exists(&key));

    let s = store.clone();
    env.add_function("get", move |key: String| -> Result<Value, TemplateError> {
        s.get_kv(&key)
            .map(Value::from_serialize)
            .ok_or_else(|| missing_key(&key))
    });

    let s = store.clone();
    env.add_function("gets", move |pattern: String| -> Result<Value, TemplateError> {
        s.get_all(&pattern)
            .map(Value::from_serialize)
            .map_err(|e| bad_pattern(&pattern, e))
    });

    let s = store.clone();
    env.add_function(
        "getv",
        move |key: String, default: Option<String>| -> Result<String, TemplateError> {
            match s.get(&key) {
                Some(value) => Ok(value),
                None => default.ok_or_else(|| missing_key(&key)),
            }
        },
    );

    let s = store.clone();
    env.add_function("getvs", move |pattern: String| -> Result<Value, TemplateError> {
        s.get_all(&pattern)
            .map(|kvs| Value::from_serialize(kvs.into_iter().map(|kv| kv.value).collect::<Vec<_>>()))
            .map_err(|e| bad_pattern(&pattern, e))
    });

    let s = store.clone();
    env.add_function("ls", move |dir: String| Value::from_serialize(s.list(&dir)));

    let s = store.clone();
    env.add_function("lsdir", move |dir: String| Value::from_serialize(s.list_dir(&dir)));

    env
}
