use super::resource::*;
use crate::Error;
use crate::ResourceError;

fn file_backend() -> BackendSettings {
    BackendSettings {
        name: None,
        prefix: String::new(),
        keys: vec!["/".to_string()],
        interval: 0,
        watch: true,
        onetime: false,
        source: SourceSettings::File {
            path: "/etc/consync/data.toml".into(),
            poll_ms: 1000,
        },
    }
}

fn template(src: &str) -> TemplateSettings {
    TemplateSettings {
        src: src.into(),
        dst: "/etc/app.conf".into(),
        mode: "0644".to_string(),
        uid: None,
        gid: None,
        check_cmd: None,
        reload_cmd: None,
    }
}

fn resource_config() -> ResourceConfig {
    ResourceConfig {
        name: "web".to_string(),
        backends: vec![file_backend()],
        templates: vec![template("/etc/consync/app.conf.tmpl")],
        exec: ExecSettings::default(),
    }
}

#[test]
fn valid_config_passes_validation() {
    resource_config().validate().unwrap();
}

#[test]
fn zero_backends_are_rejected() {
    let mut config = resource_config();
    config.backends.clear();

    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::Resource(ResourceError::NoBackends)));
}

#[test]
fn empty_template_src_is_rejected() {
    let mut config = resource_config();
    config.templates = vec![template("")];

    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::Resource(ResourceError::EmptySrc)));
}

#[test]
fn bad_mode_is_rejected() {
    let mut config = resource_config();
    config.templates[0].mode = "rwxr--r--".to_string();

    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::Resource(ResourceError::InvalidFileMode(_))));
}

#[test]
fn bad_signal_is_rejected() {
    let mut config = resource_config();
    config.exec.reload_signal = Some("SIGBOGUS".to_string());

    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::Resource(ResourceError::InvalidSignal(_))));
}

#[test]
fn backend_name_defaults_to_the_source_kind() {
    let backend = file_backend().connect().unwrap();
    assert_eq!(backend.name, "file");

    let mut named = file_backend();
    named.name = Some("primary".to_string());
    assert_eq!(named.connect().unwrap().name, "primary");
}

#[test]
fn renderer_carries_mode_and_commands() {
    let mut settings = template("/etc/app.tmpl");
    settings.mode = "0600".to_string();
    settings.check_cmd = Some("true".to_string());

    let renderer = settings.build().unwrap();
    assert_eq!(renderer.mode, 0o600);
    assert_eq!(renderer.check_cmd.as_deref(), Some("true"));
    assert!(renderer.reload_cmd.is_none());
}

#[test]
fn exec_settings_build_an_executor() {
    let mut settings = ExecSettings {
        command: Some("app".to_string()),
        reload_signal: Some("hup".to_string()),
        kill_signal: Some("term".to_string()),
        kill_timeout: 3,
        splay: 1,
    };
    settings.build().unwrap();

    settings.reload_signal = Some("not-a-signal".to_string());
    assert!(settings.build().is_err());
}
