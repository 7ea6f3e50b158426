mod common;

use common::TempDir;
use dirserve::auth::{CredentialStore, ha1};
use dirserve::config::{Access, Config};

// Environment variables are process-wide, so everything touching them
// lives in one test.
#[test]
fn test_config_load_from_environment() {
    unsafe {
        std::env::remove_var("LISTEN");
        std::env::remove_var("DIRSERVE_CONFIG");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.realm, "dirserve");
    assert!(cfg.shares.is_empty());

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");

    let dir = TempDir::new("config");
    let path = dir.write(
        "dirserve.yaml",
        b"listen_addr: 127.0.0.1:9000\nshares:\n  - mount: /files\n    path: /srv/files\n",
    );
    unsafe {
        std::env::set_var("DIRSERVE_CONFIG", &path);
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000", "LISTEN still wins");
    assert_eq!(cfg.shares[0].mount, "/files");

    unsafe {
        std::env::remove_var("LISTEN");
    }
    assert_eq!(Config::load().unwrap().listen_addr, "127.0.0.1:9000");

    unsafe {
        std::env::set_var("DIRSERVE_CONFIG", dir.path().join("missing.yaml"));
    }
    assert!(Config::load().is_err());

    unsafe {
        std::env::remove_var("DIRSERVE_CONFIG");
    }
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::from_yaml("listen_addr: 127.0.0.1:8000\n").unwrap();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.listen_addr, cfg2.listen_addr);
}

#[test]
fn test_config_full_yaml() {
    let cfg = Config::from_yaml(
        r#"
listen_addr: "0.0.0.0:5000"
realm: home
auth_failure_delay_ms: 250
read_buffer_size: 4096
max_head_size: 8192
shares:
  - mount: /pub
    path: /srv/pub
  - mount: /inbox
    path: /srv/inbox
    read: authenticated
    write: authenticated
users:
  - username: bob
    password: secret
  - username: carol
    ha1: 0123456789abcdef0123456789abcdef
"#,
    )
    .unwrap();

    assert!(cfg.listen_addr.starts_with("0.0.0.0"));
    assert_eq!(cfg.auth_failure_delay_ms, 250);
    assert_eq!(cfg.read_buffer_size, 4096);
    assert_eq!(cfg.max_head_size, 8192);
    assert_eq!(cfg.shares[1].read, Access::Authenticated);
    assert_eq!(cfg.shares[1].write, Access::Authenticated);
    assert_eq!(cfg.ha1("bob"), Some(ha1("bob", "home", "secret")));
    assert_eq!(
        cfg.ha1("carol").as_deref(),
        Some("0123456789abcdef0123456789abcdef")
    );
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_write_none() {
    let cfg = Config::from_yaml("shares:\n  - {mount: /a, path: /x, write: none}\n").unwrap();
    assert_eq!(cfg.shares[0].write, Access::Denied);
}

#[test]
fn test_config_validation_errors() {
    assert!(Config::default().validate().is_err(), "no shares");

    let relative = Config::from_yaml("shares:\n  - {mount: pub, path: /x}\n").unwrap();
    assert!(relative.validate().is_err());

    let no_secret = Config::from_yaml(
        "shares:\n  - {mount: /pub, path: /x}\nusers:\n  - username: dave\n",
    )
    .unwrap();
    assert!(no_secret.validate().is_err());

    let unreadable =
        Config::from_yaml("shares:\n  - {mount: /s, path: /srv, read: none}\n").unwrap();
    let err = unreadable.validate().unwrap_err();
    assert!(err.to_string().contains("read must be"), "{err}");
}

#[test]
fn test_config_rejects_unknown_access() {
    assert!(Config::from_yaml("shares:\n  - {mount: /a, path: /x, read: everyone}\n").is_err());
}
