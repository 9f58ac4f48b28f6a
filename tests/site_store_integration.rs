use sshferry::SiteConfig;
use sshferry::site::AuthMethod;
use sshferry::site_store::SiteStore;

fn temp_store(tag: &str) -> SiteStore {
    let dir =
        std::env::temp_dir().join(format!("sshferry-it-store-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    SiteStore::new(dir.join("sites.json"))
}

fn secret_site() -> SiteConfig {
    let mut site = SiteConfig::new("gpu-box", "connect.westb.seetacloud.com", "root");
    site.port = 16921;
    site.remote_root = "/root/autodl-tmp".into();
    site.auth_method = AuthMethod::Key;
    site.key_path = Some("/home/u/.ssh/id_ed25519".into());
    site.password = Some("topsecret".into());
    site.key_passphrase = Some("alsosecret".into());
    site.ssh_options = vec!["ServerAliveInterval=30".into()];
    site
}

#[test]
fn save_load_round_trip_preserves_persistable_fields() {
    let store = temp_store("roundtrip");
    store.save(&[secret_site()]).unwrap();
    let loaded = store.load();
    assert_eq!(loaded.len(), 1);
    let site = &loaded[0];
    assert_eq!(site.name, "gpu-box");
    assert_eq!(site.host, "connect.westb.seetacloud.com");
    assert_eq!(site.port, 16921);
    assert_eq!(site.auth_method, AuthMethod::Key);
    assert_eq!(site.remote_root, "/root/autodl-tmp");
    assert_eq!(site.ssh_options, vec!["ServerAliveInterval=30".to_string()]);
}

#[test]
fn secrets_are_structurally_absent_from_disk() {
    let store = temp_store("secrets");
    store.save(&[secret_site()]).unwrap();
    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(!raw.contains("topsecret"));
    assert!(!raw.contains("alsosecret"));
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    for record in value.as_array().unwrap() {
        let obj = record.as_object().unwrap();
        assert!(!obj.contains_key("password"));
        assert!(!obj.contains_key("key_passphrase"));
    }
}

#[test]
fn load_tolerates_missing_and_broken_files() {
    let store = temp_store("tolerant");
    assert!(store.load().is_empty());
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(store.path(), "multi\nline\ngarbage").unwrap();
    assert!(store.load().is_empty());
}

#[test]
fn missing_remote_root_defaults_to_slash() {
    let store = temp_store("defaults");
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(
        store.path(),
        r#"[{"name":"bare","host":"h","username":"u"}]"#,
    )
    .unwrap();
    let sites = store.load();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].remote_root, "/");
    assert_eq!(sites[0].port, 22);
    assert_eq!(sites[0].auth_method, AuthMethod::Password);
}
