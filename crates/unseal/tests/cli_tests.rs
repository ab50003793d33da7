//! End-to-end tests for the unseal binary
//!
//! Each test builds a file-backed store in a scratch directory, seals
//! objects into it with a generated age identity, and drives the binary
//! through a config file pointing at both.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use unseal_engine::{seal, AgeKeyManager, FileObjectStore};

// ─── Helpers ───────────────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
    store: FileObjectStore,
    kms: AgeKeyManager,
    key_id: String,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        std::fs::create_dir(&root).unwrap();

        let kms = AgeKeyManager::generate();
        let key_id = kms.key_ids().remove(0);
        let identity = kms.export_identity(&key_id).unwrap();
        std::fs::write(dir.path().join("identity.key"), identity.as_bytes()).unwrap();

        std::fs::write(
            dir.path().join("config.yaml"),
            format!(
                "store:\n  kind: file\n  root: {}\nkeys:\n  key-file: {}\nretry:\n  initial-delay-ms: 1\n",
                root.display(),
                dir.path().join("identity.key").display()
            ),
        )
        .unwrap();

        Self {
            dir,
            store: FileObjectStore::new(root),
            kms,
            key_id,
        }
    }

    async fn add(&self, location: &str, object: &str, plaintext: &[u8]) {
        let doc = seal(&self.kms, &self.key_id, object, plaintext).await.unwrap();
        self.store.insert(location, object, &doc).await.unwrap();
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn unseal(&self, args: &[&str], env: &[(&str, &str)]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_unseal"));
        command.arg("--config").arg(self.config()).args(args);
        for var in [
            "UNSEAL_CONFIG",
            "UNSEAL_MAX_CONCURRENCY",
            "UNSEAL_TIMEOUT_MS",
            "UNSEAL_FORCE_REFRESH",
            "UNSEAL_RETRY_MAX_ATTEMPTS",
            "UNSEAL_KEY_FILE",
            "UNSEAL_KEY_ENV",
            "UNSEAL_STORE_ROOT",
            "UNSEAL_S3_REGION",
            "UNSEAL_S3_ENDPOINT",
        ] {
            command.env_remove(var);
        }
        command.envs(env.iter().copied());
        command.output().unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

// ─── exec ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_exec_passes_resolved_environment() {
    let ws = Workspace::new();
    ws.add("proj", "api-key", b"abc123").await;

    let output = ws.unseal(
        &["exec", "--", "sh", "-c", "printf '%s:%s' \"$API_KEY\" \"$PORT\""],
        &[("API_KEY", "secret://proj/api-key"), ("PORT", "8080")],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "abc123:8080");
}

#[tokio::test]
async fn test_exec_propagates_child_status() {
    let ws = Workspace::new();
    let output = ws.unseal(&["exec", "--", "sh", "-c", "exit 7"], &[]);
    assert_eq!(output.status.code(), Some(7));
}

#[tokio::test]
async fn test_exec_fails_closed_on_missing_object() {
    let ws = Workspace::new();
    ws.add("proj", "present", b"s3cr3t-present").await;

    let output = ws.unseal(
        &["exec", "--", "sh", "-c", "echo ran"],
        &[
            ("PRESENT", "secret://proj/present"),
            ("API_KEY", "secret://proj/missing"),
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    let err = stderr(&output);
    assert!(err.contains("API_KEY"));
    assert!(err.contains("not-found"));
    assert!(!err.contains("s3cr3t-present"));
}

#[tokio::test]
async fn test_exec_malformed_reference_is_misuse() {
    let ws = Workspace::new();
    let output = ws.unseal(&["exec", "--", "true"], &[("X", "secret://proj")]);
    assert_eq!(output.status.code(), Some(61));
}

#[test]
fn test_unknown_flag_is_misuse() {
    let ws = Workspace::new();
    let output = ws.unseal(&["list", "proj", "--no-such-flag"], &[]);
    assert_eq!(output.status.code(), Some(61));
}

// ─── access / list / check / materialize ───────────────────────────────────

#[tokio::test]
async fn test_access_prints_plaintext() {
    let ws = Workspace::new();
    ws.add("proj", "db-password", b"hunter2").await;

    let output = ws.unseal(&["access", "secret://proj/db-password"], &[]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(output.stdout, b"hunter2");
}

#[tokio::test]
async fn test_list_prints_names() {
    let ws = Workspace::new();
    ws.add("proj", "tls/cert", b"c").await;
    ws.add("proj", "tls/key", b"k").await;
    ws.add("proj", "db", b"d").await;

    let output = ws.unseal(&["list", "proj", "--prefix", "tls/", "--json"], &[]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let names: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(names, vec!["tls/cert", "tls/key"]);
}

#[tokio::test]
async fn test_check_reports_without_values() {
    let ws = Workspace::new();
    ws.add("proj", "api-key", b"abc123").await;
    let dest = ws.path().join("never-written");
    let with_dest = format!("secret://proj/api-key#{}", dest.display());

    let output = ws.unseal(
        &["check", "--json"],
        &[
            ("API_KEY", "secret://proj/api-key"),
            ("API_KEY_FILE", with_dest.as_str()),
            ("MISSING", "secret://proj/missing"),
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    let status = |binding: &str| {
        rows.iter()
            .find(|r| r["binding"] == binding)
            .map(|r| r["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status("API_KEY"), "ok");
    assert_eq!(status("API_KEY_FILE"), "ok");
    assert!(status("MISSING").starts_with("not-found"));

    assert!(!stdout(&output).contains("abc123"));
    assert!(!stderr(&output).contains("abc123"));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_materialize_writes_prefix() {
    let ws = Workspace::new();
    ws.add("proj", "tls/cert.pem", b"cert").await;
    ws.add("proj", "tls/key.pem", b"key").await;
    let out = ws.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let output = ws.unseal(
        &[
            "materialize",
            "proj",
            "--dir",
            out.to_str().unwrap(),
            "--prefix",
            "tls/",
        ],
        &[],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(std::fs::read(out.join("tls/cert.pem")).unwrap(), b"cert");
    assert_eq!(std::fs::read(out.join("tls/key.pem")).unwrap(), b"key");
}
