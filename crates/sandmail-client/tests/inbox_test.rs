//! Inbox operations end to end against the simulated server.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use sandmail_client::{
    ClientConfig, ClientError, ConfigViolation, CreateInboxOptions, EmailFilter, Environment, Inbox,
    InboxExport, SandboxClient, StrategyKind, WithheldReason,
};
use sandmail_crypto::CryptoError;
use sandmail_harness::{SimEmail, SimEnv, SimServer};

fn config(strategy: StrategyKind) -> ClientConfig {
    ClientConfig {
        strategy,
        polling_interval: Duration::from_secs(1),
        sse_reconnect_interval: Duration::from_secs(1),
        default_wait_timeout: Duration::from_secs(30),
        ..ClientConfig::new("https://sandbox.test", "test-key")
    }
}

fn client(server: &SimServer, env: &SimEnv) -> SandboxClient {
    SandboxClient::new(config(StrategyKind::Auto), Arc::new(server.clone()), Arc::new(env.clone()))
        .expect("valid config")
}

async fn inbox(client: &SandboxClient) -> Inbox {
    client.create_inbox(CreateInboxOptions::default()).await.expect("create inbox")
}

#[tokio::test(start_paused = true)]
async fn create_inbox_pins_server_key() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);

    let inbox = client
        .create_inbox(CreateInboxOptions {
            ttl: Some(600),
            email_address: Some("qa@sandbox.test".to_string()),
        })
        .await
        .expect("create");

    assert_eq!(inbox.email_address(), "qa@sandbox.test");
    assert_eq!(inbox.server_sig_pk(), server.server_sig_pk());
    assert_eq!(inbox.expires_at() - env.wall_clock(), TimeDelta::seconds(600));
}

/// WHY THIS TEST IS NEEDED:
/// Verification is fail-closed per item. A tampered body and a forged
/// signature must each be withheld with the reason, while the honest email
/// in the same listing is still returned.
#[tokio::test(start_paused = true)]
async fn list_withholds_unverifiable_items_only() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;

    let good = server.deliver(
        inbox.inbox_hash(),
        &SimEmail::new("Welcome", "hello@example.com").with_html("<p>hi</p>"),
    );
    let tampered = server.deliver_tampered(inbox.inbox_hash(), &SimEmail::new("x", "y"));
    let forged = server.deliver_forged(inbox.inbox_hash(), &SimEmail::new("x", "y"));

    let batch = inbox.list_emails().await.expect("listing");

    assert_eq!(batch.emails.len(), 1);
    assert_eq!(batch.emails[0].id, good);
    assert_eq!(batch.emails[0].subject, "Welcome");
    assert_eq!(batch.emails[0].html.as_deref(), Some("<p>hi</p>"));
    assert_eq!(batch.emails[0].to, vec![inbox.email_address().to_string()]);

    let withheld: Vec<_> = batch.withheld.iter().map(|w| w.id.clone()).collect();
    assert_eq!(withheld, vec![tampered, forged]);
    assert!(batch.withheld.iter().all(|w| matches!(
        w.reason,
        WithheldReason::Crypto(CryptoError::SignatureInvalid { .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn get_email_rejects_tampered_envelope() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;

    let id = server.deliver_tampered(inbox.inbox_hash(), &SimEmail::new("x", "y"));
    let err = inbox.get_email(&id).await.expect_err("must not decrypt");

    assert!(matches!(err, ClientError::Crypto(CryptoError::SignatureInvalid { .. })), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn wait_for_email_skips_non_matching() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let hash = inbox.inbox_hash().clone();

    let sender = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        sender.deliver(&hash, &SimEmail::new("Newsletter", "news@example.com"));
        sender.deliver_tampered(&hash, &SimEmail::new("Password reset", "noreply@example.com"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        sender.deliver(&hash, &SimEmail::new("Password reset", "noreply@example.com"));
    });

    let filter = EmailFilter::any().subject_contains("reset").from_contains("noreply@");
    let err = inbox.wait_for_email(&filter, Some(Duration::from_millis(500))).await;
    assert!(matches!(err, Err(ClientError::Timeout(_))), "{err:?}");

    let filter = EmailFilter::any().subject_contains("Password").from_contains("noreply@");
    let email = inbox.wait_for_email(&filter, None).await.expect("matching email");
    assert_eq!(email.subject, "Password reset");
    assert_eq!(server.email_ids(inbox.inbox_hash()).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn wait_for_email_finds_existing_mail() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    server.deliver(inbox.inbox_hash(), &SimEmail::new("Already here", "a@example.com"));

    let email = inbox
        .wait_for_email(&EmailFilter::any(), Some(Duration::from_secs(1)))
        .await
        .expect("existing email");
    assert_eq!(email.subject, "Already here");
}

#[tokio::test(start_paused = true)]
async fn wait_for_email_count_collects_all() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let hash = inbox.inbox_hash().clone();

    let sender = server.clone();
    tokio::spawn(async move {
        for n in 0..3 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            sender.deliver(&hash, &SimEmail::new(format!("#{n}"), "a@example.com"));
        }
    });

    let emails = inbox.wait_for_email_count(3, None).await.expect("three emails");
    let subjects: Vec<_> = emails.iter().map(|e| e.subject.as_str()).collect();
    assert_eq!(subjects, vec!["#0", "#1", "#2"]);
}

#[tokio::test(start_paused = true)]
async fn next_event_does_not_miss_between_calls() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;

    let timeout = inbox.next_event(Some(Duration::from_millis(100))).await;
    assert!(matches!(timeout, Err(ClientError::Timeout(_))));

    let first = server.deliver(inbox.inbox_hash(), &SimEmail::new("1", "a@example.com"));
    let second = server.deliver(inbox.inbox_hash(), &SimEmail::new("2", "a@example.com"));

    let one = inbox.next_event(None).await.expect("first event");
    let two = inbox.next_event(None).await.expect("second event");
    assert_eq!(one.email_ids, vec![first]);
    assert_eq!(two.email_ids, vec![second]);
}

#[tokio::test(start_paused = true)]
async fn mark_read_and_delete() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let id = server.deliver(inbox.inbox_hash(), &SimEmail::new("s", "f@example.com"));

    inbox.mark_read(&id).await.expect("mark read");
    assert!(inbox.get_email(&id).await.expect("fetch").is_read);

    let before = inbox.sync_state().await.expect("sync");
    inbox.delete_email(&id).await.expect("delete");
    let after = inbox.sync_state().await.expect("sync");
    assert_eq!(after.email_count, 0);
    assert_ne!(before.emails_hash, after.emails_hash);

    let missing = inbox.get_email(&id).await.expect_err("deleted");
    assert!(matches!(missing, ClientError::Transport(ref t) if t.is_not_found()), "{missing:?}");
}

#[tokio::test(start_paused = true)]
async fn export_import_round_trip() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let original_client = client(&server, &env);
    let original = inbox(&original_client).await;
    let id = server.deliver(original.inbox_hash(), &SimEmail::new("kept", "a@example.com"));

    let json = original_client.export_inbox(&original).to_json().expect("json");
    assert!(json.contains("\"secretKey\""));

    let other_client = client(&server, &env);
    let restored = other_client.import_inbox_json(&json).await.expect("import");

    assert_eq!(restored.inbox_hash(), original.inbox_hash());
    assert_eq!(restored.server_sig_pk(), original.server_sig_pk());
    let email = restored.get_email(&id).await.expect("decrypts with restored key");
    assert_eq!(email.subject, "kept");
}

#[tokio::test(start_paused = true)]
async fn export_import_through_file() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("inbox.json");

    client.export_inbox_to_file(&inbox, &path).await.expect("write export");
    let restored = client.import_inbox_from_file(&path).await.expect("read export");

    assert_eq!(restored.email_address(), inbox.email_address());
}

/// WHY THIS TEST IS NEEDED:
/// An expired export must be rejected locally. Talking to the server first
/// would leak the inbox hash for no benefit and could not succeed anyway.
#[tokio::test(start_paused = true)]
async fn expired_import_makes_no_network_call() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let export = client.export_inbox(&inbox);

    env.advance_wall_clock(TimeDelta::hours(2));
    let calls_before = server.calls();

    let err = client.import_inbox(&export).await.expect_err("expired");
    assert!(matches!(err, ClientError::ExpiredInbox { .. }), "{err:?}");
    assert_eq!(server.calls(), calls_before);
}

#[tokio::test(start_paused = true)]
async fn malformed_exports_rejected_before_network() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let export = client.export_inbox(&inbox);
    let calls_before = server.calls();

    let future_version = InboxExport { version: 2, ..export.clone() };
    let err = client.import_inbox(&future_version).await.expect_err("version");
    assert!(matches!(err, ClientError::Protocol(_)), "{err:?}");

    let plaintext = InboxExport { encrypted: false, ..export.clone() };
    assert!(matches!(client.import_inbox(&plaintext).await, Err(ClientError::Protocol(_))));

    let short_key = InboxExport { secret_key: vec![0; 16], ..export };
    assert!(matches!(client.import_inbox(&short_key).await, Err(ClientError::Protocol(_))));

    let garbage = client.import_inbox_json("{\"version\": 1}").await;
    assert!(matches!(garbage, Err(ClientError::Protocol(_))));

    assert_eq!(server.calls(), calls_before);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_lists_every_violation() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let config = ClientConfig {
        polling_interval: Duration::ZERO,
        sse_max_reconnect_attempts: 0,
        ..ClientConfig::new("ftp://sandbox.test", "")
    };

    let err = SandboxClient::new(config, Arc::new(server), Arc::new(env)).expect_err("invalid");
    let violations = match err {
        ClientError::InvalidConfig(violations) => violations,
        other => panic!("expected InvalidConfig, got {other:?}"),
    };
    assert_eq!(violations, vec![
        ConfigViolation::InvalidBaseUrl("ftp://sandbox.test".to_string()),
        ConfigViolation::MissingApiKey,
        ConfigViolation::ZeroDuration { field: "polling_interval" },
        ConfigViolation::ZeroReconnectAttempts,
    ]);
}

#[tokio::test(start_paused = true)]
async fn server_info_and_key_check() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);

    let info = client.server_info().await.expect("server info");
    assert_eq!(info.server_sig_pk, server.server_sig_pk());
    assert_eq!(info.algs.kem, "ML-KEM-768");

    assert!(client.check_key().await.expect("check"));
    server.set_key_accepted(false);
    assert!(!client.check_key().await.expect("check"));
}

#[tokio::test(start_paused = true)]
async fn dispose_interrupts_waits() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;

    let waiter = inbox.clone();
    let pending = tokio::spawn(async move { waiter.wait_for_email(&EmailFilter::any(), None).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    inbox.dispose();
    let result = pending.await.expect("task");
    assert!(matches!(result, Err(ClientError::Disposed)), "{result:?}");
    assert!(matches!(inbox.list_emails().await, Err(ClientError::Disposed)));
}

#[tokio::test(start_paused = true)]
async fn delete_removes_server_side_and_disposes() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;
    let other = client.create_inbox(CreateInboxOptions::default()).await.expect("second");

    inbox.delete().await.expect("delete");

    assert!(inbox.is_disposed());
    assert_eq!(server.calls().delete_inbox, 1);
    assert!(!other.is_disposed());
    other.sync_state().await.expect("sibling unaffected");
}

#[tokio::test(start_paused = true)]
async fn client_dispose_reaches_every_inbox() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let client = client(&server, &env);
    let inbox = inbox(&client).await;

    client.dispose();

    assert!(inbox.is_disposed());
    assert!(matches!(client.server_info().await, Err(ClientError::Disposed)));
}
