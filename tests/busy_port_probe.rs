//! End-to-end check that a real subprocess's port-busy boot error — not a
//! hand-rolled `PortAttempt::Busy` closure — is what drives
//! `session::port::probe` past an occupied port, per spec section 4.E.

use std::path::PathBuf;

use repo_agent_host::session::backend::{try_bind, BackendConfig};
use repo_agent_host::session::port::probe;

fn fixture_config() -> BackendConfig {
    BackendConfig {
        command: env!("CARGO_BIN_EXE_fake_agent_backend").to_string(),
        args: Vec::new(),
        cwd: PathBuf::from("."),
        provider: "anthropic".to_string(),
        model: "sonnet".to_string(),
    }
}

#[tokio::test]
async fn probe_advances_past_a_real_busy_port() {
    let base: u16 = 38420;
    std::env::set_var("FAKE_BACKEND_BUSY_PORT", base.to_string());

    let config = fixture_config();
    let handle = probe(base, 3, |port| {
        let config = config.clone();
        async move { try_bind(&config, port).await }
    })
    .await
    .expect("probe should advance past the busy port and bind the next one");

    assert_eq!(handle.port(), base + 1);
    handle.close().await;

    std::env::remove_var("FAKE_BACKEND_BUSY_PORT");
}

#[tokio::test]
async fn probe_binds_immediately_when_first_port_is_free() {
    let base: u16 = 38430;
    std::env::set_var("FAKE_BACKEND_BUSY_PORT", "0");

    let config = fixture_config();
    let handle = probe(base, 3, |port| {
        let config = config.clone();
        async move { try_bind(&config, port).await }
    })
    .await
    .expect("probe should bind the first candidate port");

    assert_eq!(handle.port(), base);
    handle.close().await;

    std::env::remove_var("FAKE_BACKEND_BUSY_PORT");
}
