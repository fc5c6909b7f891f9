//! Integration test: seal at one node, open at another.
//!
//! Exercises the whole protocol over the in-process network:
//! 1. Seal a message at node 0 (DKG across the cohort)
//! 2. Open too early at the last node (refused locally, nothing broadcast)
//! 3. Wait out the duration
//! 4. Open at the last node (reveal round, reconstruction, decryption)
//! 5. Open again (served from the cached secret)

use std::time::Duration;

use timevault::{SecretId, SecretState, ThresholdConfig, VaultConfig, VaultError};
use timevault_integration_tests::Cohort;

const MESSAGE: &[u8] = b"Hello World!";
const DURATION: Duration = Duration::from_secs(3);

/// Extra wait past the duration so every node's timer has fired.
const MARGIN: Duration = Duration::from_millis(500);

#[tokio::test(start_paused = true)]
async fn seal_then_open_across_cohort() {
    let mut cohort = Cohort::start(5, VaultConfig::default());

    // =========================================================
    // Step 1: Seal
    // =========================================================
    let sealed = cohort.node(0).seal(MESSAGE, DURATION).await.expect("seal");
    assert_eq!(sealed.sid.as_str(), "TVSS_0_0");

    // =========================================================
    // Step 2: Early open
    // =========================================================
    let early = cohort.node(4).open(&sealed.sid, &sealed.ciphertext).await;
    assert_eq!(early, Err(VaultError::NotYetExpired("TVSS_0_0".to_string())));
    assert_eq!(
        cohort.tap(4).broadcasts("RevInit"),
        0,
        "an early open must not start a reveal round"
    );

    // =========================================================
    // Step 3: Wait out the duration
    // =========================================================
    tokio::time::sleep(DURATION + MARGIN).await;

    for index in 0..cohort.len() {
        let status = cohort.node(index).status(&sealed.sid).await.expect("status");
        assert_eq!(status.deals, 5, "node {index} deals");
        assert_eq!(status.confirmations, 5, "node {index} confirmations");
        assert!(status.expired, "node {index} expired");
        assert_eq!(status.state, SecretState::Expired);
        assert_eq!(status.duration, DURATION);
    }

    // =========================================================
    // Step 4: Open
    // =========================================================
    let plaintext = cohort
        .node(4)
        .open(&sealed.sid, &sealed.ciphertext)
        .await
        .expect("open");
    assert_eq!(plaintext, MESSAGE);
    assert_eq!(cohort.tap(4).broadcasts("RevInit"), 1);
    for index in 0..4 {
        assert_eq!(cohort.tap(index).unicasts("RevShare"), 1, "node {index} share");
    }

    // =========================================================
    // Step 5: Repeat open hits the cache
    // =========================================================
    let again = cohort
        .node(4)
        .open(&sealed.sid, &sealed.ciphertext)
        .await
        .expect("open again");
    assert_eq!(again, MESSAGE);
    assert_eq!(cohort.tap(4).broadcasts("RevInit"), 1);
    let status = cohort.node(4).status(&sealed.sid).await.expect("status");
    assert_eq!(status.state, SecretState::Reconstructed);

    cohort.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sealer_can_open_its_own_message() {
    let mut cohort = Cohort::start(3, VaultConfig::default());
    let sealed = cohort.node(1).seal(b"self", DURATION).await.expect("seal");
    assert_eq!(sealed.sid.as_str(), "TVSS_1_0");

    tokio::time::sleep(DURATION + MARGIN).await;
    let plaintext = cohort
        .node(1)
        .open(&sealed.sid, &sealed.ciphertext)
        .await
        .expect("open");
    assert_eq!(plaintext, b"self");
    cohort.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_secret_is_reported() {
    let mut cohort = Cohort::start(3, VaultConfig::default());
    let sealed = cohort.node(0).seal(MESSAGE, DURATION).await.expect("seal");

    let sid = SecretId::parse("TVSS_999").expect("printable id");
    let result = cohort.node(1).open(&sid, &sealed.ciphertext).await;
    assert_eq!(result, Err(VaultError::UnknownSecret("TVSS_999".to_string())));
    assert_eq!(cohort.tap(1).broadcasts("RevInit"), 0);

    let status = cohort.node(2).status(&sid).await;
    assert!(matches!(status, Err(VaultError::UnknownSecret(_))));
    cohort.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_seals_by_different_nodes() {
    let mut cohort = Cohort::start(4, VaultConfig::default());

    let (alpha, bravo) = tokio::join!(
        cohort.node(0).seal(b"alpha", DURATION),
        cohort.node(2).seal(b"bravo", DURATION * 2),
    );
    let alpha = alpha.expect("seal alpha");
    let bravo = bravo.expect("seal bravo");
    assert_eq!(alpha.sid.as_str(), "TVSS_0_0");
    assert_eq!(bravo.sid.as_str(), "TVSS_2_0");

    tokio::time::sleep(DURATION + MARGIN).await;
    let opened = cohort
        .node(3)
        .open(&alpha.sid, &alpha.ciphertext)
        .await
        .expect("open alpha");
    assert_eq!(opened, b"alpha");

    // The second secret carries its own, longer duration.
    let early = cohort.node(1).open(&bravo.sid, &bravo.ciphertext).await;
    assert!(matches!(early, Err(VaultError::NotYetExpired(_))));

    tokio::time::sleep(DURATION).await;
    let opened = cohort
        .node(1)
        .open(&bravo.sid, &bravo.ciphertext)
        .await
        .expect("open bravo");
    assert_eq!(opened, b"bravo");
    cohort.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconstruct_with_threshold_below_cohort() {
    let config = VaultConfig {
        thresholds: ThresholdConfig {
            reconstruct: Some(3),
            verify: None,
        },
        ..VaultConfig::default()
    };
    let mut cohort = Cohort::start(5, config);
    let sealed = cohort
        .node(1)
        .seal(b"three of five", DURATION)
        .await
        .expect("seal");

    tokio::time::sleep(DURATION + MARGIN).await;

    // Two nodes leave; three shares are still enough.
    cohort.stop(3).await;
    cohort.stop(4).await;

    let plaintext = cohort
        .node(0)
        .open(&sealed.sid, &sealed.ciphertext)
        .await
        .expect("open");
    assert_eq!(plaintext, b"three of five");
    cohort.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_opens_share_one_reveal() {
    let mut cohort = Cohort::start(5, VaultConfig::default());
    let sealed = cohort.node(0).seal(MESSAGE, DURATION).await.expect("seal");
    tokio::time::sleep(DURATION + MARGIN).await;

    let opener = cohort.node(4);
    let (first, second) = tokio::join!(
        opener.open(&sealed.sid, &sealed.ciphertext),
        opener.open(&sealed.sid, &sealed.ciphertext),
    );
    assert_eq!(first.expect("first open"), MESSAGE);
    assert_eq!(second.expect("second open"), MESSAGE);

    // The second open re-requests shares for the round already running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cohort.tap(4).broadcasts("RevInit"), 2);
    for index in 0..4 {
        assert_eq!(cohort.tap(index).unicasts("RevShare"), 2, "node {index} shares");
    }
    let status = cohort.node(4).status(&sealed.sid).await.expect("status");
    assert_eq!(status.state, SecretState::Reconstructed);
    cohort.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sub_millisecond_duration_rounds_up() {
    let mut cohort = Cohort::start(3, VaultConfig::default());
    let sealed = cohort
        .node(0)
        .seal(b"blink", Duration::from_micros(500))
        .await
        .expect("seal");

    for index in 0..cohort.len() {
        let status = cohort.node(index).status(&sealed.sid).await.expect("status");
        assert_eq!(status.duration, Duration::from_millis(1), "node {index}");
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    let plaintext = cohort
        .node(1)
        .open(&sealed.sid, &sealed.ciphertext)
        .await
        .expect("open");
    assert_eq!(plaintext, b"blink");
    cohort.shutdown().await;
}
