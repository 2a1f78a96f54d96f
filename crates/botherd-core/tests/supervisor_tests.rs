//! End-to-end supervisor tests against real child processes.
//!
//! Bots are stand-in shell scripts carrying the generic executable name,
//! so the full launch path runs: rename tagging, spawn, capture, kill by
//! process-table match. Bot names are kept short because the kernel
//! truncates process names and the tagged name must stay recognizable.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use botherd_core::{BotSupervisor, Settings};
use tempfile::TempDir;

fn make_fleet(bots: &[(&str, &str)]) -> (TempDir, BotSupervisor) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("botherd_core=debug")),
        )
        .with_test_writer()
        .try_init();

    let dir = TempDir::new().unwrap();
    for (name, body) in bots {
        let folder = dir.path().join(name);
        fs::create_dir(&folder).unwrap();
        let exe = folder.join("start.exe");
        fs::write(&exe, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mut settings = Settings::default();
    settings.base_directory = dir.path().to_path_buf();
    settings.bot_folders = bots.iter().map(|(n, _)| n.to_string()).collect();
    settings.all_bots = settings.bot_folders.clone();
    settings.auto_restart = false;
    (dir, BotSupervisor::new(settings))
}

#[tokio::test(flavor = "multi_thread")]
async fn start_capture_status_kill_cycle() {
    let (_dir, sup) = make_fleet(&[("a1", "echo hello\necho oops >&2\nsleep 30")]);

    assert!(sup.start("a1", false));
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Both streams land in the same history, stamped.
    let lines = sup.recent_output("a1");
    assert!(lines.iter().any(|l| l.ends_with("] hello")), "{lines:?}");
    assert!(lines.iter().any(|l| l.ends_with("] oops")), "{lines:?}");

    let report = sup.status();
    let a1 = &report["a1"];
    assert!(a1.running);
    assert!(a1.pid.is_some());
    assert!(a1.selected);

    assert!(sup.kill("a1"));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!sup.status()["a1"].running);
    // History survives the kill.
    assert!(!sup.recent_output("a1").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_refused_while_running() {
    let (_dir, sup) = make_fleet(&[("a1", "sleep 30")]);

    assert!(sup.start("a1", false));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!sup.start("a1", false));

    assert!(sup.kill("a1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_receives_live_lines() {
    let (_dir, sup) = make_fleet(&[("a1", "sleep 0.2\necho tick\nsleep 30")]);

    assert!(sup.start("a1", false));
    let mut rx = sup.subscribe_output("a1").expect("capture channel");

    let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("line within deadline")
        .expect("channel open");
    assert!(line.ends_with("] tick"), "{line}");

    sup.kill("a1");
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_freezes_record_after_self_exit() {
    let (_dir, sup) = make_fleet(&[("a1", "echo bye")]);

    assert!(sup.start("a1", false));
    tokio::time::sleep(Duration::from_millis(500)).await;
    sup.poll();

    let report = sup.status();
    assert!(!report["a1"].running);
    assert!(report["a1"].pid.is_none());
    assert!(report["a1"].uptime_secs < 5);
    assert!(sup
        .recent_output("a1")
        .iter()
        .any(|l| l.ends_with("] bye")));

    // Killing an already-dead bot stays a clean no-op.
    assert!(!sup.kill("a1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_replaces_the_process() {
    let (_dir, sup) = make_fleet(&[("a1", "sleep 30")]);

    assert!(sup.start("a1", false));
    tokio::time::sleep(Duration::from_millis(300)).await;
    let first_pid = sup.status()["a1"].pid.expect("running");

    assert!(sup.restart("a1").await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second_pid = sup.status()["a1"].pid.expect("running after restart");
    assert_ne!(first_pid, second_pid);

    assert!(sup.kill("a1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduled_restart_fires_and_replaces_the_process() {
    let (_dir, sup) = make_fleet(&[("a1", "sleep 30")]);
    let mut settings = sup.settings();
    settings.auto_restart = true;
    settings.restart_interval_secs = 1;
    sup.set_settings(settings);

    assert!(sup.start("a1", false));
    // The timer was armed with the 1 s interval; widen it now so the
    // relaunch does not re-arm a short timer under the assertions.
    let mut settings = sup.settings();
    settings.restart_interval_secs = 3600;
    sup.set_settings(settings);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let first_pid = sup.status()["a1"].pid.expect("running");

    // Timer (1 s) plus the restart settle delay (2 s), with margin.
    tokio::time::sleep(Duration::from_millis(4500)).await;
    let second_pid = sup.status()["a1"].pid.expect("running after timer");
    assert_ne!(first_pid, second_pid);

    assert!(sup.kill("a1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_cancels_the_restart_timer() {
    let (_dir, sup) = make_fleet(&[("a1", "sleep 30")]);
    let mut settings = sup.settings();
    settings.auto_restart = true;
    settings.restart_interval_secs = 1;
    sup.set_settings(settings);

    assert!(sup.start("a1", false));
    assert!(sup.kill("a1"));

    // Past the timer and settle window: nothing came back.
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(!sup.status()["a1"].running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_keep_bots_distinct() {
    let (dir, sup) = make_fleet(&[("a1", "sleep 30"), ("b2", "sleep 30")]);

    // Both bots ship the same generic executable name; racing launches
    // must still tag and spawn each bot's own file.
    let t1 = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.start("a1", false) })
    };
    let t2 = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.start("b2", false) })
    };
    assert!(t1.await.unwrap());
    assert!(t2.await.unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(dir.path().join("a1").join("start_a1.exe").exists());
    assert!(dir.path().join("b2").join("start_b2.exe").exists());

    let report = sup.status();
    let pid_a = report["a1"].pid.expect("a1 running");
    let pid_b = report["b2"].pid.expect("b2 running");
    assert_ne!(pid_a, pid_b);

    assert_eq!(sup.kill_all(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_restart_survives_self_death() {
    // The first run announces itself and dies; the relaunch runs long.
    let (_dir, sup) = make_fleet(&[(
        "a1",
        "if [ -f ran_once ]; then echo twice; sleep 30; else touch ran_once; echo once; fi",
    )]);
    let mut settings = sup.settings();
    settings.auto_restart = true;
    settings.restart_interval_secs = 1;
    sup.set_settings(settings);

    assert!(sup.start("a1", false));
    // Widen the interval before the relaunch re-arms its own timer.
    let mut settings = sup.settings();
    settings.restart_interval_secs = 3600;
    sup.set_settings(settings);

    tokio::time::sleep(Duration::from_millis(500)).await;
    sup.poll();
    assert!(!sup.status()["a1"].running);

    // Self-death leaves the timer armed: timer (1 s) plus settle (2 s).
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(sup.status()["a1"].running);

    // Console history spans both runs.
    let lines = sup.recent_output("a1");
    assert!(lines.iter().any(|l| l.ends_with("] once")), "{lines:?}");
    assert!(lines.iter().any(|l| l.ends_with("] twice")), "{lines:?}");

    assert!(sup.kill("a1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_all_counts_only_real_kills() {
    let (_dir, sup) = make_fleet(&[("a1", "sleep 30"), ("b2", "sleep 30"), ("c3", "sleep 30")]);

    assert!(sup.start("a1", false));
    assert!(sup.start("b2", false));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // c3 was never started, so only two kills land.
    assert_eq!(sup.kill_all(), 2);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let report = sup.status();
    assert!(!report["a1"].running);
    assert!(!report["b2"].running);
}
