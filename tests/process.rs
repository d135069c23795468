//! Integration tests for supervised processes. They rely on `/bin/sh` and
//! `/bin/sleep`, so they only run on unix.
#![cfg(unix)]

use std::time::{Duration, Instant};
use tokio_test::assert_ok;
use tributary::prelude::*;
use tributary::traits::Source;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Collect every event, checking nothing follows the terminal one
async fn drain(mut events: OutputStream) -> Vec<OutputEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        if let Some(last) = seen.last() {
            assert!(
                !OutputEvent::is_terminal(last),
                "event after terminal: {:?}",
                event
            );
        }
        seen.push(event);
    }
    seen
}

fn terminal(events: &[OutputEvent]) -> &OutputEvent {
    let last = events.last().expect("stream should not be empty");
    assert!(last.is_terminal(), "last event not terminal: {:?}", last);
    last
}

#[tokio::test]
async fn test_timeout_kills_long_running_process() {
    init_tracing();
    let started = Instant::now();
    let events = ProcessCommand::new("/bin/sleep")
        .arg("10")
        .timeout_millis(500)
        .start();

    let events = drain(events).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        terminal(&events),
        OutputEvent::Terminated(TerminationReason::TimedOut(_))
    ));
    assert!(elapsed >= Duration::from_millis(450), "too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1_000), "too late: {:?}", elapsed);
}

#[tokio::test]
async fn test_stdout_and_stderr_are_separated() {
    let output = ProcessCommand::new("/bin/sh")
        .args(["-c", "printf A; printf B >&2"])
        .output()
        .await;
    let output = assert_ok!(output);

    assert_eq!(output.stdout, b"A");
    assert_eq!(output.stderr, b"B");
    assert_eq!(output.reason, TerminationReason::Exit(0));
}

#[tokio::test]
async fn test_terminated_is_the_last_event() {
    let events = ProcessCommand::new("/bin/sh")
        .args(["-c", "printf A; printf B >&2"])
        .start();
    let events = drain(events).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, OutputEvent::Stdout(b) if b.as_ref() == b"A")));
    assert!(events
        .iter()
        .any(|e| matches!(e, OutputEvent::Stderr(b) if b.as_ref() == b"B")));
    assert!(matches!(
        terminal(&events),
        OutputEvent::Terminated(TerminationReason::Exit(0))
    ));
}

#[tokio::test]
async fn test_exit_code_is_reported() {
    let output = ProcessCommand::new("/bin/sh")
        .args(["-c", "exit 3"])
        .output()
        .await
        .unwrap();
    assert_eq!(output.reason, TerminationReason::Exit(3));
    assert!(matches!(output.check(), Err(Error::ExitCode { code: 3 })));
}

#[tokio::test]
async fn test_uncaught_signal_is_reported() {
    let output = ProcessCommand::new("/bin/sh")
        .args(["-c", "kill -9 $$"])
        .output()
        .await
        .unwrap();
    assert_eq!(output.reason, TerminationReason::UncaughtSignal(9));
}

#[tokio::test]
async fn test_missing_command_spawns_nothing() {
    let events = drain(ProcessCommand::new("/no/such/binary").arg("x").start()).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        OutputEvent::Error(Error::CommandNotFound(_))
    ));
}

#[tokio::test]
async fn test_timeout_reaches_grandchildren() {
    init_tracing();
    let started = Instant::now();
    // the grandchild inherits stdout; if it survived, the pipe would stay open
    let events = ProcessCommand::new("/bin/sh")
        .args(["-c", "/bin/sleep 10; echo done"])
        .timeout(Duration::from_millis(300))
        .start();

    let events = drain(events).await;
    assert!(matches!(
        terminal(&events),
        OutputEvent::Terminated(TerminationReason::TimedOut(_))
    ));
    assert!(!events
        .iter()
        .any(|e| matches!(e, OutputEvent::Stdout(b) if b.as_ref() == b"done\n")));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_large_output_is_complete_and_ordered() {
    let output = ProcessCommand::new("/bin/sh")
        .args(["-c", "i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done"])
        .read_buffer_size(64)
        .channel_capacity(2)
        .output()
        .await
        .unwrap()
        .check()
        .unwrap();

    let expected: String = (0..2000).map(|i| format!("line-{}\n", i)).collect();
    assert_eq!(output.stdout_string(), expected);
}

#[tokio::test]
async fn test_slow_consumer_still_gets_all_output() {
    let mut events = ProcessCommand::new("/bin/sh")
        .args(["-c", "head -c 60000 /dev/zero"])
        .read_buffer_size(1024)
        .channel_capacity(1)
        .start();

    // the child exits long before anything is read
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut stdout = 0;
    let mut last = None;
    while let Some(event) = events.recv().await {
        if let OutputEvent::Stdout(bytes) = &event {
            stdout += bytes.len();
        }
        last = Some(event);
    }
    assert_eq!(stdout, 60_000);
    assert!(matches!(
        last,
        Some(OutputEvent::Terminated(TerminationReason::Exit(0)))
    ));
}

#[tokio::test]
async fn test_output_stream_as_source() {
    let mut events = ProcessCommand::new("/bin/sh")
        .args(["-c", "printf one; sleep 0.1; printf two"])
        .start();

    let mut stdout = Vec::new();
    let mut terminal = None;
    loop {
        let ready = events.handle_demand(16).await.unwrap();
        if ready.is_empty() {
            break;
        }
        assert!(ready.len() <= 16);
        for event in ready {
            match event {
                OutputEvent::Stdout(bytes) => stdout.extend_from_slice(&bytes),
                other => terminal = Some(other),
            }
        }
    }
    assert_eq!(stdout, b"onetwo");
    assert!(matches!(
        terminal,
        Some(OutputEvent::Terminated(TerminationReason::Exit(0)))
    ));
}

#[tokio::test]
async fn test_same_executable_can_run_again() {
    for round in 0..3 {
        let output = ProcessCommand::new("sh")
            .arg("-c")
            .arg(format!("echo round-{}", round))
            .output()
            .await
            .unwrap();
        assert_eq!(output.stdout_string(), format!("round-{}\n", round));
    }
}

#[tokio::test]
async fn test_dropping_stream_stops_process() {
    let mut events = ProcessCommand::new("/bin/sh")
        .args(["-c", "echo $$; exec /bin/sleep 30"])
        .start();

    let pid = match events.recv().await {
        Some(OutputEvent::Stdout(bytes)) => String::from_utf8_lossy(&bytes)
            .trim()
            .parse::<i32>()
            .unwrap(),
        other => panic!("expected pid on stdout, got {:?}", other),
    };
    tokio::time::timeout(Duration::from_secs(3), events.close())
        .await
        .expect("close should reap the process");

    // signal 0 only checks for existence
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
    assert!(!alive, "process {} survived close", pid);
}

#[test]
fn test_output_blocking_outside_runtime() {
    let output = ProcessCommand::new("/bin/sh")
        .args(["-c", "echo hello"])
        .timeout(Duration::from_secs(5))
        .output_blocking()
        .unwrap();
    assert_eq!(output.stdout_string(), "hello\n");
    assert!(output.reason.success());
}
