//! Dispatching plain commands across sessions

mod support;

use parking_lot::Mutex;
use remote_invoke::{
    CallOptions, Client, Error, FailureReason, HostId, Severity, StreamKind, Via,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use support::{sessions, Behavior, RecordingLogger, ScriptedTransport};
use tokio_util::sync::CancellationToken;

fn client(transport: ScriptedTransport) -> (Client<ScriptedTransport>, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::default());
    let client = Client::builder(transport)
        .logger(logger.clone())
        .build()
        .unwrap();
    (client, logger)
}

#[tokio::test]
async fn test_one_failing_session_fails_the_invocation() {
    let transport = ScriptedTransport::new()
        .host("s1", Behavior::exits(0))
        .host("s2", Behavior::exits(2))
        .host("s3", Behavior::exits(0));
    let (client, _) = client(transport);
    let targets = sessions(&["s1", "s2", "s3"]);

    let result = client
        .run("deploy", CallOptions::new(), &targets, None)
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(result.failed_hosts(), vec![&HostId::new("s2")]);
    assert!(result.outcome(&HostId::new("s1")).unwrap().is_success());
    assert!(result.outcome(&HostId::new("s3")).unwrap().is_success());
    assert_eq!(
        result.outcome(&HostId::new("s2")).unwrap().failure,
        Some(FailureReason::NonZeroExit { code: 2 })
    );

    match result.into_result() {
        Err(Error::CommandFailed { hosts, .. }) => assert_eq!(hosts, vec!["s2".to_string()]),
        other => panic!("Expected CommandFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_all_sessions_succeed() {
    let (client, _) = client(ScriptedTransport::new());
    let targets = sessions(&["a", "b"]);

    let result = client
        .run("true", CallOptions::new(), &targets, None)
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(result.failed_hosts().is_empty());
    assert_eq!(result.outcomes.len(), 2);
}

#[tokio::test]
async fn test_default_router_logs_by_stream() {
    let transport = ScriptedTransport::new().host(
        "web1",
        Behavior::prints(
            &[(StreamKind::Out, "hello\n"), (StreamKind::Err, "warning\n")],
            0,
        ),
    );
    let (client, logger) = client(transport);

    client
        .run("echo hello", CallOptions::new(), &sessions(&["web1"]), None)
        .await
        .unwrap();

    assert_eq!(
        logger.lines(),
        vec![
            (Severity::Info, "hello\n".to_string(), "out :: web1".to_string()),
            (
                Severity::Important,
                "warning\n".to_string(),
                "err :: web1".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn test_custom_callback_sees_every_host() {
    let transport = ScriptedTransport::new()
        .host("a", Behavior::prints(&[(StreamKind::Out, "from a")], 0))
        .host("b", Behavior::prints(&[(StreamKind::Out, "from b")], 0));
    let (client, logger) = client(transport);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let result = client
        .command("hostname")
        .on(&sessions(&["a", "b"]))
        .on_output(move |ch, stream, chunk| {
            sink.lock().push(format!("{} {} {}", ch.host(), stream, chunk));
        })
        .execute()
        .await
        .unwrap();

    assert!(result.is_success());
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["a out from a", "b out from b"]);
    assert!(logger.lines().is_empty());
}

#[tokio::test]
async fn test_options_are_resolved_against_defaults() {
    let transport = ScriptedTransport::new();
    let record = transport.record("app1");
    let client = Client::builder(transport)
        .default_env("PATH", "/usr/local/bin:/usr/bin")
        .default_env("LANG", "C")
        .default_shell("/bin/sh")
        .logger(Arc::new(RecordingLogger::default()))
        .build()
        .unwrap();

    client
        .run(
            "rake db:migrate",
            CallOptions::new().env("LANG", "en_US.UTF-8").shell("/bin/bash"),
            &sessions(&["app1"]),
            None,
        )
        .await
        .unwrap();

    let record = record.lock();
    assert_eq!(record.commands, vec!["rake db:migrate"]);
    let options = &record.options[0];
    let expected: BTreeMap<String, String> = [
        ("LANG".to_string(), "en_US.UTF-8".to_string()),
        ("PATH".to_string(), "/usr/local/bin:/usr/bin".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(options.env.as_ref(), Some(&expected));
    assert_eq!(options.shell.as_deref(), Some("/bin/bash"));
}

#[tokio::test]
async fn test_unreachable_host_does_not_stop_the_others() {
    let transport = ScriptedTransport::new().unreachable("down");
    let (client, _) = client(transport);

    let result = client
        .run("uptime", CallOptions::new(), &sessions(&["up", "down"]), None)
        .await
        .unwrap();

    assert_eq!(result.failed_hosts(), vec![&HostId::new("down")]);
    match &result.outcome(&HostId::new("down")).unwrap().failure {
        Some(FailureReason::Transport { message }) => {
            assert!(message.contains("connection refused"))
        }
        other => panic!("Expected Transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_closes_the_channel() {
    let transport = ScriptedTransport::new()
        .host("slow", Behavior::hangs())
        .host("fast", Behavior::exits(0));
    let record = transport.record("slow");
    let client = Client::builder(transport)
        .timeout_secs(1)
        .logger(Arc::new(RecordingLogger::default()))
        .build()
        .unwrap();

    let result = client
        .run("sleep 600", CallOptions::new(), &sessions(&["slow", "fast"]), None)
        .await
        .unwrap();

    assert_eq!(
        result.outcome(&HostId::new("slow")).unwrap().failure,
        Some(FailureReason::TimedOut { secs: 1 })
    );
    assert!(result.outcome(&HostId::new("fast")).unwrap().is_success());
    assert!(record.lock().closed);
}

#[tokio::test]
async fn test_cancellation_closes_open_channels() {
    let transport = ScriptedTransport::new()
        .host("a", Behavior::hangs())
        .host("b", Behavior::hangs());
    let record_a = transport.record("a");
    let record_b = transport.record("b");
    let (client, _) = client(transport);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let targets = sessions(&["a", "b"]);
    let result = client
        .command("tail -f /var/log/syslog")
        .on(&targets)
        .cancel_on(cancel)
        .execute()
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(record_a.lock().closed);
    assert!(record_b.lock().closed);
}

#[tokio::test]
async fn test_no_targets_is_an_error() {
    let (client, _) = client(ScriptedTransport::new());

    let result = client.run("true", CallOptions::new(), &[], None).await;
    assert!(matches!(result, Err(Error::NoTargets)));

    let result = client.command("true").execute().await;
    assert!(matches!(result, Err(Error::NoTargets)));
}

#[tokio::test]
async fn test_invoke_command_selects_method_from_via() {
    let transport = ScriptedTransport::new();
    let record = transport.record("db1");
    let (client, _) = client(transport);
    let targets = sessions(&["db1"]);

    client
        .invoke_command("whoami", CallOptions::new(), &targets, None)
        .await
        .unwrap();
    client
        .invoke_command(
            "whoami",
            CallOptions::new().via(Via::Sudo).as_user("postgres"),
            &targets,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        record.lock().commands,
        vec![
            "whoami".to_string(),
            "sudo -p 'sudo password: ' -u postgres whoami".to_string()
        ]
    );
}

#[tokio::test]
async fn test_as_user_is_ignored_by_run() {
    let transport = ScriptedTransport::new();
    let record = transport.record("db1");
    let (client, _) = client(transport);

    client
        .run(
            "whoami",
            CallOptions::new().as_user("postgres"),
            &sessions(&["db1"]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(record.lock().commands, vec!["whoami".to_string()]);
}

#[tokio::test]
async fn test_cancel_after_every_channel_finished_keeps_result() {
    let transport =
        ScriptedTransport::new().host("a", Behavior::prints(&[(StreamKind::Out, "done\n")], 0));
    let (client, _) = client(transport);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let targets = sessions(&["a"]);
    let result = client
        .command("deploy")
        .on(&targets)
        .on_output(move |_, _, _| trigger.cancel())
        .cancel_on(cancel.clone())
        .execute()
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert!(result.is_success());
}
