//! Exercises the `atexit` path end to end: a child copy of this test binary
//! registers resources against a fake `docker` and returns; the cleanup has to
//! show up in the fake's call log once the child has exited.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use reaper::DockerCli;
use reaper::ReaperConfig;
use reaper::ResourceReaper;
use similar_asserts::assert_eq;
use test_log::test;

const DOCKER_ENV: &str = "REAPER_EXIT_TEST_DOCKER";

/// Fake `docker` that logs every invocation. Containers report running until
/// they have been killed; `ps` always lists one leftover container `c2`.
fn fake_docker(dir: &Path) -> PathBuf {
    let script = dir.join("docker");
    let body = r#"#!/bin/sh
dir="@DIR@"
echo "$@" >> "$dir/calls.log"
case "$1" in
  inspect)
    if [ -e "$dir/stopped-$6" ]; then
      echo '{"Running":false,"Status":"exited"}'
    else
      echo '{"Running":true,"Status":"running"}'
    fi ;;
  kill) touch "$dir/stopped-$2" ;;
  ps) echo '{"ID":"c2","Image":"redis:7"}' ;;
esac
exit 0
"#
    .replace("@DIR@", &dir.display().to_string());
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Body of the child process; does nothing in a normal test run.
#[test]
fn exit_child() {
    let Ok(docker) = env::var(DOCKER_ENV) else {
        return;
    };
    let config = ReaperConfig::new()
        .with_default_labels(BTreeMap::from([("team".to_string(), "blue".to_string())]))
        .with_docker_binary(docker);
    let runtime = Arc::new(DockerCli::new(config.docker_binary.clone()));
    let reaper = ResourceReaper::new(runtime, &config).unwrap();

    reaper.register_container("c1", "redis:7");
    reaper.register_network("n1");
    reaper.register_image("app:dev");
}

#[test]
fn registered_resources_are_removed_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_docker(dir.path());

    let status = Command::new(env::current_exe().unwrap())
        .args(["exit_child", "--exact", "--nocapture", "--test-threads=1"])
        .env(DOCKER_ENV, &script)
        .status()
        .unwrap();
    assert!(status.success());

    let calls = fs::read_to_string(dir.path().join("calls.log")).unwrap();
    assert_eq!(
        calls.lines().collect::<Vec<_>>(),
        vec![
            "inspect --type container --format {{json .State}} c1",
            "kill c1",
            "inspect --type container --format {{json .State}} c1",
            "rm --force --volumes c1",
            "network ls --no-trunc --filter id=n1 --format {{json .}}",
            "image rm --force app:dev",
            "ps --all --no-trunc --format {{json .}} --filter label=team=blue",
            "inspect --type container --format {{json .State}} c2",
            "kill c2",
            "inspect --type container --format {{json .State}} c2",
            "rm --force --volumes c2",
            "network prune --force --filter label=team=blue",
            "volume prune --force --filter label=team=blue",
            "image prune --force --filter label=team=blue",
        ]
    );
}
