//! Execution engine - converges one host phase by phase

use std::time::Instant;

use anyhow::{Result, bail};
use protocol::{Command, Outcome};

use crate::context::{CommandChannel, ProgressCallback};
use crate::planner::{ExecutionPlan, RestartQueue};
use crate::resource::{BoxedResource, send};
use crate::types::{ApplyResult, ExecuteSummary, Phase};

/// Execute a plan against one host.
///
/// Phases run in fixed order, each completing before the next starts:
/// rehearsal switch, package installs, package removals, file copies, file
/// deletions, then every service flagged by a changed resource, once each.
/// Resource failures are counted and the run continues; a channel error
/// aborts the remaining phases and is returned.
pub fn execute<P>(
    plan: &ExecutionPlan,
    channel: &mut dyn CommandChannel,
    progress: &mut P,
) -> Result<ExecuteSummary>
where
    P: ProgressCallback + ?Sized,
{
    let started = Instant::now();
    let mut summary = ExecuteSummary::default();
    let mut restarts = RestartQueue::default();

    if plan.rehearsal {
        progress.on_phase_start(Phase::Rehearsal, 1);
        let response = send(channel, &Command::RehearsalStart)?;
        if response.outcome() == Outcome::Error {
            // continuing would mutate the host
            bail!("dispatcher refused rehearsal mode: {}", response.error());
        }
        progress.on_phase_complete(Phase::Rehearsal);
    }

    for phase in [Phase::Install, Phase::Remove, Phase::Copy, Phase::Delete] {
        run_phase(
            phase,
            plan.phase(phase),
            channel,
            progress,
            &mut summary,
            &mut restarts,
        )?;
    }

    let pending = restarts.into_resources();
    run_phase(
        Phase::Restart,
        &pending,
        channel,
        progress,
        &mut summary,
        &mut RestartQueue::default(),
    )?;

    summary.elapsed = started.elapsed();
    Ok(summary)
}

fn run_phase<P>(
    phase: Phase,
    resources: &[BoxedResource],
    channel: &mut dyn CommandChannel,
    progress: &mut P,
    summary: &mut ExecuteSummary,
    restarts: &mut RestartQueue,
) -> Result<()>
where
    P: ProgressCallback + ?Sized,
{
    if resources.is_empty() {
        return Ok(());
    }

    progress.on_phase_start(phase, resources.len());
    for resource in resources {
        let id = resource.id();
        progress.on_resource_start(&id, &resource.description());

        let result = resource.apply(channel)?;
        log::debug!("{} {}: {:?}", resource.resource_type(), id, result);

        match &result {
            ApplyResult::Changed if phase == Phase::Restart => summary.restarted.push(id.clone()),
            ApplyResult::Changed => restarts.extend(resource.restarts()),
            ApplyResult::NoChange | ApplyResult::Failed { .. } => {}
        }
        summary.add_result(&result);
        progress.on_resource_complete(&id, &result);
    }
    progress.on_phase_complete(phase);
    Ok(())
}

/// Execute without progress reporting
pub fn execute_simple(
    plan: &ExecutionPlan,
    channel: &mut dyn CommandChannel,
) -> Result<ExecuteSummary> {
    use crate::context::NoProgress;

    execute(plan, channel, &mut NoProgress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use agent::DispatcherState;
    use agent::mock::MockHost;
    use protocol::Response;
    use std::path::Path;

    /// Runs the dispatcher's handlers in-process against a mock host.
    struct LocalChannel {
        host: MockHost,
        state: DispatcherState,
        sent: Vec<Command>,
        uploads: usize,
        /// Target mode right after each `file-put`, before any set-props
        modes_after_put: Vec<Option<u32>>,
        fail_after: Option<usize>,
    }

    impl LocalChannel {
        fn new(host: &MockHost) -> Self {
            Self {
                host: host.clone(),
                state: DispatcherState::new(),
                sent: Vec::new(),
                uploads: 0,
                modes_after_put: Vec::new(),
                fail_after: None,
            }
        }

        fn names(&self) -> Vec<&'static str> {
            self.sent.iter().map(Command::name).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.sent.iter().filter(|c| c.name() == name).count()
        }
    }

    impl CommandChannel for LocalChannel {
        fn execute(&mut self, command: &Command) -> Result<Response> {
            if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
                bail!("connection lost");
            }
            self.sent.push(command.clone());
            let response = agent::handlers::handle(&mut self.state, &self.host.backends(), command);
            if let Command::FilePut { path, .. } = command {
                self.modes_after_put.push(self.host.file(path).map(|f| f.mode));
            }
            Ok(response)
        }

        fn put_data(&mut self, data: &[u8], remote_path: &str) -> Result<()> {
            self.uploads += 1;
            self.host.add_file(remote_path, data, 0, 0, 0o644);
            Ok(())
        }

        fn staging_path(&mut self) -> String {
            format!("/tmp/stagehand_test/staged-{}", self.uploads)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ProgressCallback for Recorder {
        fn on_phase_start(&mut self, phase: Phase, count: usize) {
            self.events.push(format!("start {phase} {count}"));
        }
        fn on_resource_start(&mut self, id: &str, _description: &str) {
            self.events.push(format!("resource {id}"));
        }
        fn on_resource_complete(&mut self, id: &str, result: &ApplyResult) {
            self.events.push(format!("done {id} {result:?}"));
        }
        fn on_phase_complete(&mut self, phase: Phase) {
            self.events.push(format!("end {phase}"));
        }
    }

    const WEB: &str = r#"
packages:
  - name: nginx
    action: install
    restarts: [nginx]
  - name: telnet
    action: remove
files:
  - path: /etc/nginx/nginx.conf
    action: copy
    user: root
    group: www-data
    mode: "640"
    content: "worker_processes 2;\n"
    restarts: [nginx]
  - path: /etc/nginx/sites-enabled/default
    action: delete
    restarts: [nginx]
"#;

    fn scenario(text: &str) -> Scenario {
        Scenario::parse(text, Path::new(".")).unwrap()
    }

    fn web_host() -> MockHost {
        let host = MockHost::new();
        host.add_user("root", 0);
        host.add_group("root", 0);
        host.add_group("www-data", 33);
        host.add_package("nginx", false);
        host.add_package("telnet", true);
        host.add_file("/etc/nginx/nginx.conf", b"worker_processes 1;\n", 0, 0, 0o644);
        host.add_file("/etc/nginx/sites-enabled/default", b"server {}", 0, 0, 0o644);
        host
    }

    fn run(host: &MockHost, text: &str, rehearsal: bool) -> (ExecuteSummary, LocalChannel) {
        let plan = ExecutionPlan::from_scenario(&scenario(text), rehearsal);
        let mut channel = LocalChannel::new(host);
        let summary = execute_simple(&plan, &mut channel).unwrap();
        (summary, channel)
    }

    /// Host state without the staging area, which only exists during a run.
    fn target_state(host: &MockHost) -> agent::mock::Snapshot {
        let mut snapshot = host.snapshot();
        snapshot.files.retain(|path, _| !path.starts_with("/tmp/stagehand_test/"));
        snapshot
    }

    #[test]
    fn test_converges_host() {
        let host = web_host();
        let (summary, channel) = run(&host, WEB, false);

        assert_eq!(summary.errors(), 0);
        assert_eq!(summary.changed, 4);
        assert_eq!(summary.restarted, vec!["nginx".to_string()]);
        assert!(host.is_installed("nginx"));
        assert!(!host.is_installed("telnet"));
        assert!(host.file("/etc/nginx/sites-enabled/default").is_none());

        let conf = host.file("/etc/nginx/nginx.conf").unwrap();
        assert_eq!(conf.content, b"worker_processes 2;\n");
        assert_eq!((conf.uid, conf.gid, conf.mode & 0o7777), (0, 33, 0o640));
        assert_eq!(channel.uploads, 1);
    }

    #[test]
    fn test_second_run_is_all_noop() {
        let host = web_host();
        run(&host, WEB, false);
        let (summary, channel) = run(&host, WEB, false);

        assert_eq!(summary.changed, 0);
        assert_eq!(summary.no_change, 4);
        assert_eq!(summary.errors(), 0);
        assert!(summary.restarted.is_empty());
        assert_eq!(channel.count("service-restart"), 0);
        assert_eq!(channel.uploads, 0);
        assert_eq!(host.restarts(), vec!["nginx".to_string()]);
    }

    #[test]
    fn test_rehearsal_reports_like_real_run_without_mutating() {
        let rehearsed = web_host();
        let before = target_state(&rehearsed);
        let (dry, dry_channel) = run(&rehearsed, WEB, true);

        assert_eq!(dry_channel.sent[0], Command::RehearsalStart);
        assert_eq!(target_state(&rehearsed), before);
        assert!(rehearsed.mutations().is_empty());

        let real = web_host();
        let (wet, wet_channel) = run(&real, WEB, false);

        assert_eq!(
            (dry.changed, dry.no_change, dry.failed),
            (wet.changed, wet.no_change, wet.failed)
        );
        assert_eq!(dry.restarted, wet.restarted);
        // same client-side path in both modes, apart from the rehearsal switch
        assert_eq!(&dry_channel.names()[1..], wet_channel.names().as_slice());

        // the rehearsed host still converges fully afterwards
        let (after, _) = run(&rehearsed, WEB, false);
        assert_eq!(after.changed, 4);
    }

    #[test]
    fn test_rehearsal_parity_with_failures() {
        let text = r#"
packages:
  - name: no-such-package
    action: install
files:
  - path: /etc/app.conf
    action: copy
    user: nobody-here
    group: root
    mode: "600"
    content: x
"#;
        let (dry, _) = run(&web_host(), text, true);
        let (wet, _) = run(&web_host(), text, false);

        assert_eq!(dry.failed, 2);
        assert_eq!(wet.failed, 2);
        assert_eq!(dry.changed, wet.changed);
    }

    #[test]
    fn test_matching_content_with_wrong_mode_only_sets_props() {
        let host = web_host();
        host.add_file("/etc/nginx/nginx.conf", b"worker_processes 2;\n", 0, 33, 0o600);
        let text = r#"
files:
  - path: /etc/nginx/nginx.conf
    action: copy
    user: root
    group: www-data
    mode: "640"
    content: "worker_processes 2;\n"
"#;
        let (summary, channel) = run(&host, text, false);

        assert_eq!(summary.changed, 1);
        assert_eq!(channel.uploads, 0);
        assert_eq!(channel.count("file-put"), 0);
        assert_eq!(channel.count("file-set-props"), 1);
    }

    #[test]
    fn test_overwrite_keeps_private_mode_until_props_are_set() {
        let host = web_host();
        host.add_file("/etc/app/secret.key", b"old key", 0, 0, 0o600);
        let text = r#"
files:
  - path: /etc/app/secret.key
    action: copy
    user: root
    group: www-data
    mode: "640"
    content: "new key"
"#;
        let (summary, channel) = run(&host, text, false);

        assert_eq!(summary.changed, 1);
        assert_eq!(
            channel.names(),
            vec![
                "file-get-props",
                "file-put",
                "file-get-props",
                "file-set-props",
                "file-get-props",
            ]
        );
        // the staged upload is 0644; the secret never takes that mode
        assert_eq!(channel.modes_after_put, vec![Some(0o100_600)]);

        let key = host.file("/etc/app/secret.key").unwrap();
        assert_eq!(key.content, b"new key");
        assert_eq!((key.uid, key.gid, key.mode & 0o7777), (0, 33, 0o640));
    }

    #[test]
    fn test_setuid_on_host_does_not_trigger_set_props() {
        let host = web_host();
        host.add_file("/usr/local/bin/tool", b"bin", 0, 0, 0o4644);
        let text = r#"
files:
  - path: /usr/local/bin/tool
    action: copy
    user: root
    group: root
    mode: "644"
    content: bin
"#;
        let (summary, channel) = run(&host, text, false);

        assert_eq!(summary.no_change, 1);
        assert_eq!(channel.count("file-set-props"), 0);
    }

    #[test]
    fn test_restart_requested_twice_runs_once() {
        let host = web_host();
        host.add_package("php-fpm", false);
        let text = r"
packages:
  - name: nginx
    action: install
    restarts: [nginx]
  - name: php-fpm
    action: install
    restarts: [nginx, php-fpm]
";
        let (summary, channel) = run(&host, text, false);

        assert_eq!(channel.count("service-restart"), 2);
        assert_eq!(summary.restarted, vec!["nginx".to_string(), "php-fpm".to_string()]);
        assert_eq!(host.restarts(), vec!["nginx".to_string(), "php-fpm".to_string()]);
    }

    #[test]
    fn test_noop_resources_do_not_queue_restarts() {
        let host = web_host();
        host.add_package("nginx", true);
        let text = "packages:\n  - name: nginx\n    action: install\n    restarts: [nginx]\n";
        let (summary, channel) = run(&host, text, false);

        assert_eq!(summary.no_change, 1);
        assert_eq!(channel.count("service-restart"), 0);
    }

    #[test]
    fn test_phase_order_ignores_listing_order() {
        let host = web_host();
        host.add_package("foo", false);
        host.add_file("/etc/foo.conf", b"old", 0, 0, 0o644);
        let text = r"
files:
  - path: /etc/foo.conf
    action: delete
packages:
  - name: foo
    action: install
";
        let (_, channel) = run(&host, text, false);
        assert_eq!(channel.names(), vec!["package-install", "file-delete"]);
    }

    #[test]
    fn test_resource_failures_are_counted_and_run_continues() {
        let host = web_host();
        host.fail_install("nginx");
        host.fail_restart("nginx");
        host.add_package("curl", false);
        let text = r"
packages:
  - name: nginx
    action: install
  - name: curl
    action: install
    restarts: [nginx]
";
        let (summary, _) = run(&host, text, false);

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.changed, 1);
        assert!(host.is_installed("curl"));
        assert!(summary.restarted.is_empty());
    }

    #[test]
    fn test_unverified_copy_is_an_error() {
        let host = web_host();
        host.drop_writes();
        let (summary, channel) = run(&host, WEB, false);

        assert_eq!(summary.failed, 1);
        // content mismatch stops before ownership and mode
        assert_eq!(channel.count("file-set-props"), 0);
    }

    #[test]
    fn test_unverified_props_is_an_error() {
        let host = web_host();
        host.freeze_props();
        let (summary, _) = run(&host, WEB, false);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_channel_failure_aborts_remaining_phases() {
        let host = web_host();
        let plan = ExecutionPlan::from_scenario(&scenario(WEB), false);
        let mut channel = LocalChannel::new(&host);
        channel.fail_after = Some(2);

        let err = execute_simple(&plan, &mut channel).unwrap_err();
        assert!(err.to_string().contains("connection lost"));
        assert_eq!(channel.names(), vec!["package-install", "package-remove"]);
        assert!(host.file("/etc/nginx/sites-enabled/default").is_some());
    }

    #[test]
    fn test_progress_events_follow_phases() {
        let host = web_host();
        let plan = ExecutionPlan::from_scenario(&scenario(WEB), true);
        let mut channel = LocalChannel::new(&host);
        let mut recorder = Recorder::default();

        execute(&plan, &mut channel, &mut recorder).unwrap();

        let starts: Vec<_> = recorder
            .events
            .iter()
            .filter(|e| e.starts_with("start"))
            .cloned()
            .collect();
        assert_eq!(
            starts,
            vec![
                "start rehearsal 1",
                "start package installs 1",
                "start package removals 1",
                "start file copies 1",
                "start file deletions 1",
                "start service restarts 1",
            ]
        );
    }
}
