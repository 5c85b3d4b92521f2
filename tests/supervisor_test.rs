//! Supervisor liveness and recovery tests
//!
//! These use a scripted spawner and probe so no real processes are
//! involved; liveness decisions come entirely from the scripted responses.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use fleetscrape::error::WorkerError;
use fleetscrape::supervisor::{
    GroupSpec, ScriptedProbe, Supervisor, SupervisorConfig, TerminateMode, WorkerEvent,
    WorkerProc, WorkerSpawner, WorkerStatus,
};

struct FakeProc {
    pid: u32,
    terminations: Arc<Mutex<Vec<TerminateMode>>>,
}

impl WorkerProc for FakeProc {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&self, mode: TerminateMode) {
        self.terminations.lock().push(mode);
    }
}

/// Spawner whose workers are controlled by the scripted probe
struct FakeSpawner {
    spawn_count: AtomicU32,
    next_pid: AtomicU32,
    /// Newly spawned workers register as alive iff this is set
    spawn_alive: AtomicBool,
    probe: Arc<ScriptedProbe>,
    terminations: Arc<Mutex<Vec<TerminateMode>>>,
    last_events: Mutex<Option<mpsc::UnboundedSender<WorkerEvent>>>,
}

impl FakeSpawner {
    fn new(probe: Arc<ScriptedProbe>, spawn_alive: bool) -> Self {
        Self {
            spawn_count: AtomicU32::new(0),
            next_pid: AtomicU32::new(1000),
            spawn_alive: AtomicBool::new(spawn_alive),
            probe,
            terminations: Arc::new(Mutex::new(Vec::new())),
            last_events: Mutex::new(None),
        }
    }

    fn spawns(&self) -> u32 {
        self.spawn_count.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(
        &self,
        _group: &GroupSpec,
        _log_path: &Path,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn WorkerProc>, WorkerError>> + Send + '_>> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        self.probe.set_exists(pid, self.spawn_alive.load(Ordering::SeqCst));
        *self.last_events.lock() = Some(events);
        let terminations = Arc::clone(&self.terminations);
        Box::pin(async move { Ok(Box::new(FakeProc { pid, terminations }) as Box<dyn WorkerProc>) })
    }
}

fn test_config(dir: &Path) -> SupervisorConfig {
    SupervisorConfig {
        liveness_interval: Duration::from_millis(10),
        idle_threshold: Duration::from_millis(40),
        stuck_cpu_threshold: 1.0,
        grace_period: Duration::from_millis(5),
        restart_delay: Duration::from_millis(5),
        restart_cap: 2,
        restart_cooldown: Duration::from_millis(200),
        logs_dir: dir.join("logs"),
    }
}

fn group() -> GroupSpec {
    GroupSpec {
        name: "group-1".to_string(),
        partition_file: "group-1.txt".into(),
    }
}

#[tokio::test]
async fn test_crash_loop_disables_after_cap_plus_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    // Every spawned worker is immediately gone: a crash loop
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), false));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );

    supervisor.start_group(group()).await.expect("start");
    assert_eq!(spawner.spawns(), 1);

    // Drive liveness passes until the group freezes
    for _ in 0..10 {
        supervisor.check_liveness().await;
        supervisor.recover_unhealthy().await;
        let record = supervisor.group_status("group-1").await.expect("record");
        if record.status == WorkerStatus::Disabled {
            break;
        }
    }

    let record = supervisor.group_status("group-1").await.expect("record");
    assert_eq!(record.status, WorkerStatus::Disabled);
    assert_eq!(record.restart_count, 3); // cap 2 exceeded on the 3rd restart
    // cap + 1 spawn attempts total: the original plus cap relaunches
    assert_eq!(spawner.spawns(), 3);

    // Disabled means frozen: further passes spawn nothing
    supervisor.check_liveness().await;
    supervisor.recover_unhealthy().await;
    assert_eq!(spawner.spawns(), 3);
}

#[tokio::test]
async fn test_cooldown_resets_restart_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), false));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );

    supervisor.start_group(group()).await.expect("start");
    for _ in 0..10 {
        supervisor.check_liveness().await;
        supervisor.recover_unhealthy().await;
        if supervisor.group_status("group-1").await.expect("record").status
            == WorkerStatus::Disabled
        {
            break;
        }
    }
    let spawns_when_disabled = spawner.spawns();

    // Let workers stay alive after the cooldown relaunch
    spawner.spawn_alive.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(250)).await;
    supervisor.recover_unhealthy().await;

    let record = supervisor.group_status("group-1").await.expect("record");
    assert_eq!(record.status, WorkerStatus::Running);
    assert_eq!(record.restart_count, 0);
    assert_eq!(spawner.spawns(), spawns_when_disabled + 1);
}

#[tokio::test]
async fn test_idle_low_cpu_worker_is_stuck() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), true));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );

    supervisor.start_group(group()).await.expect("start");
    let pid = supervisor.group_status("group-1").await.expect("record").pid;
    probe.set_cpu(pid, 0.2);

    // Not yet past the idle threshold: still running
    supervisor.check_liveness().await;
    assert_eq!(
        supervisor.group_status("group-1").await.expect("record").status,
        WorkerStatus::Running
    );

    tokio::time::sleep(Duration::from_millis(60)).await;
    supervisor.check_liveness().await;
    assert_eq!(
        supervisor.group_status("group-1").await.expect("record").status,
        WorkerStatus::Stuck
    );
}

#[tokio::test]
async fn test_idle_but_busy_worker_is_not_stuck() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), true));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );

    supervisor.start_group(group()).await.expect("start");
    let pid = supervisor.group_status("group-1").await.expect("record").pid;
    // Quiet on stdout but clearly computing
    probe.set_cpu(pid, 85.0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    supervisor.check_liveness().await;
    assert_eq!(
        supervisor.group_status("group-1").await.expect("record").status,
        WorkerStatus::Running
    );
}

#[tokio::test]
async fn test_output_counts_as_activity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), true));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );
    supervisor.start_event_pump().await;

    supervisor.start_group(group()).await.expect("start");
    let pid = supervisor.group_status("group-1").await.expect("record").pid;
    probe.set_cpu(pid, 0.0);

    // Keep emitting output past the idle threshold
    let events = spawner.last_events.lock().clone().expect("events channel");
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(15)).await;
        events
            .send(WorkerEvent::Output {
                group: "group-1".to_string(),
            })
            .expect("send");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    supervisor.check_liveness().await;
    assert_eq!(
        supervisor.group_status("group-1").await.expect("record").status,
        WorkerStatus::Running
    );
}

#[tokio::test]
async fn test_exit_event_marks_group_exited() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), true));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );
    supervisor.start_event_pump().await;

    supervisor.start_group(group()).await.expect("start");
    let events = spawner.last_events.lock().clone().expect("events channel");
    events
        .send(WorkerEvent::Exited {
            group: "group-1".to_string(),
            code: Some(7),
        })
        .expect("send");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let record = supervisor.group_status("group-1").await.expect("record");
    assert_eq!(record.status, WorkerStatus::Exited);
    assert_eq!(record.exit_code, Some(7));
}

#[tokio::test]
async fn test_recovery_terminates_in_two_phases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(ScriptedProbe::new());
    let spawner = Arc::new(FakeSpawner::new(Arc::clone(&probe), true));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::clone(&spawner) as Arc<dyn WorkerSpawner>,
        Arc::clone(&probe) as _,
    );

    supervisor.start_group(group()).await.expect("start");
    let pid = supervisor.group_status("group-1").await.expect("record").pid;
    probe.set_cpu(pid, 0.0);

    // Past the idle threshold with no CPU: stuck, and the process survives
    // SIGTERM (probe keeps reporting it alive), so SIGKILL must follow.
    tokio::time::sleep(Duration::from_millis(60)).await;
    supervisor.check_liveness().await;
    supervisor.recover_unhealthy().await;

    let terminations = spawner.terminations.lock().clone();
    assert_eq!(
        terminations,
        vec![TerminateMode::Graceful, TerminateMode::Force]
    );
    // Recovered: relaunched with the restart count carried forward
    let record = supervisor.group_status("group-1").await.expect("record");
    assert_eq!(record.restart_count, 1);
    assert_eq!(record.status, WorkerStatus::Running);
}
