use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use metrad_event::{Event, EventBus};
use metrad_types::status_code::ScheduleCode;
use metrad_types::{make_error_msg, MetricType, Result, Status, UtcTime};
use metrad_wire::encode_metrics;

use crate::schedule::{Schedule, ScheduleState};
use crate::work::{Job, JobReply, WorkManager};
use crate::workflow::{ProcessNode, PublishNode, Workflow};

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Stopped,
    Spinning,
    Firing,
    Disabled,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Stopped => write!(f, "stopped"),
            TaskState::Spinning => write!(f, "spinning"),
            TaskState::Firing => write!(f, "firing"),
            TaskState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Default deadline for one firing.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);
/// Consecutive failures before a task disables itself.
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 10;

/// Options applied at task creation.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub deadline: Option<Duration>,
    pub failure_threshold: Option<u64>,
}

struct TaskInner {
    id: String,
    name: String,
    schedule: Schedule,
    workflow: Workflow,
    subscriptions: Vec<MetricType>,
    deadline: Duration,
    failure_threshold: u64,

    state: Mutex<TaskState>,
    kill: Mutex<Option<watch::Sender<bool>>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    failed_count: AtomicU64,
    consecutive_failures: AtomicU64,
    last_failure: Mutex<Option<String>>,
    creation_time: UtcTime,
    last_run: Mutex<Option<UtcTime>>,

    work: Arc<WorkManager>,
    bus: Arc<EventBus>,
}

/// A scheduled workflow run. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

impl Task {
    pub fn new(
        schedule: Schedule,
        workflow: Workflow,
        subscriptions: Vec<MetricType>,
        work: Arc<WorkManager>,
        bus: Arc<EventBus>,
        options: TaskOptions,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let name = options.name.unwrap_or_else(|| format!("Task-{}", id));
        Self {
            inner: Arc::new(TaskInner {
                id,
                name,
                schedule,
                workflow,
                subscriptions,
                deadline: options.deadline.unwrap_or(DEFAULT_DEADLINE),
                failure_threshold: options
                    .failure_threshold
                    .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
                state: Mutex::new(TaskState::Stopped),
                kill: Mutex::new(None),
                hit_count: AtomicU64::new(0),
                miss_count: AtomicU64::new(0),
                failed_count: AtomicU64::new(0),
                consecutive_failures: AtomicU64::new(0),
                last_failure: Mutex::new(None),
                creation_time: UtcTime::now(),
                last_run: Mutex::new(None),
                work,
                bus,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock()
    }

    pub fn hit_count(&self) -> u64 {
        self.inner.hit_count.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.inner.miss_count.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.inner.failed_count.load(Ordering::Relaxed)
    }

    pub fn last_failure(&self) -> Option<String> {
        self.inner.last_failure.lock().clone()
    }

    pub fn creation_time(&self) -> UtcTime {
        self.inner.creation_time
    }

    pub fn last_run(&self) -> Option<UtcTime> {
        *self.inner.last_run.lock()
    }

    pub fn deadline(&self) -> Duration {
        self.inner.deadline
    }

    pub fn subscriptions(&self) -> &[MetricType] {
        &self.inner.subscriptions
    }

    /// The processor/publisher subscriptions the task's workflow holds.
    pub fn workflow_plugin_subscriptions(
        &self,
    ) -> Vec<(
        metrad_types::PluginKind,
        String,
        u32,
        metrad_types::ConfigDataNode,
    )> {
        self.inner.workflow.plugin_subscriptions()
    }

    /// Start the spin loop. Valid only from `Stopped`.
    pub fn spin(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                TaskState::Stopped => {}
                other => {
                    return make_error_msg(
                        ScheduleCode::TASK_NOT_STOPPED,
                        format!("cannot spin task in state {}", other),
                    )
                }
            }
            *state = TaskState::Spinning;
        }

        let (kill_tx, kill_rx) = watch::channel(false);
        *self.inner.kill.lock() = Some(kill_tx);

        let task = self.clone();
        tokio::spawn(async move {
            task.spin_loop(kill_rx).await;
        });
        self.inner.bus.emit(Event::TaskStarted {
            task_id: self.inner.id.clone(),
        });
        Ok(())
    }

    /// Ask the spin loop to wind down. Returns promptly; the transition to
    /// `Stopped` happens at the loop's next suspension point.
    pub fn stop(&self) {
        let kill = self.inner.kill.lock().take();
        if let Some(kill) = kill {
            let _ = kill.send(true);
        }
    }

    /// Re-arm a disabled task. Valid only from `Disabled`; lands in
    /// `Stopped`.
    pub fn enable(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if *state != TaskState::Disabled {
            return make_error_msg(
                ScheduleCode::TASK_NOT_DISABLED,
                format!("cannot enable task in state {}", state),
            );
        }
        *state = TaskState::Stopped;
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn spin_loop(&self, mut kill: watch::Receiver<bool>) {
        debug!(task = %self.inner.id, "task spinning");
        loop {
            let last = *self.inner.last_run.lock();
            let response = tokio::select! {
                response = self.inner.schedule.wait(last) => response,
                _ = kill.changed() => break,
            };

            if response.state == ScheduleState::Ended {
                debug!(task = %self.inner.id, "schedule ended");
                break;
            }

            *self.inner.state.lock() = TaskState::Firing;
            self.inner.hit_count.fetch_add(1, Ordering::Relaxed);
            self.inner
                .miss_count
                .fetch_add(response.missed, Ordering::Relaxed);
            *self.inner.last_run.lock() = Some(UtcTime::now());

            match self.fire().await {
                Ok(()) => {
                    self.inner.consecutive_failures.store(0, Ordering::Relaxed);
                }
                Err(e) => {
                    self.inner.failed_count.fetch_add(1, Ordering::Relaxed);
                    let failures = self
                        .inner
                        .consecutive_failures
                        .fetch_add(1, Ordering::Relaxed)
                        + 1;
                    *self.inner.last_failure.lock() = Some(e.describe());
                    warn!(task = %self.inner.id, error = %e, failures, "task fire failed");

                    if failures >= self.inner.failure_threshold {
                        *self.inner.state.lock() = TaskState::Disabled;
                        self.inner.kill.lock().take();
                        self.inner.bus.emit(Event::TaskDisabled {
                            task_id: self.inner.id.clone(),
                            why: e.describe(),
                        });
                        return;
                    }
                }
            }

            // Back to spinning unless a stop raced the firing.
            if *kill.borrow() {
                break;
            }
            *self.inner.state.lock() = TaskState::Spinning;
        }

        *self.inner.state.lock() = TaskState::Stopped;
        self.inner.kill.lock().take();
        self.inner.bus.emit(Event::TaskStopped {
            task_id: self.inner.id.clone(),
        });
        debug!(task = %self.inner.id, "task stopped");
    }

    /// One firing: collect, then fan the encoded batch through the
    /// workflow's processor and publisher nodes. The whole chain shares the
    /// task deadline; an overrun abandons the in-flight job.
    async fn fire(&self) -> Result<()> {
        let deadline = self.inner.deadline;

        let (tx, rx) = oneshot::channel();
        self.inner.work.submit(Job::Collect {
            types: self.inner.subscriptions.clone(),
            deadline,
            reply: tx,
        })?;

        let metrics = match Self::await_reply(rx, deadline).await? {
            JobReply::Collected { metrics } => metrics,
            JobReply::Failed(e) => return Err(e),
            other => {
                return make_error_msg(
                    metrad_types::status_code::StatusCode::UNKNOWN,
                    format!("unexpected collect reply {:?}", other),
                )
            }
        };

        self.inner.bus.emit(Event::MetricCollected {
            task_id: self.inner.id.clone(),
            count: metrics.len(),
            at: UtcTime::now(),
        });

        if metrics.is_empty() {
            return Ok(());
        }

        let (payload, content_type) = encode_metrics(&self.inner.workflow.content_type, &metrics)?;
        self.fan_out(
            &content_type,
            &payload,
            &self.inner.workflow.process,
            &self.inner.workflow.publish,
            deadline,
        )
        .await
    }

    /// Drive the processor subtree and publishers for one payload.
    ///
    /// Submissions happen only after the parent job's reply, preserving the
    /// collect -> process -> publish ordering within the task.
    fn fan_out<'a>(
        &'a self,
        content_type: &'a str,
        content: &'a [u8],
        process: &'a [ProcessNode],
        publish: &'a [PublishNode],
        deadline: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for node in process {
                let (tx, rx) = oneshot::channel();
                self.inner.work.submit(Job::Process {
                    name: node.name.clone(),
                    version: node.version,
                    content_type: node.content_type.clone(),
                    content: content.to_vec(),
                    config: node.config.clone(),
                    deadline,
                    reply: tx,
                })?;
                let (out_type, out_content) = match Self::await_reply(rx, deadline).await? {
                    JobReply::Processed {
                        content_type,
                        content,
                    } => (content_type, content),
                    JobReply::Failed(e) => return Err(e),
                    other => {
                        return make_error_msg(
                            metrad_types::status_code::StatusCode::UNKNOWN,
                            format!("unexpected process reply {:?}", other),
                        )
                    }
                };
                self.fan_out(&out_type, &out_content, &node.process, &node.publish, deadline)
                    .await?;
            }

            for node in publish {
                let (tx, rx) = oneshot::channel();
                self.inner.work.submit(Job::Publish {
                    name: node.name.clone(),
                    version: node.version,
                    content_type: node.content_type.clone(),
                    content: content.to_vec(),
                    config: node.config.clone(),
                    deadline,
                    reply: tx,
                })?;
                match Self::await_reply(rx, deadline).await? {
                    JobReply::Published => {}
                    JobReply::Failed(e) => return Err(e),
                    other => {
                        return make_error_msg(
                            metrad_types::status_code::StatusCode::UNKNOWN,
                            format!("unexpected publish reply {:?}", other),
                        )
                    }
                }
            }
            Ok(())
        })
    }

    async fn await_reply(
        rx: oneshot::Receiver<JobReply>,
        deadline: Duration,
    ) -> Result<JobReply> {
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => make_error_msg(
                ScheduleCode::DEADLINE_EXCEEDED,
                format!("job missed {:?} deadline", deadline),
            ),
            Ok(Err(_)) => Err(Status::with_message(
                metrad_types::status_code::StatusCode::INTERRUPTED,
                "worker dropped reply",
            )),
            Ok(Ok(reply)) => Ok(reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::SimpleSchedule;
    use crate::test_support::MockMetricManager;
    use crate::workflow::WorkflowMap;
    use metrad_control::ManagesMetrics;
    use metrad_types::{Namespace, PluginKind, RequestedMetric};
    use metrad_wire::CONTENT_TYPE_ALL;

    struct Fixture {
        manager: Arc<MockMetricManager>,
        work: Arc<WorkManager>,
        bus: Arc<EventBus>,
        workflow: Workflow,
        subscriptions: Vec<MetricType>,
    }

    fn fixture() -> Fixture {
        let manager = Arc::new(MockMetricManager::new());
        manager.add_plugin(
            "file",
            1,
            PluginKind::Publisher,
            vec![CONTENT_TYPE_ALL.into()],
            vec![],
        );
        manager.add_metric_type(MetricType::new(
            Namespace::from_literals(&["intel", "dummy", "foo"]),
            1,
            "dummy:1",
        ));
        manager.add_metric_type(MetricType::new(
            Namespace::from_literals(&["intel", "dummy", "bar"]),
            1,
            "dummy:1",
        ));

        let workflow =
            Workflow::bind(WorkflowMap::sample(), manager.as_ref()).expect("bindable workflow");
        let subscriptions: Vec<MetricType> = workflow
            .map
            .collect
            .metrics
            .iter()
            .map(|m| {
                manager
                    .subscribe_metric_type(
                        &RequestedMetric {
                            namespace: m.namespace.clone(),
                            version: None,
                        },
                        &Default::default(),
                    )
                    .unwrap()
            })
            .collect();

        let work = Arc::new(WorkManager::new(
            25,
            4,
            Arc::clone(&manager) as Arc<dyn ManagesMetrics>,
        ));
        Fixture {
            manager,
            work,
            bus: Arc::new(EventBus::new()),
            workflow,
            subscriptions,
        }
    }

    fn task_with(fixture: &Fixture, schedule: Schedule, options: TaskOptions) -> Task {
        Task::new(
            schedule,
            fixture.workflow.clone(),
            fixture.subscriptions.clone(),
            Arc::clone(&fixture.work),
            Arc::clone(&fixture.bus),
            options,
        )
    }

    #[tokio::test]
    async fn test_task_spins_and_stops() {
        let fixture = fixture();
        let task = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(100))),
            TaskOptions::default(),
        );

        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(task.state(), TaskState::Spinning);

        // Spinning again is invalid.
        assert!(task.spin().is_err());

        task.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.state(), TaskState::Stopped);

        // Stopping a stopped task is a no-op.
        task.stop();
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_task_fires_and_publishes() {
        let fixture = fixture();
        let task = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(20))),
            TaskOptions::default(),
        );

        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        task.stop();

        assert!(task.hit_count() >= 8, "hit_count = {}", task.hit_count());
        assert_eq!(task.failed_count(), 0);
        assert!(
            fixture.manager.published().len() >= 8,
            "published = {}",
            fixture.manager.published().len()
        );
        assert!(task.last_run().is_some());
    }

    #[tokio::test]
    async fn test_deadline_overrun_counts_failure_and_keeps_spinning() {
        let fixture = fixture();
        // Collect stalls well past the deadline.
        fixture.manager.set_collect_delay(Duration::from_millis(500));
        let task = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(30))),
            TaskOptions {
                deadline: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(task.failed_count() >= 1);
        assert!(task
            .last_failure()
            .unwrap()
            .contains("DeadlineExceeded"));
        assert_eq!(task.state(), TaskState::Spinning);
        task.stop();
    }

    #[tokio::test]
    async fn test_task_disables_after_threshold_and_enable_rearms() {
        let fixture = fixture();
        fixture.manager.set_fail_collect(true);
        let task = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(10))),
            TaskOptions {
                failure_threshold: Some(3),
                ..Default::default()
            },
        );

        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(task.state(), TaskState::Disabled);
        assert_eq!(task.failed_count(), 3);

        // Disabled tasks cannot spin...
        assert!(task.spin().is_err());
        // ...until enabled back to stopped.
        task.enable().unwrap();
        assert_eq!(task.state(), TaskState::Stopped);

        fixture.manager.set_fail_collect(false);
        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.state(), TaskState::Spinning);
        task.stop();
    }

    #[tokio::test]
    async fn test_enable_running_task_fails() {
        let fixture = fixture();
        let task = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(100))),
            TaskOptions::default(),
        );
        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = task.enable().unwrap_err();
        assert_eq!(err.code(), ScheduleCode::TASK_NOT_DISABLED);
        task.stop();
    }

    #[tokio::test]
    async fn test_named_task_and_default_name() {
        let fixture = fixture();
        let named = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(100))),
            TaskOptions {
                name: Some("my unique task".into()),
                ..Default::default()
            },
        );
        assert_eq!(named.name(), "my unique task");

        let unnamed = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(100))),
            TaskOptions::default(),
        );
        assert_eq!(unnamed.name(), format!("Task-{}", unnamed.id()));
    }

    #[tokio::test]
    async fn test_missed_intervals_accumulate() {
        let fixture = fixture();
        let task = task_with(
            &fixture,
            Schedule::Simple(SimpleSchedule::new(Duration::from_millis(5))),
            TaskOptions {
                // Slow the pipeline so boundaries go by between fires.
                deadline: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        );
        fixture.manager.set_collect_delay(Duration::from_millis(30));

        task.spin().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.stop();

        assert!(task.hit_count() >= 2);
        assert!(task.miss_count() >= 2, "miss_count = {}", task.miss_count());
    }
}
