use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use metrad_control::ManagesMetrics;
use metrad_event::{Event, EventBus};
use metrad_types::status_code::ScheduleCode;
use metrad_types::{make_error_msg, MetricType, Result};

use crate::collection::TaskCollection;
use crate::config::SchedulerConfig;
use crate::schedule::Schedule;
use crate::task::{Task, TaskOptions, TaskState};
use crate::work::WorkManager;
use crate::workflow::{Workflow, WorkflowMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Stopped,
    Started,
}

/// Creates and drives tasks over a bound metric manager.
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    metric_manager: Mutex<Option<Arc<dyn ManagesMetrics>>>,
    work: Mutex<Option<Arc<WorkManager>>>,
    tasks: TaskCollection,
    bus: Arc<EventBus>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            state: Mutex::new(SchedulerState::Stopped),
            metric_manager: Mutex::new(None),
            work: Mutex::new(None),
            tasks: TaskCollection::new(),
            bus,
        }
    }

    /// Bind the metric manager. Must happen before `start`.
    pub fn set_metric_manager(&self, manager: Arc<dyn ManagesMetrics>) {
        *self.metric_manager.lock() = Some(manager);
    }

    pub fn start(&self) -> Result<()> {
        let manager = self
            .metric_manager
            .lock()
            .clone()
            .ok_or_else(|| {
                metrad_types::Status::with_message(
                    ScheduleCode::METRIC_MANAGER_NOT_SET,
                    "bind a metric manager before starting the scheduler",
                )
            })?;

        let mut work = self.work.lock();
        if work.is_none() {
            *work = Some(Arc::new(WorkManager::new(
                self.config.queue_size,
                self.config.pool_size,
                manager,
            )));
        }
        *self.state.lock() = SchedulerState::Started;
        info!("scheduler started");
        Ok(())
    }

    /// Stop the scheduler and every task that is not already stopped.
    pub fn stop(&self) {
        *self.state.lock() = SchedulerState::Stopped;
        for task in self.tasks.list() {
            if task.state() != TaskState::Stopped {
                task.stop();
            }
        }
        info!("scheduler stopped");
    }

    fn require_started(&self) -> Result<Arc<WorkManager>> {
        if *self.state.lock() != SchedulerState::Started {
            return make_error_msg(ScheduleCode::SCHEDULER_NOT_STARTED, "create requires start");
        }
        Ok(self
            .work
            .lock()
            .clone()
            .expect("started scheduler always has a work manager"))
    }

    /// Create a task around a schedule and workflow map.
    ///
    /// Binds content types, subscribes every metric and plugin the workflow
    /// names, and registers the task stopped. Subscription errors unwind all
    /// subscriptions already acquired.
    pub fn create_task(
        &self,
        schedule: Schedule,
        map: WorkflowMap,
        options: TaskOptions,
    ) -> Result<Task> {
        let work = self.require_started()?;
        let options = TaskOptions {
            name: options.name,
            deadline: options.deadline.or(Some(std::time::Duration::from_millis(
                self.config.default_deadline_ms,
            ))),
            failure_threshold: options.failure_threshold.or(Some(self.config.failure_threshold)),
        };
        let manager = self
            .metric_manager
            .lock()
            .clone()
            .expect("started scheduler has a manager");

        schedule.validate()?;

        let workflow = Workflow::bind(map, manager.as_ref())?;

        // Subscribe the collect metrics, unwinding on error.
        let mut subscriptions: Vec<MetricType> = Vec::new();
        for requested in &workflow.map.collect.metrics {
            let config = workflow.map.config_for(&requested.namespace);
            match manager.subscribe_metric_type(requested, &config) {
                Ok(mt) => subscriptions.push(mt),
                Err(e) => {
                    warn!(namespace = %requested.namespace, error = %e, "subscription failed, unwinding");
                    for taken in &subscriptions {
                        manager.unsubscribe_metric_type(taken);
                    }
                    return Err(e);
                }
            }
        }

        // Subscribe processors and publishers, unwinding everything on error.
        let plugin_subs = workflow.plugin_subscriptions();
        let mut taken_plugins: Vec<(String, u32)> = Vec::new();
        for (kind, name, version, config) in &plugin_subs {
            match manager.subscribe_plugin(name, *version, config) {
                Ok(()) => taken_plugins.push((name.clone(), *version)),
                Err(e) => {
                    warn!(plugin = %name, kind = %kind, error = %e, "subscription failed, unwinding");
                    for (name, version) in &taken_plugins {
                        manager.unsubscribe_plugin(name, *version);
                    }
                    for taken in &subscriptions {
                        manager.unsubscribe_metric_type(taken);
                    }
                    return Err(e);
                }
            }
        }

        let task = Task::new(
            schedule,
            workflow,
            subscriptions,
            work,
            Arc::clone(&self.bus),
            options,
        );
        self.tasks.add(task.clone())?;

        info!(task = %task.id(), name = %task.name(), "task created");
        self.bus.emit(Event::TaskCreated {
            task_id: task.id().to_string(),
        });
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| metrad_types::Status::with_message(ScheduleCode::TASK_NOT_FOUND, id.to_string()))
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.list()
    }

    pub fn start_task(&self, id: &str) -> Result<()> {
        self.get_task(id)?.spin()
    }

    pub fn stop_task(&self, id: &str) -> Result<()> {
        let task = self.get_task(id)?;
        task.stop();
        Ok(())
    }

    pub fn enable_task(&self, id: &str) -> Result<()> {
        self.get_task(id)?.enable()
    }

    /// Remove a stopped task and release its subscriptions.
    pub fn remove_task(&self, id: &str) -> Result<()> {
        let task = self.tasks.remove(id)?;
        if let Some(manager) = self.metric_manager.lock().clone() {
            for subscription in task.subscriptions() {
                manager.unsubscribe_metric_type(subscription);
            }
            for (_, name, version, _) in task.workflow_plugin_subscriptions() {
                manager.unsubscribe_plugin(&name, version);
            }
        }
        Ok(())
    }
}
