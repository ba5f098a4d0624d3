pub mod collection;
pub mod config;
pub mod schedule;
pub mod scheduler;
pub mod task;
pub mod watch;
pub mod work;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use collection::TaskCollection;
pub use config::SchedulerConfig;
pub use schedule::{
    CronSchedule, Schedule, ScheduleResponse, ScheduleState, SimpleSchedule, WindowedSchedule,
};
pub use scheduler::Scheduler;
pub use task::{Task, TaskOptions, TaskState, DEFAULT_DEADLINE, DEFAULT_FAILURE_THRESHOLD};
pub use watch::TaskWatchEvent;
pub use work::{Job, JobReply, WorkManager};
pub use workflow::{
    CollectNodeMap, ProcessNode, ProcessNodeMap, PublishNode, PublishNodeMap, Workflow,
    WorkflowMap,
};
