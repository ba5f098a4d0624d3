use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use metrad_control::ManagesMetrics;
use metrad_types::status_code::ScheduleCode;
use metrad_types::{ConfigDataNode, Metric, MetricType, Result, Status};

/// What a worker hands back on a job's reply channel.
#[derive(Debug)]
pub enum JobReply {
    Collected { metrics: Vec<Metric> },
    Processed { content_type: String, content: Vec<u8> },
    Published,
    Failed(Status),
}

/// One unit of work flowing through a queue.
pub enum Job {
    Collect {
        types: Vec<MetricType>,
        deadline: Duration,
        reply: oneshot::Sender<JobReply>,
    },
    Process {
        name: String,
        version: u32,
        content_type: String,
        content: Vec<u8>,
        config: ConfigDataNode,
        deadline: Duration,
        reply: oneshot::Sender<JobReply>,
    },
    Publish {
        name: String,
        version: u32,
        content_type: String,
        content: Vec<u8>,
        config: ConfigDataNode,
        deadline: Duration,
        reply: oneshot::Sender<JobReply>,
    },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::Collect { .. } => "collect",
            Job::Process { .. } => "process",
            Job::Publish { .. } => "publish",
        }
    }
}

/// A bounded queue plus the worker pool draining it.
struct Unit {
    kind: &'static str,
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl Unit {
    fn start(
        kind: &'static str,
        queue_size: usize,
        workers: usize,
        manager: &Arc<dyn ManagesMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_size);
        let unit = Self {
            kind,
            tx,
            rx: Arc::new(Mutex::new(rx)),
        };
        for _ in 0..workers {
            unit.add_worker(manager);
        }
        unit
    }

    fn add_worker(&self, manager: &Arc<dyn ManagesMetrics>) {
        let kind = self.kind;
        let rx = Arc::clone(&self.rx);
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            loop {
                // Workers share one receiver; the queue closes on stop.
                let job = rx.lock().await.recv().await;
                let Some(job) = job else {
                    debug!(kind, "worker queue closed");
                    return;
                };
                run_job(job, manager.as_ref()).await;
            }
        });
    }
}

async fn run_job(job: Job, manager: &dyn ManagesMetrics) {
    match job {
        Job::Collect {
            types,
            deadline,
            reply,
        } => {
            let outcome = match manager.collect_metrics(&types, deadline).await {
                Ok(metrics) => JobReply::Collected { metrics },
                Err(e) => JobReply::Failed(e),
            };
            let _ = reply.send(outcome);
        }
        Job::Process {
            name,
            version,
            content_type,
            content,
            config,
            deadline,
            reply,
        } => {
            let outcome = match manager
                .process_metrics(&content_type, &content, &name, version, &config, deadline)
                .await
            {
                Ok((content_type, content)) => JobReply::Processed {
                    content_type,
                    content,
                },
                Err(e) => JobReply::Failed(e),
            };
            let _ = reply.send(outcome);
        }
        Job::Publish {
            name,
            version,
            content_type,
            content,
            config,
            deadline,
            reply,
        } => {
            let outcome = match manager
                .publish_metrics(&content_type, &content, &name, version, &config, deadline)
                .await
            {
                Ok(()) => JobReply::Published,
                Err(e) => JobReply::Failed(e),
            };
            let _ = reply.send(outcome);
        }
    }
}

/// Three independent queue+pool units, one per job kind.
///
/// Submission never blocks: a full queue rejects the job with `QueueFull`,
/// which the task records as a failure instead of retrying.
pub struct WorkManager {
    collect: Unit,
    process: Unit,
    publish: Unit,
    manager: Arc<dyn ManagesMetrics>,
}

impl WorkManager {
    pub fn new(queue_size: usize, pool_size: usize, manager: Arc<dyn ManagesMetrics>) -> Self {
        Self {
            collect: Unit::start("collect", queue_size, pool_size, &manager),
            process: Unit::start("process", queue_size, pool_size, &manager),
            publish: Unit::start("publish", queue_size, pool_size, &manager),
            manager,
        }
    }

    /// Grow the collect worker pool by one.
    pub fn add_collect_worker(&self) {
        self.collect.add_worker(&self.manager);
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        let unit = match &job {
            Job::Collect { .. } => &self.collect,
            Job::Process { .. } => &self.process,
            Job::Publish { .. } => &self.publish,
        };
        let kind = job.kind();
        unit.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Status::with_message(ScheduleCode::QUEUE_FULL, format!("{} queue full", kind))
            }
            mpsc::error::TrySendError::Closed(_) => Status::with_message(
                metrad_types::status_code::StatusCode::INTERRUPTED,
                format!("{} queue closed", kind),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockMetricManager;
    use metrad_types::{MetricData, MetricType, Namespace};

    fn types() -> Vec<MetricType> {
        vec![MetricType::new(
            Namespace::from_literals(&["intel", "dummy", "foo"]),
            1,
            "dummy:1",
        )]
    }

    #[tokio::test]
    async fn test_collect_job_round_trip() {
        let manager = Arc::new(MockMetricManager::new());
        let work = WorkManager::new(25, 4, manager);

        let (tx, rx) = oneshot::channel();
        work.submit(Job::Collect {
            types: types(),
            deadline: Duration::from_secs(5),
            reply: tx,
        })
        .unwrap();

        match rx.await.unwrap() {
            JobReply::Collected { metrics } => {
                assert_eq!(metrics.len(), 1);
                assert_eq!(metrics[0].data, MetricData::Int64(1));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_job_reaches_manager() {
        let manager = Arc::new(MockMetricManager::new());
        let work = WorkManager::new(25, 4, Arc::clone(&manager) as Arc<dyn ManagesMetrics>);

        let (tx, rx) = oneshot::channel();
        work.submit(Job::Publish {
            name: "file".into(),
            version: 1,
            content_type: "metrad.bin".into(),
            content: vec![1, 2, 3],
            config: ConfigDataNode::new(),
            deadline: Duration::from_secs(5),
            reply: tx,
        })
        .unwrap();

        assert!(matches!(rx.await.unwrap(), JobReply::Published));
        assert_eq!(manager.published().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let manager = Arc::new(MockMetricManager::new());
        // Jobs stall so one worker plus a one-slot queue saturate fast.
        manager.set_collect_delay(Duration::from_secs(5));
        let work = WorkManager::new(1, 1, Arc::clone(&manager) as Arc<dyn ManagesMetrics>);

        let mut receivers = Vec::new();
        let mut rejected = None;
        for _ in 0..4 {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            let outcome = work.submit(Job::Collect {
                types: types(),
                deadline: Duration::from_secs(5),
                reply: tx,
            });
            if let Err(e) = outcome {
                rejected = Some(e);
                break;
            }
            // Give the worker a beat to pull from the queue.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let rejected = rejected.expect("saturated queue should reject");
        assert_eq!(rejected.code(), ScheduleCode::QUEUE_FULL);
    }

    #[tokio::test]
    async fn test_failed_collect_surfaces_on_reply() {
        let manager = Arc::new(MockMetricManager::new());
        manager.set_fail_collect(true);
        let work = WorkManager::new(25, 4, Arc::clone(&manager) as Arc<dyn ManagesMetrics>);

        let (tx, rx) = oneshot::channel();
        work.submit(Job::Collect {
            types: types(),
            deadline: Duration::from_secs(5),
            reply: tx,
        })
        .unwrap();

        assert!(matches!(rx.await.unwrap(), JobReply::Failed(_)));
    }

    #[tokio::test]
    async fn test_add_collect_worker_drains_backlog() {
        let manager = Arc::new(MockMetricManager::new());
        manager.set_collect_delay(Duration::from_millis(50));
        let work = WorkManager::new(8, 1, Arc::clone(&manager) as Arc<dyn ManagesMetrics>);
        work.add_collect_worker();

        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = oneshot::channel();
            work.submit(Job::Collect {
                types: types(),
                deadline: Duration::from_secs(5),
                reply: tx,
            })
            .unwrap();
            receivers.push(rx);
        }
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), JobReply::Collected { .. }));
        }
    }
}
