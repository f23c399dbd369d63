//! Handler wrappers changing how concurrent executions of a job interact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::jobs::error::JobError;
use crate::jobs::handler::{JobHandler, JobHandlerContext, JobOutputStream};
use crate::jobs::types::JobDescription;

struct Serialized {
    inner: Arc<dyn JobHandler>,
    lock: Arc<AsyncMutex<()>>,
}

impl JobHandler for Serialized {
    fn description(&self) -> JobDescription {
        self.inner.description()
    }

    fn handle(&self, argument: Value, context: JobHandlerContext) -> JobOutputStream {
        let inner = self.inner.clone();
        let lock = self.lock.clone();
        stream::once(async move {
            let guard = lock.lock_owned().await;
            inner.handle(argument, context).map(move |item| {
                let _held = &guard;
                item
            })
        })
        .flatten()
        .boxed()
    }
}

/// Run executions one at a time. An execution waits until the previous one's
/// output stream has ended or was dropped.
pub fn serialize(handler: Arc<dyn JobHandler>) -> Arc<dyn JobHandler> {
    Arc::new(Serialized {
        inner: handler,
        lock: Arc::new(AsyncMutex::new(())),
    })
}

type MemoizedRun = Shared<BoxFuture<'static, Result<Vec<Value>, JobError>>>;

struct Memoized {
    inner: Arc<dyn JobHandler>,
    runs: Arc<Mutex<HashMap<String, MemoizedRun>>>,
}

impl JobHandler for Memoized {
    fn description(&self) -> JobDescription {
        self.inner.description()
    }

    fn handle(&self, argument: Value, context: JobHandlerContext) -> JobOutputStream {
        let key = argument.to_string();
        let run = {
            let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
            match runs.get(&key) {
                Some(run) => {
                    tracing::trace!("sharing memoized execution for {}", key);
                    run.clone()
                }
                None => {
                    let outputs = self.inner.handle(argument, context);
                    let forget = (self.runs.clone(), key.clone());
                    let run = async move {
                        let result = outputs.try_collect::<Vec<Value>>().await;
                        // Failed executions are not memoized.
                        if result.is_err() {
                            let (runs, key) = forget;
                            runs.lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    runs.insert(key, run.clone());
                    run
                }
            }
        };

        stream::once(run)
            .map(|result| match result {
                Ok(values) => stream::iter(values.into_iter().map(Ok)).boxed(),
                Err(error) => stream::once(future::ready(Err(error))).boxed(),
            })
            .flatten()
            .boxed()
    }
}

/// Cache outputs by argument. The first execution for an argument is shared
/// by every job scheduled with the same argument, including while it is still
/// running, and its outputs are replayed once it completes. A failed execution
/// is forgotten so the next job runs the handler again.
pub fn memoize(handler: Arc<dyn JobHandler>) -> Arc<dyn JobHandler> {
    Arc::new(Memoized {
        inner: handler,
        runs: Arc::new(Mutex::new(HashMap::new())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::create_job_handler;
    use crate::jobs::registry::SimpleJobRegistry;
    use crate::jobs::scheduler::Scheduler;
    use crate::schema::CoreSchemaRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_memoize_runs_once_per_argument() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = create_job_handler(JobDescription::new("double"), move |argument, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!(argument.as_i64().unwrap_or(0) * 2)) }
        });

        let registry = SimpleJobRegistry::new();
        registry.register("double", memoize(handler)).unwrap();
        let scheduler = Scheduler::new(Arc::new(registry), Arc::new(CoreSchemaRegistry::new()));

        for _ in 0..3 {
            let job = scheduler.schedule("double", json!(21));
            assert_eq!(job.output().next().await.unwrap().unwrap(), json!(42));
            job.wait().await;
        }
        let job = scheduler.schedule("double", json!(1));
        assert_eq!(job.output().next().await.unwrap().unwrap(), json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_memoize_shares_an_execution_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = create_job_handler(JobDescription::new("slow-double"), move |argument, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!(argument.as_i64().unwrap_or(0) * 2))
            }
        });

        let registry = SimpleJobRegistry::new();
        registry.register("slow-double", memoize(handler)).unwrap();
        let scheduler = Scheduler::new(Arc::new(registry), Arc::new(CoreSchemaRegistry::new()));

        let first = scheduler.schedule("slow-double", json!(1));
        let second = scheduler.schedule("slow-double", json!(1));
        let mut first_output = first.output();
        let mut second_output = second.output();
        let (a, b) = futures::join!(first_output.next(), second_output.next());
        assert_eq!(a.unwrap().unwrap(), json!(2));
        assert_eq!(b.unwrap().unwrap(), json!(2));
        first.wait().await;
        second.wait().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memoize_forgets_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = create_job_handler(JobDescription::new("flaky"), move |_, _| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(anyhow::anyhow!("first attempt fails"))
                } else {
                    Ok(json!("ok"))
                }
            }
        });

        let registry = SimpleJobRegistry::new();
        registry.register("flaky", memoize(handler)).unwrap();
        let scheduler = Scheduler::new(Arc::new(registry), Arc::new(CoreSchemaRegistry::new()));

        let job = scheduler.schedule("flaky", json!(null));
        assert!(job.output().next().await.unwrap().is_err());
        job.wait().await;

        let job = scheduler.schedule("flaky", json!(null));
        assert_eq!(job.output().next().await.unwrap().unwrap(), json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_serialize_never_overlaps() {
        let active = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let (a, m) = (active.clone(), max.clone());
        let handler = create_job_handler(JobDescription::new("slow"), move |_, _| {
            let (active, max) = (a.clone(), m.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        });

        let registry = SimpleJobRegistry::new();
        registry.register("slow", serialize(handler)).unwrap();
        let scheduler = Scheduler::new(Arc::new(registry), Arc::new(CoreSchemaRegistry::new()));

        let jobs: Vec<_> = (0..4).map(|_| scheduler.schedule("slow", json!(null))).collect();
        for job in jobs {
            job.wait().await;
        }
        assert_eq!(max.load(Ordering::SeqCst), 1);
    }
}
