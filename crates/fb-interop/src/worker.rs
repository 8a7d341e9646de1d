//! Background worker: a readiness-gated queue in front of one dispatcher.
//!
//! Instantiation is the only asynchronous step. Requests that arrive while it
//! is pending wait in the queue and are served in arrival order once the
//! sandbox is ready. Each request then runs to completion on the blocking
//! pool before the next one is taken off the queue.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::dispatcher::Dispatcher;
use crate::error::{InteropError, Result};
use crate::module::SandboxModule;
use crate::request::{Request, Response};

/// Instantiation state of the worker's sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Still loading; requests are queued
    Pending,
    /// Serving requests
    Ready,
    /// Instantiation failed; every request fails with this reason
    Failed(String),
}

/// Tunables for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Requests that may wait in the queue before `solve` starts waiting
    pub queue_capacity: usize,

    /// Reject scrambles with invalid notation before calling the sandbox
    pub validate_scramble: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            validate_scramble: true,
        }
    }
}

struct Job {
    request: Request,
    reply: oneshot::Sender<Result<Response>>,
}

/// Cheap, cloneable handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<Job>,
    readiness: watch::Receiver<Readiness>,
}

impl WorkerHandle {
    /// Current instantiation state.
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    /// Wait until the sandbox is ready, or report why it never will be.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut readiness = self.readiness.clone();
        let state = readiness
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .map_err(|_| InteropError::WorkerClosed)?;
        match &*state {
            Readiness::Failed(reason) => Err(InteropError::Instantiation(reason.clone())),
            _ => Ok(()),
        }
    }

    /// Queue a request and wait for its response.
    pub async fn solve(&self, request: Request) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Job { request, reply })
            .await
            .map_err(|_| InteropError::WorkerClosed)?;
        response.await.map_err(|_| InteropError::WorkerClosed)?
    }
}

/// Spawn a worker whose sandbox is produced by `init`.
///
/// Must be called from within a tokio runtime.
pub fn spawn<M, F>(init: F, options: WorkerOptions) -> WorkerHandle
where
    M: SandboxModule + Send + 'static,
    F: Future<Output = Result<M>> + Send + 'static,
{
    let (jobs, queue) = mpsc::channel(options.queue_capacity.max(1));
    let (readiness_tx, readiness) = watch::channel(Readiness::Pending);
    tokio::spawn(run(init, queue, readiness_tx, options));
    WorkerHandle { jobs, readiness }
}

async fn run<M, F>(
    init: F,
    mut queue: mpsc::Receiver<Job>,
    readiness: watch::Sender<Readiness>,
    options: WorkerOptions,
) where
    M: SandboxModule + Send + 'static,
    F: Future<Output = Result<M>> + Send + 'static,
{
    let module = match init.await {
        Ok(module) => module,
        Err(e) => {
            let reason = match e {
                InteropError::Instantiation(reason) => reason,
                other => other.to_string(),
            };
            tracing::error!("sandbox instantiation failed: {}", reason);
            readiness.send_replace(Readiness::Failed(reason.clone()));
            while let Some(job) = queue.recv().await {
                let _ = job
                    .reply
                    .send(Err(InteropError::Instantiation(reason.clone())));
            }
            return;
        }
    };

    readiness.send_replace(Readiness::Ready);
    tracing::info!("sandbox ready");

    let mut dispatcher =
        Some(Dispatcher::new(module).with_scramble_validation(options.validate_scramble));

    while let Some(Job { request, reply }) = queue.recv().await {
        let Some(mut current) = dispatcher.take() else {
            break;
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = current.dispatch(&request);
            (current, result)
        })
        .await;

        match joined {
            Ok((current, result)) => {
                dispatcher = Some(current);
                if reply.send(result).is_err() {
                    tracing::debug!("caller went away before the response was ready");
                }
            }
            Err(e) => {
                tracing::error!("dispatch task failed, worker stopping: {}", e);
                let _ = reply.send(Err(InteropError::WorkerClosed));
                break;
            }
        }
    }

    tracing::debug!("worker stopped");
}

#[cfg(feature = "wasm")]
mod wasm_worker {
    use super::*;
    use crate::wasm::{WasmInstance, WasmSandbox, WorkerConfig};

    /// Load the module from its configured location, instantiate it off the
    /// async threads and serve requests against it.
    pub fn spawn_wasm(config: WorkerConfig) -> WorkerHandle {
        let options = config.worker.clone();
        spawn(instantiate(config), options)
    }

    async fn instantiate(config: WorkerConfig) -> Result<WasmInstance> {
        let path = config.module_path();
        tracing::info!("loading sandbox module from {}", path.display());
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            InteropError::Instantiation(format!("failed to read {}: {}", path.display(), e))
        })?;

        let name = config.module_name();
        tokio::task::spawn_blocking(move || {
            let sandbox = WasmSandbox::new(config.runtime)?;
            let module = sandbox.load_module_bytes(&name, &bytes)?;
            sandbox.instantiate(&module)
        })
        .await
        .map_err(|e| InteropError::Instantiation(format!("instantiation task failed: {}", e)))?
    }
}

#[cfg(feature = "wasm")]
pub use wasm_worker::spawn_wasm;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, FakeModule};
    use serde_json::json;

    fn ready(behavior: Behavior) -> WorkerHandle {
        spawn(
            async move { Ok::<_, InteropError>(FakeModule::new(behavior)) },
            WorkerOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_solve() {
        let worker = ready(Behavior::Reply(r#"{"moves":["R"],"length":1}"#.to_string()));
        worker.wait_ready().await.unwrap();
        assert_eq!(worker.readiness(), Readiness::Ready);

        let response = worker
            .solve(Request::new("R U R' U'", vec![0, 1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(response.as_value(), &json!({"moves": ["R"], "length": 1}));
    }

    #[tokio::test]
    async fn test_requests_before_ready_are_queued_in_order() {
        let (release, gate) = oneshot::channel::<()>();
        let worker = spawn(
            async move {
                let _ = gate.await;
                Ok::<_, InteropError>(FakeModule::new(Behavior::Echo))
            },
            WorkerOptions::default(),
        );
        assert_eq!(worker.readiness(), Readiness::Pending);

        let pending: Vec<_> = ["R", "U", "F2", "x y"]
            .into_iter()
            .map(|scramble| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.solve(Request::new(scramble, vec![])).await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert_eq!(worker.readiness(), Readiness::Pending);
        release.send(()).unwrap();

        for (task, scramble) in pending.into_iter().zip(["R", "U", "F2", "x y"]) {
            let response = task.await.unwrap().unwrap();
            assert_eq!(response.as_value(), &json!([scramble]));
        }
        assert_eq!(worker.readiness(), Readiness::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_serialized() {
        let worker = ready(Behavior::Echo);
        let scrambles: Vec<String> = (0..20).map(|i| "R U ".repeat(i + 1)).collect();

        let results = solve_all(&worker, &scrambles).await;
        for (result, scramble) in results.into_iter().zip(&scrambles) {
            assert_eq!(result.unwrap().as_value(), &json!([scramble]));
        }
    }

    async fn solve_all(worker: &WorkerHandle, scrambles: &[String]) -> Vec<Result<Response>> {
        let tasks: Vec<_> = scrambles
            .iter()
            .cloned()
            .map(|scramble| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.solve(Request::new(scramble, vec![])).await })
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_failed_instantiation() {
        let worker = spawn(
            async { Err::<FakeModule, _>(InteropError::Instantiation("no module".into())) },
            WorkerOptions::default(),
        );

        let err = worker.solve(Request::new("R", vec![])).await.unwrap_err();
        assert!(matches!(err, InteropError::Instantiation(ref r) if r == "no module"));

        let err = worker.wait_ready().await.unwrap_err();
        assert!(matches!(err, InteropError::Instantiation(_)));
        assert_eq!(worker.readiness(), Readiness::Failed("no module".into()));
    }

    #[tokio::test]
    async fn test_request_error_does_not_stop_worker() {
        let worker = ready(Behavior::Push(vec![]));
        let err = worker.solve(Request::new("R", vec![])).await.unwrap_err();
        assert!(matches!(err, InteropError::ProtocolDesync { .. }));

        let err = worker.solve(Request::new("R", vec![99])).await.unwrap_err();
        assert!(matches!(err, InteropError::InvalidOrientation(99)));
    }
}
