//! An in-memory cluster used by tests and local development.
//!
//! Faithful where it matters to the engine: compare-and-swap on
//! `metadata.resourceVersion`, server-side label selection, per-pod log
//! buffers with follow support, and exec channels whose remote process dies
//! with the connection.
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use opsgate_core::{ClusterStatus, ExecOptions, LogOptions, Selector};

use super::{ClusterClient, ClusterError, ExecChannel, ExecEvent, KindRef, LogStream};

type ObjectKey = (String, Option<String>, String);

struct LogTopic {
    backlog: Vec<String>,
    live: broadcast::Sender<String>,
}

#[derive(Default)]
struct MemState {
    objects: HashMap<ObjectKey, Value>,
    logs: HashMap<(String, String), LogTopic>,
}

/// In-memory [`ClusterClient`].
#[derive(Default)]
pub struct MemCluster {
    state: Mutex<MemState>,
    version: AtomicU64,
    requests: AtomicU64,
}

fn key(kind: &KindRef, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        kind.kind.to_string(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn conflict(name: &str) -> ClusterError {
    ClusterError::Api(ClusterStatus::new(
        409,
        "Conflict",
        format!("operation cannot be fulfilled on {name:?}: the object has been modified"),
    ))
}

fn object_labels(obj: &Value) -> BTreeMap<String, String> {
    obj.pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// RFC 7386: objects merge recursively, null deletes, everything else replaces.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl MemCluster {
    /// Fresh empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// How many API calls this cluster has served; lets tests assert an
    /// operation was rejected before any round-trip.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Append a log line for a pod and wake any followers.
    pub fn push_log(&self, namespace: &str, pod: &str, line: impl Into<String>) {
        let line = line.into();
        let mut state = self.state.lock();
        let topic = state
            .logs
            .entry((namespace.to_string(), pod.to_string()))
            .or_insert_with(|| LogTopic {
                backlog: Vec::new(),
                live: broadcast::channel(256).0,
            });
        topic.backlog.push(line.clone());
        let _ = topic.live.send(line);
    }
}

#[async_trait::async_trait]
impl ClusterClient for MemCluster {
    async fn get(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError> {
        self.tick();
        self.state
            .lock()
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found(format!("{} {name:?}", kind.plural)))
    }

    async fn list(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError> {
        self.tick();
        let selector = match label_selector {
            Some(raw) => Selector::parse(raw).map_err(|e| {
                ClusterError::Api(ClusterStatus::new(400, "BadRequest", e.to_string()))
            })?,
            None => Selector::default(),
        };
        let state = self.state.lock();
        let mut items: Vec<Value> = state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                k == kind.kind && namespace.is_none_or(|want| ns.as_deref() == Some(want))
            })
            .filter(|(_, obj)| selector.matches(&object_labels(obj)))
            .map(|(_, obj)| obj.clone())
            .collect();
        items.sort_by_key(|obj| {
            obj.pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        });
        Ok(items)
    }

    async fn create(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        mut body: Value,
    ) -> Result<Value, ClusterError> {
        self.tick();
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClusterError::Api(ClusterStatus::new(422, "Invalid", "metadata.name is required"))
            })?
            .to_string();
        let mut state = self.state.lock();
        let object_key = key(kind, namespace, &name);
        if state.objects.contains_key(&object_key) {
            return Err(ClusterError::Api(ClusterStatus::new(
                409,
                "AlreadyExists",
                format!("{} {name:?} already exists", kind.plural),
            )));
        }
        body["metadata"]["resourceVersion"] = json!(self.next_version());
        if body.pointer("/metadata/creationTimestamp").is_none() {
            body["metadata"]["creationTimestamp"] = json!(Utc::now());
        }
        state.objects.insert(object_key, body.clone());
        Ok(body)
    }

    async fn replace(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
        mut body: Value,
    ) -> Result<Value, ClusterError> {
        self.tick();
        let mut state = self.state.lock();
        let object_key = key(kind, namespace, name);
        let current = state
            .objects
            .get(&object_key)
            .ok_or_else(|| ClusterError::not_found(format!("{} {name:?}", kind.plural)))?;

        let current_version = current.pointer("/metadata/resourceVersion").cloned();
        let offered = body.pointer("/metadata/resourceVersion").cloned();
        match offered {
            None => {
                return Err(ClusterError::Api(ClusterStatus::new(
                    422,
                    "Invalid",
                    "metadata.resourceVersion must be specified for an update",
                )))
            }
            Some(v) if Some(&v) != current_version.as_ref() => return Err(conflict(name)),
            _ => {}
        }
        let created = current.pointer("/metadata/creationTimestamp").cloned();
        body["metadata"]["resourceVersion"] = json!(self.next_version());
        if let Some(ts) = created {
            body["metadata"]["creationTimestamp"] = ts;
        }
        state.objects.insert(object_key, body.clone());
        Ok(body)
    }

    async fn merge_patch(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
        mut patch: Value,
    ) -> Result<Value, ClusterError> {
        self.tick();
        let mut state = self.state.lock();
        let object_key = key(kind, namespace, name);
        let current = state
            .objects
            .get_mut(&object_key)
            .ok_or_else(|| ClusterError::not_found(format!("{} {name:?}", kind.plural)))?;

        if let Some(precondition) = patch.pointer("/metadata/resourceVersion") {
            if Some(precondition) != current.pointer("/metadata/resourceVersion") {
                return Err(conflict(name));
            }
            // The precondition is not part of the content to merge.
            patch["metadata"]
                .as_object_mut()
                .map(|m| m.remove("resourceVersion"));
        }
        merge(current, &patch);
        current["metadata"]["resourceVersion"] = json!(self.next_version());
        Ok(current.clone())
    }

    async fn delete(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
        _force: bool,
    ) -> Result<(), ClusterError> {
        self.tick();
        let mut state = self.state.lock();
        state
            .objects
            .remove(&key(kind, namespace, name))
            .ok_or_else(|| ClusterError::not_found(format!("{} {name:?}", kind.plural)))?;
        if kind.kind == "Pod" {
            // Live log followers observe end-of-stream when the topic drops.
            if let Some(ns) = namespace {
                state.logs.remove(&(ns.to_string(), name.to_string()));
            }
        }
        Ok(())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<LogStream, ClusterError> {
        self.tick();
        let (backlog, live) = {
            let mut state = self.state.lock();
            let pod_key = key(&KindRef::of::<opsgate_core::resource::Pod>(), Some(namespace), pod);
            if !state.objects.contains_key(&pod_key) {
                return Err(ClusterError::not_found(format!("pods {pod:?}")));
            }
            let topic = state
                .logs
                .entry((namespace.to_string(), pod.to_string()))
                .or_insert_with(|| LogTopic {
                    backlog: Vec::new(),
                    live: broadcast::channel(256).0,
                });
            let backlog = match options.tail_lines {
                Some(n) => {
                    let n = usize::try_from(n).unwrap_or(0);
                    let skip = topic.backlog.len().saturating_sub(n);
                    topic.backlog[skip..].to_vec()
                }
                None => topic.backlog.clone(),
            };
            let live = options.follow.then(|| topic.live.subscribe());
            (backlog, live)
        };

        let head = stream::iter(backlog.into_iter().map(Ok));
        let stream: LogStream = match live {
            Some(rx) => head
                .chain(stream::unfold(rx, |mut rx| async move {
                    loop {
                        match rx.recv().await {
                            Ok(line) => return Some((Ok(line), rx)),
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }))
                .boxed(),
            None => head.boxed(),
        };
        Ok(stream)
    }

    async fn pod_exec(
        &self,
        namespace: &str,
        pod: &str,
        _options: &ExecOptions,
    ) -> Result<ExecChannel, ClusterError> {
        self.tick();
        {
            let state = self.state.lock();
            let pod_key = key(&KindRef::of::<opsgate_core::resource::Pod>(), Some(namespace), pod);
            if !state.objects.contains_key(&pod_key) {
                return Err(ClusterError::not_found(format!("pods {pod:?}")));
            }
        }
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(32);
        let (event_tx, event_rx) = mpsc::channel::<ExecEvent>(32);
        // Echo shell: good enough to exercise the bidirectional lifecycle.
        tokio::spawn(async move {
            while let Some(bytes) = input_rx.recv().await {
                if event_tx.send(ExecEvent::Stdout(bytes)).await.is_err() {
                    return;
                }
            }
            let _ = event_tx.send(ExecEvent::Exited(0)).await;
        });
        Ok(ExecChannel {
            input: input_tx,
            events: event_rx,
        })
    }
}
