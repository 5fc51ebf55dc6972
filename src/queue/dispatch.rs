// Handing reserved tasks over to whoever generates the report

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::jobs::TaskMessage;
use crate::config::RedisConfig;

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, message: &TaskMessage) -> Result<()>;
}

/// Sends every task to an in-process worker.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<TaskMessage>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskDispatcher for ChannelDispatcher {
    async fn dispatch(&self, message: &TaskMessage) -> Result<()> {
        self.sender.send(message.clone()).context("Task worker is not running")?;
        Ok(())
    }
}

/// Pushes tasks onto Redis lists: host-generated reports to the host queue as
/// Celery messages, the rest to this service's queue as plain [`TaskMessage`] JSON.
#[derive(Clone)]
pub struct RedisDispatcher {
    conn: ConnectionManager,
    host_queue: String,
    service_queue: String,
}

impl RedisDispatcher {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await.context("Failed to connect to Redis")?;
        Ok(Self {
            conn,
            host_queue: config.host_queue.clone(),
            service_queue: config.service_queue.clone(),
        })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn is_host_task(message: &TaskMessage) -> bool {
        message.kind().map_or(true, |kind| kind.generated_by_host())
    }
}

/// Celery protocol 2 message, as the host's workers read it from a Redis list.
///
/// The task runs with `(entry_id, xmodule_instance_args)`, where `entry_id`
/// is the task table row the host loads its input from.
pub fn celery_message(message: &TaskMessage, queue: &str) -> Result<String> {
    let xmodule_instance_args = json!({
        "xqueue_callback_url_prefix": "",
        "request_info": {
            "username": message.requester.username,
            "user_id": message.requester.user_id,
            "ip": "",
            "agent": "",
            "host": "",
        },
        "task_id": message.task_id,
    });
    let args = json!([message.entry_id, xmodule_instance_args]);
    let body = json!([
        args,
        {},
        { "callbacks": null, "errbacks": null, "chain": null, "chord": null },
    ]);

    let envelope = json!({
        "body": BASE64.encode(serde_json::to_vec(&body)?),
        "content-encoding": "utf-8",
        "content-type": "application/json",
        "headers": {
            "lang": "py",
            "task": message.task_class,
            "id": message.task_id,
            "shadow": null,
            "eta": null,
            "expires": null,
            "group": null,
            "group_index": null,
            "retries": 0,
            "timelimit": [null, null],
            "root_id": message.task_id,
            "parent_id": null,
            "argsrepr": args.to_string(),
            "kwargsrepr": "{}",
            "origin": "cmm-report-api",
            "ignore_result": false,
        },
        "properties": {
            "correlation_id": message.task_id,
            "reply_to": "",
            "delivery_mode": 2,
            "delivery_info": { "exchange": "", "routing_key": queue },
            "priority": 0,
            "body_encoding": "base64",
            "delivery_tag": Uuid::new_v4().to_string(),
        },
    });
    Ok(envelope.to_string())
}

#[async_trait]
impl TaskDispatcher for RedisDispatcher {
    async fn dispatch(&self, message: &TaskMessage) -> Result<()> {
        let (queue, payload) = if Self::is_host_task(message) {
            (self.host_queue.as_str(), celery_message(message, &self.host_queue)?)
        } else {
            (self.service_queue.as_str(), serde_json::to_string(message)?)
        };
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, payload).await?;
        debug!(task_id = %message.task_id, queue = %queue, "Task dispatched");
        Ok(())
    }
}
