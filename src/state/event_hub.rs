//! 事件通道管理
//!
//! 每次部署一个广播通道（按 deployment_id 区分），支持 SSE 订阅和自动清理。
//! 编排器只持有 `EventSink`，只有“发布”这一个能力。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::domain::{Severity, StageEvent};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 事件发布端
///
/// 广播发送不会阻塞，也没有背压：没有订阅者时事件直接丢弃，落后的订阅者会跳过旧事件。
#[derive(Clone, Debug)]
pub struct EventSink {
    deployment_id: String,
    vm_id: Option<String>,
    tx: broadcast::Sender<StageEvent>,
}

impl EventSink {
    pub fn new(deployment_id: impl Into<String>, tx: broadcast::Sender<StageEvent>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            vm_id: None,
            tx,
        }
    }

    /// 创建独立通道（不经过 EventHub）
    pub fn channel(deployment_id: impl Into<String>) -> (Self, broadcast::Receiver<StageEvent>) {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (Self::new(deployment_id, tx), rx)
    }

    /// 派生一个标记了 VM 的发布端
    pub fn for_vm(&self, vm_id: &str) -> Self {
        Self {
            deployment_id: self.deployment_id.clone(),
            vm_id: Some(vm_id.to_string()),
            tx: self.tx.clone(),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn publish(&self, severity: Severity, text: impl Into<String>) {
        let event = StageEvent::new(&self.deployment_id, severity, text)
            .with_vm(self.vm_id.as_deref());

        let vm = self.vm_id.as_deref().unwrap_or("-");
        match severity {
            Severity::Info | Severity::Success => {
                tracing::info!(deployment_id = %self.deployment_id, vm = %vm, "{}", event.text)
            }
            Severity::Warning => {
                tracing::warn!(deployment_id = %self.deployment_id, vm = %vm, "{}", event.text)
            }
            Severity::Error => {
                tracing::error!(deployment_id = %self.deployment_id, vm = %vm, "{}", event.text)
            }
        }

        let _ = self.tx.send(event);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.publish(Severity::Info, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.publish(Severity::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.publish(Severity::Error, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.publish(Severity::Success, text);
    }
}

/// 通道信息
struct EventChannel {
    /// 部署结束后置空，订阅者在其余发布端释放后收到 Closed
    sender: Option<broadcast::Sender<StageEvent>>,
    created_at: DateTime<Utc>,
    finished: bool,
}

/// 事件中心
pub struct EventHub {
    /// 通道映射 (deployment_id -> EventChannel)
    channels: RwLock<HashMap<String, EventChannel>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// 创建（或复用）部署的事件通道
    ///
    /// 观察者可以在部署开始前先订阅，部署开始时复用同一个通道
    pub async fn create(&self, deployment_id: &str) -> EventSink {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(deployment_id).and_then(|c| c.sender.clone()) {
            return EventSink::new(deployment_id, sender);
        }

        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        channels.insert(
            deployment_id.to_string(),
            EventChannel {
                sender: Some(sender.clone()),
                created_at: Utc::now(),
                finished: false,
            },
        );

        EventSink::new(deployment_id, sender)
    }

    /// 订阅事件通道
    ///
    /// 通道不存在或已完成时返回 None
    pub async fn subscribe(&self, deployment_id: &str) -> Option<broadcast::Receiver<StageEvent>> {
        let channels = self.channels.read().await;
        channels
            .get(deployment_id)
            .and_then(|c| c.sender.as_ref())
            .map(|s| s.subscribe())
    }

    /// 订阅事件通道，不存在时预先创建
    pub async fn subscribe_or_create(&self, deployment_id: &str) -> Option<broadcast::Receiver<StageEvent>> {
        if let Some(rx) = self.subscribe(deployment_id).await {
            return Some(rx);
        }
        if self.exists(deployment_id).await {
            // 已完成的部署不再接受订阅
            return None;
        }
        let sink = self.create(deployment_id).await;
        Some(sink.tx.subscribe())
    }

    /// 标记通道完成并释放 hub 持有的发送端
    pub async fn finish(&self, deployment_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(deployment_id) {
            channel.finished = true;
            channel.sender = None;
        }
    }

    /// 检查通道是否已完成
    pub async fn is_finished(&self, deployment_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.get(deployment_id).map_or(true, |c| c.finished)
    }

    /// 检查通道是否存在
    pub async fn exists(&self, deployment_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.contains_key(deployment_id)
    }

    /// 清理已完成的通道
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, channel| !channel.finished);
    }

    /// 清理过期通道
    ///
    /// 移除创建时间超过指定时长、且没有订阅者的通道（包括预订阅后从未启动的部署）
    pub async fn cleanup_expired(&self, max_age_hours: i64) {
        let now = Utc::now();
        let mut channels = self.channels.write().await;

        channels.retain(|_, channel| {
            let age = now - channel.created_at;
            if age.num_hours() < max_age_hours {
                return true;
            }
            channel
                .sender
                .as_ref()
                .map_or(false, |s| s.receiver_count() > 0)
        });
    }

    /// 获取通道数量
    pub async fn count(&self) -> usize {
        let channels = self.channels.read().await;
        channels.len()
    }

    /// 获取活跃通道数量（未完成）
    pub async fn active_count(&self) -> usize {
        let channels = self.channels.read().await;
        channels.values().filter(|c| !c.finished).count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_create_and_subscribe() {
        let hub = EventHub::new();

        let sink = hub.create("dep-1").await;
        assert!(hub.exists("dep-1").await);

        let mut receiver = hub.subscribe("dep-1").await.unwrap();
        sink.info("Hello");
        sink.for_vm("a").error("boom");

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.text, "Hello");
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.vm_id, None);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.vm_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_channels_are_scoped_per_deployment() {
        let hub = EventHub::new();
        let first = hub.create("dep-1").await;
        let second = hub.create("dep-2").await;

        let mut rx = hub.subscribe("dep-2").await.unwrap();
        first.info("from first");
        second.info("from second");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.text, "from second");
        assert_eq!(event.deployment_id, "dep-2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pre_subscription_reuses_channel() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe_or_create("dep-1").await.unwrap();

        let sink = hub.create("dep-1").await;
        sink.success("done");

        assert_eq!(rx.recv().await.unwrap().text, "done");
        assert_eq!(hub.count().await, 1);
    }

    #[tokio::test]
    async fn test_finish_closes_stream() {
        let hub = EventHub::new();
        let sink = hub.create("dep-1").await;
        let mut rx = hub.subscribe("dep-1").await.unwrap();

        sink.info("last");
        hub.finish("dep-1").await;
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().text, "last");
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));

        assert!(hub.is_finished("dep-1").await);
        assert!(hub.subscribe("dep-1").await.is_none());
        assert!(hub.subscribe_or_create("dep-1").await.is_none());

        hub.cleanup().await;
        assert!(!hub.exists("dep-1").await);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_running_channels() {
        let hub = EventHub::new();
        hub.create("dep-1").await;
        hub.create("dep-2").await;
        hub.finish("dep-2").await;

        hub.cleanup().await;
        assert!(hub.exists("dep-1").await);
        assert_eq!(hub.active_count().await, 1);
    }
}
