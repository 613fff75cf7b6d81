//! 事件下沉
//! 外部消息通道的抽象接口与内存重试队列；网关热路径只入队，从不等待投递

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, warn};
use tokio::{
    select,
    sync::mpsc,
    time::{interval, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// 重试队列缓冲大小
const QUEUE_SIZE: usize = 1000;
/// 单条事件最大投递尝试次数
const MAX_ATTEMPTS: u32 = 3;
/// 首次重试延迟
const INITIAL_DELAY: Duration = Duration::from_secs(1);
/// 重试延迟上限
const MAX_DELAY: Duration = Duration::from_secs(30);
/// 待投递任务的扫描周期
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Event queue closed")]
    Closed,
}

/// 外部事件通道。实现方负责真正的传输（如 MQ），网关只依赖本接口
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish_sync(&self, topic: &str, payload: Bytes) -> Result<(), Error>;
}

struct Task {
    topic: String,
    payload: Bytes,
    attempts: u32,
    next_attempt: Instant,
}

/// 有界重试队列：入队即返回；后台任务按指数退避投递，
/// 尝试耗尽或队列写满时丢弃并记日志
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Task>,
    cancel: CancellationToken,
}

impl EventQueue {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let cancel = CancellationToken::new();
        tokio::spawn(deliver_loop(sink, rx, cancel.clone()));
        Self { tx, cancel }
    }

    /// 非阻塞发布；队列已满时丢弃
    pub fn publish(&self, topic: &str, payload: Bytes) {
        let task = Task {
            topic: topic.to_string(),
            payload,
            attempts: 0,
            next_attempt: Instant::now(),
        };
        if self.tx.try_send(task).is_err() {
            warn!("event queue full, dropping event, topic={}", topic);
        }
    }

    /// 停止后台投递任务
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn deliver_loop(
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::Receiver<Task>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(SWEEP_INTERVAL);
    let mut pending: Vec<Task> = Vec::new();
    loop {
        select! {
            _ = cancel.cancelled() => return,
            task = rx.recv() => match task {
                Some(task) => pending.push(task),
                None => return,
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut remaining = Vec::with_capacity(pending.len());
                for mut task in pending.drain(..) {
                    if task.next_attempt > now {
                        remaining.push(task);
                        continue;
                    }
                    match sink.publish_sync(&task.topic, task.payload.clone()).await {
                        Ok(()) => {
                            if task.attempts > 0 {
                                debug!("publish retry success, topic={} attempt={}", task.topic, task.attempts);
                            }
                        }
                        Err(e) => {
                            task.attempts += 1;
                            if task.attempts < MAX_ATTEMPTS {
                                task.next_attempt = now + backoff(task.attempts);
                                warn!(
                                    "publish retry failed, topic={} attempt={} err={}",
                                    task.topic, task.attempts, e
                                );
                                remaining.push(task);
                            } else {
                                error!(
                                    "publish max retries exceeded, dropping, topic={} attempts={} err={}",
                                    task.topic, task.attempts, e
                                );
                            }
                        }
                    }
                }
                pending = remaining;
            }
        }
    }
}

/// 指数退避：1s、2s、4s ... 上限 30s
fn backoff(attempts: u32) -> Duration {
    let delay = INITIAL_DELAY * 2u32.saturating_pow(attempts.saturating_sub(1));
    delay.min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn publish_sync(&self, _topic: &str, _payload: Bytes) -> Result<(), Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::Publish("unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let sink = Arc::new(FlakySink {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let queue = EventQueue::new(sink.clone());
        queue.publish("login", Bytes::from_static(b"{}"));

        // 虚拟时间推进：1s 首次尝试 + 1s/2s 两次退避
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        queue.close();
    }

    #[tokio::test(start_paused = true)]
    async fn drops_after_max_attempts() {
        let sink = Arc::new(FlakySink {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let queue = EventQueue::new(sink.clone());
        queue.publish("login", Bytes::from_static(b"{}"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        // 三次尝试后丢弃，不再继续
        assert_eq!(sink.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        queue.close();
    }
}
