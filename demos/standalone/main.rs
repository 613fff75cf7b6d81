use std::sync::Arc;

use async_trait::async_trait;
use flexi_logger::{colored_opt_format, Logger};
use jtt809_gateway::config::Config;
use jtt809_gateway::events::SinkHook;
use jtt809_gateway::gateway::Gateway;
use jtt809_gateway::sink::{Error as SinkError, EventQueue, EventSink};

/// 把事件打到日志的 sink，替代真实的消息通道
struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish_sync(
        &self,
        topic: &str,
        payload: bytes::Bytes,
    ) -> Result<(), SinkError> {
        log::info!(
            "event topic={} payload={}",
            topic,
            String::from_utf8_lossy(&payload)
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // 日志
    Logger::try_with_str("debug")
        .unwrap()
        .format(colored_opt_format)
        .start()
        .unwrap();

    // 获取配置
    let cfg = Config::from_path("./demos/config/standalone.toml")
        .await
        .unwrap();

    // 事件经重试队列异步投递
    let queue = EventQueue::new(Arc::new(LogSink));
    let hook = Arc::new(SinkHook::new(queue.clone()));

    // 启动网关
    let gateway = Gateway::with_hook(cfg, hook).unwrap();
    tokio::select! {
        result = gateway.start() => result.unwrap(),
        _ = tokio::signal::ctrl_c() => {
            gateway.shutdown();
        }
    }
    queue.close();
}
