use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use crate::error::PublishError;
use crate::handler::MessageHandler;

const CONSUMER_TAG: &str = "video-annotate";
/// AMQP 持久化消息
const PERSISTENT: u8 = 2;

/// 结果投递接口
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), PublishError>;
}

pub async fn connect(uri: &str) -> Result<Connection, lapin::Error> {
    Connection::connect(uri, ConnectionProperties::default()).await
}

async fn declare_durable(channel: &Channel, queue: &str) -> Result<(), lapin::Error> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// 通过默认交换机投递到输出队列，等待 broker 确认
pub struct AmqpPublisher {
    channel: Channel,
    queue: String,
}

impl AmqpPublisher {
    /// 打开发布通道，并在首次投递前声明持久化输出队列
    pub async fn declare(connection: &Connection, queue: &str) -> Result<Self, PublishError> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_durable(&channel, queue).await?;
        Ok(Self {
            channel,
            queue: queue.to_string(),
        })
    }
}

#[async_trait]
impl ResultPublisher for AmqpPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), PublishError> {
        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;
        if confirmation.is_nack() {
            return Err(PublishError::Rejected);
        }
        Ok(())
    }
}

/// 消费输入队列，逐条处理直到 Ctrl-C 或消息流结束
///
/// 使用 no_ack 消费：消息在收到时即视为确认（至多一次投递），
/// 处理过程中进程崩溃会丢失该任务。
pub async fn run_consumer<P: ResultPublisher>(
    connection: &Connection,
    input_queue: &str,
    handler: &MessageHandler<P>,
) -> Result<()> {
    let channel = connection
        .create_channel()
        .await
        .context("创建消费通道失败")?;
    declare_durable(&channel, input_queue)
        .await
        .with_context(|| format!("声明输入队列失败: {}", input_queue))?;

    let mut consumer = channel
        .basic_consume(
            input_queue,
            CONSUMER_TAG,
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("订阅输入队列失败: {}", input_queue))?;

    info!("[*] 等待队列 {} 中的消息，按 CTRL+C 退出", input_queue);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("收到退出信号，停止消费");
                break;
            }
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => handler.handle(&delivery.data).await,
                Some(Err(e)) => return Err(e).context("接收消息失败"),
                None => {
                    warn!("⚠️  消息流已关闭，停止消费");
                    break;
                }
            }
        }
    }

    Ok(())
}
