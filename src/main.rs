use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use video_annotate::config::{ConfigLayer, ConfigLoader, WorkerConfig};
use video_annotate::queue::{self, AmqpPublisher};
use video_annotate::{MessageHandler, VideoPipeline};

/// 视频目标检测标注服务 - 从 RabbitMQ 接收视频，逐帧检测并绘制目标框
#[derive(Parser, Debug)]
#[command(name = "video-annotate")]
#[command(about = "视频目标检测标注：YOLO 逐帧检测、绘制标注框、生成检测报告", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 队列模式：消费输入队列中的视频任务，结果发送到输出队列
    Consume {
        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// 输入队列名（环境变量 INPUT_QUEUE）
        #[arg(long)]
        input_queue: Option<String>,

        /// 输出队列名（环境变量 OUTPUT_QUEUE）
        #[arg(long)]
        output_queue: Option<String>,

        /// YOLO ONNX 模型路径（环境变量 YOLO_MODEL_PATH）
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// CLI 模式：处理本地视频文件
    Annotate {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 输出目录，写入 annotated.mp4 与 report.json
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// 配置文件路径（可选，支持 .ini 格式）
        #[arg(long)]
        config: Option<PathBuf>,

        /// YOLO ONNX 模型路径
        #[arg(long)]
        model: Option<PathBuf>,

        /// 置信度阈值 (0.0-1.0)
        #[arg(long)]
        conf: Option<f32>,
    },
    /// 生成一份带默认值的配置文件
    InitConfig {
        /// 配置文件输出路径
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Consume {
            config: config_file,
            input_queue,
            output_queue,
            model,
        } => {
            let overrides = ConfigLayer {
                input_queue,
                output_queue,
                model_path: model,
                ..Default::default()
            };
            let config =
                ConfigLoader::load(config_file.as_deref(), overrides).context("加载配置失败")?;
            init_logging(&config.log_level);
            consume(config).await?;
        }
        Commands::Annotate {
            input,
            output,
            config: config_file,
            model,
            conf,
        } => {
            let overrides = ConfigLayer {
                model_path: model,
                conf_threshold: conf,
                ..Default::default()
            };
            let config =
                ConfigLoader::load(config_file.as_deref(), overrides).context("加载配置失败")?;
            init_logging(&config.log_level);
            annotate(config, input, output).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path)?;
            println!("配置文件已生成: {}", path.display());
        }
    }

    Ok(())
}

/// RUST_LOG 优先，否则使用配置中的日志级别
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn consume(config: WorkerConfig) -> Result<()> {
    let (input_queue, output_queue) = config.require_queues()?;

    info!("加载检测模型...");
    let pipeline = Arc::new(VideoPipeline::from_config(&config).context("初始化处理流水线失败")?);

    let endpoint = config.amqp_endpoint();
    info!("连接 RabbitMQ: {}", endpoint);
    let connection = match queue::connect(&config.amqp_uri()).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("❌ 无法连接 RabbitMQ ({}): {}", endpoint, e);
            return Err(e).context("连接 RabbitMQ 失败");
        }
    };

    let publisher = AmqpPublisher::declare(&connection, output_queue)
        .await
        .with_context(|| format!("声明输出队列失败: {}", output_queue))?;
    let handler = MessageHandler::new(pipeline, publisher);

    let result = queue::run_consumer(&connection, input_queue, &handler).await;

    if let Err(e) = connection.close(200, "worker shutdown").await {
        warn!("⚠️  关闭 RabbitMQ 连接失败: {}", e);
    }
    result
}

async fn annotate(config: WorkerConfig, input: PathBuf, output: PathBuf) -> Result<()> {
    println!(
        "使用配置: conf_threshold={:.2}, iou_threshold={:.2}, input_size={}",
        config.conf_threshold, config.iou_threshold, config.input_size
    );

    let pipeline = VideoPipeline::from_config(&config).context("初始化处理流水线失败")?;
    let video = std::fs::read(&input)
        .with_context(|| format!("读取视频文件失败: {}", input.display()))?;

    let result = tokio::task::spawn_blocking(move || pipeline.process(&video))
        .await
        .context("处理任务异常退出")?
        .context("处理视频失败")?;

    std::fs::create_dir_all(&output)
        .with_context(|| format!("创建输出目录失败: {}", output.display()))?;
    let video_path = output.join("annotated.mp4");
    let report_path = output.join("report.json");
    std::fs::write(&video_path, &result.annotated_video)
        .with_context(|| format!("写入标注视频失败: {}", video_path.display()))?;
    let report_json =
        serde_json::to_string_pretty(&result.report).context("序列化检测报告失败")?;
    std::fs::write(&report_path, report_json)
        .with_context(|| format!("写入检测报告失败: {}", report_path.display()))?;

    println!("✅ 处理完成：{} 帧，{} 个检测事件", result.frame_count, result.report.detections.len());
    println!("  • 标注视频: {}", video_path.display());
    println!("  • 检测报告: {}", report_path.display());
    Ok(())
}
