//! 宿主运行器：把一个 BdiSession 放到独立的 tokio 任务上
//!
//! 建立 cmd / state / event 三通道：命令经 mpsc 进入，状态投影经 watch 发布，引擎事件经 mpsc 流出。
//! 会话之间互不共享可变状态，每个会话一个任务。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::bdi::{BdiSession, ChannelSink, EventRecord};
use crate::core::builder::create_session_builder;
use crate::core::{SessionPhase, SessionSnapshot, SessionStatus, SessionSupervisor};

/// 宿主发往会话的命令
#[derive(Debug)]
pub enum Command {
    /// 执行一轮
    RunCycle,
    /// 运行直到落定或达到上限
    RunUntilSettled(u32),
    InjectDesire { text: String, priority: f64 },
    ResetDesire(String),
    RemoveDesire(String),
    /// 取快照
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// 停止并结束任务
    Stop,
}

/// 运行中会话的句柄
pub struct SessionHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<SessionStatus>,
    supervisor: SessionSupervisor,
    task: JoinHandle<BdiSession>,
}

impl SessionHandle {
    pub fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("session task has exited"))
    }

    /// 立即设置停止信号（正在运行的多轮循环会在下一轮开始前停下），并通知任务退出
    pub fn request_stop(&self) {
        self.supervisor.request_stop();
        let _ = self.commands.send(Command::Stop);
    }

    pub async fn snapshot(&self) -> anyhow::Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        Ok(rx.await?)
    }

    /// 等待任务结束并取回会话
    pub async fn join(self) -> anyhow::Result<BdiSession> {
        Ok(self.task.await?)
    }
}

fn publish(state_tx: &watch::Sender<SessionStatus>, session: &BdiSession, error: Option<String>) {
    let phase = if error.is_some() {
        SessionPhase::Error
    } else if session.is_stopped() {
        SessionPhase::Stopped
    } else if session.desires().all_settled() && !session.desires().is_empty() {
        SessionPhase::Settled
    } else {
        SessionPhase::Idle
    };
    let _ = state_tx.send(session.snapshot_state().project(phase, error));
}

fn set_running(state_tx: &watch::Sender<SessionStatus>) {
    state_tx.send_modify(|s| {
        s.phase = SessionPhase::Running;
        s.error_message = None;
    });
}

/// 在后台任务中运行会话，消费命令直到 Stop 或发送端全部关闭
pub fn spawn_session(mut session: BdiSession) -> SessionHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(SessionStatus::default());
    let supervisor = session.supervisor().clone();
    publish(&state_tx, &session, None);

    let task = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            let error = match cmd {
                Command::RunCycle => {
                    set_running(&state_tx);
                    session.run_cycle().await.err().map(|e| e.to_string())
                }
                Command::RunUntilSettled(max) => {
                    set_running(&state_tx);
                    session.run_until_settled(max).await.err().map(|e| e.to_string())
                }
                Command::InjectDesire { text, priority } => {
                    session.inject_desire(text, priority);
                    None
                }
                Command::ResetDesire(id) => session.reset_desire(&id).err().map(|e| e.to_string()),
                Command::RemoveDesire(id) => {
                    session.remove_desire(&id).err().map(|e| e.to_string())
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(session.snapshot_state());
                    None
                }
                Command::Stop => {
                    session.request_stop();
                    publish(&state_tx, &session, None);
                    break;
                }
            };
            if let Some(e) = &error {
                tracing::warn!(error = %e, "Session command failed");
            }
            publish(&state_tx, &session, error);
        }
        tracing::info!(cycle = session.cycle(), "Session task finished");
        session
    });

    SessionHandle {
        commands: cmd_tx,
        state: state_rx,
        supervisor,
        task,
    }
}

/// 从配置创建并启动会话：返回句柄与事件接收端
pub fn create_agent(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(SessionHandle, mpsc::UnboundedReceiver<EventRecord>)> {
    let (sink, events) = ChannelSink::channel();
    let session = create_session_builder(config_path)?
        .with_event_sink(Arc::new(sink))
        .build();
    Ok((spawn_session(session), events))
}
