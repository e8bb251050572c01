//! 会话监管：停止信号
//!
//! 持有 CancellationToken；requestStop 只设置信号，BDI 循环仅在两轮之间检查，已派发的步骤总会跑完。
//! 信号处理（Ctrl+C / SIGTERM）也只是调用 requestStop。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：停止令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    /// 用户 / 宿主请求停止时触发
    stop_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            stop_token: CancellationToken::new(),
        }
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    /// 请求停止（下一个循环边界生效）
    pub fn request_stop(&self) {
        self.stop_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)：收到后请求停止
    pub fn install_signal_handlers(&self) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, stopping after the current cycle...");
                supervisor.request_stop();
            }
        });

        #[cfg(unix)]
        {
            let supervisor = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, stopping after the current cycle...");
                    supervisor.request_stop();
                }
            });
        }
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
