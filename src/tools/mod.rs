//! 能力提供方：Tool trait、ToolRegistry（能力目录）与 ToolExecutor（超时 + 有限重试）
//!
//! 内置工具：echo、沙箱文件系统（read_file / list_dir / write_file）、白名单 shell。

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod shell;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{ListDirTool, ReadFileTool, SafeFs, WriteFileTool};
pub use registry::{Tool, ToolRegistry};
pub use shell::ShellTool;
