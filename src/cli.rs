use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sfy", version, about = "多站点 SSH/SFTP 传输工具 — multi-site SSH/SFTP transfer tool")]
pub struct Cli {
    /// 输出调试日志到 <config>/logs/debug.log
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 站点管理
    Site {
        #[command(subcommand)]
        action: SiteAction,
    },
    /// 对站点运行连接自检（TCP/SSH/SFTP/沙箱根读写）
    Check {
        site: String,
    },
    /// 列出远端目录
    Ls {
        site: String,
        /// 远端路径，默认站点沙箱根
        path: Option<String>,
    },
    /// 上传本地文件或目录
    Up {
        site: String,
        local: String,
        remote: String,
        /// 覆盖并行预设（low/medium/high）
        #[arg(long)]
        preset: Option<String>,
    },
    /// 下载远端文件或目录
    Down {
        site: String,
        remote: String,
        local: String,
        #[arg(long)]
        preset: Option<String>,
    },
    /// 删除远端文件或目录（-r 递归删除子树）
    Rm {
        site: String,
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// 创建远端目录
    Mkdir {
        site: String,
        path: String,
    },
    /// 重命名/移动远端路径
    Mv {
        site: String,
        from: String,
        to: String,
    },
    /// 查看传输指标与当前预设推荐
    Metrics,
}

#[derive(Subcommand, Debug)]
pub enum SiteAction {
    /// 新增站点：sfy site add <name> user@host[:port]
    Add {
        name: String,
        target: String,
        /// 沙箱根目录（默认 /）
        #[arg(long, default_value = "/")]
        root: String,
        /// 私钥路径；提供时认证方式为 key
        #[arg(long)]
        key: Option<String>,
    },
    /// 从粘贴的 ssh 命令导入：sfy site import <name> "ssh -p 2222 user@host"
    Import {
        name: String,
        command: String,
        #[arg(long, default_value = "/")]
        root: String,
    },
    /// 列出已保存站点
    List,
    /// 删除站点
    Remove {
        name: String,
    },
}
