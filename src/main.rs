use anyhow::Result;
use clap::Parser;

use sshferry::cli::{Cli, Commands, SiteAction};
use sshferry::{commands, logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    // 日志仅写文件，控制台留给进度条与结果输出
    logging::init_tracing(cli.debug);

    match cli.command {
        Commands::Site { action } => match action {
            SiteAction::Add { name, target, root, key } => {
                commands::handle_site_add(name, target, root, key)
            }
            SiteAction::Import { name, command, root } => {
                commands::handle_site_import(name, command, root)
            }
            SiteAction::List => commands::handle_site_list(),
            SiteAction::Remove { name } => commands::handle_site_remove(name),
        },
        Commands::Check { site } => commands::handle_check(site),
        Commands::Ls { site, path } => commands::handle_ls(site, path),
        Commands::Up { site, local, remote, preset } => {
            commands::handle_up(site, local, remote, preset)
        }
        Commands::Down { site, remote, local, preset } => {
            commands::handle_down(site, remote, local, preset)
        }
        Commands::Rm { site, path, recursive } => commands::handle_rm(site, path, recursive),
        Commands::Mkdir { site, path } => commands::handle_mkdir(site, path),
        Commands::Mv { site, from, to } => commands::handle_mv(site, from, to),
        Commands::Metrics => commands::handle_metrics(),
    }
}
