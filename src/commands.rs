use std::sync::Arc;

use anyhow::{Context, Result};
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use crate::engine::{Preset, SftpEngine};
use crate::events::{Event, EventBus};
use crate::metrics::MetricsCollector;
use crate::parse;
use crate::scheduler::TaskScheduler;
use crate::site::{AuthMethod, SiteConfig};
use crate::site_store::SiteStore;
use crate::task::{Task, TaskStatus};

fn load_site(name: &str) -> Result<SiteConfig> {
    let store = SiteStore::default_location();
    let mut site = store
        .find(name)
        .with_context(|| format!("站点 '{}' 不存在，请先 sfy site add", name))?;
    // 运行时口令只从环境读取，绝不落盘
    if site.auth_method == AuthMethod::Password && site.password.is_none() {
        site.password = std::env::var("SSHFERRY_PASSWORD").ok();
    }
    if site.key_passphrase.is_none() {
        site.key_passphrase = std::env::var("SSHFERRY_KEY_PASSPHRASE").ok();
    }
    Ok(site)
}

pub fn handle_site_add(name: String, target: String, root: String, key: Option<String>) -> Result<()> {
    let (username, host, port) = parse::parse_user_host(&target)?;
    let store = SiteStore::default_location();
    if store.find(&name).is_some() {
        eprintln!("⚠️ 站点 '{}' 已存在", name);
        return Ok(());
    }
    let mut site = SiteConfig::new(&name, host, username);
    site.port = port;
    site.remote_root = root;
    if let Some(key_path) = key {
        site.auth_method = AuthMethod::Key;
        site.key_path = Some(key_path);
    }
    site.validate()?;
    store.upsert(site)?;
    println!("✅ 已创建站点 '{}' 并保存到 {}", name, store.path().display());
    Ok(())
}

pub fn handle_site_import(name: String, command: String, root: String) -> Result<()> {
    let parts = parse::parse_ssh_command(&command)?;
    let username = parts.username.unwrap_or_else(|| "root".to_string());
    let store = SiteStore::default_location();
    if store.find(&name).is_some() {
        eprintln!("⚠️ 站点 '{}' 已存在", name);
        return Ok(());
    }
    let mut site = SiteConfig::new(&name, parts.host, username);
    site.port = parts.port;
    site.remote_root = root;
    store.upsert(site)?;
    println!("✅ 已从 ssh 命令导入站点 '{}'", name);
    Ok(())
}

pub fn handle_site_list() -> Result<()> {
    let sites = SiteStore::default_location().load();
    if sites.is_empty() {
        println!("尚无站点，使用 sfy site add <name> user@host[:port] 新增");
        return Ok(());
    }
    let title = vec![
        "Name".cell().bold(true),
        "Username".cell().bold(true),
        "Host".cell().bold(true),
        "Port".cell().bold(true),
        "Auth".cell().bold(true),
        "Root".cell().bold(true),
    ];
    let rows: Vec<Vec<CellStruct>> = sites
        .iter()
        .map(|s| {
            vec![
                s.name.as_str().cell(),
                s.username.as_str().cell().justify(Justify::Right),
                s.host.as_str().cell().justify(Justify::Right),
                s.port.cell().justify(Justify::Right),
                s.auth_method.as_str().cell(),
                s.remote_root.as_str().cell(),
            ]
        })
        .collect();
    print_stdout(rows.table().title(title)).context("无法渲染表格")?;
    Ok(())
}

pub fn handle_site_remove(name: String) -> Result<()> {
    if SiteStore::default_location().remove(&name)? {
        println!("✅ 已删除站点 '{}'", name);
    } else {
        eprintln!("站点 '{}' 不存在", name);
    }
    Ok(())
}

pub fn handle_check(site_name: String) -> Result<()> {
    let site = load_site(&site_name)?;
    let checker = crate::checker::ConnectionChecker::new(site);
    let results = checker.run_all_checks();
    for r in &results {
        if r.passed {
            println!("{} {}: {}", "✓".green(), r.name, r.message);
        } else {
            println!("{} {}: {}", "✗".red(), r.name, r.message);
        }
    }
    if crate::checker::ConnectionChecker::all_passed(&results) {
        println!("{}", "全部检查通过".green());
    } else {
        eprintln!("{}", "存在未通过的检查项".red());
    }
    Ok(())
}

pub fn handle_ls(site_name: String, path: Option<String>) -> Result<()> {
    let site = load_site(&site_name)?;
    let dir = path.unwrap_or_else(|| site.remote_root.clone());
    let mut engine = SftpEngine::new(site);
    engine.connect()?;
    let mut entries = engine.list_dir(&dir)?;
    engine.disconnect();
    // listing order is server-defined; sort dirs-first then by name
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
    for e in &entries {
        let kind = if e.is_dir { "d" } else { "-" };
        let mtime = chrono::DateTime::from_timestamp(e.mtime as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} {:>12} {} {}", kind, e.size, mtime, e.name);
    }
    Ok(())
}

/// 构建一次性调度器并同步执行单个任务，事件驱动进度条。
fn run_one_task(site: SiteConfig, task: Task, preset: Option<String>) -> Result<Task> {
    let events = Arc::new(EventBus::new());
    let scheduler = TaskScheduler::new(site, events.clone(), MetricsCollector::default_location());
    if let Some(name) = preset {
        let preset = Preset::parse(&name)
            .with_context(|| format!("未知预设 '{}'（可选 low/medium/high）", name))?;
        scheduler.set_upload_preset(preset);
        scheduler.set_download_preset(preset);
    }

    let pb = ProgressBar::new(task.bytes_total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .context("无效的进度条模板")?
        .progress_chars("=> "),
    );
    let watch_id = task.task_id.clone();
    let pb_events = pb.clone();
    events.subscribe(move |event| {
        if let Event::TaskUpdated(t) = event
            && t.task_id == watch_id
        {
            pb_events.set_length(t.bytes_total);
            pb_events.set_position(t.bytes_done);
        }
    });

    let task_id = scheduler.add_task(task);
    scheduler.start();
    let finished = scheduler.wait_for(&task_id).context("任务在完成前被移除")?;
    scheduler.stop();
    pb.finish_and_clear();

    match finished.status {
        TaskStatus::Done => {
            let elapsed = match (finished.start_time, finished.end_time) {
                (Some(s), Some(e)) => e.duration_since(s).as_secs_f64(),
                _ => 0.0,
            };
            if elapsed > 0.0 {
                let mb = finished.bytes_done as f64 / 1024.0 / 1024.0;
                println!(
                    "平均速率: {:.2} MB/s (传输 {} 字节, 耗时 {:.2} 秒)",
                    mb / elapsed,
                    finished.bytes_done,
                    elapsed
                );
            }
        }
        TaskStatus::Skipped => println!("目标已是最新，跳过传输"),
        TaskStatus::Failed => {
            anyhow::bail!(
                "任务失败 [{}]: {}",
                finished.error_code.map(|k| k.as_str()).unwrap_or("UNKNOWN_ERROR"),
                finished.error_message.as_deref().unwrap_or("")
            );
        }
        other => anyhow::bail!("任务以 {} 结束", other),
    }
    Ok(finished)
}

pub fn handle_up(site_name: String, local: String, remote: String, preset: Option<String>) -> Result<()> {
    let site = load_site(&site_name)?;
    let metadata = std::fs::metadata(&local).with_context(|| format!("无法读取本地路径 {}", local))?;
    let task = if metadata.is_dir() {
        TaskScheduler::create_folder_upload_task(&local, &remote)
    } else {
        TaskScheduler::create_upload_task(&local, &remote, metadata.len())
    };
    run_one_task(site, task, preset)?;
    Ok(())
}

pub fn handle_down(site_name: String, remote: String, local: String, preset: Option<String>) -> Result<()> {
    let site = load_site(&site_name)?;
    // 先 stat 一次以确定文件/目录与引擎选择
    let mut engine = SftpEngine::new(site.clone());
    engine.connect()?;
    let entry = engine.stat(&remote)?;
    engine.disconnect();

    let task = if entry.is_dir {
        TaskScheduler::create_folder_download_task(&remote, &local)
    } else {
        TaskScheduler::create_download_task(&remote, &local, entry.size)
    };
    run_one_task(site, task, preset)?;
    Ok(())
}

pub fn handle_rm(site_name: String, path: String, recursive: bool) -> Result<()> {
    let site = load_site(&site_name)?;
    if recursive {
        let mut engine = SftpEngine::new(site);
        engine.connect()?;
        engine.remove_dir_recursive(&path)?;
        println!("✅ 已递归删除 {}", path);
        return Ok(());
    }
    let task = TaskScheduler::create_delete_task(&path);
    run_control_task(site, task)?;
    println!("✅ 已删除 {}", path);
    Ok(())
}

pub fn handle_mkdir(site_name: String, path: String) -> Result<()> {
    let site = load_site(&site_name)?;
    let task = TaskScheduler::create_mkdir_task(&path);
    run_control_task(site, task)?;
    println!("✅ 已创建目录 {}", path);
    Ok(())
}

pub fn handle_mv(site_name: String, from: String, to: String) -> Result<()> {
    let site = load_site(&site_name)?;
    let task = TaskScheduler::create_rename_task(&from, &to);
    run_control_task(site, task)?;
    println!("✅ 已重命名 {} -> {}", from, to);
    Ok(())
}

/// Non-transfer one-shot tasks: no progress bar, just outcome.
fn run_control_task(site: SiteConfig, task: Task) -> Result<Task> {
    let events = Arc::new(EventBus::new());
    let scheduler = TaskScheduler::new(site, events, MetricsCollector::default_location());
    let task_id = scheduler.add_task(task);
    scheduler.start();
    let finished = scheduler.wait_for(&task_id).context("任务在完成前被移除")?;
    scheduler.stop();
    if finished.status == TaskStatus::Failed {
        anyhow::bail!(
            "任务失败 [{}]: {}",
            finished.error_code.map(|k| k.as_str()).unwrap_or("UNKNOWN_ERROR"),
            finished.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(finished)
}

pub fn handle_metrics() -> Result<()> {
    let mut collector = MetricsCollector::default_location();
    let title = vec![
        "Preset".cell().bold(true),
        "Transfers".cell().bold(true),
        "Success".cell().bold(true),
        "Avg MB/s".cell().bold(true),
    ];
    let rows: Vec<Vec<CellStruct>> = collector
        .stats()
        .iter()
        .map(|s| {
            vec![
                s.preset.as_str().cell(),
                s.total_transfers.cell().justify(Justify::Right),
                format!("{:.0}%", s.success_rate()).cell().justify(Justify::Right),
                format!("{:.2}", s.avg_speed_mbps()).cell().justify(Justify::Right),
            ]
        })
        .collect();
    print_stdout(rows.table().title(title)).context("无法渲染表格")?;

    let last_change = if collector.last_preset_change > 0.0 {
        chrono::DateTime::from_timestamp(collector.last_preset_change as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    } else {
        "-".to_string()
    };
    println!("当前预设: {} (上次调整: {})", collector.current_preset, last_change);
    println!("推荐预设: {}", collector.recommended_preset());
    Ok(())
}
