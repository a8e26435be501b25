//! chime-cli - 终端播放器
//!
//! 主线程充当 UI 线程：排空总线的 UI 队列并执行 stdin 读到的命令。

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chime_player::{
    Controller, DeviceEngine, MediaSource, PlayerBus, PlayerConfig, SimulatedEngine, UiAdapter,
    UiSurface,
};
use crossbeam_channel::{unbounded, Receiver, TryRecvError};

struct Options {
    source: PathBuf,
    simulate: Option<u32>,
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play,
    Pause,
    Reset,
    Seek(u32),
    Drag(u32),
    Drop,
    Log,
    Help,
    Quit,
}

/// 把遥测打印到终端
#[derive(Default)]
struct TerminalSurface {
    log: String,
    printed_lines: usize,
    max_ms: u32,
    value_ms: u32,
}

impl UiSurface for TerminalSurface {
    fn render_log(&mut self, text: &str) {
        for line in text.lines().skip(self.printed_lines) {
            println!("  | {}", line);
        }
        self.printed_lines = text.lines().count();
        self.log = text.to_string();
    }

    fn set_slider_max(&mut self, max_ms: u32) {
        self.max_ms = max_ms;
        println!("duration {}", format_ms(max_ms));
    }

    fn set_slider_value(&mut self, value_ms: u32) {
        // 每秒打印一次
        if value_ms / 1000 != self.value_ms / 1000 || value_ms == 0 {
            println!("{} / {}", format_ms(value_ms), format_ms(self.max_ms));
        }
        self.value_ms = value_ms;
    }

    fn show_notice(&mut self, message: &str) {
        println!("* {}", message);
    }
}

fn format_ms(ms: u32) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} <file> [--simulate <duration_ms>] [--config <config.json>]", program);
}

fn print_help() {
    println!("Commands: play | pause | reset | seek <ms> | drag <ms> | drop | log | help | quit");
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut source = None;
    let mut simulate = None;
    let mut config = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--simulate" => {
                let value = iter.next().context("--simulate needs a duration in ms")?;
                simulate = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid duration: {}", value))?,
                );
            }
            "--config" => {
                let value = iter.next().context("--config needs a file")?;
                config = Some(PathBuf::from(value));
            }
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            other => {
                if source.is_some() {
                    bail!("Only one file can be played");
                }
                source = Some(PathBuf::from(other));
            }
        }
    }

    Ok(Options {
        source: source.context("No input file")?,
        simulate,
        config,
    })
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "play" => Command::Play,
        "pause" => Command::Pause,
        "reset" => Command::Reset,
        "seek" => Command::Seek(parts.next()?.parse().ok()?),
        "drag" => Command::Drag(parts.next()?.parse().ok()?),
        "drop" => Command::Drop,
        "log" => Command::Log,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("chime-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }
    let options = parse_args(&args[1..])?;

    let config = match &options.config {
        Some(path) => PlayerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    let factory = match options.simulate {
        Some(duration_ms) => {
            log::info!("Simulating a {} ms track", duration_ms);
            SimulatedEngine::new(duration_ms).factory()
        }
        None => DeviceEngine::factory(config.output_buffer_size),
    };

    let bus = Arc::new(PlayerBus::new());
    bus.attach_ui_thread();

    let ui = Arc::new(Mutex::new(UiAdapter::new(
        Arc::clone(&bus),
        TerminalSurface::default(),
        config.settle_window_ms,
    )));
    UiAdapter::subscribe(&ui)?;

    let mut controller = Controller::new(
        Arc::clone(&bus),
        MediaSource::file(&options.source),
        factory,
        &config,
    )?;
    controller.create()?;

    let commands = spawn_stdin_reader()?;
    print_help();

    loop {
        bus.wait_ui(Duration::from_millis(50));

        let line = match commands.try_recv() {
            Ok(line) => line,
            Err(TryRecvError::Empty) => continue,
            Err(TryRecvError::Disconnected) => break,
        };
        let Some(command) = parse_command(&line) else {
            if !line.trim().is_empty() {
                println!("Unknown command: {}", line.trim());
            }
            continue;
        };
        log::debug!("Command: {:?}", command);

        let mut ui = ui.lock().unwrap_or_else(PoisonError::into_inner);
        match command {
            Command::Play => ui.play(),
            Command::Pause => ui.pause(),
            Command::Reset => ui.reset(),
            Command::Seek(position_ms) => {
                ui.on_progress_changed(position_ms, true);
                ui.on_stop_tracking_touch();
            }
            Command::Drag(position_ms) => ui.on_progress_changed(position_ms, true),
            Command::Drop => ui.on_stop_tracking_touch(),
            Command::Log => println!("{}", ui.surface().log),
            Command::Help => print_help(),
            Command::Quit => break,
        }
    }

    controller.release();
    bus.dispatch_ui();
    Ok(())
}
