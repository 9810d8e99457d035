//! Stock assistant terminal client.
//!
//! Reads chat messages and commands from stdin and renders the session's
//! events to stdout while replies stream in and the live feed keeps the
//! cached stock current.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use tokio::io::{AsyncBufReadExt, BufReader};

use stock_core::actions::{scan_command, QuickAction};
use stock_core::session::SessionController;
use stock_core::speech::SpeechCursor;
use stock_platform::HttpBackend;
use stock_types::Result;

mod cli;
mod command;
mod view;


use cli::Cli;
use command::{parse_command, Command, HELP};
use view::ConsoleView;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = cli.session_config()?;
    log::info!(
        "Connecting to {} as session {}",
        config.base_url,
        config.session_id
    );

    let backend = Arc::new(HttpBackend::new(config.clone())?);
    let controller = Arc::new(SessionController::new(config, backend.clone(), backend)?);
    let speak = Arc::new(AtomicBool::new(cli.speak));

    let render = tokio::spawn(render_loop(controller.clone(), speak.clone()));
    controller.start().await?;
    println!("{}", HELP);
    for action in QuickAction::defaults() {
        if let Ok(text) = action.utterance() {
            println!("  {:<10} \"{}\"", action.label(), text);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("[error] {}", e);
                continue;
            }
        };
        if let Err(e) = dispatch(&controller, command, &speak).await {
            println!("[error] {}", e);
        }
    }

    controller.stop().await;
    render.abort();
    Ok(())
}

async fn dispatch(controller: &SessionController, command: Command, speak: &AtomicBool) -> Result<()> {
    match command {
        Command::Say(text) => controller.submit_in_background(&text)?,
        Command::Store(location_id) => {
            controller.switch_location(location_id).await?;
        }
        Command::LowStock(location_id) => {
            let location_id = location_id
                .or(controller.cache().selected_location_id)
                .unwrap_or(controller.config().default_location_id);
            let action = QuickAction::LowStock { location_id };
            controller.submit_in_background(&action.utterance()?)?;
        }
        Command::Transfer(action) => controller.submit_in_background(&action.utterance()?)?,
        Command::Scan(code) => controller.submit_in_background(&scan_command(&code)?)?,
        Command::Refresh => controller.refresh().await?,
        Command::Status => {
            println!("{}", view::describe_cache(&controller.cache()));
            let live = controller.live();
            println!(
                "[live] {} connections, {} updates, {} skipped lines",
                live.connections_opened(),
                live.events_handled(),
                live.skipped_lines()
            );
        }
        Command::Mute => {
            let speaking = !speak.fetch_xor(true, Ordering::Relaxed);
            println!("[voice] {}", if speaking { "on" } else { "muted" });
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

/// Print events as they arrive; finished replies also go to stderr when speaking.
async fn render_loop(controller: Arc<SessionController>, speak: Arc<AtomicBool>) {
    let bus = controller.event_bus().clone();
    let mut view = ConsoleView::new();
    let mut speech = SpeechCursor::new();

    loop {
        bus.wait().await;
        let out = view.process_events(bus.drain(), &controller.cache());

        {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = view::write_frame(&mut stdout, &out) {
                log::warn!("Failed to write to stdout: {}", e);
            }
        }

        speech.set_muted(!speak.load(Ordering::Relaxed));
        for text in speech.take_finalized(&controller.transcript()) {
            eprintln!("🔊 {}", text);
        }
    }
}
