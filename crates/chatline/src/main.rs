//! A simple program demonstrates how to use `chatline` as a library.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use chatline::ChatWidgetBuilder;
use chatline::core::{Change, Role, SubmitError};
use chatline::providers::{
    GeminiConfigBuilder, GeminiProvider, OpenAIConfigBuilder, OpenAIProvider,
};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum WidgetEvent {
    /// The assistant turn at `idx` now reads `text`.
    Reply { idx: usize, text: String },
    Frozen,
    Settled,
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(builder) = widget_builder_from_env() else {
        return;
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let widget = builder
        .on_change({
            let event_tx = event_tx.clone();
            move |change, transcript| {
                let idx = change.index();
                let Some(turn) = transcript.get(idx) else {
                    return;
                };
                if turn.role() != Role::Assistant {
                    return;
                }
                let event = match change {
                    Change::Frozen(_) => WidgetEvent::Frozen,
                    _ => WidgetEvent::Reply {
                        idx,
                        text: turn.text().to_owned(),
                    },
                };
                event_tx.send(event).ok();
            }
        })
        .on_settled({
            let event_tx = event_tx.clone();
            move || {
                event_tx.send(WidgetEvent::Settled).ok();
            }
        })
        .build();
    debug!("chatting with a {:?} provider", widget.reply_kind());

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    'outer: loop {
        print!("{} ", "You:".bright_green().bold());
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        widget.set_draft(line.trim_end_matches(['\r', '\n']));
        match widget.send().await {
            Ok(()) => {}
            Err(SubmitError::EmptyInput) => continue,
            Err(err) => {
                eprintln!("{err}");
                break;
            }
        }

        // Spins until the first piece of the reply shows up.
        let mut progress_bar = Some({
            let progress_bar = ProgressBar::new_spinner();
            progress_bar.set_style(progress_style.clone());
            progress_bar.set_message("🤔 Thinking...");
            progress_bar
        });
        // The reply being printed, and how much of it is on screen.
        let mut printed: Option<(usize, usize)> = None;

        loop {
            if let Some(progress_bar) = &progress_bar {
                progress_bar.inc(1);
            }

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = sleep => {
                    continue;
                }
            };

            // Finish the progress bar before printing anything else.
            if let Some(progress_bar) = progress_bar.take() {
                progress_bar.finish_and_clear();
            }

            match event {
                WidgetEvent::Reply { idx, text } => {
                    let shown = match printed {
                        Some((printed_idx, len)) if printed_idx == idx => len,
                        _ => {
                            print!(
                                "{}{} ",
                                BAR_CHAR.bright_cyan(),
                                "AI:".bright_cyan().bold()
                            );
                            0
                        }
                    };
                    let rest = text.get(shown..).unwrap_or_default();
                    print!("{}", rest.bright_white());
                    std::io::stdout().flush().ok();
                    printed = Some((idx, text.len()));
                }
                WidgetEvent::Frozen => {
                    println!();
                }
                WidgetEvent::Settled => {
                    break;
                }
            }
        }
    }
}

/// Picks the model provider from the environment.
fn widget_builder_from_env() -> Option<ChatWidgetBuilder> {
    let backend =
        env::var("CHATLINE_BACKEND").unwrap_or_else(|_| "openai".to_owned());

    match backend.to_ascii_lowercase().as_str() {
        "openai" => {
            let Ok(api_key) = env::var("OPENAI_API_KEY") else {
                eprintln!("OPENAI_API_KEY environment variable is not set");
                return None;
            };
            let mut config = OpenAIConfigBuilder::with_api_key(api_key);
            if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
                config = config.with_base_url(base_url);
            }
            if let Ok(model) = env::var("OPENAI_MODEL") {
                config = config.with_model(model);
            }
            let provider = OpenAIProvider::new(config.build());
            Some(ChatWidgetBuilder::with_model_provider(provider))
        }
        "gemini" => {
            let Ok(api_key) = env::var("GEMINI_API_KEY") else {
                eprintln!("GEMINI_API_KEY environment variable is not set");
                return None;
            };
            let mut config = GeminiConfigBuilder::with_api_key(api_key);
            if let Ok(model) = env::var("GEMINI_MODEL") {
                config = config.with_model(model);
            }
            let provider = GeminiProvider::new(config.build());
            Some(ChatWidgetBuilder::with_model_provider(provider))
        }
        other => {
            eprintln!("unknown backend `{other}`, expected `openai` or `gemini`");
            None
        }
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
