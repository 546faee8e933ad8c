//! Terminal front end for the capture wizard.

use crate::view;
use anyhow::Result;
use presence_core::{CaptureWizard, Captured, SampleId, WizardError};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
  <enter>     capture from the camera
  u <path>    capture an image file
  d <id>      delete a sample
  f           register all samples
  c           turn the camera off/on
  r           start over
  q           quit
  Ctrl-C cancels a capture in progress, or quits at the prompt.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Capture,
    Upload(PathBuf),
    Remove(SampleId),
    Finalize,
    ToggleCamera,
    Reset,
    Quit,
    Help,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "" => Command::Capture,
        "u" | "upload" if !rest.is_empty() => Command::Upload(PathBuf::from(rest)),
        "d" | "delete" => match rest.parse() {
            Ok(id) => Command::Remove(SampleId(id)),
            Err(_) => Command::Invalid(format!("'{rest}' is not a sample id")),
        },
        "f" | "finish" => Command::Finalize,
        "c" | "camera" => Command::ToggleCamera,
        "r" | "reset" => Command::Reset,
        "q" | "quit" | "exit" => Command::Quit,
        "h" | "help" | "?" => Command::Help,
        _ => Command::Invalid(format!("unknown command '{line}'")),
    }
}

/// Run `fut` unless Ctrl-C arrives first. Dropping the future cancels any
/// request in flight; the wizard stays usable afterwards.
///
/// Once a Ctrl-C listener exists the process no longer exits on SIGINT, so
/// every await in the loop below goes through here.
async fn cancellable<F: Future>(fut: F) -> Option<F::Output> {
    tokio::select! {
        result = fut => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    }
}

fn report_capture(result: Option<Result<Captured, WizardError>>) {
    match result {
        Some(Ok(captured)) => {
            println!("sample {} captured", captured.sample_id);
            print!("{}", view::feedback(&captured.feedback));
        }
        Some(Err(err)) => eprintln!("{}", err.user_message()),
        None => println!("capture cancelled"),
    }
}

/// Line-driven enrollment against the wizard's camera.
pub async fn interactive(wizard: &CaptureWizard) -> Result<()> {
    println!("{HELP}\n");
    print!("{}", view::wizard(&wizard.snapshot()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = match cancellable(lines.next_line()).await {
            Some(line) => line?,
            None => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Command::Capture => report_capture(cancellable(wizard.capture_from_camera()).await),
            Command::Upload(path) => report_capture(cancellable(wizard.capture_file(path)).await),
            Command::Remove(id) => {
                if !wizard.remove(id) {
                    println!("no sample {id}");
                }
            }
            Command::Finalize => match cancellable(wizard.finalize()).await {
                Some(Ok(feedback)) => {
                    print!("{}", view::feedback(&feedback));
                    wizard.reset();
                }
                Some(Err(err)) => eprintln!("{}", err.user_message()),
                None => println!("registration cancelled"),
            },
            Command::ToggleCamera => match cancellable(wizard.toggle_camera()).await {
                Some(Ok(true)) => println!("camera on"),
                Some(Ok(false)) => println!("camera off"),
                Some(Err(err)) => eprintln!("{}", err.user_message()),
                None => println!("camera switch cancelled"),
            },
            Command::Reset => wizard.reset(),
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Invalid(msg) => {
                eprintln!("{msg} (h for help)");
                continue;
            }
        }
        print!("{}", view::wizard(&wizard.snapshot()));
    }
    Ok(())
}

/// Capture each file in order, then optionally submit the batch.
///
/// A file the server rejects is reported and skipped.
pub async fn from_files(wizard: &CaptureWizard, images: &[PathBuf], batch: bool) -> Result<()> {
    for path in images {
        print!("{}: ", path.display());
        match wizard.capture_file(path).await {
            Ok(captured) => print!("{}", view::feedback(&captured.feedback)),
            Err(err) => println!("{}", err.user_message()),
        }
    }
    print!("{}", view::wizard(&wizard.snapshot()));

    if batch {
        let feedback = wizard.finalize().await?;
        print!("{}", view::feedback(&feedback));
        wizard.reset();
    }
    Ok(())
}
