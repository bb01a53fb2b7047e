//! Line-oriented interactive front end over the engine thread.

use crate::engine::{EngineError, EngineHandle};
use crate::session::{Distance, FaceSummary, Role, SelectOutcome};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  source PATH            pick the source image
  target PATH            pick the target image or video
  pick [source|target] N choose face N (default: latest pending list)
  cancel [source|target] drop a pending choice
  faces [source|target]  list detected faces
  thumbnail ROLE OUT     write the source or target thumbnail
  set OPTION on|off      many-faces, keep-fps, keep-audio, keep-frames
  preview [FRAME] OUT    write a processed frame to OUT
  run [OUT]              render the target (default: suggested output)
  status                 show the current session
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Source(PathBuf),
    Target(PathBuf),
    Pick { role: Option<Role>, index: usize },
    Cancel(Option<Role>),
    Faces(Option<Role>),
    Thumbnail { role: Role, output: PathBuf },
    Set { name: String, value: String },
    Preview { frame: u64, output: PathBuf },
    Run(Option<PathBuf>),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines give `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let Some((word, rest)) = split_word(line) else {
        return Ok(None);
    };
    let rest = rest.trim();

    let command = match word {
        "source" | "target" => {
            if rest.is_empty() {
                return Err(format!("usage: {word} PATH"));
            }
            let path = PathBuf::from(rest);
            if word == "source" {
                Command::Source(path)
            } else {
                Command::Target(path)
            }
        }
        "pick" => {
            let usage = || "usage: pick [source|target] N".to_string();
            let (role, index) = match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
                [index] => (None, *index),
                [role, index] => (Some(parse_role(role).ok_or_else(usage)?), *index),
                _ => return Err(usage()),
            };
            Command::Pick {
                role,
                index: index.parse().map_err(|_| usage())?,
            }
        }
        "cancel" => match rest {
            "" => Command::Cancel(None),
            role => Command::Cancel(Some(
                parse_role(role).ok_or_else(|| "usage: cancel [source|target]".to_string())?,
            )),
        },
        "faces" => match rest {
            "" => Command::Faces(None),
            role => Command::Faces(Some(
                parse_role(role).ok_or_else(|| "usage: faces [source|target]".to_string())?,
            )),
        },
        "thumbnail" => {
            let usage = || "usage: thumbnail source|target OUT".to_string();
            let (role, out) = split_word(rest).ok_or_else(usage)?;
            let out = out.trim();
            if out.is_empty() {
                return Err(usage());
            }
            Command::Thumbnail {
                role: parse_role(role).ok_or_else(usage)?,
                output: PathBuf::from(out),
            }
        }
        "set" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            [name, value] => Command::Set {
                name: name.to_string(),
                value: value.to_string(),
            },
            _ => return Err("usage: set OPTION on|off".into()),
        },
        "preview" => {
            let usage = || "usage: preview [FRAME] OUT".to_string();
            match split_word(rest) {
                None => return Err(usage()),
                Some((first, tail)) => match (first.parse::<u64>(), tail.trim()) {
                    (Ok(frame), out) if !out.is_empty() => Command::Preview {
                        frame,
                        output: PathBuf::from(out),
                    },
                    _ => Command::Preview {
                        frame: 0,
                        output: PathBuf::from(rest),
                    },
                },
            }
        }
        "run" => Command::Run((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(command))
}

fn parse_role(word: &str) -> Option<Role> {
    match word {
        "source" => Some(Role::Source),
        "target" => Some(Role::Target),
        _ => None,
    }
}

fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}

pub fn format_distance(distance: &Distance) -> String {
    match distance {
        Ok(d) => format!("{d:.4}"),
        Err(_) => "undefined".to_string(),
    }
}

fn print_faces(faces: &[FaceSummary]) {
    for face in faces {
        println!("  {face}");
    }
}

fn print_outcome(outcome: &SelectOutcome) {
    match outcome {
        SelectOutcome::Selected { role, face, distance } => {
            println!("{role}: selected {face}");
            if let Some(d) = distance {
                println!("distance: {}", format_distance(d));
            }
        }
        SelectOutcome::NeedsChoice { role, faces } => {
            println!("{role}: {} faces found, `pick {role} N` to choose:", faces.len());
            print_faces(faces);
        }
        SelectOutcome::NoFace { role } => println!("{role}: no face found, path cleared"),
        SelectOutcome::AcceptedAll => println!("target: accepted, every face will be swapped"),
    }
}

/// Run the shell until `quit` or end of input.
pub async fn run_shell(engine: EngineHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let command = match parse_command(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match execute(&engine, command).await {
            Ok(()) => {}
            Err(EngineError::Session(err)) => println!("error: {err}"),
            Err(err) => return Err(err).context("engine failed"),
        }
    }
    Ok(())
}

async fn execute(engine: &EngineHandle, command: Command) -> Result<(), EngineError> {
    match command {
        Command::Source(path) => print_outcome(&engine.select_source(path).await?),
        Command::Target(path) => print_outcome(&engine.select_target(path).await?),
        Command::Pick { role, index } => print_outcome(&engine.choose_face(role, index).await?),
        Command::Cancel(role) => {
            let role = engine.cancel_choice(role).await?;
            println!("{role}: choice cancelled");
        }
        Command::Thumbnail { role, output } => match engine.thumbnail(role).await? {
            Some(image) => {
                faceswap_media::save_image(&image, &output).map_err(crate::session::SessionError::from)?;
                println!("{role} thumbnail written to {}", output.display());
            }
            None => println!("{role}: nothing selected"),
        },
        Command::Faces(role) => {
            let roles = match role {
                Some(role) => vec![role],
                None => vec![Role::Source, Role::Target],
            };
            for role in roles {
                let faces = engine.candidates(role).await?;
                println!("{role}: {} faces", faces.len());
                print_faces(&faces);
            }
        }
        Command::Set { name, value } => {
            let options = engine.set_option(name, value).await?;
            println!("{options:?}");
        }
        Command::Preview { frame, output } => {
            let image = engine.preview(frame).await?;
            faceswap_media::save_image(&image, &output).map_err(crate::session::SessionError::from)?;
            println!("preview written to {}", output.display());
        }
        Command::Run(output) => {
            let output = match output {
                Some(o) => Some(o),
                None => engine.suggest_output().await?,
            };
            match output {
                Some(output) => {
                    let report = engine.render(output).await?;
                    println!("wrote {} ({} frames)", report.output.display(), report.frames);
                }
                None => println!("select a target first"),
            }
        }
        Command::Status => {
            let status = engine.status().await?;
            match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{json}"),
                Err(err) => println!("{status:?} ({err})"),
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}
