//! Command handlers and input parsing for the ctrlsync CLI

use serde_json::Map;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use ctrlsync_core::{Command, ControllerAction, ScalarValue};

use crate::app::CtrlsyncApp;
use crate::cli::Commands;
use crate::config::CliAppConfig;
use crate::error::{CliError, Result};

pub const HELP_TEXT: &str = "\
commands:
  set <path> <value>          write a variable, e.g. set ecu.idle 850
  action <id> [KEY=VALUE...]  invoke a controller action
  reboot | deepsleep | console | ifconfig | netls
  netadd <ssid> <password>    store a network
  netrm <ssid>                forget a network
  nettime <secs|HH:MM:SS>     set the stay-on time
  print <message>             print on the controller display
  reconnect                   connect again now
  reset                       drop the connection and reconnect later
  state                       show displayed values
  help | quit";

// ----------------------------------------------------------------------------
// Interactive Input
// ----------------------------------------------------------------------------

/// One parsed line of interactive input
#[derive(Debug, Clone, PartialEq)]
pub enum InteractiveInput {
    Send(Command),
    Reconnect,
    Reset,
    State,
    Help,
    Quit,
}

/// Parse an interactive line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<InteractiveInput>> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let input = match word {
        "set" => {
            let (path, value) = match args.split_first() {
                Some((path, rest)) if !rest.is_empty() => (*path, rest.join(" ")),
                _ => return Err(CliError::Input("usage: set <path> <value>".to_string())),
            };
            InteractiveInput::Send(Command::set_dotted(path, ScalarValue::parse(&value)?)?)
        }
        "action" => match args.split_first() {
            Some((id, fields)) => InteractiveInput::Send(action_command(id, fields, false)?),
            None => return Err(CliError::Input("usage: action <id> [KEY=VALUE...]".to_string())),
        },
        "reconnect" => InteractiveInput::Reconnect,
        "reset" => InteractiveInput::Reset,
        "state" => InteractiveInput::State,
        "help" | "?" => InteractiveInput::Help,
        "quit" | "exit" => InteractiveInput::Quit,
        other => match controller_action(other, &args)? {
            Some(action) => InteractiveInput::Send(action.into()),
            None => return Err(CliError::Input(format!("unknown command '{}'", other))),
        },
    };
    Ok(Some(input))
}

/// Build an action command; known actions without fields keep their own
/// reset behavior
pub fn action_command<S: AsRef<str>>(id: &str, fields: &[S], reset: bool) -> Result<Command> {
    let command = if fields.is_empty() {
        match controller_action(id, &[] as &[&str])? {
            Some(action) => action.into(),
            None => Command::action(id)?,
        }
    } else {
        Command::action_with(id, parse_fields(fields)?)?
    };
    Ok(if reset { command.with_reset() } else { command })
}

/// Parse `KEY=VALUE` pairs into action fields
pub fn parse_fields<S: AsRef<str>>(fields: &[S]) -> Result<Map<String, serde_json::Value>> {
    let mut extra = Map::new();
    for field in fields {
        let field = field.as_ref();
        let (key, value) = field
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| CliError::Input(format!("expected KEY=VALUE, got '{}'", field)))?;
        extra.insert(key.to_string(), ScalarValue::parse(value)?.to_json());
    }
    Ok(extra)
}

/// Map a firmware action word and its arguments
///
/// Returns `Ok(None)` for words that are not known actions.
pub fn controller_action<S: AsRef<str>>(word: &str, args: &[S]) -> Result<Option<ControllerAction>> {
    let usage = |text: &str| CliError::Input(format!("usage: {}", text));
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();

    let action = match (word, args.as_slice()) {
        ("reboot", []) => ControllerAction::Reboot,
        ("deepsleep", []) => ControllerAction::DeepSleep,
        ("console", []) => ControllerAction::Console,
        ("ifconfig", []) => ControllerAction::Ifconfig,
        ("netls", []) => ControllerAction::NetList,
        ("reboot" | "deepsleep" | "console" | "ifconfig" | "netls", _) => {
            return Err(usage(word));
        }
        ("netadd", [ssid, password]) => ControllerAction::NetAdd {
            ssid: ssid.to_string(),
            password: password.to_string(),
        },
        ("netadd", _) => return Err(usage("netadd <ssid> <password>")),
        ("netrm", [ssid]) => ControllerAction::NetRemove {
            ssid: ssid.to_string(),
        },
        ("netrm", _) => return Err(usage("netrm <ssid>")),
        ("nettime", [time]) => ControllerAction::NetTime {
            seconds: parse_stay_on(time).ok_or_else(|| usage("nettime <secs|HH:MM:SS>"))?,
        },
        ("nettime", _) => return Err(usage("nettime <secs|HH:MM:SS>")),
        ("print", [_, ..]) => ControllerAction::Print {
            message: args.join(" "),
        },
        ("print", []) => return Err(usage("print <message>")),
        _ => return Ok(None),
    };
    Ok(Some(action))
}

/// Seconds, or `HH:MM:SS` / `MM:SS`
pub fn parse_stay_on(input: &str) -> Option<u64> {
    let parts: Vec<u64> = input
        .split(':')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [seconds] => Some(*seconds),
        [minutes, seconds] if *seconds < 60 => minutes.checked_mul(60)?.checked_add(*seconds),
        [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => hours
            .checked_mul(3600)?
            .checked_add(minutes * 60 + seconds),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: CliAppConfig) -> Result<()> {
        match command {
            Commands::Watch { .. } => Self::handle_watch_command(config).await,
            Commands::Set { path, value } => {
                let command = Command::set_dotted(&path, ScalarValue::parse(&value)?)?;
                Self::handle_one_shot(config, command).await
            }
            Commands::Action { id, fields, reset } => {
                let command = action_command(&id, fields.as_slice(), reset)?;
                Self::handle_one_shot(config, command).await
            }
            Commands::Interactive => Self::handle_interactive_command(config).await,
            Commands::Config { effective } => {
                if effective {
                    println!("{}", config.to_toml()?);
                } else {
                    println!("{}", CliAppConfig::example_config());
                }
                Ok(())
            }
        }
    }

    /// Print everything until Ctrl-C or the runtime stops
    async fn handle_watch_command(config: CliAppConfig) -> Result<()> {
        info!("Watching {}", config.session.endpoint);
        let mut app = CtrlsyncApp::start(config)?;

        loop {
            tokio::select! {
                more = app.next_event() => {
                    if !more {
                        warn!("Session runtime stopped");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        app.stop().await
    }

    /// Connect, send one command, listen briefly for the echo, disconnect
    async fn handle_one_shot(config: CliAppConfig, command: Command) -> Result<()> {
        let startup_timeout = config.cli.startup_timeout();
        let linger = config.cli.linger();
        let mut app = CtrlsyncApp::start(config)?;

        if let Err(e) = app.wait_until_connected(startup_timeout).await {
            app.stop().await?;
            return Err(e);
        }

        info!("Sending {}", command.describe());
        app.send(command).await?;
        app.drain_for(linger).await;
        app.stop().await
    }

    /// Read commands from stdin while printing session events
    async fn handle_interactive_command(config: CliAppConfig) -> Result<()> {
        let prompt = config.cli.prompt.clone();
        let app = CtrlsyncApp::start(config)?;

        println!("{}", HELP_TEXT);
        run_interactive(app, BufReader::new(tokio::io::stdin()), &prompt).await
    }

    async fn handle_input(app: &mut CtrlsyncApp, input: InteractiveInput) -> Result<()> {
        match input {
            InteractiveInput::Send(command) => app.send(command).await,
            InteractiveInput::Reconnect => app.reconnect().await,
            InteractiveInput::Reset => app.reset().await,
            InteractiveInput::State => {
                println!("{}", app.snapshot_json()?);
                Ok(())
            }
            InteractiveInput::Help => {
                println!("{}", HELP_TEXT);
                Ok(())
            }
            InteractiveInput::Quit => Ok(()),
        }
    }
}

/// Drive `app` from `input` until quit, end of input or Ctrl-C
///
/// The session is stopped on every exit path, including input errors.
pub async fn run_interactive<R>(mut app: CtrlsyncApp, input: R, prompt: &str) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    print_prompt(prompt);

    let outcome = loop {
        tokio::select! {
            more = app.next_event() => {
                if !more {
                    warn!("Session runtime stopped");
                    break Ok(());
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(CliError::Io(e)),
                };
                match parse_line(&line) {
                    Ok(Some(InteractiveInput::Quit)) => break Ok(()),
                    Ok(Some(input)) => {
                        if let Err(e) = CommandDispatcher::handle_input(&mut app, input).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
                print_prompt(prompt);
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    let stopped = app.stop().await;
    outcome.and(stopped)
}

fn print_prompt(prompt: &str) {
    use std::io::Write;
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
}
