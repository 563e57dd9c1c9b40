use std::fmt::Write;
use std::io::{BufRead, ErrorKind};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::engine::{SharedEngine, StrokeEngine};
use crate::pattern::PatternKind;
use crate::settings::EngineConfig;

/// Commands that act on the stroke engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Start,
    Stop,
    SetPattern(PatternKind),
    ListPatterns,
    SetSpeed(f32),
    SetStroke(f32),
    SetDepth(f32),
    SetSensation(f32),
    GetConfig,
    SetConfig(EngineConfig),
    GetState,
    MoveToMax,
    MoveToMin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    ModbusTx,
    ModbusRx,
    ModbusDeRe,
}

/// Commands that only make sense on the device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    SetWifiSsid(String),
    SetWifiPassword(String),
    SetPin(PinRole, u32),
    GetPinConfiguration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Engine(EngineCommand),
    Device(DeviceCommand),
}

pub const HELP: &[(&str, &str)] = &[
    ("help", "Show this help message"),
    ("start", "Start the active pattern"),
    ("stop", "Stop and return to the idle position"),
    ("set_pattern <name|index>", "Switch the active pattern"),
    ("list_patterns", "List the available patterns"),
    ("set_speed <0-100>", "Set speed in percent, 0 stops"),
    ("set_stroke <0-100>", "Set stroke length in percent of the travel"),
    ("set_depth <0-100>", "Set depth in percent of the travel"),
    ("set_sensation <0-100>", "Set sensation, 50 is neutral"),
    ("get_config", "Get engine config in JSON format"),
    ("set_config <json>", "Set engine config from a JSON string"),
    ("get_state", "Get engine state in JSON format"),
    ("move_to_max", "Park at full depth, only while stopped"),
    ("move_to_min", "Park at the back end, only while stopped"),
    ("set_wifi_ssid <ssid>", "Set WiFi SSID (device only)"),
    ("set_wifi_password <password>", "Set WiFi password (device only)"),
    ("get_pin_configuration", "Get pin configuration in JSON format (device only)"),
    ("set_pin_modbus_tx <pin>", "Set Modbus TX pin (device only)"),
    ("set_pin_modbus_rx <pin>", "Set Modbus RX pin (device only)"),
    ("set_pin_modbus_de_re <pin>", "Set Modbus DE/RE pin (device only)"),
];

pub fn help_text() -> String {
    let mut text = String::from("Available commands:");
    for (usage, description) in HELP {
        let _ = write!(text, "\n  {:<30} - {}", usage, description);
    }
    text
}

fn check_percent(value: f32) -> Result<f32> {
    if !(0.0..=100.0).contains(&value) {
        anyhow::bail!("Percent value out of range 0-100: {}", value);
    }
    Ok(value)
}

fn parse_percent(args: &str) -> Result<f32> {
    let value: f32 = args
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid percent value: {:?}", args))?;
    check_percent(value)
}

fn parse_pin(args: &str) -> Result<u32> {
    args.parse()
        .map_err(|_| anyhow::anyhow!("Invalid pin value: {:?}", args))
}

fn no_args(command: &str, args: &str) -> Result<()> {
    if !args.is_empty() {
        anyhow::bail!("{} takes no arguments", command);
    }
    Ok(())
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        let line = line.trim();
        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };

        let engine = |cmd: EngineCommand| -> Result<Command> { Ok(Command::Engine(cmd)) };
        let device = |cmd: DeviceCommand| -> Result<Command> { Ok(Command::Device(cmd)) };

        match command {
            "help" => Ok(Command::Help),
            "start" => no_args(command, args).and_then(|_| engine(EngineCommand::Start)),
            "stop" => no_args(command, args).and_then(|_| engine(EngineCommand::Stop)),
            "list_patterns" => {
                no_args(command, args).and_then(|_| engine(EngineCommand::ListPatterns))
            }
            "get_config" => no_args(command, args).and_then(|_| engine(EngineCommand::GetConfig)),
            "get_state" => no_args(command, args).and_then(|_| engine(EngineCommand::GetState)),
            "move_to_max" => no_args(command, args).and_then(|_| engine(EngineCommand::MoveToMax)),
            "move_to_min" => no_args(command, args).and_then(|_| engine(EngineCommand::MoveToMin)),
            "set_pattern" => engine(EngineCommand::SetPattern(args.parse()?)),
            "set_speed" => engine(EngineCommand::SetSpeed(parse_percent(args)?)),
            "set_stroke" => engine(EngineCommand::SetStroke(parse_percent(args)?)),
            "set_depth" => engine(EngineCommand::SetDepth(parse_percent(args)?)),
            "set_sensation" => engine(EngineCommand::SetSensation(parse_percent(args)?)),
            "set_config" => {
                let config = serde_json::from_str::<EngineConfig>(args)
                    .map_err(|e| anyhow::anyhow!("Failed to parse engine config: {}", e))?;
                engine(EngineCommand::SetConfig(config))
            }
            "set_wifi_ssid" => device(DeviceCommand::SetWifiSsid(args.to_string())),
            "set_wifi_password" => device(DeviceCommand::SetWifiPassword(args.to_string())),
            "set_pin_modbus_tx" => device(DeviceCommand::SetPin(PinRole::ModbusTx, parse_pin(args)?)),
            "set_pin_modbus_rx" => device(DeviceCommand::SetPin(PinRole::ModbusRx, parse_pin(args)?)),
            "set_pin_modbus_de_re" => {
                device(DeviceCommand::SetPin(PinRole::ModbusDeRe, parse_pin(args)?))
            }
            "get_pin_configuration" => {
                no_args(command, args).and_then(|_| device(DeviceCommand::GetPinConfiguration))
            }
            "" => anyhow::bail!("Empty command"),
            _ => anyhow::bail!("Unknown command: {}", command),
        }
    }
}

impl EngineCommand {
    /// Runs the command. Returns text for the operator when there is any.
    pub fn execute(&self, engine: &mut StrokeEngine) -> Result<Option<String>> {
        match self {
            EngineCommand::Start => {
                engine.start()?;
                Ok(None)
            }
            EngineCommand::Stop => {
                engine.stop()?;
                Ok(None)
            }
            EngineCommand::SetPattern(kind) => {
                engine.set_pattern(*kind)?;
                Ok(Some(format!("Pattern set to {}", kind)))
            }
            EngineCommand::ListPatterns => {
                let active = engine.pattern().kind();
                let lines: Vec<String> = PatternKind::ALL
                    .iter()
                    .enumerate()
                    .map(|(i, kind)| {
                        let marker = if *kind == active { '*' } else { ' ' };
                        format!("{} {}: {}", marker, i, kind)
                    })
                    .collect();
                Ok(Some(lines.join("\n")))
            }
            EngineCommand::SetSpeed(value) => {
                engine.update_settings(|s| s.speed = *value)?;
                Ok(Some(format!("Speed set to {}%", value)))
            }
            EngineCommand::SetStroke(value) => {
                engine.update_settings(|s| s.stroke = *value)?;
                Ok(Some(format!("Stroke set to {}%", value)))
            }
            EngineCommand::SetDepth(value) => {
                engine.update_settings(|s| s.depth = *value)?;
                Ok(Some(format!("Depth set to {}%", value)))
            }
            EngineCommand::SetSensation(value) => {
                engine.update_settings(|s| s.sensation = *value)?;
                Ok(Some(format!("Sensation set to {}%", value)))
            }
            EngineCommand::GetConfig => Ok(Some(serde_json::to_string_pretty(&engine.get_config())?)),
            EngineCommand::SetConfig(config) => {
                engine.set_config(config.clone())?;
                Ok(Some("Engine config updated".to_string()))
            }
            EngineCommand::GetState => {
                Ok(Some(serde_json::to_string_pretty(&engine.get_current_state())?))
            }
            EngineCommand::MoveToMax => {
                engine.move_to_max()?;
                Ok(None)
            }
            EngineCommand::MoveToMin => {
                engine.move_to_min()?;
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
}

/// Partial update posted by a remote control. Missing fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlRequest {
    pub pattern: Option<String>,
    pub speed: Option<f32>,
    pub stroke: Option<f32>,
    pub depth: Option<f32>,
    pub sensation: Option<f32>,
    pub action: Option<ControlAction>,
}

impl ControlRequest {
    /// Checks the whole request first, so a bad field changes nothing.
    pub fn apply(&self, engine: &mut StrokeEngine) -> Result<()> {
        let pattern = self
            .pattern
            .as_deref()
            .map(str::parse::<PatternKind>)
            .transpose()?;
        let mut settings = engine.get_config().settings;
        for (value, field) in [
            (self.speed, &mut settings.speed),
            (self.stroke, &mut settings.stroke),
            (self.depth, &mut settings.depth),
            (self.sensation, &mut settings.sensation),
        ] {
            if let Some(value) = value {
                *field = check_percent(value)?;
            }
        }

        engine.update_config(|config| {
            if let Some(pattern) = pattern {
                config.pattern = pattern;
            }
            config.settings = settings;
        })?;

        match self.action {
            Some(ControlAction::Start) => engine.start(),
            Some(ControlAction::Stop) => engine.stop(),
            None => Ok(()),
        }
    }
}

/// Parses and runs one console line. Device commands are handed to `device`.
pub fn handle_line(
    line: &str,
    engine: &SharedEngine,
    device: &mut impl FnMut(&DeviceCommand) -> Result<Option<String>>,
) -> Result<Option<String>> {
    match Command::parse(line)? {
        Command::Help => Ok(Some(help_text())),
        Command::Engine(cmd) => {
            let mut engine = engine.lock().unwrap();
            match engine.as_mut() {
                Some(engine) => cmd.execute(engine),
                None => anyhow::bail!("Stroke engine not initialized"),
            }
        }
        Command::Device(cmd) => device(&cmd),
    }
}

/// Reads commands line by line until the input closes.
pub fn run_console(
    mut input: impl BufRead,
    engine: &SharedEngine,
    mut device: impl FnMut(&DeviceCommand) -> Result<Option<String>>,
) {
    loop {
        let mut cmdline = String::new();
        match input.read_line(&mut cmdline) {
            Ok(0) => {
                log::info!("Console input closed");
                return;
            }
            Ok(_) => {}
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                _ => {
                    log::info!("Console: read failed: {e}");
                    continue;
                }
            },
        }

        let cmdline = cmdline.trim();
        if cmdline.is_empty() {
            continue;
        }
        log::info!("Command: {}", cmdline);

        match handle_line(cmdline, engine, &mut device) {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(e) => log::error!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::SimulatedMotor;

    #[test]
    fn parses_engine_commands() {
        assert_eq!(Command::parse("start").unwrap(), Command::Engine(EngineCommand::Start));
        assert_eq!(
            Command::parse("  set_speed 42.5 \r\n").unwrap(),
            Command::Engine(EngineCommand::SetSpeed(42.5))
        );
        assert_eq!(
            Command::parse("set_pattern stop_n_go").unwrap(),
            Command::Engine(EngineCommand::SetPattern(PatternKind::StopNGo))
        );
        assert_eq!(
            Command::parse("set_pattern 4").unwrap(),
            Command::Engine(EngineCommand::SetPattern(PatternKind::Deeper))
        );
        assert_eq!(Command::parse("help").unwrap(), Command::Help);
    }

    #[test]
    fn parses_device_commands() {
        assert_eq!(
            Command::parse("set_wifi_ssid my network").unwrap(),
            Command::Device(DeviceCommand::SetWifiSsid("my network".to_string()))
        );
        assert_eq!(
            Command::parse("set_pin_modbus_de_re 20").unwrap(),
            Command::Device(DeviceCommand::SetPin(PinRole::ModbusDeRe, 20))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("jump").is_err());
        assert!(Command::parse("set_depth 101").is_err());
        assert!(Command::parse("set_depth deep").is_err());
        assert!(Command::parse("set_pattern nope").is_err());
        assert!(Command::parse("set_pin_modbus_tx -1").is_err());
        assert!(Command::parse("start now").is_err());
        assert!(Command::parse("set_config {").is_err());
    }

    #[test]
    fn executes_against_the_engine() {
        let motor = SimulatedMotor::new(3000);
        let mut engine = StrokeEngine::new(Box::new(motor), EngineConfig::default()).unwrap();
        engine.init_motor().unwrap();

        fn run(engine: &mut StrokeEngine, line: &str) -> Option<String> {
            match Command::parse(line).unwrap() {
                Command::Engine(cmd) => cmd.execute(engine).unwrap(),
                other => panic!("not an engine command: {:?}", other),
            }
        }

        run(&mut engine, "set_pattern Insist");
        run(&mut engine, "set_depth 80");
        assert_eq!(engine.get_config().pattern, PatternKind::Insist);
        assert_eq!(engine.get_config().settings.depth, 80.0);

        let listing = run(&mut engine, "list_patterns").unwrap();
        assert!(listing.contains("* 6: Insist"));

        let config: EngineConfig = serde_json::from_str(&run(&mut engine, "get_config").unwrap()).unwrap();
        assert_eq!(config, engine.get_config());

        let state: serde_json::Value = serde_json::from_str(&run(&mut engine, "get_state").unwrap()).unwrap();
        assert_eq!(state["state"], "ready");
        assert_eq!(state["pattern"], "Insist");
    }

    #[test]
    fn console_runs_until_input_closes() {
        let motor = SimulatedMotor::new(3000);
        let mut engine = StrokeEngine::new(Box::new(motor), EngineConfig::default()).unwrap();
        engine.init_motor().unwrap();
        let shared: SharedEngine = std::sync::Arc::new(std::sync::Mutex::new(Some(Box::new(engine))));

        let mut device_commands = Vec::new();
        let input = "set_stroke 30\n\nbogus 1\nset_wifi_ssid home\nset_sensation 70\n";
        run_console(input.as_bytes(), &shared, |cmd| {
            device_commands.push(cmd.clone());
            Ok(None)
        });

        let settings = shared.lock().unwrap().as_ref().unwrap().get_config().settings;
        assert_eq!(settings.stroke, 30.0);
        assert_eq!(settings.sensation, 70.0);
        assert_eq!(device_commands, vec![DeviceCommand::SetWifiSsid("home".to_string())]);
    }

    #[test]
    fn control_requests_update_only_given_fields() {
        let motor = SimulatedMotor::new(3000);
        let mut engine = StrokeEngine::new(Box::new(motor), EngineConfig::default()).unwrap();
        engine.init_motor().unwrap();

        let request: ControlRequest =
            serde_json::from_str(r#"{"pattern":"deeper","speed":25,"action":"start"}"#).unwrap();
        request.apply(&mut engine).unwrap();
        let config = engine.get_config();
        assert_eq!(config.pattern, PatternKind::Deeper);
        assert_eq!(config.settings.speed, 25.0);
        assert_eq!(config.settings.stroke, 50.0);
        assert_eq!(engine.state(), crate::engine::EngineState::Running);

        let bad: ControlRequest = serde_json::from_str(r#"{"stroke":20,"depth":140}"#).unwrap();
        assert!(bad.apply(&mut engine).is_err());
        assert_eq!(engine.get_config().settings.stroke, 50.0);

        let stop: ControlRequest = serde_json::from_str(r#"{"action":"stop"}"#).unwrap();
        stop.apply(&mut engine).unwrap();
        assert_eq!(engine.state(), crate::engine::EngineState::Ready);
    }

    #[test]
    fn engine_commands_need_an_engine() {
        let empty: SharedEngine = std::sync::Arc::new(std::sync::Mutex::new(None));
        assert!(handle_line("start", &empty, &mut |_| Ok(None)).is_err());
        assert!(handle_line("help", &empty, &mut |_| Ok(None)).unwrap().is_some());
    }

    #[test]
    fn help_lists_every_command() {
        let text = help_text();
        for (usage, _) in HELP {
            assert!(text.contains(usage));
        }
    }
}
