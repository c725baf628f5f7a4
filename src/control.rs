//! Fan actuation.
//!
//! [`Control`] owns the commands talking to the fan controller and
//! serializes every call to them: the hardware interface (typically IPMI)
//! is not reentrant. [`FanControl`] ties the zones to it.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;

use crate::{
    command::{self, CommandRunner},
    config::FanControlCfg,
    duration::parse_optional,
    error::{Error, Result},
    sensor::TemperatureSource,
    temperature_sensor::TemperatureSensor,
    zone::{FanZone, SpeedActuator, Zone},
};

pub const FAN_ZONE: &str = "FAN_ZONE";
pub const FAN_SPEED: &str = "FAN_SPEED";

/// Widest padding accepted in a parameter format.
const MAX_WIDTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Radix {
    Decimal,
    LowerHex,
    UpperHex,
    Octal,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Conversion {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Value(Conversion, Radix),
}

/// printf-style format for one integer: `%d`, `%02x`, `0x%02X`, `%#o`...
///
/// Supported flags are `-`, `0`, `+`, space and `#`, followed by an
/// optional width and one of the `d`, `i`, `x`, `X`, `o`, `b` verbs. `%%`
/// is a literal percent sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntFormat {
    pieces: Vec<Piece>,
}

impl IntFormat {
    pub fn parse(format: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::config(format!("invalid format {format:?}: {reason}"));
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            let mut conv = Conversion::default();
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => conv.left = true,
                    '0' => conv.zero = true,
                    '+' => conv.plus = true,
                    ' ' => conv.space = true,
                    '#' => conv.alternate = true,
                    _ => break,
                }
                chars.next();
            }
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                conv.width = conv
                    .width
                    .checked_mul(10)
                    .and_then(|width| width.checked_add(digit as usize))
                    .filter(|&width| width <= MAX_WIDTH)
                    .ok_or_else(|| invalid("width too large"))?;
                chars.next();
            }
            let radix = match chars.next() {
                Some('d' | 'i') => Radix::Decimal,
                Some('x') => Radix::LowerHex,
                Some('X') => Radix::UpperHex,
                Some('o') => Radix::Octal,
                Some('b') => Radix::Binary,
                Some(verb) => return Err(invalid(&format!("unsupported verb %{verb}"))),
                None => return Err(invalid("missing verb")),
            };

            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Value(conv, radix));
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(Self { pieces })
    }

    pub fn format(&self, value: i32) -> String {
        let mut output = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => output.push_str(text),
                Piece::Value(conv, radix) => output.push_str(&format_int(value, *conv, *radix)),
            }
        }
        output
    }
}

impl Default for IntFormat {
    fn default() -> Self {
        Self {
            pieces: vec![Piece::Value(Conversion::default(), Radix::Decimal)],
        }
    }
}

fn format_int(value: i32, conv: Conversion, radix: Radix) -> String {
    let magnitude = value.unsigned_abs();
    let (digits, prefix) = match radix {
        Radix::Decimal => (magnitude.to_string(), ""),
        Radix::LowerHex => (format!("{magnitude:x}"), "0x"),
        Radix::UpperHex => (format!("{magnitude:X}"), "0X"),
        Radix::Octal => (format!("{magnitude:o}"), "0"),
        Radix::Binary => (format!("{magnitude:b}"), "0b"),
    };
    let sign = if value < 0 {
        "-"
    } else if conv.plus {
        "+"
    } else if conv.space {
        " "
    } else {
        ""
    };
    let prefix = if conv.alternate && radix != Radix::Decimal {
        prefix
    } else {
        ""
    };

    let len = sign.len() + prefix.len() + digits.len();
    let padding = conv.width.saturating_sub(len);
    if conv.left {
        format!("{sign}{prefix}{digits}{}", " ".repeat(padding))
    } else if conv.zero {
        format!("{sign}{prefix}{}{digits}", "0".repeat(padding))
    } else {
        format!("{}{sign}{prefix}{digits}", " ".repeat(padding))
    }
}

/// Fan controller commands behind a single lock.
pub struct Control {
    init_command: Option<Arc<dyn CommandRunner>>,
    set_command: Arc<dyn CommandRunner>,
    exit_command: Option<Arc<dyn CommandRunner>>,
    formats: HashMap<String, IntFormat>,
    lock: Mutex<()>,
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("set_command", &self.set_command.command_line())
            .field("formats", &self.formats)
            .finish_non_exhaustive()
    }
}

impl Control {
    /// Builds the commands from configuration. The set command is
    /// mandatory; init and exit are optional.
    pub fn new(config: &FanControlCfg, simulate: bool) -> Result<Self> {
        if config.set_command.trim().is_empty() {
            return Err(Error::config("fan_control: missing set_command"));
        }
        let timeout = parse_optional(&config.timeout)?;
        let formats = config
            .parameters
            .iter()
            .filter(|(_, parameter)| !parameter.format.is_empty())
            .map(|(name, parameter)| Ok((name.clone(), IntFormat::parse(&parameter.format)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self::with_commands(
            command::build(&config.set_command, "", timeout, simulate)?,
            command::build_optional(&config.init_command, timeout, simulate)?,
            command::build_optional(&config.exit_command, timeout, simulate)?,
            formats,
        ))
    }

    pub fn with_commands(
        set_command: Arc<dyn CommandRunner>,
        init_command: Option<Arc<dyn CommandRunner>>,
        exit_command: Option<Arc<dyn CommandRunner>>,
        formats: HashMap<String, IntFormat>,
    ) -> Self {
        Self {
            init_command,
            set_command,
            exit_command,
            formats,
            lock: Mutex::new(()),
        }
    }

    /// Runs the init command, typically switching the controller to manual
    /// mode.
    pub async fn init(&self) -> Result<()> {
        self.run_optional(self.init_command.as_deref()).await
    }

    /// Runs the exit command, handing the fans back to the firmware.
    pub async fn exit(&self) -> Result<()> {
        self.run_optional(self.exit_command.as_deref()).await
    }

    async fn run_optional(&self, command: Option<&dyn CommandRunner>) -> Result<()> {
        let Some(command) = command else {
            return Ok(());
        };
        let _guard = self.lock.lock().await;
        command.run(None, None).await.map(|_| ())
    }

    /// Sends `speed` to zone `zone_id`, substituting `$FAN_ZONE` and
    /// `$FAN_SPEED`.
    pub async fn set_speed_command(&self, zone_id: i32, speed: i32) -> Result<()> {
        let _guard = self.lock.lock().await;
        let expand = |name: &str| match name {
            FAN_ZONE => self.format_value(name, zone_id),
            FAN_SPEED => self.format_value(name, speed),
            other => format!("${other}"),
        };
        self.set_command.run(None, Some(&expand)).await.map(|_| ())
    }

    fn format_value(&self, name: &str, value: i32) -> String {
        match self.formats.get(name) {
            Some(format) => format.format(value),
            None => value.to_string(),
        }
    }
}

#[async_trait]
impl SpeedActuator for Control {
    async fn set_speed(&self, zone_id: i32, speed: i32) -> Result<()> {
        self.set_speed_command(zone_id, speed).await
    }
}

/// The controller and every zone it drives.
#[derive(Debug)]
pub struct FanControl {
    control: Arc<Control>,
    zones: Vec<FanZone>,
}

impl FanControl {
    /// Builds the controller, then each zone with `reader` resolving the
    /// zone sensor names.
    pub fn new<F>(config: &FanControlCfg, simulate: bool, reader: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<Arc<dyn TemperatureSource>>,
    {
        let control = Arc::new(Control::new(config, simulate)?);
        Self::with_control(control, config, reader)
    }

    pub fn with_control<F>(control: Arc<Control>, config: &FanControlCfg, reader: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<Arc<dyn TemperatureSource>>,
    {
        let zones = config
            .zones
            .iter()
            .map(|(name, zone_cfg)| {
                let actuator: Arc<dyn SpeedActuator> = control.clone();
                FanZone::new(name, zone_cfg, &reader, Some(actuator)).map_err(|e| {
                    Error::config(format!("cannot create zone {name}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { control, zones })
    }

    pub fn control(&self) -> &Arc<Control> {
        &self.control
    }

    pub fn zones(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.iter().map(FanZone::zone)
    }

    /// Drives every zone to its default speed.
    pub async fn apply_default_speeds(&self) {
        for zone in self.zones() {
            debug!("{}: default speed {}%", zone.name(), zone.default_speed());
            zone.set_speed(zone.default_speed()).await;
        }
    }

    /// Takes the sensors of every zone, ready to be run, each paired with
    /// its zone name.
    pub fn take_sensors(&mut self) -> Vec<(String, TemperatureSensor)> {
        let sensors: Vec<_> = self
            .zones
            .iter_mut()
            .flat_map(|fan_zone| {
                let zone = fan_zone.zone().name().to_string();
                fan_zone
                    .take_sensors()
                    .into_iter()
                    .map(move |sensor| (zone.clone(), sensor))
            })
            .collect();
        info!(
            "fan control: {} zone(s), {} sensor(s)",
            self.zones.len(),
            sensors.len()
        );
        sensors
    }
}
