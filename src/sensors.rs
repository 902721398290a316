// Sensor model: raw core-sensor frame and its decoded, unit-correct snapshot
//
// Decoding is a pure function of the raw bytes. Bits outside a field's
// documented width are ignored.

use serde::Serialize;

/// Battery counts are tenths of a volt
const BATTERY_COUNTS_PER_VOLT: f64 = 10.0;

/// Battery thresholds for the stock 4S pack (volts)
pub const BATTERY_CAPACITY_VOLTS: f64 = 16.5;
pub const BATTERY_LOW_VOLTS: f64 = 14.0;
pub const BATTERY_DANGEROUS_VOLTS: f64 = 13.2;

// Flag bits
const BUMPER_RIGHT: u8 = 0x01;
const BUMPER_CENTER: u8 = 0x02;
const BUMPER_LEFT: u8 = 0x04;
const WHEEL_DROP_RIGHT: u8 = 0x01;
const WHEEL_DROP_LEFT: u8 = 0x02;
const CLIFF_RIGHT: u8 = 0x01;
const CLIFF_CENTER: u8 = 0x02;
const CLIFF_LEFT: u8 = 0x04;
const BUTTON_0: u8 = 0x01;
const BUTTON_1: u8 = 0x02;
const BUTTON_2: u8 = 0x04;
const OVERCURRENT_LEFT: u8 = 0x01;
const OVERCURRENT_RIGHT: u8 = 0x02;

// Charger byte layout
const CHARGER_ADAPTER: u8 = 0x10;
const CHARGER_STATE_MASK: u8 = 0x06;
const CHARGER_DISCHARGING: u8 = 0x00;
const CHARGER_CHARGED: u8 = 0x02;
const CHARGER_CHARGING: u8 = 0x06;

/// Core sensor block exactly as transmitted by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawTelemetryFrame {
    pub time_stamp: u16,
    pub bumper: u8,
    pub wheel_drop: u8,
    pub cliff: u8,
    pub left_encoder: u16,
    pub right_encoder: u16,
    pub left_pwm: i8,
    pub right_pwm: i8,
    pub buttons: u8,
    pub charger: u8,
    pub battery: u8,
    pub over_current: u8,
}

impl RawTelemetryFrame {
    pub fn decode(&self) -> SensorSnapshot {
        decode(self)
    }
}

/// Charging status reported in the charger byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerState {
    Discharging,
    DockingCharged,
    DockingCharging,
    AdapterCharged,
    AdapterCharging,
    /// State bits the protocol does not define
    Unknown(u8),
}

impl ChargerState {
    pub fn from_raw(raw: u8) -> Self {
        let adapter = raw & CHARGER_ADAPTER != 0;
        match (raw & CHARGER_STATE_MASK, adapter) {
            (CHARGER_DISCHARGING, _) => ChargerState::Discharging,
            (CHARGER_CHARGED, false) => ChargerState::DockingCharged,
            (CHARGER_CHARGED, true) => ChargerState::AdapterCharged,
            (CHARGER_CHARGING, false) => ChargerState::DockingCharging,
            (CHARGER_CHARGING, true) => ChargerState::AdapterCharging,
            _ => ChargerState::Unknown(raw),
        }
    }

    pub fn is_charging(&self) -> bool {
        matches!(
            self,
            ChargerState::DockingCharging | ChargerState::AdapterCharging
        )
    }

    /// Connected to a dock or adapter, whether charging or full
    pub fn is_connected(&self) -> bool {
        !matches!(self, ChargerState::Discharging | ChargerState::Unknown(_))
    }
}

/// Coarse battery health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    Healthy,
    Low,
    Dangerous,
}

/// Decoded sensor reading; field names are the external contract
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub time_stamp: u16,
    pub bumper_left: bool,
    pub bumper_center: bool,
    pub bumper_right: bool,
    pub wheel_drop_left: bool,
    pub wheel_drop_right: bool,
    pub cliff_left: bool,
    pub cliff_center: bool,
    pub cliff_right: bool,
    pub left_encoder: u16,
    pub right_encoder: u16,
    pub left_pwm: i8,
    pub right_pwm: i8,
    pub button0: bool,
    pub button1: bool,
    pub button2: bool,
    pub charger_state: ChargerState,
    #[serde(serialize_with = "two_decimals")]
    pub battery_voltage: f64,
    pub overcurrent_left: bool,
    pub overcurrent_right: bool,
}

fn two_decimals<S: serde::Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

#[inline]
fn flag(raw: u8, mask: u8) -> bool {
    raw & mask != 0
}

/// Battery raw counts to volts
pub fn battery_volts(raw: u8) -> f64 {
    f64::from(raw) / BATTERY_COUNTS_PER_VOLT
}

/// Decode one raw frame into a snapshot
pub fn decode(raw: &RawTelemetryFrame) -> SensorSnapshot {
    SensorSnapshot {
        time_stamp: raw.time_stamp,
        bumper_left: flag(raw.bumper, BUMPER_LEFT),
        bumper_center: flag(raw.bumper, BUMPER_CENTER),
        bumper_right: flag(raw.bumper, BUMPER_RIGHT),
        wheel_drop_left: flag(raw.wheel_drop, WHEEL_DROP_LEFT),
        wheel_drop_right: flag(raw.wheel_drop, WHEEL_DROP_RIGHT),
        cliff_left: flag(raw.cliff, CLIFF_LEFT),
        cliff_center: flag(raw.cliff, CLIFF_CENTER),
        cliff_right: flag(raw.cliff, CLIFF_RIGHT),
        left_encoder: raw.left_encoder,
        right_encoder: raw.right_encoder,
        left_pwm: raw.left_pwm,
        right_pwm: raw.right_pwm,
        button0: flag(raw.buttons, BUTTON_0),
        button1: flag(raw.buttons, BUTTON_1),
        button2: flag(raw.buttons, BUTTON_2),
        charger_state: ChargerState::from_raw(raw.charger),
        battery_voltage: battery_volts(raw.battery),
        overcurrent_left: flag(raw.over_current, OVERCURRENT_LEFT),
        overcurrent_right: flag(raw.over_current, OVERCURRENT_RIGHT),
    }
}

impl SensorSnapshot {
    pub fn any_bumper(&self) -> bool {
        self.bumper_left || self.bumper_center || self.bumper_right
    }

    pub fn any_cliff(&self) -> bool {
        self.cliff_left || self.cliff_center || self.cliff_right
    }

    pub fn any_wheel_drop(&self) -> bool {
        self.wheel_drop_left || self.wheel_drop_right
    }

    /// Motors are being driven (nonzero duty cycle on either wheel)
    pub fn motors_active(&self) -> bool {
        self.left_pwm != 0 || self.right_pwm != 0
    }

    /// Battery voltage as text with two decimals, e.g. "15.00"
    pub fn battery_text(&self) -> String {
        format!("{:.2}", self.battery_voltage)
    }

    pub fn battery_level(&self) -> BatteryLevel {
        if self.battery_voltage < BATTERY_DANGEROUS_VOLTS {
            BatteryLevel::Dangerous
        } else if self.battery_voltage < BATTERY_LOW_VOLTS {
            BatteryLevel::Low
        } else {
            BatteryLevel::Healthy
        }
    }

    /// Charge estimate between the dangerous and full voltages, 0..=100
    pub fn battery_percent(&self) -> f64 {
        let span = BATTERY_CAPACITY_VOLTS - BATTERY_DANGEROUS_VOLTS;
        ((self.battery_voltage - BATTERY_DANGEROUS_VOLTS) / span * 100.0).clamp(0.0, 100.0)
    }
}
