//! Bridge-side model of the bulb's last commanded state

use intellilight_proto::ble::BulbCommand;
use intellilight_proto::message::{LightDetails, LightStateReply, TransitionLightState};

use crate::colour::{Hsv, Rgb};

/// Last commanded appearance of the bulb
///
/// The colour is kept while the bulb is off so that "on" resumes where it left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightState {
    pub on_off: bool,
    pub colour: Hsv,
    /// Kelvin, 0 while in colour mode
    pub color_temp: u16,
    /// Set once a read from the bulb confirmed the state
    pub up_to_date: bool,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on_off: false,
            colour: Hsv::new(0.0, 0.0, 100.0),
            color_temp: 0,
            up_to_date: false,
        }
    }
}

impl LightState {
    /// Merge the colour fields of a transition, returning whether any applied
    pub fn merge(&mut self, transition: &TransitionLightState) -> bool {
        let mut changed = false;

        if let Some(hue) = transition.hue {
            self.colour.h = (hue as f32).rem_euclid(360.0);
            self.color_temp = 0;
            changed = true;
        }
        if let Some(saturation) = transition.saturation {
            self.colour.s = percent(saturation);
            self.color_temp = 0;
            changed = true;
        }
        if let Some(brightness) = transition.brightness {
            self.colour.v = percent(brightness);
            changed = true;
        }
        if let Some(temp) = transition.color_temp {
            let temp = temp.clamp(0.0, f64::from(u16::MAX)) as u16;
            self.color_temp = temp;
            if temp > 0 {
                // the bulb has no white channel, white is an unsaturated colour
                self.colour.s = 0.0;
            }
            changed = true;
        }

        changed
    }

    pub fn rgb(&self) -> Rgb {
        self.colour.to_rgb()
    }

    /// Take over the colour read back from the bulb
    pub fn apply_read(&mut self, command: BulbCommand) {
        match command {
            BulbCommand::Off => self.on_off = false,
            BulbCommand::Colour { r, g, b } => {
                self.on_off = true;
                self.colour = Rgb::new(r, g, b).to_hsv();
                self.color_temp = 0;
            }
        }
        self.up_to_date = true;
    }

    pub fn details(&self) -> LightDetails {
        LightDetails {
            mode: "normal",
            hue: self.colour.h.round() as u16 % 360,
            saturation: self.colour.s.round() as u8,
            brightness: self.colour.v.round() as u8,
            color_temp: self.color_temp,
        }
    }

    /// `light_state` object for sysinfo and `get_light_state`
    pub fn reply(&self) -> LightStateReply {
        LightStateReply::new(self.on_off, self.details())
    }
}

fn percent(value: f64) -> f32 {
    value.clamp(0.0, 100.0) as f32
}
