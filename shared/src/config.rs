/// Game rules shared with every client in the `init` message.
///
/// Clients run the physics and detect catches themselves, so they all need
/// the same constants. The relay only uses `max_throw_speed` and
/// `throw_cooldown_secs` for validation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "camelCase")]
pub struct GameRules {
    /// Time after a throw before the same player may throw again (seconds)
    pub throw_cooldown_secs: f64,
    /// Launch speed at full charge (m/s)
    pub max_throw_speed: f64,
    /// Time to reach full charge (seconds)
    pub max_charge_secs: f64,
    /// Player-ball distance that counts as a catch (m)
    pub catch_radius: f64,
    /// Ball height at or below which it has touched the ground (m)
    pub ground_height: f64,
    /// How often clients should send `playerUpdate` (milliseconds)
    pub update_interval_ms: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            throw_cooldown_secs: 5.0,
            max_throw_speed: 50.0,
            max_charge_secs: 3.0,
            catch_radius: 1.5,
            ground_height: 0.5,
            update_interval_ms: 100,
        }
    }
}

/// Upper bound on `throw_cooldown_secs` (one hour).
pub const MAX_THROW_COOLDOWN_SECS: f64 = 3600.0;

impl GameRules {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=MAX_THROW_COOLDOWN_SECS).contains(&self.throw_cooldown_secs) {
            return Err(format!(
                "throw_cooldown_secs must be between 0 and {}",
                MAX_THROW_COOLDOWN_SECS
            ));
        }
        if !self.max_throw_speed.is_finite() || self.max_throw_speed <= 0.0 {
            return Err("max_throw_speed must be finite and > 0".to_string());
        }
        if !self.max_charge_secs.is_finite() || self.max_charge_secs <= 0.0 {
            return Err("max_charge_secs must be finite and > 0".to_string());
        }
        if !self.catch_radius.is_finite() || self.catch_radius <= 0.0 {
            return Err("catch_radius must be finite and > 0".to_string());
        }
        if !self.ground_height.is_finite() {
            return Err("ground_height must be finite".to_string());
        }
        if self.update_interval_ms == 0 {
            return Err("update_interval_ms must be > 0".to_string());
        }
        Ok(())
    }
}
