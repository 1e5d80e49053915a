//! Host-granted test cheats.
//!
//! Each cheat is a [`Cheat`] variant; [`PlayerModifiers`] is the per-player
//! set the server consults during simulation. Grants travel as a
//! `GameSettingChange` named `cheat.<player_id>` whose value is the JSON
//! `Cheat`; see [`CheatGrant`].

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::message::{NetMsg, PlayerId};

pub const CHEAT_SETTING_PREFIX: &str = "cheat.";

bitflags::bitflags! {
    /// Boolean cheats currently enabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct CheatFlags: u16 {
        const GOD_MODE = 1 << 0;
        const INFINITE_AMMO = 1 << 1;
        const INFINITE_JUMP = 1 << 2;
        const NO_RECOIL = 1 << 3;
        const NO_SPREAD = 1 << 4;
        const ESP_PLAYERS = 1 << 5;
        const ESP_MONSTERS = 1 << 6;
        const ESP_ENTITIES = 1 << 7;
    }
}

/// One cheat toggle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Cheat {
    GodMode(bool),
    InfiniteAmmo(bool),
    InfiniteJump(bool),
    NoRecoil(bool),
    NoSpread(bool),
    /// Health forced on grant and on every respawn; `0` clears it.
    ForcedHealth(f32),
    EspPlayers(bool),
    EspMonsters(bool),
    EspEntities(bool),
}

/// A cheat aimed at one player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheatGrant {
    pub target: PlayerId,
    pub cheat: Cheat,
}

impl CheatGrant {
    pub fn new(target: PlayerId, cheat: Cheat) -> Self {
        Self { target, cheat }
    }

    pub fn to_msg(&self) -> anyhow::Result<NetMsg> {
        Ok(NetMsg::GameSettingChange {
            setting_name: format!("{CHEAT_SETTING_PREFIX}{}", self.target.0),
            setting_value: serde_json::to_string(&self.cheat).context("encode cheat")?,
        })
    }

    /// `Ok(None)` when the setting is not a cheat grant at all.
    pub fn from_setting(name: &str, value: &str) -> anyhow::Result<Option<Self>> {
        let Some(target) = name.strip_prefix(CHEAT_SETTING_PREFIX) else {
            return Ok(None);
        };
        let target = target
            .parse::<u32>()
            .map(PlayerId)
            .with_context(|| format!("cheat target {target:?}"))?;
        let cheat = serde_json::from_str(value).context("decode cheat")?;
        Ok(Some(Self { target, cheat }))
    }
}

/// Modifier set attached to a player.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerModifiers {
    flags: CheatFlags,
    forced_health: Option<f32>,
}

impl PlayerModifiers {
    pub fn apply(&mut self, cheat: Cheat) {
        let (flag, on) = match cheat {
            Cheat::GodMode(on) => (CheatFlags::GOD_MODE, on),
            Cheat::InfiniteAmmo(on) => (CheatFlags::INFINITE_AMMO, on),
            Cheat::InfiniteJump(on) => (CheatFlags::INFINITE_JUMP, on),
            Cheat::NoRecoil(on) => (CheatFlags::NO_RECOIL, on),
            Cheat::NoSpread(on) => (CheatFlags::NO_SPREAD, on),
            Cheat::EspPlayers(on) => (CheatFlags::ESP_PLAYERS, on),
            Cheat::EspMonsters(on) => (CheatFlags::ESP_MONSTERS, on),
            Cheat::EspEntities(on) => (CheatFlags::ESP_ENTITIES, on),
            Cheat::ForcedHealth(health) => {
                self.forced_health = (health > 0.0).then_some(health);
                return;
            }
        };
        self.flags.set(flag, on);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_any(&self) -> bool {
        !self.flags.is_empty() || self.forced_health.is_some()
    }

    pub fn god_mode(&self) -> bool {
        self.flags.contains(CheatFlags::GOD_MODE)
    }

    pub fn infinite_ammo(&self) -> bool {
        self.flags.contains(CheatFlags::INFINITE_AMMO)
    }

    pub fn infinite_jump(&self) -> bool {
        self.flags.contains(CheatFlags::INFINITE_JUMP)
    }

    pub fn no_recoil(&self) -> bool {
        self.flags.contains(CheatFlags::NO_RECOIL)
    }

    pub fn no_spread(&self) -> bool {
        self.flags.contains(CheatFlags::NO_SPREAD)
    }

    pub fn esp(&self) -> CheatFlags {
        self.flags & (CheatFlags::ESP_PLAYERS | CheatFlags::ESP_MONSTERS | CheatFlags::ESP_ENTITIES)
    }

    pub fn forced_health(&self) -> Option<f32> {
        self.forced_health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_and_reset() {
        let mut mods = PlayerModifiers::default();
        assert!(!mods.has_any());

        mods.apply(Cheat::GodMode(true));
        mods.apply(Cheat::NoSpread(true));
        assert!(mods.god_mode() && mods.no_spread());
        assert!(!mods.infinite_ammo());

        mods.apply(Cheat::GodMode(false));
        assert!(!mods.god_mode());
        assert!(mods.has_any());

        mods.reset();
        assert!(!mods.has_any());
    }

    #[test]
    fn forced_health_zero_clears() {
        let mut mods = PlayerModifiers::default();
        mods.apply(Cheat::ForcedHealth(250.0));
        assert_eq!(mods.forced_health(), Some(250.0));
        mods.apply(Cheat::ForcedHealth(0.0));
        assert_eq!(mods.forced_health(), None);
    }

    #[test]
    fn grant_survives_the_setting_message() {
        let grant = CheatGrant::new(PlayerId(3), Cheat::InfiniteJump(true));
        let NetMsg::GameSettingChange {
            setting_name,
            setting_value,
        } = grant.to_msg().unwrap()
        else {
            panic!("not a setting change");
        };
        assert_eq!(setting_name, "cheat.3");
        assert_eq!(CheatGrant::from_setting(&setting_name, &setting_value).unwrap(), Some(grant));
    }

    #[test]
    fn non_cheat_settings_are_not_grants() {
        assert_eq!(CheatGrant::from_setting("gravity", "20").unwrap(), None);
        assert!(CheatGrant::from_setting("cheat.host", r#"{"GodMode":true}"#).is_err());
        assert!(CheatGrant::from_setting("cheat.2", "fly").is_err());
    }

    #[test]
    fn esp_mask_only_reports_esp_flags() {
        let mut mods = PlayerModifiers::default();
        mods.apply(Cheat::EspMonsters(true));
        mods.apply(Cheat::InfiniteJump(true));
        assert_eq!(mods.esp(), CheatFlags::ESP_MONSTERS);
    }
}
