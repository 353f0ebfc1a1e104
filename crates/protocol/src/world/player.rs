use bitflags::bitflags;

use super::actor::NetId;

pub const MAX_PLAYER_NAME: usize = 32;
pub const MAX_HANDICAP: u8 = 200;
pub const NO_TEAM: u8 = 255;

bitflags! {
    /// Which userinfo fields an update carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UserInfoFlags: u16 {
        const NAME = 1 << 0;
        const GENDER = 1 << 1;
        const COLOR = 1 << 2;
        const AIM_DISTANCE = 1 << 3;
        const SKIN = 1 << 4;
        const RAIL_COLOR = 1 << 5;
        const HANDICAP = 1 << 6;
        const PLAYER_CLASS = 1 << 7;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    /// 0 male, 1 female, 2 other.
    pub gender: u8,
    pub color: i32,
    pub aim_distance: i32,
    pub skin: String,
    pub rail_color: i32,
    pub handicap: u8,
    pub player_class: String,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
            gender: 0,
            color: 0x0040_cf00,
            aim_distance: 0,
            skin: "base".to_string(),
            rail_color: 0,
            handicap: 0,
            player_class: "DoomPlayer".to_string(),
        }
    }
}

impl UserInfo {
    /// Copies the fields selected by `flags` from `other`, clamping values
    /// the way an incoming update is clamped.
    pub fn merge(&mut self, flags: UserInfoFlags, other: &UserInfo) {
        if flags.contains(UserInfoFlags::NAME) {
            self.name = other.name.chars().take(MAX_PLAYER_NAME).collect();
        }
        if flags.contains(UserInfoFlags::GENDER) {
            self.gender = other.gender.min(2);
        }
        if flags.contains(UserInfoFlags::COLOR) {
            self.color = other.color;
        }
        if flags.contains(UserInfoFlags::AIM_DISTANCE) {
            self.aim_distance = other.aim_distance;
        }
        if flags.contains(UserInfoFlags::SKIN) {
            self.skin = other.skin.clone();
        }
        if flags.contains(UserInfoFlags::RAIL_COLOR) {
            self.rail_color = other.rail_color;
        }
        if flags.contains(UserInfoFlags::HANDICAP) {
            self.handicap = other.handicap.min(MAX_HANDICAP);
        }
        if flags.contains(UserInfoFlags::PLAYER_CLASS) {
            self.player_class = other.player_class.clone();
        }
    }
}

/// Strips control characters and surrounding whitespace from a player name.
pub fn clean_player_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_PLAYER_NAME)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Powerup {
    pub name: String,
    pub ticks: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub name: String,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub slot: u8,
    pub body: Option<NetId>,
    pub userinfo: UserInfo,
    pub team: Option<u8>,
    pub spectating: bool,
    pub dead_spectator: bool,
    pub health: i32,
    pub max_health: i32,
    pub armor: i32,
    pub frags: i32,
    pub points: i32,
    pub wins: i32,
    pub powerups: Vec<Powerup>,
    pub inventory: Vec<InventoryItem>,
    pub weapon: Option<String>,
    pub lagging: bool,
    pub ping: u16,
}

impl Player {
    pub fn new(slot: u8, userinfo: UserInfo) -> Self {
        Self {
            slot,
            body: None,
            userinfo,
            team: None,
            spectating: false,
            dead_spectator: false,
            health: 100,
            max_health: 100,
            armor: 0,
            frags: 0,
            points: 0,
            wins: 0,
            powerups: Vec::new(),
            inventory: Vec::new(),
            weapon: None,
            lagging: false,
            ping: 0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }

    pub fn give_powerup(&mut self, name: &str, ticks: i32) {
        match self.powerups.iter_mut().find(|p| p.name == name) {
            Some(powerup) => powerup.ticks = ticks,
            None => self.powerups.push(Powerup {
                name: name.to_string(),
                ticks,
            }),
        }
    }

    /// Sets the held amount; zero or less removes the item.
    pub fn set_inventory(&mut self, name: &str, amount: i32) {
        if amount <= 0 {
            self.inventory.retain(|item| item.name != name);
            return;
        }
        match self.inventory.iter_mut().find(|item| item.name == name) {
            Some(item) => item.amount = amount,
            None => self.inventory.push(InventoryItem {
                name: name.to_string(),
                amount,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_only_copies_flagged_fields() {
        let mut info = UserInfo::default();
        let update = UserInfo {
            name: "Marine".into(),
            gender: 9,
            skin: "other".into(),
            handicap: 250,
            ..Default::default()
        };

        info.merge(
            UserInfoFlags::NAME | UserInfoFlags::GENDER | UserInfoFlags::HANDICAP,
            &update,
        );

        assert_eq!(info.name, "Marine");
        assert_eq!(info.gender, 2);
        assert_eq!(info.handicap, MAX_HANDICAP);
        assert_eq!(info.skin, "base");
    }

    #[test]
    fn test_clean_player_name() {
        assert_eq!(clean_player_name("  Bob\u{7}  "), "Bob");
        assert_eq!(clean_player_name(&"x".repeat(40)).len(), MAX_PLAYER_NAME);
    }

    #[test]
    fn test_inventory_amounts() {
        let mut player = Player::new(0, UserInfo::default());
        player.set_inventory("Clip", 50);
        player.set_inventory("Clip", 20);
        assert_eq!(player.inventory.len(), 1);
        assert_eq!(player.inventory[0].amount, 20);

        player.set_inventory("Clip", 0);
        assert!(player.inventory.is_empty());
    }
}
