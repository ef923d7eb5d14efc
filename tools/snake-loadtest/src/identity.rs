use serde::{Deserialize, Serialize};

pub const DEFAULT_HEAD_COLOUR: &str = "green";
pub const DEFAULT_BODY_COLOUR: &str = "yellow";
pub const DEFAULT_EYES_COLOUR: &str = "black";

/// Cosmetic fields sent with `newPlayer`. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColourProfile {
    pub head: String,
    pub body: String,
    pub eyes: String,
}

impl Default for ColourProfile {
    fn default() -> Self {
        Self {
            head: DEFAULT_HEAD_COLOUR.to_string(),
            body: DEFAULT_BODY_COLOUR.to_string(),
            eyes: DEFAULT_EYES_COLOUR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub colours: ColourProfile,
}

#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    seed: u64,
    colours: ColourProfile,
}

impl IdentityGenerator {
    pub fn new(seed: u64, colours: ColourProfile) -> Self {
        Self { seed, colours }
    }

    pub fn identity(&self, index: usize) -> PlayerIdentity {
        let id = player_id_for(index as u32, self.seed).to_string();
        let name = format!("test_player{id}");

        PlayerIdentity {
            index,
            id,
            name,
            colours: self.colours.clone(),
        }
    }

    /// Seed for the movement RNG of the player at `index`.
    pub fn rng_seed(&self, index: usize) -> u64 {
        (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ self.seed.rotate_left(29)
    }
}

// odd multiplier is a bijection on u32, so ids never repeat within a run
fn player_id_for(index: u32, seed: u64) -> u32 {
    index.wrapping_mul(0x9e37_79b9) ^ (seed as u32).rotate_left(9)
}
