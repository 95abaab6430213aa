//! Static option tables for the selection surface, and the
//! "feeling lucky" randomizer built on top of them.

use rand::seq::SliceRandom;

use crate::error::{PromptError, Result};
use crate::scene::UserInput;

/// Scene count and narrative beat structure for one duration category.
#[derive(Debug, Clone, Copy)]
pub struct DurationInfo {
    pub key: &'static str,
    pub scenes: usize,
    pub description: &'static str,
    pub structure: &'static [&'static str],
}

pub const DURATIONS: &[DurationInfo] = &[
    DurationInfo {
        key: "14_seconds",
        scenes: 2,
        description: "2 scenes x 7 seconds each",
        structure: &["Setup/Approach", "Action/Climax"],
    },
    DurationInfo {
        key: "21_seconds",
        scenes: 3,
        description: "3 scenes x 7 seconds each",
        structure: &["Setup/Tension", "Confrontation/Action", "Resolution/Outcome"],
    },
];

/// Aspect ratio keys with their display labels.
pub const ASPECT_RATIOS: &[(&str, &str)] = &[
    ("16:9", "16:9 (Widescreen)"),
    ("9:16", "9:16 (Vertical)"),
    ("1:1", "1:1 (Square)"),
    ("4:3", "4:3 (Standard)"),
    ("3:4", "3:4 (Portrait)"),
];

pub const ENVIRONMENTS: &[&str] = &[
    "African Savanna",
    "Amazon Rainforest",
    "Arctic Tundra",
    "Coral Reef",
    "Mountain Range",
    "Dense Forest",
    "Scorching Desert",
    "Misty Swamp",
];

pub const TIMES_OF_DAY: &[&str] = &[
    "Golden Hour",
    "Misty Morning",
    "Harsh Midday Sun",
    "Dramatic Sunset",
    "Moonlit Night",
    "Stormy Afternoon",
];

pub const MOODS: &[&str] = &[
    "Tense",
    "Suspenseful",
    "Dramatic",
    "Majestic",
    "Chaotic",
    "Peaceful",
    "Intense",
    "Somber",
];

/// Scenarios drawn by the randomizer.
pub const LUCKY_SCENARIOS: &[&str] = &[
    "A pack of wolves coordinating to hunt a large bison in the snow",
    "An eagle diving to catch a fish from a river",
    "A Komodo dragon ambushing a deer",
    "A mother bear fiercely defending her cubs from a lone wolf",
    "Lizards attempting a raid on a nest of peacock eggs",
    "A huge python slowly stalking an unsuspecting monkey in the jungle canopy",
    "A tense standoff between a honey badger and a cobra over a meal",
];

/// Looks up the scene count and beat structure for a duration key.
/// Unknown keys fail before any network round trip is attempted.
pub fn duration_info(key: &str) -> Result<&'static DurationInfo> {
    DURATIONS
        .iter()
        .find(|d| d.key == key)
        .ok_or_else(|| PromptError::InvalidConfiguration(format!("unknown duration: {}", key)))
}

/// Fresh input with every field drawn uniformly from the option tables
/// and no reference video. Does not touch any run state.
pub fn random_input() -> UserInput {
    let mut rng = rand::thread_rng();
    UserInput {
        scenario: LUCKY_SCENARIOS.choose(&mut rng).unwrap().to_string(),
        duration: DURATIONS.choose(&mut rng).unwrap().key.to_string(),
        environment: ENVIRONMENTS.choose(&mut rng).unwrap().to_string(),
        time_of_day: TIMES_OF_DAY.choose(&mut rng).unwrap().to_string(),
        mood: MOODS.choose(&mut rng).unwrap().to_string(),
        aspect_ratio: ASPECT_RATIOS.choose(&mut rng).unwrap().0.to_string(),
        reference_video: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_table_scene_counts() {
        assert_eq!(duration_info("14_seconds").unwrap().scenes, 2);
        assert_eq!(duration_info("21_seconds").unwrap().scenes, 3);
    }

    #[test]
    fn structure_length_matches_scene_count() {
        for d in DURATIONS {
            assert_eq!(d.scenes, d.structure.len(), "{}", d.key);
        }
    }

    #[test]
    fn unknown_duration_is_invalid_configuration() {
        let err = duration_info("90_minutes").unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfiguration(_)));
    }

    #[test]
    fn random_input_only_draws_from_declared_options() {
        for _ in 0..1000 {
            let input = random_input();
            assert!(DURATIONS.iter().any(|d| d.key == input.duration));
            assert!(ASPECT_RATIOS.iter().any(|(k, _)| *k == input.aspect_ratio));
            assert!(LUCKY_SCENARIOS.contains(&input.scenario.as_str()));
            assert!(ENVIRONMENTS.contains(&input.environment.as_str()));
            assert!(TIMES_OF_DAY.contains(&input.time_of_day.as_str()));
            assert!(MOODS.contains(&input.mood.as_str()));
            assert!(input.reference_video.is_none());
        }
    }
}
