//! Random persona generation for agent-controlled patient slots.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::domain::PlayerProfile;

const GENDERS: &[&str] = &["male", "female"];
const EDUCATIONS: &[&str] = &[
    "secondary",
    "some college",
    "undergraduate",
    "master's",
    "PhD",
];

/// Draw a random persona: gender, a 5-year age band starting between 18
/// and 63, education level, and a 0-10 institutional-trust score.
pub fn generate_profile() -> PlayerProfile {
    let mut rng = rand::thread_rng();

    let age_start = 18 + 5 * rng.gen_range(0..10u32);
    let age_end = (age_start + 4).min(80);

    PlayerProfile {
        gender: GENDERS
            .choose(&mut rng)
            .copied()
            .unwrap_or("female")
            .to_string(),
        age_band: format!("{age_start}-{age_end}"),
        education: EDUCATIONS
            .choose(&mut rng)
            .copied()
            .unwrap_or("undergraduate")
            .to_string(),
        institutional_trust_0_10: rng.gen_range(0..=10),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_profiles_stay_in_bounds() {
        for _ in 0..50 {
            let profile = generate_profile();
            assert!(profile.institutional_trust_0_10 <= 10);
            assert!(GENDERS.contains(&profile.gender.as_str()));
            assert!(EDUCATIONS.contains(&profile.education.as_str()));

            let (start, end) = profile
                .age_band
                .split_once('-')
                .expect("age band is start-end");
            let start: u32 = start.parse().unwrap();
            let end: u32 = end.parse().unwrap();
            assert!((18..=63).contains(&start));
            assert_eq!(end, start + 4);
        }
    }
}
