//! Closed identifier vocabularies baked into the notation.

/// Element identifiers accepted as the second argument of `dmg`/`rawdmg`.
pub const ELEMENTS: &[&str] = &[
    "pyro", "hydro", "electro", "cryo", "anemo", "geo", "dendro", "physical",
];

/// Canonical transformative reaction identifiers.
pub const REACTIONS: &[&str] = &[
    "overload",
    "swirl",
    "electrocharged",
    "superconduct",
    "shattered",
    "burning",
    "bloom",
    "hyperbloom",
    "burgeon",
];

/// Amplifying tags usable as the optional third argument of `dmg`/`rawdmg`.
pub const AMPLIFIERS: &[&str] = &["vaporize", "melt", "aggravate", "spread", "none"];

/// Attribute fields accepted inside a `total(stat.<field>)` aggregation call.
pub const TOTAL_FIELDS: &[&str] = &[
    "atk",
    "hp",
    "def",
    "em",
    "crit_rate",
    "crit_dmg",
    "energy_recharge",
    "heal_bonus",
    "shield_strength",
];

/// True if `s` names a recognized element.
pub fn is_element(s: &str) -> bool {
    ELEMENTS.contains(&s)
}

/// True if `s` names a recognized transformative reaction.
pub fn is_reaction(s: &str) -> bool {
    REACTIONS.contains(&s)
}

/// True if `s` is a legal third argument to a damage call.
pub fn is_amplifier(s: &str) -> bool {
    AMPLIFIERS.contains(&s) || REACTIONS.contains(&s)
}
