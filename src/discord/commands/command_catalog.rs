// Discord commands module.
// Each feature gets its own command file.

pub mod curve;
pub mod leveling;
