// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "leveling/leveling_service.rs"]
pub mod leveling;
